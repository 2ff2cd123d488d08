//! MCPWM 定时器
//!
//! 树根：持有全部操作器，释放时先拆子节点再停用、删除定时器。

use std::sync::{Arc, Mutex, MutexGuard};

use super::operator::{Operator, OperatorNode};
use super::{OperatorConfig, StartCommand, StopCommand, TimerConfig, TimerEventCallbacks, STALE_OPERATOR};
use crate::arena::{Arena, ArenaKey};
use crate::config::ChipLayout;
use crate::driver::{Driver, McpwmTimerHandle, StartStopCommand};
use crate::error::{Error, Result};

struct TimerInner<D: Driver> {
    enabled: bool,
    callbacks: TimerEventCallbacks,
    operators: Arena<OperatorNode<D>>,
}

/// MCPWM 定时器
///
/// 构造后处于未使能状态。释放时先关闭定时器，再按生成器、比较器、操作器的顺序
/// 拆除所有子树，最后删除定时器本身。
pub struct Timer<D: Driver> {
    driver: Arc<D>,
    layout: ChipLayout,
    config: TimerConfig,
    handle: McpwmTimerHandle,
    inner: Mutex<TimerInner<D>>,
}

impl<D: Driver> Timer<D> {
    pub(super) fn new(driver: Arc<D>, layout: ChipLayout, config: TimerConfig) -> Result<Self> {
        let handle = driver_try!(driver.mcpwm_new_timer(&config), "mcpwm_new_timer");
        log::debug!("MCPWM 定时器已创建: 组 {}", config.group_id);
        Ok(Self {
            driver,
            layout,
            config,
            handle,
            inner: Mutex::new(TimerInner {
                enabled: false,
                callbacks: TimerEventCallbacks::default(),
                operators: Arena::new(),
            }),
        })
    }

    pub fn config(&self) -> &TimerConfig {
        &self.config
    }

    pub fn handle(&self) -> McpwmTimerHandle {
        self.handle
    }

    pub fn is_enabled(&self) -> bool {
        self.inner().enabled
    }

    /// 当前挂在定时器上的操作器数量
    pub fn operator_count(&self) -> usize {
        self.inner().operators.len()
    }

    pub fn callbacks(&self) -> TimerEventCallbacks {
        self.inner().callbacks.clone()
    }

    /// 注册事件回调，只有设置了的回调才会交给驱动
    pub fn set_callbacks(&self, callbacks: TimerEventCallbacks) -> Result<()> {
        let mut inner = self.inner();
        driver_try!(
            self.driver.mcpwm_timer_register_event_callbacks(self.handle, &callbacks),
            "mcpwm_timer_register_event_callbacks"
        );
        inner.callbacks = callbacks;
        Ok(())
    }

    /// 使能定时器，已使能时不做任何事
    pub fn enable(&self) -> Result<()> {
        let mut inner = self.inner();
        if inner.enabled {
            return Ok(());
        }
        driver_try!(self.driver.mcpwm_timer_enable(self.handle), "mcpwm_timer_enable");
        inner.enabled = true;
        Ok(())
    }

    /// 关闭定时器，未使能时不做任何事
    pub fn disable(&self) -> Result<()> {
        let mut inner = self.inner();
        if !inner.enabled {
            return Ok(());
        }
        driver_try!(self.driver.mcpwm_timer_disable(self.handle), "mcpwm_timer_disable");
        inner.enabled = false;
        Ok(())
    }

    pub fn start(&self, command: StartCommand) -> Result<()> {
        let command = match command {
            StartCommand::NoStop => StartStopCommand::StartNoStop,
            StartCommand::StopEmpty => StartStopCommand::StartStopEmpty,
            StartCommand::StopFull => StartStopCommand::StartStopFull,
        };
        self.start_stop(command)
    }

    pub fn stop(&self, command: StopCommand) -> Result<()> {
        let command = match command {
            StopCommand::StopEmpty => StartStopCommand::StopEmpty,
            StopCommand::StopFull => StartStopCommand::StopFull,
        };
        self.start_stop(command)
    }

    fn start_stop(&self, command: StartStopCommand) -> Result<()> {
        let inner = self.inner();
        if !inner.enabled {
            return Err(Error::InvalidState("MCPWM 定时器未使能"));
        }
        driver_try!(
            self.driver.mcpwm_timer_start_stop(self.handle, command),
            "mcpwm_timer_start_stop"
        );
        Ok(())
    }

    /// 新建操作器并连接到本定时器
    pub fn add_operator(self: &Arc<Self>, config: &OperatorConfig) -> Result<Operator<D>> {
        let node = OperatorNode::new(self.driver.clone(), self.config.group_id, *config)?;
        driver_try!(
            self.driver.mcpwm_operator_connect_timer(node.handle(), self.handle),
            "mcpwm_operator_connect_timer"
        );
        let key = self.inner().operators.insert(node);
        Ok(Operator::new(self.clone(), key))
    }

    /// 立即拆除一个操作器及其全部比较器和生成器
    pub fn remove_operator(&self, operator: Operator<D>) -> Result<()> {
        if !std::ptr::eq(Arc::as_ptr(operator.timer()), self) {
            return Err(Error::InvalidArgument("操作器不属于该定时器"));
        }
        let removed = self.inner().operators.remove(operator.key());
        match removed {
            Some(node) => {
                drop(node);
                Ok(())
            }
            None => Err(Error::InvalidArgument(STALE_OPERATOR)),
        }
    }

    pub(super) fn layout(&self) -> &ChipLayout {
        &self.layout
    }

    pub(super) fn contains_operator(&self, key: ArenaKey) -> bool {
        self.inner().operators.contains(key)
    }

    /// 在持锁状态下访问操作器节点，节点已移除时返回 `InvalidArgument`
    pub(super) fn with_operator<R, F>(&self, key: ArenaKey, f: F) -> Result<R>
    where
        F: FnOnce(&mut OperatorNode<D>) -> Result<R>,
    {
        let mut inner = self.inner();
        let node = inner
            .operators
            .get_mut(key)
            .ok_or(Error::InvalidArgument(STALE_OPERATOR))?;
        f(node)
    }

    fn inner(&self) -> MutexGuard<'_, TimerInner<D>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<D: Driver> Drop for Timer<D> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner());
        if inner.enabled {
            teardown!(self.driver.mcpwm_timer_disable(self.handle), "mcpwm_timer_disable");
            inner.enabled = false;
        }
        inner.operators.clear();
        teardown!(self.driver.mcpwm_del_timer(self.handle), "mcpwm_del_timer");
        log::debug!("MCPWM 定时器已删除: 组 {}", self.config.group_id);
    }
}

impl<D: Driver> std::fmt::Debug for Timer<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer")
            .field("handle", &self.handle)
            .field("config", &self.config)
            .finish()
    }
}
