//! MCPWM 操作器
//!
//! 连接到所属定时器，持有比较器和生成器两张 arena。

use std::sync::Arc;

use super::comparator::{Comparator, ComparatorNode};
use super::generator::{Generator, GeneratorNode};
use super::timer::Timer;
use super::{check_gpio, ComparatorConfig, GeneratorConfig, OperatorConfig, STALE_COMPARATOR, STALE_GENERATOR};
use crate::arena::{Arena, ArenaKey};
use crate::driver::{Driver, McpwmOperatorHandle};
use crate::error::{Error, Result};

/// 定时器持有的操作器节点
pub(super) struct OperatorNode<D: Driver> {
    driver: Arc<D>,
    handle: McpwmOperatorHandle,
    config: OperatorConfig,
    pub(super) comparators: Arena<ComparatorNode<D>>,
    pub(super) generators: Arena<GeneratorNode<D>>,
}

impl<D: Driver> OperatorNode<D> {
    pub(super) fn new(driver: Arc<D>, group_id: u8, config: OperatorConfig) -> Result<Self> {
        let handle = driver_try!(driver.mcpwm_new_operator(group_id, &config), "mcpwm_new_operator");
        Ok(Self {
            driver,
            handle,
            config,
            comparators: Arena::new(),
            generators: Arena::new(),
        })
    }

    pub(super) fn handle(&self) -> McpwmOperatorHandle {
        self.handle
    }
}

impl<D: Driver> Drop for OperatorNode<D> {
    fn drop(&mut self) {
        self.generators.clear();
        self.comparators.clear();
        teardown!(self.driver.mcpwm_del_operator(self.handle), "mcpwm_del_operator");
    }
}

/// 操作器句柄
///
/// 强引用所属定时器。克隆只复制句柄，节点仍只有一个。
pub struct Operator<D: Driver> {
    timer: Arc<Timer<D>>,
    key: ArenaKey,
}

impl<D: Driver> Operator<D> {
    pub(super) fn new(timer: Arc<Timer<D>>, key: ArenaKey) -> Self {
        Self { timer, key }
    }

    pub fn timer(&self) -> &Arc<Timer<D>> {
        &self.timer
    }

    pub(super) fn key(&self) -> ArenaKey {
        self.key
    }

    /// 操作器是否仍挂在定时器上
    pub fn is_alive(&self) -> bool {
        self.timer.contains_operator(self.key)
    }

    pub fn handle(&self) -> Result<McpwmOperatorHandle> {
        self.timer.with_operator(self.key, |node| Ok(node.handle))
    }

    pub fn config(&self) -> Result<OperatorConfig> {
        self.timer.with_operator(self.key, |node| Ok(node.config))
    }

    pub fn comparator_count(&self) -> usize {
        self.timer
            .with_operator(self.key, |node| Ok(node.comparators.len()))
            .unwrap_or(0)
    }

    pub fn generator_count(&self) -> usize {
        self.timer
            .with_operator(self.key, |node| Ok(node.generators.len()))
            .unwrap_or(0)
    }

    /// 新建比较器，初始比较值为 0
    pub fn add_comparator(&self, config: &ComparatorConfig) -> Result<Comparator<D>> {
        let key = self.timer.with_operator(self.key, |node| {
            let comparator = ComparatorNode::new(node.driver.clone(), node.handle, *config)?;
            Ok(node.comparators.insert(comparator))
        })?;
        Ok(Comparator::new(self.clone(), key))
    }

    /// 新建生成器
    pub fn add_generator(&self, config: &GeneratorConfig) -> Result<Generator<D>> {
        check_gpio(self.timer.layout(), config.gpio)?;
        let key = self.timer.with_operator(self.key, |node| {
            let generator = GeneratorNode::new(node.driver.clone(), node.handle, *config)?;
            Ok(node.generators.insert(generator))
        })?;
        Ok(Generator::new(self.clone(), key))
    }

    /// 立即移除比较器并释放硬件
    pub fn remove_comparator(&self, comparator: Comparator<D>) -> Result<()> {
        if !comparator.operator().same(self) {
            return Err(Error::InvalidArgument("比较器不属于该操作器"));
        }
        let removed = self.timer.with_operator(self.key, |node| {
            node.comparators
                .remove(comparator.key())
                .ok_or(Error::InvalidArgument(STALE_COMPARATOR))
        })?;
        drop(removed);
        Ok(())
    }

    /// 立即移除生成器并释放硬件
    pub fn remove_generator(&self, generator: Generator<D>) -> Result<()> {
        if !generator.operator().same(self) {
            return Err(Error::InvalidArgument("生成器不属于该操作器"));
        }
        let removed = self.timer.with_operator(self.key, |node| {
            node.generators
                .remove(generator.key())
                .ok_or(Error::InvalidArgument(STALE_GENERATOR))
        })?;
        drop(removed);
        Ok(())
    }

    pub(super) fn same(&self, other: &Operator<D>) -> bool {
        Arc::ptr_eq(&self.timer, &other.timer) && self.key == other.key
    }
}

impl<D: Driver> Clone for Operator<D> {
    fn clone(&self) -> Self {
        Self {
            timer: self.timer.clone(),
            key: self.key,
        }
    }
}

impl<D: Driver> std::fmt::Debug for Operator<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operator").field("key", &self.key).finish()
    }
}
