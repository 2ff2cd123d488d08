//! 通用硬件定时器（GPTimer）
//!
//! 构造时依次完成：创建定时器、注册报警回调（如果有）、配置报警、使能。

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::driver::{AlarmCallback, Driver, GpTimerHandle};
use crate::error::{Error, Result};

/// 计数方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum CountDirection {
    Down = 0,
    #[default]
    Up = 1,
}

/// 报警配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlarmConfig {
    /// 报警时的计数值
    pub alarm_count: u64,
    /// 自动重载时写回的计数值
    pub reload_count: u64,
    pub auto_reload_on_alarm: bool,
}

/// GPTimer 配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpTimerConfig {
    pub direction: CountDirection,
    /// 计数分辨率（Hz），默认 1 MHz
    pub resolution_hz: u32,
    pub priority: i32,
    pub alarm: AlarmConfig,
}

impl GpTimerConfig {
    pub const DEFAULT_RESOLUTION_HZ: u32 = 1_000_000;

    /// 周期报警：1 MHz 计数，到期后自动重载为 0
    pub fn periodic(period: Duration) -> Self {
        let micros = u64::try_from(period.as_micros()).unwrap_or(u64::MAX);
        Self {
            direction: CountDirection::Up,
            resolution_hz: Self::DEFAULT_RESOLUTION_HZ,
            priority: 0,
            alarm: AlarmConfig {
                alarm_count: micros,
                reload_count: 0,
                auto_reload_on_alarm: true,
            },
        }
    }
}

/// 报警事件数据
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmEventData {
    pub count_value: u64,
    pub alarm_value: u64,
}

#[derive(Debug, Default)]
struct GpTimerState {
    enabled: bool,
    running: bool,
    alarm: Option<AlarmConfig>,
}

/// 通用定时器
///
/// 释放时按需停止、关闭，最后删除，每一步失败只记录日志
pub struct GpTimer<D: Driver> {
    driver: Arc<D>,
    handle: GpTimerHandle,
    config: GpTimerConfig,
    callback: Option<AlarmCallback>,
    state: Mutex<GpTimerState>,
}

impl<D: Driver> GpTimer<D> {
    pub(crate) fn new(driver: Arc<D>, config: GpTimerConfig, callback: Option<AlarmCallback>) -> Result<Self> {
        if config.resolution_hz == 0 {
            return Err(Error::InvalidArgument("GPTimer 分辨率不能为 0"));
        }
        let handle = driver_try!(driver.gptimer_new(&config), "gptimer_new_timer");
        let timer = Self {
            driver,
            handle,
            config,
            callback,
            state: Mutex::new(GpTimerState::default()),
        };

        if let Some(callback) = &timer.callback {
            driver_try!(
                timer.driver.gptimer_register_alarm_callback(handle, callback.clone()),
                "gptimer_register_event_callbacks"
            );
        }
        timer.set_alarm(config.alarm)?;
        driver_try!(timer.driver.gptimer_enable(handle), "gptimer_enable");
        timer.state().enabled = true;
        Ok(timer)
    }

    pub fn handle(&self) -> GpTimerHandle {
        self.handle
    }

    pub fn config(&self) -> &GpTimerConfig {
        &self.config
    }

    pub fn has_alarm_callback(&self) -> bool {
        self.callback.is_some()
    }

    pub fn is_enabled(&self) -> bool {
        self.state().enabled
    }

    pub fn is_running(&self) -> bool {
        self.state().running
    }

    /// 当前生效的报警配置
    pub fn alarm(&self) -> Option<AlarmConfig> {
        self.state().alarm
    }

    /// 重新配置报警
    pub fn set_alarm(&self, alarm: AlarmConfig) -> Result<()> {
        let mut state = self.state();
        driver_try!(self.driver.gptimer_set_alarm_action(self.handle, &alarm), "gptimer_set_alarm_action");
        state.alarm = Some(alarm);
        Ok(())
    }

    pub fn start(&self) -> Result<()> {
        let mut state = self.state();
        driver_try!(self.driver.gptimer_start(self.handle), "gptimer_start");
        state.running = true;
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        let mut state = self.state();
        driver_try!(self.driver.gptimer_stop(self.handle), "gptimer_stop");
        state.running = false;
        Ok(())
    }

    fn state(&self) -> MutexGuard<'_, GpTimerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<D: Driver> Drop for GpTimer<D> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner());
        if state.running {
            teardown!(self.driver.gptimer_stop(self.handle), "gptimer_stop");
        }
        if state.enabled {
            teardown!(self.driver.gptimer_disable(self.handle), "gptimer_disable");
        }
        teardown!(self.driver.gptimer_del(self.handle), "gptimer_del_timer");
    }
}

impl<D: Driver> std::fmt::Debug for GpTimer<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpTimer")
            .field("handle", &self.handle)
            .field("config", &self.config)
            .finish()
    }
}
