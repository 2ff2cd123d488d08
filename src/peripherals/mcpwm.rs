//! MCPWM 所有权树
//!
//! ```text
//! Timer ──┬── Operator ──┬── Comparator
//!         │              └── Generator
//!         └── Operator ...
//! GpioFault（独立）
//! ```
//!
//! 定时器强持有所有操作器节点，操作器节点强持有比较器和生成器节点。调用方拿到的
//! [`Operator`]、[`Comparator`]、[`Generator`] 只是 `Arc<Timer>` 加槽位 key，子节点被移除后
//! 再使用旧句柄返回 [`Error::InvalidArgument`](crate::Error::InvalidArgument)。
//!
//! 操作器句柄强引用定时器，所以定时器总是比它的操作器活得久。

use std::sync::Arc;

use crate::config::ChipLayout;
use crate::driver::Driver;
use crate::error::{Error, Result};

mod comparator;
mod fault;
mod generator;
mod operator;
mod timer;

pub use comparator::Comparator;
pub use fault::GpioFault;
pub use generator::{CompareEventAction, Generator, TimerEventAction};
pub use operator::Operator;
pub use timer::Timer;

/// 中断优先级，`Default` 由驱动选择
///
/// MCPWM 驱动只接受 1 到 3 级，所以这里不提供更高的级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i32)]
pub enum InterruptPriority {
    #[default]
    Default = 0,
    Level1 = 1,
    Level2 = 2,
    Level3 = 3,
}

/// 计数模式，取值与 `mcpwm_timer_count_mode_t` 一致
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum CountMode {
    Pause = 0,
    #[default]
    Up = 1,
    Down = 2,
    UpDown = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum TimerDirection {
    #[default]
    Up = 0,
    Down = 1,
}

/// 定时器事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum TimerEvent {
    Empty = 0,
    Full = 1,
}

/// 生成器在事件发生时的输出动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum GeneratorAction {
    #[default]
    Keep = 0,
    Low = 1,
    High = 2,
    Toggle = 3,
}

/// 启动命令
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StartCommand {
    NoStop,
    StopEmpty,
    StopFull,
}

/// 停止命令
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopCommand {
    StopEmpty,
    StopFull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TimerFlags {
    pub update_period_on_empty: bool,
    pub update_period_on_sync: bool,
    pub allow_power_down: bool,
}

/// MCPWM 定时器配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerConfig {
    pub group_id: u8,
    /// 计数分辨率（Hz）
    pub resolution_hz: u32,
    pub count_mode: CountMode,
    pub period_ticks: u32,
    pub priority: InterruptPriority,
    pub flags: TimerFlags,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            group_id: 0,
            resolution_hz: 1_000_000,
            count_mode: CountMode::Up,
            period_ticks: 1000,
            priority: InterruptPriority::Default,
            flags: TimerFlags::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OperatorFlags {
    pub update_gen_action_on_tez: bool,
    pub update_gen_action_on_tep: bool,
    pub update_gen_action_on_sync: bool,
    pub update_dead_time_on_tez: bool,
    pub update_dead_time_on_tep: bool,
    pub update_dead_time_on_sync: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OperatorConfig {
    pub priority: InterruptPriority,
    pub flags: OperatorFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ComparatorFlags {
    pub update_cmp_on_tez: bool,
    pub update_cmp_on_tep: bool,
    pub update_cmp_on_sync: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ComparatorConfig {
    pub priority: InterruptPriority,
    pub flags: ComparatorFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct GeneratorFlags {
    pub invert_pwm: bool,
    pub io_loop_back: bool,
    pub io_od_mode: bool,
    pub pull_up: bool,
    pub pull_down: bool,
}

/// 生成器配置，`gpio` 为输出引脚
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GeneratorConfig {
    pub gpio: u8,
    pub flags: GeneratorFlags,
}

impl GeneratorConfig {
    pub const fn new(gpio: u8) -> Self {
        Self {
            gpio,
            flags: GeneratorFlags {
                invert_pwm: false,
                io_loop_back: false,
                io_od_mode: false,
                pull_up: false,
                pull_down: false,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct GpioFaultFlags {
    /// 故障有效电平，`true` 为高电平
    pub active_level: bool,
    pub io_loop_back: bool,
    pub pull_up: bool,
    pub pull_down: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpioFaultConfig {
    pub group_id: u8,
    pub priority: InterruptPriority,
    pub gpio: u8,
    pub flags: GpioFaultFlags,
}

/// 定时器事件数据
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerEventData {
    pub count_value: u32,
    pub direction: TimerDirection,
}

/// 定时器事件回调，返回值表示是否唤醒了更高优先级的任务
pub type TimerEventCallback = Arc<dyn Fn(&TimerEventData) -> bool + Send + Sync>;

/// 故障事件回调
pub type FaultCallback = Arc<dyn Fn() -> bool + Send + Sync>;

/// 定时器事件回调组，未设置的回调不会交给驱动
#[derive(Clone, Default)]
pub struct TimerEventCallbacks {
    pub on_full: Option<TimerEventCallback>,
    pub on_empty: Option<TimerEventCallback>,
    pub on_stop: Option<TimerEventCallback>,
}

impl TimerEventCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_full<F>(mut self, callback: F) -> Self
    where
        F: Fn(&TimerEventData) -> bool + Send + Sync + 'static,
    {
        self.on_full = Some(Arc::new(callback));
        self
    }

    pub fn on_empty<F>(mut self, callback: F) -> Self
    where
        F: Fn(&TimerEventData) -> bool + Send + Sync + 'static,
    {
        self.on_empty = Some(Arc::new(callback));
        self
    }

    pub fn on_stop<F>(mut self, callback: F) -> Self
    where
        F: Fn(&TimerEventData) -> bool + Send + Sync + 'static,
    {
        self.on_stop = Some(Arc::new(callback));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.on_full.is_none() && self.on_empty.is_none() && self.on_stop.is_none()
    }
}

impl std::fmt::Debug for TimerEventCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerEventCallbacks")
            .field("on_full", &self.on_full.is_some())
            .field("on_empty", &self.on_empty.is_some())
            .field("on_stop", &self.on_stop.is_some())
            .finish()
    }
}

/// 故障进入/退出回调
#[derive(Clone, Default)]
pub struct FaultCallbacks {
    pub on_enter: Option<FaultCallback>,
    pub on_exit: Option<FaultCallback>,
}

impl FaultCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_enter<F>(mut self, callback: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.on_enter = Some(Arc::new(callback));
        self
    }

    pub fn on_exit<F>(mut self, callback: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.on_exit = Some(Arc::new(callback));
        self
    }
}

impl std::fmt::Debug for FaultCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultCallbacks")
            .field("on_enter", &self.on_enter.is_some())
            .field("on_exit", &self.on_exit.is_some())
            .finish()
    }
}

/// MCPWM 工厂
///
/// 定时器和故障对象每次请求都新建，不做冲突检查
pub struct Mcpwm<D: Driver> {
    driver: Arc<D>,
    layout: ChipLayout,
}

impl<D: Driver> Mcpwm<D> {
    pub(crate) fn new(driver: Arc<D>, layout: ChipLayout) -> Self {
        Self { driver, layout }
    }

    /// 创建定时器，初始为未使能状态
    pub fn timer(&self, config: &TimerConfig) -> Result<Arc<Timer<D>>> {
        self.check_group(config.group_id)?;
        Ok(Arc::new(Timer::new(self.driver.clone(), self.layout, *config)?))
    }

    /// 创建 GPIO 故障检测对象
    pub fn gpio_fault(&self, config: &GpioFaultConfig) -> Result<GpioFault<D>> {
        self.check_group(config.group_id)?;
        check_gpio(&self.layout, config.gpio)?;
        GpioFault::new(self.driver.clone(), *config)
    }

    fn check_group(&self, group_id: u8) -> Result<()> {
        if group_id as usize >= self.layout.mcpwm_groups {
            return Err(Error::OutOfRange {
                resource: "MCPWM 组",
                index: group_id as usize,
                capacity: self.layout.mcpwm_groups,
            });
        }
        Ok(())
    }
}

pub(crate) fn check_gpio(layout: &ChipLayout, gpio: u8) -> Result<()> {
    if !layout.is_valid_gpio(gpio) {
        return Err(Error::InvalidArgument("MCPWM 配置中的 GPIO 在芯片上不存在"));
    }
    Ok(())
}

pub(crate) const STALE_OPERATOR: &str = "MCPWM 操作器已被移除";
pub(crate) const STALE_COMPARATOR: &str = "MCPWM 比较器已被移除";
pub(crate) const STALE_GENERATOR: &str = "MCPWM 生成器已被移除";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::MockDriver;
    use crate::error::ErrorKind;

    #[test]
    fn test_group_validated() {
        let mcpwm = Mcpwm::new(Arc::new(MockDriver::new()), ChipLayout::ESP32S3);
        let config = TimerConfig {
            group_id: 2,
            ..TimerConfig::default()
        };
        assert_eq!(mcpwm.timer(&config).unwrap_err().kind(), ErrorKind::InvalidArgument);
        assert!(mcpwm.timer(&TimerConfig::default()).is_ok());
    }

    #[test]
    fn test_fault_gpio_validated() {
        let mcpwm = Mcpwm::new(Arc::new(MockDriver::new()), ChipLayout::ESP32S3);
        let config = GpioFaultConfig {
            group_id: 0,
            priority: InterruptPriority::Default,
            gpio: 23,
            flags: GpioFaultFlags::default(),
        };
        assert_eq!(mcpwm.gpio_fault(&config).unwrap_err().kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_priority_levels_match_driver_range() {
        assert_eq!(InterruptPriority::default() as i32, 0);
        assert_eq!(InterruptPriority::Level1 as i32, 1);
        assert_eq!(InterruptPriority::Level3 as i32, 3);
    }

    #[test]
    fn test_callbacks_builder() {
        let callbacks = TimerEventCallbacks::new().on_full(|_| false);
        assert!(callbacks.on_full.is_some());
        assert!(callbacks.on_empty.is_none());
        assert!(!callbacks.is_empty());
        assert!(TimerEventCallbacks::new().is_empty());
    }
}
