//! 驱动协作者接口
//!
//! 注册表本身不实现任何外设逻辑，所有硬件操作都经由这里的 trait 交给底层驱动：
//!
//! - [`EspDriver`](esp::EspDriver)：目标板上基于 `esp-idf-sys` 的实现
//! - [`MockDriver`](mock::MockDriver)：主机上的内存模型，测试和演示程序使用
//!
//! 每个方法对应一个 ESP-IDF 调用，失败时返回原始 `esp_err_t`。

use std::sync::Arc;

use crate::error::DriverResult;
use crate::peripherals::adc::AdcChannelConfig;
use crate::peripherals::event_loop::{EventBase, EventId, EventLoopConfig};
use crate::peripherals::gpio::{GpioConfig, GpioMode, InterruptType, Pull};
use crate::peripherals::gptimer::{AlarmConfig, AlarmEventData, GpTimerConfig};
use crate::peripherals::mcpwm::{
    ComparatorConfig, FaultCallbacks, GeneratorAction, GeneratorConfig, GpioFaultConfig, OperatorConfig,
    TimerConfig, TimerDirection, TimerEvent, TimerEventCallbacks,
};

#[cfg(target_os = "espidf")]
pub mod esp;
pub mod events;
pub mod mock;

macro_rules! raw_handles {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub struct $name(pub usize);
        )*
    };
}

raw_handles! {
    /// `adc_oneshot_unit_handle_t`
    AdcUnitHandle,
    /// `adc_cali_handle_t`
    AdcCaliHandle,
    /// `mcpwm_timer_handle_t`
    McpwmTimerHandle,
    /// `mcpwm_oper_handle_t`
    McpwmOperatorHandle,
    /// `mcpwm_cmpr_handle_t`
    McpwmComparatorHandle,
    /// `mcpwm_gen_handle_t`
    McpwmGeneratorHandle,
    /// `mcpwm_fault_handle_t`
    McpwmFaultHandle,
    /// `gptimer_handle_t`
    GpTimerHandle,
    /// `esp_event_loop_handle_t`
    EventLoopHandle,
    /// `esp_event_handler_instance_t`
    EventHandlerInstance,
}

/// GPIO 中断回调，在中断上下文执行
pub type IsrHandler = Arc<dyn Fn() + Send + Sync>;

/// GPTimer 报警回调，返回值表示是否唤醒了更高优先级的任务
pub type AlarmCallback = Arc<dyn Fn(&AlarmEventData) -> bool + Send + Sync>;

/// 事件回调：事件基、事件编号、事件数据
pub type EventCallback = Arc<dyn Fn(EventBase, EventId, &[u8]) + Send + Sync>;

/// 事件循环目标：默认循环和显式创建的循环走不同的驱动入口
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopTarget {
    Default,
    Handle(EventLoopHandle),
}

/// `mcpwm_timer_start_stop_cmd_t`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartStopCommand {
    StartNoStop,
    StartStopEmpty,
    StartStopFull,
    StopEmpty,
    StopFull,
}

pub trait AdcDriver {
    fn adc_new_unit(&self, unit: u8) -> DriverResult<AdcUnitHandle>;
    fn adc_del_unit(&self, handle: AdcUnitHandle) -> DriverResult<()>;
    fn adc_config_channel(&self, handle: AdcUnitHandle, channel: u8, config: &AdcChannelConfig) -> DriverResult<()>;
    fn adc_read(&self, handle: AdcUnitHandle, channel: u8) -> DriverResult<i32>;
    /// 中断上下文可用的读取
    fn adc_read_isr(&self, handle: AdcUnitHandle, channel: u8) -> DriverResult<i32>;
    fn adc_cali_create(&self, unit: u8, config: &AdcChannelConfig) -> DriverResult<AdcCaliHandle>;
    fn adc_cali_delete(&self, cali: AdcCaliHandle) -> DriverResult<()>;
    /// 原始值换算为毫伏，中断上下文可用
    fn adc_cali_raw_to_voltage(&self, cali: AdcCaliHandle, raw: i32) -> DriverResult<i32>;
    /// GPIO → (ADC 单元, 通道)
    fn adc_io_to_channel(&self, pin: u8) -> DriverResult<(u8, u8)>;
    /// (ADC 单元, 通道) → GPIO
    fn adc_channel_to_io(&self, unit: u8, channel: u8) -> DriverResult<u8>;
}

pub trait GpioDriver {
    /// 按完整配置初始化引脚
    fn gpio_config(&self, config: &GpioConfig, interrupt: InterruptType) -> DriverResult<()>;
    fn gpio_reset(&self, pin: u8) -> DriverResult<()>;
    fn gpio_set_direction(&self, pin: u8, mode: GpioMode) -> DriverResult<()>;
    fn gpio_set_pull_up(&self, pin: u8, pull: Pull) -> DriverResult<()>;
    fn gpio_set_pull_down(&self, pin: u8, pull: Pull) -> DriverResult<()>;
    fn gpio_set_intr_type(&self, pin: u8, interrupt: InterruptType) -> DriverResult<()>;
    fn gpio_intr_enable(&self, pin: u8) -> DriverResult<()>;
    fn gpio_intr_disable(&self, pin: u8) -> DriverResult<()>;
    fn gpio_install_isr_service(&self) -> DriverResult<()>;
    fn gpio_isr_handler_add(&self, pin: u8, handler: IsrHandler) -> DriverResult<()>;
    fn gpio_isr_handler_remove(&self, pin: u8) -> DriverResult<()>;
    fn gpio_set_level(&self, pin: u8, level: bool) -> DriverResult<()>;
    fn gpio_get_level(&self, pin: u8) -> bool;
}

pub trait McpwmDriver {
    fn mcpwm_new_timer(&self, config: &TimerConfig) -> DriverResult<McpwmTimerHandle>;
    fn mcpwm_del_timer(&self, timer: McpwmTimerHandle) -> DriverResult<()>;
    fn mcpwm_timer_enable(&self, timer: McpwmTimerHandle) -> DriverResult<()>;
    fn mcpwm_timer_disable(&self, timer: McpwmTimerHandle) -> DriverResult<()>;
    fn mcpwm_timer_start_stop(&self, timer: McpwmTimerHandle, command: StartStopCommand) -> DriverResult<()>;
    /// 只有设置了的回调才会挂到驱动的分发表上
    fn mcpwm_timer_register_event_callbacks(
        &self,
        timer: McpwmTimerHandle,
        callbacks: &TimerEventCallbacks,
    ) -> DriverResult<()>;

    fn mcpwm_new_operator(&self, group_id: u8, config: &OperatorConfig) -> DriverResult<McpwmOperatorHandle>;
    fn mcpwm_del_operator(&self, operator: McpwmOperatorHandle) -> DriverResult<()>;
    fn mcpwm_operator_connect_timer(&self, operator: McpwmOperatorHandle, timer: McpwmTimerHandle) -> DriverResult<()>;

    fn mcpwm_new_comparator(
        &self,
        operator: McpwmOperatorHandle,
        config: &ComparatorConfig,
    ) -> DriverResult<McpwmComparatorHandle>;
    fn mcpwm_del_comparator(&self, comparator: McpwmComparatorHandle) -> DriverResult<()>;
    fn mcpwm_comparator_set_compare_value(&self, comparator: McpwmComparatorHandle, value: u32) -> DriverResult<()>;

    fn mcpwm_new_generator(
        &self,
        operator: McpwmOperatorHandle,
        config: &GeneratorConfig,
    ) -> DriverResult<McpwmGeneratorHandle>;
    fn mcpwm_del_generator(&self, generator: McpwmGeneratorHandle) -> DriverResult<()>;
    fn mcpwm_generator_set_action_on_compare_event(
        &self,
        generator: McpwmGeneratorHandle,
        direction: TimerDirection,
        comparator: McpwmComparatorHandle,
        action: GeneratorAction,
    ) -> DriverResult<()>;
    fn mcpwm_generator_set_action_on_timer_event(
        &self,
        generator: McpwmGeneratorHandle,
        direction: TimerDirection,
        event: TimerEvent,
        action: GeneratorAction,
    ) -> DriverResult<()>;

    fn mcpwm_new_gpio_fault(&self, config: &GpioFaultConfig) -> DriverResult<McpwmFaultHandle>;
    fn mcpwm_del_fault(&self, fault: McpwmFaultHandle) -> DriverResult<()>;
    fn mcpwm_fault_register_event_callbacks(&self, fault: McpwmFaultHandle, callbacks: &FaultCallbacks)
        -> DriverResult<()>;
}

pub trait GpTimerDriver {
    fn gptimer_new(&self, config: &GpTimerConfig) -> DriverResult<GpTimerHandle>;
    fn gptimer_del(&self, timer: GpTimerHandle) -> DriverResult<()>;
    fn gptimer_register_alarm_callback(&self, timer: GpTimerHandle, callback: AlarmCallback) -> DriverResult<()>;
    fn gptimer_set_alarm_action(&self, timer: GpTimerHandle, alarm: &AlarmConfig) -> DriverResult<()>;
    fn gptimer_enable(&self, timer: GpTimerHandle) -> DriverResult<()>;
    fn gptimer_disable(&self, timer: GpTimerHandle) -> DriverResult<()>;
    fn gptimer_start(&self, timer: GpTimerHandle) -> DriverResult<()>;
    fn gptimer_stop(&self, timer: GpTimerHandle) -> DriverResult<()>;
}

pub trait EventLoopDriver {
    /// 创建默认事件循环，已存在视为成功
    fn event_loop_create_default(&self) -> DriverResult<()>;
    fn event_loop_create(&self, config: &EventLoopConfig) -> DriverResult<EventLoopHandle>;
    fn event_loop_delete(&self, handle: EventLoopHandle) -> DriverResult<()>;
    fn event_loop_run(&self, handle: EventLoopHandle, ticks_to_run: u32) -> DriverResult<()>;
    fn event_handler_register(
        &self,
        target: LoopTarget,
        base: EventBase,
        id: EventId,
        callback: EventCallback,
    ) -> DriverResult<EventHandlerInstance>;
    fn event_handler_unregister(
        &self,
        target: LoopTarget,
        base: EventBase,
        id: EventId,
        instance: EventHandlerInstance,
    ) -> DriverResult<()>;
    fn event_post(
        &self,
        target: LoopTarget,
        base: EventBase,
        id: EventId,
        data: &[u8],
        ticks_to_wait: u32,
    ) -> DriverResult<()>;
    /// 中断上下文投递，返回是否唤醒了更高优先级的任务
    fn event_isr_post(&self, target: LoopTarget, base: EventBase, id: EventId, data: &[u8]) -> DriverResult<bool>;
}

/// 完整的驱动能力集合
pub trait Driver: AdcDriver + GpioDriver + McpwmDriver + GpTimerDriver + EventLoopDriver + Send + Sync + 'static {}

impl<T> Driver for T where T: AdcDriver + GpioDriver + McpwmDriver + GpTimerDriver + EventLoopDriver + Send + Sync + 'static
{}
