//! 基于 `esp-idf-sys` 的驱动实现
//!
//! 中断和事件回调不直接把用户对象的指针交给 IDF：每类回调有一张按引脚号或句柄索引的表，
//! 表中的 `Box` 提供稳定地址作为 `user_ctx`，跳板函数从那里取回回调并调用。
//! 条目在对应的删除/摘除调用成功后才释放；事件循环删除成功时，注册在它上面的事件上下文一并丢弃。
//! 事件数据的帧格式见 [`events`](super::events)。

use std::collections::HashMap;
use std::ffi::{c_char, c_void, CStr};
use std::ptr;
use std::sync::{Mutex, MutexGuard};

use esp_idf_sys as sys;

use super::events::{self, FramedBases, HandlerContexts};
use super::*;
use crate::error::{codes, DriverError};
use crate::peripherals::mcpwm::{TimerEventData, TimerEventCallback};

fn esp(code: sys::esp_err_t) -> DriverResult<()> {
    DriverError::check(code)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// IDF 的事件基是进程级的，登记表也是
static FRAMED_BASES: FramedBases = FramedBases::new();

/// 目标板驱动
pub struct EspDriver {
    isr_handlers: Mutex<HashMap<u8, Box<IsrHandler>>>,
    timer_callbacks: Mutex<HashMap<McpwmTimerHandle, Box<TimerEventCallbacks>>>,
    fault_callbacks: Mutex<HashMap<McpwmFaultHandle, Box<FaultCallbacks>>>,
    alarm_callbacks: Mutex<HashMap<GpTimerHandle, Box<AlarmCallback>>>,
    event_handlers: Mutex<HandlerContexts<Box<EventCallback>>>,
}

impl EspDriver {
    pub fn new() -> Self {
        Self {
            isr_handlers: Mutex::new(HashMap::new()),
            timer_callbacks: Mutex::new(HashMap::new()),
            fault_callbacks: Mutex::new(HashMap::new()),
            alarm_callbacks: Mutex::new(HashMap::new()),
            event_handlers: Mutex::new(HandlerContexts::new()),
        }
    }
}

impl Default for EspDriver {
    fn default() -> Self {
        Self::new()
    }
}

fn adc_channel_config(config: &AdcChannelConfig) -> sys::adc_oneshot_chan_cfg_t {
    sys::adc_oneshot_chan_cfg_t {
        atten: config.attenuation as _,
        bitwidth: config.bitwidth as _,
    }
}

impl AdcDriver for EspDriver {
    fn adc_new_unit(&self, unit: u8) -> DriverResult<AdcUnitHandle> {
        let config = sys::adc_oneshot_unit_init_cfg_t {
            unit_id: unit as _,
            ..Default::default()
        };
        let mut handle: sys::adc_oneshot_unit_handle_t = ptr::null_mut();
        esp(unsafe { sys::adc_oneshot_new_unit(&config, &mut handle) })?;
        Ok(AdcUnitHandle(handle as usize))
    }

    fn adc_del_unit(&self, handle: AdcUnitHandle) -> DriverResult<()> {
        esp(unsafe { sys::adc_oneshot_del_unit(handle.0 as _) })
    }

    fn adc_config_channel(&self, handle: AdcUnitHandle, channel: u8, config: &AdcChannelConfig) -> DriverResult<()> {
        let config = adc_channel_config(config);
        esp(unsafe { sys::adc_oneshot_config_channel(handle.0 as _, channel as _, &config) })
    }

    fn adc_read(&self, handle: AdcUnitHandle, channel: u8) -> DriverResult<i32> {
        let mut raw = 0;
        esp(unsafe { sys::adc_oneshot_read(handle.0 as _, channel as _, &mut raw) })?;
        Ok(raw)
    }

    fn adc_read_isr(&self, handle: AdcUnitHandle, channel: u8) -> DriverResult<i32> {
        let mut raw = 0;
        esp(unsafe { sys::adc_oneshot_read_isr(handle.0 as _, channel as _, &mut raw) })?;
        Ok(raw)
    }

    #[cfg(esp32)]
    fn adc_cali_create(&self, unit: u8, config: &AdcChannelConfig) -> DriverResult<AdcCaliHandle> {
        let scheme = sys::adc_cali_line_fitting_config_t {
            unit_id: unit as _,
            atten: config.attenuation as _,
            bitwidth: config.bitwidth as _,
            ..Default::default()
        };
        let mut handle: sys::adc_cali_handle_t = ptr::null_mut();
        esp(unsafe { sys::adc_cali_create_scheme_line_fitting(&scheme, &mut handle) })?;
        Ok(AdcCaliHandle(handle as usize))
    }

    #[cfg(not(esp32))]
    fn adc_cali_create(&self, unit: u8, config: &AdcChannelConfig) -> DriverResult<AdcCaliHandle> {
        let scheme = sys::adc_cali_curve_fitting_config_t {
            unit_id: unit as _,
            atten: config.attenuation as _,
            bitwidth: config.bitwidth as _,
            ..Default::default()
        };
        let mut handle: sys::adc_cali_handle_t = ptr::null_mut();
        esp(unsafe { sys::adc_cali_create_scheme_curve_fitting(&scheme, &mut handle) })?;
        Ok(AdcCaliHandle(handle as usize))
    }

    #[cfg(esp32)]
    fn adc_cali_delete(&self, cali: AdcCaliHandle) -> DriverResult<()> {
        esp(unsafe { sys::adc_cali_delete_scheme_line_fitting(cali.0 as _) })
    }

    #[cfg(not(esp32))]
    fn adc_cali_delete(&self, cali: AdcCaliHandle) -> DriverResult<()> {
        esp(unsafe { sys::adc_cali_delete_scheme_curve_fitting(cali.0 as _) })
    }

    fn adc_cali_raw_to_voltage(&self, cali: AdcCaliHandle, raw: i32) -> DriverResult<i32> {
        let mut millivolts = 0;
        esp(unsafe { sys::adc_cali_raw_to_voltage(cali.0 as _, raw, &mut millivolts) })?;
        Ok(millivolts)
    }

    fn adc_io_to_channel(&self, pin: u8) -> DriverResult<(u8, u8)> {
        let mut unit: sys::adc_unit_t = 0;
        let mut channel: sys::adc_channel_t = 0;
        esp(unsafe { sys::adc_oneshot_io_to_channel(pin as _, &mut unit, &mut channel) })?;
        Ok((unit as u8, channel as u8))
    }

    fn adc_channel_to_io(&self, unit: u8, channel: u8) -> DriverResult<u8> {
        let mut io = 0;
        esp(unsafe { sys::adc_oneshot_channel_to_io(unit as _, channel as _, &mut io) })?;
        Ok(io as u8)
    }
}

unsafe extern "C" fn gpio_isr_trampoline(arg: *mut c_void) {
    let handler = &*(arg as *const IsrHandler);
    handler();
}

impl GpioDriver for EspDriver {
    fn gpio_config(&self, config: &GpioConfig, interrupt: InterruptType) -> DriverResult<()> {
        let raw = sys::gpio_config_t {
            pin_bit_mask: 1u64 << config.pin,
            mode: config.mode.bits() as _,
            pull_up_en: config.pull_up.is_enabled() as _,
            pull_down_en: config.pull_down.is_enabled() as _,
            intr_type: interrupt as _,
            ..Default::default()
        };
        esp(unsafe { sys::gpio_config(&raw) })
    }

    fn gpio_reset(&self, pin: u8) -> DriverResult<()> {
        esp(unsafe { sys::gpio_reset_pin(pin as _) })
    }

    fn gpio_set_direction(&self, pin: u8, mode: GpioMode) -> DriverResult<()> {
        esp(unsafe { sys::gpio_set_direction(pin as _, mode.bits() as _) })
    }

    fn gpio_set_pull_up(&self, pin: u8, pull: Pull) -> DriverResult<()> {
        esp(unsafe {
            if pull.is_enabled() {
                sys::gpio_pullup_en(pin as _)
            } else {
                sys::gpio_pullup_dis(pin as _)
            }
        })
    }

    fn gpio_set_pull_down(&self, pin: u8, pull: Pull) -> DriverResult<()> {
        esp(unsafe {
            if pull.is_enabled() {
                sys::gpio_pulldown_en(pin as _)
            } else {
                sys::gpio_pulldown_dis(pin as _)
            }
        })
    }

    fn gpio_set_intr_type(&self, pin: u8, interrupt: InterruptType) -> DriverResult<()> {
        esp(unsafe { sys::gpio_set_intr_type(pin as _, interrupt as _) })
    }

    fn gpio_intr_enable(&self, pin: u8) -> DriverResult<()> {
        esp(unsafe { sys::gpio_intr_enable(pin as _) })
    }

    fn gpio_intr_disable(&self, pin: u8) -> DriverResult<()> {
        esp(unsafe { sys::gpio_intr_disable(pin as _) })
    }

    fn gpio_install_isr_service(&self) -> DriverResult<()> {
        match esp(unsafe { sys::gpio_install_isr_service(0) }) {
            // 其他组件已经装过
            Err(e) if e.code() == codes::ESP_ERR_INVALID_STATE => Ok(()),
            result => result,
        }
    }

    fn gpio_isr_handler_add(&self, pin: u8, handler: IsrHandler) -> DriverResult<()> {
        let mut handlers = lock(&self.isr_handlers);
        let context = Box::new(handler);
        let arg = &*context as *const IsrHandler as *mut c_void;
        esp(unsafe { sys::gpio_isr_handler_add(pin as _, Some(gpio_isr_trampoline), arg) })?;
        handlers.insert(pin, context);
        Ok(())
    }

    fn gpio_isr_handler_remove(&self, pin: u8) -> DriverResult<()> {
        let mut handlers = lock(&self.isr_handlers);
        esp(unsafe { sys::gpio_isr_handler_remove(pin as _) })?;
        handlers.remove(&pin);
        Ok(())
    }

    fn gpio_set_level(&self, pin: u8, level: bool) -> DriverResult<()> {
        esp(unsafe { sys::gpio_set_level(pin as _, level as u32) })
    }

    fn gpio_get_level(&self, pin: u8) -> bool {
        unsafe { sys::gpio_get_level(pin as _) != 0 }
    }
}

unsafe fn timer_event(edata: *const sys::mcpwm_timer_event_data_t) -> TimerEventData {
    let edata = &*edata;
    TimerEventData {
        count_value: edata.count_value,
        direction: if edata.direction == 0 {
            TimerDirection::Up
        } else {
            TimerDirection::Down
        },
    }
}

unsafe fn call_timer_callback(
    callback: &Option<TimerEventCallback>,
    edata: *const sys::mcpwm_timer_event_data_t,
) -> bool {
    match callback {
        Some(callback) => callback(&timer_event(edata)),
        None => false,
    }
}

unsafe extern "C" fn timer_full_trampoline(
    _timer: sys::mcpwm_timer_handle_t,
    edata: *const sys::mcpwm_timer_event_data_t,
    user_ctx: *mut c_void,
) -> bool {
    let callbacks = &*(user_ctx as *const TimerEventCallbacks);
    call_timer_callback(&callbacks.on_full, edata)
}

unsafe extern "C" fn timer_empty_trampoline(
    _timer: sys::mcpwm_timer_handle_t,
    edata: *const sys::mcpwm_timer_event_data_t,
    user_ctx: *mut c_void,
) -> bool {
    let callbacks = &*(user_ctx as *const TimerEventCallbacks);
    call_timer_callback(&callbacks.on_empty, edata)
}

unsafe extern "C" fn timer_stop_trampoline(
    _timer: sys::mcpwm_timer_handle_t,
    edata: *const sys::mcpwm_timer_event_data_t,
    user_ctx: *mut c_void,
) -> bool {
    let callbacks = &*(user_ctx as *const TimerEventCallbacks);
    call_timer_callback(&callbacks.on_stop, edata)
}

unsafe extern "C" fn fault_enter_trampoline(
    _fault: sys::mcpwm_fault_handle_t,
    _edata: *const sys::mcpwm_fault_event_data_t,
    user_ctx: *mut c_void,
) -> bool {
    let callbacks = &*(user_ctx as *const FaultCallbacks);
    callbacks.on_enter.as_ref().is_some_and(|callback| callback())
}

unsafe extern "C" fn fault_exit_trampoline(
    _fault: sys::mcpwm_fault_handle_t,
    _edata: *const sys::mcpwm_fault_event_data_t,
    user_ctx: *mut c_void,
) -> bool {
    let callbacks = &*(user_ctx as *const FaultCallbacks);
    callbacks.on_exit.as_ref().is_some_and(|callback| callback())
}

impl McpwmDriver for EspDriver {
    fn mcpwm_new_timer(&self, config: &TimerConfig) -> DriverResult<McpwmTimerHandle> {
        let mut raw = sys::mcpwm_timer_config_t {
            group_id: config.group_id as _,
            clk_src: sys::soc_periph_mcpwm_timer_clk_src_t_MCPWM_TIMER_CLK_SRC_DEFAULT,
            resolution_hz: config.resolution_hz,
            count_mode: config.count_mode as _,
            period_ticks: config.period_ticks,
            intr_priority: config.priority as _,
            ..Default::default()
        };
        raw.flags.set_update_period_on_empty(config.flags.update_period_on_empty as u32);
        raw.flags.set_update_period_on_sync(config.flags.update_period_on_sync as u32);
        raw.flags.set_allow_pd(config.flags.allow_power_down as u32);
        let mut handle: sys::mcpwm_timer_handle_t = ptr::null_mut();
        esp(unsafe { sys::mcpwm_new_timer(&raw, &mut handle) })?;
        Ok(McpwmTimerHandle(handle as usize))
    }

    fn mcpwm_del_timer(&self, timer: McpwmTimerHandle) -> DriverResult<()> {
        let mut callbacks = lock(&self.timer_callbacks);
        esp(unsafe { sys::mcpwm_del_timer(timer.0 as _) })?;
        callbacks.remove(&timer);
        Ok(())
    }

    fn mcpwm_timer_enable(&self, timer: McpwmTimerHandle) -> DriverResult<()> {
        esp(unsafe { sys::mcpwm_timer_enable(timer.0 as _) })
    }

    fn mcpwm_timer_disable(&self, timer: McpwmTimerHandle) -> DriverResult<()> {
        esp(unsafe { sys::mcpwm_timer_disable(timer.0 as _) })
    }

    fn mcpwm_timer_start_stop(&self, timer: McpwmTimerHandle, command: StartStopCommand) -> DriverResult<()> {
        let command = match command {
            StartStopCommand::StopEmpty => sys::mcpwm_timer_start_stop_cmd_t_MCPWM_TIMER_STOP_EMPTY,
            StartStopCommand::StopFull => sys::mcpwm_timer_start_stop_cmd_t_MCPWM_TIMER_STOP_FULL,
            StartStopCommand::StartNoStop => sys::mcpwm_timer_start_stop_cmd_t_MCPWM_TIMER_START_NO_STOP,
            StartStopCommand::StartStopEmpty => sys::mcpwm_timer_start_stop_cmd_t_MCPWM_TIMER_START_STOP_EMPTY,
            StartStopCommand::StartStopFull => sys::mcpwm_timer_start_stop_cmd_t_MCPWM_TIMER_START_STOP_FULL,
        };
        esp(unsafe { sys::mcpwm_timer_start_stop(timer.0 as _, command) })
    }

    fn mcpwm_timer_register_event_callbacks(
        &self,
        timer: McpwmTimerHandle,
        callbacks: &TimerEventCallbacks,
    ) -> DriverResult<()> {
        let mut table = lock(&self.timer_callbacks);
        let context = Box::new(callbacks.clone());
        let raw = sys::mcpwm_timer_event_callbacks_t {
            on_full: callbacks.on_full.as_ref().map(|_| timer_full_trampoline as _),
            on_empty: callbacks.on_empty.as_ref().map(|_| timer_empty_trampoline as _),
            on_stop: callbacks.on_stop.as_ref().map(|_| timer_stop_trampoline as _),
        };
        let user_ctx = &*context as *const TimerEventCallbacks as *mut c_void;
        esp(unsafe { sys::mcpwm_timer_register_event_callbacks(timer.0 as _, &raw, user_ctx) })?;
        table.insert(timer, context);
        Ok(())
    }

    fn mcpwm_new_operator(&self, group_id: u8, config: &OperatorConfig) -> DriverResult<McpwmOperatorHandle> {
        let mut raw = sys::mcpwm_operator_config_t {
            group_id: group_id as _,
            intr_priority: config.priority as _,
            ..Default::default()
        };
        let flags = &config.flags;
        raw.flags.set_update_gen_action_on_tez(flags.update_gen_action_on_tez as u32);
        raw.flags.set_update_gen_action_on_tep(flags.update_gen_action_on_tep as u32);
        raw.flags.set_update_gen_action_on_sync(flags.update_gen_action_on_sync as u32);
        raw.flags.set_update_dead_time_on_tez(flags.update_dead_time_on_tez as u32);
        raw.flags.set_update_dead_time_on_tep(flags.update_dead_time_on_tep as u32);
        raw.flags.set_update_dead_time_on_sync(flags.update_dead_time_on_sync as u32);
        let mut handle: sys::mcpwm_oper_handle_t = ptr::null_mut();
        esp(unsafe { sys::mcpwm_new_operator(&raw, &mut handle) })?;
        Ok(McpwmOperatorHandle(handle as usize))
    }

    fn mcpwm_del_operator(&self, operator: McpwmOperatorHandle) -> DriverResult<()> {
        esp(unsafe { sys::mcpwm_del_operator(operator.0 as _) })
    }

    fn mcpwm_operator_connect_timer(&self, operator: McpwmOperatorHandle, timer: McpwmTimerHandle) -> DriverResult<()> {
        esp(unsafe { sys::mcpwm_operator_connect_timer(operator.0 as _, timer.0 as _) })
    }

    fn mcpwm_new_comparator(
        &self,
        operator: McpwmOperatorHandle,
        config: &ComparatorConfig,
    ) -> DriverResult<McpwmComparatorHandle> {
        let mut raw = sys::mcpwm_comparator_config_t {
            intr_priority: config.priority as _,
            ..Default::default()
        };
        raw.flags.set_update_cmp_on_tez(config.flags.update_cmp_on_tez as u32);
        raw.flags.set_update_cmp_on_tep(config.flags.update_cmp_on_tep as u32);
        raw.flags.set_update_cmp_on_sync(config.flags.update_cmp_on_sync as u32);
        let mut handle: sys::mcpwm_cmpr_handle_t = ptr::null_mut();
        esp(unsafe { sys::mcpwm_new_comparator(operator.0 as _, &raw, &mut handle) })?;
        Ok(McpwmComparatorHandle(handle as usize))
    }

    fn mcpwm_del_comparator(&self, comparator: McpwmComparatorHandle) -> DriverResult<()> {
        esp(unsafe { sys::mcpwm_del_comparator(comparator.0 as _) })
    }

    fn mcpwm_comparator_set_compare_value(&self, comparator: McpwmComparatorHandle, value: u32) -> DriverResult<()> {
        esp(unsafe { sys::mcpwm_comparator_set_compare_value(comparator.0 as _, value) })
    }

    fn mcpwm_new_generator(
        &self,
        operator: McpwmOperatorHandle,
        config: &GeneratorConfig,
    ) -> DriverResult<McpwmGeneratorHandle> {
        let mut raw = sys::mcpwm_generator_config_t {
            gen_gpio_num: config.gpio as _,
            ..Default::default()
        };
        let flags = &config.flags;
        raw.flags.set_invert_pwm(flags.invert_pwm as u32);
        raw.flags.set_io_loop_back(flags.io_loop_back as u32);
        raw.flags.set_io_od_mode(flags.io_od_mode as u32);
        raw.flags.set_pull_up(flags.pull_up as u32);
        raw.flags.set_pull_down(flags.pull_down as u32);
        let mut handle: sys::mcpwm_gen_handle_t = ptr::null_mut();
        esp(unsafe { sys::mcpwm_new_generator(operator.0 as _, &raw, &mut handle) })?;
        Ok(McpwmGeneratorHandle(handle as usize))
    }

    fn mcpwm_del_generator(&self, generator: McpwmGeneratorHandle) -> DriverResult<()> {
        esp(unsafe { sys::mcpwm_del_generator(generator.0 as _) })
    }

    fn mcpwm_generator_set_action_on_compare_event(
        &self,
        generator: McpwmGeneratorHandle,
        direction: TimerDirection,
        comparator: McpwmComparatorHandle,
        action: GeneratorAction,
    ) -> DriverResult<()> {
        let raw = sys::mcpwm_gen_compare_event_action_t {
            direction: direction as _,
            comparator: comparator.0 as _,
            action: action as _,
        };
        esp(unsafe { sys::mcpwm_generator_set_action_on_compare_event(generator.0 as _, raw) })
    }

    fn mcpwm_generator_set_action_on_timer_event(
        &self,
        generator: McpwmGeneratorHandle,
        direction: TimerDirection,
        event: TimerEvent,
        action: GeneratorAction,
    ) -> DriverResult<()> {
        let raw = sys::mcpwm_gen_timer_event_action_t {
            direction: direction as _,
            event: event as _,
            action: action as _,
        };
        esp(unsafe { sys::mcpwm_generator_set_action_on_timer_event(generator.0 as _, raw) })
    }

    fn mcpwm_new_gpio_fault(&self, config: &GpioFaultConfig) -> DriverResult<McpwmFaultHandle> {
        let mut raw = sys::mcpwm_gpio_fault_config_t {
            group_id: config.group_id as _,
            intr_priority: config.priority as _,
            gpio_num: config.gpio as _,
            ..Default::default()
        };
        let flags = &config.flags;
        raw.flags.set_active_level(flags.active_level as u32);
        raw.flags.set_io_loop_back(flags.io_loop_back as u32);
        raw.flags.set_pull_up(flags.pull_up as u32);
        raw.flags.set_pull_down(flags.pull_down as u32);
        let mut handle: sys::mcpwm_fault_handle_t = ptr::null_mut();
        esp(unsafe { sys::mcpwm_new_gpio_fault(&raw, &mut handle) })?;
        Ok(McpwmFaultHandle(handle as usize))
    }

    fn mcpwm_del_fault(&self, fault: McpwmFaultHandle) -> DriverResult<()> {
        let mut callbacks = lock(&self.fault_callbacks);
        esp(unsafe { sys::mcpwm_del_fault(fault.0 as _) })?;
        callbacks.remove(&fault);
        Ok(())
    }

    fn mcpwm_fault_register_event_callbacks(
        &self,
        fault: McpwmFaultHandle,
        callbacks: &FaultCallbacks,
    ) -> DriverResult<()> {
        let mut table = lock(&self.fault_callbacks);
        let context = Box::new(callbacks.clone());
        let raw = sys::mcpwm_fault_event_callbacks_t {
            on_fault_enter: callbacks.on_enter.as_ref().map(|_| fault_enter_trampoline as _),
            on_fault_exit: callbacks.on_exit.as_ref().map(|_| fault_exit_trampoline as _),
        };
        let user_ctx = &*context as *const FaultCallbacks as *mut c_void;
        esp(unsafe { sys::mcpwm_fault_register_event_callbacks(fault.0 as _, &raw, user_ctx) })?;
        table.insert(fault, context);
        Ok(())
    }
}

unsafe extern "C" fn alarm_trampoline(
    _timer: sys::gptimer_handle_t,
    edata: *const sys::gptimer_alarm_event_data_t,
    user_ctx: *mut c_void,
) -> bool {
    let callback = &*(user_ctx as *const AlarmCallback);
    let edata = &*edata;
    callback(&AlarmEventData {
        count_value: edata.count_value,
        alarm_value: edata.alarm_value,
    })
}

impl GpTimerDriver for EspDriver {
    fn gptimer_new(&self, config: &GpTimerConfig) -> DriverResult<GpTimerHandle> {
        let raw = sys::gptimer_config_t {
            clk_src: sys::soc_periph_gptimer_clk_src_t_GPTIMER_CLK_SRC_DEFAULT,
            direction: config.direction as _,
            resolution_hz: config.resolution_hz,
            intr_priority: config.priority,
            ..Default::default()
        };
        let mut handle: sys::gptimer_handle_t = ptr::null_mut();
        esp(unsafe { sys::gptimer_new_timer(&raw, &mut handle) })?;
        Ok(GpTimerHandle(handle as usize))
    }

    fn gptimer_del(&self, timer: GpTimerHandle) -> DriverResult<()> {
        let mut callbacks = lock(&self.alarm_callbacks);
        esp(unsafe { sys::gptimer_del_timer(timer.0 as _) })?;
        callbacks.remove(&timer);
        Ok(())
    }

    fn gptimer_register_alarm_callback(&self, timer: GpTimerHandle, callback: AlarmCallback) -> DriverResult<()> {
        let mut table = lock(&self.alarm_callbacks);
        let context = Box::new(callback);
        let raw = sys::gptimer_event_callbacks_t {
            on_alarm: Some(alarm_trampoline),
        };
        let user_ctx = &*context as *const AlarmCallback as *mut c_void;
        esp(unsafe { sys::gptimer_register_event_callbacks(timer.0 as _, &raw, user_ctx) })?;
        table.insert(timer, context);
        Ok(())
    }

    fn gptimer_set_alarm_action(&self, timer: GpTimerHandle, alarm: &AlarmConfig) -> DriverResult<()> {
        let mut raw = sys::gptimer_alarm_config_t {
            alarm_count: alarm.alarm_count,
            reload_count: alarm.reload_count,
            ..Default::default()
        };
        raw.flags.set_auto_reload_on_alarm(alarm.auto_reload_on_alarm as u32);
        esp(unsafe { sys::gptimer_set_alarm_action(timer.0 as _, &raw) })
    }

    fn gptimer_enable(&self, timer: GpTimerHandle) -> DriverResult<()> {
        esp(unsafe { sys::gptimer_enable(timer.0 as _) })
    }

    fn gptimer_disable(&self, timer: GpTimerHandle) -> DriverResult<()> {
        esp(unsafe { sys::gptimer_disable(timer.0 as _) })
    }

    fn gptimer_start(&self, timer: GpTimerHandle) -> DriverResult<()> {
        esp(unsafe { sys::gptimer_start(timer.0 as _) })
    }

    fn gptimer_stop(&self, timer: GpTimerHandle) -> DriverResult<()> {
        esp(unsafe { sys::gptimer_stop(timer.0 as _) })
    }
}

unsafe extern "C" fn event_trampoline(
    arg: *mut c_void,
    base: sys::esp_event_base_t,
    id: i32,
    data: *mut c_void,
) {
    let callback = &*(arg as *const EventCallback);
    let payload = if data.is_null() || !FRAMED_BASES.contains(base as *const u8) {
        &[][..]
    } else {
        events::decode_raw(data as *const u8)
    };
    callback(EventBase::new(CStr::from_ptr(base)), id, payload);
}

fn base_ptr(base: EventBase) -> sys::esp_event_base_t {
    base.as_c_str().as_ptr()
}

impl EventLoopDriver for EspDriver {
    fn event_loop_create_default(&self) -> DriverResult<()> {
        match esp(unsafe { sys::esp_event_loop_create_default() }) {
            Err(e) if e.code() == codes::ESP_ERR_INVALID_STATE => Ok(()),
            result => result,
        }
    }

    fn event_loop_create(&self, config: &EventLoopConfig) -> DriverResult<EventLoopHandle> {
        let mut args = sys::esp_event_loop_args_t {
            queue_size: config.queue_size,
            task_name: ptr::null(),
            ..Default::default()
        };
        if let Some(task) = &config.task {
            args.task_name = task.name.as_ptr() as *const c_char;
            args.task_priority = task.priority as _;
            args.task_stack_size = task.stack_size as _;
            args.task_core_id = task.core_id.unwrap_or(i32::MAX) as _;
        }
        let mut handle: sys::esp_event_loop_handle_t = ptr::null_mut();
        esp(unsafe { sys::esp_event_loop_create(&args, &mut handle) })?;
        Ok(EventLoopHandle(handle as usize))
    }

    fn event_loop_delete(&self, handle: EventLoopHandle) -> DriverResult<()> {
        let mut handlers = lock(&self.event_handlers);
        esp(unsafe { sys::esp_event_loop_delete(handle.0 as _) })?;
        // IDF 已经释放了这个循环上的注册，令牌再注销时循环也不存在了
        let purged = handlers.purge_loop(handle);
        if purged > 0 {
            log::debug!("dropped {purged} handler contexts of deleted event loop");
        }
        Ok(())
    }

    fn event_loop_run(&self, handle: EventLoopHandle, ticks_to_run: u32) -> DriverResult<()> {
        esp(unsafe { sys::esp_event_loop_run(handle.0 as _, ticks_to_run as _) })
    }

    fn event_handler_register(
        &self,
        target: LoopTarget,
        base: EventBase,
        id: EventId,
        callback: EventCallback,
    ) -> DriverResult<EventHandlerInstance> {
        let mut handlers = lock(&self.event_handlers);
        let context = Box::new(callback);
        let arg = &*context as *const EventCallback as *mut c_void;
        let mut instance: sys::esp_event_handler_instance_t = ptr::null_mut();
        esp(unsafe {
            match target {
                LoopTarget::Default => sys::esp_event_handler_instance_register(
                    base_ptr(base),
                    id,
                    Some(event_trampoline),
                    arg,
                    &mut instance,
                ),
                LoopTarget::Handle(handle) => sys::esp_event_handler_instance_register_with(
                    handle.0 as _,
                    base_ptr(base),
                    id,
                    Some(event_trampoline),
                    arg,
                    &mut instance,
                ),
            }
        })?;
        let instance = EventHandlerInstance(instance as usize);
        handlers.insert(instance, target, context);
        Ok(instance)
    }

    fn event_handler_unregister(
        &self,
        target: LoopTarget,
        base: EventBase,
        id: EventId,
        instance: EventHandlerInstance,
    ) -> DriverResult<()> {
        let mut handlers = lock(&self.event_handlers);
        esp(unsafe {
            match target {
                LoopTarget::Default => {
                    sys::esp_event_handler_instance_unregister(base_ptr(base), id, instance.0 as _)
                }
                LoopTarget::Handle(handle) => sys::esp_event_handler_instance_unregister_with(
                    handle.0 as _,
                    base_ptr(base),
                    id,
                    instance.0 as _,
                ),
            }
        })?;
        handlers.remove(instance);
        Ok(())
    }

    fn event_post(
        &self,
        target: LoopTarget,
        base: EventBase,
        id: EventId,
        data: &[u8],
        ticks_to_wait: u32,
    ) -> DriverResult<()> {
        if !FRAMED_BASES.mark(base_ptr(base) as *const u8) {
            return Err(DriverError::new(codes::ESP_ERR_NO_MEM));
        }
        let frame = events::encode(data).ok_or(DriverError::new(codes::ESP_ERR_INVALID_SIZE))?;
        let payload = frame.as_ptr() as *const c_void;
        esp(unsafe {
            match target {
                LoopTarget::Default => sys::esp_event_post(base_ptr(base), id, payload, frame.len(), ticks_to_wait as _),
                LoopTarget::Handle(handle) => sys::esp_event_post_to(
                    handle.0 as _,
                    base_ptr(base),
                    id,
                    payload,
                    frame.len(),
                    ticks_to_wait as _,
                ),
            }
        })
    }

    fn event_isr_post(&self, target: LoopTarget, base: EventBase, id: EventId, data: &[u8]) -> DriverResult<bool> {
        // 中断里不能分配内存，帧放在栈上
        let mut buf = [0u8; events::HEADER_LEN + events::ISR_PAYLOAD_MAX];
        let frame = events::encode_into(data, &mut buf).ok_or(DriverError::new(codes::ESP_ERR_INVALID_ARG))?;
        if !FRAMED_BASES.mark(base_ptr(base) as *const u8) {
            return Err(DriverError::new(codes::ESP_ERR_NO_MEM));
        }
        let payload = frame.as_ptr() as *const c_void;
        let mut task_unblocked: sys::BaseType_t = 0;
        esp(unsafe {
            match target {
                LoopTarget::Default => {
                    sys::esp_event_isr_post(base_ptr(base), id, payload, frame.len(), &mut task_unblocked)
                }
                LoopTarget::Handle(handle) => sys::esp_event_isr_post_to(
                    handle.0 as _,
                    base_ptr(base),
                    id,
                    payload,
                    frame.len(),
                    &mut task_unblocked,
                ),
            }
        })?;
        Ok(task_unblocked != 0)
    }
}
