//! 主机上的内存驱动模型
//!
//! 按 ESP-IDF 的状态规则模拟各外设（例如定时器使能后不能删除、中断服务不能重复安装），
//! 并提供调用计数、一次性故障注入和中断/事件触发，供测试和主机演示使用。
//!
//! 调用计数的键是驱动 trait 的方法名，例如 `"gpio_config"`、`"mcpwm_del_comparator"`。

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use super::events;
use super::*;
use crate::error::{codes, DriverError};
use crate::peripherals::event_loop::ANY_ID;
use crate::peripherals::mcpwm::TimerEventData;

/// 可以由 [`MockDriver::fire_timer_event`] 触发的 MCPWM 定时器事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCallbackKind {
    Full,
    Empty,
    Stop,
}

#[derive(Default)]
struct MockPin {
    config: Option<GpioConfig>,
    interrupt: InterruptType,
    intr_enabled: bool,
    level: bool,
}

#[derive(Default)]
struct MockTimer {
    enabled: bool,
    running: bool,
    callbacks: TimerEventCallbacks,
}

struct MockGenerator {
    operator: McpwmOperatorHandle,
    actions: usize,
}

#[derive(Default)]
struct MockGpTimer {
    enabled: bool,
    running: bool,
    alarm: Option<AlarmConfig>,
    callback: Option<AlarmCallback>,
}

/// 排队的事件，数据和目标板上一样以带长度头的帧保存
struct PostedEvent {
    base: EventBase,
    id: EventId,
    frame: Vec<u8>,
}

struct MockLoop {
    has_task: bool,
    queue_size: usize,
    queue: VecDeque<PostedEvent>,
}

struct MockHandler {
    target: LoopTarget,
    base: EventBase,
    id: EventId,
    callback: EventCallback,
}

type Dispatch = Vec<(EventCallback, PostedEvent)>;

#[derive(Default)]
struct MockState {
    next_handle: usize,
    calls: HashMap<&'static str, usize>,
    failures: HashMap<&'static str, i32>,
    deletions: Vec<&'static str>,

    adc_units: HashMap<AdcUnitHandle, u8>,
    adc_channels: HashMap<(AdcUnitHandle, u8), AdcChannelConfig>,
    adc_raw: HashMap<(u8, u8), i32>,
    calibrations: HashMap<AdcCaliHandle, AdcChannelConfig>,

    pins: HashMap<u8, MockPin>,
    isr_service: bool,
    isr_handlers: HashMap<u8, IsrHandler>,

    timers: HashMap<McpwmTimerHandle, MockTimer>,
    operators: HashMap<McpwmOperatorHandle, Option<McpwmTimerHandle>>,
    comparators: HashMap<McpwmComparatorHandle, (McpwmOperatorHandle, u32)>,
    generators: HashMap<McpwmGeneratorHandle, MockGenerator>,
    faults: HashMap<McpwmFaultHandle, FaultCallbacks>,

    gptimers: HashMap<GpTimerHandle, MockGpTimer>,

    default_loop: bool,
    loops: HashMap<EventLoopHandle, MockLoop>,
    handlers: HashMap<EventHandlerInstance, MockHandler>,
}

impl MockState {
    fn allocate(&mut self) -> usize {
        self.next_handle += 1;
        self.next_handle
    }

    fn check_target(&self, target: LoopTarget) -> DriverResult<()> {
        match target {
            LoopTarget::Default if !self.default_loop => Err(invalid_state()),
            LoopTarget::Handle(handle) if !self.loops.contains_key(&handle) => Err(invalid_arg()),
            _ => Ok(()),
        }
    }

    /// 收集匹配的处理函数，按注册顺序排列
    fn matching(&self, target: LoopTarget, event: &PostedEvent) -> Vec<EventCallback> {
        let mut matched: Vec<_> = self
            .handlers
            .iter()
            .filter(|(_, handler)| {
                handler.target == target
                    && handler.base == event.base
                    && (handler.id == event.id || handler.id == ANY_ID)
            })
            .map(|(instance, handler)| (instance.0, handler.callback.clone()))
            .collect();
        matched.sort_by_key(|(instance, _)| *instance);
        matched.into_iter().map(|(_, callback)| callback).collect()
    }
}

fn invalid_arg() -> DriverError {
    DriverError::new(codes::ESP_ERR_INVALID_ARG)
}

fn invalid_state() -> DriverError {
    DriverError::new(codes::ESP_ERR_INVALID_STATE)
}

fn not_found() -> DriverError {
    DriverError::new(codes::ESP_ERR_NOT_FOUND)
}

/// 内存驱动
#[derive(Default)]
pub struct MockDriver {
    state: Mutex<MockState>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// 某个驱动方法被调用的次数（包括注入失败的调用）
    pub fn calls(&self, call: &str) -> usize {
        self.lock().calls.get(call).copied().unwrap_or(0)
    }

    /// 让下一次 `call` 返回 `code`
    pub fn fail_next(&self, call: &'static str, code: i32) {
        self.lock().failures.insert(call, code);
    }

    /// 成功执行的释放类调用，按发生顺序
    pub fn deletions(&self) -> Vec<&'static str> {
        self.lock().deletions.clone()
    }

    pub fn set_adc_raw(&self, unit: u8, channel: u8, raw: i32) {
        self.lock().adc_raw.insert((unit, channel), raw);
    }

    pub fn live_adc_units(&self) -> usize {
        self.lock().adc_units.len()
    }

    pub fn live_calibrations(&self) -> usize {
        self.lock().calibrations.len()
    }

    pub fn pin_config(&self, pin: u8) -> Option<GpioConfig> {
        self.lock().pins.get(&pin).and_then(|state| state.config)
    }

    pub fn pin_interrupt(&self, pin: u8) -> InterruptType {
        self.lock()
            .pins
            .get(&pin)
            .map(|state| state.interrupt)
            .unwrap_or_default()
    }

    /// 模拟外部信号驱动输入电平
    pub fn set_input_level(&self, pin: u8, level: bool) {
        self.lock().pins.entry(pin).or_default().level = level;
    }

    pub fn has_isr_handler(&self, pin: u8) -> bool {
        self.lock().isr_handlers.contains_key(&pin)
    }

    pub fn isr_service_installed(&self) -> bool {
        self.lock().isr_service
    }

    /// 模拟引脚中断，回调被调用时返回 `true`
    pub fn fire_pin_interrupt(&self, pin: u8) -> bool {
        let handler = {
            let state = self.lock();
            let armed = state
                .pins
                .get(&pin)
                .is_some_and(|p| p.intr_enabled && p.interrupt != InterruptType::Disabled);
            if !state.isr_service || !armed {
                return false;
            }
            state.isr_handlers.get(&pin).cloned()
        };
        match handler {
            Some(handler) => {
                handler();
                true
            }
            None => false,
        }
    }

    /// 模拟定时器事件，只调用已注册的回调
    pub fn fire_timer_event(&self, timer: McpwmTimerHandle, kind: TimerCallbackKind) -> Option<bool> {
        let callback = {
            let state = self.lock();
            let callbacks = &state.timers.get(&timer)?.callbacks;
            match kind {
                TimerCallbackKind::Full => callbacks.on_full.clone(),
                TimerCallbackKind::Empty => callbacks.on_empty.clone(),
                TimerCallbackKind::Stop => callbacks.on_stop.clone(),
            }
        }?;
        let data = TimerEventData {
            count_value: 0,
            direction: TimerDirection::Up,
        };
        Some(callback(&data))
    }

    /// 模拟故障进入（`enter = true`）或退出
    pub fn fire_fault(&self, fault: McpwmFaultHandle, enter: bool) -> Option<bool> {
        let callback = {
            let state = self.lock();
            let callbacks = state.faults.get(&fault)?;
            if enter {
                callbacks.on_enter.clone()
            } else {
                callbacks.on_exit.clone()
            }
        }?;
        Some(callback())
    }

    pub fn compare_value(&self, comparator: McpwmComparatorHandle) -> Option<u32> {
        self.lock().comparators.get(&comparator).map(|(_, value)| *value)
    }

    /// 生成器上已设置的动作数量
    pub fn generator_actions(&self, generator: McpwmGeneratorHandle) -> usize {
        self.lock()
            .generators
            .get(&generator)
            .map(|g| g.actions)
            .unwrap_or(0)
    }

    /// 仍存活的 MCPWM 对象总数（定时器、操作器、比较器、生成器、故障）
    pub fn live_mcpwm_objects(&self) -> usize {
        let state = self.lock();
        state.timers.len() + state.operators.len() + state.comparators.len() + state.generators.len() + state.faults.len()
    }

    /// 模拟 GPTimer 报警，定时器未运行或没有回调时返回 `None`
    pub fn fire_alarm(&self, timer: GpTimerHandle) -> Option<bool> {
        let (callback, data) = {
            let state = self.lock();
            let timer = state.gptimers.get(&timer)?;
            if !timer.running {
                return None;
            }
            let alarm = timer.alarm?;
            let data = AlarmEventData {
                count_value: alarm.alarm_count,
                alarm_value: alarm.alarm_count,
            };
            (timer.callback.clone()?, data)
        };
        Some(callback(&data))
    }

    pub fn live_event_loops(&self) -> usize {
        self.lock().loops.len()
    }

    pub fn registered_handlers(&self) -> usize {
        self.lock().handlers.len()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 记录一次调用，并消费注入的故障
    fn enter(&self, call: &'static str) -> DriverResult<MutexGuard<'_, MockState>> {
        let mut state = self.lock();
        *state.calls.entry(call).or_insert(0) += 1;
        if let Some(code) = state.failures.remove(call) {
            return Err(DriverError::new(code));
        }
        Ok(state)
    }

    fn dispatch(&self, batch: Dispatch) {
        for (callback, event) in batch {
            let data = events::decode(&event.frame).unwrap_or_default();
            callback(event.base, event.id, data);
        }
    }

    fn deliver(
        &self,
        call: &'static str,
        target: LoopTarget,
        base: EventBase,
        id: EventId,
        data: &[u8],
    ) -> DriverResult<()> {
        let batch = {
            let mut state = self.enter(call)?;
            state.check_target(target)?;
            let event = PostedEvent {
                base,
                id,
                frame: events::encode(data).ok_or_else(invalid_arg)?,
            };
            match target {
                LoopTarget::Handle(handle) => {
                    let queued = state.loops.get(&handle).is_some_and(|l| !l.has_task);
                    if queued {
                        let event_loop = state.loops.get_mut(&handle).ok_or_else(invalid_arg)?;
                        if event_loop.queue.len() >= event_loop.queue_size {
                            return Err(DriverError::new(codes::ESP_ERR_TIMEOUT));
                        }
                        event_loop.queue.push_back(event);
                        return Ok(());
                    }
                    Self::collect(&state, target, event)
                }
                LoopTarget::Default => Self::collect(&state, target, event),
            }
        };
        self.dispatch(batch);
        Ok(())
    }

    fn collect(state: &MockState, target: LoopTarget, event: PostedEvent) -> Dispatch {
        let callbacks = state.matching(target, &event);
        callbacks
            .into_iter()
            .map(|callback| {
                let copy = PostedEvent {
                    base: event.base,
                    id: event.id,
                    frame: event.frame.clone(),
                };
                (callback, copy)
            })
            .collect()
    }
}

impl AdcDriver for MockDriver {
    fn adc_new_unit(&self, unit: u8) -> DriverResult<AdcUnitHandle> {
        let mut state = self.enter("adc_new_unit")?;
        if state.adc_units.values().any(|&live| live == unit) {
            return Err(invalid_state());
        }
        let handle = AdcUnitHandle(state.allocate());
        state.adc_units.insert(handle, unit);
        Ok(handle)
    }

    fn adc_del_unit(&self, handle: AdcUnitHandle) -> DriverResult<()> {
        let mut state = self.enter("adc_del_unit")?;
        state.adc_units.remove(&handle).ok_or_else(invalid_arg)?;
        state.adc_channels.retain(|(unit, _), _| *unit != handle);
        state.deletions.push("adc_del_unit");
        Ok(())
    }

    fn adc_config_channel(&self, handle: AdcUnitHandle, channel: u8, config: &AdcChannelConfig) -> DriverResult<()> {
        let mut state = self.enter("adc_config_channel")?;
        if !state.adc_units.contains_key(&handle) {
            return Err(invalid_arg());
        }
        state.adc_channels.insert((handle, channel), *config);
        Ok(())
    }

    fn adc_read(&self, handle: AdcUnitHandle, channel: u8) -> DriverResult<i32> {
        let state = self.enter("adc_read")?;
        read_raw(&state, handle, channel)
    }

    fn adc_read_isr(&self, handle: AdcUnitHandle, channel: u8) -> DriverResult<i32> {
        let state = self.enter("adc_read_isr")?;
        read_raw(&state, handle, channel)
    }

    fn adc_cali_create(&self, _unit: u8, config: &AdcChannelConfig) -> DriverResult<AdcCaliHandle> {
        let mut state = self.enter("adc_cali_create")?;
        let handle = AdcCaliHandle(state.allocate());
        state.calibrations.insert(handle, *config);
        Ok(handle)
    }

    fn adc_cali_delete(&self, cali: AdcCaliHandle) -> DriverResult<()> {
        let mut state = self.enter("adc_cali_delete")?;
        state.calibrations.remove(&cali).ok_or_else(invalid_arg)?;
        state.deletions.push("adc_cali_delete");
        Ok(())
    }

    fn adc_cali_raw_to_voltage(&self, cali: AdcCaliHandle, raw: i32) -> DriverResult<i32> {
        let state = self.enter("adc_cali_raw_to_voltage")?;
        let config = state.calibrations.get(&cali).ok_or_else(invalid_arg)?;
        let full_scale = config.attenuation.full_scale_millivolts() as i64;
        let max_raw = config.bitwidth.max_raw() as i64;
        let millivolts = raw.clamp(0, config.bitwidth.max_raw()) as i64 * full_scale / max_raw;
        Ok(millivolts as i32)
    }

    fn adc_io_to_channel(&self, pin: u8) -> DriverResult<(u8, u8)> {
        let _state = self.enter("adc_io_to_channel")?;
        match pin {
            1..=10 => Ok((0, pin - 1)),
            11..=20 => Ok((1, pin - 11)),
            _ => Err(not_found()),
        }
    }

    fn adc_channel_to_io(&self, unit: u8, channel: u8) -> DriverResult<u8> {
        let _state = self.enter("adc_channel_to_io")?;
        match (unit, channel) {
            (0, 0..=9) => Ok(channel + 1),
            (1, 0..=9) => Ok(channel + 11),
            _ => Err(invalid_arg()),
        }
    }
}

fn read_raw(state: &MockState, handle: AdcUnitHandle, channel: u8) -> DriverResult<i32> {
    let unit = *state.adc_units.get(&handle).ok_or_else(invalid_arg)?;
    let config = state.adc_channels.get(&(handle, channel)).ok_or_else(invalid_state)?;
    let raw = state.adc_raw.get(&(unit, channel)).copied().unwrap_or(0);
    Ok(raw.clamp(0, config.bitwidth.max_raw()))
}

impl GpioDriver for MockDriver {
    fn gpio_config(&self, config: &GpioConfig, interrupt: InterruptType) -> DriverResult<()> {
        let mut state = self.enter("gpio_config")?;
        let pin = state.pins.entry(config.pin).or_default();
        pin.config = Some(*config);
        pin.interrupt = interrupt;
        Ok(())
    }

    fn gpio_reset(&self, pin: u8) -> DriverResult<()> {
        let mut state = self.enter("gpio_reset")?;
        state.pins.remove(&pin);
        state.isr_handlers.remove(&pin);
        state.deletions.push("gpio_reset");
        Ok(())
    }

    fn gpio_set_direction(&self, pin: u8, mode: GpioMode) -> DriverResult<()> {
        let mut state = self.enter("gpio_set_direction")?;
        if let Some(config) = state.pins.entry(pin).or_default().config.as_mut() {
            config.mode = mode;
        }
        Ok(())
    }

    fn gpio_set_pull_up(&self, pin: u8, pull: Pull) -> DriverResult<()> {
        let mut state = self.enter("gpio_set_pull_up")?;
        if let Some(config) = state.pins.entry(pin).or_default().config.as_mut() {
            config.pull_up = pull;
        }
        Ok(())
    }

    fn gpio_set_pull_down(&self, pin: u8, pull: Pull) -> DriverResult<()> {
        let mut state = self.enter("gpio_set_pull_down")?;
        if let Some(config) = state.pins.entry(pin).or_default().config.as_mut() {
            config.pull_down = pull;
        }
        Ok(())
    }

    fn gpio_set_intr_type(&self, pin: u8, interrupt: InterruptType) -> DriverResult<()> {
        let mut state = self.enter("gpio_set_intr_type")?;
        state.pins.entry(pin).or_default().interrupt = interrupt;
        Ok(())
    }

    fn gpio_intr_enable(&self, pin: u8) -> DriverResult<()> {
        let mut state = self.enter("gpio_intr_enable")?;
        state.pins.entry(pin).or_default().intr_enabled = true;
        Ok(())
    }

    fn gpio_intr_disable(&self, pin: u8) -> DriverResult<()> {
        let mut state = self.enter("gpio_intr_disable")?;
        state.pins.entry(pin).or_default().intr_enabled = false;
        Ok(())
    }

    fn gpio_install_isr_service(&self) -> DriverResult<()> {
        let mut state = self.enter("gpio_install_isr_service")?;
        if state.isr_service {
            return Err(invalid_state());
        }
        state.isr_service = true;
        Ok(())
    }

    fn gpio_isr_handler_add(&self, pin: u8, handler: IsrHandler) -> DriverResult<()> {
        let mut state = self.enter("gpio_isr_handler_add")?;
        if !state.isr_service {
            return Err(invalid_state());
        }
        state.isr_handlers.insert(pin, handler);
        Ok(())
    }

    fn gpio_isr_handler_remove(&self, pin: u8) -> DriverResult<()> {
        let mut state = self.enter("gpio_isr_handler_remove")?;
        if !state.isr_service {
            return Err(invalid_state());
        }
        state.isr_handlers.remove(&pin);
        Ok(())
    }

    fn gpio_set_level(&self, pin: u8, level: bool) -> DriverResult<()> {
        let mut state = self.enter("gpio_set_level")?;
        state.pins.entry(pin).or_default().level = level;
        Ok(())
    }

    fn gpio_get_level(&self, pin: u8) -> bool {
        let mut state = self.lock();
        *state.calls.entry("gpio_get_level").or_insert(0) += 1;
        state.pins.get(&pin).is_some_and(|p| p.level)
    }
}

impl McpwmDriver for MockDriver {
    fn mcpwm_new_timer(&self, _config: &TimerConfig) -> DriverResult<McpwmTimerHandle> {
        let mut state = self.enter("mcpwm_new_timer")?;
        let handle = McpwmTimerHandle(state.allocate());
        state.timers.insert(handle, MockTimer::default());
        Ok(handle)
    }

    fn mcpwm_del_timer(&self, timer: McpwmTimerHandle) -> DriverResult<()> {
        let mut state = self.enter("mcpwm_del_timer")?;
        let enabled = state.timers.get(&timer).ok_or_else(invalid_arg)?.enabled;
        let connected = state.operators.values().any(|t| *t == Some(timer));
        if enabled || connected {
            return Err(invalid_state());
        }
        state.timers.remove(&timer);
        state.deletions.push("mcpwm_del_timer");
        Ok(())
    }

    fn mcpwm_timer_enable(&self, timer: McpwmTimerHandle) -> DriverResult<()> {
        let mut state = self.enter("mcpwm_timer_enable")?;
        let timer = state.timers.get_mut(&timer).ok_or_else(invalid_arg)?;
        if timer.enabled {
            return Err(invalid_state());
        }
        timer.enabled = true;
        Ok(())
    }

    fn mcpwm_timer_disable(&self, timer: McpwmTimerHandle) -> DriverResult<()> {
        let mut state = self.enter("mcpwm_timer_disable")?;
        let timer = state.timers.get_mut(&timer).ok_or_else(invalid_arg)?;
        if !timer.enabled {
            return Err(invalid_state());
        }
        timer.enabled = false;
        timer.running = false;
        Ok(())
    }

    fn mcpwm_timer_start_stop(&self, timer: McpwmTimerHandle, command: StartStopCommand) -> DriverResult<()> {
        let mut state = self.enter("mcpwm_timer_start_stop")?;
        let timer = state.timers.get_mut(&timer).ok_or_else(invalid_arg)?;
        if !timer.enabled {
            return Err(invalid_state());
        }
        timer.running = matches!(
            command,
            StartStopCommand::StartNoStop | StartStopCommand::StartStopEmpty | StartStopCommand::StartStopFull
        );
        Ok(())
    }

    fn mcpwm_timer_register_event_callbacks(
        &self,
        timer: McpwmTimerHandle,
        callbacks: &TimerEventCallbacks,
    ) -> DriverResult<()> {
        let mut state = self.enter("mcpwm_timer_register_event_callbacks")?;
        let timer = state.timers.get_mut(&timer).ok_or_else(invalid_arg)?;
        if timer.enabled {
            return Err(invalid_state());
        }
        timer.callbacks = callbacks.clone();
        Ok(())
    }

    fn mcpwm_new_operator(&self, _group_id: u8, _config: &OperatorConfig) -> DriverResult<McpwmOperatorHandle> {
        let mut state = self.enter("mcpwm_new_operator")?;
        let handle = McpwmOperatorHandle(state.allocate());
        state.operators.insert(handle, None);
        Ok(handle)
    }

    fn mcpwm_del_operator(&self, operator: McpwmOperatorHandle) -> DriverResult<()> {
        let mut state = self.enter("mcpwm_del_operator")?;
        if !state.operators.contains_key(&operator) {
            return Err(invalid_arg());
        }
        let has_children = state.comparators.values().any(|(owner, _)| *owner == operator)
            || state.generators.values().any(|g| g.operator == operator);
        if has_children {
            return Err(invalid_state());
        }
        state.operators.remove(&operator);
        state.deletions.push("mcpwm_del_operator");
        Ok(())
    }

    fn mcpwm_operator_connect_timer(&self, operator: McpwmOperatorHandle, timer: McpwmTimerHandle) -> DriverResult<()> {
        let mut state = self.enter("mcpwm_operator_connect_timer")?;
        if !state.timers.contains_key(&timer) {
            return Err(invalid_arg());
        }
        let connected = state.operators.get_mut(&operator).ok_or_else(invalid_arg)?;
        *connected = Some(timer);
        Ok(())
    }

    fn mcpwm_new_comparator(
        &self,
        operator: McpwmOperatorHandle,
        _config: &ComparatorConfig,
    ) -> DriverResult<McpwmComparatorHandle> {
        let mut state = self.enter("mcpwm_new_comparator")?;
        if !state.operators.contains_key(&operator) {
            return Err(invalid_arg());
        }
        let handle = McpwmComparatorHandle(state.allocate());
        state.comparators.insert(handle, (operator, 0));
        Ok(handle)
    }

    fn mcpwm_del_comparator(&self, comparator: McpwmComparatorHandle) -> DriverResult<()> {
        let mut state = self.enter("mcpwm_del_comparator")?;
        state.comparators.remove(&comparator).ok_or_else(invalid_arg)?;
        state.deletions.push("mcpwm_del_comparator");
        Ok(())
    }

    fn mcpwm_comparator_set_compare_value(&self, comparator: McpwmComparatorHandle, value: u32) -> DriverResult<()> {
        let mut state = self.enter("mcpwm_comparator_set_compare_value")?;
        let (_, current) = state.comparators.get_mut(&comparator).ok_or_else(invalid_arg)?;
        *current = value;
        Ok(())
    }

    fn mcpwm_new_generator(
        &self,
        operator: McpwmOperatorHandle,
        _config: &GeneratorConfig,
    ) -> DriverResult<McpwmGeneratorHandle> {
        let mut state = self.enter("mcpwm_new_generator")?;
        if !state.operators.contains_key(&operator) {
            return Err(invalid_arg());
        }
        let handle = McpwmGeneratorHandle(state.allocate());
        state.generators.insert(handle, MockGenerator { operator, actions: 0 });
        Ok(handle)
    }

    fn mcpwm_del_generator(&self, generator: McpwmGeneratorHandle) -> DriverResult<()> {
        let mut state = self.enter("mcpwm_del_generator")?;
        state.generators.remove(&generator).ok_or_else(invalid_arg)?;
        state.deletions.push("mcpwm_del_generator");
        Ok(())
    }

    fn mcpwm_generator_set_action_on_compare_event(
        &self,
        generator: McpwmGeneratorHandle,
        _direction: TimerDirection,
        comparator: McpwmComparatorHandle,
        _action: GeneratorAction,
    ) -> DriverResult<()> {
        let mut state = self.enter("mcpwm_generator_set_action_on_compare_event")?;
        let (owner, _) = *state.comparators.get(&comparator).ok_or_else(invalid_arg)?;
        let generator = state.generators.get_mut(&generator).ok_or_else(invalid_arg)?;
        if generator.operator != owner {
            return Err(invalid_arg());
        }
        generator.actions += 1;
        Ok(())
    }

    fn mcpwm_generator_set_action_on_timer_event(
        &self,
        generator: McpwmGeneratorHandle,
        _direction: TimerDirection,
        _event: TimerEvent,
        _action: GeneratorAction,
    ) -> DriverResult<()> {
        let mut state = self.enter("mcpwm_generator_set_action_on_timer_event")?;
        let generator = state.generators.get_mut(&generator).ok_or_else(invalid_arg)?;
        generator.actions += 1;
        Ok(())
    }

    fn mcpwm_new_gpio_fault(&self, _config: &GpioFaultConfig) -> DriverResult<McpwmFaultHandle> {
        let mut state = self.enter("mcpwm_new_gpio_fault")?;
        let handle = McpwmFaultHandle(state.allocate());
        state.faults.insert(handle, FaultCallbacks::default());
        Ok(handle)
    }

    fn mcpwm_del_fault(&self, fault: McpwmFaultHandle) -> DriverResult<()> {
        let mut state = self.enter("mcpwm_del_fault")?;
        state.faults.remove(&fault).ok_or_else(invalid_arg)?;
        state.deletions.push("mcpwm_del_fault");
        Ok(())
    }

    fn mcpwm_fault_register_event_callbacks(
        &self,
        fault: McpwmFaultHandle,
        callbacks: &FaultCallbacks,
    ) -> DriverResult<()> {
        let mut state = self.enter("mcpwm_fault_register_event_callbacks")?;
        let current = state.faults.get_mut(&fault).ok_or_else(invalid_arg)?;
        *current = callbacks.clone();
        Ok(())
    }
}

impl GpTimerDriver for MockDriver {
    fn gptimer_new(&self, _config: &GpTimerConfig) -> DriverResult<GpTimerHandle> {
        let mut state = self.enter("gptimer_new")?;
        let handle = GpTimerHandle(state.allocate());
        state.gptimers.insert(handle, MockGpTimer::default());
        Ok(handle)
    }

    fn gptimer_del(&self, timer: GpTimerHandle) -> DriverResult<()> {
        let mut state = self.enter("gptimer_del")?;
        if state.gptimers.get(&timer).ok_or_else(invalid_arg)?.enabled {
            return Err(invalid_state());
        }
        state.gptimers.remove(&timer);
        state.deletions.push("gptimer_del");
        Ok(())
    }

    fn gptimer_register_alarm_callback(&self, timer: GpTimerHandle, callback: AlarmCallback) -> DriverResult<()> {
        let mut state = self.enter("gptimer_register_alarm_callback")?;
        let timer = state.gptimers.get_mut(&timer).ok_or_else(invalid_arg)?;
        if timer.enabled {
            return Err(invalid_state());
        }
        timer.callback = Some(callback);
        Ok(())
    }

    fn gptimer_set_alarm_action(&self, timer: GpTimerHandle, alarm: &AlarmConfig) -> DriverResult<()> {
        let mut state = self.enter("gptimer_set_alarm_action")?;
        let timer = state.gptimers.get_mut(&timer).ok_or_else(invalid_arg)?;
        timer.alarm = Some(*alarm);
        Ok(())
    }

    fn gptimer_enable(&self, timer: GpTimerHandle) -> DriverResult<()> {
        let mut state = self.enter("gptimer_enable")?;
        let timer = state.gptimers.get_mut(&timer).ok_or_else(invalid_arg)?;
        if timer.enabled {
            return Err(invalid_state());
        }
        timer.enabled = true;
        Ok(())
    }

    fn gptimer_disable(&self, timer: GpTimerHandle) -> DriverResult<()> {
        let mut state = self.enter("gptimer_disable")?;
        let timer = state.gptimers.get_mut(&timer).ok_or_else(invalid_arg)?;
        if !timer.enabled || timer.running {
            return Err(invalid_state());
        }
        timer.enabled = false;
        Ok(())
    }

    fn gptimer_start(&self, timer: GpTimerHandle) -> DriverResult<()> {
        let mut state = self.enter("gptimer_start")?;
        let timer = state.gptimers.get_mut(&timer).ok_or_else(invalid_arg)?;
        if !timer.enabled || timer.running {
            return Err(invalid_state());
        }
        timer.running = true;
        Ok(())
    }

    fn gptimer_stop(&self, timer: GpTimerHandle) -> DriverResult<()> {
        let mut state = self.enter("gptimer_stop")?;
        let timer = state.gptimers.get_mut(&timer).ok_or_else(invalid_arg)?;
        if !timer.running {
            return Err(invalid_state());
        }
        timer.running = false;
        Ok(())
    }
}

impl EventLoopDriver for MockDriver {
    fn event_loop_create_default(&self) -> DriverResult<()> {
        let mut state = self.enter("event_loop_create_default")?;
        state.default_loop = true;
        Ok(())
    }

    fn event_loop_create(&self, config: &EventLoopConfig) -> DriverResult<EventLoopHandle> {
        let mut state = self.enter("event_loop_create")?;
        let handle = EventLoopHandle(state.allocate());
        state.loops.insert(
            handle,
            MockLoop {
                has_task: config.task.is_some(),
                queue_size: usize::try_from(config.queue_size).map_err(|_| invalid_arg())?,
                queue: VecDeque::new(),
            },
        );
        Ok(handle)
    }

    fn event_loop_delete(&self, handle: EventLoopHandle) -> DriverResult<()> {
        let mut state = self.enter("event_loop_delete")?;
        state.loops.remove(&handle).ok_or_else(invalid_arg)?;
        state
            .handlers
            .retain(|_, handler| handler.target != LoopTarget::Handle(handle));
        state.deletions.push("event_loop_delete");
        Ok(())
    }

    fn event_loop_run(&self, handle: EventLoopHandle, _ticks_to_run: u32) -> DriverResult<()> {
        let batch = {
            let mut state = self.enter("event_loop_run")?;
            let queued: Vec<_> = state
                .loops
                .get_mut(&handle)
                .ok_or_else(invalid_arg)?
                .queue
                .drain(..)
                .collect();
            let target = LoopTarget::Handle(handle);
            queued
                .into_iter()
                .flat_map(|event| Self::collect(&state, target, event))
                .collect::<Dispatch>()
        };
        self.dispatch(batch);
        Ok(())
    }

    fn event_handler_register(
        &self,
        target: LoopTarget,
        base: EventBase,
        id: EventId,
        callback: EventCallback,
    ) -> DriverResult<EventHandlerInstance> {
        let mut state = self.enter("event_handler_register")?;
        state.check_target(target)?;
        let instance = EventHandlerInstance(state.allocate());
        state.handlers.insert(
            instance,
            MockHandler {
                target,
                base,
                id,
                callback,
            },
        );
        Ok(instance)
    }

    fn event_handler_unregister(
        &self,
        target: LoopTarget,
        base: EventBase,
        id: EventId,
        instance: EventHandlerInstance,
    ) -> DriverResult<()> {
        let mut state = self.enter("event_handler_unregister")?;
        let matches = state
            .handlers
            .get(&instance)
            .is_some_and(|h| h.target == target && h.base == base && h.id == id);
        if !matches {
            return Err(not_found());
        }
        state.handlers.remove(&instance);
        Ok(())
    }

    fn event_post(
        &self,
        target: LoopTarget,
        base: EventBase,
        id: EventId,
        data: &[u8],
        _ticks_to_wait: u32,
    ) -> DriverResult<()> {
        self.deliver("event_post", target, base, id, data)
    }

    fn event_isr_post(&self, target: LoopTarget, base: EventBase, id: EventId, data: &[u8]) -> DriverResult<bool> {
        if data.len() > events::ISR_PAYLOAD_MAX {
            *self.lock().calls.entry("event_isr_post").or_insert(0) += 1;
            return Err(invalid_arg());
        }
        self.deliver("event_isr_post", target, base, id, data)?;
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_injection_is_one_shot() {
        let driver = MockDriver::new();
        driver.fail_next("adc_new_unit", codes::ESP_ERR_NO_MEM);
        assert_eq!(driver.adc_new_unit(0), Err(DriverError::new(codes::ESP_ERR_NO_MEM)));
        assert!(driver.adc_new_unit(0).is_ok());
        assert_eq!(driver.calls("adc_new_unit"), 2);
    }

    #[test]
    fn test_unit_cannot_be_opened_twice() {
        let driver = MockDriver::new();
        let handle = driver.adc_new_unit(1).unwrap();
        assert_eq!(driver.adc_new_unit(1), Err(invalid_state()));
        driver.adc_del_unit(handle).unwrap();
        assert!(driver.adc_new_unit(1).is_ok());
    }

    #[test]
    fn test_operator_with_children_cannot_be_deleted() {
        let driver = MockDriver::new();
        let operator = driver.mcpwm_new_operator(0, &OperatorConfig::default()).unwrap();
        let comparator = driver
            .mcpwm_new_comparator(operator, &ComparatorConfig::default())
            .unwrap();
        assert_eq!(driver.mcpwm_del_operator(operator), Err(invalid_state()));
        driver.mcpwm_del_comparator(comparator).unwrap();
        driver.mcpwm_del_operator(operator).unwrap();
    }

    #[test]
    fn test_post_to_missing_default_loop() {
        let driver = MockDriver::new();
        let base = EventBase::new(c"MOCK");
        assert_eq!(
            driver.event_post(LoopTarget::Default, base, 0, &[], 0),
            Err(invalid_state())
        );
    }
}
