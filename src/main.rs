use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use esp_board_registry::peripherals::mcpwm::{
    ComparatorConfig, CompareEventAction, GeneratorAction, GeneratorConfig, OperatorConfig, StartCommand, TimerConfig,
    TimerDirection, TimerEvent, TimerEventAction,
};
use esp_board_registry::{
    Attenuation, BitWidth, Board, Driver, EventBase, GpioConfig, GpioMode, InterruptType, Wait, ANY_ID,
};

const DEMO_EVENTS: EventBase = EventBase::new(c"DEMO_EVENTS");
const SAMPLE_READY: i32 = 1;

#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    // It is necessary to call this function once. Otherwise some patches to the runtime
    // implemented by esp-idf-sys might not link properly. See https://github.com/esp-rs/esp-idf-template/issues/71
    esp_idf_svc::sys::link_patches();

    // Bind the log crate to the ESP Logging facilities
    esp_idf_svc::log::EspLogger::initialize_default();

    let board = esp_board_registry::board::shared();
    run(board, |_| loop {
        std::thread::sleep(Duration::from_secs(60));
    })
}

#[cfg(not(target_os = "espidf"))]
fn main() -> anyhow::Result<()> {
    use esp_board_registry::driver::mock::MockDriver;
    use esp_board_registry::ChipLayout;

    esp_board_registry::logging::init().map_err(|e| anyhow::anyhow!("初始化日志失败: {e}"))?;

    let layout = ChipLayout::current();
    layout.validate().map_err(anyhow::Error::msg)?;
    let driver = Arc::new(MockDriver::new());
    driver.set_adc_raw(0, 3, 2048);
    let board = Board::new(driver, layout);
    run(&board, |driver| {
        // 模拟一次按键
        driver.fire_pin_interrupt(0);
    })
}

/// 演示各类外设，`idle` 在所有资源仍然存活时调用
fn run<D: Driver>(board: &Board<D>, idle: impl FnOnce(&D)) -> anyhow::Result<()> {
    // GPIO
    let led = board.gpio(GpioConfig::new(2, GpioMode::INPUT_OUTPUT)).context("获取 LED 引脚失败")?;
    led.set_level(true)?;
    log::info!("GPIO{} 电平: {}", led.number(), led.level());

    let button = board.gpio(GpioConfig::new(0, GpioMode::INPUT))?;
    let presses = Arc::new(AtomicU32::new(0));
    let counter = presses.clone();
    button.set_interrupt(InterruptType::FallingEdge, move || {
        counter.fetch_add(1, Ordering::Relaxed);
    })?;

    // ADC
    let adc = board
        .calibrated_adc_unit(0, Attenuation::Db12, BitWidth::Default)
        .context("获取 ADC1 失败")?;
    let channel = adc.calibrated_channel(3)?;
    log::info!("ADC1 通道 3: {} mV", channel.millivolts()?);

    // MCPWM：50% 占空比
    let timer = board.mcpwm().timer(&TimerConfig::default())?;
    let operator = timer.add_operator(&OperatorConfig::default())?;
    let comparator = operator.add_comparator(&ComparatorConfig::default())?;
    let generator = operator.add_generator(&GeneratorConfig::new(5))?;
    comparator.set_compare_value(timer.config().period_ticks / 2)?;
    generator.set_actions_on_timer_event(&[TimerEventAction {
        direction: TimerDirection::Up,
        event: TimerEvent::Empty,
        action: GeneratorAction::High,
    }])?;
    generator.set_actions_on_compare_event(&[CompareEventAction {
        direction: TimerDirection::Up,
        comparator: &comparator,
        action: GeneratorAction::Low,
    }])?;
    timer.enable()?;
    timer.start(StartCommand::NoStop)?;

    // 事件循环
    let event_loop = board.default_event_loop()?;
    let registration = event_loop.register_handler(DEMO_EVENTS, ANY_ID, |_, id, data| {
        log::info!("收到事件 {id}，{} 字节", data.len());
    })?;

    // GPTimer：每秒投递一次采样事件
    let alarm_loop = Arc::downgrade(&event_loop);
    let gptimer = board.periodic_gptimer(Duration::from_secs(1), move |_| {
        alarm_loop
            .upgrade()
            .and_then(|event_loop| event_loop.post_event_from_isr(DEMO_EVENTS, SAMPLE_READY, &[]).ok())
            .unwrap_or(false)
    })?;
    gptimer.start()?;

    event_loop.post_event(DEMO_EVENTS, SAMPLE_READY, &channel.read()?.to_le_bytes(), Wait::Forever)?;

    idle(board.driver().as_ref());
    log::info!(
        "按键次数: {}, 事件处理函数: {:?}, GPTimer 运行中: {}",
        presses.load(Ordering::Relaxed),
        registration.base(),
        gptimer.is_running()
    );
    Ok(())
}
