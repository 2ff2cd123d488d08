//! GPIO 引脚
//!
//! 引脚配置（方向、上下拉）在构造后仍可逐项修改，驱动调用成功后才写回本地状态。
//! 中断类型和回调单独保存，不参与配置比较。

use std::sync::{Arc, Mutex, MutexGuard};

use embedded_hal::digital::{ErrorType, InputPin, OutputPin, StatefulOutputPin};

use crate::driver::{Driver, GpioDriver, IsrHandler};
use crate::error::{Error, Result};

/// 引脚方向，三个标志相互独立
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct GpioMode {
    pub input: bool,
    pub output: bool,
    pub open_drain: bool,
}

impl GpioMode {
    pub const DISABLE: GpioMode = GpioMode::new(false, false, false);
    pub const INPUT: GpioMode = GpioMode::new(true, false, false);
    pub const OUTPUT: GpioMode = GpioMode::new(false, true, false);
    pub const INPUT_OUTPUT: GpioMode = GpioMode::new(true, true, false);
    pub const OUTPUT_OPEN_DRAIN: GpioMode = GpioMode::new(false, true, true);
    pub const INPUT_OUTPUT_OPEN_DRAIN: GpioMode = GpioMode::new(true, true, true);

    pub const fn new(input: bool, output: bool, open_drain: bool) -> Self {
        Self {
            input,
            output,
            open_drain,
        }
    }

    /// `gpio_mode_t` 位掩码
    pub const fn bits(&self) -> u32 {
        (self.input as u32) | (self.output as u32) << 1 | (self.open_drain as u32) << 2
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Pull {
    #[default]
    Disabled,
    Enabled,
}

impl Pull {
    pub fn is_enabled(&self) -> bool {
        *self == Pull::Enabled
    }
}

impl From<bool> for Pull {
    fn from(enabled: bool) -> Self {
        if enabled {
            Pull::Enabled
        } else {
            Pull::Disabled
        }
    }
}

/// 中断触发方式，取值与 `gpio_int_type_t` 一致
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum InterruptType {
    #[default]
    Disabled = 0,
    RisingEdge = 1,
    FallingEdge = 2,
    AnyEdge = 3,
    LowLevel = 4,
    HighLevel = 5,
}

/// 引脚配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpioConfig {
    pub pin: u8,
    pub mode: GpioMode,
    pub pull_up: Pull,
    pub pull_down: Pull,
}

impl GpioConfig {
    pub const fn new(pin: u8, mode: GpioMode) -> Self {
        Self {
            pin,
            mode,
            pull_up: Pull::Disabled,
            pull_down: Pull::Disabled,
        }
    }

    pub const fn with_pull_up(mut self, pull: Pull) -> Self {
        self.pull_up = pull;
        self
    }

    pub const fn with_pull_down(mut self, pull: Pull) -> Self {
        self.pull_down = pull;
        self
    }
}

/// 进程级 GPIO 中断服务，首次使能中断时安装一次
#[derive(Default)]
pub(crate) struct IsrService {
    installed: Mutex<bool>,
}

impl IsrService {
    pub(crate) fn ensure_installed<G: GpioDriver + ?Sized>(&self, driver: &G) -> Result<()> {
        let mut installed = self.installed.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *installed {
            return Ok(());
        }
        driver_try!(driver.gpio_install_isr_service(), "gpio_install_isr_service");
        *installed = true;
        log::info!("GPIO 中断服务已安装");
        Ok(())
    }

    pub(crate) fn is_installed(&self) -> bool {
        *self.installed.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct PinState {
    config: GpioConfig,
    interrupt: InterruptType,
    handler: Option<IsrHandler>,
}

/// GPIO 引脚
///
/// 释放时先摘除中断回调，再复位引脚
pub struct Pin<D: Driver> {
    driver: Arc<D>,
    number: u8,
    isr: Arc<IsrService>,
    state: Mutex<PinState>,
}

impl<D: Driver> Pin<D> {
    pub(crate) fn new(driver: Arc<D>, isr: Arc<IsrService>, config: GpioConfig) -> Result<Self> {
        driver_try!(driver.gpio_config(&config, InterruptType::Disabled), "gpio_config");
        Ok(Self {
            driver,
            number: config.pin,
            isr,
            state: Mutex::new(PinState {
                config,
                interrupt: InterruptType::Disabled,
                handler: None,
            }),
        })
    }

    pub fn number(&self) -> u8 {
        self.number
    }

    pub fn config(&self) -> GpioConfig {
        self.state().config
    }

    pub fn mode(&self) -> GpioMode {
        self.state().config.mode
    }

    pub fn pull_up(&self) -> Pull {
        self.state().config.pull_up
    }

    pub fn pull_down(&self) -> Pull {
        self.state().config.pull_down
    }

    pub fn interrupt_type(&self) -> InterruptType {
        self.state().interrupt
    }

    pub fn has_interrupt_handler(&self) -> bool {
        self.state().handler.is_some()
    }

    /// 整体替换配置，引脚编号必须一致，已设置的中断类型保留
    pub fn set_config(&self, config: GpioConfig) -> Result<()> {
        if config.pin != self.number {
            return Err(Error::InvalidArgument("配置中的引脚编号与当前引脚不同"));
        }
        let mut state = self.state();
        driver_try!(self.driver.gpio_config(&config, state.interrupt), "gpio_config");
        state.config = config;
        Ok(())
    }

    pub fn set_mode(&self, mode: GpioMode) -> Result<()> {
        let mut state = self.state();
        driver_try!(self.driver.gpio_set_direction(self.number, mode), "gpio_set_direction");
        state.config.mode = mode;
        Ok(())
    }

    pub fn set_pull_up(&self, pull: Pull) -> Result<()> {
        let mut state = self.state();
        driver_try!(self.driver.gpio_set_pull_up(self.number, pull), "gpio_pullup");
        state.config.pull_up = pull;
        Ok(())
    }

    pub fn set_pull_down(&self, pull: Pull) -> Result<()> {
        let mut state = self.state();
        driver_try!(self.driver.gpio_set_pull_down(self.number, pull), "gpio_pulldown");
        state.config.pull_down = pull;
        Ok(())
    }

    /// 设置中断类型和回调
    ///
    /// 首次调用时安装 GPIO 中断服务。`InterruptType::Disabled` 等同于 [`Pin::disable_interrupt`]。
    /// 任一步失败时恢复原来的中断类型和回调。
    ///
    /// # 参数
    /// * `interrupt` - 触发方式
    /// * `callback` - 中断上下文中执行的回调，不能阻塞
    pub fn set_interrupt<F>(&self, interrupt: InterruptType, callback: F) -> Result<()>
    where
        F: Fn() + Send + Sync + 'static,
    {
        if interrupt == InterruptType::Disabled {
            return self.disable_interrupt();
        }
        self.isr.ensure_installed(&*self.driver)?;

        let mut state = self.state();
        let handler: IsrHandler = Arc::new(callback);

        driver_try!(self.driver.gpio_set_intr_type(self.number, interrupt), "gpio_set_intr_type");
        if let Err(e) = self.driver.gpio_isr_handler_add(self.number, handler.clone()) {
            log::error!("gpio_isr_handler_add failed: {e}");
            self.restore_interrupt(&state, false);
            return Err(Error::Driver {
                call: "gpio_isr_handler_add",
                source: e,
            });
        }
        if let Err(e) = self.driver.gpio_intr_enable(self.number) {
            log::error!("gpio_intr_enable failed: {e}");
            self.restore_interrupt(&state, true);
            return Err(Error::Driver {
                call: "gpio_intr_enable",
                source: e,
            });
        }

        state.interrupt = interrupt;
        state.handler = Some(handler);
        Ok(())
    }

    /// 摘除回调并关闭中断
    ///
    /// 任一步失败时重新挂上原来的回调，本地状态保持不变
    pub fn disable_interrupt(&self) -> Result<()> {
        let mut state = self.state();
        if state.interrupt == InterruptType::Disabled && state.handler.is_none() {
            return Ok(());
        }
        let had_handler = state.handler.is_some();
        if had_handler {
            driver_try!(self.driver.gpio_isr_handler_remove(self.number), "gpio_isr_handler_remove");
        }
        if let Err(e) = self.driver.gpio_intr_disable(self.number) {
            log::error!("gpio_intr_disable failed: {e}");
            self.restore_interrupt(&state, had_handler);
            return Err(Error::Driver {
                call: "gpio_intr_disable",
                source: e,
            });
        }
        if let Err(e) = self.driver.gpio_set_intr_type(self.number, InterruptType::Disabled) {
            log::error!("gpio_set_intr_type failed: {e}");
            self.restore_interrupt(&state, had_handler);
            if state.interrupt != InterruptType::Disabled {
                teardown!(self.driver.gpio_intr_enable(self.number), "gpio_intr_enable");
            }
            return Err(Error::Driver {
                call: "gpio_set_intr_type",
                source: e,
            });
        }
        state.interrupt = InterruptType::Disabled;
        state.handler = None;
        Ok(())
    }

    pub fn level(&self) -> bool {
        self.driver.gpio_get_level(self.number)
    }

    pub fn set_level(&self, level: bool) -> Result<()> {
        driver_try!(self.driver.gpio_set_level(self.number, level), "gpio_set_level");
        Ok(())
    }

    /// 把驱动恢复到 `state` 记录的中断设置
    fn restore_interrupt(&self, state: &PinState, handler_replaced: bool) {
        if handler_replaced {
            match &state.handler {
                Some(previous) => teardown!(
                    self.driver.gpio_isr_handler_add(self.number, previous.clone()),
                    "gpio_isr_handler_add"
                ),
                None => teardown!(self.driver.gpio_isr_handler_remove(self.number), "gpio_isr_handler_remove"),
            }
        }
        teardown!(
            self.driver.gpio_set_intr_type(self.number, state.interrupt),
            "gpio_set_intr_type"
        );
    }

    fn state(&self) -> MutexGuard<'_, PinState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<D: Driver> Drop for Pin<D> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner());
        if state.handler.take().is_some() {
            teardown!(self.driver.gpio_isr_handler_remove(self.number), "gpio_isr_handler_remove");
            teardown!(self.driver.gpio_intr_disable(self.number), "gpio_intr_disable");
        }
        teardown!(self.driver.gpio_reset(self.number), "gpio_reset_pin");
        log::debug!("GPIO{} 已复位", self.number);
    }
}

impl<D: Driver> std::fmt::Debug for Pin<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("Pin")
            .field("config", &state.config)
            .field("interrupt", &state.interrupt)
            .finish()
    }
}

impl<D: Driver> ErrorType for &Pin<D> {
    type Error = Error;
}

impl<D: Driver> OutputPin for &Pin<D> {
    fn set_low(&mut self) -> Result<()> {
        self.set_level(false)
    }

    fn set_high(&mut self) -> Result<()> {
        self.set_level(true)
    }
}

impl<D: Driver> StatefulOutputPin for &Pin<D> {
    fn is_set_high(&mut self) -> Result<bool> {
        Ok(self.level())
    }

    fn is_set_low(&mut self) -> Result<bool> {
        Ok(!self.level())
    }
}

impl<D: Driver> InputPin for &Pin<D> {
    fn is_high(&mut self) -> Result<bool> {
        Ok(self.level())
    }

    fn is_low(&mut self) -> Result<bool> {
        Ok(!self.level())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::MockDriver;
    use crate::error::codes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pin(driver: &Arc<MockDriver>, isr: &Arc<IsrService>) -> Pin<MockDriver> {
        Pin::new(driver.clone(), isr.clone(), GpioConfig::new(4, GpioMode::INPUT_OUTPUT)).unwrap()
    }

    #[test]
    fn test_mode_bits_match_idf() {
        assert_eq!(GpioMode::DISABLE.bits(), 0);
        assert_eq!(GpioMode::INPUT.bits(), 1);
        assert_eq!(GpioMode::OUTPUT.bits(), 2);
        assert_eq!(GpioMode::INPUT_OUTPUT.bits(), 3);
        assert_eq!(GpioMode::OUTPUT_OPEN_DRAIN.bits(), 6);
        assert_eq!(GpioMode::INPUT_OUTPUT_OPEN_DRAIN.bits(), 7);
    }

    #[test]
    fn test_setter_commits_only_on_success() {
        let driver = Arc::new(MockDriver::new());
        let isr = Arc::new(IsrService::default());
        let pin = pin(&driver, &isr);

        driver.fail_next("gpio_set_pull_up", codes::ESP_FAIL);
        assert!(pin.set_pull_up(Pull::Enabled).is_err());
        assert_eq!(pin.pull_up(), Pull::Disabled);

        pin.set_pull_up(Pull::Enabled).unwrap();
        assert_eq!(pin.pull_up(), Pull::Enabled);

        pin.set_mode(GpioMode::OUTPUT).unwrap();
        assert_eq!(pin.mode(), GpioMode::OUTPUT);
    }

    #[test]
    fn test_set_config_requires_same_pin() {
        let driver = Arc::new(MockDriver::new());
        let isr = Arc::new(IsrService::default());
        let pin = pin(&driver, &isr);
        let err = pin.set_config(GpioConfig::new(5, GpioMode::INPUT)).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidArgument);

        let config = GpioConfig::new(4, GpioMode::INPUT).with_pull_down(Pull::Enabled);
        pin.set_config(config).unwrap();
        assert_eq!(pin.config(), config);
    }

    #[test]
    fn test_interrupt_installs_service_once() {
        let driver = Arc::new(MockDriver::new());
        let isr = Arc::new(IsrService::default());
        let a = pin(&driver, &isr);
        let b = Pin::new(driver.clone(), isr.clone(), GpioConfig::new(5, GpioMode::INPUT)).unwrap();

        a.set_interrupt(InterruptType::RisingEdge, || {}).unwrap();
        b.set_interrupt(InterruptType::FallingEdge, || {}).unwrap();
        assert_eq!(driver.calls("gpio_install_isr_service"), 1);
        assert!(isr.is_installed());
    }

    #[test]
    fn test_interrupt_callback_and_disable() {
        let driver = Arc::new(MockDriver::new());
        let isr = Arc::new(IsrService::default());
        let pin = pin(&driver, &isr);
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        pin.set_interrupt(InterruptType::AnyEdge, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert!(driver.fire_pin_interrupt(4));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        pin.disable_interrupt().unwrap();
        assert_eq!(pin.interrupt_type(), InterruptType::Disabled);
        assert!(!pin.has_interrupt_handler());
        assert!(!driver.fire_pin_interrupt(4));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_interrupt_enable_restores_state() {
        let driver = Arc::new(MockDriver::new());
        let isr = Arc::new(IsrService::default());
        let pin = pin(&driver, &isr);

        driver.fail_next("gpio_intr_enable", codes::ESP_ERR_INVALID_STATE);
        assert!(pin.set_interrupt(InterruptType::HighLevel, || {}).is_err());
        assert_eq!(pin.interrupt_type(), InterruptType::Disabled);
        assert!(!pin.has_interrupt_handler());
        assert!(!driver.has_isr_handler(4));
        assert_eq!(driver.pin_interrupt(4), InterruptType::Disabled);
    }

    #[test]
    fn test_failed_intr_disable_keeps_handler() {
        let driver = Arc::new(MockDriver::new());
        let isr = Arc::new(IsrService::default());
        let pin = pin(&driver, &isr);
        pin.set_interrupt(InterruptType::RisingEdge, || {}).unwrap();

        driver.fail_next("gpio_intr_disable", codes::ESP_FAIL);
        assert!(pin.disable_interrupt().is_err());
        assert_eq!(pin.interrupt_type(), InterruptType::RisingEdge);
        assert!(pin.has_interrupt_handler());
        assert!(driver.has_isr_handler(4));
        assert!(driver.fire_pin_interrupt(4));
    }

    #[test]
    fn test_failed_intr_type_reset_keeps_handler() {
        let driver = Arc::new(MockDriver::new());
        let isr = Arc::new(IsrService::default());
        let pin = pin(&driver, &isr);
        pin.set_interrupt(InterruptType::FallingEdge, || {}).unwrap();

        driver.fail_next("gpio_set_intr_type", codes::ESP_ERR_INVALID_ARG);
        assert!(pin.disable_interrupt().is_err());
        assert_eq!(pin.interrupt_type(), InterruptType::FallingEdge);
        assert!(pin.has_interrupt_handler());
        assert_eq!(driver.pin_interrupt(4), InterruptType::FallingEdge);
        assert!(driver.fire_pin_interrupt(4));

        pin.disable_interrupt().unwrap();
        assert!(!pin.has_interrupt_handler());
        assert!(!driver.has_isr_handler(4));
    }

    #[test]
    fn test_drop_detaches_then_resets() {
        let driver = Arc::new(MockDriver::new());
        let isr = Arc::new(IsrService::default());
        let pin = pin(&driver, &isr);
        pin.set_interrupt(InterruptType::LowLevel, || {}).unwrap();
        drop(pin);
        assert!(!driver.has_isr_handler(4));
        assert_eq!(driver.calls("gpio_reset"), 1);
        assert!(driver.pin_config(4).is_none());
    }

    #[test]
    fn test_embedded_hal_traits() {
        let driver = Arc::new(MockDriver::new());
        let isr = Arc::new(IsrService::default());
        let pin = pin(&driver, &isr);
        let mut io = &pin;
        io.set_high().unwrap();
        assert!(io.is_set_high().unwrap());
        assert!(io.is_high().unwrap());
        io.set_low().unwrap();
        assert!(io.is_low().unwrap());
    }
}
