//! MCPWM GPIO 故障源，不挂在任何定时器下

use std::sync::{Arc, Mutex};

use super::{FaultCallbacks, GpioFaultConfig};
use crate::driver::{Driver, McpwmFaultHandle};
use crate::error::Result;

/// GPIO 故障检测
///
/// 不属于定时器树，由调用方直接持有
pub struct GpioFault<D: Driver> {
    driver: Arc<D>,
    config: GpioFaultConfig,
    handle: McpwmFaultHandle,
    callbacks: Mutex<FaultCallbacks>,
}

impl<D: Driver> GpioFault<D> {
    pub(super) fn new(driver: Arc<D>, config: GpioFaultConfig) -> Result<Self> {
        let handle = driver_try!(driver.mcpwm_new_gpio_fault(&config), "mcpwm_new_gpio_fault");
        Ok(Self {
            driver,
            config,
            handle,
            callbacks: Mutex::new(FaultCallbacks::default()),
        })
    }

    pub fn config(&self) -> &GpioFaultConfig {
        &self.config
    }

    pub fn handle(&self) -> McpwmFaultHandle {
        self.handle
    }

    /// 注册进入/退出回调，未设置的回调不会交给驱动
    pub fn set_callbacks(&self, callbacks: FaultCallbacks) -> Result<()> {
        let mut current = self.callbacks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        driver_try!(
            self.driver.mcpwm_fault_register_event_callbacks(self.handle, &callbacks),
            "mcpwm_fault_register_event_callbacks"
        );
        *current = callbacks;
        Ok(())
    }
}

impl<D: Driver> Drop for GpioFault<D> {
    fn drop(&mut self) {
        teardown!(self.driver.mcpwm_del_fault(self.handle), "mcpwm_del_fault");
    }
}

impl<D: Driver> std::fmt::Debug for GpioFault<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpioFault")
            .field("handle", &self.handle)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChipLayout;
    use crate::driver::mock::MockDriver;
    use crate::peripherals::mcpwm::{GpioFaultFlags, InterruptPriority, Mcpwm};

    #[test]
    fn test_fault_callbacks_and_teardown() {
        let driver = Arc::new(MockDriver::new());
        let mcpwm = Mcpwm::new(driver.clone(), ChipLayout::ESP32S3);
        let fault = mcpwm
            .gpio_fault(&GpioFaultConfig {
                group_id: 1,
                priority: InterruptPriority::Default,
                gpio: 10,
                flags: GpioFaultFlags {
                    active_level: true,
                    ..GpioFaultFlags::default()
                },
            })
            .unwrap();

        fault.set_callbacks(FaultCallbacks::new().on_enter(|| true)).unwrap();
        assert_eq!(driver.fire_fault(fault.handle(), true), Some(true));
        assert_eq!(driver.fire_fault(fault.handle(), false), None);

        drop(fault);
        assert_eq!(driver.calls("mcpwm_del_fault"), 1);
    }
}
