//! ADC 校准描述
//!
//! 描述在构造后不可变，由校准过的 ADC 单元和它的所有通道共享。

use std::sync::Arc;

use crate::driver::{AdcCaliHandle, Driver};
use crate::error::Result;
use crate::peripherals::adc::{AdcChannelConfig, Attenuation, BitWidth};

/// 校准方案：(单元, 衰减, 位宽) 加上驱动生成的换算句柄
pub struct AdcCalibration<D: Driver> {
    driver: Arc<D>,
    unit: u8,
    config: AdcChannelConfig,
    handle: AdcCaliHandle,
}

impl<D: Driver> AdcCalibration<D> {
    pub(crate) fn new(driver: Arc<D>, unit: u8, attenuation: Attenuation, bitwidth: BitWidth) -> Result<Self> {
        let config = AdcChannelConfig { attenuation, bitwidth };
        let handle = driver_try!(driver.adc_cali_create(unit, &config), "adc_cali_create_scheme");
        log::debug!("ADC{} 校准方案已创建: {:?}", unit + 1, config);
        Ok(Self {
            driver,
            unit,
            config,
            handle,
        })
    }

    pub fn unit(&self) -> u8 {
        self.unit
    }

    pub fn attenuation(&self) -> Attenuation {
        self.config.attenuation
    }

    pub fn bitwidth(&self) -> BitWidth {
        self.config.bitwidth
    }

    /// 校准单元上所有通道必须使用的配置
    pub fn channel_config(&self) -> AdcChannelConfig {
        self.config
    }

    pub(crate) fn handle(&self) -> AdcCaliHandle {
        self.handle
    }

    /// 原始值换算为毫伏
    pub fn to_millivolts(&self, raw: i32) -> Result<i32> {
        Ok(driver_try!(self.driver.adc_cali_raw_to_voltage(self.handle, raw), "adc_cali_raw_to_voltage"))
    }
}

impl<D: Driver> Drop for AdcCalibration<D> {
    fn drop(&mut self) {
        teardown!(self.driver.adc_cali_delete(self.handle), "adc_cali_delete_scheme");
    }
}

impl<D: Driver> std::fmt::Debug for AdcCalibration<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdcCalibration")
            .field("unit", &self.unit)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::MockDriver;

    #[test]
    fn test_scheme_deleted_on_drop() {
        let driver = Arc::new(MockDriver::new());
        let calibration = AdcCalibration::new(driver.clone(), 0, Attenuation::Db12, BitWidth::Bits12).unwrap();
        assert_eq!(calibration.channel_config().attenuation, Attenuation::Db12);
        assert_eq!(driver.live_calibrations(), 1);
        drop(calibration);
        assert_eq!(driver.calls("adc_cali_delete"), 1);
        assert_eq!(driver.live_calibrations(), 0);
    }

    #[test]
    fn test_millivolts_bounded_by_full_scale() {
        let driver = Arc::new(MockDriver::new());
        let calibration = AdcCalibration::new(driver, 0, Attenuation::Db6, BitWidth::Bits12).unwrap();
        let max = calibration.to_millivolts(4095).unwrap();
        assert_eq!(max, Attenuation::Db6.full_scale_millivolts() as i32);
        assert_eq!(calibration.to_millivolts(0).unwrap(), 0);
    }
}
