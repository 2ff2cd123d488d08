//! ADC 单元与通道
//!
//! 单元按编号登记在板级注册表中，通道按编号登记在所属单元中，都只保存弱引用。
//! 同一单元编号上，未校准单元和校准单元不能同时存活。

use std::sync::Arc;

use crate::driver::{AdcCaliHandle, AdcUnitHandle, Driver};
use crate::error::{Error, Result};
use crate::peripherals::adc_calibration::AdcCalibration;
use crate::registry::HandleRegistry;

/// 输入衰减
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum Attenuation {
    Db0 = 0,
    Db2_5 = 1,
    Db6 = 2,
    #[default]
    Db12 = 3,
}

impl Attenuation {
    /// 该衰减下的满量程电压（毫伏）
    pub const fn full_scale_millivolts(&self) -> u32 {
        match self {
            Attenuation::Db0 => 950,
            Attenuation::Db2_5 => 1250,
            Attenuation::Db6 => 1750,
            Attenuation::Db12 => 3100,
        }
    }
}

/// 采样位宽，`Default` 表示芯片支持的最大位宽
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum BitWidth {
    #[default]
    Default = 0,
    Bits9 = 9,
    Bits10 = 10,
    Bits11 = 11,
    Bits12 = 12,
    Bits13 = 13,
}

impl BitWidth {
    pub const fn bits(&self) -> u32 {
        match self {
            BitWidth::Default => 12,
            other => *other as u32,
        }
    }

    /// 原始读数上限（含）
    pub const fn max_raw(&self) -> i32 {
        (1 << self.bits()) - 1
    }
}

/// 通道配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AdcChannelConfig {
    pub attenuation: Attenuation,
    pub bitwidth: BitWidth,
}

/// 单元的两种形态
pub enum Calibration<D: Driver> {
    /// 只读原始值
    Uncalibrated,
    /// 可换算毫伏，携带共享的校准描述
    Calibrated(Arc<AdcCalibration<D>>),
}

impl<D: Driver> Calibration<D> {
    pub fn is_calibrated(&self) -> bool {
        matches!(self, Calibration::Calibrated(_))
    }

    pub fn descriptor(&self) -> Option<&Arc<AdcCalibration<D>>> {
        match self {
            Calibration::Uncalibrated => None,
            Calibration::Calibrated(calibration) => Some(calibration),
        }
    }

    /// 与一次获取请求是否相容：同为未校准，或校准参数一致
    pub(crate) fn matches(&self, requested: Option<AdcChannelConfig>) -> bool {
        match (self, requested) {
            (Calibration::Uncalibrated, None) => true,
            (Calibration::Calibrated(calibration), Some(config)) => calibration.channel_config() == config,
            _ => false,
        }
    }
}

impl<D: Driver> Clone for Calibration<D> {
    fn clone(&self) -> Self {
        match self {
            Calibration::Uncalibrated => Calibration::Uncalibrated,
            Calibration::Calibrated(calibration) => Calibration::Calibrated(calibration.clone()),
        }
    }
}

/// ADC 单元
///
/// 最后一个强引用释放时删除硬件单元，随后释放校准描述
pub struct AdcUnit<D: Driver> {
    driver: Arc<D>,
    unit: u8,
    handle: AdcUnitHandle,
    channels: HandleRegistry<AdcChannel<D>>,
    calibration: Calibration<D>,
}

impl<D: Driver> AdcUnit<D> {
    pub(crate) fn new(driver: Arc<D>, unit: u8, channel_count: usize, calibration: Calibration<D>) -> Result<Self> {
        let handle = driver_try!(driver.adc_new_unit(unit), "adc_oneshot_new_unit");
        Ok(Self {
            driver,
            unit,
            handle,
            channels: HandleRegistry::new("ADC 通道", channel_count),
            calibration,
        })
    }

    /// 单元编号（0 对应 ADC1）
    pub fn id(&self) -> u8 {
        self.unit
    }

    pub fn handle(&self) -> AdcUnitHandle {
        self.handle
    }

    pub fn calibration(&self) -> &Calibration<D> {
        &self.calibration
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibration.is_calibrated()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.capacity()
    }

    /// 当前存活的通道
    pub fn live_channel(&self, channel: u8) -> Option<Arc<AdcChannel<D>>> {
        self.channels.get(channel as usize)
    }

    /// 获取通道
    ///
    /// # 参数
    /// * `channel` - 通道编号
    /// * `config` - 通道配置；校准单元上必须与校准参数一致
    ///
    /// # 返回
    /// * `Ok(Arc<AdcChannel>)` - 新通道，或配置相同的已有通道
    /// * `Err(Error::OutOfRange)` - 通道编号越界
    /// * `Err(Error::Conflict)` - 配置与已有通道或校准参数不同
    pub fn channel(self: &Arc<Self>, channel: u8, config: AdcChannelConfig) -> Result<Arc<AdcChannel<D>>> {
        self.channels.check(channel as usize)?;
        if let Calibration::Calibrated(calibration) = &self.calibration {
            if calibration.channel_config() != config {
                log::warn!("ADC{} 通道 {} 的配置与校准参数不同", self.unit + 1, channel);
                return Err(Error::Conflict {
                    resource: "ADC 通道",
                    index: channel as usize,
                });
            }
        }

        self.channels.acquire(
            channel as usize,
            |live| live.config == config,
            || AdcChannel::new(self.clone(), channel, config),
        )
    }

    /// 按校准参数获取通道，仅用于校准单元
    pub fn calibrated_channel(self: &Arc<Self>, channel: u8) -> Result<Arc<AdcChannel<D>>> {
        match &self.calibration {
            Calibration::Calibrated(calibration) => self.channel(channel, calibration.channel_config()),
            Calibration::Uncalibrated => Err(Error::InvalidState("未校准的 ADC 单元")),
        }
    }
}

impl<D: Driver> Drop for AdcUnit<D> {
    fn drop(&mut self) {
        teardown!(self.driver.adc_del_unit(self.handle), "adc_oneshot_del_unit");
        log::debug!("ADC{} 已释放", self.unit + 1);
    }
}

/// ADC 通道
///
/// 构造时缓存单元句柄、通道号和校准句柄，中断上下文的读取只用这些缓存值
pub struct AdcChannel<D: Driver> {
    unit: Arc<AdcUnit<D>>,
    driver: Arc<D>,
    channel: u8,
    config: AdcChannelConfig,
    handle: AdcUnitHandle,
    cali: Option<AdcCaliHandle>,
}

impl<D: Driver> AdcChannel<D> {
    fn new(unit: Arc<AdcUnit<D>>, channel: u8, config: AdcChannelConfig) -> Result<Self> {
        let driver = unit.driver.clone();
        driver_try!(
            driver.adc_config_channel(unit.handle, channel, &config),
            "adc_oneshot_config_channel"
        );
        let handle = unit.handle;
        let cali = unit.calibration.descriptor().map(|calibration| calibration.handle());
        Ok(Self {
            unit,
            driver,
            channel,
            config,
            handle,
            cali,
        })
    }

    pub fn unit(&self) -> &Arc<AdcUnit<D>> {
        &self.unit
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn config(&self) -> AdcChannelConfig {
        self.config
    }

    /// 最近一次采样的原始值
    pub fn read(&self) -> Result<i32> {
        Ok(driver_try!(
            self.driver.adc_read(self.unit.handle, self.channel),
            "adc_oneshot_read"
        ))
    }

    /// 中断上下文读取
    pub fn read_isr(&self) -> Result<i32> {
        Ok(driver_try!(
            self.driver.adc_read_isr(self.handle, self.channel),
            "adc_oneshot_read_isr"
        ))
    }

    /// 读取并换算为毫伏，不超过衰减对应的满量程
    pub fn millivolts(&self) -> Result<i32> {
        let cali = self.cali.ok_or(Error::InvalidState("未校准的 ADC 通道无法换算毫伏"))?;
        let raw = self.read()?;
        Ok(driver_try!(
            self.driver.adc_cali_raw_to_voltage(cali, raw),
            "adc_cali_raw_to_voltage"
        ))
    }

    /// 中断上下文读取并换算为毫伏
    pub fn millivolts_isr(&self) -> Result<i32> {
        let cali = self.cali.ok_or(Error::InvalidState("未校准的 ADC 通道无法换算毫伏"))?;
        let raw = self.read_isr()?;
        Ok(driver_try!(
            self.driver.adc_cali_raw_to_voltage(cali, raw),
            "adc_cali_raw_to_voltage"
        ))
    }
}

impl<D: Driver> std::fmt::Debug for AdcUnit<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdcUnit")
            .field("unit", &self.unit)
            .field("handle", &self.handle)
            .field("calibration", &self.calibration.descriptor())
            .finish()
    }
}

impl<D: Driver> std::fmt::Debug for AdcChannel<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdcChannel")
            .field("unit", &self.unit.id())
            .field("channel", &self.channel)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::MockDriver;
    use crate::error::ErrorKind;

    fn unit(driver: &Arc<MockDriver>, calibration: Calibration<MockDriver>) -> Arc<AdcUnit<MockDriver>> {
        Arc::new(AdcUnit::new(driver.clone(), 0, 10, calibration).unwrap())
    }

    #[test]
    fn test_bitwidth_bounds() {
        assert_eq!(BitWidth::Default.max_raw(), 4095);
        assert_eq!(BitWidth::Bits9.max_raw(), 511);
        assert_eq!(BitWidth::Bits13.bits(), 13);
    }

    #[test]
    fn test_channel_reacquire_same_config() {
        let driver = Arc::new(MockDriver::new());
        let unit = unit(&driver, Calibration::Uncalibrated);
        let config = AdcChannelConfig::default();
        let a = unit.channel(3, config).unwrap();
        let b = unit.channel(3, config).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(driver.calls("adc_config_channel"), 1);
    }

    #[test]
    fn test_channel_out_of_range() {
        let driver = Arc::new(MockDriver::new());
        let unit = unit(&driver, Calibration::Uncalibrated);
        let err = unit.channel(10, AdcChannelConfig::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(driver.calls("adc_config_channel"), 0);
    }

    #[test]
    fn test_read_uses_cached_handles() {
        let driver = Arc::new(MockDriver::new());
        let unit = unit(&driver, Calibration::Uncalibrated);
        let channel = unit.channel(1, AdcChannelConfig::default()).unwrap();
        driver.set_adc_raw(0, 1, 1234);
        assert_eq!(channel.read().unwrap(), 1234);
        assert_eq!(channel.read_isr().unwrap(), 1234);
    }

    #[test]
    fn test_uncalibrated_millivolts_rejected() {
        let driver = Arc::new(MockDriver::new());
        let unit = unit(&driver, Calibration::Uncalibrated);
        let channel = unit.channel(1, AdcChannelConfig::default()).unwrap();
        assert_eq!(channel.millivolts().unwrap_err().kind(), ErrorKind::ConflictingState);
        assert_eq!(channel.millivolts_isr().unwrap_err().kind(), ErrorKind::ConflictingState);
        assert_eq!(unit.calibrated_channel(2).unwrap_err().kind(), ErrorKind::ConflictingState);
    }

    #[test]
    fn test_calibrated_channel_config_is_derived() {
        let driver = Arc::new(MockDriver::new());
        let calibration = Arc::new(AdcCalibration::new(driver.clone(), 0, Attenuation::Db6, BitWidth::Bits12).unwrap());
        let unit = unit(&driver, Calibration::Calibrated(calibration));
        let channel = unit.calibrated_channel(4).unwrap();
        assert_eq!(channel.config().attenuation, Attenuation::Db6);

        let other = AdcChannelConfig {
            attenuation: Attenuation::Db0,
            bitwidth: BitWidth::Bits12,
        };
        assert_eq!(unit.channel(5, other).unwrap_err().kind(), ErrorKind::ConflictingState);

        driver.set_adc_raw(0, 4, 4095);
        assert_eq!(channel.millivolts().unwrap(), 1750);
    }

    #[test]
    fn test_unit_deleted_after_last_channel() {
        let driver = Arc::new(MockDriver::new());
        let unit = unit(&driver, Calibration::Uncalibrated);
        let channel = unit.channel(0, AdcChannelConfig::default()).unwrap();
        drop(unit);
        assert_eq!(driver.calls("adc_del_unit"), 0);
        drop(channel);
        assert_eq!(driver.calls("adc_del_unit"), 1);
    }
}
