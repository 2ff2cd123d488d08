//! 板级资源管理器
//!
//! 每类外设一张按硬件编号索引的注册表，负责懒构造、冲突检测和共享所有权。
//! 目标板上通过 [`shared`] 取得进程级单例；主机测试可以在模拟驱动上构造独立的实例。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::ChipLayout;
use crate::driver::{AlarmCallback, Driver};
use crate::error::{Error, Result};
use crate::peripherals::adc::{AdcChannelConfig, AdcUnit, Attenuation, BitWidth, Calibration};
use crate::peripherals::adc_calibration::AdcCalibration;
use crate::peripherals::event_loop::{EventLoop, EventLoopConfig};
use crate::peripherals::gpio::{GpioConfig, IsrService, Pin};
use crate::peripherals::gptimer::{AlarmEventData, GpTimer, GpTimerConfig};
use crate::peripherals::mcpwm::Mcpwm;
use crate::registry::HandleRegistry;

/// 板级资源管理器
///
/// 创建后不销毁，持有的只有注册表的弱引用、GPIO 中断服务状态和默认事件循环
pub struct Board<D: Driver> {
    driver: Arc<D>,
    layout: ChipLayout,
    adc_units: HandleRegistry<AdcUnit<D>>,
    gpios: HandleRegistry<Pin<D>>,
    isr_service: Arc<IsrService>,
    mcpwm: Mcpwm<D>,
    default_loop: Mutex<Option<Arc<EventLoop<D>>>>,
}

impl<D: Driver> Board<D> {
    /// 创建板级管理器
    ///
    /// # 参数
    /// * `driver` - 驱动实现
    /// * `layout` - 芯片布局，决定各注册表的容量
    pub fn new(driver: Arc<D>, layout: ChipLayout) -> Self {
        log::info!(
            "初始化 {}: {} 个 ADC 单元, {} 个 GPIO, {} 个 MCPWM 组",
            layout.name,
            layout.adc_units(),
            layout.gpio_count,
            layout.mcpwm_groups
        );
        Self {
            adc_units: HandleRegistry::new("ADC", layout.adc_units()),
            gpios: HandleRegistry::new("GPIO", layout.gpio_count),
            isr_service: Arc::new(IsrService::default()),
            mcpwm: Mcpwm::new(driver.clone(), layout),
            default_loop: Mutex::new(None),
            driver,
            layout,
        }
    }

    pub fn driver(&self) -> &Arc<D> {
        &self.driver
    }

    pub fn layout(&self) -> &ChipLayout {
        &self.layout
    }

    /// 获取未校准的 ADC 单元
    ///
    /// # 返回
    /// * `Ok(Arc<AdcUnit>)` - 新单元，或已存在的同一个未校准单元
    /// * `Err(Error::OutOfRange)` - 单元编号越界
    /// * `Err(Error::Conflict)` - 该编号上有存活的校准单元
    pub fn adc_unit(&self, unit: u8) -> Result<Arc<AdcUnit<D>>> {
        self.acquire_adc_unit(unit, None)
    }

    /// 获取校准的 ADC 单元
    ///
    /// 同编号上有未校准单元，或校准参数不同的校准单元存活时返回冲突
    pub fn calibrated_adc_unit(&self, unit: u8, attenuation: Attenuation, bitwidth: BitWidth) -> Result<Arc<AdcUnit<D>>> {
        self.acquire_adc_unit(unit, Some(AdcChannelConfig { attenuation, bitwidth }))
    }

    fn acquire_adc_unit(&self, unit: u8, calibration: Option<AdcChannelConfig>) -> Result<Arc<AdcUnit<D>>> {
        let channel_count = self.layout.adc_channels_for(unit);
        self.adc_units.acquire(
            unit as usize,
            |live| live.calibration().matches(calibration),
            || {
                let calibration = match calibration {
                    None => Calibration::Uncalibrated,
                    Some(config) => Calibration::Calibrated(Arc::new(AdcCalibration::new(
                        self.driver.clone(),
                        unit,
                        config.attenuation,
                        config.bitwidth,
                    )?)),
                };
                AdcUnit::new(self.driver.clone(), unit, channel_count, calibration)
            },
        )
    }

    /// GPIO → (ADC 单元, 通道)
    pub fn adc_channel_for_gpio(&self, pin: u8) -> Result<(u8, u8)> {
        self.check_gpio(pin)?;
        Ok(driver_try!(self.driver.adc_io_to_channel(pin), "adc_oneshot_io_to_channel"))
    }

    /// (ADC 单元, 通道) → GPIO
    pub fn gpio_for_adc_channel(&self, unit: u8, channel: u8) -> Result<u8> {
        self.adc_units.check(unit as usize)?;
        let channels = self.layout.adc_channels_for(unit);
        if channel as usize >= channels {
            return Err(Error::OutOfRange {
                resource: "ADC 通道",
                index: channel as usize,
                capacity: channels,
            });
        }
        Ok(driver_try!(
            self.driver.adc_channel_to_io(unit, channel),
            "adc_oneshot_channel_to_io"
        ))
    }

    /// 获取 GPIO 引脚
    ///
    /// # 返回
    /// * `Ok(Arc<Pin>)` - 新引脚，或配置相同的已有引脚
    /// * `Err(Error::OutOfRange)` / `Err(Error::InvalidArgument)` - 引脚编号越界或芯片上不存在
    /// * `Err(Error::Conflict)` - 引脚已被不同配置占用，原配置不变
    pub fn gpio(&self, config: GpioConfig) -> Result<Arc<Pin<D>>> {
        self.check_gpio(config.pin)?;
        self.gpios.acquire(
            config.pin as usize,
            |live| live.config() == config,
            || Pin::new(self.driver.clone(), self.isr_service.clone(), config),
        )
    }

    /// 当前存活的引脚
    pub fn live_gpio(&self, pin: u8) -> Option<Arc<Pin<D>>> {
        self.gpios.get(pin as usize)
    }

    /// GPIO 中断服务是否已安装
    pub fn isr_service_installed(&self) -> bool {
        self.isr_service.is_installed()
    }

    pub fn mcpwm(&self) -> &Mcpwm<D> {
        &self.mcpwm
    }

    /// 创建通用定时器，不带报警回调
    pub fn gptimer(&self, config: &GpTimerConfig) -> Result<GpTimer<D>> {
        GpTimer::new(self.driver.clone(), *config, None)
    }

    /// 创建带报警回调的通用定时器
    pub fn gptimer_with_alarm<F>(&self, config: &GpTimerConfig, on_alarm: F) -> Result<GpTimer<D>>
    where
        F: Fn(&AlarmEventData) -> bool + Send + Sync + 'static,
    {
        let callback: AlarmCallback = Arc::new(on_alarm);
        GpTimer::new(self.driver.clone(), *config, Some(callback))
    }

    /// 以固定周期报警的通用定时器
    pub fn periodic_gptimer<F>(&self, period: Duration, on_alarm: F) -> Result<GpTimer<D>>
    where
        F: Fn(&AlarmEventData) -> bool + Send + Sync + 'static,
    {
        self.gptimer_with_alarm(&GpTimerConfig::periodic(period), on_alarm)
    }

    /// 默认事件循环，首次访问时创建，之后总是返回同一个实例
    pub fn default_event_loop(&self) -> Result<Arc<EventLoop<D>>> {
        let mut default_loop = self.default_loop.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(event_loop) = default_loop.as_ref() {
            return Ok(event_loop.clone());
        }
        let event_loop = Arc::new(EventLoop::default_loop(self.driver.clone())?);
        *default_loop = Some(event_loop.clone());
        Ok(event_loop)
    }

    /// 创建带独立任务（或由调用方运行）的事件循环
    pub fn create_event_loop(&self, config: &EventLoopConfig) -> Result<Arc<EventLoop<D>>> {
        Ok(Arc::new(EventLoop::create(self.driver.clone(), config)?))
    }

    fn check_gpio(&self, pin: u8) -> Result<()> {
        self.gpios.check(pin as usize)?;
        if !self.layout.is_valid_gpio(pin) {
            return Err(Error::InvalidArgument("GPIO 编号在芯片上不存在"));
        }
        Ok(())
    }
}

/// 进程级板级管理器，首次调用时初始化，之后一直存在
#[cfg(target_os = "espidf")]
pub fn shared() -> &'static Board<crate::driver::esp::EspDriver> {
    use std::sync::OnceLock;

    static BOARD: OnceLock<Board<crate::driver::esp::EspDriver>> = OnceLock::new();
    BOARD.get_or_init(|| Board::new(Arc::new(crate::driver::esp::EspDriver::new()), ChipLayout::current()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::MockDriver;
    use crate::error::ErrorKind;
    use crate::peripherals::gpio::GpioMode;

    fn board() -> Board<MockDriver> {
        Board::new(Arc::new(MockDriver::new()), ChipLayout::ESP32S3)
    }

    #[test]
    fn test_adc_unit_out_of_range() {
        let board = board();
        assert_eq!(board.adc_unit(2).unwrap_err().kind(), ErrorKind::InvalidArgument);
        assert_eq!(board.driver().calls("adc_new_unit"), 0);
    }

    #[test]
    fn test_calibrated_units_with_different_parameters_conflict() {
        let board = board();
        let unit = board.calibrated_adc_unit(0, Attenuation::Db12, BitWidth::Bits12).unwrap();
        let same = board.calibrated_adc_unit(0, Attenuation::Db12, BitWidth::Bits12).unwrap();
        assert!(Arc::ptr_eq(&unit, &same));
        let err = board
            .calibrated_adc_unit(0, Attenuation::Db6, BitWidth::Bits12)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConflictingState);
        assert_eq!(board.driver().calls("adc_cali_create"), 1);
    }

    #[test]
    fn test_failed_calibration_leaves_slot_empty() {
        let board = board();
        board
            .driver()
            .fail_next("adc_cali_create", crate::error::codes::ESP_ERR_NOT_SUPPORTED);
        let err = board.calibrated_adc_unit(1, Attenuation::Db0, BitWidth::Default).unwrap_err();
        assert_eq!(err.code(), crate::error::codes::ESP_ERR_NOT_SUPPORTED);
        assert_eq!(board.driver().calls("adc_new_unit"), 0);
        assert!(board.adc_unit(1).is_ok());
    }

    #[test]
    fn test_gpio_hole_rejected() {
        let board = board();
        let err = board.gpio(GpioConfig::new(22, GpioMode::OUTPUT)).unwrap_err();
        assert_eq!(err, Error::InvalidArgument("GPIO 编号在芯片上不存在"));
        let err = board.gpio(GpioConfig::new(49, GpioMode::OUTPUT)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(board.driver().calls("gpio_config"), 0);
    }

    #[test]
    fn test_adc_gpio_mapping() {
        let board = board();
        assert_eq!(board.adc_channel_for_gpio(1).unwrap(), (0, 0));
        assert_eq!(board.gpio_for_adc_channel(1, 3).unwrap(), 14);
        assert_eq!(board.adc_channel_for_gpio(40).unwrap_err().kind(), ErrorKind::DriverFailure);
        assert_eq!(board.gpio_for_adc_channel(0, 10).unwrap_err().kind(), ErrorKind::InvalidArgument);
    }
}
