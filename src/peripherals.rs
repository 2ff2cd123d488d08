//! 外设模块
//!
//! 每类外设的资源对象只能由 [`Board`](crate::Board) 或它的父资源构造

pub mod adc;
pub mod adc_calibration;
pub mod event_loop;
pub mod gpio;
pub mod gptimer;
pub mod mcpwm;

// 重新导出常用类型
pub use adc::{AdcChannel, AdcChannelConfig, AdcUnit, Attenuation, BitWidth, Calibration};
pub use adc_calibration::AdcCalibration;
pub use event_loop::{EventBase, EventHandlerRegistration, EventId, EventLoop, EventLoopConfig, TaskInfo, Wait, ANY_ID};
pub use gpio::{GpioConfig, GpioMode, InterruptType, Pin, Pull};
pub use gptimer::{AlarmConfig, AlarmEventData, CountDirection, GpTimer, GpTimerConfig};
