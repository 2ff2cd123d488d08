//! ESP32 板级外设资源管理
//!
//! 以 [`Board`] 为入口按硬件编号获取 ADC、GPIO、MCPWM、GPTimer 和事件循环资源：
//! 同一编号同一配置总是拿到同一个共享实例，配置不同则报告冲突，
//! 最后一个持有者释放时按正确顺序释放硬件。
//!
//! 硬件调用经由 [`driver`] 中的 trait 完成，目标板上使用 `EspDriver`，
//! 主机上使用 [`MockDriver`](driver::mock::MockDriver)。

#[macro_use]
mod macros;

pub mod arena;
pub mod board;
pub mod config;
pub mod driver;
pub mod error;
#[cfg(not(target_os = "espidf"))]
pub mod logging;
pub mod peripherals;
pub mod registry;

pub use board::Board;
pub use config::ChipLayout;
pub use driver::Driver;
pub use error::{DriverError, Error, ErrorKind, Result};
pub use peripherals::*;
