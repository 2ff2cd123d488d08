//! 芯片配置模块
//!
//! 提供各芯片外设数量的定义和校验

pub mod chip;

// 重新导出常用类型
pub use chip::ChipLayout;
