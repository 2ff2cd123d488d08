//! 错误类型
//!
//! 所有获取/修改操作都返回 [`Result`]，错误分为三类：参数无效、状态冲突、驱动失败。

use std::fmt;

use thiserror::Error;

/// ESP-IDF 通用错误码
pub mod codes {
    pub const ESP_OK: i32 = 0;
    pub const ESP_FAIL: i32 = -1;
    pub const ESP_ERR_NO_MEM: i32 = 0x101;
    pub const ESP_ERR_INVALID_ARG: i32 = 0x102;
    pub const ESP_ERR_INVALID_STATE: i32 = 0x103;
    pub const ESP_ERR_INVALID_SIZE: i32 = 0x104;
    pub const ESP_ERR_NOT_FOUND: i32 = 0x105;
    pub const ESP_ERR_NOT_SUPPORTED: i32 = 0x106;
    pub const ESP_ERR_TIMEOUT: i32 = 0x107;
}

/// 驱动层返回的原始错误码（`esp_err_t`）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DriverError(i32);

impl DriverError {
    pub const fn new(code: i32) -> Self {
        Self(code)
    }

    pub const fn code(&self) -> i32 {
        self.0
    }

    /// 把 `esp_err_t` 转成 `Result`，`ESP_OK` 视为成功
    pub fn check(code: i32) -> DriverResult<()> {
        if code == codes::ESP_OK {
            Ok(())
        } else {
            Err(Self(code))
        }
    }

    /// 与 `esp_err_to_name` 对应的名称，未知错误码返回 `None`
    pub fn name(&self) -> Option<&'static str> {
        let name = match self.0 {
            codes::ESP_FAIL => "ESP_FAIL",
            codes::ESP_ERR_NO_MEM => "ESP_ERR_NO_MEM",
            codes::ESP_ERR_INVALID_ARG => "ESP_ERR_INVALID_ARG",
            codes::ESP_ERR_INVALID_STATE => "ESP_ERR_INVALID_STATE",
            codes::ESP_ERR_INVALID_SIZE => "ESP_ERR_INVALID_SIZE",
            codes::ESP_ERR_NOT_FOUND => "ESP_ERR_NOT_FOUND",
            codes::ESP_ERR_NOT_SUPPORTED => "ESP_ERR_NOT_SUPPORTED",
            codes::ESP_ERR_TIMEOUT => "ESP_ERR_TIMEOUT",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} (0x{:x})", self.0),
            None => write!(f, "esp_err_t 0x{:x}", self.0),
        }
    }
}

impl std::error::Error for DriverError {}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 请求的编号越界或参数在调用硬件前就已无效
    InvalidArgument,
    /// 资源已被不同配置占用，或当前生命周期状态不允许该操作
    ConflictingState,
    /// 驱动层报告失败
    DriverFailure,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("{resource} 编号 {index} 超出范围 (共 {capacity} 个)")]
    OutOfRange {
        resource: &'static str,
        index: usize,
        capacity: usize,
    },

    #[error("无效参数: {0}")]
    InvalidArgument(&'static str),

    #[error("{resource} {index} 已被占用且配置不同")]
    Conflict { resource: &'static str, index: usize },

    #[error("当前状态不允许该操作: {0}")]
    InvalidState(&'static str),

    #[error("{call} failed: {source}")]
    Driver {
        call: &'static str,
        #[source]
        source: DriverError,
    },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::OutOfRange { .. } | Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::Conflict { .. } | Error::InvalidState(_) => ErrorKind::ConflictingState,
            Error::Driver { .. } => ErrorKind::DriverFailure,
        }
    }

    /// 对应的 `esp_err_t`，驱动错误原样返回
    pub fn code(&self) -> i32 {
        match self {
            Error::Driver { source, .. } => source.code(),
            _ => match self.kind() {
                ErrorKind::InvalidArgument => codes::ESP_ERR_INVALID_ARG,
                _ => codes::ESP_ERR_INVALID_STATE,
            },
        }
    }
}

impl embedded_hal::digital::Error for Error {
    fn kind(&self) -> embedded_hal::digital::ErrorKind {
        embedded_hal::digital::ErrorKind::Other
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds_map_to_esp_codes() {
        let out_of_range = Error::OutOfRange { resource: "GPIO", index: 60, capacity: 49 };
        assert_eq!(out_of_range.kind(), ErrorKind::InvalidArgument);
        assert_eq!(out_of_range.code(), codes::ESP_ERR_INVALID_ARG);

        let conflict = Error::Conflict { resource: "GPIO", index: 2 };
        assert_eq!(conflict.kind(), ErrorKind::ConflictingState);
        assert_eq!(conflict.code(), codes::ESP_ERR_INVALID_STATE);

        let driver = Error::Driver { call: "gpio_config", source: DriverError::new(codes::ESP_ERR_NO_MEM) };
        assert_eq!(driver.kind(), ErrorKind::DriverFailure);
        assert_eq!(driver.code(), codes::ESP_ERR_NO_MEM);
    }

    #[test]
    fn test_driver_error_display() {
        assert_eq!(DriverError::new(codes::ESP_ERR_INVALID_STATE).to_string(), "ESP_ERR_INVALID_STATE (0x103)");
        assert_eq!(DriverError::new(0x3001).to_string(), "esp_err_t 0x3001");
        assert!(DriverError::check(codes::ESP_OK).is_ok());
        assert_eq!(DriverError::check(codes::ESP_FAIL), Err(DriverError::new(codes::ESP_FAIL)));
    }
}
