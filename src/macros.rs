//! 驱动调用宏
//!
//! 统一驱动调用失败时的日志格式（`<调用名> failed: <错误>`）。

/// 调用驱动，失败时记录错误并以 [`Error::Driver`](crate::Error::Driver) 返回
///
/// # 示例
/// ```ignore
/// let handle = driver_try!(self.driver.adc_new_unit(unit), "adc_oneshot_new_unit");
/// ```
#[macro_export]
macro_rules! driver_try {
    ($call:expr, $name:literal) => {{
        match $call {
            Ok(value) => value,
            Err(e) => {
                log::error!("{} failed: {}", $name, e);
                return Err($crate::Error::Driver {
                    call: $name,
                    source: e,
                });
            }
        }
    }};
}

/// 析构路径上的驱动调用：失败只记录日志，不中断后续清理
///
/// # 示例
/// ```ignore
/// teardown!(self.driver.gpio_reset(self.number), "gpio_reset_pin");
/// ```
#[macro_export]
macro_rules! teardown {
    ($call:expr, $name:literal) => {{
        if let Err(e) = $call {
            log::error!("{} failed: {}", $name, e);
        }
    }};
}
