//! 主机日志
//!
//! 目标板上由 `EspLogger` 接管 `log`；主机上用 `tracing-subscriber` 输出到 stderr，
//! 其默认的 `tracing-log` 特性把 `log` 记录转给 tracing。

use std::error::Error as StdError;

use tracing_subscriber::EnvFilter;

pub type InitError = Box<dyn StdError + Send + Sync + 'static>;

/// 按 `RUST_LOG` 初始化，未设置时为 `info`
pub fn init() -> Result<(), InitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    install(filter)
}

/// 用给定的过滤规则初始化，例如 `"esp_board_registry=debug"`
///
/// 进程内只能成功一次
pub fn init_with(directives: &str) -> Result<(), InitError> {
    install(EnvFilter::try_new(directives)?)
}

fn install(filter: EnvFilter) -> Result<(), InitError> {
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
}
