fn main() {
    // 只有 espidf 目标才需要转发 ESP-IDF 的构建环境
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::espidf::sysenv::output();
    }
}
