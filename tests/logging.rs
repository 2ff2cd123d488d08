use esp_board_registry::logging;

#[test]
fn test_host_logging_bridges_log_records() {
    logging::init_with("debug").unwrap();
    assert!(log::log_enabled!(log::Level::Debug));
    assert!(!log::log_enabled!(log::Level::Trace));
    log::info!("host logging ready");

    assert!(logging::init().is_err());
}

#[test]
fn test_invalid_directive_rejected() {
    assert!(logging::init_with("esp_board_registry=loud").is_err());
}
