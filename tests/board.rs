use std::sync::Arc;

use esp_board_registry::driver::mock::MockDriver;
use esp_board_registry::{
    AdcChannelConfig, Attenuation, BitWidth, Board, ChipLayout, ErrorKind, GpioConfig, GpioMode, Pull,
};

fn board() -> Board<MockDriver> {
    Board::new(Arc::new(MockDriver::new()), ChipLayout::ESP32S3)
}

#[test]
fn test_same_adc_unit_is_shared() {
    let board = board();
    let first = board.adc_unit(0).unwrap();
    let second = board.adc_unit(0).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(board.driver().calls("adc_new_unit"), 1);

    drop(first);
    drop(second);
    assert_eq!(board.driver().calls("adc_del_unit"), 1);
    assert_eq!(board.driver().live_adc_units(), 0);
}

#[test]
fn test_channel_conflict_keeps_original_usable() {
    let board = board();
    board.driver().set_adc_raw(1, 4, 321);
    let unit = board.adc_unit(1).unwrap();
    let config = AdcChannelConfig {
        attenuation: Attenuation::Db12,
        bitwidth: BitWidth::Bits12,
    };
    let channel = unit.channel(4, config).unwrap();

    let other = AdcChannelConfig {
        attenuation: Attenuation::Db0,
        ..config
    };
    let err = unit.channel(4, other).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConflictingState);

    assert_eq!(channel.read().unwrap(), 321);
    assert_eq!(channel.config(), config);
    assert_eq!(board.driver().calls("adc_config_channel"), 1);
}

#[test]
fn test_calibrated_unit_waits_for_uncalibrated_release() {
    let board = board();
    let plain = board.adc_unit(0).unwrap();
    let err = board
        .calibrated_adc_unit(0, Attenuation::Db12, BitWidth::Default)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConflictingState);
    assert_eq!(board.driver().live_calibrations(), 0);

    drop(plain);
    let calibrated = board
        .calibrated_adc_unit(0, Attenuation::Db12, BitWidth::Default)
        .unwrap();
    assert!(calibrated.is_calibrated());
    assert_eq!(board.adc_unit(0).unwrap_err().kind(), ErrorKind::ConflictingState);
}

#[test]
fn test_calibrated_channel_reads_millivolts() {
    let board = board();
    board.driver().set_adc_raw(0, 2, 4095);
    let unit = board
        .calibrated_adc_unit(0, Attenuation::Db6, BitWidth::Bits12)
        .unwrap();
    let channel = unit.calibrated_channel(2).unwrap();
    assert_eq!(channel.millivolts().unwrap(), 1750);

    drop(channel);
    drop(unit);
    assert_eq!(board.driver().live_calibrations(), 0);
    assert_eq!(
        board.driver().deletions(),
        vec!["adc_del_unit", "adc_cali_delete"]
    );
}

#[test]
fn test_gpio_release_then_reacquire_is_fresh() {
    let board = board();
    let config = GpioConfig::new(2, GpioMode::OUTPUT);
    let pin = board.gpio(config).unwrap();
    pin.set_level(true).unwrap();
    assert!(board.live_gpio(2).is_some());

    drop(pin);
    assert!(board.live_gpio(2).is_none());
    assert_eq!(board.driver().pin_config(2), None);

    let again = board.gpio(config).unwrap();
    assert_eq!(board.driver().calls("gpio_config"), 2);
    assert_eq!(board.driver().calls("gpio_reset"), 1);
    assert!(!again.level());
}

#[test]
fn test_gpio_conflict_leaves_first_config_intact() {
    let board = board();
    let a = GpioConfig::new(2, GpioMode::INPUT).with_pull_up(Pull::Enabled);
    let b = GpioConfig::new(2, GpioMode::OUTPUT);
    let pin = board.gpio(a).unwrap();

    let err = board.gpio(b).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConflictingState);
    assert_eq!(pin.config(), a);
    assert_eq!(board.driver().pin_config(2), Some(a));

    let same = board.gpio(a).unwrap();
    assert!(Arc::ptr_eq(&pin, &same));
}

#[test]
fn test_gpio_interrupt_through_board() {
    let board = board();
    let pin = board.gpio(GpioConfig::new(0, GpioMode::INPUT)).unwrap();
    assert!(!board.isr_service_installed());

    pin.set_interrupt(esp_board_registry::InterruptType::FallingEdge, || {})
        .unwrap();
    assert!(board.isr_service_installed());
    assert!(board.driver().fire_pin_interrupt(0));

    drop(pin);
    assert!(!board.driver().has_isr_handler(0));
}

#[test]
fn test_esp32_layout_rejects_missing_pins() {
    let board = Board::new(Arc::new(MockDriver::new()), ChipLayout::ESP32);
    assert_eq!(
        board.gpio(GpioConfig::new(20, GpioMode::INPUT)).unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
    assert_eq!(
        board.gpio(GpioConfig::new(40, GpioMode::INPUT)).unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
    assert!(board.gpio(GpioConfig::new(21, GpioMode::INPUT)).is_ok());
}
