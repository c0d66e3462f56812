use std::time::Duration;

use dispenser_hardware::{SimulatedPwmBus, SimulatedRelay};
use dispenser_traits::{I2cBus, SerialLink};
use rstest::rstest;

#[rstest]
#[case(0, true)]
#[case(1, false)]
#[case(3, false)]
fn fail_next_nacks_first_transaction(#[case] n: u32, #[case] first_ok: bool) {
    let handle = SimulatedPwmBus::new();
    let mut bus = handle.clone();
    handle.fail_next(n);
    assert_eq!(bus.probe(0x40).is_ok(), first_ok);
}

#[test]
fn absent_device_nacks() {
    let mut bus = SimulatedPwmBus::with_devices(&[]);
    assert!(bus.probe(0x40).is_err());
    assert!(bus.write(0x40, &[0x00, 0x10]).is_err());
}

#[test]
fn unrecoverable_bus_stays_stuck_after_reacquire() {
    let handle = SimulatedPwmBus::new();
    let mut bus = handle.clone();
    handle.set_stuck(true);
    handle.set_recoverable(false);
    bus.release();
    bus.reacquire().unwrap();
    assert!(bus.probe(0x40).is_err());
}

#[test]
fn released_bus_rejects_writes() {
    let mut bus = SimulatedPwmBus::new();
    bus.release();
    assert!(bus.write(0x40, &[0x00, 0x00]).is_err());
}

#[test]
fn silent_relay_records_but_never_answers() {
    let handle = SimulatedRelay::new();
    let mut link = handle.clone();
    handle.set_silent(true);
    link.write_line("PING").unwrap();
    assert_eq!(link.read_line(Duration::from_millis(1)).unwrap(), None);
    assert_eq!(handle.sent(), vec!["PING".to_string()]);
}

#[test]
fn heartbeat_precedes_reply() {
    let handle = SimulatedRelay::new();
    let mut link = handle.clone();
    handle.set_heartbeat_before_reply(true);
    link.write_line("ST").unwrap();
    assert_eq!(
        link.read_line(Duration::ZERO).unwrap().as_deref(),
        Some("HEARTBEAT")
    );
    assert_eq!(
        link.read_line(Duration::ZERO).unwrap().as_deref(),
        Some("OK:ST")
    );
    assert_eq!(handle.stop_count(), 1);
}

#[test]
fn ready_banner_follows_clear() {
    let handle = SimulatedRelay::new();
    let mut link = handle.clone();
    handle.push_line("garbage");
    handle.set_ready_on_clear(true);
    link.clear_input().unwrap();
    assert_eq!(
        link.read_line(Duration::ZERO).unwrap().as_deref(),
        Some("READY")
    );
}

#[test]
fn closed_link_errors() {
    let handle = SimulatedRelay::new();
    let mut link = handle.clone();
    handle.close();
    assert!(link.write_line("PING").is_err());
}

#[test]
fn named_drop_only_swallows_that_command() {
    let handle = SimulatedRelay::new();
    let mut link = handle.clone();
    handle.drop_named("DP", 1);
    link.write_line("DP0").unwrap();
    assert_eq!(link.read_line(Duration::ZERO).unwrap(), None);
    link.write_line("PING").unwrap();
    assert_eq!(
        link.read_line(Duration::ZERO).unwrap().as_deref(),
        Some("PONG")
    );
    link.write_line("DP0").unwrap();
    assert_eq!(
        link.read_line(Duration::ZERO).unwrap().as_deref(),
        Some("OK:DP0")
    );
    assert_eq!(handle.dispensed(), vec![vec![0]]);
}
