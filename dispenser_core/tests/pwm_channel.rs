use std::time::Duration;

use dispenser_core::error::DispenserError;
use dispenser_core::pwm::{LED0_ON_L, MODE1, PRESCALE};
use dispenser_core::{ActuationChannel, DirectPwmChannel, PillDurations, PillSize, PwmSettings};
use dispenser_hardware::SimulatedPwmBus;
use dispenser_traits::ManualClock;
use rstest::rstest;

const ADDR: u8 = 0x40;

fn channel() -> (DirectPwmChannel<SimulatedPwmBus, ManualClock>, SimulatedPwmBus, ManualClock) {
    let bus = SimulatedPwmBus::new();
    let clock = ManualClock::new();
    let ch = DirectPwmChannel::new(
        bus.clone(),
        clock.clone(),
        PwmSettings::default(),
        PillDurations::default(),
    );
    (ch, bus, clock)
}

fn ready_channel() -> (DirectPwmChannel<SimulatedPwmBus, ManualClock>, SimulatedPwmBus, ManualClock) {
    let (mut ch, bus, clock) = channel();
    ch.begin().unwrap();
    bus.clear_writes();
    (ch, bus, clock)
}

#[test]
fn begin_programs_prescaler_and_stops_outputs() {
    let (mut ch, bus, _) = channel();
    assert!(!ch.is_ready());
    ch.begin().unwrap();
    assert!(ch.is_ready());
    assert_eq!(bus.clock_hz(), 100_000);
    assert_eq!(bus.register(ADDR, PRESCALE), Some(121));
    assert_eq!(bus.register(ADDR, MODE1), Some(0xA0));
    for c in 0..16 {
        assert_eq!(bus.channel_off(ADDR, c), Some(0));
    }
}

#[test]
fn begin_fails_when_controller_absent() {
    let bus = SimulatedPwmBus::with_devices(&[]);
    let mut ch = DirectPwmChannel::new(
        bus,
        ManualClock::new(),
        PwmSettings::default(),
        PillDurations::default(),
    );
    assert!(matches!(ch.begin(), Err(DispenserError::BusError(_))));
    assert!(!ch.is_ready());
}

#[test]
fn nack_on_set_angle_counts_and_does_not_retry() {
    let (mut ch, bus, _) = ready_channel();
    let before = ch.stats();
    let probes = bus.probe_count();
    bus.fail_next(1);

    let err = ch.set_angle(3, 90).unwrap_err();
    assert!(matches!(err, DispenserError::BusError(_)));
    let after = ch.stats();
    assert_eq!(after.nack_errors, before.nack_errors + 1);
    assert_eq!(after.ops_attempted, before.ops_attempted + 1);
    assert_eq!(bus.probe_count(), probes + 1, "exactly one probe, no retry");
    assert!(bus.writes().is_empty());
}

#[test]
fn set_angle_maps_linearly() {
    let (mut ch, bus, _) = ready_channel();
    ch.set_angle(2, 90).unwrap();
    assert_eq!(bus.channel_off(ADDR, 2), Some(307));
    ch.set_angle(2, 0).unwrap();
    assert_eq!(bus.channel_off(ADDR, 2), Some(102));
    ch.set_angle(2, 180).unwrap();
    assert_eq!(bus.channel_off(ADDR, 2), Some(512));
    assert_eq!(bus.writes()[0].1[0], LED0_ON_L + 8);
}

#[rstest]
#[case::channel(16, 90)]
#[case::angle(0, 181)]
fn invalid_set_angle_touches_nothing(#[case] channel: u8, #[case] angle: u16) {
    let (mut ch, bus, _) = ready_channel();
    let before = ch.stats();
    assert!(matches!(
        ch.set_angle(channel, angle),
        Err(DispenserError::InvalidParameter(_))
    ));
    assert_eq!(ch.stats(), before);
    assert!(bus.writes().is_empty());
}

#[test]
fn set_speed_rejects_out_of_range_duty() {
    let (mut ch, _, _) = ready_channel();
    assert!(matches!(
        ch.set_speed(0, 4096),
        Err(DispenserError::InvalidParameter(_))
    ));
    ch.set_speed(0, 4095).unwrap();
}

#[rstest]
#[case(PillSize::Small, 800)]
#[case(PillSize::Medium, 1000)]
#[case(PillSize::Large, 1200)]
#[case(PillSize::Custom, 1050)]
fn dispense_holds_for_size_then_stops(#[case] size: PillSize, #[case] hold_ms: u64) {
    let (mut ch, bus, clock) = ready_channel();
    let start = clock.elapsed();
    ch.dispense(1, size).unwrap();
    assert_eq!(
        clock.elapsed() - start,
        Duration::from_millis(hold_ms + 100),
        "hold plus settle"
    );
    let offs: Vec<u16> = bus
        .writes()
        .iter()
        .map(|(_, b)| u16::from_le_bytes([b[3], b[4]]))
        .collect();
    assert_eq!(offs, vec![400, 0]);
    assert_eq!(bus.channel_off(ADDR, 1), Some(0));
}

#[test]
fn pair_dispense_starts_and_stops_together() {
    let (mut ch, bus, clock) = ready_channel();
    let start = clock.elapsed();
    ch.dispense_pair(0, 4, PillSize::Medium).unwrap();
    assert_eq!(clock.elapsed() - start, Duration::from_millis(1000 + 150));
    let regs: Vec<(u8, u16)> = bus
        .writes()
        .iter()
        .map(|(_, b)| (b[0], u16::from_le_bytes([b[3], b[4]])))
        .collect();
    assert_eq!(
        regs,
        vec![
            (LED0_ON_L, 400),
            (LED0_ON_L + 16, 400),
            (LED0_ON_L, 0),
            (LED0_ON_L + 16, 0)
        ]
    );
}

#[test]
fn failed_pair_start_reports_start_error_when_stop_also_fails() {
    let (mut ch, bus, _) = ready_channel();
    let before = ch.stats();
    // First start goes through (probe + write), second start and the stop NACK.
    bus.fail_after(2, 2);
    let err = ch.dispense_pair(1, 3, PillSize::Small).unwrap_err();
    assert!(matches!(err, DispenserError::BusError(_)));
    assert_eq!(ch.stats().nack_errors, before.nack_errors + 2);
    assert_eq!(bus.channel_off(ADDR, 1), Some(400), "first output left running");
    assert_eq!(bus.channel_off(ADDR, 3), Some(0));
}

#[test]
fn failed_pair_start_stops_first_output() {
    let (mut ch, bus, _) = ready_channel();
    bus.fail_after(2, 1);
    assert!(ch.dispense_pair(1, 3, PillSize::Small).is_err());
    assert_eq!(bus.channel_off(ADDR, 1), Some(0));
}

#[test]
fn pair_dispense_needs_two_outputs() {
    let (mut ch, _, _) = ready_channel();
    assert!(matches!(
        ch.dispense_pair(2, 2, PillSize::Small),
        Err(DispenserError::InvalidParameter(_))
    ));
}

#[test]
fn dispense_before_begin_is_unavailable() {
    let (mut ch, bus, _) = channel();
    assert_eq!(
        ch.dispense(0, PillSize::Small),
        Err(DispenserError::ChannelUnavailable)
    );
    assert!(bus.writes().is_empty());
}

#[test]
fn recovery_counter_increments_on_success() {
    let (mut ch, bus, _) = ready_channel();
    bus.set_stuck(true);
    assert!(ch.set_angle(0, 90).is_err());
    ch.recover_bus().unwrap();
    assert_eq!(ch.stats().recoveries, 1);
    assert!(ch.is_ready());
    assert_eq!(bus.clock_hz(), 50_000, "recovery lowers the clock");
    assert_eq!(bus.reacquire_count(), 1);
    ch.set_angle(0, 90).unwrap();
}

#[test]
fn recovery_counter_increments_on_failure() {
    let (mut ch, bus, _) = ready_channel();
    bus.set_stuck(true);
    bus.set_recoverable(false);
    assert_eq!(ch.recover_bus(), Err(DispenserError::BusRecoveryFailed));
    assert_eq!(ch.recover_bus(), Err(DispenserError::BusRecoveryFailed));
    assert_eq!(ch.stats().recoveries, 2);
    assert!(!ch.is_ready());
    assert_eq!(
        ch.dispense(0, PillSize::Small),
        Err(DispenserError::ChannelUnavailable)
    );
}

#[test]
fn health_check_auto_recovers_on_interval() {
    let (mut ch, bus, clock) = ready_channel();
    ch.maintain().unwrap();
    assert_eq!(ch.stats().recoveries, 0);

    bus.set_stuck(true);
    clock.advance(Duration::from_secs(10));
    ch.maintain().unwrap();
    assert_eq!(ch.stats().recoveries, 0, "interval not yet elapsed");

    clock.advance(Duration::from_secs(25));
    ch.maintain().unwrap();
    assert_eq!(ch.stats().recoveries, 1);
    assert!(ch.is_ready());
}

#[test]
fn health_check_without_auto_recover_reports() {
    let bus = SimulatedPwmBus::new();
    let clock = ManualClock::new();
    let settings = PwmSettings {
        auto_recover: false,
        ..PwmSettings::default()
    };
    let mut ch = DirectPwmChannel::new(bus.clone(), clock, settings, PillDurations::default());
    ch.begin().unwrap();
    bus.set_device_present(ADDR, false);
    assert!(matches!(ch.maintain(), Err(DispenserError::BusError(_))));
    assert_eq!(ch.stats().recoveries, 0);
}

#[test]
fn scan_lists_responding_addresses_without_counting() {
    let bus = SimulatedPwmBus::with_devices(&[0x40, 0x70]);
    let mut ch = DirectPwmChannel::new(
        bus,
        ManualClock::new(),
        PwmSettings::default(),
        PillDurations::default(),
    );
    assert_eq!(ch.scan_bus(), vec![0x40, 0x70]);
    assert!(ch.is_connected());
    assert_eq!(ch.stats().ops_attempted, 0);
}

#[test]
fn self_test_and_calibrate_sweep_expected_angles() {
    let (mut ch, bus, clock) = ready_channel();
    let start = clock.elapsed();
    ch.self_test(5).unwrap();
    assert_eq!(clock.elapsed() - start, Duration::from_millis(3500));
    assert_eq!(bus.channel_off(ADDR, 5), Some(307));

    ch.calibrate(6).unwrap();
    // 60 degrees.
    assert_eq!(bus.channel_off(ADDR, 6), Some(238));
}

#[test]
fn reset_all_parks_every_output_at_ninety() {
    let (mut ch, bus, _) = ready_channel();
    ch.reset_all().unwrap();
    for c in 0..16 {
        assert_eq!(bus.channel_off(ADDR, c), Some(307));
    }
}
