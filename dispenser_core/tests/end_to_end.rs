use dispenser_core::error::DispenserError;
use dispenser_core::mocks::{ChannelCall, FailingSink, RecordingChannel, RecordingSink};
use dispenser_core::{
    ChannelMap, DirectPwmChannel, DispenseResult, DispenserCore, DispenserOutput, FireOutcome,
    NewSchedule, PillDurations, PillSize, PwmSettings, RelayChannel, RelaySettings, SkipReason,
    TriggerReason,
};
use dispenser_hardware::{SimulatedPwmBus, SimulatedRelay};
use dispenser_traits::{ManualClock, ManualTimeSource, WallTime, Weekday};
use rstest::rstest;

fn at(day: Weekday, hour: u8, minute: u8) -> WallTime {
    WallTime::new(day, hour, minute, 0).unwrap()
}

fn s1() -> NewSchedule {
    NewSchedule::new("s1", 0, 8, 0, "M", "A", PillSize::Medium)
}

fn recording_core(
    schedules: Vec<NewSchedule>,
) -> (DispenserCore<RecordingChannel, ManualTimeSource>, RecordingSink) {
    let sink = RecordingSink::new();
    let core = DispenserCore::builder()
        .with_channel(RecordingChannel::new())
        .with_time_source(ManualTimeSource::new(at(Weekday::Monday, 7, 0)))
        .with_schedules(schedules)
        .with_sink(Box::new(sink.clone()))
        .try_build()
        .unwrap();
    (core, sink)
}

#[rstest]
#[case(Weekday::Monday)]
#[case(Weekday::Thursday)]
#[case(Weekday::Sunday)]
fn s1_dispenses_once_at_eight(#[case] day: Weekday) {
    let (mut core, sink) = recording_core(vec![s1()]);
    core.time_source()
        .set(WallTime::new(day, 8, 0, 0).unwrap());
    core.poll();
    core.poll();

    assert_eq!(
        core.channel().calls(),
        &[ChannelCall::Dispense(0, PillSize::Medium)]
    );
    let results = sink.results();
    assert_eq!(results.len(), 1);
    let (req, res) = &results[0];
    assert_eq!(*res, DispenseResult::Succeeded);
    assert_eq!(req.dispenser, 0);
    assert_eq!(req.size, PillSize::Medium);
    assert_eq!(req.medication, "M");
    assert_eq!(req.patient, "A");
    assert_eq!(req.reason, TriggerReason::Scheduled);
    assert_eq!(req.schedule_id.as_deref(), Some("s1"));
}

#[test]
fn s1_over_pwm_drives_channel_zero() {
    let bus = SimulatedPwmBus::new();
    let clock = ManualClock::new();
    let mut pwm = DirectPwmChannel::new(
        bus.clone(),
        clock.clone(),
        PwmSettings::default(),
        PillDurations::default(),
    );
    pwm.begin().unwrap();
    bus.clear_writes();
    let sink = RecordingSink::new();
    let mut core = DispenserCore::builder()
        .with_channel(pwm)
        .with_time_source(ManualTimeSource::new(at(Weekday::Tuesday, 8, 0)))
        .with_schedules([s1()])
        .with_sink(Box::new(sink.clone()))
        .try_build()
        .unwrap();
    core.poll();
    let regs: Vec<u8> = bus.writes().iter().map(|(_, b)| b[0]).collect();
    assert_eq!(regs, vec![0x06, 0x06]);
    assert_eq!(sink.results()[0].1, DispenseResult::Succeeded);
    assert_eq!(core.channel().stats().nack_errors, 0);
}

#[test]
fn s1_over_relay_sends_dp0() {
    let sim = SimulatedRelay::new();
    let mut relay = RelayChannel::new(sim.clone(), ManualClock::new(), RelaySettings::default());
    assert!(relay.handshake());
    let mut core = DispenserCore::builder()
        .with_channel(relay)
        .with_time_source(ManualTimeSource::new(at(Weekday::Friday, 8, 0)))
        .with_schedules([s1()])
        .try_build()
        .unwrap();
    let outcomes = core.poll();
    assert!(matches!(
        outcomes.as_slice(),
        [FireOutcome::Dispensed { result: DispenseResult::Succeeded, .. }]
    ));
    assert_eq!(sim.sent(), vec!["PING", "DP0"]);
}

#[test]
fn update_to_disabled_never_fires() {
    let (mut core, sink) = recording_core(vec![s1()]);
    core.schedules_mut().update("s1", 9, 30, false).unwrap();
    let s = core.schedules().get("s1").unwrap();
    assert!(s.dispense_alarm().is_none() && s.reminder_alarm().is_none());
    for day in [Weekday::Monday, Weekday::Tuesday] {
        for minute in 0..60 {
            core.tick_at(at(day, 9, minute));
        }
        core.tick_at(at(day, 8, 0));
    }
    assert!(core.channel().calls().is_empty());
    assert!(sink.events().is_empty());
}

#[rstest]
#[case::removed(SkipReason::Removed)]
#[case::disabled(SkipReason::Disabled)]
#[case::rescheduled(SkipReason::Rescheduled)]
#[case::not_today(SkipReason::NotToday)]
fn edits_between_collect_and_fire_win(#[case] reason: SkipReason) {
    let (mut core, sink) = recording_core(vec![s1()]);
    let firings = core.collect_due(at(Weekday::Monday, 8, 0));
    assert_eq!(firings.len(), 1);

    let table = core.schedules_mut();
    match reason {
        SkipReason::Removed => table.remove("s1").unwrap(),
        SkipReason::Disabled => table.set_enabled("s1", false).unwrap(),
        SkipReason::Rescheduled => table.update("s1", 8, 0, true).unwrap(),
        SkipReason::NotToday => table
            .set_weekdays("s1", [false, true, true, true, true, true, true])
            .unwrap(),
    }

    let outcome = core.fire(&firings[0]);
    assert_eq!(
        outcome,
        FireOutcome::Skipped {
            schedule_id: "s1".into(),
            kind: firings[0].kind,
            reason,
        }
    );
    assert!(core.channel().calls().is_empty());
    assert!(sink.events().is_empty());
}

#[test]
fn failing_sink_does_not_stop_delivery() {
    let recorder = RecordingSink::new();
    let mut core = DispenserCore::builder()
        .with_channel(RecordingChannel::new())
        .with_time_source(ManualTimeSource::new(at(Weekday::Monday, 8, 0)))
        .with_schedules([s1(), NewSchedule::new("s2", 1, 8, 0, "N", "B", PillSize::Small)])
        .with_sink(Box::new(FailingSink))
        .with_sink(Box::new(recorder.clone()))
        .try_build()
        .unwrap();
    core.poll();
    assert_eq!(core.channel().calls().len(), 2);
    assert_eq!(recorder.results().len(), 2);
}

#[rstest]
#[case(DispenserError::CommandTimeout, DispenseResult::ChannelUnavailable)]
#[case(DispenserError::ChannelUnavailable, DispenseResult::ChannelUnavailable)]
#[case(
    DispenserError::BusError("probe: nack".into()),
    DispenseResult::HardwareError("i2c bus error: probe: nack".into())
)]
fn channel_failure_still_reports_result(
    #[case] err: DispenserError,
    #[case] expected: DispenseResult,
) {
    let (mut core, sink) = recording_core(vec![
        s1(),
        NewSchedule::new("s2", 1, 8, 0, "N", "B", PillSize::Small),
    ]);
    core.channel_mut().fail_next(err);
    core.tick_at(at(Weekday::Monday, 8, 0));
    let results = sink.results();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].1, expected);
    assert_eq!(results[1].1, DispenseResult::Succeeded, "next schedule still runs");
}

#[test]
fn unmapped_dispenser_is_hardware_error_without_actuation() {
    let sink = RecordingSink::new();
    let mut core = DispenserCore::builder()
        .with_channel(RecordingChannel::new())
        .with_time_source(ManualTimeSource::new(at(Weekday::Monday, 8, 0)))
        .with_outputs(ChannelMap::empty())
        .with_schedules([s1()])
        .with_sink(Box::new(sink.clone()))
        .try_build()
        .unwrap();
    core.poll();
    assert!(core.channel().calls().is_empty());
    assert!(matches!(
        sink.results()[0].1,
        DispenseResult::HardwareError(_)
    ));
}

#[test]
fn mapped_pair_uses_pair_dispense() {
    let mut outputs = ChannelMap::default();
    outputs
        .set(
            1,
            DispenserOutput {
                channel: 5,
                pair_channel: Some(6),
            },
        )
        .unwrap();
    let mut core = DispenserCore::builder()
        .with_channel(RecordingChannel::new())
        .with_time_source(ManualTimeSource::new(at(Weekday::Monday, 8, 0)))
        .with_outputs(outputs)
        .try_build()
        .unwrap();
    core.remote_dispense(1, PillSize::Large, "M", "A").unwrap();
    assert_eq!(
        core.channel().calls(),
        &[ChannelCall::DispensePair(5, 6, PillSize::Large)]
    );
}

#[test]
fn test_trigger_bypasses_enable_and_weekday() {
    let (mut core, sink) = recording_core(vec![
        s1().enabled(false).on_days([false; 7]),
    ]);
    let result = core.test_trigger_schedule("s1").unwrap();
    assert_eq!(result, DispenseResult::Succeeded);
    assert_eq!(
        core.channel().calls(),
        &[ChannelCall::Dispense(0, PillSize::Medium)]
    );
    assert_eq!(sink.results()[0].0.reason, TriggerReason::ManualTest);
    assert_eq!(sink.results()[0].0.schedule_id, None);
    assert_eq!(
        core.test_trigger_schedule("zz"),
        Err(DispenserError::NotFound("zz".into()))
    );
}

#[test]
fn remote_dispense_validates_index() {
    let (mut core, sink) = recording_core(vec![]);
    assert!(matches!(
        core.remote_dispense(5, PillSize::Small, "M", "A"),
        Err(DispenserError::InvalidParameter(_))
    ));
    assert!(core.channel().calls().is_empty());
    let ok = core.remote_dispense(4, PillSize::Small, "M", "A").unwrap();
    assert!(ok.is_success());
    assert_eq!(sink.results()[0].0.reason, TriggerReason::RemoteCommand);
}

#[test]
fn direct_test_trigger_reports_manual_reason() {
    let (mut core, sink) = recording_core(vec![]);
    core.test_trigger(3, PillSize::Custom, "Vit D", "B").unwrap();
    let (req, _) = &sink.results()[0];
    assert_eq!(req.reason, TriggerReason::ManualTest);
    assert_eq!(req.medication, "Vit D");
}
