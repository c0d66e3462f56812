use dispenser_core::error::{BuildError, DispenserError};
use dispenser_core::mocks::RecordingChannel;
use dispenser_core::{DispenserCore, NewSchedule, PillSize, SchedulerSettings};
use dispenser_traits::{ManualTimeSource, WallTime, Weekday};
use rstest::rstest;

type Core = DispenserCore<RecordingChannel, ManualTimeSource>;

fn clock() -> ManualTimeSource {
    ManualTimeSource::new(WallTime::new(Weekday::Monday, 0, 0, 0).unwrap())
}

#[rstest]
fn missing_channel_yields_typed_build_error() {
    let err = Core::builder()
        .with_time_source(clock())
        .try_build()
        .expect_err("should fail with MissingChannel");
    match err.downcast_ref::<BuildError>() {
        Some(BuildError::MissingChannel) => {}
        other => panic!("expected MissingChannel, got: {other:?}"),
    }
}

#[rstest]
fn missing_time_source_yields_typed_build_error() {
    let err = Core::builder()
        .with_channel(RecordingChannel::new())
        .try_build()
        .expect_err("should fail with MissingTimeSource");
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::MissingTimeSource)
    ));
}

#[rstest]
#[case::offset_zero(SchedulerSettings { reminder_offset_min: 0, ..SchedulerSettings::default() })]
#[case::offset_too_large(SchedulerSettings { reminder_offset_min: 721, ..SchedulerSettings::default() })]
#[case::no_schedules(SchedulerSettings { max_schedules: 0, ..SchedulerSettings::default() })]
#[case::too_many_schedules(SchedulerSettings { max_schedules: 16, ..SchedulerSettings::default() })]
#[case::no_catch_up(SchedulerSettings { catch_up_minutes: 0, ..SchedulerSettings::default() })]
#[case::catch_up_spans_week(SchedulerSettings { catch_up_minutes: 20_000, ..SchedulerSettings::default() })]
#[case::tiny_pool(SchedulerSettings { alarm_capacity: 1, ..SchedulerSettings::default() })]
fn invalid_scheduler_settings_are_rejected(#[case] settings: SchedulerSettings) {
    let err = Core::builder()
        .with_channel(RecordingChannel::new())
        .with_time_source(clock())
        .with_scheduler(settings)
        .try_build()
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::InvalidConfig(_))
    ));
}

#[test]
fn bad_initial_schedule_names_the_row() {
    let err = Core::builder()
        .with_channel(RecordingChannel::new())
        .with_time_source(clock())
        .with_schedules([
            NewSchedule::new("ok", 0, 8, 0, "M", "A", PillSize::Small),
            NewSchedule::new("bad", 7, 8, 0, "M", "A", PillSize::Small),
        ])
        .try_build()
        .unwrap_err();
    assert!(format!("{err}").contains("'bad'"), "{err}");
    assert!(matches!(
        err.downcast_ref::<DispenserError>(),
        Some(DispenserError::InvalidParameter(_))
    ));
}

#[test]
fn overfull_initial_schedules_are_capacity_error() {
    let settings = SchedulerSettings {
        max_schedules: 2,
        alarm_capacity: 4,
        ..SchedulerSettings::default()
    };
    let rows = (0..3).map(|i| NewSchedule::new(format!("s{i}"), 0, 8, i, "M", "A", PillSize::Small));
    let err = Core::builder()
        .with_channel(RecordingChannel::new())
        .with_time_source(clock())
        .with_scheduler(settings)
        .with_schedules(rows)
        .try_build()
        .unwrap_err();
    assert_eq!(
        err.downcast_ref::<DispenserError>(),
        Some(&DispenserError::ScheduleCapacityExceeded)
    );
}

#[test]
fn defaults_build() {
    let core = Core::builder()
        .with_channel(RecordingChannel::new())
        .with_time_source(clock())
        .try_build()
        .unwrap();
    assert_eq!(core.schedules().capacity(), 15);
    assert_eq!(core.schedules().reminder_offset_min(), 15);
    assert_eq!(core.schedules().alarm_pool().capacity(), 30);
}
