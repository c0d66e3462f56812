use std::time::Duration;

use dispenser_core::mocks::{ChannelCall, RecordingChannel};
use dispenser_core::{DispenserCore, NewSchedule, PillSize, RunOptions, RunSummary, run};
use dispenser_traits::{ManualClock, SimulatedTimeSource, WallTime, Weekday};

fn start() -> WallTime {
    WallTime::new(Weekday::Monday, 7, 40, 0).unwrap()
}

#[test]
fn simulated_morning_fires_reminder_then_dose() {
    let clock = ManualClock::new();
    let mut core = DispenserCore::builder()
        .with_channel(RecordingChannel::offline())
        .with_time_source(SimulatedTimeSource::new(start(), clock.clone()))
        .with_schedules([NewSchedule::new("s1", 0, 8, 0, "M", "A", PillSize::Medium)])
        .try_build()
        .unwrap();
    let opts = RunOptions {
        tick: Duration::from_secs(15),
        // 07:40 to 08:05.
        max_ticks: Some(100),
    };
    let summary = run(&mut core, &clock, opts, &crossbeam_channel::never());
    assert_eq!(
        summary,
        RunSummary {
            ticks: 100,
            dispensed: 1,
            failed: 0,
            reminders: 1,
            skipped: 0,
        }
    );
    let calls = core.channel().calls();
    assert_eq!(calls.first(), Some(&ChannelCall::Begin));
    assert_eq!(
        core.channel().actuations(),
        vec![&ChannelCall::Dispense(0, PillSize::Medium)]
    );
    assert_eq!(
        calls.iter().filter(|c| **c == ChannelCall::Maintain).count(),
        100
    );
}

#[test]
fn shutdown_signal_stops_before_first_tick() {
    let clock = ManualClock::new();
    let mut core = DispenserCore::builder()
        .with_channel(RecordingChannel::new())
        .with_time_source(SimulatedTimeSource::new(start(), clock.clone()))
        .try_build()
        .unwrap();
    let (tx, rx) = crossbeam_channel::bounded(1);
    tx.send(()).unwrap();
    let summary = run(&mut core, &clock, RunOptions::default(), &rx);
    assert_eq!(summary.ticks, 0);
    assert_eq!(clock.elapsed(), Duration::ZERO);
}

#[test]
fn dropped_sender_counts_as_shutdown() {
    let clock = ManualClock::new();
    let mut core = DispenserCore::builder()
        .with_channel(RecordingChannel::new())
        .with_time_source(SimulatedTimeSource::new(start(), clock.clone()))
        .try_build()
        .unwrap();
    let (tx, rx) = crossbeam_channel::bounded::<()>(1);
    drop(tx);
    let summary = run(&mut core, &clock, RunOptions::default(), &rx);
    assert_eq!(summary.ticks, 0);
}

#[test]
fn ready_channel_is_not_restarted() {
    let clock = ManualClock::new();
    let mut core = DispenserCore::builder()
        .with_channel(RecordingChannel::new())
        .with_time_source(SimulatedTimeSource::new(start(), clock.clone()))
        .try_build()
        .unwrap();
    let opts = RunOptions {
        tick: Duration::from_millis(250),
        max_ticks: Some(3),
    };
    run(&mut core, &clock, opts, &crossbeam_channel::never());
    assert!(!core.channel().calls().contains(&ChannelCall::Begin));
    assert_eq!(clock.elapsed(), Duration::from_millis(750));
}
