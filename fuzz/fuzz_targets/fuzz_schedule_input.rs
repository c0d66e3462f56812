#![no_main]
use libfuzzer_sys::fuzz_target;

use dispenser_core::relay::is_success_response;
use dispenser_core::{NewSchedule, PillSize, ScheduleTable, SchedulerSettings};
use dispenser_traits::WallTime;

fuzz_target!(|data: (&str, u8, u8, u8)| {
    let (text, dispenser, hour, minute) = data;

    let _ = is_success_response(text);
    let _ = text.parse::<PillSize>();

    let mut table = ScheduleTable::new(&SchedulerSettings::default());
    let added = table.add(NewSchedule::new(
        "f", dispenser, hour, minute, "med", "pat", PillSize::Small,
    ));
    // Rejected input must leave the table untouched.
    if added.is_err() {
        assert_eq!(table.count(), 0);
        assert_eq!(table.alarm_pool().bound_count(), 0);
    }

    if let Ok(now) = text.parse::<WallTime>() {
        let _ = table.due(now);
        let _ = table.next_schedule_time(now);
    }
});
