//! Bounded, id-keyed schedule table.
//!
//! Every mutation validates first and only then touches the table or the
//! alarm pool, so a rejected call leaves both exactly as they were.

use std::fmt;

use dispenser_traits::{WallTime, Weekday};

use crate::alarm::{AlarmId, AlarmPool, AlarmScheduler, Firing};
use crate::config::SchedulerSettings;
use crate::error::DispenserError;
use crate::types::{PillSize, check_dispenser};

pub const ALL_DAYS: [bool; 7] = [true; 7];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MedicationSchedule {
    pub id: String,
    pub dispenser: u8,
    pub hour: u8,
    pub minute: u8,
    pub enabled: bool,
    pub medication: String,
    pub patient: String,
    pub size: PillSize,
    /// Monday-first.
    pub weekdays: [bool; 7],
    dispense_alarm: Option<AlarmId>,
    reminder_alarm: Option<AlarmId>,
}

impl MedicationSchedule {
    pub fn dispense_alarm(&self) -> Option<AlarmId> {
        self.dispense_alarm
    }

    pub fn reminder_alarm(&self) -> Option<AlarmId> {
        self.reminder_alarm
    }

    pub fn is_bound(&self) -> bool {
        self.dispense_alarm.is_some() || self.reminder_alarm.is_some()
    }

    fn bound_slots(&self) -> usize {
        usize::from(self.dispense_alarm.is_some()) + usize::from(self.reminder_alarm.is_some())
    }

    pub fn runs_on(&self, day: Weekday) -> bool {
        self.weekdays[day.index()]
    }

    pub fn minute_of_day(&self) -> u16 {
        u16::from(self.hour) * 60 + u16::from(self.minute)
    }
}

impl fmt::Display for MedicationSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let days: Vec<&str> = Weekday::ALL
            .iter()
            .filter(|d| self.runs_on(**d))
            .map(|d| d.short_name())
            .collect();
        let days = if days.len() == 7 {
            "daily".to_string()
        } else if days.is_empty() {
            "never".to_string()
        } else {
            days.join(",")
        };
        write!(
            f,
            "{:<10} dispenser {} at {:02}:{:02} {:<6} {} for {} [{}]{}",
            self.id,
            self.dispenser,
            self.hour,
            self.minute,
            self.size,
            self.medication,
            self.patient,
            days,
            if self.enabled { "" } else { " (disabled)" }
        )
    }
}

/// Input to `ScheduleTable::add`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSchedule {
    pub id: String,
    pub dispenser: u8,
    pub hour: u8,
    pub minute: u8,
    pub medication: String,
    pub patient: String,
    pub size: PillSize,
    pub enabled: bool,
    pub weekdays: [bool; 7],
}

impl NewSchedule {
    /// Enabled, every day.
    pub fn new(
        id: impl Into<String>,
        dispenser: u8,
        hour: u8,
        minute: u8,
        medication: impl Into<String>,
        patient: impl Into<String>,
        size: PillSize,
    ) -> Self {
        Self {
            id: id.into(),
            dispenser,
            hour,
            minute,
            medication: medication.into(),
            patient: patient.into(),
            size,
            enabled: true,
            weekdays: ALL_DAYS,
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn on_days(mut self, weekdays: [bool; 7]) -> Self {
        self.weekdays = weekdays;
        self
    }
}

fn check_time(hour: u8, minute: u8) -> Result<(), DispenserError> {
    if hour > 23 || minute > 59 {
        return Err(DispenserError::InvalidParameter(format!(
            "time {hour:02}:{minute:02} out of range"
        )));
    }
    Ok(())
}

pub struct ScheduleTable {
    schedules: Vec<MedicationSchedule>,
    alarms: AlarmScheduler,
    capacity: usize,
}

impl Default for ScheduleTable {
    fn default() -> Self {
        Self::new(&SchedulerSettings::default())
    }
}

impl ScheduleTable {
    pub fn new(settings: &SchedulerSettings) -> Self {
        Self {
            schedules: Vec::with_capacity(settings.max_schedules),
            alarms: AlarmScheduler::new(
                settings.alarm_capacity,
                settings.reminder_offset_min,
                settings.catch_up_minutes,
            ),
            capacity: settings.max_schedules,
        }
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.schedules.iter().position(|s| s.id == id)
    }

    /// Alarm slots free once the schedule at `index` (if any) is unbound.
    fn slots_available(&self, index: Option<usize>) -> usize {
        self.alarms.pool().free_slots() + index.map_or(0, |i| self.schedules[i].bound_slots())
    }

    fn unbind_at(&mut self, index: usize) {
        let s = &mut self.schedules[index];
        for id in [s.dispense_alarm.take(), s.reminder_alarm.take()]
            .into_iter()
            .flatten()
        {
            self.alarms.unbind(id);
        }
    }

    fn bind_at(&mut self, index: usize) -> Result<(), DispenserError> {
        let s = &self.schedules[index];
        let (dispense, reminder) = self.alarms.bind_pair(&s.id, s.hour, s.minute)?;
        let s = &mut self.schedules[index];
        s.dispense_alarm = Some(dispense);
        s.reminder_alarm = Some(reminder);
        Ok(())
    }

    /// Insert, or fully replace the schedule with the same id.
    pub fn add(&mut self, new: NewSchedule) -> Result<(), DispenserError> {
        if new.id.trim().is_empty() {
            return Err(DispenserError::InvalidParameter(
                "schedule id must not be empty".into(),
            ));
        }
        check_dispenser(new.dispenser)?;
        check_time(new.hour, new.minute)?;

        let existing = self.position(&new.id);
        if existing.is_none() && self.schedules.len() >= self.capacity {
            tracing::warn!(schedule_id = %new.id, capacity = self.capacity, "schedule table full");
            return Err(DispenserError::ScheduleCapacityExceeded);
        }
        if new.enabled && self.slots_available(existing) < AlarmScheduler::SLOTS_PER_SCHEDULE {
            tracing::warn!(schedule_id = %new.id, "no free alarm slots");
            return Err(DispenserError::AlarmPoolExhausted);
        }

        let record = MedicationSchedule {
            id: new.id,
            dispenser: new.dispenser,
            hour: new.hour,
            minute: new.minute,
            enabled: new.enabled,
            medication: new.medication,
            patient: new.patient,
            size: new.size,
            weekdays: new.weekdays,
            dispense_alarm: None,
            reminder_alarm: None,
        };
        let index = match existing {
            Some(i) => {
                self.unbind_at(i);
                self.schedules[i] = record;
                i
            }
            None => {
                self.schedules.push(record);
                self.schedules.len() - 1
            }
        };
        if self.schedules[index].enabled {
            self.bind_at(index)?;
        }
        let s = &self.schedules[index];
        tracing::info!(
            schedule_id = %s.id,
            dispenser = s.dispenser,
            hour = s.hour,
            minute = s.minute,
            enabled = s.enabled,
            replaced = existing.is_some(),
            "schedule stored"
        );
        Ok(())
    }

    /// Change the time and enable flag, rebinding alarms as needed.
    pub fn update(
        &mut self,
        id: &str,
        hour: u8,
        minute: u8,
        enabled: bool,
    ) -> Result<(), DispenserError> {
        check_time(hour, minute)?;
        let index = self
            .position(id)
            .ok_or_else(|| DispenserError::NotFound(id.to_string()))?;
        if enabled && self.slots_available(Some(index)) < AlarmScheduler::SLOTS_PER_SCHEDULE {
            return Err(DispenserError::AlarmPoolExhausted);
        }
        self.unbind_at(index);
        let s = &mut self.schedules[index];
        s.hour = hour;
        s.minute = minute;
        s.enabled = enabled;
        if enabled {
            self.bind_at(index)?;
        }
        tracing::info!(schedule_id = id, hour, minute, enabled, "schedule updated");
        Ok(())
    }

    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> Result<(), DispenserError> {
        let (hour, minute) = self
            .get(id)
            .map(|s| (s.hour, s.minute))
            .ok_or_else(|| DispenserError::NotFound(id.to_string()))?;
        self.update(id, hour, minute, enabled)
    }

    /// Replace the weekday mask. Alarms stay bound; the mask is checked at fire time.
    pub fn set_weekdays(&mut self, id: &str, weekdays: [bool; 7]) -> Result<(), DispenserError> {
        let index = self
            .position(id)
            .ok_or_else(|| DispenserError::NotFound(id.to_string()))?;
        self.schedules[index].weekdays = weekdays;
        tracing::info!(schedule_id = id, ?weekdays, "weekdays updated");
        Ok(())
    }

    /// Delete a schedule; later entries shift down one index.
    pub fn remove(&mut self, id: &str) -> Result<(), DispenserError> {
        let index = self
            .position(id)
            .ok_or_else(|| DispenserError::NotFound(id.to_string()))?;
        self.unbind_at(index);
        self.schedules.remove(index);
        tracing::info!(schedule_id = id, remaining = self.schedules.len(), "schedule removed");
        Ok(())
    }

    pub fn clear(&mut self) {
        for i in 0..self.schedules.len() {
            self.unbind_at(i);
        }
        let n = self.schedules.len();
        self.schedules.clear();
        tracing::info!(removed = n, "schedule table cleared");
    }

    pub fn get(&self, id: &str) -> Option<&MedicationSchedule> {
        self.schedules.iter().find(|s| s.id == id)
    }

    pub fn get_by_index(&self, index: usize) -> Option<&MedicationSchedule> {
        self.schedules.get(index)
    }

    pub fn count(&self) -> usize {
        self.schedules.len()
    }

    pub fn active_count(&self) -> usize {
        self.schedules.iter().filter(|s| s.enabled).count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &MedicationSchedule> {
        self.schedules.iter()
    }

    pub fn alarm_pool(&self) -> &AlarmPool {
        self.alarms.pool()
    }

    pub fn reminder_offset_min(&self) -> u16 {
        self.alarms.reminder_offset_min()
    }

    /// Earliest enabled dose later today (strictly after `now`'s minute)
    /// whose weekday bit is set. Ties go to the lower table index.
    pub fn next_schedule_time(&self, now: WallTime) -> Option<(u8, u8)> {
        let current = now.minute_of_day();
        self.schedules
            .iter()
            .filter(|s| s.enabled && s.runs_on(now.weekday) && s.minute_of_day() > current)
            .min_by_key(|s| s.minute_of_day())
            .map(|s| (s.hour, s.minute))
    }

    /// Whether any enabled schedule is due at `now`'s minute today.
    pub fn is_schedule_time(&self, now: WallTime) -> bool {
        self.schedules.iter().any(|s| {
            s.enabled && s.hour == now.hour && s.minute == now.minute && s.runs_on(now.weekday)
        })
    }

    /// Run the due-check against the current table.
    pub fn due(&mut self, now: WallTime) -> Vec<Firing> {
        self.alarms.collect_due(now, &self.schedules)
    }

    pub fn reset_due_check(&mut self) {
        self.alarms.reset_edge();
    }
}

impl fmt::Debug for ScheduleTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduleTable")
            .field("count", &self.schedules.len())
            .field("capacity", &self.capacity)
            .field("alarms_bound", &self.alarms.pool().bound_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn med(id: &str, dispenser: u8, hour: u8, minute: u8) -> NewSchedule {
        NewSchedule::new(id, dispenser, hour, minute, "M", "A", PillSize::Medium)
    }

    #[test]
    fn add_then_get_round_trips_fields() {
        let mut t = ScheduleTable::default();
        t.add(med("s1", 0, 8, 0)).unwrap();
        let s = t.get("s1").unwrap();
        assert_eq!((s.dispenser, s.hour, s.minute), (0, 8, 0));
        assert!(s.is_bound());
        assert_eq!(t.alarm_pool().bound_count(), 2);
    }

    #[test]
    fn disabled_add_binds_nothing() {
        let mut t = ScheduleTable::default();
        t.add(med("s1", 0, 8, 0).enabled(false)).unwrap();
        assert!(!t.get("s1").unwrap().is_bound());
        assert_eq!(t.active_count(), 0);
        assert_eq!(t.count(), 1);
    }

    #[test]
    fn remove_shifts_later_entries() {
        let mut t = ScheduleTable::default();
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            t.add(med(id, 0, 8, i as u8)).unwrap();
        }
        t.remove("a").unwrap();
        assert_eq!(t.get_by_index(0).map(|s| s.id.as_str()), Some("b"));
        assert_eq!(t.get_by_index(1).map(|s| s.id.as_str()), Some("c"));
        assert!(t.get_by_index(2).is_none());
        assert_eq!(t.alarm_pool().bound_count(), 4);
    }

    #[test]
    fn missing_ids_are_not_found() {
        let mut t = ScheduleTable::default();
        assert!(matches!(t.remove("x"), Err(DispenserError::NotFound(_))));
        assert!(matches!(
            t.update("x", 1, 2, true),
            Err(DispenserError::NotFound(_))
        ));
        assert!(matches!(
            t.set_weekdays("x", ALL_DAYS),
            Err(DispenserError::NotFound(_))
        ));
    }

    #[test]
    fn update_rejects_bad_time_before_lookup() {
        let mut t = ScheduleTable::default();
        t.add(med("s1", 0, 8, 0)).unwrap();
        assert!(matches!(
            t.update("s1", 24, 0, true),
            Err(DispenserError::InvalidParameter(_))
        ));
        assert_eq!(t.get("s1").unwrap().hour, 8);
    }

    #[test]
    fn undersized_pool_rejects_without_side_effects() {
        let settings = SchedulerSettings {
            alarm_capacity: 3,
            ..SchedulerSettings::default()
        };
        let mut t = ScheduleTable::new(&settings);
        t.add(med("a", 0, 8, 0)).unwrap();
        assert!(matches!(
            t.add(med("b", 1, 9, 0)),
            Err(DispenserError::AlarmPoolExhausted)
        ));
        assert_eq!(t.count(), 1);
        // Disabled schedules need no slots.
        t.add(med("b", 1, 9, 0).enabled(false)).unwrap();
        // Upsert of "a" reuses its own two slots.
        t.add(med("a", 0, 10, 0)).unwrap();
        assert_eq!(t.get("a").unwrap().hour, 10);
    }

    #[test]
    fn next_schedule_time_picks_earliest_later_today() {
        let mut t = ScheduleTable::default();
        t.add(med("late", 0, 20, 0)).unwrap();
        t.add(med("early", 1, 9, 30)).unwrap();
        t.add(med("past", 2, 7, 0)).unwrap();
        t.add(med("off", 3, 8, 0).enabled(false)).unwrap();
        let mut monday_only = [false; 7];
        monday_only[0] = true;
        t.add(med("mon", 4, 8, 30).on_days(monday_only)).unwrap();

        let tue = WallTime::new(Weekday::Tuesday, 7, 30, 0).unwrap();
        assert_eq!(t.next_schedule_time(tue), Some((9, 30)));
        let mon = WallTime::new(Weekday::Monday, 7, 30, 0).unwrap();
        assert_eq!(t.next_schedule_time(mon), Some((8, 30)));
        let night = WallTime::new(Weekday::Monday, 21, 0, 0).unwrap();
        assert_eq!(t.next_schedule_time(night), None);
    }

    #[test]
    fn is_schedule_time_honours_weekday_and_enable() {
        let mut t = ScheduleTable::default();
        let mut weekend = [false; 7];
        weekend[5] = true;
        weekend[6] = true;
        t.add(med("w", 0, 10, 0).on_days(weekend)).unwrap();
        let sat = WallTime::new(Weekday::Saturday, 10, 0, 30).unwrap();
        let fri = WallTime::new(Weekday::Friday, 10, 0, 0).unwrap();
        assert!(t.is_schedule_time(sat));
        assert!(!t.is_schedule_time(fri));
        t.set_enabled("w", false).unwrap();
        assert!(!t.is_schedule_time(sat));
    }

    #[test]
    fn display_lists_days_and_state() {
        let mut t = ScheduleTable::default();
        let mut days = [false; 7];
        days[0] = true;
        days[2] = true;
        t.add(med("s1", 0, 8, 5).on_days(days).enabled(false)).unwrap();
        let line = t.get("s1").unwrap().to_string();
        assert!(line.contains("08:05"), "{line}");
        assert!(line.contains("Mon,Wed"), "{line}");
        assert!(line.ends_with("(disabled)"), "{line}");
    }
}
