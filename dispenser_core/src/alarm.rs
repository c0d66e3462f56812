//! Fixed-capacity alarm pool and the minute-edge due-check.
//!
//! Each enabled schedule holds one dispense and one reminder binding. A
//! binding records only the time of day it fires at; weekday and enable
//! state are re-checked by the orchestrator when the firing is handled.

use dispenser_config::MAX_CATCH_UP_MINUTES;
use dispenser_traits::time::{MINUTES_PER_DAY, MINUTES_PER_WEEK};
use dispenser_traits::{WallTime, Weekday};

use crate::error::DispenserError;
use crate::schedule::MedicationSchedule;

/// Backward clock corrections up to this size hold evaluation until the
/// clock passes the last evaluated minute again.
pub const BACKWARD_HOLD_MINUTES: u32 = 60;

const _: () = assert!(
    (MAX_CATCH_UP_MINUTES as u32) < MINUTES_PER_WEEK - BACKWARD_HOLD_MINUTES
);

/// Handle to one binding in the alarm pool.
///
/// The generation changes every time a slot is rebound, so a handle taken
/// before an unbind never matches the slot's next occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlarmId {
    slot: usize,
    generation: u32,
}

impl AlarmId {
    pub fn slot(self) -> usize {
        self.slot
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmKind {
    Dispense,
    Reminder,
}

impl std::fmt::Display for AlarmKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            AlarmKind::Dispense => "dispense",
            AlarmKind::Reminder => "reminder",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmBinding {
    pub schedule_id: String,
    pub kind: AlarmKind,
    /// Time of day the alarm matches, in minutes since midnight.
    pub minute_of_day: u16,
    /// The alarm fires on the day before the dose (reminder wrapped past midnight).
    pub previous_day: bool,
}

/// Slot pool with O(1) bind and unbind through a free-slot stack.
#[derive(Debug)]
pub struct AlarmPool {
    slots: Vec<Option<AlarmBinding>>,
    generations: Vec<u32>,
    free: Vec<usize>,
}

impl AlarmPool {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            generations: vec![0; capacity],
            free: (0..capacity).rev().collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn free_slots(&self) -> usize {
        self.free.len()
    }

    pub fn bound_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn bind(&mut self, binding: AlarmBinding) -> Result<AlarmId, DispenserError> {
        let slot = self.free.pop().ok_or(DispenserError::AlarmPoolExhausted)?;
        let generation = self.generations[slot].wrapping_add(1);
        self.generations[slot] = generation;
        self.slots[slot] = Some(binding);
        Ok(AlarmId { slot, generation })
    }

    fn is_current(&self, id: AlarmId) -> bool {
        self.generations.get(id.slot) == Some(&id.generation)
    }

    /// Frees the slot; returns the binding it held, if any. Stale handles
    /// are ignored.
    pub fn unbind(&mut self, id: AlarmId) -> Option<AlarmBinding> {
        if !self.is_current(id) {
            return None;
        }
        let taken = self.slots.get_mut(id.slot)?.take();
        if taken.is_some() {
            self.free.push(id.slot);
        }
        taken
    }

    pub fn get(&self, id: AlarmId) -> Option<&AlarmBinding> {
        if !self.is_current(id) {
            return None;
        }
        self.slots.get(id.slot)?.as_ref()
    }

    /// Bound slots in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (AlarmId, &AlarmBinding)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, b)| {
                b.as_ref().map(|b| {
                    let id = AlarmId {
                        slot: i,
                        generation: self.generations[i],
                    };
                    (id, b)
                })
            })
    }
}

/// Time of day `offset_min` before `minute_of_day`, and whether it wrapped
/// into the previous day.
pub fn reminder_time(minute_of_day: u16, offset_min: u16) -> (u16, bool) {
    if offset_min <= minute_of_day {
        (minute_of_day - offset_min, false)
    } else {
        let day = MINUTES_PER_DAY;
        ((minute_of_day + day - offset_min % day) % day, true)
    }
}

/// An alarm that matched during a due-check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Firing {
    pub alarm: AlarmId,
    pub schedule_id: String,
    pub kind: AlarmKind,
    /// Minute that matched (seconds zeroed).
    pub at: WallTime,
    /// Day whose weekday bit gates this firing.
    pub dose_day: Weekday,
}

/// Owns the alarm pool and the edge-trigger state of the due-check.
#[derive(Debug)]
pub struct AlarmScheduler {
    pool: AlarmPool,
    reminder_offset_min: u16,
    catch_up_minutes: u16,
    last_evaluated: Option<u32>,
}

impl AlarmScheduler {
    /// `catch_up_minutes` is clamped to `1..=MAX_CATCH_UP_MINUTES`; a wider
    /// window would read a small backward correction as a forward gap.
    pub fn new(capacity: usize, reminder_offset_min: u16, catch_up_minutes: u16) -> Self {
        Self {
            pool: AlarmPool::with_capacity(capacity),
            reminder_offset_min,
            catch_up_minutes: catch_up_minutes.clamp(1, MAX_CATCH_UP_MINUTES),
            last_evaluated: None,
        }
    }

    pub fn pool(&self) -> &AlarmPool {
        &self.pool
    }

    pub fn reminder_offset_min(&self) -> u16 {
        self.reminder_offset_min
    }

    /// Slots one schedule needs when enabled.
    pub const SLOTS_PER_SCHEDULE: usize = 2;

    /// Bind the dispense and reminder alarms for a schedule at `hour:minute`.
    ///
    /// Either both bind or neither does.
    pub fn bind_pair(
        &mut self,
        schedule_id: &str,
        hour: u8,
        minute: u8,
    ) -> Result<(AlarmId, AlarmId), DispenserError> {
        if self.pool.free_slots() < Self::SLOTS_PER_SCHEDULE {
            return Err(DispenserError::AlarmPoolExhausted);
        }
        let at_min = u16::from(hour) * 60 + u16::from(minute);
        let dispense = self.pool.bind(AlarmBinding {
            schedule_id: schedule_id.to_string(),
            kind: AlarmKind::Dispense,
            minute_of_day: at_min,
            previous_day: false,
        })?;
        let (rem_mod, previous_day) = reminder_time(at_min, self.reminder_offset_min);
        let reminder = match self.pool.bind(AlarmBinding {
            schedule_id: schedule_id.to_string(),
            kind: AlarmKind::Reminder,
            minute_of_day: rem_mod,
            previous_day,
        }) {
            Ok(id) => id,
            Err(e) => {
                self.pool.unbind(dispense);
                return Err(e);
            }
        };
        tracing::debug!(
            schedule_id,
            dispense_slot = dispense.slot(),
            reminder_slot = reminder.slot(),
            reminder_minute = rem_mod,
            previous_day,
            "alarms bound"
        );
        Ok((dispense, reminder))
    }

    pub fn unbind(&mut self, id: AlarmId) {
        if let Some(b) = self.pool.unbind(id) {
            tracing::debug!(schedule_id = %b.schedule_id, kind = %b.kind, slot = id.slot(), "alarm unbound");
        }
    }

    /// Minutes of the week to evaluate for a reading at `now`.
    fn minutes_to_evaluate(&mut self, now: WallTime) -> Vec<u32> {
        let cur = now.minute_of_week();
        let Some(last) = self.last_evaluated else {
            self.last_evaluated = Some(cur);
            return vec![cur];
        };
        let forward = (cur + MINUTES_PER_WEEK - last) % MINUTES_PER_WEEK;
        if forward == 0 {
            return Vec::new();
        }
        if forward <= u32::from(self.catch_up_minutes) {
            self.last_evaluated = Some(cur);
            if forward > 1 {
                tracing::info!(skipped = forward - 1, "catching up on skipped minutes");
            }
            return (1..=forward)
                .map(|d| (last + d) % MINUTES_PER_WEEK)
                .collect();
        }
        let backward = MINUTES_PER_WEEK - forward;
        if backward <= BACKWARD_HOLD_MINUTES {
            tracing::warn!(
                backward_minutes = backward,
                "clock moved backwards; holding until it passes the last evaluated minute"
            );
            return Vec::new();
        }
        tracing::warn!(gap_minutes = forward, "clock jumped; evaluating current minute only");
        self.last_evaluated = Some(cur);
        vec![cur]
    }

    /// Edge-triggered due-check.
    ///
    /// Each minute of the week is evaluated at most once; matches come back
    /// in minute order, then table order, dispense before reminder.
    pub fn collect_due(&mut self, now: WallTime, schedules: &[MedicationSchedule]) -> Vec<Firing> {
        let mut out = Vec::new();
        for m in self.minutes_to_evaluate(now) {
            let at = WallTime::from_minute_of_week(m, 0);
            let at_min = at.minute_of_day();
            for s in schedules.iter().filter(|s| s.enabled) {
                for id in [s.dispense_alarm(), s.reminder_alarm()].into_iter().flatten() {
                    let Some(b) = self.pool.get(id) else { continue };
                    if b.minute_of_day != at_min {
                        continue;
                    }
                    let dose_day = if b.previous_day {
                        at.weekday.next()
                    } else {
                        at.weekday
                    };
                    out.push(Firing {
                        alarm: id,
                        schedule_id: b.schedule_id.clone(),
                        kind: b.kind,
                        at,
                        dose_day,
                    });
                }
            }
        }
        out
    }

    /// Forget the edge-trigger state; the next due-check evaluates only its own minute.
    pub fn reset_edge(&mut self) {
        self.last_evaluated = None;
    }
}
