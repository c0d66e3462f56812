#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Scheduling and actuation core (hardware-agnostic).
//!
//! All hardware goes through the `dispenser_traits` seams (`I2cBus`,
//! `SerialLink`, `Clock`, `TimeSource`), so the whole engine runs against
//! simulated devices in tests.
//!
//! ## Architecture
//!
//! - **Schedules**: bounded, id-keyed table with upsert semantics (`schedule`)
//! - **Alarms**: fixed-capacity slot pool and the edge-triggered due-check (`alarm`)
//! - **Orchestration**: fire-time validation, actuation, outbound events (`orchestrator`)
//! - **Channels**: one `ActuationChannel` trait with a PCA9685 driver (`pwm`)
//!   and a serial relay to a secondary controller (`relay`)
//! - **Wiring**: `DispenserCore`, its builder and the tick loop (`core`, `builder`, `runner`)
//!
//! ## Single-threaded model
//!
//! A tick collects due alarms, then fires them one at a time in table
//! order. Actuation blocks for the configured hold plus settle time; relay
//! commands block for at most their timeout. Nothing waits unboundedly.

pub mod alarm;
pub mod builder;
pub mod channel;
pub mod config;
pub mod conversions;
pub mod core;
pub mod error;
pub mod hw_error;
pub mod mocks;
pub mod orchestrator;
pub mod pwm;
pub mod relay;
pub mod runner;
pub mod schedule;
pub mod types;

pub use crate::alarm::{AlarmId, AlarmKind, Firing};
pub use crate::builder::DispenserCoreBuilder;
pub use crate::channel::{ActuationChannel, ChannelResult};
pub use crate::config::{
    ChannelMap, DispenserOutput, PillDurations, PwmSettings, RelaySettings, SchedulerSettings,
};
pub use crate::core::DispenserCore;
pub use crate::error::{BuildError, DispenserError, Result};
pub use crate::orchestrator::{DispenseEventSink, FireOutcome, SinkResult, SkipReason};
pub use crate::pwm::{BusStats, DirectPwmChannel};
pub use crate::relay::RelayChannel;
pub use crate::runner::{RunOptions, RunSummary, run};
pub use crate::schedule::{MedicationSchedule, NewSchedule, ScheduleTable};
pub use crate::types::{
    DispenseRequest, DispenseResult, PillSize, Reminder, TriggerReason,
};
