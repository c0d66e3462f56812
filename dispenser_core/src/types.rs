//! Value types shared by the schedule table, the orchestrator and the channels.

use std::fmt;
use std::str::FromStr;

use crate::error::DispenserError;

pub use dispenser_config::{DISPENSER_COUNT, MAX_CHANNEL};

/// Pill-size category; each maps to a fixed actuation duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PillSize {
    Small,
    Medium,
    Large,
    Custom,
}

impl PillSize {
    pub const ALL: [PillSize; 4] = [
        PillSize::Small,
        PillSize::Medium,
        PillSize::Large,
        PillSize::Custom,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PillSize::Small => "small",
            PillSize::Medium => "medium",
            PillSize::Large => "large",
            PillSize::Custom => "custom",
        }
    }
}

impl fmt::Display for PillSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Unknown names are rejected rather than mapped to a default size.
impl FromStr for PillSize {
    type Err = DispenserError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        PillSize::ALL
            .into_iter()
            .find(|p| p.as_str() == lower)
            .ok_or_else(|| DispenserError::InvalidParameter(format!("unknown pill size '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    Scheduled,
    ManualTest,
    RemoteCommand,
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TriggerReason::Scheduled => "scheduled",
            TriggerReason::ManualTest => "manual-test",
            TriggerReason::RemoteCommand => "remote-command",
        })
    }
}

/// One dispense attempt, built per firing and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispenseRequest {
    pub dispenser: u8,
    pub size: PillSize,
    pub medication: String,
    pub patient: String,
    pub reason: TriggerReason,
    /// Set for scheduled firings.
    pub schedule_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispenseResult {
    Succeeded,
    ChannelUnavailable,
    HardwareError(String),
}

impl DispenseResult {
    pub fn is_success(&self) -> bool {
        matches!(self, DispenseResult::Succeeded)
    }
}

impl fmt::Display for DispenseResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispenseResult::Succeeded => f.write_str("succeeded"),
            DispenseResult::ChannelUnavailable => f.write_str("channel-unavailable"),
            DispenseResult::HardwareError(msg) => write!(f, "hardware-error: {msg}"),
        }
    }
}

/// Payload of a reminder firing. Reminders never drive hardware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reminder {
    pub schedule_id: String,
    pub dispenser: u8,
    pub size: PillSize,
    pub medication: String,
    pub patient: String,
    pub dose_hour: u8,
    pub dose_minute: u8,
}

pub fn check_dispenser(index: u8) -> Result<(), DispenserError> {
    if index >= DISPENSER_COUNT {
        return Err(DispenserError::InvalidParameter(format!(
            "dispenser index {index} out of range 0..={}",
            DISPENSER_COUNT - 1
        )));
    }
    Ok(())
}

pub fn check_channel(channel: u8) -> Result<(), DispenserError> {
    if channel > MAX_CHANNEL {
        return Err(DispenserError::InvalidParameter(format!(
            "channel {channel} out of range 0..={MAX_CHANNEL}"
        )));
    }
    Ok(())
}

pub fn check_angle(angle: u16) -> Result<(), DispenserError> {
    if angle > 180 {
        return Err(DispenserError::InvalidParameter(format!(
            "angle {angle} out of range 0..=180"
        )));
    }
    Ok(())
}
