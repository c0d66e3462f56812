//! Human-readable error descriptions, exit codes and structured JSON errors.

use dispenser_core::error::{BuildError, DispenserError};
use dispenser_core::DispenseResult;

use crate::app::CliError;

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingChannel => {
                "What happened: No actuation channel was provided to the dispenser core.\nLikely causes: The PWM driver or relay link failed to open.\nHow to fix: Check [channel] kind and the matching [pwm] or [relay] section.".to_string()
            }
            BuildError::MissingTimeSource => {
                "What happened: No time source was provided to the dispenser core.\nLikely causes: The core was assembled without a clock.\nHow to fix: Pass a time source via with_time_source(...).".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Out-of-range values in the [scheduler] section.\nHow to fix: Edit the config file, then rerun."
            ),
        };
    }

    if let Some(ce) = err.downcast_ref::<CliError>() {
        let CliError::DispenseFailed { dispenser, result } = ce;
        return match result {
            DispenseResult::ChannelUnavailable => format!(
                "What happened: Dispenser {dispenser} could not be driven because the actuation channel is down.\nLikely causes: Relay controller not answering or PWM driver not initialized.\nHow to fix: Run `dispenser self-check`, check the serial or I2C wiring, then retry."
            ),
            other => format!(
                "What happened: Dispense on dispenser {dispenser} failed ({other}).\nLikely causes: Bus error, rejected command or an unmapped dispenser.\nHow to fix: Check the [[dispensers]] mapping and run `dispenser recover-bus`."
            ),
        };
    }

    if let Some(de) = err.downcast_ref::<DispenserError>() {
        return match de {
            DispenserError::InvalidParameter(msg) => format!(
                "What happened: Invalid parameter ({msg}).\nLikely causes: Dispenser index, time or pill size out of range.\nHow to fix: Dispensers are 0..=4, hours 0..=23, minutes 0..=59."
            ),
            DispenserError::ScheduleCapacityExceeded | DispenserError::AlarmPoolExhausted => {
                "What happened: The schedule table is full.\nLikely causes: More schedules than scheduler.max_schedules allows.\nHow to fix: Remove schedules or raise scheduler.max_schedules (at most 15).".to_string()
            }
            DispenserError::ChannelUnavailable | DispenserError::CommandTimeout => {
                "What happened: The actuation channel did not respond.\nLikely causes: Relay controller powered off, wrong serial port or baud rate.\nHow to fix: Check [relay] port and baud, power-cycle the controller, then retry.".to_string()
            }
            DispenserError::BusError(msg) => format!(
                "What happened: I2C bus error ({msg}).\nLikely causes: PCA9685 not powered, wrong address or loose SDA/SCL wiring.\nHow to fix: Check [pwm] address and wiring, then run `dispenser recover-bus`."
            ),
            DispenserError::BusRecoveryFailed => {
                "What happened: The I2C bus could not be recovered.\nLikely causes: A device is holding SDA low or the driver lost power.\nHow to fix: Power-cycle the PWM board and check pull-up resistors.".to_string()
            }
            other => format!(
                "What happened: {other}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    // String-based heuristics for errors coming from init or config
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("schedule csv must have headers") {
        return format!(
            "Invalid headers in schedule CSV. Expected '{}'.",
            dispenser_config::SCHEDULE_CSV_HEADERS.join(",")
        );
    }

    if lower.contains("invalid configuration") || lower.contains("parsing config") {
        let detail = err
            .chain()
            .nth(1)
            .map(|c| c.to_string())
            .unwrap_or_default();
        return format!(
            "What happened: Configuration is invalid ({detail}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file and try again."
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes: 2 invalid parameter, 3 capacity, 4 channel down,
/// 5 bus failure, 1 for everything else.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if let Some(CliError::DispenseFailed { result, .. }) = err.downcast_ref::<CliError>() {
        return match result {
            DispenseResult::ChannelUnavailable => 4,
            _ => 5,
        };
    }
    match err.downcast_ref::<DispenserError>() {
        Some(DispenserError::InvalidParameter(_)) => 2,
        Some(e) if e.is_capacity() => 3,
        Some(DispenserError::ChannelUnavailable | DispenserError::CommandTimeout) => 4,
        Some(
            DispenserError::BusError(_)
            | DispenserError::BusRecoveryFailed
            | DispenserError::CommandRejected(_),
        ) => 5,
        _ => 1,
    }
}

fn reason_name(err: &eyre::Report) -> &'static str {
    if let Some(CliError::DispenseFailed { .. }) = err.downcast_ref::<CliError>() {
        return "DispenseFailed";
    }
    if err.downcast_ref::<BuildError>().is_some() {
        return "BuildError";
    }
    match err.downcast_ref::<DispenserError>() {
        Some(DispenserError::InvalidParameter(_)) => "InvalidParameter",
        Some(DispenserError::NotFound(_)) => "NotFound",
        Some(DispenserError::ScheduleCapacityExceeded) => "ScheduleCapacityExceeded",
        Some(DispenserError::AlarmPoolExhausted) => "AlarmPoolExhausted",
        Some(DispenserError::ChannelUnavailable) => "ChannelUnavailable",
        Some(DispenserError::CommandTimeout) => "CommandTimeout",
        Some(DispenserError::CommandRejected(_)) => "CommandRejected",
        Some(DispenserError::BusError(_)) => "BusError",
        Some(DispenserError::BusRecoveryFailed) => "BusRecoveryFailed",
        None => "Error",
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    json!({
        "reason": reason_name(err),
        "exit_code": exit_code_for_error(err),
        "message": humanize(err),
    })
    .to_string()
}
