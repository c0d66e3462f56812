use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispenserError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("schedule not found: {0}")]
    NotFound(String),
    #[error("schedule table is full")]
    ScheduleCapacityExceeded,
    #[error("alarm pool exhausted")]
    AlarmPoolExhausted,
    #[error("actuation channel unavailable")]
    ChannelUnavailable,
    #[error("command timed out")]
    CommandTimeout,
    #[error("command rejected: {0}")]
    CommandRejected(String),
    #[error("i2c bus error: {0}")]
    BusError(String),
    #[error("i2c bus recovery failed")]
    BusRecoveryFailed,
}

impl DispenserError {
    /// Capacity failures from either the table or the alarm pool.
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            DispenserError::ScheduleCapacityExceeded | DispenserError::AlarmPoolExhausted
        )
    }

    /// Errors raised by the transport rather than by the caller's input.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            DispenserError::ChannelUnavailable
                | DispenserError::CommandTimeout
                | DispenserError::CommandRejected(_)
                | DispenserError::BusError(_)
                | DispenserError::BusRecoveryFailed
        )
    }
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing actuation channel")]
    MissingChannel,
    #[error("missing time source")]
    MissingTimeSource,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
