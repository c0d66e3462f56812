//! The actuation seam: one trait, one active implementation per process.

use crate::error::DispenserError;
use crate::types::PillSize;

pub type ChannelResult<T = ()> = Result<T, DispenserError>;

/// Drives the dispensing mechanism.
///
/// Calls block for at most the actuation duration plus the configured
/// command timeouts; none of them wait unboundedly.
pub trait ActuationChannel {
    /// Short name for logs ("pwm", "relay").
    fn kind(&self) -> &'static str;

    fn is_ready(&self) -> bool;

    /// Bring the link up (controller init or handshake).
    fn begin(&mut self) -> ChannelResult;

    fn set_angle(&mut self, channel: u8, angle: u16) -> ChannelResult;

    fn stop_all(&mut self) -> ChannelResult;

    /// Every output to its 90 degree rest position.
    fn reset_all(&mut self) -> ChannelResult;

    /// Timed release of one pill from `channel`.
    fn dispense(&mut self, channel: u8, size: PillSize) -> ChannelResult;

    /// Release from two outputs together; they start and stop as one.
    fn dispense_pair(&mut self, first: u8, second: u8, size: PillSize) -> ChannelResult;

    fn self_test(&mut self, channel: u8) -> ChannelResult;

    fn calibrate(&mut self, channel: u8) -> ChannelResult;

    /// Explicit recovery (bus reset or re-handshake).
    fn recover(&mut self) -> ChannelResult;

    /// Periodic housekeeping from the control loop.
    fn maintain(&mut self) -> ChannelResult;
}

impl<C: ActuationChannel + ?Sized> ActuationChannel for Box<C> {
    fn kind(&self) -> &'static str {
        (**self).kind()
    }
    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }
    fn begin(&mut self) -> ChannelResult {
        (**self).begin()
    }
    fn set_angle(&mut self, channel: u8, angle: u16) -> ChannelResult {
        (**self).set_angle(channel, angle)
    }
    fn stop_all(&mut self) -> ChannelResult {
        (**self).stop_all()
    }
    fn reset_all(&mut self) -> ChannelResult {
        (**self).reset_all()
    }
    fn dispense(&mut self, channel: u8, size: PillSize) -> ChannelResult {
        (**self).dispense(channel, size)
    }
    fn dispense_pair(&mut self, first: u8, second: u8, size: PillSize) -> ChannelResult {
        (**self).dispense_pair(first, second, size)
    }
    fn self_test(&mut self, channel: u8) -> ChannelResult {
        (**self).self_test(channel)
    }
    fn calibrate(&mut self, channel: u8) -> ChannelResult {
        (**self).calibrate(channel)
    }
    fn recover(&mut self) -> ChannelResult {
        (**self).recover()
    }
    fn maintain(&mut self) -> ChannelResult {
        (**self).maintain()
    }
}
