//! Hardware and time seams for the dispenser stack.
//!
//! Everything the scheduling and actuation core touches outside its own
//! memory goes through one of these traits, so the core can be driven by
//! simulated hardware and a manual clock in tests.

pub mod clock;
pub mod time;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use time::{
    ManualTimeSource, SimulatedTimeSource, SystemTimeSource, TimeSource, WallTime, Weekday,
};

use std::time::Duration;

/// Error type crossing the hardware trait boundary.
pub type HwResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Byte-level access to an I2C master.
pub trait I2cBus {
    /// Address-only transaction; `Ok` iff the device acknowledged.
    fn probe(&mut self, addr: u8) -> HwResult<()>;

    /// Write `bytes` to the 7-bit address `addr` in one transaction.
    fn write(&mut self, addr: u8, bytes: &[u8]) -> HwResult<()>;

    /// Release the bus (drive lines idle, drop the peripheral).
    fn release(&mut self);

    /// Re-open the bus after `release`.
    fn reacquire(&mut self) -> HwResult<()>;

    /// Set the SCL clock rate.
    fn set_clock_hz(&mut self, hz: u32) -> HwResult<()>;
}

impl<B: I2cBus + ?Sized> I2cBus for Box<B> {
    fn probe(&mut self, addr: u8) -> HwResult<()> {
        (**self).probe(addr)
    }
    fn write(&mut self, addr: u8, bytes: &[u8]) -> HwResult<()> {
        (**self).write(addr, bytes)
    }
    fn release(&mut self) {
        (**self).release();
    }
    fn reacquire(&mut self) -> HwResult<()> {
        (**self).reacquire()
    }
    fn set_clock_hz(&mut self, hz: u32) -> HwResult<()> {
        (**self).set_clock_hz(hz)
    }
}

/// Line-oriented serial link to the secondary controller.
pub trait SerialLink {
    /// Discard anything buffered on the receive side.
    fn clear_input(&mut self) -> HwResult<()>;

    /// Write `line` followed by a newline.
    fn write_line(&mut self, line: &str) -> HwResult<()>;

    /// Read one line (without terminator), waiting at most `timeout`.
    /// `Ok(None)` means nothing complete arrived in time.
    fn read_line(&mut self, timeout: Duration) -> HwResult<Option<String>>;
}

impl<L: SerialLink + ?Sized> SerialLink for Box<L> {
    fn clear_input(&mut self) -> HwResult<()> {
        (**self).clear_input()
    }
    fn write_line(&mut self, line: &str) -> HwResult<()> {
        (**self).write_line(line)
    }
    fn read_line(&mut self, timeout: Duration) -> HwResult<Option<String>> {
        (**self).read_line(timeout)
    }
}
