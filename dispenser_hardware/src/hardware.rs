//! `rppal` adapters for a Raspberry Pi host: `/dev/i2c-N` for the PCA9685 and
//! a UART for the relay controller.

use std::time::Duration;

use dispenser_traits::{HwResult, I2cBus, SerialLink};
use rppal::i2c::I2c;
use rppal::uart::{Parity, Queue, Uart};

use crate::error::HwError;
use crate::util::{LineBuffer, read_line_with_deadline, write_all_with_deadline};

const POLL_INTERVAL: Duration = Duration::from_millis(2);
/// Upper bound on handing one command line to the UART.
const WRITE_TIMEOUT: Duration = Duration::from_millis(500);

pub struct RppalI2cBus {
    bus: u8,
    i2c: Option<I2c>,
}

impl RppalI2cBus {
    pub fn new(bus: u8) -> Result<Self, HwError> {
        let i2c = I2c::with_bus(bus).map_err(|e| HwError::Peripheral(e.to_string()))?;
        Ok(RppalI2cBus {
            bus,
            i2c: Some(i2c),
        })
    }

    fn select(&mut self, addr: u8) -> Result<&mut I2c, HwError> {
        let i2c = self.i2c.as_mut().ok_or(HwError::BusReleased)?;
        i2c.set_slave_address(u16::from(addr))
            .map_err(|e| HwError::Peripheral(e.to_string()))?;
        Ok(i2c)
    }
}

impl I2cBus for RppalI2cBus {
    fn probe(&mut self, addr: u8) -> HwResult<()> {
        let i2c = self.select(addr)?;
        // The kernel reports an unacknowledged address as an I/O error.
        i2c.smbus_quick_command(false)
            .map_err(|_| HwError::Nack { addr })?;
        Ok(())
    }

    fn write(&mut self, addr: u8, bytes: &[u8]) -> HwResult<()> {
        let i2c = self.select(addr)?;
        let n = i2c.write(bytes).map_err(|_| HwError::Nack { addr })?;
        if n != bytes.len() {
            return Err(HwError::Nack { addr }.into());
        }
        Ok(())
    }

    fn release(&mut self) {
        self.i2c = None;
    }

    fn reacquire(&mut self) -> HwResult<()> {
        let i2c = I2c::with_bus(self.bus).map_err(|e| HwError::Peripheral(e.to_string()))?;
        self.i2c = Some(i2c);
        Ok(())
    }

    fn set_clock_hz(&mut self, hz: u32) -> HwResult<()> {
        // SCL rate is fixed by the device tree (`i2c_arm_baudrate`).
        tracing::warn!(
            bus = self.bus,
            hz,
            "i2c clock change not applied; rate is set by the kernel driver"
        );
        Ok(())
    }
}

pub struct RppalSerialLink {
    uart: Uart,
    buf: LineBuffer,
}

impl RppalSerialLink {
    pub fn open(path: &str, baud: u32) -> Result<Self, HwError> {
        let mut uart = Uart::with_path(path, baud, Parity::None, 8, 1)
            .map_err(|e| HwError::Peripheral(e.to_string()))?;
        uart.set_read_mode(0, Duration::ZERO)
            .map_err(|e| HwError::Peripheral(e.to_string()))?;
        uart.set_write_mode(true)
            .map_err(|e| HwError::Peripheral(e.to_string()))?;
        Ok(RppalSerialLink {
            uart,
            buf: LineBuffer::new(),
        })
    }
}

impl SerialLink for RppalSerialLink {
    fn clear_input(&mut self) -> HwResult<()> {
        self.buf.clear();
        self.uart
            .flush(Queue::Input)
            .map_err(|e| HwError::Peripheral(e.to_string()))?;
        Ok(())
    }

    fn write_line(&mut self, line: &str) -> HwResult<()> {
        let mut out = Vec::with_capacity(line.len() + 1);
        out.extend_from_slice(line.as_bytes());
        out.push(b'\n');
        let uart = &mut self.uart;
        write_all_with_deadline(
            &out,
            |chunk| {
                uart.write(chunk)
                    .map_err(|e| HwError::Peripheral(e.to_string()))
            },
            WRITE_TIMEOUT,
            POLL_INTERVAL,
        )?;
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> HwResult<Option<String>> {
        let uart = &mut self.uart;
        let line = read_line_with_deadline(
            &mut self.buf,
            |scratch| {
                uart.read(scratch)
                    .map_err(|e| HwError::Peripheral(e.to_string()))
            },
            timeout,
            POLL_INTERVAL,
        )?;
        Ok(line)
    }
}
