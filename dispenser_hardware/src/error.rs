use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("i2c nack from 0x{addr:02x}")]
    Nack { addr: u8 },
    #[error("i2c bus released")]
    BusReleased,
    #[error("serial read timeout")]
    Timeout,
    #[error("serial link closed")]
    Closed,
    #[error("peripheral error: {0}")]
    Peripheral(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;
