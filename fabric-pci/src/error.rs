use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid BAR {0}")]
    InvalidBar(u8),
    #[error("BAR {0} has zero size")]
    EmptyBar(u8),
    #[error("a device is already attached at devfn {0:#04x}")]
    DeviceExists(u8),
    #[error("no device attached at devfn {0:#04x}")]
    NoDevice(u8),
    #[error(transparent)]
    Core(#[from] fabric_core::Error),
    #[error(transparent)]
    Range(#[from] fabric_range::Error),
}
