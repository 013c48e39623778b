use thiserror::Error;

use crate::config::{BlockId, PageId};
use crate::device::DeviceError;

/// FTL specialized Result type.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Read of a logical page that was never written.
    #[error("logical page ({block}, {page}) is not mapped")]
    UnmappedAddress { block: BlockId, page: PageId },
    #[error("address ({block}, {page}) is outside the configured geometry")]
    AddressOutOfRange { block: BlockId, page: PageId },
    #[error("payload is {actual} bytes, page size is {expected}")]
    PayloadSize { expected: usize, actual: usize },
    #[error("device failure: {0}")]
    Device(#[from] DeviceError),
    /// Internal bookkeeping disagrees with itself.
    #[error("invariant violated: {0}")]
    InvariantViolation(&'static str),
    #[error("block {block} exceeded the tracked erase-count range ({limit})")]
    WearLimit { block: BlockId, limit: u32 },
    #[error("configuration error: {0}")]
    Config(&'static str),
    #[error("instance halted after a fatal error, re-initialize it")]
    Halted,
}

impl Error {
    /// Errors after which in-memory state may disagree with the device.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Device(_) | Error::InvariantViolation(_) | Error::WearLimit { .. })
    }
}
