//! Page-mapped flash translation layer with hot/cold separation, greedy
//! garbage collection and erase-count based wear leveling.

pub mod config;
pub mod device;
pub mod error;
pub mod ftl;
mod gc;
pub mod hotcold;
pub mod mapping;
pub mod wear;

pub use config::Config;
pub use device::{DeviceError, FlashDevice, MemDevice};
pub use error::{Error, Result};
pub use ftl::{Ftl, Stats, Stream};
pub use mapping::{LogicalAddr, PhysAddr};
