//! Page-level access to the flash medium.
//!
//! The core only ever programs erased pages, erases whole blocks, and keeps
//! the logical address of each programmed page in the page's out-of-band
//! (spare) area so the collector can find the owner of a valid page.

use thiserror::Error;

use crate::config::{Addr, BlockId, Counter, PageId};
use crate::mapping::PhysAddr;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("physical address ({block}, {page}) is outside the device")]
    OutOfRange { block: BlockId, page: PageId },
    #[error("page ({block}, {page}) programmed twice without an erase")]
    NotErased { block: BlockId, page: PageId },
    #[error("page ({block}, {page}) has no out-of-band record")]
    MissingOob { block: BlockId, page: PageId },
    #[error("payload is {actual} bytes, device page is {expected}")]
    PayloadSize { expected: usize, actual: usize },
    /// The medium reported a failed program operation.
    #[error("programming page ({block}, {page}) failed")]
    ProgramFailed { block: BlockId, page: PageId },
}

pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// Thin pass-through to the medium. Implementations are expected to either
/// complete an operation or report an error; there is no partial success.
pub trait FlashDevice {
    fn write_page(&mut self, addr: PhysAddr, data: &[u8]) -> DeviceResult<()>;

    fn read_page(&self, addr: PhysAddr) -> DeviceResult<Vec<u8>>;

    fn erase_block(&mut self, block: BlockId) -> DeviceResult<()>;

    /// Store the logical address owning `addr` in its spare area.
    fn write_oob(&mut self, addr: PhysAddr, logical: Addr) -> DeviceResult<()>;

    fn read_oob(&self, addr: PhysAddr) -> DeviceResult<Addr>;
}

/// NAND model held in RAM.
#[derive(Debug, Clone)]
pub struct MemDevice {
    blocks: BlockId,
    pages_per_block: PageId,
    page_size: usize,
    pages: Vec<Option<Box<[u8]>>>,
    oob: Vec<Option<Addr>>,
    erases: Vec<Counter>,
}

impl MemDevice {
    pub const ERASED: u8 = 0xFF;

    pub fn new(blocks: BlockId, pages_per_block: PageId, page_size: usize) -> Self {
        let total = blocks * pages_per_block;
        MemDevice {
            blocks,
            pages_per_block,
            page_size,
            pages: vec![None; total],
            oob: vec![None; total],
            erases: vec![0; blocks],
        }
    }

    /// Device sized after a validated FTL configuration.
    pub fn for_config(cfg: &crate::config::Config) -> Self {
        MemDevice::new(cfg.physical_block_count, cfg.page_count_per_block, cfg.page_size)
    }

    /// Number of erase cycles the device has seen on `block`.
    pub fn erase_count(&self, block: BlockId) -> Counter {
        self.erases[block]
    }

    pub fn total_erases(&self) -> Counter {
        self.erases.iter().sum()
    }

    fn slot(&self, addr: PhysAddr) -> DeviceResult<usize> {
        if addr.block >= self.blocks || addr.page >= self.pages_per_block {
            return Err(DeviceError::OutOfRange { block: addr.block, page: addr.page });
        }
        Ok(addr.block * self.pages_per_block + addr.page)
    }
}

impl FlashDevice for MemDevice {
    fn write_page(&mut self, addr: PhysAddr, data: &[u8]) -> DeviceResult<()> {
        let idx = self.slot(addr)?;
        if data.len() != self.page_size {
            return Err(DeviceError::PayloadSize { expected: self.page_size, actual: data.len() });
        }
        if self.pages[idx].is_some() {
            return Err(DeviceError::NotErased { block: addr.block, page: addr.page });
        }
        self.pages[idx] = Some(data.into());
        Ok(())
    }

    fn read_page(&self, addr: PhysAddr) -> DeviceResult<Vec<u8>> {
        let idx = self.slot(addr)?;
        Ok(match &self.pages[idx] {
            Some(data) => data.to_vec(),
            None => vec![Self::ERASED; self.page_size],
        })
    }

    fn erase_block(&mut self, block: BlockId) -> DeviceResult<()> {
        if block >= self.blocks {
            return Err(DeviceError::OutOfRange { block, page: 0 });
        }
        let range = block * self.pages_per_block..(block + 1) * self.pages_per_block;
        self.pages[range.clone()].fill(None);
        self.oob[range].fill(None);
        self.erases[block] += 1;
        Ok(())
    }

    fn write_oob(&mut self, addr: PhysAddr, logical: Addr) -> DeviceResult<()> {
        let idx = self.slot(addr)?;
        self.oob[idx] = Some(logical);
        Ok(())
    }

    fn read_oob(&self, addr: PhysAddr) -> DeviceResult<Addr> {
        let idx = self.slot(addr)?;
        self.oob[idx].ok_or(DeviceError::MissingOob { block: addr.block, page: addr.page })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_once_between_erases() {
        let mut dev = MemDevice::new(2, 4, 4);
        let addr = PhysAddr::new(1, 2);

        dev.write_page(addr, &[1, 2, 3, 4]).unwrap();
        assert_eq!(dev.read_page(addr).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(
            dev.write_page(addr, &[5, 6, 7, 8]),
            Err(DeviceError::NotErased { block: 1, page: 2 })
        );

        dev.erase_block(1).unwrap();
        assert_eq!(dev.read_page(addr).unwrap(), vec![MemDevice::ERASED; 4]);
        dev.write_page(addr, &[5, 6, 7, 8]).unwrap();
        assert_eq!(dev.erase_count(1), 1);
        assert_eq!(dev.erase_count(0), 0);
    }

    #[test]
    fn oob_is_cleared_by_erase() {
        let mut dev = MemDevice::new(1, 2, 1);
        let addr = PhysAddr::new(0, 1);
        dev.write_oob(addr, 42).unwrap();
        assert_eq!(dev.read_oob(addr), Ok(42));

        dev.erase_block(0).unwrap();
        assert!(matches!(dev.read_oob(addr), Err(DeviceError::MissingOob { .. })));
    }

    #[test]
    fn rejects_out_of_range() {
        let mut dev = MemDevice::new(1, 2, 1);
        assert!(matches!(dev.write_page(PhysAddr::new(0, 2), &[0]), Err(DeviceError::OutOfRange { .. })));
        assert!(matches!(dev.erase_block(1), Err(DeviceError::OutOfRange { .. })));
        assert!(matches!(dev.write_page(PhysAddr::new(0, 0), &[0, 0]), Err(DeviceError::PayloadSize { .. })));
    }
}
