use num_integer::Integer;

use crate::config::{Addr, BlockId, Counter, PageId};

/// Caller-visible page coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogicalAddr {
    pub block: BlockId,
    pub page: PageId,
}

impl LogicalAddr {
    pub fn new(block: BlockId, page: PageId) -> Self {
        LogicalAddr { block, page }
    }

    pub fn from_index(index: Addr, pages_per_block: PageId) -> Self {
        let (block, page) = index.div_rem(&pages_per_block);
        LogicalAddr { block, page }
    }

    /// Page-addressed form, as stored in the spare area.
    pub fn index(&self, pages_per_block: PageId) -> Addr {
        self.block * pages_per_block + self.page
    }
}

/// Page coordinate on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PhysAddr {
    pub block: BlockId,
    pub page: PageId,
}

impl PhysAddr {
    pub fn new(block: BlockId, page: PageId) -> Self {
        PhysAddr { block, page }
    }

    pub fn index(&self, pages_per_block: PageId) -> Addr {
        self.block * pages_per_block + self.page
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L2PValue {
    Unmapped,
    Mapped(PhysAddr),
}

/// Logical to physical page map plus the validity of every physical page.
///
/// For each mapped logical address the physical page it points to is valid,
/// and no other logical address points there.
#[derive(Debug, Clone)]
pub struct MappingTable {
    l2p: Vec<L2PValue>,
    valid: Vec<bool>,
    valid_pages: Vec<Counter>,
    pages_per_block: PageId,
}

impl MappingTable {
    pub fn new(logical_pages: Counter, physical_blocks: BlockId, pages_per_block: PageId) -> Self {
        MappingTable {
            l2p: vec![L2PValue::Unmapped; logical_pages],
            valid: vec![false; physical_blocks * pages_per_block],
            valid_pages: vec![0; physical_blocks],
            pages_per_block,
        }
    }

    pub fn resolve(&self, logical: Addr) -> Option<PhysAddr> {
        match self.l2p[logical] {
            L2PValue::Unmapped => None,
            L2PValue::Mapped(addr) => Some(addr),
        }
    }

    /// Point `logical` at `addr`, validate `addr` and invalidate the page that
    /// previously held `logical`, which is returned.
    pub fn bind(&mut self, logical: Addr, addr: PhysAddr) -> Option<PhysAddr> {
        let old = self.resolve(logical);
        if let Some(old) = old {
            self.invalidate(old);
        }

        let slot = addr.index(self.pages_per_block);
        debug_assert!(!self.valid[slot], "binding over a valid page");
        self.valid[slot] = true;
        self.valid_pages[addr.block] += 1;
        self.l2p[logical] = L2PValue::Mapped(addr);

        old
    }

    fn invalidate(&mut self, addr: PhysAddr) {
        let slot = addr.index(self.pages_per_block);
        if self.valid[slot] {
            self.valid[slot] = false;
            self.valid_pages[addr.block] -= 1;
        }
    }

    pub fn is_valid(&self, addr: PhysAddr) -> bool {
        self.valid[addr.index(self.pages_per_block)]
    }

    pub fn valid_pages(&self, block: BlockId) -> Counter {
        self.valid_pages[block]
    }

    /// Pages of `block` that would be reclaimed for free by erasing it.
    pub fn invalid_or_clean(&self, block: BlockId) -> Counter {
        self.pages_per_block - self.valid_pages[block]
    }

    /// Forget validity of every page in `block`. Mapped addresses must have
    /// been moved away beforehand.
    pub fn erase_block(&mut self, block: BlockId) {
        let start = block * self.pages_per_block;
        self.valid[start..start + self.pages_per_block].fill(false);
        self.valid_pages[block] = 0;
    }

    pub fn mapped(&self) -> impl Iterator<Item = (Addr, PhysAddr)> + '_ {
        self.l2p.iter().enumerate().filter_map(|(logical, value)| match value {
            L2PValue::Mapped(addr) => Some((logical, *addr)),
            L2PValue::Unmapped => None,
        })
    }

    pub fn logical_pages(&self) -> Counter {
        self.l2p.len()
    }

    pub fn valid_total(&self) -> Counter {
        self.valid_pages.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_split_by_page_count() {
        let la = LogicalAddr::from_index(257, 100);
        assert_eq!(la, LogicalAddr::new(2, 57));
        assert_eq!(la.index(100), 257);
        assert_eq!(PhysAddr::new(3, 1).index(4), 13);
    }

    #[test]
    fn rebinding_invalidates_previous_page() {
        let mut table = MappingTable::new(8, 4, 2);
        assert_eq!(table.resolve(5), None);

        assert_eq!(table.bind(5, PhysAddr::new(0, 0)), None);
        assert!(table.is_valid(PhysAddr::new(0, 0)));
        assert_eq!(table.valid_pages(0), 1);

        let old = table.bind(5, PhysAddr::new(2, 1));
        assert_eq!(old, Some(PhysAddr::new(0, 0)));
        assert!(!table.is_valid(PhysAddr::new(0, 0)));
        assert_eq!(table.valid_pages(0), 0);
        assert_eq!(table.invalid_or_clean(0), 2);
        assert_eq!(table.resolve(5), Some(PhysAddr::new(2, 1)));
        assert_eq!(table.valid_total(), 1);
    }

    #[test]
    fn erase_clears_block_validity() {
        let mut table = MappingTable::new(8, 4, 2);
        table.bind(0, PhysAddr::new(1, 0));
        table.bind(1, PhysAddr::new(1, 1));
        table.bind(0, PhysAddr::new(2, 0));
        table.bind(1, PhysAddr::new(2, 1));

        table.erase_block(1);
        assert_eq!(table.valid_pages(1), 0);
        assert_eq!(table.mapped().collect::<Vec<_>>(), vec![(0, PhysAddr::new(2, 0)), (1, PhysAddr::new(2, 1))]);
    }
}
