use log::{debug, error, info, trace};

use crate::config::{Addr, BlockId, Config, Counter, PageId};
use crate::device::FlashDevice;
use crate::error::{Error, Result};
use crate::hotcold::HotColdCache;
use crate::mapping::{LogicalAddr, MappingTable, PhysAddr};
use crate::wear::WearIndex;

/// Write stream. Hot data fills blocks from the low (less worn) half of the
/// erase-count order, cold data from the high half.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Hot,
    Cold,
}

/// Active block of a stream: a position in the erase-count order, not a block
/// id, plus the next page to program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub position: usize,
    pub page: PageId,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub host_writes: Counter,
    pub relocations: Counter,
    pub erases: Counter,
    pub gc_passes: Counter,
    pub migrations: Counter,
}

impl Stats {
    pub fn write_amplification(&self) -> f64 {
        if self.host_writes == 0 {
            return 1.0;
        }
        (self.host_writes + self.relocations) as f64 / self.host_writes as f64
    }
}

pub struct Ftl<D> {
    pub(crate) config: Config,
    pub(crate) device: D,
    pub(crate) table: MappingTable,
    pub(crate) wear: WearIndex,
    // indexed by block id
    pub(crate) clean: Vec<bool>,
    pub(crate) clean_blocks: Counter,
    pub(crate) low: Cursor,
    pub(crate) high: Cursor,
    pub(crate) cache: HotColdCache,
    pub(crate) stats: Stats,
    halted: bool,
}

impl<D: FlashDevice> Ftl<D> {
    pub fn new(config: Config, device: D) -> Result<Self> {
        config.validate()?;

        let mut out = Ftl {
            table: MappingTable::new(config.logical_pages(), config.physical_block_count, config.page_count_per_block),
            wear: WearIndex::new(config.physical_block_count, config.max_erase_count),
            clean: vec![true; config.physical_block_count],
            clean_blocks: config.physical_block_count,
            low: Cursor { position: 0, page: 0 },
            high: Cursor { position: config.half(), page: 0 },
            cache: HotColdCache::new(config.classifier_capacity),
            stats: Stats::default(),
            halted: true,
            config,
            device,
        };
        out.initialize()?;

        Ok(out)
    }

    /// Erase the whole device and forget every mapping, wear count and
    /// classification. Each half of the order gives up its first block as
    /// the initial active block of its stream.
    pub fn initialize(&mut self) -> Result<()> {
        self.halted = true;
        let blocks = self.config.physical_block_count;
        for block in 0..blocks {
            self.device.erase_block(block)?;
        }

        self.table = MappingTable::new(self.config.logical_pages(), blocks, self.config.page_count_per_block);
        self.wear = WearIndex::new(blocks, self.config.max_erase_count);
        self.clean = vec![true; blocks];
        self.low = Cursor { position: 0, page: 0 };
        self.high = Cursor { position: self.config.half(), page: 0 };
        self.clean[self.wear.block_at(self.low.position)] = false;
        self.clean[self.wear.block_at(self.high.position)] = false;
        self.clean_blocks = blocks - 2;
        self.cache.clear();
        self.stats = Stats::default();
        self.halted = false;

        info!(
            "FTL initialized: {} physical blocks, {} logical blocks, {} pages per block, {} clean",
            blocks, self.config.logical_block_count, self.config.page_count_per_block, self.clean_blocks
        );
        Ok(())
    }

    pub fn write(&mut self, data: &[u8], block: BlockId, page: PageId) -> Result<()> {
        let logical = self.check_logical(block, page)?;
        if data.len() != self.config.page_size {
            return Err(Error::PayloadSize { expected: self.config.page_size, actual: data.len() });
        }
        if self.halted {
            return Err(Error::Halted);
        }

        let result = self.write_logical(data, logical);
        self.guard(result)
    }

    pub fn read(&self, block: BlockId, page: PageId) -> Result<Vec<u8>> {
        let logical = self.check_logical(block, page)?;
        if self.halted {
            return Err(Error::Halted);
        }

        let addr = self.table.resolve(logical).ok_or(Error::UnmappedAddress { block, page })?;
        if !self.table.is_valid(addr) {
            return Err(Error::InvariantViolation("mapped page is not valid"));
        }
        Ok(self.device.read_page(addr)?)
    }

    /// Physical page currently holding a logical page.
    pub fn resolve(&self, block: BlockId, page: PageId) -> Result<Option<PhysAddr>> {
        let logical = self.check_logical(block, page)?;
        Ok(self.table.resolve(logical))
    }

    fn write_logical(&mut self, data: &[u8], logical: Addr) -> Result<()> {
        let stream = if self.cache.is_hot(logical) { Stream::Hot } else { Stream::Cold };
        self.cache.record(logical);

        self.program(stream, logical, data)?;
        self.stats.host_writes += 1;

        if self.clean_blocks < self.config.min_clean_block_margin {
            self.collect()?;
        }
        Ok(())
    }

    fn guard<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.is_fatal() {
                error!("FTL halted: {}", err);
                self.halted = true;
            }
        }
        result
    }

    fn check_logical(&self, block: BlockId, page: PageId) -> Result<Addr> {
        if block >= self.config.logical_block_count || page >= self.config.page_count_per_block {
            return Err(Error::AddressOutOfRange { block, page });
        }
        Ok(LogicalAddr::new(block, page).index(self.config.page_count_per_block))
    }

    /// Program `data` for `logical` on the next page of `stream` and move the
    /// mapping there. Never triggers garbage collection.
    pub(crate) fn program(&mut self, stream: Stream, logical: Addr, data: &[u8]) -> Result<PhysAddr> {
        let addr = self.allocate_page(stream)?;
        self.device.write_page(addr, data)?;
        self.device.write_oob(addr, logical)?;

        if let Some(old) = self.table.bind(logical, addr) {
            trace!("lpa {} {:?} -> {:?} ({:?})", logical, old, addr, stream);
        } else {
            trace!("lpa {} -> {:?} ({:?})", logical, addr, stream);
        }
        Ok(addr)
    }

    /// Hand out the next page of a stream's active block. Filling the block
    /// immediately opens a new one, so a cursor always has a free page.
    pub(crate) fn allocate_page(&mut self, stream: Stream) -> Result<PhysAddr> {
        let cursor = *self.cursor(stream);
        let addr = PhysAddr::new(self.wear.block_at(cursor.position), cursor.page);

        if cursor.page + 1 < self.config.page_count_per_block {
            self.cursor_mut(stream).page += 1;
        } else {
            let position = self.acquire_clean_block(stream)?;
            *self.cursor_mut(stream) = Cursor { position, page: 0 };
        }
        Ok(addr)
    }

    /// First clean block in the stream's own half of the order, then in the
    /// other half.
    fn acquire_clean_block(&mut self, stream: Stream) -> Result<usize> {
        let half = self.config.half();
        let blocks = self.config.physical_block_count;
        let (own, other) = match stream {
            Stream::Hot => (0..half, half..blocks),
            Stream::Cold => (half..blocks, 0..half),
        };

        let position = own
            .chain(other)
            .find(|&position| self.clean[self.wear.block_at(position)])
            .ok_or(Error::InvariantViolation("no clean block left for allocation"))?;

        let block = self.wear.block_at(position);
        self.clean[block] = false;
        self.clean_blocks -= 1;

        debug!(
            "{:?} stream opens block {} (position {}, erase count {}), {} clean left",
            stream,
            block,
            position,
            self.wear.erase_count_of(position),
            self.clean_blocks
        );
        Ok(position)
    }

    /// Move a stream onto a fresh clean block. The block it leaves becomes an
    /// ordinary written block; its position is returned.
    pub(crate) fn retire_active(&mut self, stream: Stream) -> Result<usize> {
        let old = self.cursor(stream).position;
        let position = self.acquire_clean_block(stream)?;
        *self.cursor_mut(stream) = Cursor { position, page: 0 };
        Ok(old)
    }

    pub(crate) fn cursor(&self, stream: Stream) -> &Cursor {
        match stream {
            Stream::Hot => &self.low,
            Stream::Cold => &self.high,
        }
    }

    fn cursor_mut(&mut self, stream: Stream) -> &mut Cursor {
        match stream {
            Stream::Hot => &mut self.low,
            Stream::Cold => &mut self.high,
        }
    }

    pub(crate) fn is_active(&self, position: usize) -> bool {
        position == self.low.position || position == self.high.position
    }

    pub fn active_block(&self, stream: Stream) -> BlockId {
        self.wear.block_at(self.cursor(stream).position)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn clean_blocks(&self) -> Counter {
        self.clean_blocks
    }

    pub fn is_clean(&self, block: BlockId) -> bool {
        self.clean[block]
    }

    pub fn is_valid(&self, addr: PhysAddr) -> bool {
        self.table.is_valid(addr)
    }

    pub fn erase_count(&self, block: BlockId) -> u32 {
        self.wear.erase_count(block)
    }

    pub fn min_wear(&self) -> Option<u32> {
        self.wear.min_wear()
    }

    pub fn max_wear(&self) -> Option<u32> {
        self.wear.max_wear()
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Cross-check every structural invariant against each other and the
    /// device's spare areas.
    pub fn verify(&self) -> Result<()> {
        self.wear.verify()?;

        let mut mapped = 0;
        for (logical, addr) in self.table.mapped() {
            if !self.table.is_valid(addr) {
                return Err(Error::InvariantViolation("mapping points at an invalid page"));
            }
            if self.device.read_oob(addr)? != logical {
                return Err(Error::InvariantViolation("spare area disagrees with mapping"));
            }
            mapped += 1;
        }
        // Every valid page is owned by exactly one logical page.
        if mapped != self.table.valid_total() {
            return Err(Error::InvariantViolation("valid pages without an owner"));
        }

        let clean = self.clean.iter().filter(|&&clean| clean).count();
        if clean != self.clean_blocks {
            return Err(Error::InvariantViolation("clean counter out of sync"));
        }
        if self.clean.iter().enumerate().any(|(block, &clean)| clean && self.table.valid_pages(block) > 0) {
            return Err(Error::InvariantViolation("clean block holds valid pages"));
        }

        for cursor in [self.low, self.high] {
            if self.clean[self.wear.block_at(cursor.position)] || cursor.page >= self.config.page_count_per_block {
                return Err(Error::InvariantViolation("active cursor on a clean block"));
            }
        }
        if self.low.position == self.high.position {
            return Err(Error::InvariantViolation("streams share an active block"));
        }
        Ok(())
    }
}
