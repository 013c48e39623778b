use byte_unit::Byte;
use log::info;

use crate::error::{Error, Result};

pub type BaseType = usize;

pub type Addr = BaseType;
pub type PageId = BaseType;
pub type BlockId = BaseType;
pub type Counter = BaseType;

pub const PHYSICAL_BLOCKS: BaseType = 150;
pub const LOGICAL_BLOCKS: BaseType = 100;
pub const PAGES_PER_BLOCK: BaseType = 100;

pub const PAGE_SIZE: BaseType = 512;

pub const CLASSIFIER_CAPACITY: BaseType = 100;

pub const MAX_ERASE_COUNT: u32 = 1000;
pub const TAU: u32 = 20;
pub const MIGRATION_CADENCE: Counter = 100;

pub const MIN_CLEAN_BLOCKS: Counter = 2;

/// Geometry and tuning knobs of one FTL instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub physical_block_count: BaseType,
    pub logical_block_count: BaseType,
    pub page_count_per_block: BaseType,
    pub page_size: BaseType,
    pub classifier_capacity: BaseType,
    /// Width of the erase-count index; a block erased this many times can no
    /// longer be tracked.
    pub max_erase_count: u32,
    /// Maximum tolerated distance between the most and least worn blocks.
    pub tau: u32,
    /// Collector passes between two wear-leveling checks.
    pub migration_cadence: Counter,
    pub min_clean_block_margin: Counter,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            physical_block_count: PHYSICAL_BLOCKS,
            logical_block_count: LOGICAL_BLOCKS,
            page_count_per_block: PAGES_PER_BLOCK,
            page_size: PAGE_SIZE,
            classifier_capacity: CLASSIFIER_CAPACITY,
            max_erase_count: MAX_ERASE_COUNT,
            tau: TAU,
            migration_cadence: MIGRATION_CADENCE,
            min_clean_block_margin: MIN_CLEAN_BLOCKS,
        }
    }
}

impl Config {
    /// Small geometry used by tests.
    #[cfg(test)]
    pub(crate) fn tiny(physical_block_count: BaseType, logical_block_count: BaseType, pages: BaseType) -> Self {
        Config {
            physical_block_count,
            logical_block_count,
            page_count_per_block: pages,
            page_size: 8,
            classifier_capacity: 4,
            ..Config::default()
        }
    }

    pub fn physical_pages(&self) -> Counter {
        self.physical_block_count * self.page_count_per_block
    }

    pub fn logical_pages(&self) -> Counter {
        self.logical_block_count * self.page_count_per_block
    }

    /// Start of the high (cold) half of the erase-count order.
    pub fn half(&self) -> BaseType {
        self.physical_block_count / 2
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_count_per_block == 0 || self.page_size == 0 {
            return Err(Error::Config("pages per block and page size must be non-zero"));
        }
        if self.logical_block_count == 0 {
            return Err(Error::Config("logical block count must be non-zero"));
        }
        if self.classifier_capacity == 0 {
            return Err(Error::Config("classifier capacity must be non-zero"));
        }
        if self.migration_cadence == 0 {
            return Err(Error::Config("migration cadence must be non-zero"));
        }
        // One clean block is kept back for the collector's own relocations.
        if self.min_clean_block_margin < 2 {
            return Err(Error::Config("clean block margin must be at least 2"));
        }
        // Two active blocks, the margin and at least one block of slack so
        // that a victim with an invalid page always exists.
        if self.physical_block_count < self.logical_block_count + self.min_clean_block_margin + 2 {
            return Err(Error::Config("not enough over-provisioned physical blocks"));
        }
        if self.tau >= self.max_erase_count {
            return Err(Error::Config("tau must be below the erase-count range"));
        }
        Ok(())
    }

    pub fn log_capacity(&self) {
        let physical = self.physical_pages() * self.page_size;
        let user = self.logical_pages() * self.page_size;

        info!("Physical Capacity: {} bytes, {}", physical, Byte::from(physical).get_appropriate_unit(true).to_string());
        info!("User Capacity: {} bytes, {}", user, Byte::from(user).get_appropriate_unit(true).to_string());
        info!(
            "Over-provisioning: {} blocks, tau {}, margin {}",
            self.physical_block_count - self.logical_block_count,
            self.tau,
            self.min_clean_block_margin
        );
    }
}
