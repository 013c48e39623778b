//! Garbage collection and wear leveling.

use log::{debug, info, trace};

use crate::config::{BlockId, Counter};
use crate::device::FlashDevice;
use crate::error::{Error, Result};
use crate::ftl::{Ftl, Stream};
use crate::mapping::{LogicalAddr, PhysAddr};

impl<D: FlashDevice> Ftl<D> {
    /// Reclaim blocks until the clean margin is restored, then run the
    /// wear-leveling check if this pass is due for one.
    pub(crate) fn collect(&mut self) -> Result<()> {
        self.stats.gc_passes += 1;
        debug!("gc pass {}: {} clean blocks", self.stats.gc_passes, self.clean_blocks);

        self.restore_margin()?;

        if self.stats.gc_passes % self.config.migration_cadence == 0 {
            self.level_wear()?;
        }
        Ok(())
    }

    fn restore_margin(&mut self) -> Result<()> {
        while self.clean_blocks < self.config.min_clean_block_margin {
            let victim = self
                .select_victim()
                .ok_or(Error::InvariantViolation("no victim block for garbage collection"))?;
            self.reclaim(victim)?;
        }
        Ok(())
    }

    /// Position of the non-active, non-clean block with the most invalid or
    /// unwritten pages. Ties go to the lowest position.
    pub(crate) fn select_victim(&self) -> Option<usize> {
        let mut best: Option<(usize, Counter)> = None;

        for position in 0..self.wear.len() {
            let block = self.wear.block_at(position);
            if self.is_active(position) || self.clean[block] {
                continue;
            }
            let reclaimable = self.table.invalid_or_clean(block);
            if best.map_or(true, |(_, most)| reclaimable > most) {
                best = Some((position, reclaimable));
            }
        }

        best.map(|(position, _)| position)
    }

    /// Move every valid page of the block at `position` to the cold stream,
    /// then erase it.
    pub(crate) fn reclaim(&mut self, position: usize) -> Result<()> {
        if self.is_active(position) {
            return Err(Error::InvariantViolation("reclaiming an active block"));
        }
        let block = self.wear.block_at(position);
        let mut moved = 0;

        for page in 0..self.config.page_count_per_block {
            let from = PhysAddr::new(block, page);
            if !self.table.is_valid(from) {
                continue;
            }
            let logical = self.device.read_oob(from)?;
            if self.table.resolve(logical) != Some(from) {
                return Err(Error::InvariantViolation("spare area disagrees with mapping"));
            }
            let data = self.device.read_page(from)?;
            // Skips the classifier: surviving data is cold, and a single
            // stream keeps one reclaim to at most one newly opened block.
            let to = self.program(Stream::Cold, logical, &data)?;
            trace!(
                "relocated {:?} {:?} -> {:?}",
                LogicalAddr::from_index(logical, self.config.page_count_per_block),
                from,
                to
            );
            moved += 1;
        }
        self.stats.relocations += moved;

        if self.table.valid_pages(block) != 0 {
            return Err(Error::InvariantViolation("victim still holds valid pages"));
        }
        debug!("reclaiming block {}: {} pages relocated", block, moved);
        self.erase(block)
    }

    fn erase(&mut self, block: BlockId) -> Result<()> {
        self.device.erase_block(block)?;
        self.table.erase_block(block);
        if !self.clean[block] {
            self.clean[block] = true;
            self.clean_blocks += 1;
        }

        let position = self.wear.position_of(block);
        let Self { wear, low, high, .. } = self;
        let count = wear.bump(position, &mut [&mut low.position, &mut high.position])?;
        self.stats.erases += 1;

        debug!("erased block {} (erase count {}), {} clean", block, count, self.clean_blocks);
        Ok(())
    }

    /// If the best reclaim candidate has drifted more than `tau` erases past
    /// the least worn block, push the least worn blocks back into rotation.
    pub(crate) fn level_wear(&mut self) -> Result<()> {
        let (Some(candidate), Some(min)) = (self.select_victim(), self.wear.min_wear()) else {
            return Ok(());
        };
        let worn = self.wear.erase_count_of(candidate);
        if worn <= min + self.config.tau {
            return Ok(());
        }

        info!(
            "wear skew: block {} erased {} times, min wear {}, tau {}",
            self.wear.block_at(candidate),
            worn,
            min,
            self.config.tau
        );
        self.stats.migrations += 1;
        self.rebalance()
    }

    /// Raise the minimum wear bucket by bucket until the skew is back within
    /// `tau`. Every round empties the least worn bucket, so the minimum rises
    /// each time.
    pub(crate) fn rebalance(&mut self) -> Result<()> {
        while let (Some(min), Some(max)) = (self.wear.min_wear(), self.wear.max_wear()) {
            if max - min <= self.config.tau {
                break;
            }
            self.restore_margin()?;
            self.migrate_coldest(min)?;
            self.restore_margin()?;

            if matches!(self.wear.min_wear(), Some(now) if now <= min) {
                return Err(Error::InvariantViolation("migration left the least worn bucket in place"));
            }
        }
        info!("wear leveling done: min {:?}, max {:?}", self.wear.min_wear(), self.wear.max_wear());
        Ok(())
    }

    /// Erase every block erased exactly `count` times. Needs two clean blocks
    /// on entry.
    ///
    /// Clean members go first so that no block opened afterwards comes from
    /// this bucket. An active block in the bucket is retired onto a fresh
    /// block and reclaimed like any written block. The cold stream retires
    /// first: its pages fit the fresh cold block, which leaves two clean
    /// blocks for the hot stream's retirement.
    pub(crate) fn migrate_coldest(&mut self, count: u32) -> Result<()> {
        let (clean, written): (Vec<BlockId>, Vec<BlockId>) =
            self.wear.blocks_with(count).iter().copied().partition(|&block| self.clean[block]);
        debug!("migrating {} clean and {} written blocks at erase count {}", clean.len(), written.len(), count);

        for block in clean {
            self.migrate_block(block, count)?;
        }
        for stream in [Stream::Cold, Stream::Hot] {
            if self.wear.erase_count_of(self.cursor(stream).position) == count {
                let position = self.retire_active(stream)?;
                debug!("{:?} stream retires block {}", stream, self.wear.block_at(position));
                self.reclaim(position)?;
            }
        }
        for block in written {
            self.migrate_block(block, count)?;
        }
        Ok(())
    }

    fn migrate_block(&mut self, block: BlockId, count: u32) -> Result<()> {
        let position = self.wear.position_of(block);
        if self.is_active(position) || self.wear.erase_count_of(position) != count {
            return Ok(());
        }
        self.reclaim(position)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rand::prelude::*;
    use simplelog::{Config as LogConfig, LevelFilter, TestLogger};

    use crate::config::Config;
    use crate::device::MemDevice;
    use crate::ftl::{Ftl, Stream};

    fn build(config: Config) -> Ftl<MemDevice> {
        let _ = TestLogger::init(LevelFilter::Debug, LogConfig::default());
        let device = MemDevice::for_config(&config);
        Ftl::new(config, device).unwrap()
    }

    #[test]
    fn victim_has_most_reclaimable_pages() {
        let config = Config::tiny(8, 2, 4);
        let mut ftl = build(config.clone());
        let data = vec![1; config.page_size];

        // Fill one cold block with logical block 0, a second with block 1.
        for block in 0..2 {
            for p in 0..4 {
                ftl.write(&data, block, p).unwrap();
            }
        }
        let first = ftl.resolve(0, 0).unwrap().unwrap().block;
        let second = ftl.resolve(1, 0).unwrap().unwrap().block;
        assert_ne!(first, second);

        // Rewriting block 1 invalidates the whole second block.
        for p in 0..4 {
            ftl.write(&data, 1, p).unwrap();
        }
        let victim = ftl.select_victim().unwrap();
        assert_eq!(ftl.wear.block_at(victim), second);
    }

    #[test]
    fn ties_go_to_lowest_position() {
        let config = Config::tiny(8, 2, 4);
        let mut ftl = build(config.clone());
        let data = vec![1; config.page_size];
        for block in 0..2 {
            for p in 0..4 {
                ftl.write(&data, block, p).unwrap();
            }
        }
        // Both full blocks hold four valid pages.
        let victim = ftl.select_victim().unwrap();
        let candidates: Vec<usize> = (0..8)
            .filter(|&pos| !ftl.is_active(pos) && !ftl.clean[ftl.wear.block_at(pos)])
            .collect();
        assert_eq!(candidates.len(), 2);
        assert_eq!(victim, candidates[0]);
    }

    #[test]
    fn reclaim_relocates_and_erases() {
        let config = Config::tiny(8, 2, 4);
        let mut ftl = build(config.clone());
        for p in 0..4 {
            ftl.write(&vec![p as u8; config.page_size], 0, p).unwrap();
        }
        let block = ftl.resolve(0, 0).unwrap().unwrap().block;
        let position = ftl.wear.position_of(block);
        let clean_before = ftl.clean_blocks();

        ftl.reclaim(position).unwrap();

        assert!(ftl.is_clean(block));
        assert_eq!(ftl.erase_count(block), 1);
        assert_eq!(ftl.stats().relocations, 4);
        // Four relocated pages filled one more block and opened another.
        assert_eq!(ftl.clean_blocks(), clean_before);
        for p in 0..4 {
            assert_eq!(ftl.read(0, p).unwrap(), vec![p as u8; config.page_size]);
            assert_ne!(ftl.resolve(0, p).unwrap().unwrap().block, block);
        }
        ftl.verify().unwrap();
    }

    #[test]
    fn tiny_device_repeated_collection() {
        let config = Config::tiny(5, 1, 2);
        let mut ftl = build(config.clone());
        let mut expected = HashMap::new();

        for i in 0..400u32 {
            let before: Vec<u32> = (0..5).map(|b| ftl.erase_count(b)).collect();
            let device_before: Vec<usize> = (0..5).map(|b| ftl.device().erase_count(b)).collect();

            let p = (i % 2) as usize;
            let data = vec![i as u8; config.page_size];
            ftl.write(&data, 0, p).unwrap();
            expected.insert(p, data);

            assert!(ftl.clean_blocks() >= 2);
            ftl.verify().unwrap();
            for b in 0..5 {
                let erased = ftl.device().erase_count(b) - device_before[b];
                assert_eq!(ftl.erase_count(b), before[b] + erased as u32);
            }
            for (p, data) in &expected {
                assert_eq!(&ftl.read(0, *p).unwrap(), data);
            }
        }
        assert!(ftl.stats().gc_passes > 10);
    }

    #[test]
    fn rebalance_restores_wear_bound() {
        let mut config = Config::tiny(8, 2, 4);
        config.tau = 1;
        let mut ftl = build(config.clone());
        let data = vec![2; config.page_size];
        ftl.write(&data, 0, 0).unwrap();

        // Pretend both active blocks and one clean block are worn out.
        let spare = (0..8).find(|&pos| !ftl.is_active(pos)).unwrap();
        let worn = [
            ftl.active_block(Stream::Hot),
            ftl.active_block(Stream::Cold),
            ftl.wear.block_at(spare),
        ];
        for block in worn {
            for _ in 0..3 {
                let position = ftl.wear.position_of(block);
                let crate::ftl::Ftl { wear, low, high, .. } = &mut ftl;
                wear.bump(position, &mut [&mut low.position, &mut high.position]).unwrap();
            }
        }
        assert_eq!(ftl.min_wear(), Some(0));
        assert_eq!(ftl.max_wear(), Some(3));

        ftl.rebalance().unwrap();

        let (min, max) = (ftl.min_wear().unwrap(), ftl.max_wear().unwrap());
        assert!(max - min <= config.tau, "min {} max {}", min, max);
        assert_eq!(min, 2);
        assert_eq!(ftl.read(0, 0).unwrap(), data);
        ftl.verify().unwrap();
    }

    #[test]
    fn rebalance_retires_active_blocks_at_min_wear() {
        let mut config = Config::tiny(8, 2, 4);
        config.tau = 1;
        let mut ftl = build(config.clone());
        let data = vec![4; config.page_size];
        ftl.write(&data, 0, 0).unwrap();

        // Only the two active blocks are left at the bottom of the order.
        let actives = [ftl.active_block(Stream::Hot), ftl.active_block(Stream::Cold)];
        for block in 0..8 {
            if actives.contains(&block) {
                continue;
            }
            for _ in 0..3 {
                let position = ftl.wear.position_of(block);
                let crate::ftl::Ftl { wear, low, high, .. } = &mut ftl;
                wear.bump(position, &mut [&mut low.position, &mut high.position]).unwrap();
            }
        }
        assert_eq!(ftl.min_wear(), Some(0));
        assert_eq!(ftl.max_wear(), Some(3));

        ftl.rebalance().unwrap();

        let (min, max) = (ftl.min_wear().unwrap(), ftl.max_wear().unwrap());
        assert!(max - min <= config.tau, "min {} max {}", min, max);
        for block in actives {
            assert_ne!(ftl.active_block(Stream::Hot), block);
            assert_ne!(ftl.active_block(Stream::Cold), block);
            assert!(ftl.is_clean(block));
        }
        assert_eq!(ftl.read(0, 0).unwrap(), data);
        assert_eq!(ftl.clean_blocks(), 6);
        ftl.verify().unwrap();
    }

    #[test]
    fn skewed_workload_triggers_migration() {
        let mut config = Config::tiny(10, 4, 4);
        config.tau = 2;
        config.migration_cadence = 1;
        config.max_erase_count = 10_000;
        let mut ftl = build(config.clone());
        let mut rng = SmallRng::seed_from_u64(7);
        let mut shadow = HashMap::new();

        for block in 0..4 {
            for p in 0..4 {
                let data = vec![0; config.page_size];
                ftl.write(&data, block, p).unwrap();
                shadow.insert((block, p), data);
            }
        }
        for i in 0..3000u32 {
            let (block, p) = if rng.gen_bool(0.9) { (0, rng.gen_range(0..2)) } else { (rng.gen_range(0..4), rng.gen_range(0..4)) };
            let data = vec![i as u8; config.page_size];
            let migrations = ftl.stats().migrations;
            ftl.write(&data, block, p).unwrap();
            shadow.insert((block, p), data);
            assert!(ftl.clean_blocks() >= config.min_clean_block_margin);

            if ftl.stats().migrations > migrations {
                let (min, max) = (ftl.min_wear().unwrap(), ftl.max_wear().unwrap());
                assert!(max - min <= config.tau, "write {}: min {} max {}", i, min, max);
            }
        }

        assert!(ftl.stats().migrations > 0);
        ftl.verify().unwrap();
        for ((block, p), data) in &shadow {
            assert_eq!(&ftl.read(*block, *p).unwrap(), data);
        }
    }
}
