use crate::config::Addr;

/// Second-chance (clock) cache of recently written logical addresses.
///
/// An address present in the cache is considered hot. Misclassification only
/// costs extra relocations, never correctness.
#[derive(Debug, Clone)]
pub struct HotColdCache {
    slots: Vec<Option<Addr>>,
    chance: Vec<bool>,
    hand: usize,
}

impl HotColdCache {
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0, "classifier needs at least one slot");
        HotColdCache {
            slots: vec![None; capacity],
            chance: vec![false; capacity],
            hand: 0,
        }
    }

    pub fn is_hot(&self, logical: Addr) -> bool {
        self.find(logical).is_some()
    }

    /// Note a write to `logical`. A cached address gets its second chance
    /// back; otherwise the hand sweeps forward, clearing chances, until it
    /// finds a slot to take over.
    pub fn record(&mut self, logical: Addr) {
        if let Some(slot) = self.find(logical) {
            self.chance[slot] = true;
            return;
        }

        loop {
            let slot = self.hand;
            self.hand = (self.hand + 1) % self.slots.len();
            if self.chance[slot] {
                self.chance[slot] = false;
            } else {
                self.slots[slot] = Some(logical);
                return;
            }
        }
    }

    pub fn clear(&mut self) {
        self.slots.fill(None);
        self.chance.fill(false);
        self.hand = 0;
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    fn find(&self, logical: Addr) -> Option<usize> {
        self.slots.iter().position(|&slot| slot == Some(logical))
    }
}
