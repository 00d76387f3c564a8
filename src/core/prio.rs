//! Priority bitmap for O(1) highest-ready lookup
//!
//! One bit per priority level, most significant bit first, so the highest
//! ready priority is the leading-zero count of the first non-empty word.

use crate::config::CFG_PRIO_MAX;
use crate::types::OsPrio;

const PRIO_TBL_SIZE: usize = CFG_PRIO_MAX.div_ceil(32);

/// Priority bitmap table
///
/// Bit 31 of word 0 is priority 0 (highest). A set bit means at least one
/// ready task exists at that priority.
pub struct PrioTable {
    bitmap: [u32; PRIO_TBL_SIZE],
}

impl PrioTable {
    pub const fn new() -> Self {
        PrioTable {
            bitmap: [0; PRIO_TBL_SIZE],
        }
    }

    pub fn clear(&mut self) {
        self.bitmap = [0; PRIO_TBL_SIZE];
    }

    #[inline]
    fn locate(prio: OsPrio) -> (usize, u32) {
        debug_assert!((prio as usize) < CFG_PRIO_MAX);
        ((prio / 32) as usize, 1 << (31 - (prio % 32)))
    }

    #[inline]
    pub fn insert(&mut self, prio: OsPrio) {
        let (word, mask) = Self::locate(prio);
        self.bitmap[word] |= mask;
    }

    #[inline]
    pub fn remove(&mut self, prio: OsPrio) {
        let (word, mask) = Self::locate(prio);
        self.bitmap[word] &= !mask;
    }

    /// Highest ready priority, or the lowest priority when the table is empty.
    #[inline]
    pub fn get_highest(&self) -> OsPrio {
        self.bitmap
            .iter()
            .enumerate()
            .find(|(_, word)| **word != 0)
            .map(|(idx, word)| (idx * 32) as OsPrio + word.leading_zeros() as OsPrio)
            .unwrap_or((CFG_PRIO_MAX - 1) as OsPrio)
    }

    #[inline]
    pub fn is_set(&self, prio: OsPrio) -> bool {
        let (word, mask) = Self::locate(prio);
        self.bitmap[word] & mask != 0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bitmap.iter().all(|&w| w == 0)
    }
}

impl Default for PrioTable {
    fn default() -> Self {
        Self::new()
    }
}
