// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Two-level data cache metadata.
//!
//! The cache here tracks *occupancy and recency* of 64-byte physical cache
//! lines; it never shadows actual byte contents (every read or write still
//! goes through the physical memory array in [`crate::mmu::Mmu`]). This
//! mirrors the reference kernel's habit of tracking page/line *state*
//! (`kernel/vm/pmm.rs`'s `VmPageState`, `lastAccess`-style bookkeeping)
//! independent from the data store.

use std::collections::HashMap;

/// Cache line size in bytes.
pub const LINE_SIZE: u32 = 64;

/// Per-line cache metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEntry {
    pub valid: bool,
    pub dirty: bool,
    pub last_access: u64,
}

/// A single cache level: a capacity-bounded map from line address to
/// [`CacheEntry`], evicting the least-recently-used line when full.
#[derive(Debug)]
pub struct CacheLevel {
    capacity: usize,
    lines: HashMap<u32, CacheEntry>,
    clock: u64,
}

impl CacheLevel {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            lines: HashMap::new(),
            clock: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    pub fn get_refresh(&mut self, line: u32) -> Option<&CacheEntry> {
        let now = self.tick();
        if let Some(entry) = self.lines.get_mut(&line) {
            entry.last_access = now;
            return Some(&*entry);
        }
        None
    }

    /// Remove a line (used when promoting it to a higher cache level).
    pub fn take(&mut self, line: u32) -> Option<CacheEntry> {
        self.lines.remove(&line)
    }

    /// Insert a fresh or promoted line, evicting the LRU line if this
    /// would exceed capacity.
    pub fn insert(&mut self, line: u32, mut entry: CacheEntry) {
        entry.last_access = self.tick();
        if !self.lines.contains_key(&line) && self.lines.len() >= self.capacity {
            if let Some((&victim, _)) = self
                .lines
                .iter()
                .min_by_key(|(_, e)| e.last_access)
            {
                self.lines.remove(&victim);
            }
        }
        self.lines.insert(line, entry);
    }

    pub fn invalidate(&mut self, line: u32) -> Option<CacheEntry> {
        self.lines.remove(&line)
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.clock = 0;
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Round a physical address down to its containing 64-byte cache line.
pub fn line_of(paddr: u32) -> u32 {
    (paddr / LINE_SIZE) * LINE_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_of_aligns_down() {
        assert_eq!(line_of(0), 0);
        assert_eq!(line_of(63), 0);
        assert_eq!(line_of(64), 64);
        assert_eq!(line_of(200), 192);
    }

    #[test]
    fn lru_eviction_drops_least_recently_used() {
        let mut level = CacheLevel::new(2);
        level.insert(0, CacheEntry { valid: true, dirty: false, last_access: 0 });
        level.insert(64, CacheEntry { valid: true, dirty: false, last_access: 0 });
        // Touch line 0 so line 64 becomes the LRU victim.
        level.get_refresh(0);
        level.insert(128, CacheEntry { valid: true, dirty: false, last_access: 0 });
        assert!(level.get_refresh(0).is_some());
        assert!(level.get_refresh(64).is_none());
        assert!(level.get_refresh(128).is_some());
        assert_eq!(level.len(), 2);
    }

    #[test]
    fn invalidate_removes_a_line_regardless_of_recency() {
        let mut level = CacheLevel::new(4);
        level.insert(0, CacheEntry { valid: true, dirty: false, last_access: 0 });
        assert!(level.invalidate(0).is_some());
        assert!(level.get_refresh(0).is_none());
    }
}
