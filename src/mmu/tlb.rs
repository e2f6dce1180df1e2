// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Translation Lookaside Buffer: a small, fully-associative,
//! FIFO-evicted cache of page-number to frame-number mappings.

use std::collections::HashMap;
use std::collections::VecDeque;

/// Maximum number of resident TLB entries.
pub const TLB_CAPACITY: usize = 64;

/// FIFO-eviction TLB: when a new entry is inserted past capacity, the
/// oldest *insertion* is evicted, not the least-recently-used one.
#[derive(Debug, Default)]
pub struct Tlb {
    map: HashMap<u32, u32>,
    order: VecDeque<u32>,
}

impl Tlb {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn lookup(&self, page_number: u32) -> Option<u32> {
        self.map.get(&page_number).copied()
    }

    /// Insert a mapping, evicting the oldest insertion if the TLB is now
    /// over capacity.
    pub fn insert(&mut self, page_number: u32, frame_number: u32) {
        if self.map.insert(page_number, frame_number).is_none() {
            self.order.push_back(page_number);
        }
        while self.order.len() > TLB_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.map.remove(&oldest);
            }
        }
    }

    /// Remove a stale mapping, e.g. when its page directory entry is
    /// unmapped by the replacement policy.
    pub fn invalidate(&mut self, page_number: u32) {
        if self.map.remove(&page_number).is_some() {
            self.order.retain(|&p| p != page_number);
        }
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_hits_after_insert() {
        let mut tlb = Tlb::new();
        tlb.insert(3, 9);
        assert_eq!(tlb.lookup(3), Some(9));
        assert_eq!(tlb.lookup(4), None);
    }

    #[test]
    fn fifo_eviction_drops_oldest_insertion() {
        let mut tlb = Tlb::new();
        for page in 0..TLB_CAPACITY as u32 {
            tlb.insert(page, page);
        }
        assert_eq!(tlb.len(), TLB_CAPACITY);
        // One more insertion evicts page 0, the oldest.
        tlb.insert(TLB_CAPACITY as u32, TLB_CAPACITY as u32);
        assert_eq!(tlb.len(), TLB_CAPACITY);
        assert_eq!(tlb.lookup(0), None);
        assert_eq!(tlb.lookup(1), Some(1));
        assert_eq!(tlb.lookup(TLB_CAPACITY as u32), Some(TLB_CAPACITY as u32));
    }

    #[test]
    fn invalidate_removes_single_entry() {
        let mut tlb = Tlb::new();
        tlb.insert(1, 1);
        tlb.insert(2, 2);
        tlb.invalidate(1);
        assert_eq!(tlb.lookup(1), None);
        assert_eq!(tlb.lookup(2), Some(2));
        assert_eq!(tlb.len(), 1);
    }

    #[test]
    fn reinserting_a_resident_page_does_not_grow_order() {
        let mut tlb = Tlb::new();
        tlb.insert(5, 5);
        tlb.insert(5, 6);
        assert_eq!(tlb.lookup(5), Some(6));
        assert_eq!(tlb.len(), 1);
    }
}
