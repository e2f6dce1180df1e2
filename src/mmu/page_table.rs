// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Page directory entries.
//!
//! Only [`PteFlags::PRESENT`] and the frame number affect translation
//! semantics; the remaining flags are recorded purely for observability
//! (state dumps), matching spec.md's note that "only `present` and
//! `frameNumber` affect semantics here; others are recorded for
//! observability."

bitflags::bitflags! {
    /// Page table entry flags.
    ///
    /// Grounded on the reference kernel's `PageTableFlags`
    /// (`kernel/vm/page_table.rs`), which encodes the same IA-32-derived
    /// bit meanings (present/write/user/PWT/PCD/accessed/dirty) as a
    /// `bitflags!` set rather than eight independent booleans.
    #[derive(Default)]
    pub struct PteFlags: u16 {
        /// Page is present (mapped to a frame).
        const PRESENT       = 1 << 0;
        /// Page is writable.
        const WRITABLE      = 1 << 1;
        /// Page is accessible from user mode.
        const USER_MODE     = 1 << 2;
        /// Write-through caching policy.
        const WRITE_THROUGH = 1 << 3;
        /// Caching disabled for this page.
        const CACHE_DISABLED = 1 << 4;
        /// Set when the page has been accessed.
        const ACCESSED      = 1 << 5;
        /// Set when the page has been written.
        const DIRTY         = 1 << 6;
    }
}

/// A single page directory entry: a frame mapping plus observability flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTableEntry {
    pub flags: PteFlags,
    pub frame_number: u32,
}

impl PageTableEntry {
    /// Create a freshly-mapped, present, writable entry for `frame_number`.
    pub fn mapped(frame_number: u32) -> Self {
        Self {
            flags: PteFlags::PRESENT | PteFlags::WRITABLE | PteFlags::ACCESSED,
            frame_number,
        }
    }

    pub fn present(&self) -> bool {
        self.flags.contains(PteFlags::PRESENT)
    }
}
