// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;
use core::ops::Range;

use crate::{AddressRangeExt, MemoryAttributes, VirtualAddress};

bitflags::bitflags! {
    /// Attributes shared by all pages of a [`Region`].
    #[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
    pub struct RegionFlags: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
        /// Writes are visible to other address spaces mapping the same backing.
        const SHARED = 1 << 3;
        /// Soft-dirty tracking is enabled for the region as a whole, i.e. every page of it is
        /// considered written regardless of its marker. Newly created regions start out with this set.
        const SOFT_DIRTY = 1 << 4;
    }
}

impl fmt::Display for RegionFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        bitflags::parser::to_writer(self, f)
    }
}

impl RegionFlags {
    /// The hardware permissions a fully faulted-in page of this region may have.
    ///
    /// Writable pages are always readable too, write-only leaf entries are reserved encodings.
    pub fn attributes(self) -> MemoryAttributes {
        MemoryAttributes::new()
            .with(
                MemoryAttributes::READ,
                self.intersects(RegionFlags::READ | RegionFlags::WRITE),
            )
            .with(MemoryAttributes::WRITE, self.contains(RegionFlags::WRITE))
            .with(MemoryAttributes::EXECUTE, self.contains(RegionFlags::EXECUTE))
    }
}

/// Identifies the file behind a file-backed region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u32);

/// What a region's pages are populated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    /// Zero-filled memory.
    Anonymous,
    /// A window into `file`, starting `offset` pages into it at the region's start.
    File { file: FileId, offset: usize },
}

impl Backing {
    /// The backing of the part of a region starting `pages` pages after the region's start.
    #[must_use]
    pub const fn advance(self, pages: usize) -> Self {
        match self {
            Backing::Anonymous => Backing::Anonymous,
            Backing::File { file, offset } => Backing::File {
                file,
                offset: offset + pages,
            },
        }
    }

    /// Returns `true` if a region backed by `self` spanning `pages` pages is directly continued by
    /// a region backed by `next`.
    pub fn is_continued_by(self, pages: usize, next: Backing) -> bool {
        match (self, next) {
            (Backing::Anonymous, Backing::Anonymous) => true,
            (
                Backing::File { file, offset },
                Backing::File {
                    file: next_file,
                    offset: next_offset,
                },
            ) => file == next_file && offset.checked_add(pages) == Some(next_offset),
            _ => false,
        }
    }
}

/// The NUMA memory policy of a region.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum MemoryPolicy {
    /// Allocate on the node of the faulting CPU.
    #[default]
    Default,
    /// Prefer the given node, fall back to others.
    Preferred(u16),
    /// Only allocate from the nodes in the mask.
    Bind(u64),
    /// Spread allocations over the nodes in the mask.
    Interleave(u64),
}

/// A contiguous, attribute-uniform span of virtual memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub range: Range<VirtualAddress>,
    pub flags: RegionFlags,
    pub backing: Backing,
    pub policy: MemoryPolicy,
}

impl Region {
    pub const fn new(
        range: Range<VirtualAddress>,
        flags: RegionFlags,
        backing: Backing,
        policy: MemoryPolicy,
    ) -> Self {
        Self {
            range,
            flags,
            backing,
            policy,
        }
    }

    pub fn is_soft_dirty(&self) -> bool {
        self.flags.contains(RegionFlags::SOFT_DIRTY)
    }

    /// The backing of the page at `address` of this region.
    pub(crate) fn backing_at(&self, address: VirtualAddress, page_size: usize) -> Backing {
        debug_assert!(self.range.start <= address && address <= self.range.end);
        self.backing
            .advance(address.offset_from_unsigned(self.range.start) / page_size)
    }

    /// Splits this region at `at`, leaving `[start, at)` in `self` and returning `[at, end)`.
    pub(crate) fn split_off(&mut self, at: VirtualAddress, page_size: usize) -> Region {
        debug_assert!(self.range.start < at && at < self.range.end);
        debug_assert!(at.is_aligned_to(page_size));

        let tail = Region {
            range: at..self.range.end,
            flags: self.flags,
            backing: self.backing_at(at, page_size),
            policy: self.policy,
        };
        self.range.end = at;
        tail
    }

    /// Returns `true` if a region directly following `self` with the given attributes could be
    /// coalesced with `self` into a single region.
    pub(crate) fn can_append(
        &self,
        next_start: VirtualAddress,
        next_flags: RegionFlags,
        next_backing: Backing,
        next_policy: MemoryPolicy,
        page_size: usize,
    ) -> bool {
        self.range.end == next_start
            && self.flags == next_flags
            && self.policy == next_policy
            && self
                .backing
                .is_continued_by(self.range.len() / page_size, next_backing)
    }
}
