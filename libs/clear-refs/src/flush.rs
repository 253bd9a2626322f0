// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::ops::Range;

use arrayvec::ArrayVec;

use crate::{Arch, VirtualAddress};

/// A batch of pending TLB invalidations.
///
/// Page table changes are collected here and made visible with a single call to [`Flush::flush`]
/// once all changes are done. Adjacent ranges are coalesced, and once the batch runs out of space
/// it degrades into flushing the entire address space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flush<const CAP: usize = 16> {
    Ranges(ArrayVec<Range<VirtualAddress>, CAP>),
    All,
}

impl Default for Flush {
    fn default() -> Self {
        Self::new()
    }
}

impl<const CAP: usize> Flush<CAP> {
    pub const fn new() -> Self {
        Self::Ranges(ArrayVec::new_const())
    }

    /// Flush the range of virtual addresses from the TLB.
    pub fn flush<A>(self, arch: &A)
    where
        A: Arch,
    {
        match self {
            Flush::Ranges(ranges) => {
                for range in ranges {
                    log::trace!("flushing range {range:?}");
                    arch.fence(range);
                }
            }
            Flush::All => {
                log::trace!("flushing entire address space");
                arch.fence_all();
            }
        }
    }

    pub fn invalidate(&mut self, range: Range<VirtualAddress>) {
        match self {
            Flush::Ranges(ranges) => {
                match ranges.last_mut() {
                    Some(last) if last.end == range.start => last.end = range.end,
                    _ => {
                        if ranges.try_push(range).is_err() {
                            *self = Flush::All;
                        }
                    }
                }
            }
            Flush::All => {}
        }
    }

    /// Returns `true` if nothing has been invalidated.
    pub fn is_empty(&self) -> bool {
        match self {
            Flush::Ranges(ranges) => ranges.is_empty(),
            Flush::All => false,
        }
    }
}
