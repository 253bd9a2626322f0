// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use alloc::vec::Vec;
use core::fmt;
use core::marker::PhantomData;
use core::mem;
use core::ops::Range;

use parking_lot::Mutex;

use crate::VirtualAddress;
use crate::arch::{Arch, PageTableLevel};

/// A recorded TLB invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fence {
    Range(Range<VirtualAddress>),
    All,
}

/// [`Arch`] implementation that emulates a given "real" architecture. For testing purposes.
///
/// Page table formats are inherited from the real architecture, TLB invalidations are recorded
/// instead of executed.
pub struct EmulateArch<A: Arch> {
    fences: Mutex<Vec<Fence>>,
    _arch: PhantomData<fn() -> A>,
}

impl<A: Arch> fmt::Debug for EmulateArch<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmulateArch")
            .field("fences", &self.fences.lock().len())
            .finish_non_exhaustive()
    }
}

impl<A: Arch> Default for EmulateArch<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Arch> EmulateArch<A> {
    pub fn new() -> Self {
        Self {
            fences: Mutex::new(Vec::new()),
            _arch: PhantomData,
        }
    }

    /// Returns a copy of all invalidations recorded so far.
    pub fn fences(&self) -> Vec<Fence> {
        self.fences.lock().clone()
    }

    /// Returns all invalidations recorded so far and starts a new recording.
    pub fn take_fences(&self) -> Vec<Fence> {
        mem::take(&mut *self.fences.lock())
    }
}

impl<A: Arch> Arch for EmulateArch<A> {
    // We want to inherit all const parameters from the proper architecture...

    const PAGE_SIZE: usize = A::PAGE_SIZE;
    const LEVELS: &'static [PageTableLevel] = A::LEVELS;
    const VIRT_ADDR_BITS: u32 = A::VIRT_ADDR_BITS;
    type PageTableEntry = A::PageTableEntry;

    // ...while we emulate all other methods.

    fn fence(&self, address_range: Range<VirtualAddress>) {
        self.fences.lock().push(Fence::Range(address_range));
    }

    fn fence_all(&self) {
        self.fences.lock().push(Fence::All);
    }
}
