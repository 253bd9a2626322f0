// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

mod arch;
pub mod proptest;

use alloc::vec::Vec;
use core::ops::Range;

pub use arch::{EmulateArch, Fence};

use crate::arch::riscv64::Riscv64;
use crate::{
    AddressRangeExt, AddressSpace, Backing, Config, MemoryPolicy, PageFaultFlags, ProcessTable,
    RegionFlags, VirtualAddress,
};

pub type TestArch = EmulateArch<Riscv64>;
pub type TestAddressSpace = AddressSpace<TestArch>;
pub type TestProcessTable = ProcessTable<TestArch, parking_lot::RawRwLock>;

/// Returns a new empty address space on the emulated architecture.
pub fn address_space(config: Config) -> TestAddressSpace {
    AddressSpace::new(EmulateArch::new(), config).unwrap()
}

/// Returns the range spanning pages `start..end`.
pub fn pages(start: usize, end: usize) -> Range<VirtualAddress> {
    VirtualAddress::new(start * 4096)..VirtualAddress::new(end * 4096)
}

/// Maps each of `ranges` as an anonymous read-write region.
pub fn map_anon(aspace: &mut TestAddressSpace, ranges: &[Range<VirtualAddress>]) {
    for range in ranges {
        aspace
            .map(
                range.clone(),
                RegionFlags::READ | RegionFlags::WRITE,
                Backing::Anonymous,
                MemoryPolicy::Default,
            )
            .unwrap();
    }
}

/// Writes to every page of `range`, faulting pages in (or re-enabling write access) as needed.
pub fn write(aspace: &mut TestAddressSpace, range: Range<VirtualAddress>) {
    for page in range.pages(4096) {
        aspace.access(page, PageFaultFlags::STORE).unwrap();
    }
}

/// Maps each of `ranges` and writes to all of their pages.
pub fn populate(aspace: &mut TestAddressSpace, ranges: &[Range<VirtualAddress>]) {
    map_anon(aspace, ranges);
    for range in ranges {
        write(aspace, range.clone());
    }
}

/// Returns the pages of `range` whose soft-dirty marker is set.
pub fn dirty_pages(aspace: &TestAddressSpace, range: Range<VirtualAddress>) -> Vec<VirtualAddress> {
    range
        .pages(4096)
        .filter(|page| aspace.page_state(*page).is_soft_dirty())
        .collect()
}
