// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;
use core::ops::Range;

use crate::arch::{self, PageTableEntry};
use crate::table::PageTables;
use crate::{
    AddressRangeExt, Arch, Backing, Config, Error, Flush, MemoryPolicy, Region, RegionFlags,
    RegionIndex, VirtualAddress,
};

bitflags::bitflags! {
    #[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
    pub struct PageFaultFlags: u8 {
        /// The fault was caused by a memory load
        const LOAD = 1 << 0;
        /// The fault was caused by a memory store
        const STORE = 1 << 1;
        /// The fault was caused by an instruction fetch
        const INSTRUCTION = 1 << 3;
    }
}

impl fmt::Display for PageFaultFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        bitflags::parser::to_writer(self, f)
    }
}

impl PageFaultFlags {
    /// Exactly one kind of access.
    pub fn is_valid(self) -> bool {
        self.bits().count_ones() == 1
    }

    pub fn cause_is_read(self) -> bool {
        self.contains(PageFaultFlags::LOAD)
    }
    pub fn cause_is_write(self) -> bool {
        self.contains(PageFaultFlags::STORE)
    }
    pub fn cause_is_instr_fetch(self) -> bool {
        self.contains(PageFaultFlags::INSTRUCTION)
    }
}

/// The state of a single page as seen through its leaf page table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    /// No page is present or swapped out.
    Unmapped,
    Present { soft_dirty: bool, writable: bool },
    Swapped { soft_dirty: bool },
}

impl PageState {
    /// Returns `true` if the page's soft-dirty marker is set.
    pub fn is_soft_dirty(self) -> bool {
        match self {
            PageState::Unmapped => false,
            PageState::Present { soft_dirty, .. } | PageState::Swapped { soft_dirty } => soft_dirty,
        }
    }
}

/// The virtual memory of one process: its regions and the page tables translating them.
pub struct AddressSpace<A: Arch> {
    pub(crate) arch: A,
    pub(crate) regions: RegionIndex,
    pub(crate) tables: PageTables<A>,
    /// Next free slot of the (simulated) swap device.
    next_swap_slot: usize,
}

impl<A: Arch> fmt::Debug for AddressSpace<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressSpace")
            .field("regions", &self.regions)
            .field("tables", &self.tables)
            .field("next_swap_slot", &self.next_swap_slot)
            .finish_non_exhaustive()
    }
}

impl<A: Arch> AddressSpace<A> {
    /// Creates a new, empty address space.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the root page table cannot be allocated.
    pub fn new(arch: A, config: Config) -> crate::Result<Self> {
        Ok(Self {
            arch,
            regions: RegionIndex::new(config.max_map_count, A::PAGE_SIZE),
            tables: PageTables::new()?,
            next_swap_slot: 0,
        })
    }

    pub fn arch(&self) -> &A {
        &self.arch
    }

    pub fn regions(&self) -> &RegionIndex {
        &self.regions
    }

    /// Creates a new region spanning `range`.
    ///
    /// New regions always have [`RegionFlags::SOFT_DIRTY`] set: all of their pages count as written
    /// until the marker is first cleared.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRange`] if `range` is empty, not page-aligned or beyond the
    /// translated address width, [`Error::AlreadyMapped`] if it overlaps an existing region, and [`Error::ResourceExhausted`]
    /// or [`Error::OutOfMemory`] if the region index is full.
    pub fn map(
        &mut self,
        range: Range<VirtualAddress>,
        flags: RegionFlags,
        backing: Backing,
        policy: MemoryPolicy,
    ) -> crate::Result<()> {
        if range.is_empty()
            || !range.is_aligned_to(A::PAGE_SIZE)
            || !arch::translates::<A>(&range)
        {
            return Err(Error::InvalidRange);
        }

        let flags = flags | RegionFlags::SOFT_DIRTY;
        log::trace!("map {range:?} {flags} {backing:?} {policy:?}");
        self.regions
            .insert(Region::new(range, flags, backing, policy))?;

        Ok(())
    }

    /// Performs a memory access the way the MMU would.
    ///
    /// If the page's leaf entry permits the access only the accessed (and, for stores, dirty) bits
    /// are updated. Otherwise the access traps into [`Self::page_fault`].
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Self::page_fault`].
    ///
    /// # Panics
    ///
    /// Panics if `flags` doesn't describe exactly one kind of access.
    pub fn access(&mut self, address: VirtualAddress, flags: PageFaultFlags) -> crate::Result<()> {
        assert!(flags.is_valid(), "invalid access flags {flags:?}");

        if let Some(mut leaf) = self.tables.locate(address) {
            let entry = leaf.entry();
            if entry.is_leaf() {
                let attributes = entry.attributes();
                let permitted = (flags.cause_is_read() && attributes.allows_read())
                    || (flags.cause_is_write() && attributes.allows_write())
                    || (flags.cause_is_instr_fetch() && attributes.allows_execution());

                if permitted {
                    leaf.set_accessed(flags.cause_is_write());
                    return Ok(());
                }
            }
        }

        self.page_fault(address, flags)
    }

    /// Resolves a page fault at `address`.
    ///
    /// Missing pages are allocated, swapped out pages are brought back in (keeping their marker),
    /// and writes to write-protected pages of writable regions restore write access. Every store
    /// sets the page's soft-dirty marker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoMapping`] if `address` isn't covered by any region,
    /// [`Error::AccessDenied`] if the region doesn't permit the access, and [`Error::OutOfMemory`]
    /// if a page table or frame cannot be allocated.
    ///
    /// # Panics
    ///
    /// Panics if `flags` doesn't describe exactly one kind of access.
    pub fn page_fault(&mut self, address: VirtualAddress, flags: PageFaultFlags) -> crate::Result<()> {
        assert!(flags.is_valid(), "invalid page fault flags {flags:?}");

        let (Some(index), _) = self.regions.find_covering(address) else {
            log::trace!("page fault at {address}: not mapped");
            return Err(Error::NoMapping);
        };
        let region_flags = self.regions[index].flags;

        let permitted = (flags.cause_is_read() && region_flags.contains(RegionFlags::READ))
            || (flags.cause_is_write() && region_flags.contains(RegionFlags::WRITE))
            || (flags.cause_is_instr_fetch() && region_flags.contains(RegionFlags::EXECUTE));
        if !permitted {
            log::trace!("page fault at {address}: {flags} not permitted by {region_flags}");
            return Err(Error::AccessDenied);
        }

        let page = address.align_down(A::PAGE_SIZE);
        let write = flags.cause_is_write();
        let mut attributes = region_flags.attributes();
        if !write {
            // map read-only until the first write
            attributes.set(crate::MemoryAttributes::WRITE, false);
        }

        let entry = *self.tables.leaf_entry_or_alloc(page)?;
        let mut new_entry = if entry.is_leaf() {
            log::trace!("page fault at {address}: {flags} on present page");
            let mut entry = entry;
            if write {
                entry.set_writable(true);
            }
            entry
        } else if entry.is_swap() {
            log::trace!(
                "page fault at {address}: swapping in slot {}",
                entry.swap_slot()
            );
            let frame = self.tables.allocate_frame()?;
            let mut swapped_in = <A::PageTableEntry as PageTableEntry>::new_leaf(frame, attributes);
            swapped_in.set_soft_dirty(entry.is_swap_soft_dirty());
            swapped_in
        } else {
            log::trace!("page fault at {address}: allocating new page");
            let frame = self.tables.allocate_frame()?;
            <A::PageTableEntry as PageTableEntry>::new_leaf(frame, attributes)
        };

        new_entry.set_accessed(write);
        if write {
            new_entry.set_soft_dirty(true);
        }

        *self.tables.leaf_entry_or_alloc(page)? = new_entry;

        let mut flush: Flush = Flush::new();
        flush.invalidate(Range::from_start_len(page, A::PAGE_SIZE));
        flush.flush(&self.arch);

        Ok(())
    }

    /// Evicts the page at `address` to swap, replacing its leaf entry with a swap descriptor that
    /// carries the page's soft-dirty marker. Does nothing if the page is not present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoMapping`] if `address` isn't covered by any region.
    pub fn swap_out(&mut self, address: VirtualAddress) -> crate::Result<()> {
        if self.regions.find_covering(address).0.is_none() {
            return Err(Error::NoMapping);
        }

        let page = address.align_down(A::PAGE_SIZE);
        let Some(mut leaf) = self.tables.locate(page) else {
            return Ok(());
        };
        if !leaf.entry().is_leaf() {
            return Ok(());
        }

        let slot = self.next_swap_slot;
        let soft_dirty = leaf.entry().is_soft_dirty();
        leaf.replace(<A::PageTableEntry as PageTableEntry>::new_swap(slot, soft_dirty));
        self.next_swap_slot += 1;
        log::trace!("swapped out {page} to slot {slot}");

        let mut flush: Flush = Flush::new();
        flush.invalidate(Range::from_start_len(page, A::PAGE_SIZE));
        flush.flush(&self.arch);

        Ok(())
    }

    /// Returns the state of the page containing `address`.
    pub fn page_state(&self, address: VirtualAddress) -> PageState {
        match self.tables.lookup(address) {
            Some(entry) if entry.is_leaf() => PageState::Present {
                soft_dirty: entry.is_soft_dirty(),
                writable: entry.attributes().allows_write(),
            },
            Some(entry) if entry.is_swap() => PageState::Swapped {
                soft_dirty: entry.is_swap_soft_dirty(),
            },
            _ => PageState::Unmapped,
        }
    }

    /// # Panics
    ///
    /// Panics if the region index is inconsistent.
    pub fn assert_valid(&self, ctx: &str) {
        self.regions.assert_valid(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TestAddressSpace, address_space, pages};

    fn anon_rw(aspace: &mut TestAddressSpace, range: Range<VirtualAddress>) {
        aspace
            .map(
                range,
                RegionFlags::READ | RegionFlags::WRITE,
                Backing::Anonymous,
                MemoryPolicy::Default,
            )
            .unwrap();
    }

    #[test_log::test]
    fn map_sets_tracking() {
        let mut aspace = address_space(Config::default());
        anon_rw(&mut aspace, pages(0, 4));

        assert_eq!(aspace.regions().len(), 1);
        assert!(aspace.regions()[0].is_soft_dirty());
    }

    #[test_log::test]
    fn map_rejects_bad_ranges() {
        let mut aspace = address_space(Config::default());
        let flags = RegionFlags::READ;

        assert_eq!(
            aspace.map(
                VirtualAddress::new(0x1000)..VirtualAddress::new(0x1000),
                flags,
                Backing::Anonymous,
                MemoryPolicy::Default
            ),
            Err(Error::InvalidRange)
        );
        assert_eq!(
            aspace.map(
                VirtualAddress::new(0x1000)..VirtualAddress::new(0x1800),
                flags,
                Backing::Anonymous,
                MemoryPolicy::Default
            ),
            Err(Error::InvalidRange)
        );

        anon_rw(&mut aspace, pages(0, 4));
        assert_eq!(
            aspace.map(pages(2, 6), flags, Backing::Anonymous, MemoryPolicy::Default),
            Err(Error::AlreadyMapped)
        );
    }

    #[test_log::test]
    fn map_rejects_untranslatable_ranges() {
        let mut aspace = address_space(Config::default());
        let top = VirtualAddress::new(1 << 48);

        for range in [top..top.add(0x1000), top.sub(0x1000)..top.add(0x1000)] {
            assert_eq!(
                aspace.map(range, RegionFlags::READ, Backing::Anonymous, MemoryPolicy::Default),
                Err(Error::InvalidRange)
            );
        }
        assert!(aspace.regions().is_empty());

        // the last translatable page is fine
        anon_rw(&mut aspace, top.sub(0x1000)..top);
        aspace
            .access(top.sub(0x1000), PageFaultFlags::STORE)
            .unwrap();
        assert_eq!(aspace.page_state(VirtualAddress::new(0)), PageState::Unmapped);
        assert_eq!(aspace.page_state(top), PageState::Unmapped);
    }

    #[test_log::test]
    fn read_maps_read_only_clean_page() {
        let mut aspace = address_space(Config::default());
        anon_rw(&mut aspace, pages(0, 4));

        aspace
            .access(pages(1, 2).start, PageFaultFlags::LOAD)
            .unwrap();

        assert_eq!(
            aspace.page_state(pages(1, 2).start),
            PageState::Present {
                soft_dirty: false,
                writable: false
            }
        );
    }

    #[test_log::test]
    fn write_sets_marker() {
        let mut aspace = address_space(Config::default());
        anon_rw(&mut aspace, pages(0, 4));

        aspace
            .access(pages(1, 2).start, PageFaultFlags::LOAD)
            .unwrap();
        aspace
            .access(pages(1, 2).start, PageFaultFlags::STORE)
            .unwrap();

        assert_eq!(
            aspace.page_state(pages(1, 2).start),
            PageState::Present {
                soft_dirty: true,
                writable: true
            }
        );
    }

    #[test_log::test]
    fn access_outside_regions() {
        let mut aspace = address_space(Config::default());
        anon_rw(&mut aspace, pages(0, 4));

        assert_eq!(
            aspace.access(pages(8, 9).start, PageFaultFlags::LOAD),
            Err(Error::NoMapping)
        );
        assert_eq!(aspace.page_state(pages(8, 9).start), PageState::Unmapped);
    }

    #[test_log::test]
    fn access_denied() {
        let mut aspace = address_space(Config::default());
        aspace
            .map(
                pages(0, 4),
                RegionFlags::READ,
                Backing::Anonymous,
                MemoryPolicy::Default,
            )
            .unwrap();

        assert_eq!(
            aspace.access(pages(0, 1).start, PageFaultFlags::STORE),
            Err(Error::AccessDenied)
        );
        assert_eq!(
            aspace.access(pages(0, 1).start, PageFaultFlags::INSTRUCTION),
            Err(Error::AccessDenied)
        );
        aspace
            .access(pages(0, 1).start, PageFaultFlags::LOAD)
            .unwrap();
    }

    #[test_log::test]
    fn swap_round_trip_keeps_marker() {
        let mut aspace = address_space(Config::default());
        anon_rw(&mut aspace, pages(0, 4));

        aspace
            .access(pages(2, 3).start, PageFaultFlags::STORE)
            .unwrap();
        aspace.swap_out(pages(2, 3).start).unwrap();
        assert_eq!(
            aspace.page_state(pages(2, 3).start),
            PageState::Swapped { soft_dirty: true }
        );

        aspace
            .access(pages(2, 3).start, PageFaultFlags::LOAD)
            .unwrap();
        assert_eq!(
            aspace.page_state(pages(2, 3).start),
            PageState::Present {
                soft_dirty: true,
                writable: false
            }
        );
    }

    #[test_log::test]
    fn swap_out_absent_page_is_noop() {
        let mut aspace = address_space(Config::default());
        anon_rw(&mut aspace, pages(0, 4));

        aspace.swap_out(pages(0, 1).start).unwrap();
        assert_eq!(aspace.page_state(pages(0, 1).start), PageState::Unmapped);
        assert_eq!(aspace.swap_out(pages(8, 9).start), Err(Error::NoMapping));
    }

    #[test]
    fn fault_flags() {
        assert!(PageFaultFlags::LOAD.is_valid());
        assert!(PageFaultFlags::STORE.is_valid());
        assert!(!(PageFaultFlags::LOAD | PageFaultFlags::STORE).is_valid());
        assert!(!PageFaultFlags::empty().is_valid());
    }
}
