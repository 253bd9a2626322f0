// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;
use core::ops::Range;

use crate::arch::PageTableEntry;
use crate::table::PageTables;
use crate::{AddressRangeExt, Arch, Flush, VirtualAddress};

/// A borrowed leaf entry of the page table, together with the page it translates.
///
/// The entry is "released" by dropping the handle, which also ends the mutable borrow of the
/// page tables.
pub struct LeafEntry<'a, A: Arch> {
    entry: &'a mut A::PageTableEntry,
    page: VirtualAddress,
}

/// What [`LeafEntry::clear_marker`] found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
    /// A present page, now write-protected and with its marker cleared.
    Present,
    /// A swapped out page, its swap descriptor's marker is now cleared.
    Swapped,
    /// Nothing mapped at this page.
    Hole,
}

impl<A: Arch> fmt::Debug for LeafEntry<'_, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeafEntry")
            .field("entry", &self.entry)
            .field("page", &self.page)
            .finish()
    }
}

impl<A: Arch> LeafEntry<'_, A> {
    pub fn page(&self) -> VirtualAddress {
        self.page
    }

    pub fn entry(&self) -> A::PageTableEntry {
        *self.entry
    }

    /// Overwrites the entry. The caller is responsible for invalidating the old translation.
    pub(crate) fn replace(&mut self, entry: A::PageTableEntry) {
        *self.entry = entry;
    }

    /// Sets the accessed (and, for writes, dirty) bits like the MMU does on a permitted access.
    pub(crate) fn set_accessed(&mut self, write: bool) {
        self.entry.set_accessed(write);
    }

    /// Clears the soft-dirty marker of this entry.
    ///
    /// Present pages also lose their write permission so that the next write faults and re-arms
    /// the marker. Since that changes the translation, the page is added to `flush`. Swap
    /// descriptors only have their marker cleared, there is no translation to invalidate.
    pub fn clear_marker(&mut self, flush: &mut Flush) -> ClearOutcome {
        if self.entry.is_leaf() {
            // clean, write-protected entries have nothing stale to invalidate
            let changed = self.entry.is_soft_dirty() || self.entry.attributes().allows_write();

            self.entry.set_writable(false);
            self.entry.set_soft_dirty(false);
            if changed {
                flush.invalidate(Range::from_start_len(self.page, A::PAGE_SIZE));
            }
            ClearOutcome::Present
        } else if self.entry.is_swap() {
            self.entry.set_swap_soft_dirty(false);
            ClearOutcome::Swapped
        } else {
            ClearOutcome::Hole
        }
    }
}

impl<A: Arch> PageTables<A> {
    /// Walks the hierarchy from the root and returns `(table, index)` of the leaf-level slot
    /// translating `virt`.
    ///
    /// Absent or malformed intermediate entries (vacant entries, block mappings, swap descriptors,
    /// or addresses that don't name one of our tables) end the walk with `None`. So do addresses
    /// beyond the translated address width, which would otherwise alias lower pages.
    fn leaf_slot(&self, virt: VirtualAddress) -> Option<(usize, usize)> {
        if !virt.is_translatable::<A>() {
            return None;
        }
        let (leaf_level, upper) = A::LEVELS.split_last()?;

        let mut table = self.table_index(self.root())?;
        for level in upper {
            let entry = self.table(table)?.get(level.pte_index_of(virt))?;
            if !entry.is_table() {
                return None;
            }
            table = self.table_index(entry.address())?;
        }

        Some((table, leaf_level.pte_index_of(virt)))
    }

    /// Returns the leaf entry controlling the page containing `virt`.
    ///
    /// Returns `None` if there is no leaf table for `virt`, which callers should treat as a hole
    /// rather than an error. The returned entry itself may still be vacant.
    pub fn locate(&mut self, virt: VirtualAddress) -> Option<LeafEntry<'_, A>> {
        let (table, index) = self.leaf_slot(virt)?;
        let entry = self.table_mut(table)?.get_mut(index)?;

        Some(LeafEntry {
            entry,
            page: virt.align_down(A::PAGE_SIZE),
        })
    }

    /// Returns a copy of the leaf entry controlling the page containing `virt`.
    pub fn lookup(&self, virt: VirtualAddress) -> Option<A::PageTableEntry> {
        let (table, index) = self.leaf_slot(virt)?;
        self.table(table)?.get(index).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::riscv64::Riscv64;
    use crate::{MemoryAttributes, PhysicalAddress};

    type Pte = <Riscv64 as Arch>::PageTableEntry;

    fn writable_leaf(tables: &mut PageTables<Riscv64>, virt: VirtualAddress) {
        let frame = tables.allocate_frame().unwrap();
        let attributes = MemoryAttributes::new()
            .with(MemoryAttributes::READ, true)
            .with(MemoryAttributes::WRITE, true);
        let entry = tables.leaf_entry_or_alloc(virt).unwrap();
        *entry = Pte::new_leaf(frame, attributes);
        entry.set_soft_dirty(true);
    }

    #[test]
    fn locate_in_empty_tables_is_hole() {
        let mut tables = PageTables::<Riscv64>::new().unwrap();

        assert!(tables.locate(VirtualAddress::new(0x1000)).is_none());
        assert!(tables.lookup(VirtualAddress::new(0x1000)).is_none());
    }

    #[test]
    fn locate_vacant_slot_in_existing_leaf_table() {
        let mut tables = PageTables::<Riscv64>::new().unwrap();
        writable_leaf(&mut tables, VirtualAddress::new(0x1000));

        let mut flush = Flush::new();
        let mut leaf = tables.locate(VirtualAddress::new(0x2000)).unwrap();
        assert!(leaf.entry().is_vacant());
        assert_eq!(leaf.clear_marker(&mut flush), ClearOutcome::Hole);
        assert!(flush.is_empty());
    }

    #[test]
    fn clear_present() {
        let mut tables = PageTables::<Riscv64>::new().unwrap();
        writable_leaf(&mut tables, VirtualAddress::new(0x5000));

        let mut flush = Flush::new();
        let mut leaf = tables.locate(VirtualAddress::new(0x5123)).unwrap();
        assert_eq!(leaf.page(), VirtualAddress::new(0x5000));
        assert_eq!(leaf.clear_marker(&mut flush), ClearOutcome::Present);

        let entry = tables.lookup(VirtualAddress::new(0x5000)).unwrap();
        assert!(entry.is_leaf());
        assert!(!entry.is_soft_dirty());
        assert!(!entry.attributes().allows_write());
        assert_eq!(
            flush,
            Flush::Ranges(
                [VirtualAddress::new(0x5000)..VirtualAddress::new(0x6000)]
                    .into_iter()
                    .collect()
            )
        );
    }

    #[test]
    fn clear_clean_present_skips_invalidation() {
        let mut tables = PageTables::<Riscv64>::new().unwrap();
        writable_leaf(&mut tables, VirtualAddress::new(0x5000));

        let mut flush = Flush::new();
        tables
            .locate(VirtualAddress::new(0x5000))
            .unwrap()
            .clear_marker(&mut flush);
        assert!(!flush.is_empty());

        let mut flush = Flush::new();
        let mut leaf = tables.locate(VirtualAddress::new(0x5000)).unwrap();
        assert_eq!(leaf.clear_marker(&mut flush), ClearOutcome::Present);
        assert!(flush.is_empty());
    }

    #[test]
    fn clear_swapped() {
        let mut tables = PageTables::<Riscv64>::new().unwrap();
        *tables
            .leaf_entry_or_alloc(VirtualAddress::new(0x5000))
            .unwrap() = Pte::new_swap(7, true);

        let mut flush = Flush::new();
        let mut leaf = tables.locate(VirtualAddress::new(0x5000)).unwrap();
        assert_eq!(leaf.clear_marker(&mut flush), ClearOutcome::Swapped);
        assert!(flush.is_empty());

        let entry = tables.lookup(VirtualAddress::new(0x5000)).unwrap();
        assert!(entry.is_swap());
        assert!(!entry.is_swap_soft_dirty());
        assert_eq!(entry.swap_slot(), 7);
    }

    #[test]
    fn untranslatable_address_does_not_alias() {
        let mut tables = PageTables::<Riscv64>::new().unwrap();
        writable_leaf(&mut tables, VirtualAddress::new(0x1000));

        let alias = VirtualAddress::new((1 << 48) | 0x1000);
        assert!(tables.locate(alias).is_none());
        assert!(tables.lookup(alias).is_none());
        assert_eq!(
            tables.leaf_entry_or_alloc(alias).unwrap_err(),
            crate::Error::InvalidRange
        );
        assert!(tables.lookup(VirtualAddress::new(0x1000)).unwrap().is_soft_dirty());
    }

    #[test]
    fn block_entry_ends_walk() {
        let mut tables = PageTables::<Riscv64>::new().unwrap();
        // a 1GiB block mapping in the root table's first entry's upper table
        let upper = tables.allocate_table(&Riscv64::LEVELS[1]).unwrap();
        tables.table_mut(0).unwrap()[0] = Pte::new_table(upper);
        let upper_index = tables.table_index(upper).unwrap();
        tables.table_mut(upper_index).unwrap()[0] = Pte::new_leaf(
            PhysicalAddress::new(0x4000_0000),
            MemoryAttributes::new().with(MemoryAttributes::READ, true),
        );

        assert!(tables.locate(VirtualAddress::new(0x1000)).is_none());
    }
}
