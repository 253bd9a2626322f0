// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;
use core::marker::PhantomData;

use crate::arch::{PageTableEntry, PageTableLevel};
use crate::{Arch, Error, PhysicalAddress, VirtualAddress};

/// Physical base of the frames holding page tables.
const TABLE_FRAMES_BASE: usize = 0x8000_0000;
/// Physical base of the frames backing user pages.
const DATA_FRAMES_BASE: usize = 0xc000_0000;

/// The paging structures of one address space.
///
/// Tables live in an arena indexed by their frame number, table entries refer to each other through
/// physical addresses exactly like the hardware walker expects, so [`PageTables::table_index`] is the
/// only place that translates between the two.
pub struct PageTables<A: Arch> {
    tables: Vec<Box<[A::PageTableEntry]>>,
    /// Frames handed out for user pages, never reused.
    data_frames: usize,
    _arch: PhantomData<fn() -> A>,
}

impl<A: Arch> fmt::Debug for PageTables<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageTables")
            .field("root", &self.root())
            .field("tables", &self.tables.len())
            .field("data_frames", &self.data_frames)
            .finish_non_exhaustive()
    }
}

impl<A: Arch> PageTables<A> {
    /// Allocates an empty root table.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the root table cannot be allocated.
    pub fn new() -> crate::Result<Self> {
        let mut this = Self {
            tables: Vec::new(),
            data_frames: 0,
            _arch: PhantomData,
        };
        let root_level = A::LEVELS.first().ok_or(Error::OutOfMemory)?;
        this.allocate_table(root_level)?;
        Ok(this)
    }

    /// The physical address of the root table.
    pub fn root(&self) -> PhysicalAddress {
        PhysicalAddress::new(TABLE_FRAMES_BASE)
    }

    /// The number of allocated tables, including the root.
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Returns the arena index of the table at `address`, if `address` names one of our tables.
    pub(crate) fn table_index(&self, address: PhysicalAddress) -> Option<usize> {
        let offset = address.get().checked_sub(TABLE_FRAMES_BASE)?;
        if offset % A::PAGE_SIZE != 0 {
            return None;
        }

        let index = offset / A::PAGE_SIZE;
        (index < self.tables.len()).then_some(index)
    }

    pub(crate) fn table(&self, index: usize) -> Option<&[A::PageTableEntry]> {
        self.tables.get(index).map(|table| &**table)
    }

    pub(crate) fn table_mut(&mut self, index: usize) -> Option<&mut [A::PageTableEntry]> {
        self.tables.get_mut(index).map(|table| &mut **table)
    }

    /// Allocates a new, vacant table for `level` and returns its physical address.
    pub(crate) fn allocate_table(&mut self, level: &PageTableLevel) -> crate::Result<PhysicalAddress> {
        self.tables.try_reserve(1)?;

        let mut entries = Vec::new();
        entries.try_reserve_exact(level.entries())?;
        entries.resize(level.entries(), <A::PageTableEntry as PageTableEntry>::VACANT);

        let address = PhysicalAddress::new(TABLE_FRAMES_BASE + self.tables.len() * A::PAGE_SIZE);
        self.tables.push(entries.into_boxed_slice());

        log::trace!("allocated {} table at {address}", level.name());
        Ok(address)
    }

    /// Allocates a frame to back a user page.
    pub(crate) fn allocate_frame(&mut self) -> crate::Result<PhysicalAddress> {
        let offset = self
            .data_frames
            .checked_mul(A::PAGE_SIZE)
            .ok_or(Error::OutOfMemory)?;
        let address = PhysicalAddress::new(DATA_FRAMES_BASE)
            .checked_add(offset)
            .ok_or(Error::OutOfMemory)?;
        self.data_frames += 1;
        Ok(address)
    }

    /// Returns the leaf entry translating `virt`, allocating any missing intermediate tables on the way.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRange`] if `virt` is beyond the translated address width,
    /// [`Error::OutOfMemory`] if a table cannot be allocated, and [`Error::AlreadyMapped`] if an
    /// intermediate level already holds a non-table entry covering `virt`.
    pub(crate) fn leaf_entry_or_alloc(
        &mut self,
        virt: VirtualAddress,
    ) -> crate::Result<&mut A::PageTableEntry> {
        if !virt.is_translatable::<A>() {
            return Err(Error::InvalidRange);
        }
        let (leaf_level, upper) = A::LEVELS.split_last().ok_or(Error::NoMapping)?;

        let mut table = 0;
        for (depth, level) in upper.iter().enumerate() {
            let index = level.pte_index_of(virt);
            let entry = *self
                .table(table)
                .and_then(|t| t.get(index))
                .ok_or(Error::NoMapping)?;

            let next = if entry.is_vacant() {
                let next_level = A::LEVELS.get(depth + 1).ok_or(Error::NoMapping)?;
                let address = self.allocate_table(next_level)?;
                if let Some(slot) = self.table_mut(table).and_then(|t| t.get_mut(index)) {
                    *slot = <A::PageTableEntry as PageTableEntry>::new_table(address);
                }
                address
            } else if entry.is_table() {
                entry.address()
            } else {
                log::debug!("{virt} is covered by a {} level block entry", level.name());
                return Err(Error::AlreadyMapped);
            };

            table = self.table_index(next).ok_or(Error::NoMapping)?;
        }

        self.table_mut(table)
            .and_then(|t| t.get_mut(leaf_level.pte_index_of(virt)))
            .ok_or(Error::NoMapping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::riscv64::Riscv64;

    #[test]
    fn new_has_root() {
        let tables = PageTables::<Riscv64>::new().unwrap();

        assert_eq!(tables.table_count(), 1);
        assert_eq!(tables.table_index(tables.root()), Some(0));
    }

    #[test]
    fn table_index_rejects_foreign_addresses() {
        let tables = PageTables::<Riscv64>::new().unwrap();

        assert_eq!(tables.table_index(PhysicalAddress::new(0)), None);
        assert_eq!(
            tables.table_index(PhysicalAddress::new(TABLE_FRAMES_BASE + 8)),
            None
        );
        assert_eq!(
            tables.table_index(PhysicalAddress::new(TABLE_FRAMES_BASE + 4096)),
            None
        );
    }

    #[test]
    fn leaf_entry_allocates_intermediate_tables_once() {
        let mut tables = PageTables::<Riscv64>::new().unwrap();

        let entry = tables
            .leaf_entry_or_alloc(VirtualAddress::new(0x1000))
            .unwrap();
        assert!(entry.is_vacant());
        // upper, middle and leaf table
        assert_eq!(tables.table_count(), 4);

        // same leaf table
        tables
            .leaf_entry_or_alloc(VirtualAddress::new(0x2000))
            .unwrap();
        assert_eq!(tables.table_count(), 4);

        // different middle-level entry, needs a new leaf table
        tables
            .leaf_entry_or_alloc(VirtualAddress::new(0x20_0000))
            .unwrap();
        assert_eq!(tables.table_count(), 5);
    }

    #[test]
    fn frames_are_distinct() {
        let mut tables = PageTables::<Riscv64>::new().unwrap();

        let a = tables.allocate_frame().unwrap();
        let b = tables.allocate_frame().unwrap();
        assert_ne!(a, b);
        assert!(a.is_aligned_to(4096));
        assert!(b.is_aligned_to(4096));
    }
}
