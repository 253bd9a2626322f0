// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

#[cfg(target_pointer_width = "64")]
pub mod riscv64;

use core::fmt;
use core::ops::Range;

use crate::{MemoryAttributes, PhysicalAddress, VirtualAddress};

/// Architecture-specific memory subsystem primitives.
pub trait Arch {
    /// The size of the smallest page, in bytes.
    const PAGE_SIZE: usize;

    /// The levels of the page table hierarchy, ordered from the root table to the leaf table.
    const LEVELS: &'static [PageTableLevel];

    /// The number of virtual address bits translated by [`Self::LEVELS`].
    const VIRT_ADDR_BITS: u32 = translated_bits(Self::LEVELS);
    /// The bits that must be clear in every virtual address the page tables can translate.
    const UNTRANSLATED_ADDRESS_MASK: usize = match 1usize.checked_shl(Self::VIRT_ADDR_BITS) {
        Some(limit) => !(limit - 1),
        None => 0,
    };

    /// The type representing a single page table entry on this architecture. Usually `usize` sized.
    type PageTableEntry: PageTableEntry;

    /// Behaves like [`fence_all`][Self::fence_all] but only effect page table modifications
    /// within the given `range`.
    fn fence(&self, range: Range<VirtualAddress>);

    /// Ensures modifications to the page table are visible to the calling CPU.
    ///
    /// The CPU may cache address translations, so after e.g. removing write permission from an
    /// entry a stale cached translation might still allow writes without trapping. This flushes
    /// any such cached translations, a so called **"TLB flush"**.
    fn fence_all(&self);
}

/// The type representing a single page table entry on this architecture.
///
/// Besides the classic _vacant_, _table_ and _leaf_ states an entry can be a _swap descriptor_: a
/// non-present entry that remembers where the evicted page lives and still carries the page's
/// soft-dirty marker (in an architecture specific repurposed bit).
pub trait PageTableEntry: Copy + Send + Sync + fmt::Debug {
    /// Returns a new _vacant_ entry, i.e. one that is invalid and will cause a page fault when
    /// its mapping is accessed.
    const VACANT: Self;

    /// Returns a new _leaf_ entry, i.e. one that directly maps a block of physical memory.
    fn new_leaf(address: PhysicalAddress, attributes: MemoryAttributes) -> Self;
    /// Returns a new _table_ entry, i.e. one that refers to another table in the page table hierarchy.
    fn new_table(address: PhysicalAddress) -> Self;
    /// Returns a new _swap descriptor_ referring to the swap `slot`.
    fn new_swap(slot: usize, soft_dirty: bool) -> Self;

    /// Returns `true` if the entry is _vacant_.
    fn is_vacant(&self) -> bool;
    /// Returns `true` if the entry is a _leaf_, i.e. maps a present page.
    fn is_leaf(&self) -> bool;
    /// Returns `true` if the entry is a _table_.
    fn is_table(&self) -> bool;
    /// Returns `true` if the entry is a _swap descriptor_.
    fn is_swap(&self) -> bool;

    /// Returns the physical address stored in this entry.
    ///
    /// This address will either be the base address of another table or the page address of a
    /// physical memory block.
    fn address(&self) -> PhysicalAddress;
    /// Returns the swap slot referenced by a swap descriptor.
    fn swap_slot(&self) -> usize;
    /// Returns the `MemoryAttributes` stored in this entry.
    fn attributes(&self) -> MemoryAttributes;

    /// Returns `true` if the soft-dirty marker of a _leaf_ entry is set.
    fn is_soft_dirty(&self) -> bool;
    fn set_soft_dirty(&mut self, soft_dirty: bool);
    /// Returns `true` if the soft-dirty marker of a _swap descriptor_ is set.
    fn is_swap_soft_dirty(&self) -> bool;
    fn set_swap_soft_dirty(&mut self, soft_dirty: bool);

    /// Grants or revokes write access of a _leaf_ entry.
    fn set_writable(&mut self, writable: bool);
    /// Records a hardware access to a _leaf_ entry, `write` additionally marks it as dirty.
    fn set_accessed(&mut self, write: bool);
}

/// Returns the number of virtual address bits translated by the hierarchy `levels`, i.e. the bits
/// covered by the root table.
pub const fn translated_bits(levels: &[PageTableLevel]) -> u32 {
    match levels.first() {
        Some(root) => root.page_size().trailing_zeros() + root.entries().trailing_zeros(),
        None => 0,
    }
}

/// Returns `true` if the page tables of `A` can translate every address of `range`.
pub fn translates<A: Arch>(range: &Range<VirtualAddress>) -> bool {
    match range.end.checked_sub(1) {
        Some(last) => range.start.is_translatable::<A>() && last.is_translatable::<A>(),
        None => range.start.is_translatable::<A>(),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PageTableLevel {
    /// The name of the page table level, for debugging purposes
    name: &'static str,
    /// The number of entries in this page table level
    entries: usize,
    /// The number of bytes mapped by a single entry of this level
    page_size: usize,
}

impl PageTableLevel {
    /// # Panics
    ///
    /// Panics if `entries` or `page_size` is not a power of two.
    pub const fn new(name: &'static str, entries: usize, page_size: usize) -> Self {
        assert!(entries.is_power_of_two());
        assert!(page_size.is_power_of_two());

        Self {
            name,
            entries,
            page_size,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub const fn entries(&self) -> usize {
        self.entries
    }

    /// The number of bytes mapped by a single entry of this level.
    pub const fn page_size(&self) -> usize {
        self.page_size
    }

    /// Returns the index of the entry in a table of this level that translates `virt`.
    ///
    /// Bits above the level are masked off, callers must make sure `virt` is translatable at all.
    pub const fn pte_index_of(&self, virt: VirtualAddress) -> usize {
        (virt.get() >> self.page_size.trailing_zeros()) & (self.entries - 1)
    }
}
