// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::ops::Range;

use crate::arch::PageTableLevel;
use crate::{AddressRangeExt, Arch, GIB, KIB, MIB, MemoryAttributes, PhysicalAddress, VirtualAddress};

/// The four level RISC-V Sv48 translation scheme.
#[expect(clippy::identity_op, reason = "formatting")]
pub const RISCV64_SV48_LEVELS: [PageTableLevel; 4] = [
    PageTableLevel::new("top", 512, 512 * GIB),
    PageTableLevel::new("upper", 512, 1 * GIB),
    PageTableLevel::new("middle", 512, 2 * MIB),
    PageTableLevel::new("leaf", 512, 4 * KIB),
];

const PAGE_SHIFT: u32 = 12;

pub struct Riscv64 {
    asid: u16,
}

impl Riscv64 {
    pub const fn new(asid: u16) -> Self {
        Self { asid }
    }
}

impl Arch for Riscv64 {
    const PAGE_SIZE: usize = 4 * KIB;
    const LEVELS: &'static [PageTableLevel] = &RISCV64_SV48_LEVELS;
    type PageTableEntry = PageTableEntry;

    fn fence(&self, address_range: Range<VirtualAddress>) {
        for page in address_range.pages(Self::PAGE_SIZE) {
            sfence_vma(page, self.asid);
        }
    }

    fn fence_all(&self) {
        sfence_vma_all();
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "riscv64")] {
        fn sfence_vma(address: VirtualAddress, asid: u16) {
            // Safety: sfence.vma only orders page table accesses, it has no memory safety requirements
            unsafe {
                core::arch::asm!(
                    "sfence.vma {addr}, {asid}",
                    addr = in(reg) address.get(),
                    asid = in(reg) usize::from(asid),
                    options(nostack)
                );
            }
        }

        fn sfence_vma_all() {
            // Safety: sfence.vma only orders page table accesses, it has no memory safety requirements
            unsafe {
                core::arch::asm!("sfence.vma", options(nostack));
            }
        }
    } else {
        fn sfence_vma(address: VirtualAddress, asid: u16) {
            log::trace!("sfence.vma {address}, {asid} (no-op on this host)");
        }

        fn sfence_vma_all() {
            log::trace!("sfence.vma (no-op on this host)");
        }
    }
}

mycelium_bitfield::bitfield! {
    /// A Sv48 page table entry.
    ///
    /// The two bits reserved for supervisor software hold the soft-dirty marker and the swap
    /// descriptor tag. A swap descriptor is an entry with [`Self::VALID`] clear and [`Self::SWAPPED`]
    /// set, its [`Self::ADDRESS`] field holds the swap slot and, because the hardware never looks at
    /// the permission bits of an invalid entry, [`Self::WRITE`] is repurposed as the marker.
    #[derive(PartialEq, Eq)]
    pub struct PageTableEntry<usize> {
        /// The entry is valid. Accessing a page through an invalid entry raises a page fault.
        const VALID: bool;
        const READ: bool;
        const WRITE: bool;
        const EXECUTE: bool;
        /// The page is accessible in U-mode.
        const USER: bool;
        /// The mapping exists in all address spaces.
        const GLOBAL: bool;
        /// The page has been read, written or fetched from since this bit was last cleared.
        const ACCESSED: bool;
        /// The page has been written since this bit was last cleared.
        const DIRTY: bool;
        /// The page has been written since the last soft-dirty clear.
        const SOFT_DIRTY: bool;
        /// The entry is a swap descriptor.
        const SWAPPED: bool;
        /// The physical page number. This will either point to another page table or
        /// to an aligned block of physical memory. Swap descriptors store their slot here.
        const ADDRESS = 44;
        // Reserved, must be set to zero
        const _RESERVED = 7;
        /// Page-based memory type (Svpbmt), always zero here.
        const PBMT = 2;
        /// Indicates the PTE is part of a larger naturally aligned mapping (Svnapot).
        const NAPOT = 1;
    }
}

impl super::PageTableEntry for PageTableEntry {
    const VACANT: Self = Self::new();

    fn new_leaf(address: PhysicalAddress, attributes: MemoryAttributes) -> Self {
        Self::new()
            .with(Self::VALID, true)
            .with(Self::ADDRESS, address.get() >> PAGE_SHIFT)
            .with(Self::READ, attributes.allows_read())
            .with(Self::WRITE, attributes.allows_write())
            .with(Self::EXECUTE, attributes.allows_execution())
    }

    fn new_table(address: PhysicalAddress) -> Self {
        Self::new()
            .with(Self::VALID, true)
            .with(Self::ADDRESS, address.get() >> PAGE_SHIFT)
    }

    fn new_swap(slot: usize, soft_dirty: bool) -> Self {
        Self::new()
            .with(Self::SWAPPED, true)
            .with(Self::ADDRESS, slot)
            .with(Self::WRITE, soft_dirty)
    }

    fn is_vacant(&self) -> bool {
        !self.get(Self::VALID) && !self.get(Self::SWAPPED)
    }

    fn is_leaf(&self) -> bool {
        self.get(Self::VALID)
            && (self.get(Self::READ) || self.get(Self::WRITE) || self.get(Self::EXECUTE))
    }

    fn is_table(&self) -> bool {
        self.get(Self::VALID)
            && !self.get(Self::READ)
            && !self.get(Self::WRITE)
            && !self.get(Self::EXECUTE)
    }

    fn is_swap(&self) -> bool {
        !self.get(Self::VALID) && self.get(Self::SWAPPED)
    }

    fn address(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.get(Self::ADDRESS) << PAGE_SHIFT)
    }

    fn swap_slot(&self) -> usize {
        debug_assert!(self.is_swap());
        self.get(Self::ADDRESS)
    }

    fn attributes(&self) -> MemoryAttributes {
        MemoryAttributes::new()
            .with(MemoryAttributes::READ, self.get(Self::READ))
            .with(MemoryAttributes::WRITE, self.get(Self::WRITE))
            .with(MemoryAttributes::EXECUTE, self.get(Self::EXECUTE))
    }

    fn is_soft_dirty(&self) -> bool {
        self.get(Self::SOFT_DIRTY)
    }

    fn set_soft_dirty(&mut self, soft_dirty: bool) {
        debug_assert!(self.is_leaf());
        self.set(Self::SOFT_DIRTY, soft_dirty);
    }

    fn is_swap_soft_dirty(&self) -> bool {
        self.get(Self::WRITE)
    }

    fn set_swap_soft_dirty(&mut self, soft_dirty: bool) {
        debug_assert!(self.is_swap());
        self.set(Self::WRITE, soft_dirty);
    }

    fn set_writable(&mut self, writable: bool) {
        debug_assert!(self.is_leaf());
        self.set(Self::WRITE, writable);
    }

    fn set_accessed(&mut self, write: bool) {
        self.set(Self::ACCESSED, true);
        if write {
            self.set(Self::DIRTY, true);
        }
    }
}
