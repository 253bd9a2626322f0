// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

#![cfg_attr(not(test), no_std)]

//! Range-scoped clearing of the per-page _soft-dirty_ marker.
//!
//! The soft-dirty marker is set by the page fault path whenever a page is written and is used by
//! checkpoint/restore, live migration and similar tools to find pages that changed since some point
//! in time. The classic interface for resetting the marker works on an entire address space at once,
//! this crate provides the finer grained [`clear_range`] which only touches pages within
//! `[start, end)` of a single address space.
//!
//! Clearing happens in two phases while holding the address space's write lock:
//!
//! 1. **Splitting**: the [`Region`]s overlapping the range are split (or merged with already cleared
//!    neighbours) so that region boundaries line up with the range and the regions inside of it carry
//!    no [`RegionFlags::SOFT_DIRTY`] anymore.
//! 2. **Walking**: the page tables covering the range are walked and each leaf entry has its marker
//!    cleared. Present pages are additionally write-protected, so the next write traps and re-arms the
//!    marker.
//!
//! Unmapped holes inside the range don't stop the operation, they are reported as
//! [`Error::NoMapping`] once everything that _is_ mapped has been processed.

extern crate alloc;

mod address;
mod address_range;
mod address_space;
pub mod arch;
mod clear_range;
mod config;
mod error;
mod flush;
mod memory_attributes;
mod process;
mod region;
mod region_index;
mod split_merge;
mod table;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
mod walker;

pub use address::{PhysicalAddress, VirtualAddress};
pub use address_range::AddressRangeExt;
pub use address_space::{AddressSpace, PageFaultFlags, PageState};
pub use arch::Arch;
pub use clear_range::{Phase, clear_range};
pub use config::Config;
pub use error::{Error, Result};
pub use flush::Flush;
pub use memory_attributes::MemoryAttributes;
pub use process::{AddressSpaceHandle, Pid, ProcessTable};
pub use region::{Backing, FileId, MemoryPolicy, Region, RegionFlags};
pub use region_index::RegionIndex;
pub use walker::{ClearOutcome, LeafEntry};

pub const KIB: usize = 1024;
pub const MIB: usize = KIB * 1024;
pub const GIB: usize = MIB * 1024;
