// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

mycelium_bitfield::bitfield! {
    /// Hardware enforced permissions of a single page mapping.
    ///
    /// Unlike [`RegionFlags`][crate::RegionFlags] these describe what the MMU _currently_ allows for
    /// a page, which may be less than what its region allows. Most importantly a page of a writable
    /// region is mapped without [`Self::WRITE`] until it is first written, and again after its
    /// soft-dirty marker has been cleared.
    #[derive(PartialEq, Eq)]
    pub struct MemoryAttributes<u8> {
        /// If set, reading from the page is allowed.
        pub const READ: bool;
        /// If set, writing to the page is allowed.
        pub const WRITE: bool;
        /// If set, executing code from the page is allowed.
        pub const EXECUTE: bool;
    }
}

impl MemoryAttributes {
    pub fn allows_read(&self) -> bool {
        self.get(Self::READ)
    }

    pub fn allows_write(&self) -> bool {
        self.get(Self::WRITE)
    }

    pub fn allows_execution(&self) -> bool {
        self.get(Self::EXECUTE)
    }
}
