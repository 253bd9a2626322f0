// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

/// The default ceiling on the number of regions per address space, same as Linux' `vm.max_map_count`.
pub const DEFAULT_MAX_MAP_COUNT: usize = 65530;

/// Per address space tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// The maximum number of regions an address space may consist of. Splits that would exceed this
    /// fail with [`Error::ResourceExhausted`][crate::Error::ResourceExhausted].
    pub max_map_count: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub const fn new() -> Self {
        Self {
            max_map_count: DEFAULT_MAX_MAP_COUNT,
        }
    }

    #[must_use]
    pub const fn with_max_map_count(mut self, max_map_count: usize) -> Self {
        self.max_map_count = max_map_count;
        self
    }
}
