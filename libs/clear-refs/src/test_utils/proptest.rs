// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! `proptest` strategies for soft-dirty tests

use alloc::vec::Vec;
use core::ops::Range;

use proptest::prelude::Strategy;

use crate::VirtualAddress;
use crate::test_utils::pages;

/// Produces *sorted*, *non-overlapping* page ranges. Consecutive ranges are separated by a gap of
/// `0..=max_gap` pages, where a zero gap makes them adjacent.
pub fn region_layout(
    num_regions: Range<usize>,
    max_region_pages: usize,
    max_gap: usize,
) -> impl Strategy<Value = Vec<Range<VirtualAddress>>> {
    proptest::collection::vec((0..=max_gap, 1..=max_region_pages), num_regions).prop_map(
        |gap_len_pairs| {
            let mut start = 0;
            gap_len_pairs
                .into_iter()
                .map(|(gap, len)| {
                    let range = pages(start + gap, start + gap + len);
                    start += gap + len;
                    range
                })
                .collect()
        },
    )
}

/// Produces non-empty page ranges within `0..max_pages`.
pub fn page_range(max_pages: usize) -> impl Strategy<Value = Range<VirtualAddress>> {
    (0..max_pages, 1..=max_pages).prop_map(move |(start, len)| {
        let end = (start + len).min(max_pages);
        pages(start, end.max(start + 1))
    })
}
