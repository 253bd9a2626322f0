// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::ops::Range;

use crate::{RegionFlags, RegionIndex, VirtualAddress};

impl RegionIndex {
    /// Makes the sub-range `span` of the region at `index` its own region with soft-dirty
    /// tracking disabled, and returns the position of the region covering `span` afterwards.
    ///
    /// `bounds` is the range of the whole operation, only neighbours lying entirely inside of it are
    /// considered for merging. This keeps regions outside `bounds` untouched and guarantees no
    /// region ends up straddling `bounds.start` or `bounds.end`.
    ///
    /// If the region already has tracking disabled nothing changes and its position is returned as-is.
    /// This is not rolled back on error: splits done before a failing second split stay in place,
    /// they carry the original flags and are therefore indistinguishable from the unsplit region.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResourceExhausted`][crate::Error::ResourceExhausted] if a required split would
    /// exceed the region limit, and [`Error::OutOfMemory`][crate::Error::OutOfMemory] if the index
    /// cannot grow.
    pub fn isolate_cleared(
        &mut self,
        index: usize,
        span: Range<VirtualAddress>,
        bounds: &Range<VirtualAddress>,
    ) -> crate::Result<usize> {
        let region = &self[index];
        debug_assert!(region.range.start <= span.start && span.end <= region.range.end);
        debug_assert!(bounds.start <= span.start && span.end <= bounds.end);

        let new_flags = region.flags.difference(RegionFlags::SOFT_DIRTY);
        if new_flags == region.flags {
            return Ok(index);
        }

        let within_bounds =
            |neighbour: &crate::Region| bounds.start <= neighbour.range.start && neighbour.range.end <= bounds.end;
        if let Some(merged) = self.merge(index, span.clone(), new_flags, within_bounds) {
            return Ok(merged);
        }

        let mut index = index;
        if span.start != self[index].range.start {
            index = self.split(index, span.start)?;
        }
        if span.end != self[index].range.end {
            self.split(index, span.end)?;
        }
        self.set_flags(index, new_flags);

        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;
    use crate::{Backing, Error, MemoryPolicy, Region};

    const PAGE: usize = 4096;

    const TRACKED: RegionFlags = RegionFlags::READ
        .union(RegionFlags::WRITE)
        .union(RegionFlags::SOFT_DIRTY);
    const CLEARED: RegionFlags = RegionFlags::READ.union(RegionFlags::WRITE);

    fn pages(start: usize, end: usize) -> Range<VirtualAddress> {
        VirtualAddress::new(start * PAGE)..VirtualAddress::new(end * PAGE)
    }

    fn index_of(regions: &[(Range<VirtualAddress>, RegionFlags)], max: usize) -> RegionIndex {
        let mut index = RegionIndex::new(max, PAGE);
        for (range, flags) in regions {
            index
                .insert(Region::new(
                    range.clone(),
                    *flags,
                    Backing::Anonymous,
                    MemoryPolicy::Default,
                ))
                .unwrap();
        }
        index
    }

    fn layout(index: &RegionIndex) -> Vec<(Range<VirtualAddress>, RegionFlags)> {
        index.iter().map(|r| (r.range.clone(), r.flags)).collect()
    }

    #[test]
    fn split_in_the_middle() {
        let mut index = index_of(&[(pages(0, 100), TRACKED)], 16);

        let isolated = index
            .isolate_cleared(0, pages(40, 60), &pages(40, 60))
            .unwrap();

        assert_eq!(isolated, 1);
        assert_eq!(
            layout(&index),
            [
                (pages(0, 40), TRACKED),
                (pages(40, 60), CLEARED),
                (pages(60, 100), TRACKED)
            ]
        );
        index.assert_valid("split_in_the_middle");
    }

    #[test]
    fn split_at_start() {
        let mut index = index_of(&[(pages(0, 100), TRACKED)], 16);

        let isolated = index
            .isolate_cleared(0, pages(0, 60), &pages(0, 60))
            .unwrap();

        assert_eq!(isolated, 0);
        assert_eq!(
            layout(&index),
            [(pages(0, 60), CLEARED), (pages(60, 100), TRACKED)]
        );
    }

    #[test]
    fn whole_region() {
        let mut index = index_of(&[(pages(0, 100), TRACKED)], 16);

        let isolated = index
            .isolate_cleared(0, pages(0, 100), &pages(0, 200))
            .unwrap();

        assert_eq!(isolated, 0);
        assert_eq!(layout(&index), [(pages(0, 100), CLEARED)]);
    }

    #[test]
    fn already_cleared_is_untouched() {
        let mut index = index_of(&[(pages(0, 100), CLEARED)], 1);

        let isolated = index
            .isolate_cleared(0, pages(40, 60), &pages(40, 60))
            .unwrap();

        assert_eq!(isolated, 0);
        assert_eq!(layout(&index), [(pages(0, 100), CLEARED)]);
    }

    #[test]
    fn merges_with_cleared_neighbour_inside_bounds() {
        let mut index = index_of(
            &[(pages(0, 10), CLEARED), (pages(10, 20), TRACKED)],
            16,
        );

        let isolated = index
            .isolate_cleared(1, pages(10, 15), &pages(0, 15))
            .unwrap();

        assert_eq!(isolated, 0);
        assert_eq!(
            layout(&index),
            [(pages(0, 15), CLEARED), (pages(15, 20), TRACKED)]
        );
    }

    #[test]
    fn does_not_merge_with_neighbour_outside_bounds() {
        let mut index = index_of(
            &[(pages(0, 10), CLEARED), (pages(10, 20), TRACKED)],
            16,
        );

        let isolated = index
            .isolate_cleared(1, pages(10, 15), &pages(10, 15))
            .unwrap();

        assert_eq!(isolated, 1);
        assert_eq!(
            layout(&index),
            [
                (pages(0, 10), CLEARED),
                (pages(10, 15), CLEARED),
                (pages(15, 20), TRACKED)
            ]
        );
    }

    #[test]
    fn second_split_exhausts_limit() {
        let mut index = index_of(&[(pages(0, 100), TRACKED)], 2);

        assert_eq!(
            index.isolate_cleared(0, pages(40, 60), &pages(40, 60)),
            Err(Error::ResourceExhausted)
        );
        // the first split stays, flags are unchanged
        assert_eq!(
            layout(&index),
            [(pages(0, 40), TRACKED), (pages(40, 100), TRACKED)]
        );
    }

    #[test]
    fn first_split_exhausts_limit() {
        let mut index = index_of(&[(pages(0, 100), TRACKED)], 1);

        assert_eq!(
            index.isolate_cleared(0, pages(40, 60), &pages(40, 60)),
            Err(Error::ResourceExhausted)
        );
        assert_eq!(layout(&index), [(pages(0, 100), TRACKED)]);
    }
}
