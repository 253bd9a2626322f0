// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use alloc::vec::Vec;
use core::ops::{Index, Range};
use core::slice;

use crate::{AddressRangeExt, Error, Region, RegionFlags, VirtualAddress};

/// The regions of an address space, sorted by start address and pairwise non-overlapping.
///
/// Regions are addressed by their position in the index. Positions are only stable until the next
/// mutation, which is why every mutating method returns the position of the region it produced.
#[derive(Debug)]
pub struct RegionIndex {
    regions: Vec<Region>,
    max_regions: usize,
    page_size: usize,
}

impl Index<usize> for RegionIndex {
    type Output = Region;

    fn index(&self, index: usize) -> &Self::Output {
        &self.regions[index]
    }
}

impl RegionIndex {
    pub const fn new(max_regions: usize, page_size: usize) -> Self {
        Self {
            regions: Vec::new(),
            max_regions,
            page_size,
        }
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn max_regions(&self) -> usize {
        self.max_regions
    }

    pub fn iter(&self) -> slice::Iter<'_, Region> {
        self.regions.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Region> {
        self.regions.get(index)
    }

    /// Returns the position of the region containing `address` (if any) together with the position
    /// of the region immediately preceding `address` in sort order.
    pub fn find_covering(&self, address: VirtualAddress) -> (Option<usize>, Option<usize>) {
        // number of regions starting at or before `address`
        let after = self
            .regions
            .partition_point(|region| region.range.start <= address);

        match after.checked_sub(1) {
            Some(candidate) if self.regions[candidate].range.contains(&address) => {
                (Some(candidate), candidate.checked_sub(1))
            }
            Some(candidate) => (None, Some(candidate)),
            None => (None, None),
        }
    }

    /// Returns the successor of the region at `index` in sort order.
    pub fn next_after(&self, index: usize) -> Option<usize> {
        let next = index + 1;
        (next < self.regions.len()).then_some(next)
    }

    /// Returns the positions of all regions overlapping `range`.
    pub fn overlapping(&self, range: Range<VirtualAddress>) -> Range<usize> {
        let start = self
            .regions
            .partition_point(|region| region.range.end <= range.start);
        let end = self
            .regions
            .partition_point(|region| region.range.start < range.end);
        start..end.max(start)
    }

    /// Inserts a new region.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyMapped`] if the region overlaps an existing one,
    /// [`Error::ResourceExhausted`] if the index is full, and [`Error::OutOfMemory`] if the index
    /// cannot grow.
    pub fn insert(&mut self, region: Region) -> crate::Result<usize> {
        debug_assert!(!region.range.is_empty());

        let overlapping = self.overlapping(region.range.clone());
        if !overlapping.is_empty() {
            return Err(Error::AlreadyMapped);
        }
        self.reserve_one()?;

        self.regions.insert(overlapping.start, region);
        Ok(overlapping.start)
    }

    /// Splits the region at `index` in two at `at`, returning the position of the upper half.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResourceExhausted`] if the index already holds the maximum number of
    /// regions, and [`Error::OutOfMemory`] if the index cannot grow.
    pub fn split(&mut self, index: usize, at: VirtualAddress) -> crate::Result<usize> {
        self.reserve_one()?;

        let tail = self.regions[index].split_off(at, self.page_size);
        log::trace!(
            "split {:?} | {:?}",
            self.regions[index].range,
            tail.range
        );
        self.regions.insert(index + 1, tail);

        Ok(index + 1)
    }

    /// Tries to coalesce the sub-range `span` of the region at `index`, re-flagged with `flags`,
    /// into its neighbours.
    ///
    /// The preceding region is extended over `span` if `span` starts where the region at `index` starts,
    /// the two would be indistinguishable, and `may_merge` allows touching it. The following
    /// region is extended down over `span` under the mirrored conditions. If both apply, all three
    /// are coalesced into one. Whatever is left of the region at `index` is shrunk or removed.
    ///
    /// Returns the position of the region now containing `span`, or `None` if nothing could be merged.
    /// Merging never increases the number of regions and therefore cannot fail.
    pub fn merge(
        &mut self,
        index: usize,
        span: Range<VirtualAddress>,
        flags: RegionFlags,
        may_merge: impl Fn(&Region) -> bool,
    ) -> Option<usize> {
        let region = &self.regions[index];
        debug_assert!(region.range.start <= span.start && span.end <= region.range.end);

        let backing = region.backing_at(span.start, self.page_size);
        let policy = region.policy;
        let covers_start = span.start == region.range.start;
        let covers_end = span.end == region.range.end;

        let merge_prev = covers_start
            && index.checked_sub(1).is_some_and(|prev| {
                let prev = &self.regions[prev];
                may_merge(prev) && prev.can_append(span.start, flags, backing, policy, self.page_size)
            });
        let merge_next = covers_end
            && self.regions.get(index + 1).is_some_and(|next| {
                let pages = span.len() / self.page_size;
                may_merge(next)
                    && next.range.start == span.end
                    && next.flags == flags
                    && next.policy == policy
                    && backing.is_continued_by(pages, next.backing)
            });

        match (merge_prev, merge_next) {
            (true, true) => {
                // prev absorbs both the region at `index` and next
                let next = self.regions.remove(index + 1);
                self.regions.remove(index);
                self.regions[index - 1].range.end = next.range.end;
                log::trace!("merged {:?} with both neighbours", span);
                Some(index - 1)
            }
            (true, false) => {
                self.regions[index - 1].range.end = span.end;
                self.shrink_or_remove(index, span.clone());
                log::trace!("merged {:?} into preceding region", span);
                Some(index - 1)
            }
            (false, true) => {
                let next = &mut self.regions[index + 1];
                next.range.start = span.start;
                next.backing = backing;
                log::trace!("merged {:?} into following region", span);
                if self.shrink_or_remove(index, span) {
                    Some(index)
                } else {
                    Some(index + 1)
                }
            }
            (false, false) => None,
        }
    }

    /// Replaces the flags of the region at `index`.
    pub fn set_flags(&mut self, index: usize, flags: RegionFlags) {
        self.regions[index].flags = flags;
    }

    /// Removes `span` from the region at `index`, which must share at least one end with it.
    /// Returns `true` if the region is gone entirely.
    fn shrink_or_remove(&mut self, index: usize, span: Range<VirtualAddress>) -> bool {
        let page_size = self.page_size;
        let region = &mut self.regions[index];

        if region.range == span {
            self.regions.remove(index);
            true
        } else if region.range.start == span.start {
            region.backing = region.backing_at(span.end, page_size);
            region.range.start = span.end;
            false
        } else {
            debug_assert_eq!(region.range.end, span.end);
            region.range.end = span.start;
            false
        }
    }

    fn reserve_one(&mut self) -> crate::Result<()> {
        if self.regions.len() >= self.max_regions {
            log::debug!(
                "region limit of {} reached, refusing to add another region",
                self.max_regions
            );
            return Err(Error::ResourceExhausted);
        }
        self.regions.try_reserve(1)?;
        Ok(())
    }

    /// Asserts the invariants of the index: every region is non-empty and page-aligned, and the
    /// regions are sorted and don't overlap.
    ///
    /// # Panics
    ///
    /// Panics if any of the invariants is violated.
    pub fn assert_valid(&self, ctx: &str) {
        assert!(
            self.regions.len() <= self.max_regions,
            "{ctx}: {} regions exceed the limit of {}",
            self.regions.len(),
            self.max_regions
        );

        for region in &self.regions {
            assert!(
                region.range.start < region.range.end,
                "{ctx}: empty region {region:?}"
            );
            assert!(
                region.range.is_aligned_to(self.page_size),
                "{ctx}: region {region:?} not page-aligned"
            );
        }

        for pair in self.regions.windows(2) {
            assert!(
                pair[0].range.end <= pair[1].range.start,
                "{ctx}: regions {:?} and {:?} overlap or are out of order",
                pair[0],
                pair[1]
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;
    use crate::{Backing, FileId, MemoryPolicy};

    const PAGE: usize = 4096;

    fn pages(start: usize, end: usize) -> Range<VirtualAddress> {
        VirtualAddress::new(start * PAGE)..VirtualAddress::new(end * PAGE)
    }

    fn anon(range: Range<VirtualAddress>, flags: RegionFlags) -> Region {
        Region::new(range, flags, Backing::Anonymous, MemoryPolicy::Default)
    }

    fn index_of(regions: &[Region], max: usize) -> RegionIndex {
        let mut index = RegionIndex::new(max, PAGE);
        for region in regions {
            index.insert(region.clone()).unwrap();
        }
        index
    }

    fn ranges(index: &RegionIndex) -> vec::Vec<Range<VirtualAddress>> {
        index.iter().map(|r| r.range.clone()).collect()
    }

    const TRACKED: RegionFlags = RegionFlags::READ
        .union(RegionFlags::WRITE)
        .union(RegionFlags::SOFT_DIRTY);
    const CLEARED: RegionFlags = RegionFlags::READ.union(RegionFlags::WRITE);

    #[test]
    fn find_covering() {
        let index = index_of(
            &[anon(pages(0, 4), TRACKED), anon(pages(8, 12), TRACKED)],
            16,
        );

        assert_eq!(index.find_covering(VirtualAddress::new(0)), (Some(0), None));
        assert_eq!(index.find_covering(VirtualAddress::new(2 * PAGE)), (Some(0), None));
        // in the gap
        assert_eq!(index.find_covering(VirtualAddress::new(5 * PAGE)), (None, Some(0)));
        assert_eq!(index.find_covering(VirtualAddress::new(8 * PAGE)), (Some(1), Some(0)));
        assert_eq!(index.find_covering(VirtualAddress::new(12 * PAGE)), (None, Some(1)));
    }

    #[test]
    fn find_covering_empty() {
        let index = RegionIndex::new(16, PAGE);
        assert_eq!(index.find_covering(VirtualAddress::new(0)), (None, None));
    }

    #[test]
    fn next_after() {
        let index = index_of(
            &[anon(pages(0, 4), TRACKED), anon(pages(8, 12), TRACKED)],
            16,
        );

        assert_eq!(index.next_after(0), Some(1));
        assert_eq!(index.next_after(1), None);
    }

    #[test]
    fn overlapping() {
        let index = index_of(
            &[
                anon(pages(0, 4), TRACKED),
                anon(pages(8, 12), TRACKED),
                anon(pages(12, 16), TRACKED),
            ],
            16,
        );

        assert_eq!(index.overlapping(pages(2, 9)), 0..2);
        assert_eq!(index.overlapping(pages(4, 8)), 1..1);
        assert_eq!(index.overlapping(pages(12, 20)), 2..3);
        assert_eq!(index.overlapping(pages(0, 20)), 0..3);
    }

    #[test]
    fn insert_rejects_overlap() {
        let mut index = index_of(&[anon(pages(4, 8), TRACKED)], 16);

        assert_eq!(
            index.insert(anon(pages(6, 10), TRACKED)),
            Err(Error::AlreadyMapped)
        );
        assert_eq!(index.insert(anon(pages(0, 4), TRACKED)), Ok(0));
        assert_eq!(index.insert(anon(pages(8, 10), TRACKED)), Ok(2));
        index.assert_valid("insert_rejects_overlap");
    }

    #[test]
    fn split_respects_limit() {
        let mut index = index_of(&[anon(pages(0, 10), TRACKED)], 2);

        assert_eq!(index.split(0, VirtualAddress::new(4 * PAGE)), Ok(1));
        assert_eq!(ranges(&index), [pages(0, 4), pages(4, 10)]);

        assert_eq!(
            index.split(1, VirtualAddress::new(6 * PAGE)),
            Err(Error::ResourceExhausted)
        );
        assert_eq!(ranges(&index), [pages(0, 4), pages(4, 10)]);
        index.assert_valid("split_respects_limit");
    }

    #[test]
    fn merge_into_prev() {
        let mut index = index_of(
            &[anon(pages(0, 4), CLEARED), anon(pages(4, 10), TRACKED)],
            16,
        );

        assert_eq!(index.merge(1, pages(4, 6), CLEARED, |_| true), Some(0));
        assert_eq!(ranges(&index), [pages(0, 6), pages(6, 10)]);
        assert_eq!(index[0].flags, CLEARED);
        assert_eq!(index[1].flags, TRACKED);
        index.assert_valid("merge_into_prev");
    }

    #[test]
    fn merge_into_next() {
        let mut index = index_of(
            &[anon(pages(0, 6), TRACKED), anon(pages(6, 10), CLEARED)],
            16,
        );

        assert_eq!(index.merge(0, pages(3, 6), CLEARED, |_| true), Some(1));
        assert_eq!(ranges(&index), [pages(0, 3), pages(3, 10)]);
        assert_eq!(index[1].flags, CLEARED);
        index.assert_valid("merge_into_next");
    }

    #[test]
    fn merge_whole_region_into_next() {
        let mut index = index_of(
            &[anon(pages(0, 6), TRACKED), anon(pages(6, 10), CLEARED)],
            16,
        );

        assert_eq!(index.merge(0, pages(0, 6), CLEARED, |_| true), Some(0));
        assert_eq!(ranges(&index), [pages(0, 10)]);
    }

    #[test]
    fn merge_with_both_neighbours() {
        let mut index = index_of(
            &[
                anon(pages(0, 2), CLEARED),
                anon(pages(2, 4), TRACKED),
                anon(pages(4, 6), CLEARED),
            ],
            16,
        );

        assert_eq!(index.merge(1, pages(2, 4), CLEARED, |_| true), Some(0));
        assert_eq!(ranges(&index), [pages(0, 6)]);
        assert_eq!(index[0].flags, CLEARED);
    }

    #[test]
    fn merge_respects_predicate() {
        let mut index = index_of(
            &[anon(pages(0, 4), CLEARED), anon(pages(4, 10), TRACKED)],
            16,
        );

        assert_eq!(index.merge(1, pages(4, 6), CLEARED, |_| false), None);
        assert_eq!(ranges(&index), [pages(0, 4), pages(4, 10)]);
    }

    #[test]
    fn merge_requires_contiguous_file_offsets() {
        let mut index = index_of(
            &[
                Region::new(
                    pages(0, 4),
                    CLEARED,
                    Backing::File {
                        file: FileId(1),
                        offset: 0,
                    },
                    MemoryPolicy::Default,
                ),
                Region::new(
                    pages(4, 8),
                    TRACKED,
                    Backing::File {
                        file: FileId(1),
                        offset: 100,
                    },
                    MemoryPolicy::Default,
                ),
            ],
            16,
        );

        assert_eq!(index.merge(1, pages(4, 8), CLEARED, |_| true), None);
    }

    #[test]
    fn shrinking_from_the_front_advances_file_offset() {
        let mut index = index_of(
            &[
                Region::new(
                    pages(0, 4),
                    CLEARED,
                    Backing::File {
                        file: FileId(1),
                        offset: 0,
                    },
                    MemoryPolicy::Default,
                ),
                Region::new(
                    pages(4, 8),
                    TRACKED,
                    Backing::File {
                        file: FileId(1),
                        offset: 4,
                    },
                    MemoryPolicy::Default,
                ),
            ],
            16,
        );

        assert_eq!(index.merge(1, pages(4, 6), CLEARED, |_| true), Some(0));
        assert_eq!(
            index[1].backing,
            Backing::File {
                file: FileId(1),
                offset: 6
            }
        );
    }
}
