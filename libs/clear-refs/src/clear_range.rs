// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;
use core::ops::Range;

use lock_api::RawRwLock;

use crate::arch::{self, Arch};
use crate::{
    AddressRangeExt, AddressSpace, ClearOutcome, Error, Flush, Pid, ProcessTable,
    VirtualAddress,
};

/// The stages a range clear moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    /// Exclusive access to the address space is held.
    SpaceAcquired,
    /// Region boundaries are being aligned to the range.
    Splitting,
    /// Page table entries are being cleared.
    Walking,
    Done,
    Error,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "init",
            Phase::SpaceAcquired => "space-acquired",
            Phase::Splitting => "splitting",
            Phase::Walking => "walking",
            Phase::Done => "done",
            Phase::Error => "error",
        };
        f.write_str(name)
    }
}

/// Clears the soft-dirty marker of every page in `range` of the address space of process `pid`.
///
/// The address space is locked exclusively for the whole operation. Regions are first split so that
/// `range` is covered by regions of its own with soft-dirty tracking disabled, then the page table
/// entries of those regions have their marker cleared. Regions and pages outside of `range` are not
/// touched.
///
/// # Errors
///
/// - [`Error::InvalidRange`] if `range` is empty, not page-aligned or reaches beyond the address
///   width the page tables translate. Nothing is touched.
/// - [`Error::NoSuchProcess`] or [`Error::NoAddressSpace`] if `pid` cannot be resolved. Nothing is
///   touched.
/// - [`Error::NoMapping`] if parts of `range` are not covered by any region. All mapped parts of
///   `range` have still been processed.
/// - [`Error::ResourceExhausted`] or [`Error::OutOfMemory`] if a required split failed. Processing
///   stops right away, splits done so far are kept and no page has been touched.
pub fn clear_range<A, R>(
    processes: &ProcessTable<A, R>,
    pid: Pid,
    range: Range<VirtualAddress>,
) -> crate::Result<()>
where
    A: Arch,
    R: RawRwLock,
{
    let mut op = RangeClear::new(range);
    log::debug!("clear_range {pid} {:?}", op.range);

    let res = op.validate::<A>().and_then(|()| {
        let handle = processes.acquire(pid)?;
        let mut aspace = handle.write();
        op.transition(Phase::SpaceAcquired);

        op.apply(&mut aspace)
    });

    op.finish(res)
}

impl<A: Arch> AddressSpace<A> {
    /// Clears the soft-dirty marker of every page in `range` of this address space.
    ///
    /// This is [`clear_range`] for callers that already have exclusive access to the address space.
    ///
    /// # Errors
    ///
    /// Same as [`clear_range`], minus the process resolution errors.
    pub fn clear_soft_dirty(&mut self, range: Range<VirtualAddress>) -> crate::Result<()> {
        let mut op = RangeClear::new(range);

        let res = op.validate::<A>().and_then(|()| {
            op.transition(Phase::SpaceAcquired);
            op.apply(self)
        });

        op.finish(res)
    }
}

#[derive(Debug, Default)]
struct ClearStats {
    regions: usize,
    present: usize,
    swapped: usize,
}

struct RangeClear {
    range: Range<VirtualAddress>,
    phase: Phase,
    /// The first non-fatal error, reported once everything else is done.
    deferred: Option<Error>,
    stats: ClearStats,
}

impl RangeClear {
    fn new(range: Range<VirtualAddress>) -> Self {
        Self {
            range,
            phase: Phase::Init,
            deferred: None,
            stats: ClearStats::default(),
        }
    }

    fn transition(&mut self, to: Phase) {
        log::trace!("{:?}: {} -> {to}", self.range, self.phase);
        self.phase = to;
    }

    fn defer(&mut self, err: Error) {
        debug_assert!(!err.is_fatal());
        self.deferred.get_or_insert(err);
    }

    fn validate<A: Arch>(&self) -> crate::Result<()> {
        debug_assert_eq!(self.phase, Phase::Init);

        if self.range.is_empty()
            || !self.range.is_aligned_to(A::PAGE_SIZE)
            || !arch::translates::<A>(&self.range)
        {
            log::debug!("invalid range {:?}", self.range);
            return Err(Error::InvalidRange);
        }

        Ok(())
    }

    /// Runs the splitting and walking phases against `aspace`, to which the caller must hold
    /// exclusive access.
    fn apply<A: Arch>(&mut self, aspace: &mut AddressSpace<A>) -> crate::Result<()> {
        debug_assert_eq!(self.phase, Phase::SpaceAcquired);

        self.transition(Phase::Splitting);
        self.split(aspace)?;
        if cfg!(debug_assertions) {
            aspace.assert_valid("after splitting");
        }

        self.transition(Phase::Walking);
        self.walk(aspace);

        match self.deferred {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Aligns region boundaries with the range, disabling soft-dirty tracking for the regions inside.
    ///
    /// Gaps between regions are skipped and reported as [`Error::NoMapping`] at the end, region
    /// limit and allocation failures abort immediately.
    fn split<A: Arch>(&mut self, aspace: &mut AddressSpace<A>) -> crate::Result<()> {
        let regions = &mut aspace.regions;
        let end = self.range.end;
        let mut start = self.range.start;

        // the region containing `start`, or the first one after it
        let mut next = match regions.find_covering(start) {
            (Some(index), _) => Some(index),
            (None, Some(preceding)) => regions.next_after(preceding),
            (None, None) => (!regions.is_empty()).then_some(0),
        };

        while start < end {
            let Some(index) = next else {
                log::trace!("no region after {start}, {start}..{end} is unmapped");
                self.defer(Error::NoMapping);
                break;
            };

            let region_start = regions[index].range.start;
            if region_start >= end {
                log::trace!("{start}..{end} is unmapped");
                self.defer(Error::NoMapping);
                break;
            } else if region_start > start {
                log::trace!("skipping unmapped gap {start}..{region_start}");
                self.defer(Error::NoMapping);
                start = region_start;
            }

            let span = start..end.min(regions[index].range.end);
            let anchor = regions.isolate_cleared(index, span.clone(), &self.range)?;
            self.stats.regions += 1;

            // skip over territory already covered by a merged region
            start = span.end.max(regions[anchor].range.end.min(end));
            next = regions.next_after(anchor);
        }

        Ok(())
    }

    /// Clears the marker of all pages in the range that are covered by a region.
    fn walk<A: Arch>(&mut self, aspace: &mut AddressSpace<A>) {
        let AddressSpace {
            arch,
            regions,
            tables,
            ..
        } = aspace;

        let mut flush: Flush = Flush::new();
        for index in regions.overlapping(self.range.clone()) {
            let covered = regions[index].range.clone().intersect(self.range.clone());

            for page in covered.pages(A::PAGE_SIZE) {
                let Some(mut leaf) = tables.locate(page) else {
                    continue;
                };

                match leaf.clear_marker(&mut flush) {
                    ClearOutcome::Present => self.stats.present += 1,
                    ClearOutcome::Swapped => self.stats.swapped += 1,
                    ClearOutcome::Hole => {}
                }
            }
        }
        flush.flush(arch);
    }

    fn finish(mut self, res: crate::Result<()>) -> crate::Result<()> {
        match res {
            Ok(()) => self.transition(Phase::Done),
            Err(err) => {
                log::debug!("{:?}: {err}", self.range);
                self.transition(Phase::Error);
            }
        }

        log::debug!(
            "{:?}: {} regions, {} present and {} swapped pages cleared",
            self.range,
            self.stats.regions,
            self.stats.present,
            self.stats.swapped
        );

        res
    }
}
