// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::ops::Range;

use clear_refs::{Arch, Error, Pid, ProcessTable, VirtualAddress};
use lock_api::RawRwLock;

use crate::{CLEAR_REFS_MAGIC, CtlError, Request};

/// The receiving end of range clear requests.
pub struct ControlChannel<'a, A: Arch, R: RawRwLock> {
    processes: &'a ProcessTable<A, R>,
    magic: u32,
}

impl<'a, A: Arch, R: RawRwLock> ControlChannel<'a, A, R> {
    pub const fn new(processes: &'a ProcessTable<A, R>) -> Self {
        Self {
            processes,
            magic: CLEAR_REFS_MAGIC,
        }
    }

    /// Handles a single request written to the channel, returning the number of bytes consumed.
    ///
    /// Malformed requests are rejected before any address space is looked at. On success the whole
    /// buffer is acknowledged.
    ///
    /// # Errors
    ///
    /// Returns the validation error of a malformed request, or [`CtlError::Core`] if the clear
    /// itself failed. Use [`CtlError::errno`] to report either back to the writer.
    pub fn write(&self, buf: &[u8]) -> Result<usize, CtlError> {
        let req = Request::parse(buf).inspect_err(|err| log::debug!("rejected request: {err}"))?;
        let range = self
            .validate(&req)
            .inspect_err(|err| log::debug!("rejected request {req:?}: {err}"))?;

        log::trace!("clear_refs request from {}: {range:?}", req.pid);
        clear_refs::clear_range(self.processes, Pid(req.pid), range).map_err(|err| {
            let err = CtlError::Core(err);
            log::debug!("clear_refs for {} failed: {err} ({})", req.pid, err.errno());
            err
        })?;

        Ok(buf.len())
    }

    fn validate(&self, req: &Request) -> Result<Range<VirtualAddress>, CtlError> {
        if req.magic != self.magic {
            return Err(CtlError::BadMagic(req.magic));
        }
        if req.range_end <= req.range_start {
            return Err(CtlError::EmptyRange);
        }

        // bounds beyond the address width can't name anything we could clear
        let start = VirtualAddress::try_from(req.range_start).map_err(|_| Error::InvalidRange)?;
        let end = VirtualAddress::try_from(req.range_end).map_err(|_| Error::InvalidRange)?;
        if !start.is_aligned_to(A::PAGE_SIZE) || !end.is_aligned_to(A::PAGE_SIZE) {
            return Err(CtlError::Misaligned);
        }

        Ok(start..end)
    }
}
