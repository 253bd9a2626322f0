// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use alloc::collections::TryReserveError;
use core::fmt;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The requested range is empty, inverted or not page-aligned.
    InvalidRange,
    /// The process identifier doesn't resolve to a live process.
    NoSuchProcess,
    /// The process has no address space attached (e.g. a kernel-only thread).
    NoAddressSpace,
    /// Part of the requested range is not covered by any region.
    ///
    /// This is reported only after every mapped part of the range has been processed.
    NoMapping,
    /// Splitting a region would exceed the configured maximum number of regions.
    ResourceExhausted,
    /// Memory for a region split or a page table could not be allocated.
    OutOfMemory,
    /// A region already exists at the requested place.
    AlreadyMapped,
    /// The region doesn't allow the attempted access.
    AccessDenied,
}

impl From<TryReserveError> for Error {
    fn from(_value: TryReserveError) -> Self {
        Self::OutOfMemory
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidRange => write!(f, "range is empty, inverted or not page-aligned"),
            Error::NoSuchProcess => write!(f, "no such process"),
            Error::NoAddressSpace => write!(f, "process has no address space"),
            Error::NoMapping => write!(f, "range includes memory not covered by any mapping"),
            Error::ResourceExhausted => write!(f, "maximum number of memory regions reached"),
            Error::OutOfMemory => write!(f, "out of memory"),
            Error::AlreadyMapped => write!(f, "range is already mapped"),
            Error::AccessDenied => write!(f, "access not permitted by the memory region"),
        }
    }
}

impl core::error::Error for Error {}

impl Error {
    /// Returns `true` for errors that abort a range operation immediately, as opposed to
    /// errors that are recorded and reported once the operation is done.
    pub const fn is_fatal(self) -> bool {
        matches!(self, Error::ResourceExhausted | Error::OutOfMemory)
    }
}
