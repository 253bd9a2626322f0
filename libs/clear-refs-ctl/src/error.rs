// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;

use clear_refs::Error;

/// Linux error numbers reported back to the writer of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
#[allow(clippy::upper_case_acronyms, reason = "named after the C constants")]
pub enum Errno {
    /// No such process.
    ESRCH = 3,
    /// Out of memory.
    ///
    /// Also reported for ranges that are partially unmapped, so writers cannot tell an unmapped
    /// range from an exhausted region limit by the errno alone. The [`CtlError`] itself keeps them
    /// apart.
    ENOMEM = 12,
    /// Invalid argument.
    EINVAL = 22,
}

impl Errno {
    pub const fn get(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?} ({})", self.get())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtlError {
    /// The request is not exactly [`Request::SIZE`][crate::Request::SIZE] bytes long.
    BadSize { len: usize },
    /// The request doesn't start with [`CLEAR_REFS_MAGIC`][crate::CLEAR_REFS_MAGIC].
    BadMagic(u32),
    /// The range end is not past its start.
    EmptyRange,
    /// A range bound is not page-aligned.
    Misaligned,
    /// The clear itself failed.
    Core(Error),
}

impl From<Error> for CtlError {
    fn from(err: Error) -> Self {
        Self::Core(err)
    }
}

impl CtlError {
    pub const fn errno(self) -> Errno {
        match self {
            CtlError::BadSize { .. }
            | CtlError::BadMagic(_)
            | CtlError::EmptyRange
            | CtlError::Misaligned
            | CtlError::Core(Error::InvalidRange) => Errno::EINVAL,
            CtlError::Core(Error::NoSuchProcess | Error::NoAddressSpace) => Errno::ESRCH,
            CtlError::Core(
                Error::NoMapping | Error::ResourceExhausted | Error::OutOfMemory,
            ) => Errno::ENOMEM,
            // never produced by a clear, but a bad request all the same
            CtlError::Core(Error::AlreadyMapped | Error::AccessDenied) => Errno::EINVAL,
        }
    }
}

impl fmt::Display for CtlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CtlError::BadSize { len } => write!(
                f,
                "expected a request of {} bytes, got {len}",
                crate::Request::SIZE
            ),
            CtlError::BadMagic(magic) => write!(f, "bad request magic {magic:#010x}"),
            CtlError::EmptyRange => write!(f, "range end is not past its start"),
            CtlError::Misaligned => write!(f, "range is not page-aligned"),
            CtlError::Core(Error::NoMapping) => write!(
                f,
                "{}: is the requested range partially outside any mapping?",
                Error::NoMapping
            ),
            CtlError::Core(err) => fmt::Display::fmt(err, f),
        }
    }
}

impl core::error::Error for CtlError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            CtlError::Core(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping() {
        assert_eq!(CtlError::BadSize { len: 3 }.errno(), Errno::EINVAL);
        assert_eq!(CtlError::BadMagic(0).errno(), Errno::EINVAL);
        assert_eq!(CtlError::EmptyRange.errno(), Errno::EINVAL);
        assert_eq!(CtlError::Misaligned.errno(), Errno::EINVAL);
        assert_eq!(CtlError::Core(Error::InvalidRange).errno(), Errno::EINVAL);
        assert_eq!(CtlError::Core(Error::NoSuchProcess).errno(), Errno::ESRCH);
        assert_eq!(CtlError::Core(Error::NoAddressSpace).errno(), Errno::ESRCH);
        assert_eq!(CtlError::Core(Error::NoMapping).errno(), Errno::ENOMEM);
        assert_eq!(CtlError::Core(Error::ResourceExhausted).errno(), Errno::ENOMEM);
        assert_eq!(CtlError::Core(Error::OutOfMemory).errno(), Errno::ENOMEM);
    }

    #[test]
    fn errno_values() {
        assert_eq!(Errno::ESRCH.get(), 3);
        assert_eq!(Errno::ENOMEM.get(), 12);
        assert_eq!(Errno::EINVAL.get(), 22);
    }

    #[test]
    fn enomem_is_ambiguous_but_error_is_not() {
        let unmapped = CtlError::from(Error::NoMapping);
        let exhausted = CtlError::from(Error::ResourceExhausted);

        assert_eq!(unmapped.errno(), exhausted.errno());
        assert_ne!(unmapped, exhausted);
        assert_ne!(unmapped.to_string(), exhausted.to_string());
    }

    #[test]
    fn no_mapping_hint() {
        let msg = CtlError::Core(Error::NoMapping).to_string();
        assert!(msg.contains("partially outside any mapping"), "{msg}");
    }
}
