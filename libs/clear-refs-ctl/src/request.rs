// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::CtlError;

/// Tags a buffer as a range clear request.
pub const CLEAR_REFS_MAGIC: u32 = 0xC1EA_77EF;

/// A range clear request as written to the control channel.
///
/// On the wire this is the packed, native-endian sequence of its fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub magic: u32,
    pub pid: i32,
    pub range_start: u64,
    pub range_end: u64,
}

impl Request {
    /// Size of the encoded request in bytes.
    pub const SIZE: usize = 24;

    pub const fn new(pid: i32, range_start: u64, range_end: u64) -> Self {
        Self {
            magic: CLEAR_REFS_MAGIC,
            pid,
            range_start,
            range_end,
        }
    }

    /// Decodes a request, checking only that `buf` has the right size.
    ///
    /// # Errors
    ///
    /// Returns [`CtlError::BadSize`] if `buf` is not exactly [`Self::SIZE`] bytes long.
    pub fn parse(buf: &[u8]) -> Result<Self, CtlError> {
        let buf: &[u8; Self::SIZE] = buf
            .try_into()
            .map_err(|_| CtlError::BadSize { len: buf.len() })?;

        Ok(Self {
            magic: u32::from_ne_bytes(field(buf, 0)),
            pid: i32::from_ne_bytes(field(buf, 4)),
            range_start: u64::from_ne_bytes(field(buf, 8)),
            range_end: u64::from_ne_bytes(field(buf, 16)),
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0; Self::SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_ne_bytes());
        buf[4..8].copy_from_slice(&self.pid.to_ne_bytes());
        buf[8..16].copy_from_slice(&self.range_start.to_ne_bytes());
        buf[16..24].copy_from_slice(&self.range_end.to_ne_bytes());
        buf
    }
}

fn field<const N: usize>(buf: &[u8; Request::SIZE], offset: usize) -> [u8; N] {
    let mut out = [0; N];
    out.copy_from_slice(&buf[offset..offset + N]);
    out
}
