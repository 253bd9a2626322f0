// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

#![cfg_attr(not(test), no_std)]

//! The write-only control channel through which user space requests range-scoped soft-dirty
//! clears.
//!
//! A request is a single fixed-size [`Request`] record written in one go. The channel validates it,
//! runs [`clear_refs::clear_range`] and translates the outcome into an [`Errno`].

mod channel;
mod error;
mod request;

pub use channel::ControlChannel;
pub use error::{CtlError, Errno};
pub use request::{CLEAR_REFS_MAGIC, Request};
