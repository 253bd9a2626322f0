// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::fmt;

use lock_api::{RawRwLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{AddressSpace, Arch, Error};

/// A process identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub i32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

type SharedAddressSpace<A, R> = Arc<RwLock<R, AddressSpace<A>>>;

/// The live processes and their address spaces.
///
/// Processes without an address space (kernel-only threads) are tracked too, so that they can be
/// told apart from identifiers that don't resolve to a process at all.
pub struct ProcessTable<A: Arch, R: RawRwLock> {
    processes: RwLock<R, BTreeMap<Pid, Option<SharedAddressSpace<A, R>>>>,
}

impl<A: Arch, R: RawRwLock> fmt::Debug for ProcessTable<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let processes = self.processes.read();
        f.debug_map()
            .entries(
                processes
                    .iter()
                    .map(|(pid, aspace)| (pid, aspace.is_some())),
            )
            .finish()
    }
}

impl<A: Arch, R: RawRwLock> Default for ProcessTable<A, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Arch, R: RawRwLock> ProcessTable<A, R> {
    pub fn new() -> Self {
        Self {
            processes: RwLock::new(BTreeMap::new()),
        }
    }

    /// Registers the process `pid`, replacing any previous process with the same identifier.
    pub fn insert(&self, pid: Pid, aspace: Option<AddressSpace<A>>) {
        let aspace = aspace.map(|aspace| Arc::new(RwLock::new(aspace)));
        self.processes.write().insert(pid, aspace);
    }

    /// Tears down the process `pid`. Handles acquired earlier stay valid until released.
    ///
    /// Returns `true` if the process existed.
    pub fn remove(&self, pid: Pid) -> bool {
        self.processes.write().remove(&pid).is_some()
    }

    /// Resolves `pid` to a handle on its address space.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSuchProcess`] if `pid` doesn't name a live process, and
    /// [`Error::NoAddressSpace`] if the process has no address space.
    pub fn acquire(&self, pid: Pid) -> crate::Result<AddressSpaceHandle<A, R>> {
        let processes = self.processes.read();
        let aspace = processes
            .get(&pid)
            .ok_or(Error::NoSuchProcess)?
            .as_ref()
            .ok_or(Error::NoAddressSpace)?;

        Ok(AddressSpaceHandle {
            pid,
            aspace: Arc::clone(aspace),
        })
    }
}

/// A counted reference to the address space of a process.
///
/// The reference is released when the handle is dropped (or explicitly through
/// [`AddressSpaceHandle::release`]).
pub struct AddressSpaceHandle<A: Arch, R: RawRwLock> {
    pid: Pid,
    aspace: SharedAddressSpace<A, R>,
}

impl<A: Arch, R: RawRwLock> fmt::Debug for AddressSpaceHandle<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressSpaceHandle")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl<A: Arch, R: RawRwLock> AddressSpaceHandle<A, R> {
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Locks the address space for shared access.
    pub fn read(&self) -> RwLockReadGuard<'_, R, AddressSpace<A>> {
        self.aspace.read()
    }

    /// Locks the address space for exclusive access, blocking until all other holders are gone.
    pub fn write(&self) -> RwLockWriteGuard<'_, R, AddressSpace<A>> {
        self.aspace.write()
    }

    /// The number of outstanding references to the address space, including the process table's own.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.aspace)
    }

    pub fn release(self) {
        drop(self);
    }
}
