// Reader/writer arbitration over the shared content store.
//
// Exclusive access needs no other holder of any kind. Shared access only
// needs no exclusive holder, so readers keep joining while a writer waits:
// a steady stream of readers can starve a writer.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::handle::{StorageBackend, StoreHandle};
use crate::error::{HostError, Result};

/// Access level granted with a [`StoreHandle`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreAccessToken {
    pub exclusive: bool,
}

/// Current holder counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreHolders {
    pub exclusive: usize,
    pub shared: usize,
}

impl StoreHolders {
    fn grantable(&self, exclusive: bool) -> bool {
        if exclusive {
            self.exclusive == 0 && self.shared == 0
        } else {
            self.exclusive == 0
        }
    }
}

pub(crate) struct ArbiterShared {
    pub(crate) holders: Mutex<StoreHolders>,
    released: Condvar,
}

impl ArbiterShared {
    pub(crate) fn release(&self, token: StoreAccessToken) {
        let mut holders = self.holders.lock();
        if token.exclusive {
            holders.exclusive = holders.exclusive.saturating_sub(1);
        } else {
            holders.shared = holders.shared.saturating_sub(1);
        }
        tracing::trace!(exclusive = token.exclusive, holders = ?*holders, "store released");
        self.released.notify_all();
    }
}

/// Grants exclusive or shared handles over one storage backend.
pub struct StoreArbiter {
    pub(crate) shared: Arc<ArbiterShared>,
    pub(crate) backend: Arc<dyn StorageBackend>,
}

impl StoreArbiter {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            shared: Arc::new(ArbiterShared {
                holders: Mutex::new(StoreHolders::default()),
                released: Condvar::new(),
            }),
            backend,
        }
    }

    /// Block until the requested access can be granted.
    pub fn open_store(&self, exclusive: bool) -> StoreHandle {
        let mut holders = self.shared.holders.lock();
        while !holders.grantable(exclusive) {
            self.shared.released.wait(&mut holders);
        }
        self.grant(&mut holders, exclusive)
    }

    /// Like [`StoreArbiter::open_store`], giving up after `timeout`. A timeout
    /// too large to form a deadline waits indefinitely.
    ///
    /// # Returns
    /// * `Err(HostError::TimedOut)` if access could not be granted in time
    pub fn open_store_timeout(&self, exclusive: bool, timeout: Duration) -> Result<StoreHandle> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return Ok(self.open_store(exclusive));
        };
        let mut holders = self.shared.holders.lock();
        while !holders.grantable(exclusive) {
            if self
                .shared
                .released
                .wait_until(&mut holders, deadline)
                .timed_out()
                && !holders.grantable(exclusive)
            {
                return Err(HostError::timed_out(if exclusive {
                    "exclusive store access"
                } else {
                    "shared store access"
                }));
            }
        }
        Ok(self.grant(&mut holders, exclusive))
    }

    fn grant(&self, holders: &mut StoreHolders, exclusive: bool) -> StoreHandle {
        if exclusive {
            holders.exclusive += 1;
        } else {
            holders.shared += 1;
        }
        tracing::trace!(exclusive, holders = ?*holders, "store opened");
        StoreHandle {
            token: StoreAccessToken { exclusive },
            arbiter: self.shared.clone(),
            backend: self.backend.clone(),
        }
    }

    /// Release `handle`'s slot and wake everyone blocked in `open_store`.
    pub fn close_store(&self, handle: StoreHandle) {
        drop(handle);
    }

    pub fn holders(&self) -> StoreHolders {
        *self.shared.holders.lock()
    }
}
