use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{HostError, Result};

/// How long a "destroyed" report for an unclaimed pid is remembered.
const TOMBSTONE_TTL: Duration = Duration::from_secs(30);

/// Upper bound on remembered unclaimed "destroyed" reports.
const MAX_TOMBSTONES: usize = 64;

/// Lifecycle state of an isolate. Ordered: states only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IsolateState {
    Created,
    Initialized,
    Destroyed,
}

impl fmt::Display for IsolateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IsolateState::Created => "CREATED",
            IsolateState::Initialized => "INITIALIZED",
            IsolateState::Destroyed => "DESTROYED",
        })
    }
}

/// Tracking record for one isolate process.
pub struct IsolateRecord {
    pid: u32,
    pub(crate) state: Mutex<IsolateState>,
    changed: Condvar,
    // set once a spawning thread owns this record
    claimed: AtomicBool,
}

impl IsolateRecord {
    fn new(pid: u32) -> Self {
        Self {
            pid,
            state: Mutex::new(IsolateState::Created),
            changed: Condvar::new(),
            claimed: AtomicBool::new(false),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn state(&self) -> IsolateState {
        *self.state.lock()
    }

    /// Move to `next` if that is a legal forward step.
    ///
    /// `Initialized` is only reachable from `Created`; `Destroyed` is terminal
    /// and reachable from either live state.
    ///
    /// # Returns
    /// * `true` if the state changed
    pub fn advance(&self, next: IsolateState) -> bool {
        let mut state = self.state.lock();
        let legal = match (*state, next) {
            (IsolateState::Created, IsolateState::Initialized) => true,
            (IsolateState::Created, IsolateState::Destroyed) => true,
            (IsolateState::Initialized, IsolateState::Destroyed) => true,
            _ => false,
        };
        if !legal {
            tracing::debug!(pid = self.pid, from = %*state, to = %next, "ignoring isolate state change");
            return false;
        }
        tracing::debug!(pid = self.pid, from = %*state, to = %next, "isolate state changed");
        *state = next;
        self.changed.notify_all();
        true
    }

    /// Block until the state is at least `target`.
    ///
    /// # Returns
    /// * `Ok(state)` with the state reached, which may be past `target`
    /// * `Err(HostError::TimedOut)` if `timeout` elapsed first
    pub fn wait_for(&self, target: IsolateState, timeout: Duration) -> Result<IsolateState> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        while *state < target {
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut state, deadline).timed_out() && *state < target
                    {
                        return Err(HostError::timed_out(format!(
                            "isolate {} to reach {}",
                            self.pid, target
                        )));
                    }
                }
                None => self.changed.wait(&mut state),
            }
        }
        Ok(*state)
    }
}

/// Pid-indexed arena of live isolate records.
///
/// Spawning threads and the lifecycle handler both reach records through
/// [`IsolateTable::register_or_fetch`], so whichever side sees a pid first
/// creates the record and the other gets the same one.
///
/// A "destroyed" report for a pid no spawning thread has claimed yet leaves a
/// tombstone, so a spawn that returns after its isolate already died fails
/// at [`IsolateTable::claim`] instead of waiting for its init timeout.
#[derive(Default)]
pub struct IsolateTable {
    pub(crate) records: Mutex<HashMap<u32, Arc<IsolateRecord>>>,
    // lock order: records, then tombstones
    tombstones: Mutex<VecDeque<(u32, Instant)>>,
}

impl IsolateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_or_fetch(&self, pid: u32) -> Arc<IsolateRecord> {
        self.records
            .lock()
            .entry(pid)
            .or_insert_with(|| Arc::new(IsolateRecord::new(pid)))
            .clone()
    }

    /// Take ownership of `pid`'s record for a spawning thread.
    ///
    /// # Returns
    /// * `None` if the isolate was already reported destroyed before the claim
    pub fn claim(&self, pid: u32) -> Option<Arc<IsolateRecord>> {
        let mut records = self.records.lock();
        let mut tombstones = self.tombstones.lock();
        prune_tombstones(&mut tombstones);
        if let Some(index) = tombstones.iter().position(|(dead, _)| *dead == pid) {
            tombstones.remove(index);
            return None;
        }
        let record = records
            .entry(pid)
            .or_insert_with(|| Arc::new(IsolateRecord::new(pid)))
            .clone();
        record.claimed.store(true, Ordering::Release);
        Some(record)
    }

    /// Handle a "destroyed" report: destroy the record, and remember the pid
    /// when no spawning thread has claimed it yet.
    ///
    /// # Returns
    /// * The removed record, if the pid was tracked
    pub fn report_destroyed(&self, pid: u32) -> Option<Arc<IsolateRecord>> {
        let mut records = self.records.lock();
        let removed = records.remove(&pid);
        let claimed = removed
            .as_ref()
            .map_or(false, |record| record.claimed.load(Ordering::Acquire));
        if !claimed {
            let mut tombstones = self.tombstones.lock();
            prune_tombstones(&mut tombstones);
            if tombstones.len() == MAX_TOMBSTONES {
                tombstones.pop_front();
            }
            tombstones.push_back((pid, Instant::now()));
        }
        drop(records);
        if let Some(record) = &removed {
            record.advance(IsolateState::Destroyed);
        }
        removed
    }

    pub fn get(&self, pid: u32) -> Option<Arc<IsolateRecord>> {
        self.records.lock().get(&pid).cloned()
    }

    /// Records present and not destroyed, ordered by pid.
    pub fn active(&self) -> Vec<Arc<IsolateRecord>> {
        let mut active: Vec<_> = self
            .records
            .lock()
            .values()
            .filter(|record| record.state() != IsolateState::Destroyed)
            .cloned()
            .collect();
        active.sort_by_key(|record| record.pid());
        active
    }

    pub fn pids(&self) -> Vec<u32> {
        self.records.lock().keys().copied().collect()
    }

    /// Mark `pid` destroyed and drop it from the table.
    ///
    /// # Returns
    /// * The removed record, if the pid was tracked
    pub fn destroy(&self, pid: u32) -> Option<Arc<IsolateRecord>> {
        let record = self.records.lock().remove(&pid)?;
        record.advance(IsolateState::Destroyed);
        Some(record)
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

fn prune_tombstones(tombstones: &mut VecDeque<(u32, Instant)>) {
    while let Some((_, at)) = tombstones.front() {
        if at.elapsed() < TOMBSTONE_TTL {
            break;
        }
        tombstones.pop_front();
    }
}
