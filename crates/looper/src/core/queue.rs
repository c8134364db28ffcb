// Copyright 2024 Shingo OKAWA and a number of other contributors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! This module contains the implementation of the `Queue` which holds the pending entries of one
//! `Looper`, ordered by scheduled time and then by identifier.
//!
//! Every mutation happens under the queue's lock. The owning thread polls the queue with `next`
//! and parks on it with `park`; any other thread only ever inserts or removes entries and wakes the
//! owner. A generation counter, bumped on every wake, guarantees that a post landing between `next`
//! and `park` is never lost.

use crate::core::entry::{Entry, Id as EntryId};
use crate::core::flags::Flags;
use crate::error::PostError;
use crate::looper::Status;
use std::{collections, fmt, mem, sync, time};

/// Represents the outcome of polling a `Queue`.
pub(crate) enum Next {
    /// The head entry was ready and is now the active entry.
    Ready(Entry),
    /// The head entry is scheduled in the future; the owner may sleep for the given duration.
    Blocked(time::Duration),
    /// The queue holds no entries at all.
    Empty,
}

impl fmt::Debug for Next {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(entry) => write!(fmt, "Next::Ready({})", entry.id())?,
            Self::Blocked(wait) => write!(fmt, "Next::Blocked({wait:?})")?,
            Self::Empty => write!(fmt, "Next::Empty")?,
        }
        Ok(())
    }
}

/// Represents whether an entry handed out by `next` may still be run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Activation {
    /// The entry is the active entry of the queue.
    Active,
    /// The entry was the active entry, but got cancelled before it could run.
    Cancelled,
    /// The entry was never activated by this queue.
    Foreign,
}

/// Scheduling telemetry of a looper, in uptime milliseconds. Tasks read it to diagnose whether the
/// loop fell behind.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Telemetry {
    /// Uptime at which the owning thread joined the loop.
    pub loop_start: u64,
    /// Uptime of the most recent poll of the queue.
    pub last_polled: u64,
    /// Uptime at which an entry last started later than the overload threshold allows.
    pub last_overload: u64,
}

/// Represents the outcome of `Queue::finish`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Finish {
    /// The queue moved to `Status::Quit`.
    Finished,
    /// The queue already was in `Status::Quit`.
    AlreadyQuit,
    /// The queue is quitting safely but still holds entries.
    Draining,
}

/// An entry the queue refused, handed back together with the reason.
#[derive(Debug)]
pub(crate) struct Rejected {
    pub(crate) error: PostError,
    pub(crate) entry: Entry,
}

/// The lock-protected state of a `Queue`.
#[derive(Default)]
struct State {
    /// Holds the pending entries keyed by `(when, id)`.
    entries: collections::BTreeMap<(u64, EntryId), Entry>,
    /// Holds the scheduled time of every pending entry, to find it again by identifier.
    schedule: collections::HashMap<EntryId, u64>,
    /// Holds the identifier of the entry currently executed by the owning thread.
    active: Option<EntryId>,
    /// Holds the identifier of the active entry if it was cancelled before it finished.
    cancelled: Option<EntryId>,
    status: Status,
    flags: Flags,
    telemetry: Telemetry,
    /// Bumped on every wake.
    generation: u64,
    /// The generation observed by the owner's last poll.
    polled: u64,
}

impl State {
    /// Returns the reason `entry` cannot be posted right now, if any.
    fn rejection(&self, entry: &Entry) -> Option<PostError> {
        match self.status {
            Status::Quit => Some(PostError::Quit),
            Status::QuittingSafe | Status::QuittingUnsafe if !entry.is_quit_directive() => {
                Some(PostError::Quitting)
            }
            _ => None,
        }
    }
}

/// The ordered store of pending entries for one looper.
pub(crate) struct Queue {
    state: sync::Mutex<State>,
    wakeup: sync::Condvar,
}

impl Queue {
    /// Creates an empty `Queue` honouring the given `flags`.
    pub(crate) fn new(flags: Flags) -> Self {
        Self {
            state: sync::Mutex::new(State {
                flags,
                ..State::default()
            }),
            wakeup: sync::Condvar::new(),
        }
    }

    /// Returns the [`MutexGuard`](https://doc.rust-lang.org/std/sync/struct.MutexGuard.html) of the
    /// queue state.
    #[inline(always)]
    fn lock(&self) -> sync::MutexGuard<'_, State> {
        self.state
            .lock()
            .expect("`MutexGuard` of the `Queue` state should be locked properly")
    }

    /// Wakes the owning thread if it is parked.
    fn notify(&self, state: &mut State) {
        state.generation = state.generation.wrapping_add(1);
        self.wakeup.notify_all();
    }

    /// Inserts `entry` into the queue and wakes the owning thread. Entries are refused once the
    /// looper is quitting, except for quit directives.
    pub(crate) fn post(&self, entry: Entry) -> Result<EntryId, Rejected> {
        debug_assert!(!entry.is_finalized(), "finalized entries cannot be posted");
        let mut state = self.lock();
        if let Some(error) = state.rejection(&entry) {
            return Err(Rejected { error, entry });
        }
        let id = entry.id();
        state.schedule.insert(id, entry.when());
        state.entries.insert(entry.key(), entry);
        self.notify(&mut state);
        Ok(id)
    }

    /// Polls the queue at uptime `now`. A ready head entry is removed and becomes the active entry.
    pub(crate) fn next(&self, now: u64) -> Next {
        let mut state = self.lock();
        state.telemetry.last_polled = now;
        state.polled = state.generation;
        let Some(&(when, id)) = state.entries.keys().next() else {
            return Next::Empty;
        };
        if when > now {
            return Next::Blocked(time::Duration::from_millis(when - now));
        }
        let Some((_, entry)) = state.entries.pop_first() else {
            return Next::Empty;
        };
        state.schedule.remove(&id);
        state.active = Some(id);
        state.cancelled = None;
        Next::Ready(entry)
    }

    /// Returns whether the entry identified by `id` may be run.
    pub(crate) fn activation(&self, id: EntryId) -> Activation {
        let state = self.lock();
        if state.active == Some(id) {
            Activation::Active
        } else if state.cancelled == Some(id) {
            Activation::Cancelled
        } else {
            Activation::Foreign
        }
    }

    /// Releases the active slot once the entry identified by `id` is done.
    pub(crate) fn recycle(&self, id: EntryId) {
        let mut state = self.lock();
        if state.active == Some(id) {
            state.active = None;
        }
        if state.cancelled == Some(id) {
            state.cancelled = None;
        }
    }

    /// Cancels the entry identified by `id`. The active entry only loses its slot; a pending entry is
    /// removed as if it had never been posted. Returns false if `id` is unknown.
    pub(crate) fn cancel(&self, id: EntryId) -> bool {
        let removed = {
            let mut state = self.lock();
            if state.active == Some(id) {
                state.active = None;
                state.cancelled = Some(id);
                self.notify(&mut state);
                return true;
            }
            let Some(when) = state.schedule.remove(&id) else {
                return false;
            };
            state.entries.remove(&(when, id))
        };
        // Dropped outside the lock since dropping a task may run arbitrary code.
        removed.is_some()
    }

    /// Moves the queue to `Status::QuittingSafe` or `Status::QuittingUnsafe`. Quitting unsafely drops
    /// every pending entry. Returns the number of dropped entries, or `None` if nothing changed.
    pub(crate) fn quit(&self, safe: bool) -> Option<usize> {
        let drained = {
            let mut state = self.lock();
            state.status = match (state.status, safe) {
                (Status::Quit | Status::QuittingUnsafe, _) | (Status::QuittingSafe, true) => {
                    return None;
                }
                (_, true) => Status::QuittingSafe,
                (_, false) => Status::QuittingUnsafe,
            };
            let drained = if safe {
                collections::BTreeMap::new()
            } else {
                state.schedule.clear();
                mem::take(&mut state.entries)
            };
            self.notify(&mut state);
            drained
        };
        Some(drained.len())
    }

    /// Moves the queue from `Status::Created` to `Status::Running` and records the loop start.
    /// Returns the resulting status.
    pub(crate) fn begin(&self, now: u64) -> Status {
        let mut state = self.lock();
        if state.status == Status::Created {
            state.status = Status::Running;
        }
        state.telemetry.loop_start = now;
        state.status
    }

    /// Moves the queue to the terminal `Status::Quit`. A queue quitting safely refuses while it still
    /// holds entries: they were accepted before the quit and must drain first.
    pub(crate) fn finish(&self) -> Finish {
        let drained = {
            let mut state = self.lock();
            match state.status {
                Status::Quit => return Finish::AlreadyQuit,
                Status::QuittingSafe if !state.entries.is_empty() => return Finish::Draining,
                _ => {}
            }
            state.status = Status::Quit;
            state.schedule.clear();
            let drained = mem::take(&mut state.entries);
            self.notify(&mut state);
            drained
        };
        // Left-over quit directives are dropped outside the lock.
        drop(drained);
        Finish::Finished
    }

    /// Parks the owning thread until the queue is woken or `timeout` elapses. Returns immediately if
    /// the queue was woken since the last poll.
    pub(crate) fn park(&self, timeout: Option<time::Duration>) {
        let state = self.lock();
        if state.generation != state.polled {
            return;
        }
        match timeout {
            Some(timeout) => {
                let (_state, _) = self
                    .wakeup
                    .wait_timeout_while(state, timeout, |state| state.generation == state.polled)
                    .expect("`Queue` should be parked properly");
            }
            None => {
                let _state = self
                    .wakeup
                    .wait_while(state, |state| state.generation == state.polled)
                    .expect("`Queue` should be parked properly");
            }
        }
    }

    /// Stamps the uptime at which the loop was found lagging behind.
    pub(crate) fn record_overload(&self, now: u64) {
        self.lock().telemetry.last_overload = now;
    }

    pub(crate) fn status(&self) -> Status {
        self.lock().status
    }

    pub(crate) fn flags(&self) -> Flags {
        self.lock().flags
    }

    pub(crate) fn telemetry(&self) -> Telemetry {
        self.lock().telemetry
    }

    pub(crate) fn active(&self) -> Option<EntryId> {
        self.lock().active
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub(crate) fn contains(&self, id: EntryId) -> bool {
        self.lock().schedule.contains_key(&id)
    }

    /// Returns the scheduled time of the pending entry identified by `id`.
    pub(crate) fn scheduled_time(&self, id: EntryId) -> Option<u64> {
        self.lock().schedule.get(&id).copied()
    }

    /// Returns the pending entries, in the order they will run, with their scheduled times.
    pub(crate) fn pending(&self) -> Vec<(EntryId, u64)> {
        self.lock()
            .entries
            .keys()
            .map(|&(when, id)| (id, when))
            .collect()
    }
}
