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

//! This module contains the implementation of an `Entry` which represents one schedulable unit of
//! work of a `Looper`: a task, a barrier, an addressed parcel or a quit directive.

use crate::error::BoxError;
use crate::looper::Looper;
use crate::parcel::Parcel;
use std::sync::atomic::{AtomicU64, Ordering};
use std::fmt;

/// Represents a task posted to a `Looper`. The task receives the `Context` of its own execution and
/// reports failures by returning an error, which is forwarded to the looper's exception handler.
pub(crate) type Task = Box<dyn FnOnce(&Context) -> Result<(), BoxError> + Send>;

/// Represents the predicate of a barrier, tested against the looper owning the barrier.
pub(crate) type Predicate = Box<dyn Fn(&Looper) -> bool + Send>;

/// Specifies the identifier of an `Entry`. Identifiers are handed out process-wide in increasing
/// order, so they double as the tie-breaker between entries scheduled at the same time.
#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Id(u64);

impl Id {
    /// Returns a fresh `Id`, strictly greater than every `Id` returned before.
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw value of this `Id`.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "#{}", self.0)?;
        Ok(())
    }
}

impl fmt::Display for Id {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "#{}", self.0)?;
        Ok(())
    }
}

/// Represents what an `Entry` does once it reaches the head of its queue.
pub(crate) enum Work {
    /// Runs a task, on the loop thread or on the looper's executor.
    Task(Task),
    /// Gates the queue on a predicate. A barrier never performs work itself.
    Barrier(Predicate),
    /// Delivers a parcel to its (already resolved) receiver.
    Parcel(Parcel),
    /// Moves the looper into `Status::QuittingSafe`.
    Quit,
}

impl fmt::Debug for Work {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task(_) => write!(fmt, "Work::Task")?,
            Self::Barrier(_) => write!(fmt, "Work::Barrier")?,
            Self::Parcel(parcel) => write!(fmt, "Work::Parcel({})", parcel.code())?,
            Self::Quit => write!(fmt, "Work::Quit")?,
        }
        Ok(())
    }
}

/// One schedulable unit of work. An `Entry` is owned by at most one queue at a time: it is moved
/// into the queue on post and moved out again when it becomes the active entry.
pub(crate) struct Entry {
    id: Id,
    /// Absolute uptime, in milliseconds, at which the entry becomes ready.
    when: u64,
    is_async: bool,
    finalized: bool,
    work: Work,
}

impl Entry {
    /// Creates a new synchronous `Entry` scheduled at `when`.
    pub(crate) fn new(when: u64, work: Work) -> Self {
        Self {
            id: Id::next(),
            when,
            is_async: false,
            finalized: false,
            work,
        }
    }

    /// Marks the entry to be dispatched to the looper's executor instead of the loop thread.
    pub(crate) fn with_async(mut self, is_async: bool) -> Self {
        self.is_async = is_async;
        self
    }

    #[inline]
    pub(crate) fn id(&self) -> Id {
        self.id
    }

    #[inline]
    pub(crate) fn when(&self) -> u64 {
        self.when
    }

    #[inline]
    pub(crate) fn is_async(&self) -> bool {
        self.is_async
    }

    #[inline]
    pub(crate) fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Returns true if the entry is a quit directive, the only kind of entry a quitting queue still
    /// accepts.
    pub(crate) fn is_quit_directive(&self) -> bool {
        matches!(self.work, Work::Quit)
    }

    /// Returns the ordering key of the entry: scheduled time first, then identifier.
    #[inline]
    pub(crate) fn key(&self) -> (u64, Id) {
        (self.when, self.id)
    }

    /// Marks the entry as being executed. An entry is finalized exactly once.
    pub(crate) fn finalize(&mut self) {
        assert!(
            !self.finalized,
            "entry {} must not be finalized twice",
            self.id
        );
        self.finalized = true;
    }

    /// Consumes the entry and returns its work.
    pub(crate) fn into_work(self) -> Work {
        self.work
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Entry")
            .field("id", &self.id)
            .field("when", &self.when)
            .field("is_async", &self.is_async)
            .field("finalized", &self.finalized)
            .field("work", &self.work)
            .finish()
    }
}

/// Represents the execution context handed to a running task: the looper it was posted to, its own
/// identifier and its scheduled time.
#[derive(Debug, Clone)]
pub struct Context {
    looper: Looper,
    id: Id,
    when: u64,
}

impl Context {
    pub(crate) fn new(looper: Looper, id: Id, when: u64) -> Self {
        Self { looper, id, when }
    }

    /// Returns the looper the running task was posted to.
    pub fn looper(&self) -> &Looper {
        &self.looper
    }

    /// Returns the identifier of the running entry.
    pub fn id(&self) -> Id {
        self.id
    }

    /// Returns the uptime the running entry was scheduled at.
    pub fn when(&self) -> u64 {
        self.when
    }

    /// Returns how many milliseconds the running entry started after its scheduled time.
    pub fn lag(&self) -> u64 {
        self.looper.uptime().saturating_sub(self.when)
    }

    /// Cancels the running entry from within its own execution. The queue's active slot is cleared
    /// and the loop is woken; the entry is never executed again.
    pub fn cancel(&self) -> bool {
        self.looper.cancel(self.id)
    }
}
