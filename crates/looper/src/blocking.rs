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

//! This module contains the implementation of a `BlockingTask`, a bridge letting a foreign thread
//! wait until a task it posted to a `Looper` has run.
//!
//! The waiter only learns that the task finished, not its outcome. Failures still go to the
//! looper's exception handler, and timing out does not cancel the task.

use crate::core::entry::Context;
use crate::error::BoxError;
use crate::looper::Looper;
use std::{fmt, sync, time};

/// Represents how far a bridged task got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Pending,
    /// The task ran, successfully or not.
    Ran,
    /// The task was dropped without running, e.g. cancelled or discarded by `quit_unsafe`.
    Dropped,
}

struct Signal {
    state: sync::Mutex<State>,
    condvar: sync::Condvar,
}

impl Signal {
    fn lock(&self) -> sync::MutexGuard<'_, State> {
        self.state
            .lock()
            .expect("`MutexGuard` of the `BlockingTask` signal should be locked properly")
    }
}

/// Signals the waiters when dropped, whichever way the task exits.
struct Guard {
    signal: sync::Arc<Signal>,
    outcome: State,
}

impl Drop for Guard {
    fn drop(&mut self) {
        let mut state = self.signal.lock();
        if *state == State::Pending {
            *state = self.outcome;
        }
        self.signal.condvar.notify_all();
    }
}

/// A handle to wait for the completion of a `BlockingTask`.
#[derive(Clone)]
pub struct Completion {
    signal: sync::Arc<Signal>,
}

impl Completion {
    /// Blocks the calling thread until the task has run, returning true, or until `timeout_ms`
    /// elapsed, returning false. A timeout of zero waits forever. Also returns false if the task was
    /// dropped without running.
    pub fn wait(&self, timeout_ms: u64) -> bool {
        let state = self.signal.lock();
        let pending = |state: &mut State| *state == State::Pending;
        let state = if timeout_ms == 0 {
            self.signal
                .condvar
                .wait_while(state, pending)
                .expect("`BlockingTask` signal should be awaited properly")
        } else {
            let timeout = time::Duration::from_millis(timeout_ms);
            self.signal
                .condvar
                .wait_timeout_while(state, timeout, pending)
                .expect("`BlockingTask` signal should be awaited properly")
                .0
        };
        *state == State::Ran
    }

    /// Returns true once the task has run.
    pub fn is_done(&self) -> bool {
        *self.signal.lock() == State::Ran
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Completion")
            .field("state", &*self.signal.lock())
            .finish()
    }
}

/// Wraps a task so another thread can block until it has run. Post the task returned by
/// `into_task` before waiting on the `Completion`, otherwise the wait only ends with its timeout.
pub struct BlockingTask<F> {
    task: F,
    guard: Guard,
}

impl<F> BlockingTask<F>
where
    F: FnOnce(&Context) -> Result<(), BoxError> + Send + 'static,
{
    /// Wraps `task`, creating the signal its waiters block on.
    pub fn new(task: F) -> Self {
        let signal = sync::Arc::new(Signal {
            state: sync::Mutex::new(State::Pending),
            condvar: sync::Condvar::new(),
        });
        Self {
            task,
            guard: Guard {
                signal,
                outcome: State::Dropped,
            },
        }
    }

    /// Returns a handle to wait for the task.
    pub fn completion(&self) -> Completion {
        Completion {
            signal: sync::Arc::clone(&self.guard.signal),
        }
    }

    /// Returns the task to post. Completion is signalled once it returns, fails or panics.
    pub fn into_task(self) -> impl FnOnce(&Context) -> Result<(), BoxError> + Send + 'static {
        let Self { task, mut guard } = self;
        move |context: &Context| {
            guard.outcome = State::Ran;
            let _guard = guard;
            task(context)
        }
    }
}

impl<F> fmt::Debug for BlockingTask<F> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("BlockingTask").finish_non_exhaustive()
    }
}

impl Looper {
    /// Posts `task` and blocks until it has run (true) or `timeout_ms` elapsed (false). A timeout of
    /// zero waits forever. Returns false at once if the looper rejects the task.
    ///
    /// # Panics
    ///
    /// Panics when called from the looper's own thread, which would never get to run the task.
    pub fn post_and_wait<F>(&self, task: F, timeout_ms: u64) -> bool
    where
        F: FnOnce(&Context) -> Result<(), BoxError> + Send + 'static,
    {
        assert!(
            !self.is_current(),
            "`post_and_wait` called from the thread of looper `{}` would deadlock",
            self.name()
        );
        let bridge = BlockingTask::new(task);
        let completion = bridge.completion();
        if !self.post(bridge.into_task()) {
            return false;
        }
        completion.wait(timeout_ms)
    }
}
