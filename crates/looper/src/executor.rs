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

//! This module contains the `Executor` abstraction async entries are dispatched to.
//!
//! An async entry keeps its place in the looper's ordering: it is popped from the queue head like
//! any other entry. Only its execution happens elsewhere, so completion order is not guaranteed.

use std::thread;

/// Represents a dispatched async job.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs async jobs off the loop thread.
pub trait Executor: Send + Sync + 'static {
    /// Executes `job`, typically on another thread.
    fn execute(&self, job: Job);
}

impl<F> Executor for F
where
    F: Fn(Job) + Send + Sync + 'static,
{
    fn execute(&self, job: Job) {
        self(job)
    }
}

/// The default `Executor`, running every job on a freshly spawned thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadExecutor;

impl Executor for ThreadExecutor {
    fn execute(&self, job: Job) {
        if let Err(err) = thread::Builder::new()
            .name("looper-async".to_owned())
            .spawn(job)
        {
            log::error!("failed to spawn a thread for an async entry: {err}");
        }
    }
}
