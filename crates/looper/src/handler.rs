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

//! This module contains the pluggable handler a `Looper` forwards task failures to.

use crate::core::entry::Id as EntryId;
use crate::error::TaskError;
use crate::looper::Looper;

/// Represents what a looper does after a task failed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Keep running the loop.
    #[default]
    Continue,
    /// Quit the looper unsafely, dropping its pending entries.
    Quit,
}

/// Receives the failures of the entries run by a looper. Failures never propagate back to the
/// poster of the entry.
pub trait ExceptionHandler: Send + Sync + 'static {
    /// Handles the failure `error` of the entry identified by `id`.
    fn handle(&self, looper: &Looper, id: EntryId, error: TaskError) -> Disposition;
}

impl<F> ExceptionHandler for F
where
    F: Fn(&Looper, EntryId, TaskError) -> Disposition + Send + Sync + 'static,
{
    fn handle(&self, looper: &Looper, id: EntryId, error: TaskError) -> Disposition {
        self(looper, id, error)
    }
}

/// The default `ExceptionHandler`: logs the failure and keeps the loop running.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHandler;

impl ExceptionHandler for LogHandler {
    fn handle(&self, looper: &Looper, id: EntryId, error: TaskError) -> Disposition {
        log::error!("looper `{}`: entry {id} failed: {error}", looper.name());
        Disposition::Continue
    }
}
