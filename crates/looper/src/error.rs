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

//! This module contains the error types of the crate.
//!
//! Usage errors, such as running an entry which is not the active one, are not represented here:
//! they panic at the call site. Rejected posts are reported through `PostError` and `SendError`,
//! failing tasks through `TaskError`.

use crate::parcel::Parcel;
use std::io;
use thiserror::Error;

/// The error type tasks return to report a failure to their looper's exception handler.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors reported when an entry cannot be enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PostError {
    /// The looper is quitting and accepts no new entries.
    #[error("looper is quitting")]
    Quitting,

    /// The looper has quit.
    #[error("looper has quit")]
    Quit,

    /// The parcel has no target and the looper has no default receiver.
    #[error("parcel has no receiver")]
    NoReceiver,

    /// The parcel targets a channel nobody registered.
    #[error("no receiver registered on channel `{0}`")]
    UnknownChannel(String),
}

/// Errors reported when a parcel cannot be sent. The rejected parcel is handed back.
#[derive(Debug, Error)]
#[error("parcel rejected: {error}")]
pub struct SendError {
    error: PostError,
    parcel: Parcel,
}

impl SendError {
    pub(crate) fn new(error: PostError, parcel: Parcel) -> Self {
        Self { error, parcel }
    }

    /// Returns the reason the parcel was rejected.
    pub fn error(&self) -> &PostError {
        &self.error
    }

    /// Returns the rejected parcel.
    pub fn into_parcel(self) -> Parcel {
        self.parcel
    }
}

/// Errors raised while running a task, forwarded to the looper's exception handler.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The task returned an error.
    #[error("task failed: {0}")]
    Failed(#[source] BoxError),

    /// The task, barrier predicate or receiver panicked.
    #[error("task panicked: {0}")]
    Panicked(String),
}

/// Errors of the looper lifecycle.
#[derive(Debug, Error)]
pub enum LooperError {
    /// A thread already joined the loop.
    #[error("looper `{0}` was already joined by another thread")]
    AlreadyJoined(String),

    /// The looper has quit and cannot be reused.
    #[error("looper `{0}` has quit")]
    Quit(String),

    /// The worker thread could not be spawned.
    #[error("failed to spawn looper thread: {0}")]
    Spawn(#[from] io::Error),
}

/// Errors of the parcel router.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    /// The main looper can only be designated once.
    #[error("main looper is already set")]
    MainLooperAlreadySet,
}
