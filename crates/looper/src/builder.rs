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

//! This module contains the `Builder` used to configure and create a `Looper`.

use crate::core::clock::{Clock, SystemClock};
use crate::core::flags::Flags;
use crate::core::queue::Queue;
use crate::error::LooperError;
use crate::executor::{Executor, ThreadExecutor};
use crate::handler::{ExceptionHandler, LogHandler};
use crate::looper::{Inner, Looper};
use crate::parcel::Receiver;
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::{fmt, sync, thread};

/// Lag, in milliseconds, past which a ready entry is reported as an overload by default.
pub const DEFAULT_OVERLOAD_THRESHOLD: u64 = 1_000;

/// Configures a new `Looper`.
///
/// ```ignore
/// let looper = Looper::builder()
///     .name("io")
///     .flags(Flags::AUTO_QUIT)
///     .build();
/// ```
pub struct Builder {
    name: Option<String>,
    flags: Flags,
    clock: sync::Arc<dyn Clock>,
    executor: sync::Arc<dyn Executor>,
    handler: sync::Arc<dyn ExceptionHandler>,
    receiver: Option<sync::Arc<dyn Receiver>>,
    overload_threshold: u64,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    /// Creates a builder with the system clock, the thread executor and the logging handler.
    pub fn new() -> Self {
        Self {
            name: None,
            flags: Flags::NONE,
            clock: sync::Arc::new(SystemClock),
            executor: sync::Arc::new(ThreadExecutor),
            handler: sync::Arc::new(LogHandler),
            receiver: None,
            overload_threshold: DEFAULT_OVERLOAD_THRESHOLD,
        }
    }

    /// Names the looper. Spawned loopers name their thread after it.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the behavior flags of the looper.
    pub fn flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the clock entries are scheduled against.
    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.clock = sync::Arc::new(clock);
        self
    }

    /// Sets the executor async entries are dispatched to.
    pub fn executor(mut self, executor: impl Executor) -> Self {
        self.executor = sync::Arc::new(executor);
        self
    }

    /// Sets the handler task failures are forwarded to.
    pub fn exception_handler(mut self, handler: impl ExceptionHandler) -> Self {
        self.handler = sync::Arc::new(handler);
        self
    }

    /// Sets the receiver of parcels sent without an explicit target.
    pub fn receiver(mut self, receiver: sync::Arc<dyn Receiver>) -> Self {
        self.receiver = Some(receiver);
        self
    }

    /// Sets how late, in milliseconds, an entry may start before the looper counts an overload.
    pub fn overload_threshold(mut self, millis: u64) -> Self {
        self.overload_threshold = millis;
        self
    }

    /// Builds the looper. No thread joins it yet.
    pub fn build(self) -> Looper {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        let name = self
            .name
            .unwrap_or_else(|| format!("looper-{}", NEXT.fetch_add(1, Ordering::Relaxed)));
        Looper::from_inner(Inner {
            name,
            queue: Queue::new(self.flags),
            clock: self.clock,
            executor: self.executor,
            handler: self.handler,
            receiver: self.receiver,
            overload_threshold: self.overload_threshold,
            owner: OnceCell::new(),
            listeners: sync::Mutex::default(),
        })
    }

    /// Builds the looper and spawns a thread which joins its loop.
    pub fn spawn(
        self,
    ) -> Result<(Looper, thread::JoinHandle<Result<(), LooperError>>), LooperError> {
        let looper = self.build();
        let handle = looper.spawn()?;
        Ok((looper, handle))
    }
}

impl fmt::Debug for Builder {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Builder")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .field("has_receiver", &self.receiver.is_some())
            .field("overload_threshold", &self.overload_threshold)
            .finish()
    }
}
