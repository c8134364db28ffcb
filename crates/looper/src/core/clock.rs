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

//! This module contains the implementation of the monotonic uptime clock which every `Looper`
//! schedules its entries against. The wall clock is never consulted, so adjusting the system time
//! does not perturb the order in which entries run.

use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};
use std::{sync, time};

/// Holds the instant the process first asked for its uptime. Every `SystemClock` measures the
/// elapsed milliseconds from this single epoch, hence uptimes are comparable across loopers.
static EPOCH: Lazy<time::Instant> = Lazy::new(time::Instant::now);

/// Returns the milliseconds elapsed since the process epoch.
pub fn uptime() -> u64 {
    u64::try_from(EPOCH.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Represents a source of monotonic uptime, expressed in milliseconds.
pub trait Clock: Send + Sync + 'static {
    /// Returns the current uptime in milliseconds.
    fn uptime(&self) -> u64;
}

/// The process-wide monotonic clock, backed by [`Instant`](https://doc.rust-lang.org/std/time/struct.Instant.html).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn uptime(&self) -> u64 {
        uptime()
    }
}

/// A clock which only moves when told to. Loopers driven by a `ManualClock` see time standing still
/// between calls to `set` or `advance`, which makes scheduling decisions reproducible.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Creates a new `ManualClock` reading `start` milliseconds.
    pub fn new(start: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Moves the clock to the absolute uptime `now`.
    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Moves the clock forward by `millis` and returns the new uptime.
    pub fn advance(&self, millis: u64) -> u64 {
        self.now.fetch_add(millis, Ordering::SeqCst) + millis
    }
}

impl Clock for ManualClock {
    #[inline]
    fn uptime(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

impl<C> Clock for sync::Arc<C>
where
    C: Clock,
{
    #[inline]
    fn uptime(&self) -> u64 {
        (**self).uptime()
    }
}
