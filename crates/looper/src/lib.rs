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

//! This crate contains a cooperative message loop: a per-thread `Looper` running the entries of an
//! ordered queue, a `LooperFactory` handing out one looper per worker, a `BlockingTask` bridge for
//! threads which need to wait on a posted task, and a `Router` addressing parcels to the main
//! looper.
//!
//! Entries run in order of their scheduled uptime, then in the order they were posted. Scheduling
//! uses a monotonic clock, never the wall clock.
//!
//! ```ignore
//! let (looper, thread) = Looper::builder().name("main").spawn()?;
//! looper.post_delayed(|ctx| {
//!     log::info!("ran {} ms late", ctx.lag());
//!     ctx.looper().quit_safely();
//!     Ok(())
//! }, 100);
//! thread.join().unwrap()?;
//! ```

mod blocking;
mod builder;
mod core;
mod error;
mod executor;
mod factory;
mod handler;
mod looper;
mod parcel;
mod router;

pub use crate::blocking::{BlockingTask, Completion};
pub use crate::builder::{Builder, DEFAULT_OVERLOAD_THRESHOLD};
pub use crate::core::clock::{uptime, Clock, ManualClock, SystemClock};
pub use crate::core::entry::{Context, Id as EntryId};
pub use crate::core::flags::Flags;
pub use crate::core::queue::Telemetry;
pub use crate::error::{BoxError, LooperError, PostError, RouterError, SendError, TaskError};
pub use crate::executor::{Executor, Job, ThreadExecutor};
pub use crate::factory::LooperFactory;
pub use crate::handler::{Disposition, ExceptionHandler, LogHandler};
pub use crate::looper::{Looper, Status, Tick};
pub use crate::parcel::{Parcel, Receiver, Target};
pub use crate::router::Router;
