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

//! This module contains the implementation of a `Router`, the process-wide facade which addresses
//! parcels and tasks to the designated main `Looper`.
//!
//! The router is an explicit context object: construct it once at start-up, designate the main
//! looper, and hand the router to the components which need to send parcels.

use crate::core::entry::Context;
use crate::error::{BoxError, PostError, RouterError, SendError};
use crate::looper::Looper;
use crate::parcel::{Parcel, Receiver, Target};
use once_cell::sync::OnceCell;
use std::{collections, fmt, sync};

/// Routes parcels to receivers on the main looper.
#[derive(Default)]
pub struct Router {
    main: OnceCell<Looper>,
    /// Holds the receivers registered on named channels.
    channels: sync::RwLock<collections::HashMap<String, sync::Arc<dyn Receiver>>>,
}

impl Router {
    /// Creates a router with no main looper and no channels.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a router whose main looper is `looper`.
    pub fn with_main_looper(looper: Looper) -> Self {
        let router = Self::new();
        let _ = router.main.set(looper);
        router
    }

    /// Designates the main looper. It can only be set once.
    pub fn set_main_looper(&self, looper: Looper) -> Result<(), RouterError> {
        self.main
            .set(looper)
            .map_err(|_| RouterError::MainLooperAlreadySet)?;
        log::debug!("main looper set to `{}`", self.main_looper().name());
        Ok(())
    }

    /// Returns the main looper.
    ///
    /// # Panics
    ///
    /// Panics if no main looper was designated yet.
    pub fn main_looper(&self) -> &Looper {
        match self.main.get() {
            Some(looper) => looper,
            None => panic!("main looper accessed before `Router::set_main_looper`"),
        }
    }

    /// Returns true once a main looper was designated.
    pub fn has_main_looper(&self) -> bool {
        self.main.get().is_some()
    }

    /// Returns the uptime of the main looper's clock.
    pub fn uptime(&self) -> u64 {
        self.main_looper().uptime()
    }

    /// Registers `receiver` on `channel`, returning the receiver it replaces.
    pub fn register_channel(
        &self,
        channel: impl Into<String>,
        receiver: sync::Arc<dyn Receiver>,
    ) -> Option<sync::Arc<dyn Receiver>> {
        self.write_channels().insert(channel.into(), receiver)
    }

    /// Unregisters the receiver on `channel`, returning it.
    pub fn unregister_channel(&self, channel: &str) -> Option<sync::Arc<dyn Receiver>> {
        self.write_channels().remove(channel)
    }

    /// Sends a parcel carrying only `code` to the main looper's receiver.
    pub fn send_empty_parcel(&self, code: i32) -> bool {
        self.send_parcel(Parcel::new(code))
    }

    /// Sends `parcel` to the main looper for immediate delivery.
    pub fn send_parcel(&self, parcel: Parcel) -> bool {
        self.send_parcel_delayed(parcel, 0)
    }

    /// Sends `parcel` for delivery at the current uptime plus `delay_ms`. Negative delays count as
    /// zero.
    pub fn send_parcel_delayed(&self, parcel: Parcel, delay_ms: i64) -> bool {
        let delay = u64::try_from(delay_ms.max(0)).unwrap_or_default();
        self.send_parcel_at_time(parcel, self.uptime().saturating_add(delay))
    }

    /// Sends `parcel` for delivery at uptime `at`. Returns false, dropping the parcel, if the main
    /// looper is quitting or the parcel's channel is unknown.
    pub fn send_parcel_at_time(&self, parcel: Parcel, at: u64) -> bool {
        match self.try_send_parcel_at_time(parcel, at) {
            Ok(()) => true,
            Err(err) => {
                log::debug!("{err}");
                false
            }
        }
    }

    /// Sends `parcel` for immediate delivery, behind every entry which is already ready. Reserved for
    /// rare control messages since it starves delayed work.
    pub fn send_parcel_first(&self, parcel: Parcel) -> bool {
        self.send_parcel_at_time(parcel, self.uptime())
    }

    /// Sends `parcel` for delivery at uptime `at`, handing it back if it cannot be enqueued.
    pub fn try_send_parcel_at_time(&self, parcel: Parcel, at: u64) -> Result<(), SendError> {
        let parcel = self.resolve(parcel)?;
        self.main_looper().try_send_parcel_at_time(parcel, at)?;
        Ok(())
    }

    /// Posts `task` to the main looper.
    pub fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce(&Context) -> Result<(), BoxError> + Send + 'static,
    {
        self.main_looper().post(task)
    }

    /// Posts `task` to the main looper, to run after `delay_ms` milliseconds.
    pub fn post_delayed<F>(&self, task: F, delay_ms: i64) -> bool
    where
        F: FnOnce(&Context) -> Result<(), BoxError> + Send + 'static,
    {
        self.main_looper().post_delayed(task, delay_ms)
    }

    /// Posts `task` to the main looper, to run at uptime `at`.
    pub fn post_at_time<F>(&self, task: F, at: u64) -> bool
    where
        F: FnOnce(&Context) -> Result<(), BoxError> + Send + 'static,
    {
        self.main_looper().post_at_time(task, at)
    }

    /// Posts `task` to the front of the main looper's queue.
    pub fn post_first<F>(&self, task: F) -> bool
    where
        F: FnOnce(&Context) -> Result<(), BoxError> + Send + 'static,
    {
        self.main_looper().post_first(task)
    }

    /// Replaces a channel target with the receiver registered on it.
    fn resolve(&self, mut parcel: Parcel) -> Result<Parcel, SendError> {
        let channel = match parcel.target() {
            Some(Target::Channel(channel)) => channel.clone(),
            _ => return Ok(parcel),
        };
        let receiver = self.read_channels().get(&channel).cloned();
        match receiver {
            Some(receiver) => {
                parcel.set_target(Target::Receiver(receiver));
                Ok(parcel)
            }
            None => {
                let error = PostError::UnknownChannel(channel);
                log::warn!("dropping parcel {}: {error}", parcel.code());
                Err(SendError::new(error, parcel))
            }
        }
    }

    fn read_channels(
        &self,
    ) -> sync::RwLockReadGuard<'_, collections::HashMap<String, sync::Arc<dyn Receiver>>> {
        self.channels
            .read()
            .expect("`RwLockReadGuard` of the `Router` channels should be acquired properly")
    }

    fn write_channels(
        &self,
    ) -> sync::RwLockWriteGuard<'_, collections::HashMap<String, sync::Arc<dyn Receiver>>> {
        self.channels
            .write()
            .expect("`RwLockWriteGuard` of the `Router` channels should be acquired properly")
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Router")
            .field("main", &self.main.get())
            .field("channels", &self.read_channels().keys().collect::<Vec<_>>())
            .finish()
    }
}
