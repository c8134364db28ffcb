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

//! This module contains the implementation of a `LooperFactory`, the registry handing out one
//! `Looper` per logical worker.
//!
//! Workers are identified by an explicit key. `obtain_current` and `destroy_current` key the
//! registry by the calling thread's id for callers which want one looper per thread.

use crate::looper::Looper;
use std::{collections, fmt, hash, sync, thread};

type Registry<K> = sync::Arc<sync::Mutex<collections::HashMap<K, Looper>>>;

/// Maps worker keys to their loopers. The registry has its own lock, independent of the queues of
/// the loopers it holds, so registration and removal are safe from any thread.
pub struct LooperFactory<K = thread::ThreadId> {
    loopers: Registry<K>,
}

impl<K> Default for LooperFactory<K>
where
    K: Eq + hash::Hash + Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> LooperFactory<K>
where
    K: Eq + hash::Hash + Clone + Send + 'static,
{
    /// Creates an empty factory.
    pub fn new() -> Self {
        Self {
            loopers: sync::Arc::default(),
        }
    }

    /// Returns the [`MutexGuard`](https://doc.rust-lang.org/std/sync/struct.MutexGuard.html) of the
    /// registry.
    fn lock(&self) -> sync::MutexGuard<'_, collections::HashMap<K, Looper>> {
        lock(&self.loopers)
    }

    /// Returns the looper bound to `key`, creating and registering one with `create` if there is
    /// none. A quitting looper is never handed out: it is replaced.
    pub fn obtain<C>(&self, key: K, create: C) -> Looper
    where
        C: FnOnce() -> Looper,
    {
        self.obtain_checked(key, create, |_| true)
    }

    /// Returns the looper bound to `key`, replacing it if it fails `alive`. A replaced looper that
    /// was not quitting yet is quit unsafely. `create` runs under the registry lock and must not call
    /// back into the factory.
    pub fn obtain_checked<C, A>(&self, key: K, create: C, alive: A) -> Looper
    where
        C: FnOnce() -> Looper,
        A: Fn(&Looper) -> bool,
    {
        let (looper, stale) = {
            let mut loopers = self.lock();
            let mut stale = None;
            if let Some(looper) = loopers.get(&key) {
                if !looper.is_quitting() && alive(looper) {
                    return looper.clone();
                }
                log::debug!("replacing looper `{}`", looper.name());
                // A quitting looper is left to finish on its own.
                stale = loopers.remove(&key).filter(|looper| !looper.is_quitting());
            }
            let looper = create();
            loopers.insert(key.clone(), looper.clone());
            (looper, stale)
        };
        if let Some(stale) = stale {
            stale.quit_unsafe();
        }
        self.deregister_on_quit(key, &looper);
        looper
    }

    /// Returns the live looper bound to `key`, if any.
    pub fn get(&self, key: &K) -> Option<Looper> {
        self.lock()
            .get(key)
            .filter(|looper| !looper.is_quitting())
            .cloned()
    }

    /// Unregisters the looper bound to `key` and quits it unsafely. Returns false if none was bound.
    pub fn destroy(&self, key: &K) -> bool {
        let Some(looper) = self.lock().remove(key) else {
            return false;
        };
        looper.quit_unsafe();
        true
    }

    /// Returns the number of registered loopers.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if no looper is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes `looper` from the registry once it quits, unless another looper took its key.
    fn deregister_on_quit(&self, key: K, looper: &Looper) {
        let registry = sync::Arc::downgrade(&self.loopers);
        looper.on_quit(move |looper| {
            let Some(registry) = registry.upgrade() else {
                return;
            };
            let mut loopers = lock(&registry);
            if loopers.get(&key).is_some_and(|bound| bound.ptr_eq(looper)) {
                loopers.remove(&key);
            }
        });
    }
}

impl LooperFactory<thread::ThreadId> {
    /// Returns the looper bound to the calling thread, creating one with `create` if needed.
    pub fn obtain_current<C>(&self, create: C) -> Looper
    where
        C: FnOnce() -> Looper,
    {
        self.obtain(thread::current().id(), create)
    }

    /// Returns the looper bound to the calling thread, replacing it if it fails `alive`.
    pub fn obtain_current_checked<C, A>(&self, create: C, alive: A) -> Looper
    where
        C: FnOnce() -> Looper,
        A: Fn(&Looper) -> bool,
    {
        self.obtain_checked(thread::current().id(), create, alive)
    }

    /// Quits the looper bound to the calling thread unsafely.
    pub fn destroy_current(&self) -> bool {
        self.destroy(&thread::current().id())
    }
}

fn lock<K>(registry: &Registry<K>) -> sync::MutexGuard<'_, collections::HashMap<K, Looper>> {
    registry
        .lock()
        .expect("`MutexGuard` of the `LooperFactory` registry should be locked properly")
}

impl<K> fmt::Debug for LooperFactory<K>
where
    K: fmt::Debug,
{
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let loopers = lock(&self.loopers);
        fmt.debug_map().entries(loopers.iter()).finish()
    }
}
