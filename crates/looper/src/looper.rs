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

//! This module contains the implementation of a `Looper`, the thread-affine engine which repeatedly
//! pulls ready entries from its queue and runs them.
//!
//! A `Looper` is a cheap, cloneable handle. Any thread may post tasks, barriers and parcels through
//! it; only the thread which joined the loop (or first ticked it) ever runs entries inline. Entries
//! of one looper never run concurrently on that thread, and they run in `(when, id)` order.

use crate::builder::Builder;
use crate::core::clock::Clock;
use crate::core::entry::{Context, Entry, Id as EntryId, Predicate, Task, Work};
use crate::core::flags::Flags;
use crate::core::queue::{Activation, Finish, Next, Queue, Telemetry};
use crate::error::{BoxError, LooperError, PostError, SendError, TaskError};
use crate::executor::Executor;
use crate::handler::{Disposition, ExceptionHandler};
use crate::parcel::{Parcel, Receiver, Target};
use once_cell::sync::OnceCell;
use std::{any, fmt, mem, panic, sync, thread, time};

/// Represents the lifecycle of a `Looper`.
#[derive(Default, Clone, Copy, Hash, PartialEq, Eq)]
pub enum Status {
    /// The queue exists but no thread joined the loop yet.
    #[default]
    Created,
    /// The owning thread is inside the loop.
    Running,
    /// No new entries are accepted; pending entries still drain.
    QuittingSafe,
    /// Pending entries were dropped; the loop exits at its next tick.
    QuittingUnsafe,
    /// Terminal. The looper must not be reused.
    Quit,
}

impl Status {
    /// Returns true once the looper stopped accepting entries.
    pub fn is_quitting(self) -> bool {
        !matches!(self, Self::Created | Self::Running)
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(fmt, "Status::Created")?,
            Self::Running => write!(fmt, "Status::Running")?,
            Self::QuittingSafe => write!(fmt, "Status::QuittingSafe")?,
            Self::QuittingUnsafe => write!(fmt, "Status::QuittingUnsafe")?,
            Self::Quit => write!(fmt, "Status::Quit")?,
        }
        Ok(())
    }
}

/// Represents the outcome of one `Looper::tick`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// The entry ran on the loop thread.
    Executed(EntryId),
    /// The async entry was handed to the executor.
    Dispatched(EntryId),
    /// The barrier reached the head of the queue and was removed.
    Barrier { id: EntryId, passed: bool },
    /// The entry was cancelled after it became active and did not run.
    Skipped(EntryId),
    /// Nothing is ready; the next entry is due after the given duration.
    Blocked(time::Duration),
    /// The queue is empty.
    Empty,
    /// The looper has quit.
    Quit,
}

type QuitListener = Box<dyn FnOnce(&Looper) + Send>;

/// The shared state behind every `Looper` handle.
pub(crate) struct Inner {
    pub(crate) name: String,
    pub(crate) queue: Queue,
    pub(crate) clock: sync::Arc<dyn Clock>,
    pub(crate) executor: sync::Arc<dyn Executor>,
    pub(crate) handler: sync::Arc<dyn ExceptionHandler>,
    /// The receiver of parcels sent without an explicit target.
    pub(crate) receiver: Option<sync::Arc<dyn Receiver>>,
    /// Lag, in milliseconds, past which a ready entry counts as an overload.
    pub(crate) overload_threshold: u64,
    pub(crate) owner: OnceCell<thread::ThreadId>,
    pub(crate) listeners: sync::Mutex<Vec<QuitListener>>,
}

/// A handle to a message loop. Cloning the handle does not create a new loop.
#[derive(Clone)]
pub struct Looper {
    inner: sync::Arc<Inner>,
}

impl Looper {
    /// Returns a `Builder` to configure a new looper.
    pub fn builder() -> Builder {
        Builder::new()
    }

    /// Creates a looper with the default configuration.
    pub fn new() -> Self {
        Builder::new().build()
    }

    pub(crate) fn from_inner(inner: Inner) -> Self {
        Self {
            inner: sync::Arc::new(inner),
        }
    }

    /// Returns the name of the looper.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the current status of the looper.
    pub fn status(&self) -> Status {
        self.inner.queue.status()
    }

    /// Returns the behavior flags of the looper.
    pub fn flags(&self) -> Flags {
        self.inner.queue.flags()
    }

    /// Returns true once the looper stopped accepting entries.
    pub fn is_quitting(&self) -> bool {
        self.status().is_quitting()
    }

    /// Returns true once the looper reached `Status::Quit`.
    pub fn is_quit(&self) -> bool {
        self.status() == Status::Quit
    }

    /// Returns the current uptime of the looper's clock, in milliseconds.
    pub fn uptime(&self) -> u64 {
        self.inner.clock.uptime()
    }

    /// Returns a snapshot of the looper's counters.
    pub fn telemetry(&self) -> Telemetry {
        self.inner.queue.telemetry()
    }

    /// Returns the identifier of the entry currently run by the loop thread.
    pub fn active_entry(&self) -> Option<EntryId> {
        self.inner.queue.active()
    }

    /// Returns the pending entries, in the order they will run, with their scheduled times.
    pub fn pending_entries(&self) -> Vec<(EntryId, u64)> {
        self.inner.queue.pending()
    }

    /// Returns the scheduled time of the pending entry identified by `id`.
    pub fn scheduled_time(&self, id: EntryId) -> Option<u64> {
        self.inner.queue.scheduled_time(id)
    }

    /// Returns true if the entry identified by `id` is still pending.
    pub fn contains(&self, id: EntryId) -> bool {
        self.inner.queue.contains(id)
    }

    /// Returns the number of pending entries.
    pub fn len(&self) -> usize {
        self.inner.queue.len()
    }

    /// Returns true if no entry is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the receiver of parcels sent without an explicit target.
    pub fn receiver(&self) -> Option<&sync::Arc<dyn Receiver>> {
        self.inner.receiver.as_ref()
    }

    /// Returns true if the calling thread owns the loop.
    pub fn is_current(&self) -> bool {
        self.inner.owner.get() == Some(&thread::current().id())
    }

    /// Returns true if both handles refer to the same loop.
    pub fn ptr_eq(&self, other: &Looper) -> bool {
        sync::Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Looper {
    /// Runs the loop on the calling thread until the looper quits. The calling thread becomes the
    /// owner of the looper.
    pub fn join_loop(&self) -> Result<(), LooperError> {
        let current = thread::current().id();
        let owner = *self.inner.owner.get_or_init(|| current);
        if owner != current || self.status() == Status::Running {
            return Err(LooperError::AlreadyJoined(self.name().to_owned()));
        }
        if self.inner.queue.begin(self.uptime()) == Status::Quit {
            return Err(LooperError::Quit(self.name().to_owned()));
        }
        log::debug!("looper `{}` joined", self.name());
        loop {
            match self.tick() {
                Tick::Blocked(wait) => self.inner.queue.park(Some(wait)),
                Tick::Empty if !self.is_quitting() => self.inner.queue.park(None),
                Tick::Quit => break,
                _ => {}
            }
        }
        log::debug!("looper `{}` left its loop", self.name());
        Ok(())
    }

    /// Spawns a thread named after the looper which joins the loop.
    pub fn spawn(&self) -> Result<thread::JoinHandle<Result<(), LooperError>>, LooperError> {
        let looper = self.clone();
        let handle = thread::Builder::new()
            .name(self.name().to_owned())
            .spawn(move || looper.join_loop())?;
        Ok(handle)
    }

    /// Polls the queue once and runs the ready entry, if any. Only the owning thread may tick; the
    /// first thread to tick an unjoined looper becomes its owner.
    pub fn tick(&self) -> Tick {
        self.bind();
        match self.status() {
            Status::Quit => return Tick::Quit,
            Status::QuittingUnsafe if self.finish() => return Tick::Quit,
            _ => {}
        }
        let now = self.uptime();
        match self.inner.queue.next(now) {
            Next::Ready(entry) => {
                let lag = now.saturating_sub(entry.when());
                if lag > self.inner.overload_threshold {
                    self.inner.queue.record_overload(now);
                    log::warn!(
                        "looper `{}`: entry {} started {lag} ms late",
                        self.name(),
                        entry.id()
                    );
                }
                self.run(entry)
            }
            Next::Blocked(wait) => Tick::Blocked(wait),
            Next::Empty => self.idle(),
        }
    }

    /// Stops accepting new entries; pending entries still drain. Returns false if the looper was
    /// already quitting.
    pub fn quit_safely(&self) -> bool {
        let changed = self.inner.queue.quit(true).is_some();
        if changed {
            log::debug!("looper `{}` is quitting safely", self.name());
        }
        changed
    }

    /// Drops every pending entry and makes the loop exit. Returns false if the looper was already
    /// quitting unsafely or quit.
    pub fn quit_unsafe(&self) -> bool {
        match self.inner.queue.quit(false) {
            Some(dropped) => {
                log::debug!(
                    "looper `{}` is quitting unsafely, {dropped} pending entries dropped",
                    self.name()
                );
                true
            }
            None => false,
        }
    }

    /// Posts a quit directive which makes the looper quit safely once it reaches uptime `at`.
    pub fn quit_safely_at_time(&self, at: u64) -> bool {
        self.enqueue(Entry::new(at, Work::Quit)).is_ok()
    }

    /// Registers `listener` to be called once the looper quits. If it already has, the listener is
    /// called right away.
    pub fn on_quit<F>(&self, listener: F)
    where
        F: FnOnce(&Looper) + Send + 'static,
    {
        let mut listeners = self.lock_listeners();
        if self.status() != Status::Quit {
            listeners.push(Box::new(listener));
            return;
        }
        drop(listeners);
        listener(self);
    }
}

impl Looper {
    /// Posts `task` to run as soon as possible.
    pub fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce(&Context) -> Result<(), BoxError> + Send + 'static,
    {
        self.post_delayed(task, 0)
    }

    /// Posts `task` to run after `delay_ms` milliseconds. Negative delays count as zero.
    pub fn post_delayed<F>(&self, task: F, delay_ms: i64) -> bool
    where
        F: FnOnce(&Context) -> Result<(), BoxError> + Send + 'static,
    {
        self.post_at_time(task, self.deadline(delay_ms))
    }

    /// Posts `task` to run at uptime `at`.
    pub fn post_at_time<F>(&self, task: F, at: u64) -> bool
    where
        F: FnOnce(&Context) -> Result<(), BoxError> + Send + 'static,
    {
        self.try_post_at_time(task, at).is_ok()
    }

    /// Posts `task` for immediate execution: ahead of work scheduled in the future, but behind every
    /// entry which is already ready. Posting many entries this way starves delayed work.
    pub fn post_first<F>(&self, task: F) -> bool
    where
        F: FnOnce(&Context) -> Result<(), BoxError> + Send + 'static,
    {
        self.post_at_time(task, self.uptime())
    }

    /// Posts `task` to be dispatched to the executor as soon as possible.
    pub fn post_async<F>(&self, task: F) -> bool
    where
        F: FnOnce(&Context) -> Result<(), BoxError> + Send + 'static,
    {
        self.try_post_async_at_time(task, self.uptime()).is_ok()
    }

    /// Posts `task` to run at uptime `at` and returns its identifier, which can be cancelled.
    pub fn try_post_at_time<F>(&self, task: F, at: u64) -> Result<EntryId, PostError>
    where
        F: FnOnce(&Context) -> Result<(), BoxError> + Send + 'static,
    {
        self.enqueue(Entry::new(at, Work::Task(Box::new(task))))
    }

    /// Posts `task` to be dispatched to the executor at uptime `at`.
    pub fn try_post_async_at_time<F>(&self, task: F, at: u64) -> Result<EntryId, PostError>
    where
        F: FnOnce(&Context) -> Result<(), BoxError> + Send + 'static,
    {
        self.enqueue(Entry::new(at, Work::Task(Box::new(task))).with_async(true))
    }

    /// Posts a barrier which tests `predicate` once it reaches the head of the queue. The barrier
    /// performs no work and is removed whatever the outcome.
    pub fn try_post_barrier<P>(&self, predicate: P) -> Result<EntryId, PostError>
    where
        P: Fn(&Looper) -> bool + Send + 'static,
    {
        self.try_post_barrier_at_time(predicate, self.uptime())
    }

    /// Posts a barrier scheduled at uptime `at`.
    pub fn try_post_barrier_at_time<P>(&self, predicate: P, at: u64) -> Result<EntryId, PostError>
    where
        P: Fn(&Looper) -> bool + Send + 'static,
    {
        self.enqueue(Entry::new(at, Work::Barrier(Box::new(predicate))))
    }

    /// Cancels the entry identified by `id`. A pending entry is removed without side effects; the
    /// active entry loses its slot and is never run again. Unknown identifiers are ignored.
    pub fn cancel(&self, id: EntryId) -> bool {
        self.inner.queue.cancel(id)
    }

    /// Sends a parcel carrying only `code` to the default receiver.
    pub fn send_empty_parcel(&self, code: i32) -> bool {
        self.send_parcel(Parcel::new(code))
    }

    /// Sends `parcel` for immediate delivery.
    pub fn send_parcel(&self, parcel: Parcel) -> bool {
        self.send_parcel_delayed(parcel, 0)
    }

    /// Sends `parcel` for delivery after `delay_ms` milliseconds. Negative delays count as zero.
    pub fn send_parcel_delayed(&self, parcel: Parcel, delay_ms: i64) -> bool {
        self.send_parcel_at_time(parcel, self.deadline(delay_ms))
    }

    /// Sends `parcel` for delivery at uptime `at`. Returns false, dropping the parcel, if it cannot be
    /// enqueued.
    pub fn send_parcel_at_time(&self, parcel: Parcel, at: u64) -> bool {
        match self.try_send_parcel_at_time(parcel, at) {
            Ok(_) => true,
            Err(err) => {
                log::debug!("looper `{}`: {err}", self.name());
                false
            }
        }
    }

    /// Sends `parcel` for immediate delivery, behind every entry which is already ready. Reserved for
    /// rare control messages since it starves delayed work.
    pub fn send_parcel_first(&self, parcel: Parcel) -> bool {
        self.send_parcel_at_time(parcel, self.uptime())
    }

    /// Sends `parcel` for delivery at uptime `at`. A parcel without target goes to the looper's
    /// receiver. The parcel is handed back if it cannot be enqueued.
    pub fn try_send_parcel_at_time(
        &self,
        mut parcel: Parcel,
        at: u64,
    ) -> Result<EntryId, SendError> {
        let unresolved = match parcel.target() {
            Some(Target::Receiver(_)) => None,
            Some(Target::Channel(name)) => Some(PostError::UnknownChannel(name.clone())),
            None if self.inner.receiver.is_some() => None,
            None => Some(PostError::NoReceiver),
        };
        if let Some(error) = unresolved {
            return Err(SendError::new(error, parcel));
        }
        if let (None, Some(receiver)) = (parcel.target(), &self.inner.receiver) {
            let target = Target::Receiver(sync::Arc::clone(receiver));
            parcel.set_target(target);
        }
        parcel.set_when(at);
        self.inner
            .queue
            .post(Entry::new(at, Work::Parcel(parcel)))
            .map_err(|rejected| match rejected.entry.into_work() {
                Work::Parcel(parcel) => SendError::new(rejected.error, parcel),
                _ => unreachable!("a parcel entry always carries its parcel"),
            })
    }
}

impl Looper {
    /// Binds the calling thread as owner, or checks that it is the owner.
    fn bind(&self) {
        let current = thread::current().id();
        let owner = *self.inner.owner.get_or_init(|| current);
        assert!(
            owner == current,
            "looper `{}` must only be ticked by its owning thread",
            self.name()
        );
    }

    #[inline]
    fn deadline(&self, delay_ms: i64) -> u64 {
        let delay = u64::try_from(delay_ms.max(0)).unwrap_or_default();
        self.uptime().saturating_add(delay)
    }

    fn enqueue(&self, entry: Entry) -> Result<EntryId, PostError> {
        self.inner.queue.post(entry).map_err(|rejected| {
            log::debug!(
                "looper `{}` rejected entry {}: {}",
                self.name(),
                rejected.entry.id(),
                rejected.error
            );
            rejected.error
        })
    }

    fn lock_listeners(&self) -> sync::MutexGuard<'_, Vec<QuitListener>> {
        self.inner
            .listeners
            .lock()
            .expect("`MutexGuard` of the quit listeners should be locked properly")
    }

    /// Handles an empty queue: a quitting looper quits once drained, an auto-quit looper starts
    /// quitting. Entries accepted between the poll and the quit are polled again.
    fn idle(&self) -> Tick {
        match self.status() {
            Status::Quit => Tick::Quit,
            Status::QuittingSafe | Status::QuittingUnsafe => {
                if self.finish() {
                    Tick::Quit
                } else {
                    self.tick()
                }
            }
            Status::Created | Status::Running => {
                if self.flags().is_auto_quit() && self.inner.queue.quit(true).is_some() {
                    log::debug!("looper `{}` ran out of entries, quitting", self.name());
                }
                Tick::Empty
            }
        }
    }

    /// Moves the looper to `Status::Quit` and notifies the quit listeners. Returns false if entries
    /// are still waiting to drain.
    fn finish(&self) -> bool {
        match self.inner.queue.finish() {
            Finish::Draining => return false,
            Finish::AlreadyQuit => return true,
            Finish::Finished => {}
        }
        log::debug!("looper `{}` quit", self.name());
        let listeners = mem::take(&mut *self.lock_listeners());
        for listener in listeners {
            listener(self);
        }
        true
    }

    /// Runs the entry handed out by the queue. Running an entry which is not the active one is a
    /// programming error.
    fn run(&self, mut entry: Entry) -> Tick {
        let id = entry.id();
        match self.inner.queue.activation(id) {
            Activation::Active => {}
            Activation::Cancelled => {
                self.inner.queue.recycle(id);
                log::trace!("looper `{}`: entry {id} cancelled before running", self.name());
                return Tick::Skipped(id);
            }
            Activation::Foreign => panic!(
                "entry {id} is not the active entry of looper `{}`",
                self.name()
            ),
        }
        entry.finalize();
        let when = entry.when();
        let is_async = entry.is_async() || self.flags().is_async();
        log::trace!("looper `{}`: running entry {id}", self.name());
        let tick = match entry.into_work() {
            Work::Task(task) if is_async => {
                self.dispatch(move |looper| looper.invoke(id, when, task));
                Tick::Dispatched(id)
            }
            Work::Task(task) => {
                self.invoke(id, when, task);
                Tick::Executed(id)
            }
            Work::Parcel(parcel) if is_async => {
                self.dispatch(move |looper| looper.deliver(id, parcel));
                Tick::Dispatched(id)
            }
            Work::Parcel(parcel) => {
                self.deliver(id, parcel);
                Tick::Executed(id)
            }
            Work::Barrier(predicate) => {
                let passed = self.evaluate(id, &predicate);
                Tick::Barrier { id, passed }
            }
            Work::Quit => {
                self.quit_safely();
                Tick::Executed(id)
            }
        };
        self.inner.queue.recycle(id);
        tick
    }

    fn dispatch<F>(&self, job: F)
    where
        F: FnOnce(&Looper) + Send + 'static,
    {
        let looper = self.clone();
        self.inner.executor.execute(Box::new(move || job(&looper)));
    }

    fn invoke(&self, id: EntryId, when: u64, task: Task) {
        let context = Context::new(self.clone(), id, when);
        let error = match panic::catch_unwind(panic::AssertUnwindSafe(|| task(&context))) {
            Ok(Ok(())) => return,
            Ok(Err(err)) => TaskError::Failed(err),
            Err(payload) => TaskError::Panicked(panic_message(&*payload)),
        };
        self.report(id, error);
    }

    fn deliver(&self, id: EntryId, parcel: Parcel) {
        let Some(receiver) = parcel.receiver() else {
            log::warn!(
                "looper `{}`: dropping parcel {} without receiver",
                self.name(),
                parcel.code()
            );
            return;
        };
        let delivery = panic::catch_unwind(panic::AssertUnwindSafe(|| {
            receiver.handle_parcel(parcel);
        }));
        if let Err(payload) = delivery {
            self.report(id, TaskError::Panicked(panic_message(&*payload)));
        }
    }

    fn evaluate(&self, id: EntryId, predicate: &Predicate) -> bool {
        match panic::catch_unwind(panic::AssertUnwindSafe(|| predicate(self))) {
            Ok(passed) => {
                log::debug!(
                    "looper `{}`: barrier {id} {}",
                    self.name(),
                    if passed { "passed" } else { "failed and vanished" }
                );
                passed
            }
            Err(payload) => {
                self.report(id, TaskError::Panicked(panic_message(&*payload)));
                false
            }
        }
    }

    fn report(&self, id: EntryId, error: TaskError) {
        if self.inner.handler.handle(self, id, error) == Disposition::Quit {
            self.quit_unsafe();
        }
    }
}

/// Extracts the message of a caught panic.
fn panic_message(payload: &(dyn any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}

impl Default for Looper {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Looper {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Looper")
            .field("name", &self.inner.name)
            .field("status", &self.status())
            .field("pending", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::executor::Job;

    type Journal = sync::Arc<sync::Mutex<Vec<EntryId>>>;

    fn looper_at(clock: &sync::Arc<ManualClock>) -> Looper {
        Looper::builder().clock(sync::Arc::clone(clock)).build()
    }

    fn record(journal: &Journal) -> impl FnOnce(&Context) -> Result<(), BoxError> + Send + 'static {
        let journal = sync::Arc::clone(journal);
        move |context: &Context| {
            journal.lock().unwrap().push(context.id());
            Ok(())
        }
    }

    fn drain(looper: &Looper) -> Vec<Tick> {
        let mut ticks = Vec::new();
        loop {
            match looper.tick() {
                tick @ (Tick::Blocked(_) | Tick::Empty | Tick::Quit) => {
                    ticks.push(tick);
                    return ticks;
                }
                tick => ticks.push(tick),
            }
        }
    }

    #[test]
    fn drains_by_time_then_post_order() {
        let clock = sync::Arc::new(ManualClock::new(0));
        let looper = looper_at(&clock);
        let journal = Journal::default();
        let late = looper.try_post_at_time(record(&journal), 100).unwrap();
        let first = looper.try_post_at_time(record(&journal), 50).unwrap();
        let second = looper.try_post_at_time(record(&journal), 50).unwrap();

        assert_eq!(
            looper.tick(),
            Tick::Blocked(time::Duration::from_millis(50))
        );
        clock.set(100);
        drain(&looper);
        assert_eq!(*journal.lock().unwrap(), vec![first, second, late]);
    }

    #[test]
    fn cancelled_pending_entry_never_runs() {
        let looper = Looper::builder().clock(ManualClock::new(0)).build();
        let journal = Journal::default();
        let kept = looper.try_post_at_time(record(&journal), 0).unwrap();
        let dropped = looper.try_post_at_time(record(&journal), 0).unwrap();
        assert!(looper.cancel(dropped));
        assert!(!looper.contains(dropped));
        drain(&looper);
        assert_eq!(*journal.lock().unwrap(), vec![kept]);
    }

    #[test]
    fn active_entry_cancels_itself() {
        let looper = Looper::builder().clock(ManualClock::new(0)).build();
        let observed = sync::Arc::new(sync::Mutex::new(None));
        let id = {
            let observed = sync::Arc::clone(&observed);
            looper
                .try_post_at_time(
                    move |context: &Context| {
                        assert_eq!(context.looper().active_entry(), Some(context.id()));
                        assert!(context.cancel());
                        *observed.lock().unwrap() = Some(context.looper().active_entry());
                        Ok(())
                    },
                    0,
                )
                .unwrap()
        };
        assert_eq!(looper.tick(), Tick::Executed(id));
        assert_eq!(*observed.lock().unwrap(), Some(None));
        assert_eq!(looper.active_entry(), None);
        assert_eq!(looper.tick(), Tick::Empty);
    }

    #[test]
    #[should_panic(expected = "is not the active entry")]
    fn running_a_foreign_entry_is_a_usage_error() {
        let looper = Looper::new();
        let entry = Entry::new(0, Work::Quit);
        looper.run(entry);
    }

    #[test]
    fn failing_barrier_vanishes_without_side_effects() {
        let looper = Looper::builder().clock(ManualClock::new(0)).build();
        let journal = Journal::default();
        let barrier = looper.try_post_barrier(|_| false).unwrap();
        let after = looper.try_post_at_time(record(&journal), 0).unwrap();
        assert!(journal.lock().unwrap().is_empty());

        assert_eq!(
            looper.tick(),
            Tick::Barrier {
                id: barrier,
                passed: false
            }
        );
        assert!(journal.lock().unwrap().is_empty());
        assert!(!looper.contains(barrier));
        assert_eq!(looper.tick(), Tick::Executed(after));
        assert_eq!(*journal.lock().unwrap(), vec![after]);
    }

    #[test]
    fn passing_barrier_is_removed_too() {
        let looper = Looper::builder().clock(ManualClock::new(0)).build();
        let barrier = looper
            .try_post_barrier(|looper: &Looper| looper.status() == Status::Created)
            .unwrap();
        assert_eq!(
            looper.tick(),
            Tick::Barrier {
                id: barrier,
                passed: true
            }
        );
        assert!(looper.is_empty());
    }

    #[test]
    fn auto_quit_looper_stops_accepting_once_empty() {
        let looper = Looper::builder()
            .clock(ManualClock::new(0))
            .flags(Flags::AUTO_QUIT)
            .build();
        assert!(looper.post(|_: &Context| Ok(())));
        assert!(matches!(looper.tick(), Tick::Executed(_)));
        assert_eq!(looper.tick(), Tick::Empty);
        assert_eq!(looper.status(), Status::QuittingSafe);
        assert!(!looper.post(|_: &Context| Ok(())));
        assert_eq!(looper.tick(), Tick::Quit);
        assert!(looper.is_quit());
    }

    #[test]
    fn safe_quit_polls_entries_accepted_after_an_empty_poll() {
        let looper = Looper::builder().clock(ManualClock::new(0)).build();
        let journal = Journal::default();
        assert_eq!(looper.tick(), Tick::Empty);
        let late = looper.try_post_at_time(record(&journal), 0).unwrap();
        assert!(looper.quit_safely());

        assert_eq!(looper.idle(), Tick::Executed(late));
        assert_eq!(*journal.lock().unwrap(), vec![late]);
        assert_eq!(looper.tick(), Tick::Quit);
        assert!(looper.is_quit());
    }

    #[test]
    fn quitting_safely_drains_delayed_entries() {
        let clock = sync::Arc::new(ManualClock::new(0));
        let looper = looper_at(&clock);
        let journal = Journal::default();
        let delayed = looper.try_post_at_time(record(&journal), 30).unwrap();
        assert!(looper.quit_safely());
        assert!(!looper.quit_safely());
        assert_eq!(
            looper.try_post_at_time(record(&journal), 0),
            Err(PostError::Quitting)
        );
        assert!(matches!(looper.tick(), Tick::Blocked(_)));
        clock.set(30);
        assert_eq!(looper.tick(), Tick::Executed(delayed));
        assert_eq!(looper.tick(), Tick::Quit);
        assert_eq!(
            looper.try_post_at_time(record(&journal), 0),
            Err(PostError::Quit)
        );
    }

    #[test]
    fn quitting_unsafely_drops_pending_entries() {
        let looper = Looper::builder().clock(ManualClock::new(0)).build();
        let journal = Journal::default();
        looper.try_post_at_time(record(&journal), 0).unwrap();
        assert!(looper.quit_unsafe());
        assert!(looper.is_empty());
        assert_eq!(looper.tick(), Tick::Quit);
        assert!(journal.lock().unwrap().is_empty());
    }

    #[test]
    fn quit_directive_quits_when_reached() {
        let clock = sync::Arc::new(ManualClock::new(0));
        let looper = looper_at(&clock);
        let journal = Journal::default();
        assert!(looper.quit_safely_at_time(20));
        let before = looper.try_post_at_time(record(&journal), 10).unwrap();
        clock.set(20);
        assert_eq!(looper.tick(), Tick::Executed(before));
        assert!(matches!(looper.tick(), Tick::Executed(_)));
        assert_eq!(looper.status(), Status::QuittingSafe);
        assert_eq!(looper.tick(), Tick::Quit);
    }

    #[test]
    fn failures_reach_the_exception_handler() {
        let failures = sync::Arc::new(sync::Mutex::new(Vec::new()));
        let looper = {
            let failures = sync::Arc::clone(&failures);
            Looper::builder()
                .clock(ManualClock::new(0))
                .exception_handler(move |_: &Looper, id: EntryId, error: TaskError| {
                    failures.lock().unwrap().push((id, error.to_string()));
                    Disposition::Continue
                })
                .build()
        };
        let failed = looper
            .try_post_at_time(|_: &Context| Err("broken".into()), 0)
            .unwrap();
        let panicked = looper
            .try_post_at_time(|_: &Context| panic!("boom"), 0)
            .unwrap();
        drain(&looper);
        assert_eq!(
            *failures.lock().unwrap(),
            vec![
                (failed, "task failed: broken".to_owned()),
                (panicked, "task panicked: boom".to_owned()),
            ]
        );
        assert_eq!(looper.status(), Status::Created);
    }

    #[test]
    fn handler_may_quit_the_looper() {
        let looper = Looper::builder()
            .clock(ManualClock::new(0))
            .exception_handler(|_: &Looper, _: EntryId, _: TaskError| Disposition::Quit)
            .build();
        looper
            .try_post_at_time(|_: &Context| Err("fatal".into()), 0)
            .unwrap();
        looper.try_post_at_time(|_: &Context| Ok(()), 0).unwrap();
        assert!(matches!(looper.tick(), Tick::Executed(_)));
        assert_eq!(looper.status(), Status::QuittingUnsafe);
        assert_eq!(looper.tick(), Tick::Quit);
    }

    #[test]
    fn async_entries_go_to_the_executor_in_order() {
        let jobs = sync::Arc::new(sync::Mutex::new(Vec::<Job>::new()));
        let looper = {
            let jobs = sync::Arc::clone(&jobs);
            Looper::builder()
                .clock(ManualClock::new(0))
                .executor(move |job: Job| jobs.lock().unwrap().push(job))
                .build()
        };
        let journal = Journal::default();
        let first = looper
            .try_post_async_at_time(record(&journal), 0)
            .unwrap();
        let second = looper.try_post_at_time(record(&journal), 0).unwrap();
        assert_eq!(looper.tick(), Tick::Dispatched(first));
        assert_eq!(looper.active_entry(), None);
        assert_eq!(looper.tick(), Tick::Executed(second));
        assert_eq!(*journal.lock().unwrap(), vec![second]);

        let pending = std::mem::take(&mut *jobs.lock().unwrap());
        assert_eq!(pending.len(), 1);
        pending.into_iter().for_each(|job| job());
        assert_eq!(*journal.lock().unwrap(), vec![second, first]);
    }

    #[test]
    fn async_flag_dispatches_every_task() {
        let dispatched = sync::Arc::new(sync::atomic::AtomicUsize::new(0));
        let looper = {
            let dispatched = sync::Arc::clone(&dispatched);
            Looper::builder()
                .clock(ManualClock::new(0))
                .flags(Flags::ASYNC)
                .executor(move |job: Job| {
                    dispatched.fetch_add(1, sync::atomic::Ordering::SeqCst);
                    job();
                })
                .build()
        };
        assert!(looper.post(|_: &Context| Ok(())));
        assert!(looper.post(|_: &Context| Ok(())));
        let ticks = drain(&looper);
        assert!(matches!(ticks[..], [Tick::Dispatched(_), Tick::Dispatched(_), Tick::Empty]));
        assert_eq!(dispatched.load(sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn parcels_default_to_the_looper_receiver() {
        let clock = sync::Arc::new(ManualClock::new(1_000));
        let delivered = sync::Arc::new(sync::Mutex::new(Vec::new()));
        let receiver = {
            let delivered = sync::Arc::clone(&delivered);
            sync::Arc::new(move |parcel: Parcel| {
                delivered.lock().unwrap().push((parcel.code(), parcel.when()));
            })
        };
        let looper = Looper::builder()
            .clock(sync::Arc::clone(&clock))
            .receiver(receiver)
            .build();
        assert!(looper.send_parcel_delayed(Parcel::new(2), 250));
        assert!(looper.send_parcel_delayed(Parcel::new(1), -40));
        assert!(looper.send_empty_parcel(3));
        assert_eq!(
            looper
                .pending_entries()
                .iter()
                .map(|&(_, when)| when)
                .collect::<Vec<_>>(),
            vec![1_000, 1_000, 1_250]
        );
        clock.set(1_250);
        drain(&looper);
        assert_eq!(
            *delivered.lock().unwrap(),
            vec![(1, 1_000), (3, 1_000), (2, 1_250)]
        );
    }

    #[test]
    fn parcels_without_receiver_are_rejected() {
        let looper = Looper::new();
        assert!(!looper.send_empty_parcel(9));
        let err = looper
            .try_send_parcel_at_time(Parcel::new(9), 0)
            .unwrap_err();
        assert_eq!(err.error(), &PostError::NoReceiver);
        assert!(looper.is_empty());
    }

    #[test]
    fn late_entries_stamp_overload_telemetry() {
        let clock = sync::Arc::new(ManualClock::new(0));
        let looper = Looper::builder()
            .clock(sync::Arc::clone(&clock))
            .overload_threshold(10)
            .build();
        looper.try_post_at_time(|_: &Context| Ok(()), 5).unwrap();
        clock.set(50);
        assert!(matches!(looper.tick(), Tick::Executed(_)));
        let telemetry = looper.telemetry();
        assert_eq!(telemetry.last_polled, 50);
        assert_eq!(telemetry.last_overload, 50);
    }

    #[test]
    fn quit_listeners_fire_once() {
        let looper = Looper::builder().clock(ManualClock::new(0)).build();
        let fired = sync::Arc::new(sync::atomic::AtomicUsize::new(0));
        {
            let fired = sync::Arc::clone(&fired);
            looper.on_quit(move |_| {
                fired.fetch_add(1, sync::atomic::Ordering::SeqCst);
            });
        }
        looper.quit_safely();
        assert_eq!(looper.tick(), Tick::Quit);
        assert_eq!(looper.tick(), Tick::Quit);
        assert_eq!(fired.load(sync::atomic::Ordering::SeqCst), 1);

        let late = sync::Arc::clone(&fired);
        looper.on_quit(move |_| {
            late.fetch_add(1, sync::atomic::Ordering::SeqCst);
        });
        assert_eq!(fired.load(sync::atomic::Ordering::SeqCst), 2);
    }
}
