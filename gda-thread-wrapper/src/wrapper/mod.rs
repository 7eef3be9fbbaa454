// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>
//! # Design: Single Worker Thread Wrapper
//!
//! ## Overview
//! Objects that must only ever be touched from one thread (a database
//! connection handle, for instance) are handed to a [`ThreadWrapper`]. Any
//! number of threads submit jobs working on those objects; the jobs all run,
//! one after another, on the wrapper's worker thread.
//!
//! - Jobs go through one FIFO to the worker, whoever submitted them.
//! - Each submitting thread gets its own reply queue. The worker pushes a
//!   job's result onto the queue of the thread that submitted it.
//! - A thread picks up its results with `fetch_result` (by job id) or
//!   `iterate`. Nothing is ever delivered to another thread.
//! - Signals emitted by objects on the worker thread can be relayed to the
//!   thread that registered for them; they travel through the same reply
//!   queue as results and run their callback inside `iterate`.
//! - The per thread bookkeeping is created on first use and collected once
//!   the thread has nothing outstanding and nothing registered.
//!
//!
//!    caller A         caller B
//!       |  submit         |  submit
//!       v                 v
//!    +-----------------------+
//!    |    to-worker FIFO     |
//!    +-----------+-----------+
//!                |
//!          +-----v-----+   emit   +---------+
//!          |  worker   |--------->| objects |
//!          +--+-----+--+          +----+----+
//!             |     |   relayed signals |
//!    +--------v-+ +-v--------+          |
//!    | replies A| | replies B|<---------+
//!    +----------+ +----------+
//!
//! ## Locking
//! One coarse mutex guards the thread map and the id counters. Reply queues
//! are channels with their own locking, and each thread's [`SharedData`]
//! has its own mutex, so the worker never waits for the coarse mutex.
//!
//! [`SharedData`]: thread_data::SharedData

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use async_channel::{Receiver, Sender};
use log::{debug, info, trace, warn};

use crate::config::{ShutdownMode, WrapperBuilder, WrapperConfig};
use crate::error::{Result, WrapperError};
use crate::signal::SignalSource;
use crate::value::Value;

mod job;
mod notification;
mod relay;
mod reply;
mod thread_data;
mod worker;

pub use job::{JobId, JobKind, JobValue, Runnable};
pub use notification::{Notification, NotificationKind};
pub use relay::{ConnectFlags, SignalCallback};

use job::{Call, Job, JobSlot};
use notification::NotificationChannel;
use relay::SignalSpec;
use reply::{Completed, Reply};
use thread_data::ThreadData;
use worker::WorkerMessage;

/// Identifies a signal registration made through [`ThreadWrapper::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl HandlerId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct WrapperState {
    next_job_id: u64,
    next_handler_id: u64,
    threads: HashMap<ThreadId, ThreadData>,
    /// Kept apart from `threads` so a receiver handed out stays connected
    /// while the thread's bookkeeping comes and goes.
    notifiers: HashMap<ThreadId, NotificationChannel>,
}

impl WrapperState {
    fn allocate_job_id(&mut self) -> JobId {
        let id = JobId::new(self.next_job_id);
        self.next_job_id += 1;
        id
    }

    fn allocate_handler_id(&mut self) -> HandlerId {
        let id = HandlerId(self.next_handler_id);
        self.next_handler_id += 1;
        id
    }

    /// Looks up the bookkeeping of `owner`, creating it on first use.
    fn thread_data(&mut self, owner: ThreadId, worker_thread: ThreadId) -> &mut ThreadData {
        let notifier = self.notifiers.get(&owner).map(NotificationChannel::sender);
        self.threads.entry(owner).or_insert_with(|| {
            debug!("Creating thread data for {owner:?}");
            ThreadData::new(owner, worker_thread, notifier)
        })
    }

    /// Prefers `me` when it owns the registration.
    fn owner_of_signal(&self, me: ThreadId, id: HandlerId) -> Option<ThreadId> {
        if self.threads.get(&me).is_some_and(|td| td.has_signal(id)) {
            return Some(me);
        }
        self.threads
            .iter()
            .find(|(_, td)| td.has_signal(id))
            .map(|(owner, _)| *owner)
    }
}

enum Lookup {
    Ready(Completed),
    /// Not there yet; carries the number of results buffered so far.
    Pending(usize),
    Unknown,
}

/// Executes jobs on one dedicated worker thread on behalf of any number of
/// calling threads.
///
/// Share it between threads by reference (`std::thread::scope`) or behind an
/// `Arc`. Every method acts on behalf of the calling thread: results and
/// relayed signals are only handed to the thread that submitted or
/// registered them.
pub struct ThreadWrapper {
    state: Mutex<WrapperState>,
    to_worker: Sender<WorkerMessage>,
    worker_thread: ThreadId,
    worker_handle: Option<JoinHandle<()>>,
    config: WrapperConfig,
}

impl std::fmt::Debug for ThreadWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadWrapper")
            .field("worker_thread", &self.worker_thread)
            .field("config", &self.config)
            .finish()
    }
}

impl ThreadWrapper {
    /// Starts a wrapper with the default configuration.
    pub fn new() -> Result<Self> {
        Self::with_config(WrapperConfig::default())
    }

    pub fn builder() -> WrapperBuilder {
        WrapperBuilder::new()
    }

    pub fn with_config(config: WrapperConfig) -> Result<Self> {
        let (to_worker, inbox) = async_channel::unbounded();
        let worker_handle = thread::Builder::new()
            .name(config.worker_name.clone())
            .spawn(move || worker::worker_loop(inbox))?;
        let worker_thread = worker_handle.thread().id();
        info!(
            "Started thread wrapper with worker {:?} ({worker_thread:?})",
            config.worker_name
        );

        Ok(Self {
            state: Mutex::new(WrapperState {
                next_job_id: 1,
                next_handler_id: 1,
                threads: HashMap::new(),
                notifiers: HashMap::new(),
            }),
            to_worker,
            worker_thread,
            worker_handle: Some(worker_handle),
            config,
        })
    }

    pub fn config(&self) -> &WrapperConfig {
        &self.config
    }

    /// Id of the thread all jobs run on.
    pub fn worker_thread_id(&self) -> ThreadId {
        self.worker_thread
    }

    fn lock_state(&self) -> MutexGuard<'_, WrapperState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `func` on the worker thread. Collect its value with
    /// [`fetch_result`](Self::fetch_result) from this same thread.
    pub fn submit<T, F>(&self, func: F) -> Result<JobId>
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        self.submit_with_arg((), move |_| func())
    }

    /// Runs `func(&mut arg)` on the worker thread.
    ///
    /// `arg` is dropped once the result has been consumed, on the consuming
    /// thread.
    pub fn submit_with_arg<A, T, F>(&self, arg: A, func: F) -> Result<JobId>
    where
        A: Send + 'static,
        T: Send + 'static,
        F: FnOnce(&mut A) -> anyhow::Result<T> + Send + 'static,
    {
        self.submit_runnable(JobKind::Value, Box::new(Call::<A, F, T>::new(arg, func)))
    }

    /// Runs `func` on the worker thread without keeping its result around.
    pub fn submit_void<F>(&self, func: F) -> Result<JobId>
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.submit_void_with_arg((), move |_| func())
    }

    /// Like [`submit_with_arg`](Self::submit_with_arg) but the result is
    /// discarded by [`iterate`](Self::iterate), which is also where `arg`
    /// gets dropped.
    pub fn submit_void_with_arg<A, F>(&self, arg: A, func: F) -> Result<JobId>
    where
        A: Send + 'static,
        F: FnOnce(&mut A) -> anyhow::Result<()> + Send + 'static,
    {
        self.submit_runnable(JobKind::Void, Box::new(Call::<A, F, ()>::new(arg, func)))
    }

    /// Queues `work` for the worker thread.
    ///
    /// When called on the worker thread itself (from inside a job), `work`
    /// runs right away so the worker never waits for itself.
    pub fn submit_runnable(&self, kind: JobKind, work: Box<dyn Runnable>) -> Result<JobId> {
        let me = thread::current().id();
        let job = {
            let mut state = self.lock_state();
            let id = state.allocate_job_id();
            let td = state.thread_data(me, self.worker_thread);
            let slot = JobSlot::new(work);
            td.jobs.push((id, slot.clone()));
            td.shared.job_submitted();
            Job {
                id,
                kind,
                slot,
                route: td.route(),
            }
        };
        let id = job.id;

        if me == self.worker_thread {
            debug!("Job {id} submitted on the worker thread, executing it in place");
            worker::execute(job);
            return Ok(id);
        }

        trace!("Submitting job {id} ({kind:?}) from {me:?}");
        // only fails once the worker loop has returned
        if self.to_worker.try_send(WorkerMessage::Execute(job)).is_err() {
            warn!("Worker thread is gone, job {id} is not executed");
            let work = self
                .lock_state()
                .threads
                .get_mut(&me)
                .and_then(|td| td.cancel_job(id));
            drop(work);
            self.collect_garbage(me);
            return Err(WrapperError::WorkerGone);
        }
        Ok(id)
    }

    /// Cancels a job of the calling thread that has not started yet.
    ///
    /// Returns `false` if the job is unknown to this thread, already running
    /// or done. A cancelled job's argument is dropped before this returns.
    pub fn cancel(&self, id: JobId) -> bool {
        let me = thread::current().id();
        let work = self
            .lock_state()
            .threads
            .get_mut(&me)
            .and_then(|td| td.cancel_job(id));
        match work {
            Some(work) => {
                drop(work);
                debug!("Cancelled job {id}");
                self.collect_garbage(me);
                true
            }
            None => false,
        }
    }

    /// Number of jobs of the calling thread that have not been executed yet.
    pub fn waiting_size(&self) -> usize {
        let me = thread::current().id();
        self.lock_state()
            .threads
            .get(&me)
            .map_or(0, |td| td.shared.outstanding())
    }

    /// Handles what the worker has sent to the calling thread.
    ///
    /// Results of void jobs are dropped and relayed signals are dispatched to
    /// their callbacks, both without returning. Stops at the first result of
    /// a value job, which is kept for [`fetch_result`](Self::fetch_result),
    /// or when the reply queue is empty.
    ///
    /// With `may_block`, waits for replies as long as jobs of this thread
    /// are in flight.
    pub fn iterate(&self, may_block: bool) {
        let me = thread::current().id();
        let Some(replies) = self.reply_receiver(me) else {
            return;
        };

        loop {
            let reply = match replies.try_recv() {
                Ok(reply) => reply,
                Err(_) if may_block && self.has_jobs_in_flight(me) => {
                    match replies.recv_blocking() {
                        Ok(reply) => reply,
                        Err(_) => break,
                    }
                }
                Err(_) => break,
            };

            match reply {
                Reply::Execution(completed) => {
                    let mut state = self.lock_state();
                    let Some(td) = state.threads.get_mut(&me) else {
                        break;
                    };
                    td.forget_job(completed.id);
                    if completed.kind == JobKind::Value {
                        trace!("Result of job {} is ready", completed.id);
                        td.results.push(completed);
                        break;
                    }
                    drop(state);
                    trace!("Discarding result of void job {}", completed.id);
                    drop(completed);
                }
                Reply::Signal(event) => event.dispatch(self),
                Reply::NotifierClosed => self.drop_closed_notifier(me),
            }
        }

        self.collect_garbage(me);
    }

    /// Picks up the value of job `id`, which must have been submitted by the
    /// calling thread.
    ///
    /// Returns `None` if the result is not there yet (only without
    /// `may_block`) or if this thread has no such value job. The error of a
    /// failed job comes back as `Some(Err(..))`.
    pub fn fetch_result<T: 'static>(&self, may_block: bool, id: JobId) -> Option<Result<T>> {
        let outcome = self.fetch_result_raw(may_block, id)?;
        Some(outcome.and_then(|value| {
            value
                .downcast::<T>()
                .map(|value| *value)
                .map_err(|_| WrapperError::ResultType {
                    job_id: id,
                    expected: std::any::type_name::<T>(),
                })
        }))
    }

    /// [`fetch_result`](Self::fetch_result) without the downcast.
    pub fn fetch_result_raw(&self, may_block: bool, id: JobId) -> Option<Result<JobValue>> {
        let me = thread::current().id();
        loop {
            let buffered = match self.lookup_result(me, id) {
                Lookup::Ready(completed) => {
                    self.collect_garbage(me);
                    return Some(completed.into_outcome());
                }
                Lookup::Unknown => return None,
                Lookup::Pending(buffered) => buffered,
            };

            self.iterate(may_block);
            if !may_block && self.buffered_results(me) == buffered {
                return None;
            }
        }
    }

    fn lookup_result(&self, me: ThreadId, id: JobId) -> Lookup {
        let mut state = self.lock_state();
        let Some(td) = state.threads.get_mut(&me) else {
            warn!("Fetching result of job {id} from {me:?}, which has not submitted any job");
            return Lookup::Unknown;
        };
        if let Some(completed) = td.take_result(id) {
            return Lookup::Ready(completed);
        }
        if td.has_job(id) {
            Lookup::Pending(td.results.len())
        } else {
            warn!("Job {id} has no pending result for {me:?}");
            Lookup::Unknown
        }
    }

    fn buffered_results(&self, me: ThreadId) -> usize {
        self.lock_state()
            .threads
            .get(&me)
            .map_or(0, |td| td.results.len())
    }

    fn reply_receiver(&self, me: ThreadId) -> Option<Receiver<Reply>> {
        self.lock_state()
            .threads
            .get(&me)
            .map(|td| td.replies.clone())
    }

    fn has_jobs_in_flight(&self, me: ThreadId) -> bool {
        self.lock_state()
            .threads
            .get(&me)
            .is_some_and(|td| !td.jobs.is_empty())
    }

    /// Relays `signal_name` of `instance` to `callback` on the calling
    /// thread, for emissions on the worker thread during one of this thread's
    /// jobs.
    ///
    /// Fails if the signal does not exist or returns a value.
    pub fn connect<F>(
        &self,
        instance: Arc<dyn SignalSource>,
        signal_name: &str,
        callback: F,
    ) -> Result<HandlerId>
    where
        F: Fn(&ThreadWrapper, &dyn SignalSource, &str, &[Value]) + Send + Sync + 'static,
    {
        self.connect_raw(instance, signal_name, ConnectFlags::default(), callback)
    }

    /// Like [`connect`](Self::connect) with explicit control over which
    /// emissions are relayed.
    pub fn connect_raw<F>(
        &self,
        instance: Arc<dyn SignalSource>,
        signal_name: &str,
        flags: ConnectFlags,
        callback: F,
    ) -> Result<HandlerId>
    where
        F: Fn(&ThreadWrapper, &dyn SignalSource, &str, &[Value]) + Send + Sync + 'static,
    {
        let Some(query) = instance.lookup_signal(signal_name) else {
            warn!("Signal {signal_name:?} does not exist on {}", instance.desc());
            return Err(WrapperError::UnknownSignal {
                name: signal_name.to_string(),
            });
        };
        if query.return_type.is_some() {
            warn!("Signal {signal_name:?} to connect to must not have a return value");
            return Err(WrapperError::SignalHasReturnValue {
                name: signal_name.to_string(),
            });
        }

        let me = thread::current().id();
        let mut state = self.lock_state();
        let id = state.allocate_handler_id();
        let td = state.thread_data(me, self.worker_thread);
        let spec = SignalSpec::attach(
            id,
            query,
            instance,
            flags,
            td.route(),
            Arc::new(callback),
        );
        td.signals.push(spec);
        debug!("Connected handler {id} to {signal_name:?} for {me:?} ({flags:?})");
        Ok(id)
    }

    /// Undoes [`connect`](Self::connect). Once this returns the callback is
    /// not called anymore, not even for emissions already queued.
    ///
    /// A thread that uses the wrapper can only disconnect its own
    /// registrations. A thread that never used it may disconnect any.
    pub fn disconnect(&self, id: HandlerId) -> Result<()> {
        let me = thread::current().id();
        let (owner, spec) = {
            let mut state = self.lock_state();
            let owner = if state.threads.contains_key(&me) {
                Some(me)
            } else {
                state.owner_of_signal(me, id)
            };
            let spec = owner
                .and_then(|owner| state.threads.get_mut(&owner))
                .and_then(|td| td.take_signal(id));
            match (owner, spec) {
                (Some(owner), Some(spec)) => (owner, spec),
                _ => {
                    warn!("Signal handler {id} does not exist");
                    return Err(WrapperError::UnknownHandler(id));
                }
            }
        };

        spec.detach();
        self.collect_garbage(owner);
        Ok(())
    }

    /// Makes the calling thread the receiver of a registration made by
    /// another thread.
    pub fn steal_signal(&self, id: HandlerId) -> Result<()> {
        let me = thread::current().id();
        let mut state = self.lock_state();
        let Some(owner) = state.owner_of_signal(me, id) else {
            warn!("Signal handler {id} does not exist");
            return Err(WrapperError::UnknownHandler(id));
        };
        if owner == me {
            return Ok(());
        }

        let spec = state
            .threads
            .get_mut(&owner)
            .and_then(|td| td.take_signal(id))
            .ok_or(WrapperError::UnknownHandler(id))?;
        let td = state.thread_data(me, self.worker_thread);
        spec.retarget(td.route());
        td.signals.push(spec);
        drop(state);
        debug!("Handler {id} moved from {owner:?} to {me:?}");
        self.collect_garbage(owner);
        Ok(())
    }

    /// Returns a receiver that gets a [`Notification`] each time a result or
    /// a relayed signal is queued for the calling thread.
    ///
    /// Covers jobs submitted and signals connected after this call. Repeated
    /// calls from one thread return the same channel. Closing the receiver
    /// switches notifications off for the thread.
    pub fn notifier(&self) -> Receiver<Notification> {
        let me = thread::current().id();
        let mut state = self.lock_state();
        let existing = state
            .notifiers
            .get(&me)
            .and_then(|channel| Some((channel.sender(), channel.receiver()?)));
        let (sender, receiver) = match existing {
            Some(pair) => pair,
            None => {
                let (channel, receiver) = NotificationChannel::new();
                let sender = channel.sender();
                state.notifiers.insert(me, channel);
                debug!("Notifications for {me:?} switched on");
                (sender, receiver)
            }
        };
        if let Some(td) = state.threads.get_mut(&me) {
            td.set_notifier(Some(sender));
        }
        receiver
    }

    /// Stops notifying the calling thread.
    pub fn unset_notifier(&self) {
        let me = thread::current().id();
        let mut state = self.lock_state();
        if state.notifiers.remove(&me).is_some() {
            debug!("Notifications for {me:?} switched off");
        }
        if let Some(td) = state.threads.get_mut(&me) {
            td.set_notifier(None);
        }
    }

    /// The receiver of `me` was dropped. A new one may have been requested
    /// in the meantime, that one stays.
    fn drop_closed_notifier(&self, me: ThreadId) {
        let mut state = self.lock_state();
        let closed = state
            .notifiers
            .get(&me)
            .map_or(true, NotificationChannel::is_closed);
        if !closed {
            return;
        }
        if state.notifiers.remove(&me).is_some() {
            debug!("Notification receiver of {me:?} closed");
        }
        if let Some(td) = state.threads.get_mut(&me) {
            td.set_notifier(None);
        }
    }

    /// Drops the bookkeeping of `owner` if it is idle.
    fn collect_garbage(&self, owner: ThreadId) {
        let removed = {
            let mut state = self.lock_state();
            if state.threads.get(&owner).is_some_and(ThreadData::is_idle) {
                state.threads.remove(&owner)
            } else {
                None
            }
        };
        if let Some(td) = removed {
            debug!("Removing thread data of {:?}", td.owner);
        }
    }
}

impl Drop for ThreadWrapper {
    fn drop(&mut self) {
        let mut threads = std::mem::take(&mut self.lock_state().threads);
        let mut cancelled = Vec::new();
        for td in threads.values_mut() {
            cancelled.extend(td.cancel_queued());
        }
        debug!(
            "Dropping thread wrapper, {} queued job(s) cancelled",
            cancelled.len()
        );

        if self.to_worker.try_send(WorkerMessage::Shutdown).is_err() {
            warn!("Worker thread already gone");
        }
        drop(cancelled);
        drop(threads);

        match self.config.shutdown {
            ShutdownMode::Detach => {
                debug!("Not waiting for the worker thread to exit");
            }
            ShutdownMode::Join => {
                let Some(handle) = self.worker_handle.take() else {
                    return;
                };
                if handle.thread().id() == thread::current().id() {
                    warn!("Thread wrapper dropped on its own worker thread, not joining");
                } else if handle.join().is_err() {
                    warn!("Worker thread panicked");
                }
            }
        }
    }
}
