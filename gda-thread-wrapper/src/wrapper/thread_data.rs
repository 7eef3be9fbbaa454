// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::ThreadId;

use async_channel::{Receiver, Sender};
use log::trace;

use crate::wrapper::job::{JobId, JobSlot, Runnable};
use crate::wrapper::notification::Notification;
use crate::wrapper::relay::SignalSpec;
use crate::wrapper::reply::{Completed, Reply};
use crate::wrapper::HandlerId;

#[derive(Debug, Default)]
struct SharedState {
    /// Jobs submitted by the owning thread and not yet executed.
    outstanding: usize,
    /// The job of the owning thread the worker is executing right now.
    current_job: Option<JobId>,
}

/// The part of a thread's bookkeeping the worker thread touches.
///
/// Held by the owning [`ThreadData`], by every job in flight and by every
/// signal registration of that thread; freed when the last of them goes.
#[derive(Debug)]
pub(crate) struct SharedData {
    worker_thread: ThreadId,
    state: Mutex<SharedState>,
}

impl SharedData {
    pub(crate) fn new(worker_thread: ThreadId) -> Arc<Self> {
        Arc::new(Self {
            worker_thread,
            state: Mutex::new(SharedState::default()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SharedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn worker_thread(&self) -> ThreadId {
        self.worker_thread
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.lock().outstanding
    }

    pub(crate) fn current_job(&self) -> Option<JobId> {
        self.lock().current_job
    }

    pub(crate) fn job_submitted(&self) {
        self.lock().outstanding += 1;
    }

    /// For jobs that will never reach [`finish_job`](Self::finish_job).
    pub(crate) fn job_withdrawn(&self) {
        let mut state = self.lock();
        state.outstanding = state.outstanding.saturating_sub(1);
    }

    /// Returns the job that was current before, to be restored by `leave_job`.
    pub(crate) fn enter_job(&self, id: JobId) -> Option<JobId> {
        self.lock().current_job.replace(id)
    }

    pub(crate) fn leave_job(&self, previous: Option<JobId>) {
        self.lock().current_job = previous;
    }

    /// Decrements the outstanding count and runs `deliver` under the same
    /// lock, so nobody sees a zero count while the result is not queued yet.
    pub(crate) fn finish_job<R>(&self, deliver: impl FnOnce() -> R) -> R {
        let mut state = self.lock();
        state.outstanding = state.outstanding.saturating_sub(1);
        deliver()
    }

    pub(crate) fn is_drained(&self, replies: &Receiver<Reply>) -> bool {
        let state = self.lock();
        state.outstanding == 0 && replies.is_empty()
    }
}

/// Where results and signals for one thread go.
#[derive(Clone)]
pub(crate) struct Route {
    pub(crate) replies: Sender<Reply>,
    pub(crate) shared: Arc<SharedData>,
    pub(crate) notifier: Option<Sender<Notification>>,
}

impl Route {
    /// Queues `reply` and notifies the owning thread. Hands the reply back if
    /// the owning thread's bookkeeping is gone, so the caller decides where
    /// it gets dropped.
    pub(crate) fn deliver(
        &self,
        reply: Reply,
        notification: Notification,
    ) -> std::result::Result<(), Reply> {
        self.replies.try_send(reply).map_err(|e| e.into_inner())?;
        if let Some(notifier) = &self.notifier {
            if notifier.try_send(notification).is_err() {
                trace!("Notification receiver closed");
                let _ = self.replies.try_send(Reply::NotifierClosed);
            }
        }
        Ok(())
    }
}

/// Per calling thread bookkeeping. Only the owning thread pops its replies.
pub(crate) struct ThreadData {
    pub(crate) owner: ThreadId,
    replies_tx: Sender<Reply>,
    pub(crate) replies: Receiver<Reply>,
    /// Submitted jobs whose reply has not been popped yet.
    pub(crate) jobs: Vec<(JobId, Arc<JobSlot>)>,
    /// Popped results waiting for `fetch_result`.
    pub(crate) results: Vec<Completed>,
    pub(crate) signals: Vec<Arc<SignalSpec>>,
    pub(crate) shared: Arc<SharedData>,
    pub(crate) notifier: Option<Sender<Notification>>,
}

impl ThreadData {
    pub(crate) fn new(
        owner: ThreadId,
        worker_thread: ThreadId,
        notifier: Option<Sender<Notification>>,
    ) -> Self {
        let (replies_tx, replies) = async_channel::unbounded();
        Self {
            owner,
            replies_tx,
            replies,
            jobs: Vec::new(),
            results: Vec::new(),
            signals: Vec::new(),
            shared: SharedData::new(worker_thread),
            notifier,
        }
    }

    pub(crate) fn route(&self) -> Route {
        Route {
            replies: self.replies_tx.clone(),
            shared: self.shared.clone(),
            notifier: self.notifier.clone(),
        }
    }

    pub(crate) fn has_job(&self, id: JobId) -> bool {
        self.jobs.iter().any(|(job, _)| *job == id)
    }

    pub(crate) fn forget_job(&mut self, id: JobId) {
        self.jobs.retain(|(job, _)| *job != id);
    }

    pub(crate) fn take_result(&mut self, id: JobId) -> Option<Completed> {
        let pos = self.results.iter().position(|c| c.id == id)?;
        Some(self.results.remove(pos))
    }

    /// Cancels `id` if it has not started. Returns the job's work so the
    /// caller can drop it outside of any lock.
    pub(crate) fn cancel_job(&mut self, id: JobId) -> Option<Box<dyn Runnable>> {
        let pos = self.jobs.iter().position(|(job, _)| *job == id)?;
        let work = self.jobs[pos].1.cancel()?;
        self.jobs.remove(pos);
        self.shared.job_withdrawn();
        Some(work)
    }

    /// Cancels every job that has not started yet.
    pub(crate) fn cancel_queued(&mut self) -> Vec<Box<dyn Runnable>> {
        let ids: Vec<JobId> = self.jobs.iter().map(|(id, _)| *id).collect();
        ids.into_iter().filter_map(|id| self.cancel_job(id)).collect()
    }

    pub(crate) fn has_signal(&self, id: HandlerId) -> bool {
        self.signals.iter().any(|spec| spec.id == id)
    }

    pub(crate) fn take_signal(&mut self, id: HandlerId) -> Option<Arc<SignalSpec>> {
        let pos = self.signals.iter().position(|spec| spec.id == id)?;
        Some(self.signals.remove(pos))
    }

    pub(crate) fn set_notifier(&mut self, notifier: Option<Sender<Notification>>) {
        if notifier.is_none() {
            for spec in &self.signals {
                spec.set_notifier(None);
            }
        }
        self.notifier = notifier;
    }

    /// Nothing queued, nothing pending, nothing registered.
    pub(crate) fn is_idle(&self) -> bool {
        self.results.is_empty()
            && self.jobs.is_empty()
            && self.signals.is_empty()
            && self.shared.is_drained(&self.replies)
    }
}

impl Drop for ThreadData {
    fn drop(&mut self) {
        for spec in self.signals.drain(..) {
            spec.detach();
        }
        // queued replies own job arguments
        while self.replies.try_recv().is_ok() {}
    }
}
