// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::any::Any;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::wrapper::thread_data::Route;

/// Whatever a job returned, boxed so it can cross the reply queue.
pub type JobValue = Box<dyn Any + Send>;

/// Identifies a job within one wrapper. Ids start at 1 and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether the caller wants the job's value back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// The result is kept until [`fetch_result`](crate::ThreadWrapper::fetch_result) picks it up.
    Value,
    /// The result is discarded by [`iterate`](crate::ThreadWrapper::iterate).
    Void,
}

/// The unit of work executed on the worker thread.
///
/// `run` is called at most once. Whatever the implementor owns (the job's
/// argument) is dropped later, on the thread that drains the job's result.
pub trait Runnable: Send {
    fn run(&mut self) -> anyhow::Result<JobValue>;
}

/// A closure together with the argument it works on.
pub(crate) struct Call<A, F, T> {
    arg: A,
    func: Option<F>,
    _ret: PhantomData<fn() -> T>,
}

impl<A, F, T> Call<A, F, T> {
    pub(crate) fn new(arg: A, func: F) -> Self {
        Self {
            arg,
            func: Some(func),
            _ret: PhantomData,
        }
    }
}

impl<A, F, T> Runnable for Call<A, F, T>
where
    A: Send,
    F: FnOnce(&mut A) -> anyhow::Result<T> + Send,
    T: Send + 'static,
{
    fn run(&mut self) -> anyhow::Result<JobValue> {
        let func = self
            .func
            .take()
            .ok_or_else(|| anyhow::anyhow!("job has already been executed"))?;
        let value = func(&mut self.arg)?;
        Ok(Box::new(value))
    }
}

const QUEUED: u8 = 0;
const RUNNING: u8 = 1;
const CANCELLED: u8 = 2;

/// Shared between a queued [`Job`] and the bookkeeping of the thread that
/// submitted it, so that either the worker starts it or the submitter
/// cancels it, never both.
pub(crate) struct JobSlot {
    state: AtomicU8,
    work: Mutex<Option<Box<dyn Runnable>>>,
}

impl JobSlot {
    pub(crate) fn new(work: Box<dyn Runnable>) -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(QUEUED),
            work: Mutex::new(Some(work)),
        })
    }

    /// Marks the job as running and hands out its work, unless it was cancelled.
    pub(crate) fn begin(&self) -> Option<Box<dyn Runnable>> {
        self.transition(RUNNING)
    }

    /// Marks the job as cancelled and hands out its work, unless it already started.
    pub(crate) fn cancel(&self) -> Option<Box<dyn Runnable>> {
        self.transition(CANCELLED)
    }

    fn transition(&self, to: u8) -> Option<Box<dyn Runnable>> {
        self.state
            .compare_exchange(QUEUED, to, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        self.work
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// A job on its way to the worker thread.
pub(crate) struct Job {
    pub(crate) id: JobId,
    pub(crate) kind: JobKind,
    pub(crate) slot: Arc<JobSlot>,
    pub(crate) route: Route,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}
