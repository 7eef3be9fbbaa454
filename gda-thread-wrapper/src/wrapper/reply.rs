// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use crate::error::Result;
use crate::wrapper::job::{JobId, JobKind, JobValue, Runnable};
use crate::wrapper::relay::SignalEvent;

/// What the worker thread sends back to a submitting thread.
pub(crate) enum Reply {
    Execution(Completed),
    Signal(SignalEvent),
    /// The thread's notification receiver was closed; stop notifying it.
    NotifierClosed,
}

/// A finished job.
///
/// Holds on to the job's work (and with it the job's argument) until the
/// result is consumed, so the argument is dropped on the consuming thread.
pub(crate) struct Completed {
    pub(crate) id: JobId,
    pub(crate) kind: JobKind,
    pub(crate) outcome: Result<JobValue>,
    pub(crate) work: Option<Box<dyn Runnable>>,
}

impl Completed {
    pub(crate) fn into_outcome(self) -> Result<JobValue> {
        let Completed { outcome, work, .. } = self;
        drop(work);
        outcome
    }
}
