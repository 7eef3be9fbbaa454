// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! Error types for the thread wrapper.

use thiserror::Error;

use crate::wrapper::{HandlerId, JobId};

/// Result type alias for thread wrapper operations.
pub type Result<T> = std::result::Result<T, WrapperError>;

/// Everything that can go wrong when talking to a [`ThreadWrapper`](crate::ThreadWrapper).
///
/// Contract violations (unknown signal, unknown handler, ...) are reported
/// synchronously and never cross the worker queue. `Execution` and `Panicked`
/// are produced on the worker thread and only ever surface through
/// [`fetch_result`](crate::ThreadWrapper::fetch_result).
#[derive(Error, Debug)]
pub enum WrapperError {
    /// The callable returned an error.
    #[error("job execution failed: {0}")]
    Execution(#[source] anyhow::Error),

    /// The callable panicked; the worker caught it and kept running.
    #[error("job {job_id} panicked: {message}")]
    Panicked { job_id: JobId, message: String },

    /// The instance has no signal with that name.
    #[error("signal {name:?} does not exist")]
    UnknownSignal { name: String },

    /// Signals with a return value cannot be relayed, the emission would have
    /// to wait for a value computed on another thread.
    #[error("signal {name:?} must not have a return value")]
    SignalHasReturnValue { name: String },

    /// No registration with this id is known to the wrapper.
    #[error("signal handler {0} does not exist")]
    UnknownHandler(HandlerId),

    /// The worker thread could not be started.
    #[error("cannot spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// The worker thread is gone and no longer accepts jobs.
    #[error("worker thread is not running")]
    WorkerGone,

    /// The job produced a value of a different type than requested.
    #[error("job {job_id} did not return a value of type {expected}")]
    ResultType {
        job_id: JobId,
        expected: &'static str,
    },
}

impl WrapperError {
    /// Returns the error produced by the callable, if that is what this is.
    pub fn as_execution(&self) -> Option<&anyhow::Error> {
        match self {
            WrapperError::Execution(e) => Some(e),
            _ => None,
        }
    }
}
