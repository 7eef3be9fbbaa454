// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use async_channel::Receiver;
use log::{debug, info, trace};

use crate::error::WrapperError;
use crate::wrapper::job::Job;
use crate::wrapper::notification::Notification;
use crate::wrapper::reply::{Completed, Reply};

pub(crate) enum WorkerMessage {
    Execute(Job),
    /// Makes the worker loop return.
    Shutdown,
}

/// Body of the worker thread.
pub(crate) fn worker_loop(inbox: Receiver<WorkerMessage>) {
    info!("Worker thread started");
    while let Ok(message) = inbox.recv_blocking() {
        match message {
            WorkerMessage::Execute(job) => execute(job),
            WorkerMessage::Shutdown => {
                debug!("Shutdown requested");
                break;
            }
        }
    }
    info!("Worker thread ended");
}

/// Runs one job and queues its result for the submitting thread.
///
/// Only ever called on the worker thread.
pub(crate) fn execute(job: Job) {
    let Job {
        id,
        kind,
        slot,
        route,
    } = job;
    let Some(mut work) = slot.begin() else {
        debug!("Skipping cancelled job {id}");
        return;
    };

    trace!("Executing job {id}");
    let previous = route.shared.enter_job(id);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| work.run()));
    route.shared.leave_job(previous);

    let outcome = match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(WrapperError::Execution(e)),
        Err(payload) => Err(WrapperError::Panicked {
            job_id: id,
            message: panic_message(payload.as_ref()),
        }),
    };
    let completed = Completed {
        id,
        kind,
        outcome,
        work: Some(work),
    };

    let undelivered = route
        .shared
        .finish_job(|| route.deliver(Reply::Execution(completed), Notification::job(id)));
    if let Err(reply) = undelivered {
        debug!("Result of job {id} has no receiver anymore, dropping it");
        drop(reply);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
