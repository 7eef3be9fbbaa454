// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use async_channel::{Receiver, Sender, WeakReceiver};

use crate::wrapper::job::JobId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// A job finished; its result is waiting in the reply queue.
    Job,
    /// A relayed signal is waiting in the reply queue.
    Signal,
}

/// Tells a thread that [`iterate`](crate::ThreadWrapper::iterate) or
/// [`fetch_result`](crate::ThreadWrapper::fetch_result) has something to pick up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    /// For signals, the job that was running when the signal fired, if any.
    pub job_id: Option<JobId>,
}

impl Notification {
    pub(crate) fn job(id: JobId) -> Self {
        Self {
            kind: NotificationKind::Job,
            job_id: Some(id),
        }
    }

    pub(crate) fn signal(during: Option<JobId>) -> Self {
        Self {
            kind: NotificationKind::Signal,
            job_id: during,
        }
    }
}

/// One per thread that asked for notifications. Survives the thread's
/// bookkeeping being collected, so the receiver handed out stays valid.
///
/// Only the caller holds the receiver; once it is dropped the channel closes
/// and notifying stops.
pub(crate) struct NotificationChannel {
    tx: Sender<Notification>,
    rx: WeakReceiver<Notification>,
}

impl NotificationChannel {
    pub(crate) fn new() -> (Self, Receiver<Notification>) {
        let (tx, rx) = async_channel::unbounded();
        let channel = Self {
            tx,
            rx: rx.downgrade(),
        };
        (channel, rx)
    }

    pub(crate) fn sender(&self) -> Sender<Notification> {
        self.tx.clone()
    }

    /// `None` once the caller dropped every receiver.
    pub(crate) fn receiver(&self) -> Option<Receiver<Notification>> {
        self.rx.upgrade()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
