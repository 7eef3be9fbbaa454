// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! Relays signals fired on the worker thread to the thread that registered
//! for them.
//!
//! A registration installs a plain handler on the object. When the object
//! emits, that handler runs synchronously on the emitting thread and decides
//! whether the emission qualifies:
//!
//! - with `private_thread`, only emissions on the worker thread count;
//! - with `private_job` as well, only while the worker is executing a job of
//!   the registering thread.
//!
//! A qualifying emission has its arguments copied into a reply, which
//! travels through the same queue as job results and is dispatched to the
//! callback by [`iterate`](crate::ThreadWrapper::iterate).

use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use async_channel::Sender;
use log::{debug, trace};
use smallvec::SmallVec;

use crate::signal::{NativeHandlerId, SignalQuery, SignalSource};
use crate::value::Value;
use crate::wrapper::notification::Notification;
use crate::wrapper::reply::Reply;
use crate::wrapper::thread_data::Route;
use crate::wrapper::{HandlerId, ThreadWrapper};

/// Called on the registering thread with the wrapper, the emitting object,
/// the signal name and copies of the emitted arguments.
pub type SignalCallback =
    Arc<dyn Fn(&ThreadWrapper, &dyn SignalSource, &str, &[Value]) + Send + Sync>;

/// Which emissions a registration relays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectFlags {
    /// Only relay emissions happening on the worker thread.
    pub private_thread: bool,
    /// Only relay emissions happening while one of the registering thread's
    /// jobs runs. Ignored without `private_thread`.
    pub private_job: bool,
}

impl Default for ConnectFlags {
    fn default() -> Self {
        Self {
            private_thread: true,
            private_job: true,
        }
    }
}

/// One registration made through `connect`.
pub(crate) struct SignalSpec {
    pub(crate) id: HandlerId,
    pub(crate) query: SignalQuery,
    instance: Arc<dyn SignalSource>,
    flags: ConnectFlags,
    native: Mutex<Option<NativeHandlerId>>,
    /// `None` once detached.
    route: Mutex<Option<Route>>,
    callback: Mutex<Option<SignalCallback>>,
}

impl SignalSpec {
    pub(crate) fn attach(
        id: HandlerId,
        query: SignalQuery,
        instance: Arc<dyn SignalSource>,
        flags: ConnectFlags,
        route: Route,
        callback: SignalCallback,
    ) -> Arc<Self> {
        let spec = Arc::new(Self {
            id,
            query,
            instance,
            flags,
            native: Mutex::new(None),
            route: Mutex::new(Some(route)),
            callback: Mutex::new(Some(callback)),
        });

        // The object owns the handler, so the handler must not own the spec.
        let weak = Arc::downgrade(&spec);
        let native = spec.instance.connect_handler(
            spec.query.id,
            Arc::new(move |args: &[Value]| {
                if let Some(spec) = weak.upgrade() {
                    spec.marshal(args);
                }
            }),
        );
        *spec.native.lock().unwrap_or_else(PoisonError::into_inner) = Some(native);
        spec
    }

    fn marshal(self: &Arc<Self>, args: &[Value]) {
        let Some(route) = self
            .route
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        else {
            return;
        };

        let running = route.shared.current_job();
        if self.flags.private_thread {
            if thread::current().id() != route.shared.worker_thread() {
                trace!(
                    "Ignoring {:?} emitted outside the worker thread",
                    self.query.name
                );
                return;
            }
            if self.flags.private_job && running.is_none() {
                trace!(
                    "Ignoring {:?} emitted while no job of the registering thread runs",
                    self.query.name
                );
                return;
            }
        }

        let event = SignalEvent {
            spec: self.clone(),
            args: args.iter().cloned().collect(),
        };
        if route
            .deliver(Reply::Signal(event), Notification::signal(running))
            .is_err()
        {
            trace!("Registering thread of {:?} is gone", self.query.name);
        }
    }

    pub(crate) fn instance(&self) -> &dyn SignalSource {
        &*self.instance
    }

    pub(crate) fn callback(&self) -> Option<SignalCallback> {
        self.callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sends future emissions to another thread.
    pub(crate) fn retarget(&self, route: Route) {
        let mut current = self.route.lock().unwrap_or_else(PoisonError::into_inner);
        if current.is_some() {
            *current = Some(route);
        }
    }

    pub(crate) fn set_notifier(&self, notifier: Option<Sender<Notification>>) {
        if let Some(route) = self
            .route
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            route.notifier = notifier;
        }
    }

    /// Removes the handler from the object and forgets the callback, so
    /// emissions already queued are not dispatched either.
    pub(crate) fn detach(&self) {
        if let Some(native) = self
            .native
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            self.instance.disconnect_handler(native);
        }
        self.route
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        debug!(
            "Disconnected handler {} from {:?} on {}",
            self.id,
            self.query.name,
            self.instance.desc()
        );
    }
}

/// A relayed emission waiting in a reply queue.
pub(crate) struct SignalEvent {
    spec: Arc<SignalSpec>,
    args: SmallVec<[Value; 4]>,
}

impl SignalEvent {
    /// Runs the registered callback on the calling thread.
    pub(crate) fn dispatch(self, wrapper: &ThreadWrapper) {
        match self.spec.callback() {
            Some(callback) => callback(
                wrapper,
                self.spec.instance(),
                &self.spec.query.name,
                &self.args,
            ),
            None => debug!("Not propagating signal {:?}", self.spec.query.name),
        }
    }
}
