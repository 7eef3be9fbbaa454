// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use log::{trace, warn};

use crate::signal::{
    base_signal_name, NativeHandlerId, SignalHandler, SignalId, SignalQuery, SignalSource,
};
use crate::value::{Value, ValueType};

/// A table of declared signals plus the handlers connected to them.
pub struct Emitter {
    desc: String,
    signals: Vec<SignalQuery>,
    handlers: Mutex<Vec<(NativeHandlerId, SignalId, SignalHandler)>>,
    next_handler_id: AtomicU64,
}

impl Emitter {
    pub fn new(desc: impl Into<String>) -> Self {
        Self {
            desc: desc.into(),
            signals: Vec::new(),
            handlers: Mutex::new(Vec::new()),
            next_handler_id: AtomicU64::new(1),
        }
    }

    /// Declares a signal that returns nothing.
    pub fn with_signal(self, name: impl Into<String>, param_types: &[ValueType]) -> Self {
        self.with_signal_returning(name, param_types, None)
    }

    pub fn with_signal_returning(
        mut self,
        name: impl Into<String>,
        param_types: &[ValueType],
        return_type: Option<ValueType>,
    ) -> Self {
        let id = SignalId(self.signals.len() as u32 + 1);
        self.signals.push(SignalQuery {
            id,
            name: name.into(),
            param_types: param_types.to_vec(),
            return_type,
        });
        self
    }

    /// Number of handlers currently connected, across all signals.
    pub fn handler_count(&self) -> usize {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Emits `name` with `args` and returns how many handlers ran.
    ///
    /// Handlers run synchronously on the calling thread and outside the
    /// handler table lock, so they may connect or disconnect handlers.
    pub fn emit(&self, name: &str, args: &[Value]) -> usize {
        let Some(query) = self.lookup_signal(name) else {
            warn!("{}: cannot emit unknown signal {:?}", self.desc, name);
            return 0;
        };
        if query.param_types.len() != args.len()
            || !args
                .iter()
                .zip(&query.param_types)
                .all(|(arg, ty)| arg.conforms_to(*ty))
        {
            warn!(
                "{}: arguments {:?} do not match signal {:?} {:?}",
                self.desc, args, query.name, query.param_types
            );
            return 0;
        }

        let handlers: Vec<SignalHandler> = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, signal, _)| *signal == query.id)
            .map(|(_, _, handler)| handler.clone())
            .collect();
        trace!(
            "{}: emitting {:?} to {} handler(s)",
            self.desc,
            query.name,
            handlers.len()
        );
        for handler in &handlers {
            handler(args);
        }
        handlers.len()
    }
}

impl SignalSource for Emitter {
    fn desc(&self) -> &str {
        &self.desc
    }

    fn lookup_signal(&self, name: &str) -> Option<SignalQuery> {
        let name = base_signal_name(name);
        self.signals.iter().find(|s| s.name == name).cloned()
    }

    fn connect_handler(&self, signal: SignalId, handler: SignalHandler) -> NativeHandlerId {
        let id = NativeHandlerId(self.next_handler_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, signal, handler));
        id
    }

    fn disconnect_handler(&self, handler: NativeHandlerId) -> bool {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|(id, _, _)| *id != handler);
        handlers.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn emitter() -> Emitter {
        Emitter::new("test object")
            .with_signal("changed", &[ValueType::String, ValueType::Int])
            .with_signal_returning("validate", &[], Some(ValueType::Bool))
    }

    #[test]
    fn test_emit_reaches_connected_handlers() {
        let emitter = emitter();
        let seen = Arc::new(AtomicUsize::new(0));
        let query = emitter.lookup_signal("changed").unwrap();

        let seen_in_handler = seen.clone();
        let id = emitter.connect_handler(
            query.id,
            Arc::new(move |args: &[Value]| {
                assert_eq!(args, &[Value::from("x"), Value::from(42)]);
                seen_in_handler.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert_eq!(emitter.emit("changed", &["x".into(), 42.into()]), 1);
        assert!(emitter.disconnect_handler(id));
        assert!(!emitter.disconnect_handler(id));
        assert_eq!(emitter.emit("changed", &["x".into(), 42.into()]), 0);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_emit_rejects_mismatched_arguments() {
        let emitter = emitter();
        let query = emitter.lookup_signal("changed").unwrap();
        emitter.connect_handler(query.id, Arc::new(|_: &[Value]| panic!("must not run")));

        assert_eq!(emitter.emit("changed", &[42.into()]), 0);
        assert_eq!(emitter.emit("changed", &[42.into(), "x".into()]), 0);
        assert_eq!(emitter.emit("nope", &[]), 0);
    }

    #[test]
    fn test_lookup_with_detail() {
        let emitter = emitter();
        let query = emitter.lookup_signal("validate::strict").unwrap();
        assert_eq!(query.name, "validate");
        assert_eq!(query.return_type, Some(ValueType::Bool));
    }
}
