// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::{Arc, Mutex, PoisonError};

use gda_thread_wrapper::{Emitter, Value, ValueType};

/// An object with three signals: `sig0 ()`, `sig1 (int)` and
/// `sig2 (int, string)`.
pub fn dummy_object() -> Emitter {
    Emitter::new("dummy object")
        .with_signal("sig0", &[])
        .with_signal("sig1", &[ValueType::Int])
        .with_signal("sig2", &[ValueType::Int, ValueType::String])
}

pub type SignalRecord = (String, Vec<Value>);

/// Signals in the order they were emitted or received.
#[derive(Debug, Clone, Default)]
pub struct SignalLog(Arc<Mutex<Vec<SignalRecord>>>);

impl SignalLog {
    pub fn push(&self, name: &str, args: &[Value]) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name.to_string(), args.to_vec()));
    }

    pub fn snapshot(&self) -> Vec<SignalRecord> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Emits a fixed mix of all three signals, tagged with `tag`, and records
/// every emission in `sent`.
pub fn emit_sequence(object: &Emitter, tag: i64, label: &str, sent: &SignalLog) {
    let sequence: [(&str, Vec<Value>); 5] = [
        ("sig0", vec![]),
        ("sig1", vec![Value::from(tag)]),
        ("sig0", vec![]),
        ("sig2", vec![Value::from(tag), Value::from(label)]),
        ("sig1", vec![Value::from(tag + 1)]),
    ];
    for (name, args) in sequence {
        sent.push(name, &args);
        object.emit(name, &args);
    }
}
