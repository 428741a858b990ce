//! Variable descriptor: a mutable cell with declared read and write types.
//!
//! The read type covers every value the cell may hold; the write type is the
//! subset callers may store. Reads of an unassigned cell and writes outside
//! the write type surface as [`VariableAccessError`], which the primitive
//! layer converts to the numeric error codes user code sees.
//!
//! A shared variable is the only cross-fiber communication channel: the
//! payload mutex makes each update atomic, the stored value is promoted to
//! the shared state before it becomes visible, and the release/acquire pair
//! of the mutex is the happens-before edge the memory model promises.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::descriptor::{Descriptor, Tag, hash_combine, hash_seed, new_value};
use crate::types;
use crate::Value;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VariableAccessError {
    #[error("variable is unassigned")]
    Unassigned,
    #[error("value of type {actual} does not fit write type {expected}")]
    TypeMismatch { expected: String, actual: String },
}

/// Observers fire after each successful write, outside the payload lock.
/// Used by the debugger surface and by cross-fiber signalling.
pub trait VariableObserver: Send + Sync {
    fn variable_written(&self, variable: &Value, new_value: &Value);
}

pub struct VariablePayload {
    read_type: Value,
    write_type: Value,
    slot: Mutex<Option<Value>>,
    observers: Mutex<Vec<Arc<dyn VariableObserver>>>,
    hash_nonce: u32,
}

impl VariablePayload {
    pub fn read_type(&self) -> &Value {
        &self.read_type
    }

    pub fn write_type(&self) -> &Value {
        &self.write_type
    }
}

struct VariableDescriptor {
    payload: VariablePayload,
}

impl Descriptor for VariableDescriptor {
    fn tag(&self) -> Tag {
        Tag::Variable
    }

    fn kind(&self, _this: &Value) -> Value {
        types::variable_type(
            self.payload.read_type.clone(),
            self.payload.write_type.clone(),
        )
    }

    fn hash_value(&self, _this: &Value) -> u32 {
        // Identity hash: content drifts, the cell does not.
        hash_combine(hash_seed(Tag::Variable), self.payload.hash_nonce)
    }

    fn equals(&self, this: &Value, other: &Value) -> bool {
        other.tag() == Tag::Variable && this.same_identity_as(other)
    }

    fn visit_children(&self, visit: &mut dyn FnMut(&Value)) {
        visit(&self.payload.read_type);
        visit(&self.payload.write_type);
        if let Some(held) = self.payload.slot.lock().expect("variable lock").as_ref() {
            visit(held);
        }
    }

    fn variable_payload(&self) -> Option<&VariablePayload> {
        Some(&self.payload)
    }

    fn describe(&self, _this: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "↑var")
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn next_nonce() -> u32 {
    static COUNTER: AtomicU32 = AtomicU32::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A fresh, unassigned variable. `write_type` must be a subtype of
/// `read_type`; the loader enforces this before construction.
pub fn new_variable(read_type: Value, write_type: Value) -> Value {
    debug_assert!(write_type.is_subtype_of(&read_type));
    new_value(VariableDescriptor {
        payload: VariablePayload {
            read_type,
            write_type,
            slot: Mutex::new(None),
            observers: Mutex::new(Vec::new()),
            hash_nonce: next_nonce(),
        },
    })
}

/// A variable whose read and write types coincide.
pub fn simple_variable(content_type: Value) -> Value {
    new_variable(content_type.clone(), content_type)
}

pub fn variable_read(variable: &Value) -> Result<Value, VariableAccessError> {
    let canonical = variable.traversed();
    let descriptor = canonical.descriptor();
    let payload = descriptor.variable_payload().expect("read of variable");
    payload
        .slot
        .lock()
        .expect("variable lock")
        .clone()
        .ok_or(VariableAccessError::Unassigned)
}

pub fn variable_write(variable: &Value, value: Value) -> Result<(), VariableAccessError> {
    let canonical = variable.traversed();
    let descriptor = canonical.descriptor();
    let payload = descriptor.variable_payload().expect("write of variable");
    if !value.is_instance_of(&payload.write_type) {
        return Err(VariableAccessError::TypeMismatch {
            expected: format!("{:?}", payload.write_type),
            actual: format!("{:?}", value.kind()),
        });
    }
    let stored = if canonical.is_shared() {
        value.make_shared()
    } else {
        value
    };
    *payload.slot.lock().expect("variable lock") = Some(stored.clone());
    let observers = payload.observers.lock().expect("observer lock").clone();
    for observer in observers {
        observer.variable_written(&canonical, &stored);
    }
    Ok(())
}

/// Restore absence.
pub fn variable_clear(variable: &Value) {
    let canonical = variable.traversed();
    let descriptor = canonical.descriptor();
    let payload = descriptor.variable_payload().expect("clear of variable");
    *payload.slot.lock().expect("variable lock") = None;
}

pub fn add_observer(variable: &Value, observer: Arc<dyn VariableObserver>) {
    let canonical = variable.traversed();
    let descriptor = canonical.descriptor();
    let payload = descriptor.variable_payload().expect("observe variable");
    payload
        .observers
        .lock()
        .expect("observer lock")
        .push(observer);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scalar;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn read_write_clear_round_trip() {
        let v = simple_variable(types::integers());
        assert_eq!(variable_read(&v), Err(VariableAccessError::Unassigned));
        variable_write(&v, scalar::integer(7)).unwrap();
        assert!(variable_read(&v).unwrap().equals(&scalar::integer(7)));
        variable_clear(&v);
        assert_eq!(variable_read(&v), Err(VariableAccessError::Unassigned));
    }

    #[test]
    fn write_outside_write_type_is_rejected() {
        let v = simple_variable(types::integers());
        let err = variable_write(&v, crate::tuple::string_value("no")).unwrap_err();
        assert!(matches!(err, VariableAccessError::TypeMismatch { .. }));
    }

    #[test]
    fn write_type_may_be_narrower_than_read_type() {
        use crate::types::ExtInt;
        // Holds any integer; accepts only 0..=9.
        let narrow =
            types::integer_range(ExtInt::Fin(0), true, ExtInt::Fin(9), true);
        let v = new_variable(types::integers(), narrow);
        variable_write(&v, scalar::integer(5)).unwrap();
        let err = variable_write(&v, scalar::integer(50)).unwrap_err();
        assert!(matches!(err, VariableAccessError::TypeMismatch { .. }));
        // The earlier value is still readable.
        assert!(variable_read(&v).unwrap().equals(&scalar::integer(5)));
    }

    #[test]
    fn shared_variable_shares_the_stored_value() {
        let v = simple_variable(types::any_type());
        v.make_shared();
        let payload = crate::tuple::tuple_from_values(vec![scalar::integer(1)]);
        variable_write(&v, payload.clone()).unwrap();
        assert!(payload.is_shared());
    }

    #[test]
    fn observers_fire_after_write() {
        struct Counter(AtomicUsize);
        impl VariableObserver for Counter {
            fn variable_written(&self, _variable: &Value, _new_value: &Value) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        let v = simple_variable(types::integers());
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        add_observer(&v, counter.clone());
        variable_write(&v, scalar::integer(1)).unwrap();
        variable_write(&v, scalar::integer(2)).unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }
}
