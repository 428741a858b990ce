//! core-code: Level One code objects and functions.
//!
//! A *code object* (raw function) is the unit the compiler produces: a
//! nybble stream of Level One operations, a literal pool, the frame layout
//! (arguments, optional primitive-failure variable, locals, stack), an
//! optional primitive number, and the declared function type. A *function*
//! pairs a code object with the tuple of outer values it captured.
//!
//! A code object may also carry an installed Level Two chunk, the
//! optimized specialization that executes on its behalf. The chunk type
//! lives downstream; here it is only the [`InstalledChunk`] seam, so code
//! objects can hold and validity-check one without this crate knowing its
//! shape.

pub mod builder;
pub mod nybbles;
pub mod ops;

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use core_value::descriptor::{Descriptor, Tag, hash_combine, hash_seed};
use core_value::{Mutability, Value, types};

pub use builder::CodeBuilder;
pub use nybbles::{NybbleReader, NybbleWriter};
pub use ops::{CodeError, L1Operation};

/// The seam through which a code object holds its optimized specialization.
/// Invalidation flips `is_valid`; the execution engine downcasts to run it.
pub trait InstalledChunk: Send + Sync + 'static {
    fn is_valid(&self) -> bool;
    fn as_any(&self) -> &dyn Any;
}

// -------------------------------------------------------------------------
// Code objects
// -------------------------------------------------------------------------

pub struct CodeData {
    /// Diagnostic name, usually the defining message.
    pub name: String,
    pub num_args: usize,
    /// Content types of the local variables, in slot order.
    pub local_types: Vec<Value>,
    /// Maximum operand-stack depth, computed at assembly time.
    pub max_stack: usize,
    /// Primitive number; 0 means none.
    pub primitive: u16,
    /// Present exactly when the primitive can fail; the failure value binds
    /// to the slot after the arguments and the body runs as recovery.
    pub failure_variable_type: Option<Value>,
    pub literals: Vec<Value>,
    /// Unpacked nybbles of the Level One stream.
    pub nybbles: Vec<u8>,
    /// Declared function type (argument tuple type + return type).
    pub function_type: Value,
    chunk: RwLock<Option<Arc<dyn InstalledChunk>>>,
    hash_nonce: u32,
}

impl CodeData {
    pub fn num_locals(&self) -> usize {
        self.local_types.len()
    }

    pub fn has_failure_variable(&self) -> bool {
        self.failure_variable_type.is_some()
    }

    /// Total frame slots: arguments, failure variable if present, locals,
    /// and operand stack.
    pub fn frame_slots(&self) -> usize {
        self.num_args
            + self.has_failure_variable() as usize
            + self.num_locals()
            + self.max_stack
    }

    /// One-based slot of the primitive-failure variable.
    pub fn failure_slot(&self) -> Option<usize> {
        self.has_failure_variable().then_some(self.num_args + 1)
    }

    /// One-based slot of local `index` (zero-based index).
    pub fn local_slot(&self, index: usize) -> usize {
        self.num_args + self.has_failure_variable() as usize + index + 1
    }

    pub fn literal_at(&self, index: u32) -> Value {
        self.literals[index as usize].clone()
    }

    pub fn return_type(&self) -> Value {
        types::function_return_type(&self.function_type).expect("code carries a function type")
    }

    pub fn args_tuple_type(&self) -> Value {
        types::function_args_type(&self.function_type).expect("code carries a function type")
    }

    pub fn installed_chunk(&self) -> Option<Arc<dyn InstalledChunk>> {
        self.chunk.read().expect("chunk lock").clone()
    }

    pub fn install_chunk(&self, chunk: Arc<dyn InstalledChunk>) {
        *self.chunk.write().expect("chunk lock") = Some(chunk);
    }

    pub fn clear_chunk(&self) {
        *self.chunk.write().expect("chunk lock") = None;
    }
}

pub struct CodeDescriptor {
    data: Arc<CodeData>,
}

impl Descriptor for CodeDescriptor {
    fn tag(&self) -> Tag {
        Tag::RawFunction
    }

    fn kind(&self, this: &Value) -> Value {
        types::instance_type(this.clone())
    }

    fn hash_value(&self, _this: &Value) -> u32 {
        hash_combine(hash_seed(Tag::RawFunction), self.data.hash_nonce)
    }

    fn equals(&self, this: &Value, other: &Value) -> bool {
        other.tag() == Tag::RawFunction && this.same_identity_as(other)
    }

    fn visit_children(&self, visit: &mut dyn FnMut(&Value)) {
        for literal in &self.data.literals {
            visit(literal);
        }
        for local_type in &self.data.local_types {
            visit(local_type);
        }
        if let Some(failure_type) = &self.data.failure_variable_type {
            visit(failure_type);
        }
        visit(&self.data.function_type);
    }

    fn describe(&self, _this: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code⟦{}⟧", self.data.name)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn next_nonce() -> u32 {
    static COUNTER: AtomicU32 = AtomicU32::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Wrap assembled code data as a value. Code objects are born shared: they
/// are reachable from methods, which are process-wide.
pub fn code_value(
    name: String,
    num_args: usize,
    local_types: Vec<Value>,
    max_stack: usize,
    primitive: u16,
    failure_variable_type: Option<Value>,
    literals: Vec<Value>,
    nybbles: Vec<u8>,
    function_type: Value,
) -> Value {
    let data = CodeData {
        name,
        num_args,
        local_types,
        max_stack,
        primitive,
        failure_variable_type,
        literals,
        nybbles,
        function_type,
        chunk: RwLock::new(None),
        hash_nonce: next_nonce(),
    };
    Value::with_descriptor(
        Mutability::Immutable,
        Arc::new(CodeDescriptor {
            data: Arc::new(data),
        }),
    )
    .make_shared()
}

/// The payload of a code value, when it is one.
pub fn code_data(value: &Value) -> Option<Arc<CodeData>> {
    let descriptor = value.traversed().descriptor();
    descriptor
        .as_any()
        .downcast_ref::<CodeDescriptor>()
        .map(|code| code.data.clone())
}

// -------------------------------------------------------------------------
// Functions
// -------------------------------------------------------------------------

pub struct FunctionData {
    pub code: Value,
    pub outers: Vec<Value>,
    hash_nonce: u32,
}

impl FunctionData {
    pub fn code_data(&self) -> Arc<CodeData> {
        code_data(&self.code).expect("function closes over code")
    }

    pub fn outer_at(&self, index: u32) -> Value {
        self.outers[index as usize - 1].clone()
    }
}

pub struct FunctionDescriptor {
    data: Arc<FunctionData>,
}

impl Descriptor for FunctionDescriptor {
    fn tag(&self) -> Tag {
        Tag::Function
    }

    fn kind(&self, _this: &Value) -> Value {
        self.data.code_data().function_type.clone()
    }

    fn hash_value(&self, _this: &Value) -> u32 {
        hash_combine(hash_seed(Tag::Function), self.data.hash_nonce)
    }

    fn equals(&self, this: &Value, other: &Value) -> bool {
        other.tag() == Tag::Function && this.same_identity_as(other)
    }

    fn visit_children(&self, visit: &mut dyn FnMut(&Value)) {
        visit(&self.data.code);
        for outer in &self.data.outers {
            visit(outer);
        }
    }

    fn describe(&self, _this: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn⟦{}⟧", self.data.code_data().name)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Close `code` over the given outer values.
pub fn function_value(code: Value, outers: Vec<Value>) -> Value {
    debug_assert!(code_data(&code).is_some());
    Value::with_descriptor(
        Mutability::Immutable,
        Arc::new(FunctionDescriptor {
            data: Arc::new(FunctionData {
                code,
                outers,
                hash_nonce: next_nonce(),
            }),
        }),
    )
}

pub fn function_data(value: &Value) -> Option<Arc<FunctionData>> {
    let descriptor = value.traversed().descriptor();
    descriptor
        .as_any()
        .downcast_ref::<FunctionDescriptor>()
        .map(|function| function.data.clone())
}

/// The function type of a function value.
pub fn function_kind(value: &Value) -> Option<Value> {
    function_data(value).map(|data| data.code_data().function_type.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_value::scalar;

    fn trivial_code() -> Value {
        let mut builder = CodeBuilder::new("answer");
        builder.returns(types::integers());
        let literal = builder.literal(scalar::integer(42));
        builder.emit(L1Operation::PushLiteral { index: literal });
        builder.emit(L1Operation::Return);
        builder.finish()
    }

    #[test]
    fn code_layout_is_stable() {
        let code = trivial_code();
        let data = code_data(&code).unwrap();
        assert_eq!(data.num_args, 0);
        assert_eq!(data.max_stack, 1);
        assert_eq!(data.frame_slots(), 1);
        assert!(data.return_type().equals(&types::integers()));
    }

    #[test]
    fn functions_answer_their_code_type() {
        let code = trivial_code();
        let function = function_value(code.clone(), Vec::new());
        assert!(
            function_kind(&function)
                .unwrap()
                .equals(&code_data(&code).unwrap().function_type)
        );
        assert!(function.is_instance_of(&types::function_type_from(
            vec![],
            types::integers()
        )));
    }

    #[test]
    fn functions_compare_by_identity() {
        let code = trivial_code();
        let a = function_value(code.clone(), Vec::new());
        let b = function_value(code, Vec::new());
        assert!(!a.equals(&b));
        assert!(a.equals(&a.clone()));
    }
}
