//! The numeric error-code catalog.
//!
//! Every runtime failure user code can observe is one of these small
//! integers, bound to a primitive-failure variable or recorded as a
//! fiber's failure outcome. The numbers are stable: serialized modules and
//! user-written recovery code both depend on them.

use core_value::scalar;
use core_value::Value;

use core_dispatch::LookupError;
use core_value::VariableAccessError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    InvalidHandle = 1,
    IoError = 2,
    PermissionDenied = 3,
    IncorrectArgumentType = 4,
    IncorrectNumberOfArguments = 5,
    SerializationFailed = 6,
    InvalidStatements = 7,
    LoadingIsOver = 8,
    MacroPrefixFunctionArgumentMustBeAParseNode = 9,
    MacroPrefixFunctionsMustReturnTop = 10,
    MacroArgumentMustBeAParseNode = 11,
    MacroMustReturnAParseNode = 12,
    RedefinedWithSameArgumentTypes = 13,
    SpecialAtom = 14,
    UntimelyParseAcceptance = 15,
    AmbiguousName = 16,
    NoMethod = 17,
    NoMethodDefinition = 18,
    AmbiguousMethodDefinition = 19,
    AbstractMethodDefinition = 20,
    ForwardMethodDefinition = 21,
    VariableGet = 22,
    VariableSet = 23,
    ResultDisagreedWithExpectedType = 24,
    OutOfRange = 25,
    SubscriptOutOfBounds = 26,
    FiberIsTerminated = 27,
    Unsupported = 28,
}

impl ErrorCode {
    pub fn number(self) -> u16 {
        self as u16
    }

    /// The value user code receives in a failure variable.
    pub fn as_value(self) -> Value {
        scalar::integer(self as i64)
    }
}

impl From<&LookupError> for ErrorCode {
    fn from(error: &LookupError) -> ErrorCode {
        match error {
            LookupError::NoMethod => ErrorCode::NoMethod,
            LookupError::NoMethodDefinition => ErrorCode::NoMethodDefinition,
            LookupError::AmbiguousMethodDefinition => ErrorCode::AmbiguousMethodDefinition,
            LookupError::AbstractMethodDefinition => ErrorCode::AbstractMethodDefinition,
            LookupError::ForwardMethodDefinition => ErrorCode::ForwardMethodDefinition,
        }
    }
}

impl From<&VariableAccessError> for ErrorCode {
    fn from(error: &VariableAccessError) -> ErrorCode {
        match error {
            VariableAccessError::Unassigned => ErrorCode::VariableGet,
            VariableAccessError::TypeMismatch { .. } => ErrorCode::VariableSet,
        }
    }
}
