//! The built-in exception taxonomy and the crate-internal error channel.
//!
//! Two kinds of faults flow through the interpreter:
//!
//! * **Recoverable** exceptions travel as `SepError::Exc` and are materialized
//!   into September exception objects at the raise site, then propagate
//!   through the frame list where bytecode handlers (or native callers) can
//!   catch them.
//! * **Fatal** faults (`SepError::Fatal`) are VM-integrity violations — stack
//!   underflow, operand type assertions inside the interpreter itself,
//!   pin-scope misuse. They are never convertible to September exceptions
//!   because the invariants they protect are presumed by the exception
//!   machinery itself.

use std::{borrow::Cow, fmt};

use strum::{Display, EnumString, IntoStaticStr};

use crate::value::Value;

/// Result type alias for operations that can produce a runtime error.
pub(crate) type SepResult<T> = Result<T, SepError>;

/// September exception classes built into the VM.
///
/// Uses strum derives for automatic `Display`, `FromStr`, and
/// `Into<&'static str>` implementations. The string representation matches the
/// variant name exactly (e.g., `EWrongType` -> "EWrongType"); those names are
/// also the globals under which the corresponding prototype objects are
/// registered by the runtime bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum ExcType {
    /// Root of the taxonomy - every exception prototype delegates here.
    Exception,
    /// A bug in the VM surfaced as a catchable exception.
    EInternal,
    /// An operand had the wrong runtime type.
    EWrongType,
    /// Argument binding failed (missing parameter, unknown name, arity).
    EWrongArguments,
    /// Property lookup missed on the receiver's whole linearization.
    EMissingProperty,
    /// The C3 merge found no consistent ordering.
    ECannotLinearize,
    /// The heap refused an allocation.
    EOutOfMemory,
    /// Integer arithmetic left the representable range, or division by zero.
    ENumeric,
    ENotImplementedYet,

    // --- module loading ---
    EFileNotFound,
    /// The file does not start with the September module magic.
    ENotSeptemberFile,
    /// The file ended where more data was expected.
    EUnexpectedEOF,
    EMalformedModuleFile,
}

impl ExcType {
    /// All taxonomy members, in bootstrap registration order.
    pub(crate) const ALL: [Self; 13] = [
        Self::Exception,
        Self::EInternal,
        Self::EWrongType,
        Self::EWrongArguments,
        Self::EMissingProperty,
        Self::ECannotLinearize,
        Self::EOutOfMemory,
        Self::ENumeric,
        Self::ENotImplementedYet,
        Self::EFileNotFound,
        Self::ENotSeptemberFile,
        Self::EUnexpectedEOF,
        Self::EMalformedModuleFile,
    ];

    pub(crate) fn wrong_type(expected: &str, actual: &str) -> SepError {
        SepError::exc(Self::EWrongType, format!("Expected {expected}, but got {actual}."))
    }

    pub(crate) fn not_callable(actual: &str) -> SepError {
        SepError::exc(Self::EWrongType, format!("{actual} is not callable."))
    }

    pub(crate) fn missing_property(name: &str) -> SepError {
        SepError::exc(Self::EMissingProperty, format!("Property '{name}' does not exist."))
    }

    pub(crate) fn cannot_linearize() -> SepError {
        SepError::exc(
            Self::ECannotLinearize,
            "Unable to find a consistent resolution order for the prototype graph.",
        )
    }

    pub(crate) fn missing_argument(name: &str) -> SepError {
        SepError::exc(
            Self::EWrongArguments,
            format!("Required parameter '{name}' was not provided."),
        )
    }

    pub(crate) fn unknown_argument(name: &str) -> SepError {
        SepError::exc(
            Self::EWrongArguments,
            format!("No parameter named '{name}' to receive this argument."),
        )
    }

    pub(crate) fn duplicate_argument(name: &str) -> SepError {
        SepError::exc(
            Self::EWrongArguments,
            format!("Parameter '{name}' was provided more than once."),
        )
    }

    pub(crate) fn too_many_arguments(expected: usize, actual: usize) -> SepError {
        SepError::exc(
            Self::EWrongArguments,
            format!("Expected at most {expected} positional argument(s), but got {actual}."),
        )
    }

    pub(crate) fn numeric(msg: impl fmt::Display) -> SepError {
        SepError::exc(Self::ENumeric, msg.to_string())
    }

    pub(crate) fn file_not_found(filename: &str) -> SepError {
        SepError::exc(Self::EFileNotFound, format!("File '{filename}' does not exist."))
    }

    pub(crate) fn not_september_file() -> SepError {
        SepError::exc(
            Self::ENotSeptemberFile,
            "This file does not seem to be a September module file.",
        )
    }

    pub(crate) fn unexpected_eof() -> SepError {
        SepError::exc(
            Self::EUnexpectedEOF,
            "Encountered end of file where more data was expected.",
        )
    }

    pub(crate) fn malformed_module(detail: impl fmt::Display) -> SepError {
        SepError::exc(
            Self::EMalformedModuleFile,
            format!("The module file seems to be incorrect: {detail}."),
        )
    }

    pub(crate) fn not_implemented_yet(what: &str) -> SepError {
        SepError::exc(Self::ENotImplementedYet, format!("Missing implementation for: {what}."))
    }

    pub(crate) fn out_of_memory() -> SepError {
        SepError::exc(Self::EOutOfMemory, "Out of memory.")
    }
}

/// A raised-but-not-yet-delivered exception.
///
/// Errors born in Rust code (a failed lookup, a numeric overflow) carry only
/// `exc_type` and `message`; the interpreter materializes a September object
/// for them at the raise site. Exceptions that already exist as heap objects
/// (a bytecode `Raise`, or one escaping a nested `invoke`) additionally carry
/// the object in `value` so identity is preserved across the native boundary.
#[derive(Debug)]
pub(crate) struct PendingExc {
    pub exc_type: ExcType,
    pub message: String,
    /// The materialized exception object, if one exists already.
    pub value: Option<Value>,
}

/// Crate-internal error channel threaded through every fallible operation.
#[derive(Debug)]
pub(crate) enum SepError {
    /// VM-integrity violation. Terminates execution with a diagnostic; never
    /// observable from September code.
    Fatal(Cow<'static, str>),
    /// Catchable September exception.
    Exc(Box<PendingExc>),
}

impl SepError {
    pub fn fatal(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::Fatal(msg.into())
    }

    pub fn exc(exc_type: ExcType, message: impl Into<String>) -> Self {
        Self::Exc(Box::new(PendingExc {
            exc_type,
            message: message.into(),
            value: None,
        }))
    }

    /// Wraps an already-materialized exception object for re-raising.
    pub fn raised(exc_type: ExcType, message: impl Into<String>, value: Value) -> Self {
        Self::Exc(Box::new(PendingExc {
            exc_type,
            message: message.into(),
            value: Some(value),
        }))
    }

    /// Returns true if this error is a catchable exception of `exc_type`.
    #[cfg(test)]
    pub fn is_exception_type(&self, exc_type: ExcType) -> bool {
        matches!(self, Self::Exc(exc) if exc.exc_type == exc_type)
    }
}

/// Owned snapshot of an exception that escaped the outermost frame.
///
/// This is the public face of a failure: the CLI prints `message` to stderr
/// and exits non-zero, embedders can match on `exc_type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exception {
    exc_type: ExcType,
    message: String,
}

impl Exception {
    pub(crate) fn new(exc_type: ExcType, message: String) -> Self {
        Self { exc_type, message }
    }

    #[must_use]
    pub fn exc_type(&self) -> ExcType {
        self.exc_type
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.exc_type, self.message)
    }
}

impl std::error::Error for Exception {}

impl From<&PendingExc> for Exception {
    fn from(p: &PendingExc) -> Self {
        Self::new(p.exc_type, p.message.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exc_type_names_round_trip_through_strum() {
        assert_eq!(ExcType::EWrongType.to_string(), "EWrongType");
        assert_eq!("ENumeric".parse::<ExcType>().unwrap(), ExcType::ENumeric);
        let s: &'static str = ExcType::Exception.into();
        assert_eq!(s, "Exception");
    }

    #[test]
    fn helper_constructors_carry_their_type() {
        assert!(ExcType::missing_property("x").is_exception_type(ExcType::EMissingProperty));
        assert!(ExcType::unexpected_eof().is_exception_type(ExcType::EUnexpectedEOF));
        assert!(ExcType::numeric("overflow").is_exception_type(ExcType::ENumeric));
    }
}
