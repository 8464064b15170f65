//! Error values and the taxonomy of builtin error kinds.
//!
//! Thrown values are always `Value::Error` or `Value::RuntimeError`; a
//! script that does `throw "bad"` gets its string wrapped into a
//! `UserError`-kind `ErrorObj` by the VM (see `vm::exec::throw_value`).

use std::fmt;
use std::rc::Rc;

use ecow::EcoString;

use crate::value::Value;

/// Stable identities for the builtin error constructors.
///
/// Each kind has exactly one canonical `ErrorObj` (see
/// [`crate::builtins::canonical_error`]); calling the corresponding
/// constructor builtin produces a *fresh* `ErrorObj` whose `cause` points
/// back at that canonical instance, which is how `isError(x, Kind)`
/// recognizes it after it has propagated through several `cause` links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Type,
    IndexOutOfBounds,
    InvalidIndex,
    InvalidOperator,
    NotCallable,
    NotIndexable,
    NotIndexAssignable,
    NotIterable,
    WrongNumberOfArguments,
    ZeroDivision,
    UserError,
    CircularImport,
}

impl ErrorKind {
    /// The name the language sees (e.g. in `isError(e, TypeError)` the
    /// identifier `TypeError` resolves, via the builtin table, to a
    /// `Value::Error` whose `.name` is this string).
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Type => "TypeError",
            ErrorKind::IndexOutOfBounds => "IndexOutOfBoundsError",
            ErrorKind::InvalidIndex => "InvalidIndexError",
            ErrorKind::InvalidOperator => "InvalidOperatorError",
            ErrorKind::NotCallable => "NotCallableError",
            ErrorKind::NotIndexable => "NotIndexableError",
            ErrorKind::NotIndexAssignable => "NotIndexAssignableError",
            ErrorKind::NotIterable => "NotIterableError",
            ErrorKind::WrongNumberOfArguments => "WrongNumberOfArgumentsError",
            ErrorKind::ZeroDivision => "ZeroDivisionError",
            ErrorKind::UserError => "UserError",
            ErrorKind::CircularImport => "CircularImportError",
        }
    }

    pub fn default_message(self) -> &'static str {
        match self {
            ErrorKind::Type => "invalid type",
            ErrorKind::IndexOutOfBounds => "index out of bounds",
            ErrorKind::InvalidIndex => "invalid index",
            ErrorKind::InvalidOperator => "invalid operator for operand types",
            ErrorKind::NotCallable => "not callable",
            ErrorKind::NotIndexable => "not indexable",
            ErrorKind::NotIndexAssignable => "not index-assignable",
            ErrorKind::NotIterable => "not iterable",
            ErrorKind::WrongNumberOfArguments => "wrong number of arguments",
            ErrorKind::ZeroDivision => "division by zero",
            ErrorKind::UserError => "user error",
            ErrorKind::CircularImport => "circular import",
        }
    }

    pub const ALL: [ErrorKind; 12] = [
        ErrorKind::Type,
        ErrorKind::IndexOutOfBounds,
        ErrorKind::InvalidIndex,
        ErrorKind::InvalidOperator,
        ErrorKind::NotCallable,
        ErrorKind::NotIndexable,
        ErrorKind::NotIndexAssignable,
        ErrorKind::NotIterable,
        ErrorKind::WrongNumberOfArguments,
        ErrorKind::ZeroDivision,
        ErrorKind::UserError,
        ErrorKind::CircularImport,
    ];
}

/// `{name, message, cause}` from the data model.
pub struct ErrorObj {
    pub name: EcoString,
    pub message: EcoString,
    pub cause: Option<Value>,
    /// Set only on the canonical, singleton instances in the builtin
    /// registry; lets `matches_error_kind` recognize a canonical error by
    /// identity without relying on name-string comparison (two user
    /// errors both named "TypeError" must not satisfy `isError`).
    pub kind: Option<ErrorKind>,
}

impl fmt::Debug for ErrorObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

/// A source position, in byte offsets into the compiled module's source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourcePos {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for SourcePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// An `Error` plus the call-site trace accumulated as it unwinds across
/// frame boundaries.
pub struct RuntimeErrorObj {
    pub error: Rc<ErrorObj>,
    pub trace: Vec<SourcePos>,
}

impl fmt::Debug for RuntimeErrorObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.error)?;
        for pos in &self.trace {
            write!(f, "\n\tat {pos}")?;
        }
        Ok(())
    }
}

impl fmt::Display for RuntimeErrorObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error.name, self.error.message)
    }
}
