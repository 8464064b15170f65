//! Compile-time errors.
//!
//! Unlike `vm::error::RuntimeError`, a `CompileError` is never thrown: it
//! is returned directly from [`crate::compiler::compile`]. Errors
//! accumulate rather than aborting at the first one, so a single compile
//! pass can report several problems; the list is capped at 10 with an
//! "(and N more errors)" suffix.

use std::fmt;

use crate::value::SourcePos;

#[derive(Debug, Clone)]
pub struct CompileError {
    pub message: String,
    pub pos: SourcePos,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.pos, self.message)
    }
}

impl std::error::Error for CompileError {}

/// The list returned when compilation fails, capped and annotated with a
/// suffix noting how many further errors were dropped.
#[derive(Debug, Clone)]
pub struct CompileErrors(pub Vec<CompileError>);

impl fmt::Display for CompileErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileErrors {}

pub(crate) const MAX_ERRORS: usize = 10;

impl CompileErrors {
    pub(crate) fn finalize(mut errors: Vec<CompileError>) -> CompileErrors {
        if errors.len() > MAX_ERRORS {
            let remaining = errors.len() - MAX_ERRORS;
            errors.truncate(MAX_ERRORS);
            let last = errors.last_mut().expect("MAX_ERRORS > 0");
            last.message = format!("{} (and {} more errors)", last.message, remaining);
        }
        CompileErrors(errors)
    }
}
