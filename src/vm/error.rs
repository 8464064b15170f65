//! What a [`super::Vm::run`] can fail with.

use std::fmt;
use std::rc::Rc;

use crate::value::error::RuntimeErrorObj;

/// Either the script threw and nothing in the call stack caught it, or the
/// run was cooperatively aborted from another thread.
#[derive(Debug)]
pub enum RunError {
    Thrown(Rc<RuntimeErrorObj>),
    Aborted,
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::Thrown(e) => write!(f, "{e}"),
            RunError::Aborted => write!(f, "run aborted"),
        }
    }
}

impl std::error::Error for RunError {}
