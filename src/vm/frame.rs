//! Call frames and `try`/`catch`/`finally` handlers.

use std::rc::Rc;

use crate::bytecode::CompiledFunction;
use crate::value::{ObjectPtr, RuntimeErrorObj};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerPhase {
    /// Still guarding its body; no exception or unwind has reached it yet.
    Active,
    InCatch,
    InFinally,
}

/// One open `try` within a frame.
pub struct Handler {
    pub catch_pos: u16,
    pub finally_pos: u16,
    pub sp_at_setup: usize,
    pub phase: HandlerPhase,
    pub held_error: Option<Rc<RuntimeErrorObj>>,
}

/// What a frame does with its return value besides handing it back to the
/// caller's operand stack -- currently only used by `LoadModule`'s
/// compile-once-call-once contract, which stores the module's result into
/// the cache from this callback rather than a distinct opcode (see
/// `DESIGN.md`).
pub enum OnReturn {
    StoreModule(u16),
}

/// What remains to happen once the handlers between the current point and
/// `target_depth` have each run their `finally` body, set up once by
/// `Finalizer` and carried across the chained `Throw 0` trailers that
/// cross each handler in turn.
pub struct PendingUnwind {
    pub target_depth: usize,
    /// The value a `return expr` stashed before the unwind began, restored
    /// just before control resumes at `resume_ip` (a `return`'s case;
    /// absent for `break`/`continue`).
    pub stash: Option<crate::value::Value>,
    /// Where to set `frame.ip` once every intervening `finally` has run:
    /// the instruction immediately after the `Finalizer` that started this
    /// unwind, i.e. the real `Return`/`Jump` a `break`/`continue`/`return`
    /// compiles down to.
    pub resume_ip: usize,
}

pub struct Frame {
    pub function: Rc<CompiledFunction>,
    pub free: Vec<ObjectPtr>,
    pub ip: usize,
    /// Index into the operand stack where this frame's locals window
    /// begins.
    pub bp: usize,
    pub handlers: Vec<Handler>,
    /// The handler currently resolving its `catch`/`finally` trailer, if
    /// any (popped out of `handlers` the moment it starts being resolved,
    /// so a re-`throw` from within its own catch/finally can't be caught
    /// by itself).
    pub current_trailer: Option<Handler>,
    pub pending_unwind: Option<PendingUnwind>,
    pub on_return: Option<OnReturn>,
}

impl Frame {
    pub fn new(function: Rc<CompiledFunction>, free: Vec<ObjectPtr>, bp: usize, on_return: Option<OnReturn>) -> Self {
        Frame {
            function,
            free,
            ip: 0,
            bp,
            handlers: Vec::new(),
            current_trailer: None,
            pending_unwind: None,
            on_return,
        }
    }
}
