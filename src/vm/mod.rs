//! The stack-based virtual machine that runs a compiled [`Bytecode`].
//!
//! Split three ways: `stack`/`frame` hold the run-time shapes, `exec`
//! holds the instruction dispatch and the call/exception/module
//! machinery built on top of them, and this file is just construction
//! plus the public `run`/`abort`/`set_recover` surface.

pub mod error;
mod exec;
mod frame;
mod stack;

use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::bytecode::Bytecode;
use crate::value::Value;

pub use error::RunError;
use exec::StepOutcome;
use frame::Frame;
use stack::Stack;

/// Tunable resource limits.
/// Both are enforced as debug-only assertions rather than a catchable
/// script-level error -- see `DESIGN.md`'s note on why the fixed
/// `ErrorKind` taxonomy has no "overflow" member.
#[derive(Debug, Clone, Copy)]
pub struct VMOptions {
    pub stack_capacity: usize,
    pub frame_stack_depth: usize,
    /// Mirrors `CompilerOptions::trace`: logs the run's outcome via
    /// `tracing::trace!` when set.
    pub trace: bool,
}

impl Default for VMOptions {
    fn default() -> Self {
        VMOptions { stack_capacity: 2048, frame_stack_depth: 1024, trace: false }
    }
}

/// A `Send + Sync` handle that can request a running [`Vm`] to abort from
/// another thread. `Vm` itself holds `Rc`s and is not
/// `Send`, so this is the only cross-thread surface it exposes.
#[derive(Clone)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

pub struct Vm {
    main: Rc<crate::bytecode::CompiledFunction>,
    main_module_path: String,
    constants: Vec<Value>,
    frames: Vec<Frame>,
    stack: Stack,
    globals: Value,
    module_cache: Vec<Value>,
    module_loaded: Vec<bool>,
    module_loading: Vec<bool>,
    abort_flag: Arc<AtomicBool>,
    recover: bool,
    options: VMOptions,
}

impl Vm {
    pub fn new(bytecode: Bytecode, options: VMOptions) -> Vm {
        let num_modules = bytecode.num_modules as usize;
        Vm {
            main: Rc::new(bytecode.main),
            main_module_path: bytecode.module_path,
            constants: bytecode.constants,
            frames: Vec::with_capacity(64),
            stack: Stack::new(options.stack_capacity),
            globals: Value::map(Default::default()),
            module_cache: vec![Value::Undefined; num_modules],
            module_loaded: vec![false; num_modules],
            module_loading: vec![false; num_modules],
            abort_flag: Arc::new(AtomicBool::new(false)),
            recover: false,
            options,
        }
    }

    /// Requests this `Vm` stop at the next instruction-loop boundary, from
    /// the same thread.
    pub fn abort(&self) {
        self.abort_flag.store(true, Ordering::Relaxed);
    }

    /// A cross-thread handle equivalent to `abort`.
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle(self.abort_flag.clone())
    }

    /// Gates host/builtin-call panic recovery via `catch_unwind`.
    pub fn set_recover(&mut self, recover: bool) {
        self.recover = recover;
    }

    /// Runs the module's top-level body to completion with `globals` as
    /// the shared global-variable table (must be a `Value::Map` or
    /// `Value::SyncMap`) and `args` as the module's own positional
    /// arguments, returning its final value or the uncaught error/abort
    /// that stopped it.
    pub fn run(&mut self, globals: Value, args: Vec<Value>) -> Result<Value, RunError> {
        self.globals = globals;
        let main = self.main.clone();
        if self.options.trace {
            tracing::trace!(module = %self.main_module_path, "starting run");
        }
        if let Err(e) = self.call_compiled(main, Vec::new(), args, None) {
            return self.finish_thrown(e);
        }
        loop {
            if self.abort_flag.load(Ordering::Relaxed) {
                if self.options.trace {
                    tracing::trace!(module = %self.main_module_path, "run aborted");
                }
                return Err(RunError::Aborted);
            }
            match self.step() {
                StepOutcome::Continue => {}
                StepOutcome::Finished(value) => {
                    if self.options.trace {
                        tracing::trace!(module = %self.main_module_path, "run finished: {value:?}");
                    }
                    return Ok(value);
                }
                StepOutcome::Threw(err) => match self.raise(err) {
                    None => {}
                    Some(uncaught) => return self.finish_thrown(uncaught),
                },
            }
        }
    }

    fn finish_thrown(&self, err: Rc<crate::value::RuntimeErrorObj>) -> Result<Value, RunError> {
        if self.options.trace {
            tracing::trace!(module = %self.main_module_path, "run threw: {err}");
        }
        Err(RunError::Thrown(err))
    }
}
