//! The bytecode dispatch loop and everything `Instruction::*` needs at run
//! time: the call protocol, `try`/`catch`/`finally` unwinding, module
//! loading, and error construction.
//!
//! Kept out of `vm::mod` so that file can stay the small, stable public
//! surface (`Vm`, `VMOptions`, construction, `run`/`abort`) while this one
//! holds the instruction-by-instruction machinery: shape stays in
//! `stack`/`frame`, execution lives here.

use std::cell::RefCell;
use std::rc::Rc;

use crate::builtins::{self, BuiltinId};
use crate::bytecode::CompiledFunction;
use crate::opcode::{Instruction, CALL_FLAG_EXPAND};
use crate::value::error::{ErrorKind, ErrorObj, RuntimeErrorObj, SourcePos};
use crate::value::ops::{self, OpError};
use crate::value::{ClosureObj, MapData, ObjectPtr, Value, ValueIter};

use super::frame::{Frame, Handler, HandlerPhase, OnReturn, PendingUnwind};
use super::Vm;

/// The outcome of executing a single instruction.
pub(super) enum StepOutcome {
    Continue,
    /// The outermost frame returned: the whole run is done.
    Finished(Value),
    /// Something threw; `Vm::raise` decides where (if anywhere) it lands.
    Threw(Rc<RuntimeErrorObj>),
}

/// Wraps an already-thrown value the way every throw site does.
fn to_runtime_error(value: Value) -> Rc<RuntimeErrorObj> {
    match value {
        Value::RuntimeError(e) => e,
        Value::Error(e) => Rc::new(RuntimeErrorObj { error: e, trace: Vec::new() }),
        other => Rc::new(RuntimeErrorObj {
            error: Rc::new(ErrorObj {
                name: ErrorKind::UserError.name().into(),
                // A thrown non-error value's message is its string form;
                // reuses the exact conversion the `string()` builtin uses
                // so `throw "bad"` and `string("bad")` agree.
                message: builtins::display(&other).into(),
                cause: Some(Value::Error(builtins::canonical_error(ErrorKind::UserError))),
                kind: None,
            }),
            trace: Vec::new(),
        }),
    }
}

fn throw_op_error(e: OpError) -> Rc<RuntimeErrorObj> {
    Rc::new(RuntimeErrorObj { error: builtins::wrap_op_error(e), trace: Vec::new() })
}

/// Appends one call-site position to an error's trace, copy-on-write
/// since a caught-and-rethrown error may still be referenced by a script
/// variable.
fn append_trace(err: Rc<RuntimeErrorObj>, pos: SourcePos) -> Rc<RuntimeErrorObj> {
    match Rc::try_unwrap(err) {
        Ok(mut owned) => {
            owned.trace.push(pos);
            Rc::new(owned)
        }
        Err(shared) => {
            let mut trace = shared.trace.clone();
            trace.push(pos);
            Rc::new(RuntimeErrorObj { error: shared.error.clone(), trace })
        }
    }
}

fn expand_iterable(v: &Value) -> Result<Vec<Value>, OpError> {
    let mut it = ValueIter::new(v)?;
    let mut out = Vec::new();
    while it.next() {
        out.push(it.value());
    }
    Ok(out)
}

impl Vm {
    pub(super) fn step(&mut self) -> StepOutcome {
        let (instr, frame_idx) = {
            let frame = self.frames.last().expect("step called with an empty frame stack");
            (frame.function.instructions[frame.ip], self.frames.len() - 1)
        };
        self.frames[frame_idx].ip += 1;
        self.dispatch(instr)
    }

    #[allow(clippy::too_many_lines)]
    fn dispatch(&mut self, instr: Instruction) -> StepOutcome {
        use Instruction::*;
        match instr {
            Constant(idx) => {
                self.stack.push(self.constants[idx as usize].clone());
                StepOutcome::Continue
            }
            True => {
                self.stack.push(Value::Bool(true));
                StepOutcome::Continue
            }
            False => {
                self.stack.push(Value::Bool(false));
                StepOutcome::Continue
            }
            Null => {
                self.stack.push(Value::Undefined);
                StepOutcome::Continue
            }
            GetLocal(i) => {
                let idx = self.frames.last().unwrap().bp + i as usize;
                let slot = self.stack.get(idx).clone();
                let v = match slot {
                    Value::ObjectPtr(cell) => cell.borrow().clone(),
                    other => other,
                };
                self.stack.push(v);
                StepOutcome::Continue
            }
            SetLocal(i) => {
                let value = self.stack.pop();
                let idx = self.frames.last().unwrap().bp + i as usize;
                match self.stack.get(idx).clone() {
                    Value::ObjectPtr(cell) => *cell.borrow_mut() = value,
                    _ => self.stack.set(idx, value),
                }
                StepOutcome::Continue
            }
            DefineLocal(i) => {
                let value = self.stack.pop();
                let idx = self.frames.last().unwrap().bp + i as usize;
                self.stack.set(idx, value);
                StepOutcome::Continue
            }
            GetGlobal(idx) => {
                let name = self.global_name(idx);
                self.stack.push(self.globals_get(&name));
                StepOutcome::Continue
            }
            SetGlobal(idx) => {
                let value = self.stack.pop();
                let name = self.global_name(idx);
                self.globals_set(&name, value);
                StepOutcome::Continue
            }
            GetBuiltin(i) => {
                self.stack.push(Value::BuiltinFunction(BuiltinId(i as u16)));
                StepOutcome::Continue
            }
            GetFree(i) => {
                let v = self.frames.last().unwrap().free[i as usize].borrow().clone();
                self.stack.push(v);
                StepOutcome::Continue
            }
            SetFree(i) => {
                let value = self.stack.pop();
                *self.frames.last().unwrap().free[i as usize].borrow_mut() = value;
                StepOutcome::Continue
            }
            GetLocalPtr(i) => {
                let idx = self.frames.last().unwrap().bp + i as usize;
                let existing = self.stack.get(idx).clone();
                let cell: ObjectPtr = match existing {
                    Value::ObjectPtr(cell) => cell,
                    other => {
                        let cell = Rc::new(RefCell::new(other));
                        self.stack.set(idx, Value::ObjectPtr(cell.clone()));
                        cell
                    }
                };
                self.stack.push(Value::ObjectPtr(cell));
                StepOutcome::Continue
            }
            GetFreePtr(i) => {
                let cell = self.frames.last().unwrap().free[i as usize].clone();
                self.stack.push(Value::ObjectPtr(cell));
                StepOutcome::Continue
            }
            Closure { const_idx, num_free } => {
                let cells = self.stack.pop_n(num_free as usize);
                let free: Vec<ObjectPtr> = cells
                    .into_iter()
                    .map(|v| match v {
                        Value::ObjectPtr(p) => p,
                        _ => unreachable!("Closure's free-cell operands are always ObjectPtr"),
                    })
                    .collect();
                let function = match &self.constants[const_idx as usize] {
                    Value::CompiledFunction(f) => f.clone(),
                    _ => unreachable!("Closure's const_idx always names a CompiledFunction"),
                };
                self.stack.push(Value::Closure(Rc::new(ClosureObj { function, free })));
                StepOutcome::Continue
            }
            Array(n) => {
                let items = self.stack.pop_n(n as usize);
                self.stack.push(Value::array(items));
                StepOutcome::Continue
            }
            Map(n2) => {
                let flat = self.stack.pop_n(n2 as usize);
                let map = Value::map(MapData::new());
                let mut it = flat.into_iter();
                while let (Some(k), Some(v)) = (it.next(), it.next()) {
                    if let Err(e) = ops::index_set(&map, &k, v) {
                        return StepOutcome::Threw(throw_op_error(e));
                    }
                }
                self.stack.push(map);
                StepOutcome::Continue
            }
            GetIndex(k) => {
                let idxs = self.stack.pop_n(k as usize);
                let mut base = self.stack.pop();
                for idx in &idxs {
                    match ops::index_get(&base, idx) {
                        Ok(v) => base = v,
                        Err(e) => return StepOutcome::Threw(throw_op_error(e)),
                    }
                }
                self.stack.push(base);
                StepOutcome::Continue
            }
            SetIndex => {
                let value = self.stack.pop();
                let index = self.stack.pop();
                let base = self.stack.pop();
                match ops::index_set(&base, &index, value) {
                    Ok(()) => StepOutcome::Continue,
                    Err(e) => StepOutcome::Threw(throw_op_error(e)),
                }
            }
            SliceIndex => {
                let hi = self.stack.pop();
                let lo = self.stack.pop();
                let base = self.stack.pop();
                match ops::slice(&base, &lo, &hi) {
                    Ok(v) => {
                        self.stack.push(v);
                        StepOutcome::Continue
                    }
                    Err(e) => StepOutcome::Threw(throw_op_error(e)),
                }
            }
            DupN(n) => {
                self.stack.dup_n(n as usize);
                StepOutcome::Continue
            }
            BinaryOp(op) => {
                let b = self.stack.pop();
                let a = self.stack.pop();
                match ops::binary(op, &a, &b) {
                    Ok(v) => {
                        self.stack.push(v);
                        StepOutcome::Continue
                    }
                    Err(e) => StepOutcome::Threw(throw_op_error(e)),
                }
            }
            Unary(op) => {
                let v = self.stack.pop();
                match ops::unary(op, &v) {
                    Ok(v) => {
                        self.stack.push(v);
                        StepOutcome::Continue
                    }
                    Err(e) => StepOutcome::Threw(throw_op_error(e)),
                }
            }
            Equal => {
                let b = self.stack.pop();
                let a = self.stack.pop();
                self.stack.push(Value::Bool(ops::equals(&a, &b)));
                StepOutcome::Continue
            }
            NotEqual => {
                let b = self.stack.pop();
                let a = self.stack.pop();
                self.stack.push(Value::Bool(!ops::equals(&a, &b)));
                StepOutcome::Continue
            }
            Jump(target) => {
                self.frames.last_mut().unwrap().ip = target as usize;
                StepOutcome::Continue
            }
            JumpFalsy(target) => {
                let cond = self.stack.pop();
                if !cond.is_truthy() {
                    self.frames.last_mut().unwrap().ip = target as usize;
                }
                StepOutcome::Continue
            }
            AndJump(target) => {
                if !self.stack.peek().is_truthy() {
                    self.frames.last_mut().unwrap().ip = target as usize;
                } else {
                    self.stack.pop();
                }
                StepOutcome::Continue
            }
            OrJump(target) => {
                if self.stack.peek().is_truthy() {
                    self.frames.last_mut().unwrap().ip = target as usize;
                } else {
                    self.stack.pop();
                }
                StepOutcome::Continue
            }
            IterInit => {
                let v = self.stack.pop();
                match ValueIter::new(&v) {
                    Ok(it) => {
                        self.stack.push(Value::Iterator(Rc::new(RefCell::new(it))));
                        StepOutcome::Continue
                    }
                    Err(e) => StepOutcome::Threw(throw_op_error(e)),
                }
            }
            IterNext => {
                let has = match self.stack.peek() {
                    Value::Iterator(it) => it.borrow_mut().next(),
                    _ => unreachable!("IterNext without a prior IterInit"),
                };
                self.stack.push(Value::Bool(has));
                StepOutcome::Continue
            }
            IterKey => {
                let key = match self.stack.peek() {
                    Value::Iterator(it) => it.borrow().key(),
                    _ => unreachable!("IterKey without a live iterator"),
                };
                self.stack.push(key);
                StepOutcome::Continue
            }
            IterValue => {
                let value = match self.stack.peek() {
                    Value::Iterator(it) => it.borrow().value(),
                    _ => unreachable!("IterValue without a live iterator"),
                };
                self.stack.push(value);
                StepOutcome::Continue
            }
            Call { nargs, flags } => self.exec_call(nargs, flags),
            CallName { nargs, flags } => self.exec_call_name(nargs, flags),
            Return(n) => self.exec_return(n),
            SetupTry { catch_pos, finally_pos } => {
                let sp = self.stack.len();
                self.frames.last_mut().unwrap().handlers.push(Handler {
                    catch_pos,
                    finally_pos,
                    sp_at_setup: sp,
                    phase: HandlerPhase::Active,
                    held_error: None,
                });
                StepOutcome::Continue
            }
            SetupCatch => {
                let frame = self.frames.last_mut().unwrap();
                let trailer = frame
                    .current_trailer
                    .as_mut()
                    .expect("SetupCatch only reached after an exception selected this handler");
                trailer.phase = HandlerPhase::InCatch;
                let err = trailer.held_error.take().expect("SetupCatch implies an outstanding error");
                self.stack.push(Value::RuntimeError(err));
                StepOutcome::Continue
            }
            SetupFinally => {
                let frame = self.frames.last_mut().unwrap();
                match frame.current_trailer.as_mut() {
                    Some(t) => t.phase = HandlerPhase::InFinally,
                    None => {
                        // Normal fallthrough: nothing has touched this
                        // try's handler yet, so it is still the top of
                        // `handlers`.
                        let mut h = frame.handlers.pop().expect("SetupFinally without an owning handler");
                        h.phase = HandlerPhase::InFinally;
                        frame.current_trailer = Some(h);
                    }
                }
                StepOutcome::Continue
            }
            Throw(1) => {
                let value = self.stack.pop();
                StepOutcome::Threw(to_runtime_error(value))
            }
            Throw(0) => self.exec_throw_trailer(),
            Throw(_) => unreachable!("Throw's mode operand is always 0 or 1"),
            Finalizer { depth, has_value } => {
                let stash = if has_value { Some(self.stack.pop()) } else { None };
                // `step` already advanced `ip` past this instruction, so it
                // names the real `Return`/`Jump` that follows -- exactly
                // where execution must land once every intervening
                // `finally` has run.
                let resume_ip = self.frames.last().unwrap().ip;
                {
                    let frame = self.frames.last_mut().unwrap();
                    if let Some(t) = &frame.current_trailer {
                        if t.phase == HandlerPhase::InFinally {
                            // Already inside this handler's own finally;
                            // a break/continue/return found there
                            // supersedes whatever it was going to do.
                            frame.current_trailer = None;
                            frame.pending_unwind = None;
                        }
                    }
                }
                self.continue_finalizing(depth as usize, stash, resume_ip);
                StepOutcome::Continue
            }
            LoadModule { const_idx, module_idx } => self.exec_load_module(const_idx, module_idx),
            StoreModule(idx) => {
                let top = self.stack.peek().clone();
                self.module_cache[idx as usize] = top;
                self.module_loaded[idx as usize] = true;
                StepOutcome::Continue
            }
            Pop => {
                self.stack.pop();
                StepOutcome::Continue
            }
            NoOp => StepOutcome::Continue,
        }
    }

    fn global_name(&self, idx: u16) -> std::rc::Rc<str> {
        match &self.constants[idx as usize] {
            Value::String(s) => std::rc::Rc::from(s.as_str()),
            _ => unreachable!("GetGlobal/SetGlobal operand is always a string constant"),
        }
    }

    fn globals_get(&self, name: &str) -> Value {
        match &self.globals {
            Value::Map(m) => m.borrow().get(name).cloned().unwrap_or(Value::Undefined),
            Value::SyncMap(m) => m.read().unwrap().get(name).cloned().unwrap_or(Value::Undefined),
            _ => Value::Undefined,
        }
    }

    fn globals_set(&mut self, name: &str, value: Value) {
        match &self.globals {
            Value::Map(m) => {
                m.borrow_mut().insert(name.into(), value);
            }
            Value::SyncMap(m) => {
                m.write().unwrap().insert(name.into(), value);
            }
            _ => {}
        }
    }

    fn exec_call(&mut self, nargs: u8, flags: u8) -> StepOutcome {
        let mut args = self.stack.pop_n(nargs as usize);
        if flags & CALL_FLAG_EXPAND != 0 {
            let spread = args.pop().expect("CALL_FLAG_EXPAND requires at least one argument");
            match expand_iterable(&spread) {
                Ok(mut extra) => args.append(&mut extra),
                Err(e) => return StepOutcome::Threw(throw_op_error(e)),
            }
        }
        let callee = self.stack.pop();
        match self.invoke(callee, args) {
            Ok(()) => StepOutcome::Continue,
            Err(e) => StepOutcome::Threw(e),
        }
    }

    /// Method-style calls on host types (`a.b(...)`) dispatch by name over
    /// the same flat builtin table regular calls use, with the
    /// receiver spliced in as the leading argument.
    fn exec_call_name(&mut self, nargs: u8, flags: u8) -> StepOutcome {
        let mut args = self.stack.pop_n(nargs as usize);
        if flags & CALL_FLAG_EXPAND != 0 {
            let spread = args.pop().expect("CALL_FLAG_EXPAND requires at least one argument");
            match expand_iterable(&spread) {
                Ok(mut extra) => args.append(&mut extra),
                Err(e) => return StepOutcome::Threw(throw_op_error(e)),
            }
        }
        let name_value = self.stack.pop();
        let receiver = self.stack.pop();
        let name = match &name_value {
            Value::String(s) => s.clone(),
            _ => unreachable!("CallName's name operand is always a string constant"),
        };
        // `m.Field(args)` on a `Map`/`SyncMap` receiver is field access then
        // an ordinary call -- there is no separate "field access"
        // expression node, so this is the only place that lowering goes
        // through.
        if matches!(receiver, Value::Map(_) | Value::SyncMap(_)) {
            let field = match ops::index_get(&receiver, &Value::String(name)) {
                Ok(v) => v,
                Err(e) => return StepOutcome::Threw(throw_op_error(e)),
            };
            return match self.invoke(field, args) {
                Ok(()) => StepOutcome::Continue,
                Err(e) => StepOutcome::Threw(e),
            };
        }
        // Otherwise `.name(args)` is sugar over the builtin free-function
        // table with the receiver spliced in as the leading argument --
        // this is what lets `x.len()` mean the same thing as `len(x)`.
        let mut full_args = Vec::with_capacity(args.len() + 1);
        full_args.push(receiver);
        full_args.extend(args);
        match builtins::lookup(&name) {
            Some(id) => match builtins::call(id, &full_args) {
                Ok(v) => {
                    self.stack.push(v);
                    StepOutcome::Continue
                }
                Err(e) => StepOutcome::Threw(Rc::new(RuntimeErrorObj { error: e, trace: Vec::new() })),
            },
            None => StepOutcome::Threw(throw_op_error(OpError {
                kind: ErrorKind::NotCallable,
                message: format!("no such method '{name}'"),
            })),
        }
    }

    fn invoke(&mut self, callee: Value, args: Vec<Value>) -> Result<(), Rc<RuntimeErrorObj>> {
        match callee {
            Value::Function(f) => match self.call_host(&f.func, &args) {
                Ok(v) => {
                    self.stack.push(v);
                    Ok(())
                }
                Err(e) => Err(Rc::new(RuntimeErrorObj { error: e, trace: Vec::new() })),
            },
            Value::BuiltinFunction(id) => match builtins::call(id, &args) {
                Ok(v) => {
                    self.stack.push(v);
                    Ok(())
                }
                Err(e) => Err(Rc::new(RuntimeErrorObj { error: e, trace: Vec::new() })),
            },
            Value::CompiledFunction(f) => self.call_compiled(f, Vec::new(), args, None),
            Value::Closure(c) => self.call_compiled(c.function.clone(), c.free.clone(), args, None),
            other => Err(throw_op_error(OpError {
                kind: ErrorKind::NotCallable,
                message: format!("{} is not callable", other.type_name()),
            })),
        }
    }

    /// Invokes a host function, optionally behind `catch_unwind`.
    fn call_host(
        &self,
        func: &dyn Fn(&[Value]) -> Result<Value, Rc<ErrorObj>>,
        args: &[Value],
    ) -> Result<Value, Rc<ErrorObj>> {
        if !self.recover {
            return func(args);
        }
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| func(args))) {
            Ok(result) => result,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "host function panicked".to_string());
                Err(Rc::new(ErrorObj {
                    name: "RuntimeError".into(),
                    message: message.into(),
                    cause: None,
                    kind: None,
                }))
            }
        }
    }

    pub(super) fn call_compiled(
        &mut self,
        function: Rc<CompiledFunction>,
        free: Vec<ObjectPtr>,
        mut args: Vec<Value>,
        on_return: Option<OnReturn>,
    ) -> Result<(), Rc<RuntimeErrorObj>> {
        let num_params = function.num_params as usize;
        let num_required = function.num_required_params as usize;
        if function.variadic {
            if args.len() < num_required {
                return Err(wrong_arity(num_required, None, args.len()));
            }
            let extra = if args.len() > num_params { args.split_off(num_params) } else { Vec::new() };
            while args.len() < num_params {
                args.push(Value::Undefined);
            }
            args.push(Value::array(extra));
        } else if args.len() < num_required || args.len() > num_params {
            return Err(wrong_arity(num_required, Some(num_params), args.len()));
        }
        debug_assert!(
            self.frames.len() < self.options.frame_stack_depth,
            "call stack overflow: exceeded frame depth of {}",
            self.options.frame_stack_depth
        );
        let bp = self.stack.len();
        let supplied = args.len();
        for v in args {
            self.stack.push(v);
        }
        for _ in supplied..function.num_locals as usize {
            self.stack.push(Value::Undefined);
        }
        self.frames.push(Frame::new(function, free, bp, on_return));
        Ok(())
    }

    fn exec_return(&mut self, n: u8) -> StepOutcome {
        let value = if n == 1 { self.stack.pop() } else { Value::Undefined };
        let finished = self.frames.pop().expect("Return with an empty frame stack");
        self.stack.truncate(finished.bp);
        if let Some(OnReturn::StoreModule(midx)) = finished.on_return {
            let idx = midx as usize;
            self.module_cache[idx] = value.clone();
            self.module_loaded[idx] = true;
            self.module_loading[idx] = false;
        }
        if self.frames.is_empty() {
            StepOutcome::Finished(value)
        } else {
            self.stack.push(value);
            StepOutcome::Continue
        }
    }

    /// `Throw 0`: the trailer for some handler's catch/finally has run to
    /// its end. Decide whether to re-raise, continue chaining through
    /// further enclosing handlers, or simply fall through.
    fn exec_throw_trailer(&mut self) -> StepOutcome {
        let (held, pending) = {
            let frame = self.frames.last_mut().unwrap();
            let trailer = frame.current_trailer.take().expect("Throw 0 only follows an entered finally trailer");
            (trailer.held_error, frame.pending_unwind.take())
        };
        if let Some(err) = held {
            return StepOutcome::Threw(err);
        }
        if let Some(pu) = pending {
            self.continue_finalizing(pu.target_depth, pu.stash, pu.resume_ip);
        }
        StepOutcome::Continue
    }

    /// Crosses one more enclosing handler's `finally` towards
    /// `target_depth`, or (once there are none left to cross) restores the
    /// stashed return value and resumes control at `resume_ip`, the
    /// instruction right after the `Finalizer` that started this unwind.
    fn continue_finalizing(&mut self, target_depth: usize, stash: Option<Value>, resume_ip: usize) {
        let frame = self.frames.last_mut().unwrap();
        if let Some(t) = frame.current_trailer.as_mut() {
            t.phase = HandlerPhase::InFinally;
            let finally_pos = t.finally_pos;
            let sp = t.sp_at_setup;
            self.stack.truncate(sp);
            frame.pending_unwind = Some(PendingUnwind { target_depth, stash, resume_ip });
            frame.ip = finally_pos as usize;
            return;
        }
        if frame.handlers.len() > target_depth {
            let mut h = frame.handlers.pop().unwrap();
            h.phase = HandlerPhase::InFinally;
            let finally_pos = h.finally_pos;
            let sp = h.sp_at_setup;
            frame.current_trailer = Some(h);
            self.stack.truncate(sp);
            frame.pending_unwind = Some(PendingUnwind { target_depth, stash, resume_ip });
            frame.ip = finally_pos as usize;
            return;
        }
        if let Some(v) = stash {
            self.stack.push(v);
        }
        frame.ip = resume_ip;
    }

    /// Searches the call stack for a handler, truncating the operand stack
    /// and jumping into its catch/finally on success. Returns `Some` with
    /// the fully-accumulated error once the call stack is exhausted
    /// without finding one.
    pub(super) fn raise(&mut self, mut err: Rc<RuntimeErrorObj>) -> Option<Rc<RuntimeErrorObj>> {
        loop {
            let Some(frame) = self.frames.last_mut() else {
                return Some(err);
            };
            if let Some(h) = frame.handlers.pop() {
                self.stack.truncate(h.sp_at_setup);
                frame.ip = h.catch_pos as usize;
                frame.pending_unwind = None;
                frame.current_trailer = Some(Handler { held_error: Some(err), phase: HandlerPhase::Active, ..h });
                return None;
            }
            let pos = frame
                .function
                .position_of(frame.ip.saturating_sub(1))
                .unwrap_or(SourcePos { line: 0, column: 0 });
            err = append_trace(err, pos);
            let done = self.frames.pop().unwrap();
            self.stack.truncate(done.bp);
        }
    }

    fn exec_load_module(&mut self, const_idx: u16, module_idx: u16) -> StepOutcome {
        let idx = module_idx as usize;
        if self.module_loaded[idx] {
            self.stack.push(self.module_cache[idx].clone());
            return StepOutcome::Continue;
        }
        if self.module_loading[idx] {
            return StepOutcome::Threw(throw_op_error(OpError {
                kind: ErrorKind::CircularImport,
                message: format!("circular import (module #{idx})"),
            }));
        }
        let constant = self.constants[const_idx as usize].clone();
        match constant {
            Value::CompiledFunction(f) => {
                self.module_loading[idx] = true;
                match self.call_compiled(f, Vec::new(), Vec::new(), Some(OnReturn::StoreModule(module_idx))) {
                    Ok(()) => StepOutcome::Continue,
                    Err(e) => StepOutcome::Threw(e),
                }
            }
            other => {
                self.module_loaded[idx] = true;
                self.module_cache[idx] = other.clone();
                self.stack.push(other);
                StepOutcome::Continue
            }
        }
    }
}

fn wrong_arity(required: usize, max: Option<usize>, got: usize) -> Rc<RuntimeErrorObj> {
    let want = match max {
        Some(m) if m == required => format!("{required}"),
        Some(m) => format!("{required}..{m}"),
        None => format!("at least {required}"),
    };
    throw_op_error(OpError {
        kind: ErrorKind::WrongNumberOfArguments,
        message: format!("expected {want} argument(s), got {got}"),
    })
}
