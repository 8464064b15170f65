//! The tree-to-bytecode compiler.
//!
//! `Compiler` walks the input AST (`compiler::ast`) once, in source order,
//! and emits instructions directly into the current function scope's
//! buffer -- there is no separate IR or optimization pass here. A single
//! [`Compiler`] compiles an entire program, including every source module
//! it transitively imports, into one [`crate::bytecode::Bytecode`]
//! sharing a single constant pool, deduplicated via a `constant_map`
//! keyed by [`ConstKey`].

pub mod ast;
pub mod error;

use std::rc::Rc;

use hashbrown::HashMap;

use crate::bytecode::{Bytecode, CompiledFunction};
use crate::modules::{ModuleKind, ModuleMap};
use crate::opcode::Instruction;
use crate::symtab::{Scope, Symbol, SymbolTable};
use crate::value::ops::BinOp;
use crate::value::{SourcePos, Value};

use ast::{AssignTarget, Expr, FuncLit, Program, Stmt, UnaryOpKind};
use error::{CompileError, CompileErrors};

/// Knobs for one compilation pass, kept as a real struct rather than a
/// single boolean grab bag so new knobs have an obvious home.
#[derive(Debug, Clone)]
pub struct CompilerOptions {
    /// Recorded on the output [`Bytecode`] for diagnostics; does not affect
    /// which instructions are emitted.
    pub module_path: String,
    /// Emits a `tracing::trace!` line per top-level statement compiled, and
    /// a final disassembly of `main` on success.
    pub trace: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        CompilerOptions {
            module_path: "<module>".to_string(),
            trace: false,
        }
    }
}

/// Key used to deduplicate constants that are cheap and safe to compare by
/// value. Floats are
/// deliberately excluded -- NaN and signed-zero make float equality an
/// unreliable dedup key -- and container/function constants are never
/// shared structurally, so every other constant is simply appended.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstKey {
    Int(i64),
    Str(String),
}

struct LoopCtx {
    /// Number of `try` handlers open in the enclosing function scope at the
    /// moment this loop was entered; `break`/`continue` only need to unwind
    /// handlers opened *after* this point.
    handler_depth_at_entry: u32,
    break_fixups: Vec<usize>,
    continue_fixups: Vec<usize>,
}

struct FuncScope {
    symtab: SymbolTable,
    instructions: Vec<Instruction>,
    positions: Vec<SourcePos>,
    loops: Vec<LoopCtx>,
    /// Number of `try` handlers lexically open at the current point of
    /// compilation within this function (not the whole program) --
    /// consulted by `return`/`break`/`continue` to size their `Finalizer`
    /// unwind depth.
    handler_depth: u32,
    stack_depth: i32,
    max_stack: i32,
    num_params: u32,
    variadic: bool,
    name: Option<String>,
}

impl FuncScope {
    fn new(symtab: SymbolTable, num_params: u32, variadic: bool, name: Option<String>) -> Self {
        FuncScope {
            symtab,
            instructions: Vec::new(),
            positions: Vec::new(),
            loops: Vec::new(),
            handler_depth: 0,
            stack_depth: 0,
            max_stack: 0,
            num_params,
            variadic,
            name,
        }
    }
}

pub struct Compiler {
    options: CompilerOptions,
    scopes: Vec<FuncScope>,
    constants: Vec<Value>,
    constant_map: HashMap<ConstKey, u16>,
    errors: Vec<CompileError>,
    cur_pos: SourcePos,
    num_modules: u32,
    /// Per-module-name cache so importing the same module twice in one
    /// compile reuses the same `(const_idx, module_idx)` pair rather than
    /// compiling it again.
    compiled_modules: HashMap<String, (u16, u16)>,
}

/// Compiles `program` (and, transitively, every module it imports through
/// `modules`) into a single [`Bytecode`].
pub fn compile(program: &Program, modules: &ModuleMap, options: CompilerOptions) -> Result<Bytecode, CompileErrors> {
    let mut c = Compiler {
        options,
        scopes: Vec::new(),
        constants: Vec::new(),
        constant_map: HashMap::new(),
        errors: Vec::new(),
        cur_pos: SourcePos { line: 0, column: 0 },
        num_modules: 0,
        compiled_modules: HashMap::new(),
    };
    let main = c.compile_module_body(program, SymbolTable::new_top(), modules, None);
    if !c.errors.is_empty() {
        return Err(CompileErrors::finalize(c.errors));
    }
    let bytecode = Bytecode {
        main,
        constants: c.constants,
        num_modules: c.num_modules,
        module_path: c.options.module_path.clone(),
    };
    if c.options.trace {
        tracing::trace!(module = %bytecode.module_path, "compiled:\n{}", crate::opcode::disassemble(&bytecode.main.instructions));
    }
    Ok(bytecode)
}

impl Compiler {
    fn cur(&mut self) -> &mut FuncScope {
        self.scopes.last_mut().expect("compiler scope stack is never empty while lowering")
    }

    fn symtab(&self) -> SymbolTable {
        self.scopes.last().expect("compiler scope stack is never empty while lowering").symtab.clone()
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(CompileError { message: message.into(), pos: self.cur_pos });
    }

    fn addr(&self) -> usize {
        self.scopes.last().map(|s| s.instructions.len()).unwrap_or(0)
    }

    fn emit(&mut self, instr: Instruction) -> usize {
        let effect = crate::opcode::stack_effect(&instr);
        let pos = self.cur_pos;
        let scope = self.cur();
        let addr = scope.instructions.len();
        scope.instructions.push(instr);
        scope.positions.push(pos);
        scope.stack_depth += effect;
        if scope.stack_depth > scope.max_stack {
            scope.max_stack = scope.stack_depth;
        }
        addr
    }

    fn patch_jump(&mut self, addr: usize, target: u16) {
        let instr = &mut self.cur().instructions[addr];
        *instr = match *instr {
            Instruction::Jump(_) => Instruction::Jump(target),
            Instruction::JumpFalsy(_) => Instruction::JumpFalsy(target),
            Instruction::AndJump(_) => Instruction::AndJump(target),
            Instruction::OrJump(_) => Instruction::OrJump(target),
            other => panic!("patch_jump called on non-jump instruction {other:?}"),
        };
    }

    fn patch_try(&mut self, addr: usize, catch_pos: u16, finally_pos: u16) {
        self.cur().instructions[addr] = Instruction::SetupTry { catch_pos, finally_pos };
    }

    fn add_constant(&mut self, value: Value, key: Option<ConstKey>) -> u16 {
        if let Some(k) = &key {
            if let Some(&idx) = self.constant_map.get(k) {
                return idx;
            }
        }
        let idx = self.constants.len() as u16;
        self.constants.push(value);
        if let Some(k) = key {
            self.constant_map.insert(k, idx);
        }
        idx
    }

    // ---- module bodies (entry program, and every transitively imported
    // source module) compile through this single entry point, sharing the
    // constant pool / module-cache counter on `self`. ----
    fn compile_module_body(
        &mut self,
        program: &Program,
        symtab: SymbolTable,
        modules: &ModuleMap,
        name: Option<String>,
    ) -> CompiledFunction {
        crate::builtins::populate_symtab(&symtab);
        self.scopes.push(FuncScope::new(symtab, 0, false, name));
        self.compile_block(&program.body, modules);
        self.emit(Instruction::Return(0));
        let scope = self.scopes.pop().expect("scope pushed above");
        // A module body only ever gains params through a top-of-module
        // `param (...)` statement (`Stmt::ParamDecl`), which patches
        // `scope.num_params`/`scope.variadic` as a side effect of compiling
        // it; there is no default-value syntax for module params (unlike
        // function literals), so every declared param is required.
        CompiledFunction {
            instructions: scope.instructions,
            num_params: scope.num_params,
            num_required_params: scope.num_params,
            num_locals: scope.symtab.max_symbols(),
            variadic: scope.variadic,
            num_free: 0,
            max_stack_size: scope.max_stack.max(0) as u32,
            positions: scope.positions,
            name: scope.name,
        }
    }

    fn compile_block(&mut self, block: &[Stmt], modules: &ModuleMap) {
        for stmt in block {
            self.compile_stmt(stmt, modules);
        }
    }

    fn compile_stmt(&mut self, stmt: &Stmt, modules: &ModuleMap) {
        match stmt {
            Stmt::Pos(inner, pos) => {
                self.cur_pos = *pos;
                self.compile_stmt(inner, modules);
            }
            Stmt::Expr(e) => {
                self.compile_expr(e, modules);
                self.emit(Instruction::Pop);
            }
            Stmt::VarDecl { names, values, constant } => {
                for (i, name) in names.iter().enumerate() {
                    match values.get(i).and_then(|v| v.as_ref()) {
                        Some(v) => self.compile_expr(v, modules),
                        None => {
                            self.emit(Instruction::Null);
                        }
                    };
                    self.define_and_store(name, *constant);
                }
            }
            Stmt::GlobalDecl(names) => {
                for name in names {
                    if let Err(e) = self.symtab().define_global(name, false) {
                        self.error(e.0);
                    }
                }
            }
            Stmt::ParamDecl { params, variadic } => {
                if !self.symtab().is_top_scope() {
                    self.error("param declarations are only allowed at the top of a module");
                }
                let mut names: Vec<&str> = params.iter().map(|s| s.as_str()).collect();
                if let Some(v) = variadic {
                    names.push(v.as_str());
                }
                match self.symtab().set_params(&names) {
                    Ok(_) => {
                        let scope = self.cur();
                        scope.num_params = params.len() as u32;
                        scope.variadic = variadic.is_some();
                    }
                    Err(e) => self.error(e.0),
                }
            }
            Stmt::Define { targets, value } => {
                if targets.len() == 1 {
                    self.compile_expr(value, modules);
                    self.define_and_store(&targets[0], false);
                } else {
                    // makeArray(n, rhs) normalizes rhs to exactly n elements
                    // (padding with Undefined) before any target is read, so a
                    // short rhs yields Undefined tails instead of an
                    // IndexOutOfBoundsError.
                    let make_array = crate::builtins::lookup(":makeArray").expect(":makeArray is always registered");
                    self.emit(Instruction::GetBuiltin(make_array.0 as u8));
                    self.compile_int_literal(targets.len() as i64);
                    self.compile_expr(value, modules);
                    self.emit(Instruction::Call { nargs: 2, flags: 0 });
                    for (i, name) in targets.iter().enumerate() {
                        if i + 1 < targets.len() {
                            self.emit(Instruction::DupN(1));
                        }
                        self.compile_int_literal(i as i64);
                        self.emit(Instruction::GetIndex(1));
                        self.define_and_store(name, false);
                    }
                }
            }
            Stmt::Assign { target, op, value } => self.compile_assign(target, *op, value, modules),
            Stmt::Block(b) => {
                let parent = self.symtab();
                let block_scope = parent.new_block_scope();
                self.with_symtab(block_scope, |c| c.compile_block(b, modules));
            }
            Stmt::If { cond, then, else_ } => self.compile_if(cond, then, else_.as_deref(), modules),
            Stmt::For { init, cond, post, body } => self.compile_for(init.as_deref(), cond.as_ref(), post.as_deref(), body, modules),
            Stmt::ForIn { key, value, iterable, body } => self.compile_for_in(key.as_deref(), value, iterable, body, modules),
            Stmt::Break => self.compile_break(),
            Stmt::Continue => self.compile_continue(),
            Stmt::Return(value) => self.compile_return(value.as_ref(), modules),
            Stmt::Try { body, catch, finally } => self.compile_try(body, catch.as_ref(), finally.as_deref(), modules),
            Stmt::Throw(e) => {
                self.compile_expr(e, modules);
                self.emit(Instruction::Throw(1));
            }
        }
    }

    fn define_and_store(&mut self, name: &str, constant: bool) {
        let result = if constant {
            self.symtab().define_const_local(name)
        } else {
            self.symtab().define_local(name)
        };
        match result {
            Ok(sym) => {
                self.emit(Instruction::DefineLocal(sym.index as u8));
            }
            Err(e) => self.error(e.0),
        }
    }

    fn with_symtab<R>(&mut self, symtab: SymbolTable, f: impl FnOnce(&mut Self) -> R) -> R {
        let saved = std::mem::replace(&mut self.cur().symtab, symtab);
        let r = f(self);
        self.cur().symtab = saved;
        r
    }

    fn compile_int_literal(&mut self, v: i64) {
        let idx = self.add_constant(Value::Int(v), Some(ConstKey::Int(v)));
        self.emit(Instruction::Constant(idx));
    }

    // ---- identifiers ----

    fn emit_load_ident(&mut self, name: &str) {
        match self.symtab().resolve(name) {
            Some(sym) => self.emit_load(&sym),
            None => {
                self.error(format!("undefined name '{name}'"));
                self.emit(Instruction::Null);
            }
        };
    }

    fn emit_load(&mut self, sym: &Symbol) {
        match sym.scope {
            Scope::Local => {
                self.emit(Instruction::GetLocal(sym.index as u8));
            }
            Scope::Global => {
                let idx = self.global_name_constant(&sym.name);
                self.emit(Instruction::GetGlobal(idx));
            }
            Scope::Builtin => {
                self.emit(Instruction::GetBuiltin(sym.index as u8));
            }
            Scope::Free => {
                self.emit(Instruction::GetFree(sym.index as u8));
            }
        };
    }

    fn emit_store(&mut self, sym: &Symbol) {
        match sym.scope {
            Scope::Local => {
                self.emit(Instruction::SetLocal(sym.index as u8));
            }
            Scope::Global => {
                let idx = self.global_name_constant(&sym.name);
                self.emit(Instruction::SetGlobal(idx));
            }
            Scope::Free => {
                self.emit(Instruction::SetFree(sym.index as u8));
            }
            Scope::Builtin => self.error("cannot assign to a builtin"),
        };
    }

    /// Every reference to a given global name shares one constant-pool slot
    /// (the `Str` dedup key already guarantees this), so the VM's
    /// name-keyed global table never sees two different indices for the
    /// same name even across independently-numbered modules.
    fn global_name_constant(&mut self, name: &str) -> u16 {
        self.add_constant(Value::string(name), Some(ConstKey::Str(name.to_string())))
    }

    // ---- assignment ----

    fn compile_assign(&mut self, target: &AssignTarget, op: Option<BinOp>, value: &Expr, modules: &ModuleMap) {
        match target {
            AssignTarget::Ident(name) => {
                let sym = match self.symtab().resolve(name) {
                    Some(s) => s,
                    None => {
                        self.error(format!("undefined name '{name}'"));
                        return;
                    }
                };
                if sym.constant {
                    self.error(format!("cannot assign to constant '{name}'"));
                }
                if let Some(op) = op {
                    self.emit_load(&sym);
                    self.compile_expr(value, modules);
                    self.emit(Instruction::BinaryOp(op));
                } else {
                    self.compile_expr(value, modules);
                }
                self.emit_store(&sym);
            }
            AssignTarget::Index(base, index) => {
                self.compile_expr(base, modules);
                self.compile_expr(index, modules);
                if let Some(op) = op {
                    self.emit(Instruction::DupN(2));
                    self.emit(Instruction::GetIndex(1));
                    self.compile_expr(value, modules);
                    self.emit(Instruction::BinaryOp(op));
                } else {
                    self.compile_expr(value, modules);
                }
                self.emit(Instruction::SetIndex);
            }
        }
    }

    // ---- control flow ----

    fn compile_if(&mut self, cond: &Expr, then: &[Stmt], else_: Option<&[Stmt]>, modules: &ModuleMap) {
        self.compile_expr(cond, modules);
        let jf = self.emit(Instruction::JumpFalsy(0));
        let then_scope = self.symtab().new_block_scope();
        self.with_symtab(then_scope, |c| c.compile_block(then, modules));
        if let Some(else_body) = else_ {
            let jmp_end = self.emit(Instruction::Jump(0));
            let else_start = self.addr() as u16;
            self.patch_jump(jf, else_start);
            let else_scope = self.symtab().new_block_scope();
            self.with_symtab(else_scope, |c| c.compile_block(else_body, modules));
            let end = self.addr() as u16;
            self.patch_jump(jmp_end, end);
        } else {
            let end = self.addr() as u16;
            self.patch_jump(jf, end);
        }
    }

    fn compile_for(&mut self, init: Option<&Stmt>, cond: Option<&Expr>, post: Option<&Stmt>, body: &[Stmt], modules: &ModuleMap) {
        let loop_scope = self.symtab().new_block_scope();
        self.with_symtab(loop_scope, |c| {
            if let Some(init) = init {
                c.compile_stmt(init, modules);
            }
            let loop_start = c.addr() as u16;
            let exit_fixup = cond.map(|cond| {
                c.compile_expr(cond, modules);
                c.emit(Instruction::JumpFalsy(0))
            });
            c.cur().loops.push(LoopCtx {
                handler_depth_at_entry: c.cur().handler_depth,
                break_fixups: Vec::new(),
                continue_fixups: Vec::new(),
            });
            let body_scope = c.symtab().new_block_scope();
            c.with_symtab(body_scope, |c| c.compile_block(body, modules));
            let continue_target = c.addr() as u16;
            if let Some(post) = post {
                c.compile_stmt(post, modules);
            }
            c.emit(Instruction::Jump(loop_start));
            let end = c.addr() as u16;
            if let Some(jf) = exit_fixup {
                c.patch_jump(jf, end);
            }
            let ctx = c.cur().loops.pop().expect("pushed above");
            for addr in ctx.break_fixups {
                c.patch_jump(addr, end);
            }
            for addr in ctx.continue_fixups {
                c.patch_jump(addr, continue_target);
            }
        });
    }

    fn compile_for_in(&mut self, key: Option<&str>, value: &str, iterable: &Expr, body: &[Stmt], modules: &ModuleMap) {
        let loop_scope = self.symtab().new_block_scope();
        self.with_symtab(loop_scope, |c| {
            c.compile_expr(iterable, modules);
            c.emit(Instruction::IterInit);
            let loop_start = c.addr() as u16;
            c.emit(Instruction::IterNext);
            let exit_fixup = c.emit(Instruction::JumpFalsy(0));
            c.cur().loops.push(LoopCtx {
                handler_depth_at_entry: c.cur().handler_depth,
                break_fixups: Vec::new(),
                continue_fixups: Vec::new(),
            });
            let body_scope = c.symtab().new_block_scope();
            c.with_symtab(body_scope, |c| {
                if let Some(key_name) = key {
                    c.emit(Instruction::IterKey);
                    c.define_and_store(key_name, false);
                }
                c.emit(Instruction::IterValue);
                c.define_and_store(value, false);
                c.compile_block(body, modules);
            });
            let continue_target = c.addr() as u16;
            c.emit(Instruction::Jump(loop_start));
            let end = c.addr() as u16;
            c.patch_jump(exit_fixup, end);
            c.emit(Instruction::Pop); // drop the exhausted iterator
            let ctx = c.cur().loops.pop().expect("pushed above");
            for addr in ctx.break_fixups {
                c.patch_jump(addr, end);
            }
            for addr in ctx.continue_fixups {
                c.patch_jump(addr, continue_target);
            }
        });
    }

    fn compile_break(&mut self) {
        let entry_depth = match self.cur().loops.last() {
            Some(l) => l.handler_depth_at_entry,
            None => {
                self.error("'break' outside of a loop");
                return;
            }
        };
        self.unwind_to(entry_depth, false);
        let addr = self.emit(Instruction::Jump(0));
        self.cur().loops.last_mut().expect("checked above").break_fixups.push(addr);
    }

    fn compile_continue(&mut self) {
        let entry_depth = match self.cur().loops.last() {
            Some(l) => l.handler_depth_at_entry,
            None => {
                self.error("'continue' outside of a loop");
                return;
            }
        };
        self.unwind_to(entry_depth, false);
        let addr = self.emit(Instruction::Jump(0));
        self.cur().loops.last_mut().expect("checked above").continue_fixups.push(addr);
    }

    fn compile_return(&mut self, value: Option<&Expr>, modules: &ModuleMap) {
        let has_value = value.is_some();
        if let Some(v) = value {
            self.compile_expr(v, modules);
        }
        self.unwind_to(0, has_value);
        self.emit(Instruction::Return(if has_value { 1 } else { 0 }));
    }

    /// Emits `Finalizer` to unwind any `try` handlers opened after `depth`,
    /// if there are any; otherwise emits nothing.
    fn unwind_to(&mut self, depth: u32, has_value: bool) {
        if self.cur().handler_depth > depth {
            self.emit(Instruction::Finalizer { depth: depth as u8, has_value });
        }
    }

    fn compile_try(&mut self, body: &[Stmt], catch: Option<&(Option<String>, Vec<Stmt>)>, finally: Option<&[Stmt]>, modules: &ModuleMap) {
        if catch.is_none() && finally.is_none() {
            self.error("'try' requires a 'catch', a 'finally', or both");
        }
        let setup_addr = self.emit(Instruction::SetupTry { catch_pos: 0, finally_pos: 0 });
        self.cur().handler_depth += 1;

        let body_scope = self.symtab().new_block_scope();
        self.with_symtab(body_scope, |c| c.compile_block(body, modules));
        let skip_catch = self.emit(Instruction::Jump(0));

        let catch_pos = self.addr() as u16;
        if let Some((binding, catch_body)) = catch {
            self.emit(Instruction::SetupCatch);
            let catch_scope = self.symtab().new_block_scope();
            self.with_symtab(catch_scope, |c| {
                match binding {
                    Some(name) => c.define_and_store(name, false),
                    None => {
                        c.emit(Instruction::Pop);
                    }
                };
                c.compile_block(catch_body, modules);
            });
        }

        let finally_pos = self.addr() as u16;
        self.patch_jump(skip_catch, finally_pos);
        self.emit(Instruction::SetupFinally);
        if let Some(finally_body) = finally {
            let finally_scope = self.symtab().new_block_scope();
            self.with_symtab(finally_scope, |c| c.compile_block(finally_body, modules));
        }
        self.emit(Instruction::Throw(0));

        self.cur().handler_depth -= 1;
        let catch_target = if catch.is_some() { catch_pos } else { finally_pos };
        self.patch_try(setup_addr, catch_target, finally_pos);
    }

    // ---- expressions ----

    fn compile_expr(&mut self, expr: &Expr, modules: &ModuleMap) {
        match expr {
            Expr::Pos(inner, pos) => {
                self.cur_pos = *pos;
                self.compile_expr(inner, modules);
            }
            Expr::Undefined => {
                self.emit(Instruction::Null);
            }
            Expr::Bool(b) => {
                self.emit(if *b { Instruction::True } else { Instruction::False });
            }
            Expr::Int(v) => self.compile_int_literal(*v),
            Expr::Uint(v) => {
                let idx = self.add_constant(Value::Uint(*v), None);
                self.emit(Instruction::Constant(idx));
            }
            Expr::Float(v) => {
                let idx = self.add_constant(Value::Float(*v), None);
                self.emit(Instruction::Constant(idx));
            }
            Expr::Char(v) => {
                let idx = self.add_constant(Value::Char(*v), None);
                self.emit(Instruction::Constant(idx));
            }
            Expr::Str(s) => {
                let idx = self.add_constant(Value::string(s.clone()), Some(ConstKey::Str(s.clone())));
                self.emit(Instruction::Constant(idx));
            }
            Expr::Bytes(b) => {
                let idx = self.add_constant(Value::bytes(b.clone()), None);
                self.emit(Instruction::Constant(idx));
            }
            Expr::Ident(name) => self.emit_load_ident(name),
            Expr::Array(items) => {
                for item in items {
                    self.compile_expr(item, modules);
                }
                self.emit(Instruction::Array(items.len() as u16));
            }
            Expr::Map(entries) => {
                for (k, v) in entries {
                    self.compile_expr(k, modules);
                    self.compile_expr(v, modules);
                }
                self.emit(Instruction::Map((entries.len() * 2) as u16));
            }
            Expr::Unary(op, inner) => {
                self.compile_expr(inner, modules);
                self.emit(Instruction::Unary(unary_op(*op)));
            }
            Expr::Binary(op, lhs, rhs) => {
                self.compile_expr(lhs, modules);
                self.compile_expr(rhs, modules);
                self.emit(Instruction::BinaryOp(*op));
            }
            Expr::And(lhs, rhs) => {
                self.compile_expr(lhs, modules);
                let skip = self.emit(Instruction::AndJump(0));
                self.compile_expr(rhs, modules);
                let end = self.addr() as u16;
                self.patch_jump(skip, end);
            }
            Expr::Or(lhs, rhs) => {
                self.compile_expr(lhs, modules);
                let skip = self.emit(Instruction::OrJump(0));
                self.compile_expr(rhs, modules);
                let end = self.addr() as u16;
                self.patch_jump(skip, end);
            }
            Expr::Ternary(cond, then, else_) => {
                self.compile_expr(cond, modules);
                let jf = self.emit(Instruction::JumpFalsy(0));
                self.compile_expr(then, modules);
                let jend = self.emit(Instruction::Jump(0));
                let else_start = self.addr() as u16;
                self.patch_jump(jf, else_start);
                self.compile_expr(else_, modules);
                let end = self.addr() as u16;
                self.patch_jump(jend, end);
            }
            Expr::Index(base, index) => {
                self.compile_expr(base, modules);
                self.compile_expr(index, modules);
                self.emit(Instruction::GetIndex(1));
            }
            Expr::Slice(base, lo, hi) => {
                self.compile_expr(base, modules);
                match lo {
                    Some(e) => self.compile_expr(e, modules),
                    None => {
                        self.emit(Instruction::Null);
                    }
                };
                match hi {
                    Some(e) => self.compile_expr(e, modules),
                    None => {
                        self.emit(Instruction::Null);
                    }
                };
                self.emit(Instruction::SliceIndex);
            }
            Expr::Call { callee, args, spread } => {
                self.compile_expr(callee, modules);
                for a in args {
                    self.compile_expr(a, modules);
                }
                let flags = if *spread { crate::opcode::CALL_FLAG_EXPAND } else { 0 };
                self.emit(Instruction::Call { nargs: args.len() as u8, flags });
            }
            Expr::MethodCall { receiver, method, args, spread } => {
                self.compile_expr(receiver, modules);
                let idx = self.add_constant(Value::string(method.clone()), Some(ConstKey::Str(method.clone())));
                self.emit(Instruction::Constant(idx));
                for a in args {
                    self.compile_expr(a, modules);
                }
                let flags = if *spread { crate::opcode::CALL_FLAG_EXPAND } else { 0 };
                self.emit(Instruction::CallName { nargs: args.len() as u8, flags });
            }
            Expr::FuncLit(lit) => self.compile_func_lit(lit, None, modules),
            Expr::Import(name) => self.compile_import(name, modules),
        }
    }

    fn compile_func_lit(&mut self, lit: &FuncLit, name: Option<String>, modules: &ModuleMap) {
        self.cur_pos = lit.pos;
        let fn_symtab = self.symtab().new_function_scope();
        let mut names: Vec<&str> = lit.params.iter().map(|p| p.name.as_str()).collect();
        if let Some(v) = &lit.variadic {
            names.push(v.as_str());
        }
        if let Err(e) = fn_symtab.set_params(&names) {
            self.error(e.0);
        }

        self.scopes.push(FuncScope::new(
            fn_symtab.clone(),
            lit.params.len() as u32,
            lit.variadic.is_some(),
            name,
        ));

        for (i, p) in lit.params.iter().enumerate() {
            if let Some(default) = &p.default {
                self.emit(Instruction::GetLocal(i as u8));
                self.emit(Instruction::Null);
                self.emit(Instruction::Equal);
                let jf = self.emit(Instruction::JumpFalsy(0));
                self.compile_expr(default, modules);
                self.emit(Instruction::SetLocal(i as u8));
                let after = self.addr() as u16;
                self.patch_jump(jf, after);
            }
        }

        self.compile_block(&lit.body, modules);
        self.emit(Instruction::Return(0));

        let scope = self.scopes.pop().expect("scope pushed above");
        let free_syms = fn_symtab.free_symbols();
        // Defaulted parameters are always trailing, so the number of
        // required arguments is just how many lead the list before the
        // first default.
        let num_required_params = lit.params.iter().take_while(|p| p.default.is_none()).count() as u32;
        let compiled = CompiledFunction {
            instructions: scope.instructions,
            num_params: scope.num_params,
            num_required_params,
            num_locals: fn_symtab.max_symbols(),
            variadic: scope.variadic,
            num_free: free_syms.len() as u32,
            max_stack_size: scope.max_stack.max(0) as u32,
            positions: scope.positions,
            name: scope.name,
        };
        let const_idx = self.add_constant(Value::CompiledFunction(Rc::new(compiled)), None);

        // Back in the enclosing scope: push one cell reference per captured
        // free variable, in the order `free_symbols()` assigned them.
        for fv in &free_syms {
            let original = fv.original.as_deref().expect("free symbols always record where they were captured from");
            match original.scope {
                Scope::Local => {
                    self.emit(Instruction::GetLocalPtr(original.index as u8));
                }
                Scope::Free => {
                    self.emit(Instruction::GetFreePtr(original.index as u8));
                }
                Scope::Global | Scope::Builtin => {
                    unreachable!("globals/builtins are never lifted into free variables")
                }
            };
        }
        self.emit(Instruction::Closure { const_idx, num_free: free_syms.len() as u8 });
    }

    fn compile_import(&mut self, name: &str, modules: &ModuleMap) {
        if let Some(&(const_idx, module_idx)) = self.compiled_modules.get(name) {
            self.emit(Instruction::LoadModule { const_idx, module_idx });
            return;
        }
        let module = match modules.get(name) {
            Some(m) => m,
            None => {
                self.error(format!("module '{name}' not found"));
                self.emit(Instruction::Null);
                return;
            }
        };
        let const_idx = match module {
            ModuleKind::Builtin(value) => self.add_constant(value.clone(), None),
            ModuleKind::Source(program) => {
                let top = SymbolTable::new_top();
                let compiled = self.compile_module_body(program, top, modules, Some(name.to_string()));
                self.add_constant(Value::CompiledFunction(Rc::new(compiled)), None)
            }
        };
        let module_idx = self.num_modules as u16;
        self.num_modules += 1;
        self.compiled_modules.insert(name.to_string(), (const_idx, module_idx));
        self.emit(Instruction::LoadModule { const_idx, module_idx });
    }
}

fn unary_op(op: UnaryOpKind) -> crate::value::ops::UnaryOp {
    use crate::value::ops::UnaryOp;
    match op {
        UnaryOpKind::Neg => UnaryOp::Neg,
        UnaryOpKind::Not => UnaryOp::Not,
        UnaryOpKind::BitNot => UnaryOp::BitNot,
        UnaryOpKind::Plus => UnaryOp::Plus,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::ModuleMap;
    use pretty_assertions::assert_eq;

    fn pos() -> SourcePos {
        SourcePos { line: 1, column: 1 }
    }

    fn wrap(e: Expr) -> Expr {
        Expr::Pos(Box::new(e), pos())
    }

    #[test]
    fn compiles_trivial_return() {
        let program = Program {
            body: vec![Stmt::Return(Some(wrap(Expr::Int(42))))],
        };
        let modules = ModuleMap::new();
        let bc = compile(&program, &modules, CompilerOptions::default()).expect("compiles");
        assert_eq!(bc.main.instructions.last(), Some(&Instruction::Return(1)));
        assert!(matches!(bc.constants[0], Value::Int(42)));
    }

    #[test]
    fn deduplicates_repeated_int_and_string_constants() {
        let program = Program {
            body: vec![
                Stmt::Expr(wrap(Expr::Int(7))),
                Stmt::Expr(wrap(Expr::Int(7))),
                Stmt::Expr(wrap(Expr::Str("hi".into()))),
                Stmt::Expr(wrap(Expr::Str("hi".into()))),
            ],
        };
        let modules = ModuleMap::new();
        let bc = compile(&program, &modules, CompilerOptions::default()).expect("compiles");
        assert_eq!(bc.constants.len(), 2);
    }

    #[test]
    fn undefined_identifier_is_a_compile_error() {
        let program = Program {
            body: vec![Stmt::Expr(wrap(Expr::Ident("nope".into())))],
        };
        let modules = ModuleMap::new();
        let err = compile(&program, &modules, CompilerOptions::default()).unwrap_err();
        assert_eq!(err.0.len(), 1);
        assert!(err.0[0].message.contains("nope"));
    }

    #[test]
    fn break_outside_loop_is_reported_once() {
        let program = Program { body: vec![Stmt::Break] };
        let modules = ModuleMap::new();
        let err = compile(&program, &modules, CompilerOptions::default()).unwrap_err();
        assert_eq!(err.0.len(), 1);
    }

    #[test]
    fn caps_errors_at_ten_with_a_count_suffix() {
        let body = (0..15)
            .map(|i| Stmt::Expr(wrap(Expr::Ident(format!("undef{i}")))))
            .collect();
        let program = Program { body };
        let modules = ModuleMap::new();
        let err = compile(&program, &modules, CompilerOptions::default()).unwrap_err();
        assert_eq!(err.0.len(), 10);
        assert!(err.0[9].message.contains("and 5 more errors"));
    }
}
