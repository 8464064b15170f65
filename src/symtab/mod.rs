//! Lexical scope tracking and free-variable resolution.
//!
//! Block scopes and function scopes are both represented as nodes in a
//! tree of [`SymbolTable`]s, distinguished by `kind`. A block delegates
//! local-slot allocation to its nearest enclosing function scope (so two
//! sibling blocks may reuse the same slot index when neither captures
//! it); only a function-scope boundary triggers free-variable capture.

use std::cell::RefCell;
use std::rc::Rc;

use hashbrown::HashMap;

/// Where a resolved name lives at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Global,
    Local,
    Builtin,
    Free,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub index: u32,
    pub scope: Scope,
    pub assigned: bool,
    pub constant: bool,
    /// For `Scope::Free` symbols: the symbol in the *immediately*
    /// enclosing scope this one was captured from (a `Local` or another
    /// `Free`), used by the compiler to decide between emitting
    /// `GetLocalPtr`/`GetFreePtr` when building the closure.
    pub original: Option<Box<Symbol>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Block,
    Function,
}

#[derive(Debug)]
pub struct SymbolTableError(pub String);

impl core::fmt::Display for SymbolTableError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Inner {
    outer: Option<SymbolTable>,
    kind: Kind,
    store: HashMap<String, Symbol>,
    /// Next local slot to allocate. Shared with the enclosing function
    /// scope's counter for block scopes (see `new_block`).
    num_definitions: Rc<RefCell<u32>>,
    free_symbols: Vec<Symbol>,
    params_set: bool,
    /// Whether this table is the module's outermost scope.
    is_top_scope: bool,
}

/// A cheaply-clonable handle onto a node in the scope tree.
#[derive(Clone)]
pub struct SymbolTable(Rc<RefCell<Inner>>);

impl SymbolTable {
    /// The outermost scope of a module (`param`/`global` legal here).
    pub fn new_top() -> SymbolTable {
        SymbolTable(Rc::new(RefCell::new(Inner {
            outer: None,
            kind: Kind::Function,
            store: HashMap::new(),
            num_definitions: Rc::new(RefCell::new(0)),
            free_symbols: Vec::new(),
            params_set: false,
            is_top_scope: true,
        })))
    }

    /// A fresh function scope (new local-slot space, eligible for closure
    /// free-variable capture).
    pub fn new_function_scope(&self) -> SymbolTable {
        SymbolTable(Rc::new(RefCell::new(Inner {
            outer: Some(self.clone()),
            kind: Kind::Function,
            store: HashMap::new(),
            num_definitions: Rc::new(RefCell::new(0)),
            free_symbols: Vec::new(),
            params_set: false,
            is_top_scope: false,
        })))
    }

    /// A block scope nested in `self`: shares local-slot numbering with
    /// the nearest enclosing function scope.
    pub fn new_block_scope(&self) -> SymbolTable {
        let shared_counter = self.0.borrow().num_definitions.clone();
        SymbolTable(Rc::new(RefCell::new(Inner {
            outer: Some(self.clone()),
            kind: Kind::Block,
            store: HashMap::new(),
            num_definitions: shared_counter,
            free_symbols: Vec::new(),
            params_set: false,
            is_top_scope: false,
        })))
    }

    pub fn is_top_scope(&self) -> bool {
        self.0.borrow().is_top_scope
    }

    /// `DefineLocal(name)`. Redefinition within the same block is an error.
    pub fn define_local(&self, name: &str) -> Result<Symbol, SymbolTableError> {
        self.define_local_kind(name, false)
    }

    /// As `define_local`, but marks the symbol `const` (a `var`/`:=` target
    /// never is). Constness here is advisory bookkeeping only: nothing in
    /// `symtab` itself rejects a later assignment to a `const` local, since
    /// this crate has no separate static-checking pass to run
    /// before compilation; `compiler::lower` is what would consult it.
    pub fn define_const_local(&self, name: &str) -> Result<Symbol, SymbolTableError> {
        self.define_local_kind(name, true)
    }

    fn define_local_kind(&self, name: &str, constant: bool) -> Result<Symbol, SymbolTableError> {
        let mut inner = self.0.borrow_mut();
        if inner.store.contains_key(name) {
            return Err(SymbolTableError(format!("redeclared variable '{name}'")));
        }
        let index = {
            let mut counter = inner.num_definitions.borrow_mut();
            let idx = *counter;
            *counter += 1;
            idx
        };
        let sym = Symbol {
            name: name.to_string(),
            index,
            scope: Scope::Local,
            assigned: true,
            constant,
            original: None,
        };
        inner.store.insert(name.to_string(), sym.clone());
        Ok(sym)
    }

    /// `DefineGlobal(name)`, permitted only at the module top scope.
    /// Globals allocate no runtime slot; they are keyed by name, so the
    /// "index" here is only used to order/deduplicate declarations.
    pub fn define_global(&self, name: &str, constant: bool) -> Result<Symbol, SymbolTableError> {
        if !self.is_top_scope() {
            return Err(SymbolTableError(
                "global declarations are only allowed at the top scope".into(),
            ));
        }
        let mut inner = self.0.borrow_mut();
        if inner.store.contains_key(name) {
            return Err(SymbolTableError(format!("redeclared variable '{name}'")));
        }
        let index = inner.store.len() as u32;
        let sym = Symbol {
            name: name.to_string(),
            index,
            scope: Scope::Global,
            assigned: false,
            constant,
            original: None,
        };
        inner.store.insert(name.to_string(), sym.clone());
        Ok(sym)
    }

    /// Registers a builtin so `resolve` can find it; does not allocate a
    /// runtime slot (builtins are addressed by the fixed registry index).
    pub fn define_builtin(&self, index: u32, name: &str) -> Symbol {
        let mut inner = self.0.borrow_mut();
        let sym = Symbol {
            name: name.to_string(),
            index,
            scope: Scope::Builtin,
            assigned: true,
            constant: true,
            original: None,
        };
        inner.store.insert(name.to_string(), sym.clone());
        sym
    }

    /// `SetParams(names…)`: allocates one local per parameter. May be
    /// called at most once per function scope; the caller is responsible
    /// for ensuring only the last parameter is variadic.
    pub fn set_params(&self, names: &[&str]) -> Result<Vec<Symbol>, SymbolTableError> {
        let mut inner = self.0.borrow_mut();
        if inner.params_set {
            return Err(SymbolTableError("SetParams called more than once".into()));
        }
        inner.params_set = true;
        drop(inner);
        names.iter().map(|n| self.define_local(n)).collect()
    }

    /// `Resolve(name)`: walk outward until found, lifting captured locals
    /// into free variables along the way.
    pub fn resolve(&self, name: &str) -> Option<Symbol> {
        if let Some(sym) = self.0.borrow().store.get(name).cloned() {
            return Some(sym);
        }
        let outer = self.0.borrow().outer.clone()?;
        let found = outer.resolve(name)?;

        if matches!(found.scope, Scope::Global | Scope::Builtin) {
            // No capture needed: globals/builtins are reachable from any depth.
            return Some(found);
        }

        let crossed_function_boundary = self.0.borrow().kind == Kind::Function;
        if !crossed_function_boundary {
            // A block scope simply re-exposes whatever its enclosing
            // function scope sees; no new Free symbol is minted here.
            return Some(found);
        }

        // `found` is Local or Free in a genuinely enclosing function: lift it.
        Some(self.define_free(found))
    }

    fn define_free(&self, original: Symbol) -> Symbol {
        let mut inner = self.0.borrow_mut();
        let index = inner.free_symbols.len() as u32;
        let name = original.name.clone();
        inner.free_symbols.push(original.clone());
        let sym = Symbol {
            name: name.clone(),
            index,
            scope: Scope::Free,
            assigned: true,
            constant: original.constant,
            original: Some(Box::new(original)),
        };
        inner.store.insert(name, sym.clone());
        sym
    }

    /// Total locals used by the enclosing function, for frame sizing.
    pub fn max_symbols(&self) -> u32 {
        *self.0.borrow().num_definitions.borrow()
    }

    /// Ordered list of free variables captured by this function scope, for
    /// `OpClosure` construction.
    pub fn free_symbols(&self) -> Vec<Symbol> {
        self.0.borrow().free_symbols.clone()
    }
}
