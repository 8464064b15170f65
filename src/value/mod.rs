//! The dynamic value model.
//!
//! Every runtime value the VM ever touches is a [`Value`]. Value-typed
//! variants (`Undefined`, `Bool`, `Int`, `Uint`, `Float`, `Char`, `String`)
//! are immutable and cheap to clone; reference-typed variants (`Array`,
//! `Map`, `SyncMap`, closures, cells, errors) share their interior via
//! `Rc`/`Arc` so that mutation through one handle is visible through all
//! others, matching the aliasing the surface language exposes.
//!
//! We use reference counting rather than a tracing collector: script
//! lifetimes are scoped to a single `VM::run`, and cycles can only arise
//! if user code stores a container inside itself. Cycle *creation* is not
//! prevented; cycle *collection* is not attempted. See `array_contains_self`
//! style guards in [`ops`] for the one place this matters operationally
//! (equality/iteration must not infinite-loop on such values, though the
//! memory itself is allowed to leak).

pub mod error;
pub mod iter;
pub mod ops;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::{Arc, RwLock};

use ecow::EcoString;
use hashbrown::HashMap;

pub use error::{ErrorKind, ErrorObj, RuntimeErrorObj, SourcePos};
pub use iter::ValueIter;

use crate::builtins::BuiltinId;
use crate::bytecode::CompiledFunction;

/// An ordered, insertion-order-preserving string map.
///
/// `hashbrown::HashMap` does not preserve insertion order; the data model
/// only promises *unspecified* iteration order for `Map`, so a plain
/// hashbrown map is sufficient and faster than carrying an auxiliary
/// insertion vector.
pub type MapData = HashMap<EcoString, Value>;

/// A host-implemented callable, addressable by name.
pub struct HostFunction {
    pub name: EcoString,
    #[allow(clippy::type_complexity)]
    pub func: Box<dyn Fn(&[Value]) -> Result<Value, Rc<ErrorObj>>>,
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction").field("name", &self.name).finish()
    }
}

/// A heap-allocated mutable cell.
///
/// Used to lift a captured local out of its stack frame so a closure can
/// keep reading/writing it after the frame that declared it returns. See
/// `OpGetLocalPtr` in the instruction set.
pub type ObjectPtr = Rc<RefCell<Value>>;

/// A compiled function plus its captured free-variable cells.
#[derive(Debug)]
pub struct ClosureObj {
    pub function: Rc<CompiledFunction>,
    pub free: Vec<ObjectPtr>,
}

/// The tagged sum of every runtime value.
#[derive(Clone)]
pub enum Value {
    Undefined,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    Char(char),
    String(EcoString),
    Bytes(Rc<RefCell<Vec<u8>>>),
    Array(Rc<RefCell<Vec<Value>>>),
    Map(Rc<RefCell<MapData>>),
    /// Shared across VM instances/threads; guarded by a reader-writer lock.
    ///
    /// Embedders who share a `SyncMap` across real OS threads must restrict
    /// the values stored in it to the `Send + Sync` variants (the
    /// value-typed ones); see the module-level note on `Value`'s lack of a
    /// blanket `Send` impl in `DESIGN.md`.
    SyncMap(Arc<RwLock<MapData>>),
    CompiledFunction(Rc<CompiledFunction>),
    Closure(Rc<ClosureObj>),
    Function(Rc<HostFunction>),
    BuiltinFunction(BuiltinId),
    Error(Rc<ErrorObj>),
    RuntimeError(Rc<RuntimeErrorObj>),
    ObjectPtr(ObjectPtr),
    /// Produced by `OpIterInit`; not reachable from surface-language
    /// expressions, only ever lives transiently on the operand stack.
    Iterator(Rc<RefCell<ValueIter>>),
}

impl Value {
    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn map(entries: MapData) -> Value {
        Value::Map(Rc::new(RefCell::new(entries)))
    }

    pub fn bytes(data: Vec<u8>) -> Value {
        Value::Bytes(Rc::new(RefCell::new(data)))
    }

    pub fn string(s: impl Into<EcoString>) -> Value {
        Value::String(s.into())
    }

    pub fn error(name: impl Into<EcoString>, message: impl Into<EcoString>) -> Value {
        Value::Error(Rc::new(ErrorObj {
            name: name.into(),
            message: message.into(),
            cause: None,
            kind: None,
        }))
    }

    /// The name the `typeName` builtin reports.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Uint(_) => "uint",
            Value::Float(_) => "float",
            Value::Char(_) => "char",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::SyncMap(_) => "syncMap",
            Value::CompiledFunction(_) => "compiledFunction",
            Value::Closure(_) => "closure",
            Value::Function(_) => "function",
            Value::BuiltinFunction(_) => "builtinFunction",
            Value::Error(_) => "error",
            Value::RuntimeError(_) => "error",
            Value::ObjectPtr(_) => "objectPtr",
            Value::Iterator(_) => "iterator",
        }
    }

    /// Boolean coercion used by conditionals and `&&`/`||`.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Uint(u) => *u != 0,
            Value::Float(f) => *f != 0.0,
            Value::Char(c) => *c != '\0',
            Value::String(s) => !s.is_empty(),
            Value::Bytes(b) => !b.borrow().is_empty(),
            Value::Array(a) => !a.borrow().is_empty(),
            Value::Map(m) => !m.borrow().is_empty(),
            Value::SyncMap(m) => !m.read().unwrap().is_empty(),
            _ => true,
        }
    }

    pub fn can_call(&self) -> bool {
        matches!(
            self,
            Value::Function(_) | Value::BuiltinFunction(_) | Value::CompiledFunction(_) | Value::Closure(_)
        )
    }

    pub fn can_iterate(&self) -> bool {
        matches!(
            self,
            Value::Array(_) | Value::Map(_) | Value::SyncMap(_) | Value::String(_) | Value::Bytes(_)
        )
    }

    /// Walk a thrown error's `cause` chain looking for a canonical error
    /// matching `kind`, as `isError(x, Kind)` does.
    pub fn matches_error_kind(&self, kind: ErrorKind) -> bool {
        let mut current: Option<Rc<ErrorObj>> = match self {
            Value::Error(e) => Some(e.clone()),
            Value::RuntimeError(e) => Some(e.error.clone()),
            _ => None,
        };
        while let Some(e) = current {
            if e.kind == Some(kind) {
                return true;
            }
            current = match &e.cause {
                Some(Value::Error(inner)) => Some(inner.clone()),
                Some(Value::RuntimeError(inner)) => Some(inner.error.clone()),
                _ => None,
            };
        }
        false
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Uint(u) => write!(f, "{u}u"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Char(c) => write!(f, "{c:?}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Bytes(b) => write!(f, "bytes({})", b.borrow().len()),
            Value::Array(a) => write!(f, "{:?}", a.borrow()),
            Value::Map(m) => write!(f, "{:?}", m.borrow()),
            Value::SyncMap(_) => write!(f, "syncMap(..)"),
            Value::CompiledFunction(_) => write!(f, "compiledFunction(..)"),
            Value::Closure(_) => write!(f, "closure(..)"),
            Value::Function(func) => write!(f, "function({})", func.name),
            Value::BuiltinFunction(id) => write!(f, "builtin({id:?})"),
            Value::Error(e) => write!(f, "error: {} ({})", e.name, e.message),
            Value::RuntimeError(e) => write!(f, "error: {} ({})", e.error.name, e.error.message),
            Value::ObjectPtr(p) => write!(f, "&{:?}", p.borrow()),
            Value::Iterator(_) => write!(f, "iterator(..)"),
        }
    }
}

/// Human-readable rendering: the form `string(v)` and string concatenation
/// produce, as opposed to `Debug`'s type-tagged/quoted one (`5u`, `'a'`,
/// `"x"`).
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Uint(u) => write!(f, "{u}"),
            Value::Char(c) => write!(f, "{c}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Array(a) => {
                write!(f, "[")?;
                for (i, v) in a.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Value::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            other => write!(f, "{other:?}"),
        }
    }
}
