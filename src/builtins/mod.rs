//! The builtin function registry.
//!
//! Builtins are addressed by a small integer (`BuiltinId`), resolved by
//! name at compile time via `SymbolTable::define_builtin` and looked up by
//! the VM's `GetBuiltin`/`Call` opcodes at run time -- there is
//! deliberately no per-call name lookup in the hot path: builtins live in
//! a flat, index-addressed `Vec` rather than a name-keyed map.
//!
//! Every builtin here is a plain `fn`, not a closure, so the table below is
//! `'static` data with no construction cost; there is nothing to eagerly
//! initialize except the canonical error singletons (see
//! `canonical_error`), which are deliberately thread-local rather than a
//! process-wide `static` because `Rc` is not `Sync`.

use std::fmt;
use std::rc::Rc;

use ecow::EcoString;

use crate::value::error::{ErrorKind, ErrorObj};
use crate::value::ops;
use crate::value::Value;

/// Index into the fixed builtin table, resolved at compile time.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BuiltinId(pub u16);

impl fmt::Debug for BuiltinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", entry(*self).name)
    }
}

type BuiltinFn = fn(&[Value]) -> Result<Value, Rc<ErrorObj>>;

struct Entry {
    name: &'static str,
    func: BuiltinFn,
    /// Set for the error-constructor builtins (`TypeError`, ...): lets
    /// `isError(x, TypeError)` recognize which kind a constructor function
    /// value stands for without a second, parallel table at the call site.
    error_kind: Option<ErrorKind>,
}

macro_rules! entry {
    ($name:literal, $func:expr) => {
        Entry { name: $name, func: $func, error_kind: None }
    };
}

static TABLE: &[Entry] = &[
    entry!("append", b_append),
    entry!("delete", b_delete),
    entry!("copy", b_copy),
    entry!("repeat", b_repeat),
    entry!("contains", b_contains),
    entry!("len", b_len),
    entry!("sort", b_sort),
    entry!("sortReverse", b_sort_reverse),
    entry!("typeName", b_type_name),
    entry!("bool", b_bool),
    entry!("string", b_string),
    entry!("int", b_int),
    entry!("uint", b_uint),
    entry!("float", b_float),
    entry!("char", b_char),
    entry!("chars", b_chars),
    entry!("bytes", b_bytes),
    entry!("error", b_error),
    entry!("isInt", b_is_int),
    entry!("isUint", b_is_uint),
    entry!("isFloat", b_is_float),
    entry!("isChar", b_is_char),
    entry!("isBool", b_is_bool),
    entry!("isString", b_is_string),
    entry!("isBytes", b_is_bytes),
    entry!("isMap", b_is_map),
    entry!("isSyncMap", b_is_sync_map),
    entry!("isArray", b_is_array),
    entry!("isUndefined", b_is_undefined),
    entry!("isFunction", b_is_function),
    entry!("isCallable", b_is_callable),
    entry!("isIterable", b_is_iterable),
    entry!("isError", b_is_error),
    entry!("sprintf", b_sprintf),
    entry!("printf", b_printf),
    entry!("println", b_println),
    entry!("print", b_print),
    entry!(":makeArray", b_make_array),
    Entry { name: "TypeError", func: ctor_type, error_kind: Some(ErrorKind::Type) },
    Entry {
        name: "IndexOutOfBoundsError",
        func: ctor_index_out_of_bounds,
        error_kind: Some(ErrorKind::IndexOutOfBounds),
    },
    Entry {
        name: "InvalidIndexError",
        func: ctor_invalid_index,
        error_kind: Some(ErrorKind::InvalidIndex),
    },
    Entry {
        name: "InvalidOperatorError",
        func: ctor_invalid_operator,
        error_kind: Some(ErrorKind::InvalidOperator),
    },
    Entry { name: "NotCallableError", func: ctor_not_callable, error_kind: Some(ErrorKind::NotCallable) },
    Entry { name: "NotIndexableError", func: ctor_not_indexable, error_kind: Some(ErrorKind::NotIndexable) },
    Entry {
        name: "NotIndexAssignableError",
        func: ctor_not_index_assignable,
        error_kind: Some(ErrorKind::NotIndexAssignable),
    },
    Entry { name: "NotIterableError", func: ctor_not_iterable, error_kind: Some(ErrorKind::NotIterable) },
    Entry {
        name: "WrongNumberOfArgumentsError",
        func: ctor_wrong_number_of_arguments,
        error_kind: Some(ErrorKind::WrongNumberOfArguments),
    },
    Entry { name: "ZeroDivisionError", func: ctor_zero_division, error_kind: Some(ErrorKind::ZeroDivision) },
    Entry {
        name: "CircularImportError",
        func: ctor_circular_import,
        error_kind: Some(ErrorKind::CircularImport),
    },
];

/// Registers every builtin into `table` under `Scope::Builtin`, so
/// `resolve("append")` etc. succeed without the surface language needing an
/// explicit prelude. Called once per module top scope,
/// since every module compiles against its own fresh top-level
/// `SymbolTable`.
pub fn populate_symtab(table: &crate::symtab::SymbolTable) {
    for (i, e) in TABLE.iter().enumerate() {
        table.define_builtin(i as u32, e.name);
    }
}

pub fn lookup(name: &str) -> Option<BuiltinId> {
    TABLE.iter().position(|e| e.name == name).map(|i| BuiltinId(i as u16))
}

pub fn name(id: BuiltinId) -> &'static str {
    entry(id).name
}

pub fn call(id: BuiltinId, args: &[Value]) -> Result<Value, Rc<ErrorObj>> {
    (entry(id).func)(args)
}

/// The `ErrorKind` a constructor builtin (`TypeError`, ...) stands for, if
/// `id` is one; used by `isError(x, ctor)`.
pub fn error_kind_of(id: BuiltinId) -> Option<ErrorKind> {
    entry(id).error_kind
}

fn entry(id: BuiltinId) -> &'static Entry {
    &TABLE[id.0 as usize]
}

thread_local! {
    /// One canonical, singleton `ErrorObj` per `ErrorKind`, indexed by
    /// `ErrorKind`'s declaration order (see `ErrorKind::ALL`). Thread-local
    /// rather than a process-wide `static` because `Rc` is not `Sync`: each
    /// VM run is confined to a single thread, so a singleton
    /// per thread is exactly as canonical as the embedder needs.
    static CANONICAL_ERRORS: Vec<Rc<ErrorObj>> = ErrorKind::ALL
        .iter()
        .map(|&kind| {
            Rc::new(ErrorObj {
                name: kind.name().into(),
                message: kind.default_message().into(),
                cause: None,
                kind: Some(kind),
            })
        })
        .collect();
}

pub fn canonical_error(kind: ErrorKind) -> Rc<ErrorObj> {
    CANONICAL_ERRORS.with(|v| v[kind as usize].clone())
}

/// Builds a fresh, non-canonical error whose `cause` points at the
/// canonical singleton for `kind`, so `Value::matches_error_kind` can find
/// it after the error has propagated.
fn kind_error(kind: ErrorKind, message: impl Into<EcoString>) -> Rc<ErrorObj> {
    Rc::new(ErrorObj {
        name: kind.name().into(),
        message: message.into(),
        cause: Some(Value::Error(canonical_error(kind))),
        kind: None,
    })
}

/// Wraps a [`ops::OpError`] raised by the value layer (indexing,
/// arithmetic, iteration, ...) the same way a builtin's own failures are
/// wrapped, so `vm::exec` has one consistent way to turn either kind of
/// failure into a thrown value.
pub fn wrap_op_error(e: ops::OpError) -> Rc<ErrorObj> {
    kind_error(e.kind, e.message)
}

fn wrong_args(want: &str, got: usize) -> Rc<ErrorObj> {
    kind_error(
        ErrorKind::WrongNumberOfArguments,
        format!("expected {want} argument(s), got {got}"),
    )
}

fn type_error(expected: &str, got: &Value) -> Rc<ErrorObj> {
    kind_error(ErrorKind::Type, format!("expected {expected}, got {}", got.type_name()))
}

// ---- collections ----

fn b_append(args: &[Value]) -> Result<Value, Rc<ErrorObj>> {
    let [arr, rest @ ..] = args else {
        return Err(wrong_args("1 or more", args.len()));
    };
    match arr {
        Value::Array(a) => {
            a.borrow_mut().extend(rest.iter().cloned());
            Ok(arr.clone())
        }
        other => Err(type_error("array", other)),
    }
}

fn b_delete(args: &[Value]) -> Result<Value, Rc<ErrorObj>> {
    let [target, key] = args else { return Err(wrong_args("2", args.len())) };
    match target {
        Value::Map(m) => {
            let k = require_str(key)?;
            m.borrow_mut().remove(k);
            Ok(Value::Undefined)
        }
        Value::SyncMap(m) => {
            let k = require_str(key)?;
            m.write().unwrap().remove(k);
            Ok(Value::Undefined)
        }
        other => Err(type_error("map", other)),
    }
}

fn b_copy(args: &[Value]) -> Result<Value, Rc<ErrorObj>> {
    let [v] = args else { return Err(wrong_args("1", args.len())) };
    Ok(match v {
        Value::Array(a) => Value::array(a.borrow().clone()),
        Value::Map(m) => Value::map(m.borrow().clone()),
        Value::Bytes(b) => Value::bytes(b.borrow().clone()),
        other => other.clone(),
    })
}

fn b_repeat(args: &[Value]) -> Result<Value, Rc<ErrorObj>> {
    let [v, n] = args else { return Err(wrong_args("2", args.len())) };
    let n = require_usize(n)?;
    match v {
        Value::String(s) => Ok(Value::String(s.repeat(n).into())),
        Value::Array(a) => {
            let a = a.borrow();
            let mut out = Vec::with_capacity(a.len() * n);
            for _ in 0..n {
                out.extend(a.iter().cloned());
            }
            Ok(Value::array(out))
        }
        Value::Bytes(b) => Ok(Value::bytes(b.borrow().repeat(n))),
        other => Err(type_error("string, array, or bytes", other)),
    }
}

/// `:makeArray(n, rhs)` -- tuple destructuring's hidden helper. Normalizes `rhs` to exactly `n` elements:
/// a shorter array is padded with `Undefined`, a longer one is truncated,
/// and a non-array value is treated as a single-element array (padded
/// the same way) so `a, b := 1` destructures to `a = 1, b = Undefined`
/// rather than raising a type error.
fn b_make_array(args: &[Value]) -> Result<Value, Rc<ErrorObj>> {
    let [n, rhs] = args else { return Err(wrong_args("2", args.len())) };
    let n = require_usize(n)?;
    let mut out = match rhs {
        Value::Array(a) => a.borrow().clone(),
        other => vec![other.clone()],
    };
    out.resize(n, Value::Undefined);
    Ok(Value::array(out))
}

fn b_contains(args: &[Value]) -> Result<Value, Rc<ErrorObj>> {
    let [haystack, needle] = args else { return Err(wrong_args("2", args.len())) };
    let found = match haystack {
        Value::Array(a) => a.borrow().iter().any(|v| ops::equals(v, needle)),
        Value::Map(m) => require_str(needle).is_ok_and(|k| m.borrow().contains_key(k)),
        Value::SyncMap(m) => require_str(needle).is_ok_and(|k| m.read().unwrap().contains_key(k)),
        Value::String(s) => match needle {
            Value::String(sub) => s.contains(sub.as_str()),
            Value::Char(c) => s.contains(*c),
            other => return Err(type_error("string or char", other)),
        },
        other => return Err(type_error("array, map, or string", other)),
    };
    Ok(Value::Bool(found))
}

fn b_len(args: &[Value]) -> Result<Value, Rc<ErrorObj>> {
    let [v] = args else { return Err(wrong_args("1", args.len())) };
    let n = match v {
        Value::String(s) => s.chars().count(),
        Value::Bytes(b) => b.borrow().len(),
        Value::Array(a) => a.borrow().len(),
        Value::Map(m) => m.borrow().len(),
        Value::SyncMap(m) => m.read().unwrap().len(),
        other => return Err(type_error("string, bytes, array, map, or syncMap", other)),
    };
    Ok(Value::Int(n as i64))
}

fn b_sort(args: &[Value]) -> Result<Value, Rc<ErrorObj>> {
    sort_impl(args, false)
}

fn b_sort_reverse(args: &[Value]) -> Result<Value, Rc<ErrorObj>> {
    sort_impl(args, true)
}

fn sort_impl(args: &[Value], reverse: bool) -> Result<Value, Rc<ErrorObj>> {
    let [v] = args else { return Err(wrong_args("1", args.len())) };
    match v {
        Value::Array(a) => {
            let mut items = a.borrow().clone();
            items.sort_by(|x, y| compare(x, y));
            if reverse {
                items.reverse();
            }
            Ok(Value::array(items))
        }
        other => Err(type_error("array", other)),
    }
}

fn compare(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    if ops::binary(ops::BinOp::Lt, a, b).map(|v| v.is_truthy()).unwrap_or(false) {
        Ordering::Less
    } else if ops::equals(a, b) {
        Ordering::Equal
    } else {
        Ordering::Greater
    }
}

// ---- type introspection ----

fn b_type_name(args: &[Value]) -> Result<Value, Rc<ErrorObj>> {
    let [v] = args else { return Err(wrong_args("1", args.len())) };
    Ok(Value::string(v.type_name()))
}

macro_rules! is_builtin {
    ($fname:ident, $pat:pat) => {
        fn $fname(args: &[Value]) -> Result<Value, Rc<ErrorObj>> {
            let [v] = args else { return Err(wrong_args("1", args.len())) };
            Ok(Value::Bool(matches!(v, $pat)))
        }
    };
}

is_builtin!(b_is_int, Value::Int(_));
is_builtin!(b_is_uint, Value::Uint(_));
is_builtin!(b_is_float, Value::Float(_));
is_builtin!(b_is_char, Value::Char(_));
is_builtin!(b_is_bool, Value::Bool(_));
is_builtin!(b_is_string, Value::String(_));
is_builtin!(b_is_bytes, Value::Bytes(_));
is_builtin!(b_is_map, Value::Map(_));
is_builtin!(b_is_sync_map, Value::SyncMap(_));
is_builtin!(b_is_array, Value::Array(_));
is_builtin!(b_is_undefined, Value::Undefined);
is_builtin!(b_is_function, Value::Function(_) | Value::CompiledFunction(_) | Value::Closure(_) | Value::BuiltinFunction(_));

fn b_is_callable(args: &[Value]) -> Result<Value, Rc<ErrorObj>> {
    let [v] = args else { return Err(wrong_args("1", args.len())) };
    Ok(Value::Bool(v.can_call()))
}

fn b_is_iterable(args: &[Value]) -> Result<Value, Rc<ErrorObj>> {
    let [v] = args else { return Err(wrong_args("1", args.len())) };
    Ok(Value::Bool(v.can_iterate()))
}

fn b_is_error(args: &[Value]) -> Result<Value, Rc<ErrorObj>> {
    match args {
        [v] => Ok(Value::Bool(matches!(v, Value::Error(_) | Value::RuntimeError(_)))),
        [v, ctor] => {
            let Value::BuiltinFunction(id) = ctor else {
                return Err(type_error("an error constructor", ctor));
            };
            let Some(kind) = error_kind_of(*id) else {
                return Err(type_error("an error constructor", ctor));
            };
            Ok(Value::Bool(v.matches_error_kind(kind)))
        }
        _ => Err(wrong_args("1 or 2", args.len())),
    }
}

// ---- conversions ----

fn b_bool(args: &[Value]) -> Result<Value, Rc<ErrorObj>> {
    let [v] = args else { return Err(wrong_args("1", args.len())) };
    Ok(Value::Bool(v.is_truthy()))
}

/// The `string(v)` conversion, also reused by `vm::exec` to
/// build a `throw <expr>` UserError's message.
pub(crate) fn display(v: &Value) -> String {
    v.to_string()
}

fn b_string(args: &[Value]) -> Result<Value, Rc<ErrorObj>> {
    let [v] = args else { return Err(wrong_args("1", args.len())) };
    Ok(Value::string(display(v)))
}

fn b_int(args: &[Value]) -> Result<Value, Rc<ErrorObj>> {
    let [v] = args else { return Err(wrong_args("1", args.len())) };
    let i = match v {
        Value::Int(i) => *i,
        Value::Uint(u) => *u as i64,
        Value::Float(f) => *f as i64,
        Value::Bool(b) => *b as i64,
        Value::Char(c) => *c as i64,
        Value::String(s) => s.trim().parse().map_err(|_| type_error("a numeric string", v))?,
        other => return Err(type_error("a number, bool, char, or string", other)),
    };
    Ok(Value::Int(i))
}

fn b_uint(args: &[Value]) -> Result<Value, Rc<ErrorObj>> {
    let [v] = args else { return Err(wrong_args("1", args.len())) };
    let u = match v {
        Value::Int(i) => *i as u64,
        Value::Uint(u) => *u,
        Value::Float(f) => *f as u64,
        Value::Bool(b) => *b as u64,
        Value::Char(c) => *c as u64,
        Value::String(s) => s.trim().parse().map_err(|_| type_error("a numeric string", v))?,
        other => return Err(type_error("a number, bool, char, or string", other)),
    };
    Ok(Value::Uint(u))
}

fn b_float(args: &[Value]) -> Result<Value, Rc<ErrorObj>> {
    let [v] = args else { return Err(wrong_args("1", args.len())) };
    let f = match v {
        Value::Int(i) => *i as f64,
        Value::Uint(u) => *u as f64,
        Value::Float(f) => *f,
        Value::Bool(b) => (*b as i64) as f64,
        Value::Char(c) => (*c as u32) as f64,
        Value::String(s) => s.trim().parse().map_err(|_| type_error("a numeric string", v))?,
        other => return Err(type_error("a number, bool, char, or string", other)),
    };
    Ok(Value::Float(f))
}

fn b_char(args: &[Value]) -> Result<Value, Rc<ErrorObj>> {
    let [v] = args else { return Err(wrong_args("1", args.len())) };
    let c = match v {
        Value::Char(c) => *c,
        Value::Int(i) => u32::try_from(*i).ok().and_then(char::from_u32).ok_or_else(|| type_error("a valid codepoint", v))?,
        Value::Uint(u) => u32::try_from(*u).ok().and_then(char::from_u32).ok_or_else(|| type_error("a valid codepoint", v))?,
        Value::String(s) if s.chars().count() == 1 => s.chars().next().expect("checked count"),
        other => return Err(type_error("a char, codepoint, or single-character string", other)),
    };
    Ok(Value::Char(c))
}

fn b_chars(args: &[Value]) -> Result<Value, Rc<ErrorObj>> {
    let [v] = args else { return Err(wrong_args("1", args.len())) };
    match v {
        Value::String(s) => Ok(Value::array(s.chars().map(Value::Char).collect())),
        other => Err(type_error("a string", other)),
    }
}

fn b_bytes(args: &[Value]) -> Result<Value, Rc<ErrorObj>> {
    let [v] = args else { return Err(wrong_args("1", args.len())) };
    match v {
        Value::Bytes(b) => Ok(Value::bytes(b.borrow().clone())),
        Value::String(s) => Ok(Value::bytes(s.as_bytes().to_vec())),
        Value::Array(a) => {
            let mut out = Vec::with_capacity(a.borrow().len());
            for item in a.borrow().iter() {
                out.push(require_byte(item)?);
            }
            Ok(Value::bytes(out))
        }
        other => Err(type_error("bytes, a string, or an array of byte values", other)),
    }
}

fn b_error(args: &[Value]) -> Result<Value, Rc<ErrorObj>> {
    let [name, message] = args else { return Err(wrong_args("2", args.len())) };
    let name = require_str(name)?;
    let message = require_str(message)?;
    Ok(Value::error(name, message))
}

// ---- formatting ----

fn b_sprintf(args: &[Value]) -> Result<Value, Rc<ErrorObj>> {
    let [format, rest @ ..] = args else {
        return Err(wrong_args("1 or more", args.len()));
    };
    let format = require_str(format)?;
    Ok(Value::string(sprintf(format, rest)?))
}

fn b_printf(args: &[Value]) -> Result<Value, Rc<ErrorObj>> {
    let [format, rest @ ..] = args else {
        return Err(wrong_args("1 or more", args.len()));
    };
    let format = require_str(format)?;
    print!("{}", sprintf(format, rest)?);
    Ok(Value::Undefined)
}

fn b_println(args: &[Value]) -> Result<Value, Rc<ErrorObj>> {
    let parts: Vec<String> = args.iter().map(display).collect();
    println!("{}", parts.join(" "));
    Ok(Value::Undefined)
}

fn b_print(args: &[Value]) -> Result<Value, Rc<ErrorObj>> {
    let parts: Vec<String> = args.iter().map(display).collect();
    print!("{}", parts.join(" "));
    Ok(Value::Undefined)
}

/// The `%d %s %f %v %t %%` format mini-language.
fn sprintf(format: &str, args: &[Value]) -> Result<String, Rc<ErrorObj>> {
    let mut out = String::new();
    let mut chars = format.chars();
    let mut next_arg = 0usize;
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let Some(verb) = chars.next() else {
            return Err(kind_error(ErrorKind::Type, "sprintf: trailing '%'"));
        };
        if verb == '%' {
            out.push('%');
            continue;
        }
        let arg = args
            .get(next_arg)
            .ok_or_else(|| kind_error(ErrorKind::WrongNumberOfArguments, "sprintf: not enough arguments for format string"))?;
        next_arg += 1;
        match verb {
            'd' => out.push_str(&format_int(arg)?),
            's' => out.push_str(&display(arg)),
            'f' => out.push_str(&format_float(arg)?.to_string()),
            'v' => out.push_str(&format!("{arg:?}")),
            't' => out.push_str(if arg.is_truthy() { "true" } else { "false" }),
            other => return Err(kind_error(ErrorKind::Type, format!("sprintf: unknown verb '%{other}'"))),
        }
    }
    Ok(out)
}

fn format_int(v: &Value) -> Result<String, Rc<ErrorObj>> {
    match v {
        Value::Int(i) => Ok(i.to_string()),
        Value::Uint(u) => Ok(u.to_string()),
        Value::Float(f) => Ok((*f as i64).to_string()),
        other => Err(type_error("a number for %d", other)),
    }
}

fn format_float(v: &Value) -> Result<f64, Rc<ErrorObj>> {
    match v {
        Value::Float(f) => Ok(*f),
        Value::Int(i) => Ok(*i as f64),
        Value::Uint(u) => Ok(*u as f64),
        other => Err(type_error("a number for %f", other)),
    }
}

// ---- error constructors ----

fn ctor(kind: ErrorKind, args: &[Value]) -> Result<Value, Rc<ErrorObj>> {
    let message = match args {
        [] => kind.default_message().to_string(),
        [Value::String(s)] => s.to_string(),
        [other] => return Err(type_error("a string message", other)),
        _ => return Err(wrong_args("0 or 1", args.len())),
    };
    Ok(Value::Error(kind_error(kind, message)))
}

fn ctor_type(a: &[Value]) -> Result<Value, Rc<ErrorObj>> {
    ctor(ErrorKind::Type, a)
}
fn ctor_index_out_of_bounds(a: &[Value]) -> Result<Value, Rc<ErrorObj>> {
    ctor(ErrorKind::IndexOutOfBounds, a)
}
fn ctor_invalid_index(a: &[Value]) -> Result<Value, Rc<ErrorObj>> {
    ctor(ErrorKind::InvalidIndex, a)
}
fn ctor_invalid_operator(a: &[Value]) -> Result<Value, Rc<ErrorObj>> {
    ctor(ErrorKind::InvalidOperator, a)
}
fn ctor_not_callable(a: &[Value]) -> Result<Value, Rc<ErrorObj>> {
    ctor(ErrorKind::NotCallable, a)
}
fn ctor_not_indexable(a: &[Value]) -> Result<Value, Rc<ErrorObj>> {
    ctor(ErrorKind::NotIndexable, a)
}
fn ctor_not_index_assignable(a: &[Value]) -> Result<Value, Rc<ErrorObj>> {
    ctor(ErrorKind::NotIndexAssignable, a)
}
fn ctor_not_iterable(a: &[Value]) -> Result<Value, Rc<ErrorObj>> {
    ctor(ErrorKind::NotIterable, a)
}
fn ctor_wrong_number_of_arguments(a: &[Value]) -> Result<Value, Rc<ErrorObj>> {
    ctor(ErrorKind::WrongNumberOfArguments, a)
}
fn ctor_zero_division(a: &[Value]) -> Result<Value, Rc<ErrorObj>> {
    ctor(ErrorKind::ZeroDivision, a)
}
fn ctor_circular_import(a: &[Value]) -> Result<Value, Rc<ErrorObj>> {
    ctor(ErrorKind::CircularImport, a)
}

// ---- small arg-coercion helpers shared by several builtins ----

fn require_str(v: &Value) -> Result<&str, Rc<ErrorObj>> {
    match v {
        Value::String(s) => Ok(s.as_str()),
        other => Err(type_error("a string", other)),
    }
}

fn require_usize(v: &Value) -> Result<usize, Rc<ErrorObj>> {
    match v {
        Value::Int(i) if *i >= 0 => Ok(*i as usize),
        Value::Uint(u) => Ok(*u as usize),
        other => Err(type_error("a non-negative integer", other)),
    }
}

fn require_byte(v: &Value) -> Result<u8, Rc<ErrorObj>> {
    match v {
        Value::Int(i) if (0..=255).contains(i) => Ok(*i as u8),
        other => Err(type_error("a byte value (0-255)", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn append_mutates_in_place_and_returns_same_array() {
        let arr = Value::array(vec![Value::Int(1)]);
        let result = b_append(&[arr.clone(), Value::Int(2), Value::Int(3)]).unwrap();
        let Value::Array(a) = &result else { panic!("expected array") };
        assert_eq!(a.borrow().len(), 3);
        let Value::Array(orig) = &arr else { panic!() };
        assert!(Rc::ptr_eq(a, orig));
    }

    #[test]
    fn sprintf_handles_every_verb() {
        let out = sprintf("%d-%s-%f-%t-%%-%v", &[
            Value::Int(3),
            Value::string("x"),
            Value::Float(1.5),
            Value::Bool(true),
            Value::Int(9),
        ])
        .unwrap();
        assert_eq!(out, "3-x-1.5-true-%-9");
    }

    #[test]
    fn is_error_matches_via_constructor_identity() {
        let id = lookup("TypeError").unwrap();
        let e = ctor_type(&[]).unwrap();
        let result = b_is_error(&[e, Value::BuiltinFunction(id)]).unwrap();
        assert!(matches!(result, Value::Bool(true)));
        let wrong_id = lookup("ZeroDivisionError").unwrap();
        let e2 = ctor_type(&[]).unwrap();
        let result2 = b_is_error(&[e2, Value::BuiltinFunction(wrong_id)]).unwrap();
        assert!(matches!(result2, Value::Bool(false)));
    }

    #[test]
    fn int_conversion_parses_and_truncates() {
        assert!(matches!(b_int(&[Value::Float(3.9)]).unwrap(), Value::Int(3)));
        assert!(matches!(b_int(&[Value::string("42")]).unwrap(), Value::Int(42)));
        assert!(b_int(&[Value::string("nope")]).is_err());
    }
}
