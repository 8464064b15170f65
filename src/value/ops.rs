//! Binary/unary operators, equality, indexing and slicing.

use std::rc::Rc;

use ecow::EcoString;

use crate::value::error::ErrorKind;
use crate::value::{MapData, Value};

/// A typed-operation failure, not yet wrapped into a thrown `Value`.
///
/// Kept separate from `Value::Error` so pure value-model code (this
/// module) never has to allocate an `Rc<ErrorObj>` just to fail; the VM
/// (which already knows the current call-site trace) does that wrapping
/// once, in `vm::exec`.
#[derive(Debug)]
pub struct OpError {
    pub kind: ErrorKind,
    pub message: String,
}

impl OpError {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        OpError { kind, message: message.into() }
    }
}

pub type OpResult<T> = Result<T, OpError>;

/// The binary operators (`+ - * / % & | ^ << >> &^ < <= > >=`).
///
/// `==`/`!=` are intentionally excluded: the instruction set gives them
/// their own opcodes (`Equal`/`NotEqual`) separate from `BinaryOp`, since
/// equality is defined for every pair of kinds while the arithmetic/
/// bitwise/ordering operators are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    AndNot,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum NumKind {
    Int,
    Uint,
    Float,
}

enum Num {
    Int(i64),
    Uint(u64),
    Float(f64),
}

fn as_num(v: &Value) -> Option<Num> {
    match v {
        Value::Int(i) => Some(Num::Int(*i)),
        Value::Uint(u) => Some(Num::Uint(*u)),
        Value::Float(f) => Some(Num::Float(*f)),
        _ => None,
    }
}

fn num_kind(n: &Num) -> NumKind {
    match n {
        Num::Int(_) => NumKind::Int,
        Num::Uint(_) => NumKind::Uint,
        Num::Float(_) => NumKind::Float,
    }
}

/// Widen a pair of numeric operands to their common kind (the larger of
/// `Int < Uint < Float`), matching "numeric variants widen toward Float".
fn widen(a: Num, b: Num) -> (Num, Num) {
    let target = num_kind(&a).max(num_kind(&b));
    (widen_to(a, target), widen_to(b, target))
}

fn widen_to(n: Num, target: NumKind) -> Num {
    match (n, target) {
        (n, NumKind::Int) => n,
        (Num::Int(i), NumKind::Uint) => Num::Uint(i as u64),
        (n @ Num::Uint(_), NumKind::Uint) => n,
        (Num::Int(i), NumKind::Float) => Num::Float(i as f64),
        (Num::Uint(u), NumKind::Float) => Num::Float(u as f64),
        (n @ Num::Float(_), NumKind::Float) => n,
        (Num::Float(_), NumKind::Uint) => {
            unreachable!("widen() never asks to narrow a Float down to Uint")
        }
    }
}

fn num_to_value(n: Num) -> Value {
    match n {
        Num::Int(i) => Value::Int(i),
        Num::Uint(u) => Value::Uint(u),
        Num::Float(f) => Value::Float(f),
    }
}

fn stringify(v: &Value) -> EcoString {
    match v {
        Value::String(s) => s.clone(),
        other => format!("{other}").into(),
    }
}

fn invalid_op(op: BinOp, lhs: &Value, rhs: &Value) -> OpError {
    OpError::new(
        ErrorKind::InvalidOperator,
        format!(
            "invalid operation: {} {:?} {}",
            lhs.type_name(),
            op,
            rhs.type_name()
        ),
    )
}

/// Undefined sorts below every other value for `<`/`<=`/`>`/`>=` (but not
/// `==`, handled separately by [`equals`]).
fn undefined_ordering(op: BinOp, lhs_is_undef: bool, rhs_is_undef: bool) -> Option<Value> {
    if !lhs_is_undef && !rhs_is_undef {
        return None;
    }
    let result = match op {
        BinOp::Lt | BinOp::Le => false,
        BinOp::Gt | BinOp::Ge => true,
        _ => return None,
    };
    // Both-undefined: equal, so Lt/Gt are false and Le/Ge are true.
    if lhs_is_undef && rhs_is_undef {
        return Some(Value::Bool(matches!(op, BinOp::Le | BinOp::Ge)));
    }
    // Exactly one side is undefined: if lhs is undefined, it's "less"; if
    // rhs is undefined, lhs is "greater".
    let lhs_is_smaller = lhs_is_undef;
    let final_result = if lhs_is_smaller { result } else { !result };
    Some(Value::Bool(final_result))
}

pub fn binary(op: BinOp, lhs: &Value, rhs: &Value) -> OpResult<Value> {
    if let Some(v) = undefined_ordering(
        op,
        matches!(lhs, Value::Undefined),
        matches!(rhs, Value::Undefined),
    ) {
        return Ok(v);
    }

    // String concatenation / stringification.
    if let Value::String(s) = lhs {
        if op == BinOp::Add {
            let mut out = s.clone();
            out.push_str(&stringify(rhs));
            return Ok(Value::String(out));
        }
        if let Value::String(r) = rhs {
            return string_cmp(op, s, r);
        }
    }

    // Array concatenation.
    if let (Value::Array(a), Value::Array(b)) = (lhs, rhs) {
        if op == BinOp::Add {
            let mut out = a.borrow().clone();
            out.extend(b.borrow().iter().cloned());
            return Ok(Value::array(out));
        }
    }

    // Map merge (RHS wins).
    if let (Value::Map(a), Value::Map(b)) = (lhs, rhs) {
        if op == BinOp::Add {
            let mut out: MapData = a.borrow().clone();
            for (k, v) in b.borrow().iter() {
                out.insert(k.clone(), v.clone());
            }
            return Ok(Value::map(out));
        }
    }

    // Numeric.
    if let (Some(a), Some(b)) = (as_num(lhs), as_num(rhs)) {
        return numeric_binary(op, a, b);
    }

    Err(invalid_op(op, lhs, rhs))
}

fn string_cmp(op: BinOp, a: &str, b: &str) -> OpResult<Value> {
    let ord = a.cmp(b);
    use core::cmp::Ordering::*;
    let result = match op {
        BinOp::Lt => ord == Less,
        BinOp::Le => ord != Greater,
        BinOp::Gt => ord == Greater,
        BinOp::Ge => ord != Less,
        _ => {
            return Err(OpError::new(
                ErrorKind::InvalidOperator,
                "invalid operation on strings",
            ));
        }
    };
    Ok(Value::Bool(result))
}

fn numeric_binary(op: BinOp, a: Num, b: Num) -> OpResult<Value> {
    let (a, b) = widen(a, b);
    match (op, a, b) {
        (BinOp::Add, Num::Int(a), Num::Int(b)) => Ok(Value::Int(a.wrapping_add(b))),
        (BinOp::Sub, Num::Int(a), Num::Int(b)) => Ok(Value::Int(a.wrapping_sub(b))),
        (BinOp::Mul, Num::Int(a), Num::Int(b)) => Ok(Value::Int(a.wrapping_mul(b))),
        (BinOp::Div, Num::Int(a), Num::Int(b)) => {
            if b == 0 {
                Err(OpError::new(ErrorKind::ZeroDivision, "division by zero"))
            } else {
                Ok(Value::Int(a.wrapping_div(b)))
            }
        }
        (BinOp::Rem, Num::Int(a), Num::Int(b)) => {
            if b == 0 {
                Err(OpError::new(ErrorKind::ZeroDivision, "division by zero"))
            } else {
                Ok(Value::Int(a.wrapping_rem(b)))
            }
        }
        (BinOp::BitAnd, Num::Int(a), Num::Int(b)) => Ok(Value::Int(a & b)),
        (BinOp::BitOr, Num::Int(a), Num::Int(b)) => Ok(Value::Int(a | b)),
        (BinOp::BitXor, Num::Int(a), Num::Int(b)) => Ok(Value::Int(a ^ b)),
        (BinOp::Shl, Num::Int(a), Num::Int(b)) => Ok(Value::Int(a.wrapping_shl(b as u32))),
        (BinOp::Shr, Num::Int(a), Num::Int(b)) => Ok(Value::Int(a.wrapping_shr(b as u32))),
        (BinOp::AndNot, Num::Int(a), Num::Int(b)) => Ok(Value::Int(a & !b)),
        (BinOp::Lt, Num::Int(a), Num::Int(b)) => Ok(Value::Bool(a < b)),
        (BinOp::Le, Num::Int(a), Num::Int(b)) => Ok(Value::Bool(a <= b)),
        (BinOp::Gt, Num::Int(a), Num::Int(b)) => Ok(Value::Bool(a > b)),
        (BinOp::Ge, Num::Int(a), Num::Int(b)) => Ok(Value::Bool(a >= b)),

        (BinOp::Add, Num::Uint(a), Num::Uint(b)) => Ok(Value::Uint(a.wrapping_add(b))),
        (BinOp::Sub, Num::Uint(a), Num::Uint(b)) => Ok(Value::Uint(a.wrapping_sub(b))),
        (BinOp::Mul, Num::Uint(a), Num::Uint(b)) => Ok(Value::Uint(a.wrapping_mul(b))),
        (BinOp::Div, Num::Uint(a), Num::Uint(b)) => {
            if b == 0 {
                Err(OpError::new(ErrorKind::ZeroDivision, "division by zero"))
            } else {
                Ok(Value::Uint(a / b))
            }
        }
        (BinOp::Rem, Num::Uint(a), Num::Uint(b)) => {
            if b == 0 {
                Err(OpError::new(ErrorKind::ZeroDivision, "division by zero"))
            } else {
                Ok(Value::Uint(a % b))
            }
        }
        (BinOp::BitAnd, Num::Uint(a), Num::Uint(b)) => Ok(Value::Uint(a & b)),
        (BinOp::BitOr, Num::Uint(a), Num::Uint(b)) => Ok(Value::Uint(a | b)),
        (BinOp::BitXor, Num::Uint(a), Num::Uint(b)) => Ok(Value::Uint(a ^ b)),
        (BinOp::Shl, Num::Uint(a), Num::Uint(b)) => Ok(Value::Uint(a.wrapping_shl(b as u32))),
        (BinOp::Shr, Num::Uint(a), Num::Uint(b)) => Ok(Value::Uint(a.wrapping_shr(b as u32))),
        (BinOp::AndNot, Num::Uint(a), Num::Uint(b)) => Ok(Value::Uint(a & !b)),
        (BinOp::Lt, Num::Uint(a), Num::Uint(b)) => Ok(Value::Bool(a < b)),
        (BinOp::Le, Num::Uint(a), Num::Uint(b)) => Ok(Value::Bool(a <= b)),
        (BinOp::Gt, Num::Uint(a), Num::Uint(b)) => Ok(Value::Bool(a > b)),
        (BinOp::Ge, Num::Uint(a), Num::Uint(b)) => Ok(Value::Bool(a >= b)),

        (BinOp::Add, Num::Float(a), Num::Float(b)) => Ok(Value::Float(a + b)),
        (BinOp::Sub, Num::Float(a), Num::Float(b)) => Ok(Value::Float(a - b)),
        (BinOp::Mul, Num::Float(a), Num::Float(b)) => Ok(Value::Float(a * b)),
        (BinOp::Div, Num::Float(a), Num::Float(b)) => Ok(Value::Float(a / b)),
        (BinOp::Rem, Num::Float(a), Num::Float(b)) => Ok(Value::Float(a % b)),
        (BinOp::Lt, Num::Float(a), Num::Float(b)) => Ok(Value::Bool(a < b)),
        (BinOp::Le, Num::Float(a), Num::Float(b)) => Ok(Value::Bool(a <= b)),
        (BinOp::Gt, Num::Float(a), Num::Float(b)) => Ok(Value::Bool(a > b)),
        (BinOp::Ge, Num::Float(a), Num::Float(b)) => Ok(Value::Bool(a >= b)),
        (op, a, b) => Err(OpError::new(
            ErrorKind::InvalidOperator,
            format!("invalid operation {:?} on {:?}/{:?}", op, num_kind(&a), num_kind(&b)),
        )),
    }
}

pub fn unary(op: UnaryOp, v: &Value) -> OpResult<Value> {
    match (op, v) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.is_truthy())),
        (UnaryOp::Neg, Value::Int(i)) => Ok(Value::Int(i.wrapping_neg())),
        (UnaryOp::Neg, Value::Uint(u)) => Ok(Value::Uint(u.wrapping_neg())),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Plus, Value::Int(_) | Value::Uint(_) | Value::Float(_)) => Ok(v.clone()),
        (UnaryOp::BitNot, Value::Int(i)) => Ok(Value::Int(!i)),
        (UnaryOp::BitNot, Value::Uint(u)) => Ok(Value::Uint(!u)),
        _ => Err(OpError::new(
            ErrorKind::InvalidOperator,
            format!("invalid operation: {:?}{}", op, v.type_name()),
        )),
    }
}

/// Structural equality: same-kind structural, numeric
/// cross-kind by value, otherwise unequal. Reference-typed kinds
/// (closures, functions, errors, cells) compare by identity since the
/// language has no notion of structural equality for callables.
pub fn equals(a: &Value, b: &Value) -> bool {
    if let (Some(na), Some(nb)) = (as_num(a), as_num(b)) {
        let (na, nb) = widen(na, nb);
        return match (na, nb) {
            (Num::Int(x), Num::Int(y)) => x == y,
            (Num::Uint(x), Num::Uint(y)) => x == y,
            (Num::Float(x), Num::Float(y)) => x == y,
            _ => false,
        };
    }
    match (a, b) {
        (Value::Undefined, Value::Undefined) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Char(x), Value::Char(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Bytes(x), Value::Bytes(y)) => *x.borrow() == *y.borrow(),
        (Value::Array(x), Value::Array(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| equals(a, b))
        }
        (Value::Map(x), Value::Map(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len()
                && x.iter().all(|(k, v)| y.get(k).is_some_and(|v2| equals(v, v2)))
        }
        (Value::SyncMap(x), Value::SyncMap(y)) => std::sync::Arc::ptr_eq(x, y),
        (Value::Closure(x), Value::Closure(y)) => Rc::ptr_eq(x, y),
        (Value::CompiledFunction(x), Value::CompiledFunction(y)) => Rc::ptr_eq(x, y),
        (Value::Function(x), Value::Function(y)) => Rc::ptr_eq(x, y),
        (Value::BuiltinFunction(x), Value::BuiltinFunction(y)) => x == y,
        (Value::Error(x), Value::Error(y)) => Rc::ptr_eq(x, y),
        (Value::RuntimeError(x), Value::RuntimeError(y)) => Rc::ptr_eq(x, y),
        (Value::ObjectPtr(x), Value::ObjectPtr(y)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}

/// `Index get`.
pub fn index_get(base: &Value, index: &Value) -> OpResult<Value> {
    match base {
        Value::Array(a) => {
            let i = require_index(index)?;
            let a = a.borrow();
            a.get(i).cloned().ok_or_else(|| out_of_bounds(i as i64, a.len()))
        }
        Value::Bytes(b) => {
            let i = require_index(index)?;
            let b = b.borrow();
            b.get(i)
                .map(|byte| Value::Int(*byte as i64))
                .ok_or_else(|| out_of_bounds(i as i64, b.len()))
        }
        Value::String(s) => {
            let i = require_index(index)?;
            s.chars()
                .nth(i)
                .map(Value::Char)
                .ok_or_else(|| out_of_bounds(i as i64, s.chars().count()))
        }
        Value::Map(m) => {
            let key = require_string_key(index)?;
            Ok(m.borrow().get(key).cloned().unwrap_or(Value::Undefined))
        }
        Value::SyncMap(m) => {
            let key = require_string_key(index)?;
            Ok(m.read().unwrap().get(key).cloned().unwrap_or(Value::Undefined))
        }
        _ => Err(OpError::new(
            ErrorKind::NotIndexable,
            format!("{} is not indexable", base.type_name()),
        )),
    }
}

/// `Index set`.
pub fn index_set(base: &Value, index: &Value, value: Value) -> OpResult<()> {
    match base {
        Value::Array(a) => {
            let i = require_index(index)?;
            let mut a = a.borrow_mut();
            let len = a.len();
            match a.get_mut(i) {
                Some(slot) => {
                    *slot = value;
                    Ok(())
                }
                None => Err(out_of_bounds(i as i64, len)),
            }
        }
        Value::Bytes(b) => {
            let i = require_index(index)?;
            let byte = require_byte(&value)?;
            let mut b = b.borrow_mut();
            let len = b.len();
            match b.get_mut(i) {
                Some(slot) => {
                    *slot = byte;
                    Ok(())
                }
                None => Err(out_of_bounds(i as i64, len)),
            }
        }
        Value::Map(m) => {
            let key = require_string_key(index)?;
            m.borrow_mut().insert(key.into(), value);
            Ok(())
        }
        Value::SyncMap(m) => {
            let key = require_string_key(index)?;
            m.write().unwrap().insert(key.into(), value);
            Ok(())
        }
        _ => Err(OpError::new(
            ErrorKind::NotIndexAssignable,
            format!("{} is not index-assignable", base.type_name()),
        )),
    }
}

/// `Slice`: `Undefined` bounds mean "start"/"end".
pub fn slice(base: &Value, lo: &Value, hi: &Value) -> OpResult<Value> {
    match base {
        Value::Array(a) => {
            let a = a.borrow();
            let (lo, hi) = slice_bounds(lo, hi, a.len())?;
            Ok(Value::array(a[lo..hi].to_vec()))
        }
        Value::Bytes(b) => {
            let b = b.borrow();
            let (lo, hi) = slice_bounds(lo, hi, b.len())?;
            Ok(Value::bytes(b[lo..hi].to_vec()))
        }
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let (lo, hi) = slice_bounds(lo, hi, chars.len())?;
            Ok(Value::String(chars[lo..hi].iter().collect::<String>().into()))
        }
        _ => Err(OpError::new(
            ErrorKind::NotIndexable,
            format!("{} cannot be sliced", base.type_name()),
        )),
    }
}

fn slice_bounds(lo: &Value, hi: &Value, len: usize) -> OpResult<(usize, usize)> {
    let lo = match lo {
        Value::Undefined => 0,
        v => require_index(v)?,
    };
    let hi = match hi {
        Value::Undefined => len,
        v => require_index(v)?,
    };
    if lo > hi || hi > len {
        return Err(out_of_bounds(hi as i64, len));
    }
    Ok((lo, hi))
}

fn require_index(v: &Value) -> OpResult<usize> {
    match v {
        Value::Int(i) if *i >= 0 => Ok(*i as usize),
        Value::Int(i) => Err(out_of_bounds(*i, 0)),
        Value::Uint(u) => Ok(*u as usize),
        _ => Err(OpError::new(
            ErrorKind::InvalidIndex,
            format!("index must be an int, got {}", v.type_name()),
        )),
    }
}

fn require_string_key(v: &Value) -> OpResult<&str> {
    match v {
        Value::String(s) => Ok(s.as_str()),
        _ => Err(OpError::new(
            ErrorKind::InvalidIndex,
            format!("map key must be a string, got {}", v.type_name()),
        )),
    }
}

fn require_byte(v: &Value) -> OpResult<u8> {
    match v {
        Value::Int(i) if (0..=255).contains(i) => Ok(*i as u8),
        _ => Err(OpError::new(
            ErrorKind::Type,
            format!("expected a byte value (0-255), got {v:?}"),
        )),
    }
}

fn out_of_bounds(index: i64, len: usize) -> OpError {
    OpError::new(
        ErrorKind::IndexOutOfBounds,
        format!("index {index} out of bounds (length {len})"),
    )
}
