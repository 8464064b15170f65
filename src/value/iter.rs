//! Iteration over the iterable value kinds.
//!
//! `IterInit` replaces an iterable on the stack with a `ValueIter`; it is
//! then driven purely by `IterNext`/`IterKey`/`IterValue`. Iterators are
//! single-pass and not restartable: once exhausted there is
//! no way to rewind one.
//!
//! Map iteration takes a snapshot of the entries at `IterInit` time rather
//! than iterating the live `HashMap`, which keeps `IterNext` a simple
//! index bump and sidesteps the "modifying a collection during iteration
//! has unspecified results" clause without ever observing
//! a torn/reallocated hashbrown table mid-iteration.

use std::cell::RefCell;
use std::rc::Rc;

use ecow::EcoString;

use crate::value::error::ErrorKind;
use crate::value::ops::OpError;
use crate::value::Value;

pub enum ValueIter {
    Array { data: Rc<RefCell<Vec<Value>>>, pos: isize },
    Bytes { data: Rc<RefCell<Vec<u8>>>, pos: isize },
    Str { chars: Vec<char>, pos: isize },
    Map { entries: Vec<(EcoString, Value)>, pos: isize },
}

impl ValueIter {
    pub fn new(v: &Value) -> Result<ValueIter, OpError> {
        match v {
            Value::Array(data) => Ok(ValueIter::Array { data: data.clone(), pos: -1 }),
            Value::Bytes(data) => Ok(ValueIter::Bytes { data: data.clone(), pos: -1 }),
            Value::String(s) => Ok(ValueIter::Str { chars: s.chars().collect(), pos: -1 }),
            Value::Map(m) => Ok(ValueIter::Map {
                entries: m.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                pos: -1,
            }),
            Value::SyncMap(m) => Ok(ValueIter::Map {
                entries: m
                    .read()
                    .unwrap()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                pos: -1,
            }),
            other => Err(OpError {
                kind: ErrorKind::NotIterable,
                message: format!("{} is not iterable", other.type_name()),
            }),
        }
    }

    /// `IterNext`: advance, return whether a current element exists.
    pub fn next(&mut self) -> bool {
        match self {
            ValueIter::Array { data, pos } => {
                *pos += 1;
                (*pos as usize) < data.borrow().len()
            }
            ValueIter::Bytes { data, pos } => {
                *pos += 1;
                (*pos as usize) < data.borrow().len()
            }
            ValueIter::Str { chars, pos } => {
                *pos += 1;
                (*pos as usize) < chars.len()
            }
            ValueIter::Map { entries, pos } => {
                *pos += 1;
                (*pos as usize) < entries.len()
            }
        }
    }

    /// `IterKey`: for `Array`/`Bytes`/`String` this is the integer index;
    /// for `Map` it is the string key.
    pub fn key(&self) -> Value {
        match self {
            ValueIter::Array { pos, .. }
            | ValueIter::Bytes { pos, .. }
            | ValueIter::Str { pos, .. } => Value::Int(*pos as i64),
            ValueIter::Map { entries, pos } => Value::String(entries[*pos as usize].0.clone()),
        }
    }

    /// `IterValue`: the current element.
    pub fn value(&self) -> Value {
        match self {
            ValueIter::Array { data, pos } => data.borrow()[*pos as usize].clone(),
            ValueIter::Bytes { data, pos } => Value::Int(data.borrow()[*pos as usize] as i64),
            ValueIter::Str { chars, pos } => Value::Char(chars[*pos as usize]),
            ValueIter::Map { entries, pos } => entries[*pos as usize].1.clone(),
        }
    }
}
