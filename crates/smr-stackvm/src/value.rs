use std::cell::RefCell;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use itertools::Itertools;
use serde_json::Value as Json;
use smr_code::constant::{bytes_repr, float_repr, str_repr};

use crate::builtins::Builtin;
use crate::code::CodeObject;
use crate::fault::{Fault, FaultClass, FaultKind, VmError};
use crate::function::Function;

const REPR_DEPTH: usize = 64;
const JSON_DEPTH: usize = 100;
/// Nesting bound for structural equality, ordering and hashing.
pub const COMPARE_DEPTH: usize = 256;

pub type Cell = Rc<RefCell<Option<Value>>>;

pub fn empty_cell() -> Cell {
    Rc::new(RefCell::new(None))
}

#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Bytes(Bytes),
    Tuple(Rc<Items>),
    List(Rc<RefCell<Items>>),
    Dict(Rc<RefCell<Dict>>),
    Range(RangeValue),
    Slice(Rc<SliceValue>),
    Function(Rc<Function>),
    Code(Rc<CodeObject>),
    Builtin(Builtin),
    Method(Rc<BoundMethod>),
    Class(Rc<FaultClass>),
    Fault(Rc<Fault>),
    Cell(Cell),
    Iterator(Rc<RefCell<IterState>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeValue {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl RangeValue {
    pub fn len(&self) -> usize {
        let (lo, hi, step) = if self.step > 0 {
            (self.start as i128, self.stop as i128, self.step as i128)
        } else {
            (self.stop as i128, self.start as i128, -(self.step as i128))
        };
        if lo >= hi {
            0
        } else {
            ((hi - lo - 1) / step + 1) as usize
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<i64> {
        if index < self.len() {
            Some(self.start + self.step * index as i64)
        } else {
            None
        }
    }

    pub fn contains(&self, value: i64) -> bool {
        let in_bounds = if self.step > 0 {
            value >= self.start && value < self.stop
        } else {
            value <= self.start && value > self.stop
        };
        in_bounds && (value - self.start) % self.step == 0
    }
}

#[derive(Debug, Clone)]
pub struct SliceValue {
    pub start: Value,
    pub stop: Value,
    pub step: Value,
}

#[derive(Debug, Clone)]
pub struct BoundMethod {
    pub receiver: Value,
    pub name: Rc<str>,
}

/// Element storage of tuples and lists.
#[derive(Debug, Default)]
pub struct Items(Vec<Value>);

impl From<Vec<Value>> for Items {
    fn from(items: Vec<Value>) -> Self {
        Items(items)
    }
}

impl Deref for Items {
    type Target = Vec<Value>;

    fn deref(&self) -> &Vec<Value> {
        &self.0
    }
}

impl DerefMut for Items {
    fn deref_mut(&mut self) -> &mut Vec<Value> {
        &mut self.0
    }
}

impl Drop for Items {
    fn drop(&mut self) {
        release(std::mem::take(&mut self.0));
    }
}

/// Drops values without recursing into the containers they solely own.
/// Children of such a container are moved onto the worklist before the
/// emptied container itself goes away, so arbitrarily deep nesting is
/// released in constant stack.
pub(crate) fn release(mut pending: Vec<Value>) {
    while let Some(value) = pending.pop() {
        match value {
            Value::Tuple(items) => {
                if let Ok(mut items) = Rc::try_unwrap(items) {
                    pending.append(&mut items);
                }
            }
            Value::List(items) => {
                if let Ok(items) = Rc::try_unwrap(items) {
                    pending.append(&mut items.into_inner());
                }
            }
            Value::Dict(dict) => {
                if let Ok(dict) = Rc::try_unwrap(dict) {
                    dict.into_inner().drain_into(&mut pending);
                }
            }
            Value::Fault(fault) => {
                if let Ok(mut fault) = Rc::try_unwrap(fault) {
                    fault.drain_into(&mut pending);
                }
            }
            Value::Cell(cell) => {
                if let Ok(cell) = Rc::try_unwrap(cell) {
                    pending.extend(cell.into_inner());
                }
            }
            Value::Method(method) => {
                if let Ok(method) = Rc::try_unwrap(method) {
                    pending.push(method.receiver);
                }
            }
            Value::Iterator(state) => {
                if let Ok(state) = Rc::try_unwrap(state) {
                    match state.into_inner() {
                        IterState::List { list, .. } => pending.push(Value::List(list)),
                        IterState::Items { items, .. } => pending.extend(items),
                        IterState::Range { .. } => {}
                    }
                }
            }
            _ => {}
        }
    }
}

/// Insertion-ordered mapping with Python key equality.
#[derive(Debug, Clone, Default)]
pub struct Dict {
    entries: Vec<(Value, Value)>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // Stored keys passed `ensure_hashable`, which bounds their nesting below
    // the comparison limit, so the lookup comparison cannot fail.
    fn position(&self, key: &Value) -> Option<usize> {
        self.entries
            .iter()
            .position(|(k, _)| values_equal(k, key).unwrap_or(false))
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.position(key).map(|index| &self.entries[index].1)
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.position(key).is_some()
    }

    pub fn insert(&mut self, key: Value, value: Value) -> Result<(), VmError> {
        ensure_hashable(&key)?;
        match self.position(&key) {
            Some(index) => self.entries[index].1 = value,
            None => self.entries.push((key, value)),
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        self.position(key).map(|index| self.entries.remove(index).1)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn items(&self) -> Vec<Value> {
        self.entries
            .iter()
            .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
            .collect()
    }

    pub fn entries(&self) -> &[(Value, Value)] {
        &self.entries
    }

    fn drain_into(&mut self, pending: &mut Vec<Value>) {
        for (key, value) in self.entries.drain(..) {
            pending.push(key);
            pending.push(value);
        }
    }
}

impl Drop for Dict {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        self.drain_into(&mut pending);
        release(pending);
    }
}

#[derive(Debug, Clone)]
pub enum IterState {
    List {
        list: Rc<RefCell<Items>>,
        index: usize,
    },
    Range {
        next: i64,
        remaining: usize,
        step: i64,
    },
    Items {
        items: Vec<Value>,
        index: usize,
    },
}

impl IterState {
    pub fn next_value(&mut self) -> Option<Value> {
        match self {
            IterState::List { list, index } => {
                let item = list.borrow().get(*index).cloned();
                if item.is_some() {
                    *index += 1;
                }
                item
            }
            IterState::Range {
                next,
                remaining,
                step,
            } => {
                if *remaining == 0 {
                    return None;
                }
                let current = *next;
                *remaining -= 1;
                *next = next.wrapping_add(*step);
                Some(Value::Int(current))
            }
            IterState::Items { items, index } => {
                let item = items.get(*index).cloned();
                if item.is_some() {
                    *index += 1;
                }
                item
            }
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(Rc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(Rc::from(value))
    }
}

impl Value {
    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::new(Items(items)))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(Items(items))))
    }

    pub fn dict(dict: Dict) -> Value {
        Value::Dict(Rc::new(RefCell::new(dict)))
    }

    pub fn iterator(state: IterState) -> Value {
        Value::Iterator(Rc::new(RefCell::new(state)))
    }

    pub fn method(receiver: Value, name: &str) -> Value {
        Value::Method(Rc::new(BoundMethod {
            receiver,
            name: Rc::from(name),
        }))
    }

    pub fn type_name(&self) -> String {
        match self {
            Value::None => "NoneType".to_string(),
            Value::Bool(_) => "bool".to_string(),
            Value::Int(_) => "int".to_string(),
            Value::Float(_) => "float".to_string(),
            Value::Str(_) => "str".to_string(),
            Value::Bytes(_) => "bytes".to_string(),
            Value::Tuple(_) => "tuple".to_string(),
            Value::List(_) => "list".to_string(),
            Value::Dict(_) => "dict".to_string(),
            Value::Range(_) => "range".to_string(),
            Value::Slice(_) => "slice".to_string(),
            Value::Function(_) => "function".to_string(),
            Value::Code(_) => "code".to_string(),
            Value::Builtin(_) | Value::Method(_) => "builtin_function_or_method".to_string(),
            Value::Class(_) => "type".to_string(),
            Value::Fault(fault) => fault.class.name.clone(),
            Value::Cell(_) => "cell".to_string(),
            Value::Iterator(_) => "iterator".to_string(),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(value) => *value,
            Value::Int(value) => *value != 0,
            Value::Float(value) => *value != 0.0,
            Value::Str(value) => !value.is_empty(),
            Value::Bytes(value) => !value.is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Dict(dict) => !dict.borrow().is_empty(),
            Value::Range(range) => !range.is_empty(),
            _ => true,
        }
    }

    /// Integer view of ints and bools.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            Value::Bool(value) => Some(i64::from(*value)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn repr(&self) -> String {
        self.repr_in(&mut Vec::new())
    }

    /// Address of a value that can contain other values.
    pub(crate) fn identity(&self) -> Option<*const ()> {
        match self {
            Value::Tuple(items) => Some(Rc::as_ptr(items).cast()),
            Value::List(items) => Some(Rc::as_ptr(items).cast()),
            Value::Dict(dict) => Some(Rc::as_ptr(dict).cast()),
            Value::Slice(slice) => Some(Rc::as_ptr(slice).cast()),
            Value::Fault(fault) => Some(Rc::as_ptr(fault).cast()),
            _ => None,
        }
    }

    /// Stand-in for a container that is already on the rendering path or
    /// nested too deeply.
    fn elided(&self) -> String {
        match self {
            Value::Tuple(_) => "(...)".to_string(),
            Value::List(_) => "[...]".to_string(),
            Value::Dict(_) => "{...}".to_string(),
            Value::Slice(_) => "slice(...)".to_string(),
            Value::Fault(fault) => format!("{}(...)", fault.class.name),
            _ => "...".to_string(),
        }
    }

    fn repr_in(&self, path: &mut Vec<*const ()>) -> String {
        let identity = self.identity();
        if let Some(identity) = identity {
            if path.len() >= REPR_DEPTH || path.contains(&identity) {
                return self.elided();
            }
            path.push(identity);
        }
        let text = self.repr_step(path);
        if identity.is_some() {
            path.pop();
        }
        text
    }

    fn repr_step(&self, path: &mut Vec<*const ()>) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(value) => value.to_string(),
            Value::Float(value) => float_repr(*value),
            Value::Str(value) => str_repr(value),
            Value::Bytes(value) => bytes_repr(value),
            Value::Tuple(items) if items.len() == 1 => format!("({},)", items[0].repr_in(path)),
            Value::Tuple(items) => format!("({})", join_reprs(items, path)),
            Value::List(items) => format!("[{}]", join_reprs(&items.borrow(), path)),
            Value::Dict(dict) => format!(
                "{{{}}}",
                dict.borrow()
                    .entries()
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.repr_in(path), v.repr_in(path)))
                    .join(", ")
            ),
            Value::Range(range) if range.step == 1 => {
                format!("range({}, {})", range.start, range.stop)
            }
            Value::Range(range) => {
                format!("range({}, {}, {})", range.start, range.stop, range.step)
            }
            Value::Slice(slice) => format!(
                "slice({}, {}, {})",
                slice.start.repr_in(path),
                slice.stop.repr_in(path),
                slice.step.repr_in(path)
            ),
            Value::Function(function) => format!("<function {}>", function.name),
            Value::Code(code) => format!(
                "<code object {}, file \"{}\", line {}>",
                code.name(),
                code.filename(),
                code.first_line()
            ),
            Value::Builtin(builtin) => format!("<built-in function {}>", builtin),
            Value::Method(method) => format!(
                "<built-in method {} of {} object>",
                method.name,
                method.receiver.type_name()
            ),
            Value::Class(class) => format!("<class '{}'>", class.qualified_name()),
            Value::Fault(fault) => {
                format!("{}({})", fault.class.name, join_reprs(&fault.args, path))
            }
            Value::Cell(cell) => match &*cell.borrow() {
                Some(value) => format!("<cell: {} object>", value.type_name()),
                None => "<cell: empty>".to_string(),
            },
            Value::Iterator(_) => "<iterator object>".to_string(),
        }
    }

    /// `str()` rendering.
    pub fn to_text(&self) -> String {
        match self {
            Value::Str(value) => value.to_string(),
            Value::Fault(fault) => fault.text(),
            other => other.repr(),
        }
    }

    pub fn from_json(value: &Json) -> Value {
        match value {
            Json::Null => Value::None,
            Json::Bool(value) => Value::Bool(*value),
            Json::Number(number) => match number.as_i64() {
                Some(value) => Value::Int(value),
                None => Value::Float(number.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(value) => Value::from(value.as_str()),
            Json::Array(items) => Value::list(items.iter().map(Value::from_json).collect()),
            Json::Object(map) => {
                let mut dict = Dict::new();
                for (key, value) in map {
                    dict.entries.push((Value::from(key.as_str()), Value::from_json(value)));
                }
                Value::dict(dict)
            }
        }
    }

    /// JSON rendering of a result. Values without a JSON shape fall back to
    /// their `repr`; a container met again below itself, or nested past the
    /// depth limit, renders as its elided repr.
    pub fn to_json(&self) -> Json {
        self.json_in(&mut Vec::new())
    }

    fn json_in(&self, path: &mut Vec<*const ()>) -> Json {
        let identity = match self {
            Value::Tuple(_) | Value::List(_) | Value::Dict(_) => self.identity(),
            _ => None,
        };
        if let Some(identity) = identity {
            if path.len() >= JSON_DEPTH || path.contains(&identity) {
                return Json::String(self.elided());
            }
            path.push(identity);
        }
        let json = self.json_step(path);
        if identity.is_some() {
            path.pop();
        }
        json
    }

    fn json_step(&self, path: &mut Vec<*const ()>) -> Json {
        match self {
            Value::None => Json::Null,
            Value::Bool(value) => Json::Bool(*value),
            Value::Int(value) => Json::from(*value),
            Value::Float(value) if value.is_finite() => Json::from(*value),
            Value::Float(value) => Json::String(float_repr(*value)),
            Value::Str(value) => Json::String(value.to_string()),
            Value::Bytes(value) => Json::String(STANDARD.encode(value)),
            Value::Tuple(items) => {
                Json::Array(items.iter().map(|item| item.json_in(path)).collect())
            }
            Value::List(items) => Json::Array(
                items
                    .borrow()
                    .iter()
                    .map(|item| item.json_in(path))
                    .collect(),
            ),
            Value::Dict(dict) => Json::Object(
                dict.borrow()
                    .entries()
                    .iter()
                    .map(|(k, v)| (json_key(k), v.json_in(path)))
                    .collect(),
            ),
            other => Json::String(other.repr()),
        }
    }
}

fn join_reprs(items: &[Value], path: &mut Vec<*const ()>) -> String {
    items.iter().map(|item| item.repr_in(path)).join(", ")
}

fn json_key(key: &Value) -> String {
    match key {
        Value::Str(value) => value.to_string(),
        Value::None => "null".to_string(),
        Value::Bool(value) => value.to_string(),
        other => other.to_text(),
    }
}

pub(crate) fn comparison_too_deep() -> VmError {
    VmError::new(
        FaultKind::RecursionError,
        "maximum recursion depth exceeded in comparison",
    )
}

/// Python `==`. Nested containers compare element-wise; nesting beyond
/// [`COMPARE_DEPTH`] (self-referential containers included) raises
/// `RecursionError`.
pub fn values_equal(left: &Value, right: &Value) -> Result<bool, VmError> {
    equal_at(left, right, 0)
}

fn equal_at(left: &Value, right: &Value, depth: usize) -> Result<bool, VmError> {
    if depth > COMPARE_DEPTH {
        return Err(comparison_too_deep());
    }
    Ok(match (left, right) {
        (Value::None, Value::None) => true,
        (Value::Float(a), b) => b.as_float().is_some_and(|b| *a == b),
        (a, Value::Float(b)) => a.as_float().is_some_and(|a| a == *b),
        (a, b) if a.as_int().is_some() && b.as_int().is_some() => a.as_int() == b.as_int(),
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Bytes(a), Value::Bytes(b)) => a == b,
        (Value::Tuple(a), Value::Tuple(b)) => {
            Rc::ptr_eq(a, b) || sequences_equal(a, b, depth)?
        }
        (Value::List(a), Value::List(b)) => {
            Rc::ptr_eq(a, b) || sequences_equal(&a.borrow(), &b.borrow(), depth)?
        }
        (Value::Dict(a), Value::Dict(b)) => {
            if Rc::ptr_eq(a, b) {
                return Ok(true);
            }
            let (a, b) = (a.borrow(), b.borrow());
            if a.len() != b.len() {
                return Ok(false);
            }
            for (key, value) in a.entries() {
                let Some(other) = b.get(key) else {
                    return Ok(false);
                };
                if !equal_at(value, other, depth + 1)? {
                    return Ok(false);
                }
            }
            true
        }
        (Value::Range(a), Value::Range(b)) => {
            let (la, lb) = (a.len(), b.len());
            la == lb && (la == 0 || (a.start == b.start && (la == 1 || a.step == b.step)))
        }
        (a, b) => is_same(a, b),
    })
}

fn sequences_equal(a: &[Value], b: &[Value], depth: usize) -> Result<bool, VmError> {
    if a.len() != b.len() {
        return Ok(false);
    }
    for (x, y) in a.iter().zip(b) {
        if !equal_at(x, y, depth + 1)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Index of the first element equal to `needle`.
pub fn find_equal(items: &[Value], needle: &Value) -> Result<Option<usize>, VmError> {
    for (index, item) in items.iter().enumerate() {
        if values_equal(item, needle)? {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

/// Object identity for reference values, value identity for scalars.
pub fn is_same(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::None, Value::None) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Bytes(a), Value::Bytes(b)) => a == b,
        (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b),
        (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
        (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
        (Value::Range(a), Value::Range(b)) => a == b,
        (Value::Slice(a), Value::Slice(b)) => Rc::ptr_eq(a, b),
        (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
        (Value::Code(a), Value::Code(b)) => Rc::ptr_eq(a, b),
        (Value::Builtin(a), Value::Builtin(b)) => a == b,
        (Value::Method(a), Value::Method(b)) => Rc::ptr_eq(a, b),
        (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b) || a == b,
        (Value::Fault(a), Value::Fault(b)) => Rc::ptr_eq(a, b),
        (Value::Cell(a), Value::Cell(b)) => Rc::ptr_eq(a, b),
        (Value::Iterator(a), Value::Iterator(b)) => Rc::ptr_eq(a, b),
        _ => false,
    }
}

impl Value {
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(value) => Some(*value),
            other => other.as_int().map(|value| value as f64),
        }
    }
}

pub fn ensure_hashable(value: &Value) -> Result<(), VmError> {
    hashable_at(value, 0)
}

fn hashable_at(value: &Value, depth: usize) -> Result<(), VmError> {
    if depth > COMPARE_DEPTH {
        return Err(VmError::new(
            FaultKind::RecursionError,
            "maximum recursion depth exceeded while hashing",
        ));
    }
    match value {
        Value::List(_) | Value::Dict(_) | Value::Slice(_) => Err(VmError::new(
            FaultKind::TypeError,
            format!("unhashable type: '{}'", value.type_name()),
        )),
        Value::Tuple(items) => items
            .iter()
            .try_for_each(|item| hashable_at(item, depth + 1)),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_equality_crosses_types() {
        assert!(values_equal(&Value::Int(1), &Value::Float(1.0)).unwrap());
        assert!(values_equal(&Value::Bool(true), &Value::Int(1)).unwrap());
        assert!(!values_equal(&Value::from("1"), &Value::Int(1)).unwrap());
    }

    #[test]
    fn reprs_follow_python() {
        let value = Value::list(vec![
            Value::None,
            Value::from("a'b"),
            Value::tuple(vec![Value::Float(2.0)]),
        ]);
        assert_eq!(value.repr(), "[None, \"a'b\", (2.0,)]");
        assert_eq!(Value::from("x").to_text(), "x");
    }

    #[test]
    fn json_conversion() {
        let value = Value::from_json(&json!({"a": [1, 2.5, null], "b": "c"}));
        assert_eq!(value.repr(), "{'a': [1, 2.5, None], 'b': 'c'}");
        assert_eq!(value.to_json(), json!({"a": [1, 2.5, null], "b": "c"}));
        let tuple = Value::tuple(vec![Value::Int(1), Value::Float(f64::INFINITY)]);
        assert_eq!(tuple.to_json(), json!([1, "inf"]));
    }

    #[test]
    fn ranges_measure_and_contain() {
        let range = RangeValue {
            start: 10,
            stop: 0,
            step: -3,
        };
        assert_eq!(range.len(), 4);
        assert_eq!(range.get(3), Some(1));
        assert!(range.contains(4));
        assert!(!range.contains(5));
    }

    #[test]
    fn lists_are_unhashable() {
        let err = ensure_hashable(&Value::list(vec![])).expect_err("unhashable");
        assert_eq!(err.fault.text(), "unhashable type: 'list'");
    }

    fn self_containing() -> (Value, Rc<RefCell<Items>>) {
        let items = Rc::new(RefCell::new(Items::from(vec![Value::Int(1)])));
        let value = Value::List(items.clone());
        items.borrow_mut().push(value.clone());
        (value, items)
    }

    #[test]
    fn self_referential_list_renders_elided() {
        let (value, items) = self_containing();
        assert_eq!(value.repr(), "[1, [...]]");
        assert_eq!(value.to_json(), json!([1, "[...]"]));
        items.borrow_mut().clear();
    }

    #[test]
    fn self_referential_lists_compare_with_recursion_error() {
        let (left, left_items) = self_containing();
        let (right, right_items) = self_containing();
        assert!(values_equal(&left, &left).unwrap());
        let err = values_equal(&left, &right).expect_err("unbounded comparison");
        assert_eq!(err.kind_name(), "RecursionError");
        let err = ensure_hashable(&Value::tuple(vec![left.clone()])).expect_err("list inside");
        assert_eq!(err.kind_name(), "TypeError");
        left_items.borrow_mut().clear();
        right_items.borrow_mut().clear();
    }

    #[test]
    fn deep_nesting_is_bounded() {
        let mut value = Value::list(vec![]);
        for _ in 0..1_000_000 {
            value = Value::list(vec![value]);
        }
        assert!(value.repr().len() < 1_000);
        assert_eq!(value.to_json().to_string().matches('[').count(), JSON_DEPTH + 1);
        let other = Value::list(vec![value.clone()]);
        let err = values_equal(&value, &other).expect_err("too deep");
        assert_eq!(err.kind_name(), "RecursionError");
        drop(other);
        drop(value);
    }
}
