//! Operator semantics: arithmetic, comparison, containment, subscripts,
//! iteration and attribute lookup.

use std::cmp::Ordering;
use std::rc::Rc;

use bytes::Bytes;
use smr_code::CompareOp;
use strum_macros::{Display, IntoStaticStr};

use crate::fault::{FaultKind, VmError};
use crate::format::percent_format;
use crate::methods::has_method;
use crate::value::{
    comparison_too_deep, find_equal, is_same, values_equal, Dict, IterState, RangeValue,
    SliceValue, Value, COMPARE_DEPTH,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum BinaryOp {
    #[strum(to_string = "+")]
    Add,
    #[strum(to_string = "-")]
    Sub,
    #[strum(to_string = "*")]
    Mul,
    #[strum(to_string = "/")]
    TrueDiv,
    #[strum(to_string = "//")]
    FloorDiv,
    #[strum(to_string = "%")]
    Mod,
    #[strum(to_string = "** or pow()")]
    Pow,
    #[strum(to_string = "<<")]
    LShift,
    #[strum(to_string = ">>")]
    RShift,
    #[strum(to_string = "&")]
    And,
    #[strum(to_string = "|")]
    Or,
    #[strum(to_string = "^")]
    Xor,
}

fn unsupported(op: BinaryOp, left: &Value, right: &Value) -> VmError {
    VmError::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op,
        left.type_name(),
        right.type_name()
    ))
}

fn zero_division(message: &str) -> VmError {
    VmError::new(FaultKind::ZeroDivisionError, message)
}

pub fn binary_op(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, VmError> {
    if let (Some(a), Some(b)) = (left.as_int(), right.as_int()) {
        return int_op(op, a, b);
    }
    if let (Some(a), Some(b)) = (left.as_float(), right.as_float()) {
        return float_op(op, a, b);
    }
    match (op, left, right) {
        (BinaryOp::Add, Value::Str(a), Value::Str(b)) => {
            let mut joined = String::with_capacity(a.len() + b.len());
            joined.push_str(a);
            joined.push_str(b);
            Ok(Value::from(joined))
        }
        (BinaryOp::Add, Value::Bytes(a), Value::Bytes(b)) => {
            Ok(Value::Bytes(Bytes::from([a.as_ref(), b.as_ref()].concat())))
        }
        (BinaryOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
            Ok(Value::tuple(a.iter().chain(b.iter()).cloned().collect()))
        }
        (BinaryOp::Add, Value::List(a), Value::List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        (BinaryOp::Mul, sequence, count) | (BinaryOp::Mul, count, sequence)
            if count.as_int().is_some() && is_sequence(sequence) =>
        {
            let times = count.as_int().unwrap_or(0).max(0) as usize;
            repeat(sequence, times)
        }
        (BinaryOp::Mod, Value::Str(template), args) => {
            Ok(Value::from(percent_format(template, args)?))
        }
        _ => Err(unsupported(op, left, right)),
    }
}

fn is_sequence(value: &Value) -> bool {
    matches!(
        value,
        Value::Str(_) | Value::Bytes(_) | Value::Tuple(_) | Value::List(_)
    )
}

fn repeat(sequence: &Value, times: usize) -> Result<Value, VmError> {
    Ok(match sequence {
        Value::Str(text) => Value::from(text.repeat(times)),
        Value::Bytes(bytes) => Value::Bytes(Bytes::from(bytes.repeat(times))),
        Value::Tuple(items) => Value::tuple(repeat_items(items, times)),
        Value::List(items) => Value::list(repeat_items(&items.borrow(), times)),
        other => return Err(VmError::type_error(format!("cannot repeat '{}'", other.type_name()))),
    })
}

fn repeat_items(items: &[Value], times: usize) -> Vec<Value> {
    let mut out = Vec::with_capacity(items.len() * times);
    for _ in 0..times {
        out.extend(items.iter().cloned());
    }
    out
}

fn int_op(op: BinaryOp, a: i64, b: i64) -> Result<Value, VmError> {
    let checked = |value: Option<i64>| value.map(Value::Int).ok_or_else(VmError::overflow);
    match op {
        BinaryOp::Add => checked(a.checked_add(b)),
        BinaryOp::Sub => checked(a.checked_sub(b)),
        BinaryOp::Mul => checked(a.checked_mul(b)),
        BinaryOp::TrueDiv => {
            if b == 0 {
                return Err(zero_division("division by zero"));
            }
            Ok(Value::Float(a as f64 / b as f64))
        }
        BinaryOp::FloorDiv => {
            if b == 0 {
                return Err(zero_division("integer division or modulo by zero"));
            }
            checked(floor_div(a, b))
        }
        BinaryOp::Mod => {
            if b == 0 {
                return Err(zero_division("integer division or modulo by zero"));
            }
            checked(floor_mod(a, b))
        }
        BinaryOp::Pow => {
            if b < 0 {
                if a == 0 {
                    return Err(zero_division("0.0 cannot be raised to a negative power"));
                }
                return Ok(Value::Float((a as f64).powf(b as f64)));
            }
            let exponent = u32::try_from(b).map_err(|_| VmError::overflow())?;
            checked(a.checked_pow(exponent))
        }
        BinaryOp::LShift => {
            if b < 0 {
                return Err(VmError::value_error("negative shift count"));
            }
            if a == 0 {
                return Ok(Value::Int(0));
            }
            if b >= 64 {
                return Err(VmError::overflow());
            }
            let shifted = a << b;
            if shifted >> b != a {
                return Err(VmError::overflow());
            }
            Ok(Value::Int(shifted))
        }
        BinaryOp::RShift => {
            if b < 0 {
                return Err(VmError::value_error("negative shift count"));
            }
            Ok(Value::Int(if b >= 64 {
                if a < 0 {
                    -1
                } else {
                    0
                }
            } else {
                a >> b
            }))
        }
        BinaryOp::And => Ok(Value::Int(a & b)),
        BinaryOp::Or => Ok(Value::Int(a | b)),
        BinaryOp::Xor => Ok(Value::Int(a ^ b)),
    }
}

fn floor_div(a: i64, b: i64) -> Option<i64> {
    let quotient = a.checked_div(b)?;
    if (a % b != 0) && ((a < 0) != (b < 0)) {
        quotient.checked_sub(1)
    } else {
        Some(quotient)
    }
}

fn floor_mod(a: i64, b: i64) -> Option<i64> {
    let remainder = a.checked_rem(b)?;
    if remainder != 0 && ((remainder < 0) != (b < 0)) {
        Some(remainder + b)
    } else {
        Some(remainder)
    }
}

fn float_op(op: BinaryOp, a: f64, b: f64) -> Result<Value, VmError> {
    let unsupported_float = || {
        VmError::type_error(format!(
            "unsupported operand type(s) for {}: 'float' and 'float'",
            op
        ))
    };
    Ok(Value::Float(match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::TrueDiv => {
            if b == 0.0 {
                return Err(zero_division("float division by zero"));
            }
            a / b
        }
        BinaryOp::FloorDiv => {
            if b == 0.0 {
                return Err(zero_division("float divmod()"));
            }
            (a / b).floor()
        }
        BinaryOp::Mod => {
            if b == 0.0 {
                return Err(zero_division("float modulo"));
            }
            let remainder = a % b;
            if remainder != 0.0 && ((remainder < 0.0) != (b < 0.0)) {
                remainder + b
            } else {
                remainder
            }
        }
        BinaryOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(zero_division("0.0 cannot be raised to a negative power"));
            }
            let result = a.powf(b);
            if result.is_nan() && !a.is_nan() && !b.is_nan() {
                return Err(VmError::value_error("math domain error"));
            }
            result
        }
        _ => return Err(unsupported_float()),
    }))
}

/// In-place variant: lists extend themselves, everything else rebinds.
pub fn inplace_op(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, VmError> {
    if let (BinaryOp::Add, Value::List(list)) = (op, left) {
        let extra = collect_iterable(right)?;
        list.borrow_mut().extend(extra);
        return Ok(left.clone());
    }
    binary_op(op, left, right)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Positive,
    Negative,
    Not,
    Invert,
}

pub fn unary_op(op: UnaryOp, value: &Value) -> Result<Value, VmError> {
    let bad = |symbol: &str| {
        VmError::type_error(format!(
            "bad operand type for unary {}: '{}'",
            symbol,
            value.type_name()
        ))
    };
    match op {
        UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
        UnaryOp::Positive => match value {
            Value::Float(v) => Ok(Value::Float(*v)),
            other => other.as_int().map(Value::Int).ok_or_else(|| bad("+")),
        },
        UnaryOp::Negative => match value {
            Value::Float(v) => Ok(Value::Float(-v)),
            other => match other.as_int() {
                Some(v) => v.checked_neg().map(Value::Int).ok_or_else(VmError::overflow),
                None => Err(bad("-")),
            },
        },
        UnaryOp::Invert => value.as_int().map(|v| Value::Int(!v)).ok_or_else(|| bad("~")),
    }
}

pub fn compare(op: CompareOp, left: &Value, right: &Value) -> Result<Value, VmError> {
    let result = match op {
        CompareOp::Eq => values_equal(left, right)?,
        CompareOp::Ne => !values_equal(left, right)?,
        CompareOp::Lt => order(left, right, op)? == Ordering::Less,
        CompareOp::Le => order(left, right, op)? != Ordering::Greater,
        CompareOp::Gt => order(left, right, op)? == Ordering::Greater,
        CompareOp::Ge => order(left, right, op)? != Ordering::Less,
        CompareOp::In => contains(right, left)?,
        CompareOp::NotIn => !contains(right, left)?,
        CompareOp::Is => is_same(left, right),
        CompareOp::IsNot => !is_same(left, right),
        CompareOp::ExceptionMatch => {
            return Err(VmError::system_error("exception matching is not supported"))
        }
    };
    Ok(Value::Bool(result))
}

/// Ordering for `<`-style comparisons. NaN compares unordered, which the
/// callers treat as "not less / not greater".
pub fn order(left: &Value, right: &Value, op: CompareOp) -> Result<Ordering, VmError> {
    order_at(left, right, op, 0)
}

fn order_at(left: &Value, right: &Value, op: CompareOp, depth: usize) -> Result<Ordering, VmError> {
    if depth > COMPARE_DEPTH {
        return Err(comparison_too_deep());
    }
    let incomparable = || {
        VmError::type_error(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            op,
            left.type_name(),
            right.type_name()
        ))
    };
    match (left, right) {
        (a, b) if a.as_int().is_some() && b.as_int().is_some() => {
            Ok(a.as_int().cmp(&b.as_int()))
        }
        (a, b) if a.as_float().is_some() && b.as_float().is_some() => {
            let (a, b) = (a.as_float().unwrap_or(0.0), b.as_float().unwrap_or(0.0));
            Ok(a.partial_cmp(&b).unwrap_or(match op {
                CompareOp::Lt | CompareOp::Le => Ordering::Greater,
                _ => Ordering::Less,
            }))
        }
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        (Value::Bytes(a), Value::Bytes(b)) => Ok(a.cmp(b)),
        (Value::Tuple(a), Value::Tuple(b)) => order_sequences(a, b, op, depth),
        (Value::List(a), Value::List(b)) => {
            let (a, b) = (a.borrow().clone(), b.borrow().clone());
            order_sequences(&a, &b, op, depth)
        }
        _ => Err(incomparable()),
    }
}

fn order_sequences(
    a: &[Value],
    b: &[Value],
    op: CompareOp,
    depth: usize,
) -> Result<Ordering, VmError> {
    for (x, y) in a.iter().zip(b) {
        if !values_equal(x, y)? {
            return order_at(x, y, op, depth + 1);
        }
    }
    Ok(a.len().cmp(&b.len()))
}

/// Strict `<`, as sorting and `min`/`max` use it.
pub fn less_than(left: &Value, right: &Value) -> Result<bool, VmError> {
    Ok(order(left, right, CompareOp::Lt)? == Ordering::Less)
}

pub fn contains(container: &Value, item: &Value) -> Result<bool, VmError> {
    match container {
        Value::Str(text) => match item {
            Value::Str(needle) => Ok(text.contains(&**needle)),
            other => Err(VmError::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::Bytes(bytes) => match item {
            Value::Bytes(needle) => Ok(needle.is_empty()
                || bytes.windows(needle.len()).any(|window| window == needle.as_ref())),
            other => match other.as_int() {
                Some(byte) => Ok(bytes.iter().any(|b| i64::from(*b) == byte)),
                None => Err(VmError::type_error(format!(
                    "a bytes-like object is required, not '{}'",
                    other.type_name()
                ))),
            },
        },
        Value::Tuple(items) => Ok(find_equal(items, item)?.is_some()),
        Value::List(items) => Ok(find_equal(&items.borrow(), item)?.is_some()),
        Value::Dict(dict) => Ok(dict.borrow().contains_key(item)),
        Value::Range(range) => Ok(match item {
            Value::Float(value) => value.fract() == 0.0 && range.contains(*value as i64),
            other => other.as_int().is_some_and(|value| range.contains(value)),
        }),
        Value::Iterator(_) => Ok(find_equal(&collect_iterable(container)?, item)?.is_some()),
        other => Err(VmError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

/// Resolves a possibly negative index against `len`.
fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let resolved = if index < 0 { index + len } else { index };
    (0..len).contains(&resolved).then_some(resolved as usize)
}

fn index_value(value: &Value, container: &str) -> Result<i64, VmError> {
    value.as_int().ok_or_else(|| {
        VmError::type_error(format!(
            "{} indices must be integers or slices, not {}",
            container,
            value.type_name()
        ))
    })
}

/// `(start, stop, step)` for a slice over a sequence of `len` items, as
/// `slice.indices` computes them.
pub fn slice_indices(slice: &SliceValue, len: usize) -> Result<(i64, i64, i64), VmError> {
    let len = len as i64;
    let bound = |value: &Value| -> Result<Option<i64>, VmError> {
        match value {
            Value::None => Ok(None),
            other => other.as_int().map(Some).ok_or_else(|| {
                VmError::type_error(
                    "slice indices must be integers or None or have an __index__ method",
                )
            }),
        }
    };
    let step = bound(&slice.step)?.unwrap_or(1);
    if step == 0 {
        return Err(VmError::value_error("slice step cannot be zero"));
    }
    let (lower, upper) = if step < 0 { (-1, len - 1) } else { (0, len) };
    let clamp = |value: Option<i64>, default: i64| match value {
        None => default,
        Some(v) if v < 0 => (v + len).max(lower),
        Some(v) => v.min(upper),
    };
    let start = clamp(bound(&slice.start)?, if step < 0 { upper } else { lower });
    let stop = clamp(bound(&slice.stop)?, if step < 0 { lower } else { upper });
    Ok((start, stop, step))
}

fn slice_positions(slice: &SliceValue, len: usize) -> Result<Vec<usize>, VmError> {
    let (start, stop, step) = slice_indices(slice, len)?;
    let mut positions = Vec::new();
    let mut index = start;
    while (step > 0 && index < stop) || (step < 0 && index > stop) {
        positions.push(index as usize);
        index += step;
    }
    Ok(positions)
}

fn pick<T: Clone>(items: &[T], positions: &[usize]) -> Vec<T> {
    positions.iter().map(|&i| items[i].clone()).collect()
}

pub fn get_item(container: &Value, key: &Value) -> Result<Value, VmError> {
    let out_of_range =
        |kind: &str| VmError::new(FaultKind::IndexError, format!("{} index out of range", kind));
    match (container, key) {
        (Value::Dict(dict), key) => dict
            .borrow()
            .get(key)
            .cloned()
            .ok_or_else(|| VmError::key_error(key.clone())),
        (Value::List(items), Value::Slice(slice)) => {
            let items = items.borrow();
            Ok(Value::list(pick(&items, &slice_positions(slice, items.len())?)))
        }
        (Value::Tuple(items), Value::Slice(slice)) => {
            Ok(Value::tuple(pick(items, &slice_positions(slice, items.len())?)))
        }
        (Value::Str(text), Value::Slice(slice)) => {
            let chars: Vec<char> = text.chars().collect();
            let picked = pick(&chars, &slice_positions(slice, chars.len())?);
            Ok(Value::from(picked.into_iter().collect::<String>()))
        }
        (Value::Bytes(bytes), Value::Slice(slice)) => {
            let picked = pick(bytes, &slice_positions(slice, bytes.len())?);
            Ok(Value::Bytes(Bytes::from(picked)))
        }
        (Value::Range(range), Value::Slice(slice)) => {
            let (start, stop, step) = slice_indices(slice, range.len())?;
            Ok(Value::Range(RangeValue {
                start: range.start + start * range.step,
                stop: range.start + stop * range.step,
                step: range.step * step,
            }))
        }
        (Value::List(items), key) => {
            let items = items.borrow();
            let index = index_value(key, "list")?;
            normalize_index(index, items.len())
                .map(|i| items[i].clone())
                .ok_or_else(|| out_of_range("list"))
        }
        (Value::Tuple(items), key) => {
            let index = index_value(key, "tuple")?;
            normalize_index(index, items.len())
                .map(|i| items[i].clone())
                .ok_or_else(|| out_of_range("tuple"))
        }
        (Value::Str(text), key) => {
            let index = index_value(key, "string")?;
            let count = text.chars().count();
            normalize_index(index, count)
                .and_then(|i| text.chars().nth(i))
                .map(|c| Value::from(c.to_string()))
                .ok_or_else(|| out_of_range("string"))
        }
        (Value::Bytes(bytes), key) => {
            let index = index_value(key, "byte")?;
            normalize_index(index, bytes.len())
                .map(|i| Value::Int(i64::from(bytes[i])))
                .ok_or_else(|| out_of_range("index"))
        }
        (Value::Range(range), key) => {
            let index = index_value(key, "range")?;
            normalize_index(index, range.len())
                .and_then(|i| range.get(i))
                .map(Value::Int)
                .ok_or_else(|| {
                    VmError::new(FaultKind::IndexError, "range object index out of range")
                })
        }
        (other, _) => Err(VmError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

pub fn set_item(container: &Value, key: &Value, value: Value) -> Result<(), VmError> {
    match container {
        Value::Dict(dict) => dict.borrow_mut().insert(key.clone(), value),
        Value::List(items) => {
            if let Value::Slice(slice) = key {
                let replacement = collect_iterable(&value)?;
                let mut items = items.borrow_mut();
                let (start, stop, step) = slice_indices(slice, items.len())?;
                if step == 1 {
                    let stop = stop.max(start) as usize;
                    items.splice(start as usize..stop, replacement);
                    return Ok(());
                }
                let positions = slice_positions(slice, items.len())?;
                if positions.len() != replacement.len() {
                    return Err(VmError::value_error(format!(
                        "attempt to assign sequence of size {} to extended slice of size {}",
                        replacement.len(),
                        positions.len()
                    )));
                }
                for (position, item) in positions.into_iter().zip(replacement) {
                    items[position] = item;
                }
                return Ok(());
            }
            let mut items = items.borrow_mut();
            let index = index_value(key, "list")?;
            let slot = normalize_index(index, items.len()).ok_or_else(|| {
                VmError::new(FaultKind::IndexError, "list assignment index out of range")
            })?;
            items[slot] = value;
            Ok(())
        }
        other => Err(VmError::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

pub fn delete_item(container: &Value, key: &Value) -> Result<(), VmError> {
    match container {
        Value::Dict(dict) => dict
            .borrow_mut()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| VmError::key_error(key.clone())),
        Value::List(items) => {
            let mut items = items.borrow_mut();
            if let Value::Slice(slice) = key {
                let mut positions = slice_positions(slice, items.len())?;
                positions.sort_unstable();
                for position in positions.into_iter().rev() {
                    items.remove(position);
                }
                return Ok(());
            }
            let index = index_value(key, "list")?;
            let slot = normalize_index(index, items.len()).ok_or_else(|| {
                VmError::new(FaultKind::IndexError, "list assignment index out of range")
            })?;
            items.remove(slot);
            Ok(())
        }
        other => Err(VmError::type_error(format!(
            "'{}' object doesn't support item deletion",
            other.type_name()
        ))),
    }
}

pub fn get_iter(value: &Value) -> Result<Value, VmError> {
    let state = match value {
        Value::Iterator(_) => return Ok(value.clone()),
        Value::List(list) => IterState::List {
            list: Rc::clone(list),
            index: 0,
        },
        Value::Range(range) => IterState::Range {
            next: range.start,
            remaining: range.len(),
            step: range.step,
        },
        Value::Tuple(items) => IterState::Items {
            items: items.to_vec(),
            index: 0,
        },
        Value::Str(text) => IterState::Items {
            items: text.chars().map(|c| Value::from(c.to_string())).collect(),
            index: 0,
        },
        Value::Bytes(bytes) => IterState::Items {
            items: bytes.iter().map(|b| Value::Int(i64::from(*b))).collect(),
            index: 0,
        },
        Value::Dict(dict) => IterState::Items {
            items: dict.borrow().keys(),
            index: 0,
        },
        other => {
            return Err(VmError::type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            )))
        }
    };
    Ok(Value::iterator(state))
}

pub fn iter_next(iterator: &Value) -> Result<Option<Value>, VmError> {
    match iterator {
        Value::Iterator(state) => Ok(state.borrow_mut().next_value()),
        other => Err(VmError::type_error(format!(
            "'{}' object is not an iterator",
            other.type_name()
        ))),
    }
}

pub fn collect_iterable(value: &Value) -> Result<Vec<Value>, VmError> {
    match value {
        Value::List(items) => Ok(items.borrow().clone()),
        Value::Tuple(items) => Ok(items.to_vec()),
        _ => {
            let iterator = get_iter(value)?;
            let mut items = Vec::new();
            while let Some(item) = iter_next(&iterator)? {
                items.push(item);
            }
            Ok(items)
        }
    }
}

pub fn unpack_sequence(value: &Value, count: usize) -> Result<Vec<Value>, VmError> {
    let items = collect_iterable(value).map_err(|_| {
        VmError::type_error(format!(
            "cannot unpack non-iterable {} object",
            value.type_name()
        ))
    })?;
    match items.len().cmp(&count) {
        Ordering::Less => Err(VmError::value_error(format!(
            "not enough values to unpack (expected {}, got {})",
            count,
            items.len()
        ))),
        Ordering::Greater => Err(VmError::value_error(format!(
            "too many values to unpack (expected {})",
            count
        ))),
        Ordering::Equal => Ok(items),
    }
}

pub fn length(value: &Value) -> Result<usize, VmError> {
    match value {
        Value::Str(text) => Ok(text.chars().count()),
        Value::Bytes(bytes) => Ok(bytes.len()),
        Value::Tuple(items) => Ok(items.len()),
        Value::List(items) => Ok(items.borrow().len()),
        Value::Dict(dict) => Ok(dict.borrow().len()),
        Value::Range(range) => Ok(range.len()),
        other => Err(VmError::type_error(format!(
            "object of type '{}' has no len()",
            other.type_name()
        ))),
    }
}

pub fn get_attribute(value: &Value, name: &str) -> Result<Value, VmError> {
    let found = match value {
        Value::Fault(fault) => fault.getattr(name),
        Value::Function(function) => match name {
            "__name__" => Some(Value::from(function.short_name())),
            "__qualname__" => Some(Value::from(function.name.as_str())),
            "__doc__" => Some(function.code.docstring()),
            "__defaults__" if function.defaults.is_empty() => Some(Value::None),
            "__defaults__" => Some(Value::tuple(function.defaults.clone())),
            _ => None,
        },
        Value::Class(class) => match name {
            "__name__" | "__qualname__" => Some(Value::from(class.name.as_str())),
            "__module__" => Some(
                class
                    .module
                    .as_deref()
                    .map(Value::from)
                    .unwrap_or_else(|| Value::from("builtins")),
            ),
            _ => None,
        },
        Value::Slice(slice) => match name {
            "start" => Some(slice.start.clone()),
            "stop" => Some(slice.stop.clone()),
            "step" => Some(slice.step.clone()),
            _ => None,
        },
        Value::Range(range) => match name {
            "start" => Some(Value::Int(range.start)),
            "stop" => Some(Value::Int(range.stop)),
            "step" => Some(Value::Int(range.step)),
            _ => None,
        },
        Value::Float(v) if name == "real" => Some(Value::Float(*v)),
        Value::Float(_) if name == "imag" => Some(Value::Float(0.0)),
        Value::Int(_) | Value::Bool(_) if name == "real" => value.as_int().map(Value::Int),
        Value::Int(_) | Value::Bool(_) if name == "imag" => Some(Value::Int(0)),
        _ => None,
    };
    if let Some(found) = found {
        return Ok(found);
    }
    if has_method(value, name) {
        return Ok(Value::method(value.clone(), name));
    }
    Err(VmError::named(
        FaultKind::AttributeError,
        format!("'{}' object has no attribute '{}'", value.type_name(), name),
        name,
    ))
}

/// Keyword arguments as a dict value.
pub fn kwargs_dict(kwargs: Vec<(String, Value)>) -> Result<Value, VmError> {
    let mut dict = Dict::new();
    for (key, value) in kwargs {
        dict.insert(Value::from(key), value)?;
    }
    Ok(Value::dict(dict))
}
