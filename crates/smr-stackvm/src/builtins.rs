//! The builtin functions visible to reconstructed code.
//!
//! The set is fixed and side-effect free: nothing here reaches the host
//! filesystem, network or process state.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::fault::{Fault, FaultClass, FaultKind, VmError};
use crate::ops::{self, collect_iterable, get_iter, iter_next, length, less_than, BinaryOp};
use crate::value::{Dict, IterState, RangeValue, Value};
use crate::vm::Vm;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum Builtin {
    Abs,
    All,
    Any,
    Bool,
    Dict,
    Enumerate,
    Float,
    Int,
    Isinstance,
    Len,
    List,
    Max,
    Min,
    Range,
    Repr,
    Round,
    Sorted,
    Str,
    Sum,
    Tuple,
    Zip,
}

type Kwargs = Vec<(String, Value)>;

fn arity(name: Builtin, args: &[Value], min: usize, max: usize) -> Result<(), VmError> {
    if (min..=max).contains(&args.len()) {
        return Ok(());
    }
    let message = if min == max && min == 1 {
        format!("{}() takes exactly one argument ({} given)", name, args.len())
    } else if args.len() < min {
        format!(
            "{} expected at least {} argument{}, got {}",
            name,
            min,
            if min == 1 { "" } else { "s" },
            args.len()
        )
    } else {
        format!(
            "{} expected at most {} argument{}, got {}",
            name,
            max,
            if max == 1 { "" } else { "s" },
            args.len()
        )
    };
    Err(VmError::type_error(message))
}

fn no_keywords(name: impl std::fmt::Display, kwargs: &Kwargs) -> Result<(), VmError> {
    if kwargs.is_empty() {
        Ok(())
    } else {
        Err(VmError::type_error(format!(
            "{}() takes no keyword arguments",
            name
        )))
    }
}

/// Pulls the named keyword arguments out of `kwargs`, rejecting any other.
pub(crate) fn take_keywords<const N: usize>(
    function: &str,
    kwargs: Kwargs,
    allowed: [&str; N],
) -> Result<[Option<Value>; N], VmError> {
    let mut found: [Option<Value>; N] = std::array::from_fn(|_| None);
    for (key, value) in kwargs {
        let slot = allowed.iter().position(|name| *name == key).ok_or_else(|| {
            VmError::type_error(format!(
                "'{}' is an invalid keyword argument for {}()",
                key, function
            ))
        })?;
        found[slot] = Some(value);
    }
    Ok(found)
}

fn integer_arg(value: &Value) -> Result<i64, VmError> {
    value.as_int().ok_or_else(|| {
        VmError::type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            value.type_name()
        ))
    })
}

pub fn call_builtin(
    vm: &mut Vm,
    builtin: Builtin,
    args: Vec<Value>,
    kwargs: Kwargs,
) -> Result<Value, VmError> {
    match builtin {
        Builtin::Sorted => {
            arity(builtin, &args, 1, 1)?;
            let [key, reverse] = take_keywords("sorted", kwargs, ["key", "reverse"])?;
            let items = collect_iterable(&args[0])?;
            let reverse = reverse.map(|r| r.is_truthy()).unwrap_or(false);
            Ok(Value::list(sort_values(vm, items, key, reverse)?))
        }
        Builtin::Max | Builtin::Min => extreme(vm, builtin, args, kwargs),
        Builtin::Dict => build_dict(args, kwargs),
        other => {
            no_keywords(other, &kwargs)?;
            call_plain(other, args)
        }
    }
}

fn call_plain(builtin: Builtin, args: Vec<Value>) -> Result<Value, VmError> {
    match builtin {
        Builtin::Abs => {
            arity(builtin, &args, 1, 1)?;
            match &args[0] {
                Value::Float(v) => Ok(Value::Float(v.abs())),
                other => match other.as_int() {
                    Some(v) => v.checked_abs().map(Value::Int).ok_or_else(VmError::overflow),
                    None => Err(VmError::type_error(format!(
                        "bad operand type for abs(): '{}'",
                        other.type_name()
                    ))),
                },
            }
        }
        Builtin::All | Builtin::Any => {
            arity(builtin, &args, 1, 1)?;
            let want = builtin == Builtin::Any;
            let iterator = get_iter(&args[0])?;
            while let Some(item) = iter_next(&iterator)? {
                if item.is_truthy() == want {
                    return Ok(Value::Bool(want));
                }
            }
            Ok(Value::Bool(!want))
        }
        Builtin::Bool => {
            arity(builtin, &args, 0, 1)?;
            Ok(Value::Bool(args.first().is_some_and(Value::is_truthy)))
        }
        Builtin::Enumerate => {
            arity(builtin, &args, 1, 2)?;
            let start = args.get(1).map(integer_arg).transpose()?.unwrap_or(0);
            let items = collect_iterable(&args[0])?
                .into_iter()
                .enumerate()
                .map(|(index, item)| {
                    start
                        .checked_add(index as i64)
                        .map(|n| Value::tuple(vec![Value::Int(n), item]))
                        .ok_or_else(VmError::overflow)
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::iterator(IterState::Items { items, index: 0 }))
        }
        Builtin::Float => {
            arity(builtin, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::Float(0.0)),
                Some(Value::Str(text)) => parse_float(text).map(Value::Float),
                Some(other) => other.as_float().map(Value::Float).ok_or_else(|| {
                    VmError::type_error(format!(
                        "float() argument must be a string or a number, not '{}'",
                        other.type_name()
                    ))
                }),
            }
        }
        Builtin::Int => {
            arity(builtin, &args, 0, 2)?;
            match args.as_slice() {
                [] => Ok(Value::Int(0)),
                [Value::Str(text)] => parse_int(text, 10).map(Value::Int),
                [Value::Str(text), base] => {
                    let base = integer_arg(base)?;
                    if !(base == 0 || (2..=36).contains(&base)) {
                        return Err(VmError::value_error("int() base must be >= 2 and <= 36, or 0"));
                    }
                    parse_int(text, base as u32).map(Value::Int)
                }
                [_, _] => Err(VmError::type_error(
                    "int() can't convert non-string with explicit base",
                )),
                [Value::Float(v)] => float_to_int(*v).map(Value::Int),
                [other] => other.as_int().map(Value::Int).ok_or_else(|| {
                    VmError::type_error(format!(
                        "int() argument must be a string, a bytes-like object or a number, not '{}'",
                        other.type_name()
                    ))
                }),
                _ => Err(VmError::type_error("int() takes at most 2 arguments")),
            }
        }
        Builtin::Isinstance => {
            arity(builtin, &args, 2, 2)?;
            Ok(Value::Bool(is_instance(&args[0], &args[1])?))
        }
        Builtin::Len => {
            arity(builtin, &args, 1, 1)?;
            Ok(Value::Int(length(&args[0])? as i64))
        }
        Builtin::List => {
            arity(builtin, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::list(Vec::new())),
                Some(value) => Ok(Value::list(collect_iterable(value)?)),
            }
        }
        Builtin::Tuple => {
            arity(builtin, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::tuple(Vec::new())),
                Some(Value::Tuple(_)) => Ok(args[0].clone()),
                Some(value) => Ok(Value::tuple(collect_iterable(value)?)),
            }
        }
        Builtin::Range => {
            arity(builtin, &args, 1, 3)?;
            let bounds = args.iter().map(integer_arg).collect::<Result<Vec<_>, _>>()?;
            let (start, stop, step) = match bounds.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => return Err(VmError::type_error("range expected at most 3 arguments")),
            };
            if step == 0 {
                return Err(VmError::value_error("range() arg 3 must not be zero"));
            }
            Ok(Value::Range(RangeValue { start, stop, step }))
        }
        Builtin::Repr => {
            arity(builtin, &args, 1, 1)?;
            Ok(Value::from(args[0].repr()))
        }
        Builtin::Str => {
            arity(builtin, &args, 0, 1)?;
            Ok(Value::from(args.first().map(Value::to_text).unwrap_or_default()))
        }
        Builtin::Round => {
            arity(builtin, &args, 1, 2)?;
            let digits = match args.get(1) {
                None | Some(Value::None) => None,
                Some(value) => Some(integer_arg(value)?),
            };
            round(&args[0], digits)
        }
        Builtin::Sum => {
            arity(builtin, &args, 1, 2)?;
            let mut total = args.get(1).cloned().unwrap_or(Value::Int(0));
            if matches!(total, Value::Str(_)) {
                return Err(VmError::type_error(
                    "sum() can't sum strings [use ''.join(seq) instead]",
                ));
            }
            let iterator = get_iter(&args[0])?;
            while let Some(item) = iter_next(&iterator)? {
                total = ops::binary_op(BinaryOp::Add, &total, &item)?;
            }
            Ok(total)
        }
        Builtin::Zip => {
            let columns = args
                .iter()
                .map(collect_iterable)
                .collect::<Result<Vec<_>, _>>()?;
            let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
            let items = (0..rows)
                .map(|row| Value::tuple(columns.iter().map(|c| c[row].clone()).collect()))
                .collect();
            Ok(Value::iterator(IterState::Items { items, index: 0 }))
        }
        Builtin::Sorted | Builtin::Max | Builtin::Min | Builtin::Dict => Err(
            VmError::system_error(format!("{}() needs the interpreter", builtin)),
        ),
    }
}

fn is_instance(value: &Value, class: &Value) -> Result<bool, VmError> {
    match class {
        Value::Class(class) => Ok(match value {
            Value::Fault(fault) => {
                fault.class == *class || (class.module.is_none() && class.name == "Exception")
            }
            _ => false,
        }),
        Value::Builtin(builtin) => Ok(matches!(
            (builtin, value),
            (Builtin::Int, Value::Int(_) | Value::Bool(_))
                | (Builtin::Bool, Value::Bool(_))
                | (Builtin::Float, Value::Float(_))
                | (Builtin::Str, Value::Str(_))
                | (Builtin::List, Value::List(_))
                | (Builtin::Tuple, Value::Tuple(_))
                | (Builtin::Dict, Value::Dict(_))
                | (Builtin::Range, Value::Range(_))
        )),
        Value::Tuple(options) => {
            for option in options.iter() {
                if is_instance(value, option)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => Err(VmError::type_error(
            "isinstance() arg 2 must be a type or tuple of types",
        )),
    }
}

fn parse_float(text: &str) -> Result<f64, VmError> {
    let trimmed = text.trim();
    let lowered = trimmed.to_ascii_lowercase();
    let unsigned = lowered.trim_start_matches(['+', '-']);
    let negative = lowered.starts_with('-');
    let special = match unsigned {
        "nan" => Some(f64::NAN),
        "inf" | "infinity" => Some(f64::INFINITY),
        _ => None,
    };
    if let Some(value) = special {
        if lowered.len() - unsigned.len() <= 1 {
            return Ok(if negative { -value } else { value });
        }
    }
    let cleaned = trimmed.replace('_', "");
    if !trimmed.contains("__") && !trimmed.starts_with('_') && !trimmed.ends_with('_') {
        if let Ok(value) = cleaned.parse::<f64>() {
            if cleaned.chars().all(|c| c.is_ascii_digit() || "+-.eE".contains(c)) {
                return Ok(value);
            }
        }
    }
    Err(VmError::value_error(format!(
        "could not convert string to float: {}",
        Value::from(text).repr()
    )))
}

fn parse_int(text: &str, base: u32) -> Result<i64, VmError> {
    let invalid = || {
        VmError::value_error(format!(
            "invalid literal for int() with base {}: {}",
            base,
            Value::from(text).repr()
        ))
    };
    let trimmed = text.trim();
    let (negative, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let lowered = body.to_ascii_lowercase();
    let (radix, digits) = match (base, lowered.get(..2)) {
        (0 | 16, Some("0x")) => (16, lowered[2..].strip_prefix('_').unwrap_or(&lowered[2..])),
        (0 | 8, Some("0o")) => (8, lowered[2..].strip_prefix('_').unwrap_or(&lowered[2..])),
        (0 | 2, Some("0b")) => (2, lowered[2..].strip_prefix('_').unwrap_or(&lowered[2..])),
        (0, _) => {
            if lowered.len() > 1 && lowered.starts_with('0') && !lowered.trim_matches('0').is_empty() {
                return Err(invalid());
            }
            (10, lowered.as_str())
        }
        (base, _) => (base, lowered.as_str()),
    };
    if digits.is_empty()
        || digits.starts_with(['_', '+', '-'])
        || digits.ends_with('_')
        || digits.contains("__")
    {
        return Err(invalid());
    }
    let digits = digits.replace('_', "");
    let magnitude = i128::from_str_radix(&digits, radix).map_err(|_| invalid())?;
    let value = if negative { -magnitude } else { magnitude };
    i64::try_from(value).map_err(|_| VmError::overflow())
}

fn float_to_int(value: f64) -> Result<i64, VmError> {
    if value.is_nan() {
        return Err(VmError::value_error("cannot convert float NaN to integer"));
    }
    if value.is_infinite() {
        return Err(VmError::new(
            FaultKind::OverflowError,
            "cannot convert float infinity to integer",
        ));
    }
    let truncated = value.trunc();
    if truncated < i64::MIN as f64 || truncated >= i64::MAX as f64 {
        return Err(VmError::overflow());
    }
    Ok(truncated as i64)
}

/// Round half to even, with `ndigits` as Python's `round` takes it.
fn round(value: &Value, digits: Option<i64>) -> Result<Value, VmError> {
    match (value, digits) {
        (Value::Float(v), None) => {
            let rounded = v.round();
            let rounded = if (v - v.trunc()).abs() == 0.5 && rounded % 2.0 != 0.0 {
                rounded - v.signum()
            } else {
                rounded
            };
            float_to_int(rounded).map(Value::Int)
        }
        (Value::Float(v), Some(digits)) => {
            if !v.is_finite() || digits > 308 {
                return Ok(Value::Float(*v));
            }
            if digits < 0 {
                let factor = 10f64.powi((-digits).min(308) as i32);
                let scaled = v / factor;
                let rounded = scaled.round();
                let rounded = if (scaled - scaled.trunc()).abs() == 0.5 && rounded % 2.0 != 0.0 {
                    rounded - scaled.signum()
                } else {
                    rounded
                };
                return Ok(Value::Float(rounded * factor));
            }
            let text = format!("{:.*}", digits as usize, v);
            Ok(Value::Float(text.parse().unwrap_or(*v)))
        }
        (other, digits) => {
            let v = other.as_int().ok_or_else(|| {
                VmError::type_error(format!(
                    "type {} doesn't define __round__ method",
                    other.type_name()
                ))
            })?;
            let Some(digits) = digits.filter(|d| *d < 0) else {
                return Ok(Value::Int(v));
            };
            if digits < -18 {
                return Ok(Value::Int(0));
            }
            let factor = 10i64.pow((-digits) as u32);
            let remainder = v.rem_euclid(factor);
            let base = v - remainder;
            let doubled = remainder * 2;
            let rounded = match doubled.cmp(&factor) {
                Ordering::Less => base,
                Ordering::Greater => base.checked_add(factor).ok_or_else(VmError::overflow)?,
                Ordering::Equal if (base / factor) % 2 == 0 => base,
                Ordering::Equal => base.checked_add(factor).ok_or_else(VmError::overflow)?,
            };
            Ok(Value::Int(rounded))
        }
    }
}

/// Stable sort on `<`, optionally by a key function. The first comparison
/// or key failure aborts the sort.
pub(crate) fn sort_values(
    vm: &mut Vm,
    items: Vec<Value>,
    key: Option<Value>,
    reverse: bool,
) -> Result<Vec<Value>, VmError> {
    let key = key.filter(|key| !matches!(key, Value::None));
    let mut keyed = Vec::with_capacity(items.len());
    for item in items {
        let sort_key = match &key {
            Some(function) => vm.call(function, vec![item.clone()], Vec::new())?,
            None => item.clone(),
        };
        keyed.push((sort_key, item));
    }
    if reverse {
        keyed.reverse();
    }
    let failure: RefCell<Option<VmError>> = RefCell::new(None);
    keyed.sort_by(|(a, _), (b, _)| {
        if failure.borrow().is_some() {
            return Ordering::Equal;
        }
        let ordering = less_than(a, b).and_then(|less| {
            if less {
                Ok(Ordering::Less)
            } else if less_than(b, a)? {
                Ok(Ordering::Greater)
            } else {
                Ok(Ordering::Equal)
            }
        });
        ordering.unwrap_or_else(|err| {
            *failure.borrow_mut() = Some(err);
            Ordering::Equal
        })
    });
    if let Some(err) = failure.into_inner() {
        return Err(err);
    }
    if reverse {
        keyed.reverse();
    }
    Ok(keyed.into_iter().map(|(_, item)| item).collect())
}

fn extreme(vm: &mut Vm, builtin: Builtin, args: Vec<Value>, kwargs: Kwargs) -> Result<Value, VmError> {
    let name = builtin.to_string();
    let [key, default] = take_keywords(&name, kwargs, ["key", "default"])?;
    let items = match args.len() {
        0 => {
            return Err(VmError::type_error(format!(
                "{} expected 1 argument, got 0",
                name
            )))
        }
        1 => collect_iterable(&args[0])?,
        _ => {
            if default.is_some() {
                return Err(VmError::type_error(format!(
                    "Cannot specify a default for {}() with multiple positional arguments",
                    name
                )));
            }
            args
        }
    };
    let key = key.filter(|key| !matches!(key, Value::None));
    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let item_key = match &key {
            Some(function) => vm.call(function, vec![item.clone()], Vec::new())?,
            None => item.clone(),
        };
        let replace = match &best {
            None => true,
            Some((best_key, _)) if builtin == Builtin::Max => less_than(best_key, &item_key)?,
            Some((best_key, _)) => less_than(&item_key, best_key)?,
        };
        if replace {
            best = Some((item_key, item));
        }
    }
    match (best, default) {
        (Some((_, item)), _) => Ok(item),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(VmError::value_error(format!(
            "{}() arg is an empty sequence",
            name
        ))),
    }
}

fn build_dict(args: Vec<Value>, kwargs: Kwargs) -> Result<Value, VmError> {
    arity(Builtin::Dict, &args, 0, 1)?;
    let mut dict = Dict::new();
    if let Some(source) = args.first() {
        update_dict(&mut dict, source)?;
    }
    for (key, value) in kwargs {
        dict.insert(Value::from(key), value)?;
    }
    Ok(Value::dict(dict))
}

/// `dict.update` from a mapping or an iterable of pairs.
pub(crate) fn update_dict(dict: &mut Dict, source: &Value) -> Result<(), VmError> {
    if let Value::Dict(other) = source {
        let entries = other.borrow().entries().to_vec();
        for (key, value) in entries {
            dict.insert(key, value)?;
        }
        return Ok(());
    }
    for (index, pair) in collect_iterable(source)?.into_iter().enumerate() {
        let items = collect_iterable(&pair).map_err(|_| {
            VmError::type_error(format!(
                "cannot convert dictionary update sequence element #{} to a sequence",
                index
            ))
        })?;
        let [key, value]: [Value; 2] = items.try_into().map_err(|items: Vec<Value>| {
            VmError::value_error(format!(
                "dictionary update sequence element #{} has length {}; 2 is required",
                index,
                items.len()
            ))
        })?;
        dict.insert(key, value)?;
    }
    Ok(())
}

/// Calling a fault class builds a fault instance.
pub fn instantiate(class: &Rc<FaultClass>, args: Vec<Value>, kwargs: &Kwargs) -> Result<Value, VmError> {
    no_keywords(&class.name, kwargs)?;
    Ok(Value::Fault(Fault::new(Rc::clone(class), args)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(builtin: Builtin, args: Vec<Value>) -> Result<Value, VmError> {
        let mut vm = Vm::new();
        call_builtin(&mut vm, builtin, args, Vec::new())
    }

    #[test]
    fn names_are_lowercase() {
        assert_eq!(Builtin::Isinstance.to_string(), "isinstance");
        assert_eq!("sorted".parse::<Builtin>().ok(), Some(Builtin::Sorted));
    }

    #[test]
    fn int_parsing() {
        assert!(matches!(call(Builtin::Int, vec![Value::from(" -12 ")]), Ok(Value::Int(-12))));
        assert!(matches!(
            call(Builtin::Int, vec![Value::from("ff"), Value::Int(16)]),
            Ok(Value::Int(255))
        ));
        let err = call(Builtin::Int, vec![Value::from("abc")]).expect_err("bad literal");
        assert_eq!(err.fault.text(), "invalid literal for int() with base 10: 'abc'");
        assert!(matches!(call(Builtin::Int, vec![Value::Float(-2.7)]), Ok(Value::Int(-2))));
    }

    #[test]
    fn rounding_is_half_even() {
        assert!(matches!(call(Builtin::Round, vec![Value::Float(2.5)]), Ok(Value::Int(2))));
        assert!(matches!(call(Builtin::Round, vec![Value::Float(3.5)]), Ok(Value::Int(4))));
        assert!(matches!(
            call(Builtin::Round, vec![Value::Int(1250), Value::Int(-2)]),
            Ok(Value::Int(1200))
        ));
        match call(Builtin::Round, vec![Value::Float(3.14159), Value::Int(2)]) {
            Ok(Value::Float(v)) => assert_eq!(v, 3.14),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn sorted_is_stable_and_reversible() {
        let mut vm = Vm::new();
        let items = Value::list(vec![Value::Int(3), Value::Int(1), Value::Int(2)]);
        let sorted = call_builtin(
            &mut vm,
            Builtin::Sorted,
            vec![items],
            vec![("reverse".to_string(), Value::Bool(true))],
        )
        .expect("sorted");
        assert_eq!(sorted.repr(), "[3, 2, 1]");
        let err = call(
            Builtin::Sorted,
            vec![Value::list(vec![Value::Int(1), Value::from("a")])],
        )
        .expect_err("mixed");
        assert_eq!(err.kind_name(), "TypeError");
    }

    #[test]
    fn min_max_and_empty_sequences() {
        assert!(matches!(
            call(Builtin::Max, vec![Value::Int(1), Value::Int(5), Value::Int(3)]),
            Ok(Value::Int(5))
        ));
        let err = call(Builtin::Min, vec![Value::list(vec![])]).expect_err("empty");
        assert_eq!(err.fault.text(), "min() arg is an empty sequence");
    }

    #[test]
    fn sum_and_zip() {
        let total = call(Builtin::Sum, vec![Value::Range(RangeValue { start: 0, stop: 5, step: 1 })])
            .expect("sum");
        assert!(matches!(total, Value::Int(10)));
        let zipped = call(
            Builtin::Zip,
            vec![Value::from("ab"), Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)])],
        )
        .and_then(|z| collect_iterable(&z))
        .expect("zip");
        assert_eq!(Value::list(zipped).repr(), "[('a', 1), ('b', 2)]");
    }

    #[test]
    fn keyword_arguments_are_rejected_where_unsupported() {
        let mut vm = Vm::new();
        let err = call_builtin(
            &mut vm,
            Builtin::Len,
            vec![Value::from("x")],
            vec![("x".to_string(), Value::None)],
        )
        .expect_err("keywords");
        assert_eq!(err.fault.text(), "len() takes no keyword arguments");
    }
}
