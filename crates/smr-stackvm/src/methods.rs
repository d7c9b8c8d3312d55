//! Methods of the builtin value types.

use crate::builtins::{sort_values, take_keywords, update_dict};
use crate::fault::{FaultKind, VmError};
use crate::format::str_format;
use crate::ops::{collect_iterable, kwargs_dict};
use crate::value::{find_equal, values_equal, Dict, Items, Value};
use crate::vm::Vm;

const STR_METHODS: &[&str] = &[
    "count",
    "endswith",
    "find",
    "format",
    "isalpha",
    "isdigit",
    "join",
    "lower",
    "lstrip",
    "replace",
    "rstrip",
    "split",
    "startswith",
    "strip",
    "upper",
];

const LIST_METHODS: &[&str] = &[
    "append", "clear", "copy", "count", "extend", "index", "insert", "pop", "remove", "reverse",
    "sort",
];

const DICT_METHODS: &[&str] = &[
    "clear",
    "copy",
    "get",
    "items",
    "keys",
    "pop",
    "setdefault",
    "update",
    "values",
];

const TUPLE_METHODS: &[&str] = &["count", "index"];

pub fn has_method(receiver: &Value, name: &str) -> bool {
    let table: &[&str] = match receiver {
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Tuple(_) => TUPLE_METHODS,
        Value::Fault(_) => &["with_traceback"],
        _ => &[],
    };
    table.contains(&name)
}

fn expect_args(method: &str, args: &[Value], min: usize, max: usize) -> Result<(), VmError> {
    if (min..=max).contains(&args.len()) {
        return Ok(());
    }
    let message = match (min, max) {
        (0, 0) => format!("{}() takes no arguments ({} given)", method, args.len()),
        (1, 1) => format!(
            "{}() takes exactly one argument ({} given)",
            method,
            args.len()
        ),
        _ if args.len() < min => format!(
            "{} expected at least {} argument{}, got {}",
            method,
            min,
            if min == 1 { "" } else { "s" },
            args.len()
        ),
        _ => format!(
            "{} expected at most {} argument{}, got {}",
            method,
            max,
            if max == 1 { "" } else { "s" },
            args.len()
        ),
    };
    Err(VmError::type_error(message))
}

fn str_arg<'a>(method: &str, value: &'a Value) -> Result<&'a str, VmError> {
    value.as_str().ok_or_else(|| {
        VmError::type_error(format!(
            "{}() argument must be str, not {}",
            method,
            value.type_name()
        ))
    })
}

fn optional_str<'a>(method: &str, value: Option<&'a Value>) -> Result<Option<&'a str>, VmError> {
    match value {
        None | Some(Value::None) => Ok(None),
        Some(value) => str_arg(method, value).map(Some),
    }
}

pub fn call_method(
    vm: &mut Vm,
    receiver: &Value,
    name: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<Value, VmError> {
    match receiver {
        Value::Str(text) => {
            if name == "format" {
                let kwargs = match kwargs_dict(kwargs)? {
                    Value::Dict(dict) => dict.borrow().clone(),
                    _ => Dict::new(),
                };
                return Ok(Value::from(str_format(text, &args, &kwargs)?));
            }
            if name == "split" {
                let [sep, maxsplit] = take_keywords("split", kwargs, ["sep", "maxsplit"])?;
                return str_split(text, args, sep, maxsplit);
            }
            refuse_keywords(name, &kwargs)?;
            str_method(text, name, &args)
        }
        Value::List(_) => {
            if name == "sort" {
                expect_args("sort", &args, 0, 0)?;
                let [key, reverse] = take_keywords("sort", kwargs, ["key", "reverse"])?;
                let Value::List(items) = receiver else {
                    return Ok(Value::None);
                };
                let current = items.borrow().clone();
                let reverse = reverse.is_some_and(|r| r.is_truthy());
                let sorted = sort_values(vm, current, key, reverse)?;
                *items.borrow_mut() = Items::from(sorted);
                return Ok(Value::None);
            }
            refuse_keywords(name, &kwargs)?;
            list_method(receiver, name, args)
        }
        Value::Dict(_) => {
            if name == "update" {
                expect_args("update", &args, 0, 1)?;
                if let Value::Dict(dict) = receiver {
                    let mut merged = dict.borrow().clone();
                    if let Some(source) = args.first() {
                        update_dict(&mut merged, source)?;
                    }
                    for (key, value) in kwargs {
                        merged.insert(Value::from(key), value)?;
                    }
                    *dict.borrow_mut() = merged;
                }
                return Ok(Value::None);
            }
            refuse_keywords(name, &kwargs)?;
            dict_method(receiver, name, args)
        }
        Value::Tuple(items) if has_method(receiver, name) => {
            refuse_keywords(name, &kwargs)?;
            sequence_search(&format!("tuple.{}", name), items, name, &args)
        }
        Value::Fault(_) if name == "with_traceback" => {
            expect_args("with_traceback", &args, 1, 1)?;
            Ok(receiver.clone())
        }
        other => Err(VmError::named(
            FaultKind::AttributeError,
            format!("'{}' object has no attribute '{}'", other.type_name(), name),
            name,
        )),
    }
}

fn refuse_keywords(name: &str, kwargs: &[(String, Value)]) -> Result<(), VmError> {
    if kwargs.is_empty() {
        Ok(())
    } else {
        Err(VmError::type_error(format!(
            "{}() takes no keyword arguments",
            name
        )))
    }
}

fn no_attribute(receiver: &str, name: &str) -> VmError {
    VmError::named(
        FaultKind::AttributeError,
        format!("'{}' object has no attribute '{}'", receiver, name),
        name,
    )
}

fn str_method(text: &str, name: &str, args: &[Value]) -> Result<Value, VmError> {
    match name {
        "upper" => {
            expect_args(name, args, 0, 0)?;
            Ok(Value::from(text.to_uppercase()))
        }
        "lower" => {
            expect_args(name, args, 0, 0)?;
            Ok(Value::from(text.to_lowercase()))
        }
        "strip" | "lstrip" | "rstrip" => {
            expect_args(name, args, 0, 1)?;
            let chars: Option<Vec<char>> =
                optional_str(name, args.first())?.map(|set| set.chars().collect());
            let matches = |c: char| match &chars {
                Some(set) => set.contains(&c),
                None => c.is_whitespace(),
            };
            let stripped = match name {
                "strip" => text.trim_matches(matches),
                "lstrip" => text.trim_start_matches(matches),
                _ => text.trim_end_matches(matches),
            };
            Ok(Value::from(stripped))
        }
        "join" => {
            expect_args(name, args, 1, 1)?;
            let mut parts = Vec::new();
            for (index, item) in collect_iterable(&args[0])?.into_iter().enumerate() {
                match item {
                    Value::Str(part) => parts.push(part.to_string()),
                    other => {
                        return Err(VmError::type_error(format!(
                            "sequence item {}: expected str instance, {} found",
                            index,
                            other.type_name()
                        )))
                    }
                }
            }
            Ok(Value::from(parts.join(text)))
        }
        "replace" => {
            expect_args(name, args, 2, 3)?;
            let old = str_arg(name, &args[0])?;
            let new = str_arg(name, &args[1])?;
            let limit = match args.get(2) {
                Some(count) => count.as_int().ok_or_else(|| {
                    VmError::type_error(format!(
                        "'{}' object cannot be interpreted as an integer",
                        count.type_name()
                    ))
                })?,
                None => -1,
            };
            Ok(Value::from(if limit < 0 {
                text.replace(old, new)
            } else {
                text.replacen(old, new, limit as usize)
            }))
        }
        "startswith" | "endswith" => {
            expect_args(name, args, 1, 1)?;
            let candidates = match &args[0] {
                Value::Tuple(items) => items.to_vec(),
                other => vec![other.clone()],
            };
            for candidate in &candidates {
                let affix = candidate.as_str().ok_or_else(|| {
                    VmError::type_error(format!(
                        "{} first arg must be str or a tuple of str, not {}",
                        name,
                        candidate.type_name()
                    ))
                })?;
                let hit = if name == "startswith" {
                    text.starts_with(affix)
                } else {
                    text.ends_with(affix)
                };
                if hit {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        "find" => {
            expect_args(name, args, 1, 1)?;
            let needle = str_arg(name, &args[0])?;
            Ok(Value::Int(match text.find(needle) {
                Some(byte) => text[..byte].chars().count() as i64,
                None => -1,
            }))
        }
        "count" => {
            expect_args(name, args, 1, 1)?;
            let needle = str_arg(name, &args[0])?;
            let count = if needle.is_empty() {
                text.chars().count() + 1
            } else {
                text.matches(needle).count()
            };
            Ok(Value::Int(count as i64))
        }
        "isdigit" => {
            expect_args(name, args, 0, 0)?;
            Ok(Value::Bool(
                !text.is_empty() && text.chars().all(|c| c.is_ascii_digit()),
            ))
        }
        "isalpha" => {
            expect_args(name, args, 0, 0)?;
            Ok(Value::Bool(
                !text.is_empty() && text.chars().all(char::is_alphabetic),
            ))
        }
        other => Err(no_attribute("str", other)),
    }
}

fn str_split(
    text: &str,
    args: Vec<Value>,
    sep: Option<Value>,
    maxsplit: Option<Value>,
) -> Result<Value, VmError> {
    expect_args("split", &args, 0, 2)?;
    let mut args = args.into_iter();
    let sep = args.next().or(sep);
    let maxsplit = args.next().or(maxsplit);
    let limit = match &maxsplit {
        None => -1,
        Some(value) => value.as_int().ok_or_else(|| {
            VmError::type_error(format!(
                "'{}' object cannot be interpreted as an integer",
                value.type_name()
            ))
        })?,
    };
    let parts: Vec<Value> = match optional_str("split", sep.as_ref())? {
        Some("") => return Err(VmError::value_error("empty separator")),
        Some(separator) if limit < 0 => text.split(separator).map(Value::from).collect(),
        Some(separator) => text
            .splitn(limit as usize + 1, separator)
            .map(Value::from)
            .collect(),
        None => {
            let mut parts = Vec::new();
            let mut rest = text.trim_start();
            while !rest.is_empty() {
                if limit >= 0 && parts.len() as i64 == limit {
                    parts.push(Value::from(rest.trim_end()));
                    break;
                }
                let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                parts.push(Value::from(&rest[..end]));
                rest = rest[end..].trim_start();
            }
            parts
        }
    };
    Ok(Value::list(parts))
}

fn sequence_search(
    label: &str,
    items: &[Value],
    name: &str,
    args: &[Value],
) -> Result<Value, VmError> {
    expect_args(name, args, 1, 1)?;
    let needle = &args[0];
    match name {
        "count" => {
            let mut count = 0;
            for item in items {
                if values_equal(item, needle)? {
                    count += 1;
                }
            }
            Ok(Value::Int(count))
        }
        _ => find_equal(items, needle)?
            .map(|index| Value::Int(index as i64))
            .ok_or_else(|| {
                VmError::value_error(if label.starts_with("tuple") {
                    format!("{}(x): x not in tuple", label)
                } else {
                    format!("{} is not in list", needle.repr())
                })
            }),
    }
}

fn list_method(receiver: &Value, name: &str, args: Vec<Value>) -> Result<Value, VmError> {
    let Value::List(list) = receiver else {
        return Err(no_attribute(&receiver.type_name(), name));
    };
    match name {
        "append" => {
            expect_args(name, &args, 1, 1)?;
            list.borrow_mut().extend(args);
            Ok(Value::None)
        }
        "extend" => {
            expect_args(name, &args, 1, 1)?;
            let extra = collect_iterable(&args[0])?;
            list.borrow_mut().extend(extra);
            Ok(Value::None)
        }
        "pop" => {
            expect_args(name, &args, 0, 1)?;
            let mut items = list.borrow_mut();
            if items.is_empty() {
                return Err(VmError::new(FaultKind::IndexError, "pop from empty list"));
            }
            let len = items.len() as i64;
            let index = match args.first() {
                Some(value) => value.as_int().ok_or_else(|| {
                    VmError::type_error(format!(
                        "'{}' object cannot be interpreted as an integer",
                        value.type_name()
                    ))
                })?,
                None => -1,
            };
            let resolved = if index < 0 { index + len } else { index };
            if !(0..len).contains(&resolved) {
                return Err(VmError::new(FaultKind::IndexError, "pop index out of range"));
            }
            Ok(items.remove(resolved as usize))
        }
        "insert" => {
            expect_args(name, &args, 2, 2)?;
            let mut args = args.into_iter();
            let (Some(index), Some(item)) = (args.next(), args.next()) else {
                return Ok(Value::None);
            };
            let index = index.as_int().ok_or_else(|| {
                VmError::type_error(format!(
                    "'{}' object cannot be interpreted as an integer",
                    index.type_name()
                ))
            })?;
            let mut items = list.borrow_mut();
            let len = items.len() as i64;
            let position = if index < 0 {
                (index + len).max(0)
            } else {
                index.min(len)
            };
            items.insert(position as usize, item);
            Ok(Value::None)
        }
        "index" | "count" => {
            let items = list.borrow().clone();
            sequence_search(&format!("list.{}", name), &items, name, &args)
        }
        "reverse" => {
            expect_args(name, &args, 0, 0)?;
            list.borrow_mut().reverse();
            Ok(Value::None)
        }
        "copy" => {
            expect_args(name, &args, 0, 0)?;
            Ok(Value::list(list.borrow().clone()))
        }
        "clear" => {
            expect_args(name, &args, 0, 0)?;
            list.borrow_mut().clear();
            Ok(Value::None)
        }
        "remove" => {
            expect_args(name, &args, 1, 1)?;
            let snapshot = list.borrow().clone();
            let position = find_equal(&snapshot, &args[0])?
                .ok_or_else(|| VmError::value_error("list.remove(x): x not in list"))?;
            list.borrow_mut().remove(position);
            Ok(Value::None)
        }
        other => Err(no_attribute("list", other)),
    }
}

fn dict_method(receiver: &Value, name: &str, args: Vec<Value>) -> Result<Value, VmError> {
    let Value::Dict(dict) = receiver else {
        return Err(no_attribute(&receiver.type_name(), name));
    };
    match name {
        "get" => {
            expect_args(name, &args, 1, 2)?;
            let found = dict.borrow().get(&args[0]).cloned();
            Ok(found.or_else(|| args.get(1).cloned()).unwrap_or(Value::None))
        }
        "keys" => {
            expect_args(name, &args, 0, 0)?;
            Ok(Value::list(dict.borrow().keys()))
        }
        "values" => {
            expect_args(name, &args, 0, 0)?;
            Ok(Value::list(dict.borrow().values()))
        }
        "items" => {
            expect_args(name, &args, 0, 0)?;
            Ok(Value::list(dict.borrow().items()))
        }
        "pop" => {
            expect_args(name, &args, 1, 2)?;
            let removed = dict.borrow_mut().remove(&args[0]);
            match (removed, args.get(1)) {
                (Some(value), _) => Ok(value),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(VmError::key_error(args[0].clone())),
            }
        }
        "setdefault" => {
            expect_args(name, &args, 1, 2)?;
            let existing = dict.borrow().get(&args[0]).cloned();
            match existing {
                Some(value) => Ok(value),
                None => {
                    let value = args.get(1).cloned().unwrap_or(Value::None);
                    dict.borrow_mut().insert(args[0].clone(), value.clone())?;
                    Ok(value)
                }
            }
        }
        "copy" => {
            expect_args(name, &args, 0, 0)?;
            Ok(Value::dict(dict.borrow().clone()))
        }
        "clear" => {
            expect_args(name, &args, 0, 0)?;
            dict.borrow_mut().clear();
            Ok(Value::None)
        }
        other => Err(no_attribute("dict", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(receiver: &Value, name: &str, args: Vec<Value>) -> Result<Value, VmError> {
        let mut vm = Vm::new();
        call_method(&mut vm, receiver, name, args, Vec::new())
    }

    #[test]
    fn string_methods() {
        let text = Value::from("  a b  c ");
        assert_eq!(call(&text, "split", vec![]).expect("split").repr(), "['a', 'b', 'c']");
        assert_eq!(call(&text, "strip", vec![]).expect("strip").repr(), "'a b  c'");
        let csv = Value::from("x,y,,z");
        assert_eq!(
            call(&csv, "split", vec![Value::from(","), Value::Int(1)])
                .expect("split")
                .repr(),
            "['x', 'y,,z']"
        );
        assert_eq!(
            call(&Value::from("-"), "join", vec![Value::from("abc")])
                .expect("join")
                .to_text(),
            "a-b-c"
        );
        assert!(matches!(
            call(&Value::from("héllo"), "find", vec![Value::from("l")]),
            Ok(Value::Int(2))
        ));
    }

    #[test]
    fn list_mutation_is_shared() {
        let list = Value::list(vec![Value::Int(3), Value::Int(1)]);
        let alias = list.clone();
        call(&list, "append", vec![Value::Int(2)]).expect("append");
        call(&list, "sort", vec![]).expect("sort");
        assert_eq!(alias.repr(), "[1, 2, 3]");
        assert!(matches!(call(&list, "pop", vec![]), Ok(Value::Int(3))));
        let err = call(&list, "remove", vec![Value::Int(9)]).expect_err("missing");
        assert_eq!(err.fault.text(), "list.remove(x): x not in list");
    }

    #[test]
    fn dict_methods() {
        let mut dict = Dict::new();
        dict.insert(Value::from("a"), Value::Int(1)).expect("insert");
        let dict = Value::dict(dict);
        assert!(matches!(
            call(&dict, "get", vec![Value::from("b"), Value::Int(0)]),
            Ok(Value::Int(0))
        ));
        call(&dict, "setdefault", vec![Value::from("b"), Value::Int(2)]).expect("setdefault");
        assert_eq!(call(&dict, "items", vec![]).expect("items").repr(), "[('a', 1), ('b', 2)]");
        let err = call(&dict, "pop", vec![Value::from("z")]).expect_err("missing");
        assert_eq!(err.kind_name(), "KeyError");
    }

    #[test]
    fn unknown_methods_are_attribute_errors() {
        let err = call(&Value::Int(1), "upper", vec![]).expect_err("no method");
        assert_eq!(err.fault.text(), "'int' object has no attribute 'upper'");
    }
}
