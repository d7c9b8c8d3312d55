use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use derive_more::From;
use itertools::Itertools;
use serde_json::{json, Map, Value};

use crate::descriptor::CodeDescriptor;
use crate::error::CodeError;
use crate::schema::FieldError;

const FLOAT_TAG: &str = "$float";
const BYTES_TAG: &str = "$bytes";
const CODE_TAG: &str = "$code";
const LIST_TAG: &str = "$list";
const DICT_TAG: &str = "$dict";

/// Literal referenced by index from the instruction stream. Lists and dicts
/// only appear among default values, where a live function may hold them.
#[derive(Debug, Clone, PartialEq, From)]
pub enum Constant {
    #[from(ignore)]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Bytes),
    Tuple(Vec<Constant>),
    #[from(ignore)]
    List(Vec<Constant>),
    #[from(ignore)]
    Dict(Vec<(Constant, Constant)>),
    Code(Box<CodeDescriptor>),
}

impl From<&str> for Constant {
    fn from(value: &str) -> Self {
        Constant::Str(value.to_string())
    }
}

impl From<CodeDescriptor> for Constant {
    fn from(value: CodeDescriptor) -> Self {
        Constant::Code(Box::new(value))
    }
}

impl Constant {
    /// Identity used when interning constants: unlike `==`, `0.0` and
    /// `-0.0` stay distinct and `True` never merges with `1`.
    pub fn same_as(&self, other: &Constant) -> bool {
        match (self, other) {
            (Constant::Float(a), Constant::Float(b)) => a.to_bits() == b.to_bits(),
            (Constant::Tuple(a), Constant::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_as(y))
            }
            (Constant::List(_), _) | (Constant::Dict(_), _) => false,
            (Constant::Code(_), Constant::Code(_)) => false,
            _ => self == other,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Constant::None => Value::Null,
            Constant::Bool(value) => Value::Bool(*value),
            Constant::Int(value) => Value::from(*value),
            Constant::Float(value) if value.is_finite() => Value::from(*value),
            Constant::Float(value) => {
                let label = if value.is_nan() {
                    "nan"
                } else if value.is_sign_negative() {
                    "-inf"
                } else {
                    "inf"
                };
                json!({ FLOAT_TAG: label })
            }
            Constant::Str(value) => Value::String(value.clone()),
            Constant::Bytes(value) => json!({ BYTES_TAG: STANDARD.encode(value) }),
            Constant::Tuple(items) => Value::Array(items.iter().map(Constant::to_json).collect()),
            Constant::List(items) => {
                json!({ LIST_TAG: items.iter().map(Constant::to_json).collect::<Vec<_>>() })
            }
            Constant::Dict(entries) => json!({
                DICT_TAG: entries
                    .iter()
                    .map(|(key, value)| json!([key.to_json(), value.to_json()]))
                    .collect::<Vec<_>>()
            }),
            Constant::Code(code) => json!({ CODE_TAG: Value::Object(code.to_record(true)) }),
        }
    }

    /// Parses one constant; `path` names its position for error reports.
    pub fn from_json(path: &str, value: &Value) -> Result<Constant, CodeError> {
        match value {
            Value::Null => Ok(Constant::None),
            Value::Bool(value) => Ok(Constant::Bool(*value)),
            Value::Number(number) => {
                if let Some(value) = number.as_i64() {
                    Ok(Constant::Int(value))
                } else if number.is_u64() {
                    Err(constant_error(path, "integer constant exceeds 64 bits"))
                } else {
                    number
                        .as_f64()
                        .map(Constant::Float)
                        .ok_or_else(|| constant_error(path, "unrepresentable number"))
                }
            }
            Value::String(value) => Ok(Constant::Str(value.clone())),
            Value::Array(items) => constants_from_json(path, items).map(Constant::Tuple),
            Value::Object(map) => tagged_from_json(path, map),
        }
    }

    /// Python-style literal rendering.
    pub fn repr(&self) -> String {
        match self {
            Constant::None => "None".to_string(),
            Constant::Bool(true) => "True".to_string(),
            Constant::Bool(false) => "False".to_string(),
            Constant::Int(value) => value.to_string(),
            Constant::Float(value) => float_repr(*value),
            Constant::Str(value) => str_repr(value),
            Constant::Bytes(value) => bytes_repr(value),
            Constant::Tuple(items) if items.len() == 1 => format!("({},)", items[0].repr()),
            Constant::Tuple(items) => format!("({})", items.iter().map(Constant::repr).join(", ")),
            Constant::List(items) => format!("[{}]", items.iter().map(Constant::repr).join(", ")),
            Constant::Dict(entries) => format!(
                "{{{}}}",
                entries
                    .iter()
                    .map(|(key, value)| format!("{}: {}", key.repr(), value.repr()))
                    .join(", ")
            ),
            Constant::Code(code) => format!(
                "<code object {}, file \"{}\", line {}>",
                code.qualified_name, code.filename, code.first_line_number
            ),
        }
    }

    pub(crate) fn normalize(&mut self) -> Result<(), CodeError> {
        match self {
            Constant::Tuple(items) | Constant::List(items) => {
                items.iter_mut().try_for_each(Constant::normalize)
            }
            Constant::Dict(entries) => entries
                .iter_mut()
                .try_for_each(|(key, value)| key.normalize().and_then(|_| value.normalize())),
            Constant::Code(code) => code.normalize(),
            _ => Ok(()),
        }
    }

    pub(crate) fn is_normalized(&self) -> bool {
        match self {
            Constant::Tuple(items) | Constant::List(items) => {
                items.iter().all(Constant::is_normalized)
            }
            Constant::Dict(entries) => entries
                .iter()
                .all(|(key, value)| key.is_normalized() && value.is_normalized()),
            Constant::Code(code) => code.is_normalized(),
            _ => true,
        }
    }
}

fn tagged_from_json(path: &str, map: &Map<String, Value>) -> Result<Constant, CodeError> {
    if map.len() != 1 {
        return Err(constant_error(path, "objects are only allowed as tagged constants"));
    }
    if let Some(label) = map.get(FLOAT_TAG) {
        return match label.as_str() {
            Some("nan") => Ok(Constant::Float(f64::NAN)),
            Some("inf") => Ok(Constant::Float(f64::INFINITY)),
            Some("-inf") => Ok(Constant::Float(f64::NEG_INFINITY)),
            _ => Err(constant_error(path, "unknown float label")),
        };
    }
    if let Some(text) = map.get(BYTES_TAG) {
        let text = text
            .as_str()
            .ok_or_else(|| constant_error(path, "bytes constant must be base64 text"))?;
        let raw = STANDARD
            .decode(text)
            .map_err(|err| constant_error(path, &format!("invalid base64: {}", err)))?;
        return Ok(Constant::Bytes(Bytes::from(raw)));
    }
    if let Some(items) = map.get(LIST_TAG) {
        let items = items
            .as_array()
            .ok_or_else(|| constant_error(path, "list constant must be an array"))?;
        return constants_from_json(path, items).map(Constant::List);
    }
    if let Some(entries) = map.get(DICT_TAG) {
        let entries = entries
            .as_array()
            .ok_or_else(|| constant_error(path, "dict constant must be an array of pairs"))?;
        return entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let entry_path = format!("{}[{}]", path, index);
                match entry.as_array().map(Vec::as_slice) {
                    Some([key, value]) => Ok((
                        Constant::from_json(&format!("{}[0]", entry_path), key)?,
                        Constant::from_json(&format!("{}[1]", entry_path), value)?,
                    )),
                    _ => Err(constant_error(&entry_path, "dict entry must be a [key, value] pair")),
                }
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Constant::Dict);
    }
    if let Some(code) = map.get(CODE_TAG) {
        let record = code
            .as_object()
            .ok_or_else(|| constant_error(path, "code constant must be a record"))?;
        let descriptor = CodeDescriptor::from_record(record).map_err(|err| match err {
            CodeError::Format { message, fields } => CodeError::Format {
                message: format!("{}: {}", path, message),
                fields: fields
                    .into_iter()
                    .map(|field| FieldError::new(format!("{}.{}", path, field.field), field.problem))
                    .collect(),
            },
            other => other,
        })?;
        return Ok(Constant::Code(Box::new(descriptor)));
    }
    Err(constant_error(path, "unknown constant tag"))
}

fn constants_from_json(path: &str, items: &[Value]) -> Result<Vec<Constant>, CodeError> {
    items
        .iter()
        .enumerate()
        .map(|(index, item)| Constant::from_json(&format!("{}[{}]", path, index), item))
        .collect()
}

fn constant_error(path: &str, problem: &str) -> CodeError {
    CodeError::Format {
        message: format!("invalid constant at {}", path),
        fields: vec![FieldError::new(path, problem)],
    }
}

/// Shortest round-trip rendering with Python's switch to exponent form
/// outside `1e-4 <= |x| < 1e16`.
pub fn float_repr(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0.0" } else { "0.0" }.to_string();
    }
    let scientific = format!("{:e}", value);
    let (mantissa, exponent) = match scientific.split_once('e') {
        Some((mantissa, exponent)) => (mantissa, exponent.parse::<i32>().unwrap_or(0)),
        None => (scientific.as_str(), 0),
    };
    if (-4..16).contains(&exponent) {
        let fixed = value.to_string();
        if fixed.contains('.') {
            fixed
        } else {
            format!("{}.0", fixed)
        }
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exponent.abs())
    }
}

pub fn str_repr(value: &str) -> String {
    let quote = if value.contains('\'') && !value.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(value.len() + 2);
    out.push(quote);
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

pub fn bytes_repr(value: &[u8]) -> String {
    let mut out = String::from("b'");
    for byte in value {
        match byte {
            b'\\' => out.push_str("\\\\"),
            b'\'' => out.push_str("\\'"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(*byte as char),
            _ => out.push_str(&format!("\\x{:02x}", byte)),
        }
    }
    out.push('\'');
    out
}
