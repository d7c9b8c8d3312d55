//! Field-level validation of transport records.
//!
//! Descriptor construction only depends on the [`SchemaValidator`]
//! capability; [`StructuralValidator`] is the stock implementation that
//! checks presence and JSON shape of every declared field.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type Record = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Non-negative integer that fits in 32 bits.
    Count,
    Text,
    /// Sequence of identifier strings.
    Identifiers,
    /// Base64 text or an array of integers in `0..=255`.
    Bytes,
    /// Sequence of constant values.
    Constants,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub aliases: &'static [&'static str],
}

impl FieldSpec {
    const fn required(name: &'static str, kind: FieldKind, aliases: &'static [&'static str]) -> Self {
        Self {
            name,
            kind,
            required: true,
            aliases,
        }
    }

    const fn optional(name: &'static str, kind: FieldKind, aliases: &'static [&'static str]) -> Self {
        Self {
            name,
            kind,
            required: false,
            aliases,
        }
    }

    /// Looks the field up under its canonical name, then its aliases.
    /// `null` counts as absent.
    pub fn find<'a>(&self, record: &'a Record) -> Option<(&'static str, &'a Value)> {
        std::iter::once(self.name)
            .chain(self.aliases.iter().copied())
            .find_map(|key| match record.get(key) {
                Some(Value::Null) | None => None,
                Some(value) => Some((key, value)),
            })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Schema {
    pub name: &'static str,
    pub fields: &'static [FieldSpec],
}

impl Schema {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|field| field.name == name)
    }
}

pub const POSITIONAL_PARAM_COUNT: FieldSpec =
    FieldSpec::required("positional_param_count", FieldKind::Count, &["argcount"]);
pub const KEYWORD_ONLY_PARAM_COUNT: FieldSpec =
    FieldSpec::optional("keyword_only_param_count", FieldKind::Count, &["kwonlyargcount"]);
pub const LOCAL_SLOT_COUNT: FieldSpec =
    FieldSpec::required("local_slot_count", FieldKind::Count, &["nlocals"]);
pub const EVALUATION_STACK_SIZE: FieldSpec =
    FieldSpec::required("evaluation_stack_size", FieldKind::Count, &["stacksize"]);
pub const FLAGS: FieldSpec = FieldSpec::required("flags", FieldKind::Count, &[]);
pub const BYTECODE: FieldSpec = FieldSpec::required("bytecode", FieldKind::Bytes, &["code"]);
pub const CONSTANTS: FieldSpec = FieldSpec::required("constants", FieldKind::Constants, &["consts"]);
pub const NAMES: FieldSpec = FieldSpec::required("names", FieldKind::Identifiers, &[]);
pub const LOCAL_VAR_NAMES: FieldSpec =
    FieldSpec::required("local_var_names", FieldKind::Identifiers, &["varnames"]);
pub const FREE_VAR_NAMES: FieldSpec =
    FieldSpec::required("free_var_names", FieldKind::Identifiers, &["freevars"]);
pub const CELL_VAR_NAMES: FieldSpec =
    FieldSpec::required("cell_var_names", FieldKind::Identifiers, &["cellvars"]);
pub const FILENAME: FieldSpec = FieldSpec::optional("filename", FieldKind::Text, &[]);
pub const QUALIFIED_NAME: FieldSpec =
    FieldSpec::optional("qualified_name", FieldKind::Text, &["name"]);
pub const FIRST_LINE_NUMBER: FieldSpec =
    FieldSpec::required("first_line_number", FieldKind::Count, &["firstlineno"]);
pub const LINE_TABLE: FieldSpec = FieldSpec::required("line_table", FieldKind::Bytes, &["lnotab"]);
pub const DEFAULT_VALUES: FieldSpec =
    FieldSpec::optional("default_values", FieldKind::Constants, &["defaults"]);

pub const DESCRIPTOR_SCHEMA: Schema = Schema {
    name: "CompiledFunctionDescriptor",
    fields: &[
        POSITIONAL_PARAM_COUNT,
        KEYWORD_ONLY_PARAM_COUNT,
        LOCAL_SLOT_COUNT,
        EVALUATION_STACK_SIZE,
        FLAGS,
        BYTECODE,
        CONSTANTS,
        NAMES,
        LOCAL_VAR_NAMES,
        FREE_VAR_NAMES,
        CELL_VAR_NAMES,
        FILENAME,
        QUALIFIED_NAME,
        FIRST_LINE_NUMBER,
        LINE_TABLE,
        DEFAULT_VALUES,
    ],
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub problem: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, problem: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            problem: problem.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.problem)
    }
}

pub trait SchemaValidator {
    fn validate(&self, record: &Record, schema: &Schema) -> Result<(), Vec<FieldError>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralValidator;

impl SchemaValidator for StructuralValidator {
    fn validate(&self, record: &Record, schema: &Schema) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        for spec in schema.fields {
            match spec.find(record) {
                Some((key, value)) => check_kind(key, spec.kind, value, &mut errors),
                None if spec.required => errors.push(FieldError::new(spec.name, "field required")),
                None => {}
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn check_kind(key: &str, kind: FieldKind, value: &Value, errors: &mut Vec<FieldError>) {
    match kind {
        FieldKind::Count => {
            if !value.as_u64().is_some_and(|n| n <= u64::from(u32::MAX)) {
                errors.push(FieldError::new(key, "expected a non-negative 32-bit integer"));
            }
        }
        FieldKind::Text => {
            if !value.is_string() {
                errors.push(FieldError::new(key, "expected a string"));
            }
        }
        FieldKind::Identifiers => match value.as_array() {
            Some(items) => {
                for (index, item) in items.iter().enumerate() {
                    if !item.is_string() {
                        errors.push(FieldError::new(
                            format!("{}[{}]", key, index),
                            "expected an identifier string",
                        ));
                    }
                }
            }
            None => errors.push(FieldError::new(key, "expected a sequence of strings")),
        },
        FieldKind::Bytes => match value {
            Value::String(_) => {}
            Value::Array(items) => {
                for (index, item) in items.iter().enumerate() {
                    if !item.as_u64().is_some_and(|n| n <= 255) {
                        errors.push(FieldError::new(
                            format!("{}[{}]", key, index),
                            "expected a byte value in 0..=255",
                        ));
                    }
                }
            }
            _ => errors.push(FieldError::new(key, "expected base64 text or a byte array")),
        },
        FieldKind::Constants => {
            if !value.is_array() {
                errors.push(FieldError::new(key, "expected a sequence of constants"));
            }
        }
    }
}
