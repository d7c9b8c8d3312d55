use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use derive_more::From;
use itertools::Itertools;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::constant::Constant;
use crate::error::CodeError;
use crate::schema::{
    FieldError, FieldSpec, Record, SchemaValidator, StructuralValidator, BYTECODE,
    CELL_VAR_NAMES, CONSTANTS, DEFAULT_VALUES, DESCRIPTOR_SCHEMA, EVALUATION_STACK_SIZE,
    FILENAME, FIRST_LINE_NUMBER, FLAGS, FREE_VAR_NAMES, KEYWORD_ONLY_PARAM_COUNT, LINE_TABLE,
    LOCAL_SLOT_COUNT, LOCAL_VAR_NAMES, NAMES, POSITIONAL_PARAM_COUNT, QUALIFIED_NAME,
};
use crate::source::DescriptorSource;

pub const DEFAULT_LABEL: &str = "<string>";

/// Which generation of the compiled-function layout a descriptor follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DescriptorLayout {
    /// No keyword-only parameters; the count is fixed at 0 and never
    /// written to the wire.
    Legacy,
    #[default]
    Current,
}

/// Byte-typed field as it arrives from a transport: either already raw or
/// still carried as base64 text.
#[derive(Debug, Clone, PartialEq, Eq, From)]
pub enum ByteField {
    Raw(Bytes),
    Encoded(String),
}

impl Default for ByteField {
    fn default() -> Self {
        ByteField::Raw(Bytes::new())
    }
}

impl From<Vec<u8>> for ByteField {
    fn from(value: Vec<u8>) -> Self {
        ByteField::Raw(Bytes::from(value))
    }
}

impl ByteField {
    pub fn as_raw(&self) -> Option<&Bytes> {
        match self {
            ByteField::Raw(bytes) => Some(bytes),
            ByteField::Encoded(_) => None,
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, ByteField::Raw(_))
    }

    pub fn to_text(&self) -> String {
        match self {
            ByteField::Raw(bytes) => STANDARD.encode(bytes),
            ByteField::Encoded(text) => text.clone(),
        }
    }

    fn normalize(&mut self, field: &str) -> Result<(), CodeError> {
        if let ByteField::Encoded(text) = self {
            let raw = STANDARD.decode(text.trim()).map_err(|err| CodeError::Format {
                message: format!("{} is not valid base64", field),
                fields: vec![FieldError::new(field, err.to_string())],
            })?;
            *self = ByteField::Raw(Bytes::from(raw));
        }
        Ok(())
    }
}

/// Everything needed to rebuild one compiled function.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeDescriptor {
    pub layout: DescriptorLayout,
    pub positional_param_count: u32,
    pub keyword_only_param_count: u32,
    pub local_slot_count: u32,
    pub evaluation_stack_size: u32,
    pub flags: u32,
    pub bytecode: ByteField,
    pub constants: Vec<Constant>,
    pub names: Vec<String>,
    pub local_var_names: Vec<String>,
    pub free_var_names: Vec<String>,
    pub cell_var_names: Vec<String>,
    pub filename: String,
    pub qualified_name: String,
    pub first_line_number: u32,
    pub line_table: ByteField,
    pub default_values: Vec<Constant>,
}

/// A live function that can describe its own compiled form.
pub trait CompiledCallable {
    /// The compiled body with raw byte fields.
    fn code_descriptor(&self) -> CodeDescriptor;
    /// Declared defaults for the trailing positional parameters.
    fn default_constants(&self) -> Vec<Constant>;
}

impl CodeDescriptor {
    pub fn from_callable<C: CompiledCallable + ?Sized>(callable: &C) -> Self {
        let mut descriptor = callable.code_descriptor();
        descriptor.default_values = callable.default_constants();
        descriptor
    }

    pub fn from_record(record: &Record) -> Result<Self, CodeError> {
        Self::from_record_with(record, &StructuralValidator)
    }

    pub fn from_record_with(
        record: &Record,
        validator: &dyn SchemaValidator,
    ) -> Result<Self, CodeError> {
        validator
            .validate(record, &DESCRIPTOR_SCHEMA)
            .map_err(|fields| CodeError::Format {
                message: format!(
                    "invalid {} record: {}",
                    DESCRIPTOR_SCHEMA.name,
                    fields.iter().join("; ")
                ),
                fields,
            })?;

        let layout = if KEYWORD_ONLY_PARAM_COUNT.find(record).is_some() {
            DescriptorLayout::Current
        } else {
            DescriptorLayout::Legacy
        };
        let mut descriptor = CodeDescriptor {
            layout,
            positional_param_count: read_count(record, &POSITIONAL_PARAM_COUNT)?,
            keyword_only_param_count: read_count(record, &KEYWORD_ONLY_PARAM_COUNT)?,
            local_slot_count: read_count(record, &LOCAL_SLOT_COUNT)?,
            evaluation_stack_size: read_count(record, &EVALUATION_STACK_SIZE)?,
            flags: read_count(record, &FLAGS)?,
            bytecode: read_bytes(record, &BYTECODE)?,
            constants: read_constants(record, &CONSTANTS)?,
            names: read_identifiers(record, &NAMES)?,
            local_var_names: read_identifiers(record, &LOCAL_VAR_NAMES)?,
            free_var_names: read_identifiers(record, &FREE_VAR_NAMES)?,
            cell_var_names: read_identifiers(record, &CELL_VAR_NAMES)?,
            filename: read_text(record, &FILENAME)?,
            qualified_name: read_text(record, &QUALIFIED_NAME)?,
            first_line_number: read_count(record, &FIRST_LINE_NUMBER)?,
            line_table: read_bytes(record, &LINE_TABLE)?,
            default_values: read_constants(record, &DEFAULT_VALUES)?,
        };
        descriptor.check_parameters()?;
        descriptor.normalize()?;
        Ok(descriptor)
    }

    /// Parses transport text into a record and hands it to `from_record`.
    pub fn from_json(text: &str) -> Result<Self, CodeError> {
        let value: Value = serde_json::from_str(text).map_err(|err| CodeError::Format {
            message: format!("descriptor text is not valid JSON: {}", err),
            fields: Vec::new(),
        })?;
        match value {
            Value::Object(record) => Self::from_record(&record),
            other => Err(CodeError::Format {
                message: format!("descriptor must be a record, found {}", json_kind(&other)),
                fields: Vec::new(),
            }),
        }
    }

    pub fn from_external_source(
        source: &dyn DescriptorSource,
        locator: &str,
    ) -> Result<Self, CodeError> {
        let text = source.fetch(locator).map_err(|_| CodeError::NotFound {
            locator: locator.to_string(),
        })?;
        Self::from_json(&text)
    }

    pub fn to_record(&self, include_defaults: bool) -> Record {
        let mut record = Record::new();
        let mut put = |spec: &FieldSpec, value: Value| {
            record.insert(spec.name.to_string(), value);
        };
        put(&POSITIONAL_PARAM_COUNT, self.positional_param_count.into());
        if self.layout == DescriptorLayout::Current {
            put(&KEYWORD_ONLY_PARAM_COUNT, self.keyword_only_param_count.into());
        }
        put(&LOCAL_SLOT_COUNT, self.local_slot_count.into());
        put(&EVALUATION_STACK_SIZE, self.evaluation_stack_size.into());
        put(&FLAGS, self.flags.into());
        put(&BYTECODE, self.bytecode.to_text().into());
        put(&CONSTANTS, constants_to_json(&self.constants));
        put(&NAMES, self.names.clone().into());
        put(&LOCAL_VAR_NAMES, self.local_var_names.clone().into());
        put(&FREE_VAR_NAMES, self.free_var_names.clone().into());
        put(&CELL_VAR_NAMES, self.cell_var_names.clone().into());
        put(&FILENAME, self.filename.clone().into());
        put(&QUALIFIED_NAME, self.qualified_name.clone().into());
        put(&FIRST_LINE_NUMBER, self.first_line_number.into());
        put(&LINE_TABLE, self.line_table.to_text().into());
        if include_defaults {
            put(&DEFAULT_VALUES, constants_to_json(&self.default_values));
        }
        record
    }

    /// Decodes every still-encoded byte field, nested code included.
    /// Running it again is a no-op.
    pub fn normalize(&mut self) -> Result<(), CodeError> {
        self.bytecode.normalize(BYTECODE.name)?;
        self.line_table.normalize(LINE_TABLE.name)?;
        self.constants.iter_mut().try_for_each(Constant::normalize)?;
        self.default_values
            .iter_mut()
            .try_for_each(Constant::normalize)
    }

    pub fn is_normalized(&self) -> bool {
        self.bytecode.is_raw()
            && self.line_table.is_raw()
            && self.constants.iter().all(Constant::is_normalized)
            && self.default_values.iter().all(Constant::is_normalized)
    }

    /// Positional plus keyword-only parameters. Widened so that two
    /// maximal counts cannot overflow.
    pub fn parameter_count(&self) -> u64 {
        u64::from(self.positional_param_count) + u64::from(self.keyword_only_param_count)
    }

    fn check_parameters(&self) -> Result<(), CodeError> {
        if self.layout == DescriptorLayout::Legacy && self.keyword_only_param_count != 0 {
            return Err(CodeError::format(
                "legacy layout cannot declare keyword-only parameters",
            ));
        }
        let declared = self.parameter_count();
        if (self.local_var_names.len() as u64) < declared {
            return Err(CodeError::Format {
                message: format!(
                    "{} parameters declared but only {} local names",
                    declared,
                    self.local_var_names.len()
                ),
                fields: vec![FieldError::new(
                    LOCAL_VAR_NAMES.name,
                    "fewer names than declared parameters",
                )],
            });
        }
        if self.default_values.len() > self.positional_param_count as usize {
            return Err(CodeError::Format {
                message: format!(
                    "{} defaults for {} positional parameters",
                    self.default_values.len(),
                    self.positional_param_count
                ),
                fields: vec![FieldError::new(
                    DEFAULT_VALUES.name,
                    "more defaults than positional parameters",
                )],
            });
        }
        Ok(())
    }
}

impl Serialize for CodeDescriptor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_record(true).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CodeDescriptor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let record = Record::deserialize(deserializer)?;
        CodeDescriptor::from_record(&record).map_err(serde::de::Error::custom)
    }
}

fn constants_to_json(constants: &[Constant]) -> Value {
    Value::Array(constants.iter().map(Constant::to_json).collect())
}

fn field_error(key: &str, problem: &str) -> CodeError {
    CodeError::Format {
        message: format!("invalid field {}", key),
        fields: vec![FieldError::new(key, problem)],
    }
}

fn read_count(record: &Record, spec: &FieldSpec) -> Result<u32, CodeError> {
    match spec.find(record) {
        Some((key, value)) => value
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| field_error(key, "expected a non-negative 32-bit integer")),
        None if spec.required => Err(field_error(spec.name, "field required")),
        None => Ok(0),
    }
}

fn read_text(record: &Record, spec: &FieldSpec) -> Result<String, CodeError> {
    match spec.find(record) {
        Some((key, value)) => value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| field_error(key, "expected a string")),
        None if spec.required => Err(field_error(spec.name, "field required")),
        None => Ok(DEFAULT_LABEL.to_string()),
    }
}

fn read_identifiers(record: &Record, spec: &FieldSpec) -> Result<Vec<String>, CodeError> {
    let Some((key, value)) = spec.find(record) else {
        return if spec.required {
            Err(field_error(spec.name, "field required"))
        } else {
            Ok(Vec::new())
        };
    };
    let items = value
        .as_array()
        .ok_or_else(|| field_error(key, "expected a sequence of strings"))?;
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            item.as_str().map(str::to_string).ok_or_else(|| {
                field_error(&format!("{}[{}]", key, index), "expected an identifier string")
            })
        })
        .collect()
}

fn read_bytes(record: &Record, spec: &FieldSpec) -> Result<ByteField, CodeError> {
    let Some((key, value)) = spec.find(record) else {
        return if spec.required {
            Err(field_error(spec.name, "field required"))
        } else {
            Ok(ByteField::default())
        };
    };
    match value {
        Value::String(text) => Ok(ByteField::Encoded(text.clone())),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                item.as_u64()
                    .and_then(|n| u8::try_from(n).ok())
                    .ok_or_else(|| {
                        field_error(&format!("{}[{}]", key, index), "expected a byte value")
                    })
            })
            .collect::<Result<Vec<u8>, _>>()
            .map(ByteField::from),
        _ => Err(field_error(key, "expected base64 text or a byte array")),
    }
}

fn read_constants(record: &Record, spec: &FieldSpec) -> Result<Vec<Constant>, CodeError> {
    let Some((key, value)) = spec.find(record) else {
        return if spec.required {
            Err(field_error(spec.name, "field required"))
        } else {
            Ok(Vec::new())
        };
    };
    let items = value
        .as_array()
        .ok_or_else(|| field_error(key, "expected a sequence of constants"))?;
    items
        .iter()
        .enumerate()
        .map(|(index, item)| Constant::from_json(&format!("{}[{}]", key, index), item))
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    pub(crate) fn hello_record() -> Record {
        match json!({
            "argcount": 0,
            "kwonlyargcount": 0,
            "nlocals": 0,
            "stacksize": 1,
            "flags": 67,
            "code": "ZAFTAA==",
            "consts": [null, "Hello World!"],
            "names": [],
            "varnames": [],
            "freevars": [],
            "cellvars": [],
            "filename": "hello.py",
            "name": "hello",
            "firstlineno": 1,
            "lnotab": "AAE="
        }) {
            Value::Object(record) => record,
            _ => unreachable!(),
        }
    }

    #[test]
    fn reads_original_field_names() {
        let descriptor = CodeDescriptor::from_record(&hello_record()).expect("descriptor");
        assert_eq!(descriptor.layout, DescriptorLayout::Current);
        assert_eq!(descriptor.qualified_name, "hello");
        assert_eq!(
            descriptor.bytecode,
            ByteField::Raw(Bytes::from_static(&[100, 1, 83, 0]))
        );
        assert_eq!(descriptor.line_table, ByteField::Raw(Bytes::from_static(&[0, 1])));
        assert_eq!(descriptor.constants[1], Constant::from("Hello World!"));
        assert!(descriptor.default_values.is_empty());
    }

    #[test]
    fn record_round_trip() {
        let mut record = hello_record();
        record.insert("defaults".into(), json!([1, "x"]));
        record.insert("argcount".into(), json!(2));
        record.insert("varnames".into(), json!(["a", "b"]));
        record.insert("nlocals".into(), json!(2));
        let descriptor = CodeDescriptor::from_record(&record).expect("descriptor");
        let again = CodeDescriptor::from_record(&descriptor.to_record(true)).expect("round trip");
        assert_eq!(again, descriptor);

        let minimal = descriptor.to_record(false);
        assert!(!minimal.contains_key("default_values"));
    }

    #[test]
    fn legacy_layout_round_trips() {
        let mut record = hello_record();
        record.remove("kwonlyargcount");
        let descriptor = CodeDescriptor::from_record(&record).expect("descriptor");
        assert_eq!(descriptor.layout, DescriptorLayout::Legacy);
        let written = descriptor.to_record(true);
        assert!(!written.contains_key("keyword_only_param_count"));
        let again = CodeDescriptor::from_record(&written).expect("round trip");
        assert_eq!(again.layout, DescriptorLayout::Legacy);
    }

    #[test]
    fn missing_bytecode_is_a_format_error() {
        let mut record = hello_record();
        record.remove("code");
        let err = CodeDescriptor::from_record(&record).expect_err("missing bytecode");
        match err {
            CodeError::Format { fields, .. } => {
                assert_eq!(fields, vec![FieldError::new("bytecode", "field required")])
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn defaults_may_not_exceed_positional_parameters() {
        let mut record = hello_record();
        record.insert("defaults".into(), json!([1]));
        let err = CodeDescriptor::from_record(&record).expect_err("too many defaults");
        assert!(matches!(err, CodeError::Format { .. }));
    }

    #[test]
    fn maximal_parameter_counts_do_not_overflow() {
        let mut record = hello_record();
        record.insert("argcount".into(), json!(u32::MAX));
        record.insert("kwonlyargcount".into(), json!(1));
        let err = CodeDescriptor::from_record(&record).expect_err("too many parameters");
        match err {
            CodeError::Format { fields, .. } => {
                assert_eq!(fields[0].field, "local_var_names")
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn normalization_is_idempotent() {
        let mut descriptor = CodeDescriptor::from_record(&hello_record()).expect("descriptor");
        let before = descriptor.clone();
        descriptor.normalize().expect("normalize twice");
        assert_eq!(descriptor, before);
        assert!(descriptor.is_normalized());
    }

    #[test]
    fn byte_arrays_are_accepted() {
        let mut record = hello_record();
        record.insert("code".into(), json!([100, 1, 83, 0]));
        let descriptor = CodeDescriptor::from_record(&record).expect("descriptor");
        assert_eq!(descriptor.bytecode.to_text(), "ZAFTAA==");
    }

    #[test]
    fn rejects_non_object_text() {
        assert!(matches!(
            CodeDescriptor::from_json("[1, 2]"),
            Err(CodeError::Format { .. })
        ));
        assert!(matches!(
            CodeDescriptor::from_json("{not json"),
            Err(CodeError::Format { .. })
        ));
    }

    #[test]
    fn serde_goes_through_records() {
        let descriptor = CodeDescriptor::from_record(&hello_record()).expect("descriptor");
        let text = serde_json::to_string(&descriptor).expect("serialize");
        let back: CodeDescriptor = serde_json::from_str(&text).expect("deserialize");
        assert_eq!(back, descriptor);
    }
}
