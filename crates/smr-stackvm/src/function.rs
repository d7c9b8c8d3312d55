use std::rc::Rc;

use smr_code::{CodeDescriptor, CompiledCallable, Constant};
use tracing::warn;

use crate::code::CodeObject;
use crate::environment::Environment;
use crate::value::{Cell, Value};

/// A live function: code plus the globals, defaults and closure cells it
/// was created with.
#[derive(Debug)]
pub struct Function {
    pub code: Rc<CodeObject>,
    pub globals: Rc<Environment>,
    pub name: String,
    pub defaults: Vec<Value>,
    pub kw_defaults: Vec<(String, Value)>,
    pub closure: Vec<Cell>,
}

impl Function {
    pub fn new(code: Rc<CodeObject>, globals: Rc<Environment>) -> Self {
        let name = code.name().to_string();
        Self {
            code,
            globals,
            name,
            defaults: Vec::new(),
            kw_defaults: Vec::new(),
            closure: Vec::new(),
        }
    }

    /// Last component of the qualified name.
    pub fn short_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    pub fn kw_default(&self, name: &str) -> Option<&Value> {
        self.kw_defaults
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }
}

impl CompiledCallable for Function {
    fn code_descriptor(&self) -> CodeDescriptor {
        self.code.descriptor().clone()
    }

    fn default_constants(&self) -> Vec<Constant> {
        self.defaults.iter().map(value_constant).collect()
    }
}

/// Constant form of a runtime value. Containers keep their kind, so a
/// reconstructed default behaves like the live one. Values with no data
/// form (functions, faults, iterators and the like, or a container that
/// contains itself) cannot travel; they are kept as their `repr` and a
/// warning is logged.
pub fn value_constant(value: &Value) -> Constant {
    constant_in(value, &mut Vec::new())
}

fn constant_in(value: &Value, path: &mut Vec<*const ()>) -> Constant {
    let identity = value.identity();
    if let Some(identity) = identity {
        if path.contains(&identity) {
            return without_constant_form(value);
        }
        path.push(identity);
    }
    let constant = match value {
        Value::None => Constant::None,
        Value::Bool(value) => Constant::Bool(*value),
        Value::Int(value) => Constant::Int(*value),
        Value::Float(value) => Constant::Float(*value),
        Value::Str(value) => Constant::Str(value.to_string()),
        Value::Bytes(value) => Constant::Bytes(value.clone()),
        Value::Tuple(items) => {
            Constant::Tuple(items.iter().map(|item| constant_in(item, path)).collect())
        }
        Value::List(items) => Constant::List(
            items
                .borrow()
                .iter()
                .map(|item| constant_in(item, path))
                .collect(),
        ),
        Value::Dict(dict) => Constant::Dict(
            dict.borrow()
                .entries()
                .iter()
                .map(|(key, value)| (constant_in(key, path), constant_in(value, path)))
                .collect(),
        ),
        Value::Code(code) => Constant::Code(Box::new(code.descriptor().clone())),
        other => without_constant_form(other),
    };
    if identity.is_some() {
        path.pop();
    }
    constant
}

fn without_constant_form(value: &Value) -> Constant {
    let repr = value.repr();
    warn!(value = %repr, "value has no constant form, keeping its repr");
    Constant::Str(repr)
}
