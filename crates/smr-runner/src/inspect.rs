use std::rc::Rc;

use serde_json::{Map, Value as Json};
use smr_stackvm::Fault;

const INTERNAL_METHODS: &[&str] = &["with_traceback", "add_note"];

fn is_public(attribute: &str) -> bool {
    let dunder = attribute.len() > 4 && attribute.starts_with("__") && attribute.ends_with("__");
    !dunder && !INTERNAL_METHODS.contains(&attribute)
}

/// Snapshot of a raised fault: its class name, its module when the class
/// was declared under one, and every public attribute.
pub fn inspect_fault(fault: &Rc<Fault>) -> Map<String, Json> {
    let mut record = Map::new();
    for attribute in fault.dir().into_iter().filter(|name| is_public(name)) {
        if let Some(value) = fault.getattr(&attribute) {
            record.insert(attribute, value.to_json());
        }
    }
    record.insert("__name__".to_string(), Json::from(fault.class.name.as_str()));
    if let Some(module) = &fault.class.module {
        record.insert("__module__".to_string(), Json::from(module.as_str()));
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use smr_stackvm::{FaultClass, FaultKind, Value};

    #[test]
    fn builtin_fault_has_no_module() {
        let fault = Fault::named(FaultKind::NameError, "name 'x' is not defined".into(), "x");
        assert_eq!(
            Json::Object(inspect_fault(&fault)),
            json!({
                "__name__": "NameError",
                "args": ["name 'x' is not defined"],
                "name": "x",
            })
        );
    }

    #[test]
    fn declared_fault_reports_module_and_odd_args() {
        let class = FaultClass::declared("QuotaExceeded", Some("billing".to_string()));
        let fault = Fault::new(class, vec![Value::Int(429), Value::None]);
        let record = inspect_fault(&fault);
        assert_eq!(record["__module__"], json!("billing"));
        assert_eq!(record["args"], json!([429, null]));
        assert!(!record.contains_key("with_traceback"));
        assert!(!record.contains_key("__cause__"));
    }

    #[test]
    fn fault_without_arguments_still_inspects() {
        let fault = Fault::new(FaultKind::RuntimeError.into_class(), Vec::new());
        let record = inspect_fault(&fault);
        assert_eq!(record["__name__"], json!("RuntimeError"));
        assert_eq!(record["args"], json!([]));
    }
}
