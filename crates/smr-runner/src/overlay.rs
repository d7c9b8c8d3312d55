use std::collections::BTreeMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use smr_stackvm::{Environment, Value};

/// Host-supplied globals layered over the builtin set. The overlay itself
/// is plain data; every build instantiates a fresh `Environment` from it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentOverlay {
    #[serde(default)]
    pub globals: BTreeMap<String, Json>,
    /// Qualified class names such as `billing.QuotaExceeded`. The part
    /// before the last dot becomes the class module.
    #[serde(default)]
    pub fault_classes: Vec<String>,
}

impl EnvironmentOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_global(mut self, name: impl Into<String>, value: Json) -> Self {
        self.globals.insert(name.into(), value);
        self
    }

    pub fn with_fault_class(mut self, qualified_name: impl Into<String>) -> Self {
        self.fault_classes.push(qualified_name.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.globals.is_empty() && self.fault_classes.is_empty()
    }

    /// Later layers win on name clashes.
    pub fn merged(mut self, other: &EnvironmentOverlay) -> Self {
        self.globals
            .extend(other.globals.iter().map(|(k, v)| (k.clone(), v.clone())));
        for class in &other.fault_classes {
            if !self.fault_classes.contains(class) {
                self.fault_classes.push(class.clone());
            }
        }
        self
    }

    pub fn instantiate(&self) -> Rc<Environment> {
        let env = Environment::restricted();
        for qualified in &self.fault_classes {
            let (module, name) = match qualified.rsplit_once('.') {
                Some((module, name)) => (Some(module.to_string()), name),
                None => (None, qualified.as_str()),
            };
            env.declare_fault_class(name, module);
        }
        for (name, value) in &self.globals {
            env.set_global(name.as_str(), Value::from_json(value));
        }
        Rc::new(env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn instantiation_is_fresh_per_call() {
        let overlay = EnvironmentOverlay::new().with_global("limit", json!(3));
        let first = overlay.instantiate();
        first.set_global("limit", Value::Int(99));
        let second = overlay.instantiate();
        assert!(matches!(second.global("limit"), Some(Value::Int(3))));
    }

    #[test]
    fn declared_classes_split_module() {
        let env = EnvironmentOverlay::new()
            .with_fault_class("billing.errors.QuotaExceeded")
            .with_fault_class("Plain")
            .instantiate();
        match env.global("QuotaExceeded") {
            Some(Value::Class(class)) => {
                assert_eq!(class.module.as_deref(), Some("billing.errors"))
            }
            other => panic!("unexpected {:?}", other),
        }
        match env.global("Plain") {
            Some(Value::Class(class)) => assert_eq!(class.module, None),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(env.global_names(), vec!["Plain", "QuotaExceeded"]);
    }

    #[test]
    fn merge_prefers_later_values() {
        let base = EnvironmentOverlay::new()
            .with_global("greeting", json!("hi"))
            .with_fault_class("app.Boom");
        let layered = base.merged(
            &EnvironmentOverlay::new()
                .with_global("greeting", json!("hello"))
                .with_fault_class("app.Boom"),
        );
        assert_eq!(layered.globals["greeting"], json!("hello"));
        assert_eq!(layered.fault_classes, vec!["app.Boom"]);
    }
}
