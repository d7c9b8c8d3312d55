use std::cell::RefCell;
use std::collections::HashMap;

use strum::IntoEnumIterator;

use crate::builtins::Builtin;
use crate::fault::{FaultClass, FaultKind};
use crate::value::Value;

/// Global namespace of reconstructed functions: a per-build table of
/// globals in front of the fixed builtin set.
#[derive(Debug)]
pub struct Environment {
    globals: RefCell<HashMap<String, Value>>,
    builtins: HashMap<String, Value>,
}

impl Default for Environment {
    fn default() -> Self {
        Self::restricted()
    }
}

impl Environment {
    /// Only the builtin primitives and builtin fault classes are visible.
    pub fn restricted() -> Self {
        let mut builtins = HashMap::new();
        for builtin in Builtin::iter() {
            builtins.insert(builtin.to_string(), Value::Builtin(builtin));
        }
        for kind in FaultKind::iter() {
            builtins.insert(kind.to_string(), Value::Class(kind.into_class()));
        }
        Self {
            globals: RefCell::new(HashMap::new()),
            builtins,
        }
    }

    pub fn set_global(&self, name: impl Into<String>, value: Value) {
        self.globals.borrow_mut().insert(name.into(), value);
    }

    pub fn delete_global(&self, name: &str) -> bool {
        self.globals.borrow_mut().remove(name).is_some()
    }

    /// Makes a host fault class raisable by name from executed bodies.
    pub fn declare_fault_class(&self, name: &str, module: Option<String>) {
        self.set_global(name, Value::Class(FaultClass::declared(name, module)));
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.borrow().get(name).cloned()
    }

    /// Globals first, then builtins.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.global(name)
            .or_else(|| self.builtins.get(name).cloned())
    }

    pub fn global_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.globals.borrow().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn globals_shadow_builtins() {
        let env = Environment::restricted();
        assert!(matches!(env.lookup("len"), Some(Value::Builtin(Builtin::Len))));
        env.set_global("len", Value::Int(3));
        assert!(matches!(env.lookup("len"), Some(Value::Int(3))));
        assert!(env.delete_global("len"));
        assert!(matches!(env.lookup("len"), Some(Value::Builtin(_))));
    }

    #[test]
    fn no_io_builtins() {
        let env = Environment::restricted();
        for name in ["print", "open", "input", "eval", "exec", "__import__"] {
            assert!(env.lookup(name).is_none(), "{name} must not be exposed");
        }
    }

    #[test]
    fn declared_fault_classes_carry_modules() {
        let env = Environment::restricted();
        env.declare_fault_class("QuotaExceeded", Some("billing".to_string()));
        match env.lookup("QuotaExceeded") {
            Some(Value::Class(class)) => assert_eq!(class.qualified_name(), "billing.QuotaExceeded"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(env.lookup("ValueError"), Some(Value::Class(_))));
    }
}
