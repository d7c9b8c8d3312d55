//! Fault classes, raised fault objects and the VM error that carries them.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};
use thiserror::Error;

use crate::value::{release, Value};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr,
)]
pub enum FaultKind {
    Exception,
    ValueError,
    TypeError,
    NameError,
    UnboundLocalError,
    KeyError,
    IndexError,
    ZeroDivisionError,
    AttributeError,
    RuntimeError,
    OverflowError,
    AssertionError,
    NotImplementedError,
    RecursionError,
    SystemError,
}

/// Class of a fault. Builtin classes have no resolvable module; classes
/// declared by a host overlay carry the module they were declared under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultClass {
    pub name: String,
    pub module: Option<String>,
}

impl FaultClass {
    pub fn builtin(kind: FaultKind) -> Rc<FaultClass> {
        Rc::new(FaultClass {
            name: kind.to_string(),
            module: None,
        })
    }

    pub fn declared(name: impl Into<String>, module: Option<String>) -> Rc<FaultClass> {
        Rc::new(FaultClass {
            name: name.into(),
            module,
        })
    }

    pub fn qualified_name(&self) -> String {
        match &self.module {
            Some(module) => format!("{}.{}", module, self.name),
            None => self.name.clone(),
        }
    }

    /// Classes whose instances expose the offending identifier as `name`.
    pub fn has_name_attribute(&self) -> bool {
        self.module.is_none()
            && matches!(
                self.name.as_str(),
                "NameError" | "UnboundLocalError" | "AttributeError"
            )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceFrame {
    pub filename: String,
    pub name: String,
    pub line: u32,
}

const INTERNAL_ATTRIBUTES: &[&str] = &[
    "__cause__",
    "__class__",
    "__context__",
    "__suppress_context__",
    "__traceback__",
];

#[derive(Debug)]
pub struct Fault {
    pub class: Rc<FaultClass>,
    pub args: Vec<Value>,
    name: Option<Value>,
    cause: RefCell<Option<Value>>,
    frames: RefCell<Vec<TraceFrame>>,
}

impl Fault {
    pub fn new(class: Rc<FaultClass>, args: Vec<Value>) -> Rc<Fault> {
        let name = class.has_name_attribute().then_some(Value::None);
        Rc::new(Fault {
            class,
            args,
            name,
            cause: RefCell::new(None),
            frames: RefCell::new(Vec::new()),
        })
    }

    pub fn named(kind: FaultKind, message: String, name: &str) -> Rc<Fault> {
        let class = FaultClass::builtin(kind);
        let name = class.has_name_attribute().then(|| Value::from(name));
        Rc::new(Fault {
            class,
            args: vec![Value::from(message)],
            name,
            cause: RefCell::new(None),
            frames: RefCell::new(Vec::new()),
        })
    }

    /// The first argument when it is a string.
    pub fn message(&self) -> Option<String> {
        match self.args.first() {
            Some(Value::Str(text)) => Some(text.to_string()),
            _ => None,
        }
    }

    /// `str()` of the fault: empty, the lone argument, or the argument tuple.
    /// A lone fault argument is unwrapped in a loop so that long chains of
    /// wrapped faults render without recursion.
    pub fn text(&self) -> String {
        let mut args = self.args.as_slice();
        loop {
            match args {
                [] => return String::new(),
                [Value::Fault(inner)] => args = inner.args.as_slice(),
                [single] => return single.to_text(),
                many => return Value::tuple(many.to_vec()).repr(),
            }
        }
    }

    pub fn set_cause(&self, cause: Value) {
        *self.cause.borrow_mut() = Some(cause);
    }

    /// Attribute names in `dir()` order.
    pub fn dir(&self) -> Vec<String> {
        let mut names: Vec<String> = INTERNAL_ATTRIBUTES.iter().map(|s| s.to_string()).collect();
        names.push("args".to_string());
        if self.name.is_some() {
            names.push("name".to_string());
        }
        names.push("with_traceback".to_string());
        names.sort();
        names
    }

    pub fn getattr(self: &Rc<Self>, attribute: &str) -> Option<Value> {
        match attribute {
            "args" => Some(Value::tuple(self.args.clone())),
            "name" => self.name.clone(),
            "__class__" => Some(Value::Class(self.class.clone())),
            "__cause__" => Some(self.cause.borrow().clone().unwrap_or(Value::None)),
            "__context__" | "__traceback__" => Some(Value::None),
            "__suppress_context__" => Some(Value::Bool(self.cause.borrow().is_some())),
            "with_traceback" => Some(Value::method(Value::Fault(self.clone()), attribute)),
            _ => None,
        }
    }

    pub fn push_frame(&self, frame: TraceFrame) {
        self.frames.borrow_mut().push(frame);
    }

    /// Frames from the outermost call to the frame that raised.
    pub fn traceback(&self) -> Vec<TraceFrame> {
        self.frames.borrow().iter().rev().cloned().collect()
    }

    pub(crate) fn drain_into(&mut self, pending: &mut Vec<Value>) {
        pending.append(&mut self.args);
        pending.extend(self.name.take());
        pending.extend(self.cause.get_mut().take());
    }
}

impl Drop for Fault {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        self.drain_into(&mut pending);
        release(pending);
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self.text();
        if text.is_empty() {
            write!(f, "{}", self.class.name)
        } else {
            write!(f, "{}: {}", self.class.name, text)
        }
    }
}

/// A fault propagating out of the interpreter.
#[derive(Debug, Clone, Error)]
#[error("{fault}")]
pub struct VmError {
    pub fault: Rc<Fault>,
}

impl VmError {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            fault: Fault::new(FaultClass::builtin(kind), vec![Value::from(message.into())]),
        }
    }

    pub fn named(kind: FaultKind, message: impl Into<String>, name: &str) -> Self {
        Self {
            fault: Fault::named(kind, message.into(), name),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(FaultKind::TypeError, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(FaultKind::ValueError, message)
    }

    pub fn system_error(message: impl Into<String>) -> Self {
        Self::new(FaultKind::SystemError, message)
    }

    pub fn overflow() -> Self {
        Self::new(FaultKind::OverflowError, "integer overflow")
    }

    pub fn key_error(key: Value) -> Self {
        Self {
            fault: Fault::new(FaultKind::KeyError.into_class(), vec![key]),
        }
    }

    pub fn kind_name(&self) -> &str {
        &self.fault.class.name
    }
}

impl From<Rc<Fault>> for VmError {
    fn from(fault: Rc<Fault>) -> Self {
        Self { fault }
    }
}

impl FaultKind {
    pub fn into_class(self) -> Rc<FaultClass> {
        FaultClass::builtin(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_errors_expose_the_missing_name() {
        let err = VmError::named(FaultKind::NameError, "name 'a' is not defined", "a");
        assert_eq!(err.to_string(), "NameError: name 'a' is not defined");
        assert!(err.fault.dir().contains(&"name".to_string()));
        assert!(matches!(err.fault.getattr("name"), Some(Value::Str(name)) if &*name == "a"));
    }

    #[test]
    fn text_follows_argument_count() {
        let none = Fault::new(FaultKind::ValueError.into_class(), vec![]);
        assert_eq!(none.text(), "");
        assert_eq!(none.to_string(), "ValueError");
        let many = Fault::new(
            FaultKind::ValueError.into_class(),
            vec![Value::Int(1), Value::from("x")],
        );
        assert_eq!(many.text(), "(1, 'x')");
    }

    #[test]
    fn long_wrapped_chains_render_and_drop() {
        let mut fault = Fault::new(FaultKind::ValueError.into_class(), vec![Value::from("x")]);
        for _ in 0..100_000 {
            fault = Fault::new(FaultKind::ValueError.into_class(), vec![Value::Fault(fault)]);
        }
        assert_eq!(fault.text(), "x");
        drop(fault);
    }

    #[test]
    fn traceback_is_outermost_first() {
        let fault = Fault::new(FaultKind::Exception.into_class(), vec![]);
        for (name, line) in [("inner", 3), ("outer", 7)] {
            fault.push_frame(TraceFrame {
                filename: "f.py".to_string(),
                name: name.to_string(),
                line,
            });
        }
        let names: Vec<_> = fault.traceback().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["outer", "inner"]);
    }

    #[test]
    fn dir_is_sorted() {
        let fault = Fault::new(FaultKind::KeyError.into_class(), vec![Value::from("k")]);
        let dir = fault.dir();
        let mut sorted = dir.clone();
        sorted.sort();
        assert_eq!(dir, sorted);
        assert!(!dir.contains(&"name".to_string()));
    }
}
