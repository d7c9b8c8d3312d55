//! Stack interpreter for compiled-function descriptors.
//!
//! `CodeObject::build` is the construction primitive: it checks a
//! descriptor against what the selected interpreter generation can run.
//! `Vm` executes the resulting functions against a restricted
//! `Environment`.

pub mod builtins;
pub mod code;
pub mod environment;
pub mod fault;
pub mod format;
pub mod function;
pub mod methods;
pub mod ops;
pub mod value;
pub mod vm;

pub use builtins::Builtin;
pub use code::{constant_value, BuildError, CodeObject, InterpreterGeneration};
pub use environment::Environment;
pub use fault::{Fault, FaultClass, FaultKind, TraceFrame, VmError};
pub use function::{value_constant, Function};
pub use value::{Cell, Dict, Value};
pub use vm::{Vm, DEFAULT_MAX_DEPTH};
