use std::rc::Rc;

use smr_code::CodeDescriptor;
use smr_stackvm::value::empty_cell;
use smr_stackvm::{constant_value, CodeObject, Function, InterpreterGeneration};
use tracing::debug;

use crate::error::RunnerError;
use crate::overlay::EnvironmentOverlay;

/// Turns descriptors back into live functions for one interpreter
/// generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconstructionEngine {
    generation: InterpreterGeneration,
}

impl ReconstructionEngine {
    pub fn new(generation: InterpreterGeneration) -> Self {
        Self { generation }
    }

    pub fn generation(&self) -> InterpreterGeneration {
        self.generation
    }

    /// Builds the function named by `descriptor.qualified_name` over a
    /// fresh environment. Declared defaults bind to the trailing positional
    /// parameters and every free variable gets an empty cell. The globals
    /// hold the overlay and nothing else; the function is not bound under
    /// its own name.
    pub fn build(
        &self,
        descriptor: &CodeDescriptor,
        overlay: &EnvironmentOverlay,
    ) -> Result<Rc<Function>, RunnerError> {
        let code = CodeObject::build(self.generation, descriptor)?;
        let mut function = Function::new(code, overlay.instantiate());
        function.defaults = descriptor
            .default_values
            .iter()
            .map(|constant| constant_value(self.generation, constant))
            .collect::<Result<_, _>>()?;
        function.closure = descriptor.free_var_names.iter().map(|_| empty_cell()).collect();
        debug!(
            function = %function.name,
            generation = %self.generation,
            defaults = function.defaults.len(),
            free_vars = function.closure.len(),
            "reconstructed function"
        );
        Ok(Rc::new(function))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use smr_code::opcode::{CO_NEWLOCALS, CO_OPTIMIZED};
    use smr_code::{Assembler, Constant, Opcode};
    use smr_stackvm::Value;

    fn identity(name: &str, defaults: Vec<Constant>) -> CodeDescriptor {
        let mut asm = Assembler::new(name, "engine.py", 1);
        asm.set_flags(CO_OPTIMIZED | CO_NEWLOCALS);
        asm.set_parameters(1, 0);
        let x = asm.add_varname("x");
        asm.add_const(Constant::None);
        asm.emit_arg(Opcode::LoadFast, x);
        asm.emit(Opcode::ReturnValue);
        asm.set_defaults(defaults);
        asm.finish().expect("assemble")
    }

    #[test]
    fn builds_with_qualified_name_and_defaults() {
        let descriptor = identity("tools.identity", vec![Constant::Int(4)]);
        let function = ReconstructionEngine::default()
            .build(&descriptor, &EnvironmentOverlay::new())
            .expect("build");
        assert_eq!(function.name, "tools.identity");
        assert!(matches!(function.defaults.as_slice(), [Value::Int(4)]));
        assert!(function.closure.is_empty());
    }

    #[test]
    fn globals_hold_only_the_overlay() {
        let descriptor = identity("identity", Vec::new());
        let function = ReconstructionEngine::default()
            .build(&descriptor, &EnvironmentOverlay::new())
            .expect("build");
        assert!(function.globals.global("identity").is_none());
        assert!(function.globals.global_names().is_empty());

        let overlay = EnvironmentOverlay::new().with_global("identity", json!("host value"));
        let function = ReconstructionEngine::default()
            .build(&descriptor, &overlay)
            .expect("build");
        assert!(matches!(function.globals.global("identity"), Some(Value::Str(_))));
    }

    #[test]
    fn rejected_descriptors_report_parse_errors() {
        let mut descriptor = identity("identity", Vec::new());
        descriptor.local_slot_count = 5;
        let err = ReconstructionEngine::default()
            .build(&descriptor, &EnvironmentOverlay::new())
            .expect_err("slot mismatch");
        assert_eq!(err.code(), crate::error::PARSE_ERROR);
    }
}
