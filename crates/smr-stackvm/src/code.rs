//! The construction primitive: turns a descriptor into an executable code
//! object, rejecting field combinations the interpreter cannot run.

use std::rc::Rc;

use bytes::Bytes;
use smr_code::lnotab::line_for_offset;
use smr_code::opcode::{CO_SUSPENDING, CO_VARARGS, CO_VARKEYWORDS};
use smr_code::{decode_instructions, CodeDescriptor, CodeError, CompareOp, Constant, Instruction, Opcode};
use strum_macros::{Display, EnumString};
use thiserror::Error;

use crate::value::{Dict, Value};

/// Which generation of the compiled-function layout the interpreter runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum InterpreterGeneration {
    Legacy,
    #[default]
    Current,
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("code object rejected: {message}")]
    Rejected { message: String },
    #[error(transparent)]
    Bytecode(#[from] CodeError),
}

fn rejected(message: impl Into<String>) -> BuildError {
    BuildError::Rejected {
        message: message.into(),
    }
}

#[derive(Debug)]
pub struct CodeObject {
    descriptor: CodeDescriptor,
    bytecode: Bytes,
    line_table: Bytes,
    instructions: Vec<Instruction>,
    /// Instruction index for each even byte offset, `None` inside prefixes.
    offsets: Vec<Option<usize>>,
    constants: Vec<Value>,
    /// For each cell variable, the parameter slot that seeds it.
    cell_args: Vec<Option<usize>>,
}

impl CodeObject {
    pub fn build(
        generation: InterpreterGeneration,
        descriptor: &CodeDescriptor,
    ) -> Result<Rc<CodeObject>, BuildError> {
        match generation {
            InterpreterGeneration::Legacy => Self::build_legacy(descriptor),
            InterpreterGeneration::Current => Self::build_current(descriptor),
        }
    }

    fn build_legacy(descriptor: &CodeDescriptor) -> Result<Rc<CodeObject>, BuildError> {
        if descriptor.keyword_only_param_count != 0 {
            return Err(rejected(format!(
                "{} declares {} keyword-only parameters, which this interpreter generation does not support",
                descriptor.qualified_name, descriptor.keyword_only_param_count
            )));
        }
        Self::build_checked(InterpreterGeneration::Legacy, descriptor)
    }

    fn build_current(descriptor: &CodeDescriptor) -> Result<Rc<CodeObject>, BuildError> {
        Self::build_checked(InterpreterGeneration::Current, descriptor)
    }

    fn build_checked(
        generation: InterpreterGeneration,
        descriptor: &CodeDescriptor,
    ) -> Result<Rc<CodeObject>, BuildError> {
        let bytecode = descriptor
            .bytecode
            .as_raw()
            .cloned()
            .ok_or_else(|| rejected("bytecode has not been decoded"))?;
        let line_table = descriptor
            .line_table
            .as_raw()
            .cloned()
            .ok_or_else(|| rejected("line table has not been decoded"))?;
        if bytecode.is_empty() {
            return Err(rejected("bytecode is empty"));
        }
        if descriptor.flags & CO_SUSPENDING != 0 {
            return Err(rejected(format!(
                "{} is a generator or coroutine body",
                descriptor.qualified_name
            )));
        }
        if descriptor.local_slot_count as usize != descriptor.local_var_names.len() {
            return Err(rejected(format!(
                "local slot count {} does not match {} local names",
                descriptor.local_slot_count,
                descriptor.local_var_names.len()
            )));
        }
        let parameter_slots = descriptor.parameter_count()
            + u64::from(descriptor.flags & CO_VARARGS != 0)
            + u64::from(descriptor.flags & CO_VARKEYWORDS != 0);
        if parameter_slots > descriptor.local_var_names.len() as u64 {
            return Err(rejected(format!(
                "{} parameter slots do not fit in {} locals",
                parameter_slots,
                descriptor.local_var_names.len()
            )));
        }
        let parameter_slots = parameter_slots as usize;
        if descriptor.default_values.len() > descriptor.positional_param_count as usize {
            return Err(rejected("more defaults than positional parameters"));
        }

        let instructions = decode_instructions(&bytecode)?;
        let mut offsets = vec![None; bytecode.len() / 2];
        for (index, instruction) in instructions.iter().enumerate() {
            offsets[instruction.offset / 2] = Some(index);
        }
        for instruction in &instructions {
            check_instruction(descriptor, instruction, &offsets)?;
        }

        if !descriptor.constants.iter().all(is_immutable) {
            return Err(rejected("list and dict constants are only allowed as defaults"));
        }
        let constants = descriptor
            .constants
            .iter()
            .map(|constant| constant_value(generation, constant))
            .collect::<Result<Vec<_>, _>>()?;

        let cell_args = descriptor
            .cell_var_names
            .iter()
            .map(|cell| {
                descriptor.local_var_names[..parameter_slots]
                    .iter()
                    .position(|name| name == cell)
            })
            .collect();

        let mut stored = descriptor.clone();
        stored.default_values.clear();
        Ok(Rc::new(CodeObject {
            descriptor: stored,
            bytecode,
            line_table,
            instructions,
            offsets,
            constants,
            cell_args,
        }))
    }

    pub fn descriptor(&self) -> &CodeDescriptor {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        &self.descriptor.qualified_name
    }

    pub fn filename(&self) -> &str {
        &self.descriptor.filename
    }

    pub fn first_line(&self) -> u32 {
        self.descriptor.first_line_number
    }

    pub fn flags(&self) -> u32 {
        self.descriptor.flags
    }

    pub fn argcount(&self) -> usize {
        self.descriptor.positional_param_count as usize
    }

    pub fn kwonly_count(&self) -> usize {
        self.descriptor.keyword_only_param_count as usize
    }

    pub fn has_varargs(&self) -> bool {
        self.flags() & CO_VARARGS != 0
    }

    pub fn has_varkeywords(&self) -> bool {
        self.flags() & CO_VARKEYWORDS != 0
    }

    pub fn stack_size(&self) -> usize {
        self.descriptor.evaluation_stack_size as usize
    }

    pub fn varnames(&self) -> &[String] {
        &self.descriptor.local_var_names
    }

    pub fn names(&self) -> &[String] {
        &self.descriptor.names
    }

    pub fn cellvars(&self) -> &[String] {
        &self.descriptor.cell_var_names
    }

    pub fn freevars(&self) -> &[String] {
        &self.descriptor.free_var_names
    }

    /// Cell then free variable names, as `*_DEREF` indexes them.
    pub fn deref_name(&self, index: usize) -> &str {
        let cells = self.cellvars();
        if index < cells.len() {
            &cells[index]
        } else {
            &self.freevars()[index - cells.len()]
        }
    }

    pub fn cell_args(&self) -> &[Option<usize>] {
        &self.cell_args
    }

    pub fn constant(&self, index: usize) -> &Value {
        &self.constants[index]
    }

    pub fn docstring(&self) -> Value {
        match self.constants.first() {
            Some(Value::Str(text)) => Value::Str(text.clone()),
            _ => Value::None,
        }
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn bytecode(&self) -> &Bytes {
        &self.bytecode
    }

    /// Instruction index of the instruction that starts at `offset`.
    pub fn index_of(&self, offset: usize) -> Option<usize> {
        self.offsets.get(offset / 2).copied().flatten()
    }

    pub fn line_for(&self, offset: usize) -> u32 {
        line_for_offset(self.first_line(), &self.line_table, offset)
    }
}

fn check_instruction(
    descriptor: &CodeDescriptor,
    instruction: &Instruction,
    offsets: &[Option<usize>],
) -> Result<(), BuildError> {
    let arg = instruction.arg as usize;
    let in_range = |len: usize, table: &str| {
        if arg < len {
            Ok(())
        } else {
            Err(rejected(format!(
                "{} at offset {} references {} index {} but only {} exist",
                instruction.opcode, instruction.offset, table, arg, len
            )))
        }
    };
    match instruction.opcode {
        Opcode::LoadConst => in_range(descriptor.constants.len(), "constant")?,
        Opcode::LoadGlobal
        | Opcode::StoreGlobal
        | Opcode::DeleteGlobal
        | Opcode::LoadAttr
        | Opcode::LoadMethod => in_range(descriptor.names.len(), "name")?,
        Opcode::LoadFast | Opcode::StoreFast | Opcode::DeleteFast => {
            in_range(descriptor.local_var_names.len(), "local")?
        }
        Opcode::LoadDeref | Opcode::StoreDeref | Opcode::LoadClosure => in_range(
            descriptor.cell_var_names.len() + descriptor.free_var_names.len(),
            "cell",
        )?,
        Opcode::CompareOp => match CompareOp::from_arg(instruction.arg) {
            Some(CompareOp::ExceptionMatch) | None => {
                return Err(rejected(format!(
                    "unsupported comparison {} at offset {}",
                    arg, instruction.offset
                )))
            }
            Some(_) => {}
        },
        Opcode::RaiseVarargs if arg > 2 => {
            return Err(rejected(format!("bad RAISE_VARARGS argument {}", arg)))
        }
        Opcode::BuildSlice if arg != 2 && arg != 3 => {
            return Err(rejected(format!("bad BUILD_SLICE argument {}", arg)))
        }
        _ => {}
    }
    if let Some(target) = instruction.jump_target() {
        let lands = target % 2 == 0 && offsets.get(target / 2).copied().flatten().is_some();
        if !lands {
            return Err(rejected(format!(
                "{} at offset {} jumps to {}, which is not an instruction boundary",
                instruction.opcode, instruction.offset, target
            )));
        }
    }
    Ok(())
}

/// Runtime value of a constant, building nested code for `generation`.
pub fn constant_value(
    generation: InterpreterGeneration,
    constant: &Constant,
) -> Result<Value, BuildError> {
    Ok(match constant {
        Constant::None => Value::None,
        Constant::Bool(value) => Value::Bool(*value),
        Constant::Int(value) => Value::Int(*value),
        Constant::Float(value) => Value::Float(*value),
        Constant::Str(value) => Value::from(value.as_str()),
        Constant::Bytes(value) => Value::Bytes(value.clone()),
        Constant::Tuple(items) => Value::tuple(
            items
                .iter()
                .map(|item| constant_value(generation, item))
                .collect::<Result<_, _>>()?,
        ),
        Constant::List(items) => Value::list(
            items
                .iter()
                .map(|item| constant_value(generation, item))
                .collect::<Result<_, _>>()?,
        ),
        Constant::Dict(entries) => {
            let mut dict = Dict::new();
            for (key, value) in entries {
                dict.insert(
                    constant_value(generation, key)?,
                    constant_value(generation, value)?,
                )
                .map_err(|err| rejected(format!("bad dict constant: {}", err)))?;
            }
            Value::dict(dict)
        }
        Constant::Code(code) => Value::Code(CodeObject::build(generation, code)?),
    })
}

fn is_immutable(constant: &Constant) -> bool {
    match constant {
        Constant::List(_) | Constant::Dict(_) => false,
        Constant::Tuple(items) => items.iter().all(is_immutable),
        _ => true,
    }
}
