//! Label-based emitter that produces a [`CodeDescriptor`].

use crate::constant::Constant;
use crate::descriptor::{ByteField, CodeDescriptor, DescriptorLayout};
use crate::error::CodeError;
use crate::lnotab::LineTableBuilder;
use crate::opcode::{instruction_size, stack_effect, JumpKind, Opcode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

#[derive(Debug, Clone, Copy)]
enum Operand {
    Value(u32),
    Jump(Label),
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    opcode: Opcode,
    operand: Operand,
    line: u32,
}

#[derive(Debug, Clone)]
pub struct Assembler {
    qualified_name: String,
    filename: String,
    first_line: u32,
    layout: DescriptorLayout,
    flags: u32,
    positional: u32,
    keyword_only: u32,
    constants: Vec<Constant>,
    names: Vec<String>,
    varnames: Vec<String>,
    cellvars: Vec<String>,
    freevars: Vec<String>,
    defaults: Vec<Constant>,
    code: Vec<Pending>,
    labels: Vec<Option<usize>>,
    line: u32,
}

impl Assembler {
    pub fn new(qualified_name: impl Into<String>, filename: impl Into<String>, first_line: u32) -> Self {
        Self {
            qualified_name: qualified_name.into(),
            filename: filename.into(),
            first_line,
            layout: DescriptorLayout::Current,
            flags: 0,
            positional: 0,
            keyword_only: 0,
            constants: Vec::new(),
            names: Vec::new(),
            varnames: Vec::new(),
            cellvars: Vec::new(),
            freevars: Vec::new(),
            defaults: Vec::new(),
            code: Vec::new(),
            labels: Vec::new(),
            line: first_line,
        }
    }

    pub fn set_layout(&mut self, layout: DescriptorLayout) {
        self.layout = layout;
    }

    pub fn set_flags(&mut self, flags: u32) {
        self.flags = flags;
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn set_parameters(&mut self, positional: u32, keyword_only: u32) {
        self.positional = positional;
        self.keyword_only = keyword_only;
    }

    pub fn set_defaults(&mut self, defaults: Vec<Constant>) {
        self.defaults = defaults;
    }

    pub fn set_line(&mut self, line: u32) {
        self.line = line;
    }

    pub fn add_const(&mut self, constant: impl Into<Constant>) -> u32 {
        let constant = constant.into();
        if let Some(index) = self.constants.iter().position(|c| c.same_as(&constant)) {
            return index as u32;
        }
        self.constants.push(constant);
        (self.constants.len() - 1) as u32
    }

    pub fn add_name(&mut self, name: &str) -> u32 {
        intern(&mut self.names, name)
    }

    pub fn add_varname(&mut self, name: &str) -> u32 {
        intern(&mut self.varnames, name)
    }

    pub fn varname_index(&self, name: &str) -> Option<u32> {
        self.varnames.iter().position(|n| n == name).map(|i| i as u32)
    }

    pub fn add_cellvar(&mut self, name: &str) -> u32 {
        intern(&mut self.cellvars, name)
    }

    pub fn add_freevar(&mut self, name: &str) -> u32 {
        intern(&mut self.freevars, name)
    }

    /// Index into the combined cell-then-free slot space.
    pub fn deref_index(&self, name: &str) -> Option<u32> {
        if let Some(index) = self.cellvars.iter().position(|n| n == name) {
            return Some(index as u32);
        }
        self.freevars
            .iter()
            .position(|n| n == name)
            .map(|index| (self.cellvars.len() + index) as u32)
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    pub fn bind(&mut self, label: Label) {
        self.labels[label.0] = Some(self.code.len());
    }

    pub fn emit(&mut self, opcode: Opcode) {
        self.emit_arg(opcode, 0);
    }

    pub fn emit_arg(&mut self, opcode: Opcode, arg: u32) {
        self.code.push(Pending {
            opcode,
            operand: Operand::Value(arg),
            line: self.line,
        });
    }

    pub fn emit_jump(&mut self, opcode: Opcode, target: Label) {
        self.code.push(Pending {
            opcode,
            operand: Operand::Jump(target),
            line: self.line,
        });
    }

    /// Whether the last emitted instruction never falls through and no
    /// label points past it.
    pub fn ends_terminal(&self) -> bool {
        let end = self.code.len();
        self.code.last().is_some_and(|p| p.opcode.is_terminal())
            && !self.labels.iter().any(|bound| *bound == Some(end))
    }

    pub fn finish(self) -> Result<CodeDescriptor, CodeError> {
        let targets = self.resolve_labels()?;
        let (offsets, args) = self.layout_code(&targets)?;
        let stack_size = self.max_stack_depth(&targets, &args)?;

        let mut bytecode = Vec::with_capacity(offsets.last().copied().unwrap_or(0));
        let mut lines = LineTableBuilder::new(self.first_line);
        for (index, pending) in self.code.iter().enumerate() {
            let size = offsets[index + 1] - offsets[index];
            lines.mark(offsets[index], pending.line);
            encode_padded(pending.opcode, args[index], size, &mut bytecode);
        }

        Ok(CodeDescriptor {
            layout: self.layout,
            positional_param_count: self.positional,
            keyword_only_param_count: self.keyword_only,
            local_slot_count: self.varnames.len() as u32,
            evaluation_stack_size: stack_size,
            flags: self.flags,
            bytecode: ByteField::from(bytecode),
            constants: self.constants,
            names: self.names,
            local_var_names: self.varnames,
            free_var_names: self.freevars,
            cell_var_names: self.cellvars,
            filename: self.filename,
            qualified_name: self.qualified_name,
            first_line_number: self.first_line,
            line_table: ByteField::from(lines.finish()),
            default_values: self.defaults,
        })
    }

    fn resolve_labels(&self) -> Result<Vec<usize>, CodeError> {
        self.labels
            .iter()
            .enumerate()
            .map(|(id, bound)| {
                bound.ok_or_else(|| CodeError::assembly(format!("label {} was never bound", id)))
            })
            .collect()
    }

    /// Assigns byte offsets, growing `EXTENDED_ARG` prefixes until every
    /// jump argument fits. Returns `code.len() + 1` offsets and the final
    /// arguments.
    fn layout_code(&self, targets: &[usize]) -> Result<(Vec<usize>, Vec<u32>), CodeError> {
        let mut sizes: Vec<usize> = self
            .code
            .iter()
            .map(|pending| match pending.operand {
                Operand::Value(arg) => instruction_size(arg),
                Operand::Jump(_) => 2,
            })
            .collect();
        let mut args = vec![0u32; self.code.len()];
        loop {
            let mut offsets = Vec::with_capacity(sizes.len() + 1);
            let mut offset = 0usize;
            offsets.push(0);
            for size in &sizes {
                offset += size;
                offsets.push(offset);
            }

            let mut grew = false;
            for (index, pending) in self.code.iter().enumerate() {
                let arg = match pending.operand {
                    Operand::Value(arg) => arg,
                    Operand::Jump(label) => {
                        let target = offsets[targets[label.0]];
                        match pending.opcode.jump_kind() {
                            Some(JumpKind::Absolute) => target as u32,
                            Some(JumpKind::Relative) => {
                                let next = offsets[index + 1];
                                if target < next {
                                    return Err(CodeError::assembly(format!(
                                        "{} cannot jump backwards",
                                        pending.opcode
                                    )));
                                }
                                (target - next) as u32
                            }
                            None => {
                                return Err(CodeError::assembly(format!(
                                    "{} does not take a jump target",
                                    pending.opcode
                                )))
                            }
                        }
                    }
                };
                args[index] = arg;
                let needed = instruction_size(arg);
                if needed > sizes[index] {
                    sizes[index] = needed;
                    grew = true;
                }
            }
            if !grew {
                return Ok((offsets, args));
            }
        }
    }

    fn max_stack_depth(&self, targets: &[usize], args: &[u32]) -> Result<u32, CodeError> {
        const LIMIT: i32 = 1 << 20;
        let mut depths: Vec<Option<i32>> = vec![None; self.code.len() + 1];
        let mut work = vec![(0usize, 0i32)];
        let mut max_depth = 0i32;
        while let Some((index, depth)) = work.pop() {
            if index >= self.code.len() {
                continue;
            }
            if depths[index].is_some_and(|seen| seen >= depth) {
                continue;
            }
            depths[index] = Some(depth);
            let pending = &self.code[index];
            let arg = args[index];

            let fallthrough = depth + stack_effect(pending.opcode, arg, false);
            if fallthrough < 0 {
                return Err(CodeError::assembly(format!(
                    "stack underflow at {} (instruction {})",
                    pending.opcode, index
                )));
            }
            if fallthrough > LIMIT {
                return Err(CodeError::assembly("stack depth does not converge"));
            }
            max_depth = max_depth.max(fallthrough);
            if let Operand::Jump(label) = pending.operand {
                let jumped = depth + stack_effect(pending.opcode, arg, true);
                max_depth = max_depth.max(jumped);
                work.push((targets[label.0], jumped));
            }
            if !pending.opcode.is_terminal() {
                work.push((index + 1, fallthrough));
            }
        }
        Ok(max_depth as u32)
    }
}

fn intern(table: &mut Vec<String>, name: &str) -> u32 {
    if let Some(index) = table.iter().position(|n| n == name) {
        return index as u32;
    }
    table.push(name.to_string());
    (table.len() - 1) as u32
}

/// Encodes with exactly `size` bytes, padding with zero `EXTENDED_ARG`
/// prefixes when the argument shrank after layout.
fn encode_padded(opcode: Opcode, arg: u32, size: usize, out: &mut Vec<u8>) {
    let prefixes = size / 2 - 1;
    for shift in (1..=prefixes).rev() {
        out.extend_from_slice(&[Opcode::ExtendedArg as u8, (arg >> (8 * shift)) as u8]);
    }
    out.extend_from_slice(&[opcode as u8, arg as u8]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::decode_instructions;
    use pretty_assertions::assert_eq;

    #[test]
    fn assembles_hello_world() {
        let mut asm = Assembler::new("hello", "<string>", 1);
        asm.set_flags(67);
        asm.set_line(2);
        asm.add_const(Constant::None);
        let hello = asm.add_const("Hello World!");
        asm.emit_arg(Opcode::LoadConst, hello);
        asm.emit(Opcode::ReturnValue);
        let code = asm.finish().expect("assemble");

        assert_eq!(code.bytecode.to_text(), "ZAFTAA==");
        assert_eq!(code.line_table.to_text(), "AAE=");
        assert_eq!(code.evaluation_stack_size, 1);
        assert_eq!(code.local_slot_count, 0);
    }

    #[test]
    fn resolves_forward_and_backward_jumps() {
        let mut asm = Assembler::new("loop", "<string>", 1);
        let top = asm.new_label();
        let done = asm.new_label();
        let x = asm.add_varname("x");
        asm.bind(top);
        asm.emit_arg(Opcode::LoadFast, x);
        asm.emit_jump(Opcode::PopJumpIfFalse, done);
        asm.emit_jump(Opcode::JumpAbsolute, top);
        asm.bind(done);
        let none = asm.add_const(Constant::None);
        asm.emit_arg(Opcode::LoadConst, none);
        asm.emit(Opcode::ReturnValue);
        let code = asm.finish().expect("assemble");

        let raw = code.bytecode.as_raw().expect("raw");
        let instructions = decode_instructions(raw).expect("decode");
        assert_eq!(instructions[1].jump_target(), Some(6));
        assert_eq!(instructions[2].jump_target(), Some(0));
        assert_eq!(code.evaluation_stack_size, 1);
    }

    #[test]
    fn long_jumps_grow_extended_args() {
        let mut asm = Assembler::new("long", "<string>", 1);
        let end = asm.new_label();
        asm.emit_jump(Opcode::JumpForward, end);
        for _ in 0..200 {
            asm.emit(Opcode::Nop);
        }
        asm.bind(end);
        let none = asm.add_const(Constant::None);
        asm.emit_arg(Opcode::LoadConst, none);
        asm.emit(Opcode::ReturnValue);
        let code = asm.finish().expect("assemble");

        let raw = code.bytecode.as_raw().expect("raw");
        let instructions = decode_instructions(raw).expect("decode");
        assert_eq!(instructions[0].size, 4);
        assert_eq!(instructions[0].jump_target(), Some(404));
        assert_eq!(instructions[201].offset, 404);
    }

    #[test]
    fn unbound_label_fails() {
        let mut asm = Assembler::new("bad", "<string>", 1);
        let nowhere = asm.new_label();
        asm.emit_jump(Opcode::JumpAbsolute, nowhere);
        assert!(matches!(asm.finish(), Err(CodeError::Assembly { .. })));
    }

    #[test]
    fn deref_slots_put_cells_first() {
        let mut asm = Assembler::new("f", "<string>", 1);
        asm.add_freevar("outer");
        asm.add_cellvar("inner");
        assert_eq!(asm.deref_index("inner"), Some(0));
        assert_eq!(asm.deref_index("outer"), Some(1));
    }
}
