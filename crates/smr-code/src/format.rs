use itertools::Itertools;

use crate::constant::Constant;
use crate::descriptor::CodeDescriptor;
use crate::lnotab::line_starts;
use crate::opcode::{
    decode_instructions, CompareOp, Instruction, Opcode, CO_ASYNC_GENERATOR, CO_COROUTINE,
    CO_GENERATOR, CO_ITERABLE_COROUTINE, CO_NESTED, CO_NEWLOCALS, CO_NOFREE, CO_OPTIMIZED,
    CO_VARARGS, CO_VARKEYWORDS,
};

const FLAG_NAMES: &[(u32, &str)] = &[
    (CO_OPTIMIZED, "OPTIMIZED"),
    (CO_NEWLOCALS, "NEWLOCALS"),
    (CO_VARARGS, "VARARGS"),
    (CO_VARKEYWORDS, "VARKEYWORDS"),
    (CO_NESTED, "NESTED"),
    (CO_GENERATOR, "GENERATOR"),
    (CO_NOFREE, "NOFREE"),
    (CO_COROUTINE, "COROUTINE"),
    (CO_ITERABLE_COROUTINE, "ITERABLE_COROUTINE"),
    (CO_ASYNC_GENERATOR, "ASYNC_GENERATOR"),
];

pub fn format_descriptor(descriptor: &CodeDescriptor) -> String {
    let mut output = String::new();
    format_into(descriptor, &mut output);
    output
}

pub fn format_flags(flags: u32) -> String {
    let mut names = FLAG_NAMES
        .iter()
        .filter(|(bit, _)| flags & bit != 0)
        .map(|(_, name)| name.to_string())
        .collect::<Vec<_>>();
    let unknown = flags & !FLAG_NAMES.iter().fold(0, |acc, (bit, _)| acc | bit);
    if unknown != 0 {
        names.push(format!("{:#x}", unknown));
    }
    let names = names.join(" | ");
    if names.is_empty() {
        "0".to_string()
    } else {
        names
    }
}

fn format_into(descriptor: &CodeDescriptor, output: &mut String) {
    output.push_str(&format!(
        "code {} (file {:?}, line {}) {{\n",
        descriptor.qualified_name, descriptor.filename, descriptor.first_line_number
    ));
    output.push_str(&format!(
        "  params: positional {}, keyword-only {}, defaults {}\n",
        descriptor.positional_param_count,
        descriptor.keyword_only_param_count,
        descriptor.default_values.len()
    ));
    output.push_str(&format!(
        "  locals: {}, stack: {}, flags: {:#x} ({})\n",
        descriptor.local_slot_count,
        descriptor.evaluation_stack_size,
        descriptor.flags,
        format_flags(descriptor.flags)
    ));
    output.push_str("  constants:\n");
    for (index, constant) in descriptor.constants.iter().enumerate() {
        output.push_str(&format!("    [{}] {}\n", index, constant.repr()));
    }
    for (label, names) in [
        ("names", &descriptor.names),
        ("varnames", &descriptor.local_var_names),
        ("cellvars", &descriptor.cell_var_names),
        ("freevars", &descriptor.free_var_names),
    ] {
        if !names.is_empty() {
            output.push_str(&format!("  {}: {}\n", label, names.join(", ")));
        }
    }
    if !descriptor.default_values.is_empty() {
        output.push_str(&format!(
            "  defaults: {}\n",
            descriptor.default_values.iter().map(Constant::repr).join(", ")
        ));
    }

    output.push_str("  disassembly:\n");
    match (descriptor.bytecode.as_raw(), descriptor.line_table.as_raw()) {
        (Some(code), line_table) => match decode_instructions(code) {
            Ok(instructions) => {
                let starts = line_table
                    .map(|table| line_starts(descriptor.first_line_number, table))
                    .unwrap_or_default();
                for instruction in &instructions {
                    let line = starts
                        .iter()
                        .find(|(offset, _)| *offset == instruction.offset)
                        .map(|(_, line)| line.to_string())
                        .unwrap_or_default();
                    output.push_str(&format!(
                        "  {:>5} {:>6} {}\n",
                        line,
                        instruction.offset,
                        format_instruction(descriptor, instruction)
                    ));
                }
            }
            Err(err) => output.push_str(&format!("    <{}>\n", err)),
        },
        (None, _) => output.push_str("    <bytecode not normalized>\n"),
    }
    output.push_str("}\n");

    for constant in &descriptor.constants {
        if let Constant::Code(nested) = constant {
            output.push('\n');
            format_into(nested, output);
        }
    }
}

fn format_instruction(descriptor: &CodeDescriptor, instruction: &Instruction) -> String {
    let name: &'static str = instruction.opcode.into();
    if !instruction.opcode.has_arg() {
        return name.to_string();
    }
    let arg = instruction.arg;
    let detail = match instruction.opcode {
        Opcode::LoadConst => descriptor
            .constants
            .get(arg as usize)
            .map(Constant::repr),
        Opcode::LoadGlobal
        | Opcode::StoreGlobal
        | Opcode::DeleteGlobal
        | Opcode::LoadAttr
        | Opcode::LoadMethod => descriptor.names.get(arg as usize).cloned(),
        Opcode::LoadFast | Opcode::StoreFast | Opcode::DeleteFast => {
            descriptor.local_var_names.get(arg as usize).cloned()
        }
        Opcode::LoadDeref | Opcode::StoreDeref | Opcode::LoadClosure => descriptor
            .cell_var_names
            .iter()
            .chain(&descriptor.free_var_names)
            .nth(arg as usize)
            .cloned(),
        Opcode::CompareOp => CompareOp::from_arg(arg).map(|op| op.to_string()),
        _ => instruction.jump_target().map(|target| format!("to {}", target)),
    };
    match detail {
        Some(detail) => format!("{:<20} {} ({})", name, arg, detail),
        None => format!("{:<20} {}", name, arg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::Assembler;

    #[test]
    fn disassembles_with_operands() {
        let mut asm = Assembler::new("greet", "greet.py", 1);
        asm.set_flags(CO_OPTIMIZED | CO_NEWLOCALS | CO_NOFREE);
        asm.set_parameters(1, 0);
        asm.set_line(2);
        asm.add_const(Constant::None);
        let template = asm.add_const("Hello %s!");
        let o = asm.add_varname("o");
        asm.emit_arg(Opcode::LoadConst, template);
        asm.emit_arg(Opcode::LoadFast, o);
        asm.emit(Opcode::BinaryModulo);
        asm.emit(Opcode::ReturnValue);
        let code = asm.finish().expect("assemble");

        let text = format_descriptor(&code);
        assert!(text.contains("code greet (file \"greet.py\", line 1)"));
        assert!(text.contains("flags: 0x43 (OPTIMIZED | NEWLOCALS | NOFREE)"));
        assert!(text.contains("LOAD_CONST"));
        assert!(text.contains("1 ('Hello %s!')"));
        assert!(text.contains("0 (o)"));
        assert!(text.contains("BINARY_MODULO"));
    }

    #[test]
    fn unknown_flag_bits_are_shown() {
        assert_eq!(format_flags(0x1 | 0x4000), "OPTIMIZED | 0x4000");
        assert_eq!(format_flags(0), "0");
    }
}
