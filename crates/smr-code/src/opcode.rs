//! Instruction set of the compiled-function layout.
//!
//! Numbering and argument conventions follow the CPython 3.8 wordcode format
//! for the subset the interpreter supports: every instruction is two bytes
//! (`opcode`, `arg`), and arguments wider than a byte are built from
//! `EXTENDED_ARG` prefixes.

use strum_macros::{Display, EnumString, FromRepr, IntoStaticStr};

use crate::error::CodeError;

/// Opcodes at or above this value use their argument byte.
pub const HAVE_ARGUMENT: u8 = 90;

pub const CO_OPTIMIZED: u32 = 0x0001;
pub const CO_NEWLOCALS: u32 = 0x0002;
pub const CO_VARARGS: u32 = 0x0004;
pub const CO_VARKEYWORDS: u32 = 0x0008;
pub const CO_NESTED: u32 = 0x0010;
pub const CO_GENERATOR: u32 = 0x0020;
pub const CO_NOFREE: u32 = 0x0040;
pub const CO_COROUTINE: u32 = 0x0080;
pub const CO_ITERABLE_COROUTINE: u32 = 0x0100;
pub const CO_ASYNC_GENERATOR: u32 = 0x0200;

/// Bodies that suspend and resume instead of running to completion.
pub const CO_SUSPENDING: u32 =
    CO_GENERATOR | CO_COROUTINE | CO_ITERABLE_COROUTINE | CO_ASYNC_GENERATOR;

pub const MAKE_FUNCTION_DEFAULTS: u32 = 0x01;
pub const MAKE_FUNCTION_KWDEFAULTS: u32 = 0x02;
pub const MAKE_FUNCTION_ANNOTATIONS: u32 = 0x04;
pub const MAKE_FUNCTION_CLOSURE: u32 = 0x08;

pub const FVC_MASK: u32 = 0x03;
pub const FVC_NONE: u32 = 0x00;
pub const FVC_STR: u32 = 0x01;
pub const FVC_REPR: u32 = 0x02;
pub const FVC_ASCII: u32 = 0x03;
pub const FVS_HAVE_SPEC: u32 = 0x04;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, FromRepr, IntoStaticStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum Opcode {
    PopTop = 1,
    RotTwo = 2,
    RotThree = 3,
    DupTop = 4,
    DupTopTwo = 5,
    Nop = 9,
    UnaryPositive = 10,
    UnaryNegative = 11,
    UnaryNot = 12,
    UnaryInvert = 15,
    BinaryPower = 19,
    BinaryMultiply = 20,
    BinaryModulo = 22,
    BinaryAdd = 23,
    BinarySubtract = 24,
    BinarySubscr = 25,
    BinaryFloorDivide = 26,
    BinaryTrueDivide = 27,
    InplaceFloorDivide = 28,
    InplaceTrueDivide = 29,
    InplaceAdd = 55,
    InplaceSubtract = 56,
    InplaceMultiply = 57,
    InplaceModulo = 59,
    StoreSubscr = 60,
    DeleteSubscr = 61,
    BinaryLshift = 62,
    BinaryRshift = 63,
    BinaryAnd = 64,
    BinaryXor = 65,
    BinaryOr = 66,
    InplacePower = 67,
    GetIter = 68,
    InplaceLshift = 75,
    InplaceRshift = 76,
    InplaceAnd = 77,
    InplaceXor = 78,
    InplaceOr = 79,
    ReturnValue = 83,
    UnpackSequence = 92,
    ForIter = 93,
    StoreGlobal = 97,
    DeleteGlobal = 98,
    LoadConst = 100,
    BuildTuple = 102,
    BuildList = 103,
    BuildMap = 105,
    LoadAttr = 106,
    CompareOp = 107,
    JumpForward = 110,
    JumpIfFalseOrPop = 111,
    JumpIfTrueOrPop = 112,
    JumpAbsolute = 113,
    PopJumpIfFalse = 114,
    PopJumpIfTrue = 115,
    LoadGlobal = 116,
    LoadFast = 124,
    StoreFast = 125,
    DeleteFast = 126,
    RaiseVarargs = 130,
    CallFunction = 131,
    MakeFunction = 132,
    BuildSlice = 133,
    LoadClosure = 135,
    LoadDeref = 136,
    StoreDeref = 137,
    CallFunctionKw = 141,
    ExtendedArg = 144,
    FormatValue = 155,
    BuildConstKeyMap = 156,
    BuildString = 157,
    LoadMethod = 160,
    CallMethod = 161,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpKind {
    /// Argument is a byte offset from the start of the instruction stream.
    Absolute,
    /// Argument is a byte delta from the end of the jumping instruction.
    Relative,
}

impl Opcode {
    pub fn has_arg(self) -> bool {
        self as u8 >= HAVE_ARGUMENT
    }

    pub fn jump_kind(self) -> Option<JumpKind> {
        match self {
            Opcode::JumpAbsolute
            | Opcode::PopJumpIfFalse
            | Opcode::PopJumpIfTrue
            | Opcode::JumpIfFalseOrPop
            | Opcode::JumpIfTrueOrPop => Some(JumpKind::Absolute),
            Opcode::JumpForward | Opcode::ForIter => Some(JumpKind::Relative),
            _ => None,
        }
    }

    /// Control never continues with the next instruction.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Opcode::ReturnValue
                | Opcode::RaiseVarargs
                | Opcode::JumpAbsolute
                | Opcode::JumpForward
        )
    }

    pub fn is_inplace(self) -> bool {
        matches!(
            self,
            Opcode::InplaceAdd
                | Opcode::InplaceSubtract
                | Opcode::InplaceMultiply
                | Opcode::InplaceModulo
                | Opcode::InplaceTrueDivide
                | Opcode::InplaceFloorDivide
                | Opcode::InplacePower
                | Opcode::InplaceLshift
                | Opcode::InplaceRshift
                | Opcode::InplaceAnd
                | Opcode::InplaceXor
                | Opcode::InplaceOr
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, FromRepr)]
#[repr(u8)]
pub enum CompareOp {
    #[strum(to_string = "<")]
    Lt = 0,
    #[strum(to_string = "<=")]
    Le = 1,
    #[strum(to_string = "==")]
    Eq = 2,
    #[strum(to_string = "!=")]
    Ne = 3,
    #[strum(to_string = ">")]
    Gt = 4,
    #[strum(to_string = ">=")]
    Ge = 5,
    #[strum(to_string = "in")]
    In = 6,
    #[strum(to_string = "not in")]
    NotIn = 7,
    #[strum(to_string = "is")]
    Is = 8,
    #[strum(to_string = "is not")]
    IsNot = 9,
    #[strum(to_string = "exception match")]
    ExceptionMatch = 10,
}

impl CompareOp {
    pub fn from_arg(arg: u32) -> Option<Self> {
        u8::try_from(arg).ok().and_then(CompareOp::from_repr)
    }
}

/// One decoded instruction. `offset` points at the first byte of the
/// instruction including any `EXTENDED_ARG` prefixes, which is where jumps
/// land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub offset: usize,
    pub size: usize,
    pub opcode: Opcode,
    pub arg: u32,
}

impl Instruction {
    pub fn next_offset(&self) -> usize {
        self.offset + self.size
    }

    pub fn jump_target(&self) -> Option<usize> {
        match self.opcode.jump_kind()? {
            JumpKind::Absolute => Some(self.arg as usize),
            JumpKind::Relative => Some(self.next_offset() + self.arg as usize),
        }
    }
}

pub fn decode_instructions(code: &[u8]) -> Result<Vec<Instruction>, CodeError> {
    if code.len() % 2 != 0 {
        return Err(CodeError::bytecode(
            code.len() - 1,
            "instruction stream has odd length",
        ));
    }
    let mut instructions = Vec::with_capacity(code.len() / 2);
    let mut extended: u32 = 0;
    let mut start: Option<usize> = None;
    for (index, unit) in code.chunks_exact(2).enumerate() {
        let offset = index * 2;
        let opcode = Opcode::from_repr(unit[0])
            .ok_or_else(|| CodeError::bytecode(offset, format!("unknown opcode {}", unit[0])))?;
        let first = *start.get_or_insert(offset);
        let arg = extended | u32::from(unit[1]);
        if opcode == Opcode::ExtendedArg {
            if arg > 0x00ff_ffff {
                return Err(CodeError::bytecode(offset, "extended argument overflow"));
            }
            extended = arg << 8;
            continue;
        }
        instructions.push(Instruction {
            offset: first,
            size: offset + 2 - first,
            opcode,
            arg: if opcode.has_arg() { arg } else { 0 },
        });
        extended = 0;
        start = None;
    }
    if let Some(offset) = start {
        return Err(CodeError::bytecode(
            offset,
            "EXTENDED_ARG is not followed by an instruction",
        ));
    }
    Ok(instructions)
}

pub fn instruction_size(arg: u32) -> usize {
    if arg > 0x00ff_ffff {
        8
    } else if arg > 0xffff {
        6
    } else if arg > 0xff {
        4
    } else {
        2
    }
}

pub fn encode_instruction(opcode: Opcode, arg: u32, out: &mut Vec<u8>) {
    let ext = Opcode::ExtendedArg as u8;
    if arg > 0x00ff_ffff {
        out.extend_from_slice(&[ext, (arg >> 24) as u8]);
    }
    if arg > 0xffff {
        out.extend_from_slice(&[ext, (arg >> 16) as u8]);
    }
    if arg > 0xff {
        out.extend_from_slice(&[ext, (arg >> 8) as u8]);
    }
    out.extend_from_slice(&[opcode as u8, arg as u8]);
}

/// Net change of the evaluation stack depth when `opcode` executes. `jump`
/// selects the branch-taken effect for conditional jumps and `FOR_ITER`.
pub fn stack_effect(opcode: Opcode, arg: u32, jump: bool) -> i32 {
    let arg = arg as i32;
    match opcode {
        Opcode::Nop
        | Opcode::ExtendedArg
        | Opcode::RotTwo
        | Opcode::RotThree
        | Opcode::UnaryPositive
        | Opcode::UnaryNegative
        | Opcode::UnaryNot
        | Opcode::UnaryInvert
        | Opcode::GetIter
        | Opcode::LoadAttr
        | Opcode::DeleteFast
        | Opcode::DeleteGlobal
        | Opcode::JumpForward
        | Opcode::JumpAbsolute => 0,
        Opcode::PopTop | Opcode::ReturnValue => -1,
        Opcode::DupTop => 1,
        Opcode::DupTopTwo => 2,
        Opcode::BinaryPower
        | Opcode::BinaryMultiply
        | Opcode::BinaryModulo
        | Opcode::BinaryAdd
        | Opcode::BinarySubtract
        | Opcode::BinarySubscr
        | Opcode::BinaryFloorDivide
        | Opcode::BinaryTrueDivide
        | Opcode::BinaryLshift
        | Opcode::BinaryRshift
        | Opcode::BinaryAnd
        | Opcode::BinaryXor
        | Opcode::BinaryOr
        | Opcode::InplaceFloorDivide
        | Opcode::InplaceTrueDivide
        | Opcode::InplaceAdd
        | Opcode::InplaceSubtract
        | Opcode::InplaceMultiply
        | Opcode::InplaceModulo
        | Opcode::InplacePower
        | Opcode::InplaceLshift
        | Opcode::InplaceRshift
        | Opcode::InplaceAnd
        | Opcode::InplaceXor
        | Opcode::InplaceOr
        | Opcode::CompareOp => -1,
        Opcode::StoreSubscr => -3,
        Opcode::DeleteSubscr => -2,
        Opcode::UnpackSequence => arg - 1,
        Opcode::ForIter => {
            if jump {
                -1
            } else {
                1
            }
        }
        Opcode::StoreGlobal | Opcode::StoreFast | Opcode::StoreDeref => -1,
        Opcode::LoadConst
        | Opcode::LoadFast
        | Opcode::LoadGlobal
        | Opcode::LoadDeref
        | Opcode::LoadClosure
        | Opcode::LoadMethod => 1,
        Opcode::BuildTuple | Opcode::BuildList | Opcode::BuildString => 1 - arg,
        Opcode::BuildMap => 1 - 2 * arg,
        Opcode::BuildConstKeyMap => -arg,
        Opcode::BuildSlice => {
            if arg == 3 {
                -2
            } else {
                -1
            }
        }
        Opcode::JumpIfFalseOrPop | Opcode::JumpIfTrueOrPop => {
            if jump {
                0
            } else {
                -1
            }
        }
        Opcode::PopJumpIfFalse | Opcode::PopJumpIfTrue => -1,
        Opcode::RaiseVarargs => -arg,
        Opcode::CallFunction => -arg,
        Opcode::CallFunctionKw => -arg - 1,
        Opcode::CallMethod => -arg - 1,
        Opcode::MakeFunction => {
            let extras = (arg as u32 & 0x0f).count_ones() as i32;
            -1 - extras
        }
        Opcode::FormatValue => {
            if arg as u32 & FVS_HAVE_SPEC != 0 {
                -1
            } else {
                0
            }
        }
    }
}
