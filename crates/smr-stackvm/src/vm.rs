//! The frame-stack interpreter.
//!
//! Calls between reconstructed functions push frames onto `Vm::frames`
//! instead of recursing on the host stack, so call depth is bounded by
//! `max_depth` alone.

use std::rc::Rc;

use itertools::Itertools;
use smr_code::opcode::{
    FVC_ASCII, FVC_MASK, FVC_REPR, FVC_STR, FVS_HAVE_SPEC, MAKE_FUNCTION_ANNOTATIONS,
    MAKE_FUNCTION_CLOSURE, MAKE_FUNCTION_DEFAULTS, MAKE_FUNCTION_KWDEFAULTS,
};
use smr_code::{CompareOp, Instruction, Opcode};
use tracing::{debug, trace};

use crate::builtins::{call_builtin, instantiate};
use crate::code::CodeObject;
use crate::fault::{Fault, FaultKind, TraceFrame, VmError};
use crate::format::format_value;
use crate::function::Function;
use crate::methods::call_method;
use crate::ops::{
    binary_op, compare, delete_item, get_attribute, get_item, get_iter, inplace_op,
    iter_next, set_item, unary_op, unpack_sequence, BinaryOp, UnaryOp,
};
use crate::value::{empty_cell, Cell, Dict, SliceValue, Value};

pub const DEFAULT_MAX_DEPTH: usize = 200;

struct Frame {
    function: Rc<Function>,
    /// Index of the next instruction.
    pc: usize,
    /// Byte offset of the instruction being executed.
    offset: usize,
    stack: Vec<Value>,
    locals: Vec<Option<Value>>,
    /// Cell variables followed by free variables.
    cells: Vec<Cell>,
}

impl Frame {
    fn code(&self) -> &CodeObject {
        &self.function.code
    }

    fn push(&mut self, value: Value) -> Result<(), VmError> {
        if self.stack.len() >= self.code().stack_size() {
            return Err(VmError::system_error(format!(
                "evaluation stack of {} exceeded its declared size {}",
                self.code().name(),
                self.code().stack_size()
            )));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, VmError> {
        self.stack
            .pop()
            .ok_or_else(|| VmError::system_error("evaluation stack underflow"))
    }

    fn pop_n(&mut self, count: usize) -> Result<Vec<Value>, VmError> {
        if count > self.stack.len() {
            return Err(VmError::system_error("evaluation stack underflow"));
        }
        let at = self.stack.len() - count;
        Ok(self.stack.split_off(at))
    }

    fn top(&self) -> Result<&Value, VmError> {
        self.stack
            .last()
            .ok_or_else(|| VmError::system_error("evaluation stack underflow"))
    }

    fn jump(&mut self, target: usize) -> Result<(), VmError> {
        self.pc = self
            .code()
            .index_of(target)
            .ok_or_else(|| VmError::system_error(format!("jump to bad offset {}", target)))?;
        Ok(())
    }

    fn trace_frame(&self) -> TraceFrame {
        TraceFrame {
            filename: self.code().filename().to_string(),
            name: short_name(self.code().name()).to_string(),
            line: self.code().line_for(self.offset),
        }
    }
}

fn short_name(qualified: &str) -> &str {
    qualified.rsplit('.').next().unwrap_or(qualified)
}

enum Flow {
    Continue,
    Return(Value),
}

pub struct Vm {
    frames: Vec<Frame>,
    max_depth: usize,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        Self::with_max_depth(DEFAULT_MAX_DEPTH)
    }

    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            frames: Vec::new(),
            max_depth,
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Calls any callable value with positional and keyword arguments.
    pub fn call(
        &mut self,
        callee: &Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, VmError> {
        match callee {
            Value::Function(function) => self.call_function(function, args, kwargs),
            Value::Builtin(builtin) => call_builtin(self, *builtin, args, kwargs),
            Value::Method(method) => {
                call_method(self, &method.receiver, &method.name, args, kwargs)
            }
            Value::Class(class) => instantiate(class, args, &kwargs),
            other => Err(VmError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    pub fn call_function(
        &mut self,
        function: &Rc<Function>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, VmError> {
        let base = self.frames.len();
        self.enter(function, args, kwargs)?;
        self.run(base)
    }

    fn enter(
        &mut self,
        function: &Rc<Function>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<(), VmError> {
        if self.frames.len() >= self.max_depth {
            return Err(VmError::new(
                FaultKind::RecursionError,
                "maximum recursion depth exceeded",
            ));
        }
        let frame = bind(function, args, kwargs)?;
        trace!(function = %function.name, depth = self.frames.len() + 1, "enter");
        self.frames.push(frame);
        Ok(())
    }

    fn run(&mut self, base: usize) -> Result<Value, VmError> {
        loop {
            match self.step() {
                Ok(Flow::Continue) => {}
                Ok(Flow::Return(value)) => {
                    if let Some(frame) = self.frames.pop() {
                        trace!(function = %frame.function.name, "return");
                    }
                    if self.frames.len() <= base {
                        return Ok(value);
                    }
                    if let Err(err) = self.frame().and_then(|frame| frame.push(value)) {
                        return Err(self.unwind(base, err));
                    }
                }
                Err(err) => return Err(self.unwind(base, err)),
            }
        }
    }

    /// Pops every frame above `base`, recording each in the fault's traceback.
    fn unwind(&mut self, base: usize, err: VmError) -> VmError {
        while self.frames.len() > base {
            if let Some(frame) = self.frames.pop() {
                err.fault.push_frame(frame.trace_frame());
            }
        }
        debug!(fault = %err.fault, "call raised");
        err
    }

    fn frame(&mut self) -> Result<&mut Frame, VmError> {
        self.frames
            .last_mut()
            .ok_or_else(|| VmError::system_error("no active frame"))
    }

    fn step(&mut self) -> Result<Flow, VmError> {
        let frame = self.frame()?;
        let code = Rc::clone(&frame.function.code);
        let instruction = *code.instructions().get(frame.pc).ok_or_else(|| {
            VmError::system_error(format!("execution ran past the end of {}", code.name()))
        })?;
        frame.pc += 1;
        frame.offset = instruction.offset;
        self.execute(&code, instruction)
    }

    fn execute(&mut self, code: &CodeObject, instruction: Instruction) -> Result<Flow, VmError> {
        let arg = instruction.arg as usize;
        match instruction.opcode {
            Opcode::Nop | Opcode::ExtendedArg => {}
            Opcode::PopTop => {
                self.frame()?.pop()?;
            }
            Opcode::RotTwo => {
                let frame = self.frame()?;
                let len = frame.stack.len();
                if len < 2 {
                    return Err(VmError::system_error("evaluation stack underflow"));
                }
                frame.stack.swap(len - 1, len - 2);
            }
            Opcode::RotThree => {
                let frame = self.frame()?;
                let top = frame.pop()?;
                let len = frame.stack.len();
                if len < 2 {
                    return Err(VmError::system_error("evaluation stack underflow"));
                }
                frame.stack.insert(len - 2, top);
            }
            Opcode::DupTop => {
                let frame = self.frame()?;
                let top = frame.top()?.clone();
                frame.push(top)?;
            }
            Opcode::DupTopTwo => {
                let frame = self.frame()?;
                let pair = frame.pop_n(2)?;
                for value in pair.iter().chain(pair.iter()) {
                    frame.push(value.clone())?;
                }
            }
            Opcode::UnaryPositive
            | Opcode::UnaryNegative
            | Opcode::UnaryNot
            | Opcode::UnaryInvert => {
                let op = match instruction.opcode {
                    Opcode::UnaryPositive => UnaryOp::Positive,
                    Opcode::UnaryNegative => UnaryOp::Negative,
                    Opcode::UnaryNot => UnaryOp::Not,
                    _ => UnaryOp::Invert,
                };
                let frame = self.frame()?;
                let value = frame.pop()?;
                frame.push(unary_op(op, &value)?)?;
            }
            opcode if binary_operator(opcode).is_some() => {
                let op = binary_operator(opcode)
                    .ok_or_else(|| VmError::system_error("not a binary operator"))?;
                let frame = self.frame()?;
                let right = frame.pop()?;
                let left = frame.pop()?;
                let result = if opcode.is_inplace() {
                    inplace_op(op, &left, &right)?
                } else {
                    binary_op(op, &left, &right)?
                };
                frame.push(result)?;
            }
            Opcode::BinarySubscr => {
                let frame = self.frame()?;
                let key = frame.pop()?;
                let container = frame.pop()?;
                frame.push(get_item(&container, &key)?)?;
            }
            Opcode::StoreSubscr => {
                let frame = self.frame()?;
                let key = frame.pop()?;
                let container = frame.pop()?;
                let value = frame.pop()?;
                set_item(&container, &key, value)?;
            }
            Opcode::DeleteSubscr => {
                let frame = self.frame()?;
                let key = frame.pop()?;
                let container = frame.pop()?;
                delete_item(&container, &key)?;
            }
            Opcode::CompareOp => {
                let op = CompareOp::from_arg(instruction.arg).ok_or_else(|| {
                    VmError::system_error(format!("bad comparison {}", instruction.arg))
                })?;
                let frame = self.frame()?;
                let right = frame.pop()?;
                let left = frame.pop()?;
                frame.push(compare(op, &left, &right)?)?;
            }
            Opcode::GetIter => {
                let frame = self.frame()?;
                let iterable = frame.pop()?;
                frame.push(get_iter(&iterable)?)?;
            }
            Opcode::ForIter => {
                let frame = self.frame()?;
                let next = iter_next(frame.top()?)?;
                match next {
                    Some(value) => frame.push(value)?,
                    None => {
                        frame.pop()?;
                        frame.jump(jump_target(&instruction)?)?;
                    }
                }
            }
            Opcode::UnpackSequence => {
                let frame = self.frame()?;
                let sequence = frame.pop()?;
                for item in unpack_sequence(&sequence, arg)?.into_iter().rev() {
                    frame.push(item)?;
                }
            }
            Opcode::ReturnValue => {
                let value = self.frame()?.pop()?;
                return Ok(Flow::Return(value));
            }
            Opcode::LoadConst => {
                let value = code.constant(arg).clone();
                self.frame()?.push(value)?;
            }
            Opcode::LoadFast => {
                let frame = self.frame()?;
                let value = frame.locals.get(arg).cloned().flatten().ok_or_else(|| {
                    unbound_local(&code.varnames()[arg])
                })?;
                frame.push(value)?;
            }
            Opcode::StoreFast => {
                let frame = self.frame()?;
                let value = frame.pop()?;
                frame.locals[arg] = Some(value);
            }
            Opcode::DeleteFast => {
                let frame = self.frame()?;
                if frame.locals[arg].take().is_none() {
                    return Err(unbound_local(&code.varnames()[arg]));
                }
            }
            Opcode::LoadGlobal => {
                let name = &code.names()[arg];
                let frame = self.frame()?;
                let value = frame
                    .function
                    .globals
                    .lookup(name)
                    .ok_or_else(|| name_error(name))?;
                frame.push(value)?;
            }
            Opcode::StoreGlobal => {
                let frame = self.frame()?;
                let value = frame.pop()?;
                frame.function.globals.set_global(code.names()[arg].clone(), value);
            }
            Opcode::DeleteGlobal => {
                let name = &code.names()[arg];
                let frame = self.frame()?;
                if !frame.function.globals.delete_global(name) {
                    return Err(name_error(name));
                }
            }
            Opcode::LoadClosure => {
                let frame = self.frame()?;
                let cell = Rc::clone(&frame.cells[arg]);
                frame.push(Value::Cell(cell))?;
            }
            Opcode::LoadDeref => {
                let frame = self.frame()?;
                let value = frame.cells[arg].borrow().clone();
                let value = value.ok_or_else(|| {
                    let name = code.deref_name(arg);
                    if arg < code.cellvars().len() {
                        unbound_local(name)
                    } else {
                        VmError::named(
                            FaultKind::NameError,
                            format!(
                                "free variable '{}' referenced before assignment in enclosing scope",
                                name
                            ),
                            name,
                        )
                    }
                })?;
                frame.push(value)?;
            }
            Opcode::StoreDeref => {
                let frame = self.frame()?;
                let value = frame.pop()?;
                *frame.cells[arg].borrow_mut() = Some(value);
            }
            Opcode::LoadAttr => {
                let frame = self.frame()?;
                let owner = frame.pop()?;
                frame.push(get_attribute(&owner, &code.names()[arg])?)?;
            }
            Opcode::LoadMethod => {
                let frame = self.frame()?;
                let owner = frame.pop()?;
                let method = get_attribute(&owner, &code.names()[arg])?;
                frame.push(Value::None)?;
                frame.push(method)?;
            }
            Opcode::BuildTuple => {
                let frame = self.frame()?;
                let items = frame.pop_n(arg)?;
                frame.push(Value::tuple(items))?;
            }
            Opcode::BuildList => {
                let frame = self.frame()?;
                let items = frame.pop_n(arg)?;
                frame.push(Value::list(items))?;
            }
            Opcode::BuildMap => {
                let frame = self.frame()?;
                let items = frame.pop_n(arg * 2)?;
                let mut dict = Dict::new();
                for (key, value) in items.into_iter().tuples() {
                    dict.insert(key, value)?;
                }
                frame.push(Value::dict(dict))?;
            }
            Opcode::BuildConstKeyMap => {
                let frame = self.frame()?;
                let keys = frame.pop()?;
                let values = frame.pop_n(arg)?;
                let Value::Tuple(keys) = keys else {
                    return Err(VmError::system_error("bad BUILD_CONST_KEY_MAP keys"));
                };
                if keys.len() != values.len() {
                    return Err(VmError::system_error("bad BUILD_CONST_KEY_MAP keys"));
                }
                let mut dict = Dict::new();
                for (key, value) in keys.iter().cloned().zip(values) {
                    dict.insert(key, value)?;
                }
                frame.push(Value::dict(dict))?;
            }
            Opcode::BuildSlice => {
                let frame = self.frame()?;
                let mut parts = frame.pop_n(arg)?.into_iter();
                let start = parts.next().unwrap_or(Value::None);
                let stop = parts.next().unwrap_or(Value::None);
                let step = parts.next().unwrap_or(Value::None);
                frame.push(Value::Slice(Rc::new(SliceValue { start, stop, step })))?;
            }
            Opcode::BuildString => {
                let frame = self.frame()?;
                let parts = frame.pop_n(arg)?;
                let joined: String = parts.iter().map(Value::to_text).collect();
                frame.push(Value::from(joined))?;
            }
            Opcode::FormatValue => {
                let frame = self.frame()?;
                let spec = if instruction.arg & FVS_HAVE_SPEC != 0 {
                    frame.pop()?.to_text()
                } else {
                    String::new()
                };
                let value = frame.pop()?;
                let value = match instruction.arg & FVC_MASK {
                    FVC_STR => Value::from(value.to_text()),
                    FVC_REPR | FVC_ASCII => Value::from(value.repr()),
                    _ => value,
                };
                frame.push(Value::from(format_value(&value, &spec)?))?;
            }
            Opcode::JumpForward | Opcode::JumpAbsolute => {
                self.frame()?.jump(jump_target(&instruction)?)?;
            }
            Opcode::PopJumpIfFalse | Opcode::PopJumpIfTrue => {
                let frame = self.frame()?;
                let condition = frame.pop()?.is_truthy();
                if condition == (instruction.opcode == Opcode::PopJumpIfTrue) {
                    frame.jump(jump_target(&instruction)?)?;
                }
            }
            Opcode::JumpIfFalseOrPop | Opcode::JumpIfTrueOrPop => {
                let frame = self.frame()?;
                let condition = frame.top()?.is_truthy();
                if condition == (instruction.opcode == Opcode::JumpIfTrueOrPop) {
                    frame.jump(jump_target(&instruction)?)?;
                } else {
                    frame.pop()?;
                }
            }
            Opcode::RaiseVarargs => return Err(self.raise(arg)?),
            Opcode::MakeFunction => {
                let frame = self.frame()?;
                let qualified_name = frame.pop()?;
                let Value::Code(nested) = frame.pop()? else {
                    return Err(VmError::system_error("MAKE_FUNCTION expects a code object"));
                };
                let mut function = Function::new(nested, Rc::clone(&frame.function.globals));
                if let Value::Str(name) = qualified_name {
                    function.name = name.to_string();
                }
                let flags = instruction.arg;
                if flags & MAKE_FUNCTION_CLOSURE != 0 {
                    function.closure = closure_cells(frame.pop()?)?;
                }
                if flags & MAKE_FUNCTION_ANNOTATIONS != 0 {
                    frame.pop()?;
                }
                if flags & MAKE_FUNCTION_KWDEFAULTS != 0 {
                    if let Value::Dict(kwdefaults) = frame.pop()? {
                        function.kw_defaults = kwdefaults
                            .borrow()
                            .entries()
                            .iter()
                            .map(|(key, value)| (key.to_text(), value.clone()))
                            .collect();
                    }
                }
                if flags & MAKE_FUNCTION_DEFAULTS != 0 {
                    if let Value::Tuple(defaults) = frame.pop()? {
                        function.defaults = defaults.to_vec();
                    }
                }
                frame.push(Value::Function(Rc::new(function)))?;
            }
            Opcode::CallFunction => {
                let frame = self.frame()?;
                let args = frame.pop_n(arg)?;
                let callee = frame.pop()?;
                return self.dispatch(callee, args, Vec::new());
            }
            Opcode::CallFunctionKw => {
                let frame = self.frame()?;
                let names = frame.pop()?;
                let mut args = frame.pop_n(arg)?;
                let callee = frame.pop()?;
                let Value::Tuple(names) = names else {
                    return Err(VmError::system_error("CALL_FUNCTION_KW expects a names tuple"));
                };
                if names.len() > args.len() {
                    return Err(VmError::system_error("CALL_FUNCTION_KW names exceed arguments"));
                }
                let values = args.split_off(args.len() - names.len());
                let kwargs = names.iter().map(Value::to_text).zip(values).collect();
                return self.dispatch(callee, args, kwargs);
            }
            Opcode::CallMethod => {
                let frame = self.frame()?;
                let args = frame.pop_n(arg)?;
                let callee = frame.pop()?;
                frame.pop()?;
                return self.dispatch(callee, args, Vec::new());
            }
            other => {
                return Err(VmError::system_error(format!(
                    "opcode {} is not supported",
                    other
                )))
            }
        }
        Ok(Flow::Continue)
    }

    /// Pushes a frame for reconstructed functions; everything else runs to
    /// completion and leaves its result on the caller's stack.
    fn dispatch(
        &mut self,
        callee: Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Flow, VmError> {
        if let Value::Function(function) = &callee {
            self.enter(function, args, kwargs)?;
            return Ok(Flow::Continue);
        }
        let result = self.call(&callee, args, kwargs)?;
        self.frame()?.push(result)?;
        Ok(Flow::Continue)
    }

    fn raise(&mut self, count: usize) -> Result<VmError, VmError> {
        let frame = self.frame()?;
        let mut operands = frame.pop_n(count)?.into_iter();
        let Some(exception) = operands.next() else {
            return Ok(VmError::new(
                FaultKind::RuntimeError,
                "No active exception to reraise",
            ));
        };
        let fault = as_fault(exception)?;
        if let Some(cause) = operands.next() {
            let cause = match cause {
                Value::None => Value::None,
                other => Value::Fault(as_fault(other)?),
            };
            fault.set_cause(cause);
        }
        Ok(VmError::from(fault))
    }
}

fn as_fault(value: Value) -> Result<Rc<Fault>, VmError> {
    match value {
        Value::Fault(fault) => Ok(fault),
        Value::Class(class) => Ok(Fault::new(class, Vec::new())),
        _ => Err(VmError::type_error(
            "exceptions must derive from BaseException",
        )),
    }
}

fn closure_cells(value: Value) -> Result<Vec<Cell>, VmError> {
    let Value::Tuple(items) = value else {
        return Err(VmError::system_error("closure must be a tuple of cells"));
    };
    items
        .iter()
        .map(|item| match item {
            Value::Cell(cell) => Ok(Rc::clone(cell)),
            _ => Err(VmError::system_error("closure must be a tuple of cells")),
        })
        .collect()
}

fn jump_target(instruction: &Instruction) -> Result<usize, VmError> {
    instruction
        .jump_target()
        .ok_or_else(|| VmError::system_error("not a jump"))
}

fn binary_operator(opcode: Opcode) -> Option<BinaryOp> {
    Some(match opcode {
        Opcode::BinaryAdd | Opcode::InplaceAdd => BinaryOp::Add,
        Opcode::BinarySubtract | Opcode::InplaceSubtract => BinaryOp::Sub,
        Opcode::BinaryMultiply | Opcode::InplaceMultiply => BinaryOp::Mul,
        Opcode::BinaryTrueDivide | Opcode::InplaceTrueDivide => BinaryOp::TrueDiv,
        Opcode::BinaryFloorDivide | Opcode::InplaceFloorDivide => BinaryOp::FloorDiv,
        Opcode::BinaryModulo | Opcode::InplaceModulo => BinaryOp::Mod,
        Opcode::BinaryPower | Opcode::InplacePower => BinaryOp::Pow,
        Opcode::BinaryLshift | Opcode::InplaceLshift => BinaryOp::LShift,
        Opcode::BinaryRshift | Opcode::InplaceRshift => BinaryOp::RShift,
        Opcode::BinaryAnd | Opcode::InplaceAnd => BinaryOp::And,
        Opcode::BinaryOr | Opcode::InplaceOr => BinaryOp::Or,
        Opcode::BinaryXor | Opcode::InplaceXor => BinaryOp::Xor,
        _ => return None,
    })
}

fn name_error(name: &str) -> VmError {
    VmError::named(
        FaultKind::NameError,
        format!("name '{}' is not defined", name),
        name,
    )
}

fn unbound_local(name: &str) -> VmError {
    VmError::named(
        FaultKind::UnboundLocalError,
        format!("local variable '{}' referenced before assignment", name),
        name,
    )
}

/// `'a'`, `'a' and 'b'`, `'a', 'b', and 'c'`.
fn quoted_list(names: &[&str]) -> String {
    let quoted: Vec<String> = names.iter().map(|name| format!("'{}'", name)).collect();
    match quoted.as_slice() {
        [] => String::new(),
        [one] => one.clone(),
        [first, second] => format!("{} and {}", first, second),
        [init @ .., last] => format!("{}, and {}", init.join(", "), last),
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}

/// Lays out the arguments of a call in a fresh frame.
fn bind(
    function: &Rc<Function>,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<Frame, VmError> {
    let code = &function.code;
    let name = short_name(code.name());
    let argcount = code.argcount();
    let kwonly = code.kwonly_count();
    let total = argcount + kwonly;
    let varnames = code.varnames();
    let mut locals: Vec<Option<Value>> = vec![None; varnames.len()];

    let given = args.len();
    let copied = given.min(argcount);
    let mut args = args.into_iter();
    for slot in locals.iter_mut().take(copied) {
        *slot = args.next();
    }
    let mut next_slot = total;
    if code.has_varargs() {
        locals[next_slot] = Some(Value::tuple(args.collect()));
        next_slot += 1;
    }
    let mut varkw = code.has_varkeywords().then(Dict::new);

    for (key, value) in kwargs {
        match varnames[..total].iter().position(|name| *name == key) {
            Some(slot) => {
                if locals[slot].is_some() {
                    return Err(VmError::type_error(format!(
                        "{}() got multiple values for argument '{}'",
                        name, key
                    )));
                }
                locals[slot] = Some(value);
            }
            None => match varkw.as_mut() {
                Some(dict) => dict.insert(Value::from(key), value)?,
                None => {
                    return Err(VmError::type_error(format!(
                        "{}() got an unexpected keyword argument '{}'",
                        name, key
                    )))
                }
            },
        }
    }
    if let Some(dict) = varkw {
        locals[next_slot] = Some(Value::dict(dict));
    }

    let defaults = &function.defaults;
    if given > argcount && !code.has_varargs() {
        let kwonly_given = locals[argcount..total].iter().filter(|v| v.is_some()).count();
        let signature = if defaults.is_empty() {
            argcount.to_string()
        } else {
            format!("from {} to {}", argcount - defaults.len(), argcount)
        };
        let plural_signature = if defaults.is_empty() {
            plural(argcount)
        } else {
            "s"
        };
        let kwonly_signature = if kwonly_given > 0 {
            format!(
                " positional argument{} (and {} keyword-only argument{})",
                plural(given),
                kwonly_given,
                plural(kwonly_given)
            )
        } else {
            String::new()
        };
        return Err(VmError::type_error(format!(
            "{}() takes {} positional argument{} but {}{} {} given",
            name,
            signature,
            plural_signature,
            given,
            kwonly_signature,
            if given == 1 && kwonly_given == 0 {
                "was"
            } else {
                "were"
            }
        )));
    }

    if copied < argcount {
        let first_default = argcount - defaults.len().min(argcount);
        let missing: Vec<&str> = (copied..first_default)
            .filter(|slot| locals[*slot].is_none())
            .map(|slot| varnames[slot].as_str())
            .collect();
        if !missing.is_empty() {
            return Err(VmError::type_error(format!(
                "{}() missing {} required positional argument{}: {}",
                name,
                missing.len(),
                plural(missing.len()),
                quoted_list(&missing)
            )));
        }
        for (index, default) in defaults.iter().enumerate() {
            let slot = first_default + index;
            if locals[slot].is_none() {
                locals[slot] = Some(default.clone());
            }
        }
    }

    if kwonly > 0 {
        let mut missing = Vec::new();
        for slot in argcount..total {
            if locals[slot].is_some() {
                continue;
            }
            match function.kw_default(&varnames[slot]) {
                Some(default) => locals[slot] = Some(default.clone()),
                None => missing.push(varnames[slot].as_str()),
            }
        }
        if !missing.is_empty() {
            return Err(VmError::type_error(format!(
                "{}() missing {} required keyword-only argument{}: {}",
                name,
                missing.len(),
                plural(missing.len()),
                quoted_list(&missing)
            )));
        }
    }

    let mut cells = Vec::with_capacity(code.cellvars().len() + code.freevars().len());
    for seed in code.cell_args() {
        let cell = empty_cell();
        if let Some(slot) = seed {
            *cell.borrow_mut() = locals[*slot].take();
        }
        cells.push(cell);
    }
    if function.closure.len() != code.freevars().len() {
        return Err(VmError::system_error(format!(
            "{} expects {} closure cells but was given {}",
            code.name(),
            code.freevars().len(),
            function.closure.len()
        )));
    }
    cells.extend(function.closure.iter().map(Rc::clone));

    Ok(Frame {
        function: Rc::clone(function),
        pc: 0,
        offset: 0,
        stack: Vec::with_capacity(code.stack_size()),
        locals,
        cells,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::InterpreterGeneration;
    use crate::environment::Environment;
    use smr_code::opcode::{CO_NEWLOCALS, CO_OPTIMIZED, CO_VARARGS};
    use smr_code::{Assembler, Constant};

    fn function(asm: Assembler, defaults: Vec<Value>) -> Rc<Function> {
        let descriptor = asm.finish().expect("assemble");
        let code = CodeObject::build(InterpreterGeneration::Current, &descriptor).expect("build");
        let mut function = Function::new(code, Rc::new(Environment::restricted()));
        function.defaults = defaults;
        Rc::new(function)
    }

    /// `def f(a, b=2): return a - b`
    fn subtract() -> Rc<Function> {
        let mut asm = Assembler::new("f", "calc.py", 1);
        asm.set_flags(CO_OPTIMIZED | CO_NEWLOCALS);
        asm.set_parameters(2, 0);
        let a = asm.add_varname("a");
        let b = asm.add_varname("b");
        asm.add_const(Constant::None);
        asm.set_line(2);
        asm.emit_arg(Opcode::LoadFast, a);
        asm.emit_arg(Opcode::LoadFast, b);
        asm.emit(Opcode::BinarySubtract);
        asm.emit(Opcode::ReturnValue);
        function(asm, vec![Value::Int(2)])
    }

    #[test]
    fn binds_positional_keyword_and_default_arguments() {
        let f = subtract();
        let mut vm = Vm::new();
        let value = vm.call_function(&f, vec![Value::Int(10)], Vec::new()).expect("call");
        assert!(matches!(value, Value::Int(8)));
        let value = vm
            .call_function(&f, Vec::new(), vec![
                ("b".to_string(), Value::Int(1)),
                ("a".to_string(), Value::Int(5)),
            ])
            .expect("call");
        assert!(matches!(value, Value::Int(4)));
        assert_eq!(vm.depth(), 0);
    }

    #[test]
    fn binding_errors_follow_python_wording() {
        let f = subtract();
        let mut vm = Vm::new();
        let cases = [
            (vec![], vec![], "f() missing 1 required positional argument: 'a'"),
            (
                vec![Value::Int(1), Value::Int(2), Value::Int(3)],
                vec![],
                "f() takes from 1 to 2 positional arguments but 3 were given",
            ),
            (
                vec![Value::Int(1)],
                vec![("a".to_string(), Value::Int(1))],
                "f() got multiple values for argument 'a'",
            ),
            (
                vec![Value::Int(1)],
                vec![("z".to_string(), Value::Int(1))],
                "f() got an unexpected keyword argument 'z'",
            ),
        ];
        for (args, kwargs, message) in cases {
            let err = vm.call_function(&f, args, kwargs).expect_err("binding");
            assert_eq!(err.kind_name(), "TypeError");
            assert_eq!(err.fault.text(), message);
        }
    }

    #[test]
    fn collects_extra_positional_arguments() {
        let mut asm = Assembler::new("pack", "<string>", 1);
        asm.set_flags(CO_OPTIMIZED | CO_NEWLOCALS | CO_VARARGS);
        asm.set_parameters(0, 0);
        let rest = asm.add_varname("rest");
        asm.emit_arg(Opcode::LoadFast, rest);
        asm.emit(Opcode::ReturnValue);
        let f = function(asm, Vec::new());
        let value = Vm::new()
            .call_function(&f, vec![Value::Int(1), Value::Int(2)], Vec::new())
            .expect("call");
        assert_eq!(value.repr(), "(1, 2)");
    }

    #[test]
    fn faults_carry_a_traceback_and_unwind_frames() {
        let mut asm = Assembler::new("lookup", "names.py", 4);
        asm.set_flags(CO_OPTIMIZED | CO_NEWLOCALS);
        asm.set_line(6);
        let missing = asm.add_name("undefined_thing");
        asm.emit_arg(Opcode::LoadGlobal, missing);
        asm.emit(Opcode::ReturnValue);
        let f = function(asm, Vec::new());
        let mut vm = Vm::new();
        let err = vm.call_function(&f, Vec::new(), Vec::new()).expect_err("name error");
        assert_eq!(err.to_string(), "NameError: name 'undefined_thing' is not defined");
        assert_eq!(
            err.fault.traceback(),
            vec![TraceFrame {
                filename: "names.py".to_string(),
                name: "lookup".to_string(),
                line: 6,
            }]
        );
        assert_eq!(vm.depth(), 0);
    }

    #[test]
    fn recursion_is_bounded() {
        // def loop(): return loop()
        let mut asm = Assembler::new("loop", "<string>", 1);
        asm.set_flags(CO_OPTIMIZED | CO_NEWLOCALS);
        let name = asm.add_name("loop");
        asm.emit_arg(Opcode::LoadGlobal, name);
        asm.emit_arg(Opcode::CallFunction, 0);
        asm.emit(Opcode::ReturnValue);
        let f = function(asm, Vec::new());
        f.globals.set_global("loop", Value::Function(Rc::clone(&f)));
        let mut vm = Vm::with_max_depth(50);
        let err = vm.call_function(&f, Vec::new(), Vec::new()).expect_err("recursion");
        assert_eq!(err.kind_name(), "RecursionError");
        assert_eq!(err.fault.traceback().len(), 50);
        f.globals.delete_global("loop");
    }

    #[test]
    fn quoted_lists() {
        assert_eq!(quoted_list(&["a"]), "'a'");
        assert_eq!(quoted_list(&["a", "b"]), "'a' and 'b'");
        assert_eq!(quoted_list(&["a", "b", "c"]), "'a', 'b', and 'c'");
    }
}
