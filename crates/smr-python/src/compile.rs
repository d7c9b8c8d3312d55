//! Lowering of function bodies to wordcode.
//!
//! Emission follows the patterns of the 3.8 reference compiler so the
//! produced descriptors look like serialized functions: constant 0 is the
//! docstring or `None`, locals are numbered in order of first use after
//! the parameters, and loops need no block setup.

use bytes::Bytes;
use itertools::Itertools;
use rustpython_parser::ast::{self as py_ast, Ranged};
use rustpython_parser::text_size::TextRange;
use smr_code::opcode::{
    CO_NESTED, CO_NEWLOCALS, CO_NOFREE, CO_OPTIMIZED, CO_VARARGS, CO_VARKEYWORDS, FVC_ASCII,
    FVC_NONE, FVC_REPR, FVC_STR, FVS_HAVE_SPEC, MAKE_FUNCTION_CLOSURE, MAKE_FUNCTION_DEFAULTS,
    MAKE_FUNCTION_KWDEFAULTS,
};
use smr_code::{Assembler, CodeDescriptor, CompareOp, Constant, Label, Opcode};

use crate::lines::LineIndex;
use crate::scope::{NameScope, ScopeTable};
use crate::{
    CompileError, PyArguments, PyBoolOp, PyCmpOp, PyConstant, PyExpr, PyOperator, PyStmt,
    PyUnaryOp,
};

type PyFunctionDef = py_ast::StmtFunctionDef<TextRange>;
type PyLambda = py_ast::ExprLambda<TextRange>;

#[derive(Debug, Clone, Copy)]
struct LoopLabels {
    continue_to: Label,
    break_to: Label,
    /// `for` loops keep their iterator on the stack.
    holds_iterator: bool,
}

pub(crate) fn compile_top_level(
    def: &PyFunctionDef,
    filename: &str,
    lines: &LineIndex,
) -> Result<CodeDescriptor, CompileError> {
    let line = lines.line_of(def.range);
    if !def.decorator_list.is_empty() {
        return Err(CompileError::unsupported(line, "decorators"));
    }
    if def.args.kwonlyargs.iter().any(|arg| arg.default.is_some()) {
        return Err(CompileError::unsupported(
            line,
            "keyword-only defaults on the compiled function",
        ));
    }
    let defaults = def
        .args
        .args
        .iter()
        .filter_map(|arg| arg.default.as_deref())
        .map(|expr| {
            literal_constant(expr).ok_or_else(|| {
                CompileError::unsupported(
                    lines.line_of(expr.range()),
                    "non-literal defaults on the compiled function",
                )
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let scope = ScopeTable::analyze(&def.args, &def.body, line, lines)?;
    let mut compiler = FunctionCompiler::new(
        &def.args,
        &scope,
        lines,
        filename,
        def.name.as_str().to_string(),
        line,
        false,
    )?;
    compiler.asm.set_defaults(defaults);
    compiler.compile_def_body(&def.body)
}

struct FunctionCompiler<'a> {
    asm: Assembler,
    scope: &'a ScopeTable,
    lines: &'a LineIndex,
    filename: &'a str,
    qualified_name: String,
    loops: Vec<LoopLabels>,
    line: u32,
}

impl<'a> FunctionCompiler<'a> {
    fn new(
        args: &PyArguments,
        scope: &'a ScopeTable,
        lines: &'a LineIndex,
        filename: &'a str,
        qualified_name: String,
        first_line: u32,
        nested: bool,
    ) -> Result<Self, CompileError> {
        if !args.posonlyargs.is_empty() {
            return Err(CompileError::unsupported(
                first_line,
                "positional-only parameters",
            ));
        }
        let mut params: Vec<&str> = args
            .args
            .iter()
            .chain(&args.kwonlyargs)
            .map(|arg| arg.def.arg.as_str())
            .collect();
        params.extend(args.vararg.iter().map(|arg| arg.arg.as_str()));
        params.extend(args.kwarg.iter().map(|arg| arg.arg.as_str()));
        if let Some(duplicate) = params.iter().duplicates().next() {
            return Err(CompileError::syntax(
                first_line,
                format!("duplicate argument '{}' in function definition", duplicate),
            ));
        }

        let mut asm = Assembler::new(qualified_name.clone(), filename, first_line);
        asm.set_parameters(args.args.len() as u32, args.kwonlyargs.len() as u32);
        for param in &params {
            asm.add_varname(param);
        }
        let mut flags = CO_OPTIMIZED | CO_NEWLOCALS;
        if args.vararg.is_some() {
            flags |= CO_VARARGS;
        }
        if args.kwarg.is_some() {
            flags |= CO_VARKEYWORDS;
        }
        if nested {
            flags |= CO_NESTED;
        }
        if scope.is_free_of_cells() {
            flags |= CO_NOFREE;
        }
        asm.set_flags(flags);
        for name in scope.cellvars() {
            asm.add_cellvar(name);
        }
        for name in scope.freevars() {
            asm.add_freevar(name);
        }

        Ok(Self {
            asm,
            scope,
            lines,
            filename,
            qualified_name,
            loops: Vec::new(),
            line: first_line,
        })
    }

    fn compile_def_body(mut self, body: &[PyStmt]) -> Result<CodeDescriptor, CompileError> {
        let body = match docstring(body) {
            Some(doc) => {
                self.asm.add_const(doc);
                &body[1..]
            }
            None => {
                self.asm.add_const(Constant::None);
                body
            }
        };
        self.compile_body(body)?;
        if !self.asm.ends_terminal() {
            self.load_const(Constant::None);
            self.asm.emit(Opcode::ReturnValue);
        }
        Ok(self.asm.finish()?)
    }

    fn unsupported(&self, message: impl Into<String>) -> CompileError {
        CompileError::unsupported(self.line, message)
    }

    fn syntax(&self, message: impl Into<String>) -> CompileError {
        CompileError::syntax(self.line, message)
    }

    fn load_const(&mut self, constant: impl Into<Constant>) {
        let index = self.asm.add_const(constant);
        self.asm.emit_arg(Opcode::LoadConst, index);
    }

    fn deref_slot(&self, name: &str) -> Result<u32, CompileError> {
        self.asm
            .deref_index(name)
            .ok_or_else(|| self.syntax(format!("closure variable '{}' has no cell", name)))
    }

    fn load_name(&mut self, name: &str) -> Result<(), CompileError> {
        match self.scope.resolve(name) {
            NameScope::Fast => {
                let slot = self.asm.add_varname(name);
                self.asm.emit_arg(Opcode::LoadFast, slot);
            }
            NameScope::Deref => {
                let slot = self.deref_slot(name)?;
                self.asm.emit_arg(Opcode::LoadDeref, slot);
            }
            NameScope::Global => {
                let index = self.asm.add_name(name);
                self.asm.emit_arg(Opcode::LoadGlobal, index);
            }
        }
        Ok(())
    }

    fn store_name(&mut self, name: &str) -> Result<(), CompileError> {
        match self.scope.resolve(name) {
            NameScope::Fast => {
                let slot = self.asm.add_varname(name);
                self.asm.emit_arg(Opcode::StoreFast, slot);
            }
            NameScope::Deref => {
                let slot = self.deref_slot(name)?;
                self.asm.emit_arg(Opcode::StoreDeref, slot);
            }
            NameScope::Global => {
                let index = self.asm.add_name(name);
                self.asm.emit_arg(Opcode::StoreGlobal, index);
            }
        }
        Ok(())
    }

    fn delete_name(&mut self, name: &str) -> Result<(), CompileError> {
        match self.scope.resolve(name) {
            NameScope::Fast => {
                let slot = self.asm.add_varname(name);
                self.asm.emit_arg(Opcode::DeleteFast, slot);
            }
            NameScope::Global => {
                let index = self.asm.add_name(name);
                self.asm.emit_arg(Opcode::DeleteGlobal, index);
            }
            NameScope::Deref => return Err(self.unsupported("deleting closure variables")),
        }
        Ok(())
    }

    fn compile_body(&mut self, body: &[PyStmt]) -> Result<(), CompileError> {
        for stmt in body {
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    fn compile_stmt(&mut self, stmt: &PyStmt) -> Result<(), CompileError> {
        self.line = self.lines.line_of(stmt.range());
        self.asm.set_line(self.line);
        match stmt {
            PyStmt::FunctionDef(def) => self.compile_nested_def(def),
            PyStmt::Return(ret) => {
                match &ret.value {
                    Some(value) => self.compile_expr(value)?,
                    None => self.load_const(Constant::None),
                }
                self.asm.emit(Opcode::ReturnValue);
                Ok(())
            }
            PyStmt::Delete(delete) => delete
                .targets
                .iter()
                .try_for_each(|target| self.compile_delete(target)),
            PyStmt::Assign(assign) => {
                self.compile_expr(&assign.value)?;
                let last = assign.targets.len().saturating_sub(1);
                for (index, target) in assign.targets.iter().enumerate() {
                    if index < last {
                        self.asm.emit(Opcode::DupTop);
                    }
                    self.compile_store(target)?;
                }
                Ok(())
            }
            PyStmt::AugAssign(assign) => {
                self.compile_aug_assign(&assign.target, &assign.op, &assign.value)
            }
            PyStmt::AnnAssign(assign) => {
                if let Some(value) = &assign.value {
                    self.compile_expr(value)?;
                    self.compile_store(&assign.target)?;
                }
                Ok(())
            }
            PyStmt::For(stmt_for) => {
                self.compile_for(&stmt_for.target, &stmt_for.iter, &stmt_for.body, &stmt_for.orelse)
            }
            PyStmt::While(stmt_while) => {
                self.compile_while(&stmt_while.test, &stmt_while.body, &stmt_while.orelse)
            }
            PyStmt::If(stmt_if) => self.compile_if(&stmt_if.test, &stmt_if.body, &stmt_if.orelse),
            PyStmt::Raise(raise) => {
                let count = match (&raise.exc, &raise.cause) {
                    (None, None) => 0,
                    (Some(exc), None) => {
                        self.compile_expr(exc)?;
                        1
                    }
                    (Some(exc), Some(cause)) => {
                        self.compile_expr(exc)?;
                        self.compile_expr(cause)?;
                        2
                    }
                    (None, Some(_)) => {
                        return Err(self.syntax("a bare raise cannot have a cause"))
                    }
                };
                self.asm.emit_arg(Opcode::RaiseVarargs, count);
                Ok(())
            }
            PyStmt::Assert(assert) => {
                let passed = self.asm.new_label();
                self.jump_if(&assert.test, true, passed)?;
                let class = self.asm.add_name("AssertionError");
                self.asm.emit_arg(Opcode::LoadGlobal, class);
                if let Some(msg) = &assert.msg {
                    self.compile_expr(msg)?;
                    self.asm.emit_arg(Opcode::CallFunction, 1);
                }
                self.asm.emit_arg(Opcode::RaiseVarargs, 1);
                self.asm.bind(passed);
                Ok(())
            }
            PyStmt::Expr(stmt_expr) => {
                if matches!(stmt_expr.value.as_ref(), PyExpr::Constant(_)) {
                    return Ok(());
                }
                self.compile_expr(&stmt_expr.value)?;
                self.asm.emit(Opcode::PopTop);
                Ok(())
            }
            PyStmt::Pass(_) | PyStmt::Global(_) | PyStmt::Nonlocal(_) => Ok(()),
            PyStmt::Break(_) => {
                let labels = *self
                    .loops
                    .last()
                    .ok_or_else(|| self.syntax("'break' outside loop"))?;
                if labels.holds_iterator {
                    self.asm.emit(Opcode::PopTop);
                }
                self.asm.emit_jump(Opcode::JumpAbsolute, labels.break_to);
                Ok(())
            }
            PyStmt::Continue(_) => {
                let labels = *self
                    .loops
                    .last()
                    .ok_or_else(|| self.syntax("'continue' not properly in loop"))?;
                self.asm.emit_jump(Opcode::JumpAbsolute, labels.continue_to);
                Ok(())
            }
            PyStmt::AsyncFunctionDef(_) => Err(self.unsupported("async functions")),
            PyStmt::ClassDef(_) => Err(self.unsupported("class definitions")),
            PyStmt::With(_) | PyStmt::AsyncWith(_) => Err(self.unsupported("with statements")),
            PyStmt::Try(_) => Err(self.unsupported("try statements")),
            PyStmt::Import(_) | PyStmt::ImportFrom(_) => {
                Err(self.unsupported("import statements"))
            }
            PyStmt::AsyncFor(_) => Err(self.unsupported("async for loops")),
            PyStmt::Match(_) => Err(self.unsupported("match statements")),
            _ => Err(self.unsupported("this statement")),
        }
    }

    fn compile_store(&mut self, target: &PyExpr) -> Result<(), CompileError> {
        match target {
            PyExpr::Name(name) => self.store_name(name.id.as_str()),
            PyExpr::Tuple(tuple) => self.compile_unpack(&tuple.elts),
            PyExpr::List(list) => self.compile_unpack(&list.elts),
            PyExpr::Subscript(subscript) => {
                self.compile_expr(&subscript.value)?;
                self.compile_expr(&subscript.slice)?;
                self.asm.emit(Opcode::StoreSubscr);
                Ok(())
            }
            PyExpr::Attribute(_) => Err(self.unsupported("attribute assignment")),
            PyExpr::Starred(_) => Err(self.unsupported("starred assignment targets")),
            _ => Err(self.syntax("cannot assign to expression")),
        }
    }

    fn compile_unpack(&mut self, targets: &[PyExpr]) -> Result<(), CompileError> {
        if targets.iter().any(|target| matches!(target, PyExpr::Starred(_))) {
            return Err(self.unsupported("starred assignment targets"));
        }
        self.asm
            .emit_arg(Opcode::UnpackSequence, targets.len() as u32);
        targets
            .iter()
            .try_for_each(|target| self.compile_store(target))
    }

    fn compile_delete(&mut self, target: &PyExpr) -> Result<(), CompileError> {
        match target {
            PyExpr::Name(name) => self.delete_name(name.id.as_str()),
            PyExpr::Subscript(subscript) => {
                self.compile_expr(&subscript.value)?;
                self.compile_expr(&subscript.slice)?;
                self.asm.emit(Opcode::DeleteSubscr);
                Ok(())
            }
            PyExpr::Tuple(tuple) => tuple
                .elts
                .iter()
                .try_for_each(|target| self.compile_delete(target)),
            PyExpr::List(list) => list
                .elts
                .iter()
                .try_for_each(|target| self.compile_delete(target)),
            PyExpr::Attribute(_) => Err(self.unsupported("attribute deletion")),
            _ => Err(self.syntax("cannot delete expression")),
        }
    }

    fn compile_aug_assign(
        &mut self,
        target: &PyExpr,
        op: &PyOperator,
        value: &PyExpr,
    ) -> Result<(), CompileError> {
        let opcode =
            binary_opcode(op, true).ok_or_else(|| self.unsupported("matrix multiplication"))?;
        match target {
            PyExpr::Name(name) => {
                self.load_name(name.id.as_str())?;
                self.compile_expr(value)?;
                self.asm.emit(opcode);
                self.store_name(name.id.as_str())
            }
            PyExpr::Subscript(subscript) => {
                self.compile_expr(&subscript.value)?;
                self.compile_expr(&subscript.slice)?;
                self.asm.emit(Opcode::DupTopTwo);
                self.asm.emit(Opcode::BinarySubscr);
                self.compile_expr(value)?;
                self.asm.emit(opcode);
                self.asm.emit(Opcode::RotThree);
                self.asm.emit(Opcode::StoreSubscr);
                Ok(())
            }
            PyExpr::Attribute(_) => Err(self.unsupported("attribute assignment")),
            _ => Err(self.syntax("illegal expression for augmented assignment")),
        }
    }

    fn compile_if(
        &mut self,
        test: &PyExpr,
        body: &[PyStmt],
        orelse: &[PyStmt],
    ) -> Result<(), CompileError> {
        let otherwise = self.asm.new_label();
        self.jump_if(test, false, otherwise)?;
        self.compile_body(body)?;
        if orelse.is_empty() {
            self.asm.bind(otherwise);
            return Ok(());
        }
        let end = self.asm.new_label();
        if !self.asm.ends_terminal() {
            self.asm.emit_jump(Opcode::JumpForward, end);
        }
        self.asm.bind(otherwise);
        self.compile_body(orelse)?;
        self.asm.bind(end);
        Ok(())
    }

    fn compile_while(
        &mut self,
        test: &PyExpr,
        body: &[PyStmt],
        orelse: &[PyStmt],
    ) -> Result<(), CompileError> {
        let top = self.asm.new_label();
        let exhausted = self.asm.new_label();
        let end = self.asm.new_label();
        self.asm.bind(top);
        self.jump_if(test, false, exhausted)?;
        self.compile_loop_body(
            LoopLabels {
                continue_to: top,
                break_to: end,
                holds_iterator: false,
            },
            body,
        )?;
        self.asm.emit_jump(Opcode::JumpAbsolute, top);
        self.asm.bind(exhausted);
        self.compile_body(orelse)?;
        self.asm.bind(end);
        Ok(())
    }

    fn compile_for(
        &mut self,
        target: &PyExpr,
        iter: &PyExpr,
        body: &[PyStmt],
        orelse: &[PyStmt],
    ) -> Result<(), CompileError> {
        self.compile_expr(iter)?;
        self.asm.emit(Opcode::GetIter);
        let top = self.asm.new_label();
        let exhausted = self.asm.new_label();
        let end = self.asm.new_label();
        self.asm.bind(top);
        self.asm.emit_jump(Opcode::ForIter, exhausted);
        self.compile_store(target)?;
        self.compile_loop_body(
            LoopLabels {
                continue_to: top,
                break_to: end,
                holds_iterator: true,
            },
            body,
        )?;
        self.asm.emit_jump(Opcode::JumpAbsolute, top);
        self.asm.bind(exhausted);
        self.compile_body(orelse)?;
        self.asm.bind(end);
        Ok(())
    }

    fn compile_loop_body(&mut self, labels: LoopLabels, body: &[PyStmt]) -> Result<(), CompileError> {
        self.loops.push(labels);
        let result = self.compile_body(body);
        self.loops.pop();
        result
    }

    /// Emits a jump to `target` taken when `expr` is truthy (`jump_when`)
    /// or falsy, short-circuiting `not`, `and` and `or` without
    /// materializing intermediate values.
    fn jump_if(&mut self, expr: &PyExpr, jump_when: bool, target: Label) -> Result<(), CompileError> {
        if let Some(constant) = literal_constant(expr) {
            if constant_truthiness(&constant) == jump_when {
                self.asm.emit_jump(Opcode::JumpAbsolute, target);
            }
            return Ok(());
        }
        match expr {
            PyExpr::UnaryOp(unary) if matches!(unary.op, PyUnaryOp::Not) => {
                self.jump_if(&unary.operand, !jump_when, target)
            }
            PyExpr::BoolOp(bool_op) => {
                let Some((last, rest)) = bool_op.values.split_last() else {
                    return Err(self.syntax("empty boolean operation"));
                };
                let is_or = matches!(bool_op.op, PyBoolOp::Or);
                if is_or == jump_when {
                    for value in rest {
                        self.jump_if(value, jump_when, target)?;
                    }
                    self.jump_if(last, jump_when, target)
                } else {
                    let decided = self.asm.new_label();
                    for value in rest {
                        self.jump_if(value, !jump_when, decided)?;
                    }
                    self.jump_if(last, jump_when, target)?;
                    self.asm.bind(decided);
                    Ok(())
                }
            }
            _ => {
                self.compile_expr(expr)?;
                let opcode = if jump_when {
                    Opcode::PopJumpIfTrue
                } else {
                    Opcode::PopJumpIfFalse
                };
                self.asm.emit_jump(opcode, target);
                Ok(())
            }
        }
    }

    fn compile_expr(&mut self, expr: &PyExpr) -> Result<(), CompileError> {
        if let Some(constant) = literal_constant(expr) {
            self.load_const(constant);
            return Ok(());
        }
        match expr {
            PyExpr::Constant(constant) => {
                let value = constant_value(&constant.value).map_err(|what| self.unsupported(what))?;
                self.load_const(value);
            }
            PyExpr::Name(name) => self.load_name(name.id.as_str())?,
            PyExpr::BinOp(bin) => {
                let opcode = binary_opcode(&bin.op, false)
                    .ok_or_else(|| self.unsupported("matrix multiplication"))?;
                self.compile_expr(&bin.left)?;
                self.compile_expr(&bin.right)?;
                self.asm.emit(opcode);
            }
            PyExpr::UnaryOp(unary) => {
                self.compile_expr(&unary.operand)?;
                self.asm.emit(match unary.op {
                    PyUnaryOp::Invert => Opcode::UnaryInvert,
                    PyUnaryOp::Not => Opcode::UnaryNot,
                    PyUnaryOp::UAdd => Opcode::UnaryPositive,
                    PyUnaryOp::USub => Opcode::UnaryNegative,
                });
            }
            PyExpr::BoolOp(bool_op) => {
                let Some((last, rest)) = bool_op.values.split_last() else {
                    return Err(self.syntax("empty boolean operation"));
                };
                let opcode = match bool_op.op {
                    PyBoolOp::And => Opcode::JumpIfFalseOrPop,
                    PyBoolOp::Or => Opcode::JumpIfTrueOrPop,
                };
                let end = self.asm.new_label();
                for value in rest {
                    self.compile_expr(value)?;
                    self.asm.emit_jump(opcode, end);
                }
                self.compile_expr(last)?;
                self.asm.bind(end);
            }
            PyExpr::Compare(compare) => {
                self.compile_compare(&compare.left, &compare.ops, &compare.comparators)?
            }
            PyExpr::IfExp(ifexp) => {
                let otherwise = self.asm.new_label();
                let end = self.asm.new_label();
                self.jump_if(&ifexp.test, false, otherwise)?;
                self.compile_expr(&ifexp.body)?;
                self.asm.emit_jump(Opcode::JumpForward, end);
                self.asm.bind(otherwise);
                self.compile_expr(&ifexp.orelse)?;
                self.asm.bind(end);
            }
            PyExpr::Call(call) => self.compile_call(&call.func, &call.args, &call.keywords)?,
            PyExpr::Attribute(attr) => {
                self.compile_expr(&attr.value)?;
                let index = self.asm.add_name(attr.attr.as_str());
                self.asm.emit_arg(Opcode::LoadAttr, index);
            }
            PyExpr::Subscript(subscript) => {
                self.compile_expr(&subscript.value)?;
                self.compile_expr(&subscript.slice)?;
                self.asm.emit(Opcode::BinarySubscr);
            }
            PyExpr::Slice(slice) => {
                for bound in [&slice.lower, &slice.upper] {
                    match bound {
                        Some(bound) => self.compile_expr(bound)?,
                        None => self.load_const(Constant::None),
                    }
                }
                match &slice.step {
                    Some(step) => {
                        self.compile_expr(step)?;
                        self.asm.emit_arg(Opcode::BuildSlice, 3);
                    }
                    None => self.asm.emit_arg(Opcode::BuildSlice, 2),
                }
            }
            PyExpr::Tuple(tuple) => self.compile_sequence(&tuple.elts, Opcode::BuildTuple)?,
            PyExpr::List(list) => self.compile_sequence(&list.elts, Opcode::BuildList)?,
            PyExpr::Dict(dict) => self.compile_dict(&dict.keys, &dict.values)?,
            PyExpr::JoinedStr(joined) => match joined.values.as_slice() {
                [] => self.load_const(""),
                [single] => self.compile_expr(single)?,
                parts => {
                    for part in parts {
                        self.compile_expr(part)?;
                    }
                    self.asm.emit_arg(Opcode::BuildString, parts.len() as u32);
                }
            },
            PyExpr::FormattedValue(formatted) => {
                self.compile_expr(&formatted.value)?;
                let mut flags = match formatted.conversion {
                    py_ast::ConversionFlag::None => FVC_NONE,
                    py_ast::ConversionFlag::Str => FVC_STR,
                    py_ast::ConversionFlag::Repr => FVC_REPR,
                    py_ast::ConversionFlag::Ascii => FVC_ASCII,
                };
                if let Some(spec) = &formatted.format_spec {
                    self.compile_expr(spec)?;
                    flags |= FVS_HAVE_SPEC;
                }
                self.asm.emit_arg(Opcode::FormatValue, flags);
            }
            PyExpr::Lambda(lambda) => self.compile_lambda(lambda)?,
            PyExpr::ListComp(_)
            | PyExpr::SetComp(_)
            | PyExpr::DictComp(_)
            | PyExpr::GeneratorExp(_) => return Err(self.unsupported("comprehensions")),
            PyExpr::Yield(_) | PyExpr::YieldFrom(_) => {
                return Err(self.unsupported("generator functions"))
            }
            PyExpr::Await(_) => return Err(self.unsupported("await expressions")),
            PyExpr::Set(_) => return Err(self.unsupported("set displays")),
            PyExpr::NamedExpr(_) => return Err(self.unsupported("assignment expressions")),
            PyExpr::Starred(_) => return Err(self.unsupported("starred expressions")),
        }
        Ok(())
    }

    fn compile_sequence(&mut self, elts: &[PyExpr], build: Opcode) -> Result<(), CompileError> {
        if elts.iter().any(|elt| matches!(elt, PyExpr::Starred(_))) {
            return Err(self.unsupported("starred expressions"));
        }
        for elt in elts {
            self.compile_expr(elt)?;
        }
        self.asm.emit_arg(build, elts.len() as u32);
        Ok(())
    }

    fn compile_dict(&mut self, keys: &[Option<PyExpr>], values: &[PyExpr]) -> Result<(), CompileError> {
        let keys = keys
            .iter()
            .map(|key| {
                key.as_ref()
                    .ok_or_else(|| self.unsupported("dictionary unpacking"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let constant_keys: Option<Vec<Constant>> =
            keys.iter().map(|key| literal_constant(key)).collect();
        match constant_keys {
            Some(constant_keys) if keys.len() > 1 => {
                for value in values {
                    self.compile_expr(value)?;
                }
                self.load_const(Constant::Tuple(constant_keys));
                self.asm
                    .emit_arg(Opcode::BuildConstKeyMap, values.len() as u32);
            }
            _ => {
                for (key, value) in keys.iter().zip(values) {
                    self.compile_expr(key)?;
                    self.compile_expr(value)?;
                }
                self.asm.emit_arg(Opcode::BuildMap, values.len() as u32);
            }
        }
        Ok(())
    }

    fn compile_compare(
        &mut self,
        left: &PyExpr,
        ops: &[PyCmpOp],
        comparators: &[PyExpr],
    ) -> Result<(), CompileError> {
        let pairs: Vec<(CompareOp, &PyExpr)> = ops
            .iter()
            .map(compare_op)
            .zip(comparators)
            .collect();
        let Some(((last_op, last), chained)) = pairs.split_last() else {
            return Err(self.syntax("comparison without operands"));
        };
        self.compile_expr(left)?;
        if chained.is_empty() {
            self.compile_expr(last)?;
            self.asm.emit_arg(Opcode::CompareOp, *last_op as u32);
            return Ok(());
        }
        let cleanup = self.asm.new_label();
        let end = self.asm.new_label();
        for (op, comparator) in chained {
            self.compile_expr(comparator)?;
            self.asm.emit(Opcode::DupTop);
            self.asm.emit(Opcode::RotThree);
            self.asm.emit_arg(Opcode::CompareOp, *op as u32);
            self.asm.emit_jump(Opcode::JumpIfFalseOrPop, cleanup);
        }
        self.compile_expr(last)?;
        self.asm.emit_arg(Opcode::CompareOp, *last_op as u32);
        self.asm.emit_jump(Opcode::JumpForward, end);
        self.asm.bind(cleanup);
        self.asm.emit(Opcode::RotTwo);
        self.asm.emit(Opcode::PopTop);
        self.asm.bind(end);
        Ok(())
    }

    fn compile_call(
        &mut self,
        func: &PyExpr,
        args: &[PyExpr],
        keywords: &[py_ast::Keyword<TextRange>],
    ) -> Result<(), CompileError> {
        if args.iter().any(|arg| matches!(arg, PyExpr::Starred(_))) {
            return Err(self.unsupported("starred call arguments"));
        }
        let names = keywords
            .iter()
            .map(|keyword| {
                keyword
                    .arg
                    .as_ref()
                    .map(|name| Constant::Str(name.as_str().to_string()))
                    .ok_or_else(|| self.unsupported("keyword argument unpacking"))
            })
            .collect::<Result<Vec<_>, _>>()?;

        match func {
            PyExpr::Attribute(attr) if names.is_empty() => {
                self.compile_expr(&attr.value)?;
                let index = self.asm.add_name(attr.attr.as_str());
                self.asm.emit_arg(Opcode::LoadMethod, index);
                for arg in args {
                    self.compile_expr(arg)?;
                }
                self.asm.emit_arg(Opcode::CallMethod, args.len() as u32);
            }
            _ => {
                self.compile_expr(func)?;
                for arg in args {
                    self.compile_expr(arg)?;
                }
                if names.is_empty() {
                    self.asm.emit_arg(Opcode::CallFunction, args.len() as u32);
                } else {
                    for keyword in keywords {
                        self.compile_expr(&keyword.value)?;
                    }
                    let count = (args.len() + names.len()) as u32;
                    self.load_const(Constant::Tuple(names));
                    self.asm.emit_arg(Opcode::CallFunctionKw, count);
                }
            }
        }
        Ok(())
    }

    fn child_scope(&self, range: TextRange) -> Result<&'a ScopeTable, CompileError> {
        let scope: &'a ScopeTable = self.scope;
        scope
            .child(u32::from(range.start()))
            .ok_or_else(|| self.syntax("nested scope was not analyzed"))
    }

    /// Pushes the positional default tuple and keyword-only default map,
    /// returning the matching `MAKE_FUNCTION` flags.
    fn compile_defaults(&mut self, args: &PyArguments) -> Result<u32, CompileError> {
        let mut flags = 0;
        let defaults: Vec<&PyExpr> = args
            .args
            .iter()
            .filter_map(|arg| arg.default.as_deref())
            .collect();
        if !defaults.is_empty() {
            for default in &defaults {
                self.compile_expr(default)?;
            }
            self.asm.emit_arg(Opcode::BuildTuple, defaults.len() as u32);
            flags |= MAKE_FUNCTION_DEFAULTS;
        }
        let kw_defaults: Vec<(&str, &PyExpr)> = args
            .kwonlyargs
            .iter()
            .filter_map(|arg| arg.default.as_deref().map(|value| (arg.def.arg.as_str(), value)))
            .collect();
        if !kw_defaults.is_empty() {
            for (_, value) in &kw_defaults {
                self.compile_expr(value)?;
            }
            let names = kw_defaults
                .iter()
                .map(|(name, _)| Constant::from(*name))
                .collect();
            self.load_const(Constant::Tuple(names));
            self.asm
                .emit_arg(Opcode::BuildConstKeyMap, kw_defaults.len() as u32);
            flags |= MAKE_FUNCTION_KWDEFAULTS;
        }
        Ok(flags)
    }

    fn make_function(
        &mut self,
        code: CodeDescriptor,
        scope: &ScopeTable,
        qualified_name: &str,
        mut flags: u32,
    ) -> Result<(), CompileError> {
        if scope.has_closure() {
            let mut count = 0;
            for name in scope.freevars() {
                let slot = self.deref_slot(name)?;
                self.asm.emit_arg(Opcode::LoadClosure, slot);
                count += 1;
            }
            self.asm.emit_arg(Opcode::BuildTuple, count);
            flags |= MAKE_FUNCTION_CLOSURE;
        }
        self.load_const(code);
        self.load_const(qualified_name);
        self.asm.emit_arg(Opcode::MakeFunction, flags);
        Ok(())
    }

    fn compile_nested_def(&mut self, def: &PyFunctionDef) -> Result<(), CompileError> {
        if !def.decorator_list.is_empty() {
            return Err(self.unsupported("decorators"));
        }
        let flags = self.compile_defaults(&def.args)?;
        let scope = self.child_scope(def.range)?;
        let qualified_name = format!("{}.<locals>.{}", self.qualified_name, def.name.as_str());
        let code = FunctionCompiler::new(
            &def.args,
            scope,
            self.lines,
            self.filename,
            qualified_name.clone(),
            self.line,
            true,
        )?
        .compile_def_body(&def.body)?;
        self.make_function(code, scope, &qualified_name, flags)?;
        self.store_name(def.name.as_str())
    }

    fn compile_lambda(&mut self, lambda: &PyLambda) -> Result<(), CompileError> {
        let flags = self.compile_defaults(&lambda.args)?;
        let scope = self.child_scope(lambda.range)?;
        let qualified_name = format!("{}.<locals>.<lambda>", self.qualified_name);
        let mut compiler = FunctionCompiler::new(
            &lambda.args,
            scope,
            self.lines,
            self.filename,
            qualified_name.clone(),
            self.lines.line_of(lambda.range),
            true,
        )?;
        compiler.asm.add_const(Constant::None);
        compiler.compile_expr(&lambda.body)?;
        compiler.asm.emit(Opcode::ReturnValue);
        let code = compiler.asm.finish()?;
        self.make_function(code, scope, &qualified_name, flags)
    }
}

fn docstring(body: &[PyStmt]) -> Option<&str> {
    let PyStmt::Expr(stmt_expr) = body.first()? else {
        return None;
    };
    match stmt_expr.value.as_ref() {
        PyExpr::Constant(constant) => match &constant.value {
            PyConstant::Str(text) => Some(text.as_str()),
            _ => None,
        },
        _ => None,
    }
}

fn constant_value(constant: &PyConstant) -> Result<Constant, &'static str> {
    Ok(match constant {
        PyConstant::None => Constant::None,
        PyConstant::Bool(value) => Constant::Bool(*value),
        PyConstant::Str(value) => Constant::Str(value.clone()),
        PyConstant::Bytes(value) => Constant::Bytes(Bytes::from(value.clone())),
        PyConstant::Int(value) => Constant::Int(
            value
                .to_string()
                .parse::<i64>()
                .map_err(|_| "integers outside the 64-bit range")?,
        ),
        PyConstant::Float(value) => Constant::Float(*value),
        PyConstant::Tuple(items) => Constant::Tuple(
            items
                .iter()
                .map(constant_value)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        PyConstant::Complex { .. } => return Err("complex literals"),
        PyConstant::Ellipsis => return Err("ellipsis literals"),
    })
}

/// Folds literals, signed numbers and tuples of literals.
fn literal_constant(expr: &PyExpr) -> Option<Constant> {
    match expr {
        PyExpr::Constant(constant) => constant_value(&constant.value).ok(),
        PyExpr::UnaryOp(unary) => match (&unary.op, literal_constant(&unary.operand)?) {
            (PyUnaryOp::USub, Constant::Int(value)) => value.checked_neg().map(Constant::Int),
            (PyUnaryOp::USub, Constant::Float(value)) => Some(Constant::Float(-value)),
            (PyUnaryOp::UAdd, number @ (Constant::Int(_) | Constant::Float(_))) => Some(number),
            _ => None,
        },
        PyExpr::Tuple(tuple) => tuple
            .elts
            .iter()
            .map(literal_constant)
            .collect::<Option<Vec<_>>>()
            .map(Constant::Tuple),
        _ => None,
    }
}

fn constant_truthiness(constant: &Constant) -> bool {
    match constant {
        Constant::None => false,
        Constant::Bool(value) => *value,
        Constant::Int(value) => *value != 0,
        Constant::Float(value) => *value != 0.0,
        Constant::Str(value) => !value.is_empty(),
        Constant::Bytes(value) => !value.is_empty(),
        Constant::Tuple(items) | Constant::List(items) => !items.is_empty(),
        Constant::Dict(entries) => !entries.is_empty(),
        Constant::Code(_) => true,
    }
}

fn binary_opcode(op: &PyOperator, inplace: bool) -> Option<Opcode> {
    let (binary, in_place) = match op {
        PyOperator::Add => (Opcode::BinaryAdd, Opcode::InplaceAdd),
        PyOperator::Sub => (Opcode::BinarySubtract, Opcode::InplaceSubtract),
        PyOperator::Mult => (Opcode::BinaryMultiply, Opcode::InplaceMultiply),
        PyOperator::Div => (Opcode::BinaryTrueDivide, Opcode::InplaceTrueDivide),
        PyOperator::FloorDiv => (Opcode::BinaryFloorDivide, Opcode::InplaceFloorDivide),
        PyOperator::Mod => (Opcode::BinaryModulo, Opcode::InplaceModulo),
        PyOperator::Pow => (Opcode::BinaryPower, Opcode::InplacePower),
        PyOperator::LShift => (Opcode::BinaryLshift, Opcode::InplaceLshift),
        PyOperator::RShift => (Opcode::BinaryRshift, Opcode::InplaceRshift),
        PyOperator::BitAnd => (Opcode::BinaryAnd, Opcode::InplaceAnd),
        PyOperator::BitOr => (Opcode::BinaryOr, Opcode::InplaceOr),
        PyOperator::BitXor => (Opcode::BinaryXor, Opcode::InplaceXor),
        PyOperator::MatMult => return None,
    };
    Some(if inplace { in_place } else { binary })
}

fn compare_op(op: &PyCmpOp) -> CompareOp {
    match op {
        PyCmpOp::Eq => CompareOp::Eq,
        PyCmpOp::NotEq => CompareOp::Ne,
        PyCmpOp::Lt => CompareOp::Lt,
        PyCmpOp::LtE => CompareOp::Le,
        PyCmpOp::Gt => CompareOp::Gt,
        PyCmpOp::GtE => CompareOp::Ge,
        PyCmpOp::Is => CompareOp::Is,
        PyCmpOp::IsNot => CompareOp::IsNot,
        PyCmpOp::In => CompareOp::In,
        PyCmpOp::NotIn => CompareOp::NotIn,
    }
}
