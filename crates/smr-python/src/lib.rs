//! Compiles top-level Python function definitions into code descriptors.
//!
//! Parsing is done by `rustpython-parser`; the body is lowered to the
//! wordcode instruction set through `smr_code::Assembler`, producing the
//! same descriptor a serialized function would carry.

mod compile;
pub mod error;
mod lines;
mod scope;

use rustpython_parser::ast as py_ast;
use rustpython_parser::text_size::TextRange;
use rustpython_parser::Parse;
use smr_code::CodeDescriptor;
use tracing::debug;

pub use error::CompileError;

pub(crate) type PyStmt = py_ast::Stmt<TextRange>;
pub(crate) type PyExpr = py_ast::Expr<TextRange>;
pub(crate) type PyArguments = py_ast::Arguments<TextRange>;
pub(crate) type PyConstant = py_ast::Constant;
pub(crate) type PyOperator = py_ast::Operator;
pub(crate) type PyBoolOp = py_ast::BoolOp;
pub(crate) type PyUnaryOp = py_ast::UnaryOp;
pub(crate) type PyCmpOp = py_ast::CmpOp;

fn parse(source: &str, filename: &str) -> Result<py_ast::Suite<TextRange>, CompileError> {
    py_ast::Suite::parse(source, filename).map_err(|err| CompileError::Parse(err.to_string()))
}

/// Compiles the top-level `def name(...)` of `source`. When the name is
/// defined more than once the last definition wins, as it would at import.
pub fn compile_function(
    source: &str,
    filename: &str,
    name: &str,
) -> Result<CodeDescriptor, CompileError> {
    let suite = parse(source, filename)?;
    let lines = lines::LineIndex::new(source);
    let stmt = suite
        .iter()
        .rev()
        .find(|stmt| match stmt {
            PyStmt::FunctionDef(def) => def.name.as_str() == name,
            PyStmt::AsyncFunctionDef(def) => def.name.as_str() == name,
            _ => false,
        })
        .ok_or_else(|| CompileError::FunctionNotFound(name.to_string()))?;
    let def = match stmt {
        PyStmt::AsyncFunctionDef(def) => {
            return Err(CompileError::unsupported(
                lines.line_of(def.range),
                "async functions",
            ))
        }
        PyStmt::FunctionDef(def) => def,
        _ => return Err(CompileError::FunctionNotFound(name.to_string())),
    };
    let code = compile::compile_top_level(def, filename, &lines)?;
    debug!(
        function = name,
        filename,
        constants = code.constants.len(),
        locals = code.local_var_names.len(),
        "compiled python function"
    );
    Ok(code)
}

/// Names of the top-level functions in definition order.
pub fn function_names(source: &str, filename: &str) -> Result<Vec<String>, CompileError> {
    let suite = parse(source, filename)?;
    Ok(suite
        .iter()
        .filter_map(|stmt| match stmt {
            PyStmt::FunctionDef(def) => Some(def.name.as_str().to_string()),
            _ => None,
        })
        .collect())
}
