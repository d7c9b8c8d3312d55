//! Name resolution for function bodies.
//!
//! A first pass collects what every function scope binds, reads and
//! declares; a second pass resolves each name to a fast local, a closure
//! cell or a global, propagating free variables outward so enclosing
//! scopes turn the captured locals into cells.

use std::collections::{BTreeSet, HashMap};

use crate::lines::LineIndex;
use crate::{CompileError, PyArguments, PyExpr, PyStmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameScope {
    Fast,
    Deref,
    Global,
}

/// Resolved names of one function scope and of the scopes nested in it,
/// keyed by the start offset of the nested `def` or `lambda`.
#[derive(Debug, Default)]
pub struct ScopeTable {
    locals: BTreeSet<String>,
    globals: BTreeSet<String>,
    cellvars: BTreeSet<String>,
    freevars: BTreeSet<String>,
    children: HashMap<u32, ScopeTable>,
}

impl ScopeTable {
    pub fn analyze(
        args: &PyArguments,
        body: &[PyStmt],
        first_line: u32,
        lines: &LineIndex,
    ) -> Result<ScopeTable, CompileError> {
        let mut collector = Collector::for_arguments(args, first_line);
        collector.visit_body(body, lines)?;
        collector.resolve(&BTreeSet::new())
    }

    pub fn resolve(&self, name: &str) -> NameScope {
        if self.globals.contains(name) {
            NameScope::Global
        } else if self.cellvars.contains(name) || self.freevars.contains(name) {
            NameScope::Deref
        } else if self.locals.contains(name) {
            NameScope::Fast
        } else {
            NameScope::Global
        }
    }

    /// Sorted by name.
    pub fn cellvars(&self) -> impl Iterator<Item = &str> {
        self.cellvars.iter().map(String::as_str)
    }

    /// Sorted by name.
    pub fn freevars(&self) -> impl Iterator<Item = &str> {
        self.freevars.iter().map(String::as_str)
    }

    pub fn has_closure(&self) -> bool {
        !self.freevars.is_empty()
    }

    pub fn is_free_of_cells(&self) -> bool {
        self.cellvars.is_empty() && self.freevars.is_empty()
    }

    pub fn child(&self, offset: u32) -> Option<&ScopeTable> {
        self.children.get(&offset)
    }
}

#[derive(Debug, Default)]
struct Collector {
    line: u32,
    params: Vec<String>,
    bound: BTreeSet<String>,
    used: BTreeSet<String>,
    globals: BTreeSet<String>,
    nonlocals: BTreeSet<String>,
    children: Vec<(u32, Collector)>,
}

impl Collector {
    fn for_arguments(args: &PyArguments, line: u32) -> Self {
        let mut params: Vec<String> = args
            .posonlyargs
            .iter()
            .chain(&args.args)
            .chain(&args.kwonlyargs)
            .map(|arg| arg.def.arg.as_str().to_string())
            .collect();
        params.extend(args.vararg.iter().map(|arg| arg.arg.as_str().to_string()));
        params.extend(args.kwarg.iter().map(|arg| arg.arg.as_str().to_string()));
        Self {
            line,
            params,
            ..Self::default()
        }
    }

    /// Defaults are evaluated in the scope that defines the function.
    fn visit_defaults(&mut self, args: &PyArguments) {
        let all = args
            .posonlyargs
            .iter()
            .chain(&args.args)
            .chain(&args.kwonlyargs);
        for default in all.filter_map(|arg| arg.default.as_deref()) {
            self.visit_expr(default);
        }
    }

    fn visit_body(&mut self, body: &[PyStmt], lines: &LineIndex) -> Result<(), CompileError> {
        for stmt in body {
            self.visit_stmt(stmt, lines)?;
        }
        Ok(())
    }

    fn visit_stmt(&mut self, stmt: &PyStmt, lines: &LineIndex) -> Result<(), CompileError> {
        match stmt {
            PyStmt::FunctionDef(def) => {
                for decorator in &def.decorator_list {
                    self.visit_expr(decorator);
                }
                self.visit_defaults(&def.args);
                self.bound.insert(def.name.as_str().to_string());
                let mut child = Collector::for_arguments(&def.args, lines.line_of(def.range));
                child.visit_body(&def.body, lines)?;
                self.children.push((u32::from(def.range.start()), child));
            }
            PyStmt::Return(ret) => {
                if let Some(value) = &ret.value {
                    self.visit_expr(value);
                }
            }
            PyStmt::Delete(delete) => {
                for target in &delete.targets {
                    self.visit_target(target);
                }
            }
            PyStmt::Assign(assign) => {
                for target in &assign.targets {
                    self.visit_target(target);
                }
                self.visit_expr(&assign.value);
            }
            PyStmt::AugAssign(assign) => {
                if let PyExpr::Name(name) = assign.target.as_ref() {
                    self.used.insert(name.id.as_str().to_string());
                }
                self.visit_target(&assign.target);
                self.visit_expr(&assign.value);
            }
            PyStmt::AnnAssign(assign) => {
                self.visit_target(&assign.target);
                if let Some(value) = &assign.value {
                    self.visit_expr(value);
                }
            }
            PyStmt::For(stmt_for) => {
                self.visit_target(&stmt_for.target);
                self.visit_expr(&stmt_for.iter);
                self.visit_body(&stmt_for.body, lines)?;
                self.visit_body(&stmt_for.orelse, lines)?;
            }
            PyStmt::While(stmt_while) => {
                self.visit_expr(&stmt_while.test);
                self.visit_body(&stmt_while.body, lines)?;
                self.visit_body(&stmt_while.orelse, lines)?;
            }
            PyStmt::If(stmt_if) => {
                self.visit_expr(&stmt_if.test);
                self.visit_body(&stmt_if.body, lines)?;
                self.visit_body(&stmt_if.orelse, lines)?;
            }
            PyStmt::Raise(raise) => {
                for expr in raise.exc.iter().chain(&raise.cause) {
                    self.visit_expr(expr);
                }
            }
            PyStmt::Assert(assert) => {
                self.visit_expr(&assert.test);
                if let Some(msg) = &assert.msg {
                    self.visit_expr(msg);
                }
            }
            PyStmt::Global(global) => {
                let line = lines.line_of(global.range);
                for name in &global.names {
                    let name = name.as_str().to_string();
                    if self.params.contains(&name) {
                        return Err(CompileError::syntax(
                            line,
                            format!("name '{}' is parameter and global", name),
                        ));
                    }
                    if self.nonlocals.contains(&name) {
                        return Err(CompileError::syntax(
                            line,
                            format!("name '{}' is nonlocal and global", name),
                        ));
                    }
                    self.globals.insert(name);
                }
            }
            PyStmt::Nonlocal(nonlocal) => {
                let line = lines.line_of(nonlocal.range);
                for name in &nonlocal.names {
                    let name = name.as_str().to_string();
                    if self.params.contains(&name) {
                        return Err(CompileError::syntax(
                            line,
                            format!("name '{}' is parameter and nonlocal", name),
                        ));
                    }
                    if self.globals.contains(&name) {
                        return Err(CompileError::syntax(
                            line,
                            format!("name '{}' is nonlocal and global", name),
                        ));
                    }
                    self.nonlocals.insert(name);
                }
            }
            PyStmt::Expr(stmt_expr) => self.visit_expr(&stmt_expr.value),
            // Everything else is either free of names or rejected by codegen.
            _ => {}
        }
        Ok(())
    }

    fn visit_target(&mut self, target: &PyExpr) {
        match target {
            PyExpr::Name(name) => {
                self.bound.insert(name.id.as_str().to_string());
            }
            PyExpr::Tuple(tuple) => tuple.elts.iter().for_each(|elt| self.visit_target(elt)),
            PyExpr::List(list) => list.elts.iter().for_each(|elt| self.visit_target(elt)),
            PyExpr::Starred(starred) => self.visit_target(&starred.value),
            other => self.visit_expr(other),
        }
    }

    fn visit_expr(&mut self, expr: &PyExpr) {
        match expr {
            PyExpr::Name(name) => {
                self.used.insert(name.id.as_str().to_string());
            }
            PyExpr::Lambda(lambda) => {
                self.visit_defaults(&lambda.args);
                let mut child = Collector::for_arguments(&lambda.args, self.line);
                child.visit_expr(&lambda.body);
                self.children
                    .push((u32::from(lambda.range.start()), child));
            }
            PyExpr::NamedExpr(named) => {
                self.visit_target(&named.target);
                self.visit_expr(&named.value);
            }
            PyExpr::BoolOp(bool_op) => self.visit_all(&bool_op.values),
            PyExpr::BinOp(bin) => {
                self.visit_expr(&bin.left);
                self.visit_expr(&bin.right);
            }
            PyExpr::UnaryOp(unary) => self.visit_expr(&unary.operand),
            PyExpr::IfExp(ifexp) => {
                self.visit_expr(&ifexp.test);
                self.visit_expr(&ifexp.body);
                self.visit_expr(&ifexp.orelse);
            }
            PyExpr::Dict(dict) => {
                for key in dict.keys.iter().flatten() {
                    self.visit_expr(key);
                }
                self.visit_all(&dict.values);
            }
            PyExpr::Set(set) => self.visit_all(&set.elts),
            PyExpr::Compare(compare) => {
                self.visit_expr(&compare.left);
                self.visit_all(&compare.comparators);
            }
            PyExpr::Call(call) => {
                self.visit_expr(&call.func);
                self.visit_all(&call.args);
                for keyword in &call.keywords {
                    self.visit_expr(&keyword.value);
                }
            }
            PyExpr::FormattedValue(formatted) => {
                self.visit_expr(&formatted.value);
                if let Some(spec) = &formatted.format_spec {
                    self.visit_expr(spec);
                }
            }
            PyExpr::JoinedStr(joined) => self.visit_all(&joined.values),
            PyExpr::Attribute(attr) => self.visit_expr(&attr.value),
            PyExpr::Subscript(subscript) => {
                self.visit_expr(&subscript.value);
                self.visit_expr(&subscript.slice);
            }
            PyExpr::Starred(starred) => self.visit_expr(&starred.value),
            PyExpr::List(list) => self.visit_all(&list.elts),
            PyExpr::Tuple(tuple) => self.visit_all(&tuple.elts),
            PyExpr::Slice(slice) => {
                for part in [&slice.lower, &slice.upper, &slice.step].into_iter().flatten() {
                    self.visit_expr(part);
                }
            }
            _ => {}
        }
    }

    fn visit_all(&mut self, exprs: &[PyExpr]) {
        for expr in exprs {
            self.visit_expr(expr);
        }
    }

    /// `enclosing` holds the names bound by enclosing function scopes that
    /// are visible here.
    fn resolve(self, enclosing: &BTreeSet<String>) -> Result<ScopeTable, CompileError> {
        let locals: BTreeSet<String> = self
            .params
            .iter()
            .chain(&self.bound)
            .filter(|name| !self.globals.contains(*name) && !self.nonlocals.contains(*name))
            .cloned()
            .collect();

        let mut freevars = BTreeSet::new();
        for name in &self.nonlocals {
            if !enclosing.contains(name) {
                return Err(CompileError::syntax(
                    self.line,
                    format!("no binding for nonlocal '{}' found", name),
                ));
            }
            freevars.insert(name.clone());
        }

        let visible: BTreeSet<String> = enclosing
            .iter()
            .filter(|name| !self.globals.contains(*name))
            .chain(&locals)
            .cloned()
            .collect();

        let mut cellvars = BTreeSet::new();
        let mut children = HashMap::new();
        for (offset, child) in self.children {
            let table = child.resolve(&visible)?;
            for name in &table.freevars {
                if locals.contains(name) {
                    cellvars.insert(name.clone());
                } else {
                    freevars.insert(name.clone());
                }
            }
            children.insert(offset, table);
        }

        for name in &self.used {
            if !locals.contains(name) && !self.globals.contains(name) && enclosing.contains(name)
            {
                freevars.insert(name.clone());
            }
        }

        Ok(ScopeTable {
            locals,
            globals: self.globals,
            cellvars,
            freevars,
            children,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustpython_parser::ast as py_ast;
    use rustpython_parser::Parse;

    fn table(source: &str) -> ScopeTable {
        let suite = py_ast::Suite::parse(source, "<test>").expect("parse");
        let lines = LineIndex::new(source);
        let PyStmt::FunctionDef(def) = &suite[0] else {
            panic!("expected a function");
        };
        ScopeTable::analyze(&def.args, &def.body, 1, &lines).expect("analyze")
    }

    fn nested(table: &ScopeTable) -> &ScopeTable {
        table.children.values().next().expect("nested scope")
    }

    #[test]
    fn assigned_names_are_local_and_reads_are_global() {
        let table = table("def f(a):\n    b = a + c\n    return b\n");
        assert_eq!(table.resolve("a"), NameScope::Fast);
        assert_eq!(table.resolve("b"), NameScope::Fast);
        assert_eq!(table.resolve("c"), NameScope::Global);
        assert!(table.is_free_of_cells());
    }

    #[test]
    fn captured_locals_become_cells() {
        let table = table(
            "def outer(x):\n    y = 1\n    def inner():\n        return x + y + z\n    return inner\n",
        );
        assert_eq!(table.cellvars().collect::<Vec<_>>(), vec!["x", "y"]);
        assert_eq!(table.resolve("x"), NameScope::Deref);
        assert_eq!(table.resolve("inner"), NameScope::Fast);
        let inner = nested(&table);
        assert_eq!(inner.freevars().collect::<Vec<_>>(), vec!["x", "y"]);
        assert_eq!(inner.resolve("z"), NameScope::Global);
    }

    #[test]
    fn free_variables_pass_through_intermediate_scopes() {
        let table = table(
            "def a():\n    v = 1\n    def b():\n        def c():\n            return v\n        return c\n    return b\n",
        );
        assert_eq!(table.cellvars().collect::<Vec<_>>(), vec!["v"]);
        let b = nested(&table);
        assert_eq!(b.freevars().collect::<Vec<_>>(), vec!["v"]);
        assert!(b.cellvars().next().is_none());
        let c = nested(b);
        assert_eq!(c.freevars().collect::<Vec<_>>(), vec!["v"]);
    }

    #[test]
    fn declarations_override_binding() {
        let table = table(
            "def f():\n    global g\n    g = 1\n    n = 0\n    def bump():\n        nonlocal n\n        n += 1\n    return bump\n",
        );
        assert_eq!(table.resolve("g"), NameScope::Global);
        assert_eq!(table.resolve("n"), NameScope::Deref);
        assert_eq!(nested(&table).resolve("n"), NameScope::Deref);
    }

    #[test]
    fn nonlocal_without_binding_is_rejected() {
        let source = "def f():\n    nonlocal missing\n";
        let suite = py_ast::Suite::parse(source, "<test>").expect("parse");
        let PyStmt::FunctionDef(def) = &suite[0] else {
            panic!("expected a function");
        };
        let err = ScopeTable::analyze(&def.args, &def.body, 1, &LineIndex::new(source))
            .expect_err("no enclosing binding");
        assert!(err.to_string().contains("no binding for nonlocal 'missing'"));
    }

    #[test]
    fn global_parameter_is_rejected() {
        let source = "def f(a):\n    global a\n";
        let suite = py_ast::Suite::parse(source, "<test>").expect("parse");
        let PyStmt::FunctionDef(def) = &suite[0] else {
            panic!("expected a function");
        };
        let err = ScopeTable::analyze(&def.args, &def.body, 1, &LineIndex::new(source))
            .expect_err("parameter and global");
        assert_eq!(err.line(), Some(2));
    }
}
