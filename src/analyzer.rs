use anyhow::{Result, bail};

use crate::ast;
use crate::ast::{BinaryOperator, Literal};
use crate::cpool::PoolValue;
use crate::runtime::RuntimeManifest;
use crate::types::{VarType, resolve_var_type, type_list_to_string};

/// The resolved, typed program: one method per user procedure plus one
/// synthetic method per trigger, with all names bound to table indices.
#[derive(Debug, PartialEq)]
pub struct AnalyzedProgram {
    pub methods: Vec<Method>,
    pub triggers: Vec<Trigger>,
}

#[derive(Debug, PartialEq)]
pub struct Method {
    pub name: String,
    /// Dense id in definition order; `CALL` and the binary method table use
    /// this.
    pub index: usize,
    /// The first `params` entries of `locals` are parameters.
    pub params: usize,
    pub locals: Vec<LocalVariable>,
    pub body: Stmt,
}

#[derive(Debug, PartialEq)]
pub struct LocalVariable {
    /// Slot in the owning method's local table; operand of
    /// `GETLOCAL`/`SETLOCAL`.
    pub index: usize,
    pub name: String,
    pub ty: VarType,
}

#[derive(Debug, PartialEq)]
pub struct Trigger {
    pub listener_id: i32,
    /// Index of the synthetic method holding the trigger body.
    pub method: usize,
    pub values: Vec<PoolValue>,
}

#[derive(Debug, PartialEq)]
pub enum Stmt {
    Block(Vec<Stmt>),
    VarDecl {
        local: usize,
        init: Option<Expr>,
    },
    Assign {
        local: usize,
        value: Expr,
    },
    If {
        cond: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    Call(CallExpr),
}

#[derive(Debug, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Local(usize),
    Call(CallExpr),
    Binary {
        left: Box<Expr>,
        op: BinaryOperator,
        right: Box<Expr>,
    },
}

#[derive(Debug, PartialEq)]
pub struct CallExpr {
    pub target: CallTarget,
    /// Arguments in source order; the assembler emits them in reverse.
    pub args: Vec<Expr>,
}

#[derive(Debug, PartialEq)]
pub enum CallTarget {
    Native { id: i32, return_type: VarType },
    Proc(usize),
}

pub fn analyze(manifest: &RuntimeManifest, items: &[ast::Item]) -> Result<AnalyzedProgram> {
    let mut analyzer = Analyzer {
        manifest,
        methods: Vec::new(),
        triggers: Vec::new(),
        trigger_index: 0,
    };

    // Pass 1: hoist procedure declarations so call sites can reference
    // procedures defined later in the file.
    for item in items {
        if let ast::Item::Proc { name, params, .. } = item {
            analyzer.define_proc(name, params)?;
        }
    }

    // Pass 2: resolve bodies in source order.
    for item in items {
        match item {
            ast::Item::Proc { name, body, .. } => {
                let method = analyzer
                    .resolve_method(name)
                    .expect("hoisted procedure must exist");
                let body = analyzer.analyze_statement(method, body)?;
                analyzer.methods[method].body = body;
            }
            ast::Item::Trigger {
                listener,
                filter,
                body,
            } => analyzer.analyze_trigger(listener, *filter, body)?,
        }
    }

    Ok(AnalyzedProgram {
        methods: analyzer.methods,
        triggers: analyzer.triggers,
    })
}

struct Analyzer<'a> {
    manifest: &'a RuntimeManifest,
    methods: Vec<Method>,
    triggers: Vec<Trigger>,
    trigger_index: usize,
}

impl<'a> Analyzer<'a> {
    fn define_proc(&mut self, name: &str, params: &[ast::Param]) -> Result<()> {
        if self.resolve_method(name).is_some() {
            bail!("redefining method: {name}");
        }

        let method = self.define_method(name.to_string());
        for param in params {
            let Some(ty) = resolve_var_type(&param.type_text) else {
                bail!("unresolved parameter type: {}", param.type_text);
            };
            self.define_local(method, &param.name, ty);
        }
        self.methods[method].params = params.len();
        Ok(())
    }

    fn analyze_trigger(
        &mut self,
        listener: &str,
        filter: i64,
        body: &ast::Statement,
    ) -> Result<()> {
        let Some(definition) = self.manifest.find_listener(listener) else {
            bail!("unknown trigger {listener}, not defined in runtime");
        };
        let listener_id = definition.internal_id;

        if filter < 0 {
            bail!("cannot parse trigger value into long: {filter}");
        }

        let method = self.define_method(format!("@{listener}@{filter}@{}", self.trigger_index));
        self.trigger_index += 1;

        self.triggers.push(Trigger {
            listener_id,
            method,
            values: vec![PoolValue::I64(filter)],
        });

        let body = self.analyze_statement(method, body)?;
        self.methods[method].body = body;
        Ok(())
    }

    fn analyze_statement(&mut self, method: usize, stmt: &ast::Statement) -> Result<Stmt> {
        match stmt {
            ast::Statement::Block(statements) => {
                let mut out = Vec::with_capacity(statements.len());
                for statement in statements {
                    out.push(self.analyze_statement(method, statement)?);
                }
                Ok(Stmt::Block(out))
            }
            ast::Statement::VarDecl {
                type_text,
                name,
                init,
            } => {
                let Some(ty) = resolve_var_type(type_text) else {
                    bail!("unresolved variable type: {type_text}");
                };
                if self.resolve_local(method, name).is_some() {
                    bail!("variable redeclared: {name}");
                }

                let local = self.define_local(method, name, ty.clone());
                let init = match init {
                    Some(expr) => {
                        let (expr, expr_ty) = self.analyze_expression(method, expr)?;
                        if expr_ty != ty {
                            bail!("cannot assign value of type '{expr_ty}' to '{type_text} {name}'");
                        }
                        Some(expr)
                    }
                    None => None,
                };
                Ok(Stmt::VarDecl { local, init })
            }
            ast::Statement::Assign { name, value } => {
                let Some(local) = self.resolve_local(method, name) else {
                    bail!("undefined variable: {name}");
                };
                let (value, value_ty) = self.analyze_expression(method, value)?;
                let local_ty = &self.methods[method].locals[local].ty;
                if value_ty != *local_ty {
                    bail!("cannot assign value of type '{value_ty}' to '{local_ty} {name}'");
                }
                Ok(Stmt::Assign { local, value })
            }
            ast::Statement::If {
                condition,
                then_branch,
                else_branch,
            } => {
                // Condition type is deliberately unchecked: the machine
                // treats zero as false for any operand.
                let (cond, _) = self.analyze_expression(method, condition)?;
                let then_branch = Box::new(self.analyze_statement(method, then_branch)?);
                let else_branch = match else_branch {
                    Some(statement) => Some(Box::new(self.analyze_statement(method, statement)?)),
                    None => None,
                };
                Ok(Stmt::If {
                    cond,
                    then_branch,
                    else_branch,
                })
            }
            ast::Statement::Call { name, args } => {
                let call = self.analyze_call(method, name, args)?;
                Ok(Stmt::Call(call))
            }
        }
    }

    fn analyze_call(
        &mut self,
        method: usize,
        name: &str,
        args: &[ast::Expression],
    ) -> Result<CallExpr> {
        let mut analyzed = Vec::with_capacity(args.len());
        let mut types = Vec::with_capacity(args.len());
        for arg in args {
            let (expr, ty) = self.analyze_expression(method, arg)?;
            analyzed.push(expr);
            types.push(ty);
        }

        // Natives take priority; an exact signature match is required.
        let target = if let Some(native) = self.manifest.find_function(name, &types) {
            CallTarget::Native {
                id: native.internal_id,
                return_type: native.return_type.clone(),
            }
        } else if let Some(local) = self.resolve_method(name) {
            CallTarget::Proc(local)
        } else {
            bail!(
                "cannot resolve local or native method: {name}({})",
                type_list_to_string(&types)
            );
        };

        Ok(CallExpr {
            target,
            args: analyzed,
        })
    }

    fn analyze_expression(
        &mut self,
        method: usize,
        expr: &ast::Expression,
    ) -> Result<(Expr, VarType)> {
        match expr {
            ast::Expression::Literal(literal) => {
                let ty = match literal {
                    Literal::I32(_) => VarType::Int,
                    Literal::I64(_) => VarType::Long,
                    Literal::Str(_) => VarType::Str,
                    Literal::Bool(_) => VarType::Bool,
                };
                Ok((Expr::Literal(literal.clone()), ty))
            }
            ast::Expression::Identifier(name) => {
                let Some(local) = self.resolve_local(method, name) else {
                    bail!("undefined variable: {name}");
                };
                let ty = self.methods[method].locals[local].ty.clone();
                Ok((Expr::Local(local), ty))
            }
            ast::Expression::Call { name, args } => {
                let call = self.analyze_call(method, name, args)?;
                let ty = match &call.target {
                    CallTarget::Native { return_type, .. } => return_type.clone(),
                    CallTarget::Proc(_) => {
                        bail!("local method return types not supported: {name}")
                    }
                };
                Ok((Expr::Call(call), ty))
            }
            ast::Expression::Binary { left, op, right } => {
                let (left, left_ty) = self.analyze_expression(method, left)?;
                let (right, _) = self.analyze_expression(method, right)?;
                let ty = if op.is_comparison() {
                    VarType::Bool
                } else {
                    left_ty
                };
                Ok((
                    Expr::Binary {
                        left: Box::new(left),
                        op: *op,
                        right: Box::new(right),
                    },
                    ty,
                ))
            }
        }
    }

    fn define_method(&mut self, name: String) -> usize {
        let index = self.methods.len();
        self.methods.push(Method {
            name,
            index,
            params: 0,
            locals: Vec::new(),
            body: Stmt::Block(Vec::new()),
        });
        index
    }

    fn resolve_method(&self, name: &str) -> Option<usize> {
        self.methods
            .iter()
            .position(|method| method.name == name)
    }

    fn define_local(&mut self, method: usize, name: &str, ty: VarType) -> usize {
        let locals = &mut self.methods[method].locals;
        let index = locals.len();
        locals.push(LocalVariable {
            index,
            name: name.to_string(),
            ty,
        });
        index
    }

    fn resolve_local(&self, method: usize, name: &str) -> Option<usize> {
        self.methods[method]
            .locals
            .iter()
            .position(|local| local.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser;
    use crate::runtime::parse_manifest;
    use indoc::indoc;

    fn manifest() -> RuntimeManifest {
        parse_manifest(indoc! {"
            listener jump(int height) -> 7;
            void log(string message) -> 3;
            int random(int bound) -> 4;
            void foo(int a) -> 10;
            void foo(int a, string b) -> 11;
        "})
        .expect("manifest should parse")
    }

    fn analyze_source(source: &str) -> Result<AnalyzedProgram> {
        let manifest = manifest();
        let tokens = tokenize(source).expect("tokenize should succeed");
        let items = parser::parse(source, tokens).expect("parse should succeed");
        analyze(&manifest, &items)
    }

    #[test]
    fn hoists_procedures_for_forward_calls() {
        let program = analyze_source(indoc! {"
            proc first() { second(); }
            proc second() { }
        "})
        .expect("analysis should succeed");

        assert_eq!(program.methods.len(), 2);
        let Stmt::Block(stmts) = &program.methods[0].body else {
            panic!("expected block body");
        };
        assert_eq!(
            stmts[0],
            Stmt::Call(CallExpr {
                target: CallTarget::Proc(1),
                args: vec![],
            })
        );
    }

    #[test]
    fn rejects_redefined_procedure() {
        let err = analyze_source("proc p() { } proc p() { }").expect_err("expected failure");
        assert_eq!(err.to_string(), "redefining method: p");
    }

    #[test]
    fn trigger_binds_listener_and_filter() {
        let program = analyze_source("on jump(42) { }").expect("analysis should succeed");

        assert_eq!(program.triggers.len(), 1);
        let trigger = &program.triggers[0];
        assert_eq!(trigger.listener_id, 7);
        assert_eq!(trigger.values, vec![PoolValue::I64(42)]);
        assert_eq!(program.methods[trigger.method].name, "@jump@42@0");
    }

    #[test]
    fn repeated_triggers_get_distinct_synthetic_methods() {
        let program = analyze_source(indoc! {"
            on jump(42) { }
            on jump(42) { }
        "})
        .expect("analysis should succeed");

        assert_eq!(program.triggers.len(), 2);
        let first = program.triggers[0].method;
        let second = program.triggers[1].method;
        assert_ne!(first, second);
        assert_eq!(program.methods[first].name, "@jump@42@0");
        assert_eq!(program.methods[second].name, "@jump@42@1");
    }

    #[test]
    fn trigger_methods_index_after_hoisted_procs() {
        let program = analyze_source(indoc! {"
            on jump(1) { helper(); }
            proc helper() { }
        "})
        .expect("analysis should succeed");

        assert_eq!(program.methods[0].name, "helper");
        assert_eq!(program.methods[1].name, "@jump@1@0");
        assert_eq!(program.triggers[0].method, 1);
    }

    #[test]
    fn rejects_unknown_listener() {
        let err = analyze_source("on warp(1) { }").expect_err("expected failure");
        assert_eq!(
            err.to_string(),
            "unknown trigger warp, not defined in runtime"
        );
    }

    #[test]
    fn rejects_negative_trigger_filter() {
        let err = analyze_source("on jump(-1) { }").expect_err("expected failure");
        assert!(err.to_string().contains("cannot parse trigger value"));
    }

    #[test]
    fn rejects_undefined_variable() {
        let err = analyze_source("proc p() { x = 1; }").expect_err("expected failure");
        assert_eq!(err.to_string(), "undefined variable: x");
    }

    #[test]
    fn rejects_redeclared_variable() {
        let err = analyze_source("proc p() { int x; int x; }").expect_err("expected failure");
        assert_eq!(err.to_string(), "variable redeclared: x");
    }

    #[test]
    fn parameters_occupy_leading_local_slots() {
        let program =
            analyze_source("proc p(int a, string b) { int c; }").expect("analysis should succeed");
        let method = &program.methods[0];
        assert_eq!(method.params, 2);
        let names: Vec<_> = method.locals.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(method.locals[2].index, 2);
    }

    #[test]
    fn rejects_initializer_type_mismatch() {
        let err = analyze_source(r#"proc r() { int a = "str"; }"#).expect_err("expected failure");
        assert_eq!(
            err.to_string(),
            "cannot assign value of type 'string' to 'int a'"
        );
    }

    #[test]
    fn rejects_assignment_type_mismatch() {
        let err =
            analyze_source(r#"proc r() { string s; s = 3; }"#).expect_err("expected failure");
        assert_eq!(
            err.to_string(),
            "cannot assign value of type 'int' to 'string s'"
        );
    }

    #[test]
    fn overload_resolution_picks_exact_signature() {
        let program = analyze_source(r#"proc q() { foo(1, "x"); }"#).expect("analysis");
        let Stmt::Block(stmts) = &program.methods[0].body else {
            panic!("expected block body");
        };
        let Stmt::Call(call) = &stmts[0] else {
            panic!("expected call statement");
        };
        assert_eq!(
            call.target,
            CallTarget::Native {
                id: 11,
                return_type: VarType::Void,
            }
        );
    }

    #[test]
    fn falls_back_to_local_procedure_when_signature_differs() {
        let program = analyze_source(indoc! {r#"
            proc log() { }
            proc p() { log(); }
        "#})
        .expect("analysis should succeed");

        let Stmt::Block(stmts) = &program.methods[1].body else {
            panic!("expected block body");
        };
        // `log()` matches no native (the native takes a string), so it binds
        // to the user procedure.
        assert_eq!(
            stmts[0],
            Stmt::Call(CallExpr {
                target: CallTarget::Proc(0),
                args: vec![],
            })
        );
    }

    #[test]
    fn rejects_unresolvable_call() {
        let err = analyze_source("proc p() { vanish(1); }").expect_err("expected failure");
        assert_eq!(
            err.to_string(),
            "cannot resolve local or native method: vanish(int)"
        );
    }

    #[test]
    fn rejects_local_procedure_call_in_value_position() {
        let err = analyze_source(indoc! {"
            proc helper() { }
            proc p() { int x = helper(); }
        "})
        .expect_err("expected failure");
        assert_eq!(
            err.to_string(),
            "local method return types not supported: helper"
        );
    }

    #[test]
    fn native_return_type_drives_initializer_check() {
        analyze_source("proc p() { int r = random(6); }").expect("analysis should succeed");
        let err = analyze_source("proc p() { string r = random(6); }")
            .expect_err("expected type failure");
        assert!(err.to_string().contains("cannot assign value of type 'int'"));
    }

    #[test]
    fn comparisons_synthesize_bool() {
        analyze_source("proc p() { bool b = 1 == 2; }").expect("analysis should succeed");
        let err =
            analyze_source("proc p() { int i = 1 < 2; }").expect_err("expected type failure");
        assert!(err.to_string().contains("'bool'"));
    }

    #[test]
    fn arithmetic_takes_left_operand_type() {
        analyze_source("proc p() { int x = 1 + 2; }").expect("analysis should succeed");
        analyze_source("proc p() { long x = 4294967296 + 1; }").expect("analysis should succeed");
    }

    #[test]
    fn declaration_is_visible_to_its_own_initializer() {
        // The local slot is allocated before the initializer is resolved, so
        // a self-reference reads the (undefined) fresh slot rather than
        // failing resolution.
        analyze_source("proc p() { int x = x; }").expect("analysis should succeed");
    }
}
