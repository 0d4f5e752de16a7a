//! Renders a parsed program back to Adderscript source with canonical
//! whitespace. Parentheses are emitted only where precedence requires them,
//! so printing a parsed program and re-scanning it yields the original token
//! sequence (comments and whitespace aside).

use std::fmt::Write;

use crate::ast::{BinaryOperator, Expression, Item, Literal, Statement};

pub fn print(items: &[Item]) -> String {
    let mut out = String::new();
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        print_item(&mut out, item);
    }
    out
}

fn print_item(out: &mut String, item: &Item) {
    match item {
        Item::Trigger {
            listener,
            filter,
            body,
        } => {
            write!(out, "on {listener}({filter}) ").unwrap();
            print_statement(out, body, 0);
            out.push('\n');
        }
        Item::Proc { name, params, body } => {
            write!(out, "proc {name}(").unwrap();
            for (i, param) in params.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write!(out, "{} {}", param.type_text, param.name).unwrap();
            }
            out.push_str(") ");
            print_statement(out, body, 0);
            out.push('\n');
        }
    }
}

fn print_statement(out: &mut String, statement: &Statement, indent: usize) {
    match statement {
        Statement::Block(statements) => {
            out.push_str("{\n");
            for statement in statements {
                push_indent(out, indent + 1);
                print_statement(out, statement, indent + 1);
                out.push('\n');
            }
            push_indent(out, indent);
            out.push('}');
        }
        Statement::VarDecl {
            type_text,
            name,
            init,
        } => {
            write!(out, "{type_text} {name}").unwrap();
            if let Some(init) = init {
                out.push_str(" = ");
                print_expression(out, init);
            }
            out.push(';');
        }
        Statement::Assign { name, value } => {
            write!(out, "{name} = ").unwrap();
            print_expression(out, value);
            out.push(';');
        }
        Statement::If {
            condition,
            then_branch,
            else_branch,
        } => {
            out.push_str("if (");
            print_expression(out, condition);
            out.push_str(") ");
            print_statement(out, then_branch, indent);
            if let Some(else_branch) = else_branch {
                out.push_str(" else ");
                print_statement(out, else_branch, indent);
            }
        }
        Statement::Call { name, args } => {
            print_call(out, name, args);
            out.push(';');
        }
    }
}

fn print_call(out: &mut String, name: &str, args: &[Expression]) {
    write!(out, "{name}(").unwrap();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        print_expression(out, arg);
    }
    out.push(')');
}

fn print_expression(out: &mut String, expression: &Expression) {
    match expression {
        Expression::Literal(literal) => print_literal(out, literal),
        Expression::Identifier(name) => out.push_str(name),
        Expression::Call { name, args } => print_call(out, name, args),
        Expression::Binary { left, op, right } => {
            let precedence = operator_precedence(*op);
            print_operand(out, left, precedence, false);
            write!(out, " {} ", operator_text(*op)).unwrap();
            print_operand(out, right, precedence, true);
        }
    }
}

/// Operands parenthesize when their precedence is lower than the parent's;
/// right operands also parenthesize on equal precedence since every level
/// is left-associative.
fn print_operand(out: &mut String, operand: &Expression, parent: u8, is_right: bool) {
    let needs_parens = match operand {
        Expression::Binary { op, .. } => {
            let child = operator_precedence(*op);
            child < parent || (is_right && child == parent)
        }
        _ => false,
    };
    if needs_parens {
        out.push('(');
        print_expression(out, operand);
        out.push(')');
    } else {
        print_expression(out, operand);
    }
}

fn print_literal(out: &mut String, literal: &Literal) {
    match literal {
        Literal::I32(value) => write!(out, "{value}").unwrap(),
        Literal::I64(value) => write!(out, "{value}").unwrap(),
        Literal::Bool(value) => write!(out, "{value}").unwrap(),
        Literal::Str(value) => {
            out.push('"');
            for c in value.chars() {
                match c {
                    '\\' => out.push_str("\\\\"),
                    '"' => out.push_str("\\\""),
                    '\n' => out.push_str("\\n"),
                    '\t' => out.push_str("\\t"),
                    _ => out.push(c),
                }
            }
            out.push('"');
        }
    }
}

fn operator_precedence(op: BinaryOperator) -> u8 {
    match op {
        BinaryOperator::Eq | BinaryOperator::Ne => 1,
        BinaryOperator::Lt | BinaryOperator::Le | BinaryOperator::Gt | BinaryOperator::Ge => 2,
        BinaryOperator::Add | BinaryOperator::Sub => 3,
        BinaryOperator::Mul | BinaryOperator::Div | BinaryOperator::Mod => 4,
    }
}

fn operator_text(op: BinaryOperator) -> &'static str {
    match op {
        BinaryOperator::Eq => "==",
        BinaryOperator::Ne => "!=",
        BinaryOperator::Lt => "<",
        BinaryOperator::Le => "<=",
        BinaryOperator::Gt => ">",
        BinaryOperator::Ge => ">=",
        BinaryOperator::Add => "+",
        BinaryOperator::Sub => "-",
        BinaryOperator::Mul => "*",
        BinaryOperator::Div => "/",
        BinaryOperator::Mod => "%",
    }
}

fn push_indent(out: &mut String, indent: usize) {
    for _ in 0..indent {
        out.push_str("    ");
    }
}
