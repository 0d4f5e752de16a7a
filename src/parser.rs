use anyhow::Result;

use crate::ast::{BinaryOperator, Expression, Item, Literal, Param, Statement};
use crate::token::{Span, Token, TokenKind};

pub struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token<'a>>,
    pos: usize,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str, mut tokens: Vec<Token<'a>>) -> Self {
        if tokens.is_empty() {
            tokens.push(Token::new(TokenKind::Eof, Span::default()));
        }
        Self {
            source,
            tokens,
            pos: 0,
        }
    }

    pub fn parse_program(mut self) -> Result<Vec<Item>> {
        let mut items = Vec::new();
        while !matches!(self.current().kind, TokenKind::Eof) {
            items.push(self.parse_item()?);
        }
        Ok(items)
    }

    fn parse_item(&mut self) -> Result<Item> {
        match self.current().kind {
            TokenKind::On => self.parse_trigger(),
            TokenKind::Proc => self.parse_proc(),
            _ => Err(self.error(&["'on'", "'proc'"])),
        }
    }

    fn parse_trigger(&mut self) -> Result<Item> {
        self.expect_consume(TokenKind::On, "'on'")?;
        let listener = self.expect_identifier("listener name")?;
        self.expect_consume(TokenKind::LParen, "'('")?;
        let filter = self.expect_integer()?;
        self.expect_consume(TokenKind::RParen, "')'")?;
        let body = self.parse_statement()?;
        Ok(Item::Trigger {
            listener,
            filter,
            body,
        })
    }

    fn parse_proc(&mut self) -> Result<Item> {
        self.expect_consume(TokenKind::Proc, "'proc'")?;
        let name = self.expect_identifier("procedure name")?;
        self.expect_consume(TokenKind::LParen, "'('")?;

        let mut params = Vec::new();
        if !matches!(self.current().kind, TokenKind::RParen) {
            loop {
                let type_text = self.parse_type_text()?;
                let param_name = self.expect_identifier("parameter name")?;
                params.push(Param {
                    name: param_name,
                    type_text,
                });
                if matches!(self.current().kind, TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }

        self.expect_consume(TokenKind::RParen, "')'")?;
        let body = self.parse_statement()?;
        Ok(Item::Proc { name, params, body })
    }

    /// A type spelling: a bare identifier, or `native<tag>` which scans as
    /// three tokens and is reassembled here.
    fn parse_type_text(&mut self) -> Result<String> {
        let base = self.expect_identifier("type name")?;
        if matches!(self.current().kind, TokenKind::Less) {
            self.advance();
            let tag = self.expect_identifier("type tag")?;
            self.expect_consume(TokenKind::Greater, "'>'")?;
            return Ok(format!("{base}<{tag}>"));
        }
        Ok(base)
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        match self.current().kind {
            TokenKind::LBrace => self.parse_block(),
            TokenKind::If => self.parse_if(),
            TokenKind::Identifier(_) => match self.peek_kind(1) {
                TokenKind::LParen => self.parse_call_statement(),
                TokenKind::Assign => self.parse_assign(),
                _ => self.parse_var_decl(),
            },
            _ => Err(self.error(&["method call", "variable declaration", "'{'", "'if'"])),
        }
    }

    fn parse_block(&mut self) -> Result<Statement> {
        self.expect_consume(TokenKind::LBrace, "'{'")?;
        let mut statements = Vec::new();
        while !matches!(self.current().kind, TokenKind::RBrace) {
            if matches!(self.current().kind, TokenKind::Eof) {
                return Err(self.error(&["statement", "'}'"]));
            }
            statements.push(self.parse_statement()?);
        }
        self.expect_consume(TokenKind::RBrace, "'}'")?;
        Ok(Statement::Block(statements))
    }

    fn parse_if(&mut self) -> Result<Statement> {
        self.expect_consume(TokenKind::If, "'if'")?;
        self.expect_consume(TokenKind::LParen, "'('")?;
        let condition = self.parse_expression()?;
        self.expect_consume(TokenKind::RParen, "')'")?;
        let then_branch = Box::new(self.parse_statement()?);

        let else_branch = if matches!(self.current().kind, TokenKind::Else) {
            self.advance();
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };

        Ok(Statement::If {
            condition,
            then_branch,
            else_branch,
        })
    }

    fn parse_call_statement(&mut self) -> Result<Statement> {
        let (name, args) = self.parse_method_call()?;
        self.expect_consume(TokenKind::Semicolon, "';'")?;
        Ok(Statement::Call { name, args })
    }

    fn parse_assign(&mut self) -> Result<Statement> {
        let name = self.expect_identifier("variable name")?;
        self.expect_consume(TokenKind::Assign, "'='")?;
        let value = self.parse_expression()?;
        self.expect_consume(TokenKind::Semicolon, "';'")?;
        Ok(Statement::Assign { name, value })
    }

    fn parse_var_decl(&mut self) -> Result<Statement> {
        let type_text = self.parse_type_text()?;
        let name = self.expect_identifier("variable name")?;
        let init = if matches!(self.current().kind, TokenKind::Assign) {
            self.advance();
            Some(self.parse_expression()?)
        } else {
            None
        };
        self.expect_consume(TokenKind::Semicolon, "';'")?;
        Ok(Statement::VarDecl {
            type_text,
            name,
            init,
        })
    }

    fn parse_method_call(&mut self) -> Result<(String, Vec<Expression>)> {
        let name = self.expect_identifier("method name")?;
        self.expect_consume(TokenKind::LParen, "'('")?;

        let mut args = Vec::new();
        if !matches!(self.current().kind, TokenKind::RParen) {
            loop {
                args.push(self.parse_expression()?);
                if matches!(self.current().kind, TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }

        self.expect_consume(TokenKind::RParen, "')'")?;
        Ok((name, args))
    }

    fn parse_expression(&mut self) -> Result<Expression> {
        self.parse_equality()
    }

    fn parse_equality(&mut self) -> Result<Expression> {
        let mut expr = self.parse_relational()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Equal => BinaryOperator::Eq,
                TokenKind::NotEqual => BinaryOperator::Ne,
                _ => break,
            };
            self.advance();
            let right = self.parse_relational()?;
            expr = binary(expr, op, right);
        }
        Ok(expr)
    }

    fn parse_relational(&mut self) -> Result<Expression> {
        let mut expr = self.parse_add_sub()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Less => BinaryOperator::Lt,
                TokenKind::LessEq => BinaryOperator::Le,
                TokenKind::Greater => BinaryOperator::Gt,
                TokenKind::GreaterEq => BinaryOperator::Ge,
                _ => break,
            };
            self.advance();
            let right = self.parse_add_sub()?;
            expr = binary(expr, op, right);
        }
        Ok(expr)
    }

    fn parse_add_sub(&mut self) -> Result<Expression> {
        let mut expr = self.parse_mul_div()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Plus => BinaryOperator::Add,
                TokenKind::Minus => BinaryOperator::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_mul_div()?;
            expr = binary(expr, op, right);
        }
        Ok(expr)
    }

    fn parse_mul_div(&mut self) -> Result<Expression> {
        let mut expr = self.parse_term()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Multiply => BinaryOperator::Mul,
                TokenKind::Divide => BinaryOperator::Div,
                TokenKind::Modulo => BinaryOperator::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_term()?;
            expr = binary(expr, op, right);
        }
        Ok(expr)
    }

    fn parse_term(&mut self) -> Result<Expression> {
        match self.current().kind {
            TokenKind::Integer(value) => {
                self.advance();
                Ok(Expression::Literal(classify_integer(value)))
            }
            TokenKind::Str(raw) => {
                let value = self.unescape(raw)?;
                self.advance();
                Ok(Expression::Literal(Literal::Str(value)))
            }
            TokenKind::Bool(value) => {
                self.advance();
                Ok(Expression::Literal(Literal::Bool(value)))
            }
            TokenKind::Identifier(name) => {
                if matches!(self.peek_kind(1), TokenKind::LParen) {
                    let (name, args) = self.parse_method_call()?;
                    Ok(Expression::Call { name, args })
                } else {
                    let name = name.to_string();
                    self.advance();
                    Ok(Expression::Identifier(name))
                }
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect_consume(TokenKind::RParen, "')'")?;
                Ok(expr)
            }
            _ => Err(self.error(&["integer", "string", "boolean", "identifier", "'('"])),
        }
    }

    /// Interprets the escape set `\n \t \\ \"` in a raw string lexeme.
    fn unescape(&self, raw: &str) -> Result<String> {
        let mut out = String::with_capacity(raw.len());
        let mut chars = raw.chars();
        while let Some(c) = chars.next() {
            if c != '\\' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('\\') => out.push('\\'),
                Some('"') => out.push('"'),
                other => {
                    return Err(anyhow::anyhow!(
                        "invalid escape sequence '\\{}' in string literal\n\n{}",
                        other.map(String::from).unwrap_or_default(),
                        self.indicator(self.current().span)
                    ));
                }
            }
        }
        Ok(out)
    }

    fn expect_identifier(&mut self, what: &str) -> Result<String> {
        if let TokenKind::Identifier(name) = self.current().kind {
            let name = name.to_string();
            self.advance();
            Ok(name)
        } else {
            Err(self.error(&[what]))
        }
    }

    fn expect_integer(&mut self) -> Result<i64> {
        if let TokenKind::Integer(value) = self.current().kind {
            self.advance();
            Ok(value)
        } else {
            Err(self.error(&["integer"]))
        }
    }

    fn expect_consume(&mut self, kind: TokenKind<'static>, name: &str) -> Result<()> {
        if self.current().kind == kind {
            self.advance();
            Ok(())
        } else {
            Err(self.error(&[name]))
        }
    }

    fn current(&self) -> &Token<'a> {
        self.tokens
            .get(self.pos)
            .unwrap_or_else(|| self.tokens.last().expect("token stream is never empty"))
    }

    fn peek_kind(&self, ahead: usize) -> TokenKind<'a> {
        self.tokens
            .get(self.pos + ahead)
            .map(|token| token.kind)
            .unwrap_or(TokenKind::Eof)
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
    }

    fn error(&self, expected: &[&str]) -> anyhow::Error {
        let token = self.current();
        let lexeme = &self.source[token.span.start..token.span.end];
        let shown = if lexeme.is_empty() {
            token.kind.describe().to_string()
        } else {
            format!("'{lexeme}'")
        };
        anyhow::anyhow!(
            "unexpected {}, expected one of: {}\n\n{}",
            shown,
            expected.join(", "),
            self.indicator(token.span)
        )
    }

    /// Renders the offending source line with a caret run under the token:
    ///
    /// ```text
    /// 3:     int x = ;
    ///                ^
    /// ```
    fn indicator(&self, span: Span) -> String {
        let bytes = self.source.as_bytes();
        let at = span.start.min(self.source.len());

        let line_start = self.source[..at].rfind('\n').map_or(0, |i| i + 1);
        let line_end = self.source[at..]
            .find('\n')
            .map_or(self.source.len(), |i| at + i);
        let line_number = bytes[..at].iter().filter(|&&b| b == b'\n').count() + 1;

        let prefix = format!("{line_number}: ");
        let column = at - line_start;
        let width = (span.end - span.start).max(1);
        format!(
            "{}{}\n{}{}",
            prefix,
            &self.source[line_start..line_end],
            " ".repeat(prefix.len() + column),
            "^".repeat(width)
        )
    }
}

fn binary(left: Expression, op: BinaryOperator, right: Expression) -> Expression {
    Expression::Binary {
        left: Box::new(left),
        op,
        right: Box::new(right),
    }
}

/// Integer literals narrow to `I32` when the value fits, otherwise `I64`.
fn classify_integer(value: i64) -> Literal {
    if value >= i64::from(i32::MIN) && value <= i64::from(i32::MAX) {
        Literal::I32(value as i32)
    } else {
        Literal::I64(value)
    }
}

pub fn parse<'a>(source: &'a str, tokens: Vec<Token<'a>>) -> Result<Vec<Item>> {
    Parser::new(source, tokens).parse_program()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use indoc::indoc;

    fn parse_source(source: &str) -> Result<Vec<Item>> {
        parse(source, tokenize(source).expect("tokenize should succeed"))
    }

    fn int(value: i32) -> Expression {
        Expression::Literal(Literal::I32(value))
    }

    #[test]
    fn parses_trigger_with_block_body() {
        let items = parse_source(indoc! {r#"
            on door_opened(7) {
                log("creak");
            }
        "#})
        .expect("parse failed");

        assert_eq!(
            items,
            vec![Item::Trigger {
                listener: "door_opened".to_string(),
                filter: 7,
                body: Statement::Block(vec![Statement::Call {
                    name: "log".to_string(),
                    args: vec![Expression::Literal(Literal::Str("creak".to_string()))],
                }]),
            }]
        );
    }

    #[test]
    fn parses_proc_with_typed_parameters() {
        let items = parse_source("proc greet(string who, int times) { }").expect("parse failed");
        assert_eq!(
            items,
            vec![Item::Proc {
                name: "greet".to_string(),
                params: vec![
                    Param {
                        name: "who".to_string(),
                        type_text: "string".to_string(),
                    },
                    Param {
                        name: "times".to_string(),
                        type_text: "int".to_string(),
                    },
                ],
                body: Statement::Block(vec![]),
            }]
        );
    }

    #[test]
    fn func_is_an_alias_for_proc() {
        let a = parse_source("proc p() { }").expect("parse failed");
        let b = parse_source("func p() { }").expect("parse failed");
        assert_eq!(a, b);
    }

    #[test]
    fn disambiguates_statements_on_identifier() {
        let items = parse_source(indoc! {"
            proc p() {
                int x = 1;
                x = 2;
                poke(x);
            }
        "})
        .expect("parse failed");

        let Item::Proc { body, .. } = &items[0] else {
            panic!("expected proc");
        };
        let Statement::Block(stmts) = body else {
            panic!("expected block");
        };
        assert!(matches!(stmts[0], Statement::VarDecl { .. }));
        assert!(matches!(stmts[1], Statement::Assign { .. }));
        assert!(matches!(stmts[2], Statement::Call { .. }));
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let items = parse_source("proc p() { int x = 1 + 2 * 3; }").expect("parse failed");
        let Item::Proc { body, .. } = &items[0] else {
            panic!("expected proc");
        };
        let Statement::Block(stmts) = body else {
            panic!("expected block");
        };
        let Statement::VarDecl {
            init: Some(init), ..
        } = &stmts[0]
        else {
            panic!("expected initialized declaration");
        };
        assert_eq!(
            *init,
            Expression::Binary {
                left: Box::new(int(1)),
                op: BinaryOperator::Add,
                right: Box::new(Expression::Binary {
                    left: Box::new(int(2)),
                    op: BinaryOperator::Mul,
                    right: Box::new(int(3)),
                }),
            }
        );
    }

    #[test]
    fn parentheses_override_precedence() {
        let items = parse_source("proc p() { int x = (1 + 2) * 3; }").expect("parse failed");
        let Item::Proc { body, .. } = &items[0] else {
            panic!("expected proc");
        };
        let Statement::Block(stmts) = body else {
            panic!("expected block");
        };
        let Statement::VarDecl {
            init: Some(init), ..
        } = &stmts[0]
        else {
            panic!("expected initialized declaration");
        };
        assert_eq!(
            *init,
            Expression::Binary {
                left: Box::new(Expression::Binary {
                    left: Box::new(int(1)),
                    op: BinaryOperator::Add,
                    right: Box::new(int(2)),
                }),
                op: BinaryOperator::Mul,
                right: Box::new(int(3)),
            }
        );
    }

    #[test]
    fn operators_are_left_associative() {
        let items = parse_source("proc p() { int x = 10 - 4 - 3; }").expect("parse failed");
        let Item::Proc { body, .. } = &items[0] else {
            panic!("expected proc");
        };
        let Statement::Block(stmts) = body else {
            panic!("expected block");
        };
        let Statement::VarDecl {
            init: Some(init), ..
        } = &stmts[0]
        else {
            panic!("expected initialized declaration");
        };
        assert_eq!(
            *init,
            Expression::Binary {
                left: Box::new(Expression::Binary {
                    left: Box::new(int(10)),
                    op: BinaryOperator::Sub,
                    right: Box::new(int(4)),
                }),
                op: BinaryOperator::Sub,
                right: Box::new(int(3)),
            }
        );
    }

    #[test]
    fn integer_literals_widen_at_the_i32_boundary() {
        let items = parse_source(
            "proc p() { long a = 2147483648; int b = 2147483647; int c = -2147483648; }",
        )
        .expect("parse failed");
        let Item::Proc { body, .. } = &items[0] else {
            panic!("expected proc");
        };
        let Statement::Block(stmts) = body else {
            panic!("expected block");
        };
        let inits: Vec<_> = stmts
            .iter()
            .map(|s| match s {
                Statement::VarDecl {
                    init: Some(init), ..
                } => init.clone(),
                other => panic!("expected initialized declaration, got {other:?}"),
            })
            .collect();
        assert_eq!(inits[0], Expression::Literal(Literal::I64(2_147_483_648)));
        assert_eq!(inits[1], Expression::Literal(Literal::I32(2_147_483_647)));
        assert_eq!(inits[2], Expression::Literal(Literal::I32(i32::MIN)));
    }

    #[test]
    fn unescapes_string_literals() {
        let items =
            parse_source(r#"proc p() { string s = "a\tb\n\"c\"\\"; }"#).expect("parse failed");
        let Item::Proc { body, .. } = &items[0] else {
            panic!("expected proc");
        };
        let Statement::Block(stmts) = body else {
            panic!("expected block");
        };
        assert_eq!(
            stmts[0],
            Statement::VarDecl {
                type_text: "string".to_string(),
                name: "s".to_string(),
                init: Some(Expression::Literal(Literal::Str(
                    "a\tb\n\"c\"\\".to_string()
                ))),
            }
        );
    }

    #[test]
    fn rejects_unknown_escape() {
        let err = parse_source(r#"proc p() { string s = "a\qb"; }"#).expect_err("expected failure");
        assert!(err.to_string().contains("invalid escape sequence"));
    }

    #[test]
    fn parses_empty_argument_list() {
        let items = parse_source("proc p() { ping(); }").expect("parse failed");
        let Item::Proc { body, .. } = &items[0] else {
            panic!("expected proc");
        };
        assert_eq!(
            *body,
            Statement::Block(vec![Statement::Call {
                name: "ping".to_string(),
                args: vec![],
            }])
        );
    }

    #[test]
    fn parses_native_type_spelling() {
        let items = parse_source("proc p(native<player> who) { native<npc> n; }")
            .expect("parse failed");
        let Item::Proc { params, body, .. } = &items[0] else {
            panic!("expected proc");
        };
        assert_eq!(params[0].type_text, "native<player>");
        assert_eq!(
            *body,
            Statement::Block(vec![Statement::VarDecl {
                type_text: "native<npc>".to_string(),
                name: "n".to_string(),
                init: None,
            }])
        );
    }

    #[test]
    fn trigger_requires_a_body_statement() {
        let err = parse_source("on jump(1)").expect_err("expected failure");
        assert!(err.to_string().contains("expected one of"));
    }

    #[test]
    fn error_renders_line_and_caret() {
        let err = parse_source(indoc! {"
            proc p() {
                int x = ;
            }
        "})
        .expect_err("expected failure");
        let message = err.to_string();
        assert!(message.contains("2: "), "got: {message}");
        assert!(message.contains("int x = ;"), "got: {message}");
        assert!(message.contains('^'), "got: {message}");
    }

    #[test]
    fn rejects_not_operator_in_expressions() {
        let err = parse_source("proc p() { if (!ready()) { } }").expect_err("expected failure");
        assert!(err.to_string().contains("unexpected '!'"));
    }

    #[test]
    fn rejects_stray_top_level_statement() {
        let err = parse_source("int x = 1;").expect_err("expected failure");
        assert!(err.to_string().contains("expected one of: 'on', 'proc'"));
    }
}
