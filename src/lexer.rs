use thiserror::Error;

use crate::token::{Span, Token, TokenKind};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LexError {
    #[error("Unexpected character '{character}' at position {position}, near \"{context}\"")]
    UnexpectedCharacter {
        character: char,
        position: usize,
        context: String,
    },
    #[error("Unterminated string literal at position {position}")]
    UnterminatedString { position: usize },
    #[error("Invalid integer literal '{literal}' at position {position}")]
    InvalidIntegerLiteral { literal: String, position: usize },
}

pub type LexResult<T> = Result<T, LexError>;

/// Byte-oriented scanner over UTF-8 input. All syntactic characters are
/// ASCII; multi-byte sequences can only occur inside string literals and
/// comments, where they pass through untouched.
pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    pub fn next_token(&mut self) -> LexResult<Token<'a>> {
        self.skip_whitespace_and_comments();

        let start = self.pos;
        let Some(byte) = self.peek_byte() else {
            return Ok(Token::new(TokenKind::Eof, Span { start, end: start }));
        };

        if let Some(kind) = self.try_consume_operator(byte) {
            return Ok(Token::new(
                kind,
                Span {
                    start,
                    end: self.pos,
                },
            ));
        }

        match byte {
            b'"' => self.read_string(start),
            b'-' => {
                self.bump();
                if self.peek_byte().is_some_and(|b| b.is_ascii_digit()) {
                    self.read_integer(start)
                } else {
                    Ok(Token::new(
                        TokenKind::Minus,
                        Span {
                            start,
                            end: self.pos,
                        },
                    ))
                }
            }
            b if is_identifier_start(b) => Ok(self.read_identifier(start)),
            b if b.is_ascii_digit() => self.read_integer(start),
            _ => Err(LexError::UnexpectedCharacter {
                character: self.input[start..].chars().next().unwrap_or('\u{fffd}'),
                position: start,
                context: self.context_at(start),
            }),
        }
    }

    /// Up to 10 characters of source following `position`, for diagnostics.
    fn context_at(&self, position: usize) -> String {
        self.input[position..].chars().take(10).collect()
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            self.eat_while(|b| matches!(b, b' ' | b'\t' | b'\n' | b'\r' | 0));
            if self.peek_byte() == Some(b'/') && self.peek_byte_at(1) == Some(b'/') {
                self.eat_while(|b| b != b'\n');
                continue;
            }
            break;
        }
    }

    fn try_consume_operator(&mut self, byte: u8) -> Option<TokenKind<'a>> {
        let kind = match byte {
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'{' => TokenKind::LBrace,
            b'}' => TokenKind::RBrace,
            b';' => TokenKind::Semicolon,
            b',' => TokenKind::Comma,
            b'+' => TokenKind::Plus,
            b'*' => TokenKind::Multiply,
            b'/' => TokenKind::Divide,
            b'%' => TokenKind::Modulo,
            b'=' => return Some(self.consume_with_eq(TokenKind::Equal, TokenKind::Assign)),
            b'!' => return Some(self.consume_with_eq(TokenKind::NotEqual, TokenKind::Not)),
            b'<' => return Some(self.consume_with_eq(TokenKind::LessEq, TokenKind::Less)),
            b'>' => return Some(self.consume_with_eq(TokenKind::GreaterEq, TokenKind::Greater)),
            _ => return None,
        };
        self.bump();
        Some(kind)
    }

    /// Consumes one byte, then a trailing '=' if present, picking the
    /// two-character or single-character token kind accordingly.
    fn consume_with_eq(
        &mut self,
        with_eq: TokenKind<'a>,
        without: TokenKind<'a>,
    ) -> TokenKind<'a> {
        self.bump();
        if self.peek_byte() == Some(b'=') {
            self.bump();
            with_eq
        } else {
            without
        }
    }

    fn read_identifier(&mut self, start: usize) -> Token<'a> {
        self.eat_while(is_identifier_byte);
        let text = &self.input[start..self.pos];
        let kind = match text {
            "on" => TokenKind::On,
            "proc" | "func" => TokenKind::Proc,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "true" => TokenKind::Bool(true),
            "false" => TokenKind::Bool(false),
            _ => TokenKind::Identifier(text),
        };
        Token::new(
            kind,
            Span {
                start,
                end: self.pos,
            },
        )
    }

    fn read_integer(&mut self, start: usize) -> LexResult<Token<'a>> {
        self.eat_while(|b| b.is_ascii_digit());
        let text = &self.input[start..self.pos];
        let value = text
            .parse::<i64>()
            .map_err(|_| LexError::InvalidIntegerLiteral {
                literal: text.to_string(),
                position: start,
            })?;
        Ok(Token::new(
            TokenKind::Integer(value),
            Span {
                start,
                end: self.pos,
            },
        ))
    }

    fn read_string(&mut self, start: usize) -> LexResult<Token<'a>> {
        self.bump(); // opening quote
        let content_start = self.pos;
        loop {
            match self.peek_byte() {
                Some(b'"') => break,
                Some(b'\\') => {
                    // Skip the escape so an escaped quote does not close the
                    // literal; interpretation happens in the parser.
                    self.bump();
                    if self.peek_byte().is_none() {
                        return Err(LexError::UnterminatedString { position: start });
                    }
                    self.bump();
                }
                Some(_) => {
                    self.bump();
                }
                None => return Err(LexError::UnterminatedString { position: start }),
            }
        }
        let content_end = self.pos;
        self.bump(); // closing quote
        Ok(Token::new(
            TokenKind::Str(&self.input[content_start..content_end]),
            Span {
                start,
                end: self.pos,
            },
        ))
    }

    fn eat_while<P>(&mut self, keep: P)
    where
        P: Fn(u8) -> bool,
    {
        while let Some(b) = self.peek_byte() {
            if !keep(b) {
                break;
            }
            self.bump();
        }
    }

    fn peek_byte(&self) -> Option<u8> {
        self.input.as_bytes().get(self.pos).copied()
    }

    fn peek_byte_at(&self, ahead: usize) -> Option<u8> {
        self.input.as_bytes().get(self.pos + ahead).copied()
    }

    fn bump(&mut self) {
        // Advance a full UTF-8 sequence so slicing stays on char boundaries.
        let step = match self.input.as_bytes().get(self.pos) {
            Some(&b) if b < 0x80 => 1,
            Some(_) => self.input[self.pos..]
                .chars()
                .next()
                .map_or(1, char::len_utf8),
            None => 0,
        };
        self.pos += step;
    }
}

fn is_identifier_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'$'
}

fn is_identifier_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

impl<'a> Iterator for Lexer<'a> {
    type Item = LexResult<Token<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_token() {
            Ok(token) => Some(Ok(token)),
            Err(e) => Some(Err(e)),
        }
    }
}

pub fn tokenize(input: &str) -> LexResult<Vec<Token<'_>>> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let is_eof = matches!(token.kind, TokenKind::Eof);
        tokens.push(token);
        if is_eof {
            break;
        }
    }
    Ok(tokens)
}
