//! Text syntax for values and patterns
//!
//! ```text
//! 42  -7  "text"  symbol  label(f1, f2)  [a, b]
//! _  $  $name  $name:pattern  $:pattern
//! ```

use crate::pattern::Pattern;
use logos::Logos;
use std::ops::Range;
use thiserror::Error;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
enum Token {
    #[token("_")]
    Discard,

    #[token("$")]
    Dollar,

    #[regex(r"\$[a-zA-Z][a-zA-Z0-9_\-]*", |lex| lex.slice()[1..].to_string())]
    CaptureName(String),

    #[regex(r"[a-zA-Z][a-zA-Z0-9_\-]*", |lex| lex.slice().to_string())]
    Identifier(String),

    #[regex(r"-?[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    IntLiteral(Option<i64>),

    #[regex(r#""([^"\\]|\\.)*""#, |lex| unescape(lex.slice()))]
    StringLiteral(Option<String>),

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
}

/// Text syntax errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyntaxError {
    #[error("invalid token at offset {offset}")]
    InvalidToken { offset: usize },

    #[error("unexpected `{found}` at offset {offset}")]
    UnexpectedToken { found: String, offset: usize },

    #[error("unexpected end of input")]
    UnexpectedEnd,

    #[error("integer literal out of range at offset {offset}")]
    IntegerOverflow { offset: usize },

    #[error("bad escape in string literal at offset {offset}")]
    BadEscape { offset: usize },

    #[error("value contains a discard or capture")]
    NotAValue,
}

fn unescape(literal: &str) -> Option<String> {
    let body = &literal[1..literal.len() - 1];
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            '"' => out.push('"'),
            '\'' => out.push('\''),
            '\\' => out.push('\\'),
            _ => return None,
        }
    }
    Some(out)
}

fn tokenize(source: &str) -> Result<Vec<(Token, Range<usize>)>, SyntaxError> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    while let Some(result) = lexer.next() {
        let span = lexer.span();
        match result {
            Ok(Token::IntLiteral(None)) => {
                return Err(SyntaxError::IntegerOverflow { offset: span.start })
            }
            Ok(Token::StringLiteral(None)) => {
                return Err(SyntaxError::BadEscape { offset: span.start })
            }
            Ok(token) => tokens.push((token, span)),
            Err(()) => return Err(SyntaxError::InvalidToken { offset: span.start }),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<(Token, Range<usize>)>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(token, _)| token)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(token, _)| token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn unexpected(&self, at: usize) -> SyntaxError {
        match self.tokens.get(at) {
            Some((_, span)) => SyntaxError::UnexpectedToken {
                found: self.source[span.clone()].to_string(),
                offset: span.start,
            },
            None => SyntaxError::UnexpectedEnd,
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), SyntaxError> {
        if self.peek() == Some(&expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.unexpected(self.pos))
        }
    }

    fn parse_pattern(&mut self) -> Result<Pattern, SyntaxError> {
        let start = self.pos;
        match self.advance() {
            Some(Token::Discard) => Ok(Pattern::Discard),
            Some(Token::Dollar) | Some(Token::CaptureName(_)) => {
                if self.peek() == Some(&Token::Colon) {
                    self.pos += 1;
                    Ok(Pattern::capture(self.parse_pattern()?))
                } else {
                    Ok(Pattern::capture(Pattern::Discard))
                }
            }
            Some(Token::IntLiteral(Some(n))) => Ok(Pattern::int(n)),
            Some(Token::StringLiteral(Some(s))) => Ok(Pattern::string(s)),
            Some(Token::Identifier(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    let fields = self.parse_list(Token::RParen)?;
                    Ok(Pattern::record(name, fields))
                } else {
                    Ok(Pattern::symbol(name))
                }
            }
            Some(Token::LBracket) => Ok(Pattern::Seq(self.parse_list(Token::RBracket)?)),
            _ => Err(self.unexpected(start)),
        }
    }

    fn parse_list(&mut self, close: Token) -> Result<Vec<Pattern>, SyntaxError> {
        let mut items = Vec::new();
        if self.peek() == Some(&close) {
            self.pos += 1;
            return Ok(items);
        }
        loop {
            items.push(self.parse_pattern()?);
            if self.peek() == Some(&Token::Comma) {
                self.pos += 1;
                continue;
            }
            self.expect(close)?;
            return Ok(items);
        }
    }
}

/// Parse one pattern, rejecting trailing input
pub(crate) fn parse_pattern(source: &str) -> Result<Pattern, SyntaxError> {
    let mut parser = Parser {
        source,
        tokens: tokenize(source)?,
        pos: 0,
    };
    let pattern = parser.parse_pattern()?;
    if parser.pos < parser.tokens.len() {
        return Err(parser.unexpected(parser.pos));
    }
    Ok(pattern)
}
