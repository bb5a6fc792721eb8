#![forbid(unsafe_code)]
#![allow(unused_assignments)]

use logos::Logos;
use miette::Diagnostic;
use ndshape_ast::{Span, span_between};
use thiserror::Error;

use crate::token::{Token, TokenKind};

#[derive(Debug, Error, Diagnostic)]
#[error("lex error: {message}")]
#[diagnostic(code(ndshape::lex))]
#[allow(unused_assignments)]
pub struct LexError {
    pub message: String,
    #[label]
    pub span: Span,
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"([ \t\r\n\f]+|#[^\n]*)")]
enum RawToken {
    #[token("->")]
    Arrow,
    #[token("...")]
    Ellipsis,
    #[token("::")]
    ColonColon,
    #[token(":")]
    Colon,
    #[token("*")]
    Star,
    #[token("?")]
    Question,
    #[token("&")]
    Amp,
    #[token("=")]
    Eq,
    #[token("-")]
    Minus,
    #[token(",")]
    Comma,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,

    #[regex(r"[0-9][0-9_]*", |lex| parse_int_decimal(lex.slice()))]
    Int(Option<u64>),

    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Float(Option<f64>),

    // Quoted strings, single or double: '...' / "..." with \\ \' \" \n \t escapes.
    #[regex(r#"'([^'\\]|\\.)*'"#, parse_string)]
    #[regex(r#""([^"\\]|\\.)*""#, parse_string)]
    String(Option<String>),

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),
}

fn parse_int_decimal(s: &str) -> Option<u64> {
    if s.ends_with('_') || s.contains("__") {
        return None;
    }
    s.replace('_', "").parse::<u64>().ok()
}

fn parse_string(lex: &mut logos::Lexer<RawToken>) -> Option<String> {
    let s = lex.slice();
    let inner = &s[1..s.len().saturating_sub(1)];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            '\\' => out.push('\\'),
            _ => return None,
        }
    }

    Some(out)
}

pub struct Lexer<'a> {
    src: &'a str,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src }
    }

    pub fn lex(&self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        let mut lex = RawToken::lexer(self.src);

        while let Some(raw) = lex.next() {
            let range = lex.span();
            let span = span_between(range.start, range.end);

            let kind = match raw {
                Ok(RawToken::Arrow) => TokenKind::Arrow,
                Ok(RawToken::Ellipsis) => TokenKind::Ellipsis,
                Ok(RawToken::ColonColon) => TokenKind::ColonColon,
                Ok(RawToken::Colon) => TokenKind::Colon,
                Ok(RawToken::Star) => TokenKind::Star,
                Ok(RawToken::Question) => TokenKind::Question,
                Ok(RawToken::Amp) => TokenKind::Amp,
                Ok(RawToken::Eq) => TokenKind::Eq,
                Ok(RawToken::Minus) => TokenKind::Minus,
                Ok(RawToken::Comma) => TokenKind::Comma,

                Ok(RawToken::LParen) => TokenKind::LParen,
                Ok(RawToken::RParen) => TokenKind::RParen,
                Ok(RawToken::LBrace) => TokenKind::LBrace,
                Ok(RawToken::RBrace) => TokenKind::RBrace,
                Ok(RawToken::LBracket) => TokenKind::LBracket,
                Ok(RawToken::RBracket) => TokenKind::RBracket,

                Ok(RawToken::Ident(s)) => TokenKind::Ident(s),
                Ok(RawToken::Int(Some(n))) => TokenKind::Int(n),
                Ok(RawToken::Int(None)) => {
                    return Err(LexError {
                        message: "invalid integer literal".to_string(),
                        span,
                    });
                }
                Ok(RawToken::Float(Some(x))) => TokenKind::Float(x),
                Ok(RawToken::Float(None)) => {
                    return Err(LexError {
                        message: "invalid float literal".to_string(),
                        span,
                    });
                }
                Ok(RawToken::String(Some(s))) => TokenKind::String(s),
                Ok(RawToken::String(None)) => {
                    return Err(LexError {
                        message: "invalid string literal".to_string(),
                        span,
                    });
                }

                Err(_) => {
                    return Err(LexError {
                        message: "unexpected character".to_string(),
                        span,
                    });
                }
            };

            tokens.push(Token { kind, span });
        }

        tokens.push(Token {
            kind: TokenKind::Eof,
            span: span_between(self.src.len(), self.src.len()),
        });

        Ok(tokens)
    }
}
