#![forbid(unsafe_code)]

use ndshape_ast::Span;

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    // Operators / punctuation
    Arrow,
    Ellipsis,
    ColonColon,
    Colon,
    Star,
    Question,
    Amp,
    Eq,
    Minus,
    Comma,

    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,

    Eof,

    // Literals / identifiers
    Ident(String),
    Int(u64),
    Float(f64),
    String(String),
}

impl TokenKind {
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Arrow => "'->'".to_string(),
            TokenKind::Ellipsis => "'...'".to_string(),
            TokenKind::ColonColon => "'::'".to_string(),
            TokenKind::Colon => "':'".to_string(),
            TokenKind::Star => "'*'".to_string(),
            TokenKind::Question => "'?'".to_string(),
            TokenKind::Amp => "'&'".to_string(),
            TokenKind::Eq => "'='".to_string(),
            TokenKind::Minus => "'-'".to_string(),
            TokenKind::Comma => "','".to_string(),
            TokenKind::LParen => "'('".to_string(),
            TokenKind::RParen => "')'".to_string(),
            TokenKind::LBrace => "'{'".to_string(),
            TokenKind::RBrace => "'}'".to_string(),
            TokenKind::LBracket => "'['".to_string(),
            TokenKind::RBracket => "']'".to_string(),
            TokenKind::Eof => "end of input".to_string(),
            TokenKind::Ident(s) => format!("identifier '{s}'"),
            TokenKind::Int(n) => format!("integer {n}"),
            TokenKind::Float(x) => format!("float {x}"),
            TokenKind::String(s) => format!("string '{s}'"),
        }
    }
}
