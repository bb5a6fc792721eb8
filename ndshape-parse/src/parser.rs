#![forbid(unsafe_code)]

use std::mem;

use ndshape_ast::{Encoding, Kind, Literal, NdtError, Primitive, Span, Type, span_between};
use ndshape_lex::{Token, TokenKind};

use crate::ParseConfig;
use crate::error::ParseError;

/// Deepest nesting of types the parser accepts.
pub const MAX_NESTING: usize = 128;

pub struct Parser<'a> {
    tokens: &'a [Token],
    idx: usize,
    config: ParseConfig,
    /// For each opening bracket, the index of its closing bracket.
    closers: Vec<Option<usize>>,
    depth: usize,
}

fn match_brackets(tokens: &[Token]) -> Vec<Option<usize>> {
    let mut closers = vec![None; tokens.len()];
    let mut open = Vec::new();
    for (i, tok) in tokens.iter().enumerate() {
        match tok.kind {
            TokenKind::LParen | TokenKind::LBrace | TokenKind::LBracket => open.push(i),
            TokenKind::RParen | TokenKind::RBrace | TokenKind::RBracket => {
                if let Some(o) = open.pop() {
                    closers[o] = Some(i);
                }
            }
            _ => {}
        }
    }
    closers
}

fn is_upper(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}

fn lift(span: Span) -> impl FnOnce(NdtError) -> ParseError {
    move |e| ParseError {
        message: match e {
            NdtError::Value(m)
            | NdtError::Type(m)
            | NdtError::NotImplemented(m)
            | NdtError::Memory(m)
            | NdtError::Runtime(m) => m,
        },
        span,
    }
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        Self::new_with_config(tokens, &ParseConfig::default())
    }

    pub fn new_with_config(tokens: &'a [Token], config: &ParseConfig) -> Self {
        Self {
            tokens,
            idx: 0,
            config: config.clone(),
            closers: match_brackets(tokens),
            depth: 0,
        }
    }

    fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        if self.depth >= MAX_NESTING {
            return Err(ParseError {
                message: format!("types nest deeper than {MAX_NESTING} levels"),
                span: self.peek_span().unwrap_or_else(|| span_between(0, 0)),
            });
        }
        self.depth += 1;
        let out = f(self);
        self.depth -= 1;
        out
    }

    /// Parse one complete type and require end of input.
    pub fn parse_type_eof(&mut self) -> Result<Type, ParseError> {
        let t = self.parse_type()?;
        if !self.at(TokenKind::Eof) {
            let tok = self.expect_any()?;
            return Err(ParseError {
                message: format!("unexpected {} after type", tok.kind.describe()),
                span: tok.span,
            });
        }
        Ok(t)
    }

    pub fn parse_type(&mut self) -> Result<Type, ParseError> {
        self.nested(|p| {
            if p.at(TokenKind::LParen) && p.paren_group_is_signature() {
                return p.parse_function();
            }
            p.parse_datashape()
        })
    }

    /// `( ... ) ->` starts a function signature; a bare `( ... )` is a tuple.
    fn paren_group_is_signature(&self) -> bool {
        self.closers
            .get(self.idx)
            .copied()
            .flatten()
            .and_then(|close| self.tokens.get(close + 1))
            .is_some_and(|t| matches!(t.kind, TokenKind::Arrow))
    }

    fn parse_function(&mut self) -> Result<Type, ParseError> {
        let open = self.expect(TokenKind::LParen)?;
        let mut pos = Vec::new();
        let mut kwds: Vec<(String, Type)> = Vec::new();

        if !self.at(TokenKind::RParen) {
            loop {
                let is_kwd = matches!(self.peek_kind(), Some(TokenKind::Ident(_)))
                    && matches!(self.peek_kind_n(1), Some(TokenKind::Colon));
                if is_kwd {
                    let name = self.expect_ident()?;
                    self.expect(TokenKind::Colon)?;
                    kwds.push((name.0, self.parse_type()?));
                } else {
                    if !kwds.is_empty() {
                        return Err(ParseError {
                            message: "positional argument follows keyword argument".to_string(),
                            span: self.peek_span().unwrap_or(open.span),
                        });
                    }
                    pos.push(self.parse_type()?);
                }
                if self.at(TokenKind::Comma) {
                    self.next();
                    continue;
                }
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        self.expect(TokenKind::Arrow)?;
        let ret = self.parse_type()?;

        let pos = Type::tuple(pos).map_err(lift(open.span))?;
        let kwds = Type::record(kwds).map_err(lift(open.span))?;
        Type::function(ret, pos, kwds).map_err(lift(open.span))
    }

    fn parse_datashape(&mut self) -> Result<Type, ParseError> {
        let start = self.peek_span().unwrap_or_else(|| span_between(0, 0));
        match self.peek_kind().cloned() {
            Some(TokenKind::Int(n)) => {
                self.next();
                self.expect_dim_star()?;
                let shape = i64::try_from(n).map_err(|_| ParseError {
                    message: format!("dimension {n} is too large"),
                    span: start,
                })?;
                let elem = self.parse_datashape()?;
                Type::fixed_dim(elem, shape, None).map_err(lift(start))
            }
            Some(TokenKind::Ellipsis) => {
                self.next();
                self.expect_dim_star()?;
                let elem = self.parse_datashape()?;
                Type::ellipsis_dim(None, elem).map_err(lift(start))
            }
            Some(TokenKind::Ident(name))
                if name == "var"
                    && matches!(
                        self.peek_kind_n(1),
                        Some(TokenKind::Star | TokenKind::LParen)
                    ) =>
            {
                self.next();
                let offsets = if self.at(TokenKind::LParen) {
                    Some(self.parse_var_offsets()?)
                } else {
                    None
                };
                self.expect_dim_star()?;
                let elem = self.parse_datashape()?;
                Type::var_dim(elem, offsets).map_err(lift(start))
            }
            Some(TokenKind::Ident(name)) if is_upper(&name) => match self.peek_kind_n(1) {
                Some(TokenKind::Ellipsis) => {
                    self.next();
                    self.next();
                    self.expect_dim_star()?;
                    let elem = self.parse_datashape()?;
                    Type::ellipsis_dim(Some(name), elem).map_err(lift(start))
                }
                Some(TokenKind::Star) => {
                    self.next();
                    self.next();
                    let elem = self.parse_datashape()?;
                    Type::symbolic_dim(name, elem).map_err(lift(start))
                }
                _ => self.parse_dtype(),
            },
            _ => self.parse_dtype(),
        }
    }

    fn expect_dim_star(&mut self) -> Result<(), ParseError> {
        if self.at(TokenKind::Star) {
            self.next();
            return Ok(());
        }
        Err(ParseError {
            message: "expected '*' after dimension".to_string(),
            span: self.peek_span().unwrap_or_else(|| span_between(0, 0)),
        })
    }

    // var(offsets=[0, 2, 5])
    fn parse_var_offsets(&mut self) -> Result<Vec<i32>, ParseError> {
        self.expect(TokenKind::LParen)?;
        self.expect_keyword("offsets")?;
        self.expect(TokenKind::Eq)?;
        self.expect(TokenKind::LBracket)?;
        let mut offsets = Vec::new();
        if !self.at(TokenKind::RBracket) {
            loop {
                let (n, span) = self.expect_int()?;
                offsets.push(i32::try_from(n).map_err(|_| ParseError {
                    message: format!("offset {n} does not fit in int32"),
                    span,
                })?);
                if self.at(TokenKind::Comma) {
                    self.next();
                    continue;
                }
                break;
            }
        }
        self.expect(TokenKind::RBracket)?;
        self.expect(TokenKind::RParen)?;
        Ok(offsets)
    }

    fn parse_dtype(&mut self) -> Result<Type, ParseError> {
        self.nested(|p| {
            let start = p.peek_span().unwrap_or_else(|| span_between(0, 0));
            let optional = if p.at(TokenKind::Question) {
                p.next();
                true
            } else {
                false
            };
            let t = p.parse_dtype_inner()?;
            if optional {
                t.into_optional().map_err(lift(start))
            } else {
                Ok(t)
            }
        })
    }

    fn parse_dtype_inner(&mut self) -> Result<Type, ParseError> {
        let tok = self.expect_any()?;
        let span = tok.span;
        match tok.kind {
            TokenKind::Amp => Ok(Type::reference(self.parse_dtype()?)),
            TokenKind::LParen => {
                let mut fields = Vec::new();
                if !self.at(TokenKind::RParen) {
                    loop {
                        fields.push(self.parse_type()?);
                        if self.at(TokenKind::Comma) {
                            self.next();
                            if self.at(TokenKind::RParen) {
                                break;
                            }
                            continue;
                        }
                        break;
                    }
                }
                self.expect(TokenKind::RParen)?;
                Type::tuple(fields).map_err(lift(span))
            }
            TokenKind::LBrace => {
                let mut fields = Vec::new();
                if !self.at(TokenKind::RBrace) {
                    loop {
                        let name = self.expect_field_name()?;
                        self.expect(TokenKind::Colon)?;
                        fields.push((name, self.parse_type()?));
                        if self.at(TokenKind::Comma) {
                            self.next();
                            if self.at(TokenKind::RBrace) {
                                break;
                            }
                            continue;
                        }
                        break;
                    }
                }
                self.expect(TokenKind::RBrace)?;
                Type::record(fields).map_err(lift(span))
            }
            TokenKind::Ident(name) => self.parse_named_dtype(name, span),
            other => Err(ParseError {
                message: format!("expected a type, found {}", other.describe()),
                span,
            }),
        }
    }

    fn parse_named_dtype(&mut self, name: String, span: Span) -> Result<Type, ParseError> {
        if let Some(p) = Primitive::from_name(&name) {
            return Ok(Type::primitive(p));
        }
        if let Some(k) = Kind::from_name(&name) {
            return Ok(Type::supertype(k));
        }
        match name.as_str() {
            "Any" => Ok(Type::any()),
            "string" => Ok(Type::string()),
            "bytes" => {
                let mut align = 1u16;
                if self.at(TokenKind::LParen) {
                    self.next();
                    self.expect_keyword("align")?;
                    self.expect(TokenKind::Eq)?;
                    align = self.expect_u16()?;
                    self.expect(TokenKind::RParen)?;
                }
                Type::bytes(align).map_err(lift(span))
            }
            "char" => {
                let mut encoding = Encoding::Utf32;
                if self.at(TokenKind::LParen) {
                    self.next();
                    encoding = self.expect_encoding()?;
                    self.expect(TokenKind::RParen)?;
                }
                Ok(Type::char(encoding))
            }
            "fixed_string" => {
                self.expect(TokenKind::LParen)?;
                let (size, size_span) = self.expect_int()?;
                let mut encoding = Encoding::Utf8;
                if self.at(TokenKind::Comma) {
                    self.next();
                    encoding = self.expect_encoding()?;
                }
                self.expect(TokenKind::RParen)?;
                let size = i64::try_from(size).map_err(|_| ParseError {
                    message: "fixed_string size is too large".to_string(),
                    span: size_span,
                })?;
                Type::fixed_string(size, encoding).map_err(lift(span))
            }
            "fixed_bytes" => {
                self.expect(TokenKind::LParen)?;
                self.expect_keyword("size")?;
                self.expect(TokenKind::Eq)?;
                let (size, size_span) = self.expect_int()?;
                let mut align = 1u16;
                if self.at(TokenKind::Comma) {
                    self.next();
                    self.expect_keyword("align")?;
                    self.expect(TokenKind::Eq)?;
                    align = self.expect_u16()?;
                }
                self.expect(TokenKind::RParen)?;
                let size = i64::try_from(size).map_err(|_| ParseError {
                    message: "fixed_bytes size is too large".to_string(),
                    span: size_span,
                })?;
                Type::fixed_bytes(size, align).map_err(lift(span))
            }
            "categorical" => {
                self.expect(TokenKind::LParen)?;
                let mut literals = Vec::new();
                loop {
                    literals.push(self.parse_literal()?);
                    if self.at(TokenKind::Comma) {
                        self.next();
                        continue;
                    }
                    break;
                }
                self.expect(TokenKind::RParen)?;
                Type::categorical(literals).map_err(lift(span))
            }
            "ref" => {
                self.expect(TokenKind::LParen)?;
                let inner = self.parse_type()?;
                self.expect(TokenKind::RParen)?;
                Ok(Type::reference(inner))
            }
            "var" => Err(ParseError {
                message: "expected '*' after dimension".to_string(),
                span,
            }),
            _ if is_upper(&name) => {
                if self.at(TokenKind::LParen) {
                    self.next();
                    let inner = self.parse_type()?;
                    self.expect(TokenKind::RParen)?;
                    Ok(Type::constr(name, inner))
                } else if self.at(TokenKind::ColonColon) {
                    self.next();
                    let inner = self.parse_type()?;
                    Ok(Type::module(name, inner))
                } else {
                    Type::typevar(name).map_err(lift(span))
                }
            }
            _ => match self.config.typedefs.get(&name) {
                Some(def) => Ok(Type::nominal(name, def.clone())),
                None => Err(ParseError {
                    message: format!("unknown type '{name}'"),
                    span,
                }),
            },
        }
    }

    fn parse_literal(&mut self) -> Result<Literal, ParseError> {
        let tok = self.expect_any()?;
        match tok.kind {
            TokenKind::Minus => {
                let inner = self.expect_any()?;
                match inner.kind {
                    TokenKind::Int(n) => {
                        let v = i64::try_from(n).map_err(|_| ParseError {
                            message: format!("integer -{n} is out of range"),
                            span: inner.span,
                        })?;
                        Ok(Literal::Int(-v))
                    }
                    TokenKind::Float(x) => Ok(Literal::Float(-x)),
                    other => Err(ParseError {
                        message: format!("expected a number after '-', found {}", other.describe()),
                        span: inner.span,
                    }),
                }
            }
            TokenKind::Int(n) => i64::try_from(n).map(Literal::Int).map_err(|_| ParseError {
                message: format!("integer {n} is out of range"),
                span: tok.span,
            }),
            TokenKind::Float(x) => Ok(Literal::Float(x)),
            TokenKind::String(s) => Ok(Literal::Str(s)),
            TokenKind::Ident(ref s) if s == "true" => Ok(Literal::Bool(true)),
            TokenKind::Ident(ref s) if s == "false" => Ok(Literal::Bool(false)),
            TokenKind::Ident(ref s) if s == "NA" => Ok(Literal::Na),
            other => Err(ParseError {
                message: format!("expected a categorical value, found {}", other.describe()),
                span: tok.span,
            }),
        }
    }

    fn expect_field_name(&mut self) -> Result<String, ParseError> {
        let tok = self.expect_any()?;
        match tok.kind {
            TokenKind::Ident(name) | TokenKind::String(name) => Ok(name),
            other => Err(ParseError {
                message: format!("expected a field name, found {}", other.describe()),
                span: tok.span,
            }),
        }
    }

    fn expect_encoding(&mut self) -> Result<Encoding, ParseError> {
        let tok = self.expect_any()?;
        match tok.kind {
            TokenKind::String(ref s) | TokenKind::Ident(ref s) => {
                Encoding::from_name(s).ok_or_else(|| ParseError {
                    message: format!("unknown encoding '{s}'"),
                    span: tok.span,
                })
            }
            other => Err(ParseError {
                message: format!("expected an encoding, found {}", other.describe()),
                span: tok.span,
            }),
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<(), ParseError> {
        let tok = self.expect_any()?;
        match tok.kind {
            TokenKind::Ident(ref s) if s == kw => Ok(()),
            other => Err(ParseError {
                message: format!("expected '{kw}', found {}", other.describe()),
                span: tok.span,
            }),
        }
    }

    fn expect_int(&mut self) -> Result<(u64, Span), ParseError> {
        let tok = self.expect_any()?;
        match tok.kind {
            TokenKind::Int(n) => Ok((n, tok.span)),
            other => Err(ParseError {
                message: format!("expected an integer, found {}", other.describe()),
                span: tok.span,
            }),
        }
    }

    fn expect_u16(&mut self) -> Result<u16, ParseError> {
        let (n, span) = self.expect_int()?;
        u16::try_from(n).map_err(|_| ParseError {
            message: format!("{n} is out of range"),
            span,
        })
    }

    fn expect_ident(&mut self) -> Result<(String, Span), ParseError> {
        let tok = self.expect_any()?;
        match tok.kind {
            TokenKind::Ident(name) => Ok((name, tok.span)),
            other => Err(ParseError {
                message: format!("expected identifier, found {}", other.describe()),
                span: tok.span,
            }),
        }
    }

    fn expect(&mut self, expected: TokenKind) -> Result<Token, ParseError> {
        let tok = self.expect_any()?;
        if mem::discriminant(&tok.kind) == mem::discriminant(&expected) {
            Ok(tok)
        } else {
            Err(ParseError {
                message: format!(
                    "expected {}, found {}",
                    expected.describe(),
                    tok.kind.describe()
                ),
                span: tok.span,
            })
        }
    }

    fn expect_any(&mut self) -> Result<Token, ParseError> {
        self.next().ok_or_else(|| ParseError {
            message: "unexpected end of input".to_string(),
            span: span_between(0, 0),
        })
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek_kind()
            .is_some_and(|k| mem::discriminant(k) == mem::discriminant(&kind))
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.idx)?.clone();
        self.idx += 1;
        Some(tok)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.tokens.get(self.idx).map(|t| &t.kind)
    }

    fn peek_kind_n(&self, n: usize) -> Option<&TokenKind> {
        self.tokens.get(self.idx + n).map(|t| &t.kind)
    }

    fn peek_span(&self) -> Option<Span> {
        self.tokens.get(self.idx).map(|t| t.span)
    }
}
