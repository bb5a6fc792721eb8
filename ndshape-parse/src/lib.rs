#![forbid(unsafe_code)]

mod error;
mod parser;

use std::collections::BTreeMap;

use miette::IntoDiagnostic;
use ndshape_ast::{Kind, Primitive, Type, span_between};
use ndshape_lex::Lexer;

pub use error::ParseError;
pub use parser::{MAX_NESTING, Parser};

/// Names the parser resolves to opaque nominal types, e.g. `point = {x : float64, y : float64}`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParseConfig {
    pub typedefs: BTreeMap<String, Type>,
}

const RESERVED: &[&str] = &[
    "Any",
    "string",
    "bytes",
    "char",
    "fixed_string",
    "fixed_bytes",
    "categorical",
    "ref",
    "var",
];

impl ParseConfig {
    /// Parse `body` under the current typedefs and register it as `name`.
    pub fn add_typedef(&mut self, name: &str, body: &str) -> Result<(), ParseError> {
        let reserved = RESERVED.contains(&name)
            || Primitive::from_name(name).is_some()
            || Kind::from_name(name).is_some();
        let lower = name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
        if reserved || !lower {
            return Err(ParseError {
                message: format!("'{name}' can not be used as a typedef name"),
                span: span_between(0, 0),
            });
        }
        if self.typedefs.contains_key(name) {
            return Err(ParseError {
                message: format!("duplicate typedef '{name}'"),
                span: span_between(0, 0),
            });
        }
        let t = try_parse_type(body, self)?;
        if !t.is_concrete() {
            return Err(ParseError {
                message: format!("typedef '{name}' must be a concrete type"),
                span: span_between(0, body.len()),
            });
        }
        self.typedefs.insert(name.to_string(), t);
        Ok(())
    }
}

pub fn try_parse_type(src: &str, config: &ParseConfig) -> Result<Type, ParseError> {
    let tokens = Lexer::new(src).lex()?;
    let mut parser = Parser::new_with_config(&tokens, config);
    parser.parse_type_eof()
}

pub fn parse_type(src: &str) -> miette::Result<Type> {
    let tokens = Lexer::new(src).lex().into_diagnostic()?;
    let mut parser = Parser::new(&tokens);
    parser.parse_type_eof().into_diagnostic()
}

pub fn parse_type_with_config(src: &str, config: &ParseConfig) -> miette::Result<Type> {
    let tokens = Lexer::new(src).lex().into_diagnostic()?;
    let mut parser = Parser::new_with_config(&tokens, config);
    parser.parse_type_eof().into_diagnostic()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typedefs_resolve_to_nominal_types() {
        let mut config = ParseConfig::default();
        config
            .add_typedef("point", "{x : float64, y : float64}")
            .expect("typedef should parse");
        let t = try_parse_type("3 * point", &config).expect("nominal use should parse");
        assert!(t.is_concrete());
        assert_eq!(t.datasize(), 48);
        assert_eq!(t.to_string(), "3 * point");
    }

    #[test]
    fn typedef_names_are_checked() {
        let mut config = ParseConfig::default();
        assert!(config.add_typedef("int64", "int32").is_err());
        assert!(config.add_typedef("Point", "int32").is_err());
        assert!(config.add_typedef("sym", "N * int32").is_err());
        config.add_typedef("cell", "int32").unwrap();
        let err = config.add_typedef("cell", "int64").unwrap_err();
        assert!(err.message.contains("duplicate typedef"));
    }

    #[test]
    fn unknown_lowercase_names_are_rejected() {
        let err = try_parse_type("widget", &ParseConfig::default()).unwrap_err();
        assert!(err.message.contains("unknown type 'widget'"));
    }
}
