#![forbid(unsafe_code)]

mod lexer;
mod token;

pub use lexer::{LexError, Lexer};
pub use token::{Token, TokenKind};

#[cfg(test)]
mod tests {
	use super::*;

	fn kinds(src: &str) -> Vec<TokenKind> {
		Lexer::new(src)
			.lex()
			.unwrap()
			.into_iter()
			.map(|t| t.kind)
			.collect()
	}

	#[test]
	fn lex_dimension_chain() {
		assert_eq!(
			kinds("2 * N * int64"),
			vec![
				TokenKind::Int(2),
				TokenKind::Star,
				TokenKind::Ident("N".to_string()),
				TokenKind::Star,
				TokenKind::Ident("int64".to_string()),
				TokenKind::Eof,
			]
		);
	}

	#[test]
	fn lex_ellipsis_and_arrow() {
		assert_eq!(
			kinds("(Dims... * T) -> ..."),
			vec![
				TokenKind::LParen,
				TokenKind::Ident("Dims".to_string()),
				TokenKind::Ellipsis,
				TokenKind::Star,
				TokenKind::Ident("T".to_string()),
				TokenKind::RParen,
				TokenKind::Arrow,
				TokenKind::Ellipsis,
				TokenKind::Eof,
			]
		);
	}

	#[test]
	fn lex_quoted_strings_and_floats() {
		assert_eq!(
			kinds("categorical('a\\'b', \"c\", 1.5)"),
			vec![
				TokenKind::Ident("categorical".to_string()),
				TokenKind::LParen,
				TokenKind::String("a'b".to_string()),
				TokenKind::Comma,
				TokenKind::String("c".to_string()),
				TokenKind::Comma,
				TokenKind::Float(1.5),
				TokenKind::RParen,
				TokenKind::Eof,
			]
		);
	}

	#[test]
	fn lex_skips_comments() {
		assert_eq!(
			kinds("int64 # trailing\n"),
			vec![TokenKind::Ident("int64".to_string()), TokenKind::Eof]
		);
	}

	#[test]
	fn lex_rejects_unknown_characters() {
		let err = Lexer::new("2 * int64 $").lex().unwrap_err();
		assert!(err.message.contains("unexpected character"));
	}

	#[test]
	fn lex_rejects_bad_int_underscore_placement() {
		let err = Lexer::new("1__000 * int8").lex().unwrap_err();
		assert!(err.message.contains("invalid integer literal"));
	}
}
