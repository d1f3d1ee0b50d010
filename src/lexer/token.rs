use std::fmt;

use super::{
    is_operator_char, is_separator_char, Lexer, NumberLiteral, BUILTIN_TYPE_NAMES, RESERVED_WORDS,
};

/// Token category for the materialized stream. The parser never consumes
/// these; they back the `--dump-tokens` mode and the lexer tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Keyword,
    Separator,
    Operator,
    Identifier,
    BoolLiteral,
    IntegerLiteral,
    FloatLiteral,
    StringLiteral,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenKind::Keyword => "keyword",
            TokenKind::Separator => "separator",
            TokenKind::Operator => "operator",
            TokenKind::Identifier => "identifier",
            TokenKind::BoolLiteral => "bool_literal",
            TokenKind::IntegerLiteral => "integer_literal",
            TokenKind::FloatLiteral => "float_literal",
            TokenKind::StringLiteral => "string_literal",
            TokenKind::Eof => "eof",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub spelling: String,
    pub line: u32,
    pub column: u32,
    pub offset: usize,
}

impl Token {
    fn new(kind: TokenKind, spelling: String, at: super::Savepoint) -> Self {
        Self {
            kind,
            spelling,
            line: at.line,
            column: at.column,
            offset: at.offset,
        }
    }
}

impl<'a> Lexer<'a> {
    /// Materializes the next token, or `None` on a byte no token can start
    /// with. Numbers here are unsigned; a leading sign tokenizes as an
    /// operator, so `1+2` is three tokens.
    pub fn next_token(&mut self) -> Option<Token> {
        let at = self.savepoint();

        let Some(first) = self.peek() else {
            return Some(Token::new(TokenKind::Eof, String::new(), at));
        };

        if first.is_ascii_digit() {
            return match self.match_number()? {
                NumberLiteral::Int(text) => Some(Token::new(TokenKind::IntegerLiteral, text, at)),
                NumberLiteral::Float(text) => Some(Token::new(TokenKind::FloatLiteral, text, at)),
            };
        }

        if first == b'"' {
            return Some(Token::new(TokenKind::StringLiteral, self.scan_string(), at));
        }

        if let Some(word) = self.scan_word() {
            let kind = if word == "true" || word == "false" {
                TokenKind::BoolLiteral
            } else if RESERVED_WORDS.contains(&word.as_str())
                || BUILTIN_TYPE_NAMES.contains(&word.as_str())
            {
                TokenKind::Keyword
            } else {
                TokenKind::Identifier
            };
            return Some(Token::new(kind, word, at));
        }

        if is_operator_char(first) {
            let mut spelling = String::new();
            while let Some(c) = self.peek().filter(|&c| is_operator_char(c)) {
                spelling.push(c as char);
                self.advance();
            }
            return Some(Token::new(TokenKind::Operator, spelling, at));
        }

        if is_separator_char(first) {
            self.advance();
            return Some(Token::new(
                TokenKind::Separator,
                (first as char).to_string(),
                at,
            ));
        }

        None
    }

    /// Consumes a double-quoted literal, honoring `\"` escapes. String
    /// literals only exist in the token stream; the grammar has no use for
    /// them.
    fn scan_string(&mut self) -> String {
        let mut spelling = String::new();
        spelling.push('"');
        self.advance();
        let mut escaped = false;
        while let Some(c) = self.advance() {
            spelling.push(c as char);
            if escaped {
                escaped = false;
            } else if c == b'\\' {
                escaped = true;
            } else if c == b'"' {
                break;
            }
        }
        spelling
    }
}
