use std::fmt;

use crate::span::SourceLocation;

/// The closed set of token kinds the scanner can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Literals
    Integer,
    Float,
    String,
    Identifier,

    // Keywords
    If,
    Else,
    While,
    For,
    Return,
    Function,
    Var,
    Let,
    Const,
    True,
    False,
    Null,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Assign,
    EqualEqual,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    AndAnd,
    OrOr,
    Not,

    // Delimiters
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Semicolon,
    Comma,
    Dot,
    Colon,

    // Sentinels
    Eof,
    Error,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenKind::Integer => "INTEGER",
            TokenKind::Float => "FLOAT",
            TokenKind::String => "STRING",
            TokenKind::Identifier => "IDENTIFIER",
            TokenKind::If => "IF",
            TokenKind::Else => "ELSE",
            TokenKind::While => "WHILE",
            TokenKind::For => "FOR",
            TokenKind::Return => "RETURN",
            TokenKind::Function => "FUNCTION",
            TokenKind::Var => "VAR",
            TokenKind::Let => "LET",
            TokenKind::Const => "CONST",
            TokenKind::True => "TRUE",
            TokenKind::False => "FALSE",
            TokenKind::Null => "NULL",
            TokenKind::Plus => "PLUS",
            TokenKind::Minus => "MINUS",
            TokenKind::Star => "STAR",
            TokenKind::Slash => "SLASH",
            TokenKind::Percent => "PERCENT",
            TokenKind::Assign => "ASSIGN",
            TokenKind::EqualEqual => "EQUAL_EQUAL",
            TokenKind::NotEqual => "NOT_EQUAL",
            TokenKind::Less => "LESS",
            TokenKind::LessEqual => "LESS_EQUAL",
            TokenKind::Greater => "GREATER",
            TokenKind::GreaterEqual => "GREATER_EQUAL",
            TokenKind::AndAnd => "AND",
            TokenKind::OrOr => "OR",
            TokenKind::Not => "NOT",
            TokenKind::LeftParen => "LEFT_PAREN",
            TokenKind::RightParen => "RIGHT_PAREN",
            TokenKind::LeftBrace => "LEFT_BRACE",
            TokenKind::RightBrace => "RIGHT_BRACE",
            TokenKind::LeftBracket => "LEFT_BRACKET",
            TokenKind::RightBracket => "RIGHT_BRACKET",
            TokenKind::Semicolon => "SEMICOLON",
            TokenKind::Comma => "COMMA",
            TokenKind::Dot => "DOT",
            TokenKind::Colon => "COLON",
            TokenKind::Eof => "END_OF_FILE",
            TokenKind::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// One lexical unit. For `Error` tokens the lexeme holds the message;
/// for string literals it holds the unquoted, escape-processed content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub location: SourceLocation,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} {:?}", self.location, self.kind, self.lexeme)
    }
}

/// Scan `source` into tokens, ending with exactly one `Eof`.
///
/// Malformed input never aborts the scan: the offending span becomes an
/// `Error` token and scanning resumes at the next byte. The function is
/// pure, so repeated calls over the same source yield the same stream.
pub fn tokenize(source: &str) -> Vec<Token> {
    let mut lexer = Lexer {
        source: source.as_bytes(),
        offset: 0,
        location: SourceLocation::start(),
    };

    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token();
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            break;
        }
    }
    tokens
}

struct Lexer<'a> {
    source: &'a [u8],
    offset: usize,
    location: SourceLocation,
}

impl Lexer<'_> {
    fn next_token(&mut self) -> Token {
        self.skip_trivia();

        let start = self.location;
        let start_offset = self.offset;

        let byte = match self.advance() {
            Some(byte) => byte,
            None => return self.token(TokenKind::Eof, String::new(), start),
        };

        if is_ident_start(byte) {
            return self.identifier(start, start_offset);
        }
        if byte.is_ascii_digit() {
            return self.number(start, start_offset);
        }
        if byte == b'"' {
            return self.string(start);
        }

        self.operator(byte, start)
    }

    fn identifier(&mut self, start: SourceLocation, start_offset: usize) -> Token {
        while self.peek().is_some_and(is_ident_continue) {
            self.advance();
        }

        let text = self.slice(start_offset);
        let kind = keyword(&text).unwrap_or(TokenKind::Identifier);
        self.token(kind, text, start)
    }

    fn number(&mut self, start: SourceLocation, start_offset: usize) -> Token {
        let mut has_decimal = false;

        while let Some(byte) = self.peek() {
            if byte.is_ascii_digit() {
                self.advance();
            } else if byte == b'.'
                && !has_decimal
                && self.peek_next().is_some_and(|next| next.is_ascii_digit())
            {
                // A single decimal point continues the number; a second
                // one (or a dot with no digit behind it) terminates it.
                has_decimal = true;
                self.advance();
            } else {
                break;
            }
        }

        let kind = if has_decimal {
            TokenKind::Float
        } else {
            TokenKind::Integer
        };
        let text = self.slice(start_offset);
        self.token(kind, text, start)
    }

    fn string(&mut self, start: SourceLocation) -> Token {
        let mut content = Vec::new();

        loop {
            match self.peek() {
                None | Some(b'\n') => {
                    return self.token(TokenKind::Error, "Unterminated string".into(), start);
                }
                Some(b'"') => {
                    self.advance();
                    break;
                }
                Some(b'\\') => {
                    self.advance();
                    let Some(escaped) = self.advance() else {
                        return self.token(TokenKind::Error, "Unterminated string".into(), start);
                    };
                    content.push(match escaped {
                        b'n' => b'\n',
                        b't' => b'\t',
                        b'r' => b'\r',
                        other => other,
                    });
                }
                Some(byte) => {
                    self.advance();
                    content.push(byte);
                }
            }
        }

        let text = String::from_utf8_lossy(&content).into_owned();
        self.token(TokenKind::String, text, start)
    }

    fn operator(&mut self, byte: u8, start: SourceLocation) -> Token {
        // Two-byte operators take precedence over their one-byte prefixes.
        let two_byte = match (byte, self.peek()) {
            (b'=', Some(b'=')) => Some(TokenKind::EqualEqual),
            (b'!', Some(b'=')) => Some(TokenKind::NotEqual),
            (b'<', Some(b'=')) => Some(TokenKind::LessEqual),
            (b'>', Some(b'=')) => Some(TokenKind::GreaterEqual),
            (b'&', Some(b'&')) => Some(TokenKind::AndAnd),
            (b'|', Some(b'|')) => Some(TokenKind::OrOr),
            _ => None,
        };
        if let Some(kind) = two_byte {
            let second = self.advance().unwrap_or_default();
            let text = String::from_utf8_lossy(&[byte, second]).into_owned();
            return self.token(kind, text, start);
        }

        let kind = match byte {
            b'(' => TokenKind::LeftParen,
            b')' => TokenKind::RightParen,
            b'{' => TokenKind::LeftBrace,
            b'}' => TokenKind::RightBrace,
            b'[' => TokenKind::LeftBracket,
            b']' => TokenKind::RightBracket,
            b';' => TokenKind::Semicolon,
            b',' => TokenKind::Comma,
            b'.' => TokenKind::Dot,
            b':' => TokenKind::Colon,
            b'+' => TokenKind::Plus,
            b'-' => TokenKind::Minus,
            b'*' => TokenKind::Star,
            b'/' => TokenKind::Slash,
            b'%' => TokenKind::Percent,
            b'=' => TokenKind::Assign,
            b'<' => TokenKind::Less,
            b'>' => TokenKind::Greater,
            b'!' => TokenKind::Not,
            other => {
                let message = format!("Unexpected character: '{}'", other as char);
                return self.token(TokenKind::Error, message, start);
            }
        };

        self.token(kind, (byte as char).to_string(), start)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(byte) if byte.is_ascii_whitespace() => {
                    self.advance();
                }
                Some(b'/') if self.peek_next() == Some(b'/') => {
                    while self.peek().is_some_and(|byte| byte != b'\n') {
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn token(&self, kind: TokenKind, lexeme: String, location: SourceLocation) -> Token {
        Token {
            kind,
            lexeme,
            location,
        }
    }

    fn slice(&self, start_offset: usize) -> String {
        String::from_utf8_lossy(&self.source[start_offset..self.offset]).into_owned()
    }

    fn peek(&self) -> Option<u8> {
        self.source.get(self.offset).copied()
    }

    fn peek_next(&self) -> Option<u8> {
        self.source.get(self.offset + 1).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.offset += 1;
        self.location.advance(byte);
        Some(byte)
    }
}

fn keyword(text: &str) -> Option<TokenKind> {
    let kind = match text {
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "while" => TokenKind::While,
        "for" => TokenKind::For,
        "return" => TokenKind::Return,
        "function" => TokenKind::Function,
        "var" => TokenKind::Var,
        "let" => TokenKind::Let,
        "const" => TokenKind::Const,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "null" => TokenKind::Null,
        _ => return None,
    };
    Some(kind)
}

fn is_ident_start(byte: u8) -> bool {
    byte.is_ascii_alphabetic() || byte == b'_'
}

fn is_ident_continue(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).iter().map(|token| token.kind).collect()
    }

    #[test]
    fn tokenizes_a_declaration() {
        assert_eq!(
            kinds("var x: int = 42;"),
            vec![
                TokenKind::Var,
                TokenKind::Identifier,
                TokenKind::Colon,
                TokenKind::Identifier,
                TokenKind::Assign,
                TokenKind::Integer,
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn stream_ends_with_exactly_one_eof() {
        let tokens = tokenize("function f() { return; }");
        let eof_count = tokens
            .iter()
            .filter(|token| token.kind == TokenKind::Eof)
            .count();
        assert_eq!(eof_count, 1);
        assert_eq!(tokens.last().map(|token| token.kind), Some(TokenKind::Eof));
        assert!(tokens.iter().all(|token| token.kind != TokenKind::Error));
    }

    #[test]
    fn tokenizing_is_pure() {
        let source = "while (x < 10) { x = x + 1; } // loop";
        assert_eq!(tokenize(source), tokenize(source));
    }

    #[test]
    fn classifies_integers_and_floats() {
        assert_eq!(kinds("12"), vec![TokenKind::Integer, TokenKind::Eof]);
        assert_eq!(kinds("3.14"), vec![TokenKind::Float, TokenKind::Eof]);
    }

    #[test]
    fn second_decimal_point_terminates_the_number() {
        let tokens = tokenize("1.2.3");
        assert_eq!(tokens[0].kind, TokenKind::Float);
        assert_eq!(tokens[0].lexeme, "1.2");
        assert_eq!(tokens[1].kind, TokenKind::Dot);
        assert_eq!(tokens[2].kind, TokenKind::Integer);
    }

    #[test]
    fn trailing_dot_is_not_part_of_the_number() {
        let tokens = tokenize("1.");
        assert_eq!(tokens[0].kind, TokenKind::Integer);
        assert_eq!(tokens[1].kind, TokenKind::Dot);
    }

    #[test]
    fn recognizes_two_byte_operators_first() {
        assert_eq!(
            kinds("== != <= >= && || = < > !"),
            vec![
                TokenKind::EqualEqual,
                TokenKind::NotEqual,
                TokenKind::LessEqual,
                TokenKind::GreaterEqual,
                TokenKind::AndAnd,
                TokenKind::OrOr,
                TokenKind::Assign,
                TokenKind::Less,
                TokenKind::Greater,
                TokenKind::Not,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn keywords_are_not_identifiers() {
        let tokens = tokenize("while whilst");
        assert_eq!(tokens[0].kind, TokenKind::While);
        assert_eq!(tokens[1].kind, TokenKind::Identifier);
        assert_eq!(tokens[1].lexeme, "whilst");
    }

    #[test]
    fn string_lexeme_excludes_quotes_and_processes_escapes() {
        let tokens = tokenize("\"a\\n\\\"b\\\"\"");
        assert_eq!(tokens[0].kind, TokenKind::String);
        assert_eq!(tokens[0].lexeme, "a\n\"b\"");
    }

    #[test]
    fn newline_inside_string_is_an_error() {
        let tokens = tokenize("\"abc\ndef\"");
        assert_eq!(tokens[0].kind, TokenKind::Error);
        assert_eq!(tokens[0].lexeme, "Unterminated string");
    }

    #[test]
    fn end_of_file_inside_string_is_an_error() {
        let tokens = tokenize("\"abc");
        assert_eq!(tokens[0].kind, TokenKind::Error);
        assert_eq!(tokens[0].lexeme, "Unterminated string");
    }

    #[test]
    fn unknown_byte_becomes_an_error_token() {
        let tokens = tokenize("a @ b");
        assert_eq!(tokens[1].kind, TokenKind::Error);
        assert_eq!(tokens[1].lexeme, "Unexpected character: '@'");
        // Scanning continues past the bad byte.
        assert_eq!(tokens[2].kind, TokenKind::Identifier);
    }

    #[test]
    fn lone_ampersand_is_an_error() {
        let tokens = tokenize("a & b");
        assert_eq!(tokens[1].kind, TokenKind::Error);
    }

    #[test]
    fn comments_are_consumed_silently() {
        let tokens = tokenize("// heading\nvar");
        assert_eq!(tokens[0].kind, TokenKind::Var);
        assert_eq!(tokens[0].location.line, 2);
    }

    #[test]
    fn tokens_carry_their_start_location() {
        let tokens = tokenize("var x");
        assert_eq!(tokens[0].location.line, 1);
        assert_eq!(tokens[0].location.column, 1);
        assert_eq!(tokens[1].location.column, 5);
    }
}
