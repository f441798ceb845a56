use log::debug;

use crate::{
    error::{tokenizer_error, Result},
    value::Number,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub token_type: TokenType,
    pub lexeme: String,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenType {
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftSquare,
    RightSquare,

    Comma,
    Dot,
    Colon,
    Semicolon,

    Plus,
    Minus,
    Star,
    Slash,
    Percent,

    Equal,
    Greater,
    Less,

    BangEqual,
    EqualEqual,
    GreaterEqual,
    LessEqual,
    Arrow,
    FatArrow,

    Identifier(String),
    String(String),
    Number(Number),
    Path(String),

    And,
    Or,
    Func,
    Let,
    If,
    Else,
    For,
    While,
    End,
    Return,
    Switch,
    Case,
    Default,
    Try,
    Catch,
    Print,
    In,
    Use,
    As,
    Break,
    Continue,
    True,
    False,
    IntType,
    StringType,

    EOF,
}

impl TokenType {
    pub fn is_keyword(&self) -> bool {
        matches!(
            self,
            TokenType::And
                | TokenType::Or
                | TokenType::Func
                | TokenType::Let
                | TokenType::If
                | TokenType::Else
                | TokenType::For
                | TokenType::While
                | TokenType::End
                | TokenType::Return
                | TokenType::Switch
                | TokenType::Case
                | TokenType::Default
                | TokenType::Try
                | TokenType::Catch
                | TokenType::Print
                | TokenType::In
                | TokenType::Use
                | TokenType::As
                | TokenType::Break
                | TokenType::Continue
                | TokenType::True
                | TokenType::False
                | TokenType::IntType
                | TokenType::StringType
        )
    }
}

enum Scanned {
    Token(TokenType),
    Skip,
    EOF,
}

pub fn tokenize(bytes: &[u8]) -> Result<Vec<Token>> {
    let mut cursor = 0;
    let mut line = 1;
    let mut tokens = Vec::new();

    loop {
        let (bytes_read, scanned) = next_token(&bytes[cursor..], line).inspect_err(|err| {
            debug!("{}", err);
        })?;

        let text = &bytes[cursor..cursor + bytes_read];
        let lexeme = String::from_utf8_lossy(text).trim().to_string();
        let token_line = line;
        line += text.iter().filter(|&&b| b == b'\n').count();
        cursor += bytes_read;

        match scanned {
            Scanned::EOF => {
                tokens.push(Token {
                    token_type: TokenType::EOF,
                    lexeme: String::new(),
                    line,
                });
                debug!("tokenized {} tokens over {} lines", tokens.len(), line);
                return Ok(tokens);
            }
            Scanned::Skip => {}
            Scanned::Token(token_type) => {
                // Leading whitespace may hold newlines; the token sits on the last one.
                let leading_newlines = text
                    .iter()
                    .take_while(|b| b.is_ascii_whitespace())
                    .filter(|&&b| b == b'\n')
                    .count();
                tokens.push(Token {
                    token_type,
                    lexeme,
                    line: token_line + leading_newlines,
                });
            }
        }
    }
}

fn next_token(bytes: &[u8], line: usize) -> Result<(usize, Scanned)> {
    let n = bytes.len();
    let cursor = bytes.iter().take_while(|b| b.is_ascii_whitespace()).count();

    if cursor == n {
        return Ok((cursor, Scanned::EOF));
    }

    let line = line
        + bytes[..cursor]
            .iter()
            .filter(|&&b| b == b'\n')
            .count();

    // Comments
    if bytes[cursor] == b'#' {
        let length = bytes[cursor..]
            .iter()
            .take_while(|&&b| b != b'\n')
            .count();
        return Ok((cursor + length, Scanned::Skip));
    }

    if bytes[cursor..].starts_with(b"/*") {
        return match bytes[cursor + 2..].windows(2).position(|w| w == b"*/") {
            Some(end) => Ok((cursor + 2 + end + 2, Scanned::Skip)),
            None => tokenizer_error("Unterminated block comment", line),
        };
    }

    // Module paths
    if bytes[cursor..].starts_with(b"./") || bytes[cursor..].starts_with(b"../") {
        let length = bytes[cursor..]
            .iter()
            .take_while(|&&b| !b.is_ascii_whitespace() && b != b';')
            .count();
        let path = String::from_utf8_lossy(&bytes[cursor..cursor + length]).to_string();
        return Ok((cursor + length, Scanned::Token(TokenType::Path(path))));
    }

    if cursor + 1 < n {
        let token = match &bytes[cursor..cursor + 2] {
            b"==" => Some(TokenType::EqualEqual),
            b"!=" => Some(TokenType::BangEqual),
            b"<=" => Some(TokenType::LessEqual),
            b">=" => Some(TokenType::GreaterEqual),
            b"->" => Some(TokenType::Arrow),
            b"=>" => Some(TokenType::FatArrow),
            _ => None,
        };

        if let Some(token) = token {
            return Ok((cursor + 2, Scanned::Token(token)));
        }
    }

    // A leading dot followed by a digit starts a number
    let starts_fraction = bytes[cursor] == b'.' && cursor + 1 < n && bytes[cursor + 1].is_ascii_digit();

    let token = match bytes[cursor] {
        b'(' => Some(TokenType::LeftParen),
        b')' => Some(TokenType::RightParen),
        b'{' => Some(TokenType::LeftBrace),
        b'}' => Some(TokenType::RightBrace),
        b'[' => Some(TokenType::LeftSquare),
        b']' => Some(TokenType::RightSquare),
        b',' => Some(TokenType::Comma),
        b'.' if !starts_fraction => Some(TokenType::Dot),
        b':' => Some(TokenType::Colon),
        b';' => Some(TokenType::Semicolon),
        b'+' => Some(TokenType::Plus),
        b'-' => Some(TokenType::Minus),
        b'*' => Some(TokenType::Star),
        b'/' => Some(TokenType::Slash),
        b'%' => Some(TokenType::Percent),
        b'=' => Some(TokenType::Equal),
        b'<' => Some(TokenType::Less),
        b'>' => Some(TokenType::Greater),
        _ => None,
    };

    if let Some(token) = token {
        return Ok((cursor + 1, Scanned::Token(token)));
    }

    if bytes[cursor] == b'"' {
        let start_byte = cursor + 1;
        let mut end_byte = cursor + 1;

        while end_byte < n && bytes[end_byte] != b'"' {
            if bytes[end_byte] == b'\\' {
                end_byte += 1;
            }
            end_byte += 1;
        }

        if end_byte >= n {
            return tokenizer_error("Unterminated string literal", line);
        }

        let raw = String::from_utf8_lossy(&bytes[start_byte..end_byte]);
        let text = match snailquote::unescape(&format!("\"{}\"", raw)) {
            Ok(text) => text,
            Err(_) => return tokenizer_error("Invalid escape sequence in string literal", line),
        };

        return Ok((end_byte + 1, Scanned::Token(TokenType::String(text))));
    }

    if bytes[cursor].is_ascii_digit() || starts_fraction {
        let start_byte = cursor;
        let mut end_byte = cursor;

        while end_byte < n && bytes[end_byte].is_ascii_digit() {
            end_byte += 1;
        }

        if end_byte + 1 < n && bytes[end_byte] == b'.' && bytes[end_byte + 1].is_ascii_digit() {
            end_byte += 1;

            while end_byte < n && bytes[end_byte].is_ascii_digit() {
                end_byte += 1;
            }
        }

        let text = String::from_utf8_lossy(&bytes[start_byte..end_byte]);
        return match Number::parse(&text) {
            Some(number) => Ok((end_byte, Scanned::Token(TokenType::Number(number)))),
            None => tokenizer_error(&format!("Number literal '{}' is out of range", text), line),
        };
    }

    if bytes[cursor].is_ascii_alphabetic() || bytes[cursor] == b'_' {
        let start_byte = cursor;
        let mut end_byte = cursor + 1;

        while end_byte < n && (bytes[end_byte].is_ascii_alphanumeric() || bytes[end_byte] == b'_') {
            end_byte += 1;
        }

        let token = match &bytes[start_byte..end_byte] {
            b"and" => TokenType::And,
            b"or" => TokenType::Or,
            b"func" => TokenType::Func,
            b"let" => TokenType::Let,
            b"if" => TokenType::If,
            b"else" => TokenType::Else,
            b"for" => TokenType::For,
            b"while" => TokenType::While,
            b"end" => TokenType::End,
            b"return" => TokenType::Return,
            b"switch" => TokenType::Switch,
            b"case" => TokenType::Case,
            b"default" => TokenType::Default,
            b"try" => TokenType::Try,
            b"catch" => TokenType::Catch,
            b"print" => TokenType::Print,
            b"in" => TokenType::In,
            b"use" => TokenType::Use,
            b"as" => TokenType::As,
            b"break" => TokenType::Break,
            b"continue" => TokenType::Continue,
            b"True" | b"true" => TokenType::True,
            b"False" | b"false" => TokenType::False,
            b"int" => TokenType::IntType,
            b"string" => TokenType::StringType,
            _ => TokenType::Identifier(
                String::from_utf8_lossy(&bytes[start_byte..end_byte]).to_string(),
            ),
        };

        return Ok((end_byte, Scanned::Token(token)));
    }

    tokenizer_error(
        &format!("Unexpected character '{}'", bytes[cursor].escape_ascii()),
        line,
    )
}
