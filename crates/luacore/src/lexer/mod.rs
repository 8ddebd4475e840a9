//! Lexer: byte stream -> token stream.
//!
//! Grounded on spec.md §4.1 and, structurally, on the tokenizer module of
//! the teacher crate (`crates/luars/src/compiler/parser/lua_tokenize.rs`):
//! a single forward-scanning cursor over the source bytes, with long-bracket
//! handling, the four-newline-sequence line counter, and number/string
//! literal sub-scanners.

mod number;
mod string;

pub mod token;

pub use token::{Literal, Token, TokenKind};

use std::fmt;

#[derive(Debug, Clone)]
pub struct LexError {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.column, self.message)
    }
}

pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
    column: u32,
    /// Source name used only for diagnostics constructed by the caller.
    #[allow(dead_code)]
    source_name: String,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a [u8], source_name: impl Into<String>) -> Self {
        let mut start = 0;
        // Shebang stripping: if the very first byte is '#', strip the whole
        // first line (spec.md §4.1). Strings passed to `load` should not go
        // through this path; callers that load raw string chunks should use
        // `Lexer::new_no_shebang`.
        if src.first() == Some(&b'#') {
            while start < src.len() && src[start] != b'\n' && src[start] != b'\r' {
                start += 1;
            }
        }
        Lexer {
            src,
            pos: start,
            line: 1,
            column: 1,
            source_name: source_name.into(),
        }
    }

    pub fn new_no_shebang(src: &'a [u8], source_name: impl Into<String>) -> Self {
        Lexer {
            src,
            pos: 0,
            line: 1,
            column: 1,
            source_name: source_name.into(),
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token()?;
            let is_eof = tok.kind == TokenKind::Eof;
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    pub(super) fn source_bytes(&self) -> &[u8] {
        self.src
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, off: usize) -> Option<u8> {
        self.src.get(self.pos + off).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' || c == b'\r' {
            self.bump_newline(c);
        } else {
            self.column += 1;
        }
        Some(c)
    }

    /// Counts one of `\n \r \r\n \n\r` as exactly one line (spec.md §4.1/§8.9).
    fn bump_newline(&mut self, first: u8) {
        let other = if first == b'\n' { b'\r' } else { b'\n' };
        if self.peek() == Some(other) {
            self.pos += 1;
        }
        self.line += 1;
        self.column = 1;
    }

    fn err(&self, msg: impl Into<String>) -> LexError {
        LexError {
            message: msg.into(),
            line: self.line,
            column: self.column,
        }
    }

    fn skip_trivia(&mut self) -> Result<(), LexError> {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') | Some(0x0B) | Some(0x0C) => {
                    self.pos += 1;
                    self.column += 1;
                }
                Some(b'\n') | Some(b'\r') => {
                    self.advance();
                }
                Some(b'-') if self.peek_at(1) == Some(b'-') => {
                    self.pos += 2;
                    self.column += 2;
                    if self.peek() == Some(b'[') {
                        if let Some(level) = self.long_bracket_level() {
                            self.read_long_bracket(level)?;
                            continue;
                        }
                    }
                    while let Some(c) = self.peek() {
                        if c == b'\n' || c == b'\r' {
                            break;
                        }
                        self.pos += 1;
                        self.column += 1;
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// If positioned at `[=*[`, returns the equals-sign count without
    /// consuming anything on a mismatch.
    fn long_bracket_level(&self) -> Option<usize> {
        if self.peek() != Some(b'[') {
            return None;
        }
        let mut i = self.pos + 1;
        let mut level = 0;
        while self.src.get(i) == Some(&b'=') {
            level += 1;
            i += 1;
        }
        if self.src.get(i) == Some(&b'[') {
            Some(level)
        } else {
            None
        }
    }

    /// Reads `[=*[ ... ]=*]`, positioned at the opening `[`. Returns the raw
    /// byte contents (first newline after the opening bracket stripped).
    fn read_long_bracket(&mut self, level: usize) -> Result<Vec<u8>, LexError> {
        // consume opening `[`, `=`*level, `[`
        for _ in 0..(level + 2) {
            self.advance();
        }
        // strip first immediate newline
        if matches!(self.peek(), Some(b'\n') | Some(b'\r')) {
            self.advance();
        }
        let mut out = Vec::new();
        loop {
            match self.peek() {
                None => return Err(self.err("unfinished long string/comment")),
                Some(b']') => {
                    let mut i = self.pos + 1;
                    let mut eqs = 0;
                    while self.src.get(i) == Some(&b'=') {
                        eqs += 1;
                        i += 1;
                    }
                    if eqs == level && self.src.get(i) == Some(&b']') {
                        for _ in 0..(level + 2) {
                            self.advance();
                        }
                        return Ok(out);
                    }
                    out.push(b']');
                    self.advance();
                }
                Some(c) => {
                    if c == b'\n' || c == b'\r' {
                        out.push(b'\n');
                    } else {
                        out.push(c);
                    }
                    self.advance();
                }
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_trivia()?;
        let line = self.line;
        let column = self.column;
        let Some(c) = self.peek() else {
            return Ok(Token::eof(line, column));
        };

        if c.is_ascii_digit() || (c == b'.' && self.peek_at(1).map_or(false, |d| d.is_ascii_digit())) {
            return number::read_number(self, line, column);
        }
        if c == b'_' || c.is_ascii_alphabetic() {
            return Ok(self.read_name(line, column));
        }
        if c == b'"' || c == b'\'' {
            return string::read_short_string(self, line, column);
        }
        if c == b'[' {
            if let Some(level) = self.long_bracket_level() {
                let bytes = self.read_long_bracket(level)?;
                return Ok(Token {
                    kind: TokenKind::String,
                    lexeme: String::from_utf8_lossy(&bytes).into_owned(),
                    literal: Some(Literal::Str(bytes)),
                    line,
                    column,
                });
            }
        }
        self.read_symbol(line, column)
    }

    fn read_name(&mut self, line: u32, column: u32) -> Token {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == b'_' || c.is_ascii_alphanumeric() {
                self.pos += 1;
                self.column += 1;
            } else {
                break;
            }
        }
        let text = &self.src[start..self.pos];
        let lexeme = String::from_utf8_lossy(text).into_owned();
        if let Some(kw) = TokenKind::keyword_from_str(text) {
            Token {
                kind: kw,
                lexeme,
                literal: None,
                line,
                column,
            }
        } else {
            Token {
                kind: TokenKind::Name,
                lexeme,
                literal: None,
                line,
                column,
            }
        }
    }

    fn read_symbol(&mut self, line: u32, column: u32) -> Result<Token, LexError> {
        macro_rules! tok {
            ($kind:expr, $n:expr) => {{
                let start = self.pos;
                for _ in 0..$n {
                    self.advance();
                }
                let lexeme = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
                Ok(Token {
                    kind: $kind,
                    lexeme,
                    literal: None,
                    line,
                    column,
                })
            }};
        }
        use TokenKind::*;
        let c = self.peek().unwrap();
        let c1 = self.peek_at(1);
        let c2 = self.peek_at(2);
        match (c, c1, c2) {
            (b'.', Some(b'.'), Some(b'.')) => tok!(Ellipsis, 3),
            (b'.', Some(b'.'), _) => tok!(Concat, 2),
            (b'.', _, _) => tok!(Dot, 1),
            (b':', Some(b':'), _) => tok!(DColon, 2),
            (b':', _, _) => tok!(Colon, 1),
            (b'/', Some(b'/'), _) => tok!(DSlash, 2),
            (b'/', _, _) => tok!(Slash, 1),
            (b'=', Some(b'='), _) => tok!(Eq, 2),
            (b'=', _, _) => tok!(Assign, 1),
            (b'~', Some(b'='), _) => tok!(Ne, 2),
            (b'~', _, _) => tok!(Tilde, 1),
            (b'<', Some(b'='), _) => tok!(Le, 2),
            (b'<', Some(b'<'), _) => tok!(LShift, 2),
            (b'<', _, _) => tok!(Lt, 1),
            (b'>', Some(b'='), _) => tok!(Ge, 2),
            (b'>', Some(b'>'), _) => tok!(RShift, 2),
            (b'>', _, _) => tok!(Gt, 1),
            (b'+', _, _) => tok!(Plus, 1),
            (b'-', _, _) => tok!(Minus, 1),
            (b'*', _, _) => tok!(Star, 1),
            (b'%', _, _) => tok!(Percent, 1),
            (b'^', _, _) => tok!(Caret, 1),
            (b'#', _, _) => tok!(Hash, 1),
            (b'&', _, _) => tok!(Amp, 1),
            (b'|', _, _) => tok!(Pipe, 1),
            (b'(', _, _) => tok!(LParen, 1),
            (b')', _, _) => tok!(RParen, 1),
            (b'{', _, _) => tok!(LBrace, 1),
            (b'}', _, _) => tok!(RBrace, 1),
            (b'[', _, _) => tok!(LBracket, 1),
            (b']', _, _) => tok!(RBracket, 1),
            (b';', _, _) => tok!(Semi, 1),
            (b',', _, _) => tok!(Comma, 1),
            _ => {
                if c.is_ascii_graphic() {
                    Err(self.err(format!("unexpected symbol near '{}'", c as char)))
                } else {
                    Err(self.err(format!("unexpected symbol near '<\\{}>'", c)))
                }
            }
        }
    }
}
