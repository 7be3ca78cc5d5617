//! Tokenizer for the textual query language.
//!
//! Hand-rolled scanner with line/column tracking. Tokens borrow their text
//! from the source; string tokens exclude the delimiters and keep escape
//! sequences unprocessed.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Identifier,
    Str,
    Number,
    Dot,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Tilde,
    And,
    Or,
    Not,
    In,
    Contains,
    StartsWith,
    Exists,
    True,
    False,
    Null,
    Asc,
    Desc,
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Eof,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    pub line: u32,
    pub column: u32,
}

/// Saved scanner position, used for parser backtracking and `peek`.
#[derive(Debug, Clone, Copy)]
pub struct LexerState {
    pos: usize,
    line: u32,
    column: u32,
}

pub struct Lexer<'a> {
    source: &'a str,
    pos: usize,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    pub fn checkpoint(&self) -> LexerState {
        LexerState {
            pos: self.pos,
            line: self.line,
            column: self.column,
        }
    }

    pub fn restore(&mut self, state: LexerState) {
        self.pos = state.pos;
        self.line = state.line;
        self.column = state.column;
    }

    /// Next token without consuming it.
    pub fn peek(&mut self) -> Token<'a> {
        let state = self.checkpoint();
        let token = self.next_token();
        self.restore(state);
        token
    }

    pub fn next_token(&mut self) -> Token<'a> {
        self.skip_whitespace();

        let line = self.line;
        let column = self.column;
        let start = self.pos;

        let Some(byte) = self.current() else {
            return Token { kind: TokenKind::Eof, text: "", line, column };
        };

        let kind = match byte {
            b'.' => self.single(TokenKind::Dot),
            b'(' => self.single(TokenKind::LParen),
            b')' => self.single(TokenKind::RParen),
            b'{' => self.single(TokenKind::LBrace),
            b'}' => self.single(TokenKind::RBrace),
            b'[' => self.single(TokenKind::LBracket),
            b']' => self.single(TokenKind::RBracket),
            b',' => self.single(TokenKind::Comma),
            b':' => self.single(TokenKind::Colon),
            b'=' => self.single(TokenKind::Eq),
            b'~' => self.single(TokenKind::Tilde),
            b'!' => {
                self.advance();
                if self.current() == Some(b'=') {
                    self.advance();
                    TokenKind::Ne
                } else {
                    TokenKind::Invalid
                }
            }
            b'>' => {
                self.advance();
                if self.current() == Some(b'=') {
                    self.advance();
                    TokenKind::Gte
                } else {
                    TokenKind::Gt
                }
            }
            b'<' => {
                self.advance();
                if self.current() == Some(b'=') {
                    self.advance();
                    TokenKind::Lte
                } else {
                    TokenKind::Lt
                }
            }
            b'"' | b'\'' => return self.scan_string(byte, line, column),
            b'-' => {
                if self.peek_byte(1).is_some_and(|b| b.is_ascii_digit()) {
                    return self.scan_number(line, column);
                }
                self.advance();
                TokenKind::Invalid
            }
            b'0'..=b'9' => return self.scan_number(line, column),
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => return self.scan_identifier(line, column),
            _ => {
                self.advance();
                TokenKind::Invalid
            }
        };

        Token {
            kind,
            text: &self.source[start..self.pos],
            line,
            column,
        }
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.advance();
        kind
    }

    fn scan_string(&mut self, delim: u8, line: u32, column: u32) -> Token<'a> {
        self.advance(); // opening delimiter
        let content_start = self.pos;
        while let Some(byte) = self.current() {
            if byte == b'\\' {
                self.advance();
                if self.current().is_some() {
                    self.advance();
                }
                continue;
            }
            if byte == delim {
                let text = &self.source[content_start..self.pos];
                self.advance(); // closing delimiter
                return Token { kind: TokenKind::Str, text, line, column };
            }
            self.advance();
        }
        // Ran off the end without a closing delimiter.
        Token {
            kind: TokenKind::Invalid,
            text: &self.source[content_start..self.pos],
            line,
            column,
        }
    }

    fn scan_number(&mut self, line: u32, column: u32) -> Token<'a> {
        let start = self.pos;
        if self.current() == Some(b'-') {
            self.advance();
        }
        while self.current().is_some_and(|b| b.is_ascii_digit()) {
            self.advance();
        }
        // A dot extends the number only when a digit follows, so method
        // chains like `limit(42).skip(5)` and `42.limit` lex cleanly.
        if self.current() == Some(b'.') && self.peek_byte(1).is_some_and(|b| b.is_ascii_digit()) {
            self.advance();
            while self.current().is_some_and(|b| b.is_ascii_digit()) {
                self.advance();
            }
        }
        Token {
            kind: TokenKind::Number,
            text: &self.source[start..self.pos],
            line,
            column,
        }
    }

    fn scan_identifier(&mut self, line: u32, column: u32) -> Token<'a> {
        let start = self.pos;
        while self
            .current()
            .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            self.advance();
        }
        let text = &self.source[start..self.pos];
        Token {
            kind: keyword_kind(text).unwrap_or(TokenKind::Identifier),
            text,
            line,
            column,
        }
    }

    /// Capture a balanced `{ … }` block starting at the next
    /// non-whitespace byte, returning the raw text including both braces.
    /// Braces inside string literals do not count toward the balance.
    /// Returns `None` when the block never closes.
    pub fn capture_balanced_braces(&mut self) -> Option<&'a str> {
        self.skip_whitespace();
        if self.current() != Some(b'{') {
            return None;
        }
        let start = self.pos;
        let mut depth = 0usize;
        while let Some(byte) = self.current() {
            match byte {
                b'{' => {
                    depth += 1;
                    self.advance();
                }
                b'}' => {
                    depth -= 1;
                    self.advance();
                    if depth == 0 {
                        return Some(&self.source[start..self.pos]);
                    }
                }
                b'"' | b'\'' => {
                    let delim = byte;
                    self.advance();
                    while let Some(inner) = self.current() {
                        if inner == b'\\' {
                            self.advance();
                            if self.current().is_some() {
                                self.advance();
                            }
                        } else if inner == delim {
                            self.advance();
                            break;
                        } else {
                            self.advance();
                        }
                    }
                }
                _ => self.advance(),
            }
        }
        None
    }

    fn skip_whitespace(&mut self) {
        while self
            .current()
            .is_some_and(|b| matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
        {
            self.advance();
        }
    }

    fn current(&self) -> Option<u8> {
        self.source.as_bytes().get(self.pos).copied()
    }

    fn peek_byte(&self, offset: usize) -> Option<u8> {
        self.source.as_bytes().get(self.pos + offset).copied()
    }

    fn advance(&mut self) {
        if let Some(byte) = self.current() {
            self.pos += 1;
            if byte == b'\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
    }
}

fn keyword_kind(text: &str) -> Option<TokenKind> {
    let kind = match text {
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "not" => TokenKind::Not,
        "in" => TokenKind::In,
        "contains" => TokenKind::Contains,
        "startsWith" => TokenKind::StartsWith,
        "exists" => TokenKind::Exists,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "null" => TokenKind::Null,
        "asc" => TokenKind::Asc,
        "desc" => TokenKind::Desc,
        "count" => TokenKind::Count,
        "sum" => TokenKind::Sum,
        "avg" => TokenKind::Avg,
        "min" => TokenKind::Min,
        "max" => TokenKind::Max,
        _ => return None,
    };
    Some(kind)
}
