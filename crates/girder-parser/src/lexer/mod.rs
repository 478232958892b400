//! Hand-written scanner producing byte-span tokens.
//!
//! Tokens never copy text: each one is a [`Span`] into the registered
//! content, so the source map can place any token (and any AST node
//! derived from it) back to file, line and column. The scanner also owns
//! pushing line starts into the file's [`LineIndex`] as it encounters
//! newlines, which is what makes location recovery O(log n) later.

mod token;
mod token_kind;

pub use token::Token;
pub use token_kind::TokenKind;

use crate::source::LineIndex;
use crate::span::Span;

pub struct Scanner<'a> {
    content: &'a [u8],
    base: u32,
    line_index: &'a mut LineIndex,

    pos: usize,
    upcoming: Option<Token>,
    newline_count: u32,
    last_token_newline_count: u32,
}

fn is_identifier_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

impl<'a> Scanner<'a> {
    /// `content`, `base` and `line_index` typically come from
    /// [`SourceMap::scan_parts`](crate::SourceMap::scan_parts).
    pub fn new(content: &'a str, base: u32, line_index: &'a mut LineIndex) -> Self {
        assert!(line_index.is_empty(), "source scanned twice?");
        line_index.push_line_start(0);
        Self {
            content: content.as_bytes(),
            base,
            line_index,
            pos: 0,
            upcoming: None,
            newline_count: 0,
            last_token_newline_count: 0,
        }
    }

    /// Text of a token produced by this scanner.
    pub fn text(&self, span: Span) -> &'a str {
        let from = (span.start - self.base) as usize;
        let to = (span.end - self.base) as usize;
        // Safety of from_utf8: spans produced here always cut at token
        // boundaries of the original &str.
        std::str::from_utf8(&self.content[from..to]).unwrap_or("")
    }

    pub fn next_token(&mut self) -> Token {
        if let Some(tok) = self.upcoming.take() {
            return tok;
        }
        self.scan_next()
    }

    pub fn peek(&mut self) -> Token {
        if self.upcoming.is_none() {
            let tok = self.scan_next();
            self.upcoming = Some(tok);
        }
        self.upcoming.unwrap()
    }

    fn span_from(&self, start: usize) -> Span {
        Span::new(self.base + start as u32, self.base + self.pos as u32)
    }

    fn at(&self, pos: usize) -> u8 {
        if pos < self.content.len() {
            self.content[pos]
        } else {
            0
        }
    }

    fn record_newline(&mut self, line_start: usize) {
        self.line_index.push_line_start(line_start as u32);
        self.newline_count += 1;
    }

    fn skip_space(&mut self) {
        let mut in_comment = false;
        while self.pos < self.content.len() {
            let b = self.content[self.pos];
            if !(b.is_ascii_whitespace() || b == b'\\' || b == b'#' || in_comment) {
                break;
            }
            if b == b'#' {
                in_comment = true;
            } else if b == b'\n' {
                self.record_newline(self.pos + 1);
                in_comment = false;
            }
            self.pos += 1;
        }
    }

    // If the very next word is 'in', consume up to after it.
    fn consume_optional_in(&mut self) -> bool {
        let mut run = self.pos;
        while run < self.content.len() && self.content[run].is_ascii_whitespace() {
            if self.content[run] == b'\n' {
                return false; // keyword pairs don't span lines
            }
            run += 1;
        }
        if self.at(run) == b'i' && self.at(run + 1) == b'n' && !is_identifier_byte(self.at(run + 2))
        {
            self.pos = run + 2;
            return true;
        }
        false
    }

    fn handle_string(&mut self) -> Token {
        let start = self.pos;
        if matches!(self.content[self.pos], b'r' | b'R') {
            self.pos += 1;
        }
        let quote = self.content[self.pos];
        self.pos += 1;
        let triple = self.at(self.pos) == quote && self.at(self.pos + 1) == quote;
        if triple {
            self.pos += 2;
        }

        let mut close_quotes_needed = if triple { 3 } else { 1 };
        let mut last_was_escape = false;
        while self.pos < self.content.len() {
            let b = self.content[self.pos];
            if b == quote && !last_was_escape {
                close_quotes_needed -= 1;
                if close_quotes_needed == 0 {
                    break;
                }
            } else {
                close_quotes_needed = if triple { 3 } else { 1 };
            }
            last_was_escape = b == b'\\' && !last_was_escape;
            if b == b'\n' {
                self.record_newline(self.pos + 1);
            }
            self.pos += 1;
        }
        if self.pos >= self.content.len() {
            return Token::new(TokenKind::Error, self.span_from(start));
        }
        self.pos += 1;
        Token::new(TokenKind::StringLiteral, self.span_from(start))
    }

    // Skip a whole `def foo():` block: everything up to the next line that
    // starts without indentation, while still indexing newlines and not
    // being confused by strings or comments containing newlines.
    fn consume_def_block(&mut self, start: usize) -> Token {
        loop {
            while self.pos < self.content.len()
                && !matches!(self.content[self.pos], b'\n' | b'"' | b'\'' | b'#')
            {
                self.pos += 1;
            }
            if self.pos >= self.content.len() {
                return Token::new(TokenKind::Eof, self.span_from(self.content.len()));
            }
            match self.content[self.pos] {
                b'#' => {
                    self.skip_space();
                }
                b'"' | b'\'' => {
                    let tok = self.handle_string();
                    if tok.kind != TokenKind::StringLiteral {
                        return tok;
                    }
                }
                _ => {
                    // At a newline; a following non-space column-0 byte
                    // ends the block.
                    if self.pos + 1 < self.content.len()
                        && !self.content[self.pos + 1].is_ascii_whitespace()
                    {
                        return Token::new(TokenKind::DefBlock, self.span_from(start));
                    }
                    self.pos += 1;
                    self.record_newline(self.pos);
                }
            }
        }
    }

    fn handle_identifier_or_keyword(&mut self) -> Token {
        let start = self.pos;

        // Raw strings r"..." start out looking like an identifier.
        if matches!(self.content[self.pos], b'r' | b'R')
            && matches!(self.at(self.pos + 1), b'"' | b'\'')
        {
            return self.handle_string();
        }

        if !is_identifier_byte(self.content[self.pos]) {
            self.pos += 1;
            return Token::new(TokenKind::Error, self.span_from(start));
        }
        while self.pos < self.content.len() && is_identifier_byte(self.content[self.pos]) {
            self.pos += 1;
        }
        let text = &self.content[start..self.pos];

        let kind = match text {
            b"not" => {
                if self.consume_optional_in() {
                    TokenKind::NotIn
                } else {
                    TokenKind::Not
                }
            }
            b"in" => TokenKind::In,
            b"for" => TokenKind::For,
            b"and" => TokenKind::And,
            b"or" => TokenKind::Or,
            b"if" => TokenKind::If,
            b"else" => TokenKind::Else,
            b"def" => return self.consume_def_block(start),
            _ => TokenKind::Identifier,
        };
        Token::new(kind, self.span_from(start))
    }

    fn handle_number(&mut self) -> Token {
        let start = self.pos;
        let first = self.content[self.pos];
        self.pos += 1;

        let mut is_digit: fn(u8) -> bool = |b| b.is_ascii_digit();
        if first == b'0' {
            match self.at(self.pos) {
                b'x' | b'X' => {
                    is_digit = |b| b.is_ascii_hexdigit();
                    self.pos += 1;
                }
                b'o' | b'O' => {
                    self.pos += 1; // octal digits validated on conversion
                }
                _ => {}
            }
        }

        let mut dot_seen = false;
        while self.pos < self.content.len()
            && (is_digit(self.content[self.pos]) || self.content[self.pos] == b'.')
        {
            if self.content[self.pos] == b'.' {
                if dot_seen {
                    return Token::new(TokenKind::Error, self.span_from(start));
                }
                dot_seen = true;
            }
            self.pos += 1;
        }
        Token::new(TokenKind::NumberLiteral, self.span_from(start))
    }

    // '=', '<', '>' and their '='-suffixed or doubled forms.
    fn handle_relational_or_shift(&mut self) -> Token {
        let start = self.pos;
        let first = self.content[self.pos];
        self.pos += 1;
        let kind = match (first, self.at(self.pos)) {
            (b'=', b'=') => {
                self.pos += 1;
                TokenKind::EqEq
            }
            (b'<', b'=') => {
                self.pos += 1;
                TokenKind::Le
            }
            (b'>', b'=') => {
                self.pos += 1;
                TokenKind::Ge
            }
            (b'<', b'<') => {
                self.pos += 1;
                TokenKind::ShiftLeft
            }
            (b'>', b'>') => {
                self.pos += 1;
                TokenKind::ShiftRight
            }
            (b'=', _) => TokenKind::Assign,
            (b'<', _) => TokenKind::Lt,
            _ => TokenKind::Gt,
        };
        Token::new(kind, self.span_from(start))
    }

    fn scan_next(&mut self) -> Token {
        self.skip_space();

        let mut result = if self.pos >= self.content.len() {
            Token::new(TokenKind::Eof, self.span_from(self.content.len()))
        } else {
            let start = self.pos;
            match self.content[self.pos] {
                b'(' => self.single_byte(TokenKind::LParen),
                b')' => self.single_byte(TokenKind::RParen),
                b'[' => self.single_byte(TokenKind::LBracket),
                b']' => self.single_byte(TokenKind::RBracket),
                b'{' => self.single_byte(TokenKind::LBrace),
                b'}' => self.single_byte(TokenKind::RBrace),
                b',' => self.single_byte(TokenKind::Comma),
                b':' => self.single_byte(TokenKind::Colon),
                b'+' => self.single_byte(TokenKind::Plus),
                b'-' => self.single_byte(TokenKind::Minus),
                b'*' => self.single_byte(TokenKind::Star),
                b'.' => self.single_byte(TokenKind::Dot),
                b'%' => self.single_byte(TokenKind::Percent),
                b'|' => self.single_byte(TokenKind::Pipe),
                b'/' => {
                    self.pos += 1;
                    if self.at(self.pos) == b'/' {
                        self.pos += 1;
                        Token::new(TokenKind::FloorDiv, self.span_from(start))
                    } else {
                        Token::new(TokenKind::Slash, self.span_from(start))
                    }
                }
                b'!' => {
                    self.pos += 1;
                    if self.at(self.pos) == b'=' {
                        self.pos += 1;
                        Token::new(TokenKind::NotEq, self.span_from(start))
                    } else {
                        Token::new(TokenKind::Bang, self.span_from(start))
                    }
                }
                b'<' | b'>' | b'=' => self.handle_relational_or_shift(),
                b'0'..=b'9' => self.handle_number(),
                b'"' | b'\'' => self.handle_string(),
                _ => self.handle_identifier_or_keyword(),
            }
        };

        result.newline_since_last = self.last_token_newline_count != self.newline_count;
        self.last_token_newline_count = self.newline_count;
        result
    }

    fn single_byte(&mut self, kind: TokenKind) -> Token {
        let start = self.pos;
        self.pos += 1;
        Token::new(kind, self.span_from(start))
    }
}
