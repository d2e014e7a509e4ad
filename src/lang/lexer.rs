//! Single-pass lexer for the flow dialect.
//!
//! Follows the same shape as a hand-rolled tokenizer over `char_indices`:
//! one forward scan, no regex, spans kept as byte ranges into the original
//! text. Line comments and plain block comments are skipped; `/** ... */`
//! doc comments become tokens because export-kind discovery reads them.

use crate::diagnostics::{Diagnostics, SourceLocation};

use super::token::{Keyword, SourceFile, Span, Token, TokenKind};

pub struct Lexer<'a> {
    file: &'a SourceFile,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    len: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(file: &'a SourceFile) -> Self {
        Self {
            file,
            chars: file.text.char_indices().peekable(),
            len: file.text.len(),
        }
    }

    /// Tokenize the whole file. Lexical problems (unterminated strings or
    /// comments) are recorded and the scan continues, so the parser always
    /// receives an Eof-terminated stream.
    pub fn tokenize(mut self, diagnostics: &mut Diagnostics) -> Vec<Token> {
        let mut tokens = Vec::new();
        while let Some((start, ch)) = self.chars.next() {
            match ch {
                c if c.is_whitespace() => {}
                '/' => match self.chars.peek().map(|&(_, c)| c) {
                    Some('/') => self.skip_line_comment(),
                    Some('*') => {
                        if let Some(token) = self.block_comment(start, diagnostics) {
                            tokens.push(token);
                        }
                    }
                    _ => tokens.push(self.token(TokenKind::Slash, start, start + 1)),
                },
                '"' | '\'' => {
                    if let Some(token) = self.string(start, ch, diagnostics) {
                        tokens.push(token);
                    }
                }
                '`' => {
                    if let Some(token) = self.string(start, '`', diagnostics) {
                        tokens.push(token);
                    }
                }
                c if c.is_ascii_digit() => tokens.push(self.number(start)),
                c if is_ident_start(c) => tokens.push(self.ident(start)),
                '(' => tokens.push(self.token(TokenKind::LParen, start, start + 1)),
                ')' => tokens.push(self.token(TokenKind::RParen, start, start + 1)),
                '{' => tokens.push(self.token(TokenKind::LBrace, start, start + 1)),
                '}' => tokens.push(self.token(TokenKind::RBrace, start, start + 1)),
                '[' => tokens.push(self.token(TokenKind::LBracket, start, start + 1)),
                ']' => tokens.push(self.token(TokenKind::RBracket, start, start + 1)),
                ',' => tokens.push(self.token(TokenKind::Comma, start, start + 1)),
                ';' => tokens.push(self.token(TokenKind::Semi, start, start + 1)),
                ':' => tokens.push(self.token(TokenKind::Colon, start, start + 1)),
                '?' => tokens.push(self.token(TokenKind::Question, start, start + 1)),
                '+' => tokens.push(self.token(TokenKind::Plus, start, start + 1)),
                '-' => tokens.push(self.token(TokenKind::Minus, start, start + 1)),
                '*' => tokens.push(self.token(TokenKind::Star, start, start + 1)),
                '%' => tokens.push(self.token(TokenKind::Percent, start, start + 1)),
                '.' => {
                    if self.eat('.') {
                        if self.eat('.') {
                            tokens.push(self.token(TokenKind::Spread, start, start + 3));
                        } else {
                            self.error(start, "unexpected '..'", diagnostics);
                        }
                    } else {
                        tokens.push(self.token(TokenKind::Dot, start, start + 1));
                    }
                }
                '=' => {
                    if self.eat('=') {
                        if self.eat('=') {
                            tokens.push(self.token(TokenKind::EqEqEq, start, start + 3));
                        } else {
                            tokens.push(self.token(TokenKind::EqEq, start, start + 2));
                        }
                    } else if self.eat('>') {
                        tokens.push(self.token(TokenKind::Arrow, start, start + 2));
                    } else {
                        tokens.push(self.token(TokenKind::Assign, start, start + 1));
                    }
                }
                '!' => {
                    if self.eat('=') {
                        if self.eat('=') {
                            tokens.push(self.token(TokenKind::NotEqEq, start, start + 3));
                        } else {
                            tokens.push(self.token(TokenKind::NotEq, start, start + 2));
                        }
                    } else {
                        tokens.push(self.token(TokenKind::Bang, start, start + 1));
                    }
                }
                '<' => {
                    if self.eat('=') {
                        tokens.push(self.token(TokenKind::Le, start, start + 2));
                    } else {
                        tokens.push(self.token(TokenKind::Lt, start, start + 1));
                    }
                }
                '>' => {
                    if self.eat('=') {
                        tokens.push(self.token(TokenKind::Ge, start, start + 2));
                    } else {
                        tokens.push(self.token(TokenKind::Gt, start, start + 1));
                    }
                }
                '&' => {
                    if self.eat('&') {
                        tokens.push(self.token(TokenKind::AndAnd, start, start + 2));
                    } else {
                        self.error(start, "unexpected '&'", diagnostics);
                    }
                }
                '|' => {
                    if self.eat('|') {
                        tokens.push(self.token(TokenKind::OrOr, start, start + 2));
                    } else {
                        self.error(start, "unexpected '|'", diagnostics);
                    }
                }
                other => {
                    self.error(
                        start,
                        format!("unexpected character '{}'", other),
                        diagnostics,
                    );
                }
            }
        }
        tokens.push(Token::new(TokenKind::Eof, Span::new(self.len, self.len)));
        tokens
    }

    fn token(&self, kind: TokenKind, start: usize, end: usize) -> Token {
        Token::new(kind, Span::new(start, end))
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.chars.peek().map(|&(_, c)| c) == Some(expected) {
            self.chars.next();
            true
        } else {
            false
        }
    }

    fn location(&self, offset: usize) -> SourceLocation {
        self.file.location(offset)
    }

    fn error(
        &self,
        offset: usize,
        message: impl Into<String>,
        diagnostics: &mut Diagnostics,
    ) {
        diagnostics.error(self.location(offset), message);
    }

    fn skip_line_comment(&mut self) {
        for (_, c) in self.chars.by_ref() {
            if c == '\n' {
                break;
            }
        }
    }

    /// `/* ... */` is skipped; `/** ... */` is returned as a doc token.
    fn block_comment(
        &mut self,
        start: usize,
        diagnostics: &mut Diagnostics,
    ) -> Option<Token> {
        self.chars.next(); // consume '*'
        let is_doc = self.chars.peek().map(|&(_, c)| c) == Some('*');
        let body_start = self.chars.peek().map(|&(i, _)| i).unwrap_or(self.len);
        let mut prev = '\0';
        while let Some((i, c)) = self.chars.next() {
            if prev == '*' && c == '/' {
                if is_doc {
                    // strip the leading '*' of '/**' and the trailing '*'
                    let body_end = i.saturating_sub(1).max(body_start + 1);
                    let body = self.file.text[body_start + 1..body_end].to_string();
                    return Some(Token::new(
                        TokenKind::DocComment(body),
                        Span::new(start, i + 1),
                    ));
                }
                return None;
            }
            prev = c;
        }
        self.error(start, "unterminated block comment", diagnostics);
        None
    }

    fn string(
        &mut self,
        start: usize,
        quote: char,
        diagnostics: &mut Diagnostics,
    ) -> Option<Token> {
        let mut value = String::new();
        while let Some((i, c)) = self.chars.next() {
            match c {
                '\\' => {
                    let Some((_, escaped)) = self.chars.next() else {
                        break;
                    };
                    value.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        '0' => '\0',
                        other => other,
                    });
                }
                c if c == quote => {
                    return Some(Token::new(TokenKind::Str(value), Span::new(start, i + 1)));
                }
                '\n' if quote != '`' => {
                    self.error(start, "unterminated string literal", diagnostics);
                    return None;
                }
                other => value.push(other),
            }
        }
        self.error(start, "unterminated string literal", diagnostics);
        None
    }

    fn number(&mut self, start: usize) -> Token {
        let mut end = start + 1;
        let mut seen_dot = false;
        while let Some(&(i, c)) = self.chars.peek() {
            if c.is_ascii_digit() || c == '_' {
                end = i + c.len_utf8();
                self.chars.next();
            } else if c == '.' && !seen_dot {
                // lookahead: `.` must be followed by a digit to belong here
                let rest = &self.file.text[i + 1..];
                if rest.chars().next().map(|d| d.is_ascii_digit()) == Some(true) {
                    seen_dot = true;
                    end = i + 1;
                    self.chars.next();
                } else {
                    break;
                }
            } else {
                break;
            }
        }
        let raw = self.file.text[start..end].to_string();
        Token::new(TokenKind::Number(raw), Span::new(start, end))
    }

    fn ident(&mut self, start: usize) -> Token {
        let mut end = start + 1;
        while let Some(&(i, c)) = self.chars.peek() {
            if is_ident_continue(c) {
                end = i + c.len_utf8();
                self.chars.next();
            } else {
                break;
            }
        }
        let text = &self.file.text[start..end];
        let kind = match Keyword::from_ident(text) {
            Some(kw) => TokenKind::Keyword(kw),
            None => TokenKind::Ident(text.to_string()),
        };
        Token::new(kind, Span::new(start, end))
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}
