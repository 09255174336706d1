//! Lexer for Kestrel
//!
//! Converts source code into a flat stream of tokens. Comments are kept
//! as `Comment` tokens so positions stay faithful; the parser skips them.

use crate::error::{ErrorKind, KestrelError, Result};
use crate::token::{lookup_keyword, Span, Token, TokenKind};

/// The lexer state
pub struct Lexer<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    current_pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer from source code
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            current_pos: 0,
            line: 1,
            column: 1,
        }
    }

    /// Create a lexer whose line numbers start at `line`
    pub fn at_line(source: &'a str, line: usize) -> Self {
        Self { line, ..Self::new(source) }
    }

    /// Tokenize the entire source
    pub fn tokenize(&mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();

        while let Some(token) = self.next_token()? {
            tracing::trace!(kind = %token.kind, line = token.span.line, "token");
            tokens.push(token);
        }

        // Add EOF token
        tokens.push(Token::new(
            TokenKind::Eof,
            Span::new(self.current_pos, self.current_pos, self.line, self.column),
            String::new(),
        ));

        Ok(tokens)
    }

    /// Get the next token
    fn next_token(&mut self) -> Result<Option<Token>> {
        self.skip_whitespace();

        let Some(&(start_pos, ch)) = self.chars.peek() else {
            return Ok(None);
        };

        let start_line = self.line;
        let start_column = self.column;
        let error_span = |lexer: &Self| {
            Some(Span::new(start_pos, lexer.current_pos, start_line, start_column))
        };

        let kind = match ch {
            // Single character tokens
            '(' => { self.advance(); TokenKind::LeftParen }
            ')' => { self.advance(); TokenKind::RightParen }
            '{' => { self.advance(); TokenKind::LeftBrace }
            '}' => { self.advance(); TokenKind::RightBrace }
            '[' => { self.advance(); TokenKind::LeftBracket }
            ']' => { self.advance(); TokenKind::RightBracket }
            ',' => { self.advance(); TokenKind::Comma }
            ';' => { self.advance(); TokenKind::Semicolon }
            ':' => { self.advance(); TokenKind::Colon }
            '.' => { self.advance(); TokenKind::Dot }

            // Potentially two-character tokens
            '-' => {
                self.advance();
                if self.match_char('>') {
                    TokenKind::Arrow
                } else if self.match_char('=') {
                    TokenKind::MinusEqual
                } else {
                    TokenKind::Minus
                }
            }
            '+' => {
                self.advance();
                if self.match_char('=') { TokenKind::PlusEqual } else { TokenKind::Plus }
            }
            '*' => {
                self.advance();
                if self.match_char('=') { TokenKind::StarEqual } else { TokenKind::Star }
            }
            '%' => {
                self.advance();
                if self.match_char('=') { TokenKind::PercentEqual } else { TokenKind::Percent }
            }
            '/' => {
                self.advance();
                if self.match_char('/') {
                    while let Some(c) = self.peek_char() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                    TokenKind::Comment
                } else if self.match_char('*') {
                    self.scan_block_comment(start_pos, start_line, start_column)?
                } else if self.match_char('=') {
                    TokenKind::SlashEqual
                } else {
                    TokenKind::Slash
                }
            }
            '=' => {
                self.advance();
                if self.match_char('=') { TokenKind::EqualEqual } else { TokenKind::Equal }
            }
            '!' => {
                self.advance();
                if self.match_char('=') { TokenKind::BangEqual } else { TokenKind::Bang }
            }
            '<' => {
                self.advance();
                if self.match_char('=') { TokenKind::LessEqual } else { TokenKind::Less }
            }
            '>' => {
                self.advance();
                if self.match_char('=') { TokenKind::GreaterEqual } else { TokenKind::Greater }
            }

            // Only the doubled forms are valid
            '&' | '|' => {
                self.advance();
                if self.match_char(ch) {
                    if ch == '&' { TokenKind::AndAnd } else { TokenKind::OrOr }
                } else {
                    return Err(KestrelError::new(
                        ErrorKind::UnexpectedCharacter(ch),
                        error_span(self),
                    ));
                }
            }

            // String literals
            '"' | '\'' => self.scan_string(ch)?,

            // f"..." opens an interpolated string rather than an identifier
            'f' if self.fstring_ahead() => self.scan_fstring()?,

            // Number literals
            c if c.is_ascii_digit() => self.scan_number()?,

            // Identifiers and keywords
            c if c.is_alphabetic() || c == '_' => self.scan_identifier(),

            // Unknown character
            _ => {
                self.advance();
                return Err(KestrelError::new(
                    ErrorKind::UnexpectedCharacter(ch),
                    error_span(self),
                ));
            }
        };

        let lexeme = self.source[start_pos..self.current_pos].to_string();

        Ok(Some(Token::new(
            kind,
            Span::new(start_pos, self.current_pos, start_line, start_column),
            lexeme,
        )))
    }

    /// Advance and return the current character
    fn advance(&mut self) -> Option<char> {
        if let Some((pos, ch)) = self.chars.next() {
            self.current_pos = pos + ch.len_utf8();
            if ch == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
            Some(ch)
        } else {
            None
        }
    }

    /// Peek at the next character without advancing
    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, ch)| ch)
    }

    /// The character after the next one
    fn peek_second(&self) -> Option<char> {
        self.source[self.current_pos..].chars().nth(1)
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek_char() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn fstring_ahead(&self) -> bool {
        matches!(self.peek_second(), Some('"') | Some('\''))
    }

    /// Skip whitespace, including newlines
    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek_char() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn scan_block_comment(
        &mut self,
        start_pos: usize,
        start_line: usize,
        start_column: usize,
    ) -> Result<TokenKind> {
        loop {
            match self.advance() {
                Some('*') if self.peek_char() == Some('/') => {
                    self.advance();
                    return Ok(TokenKind::Comment);
                }
                Some(_) => {}
                None => {
                    return Err(KestrelError::new(
                        ErrorKind::UnterminatedComment,
                        Some(Span::new(start_pos, self.current_pos, start_line, start_column)),
                    ))
                }
            }
        }
    }

    /// Scan a string literal. The body is taken verbatim.
    fn scan_string(&mut self, quote: char) -> Result<TokenKind> {
        let start_line = self.line;
        let start_column = self.column;
        let start_pos = self.current_pos;

        // Consume opening quote
        self.advance();

        let mut value = String::new();
        while let Some(c) = self.advance() {
            if c == quote {
                return Ok(TokenKind::String(value));
            }
            value.push(c);
        }

        Err(KestrelError::new(
            ErrorKind::UnterminatedString,
            Some(Span::new(start_pos, self.current_pos, start_line, start_column)),
        ))
    }

    /// Scan an f-string. Quotes nested inside `{ }` belong to the embedded
    /// expression and do not close the literal.
    fn scan_fstring(&mut self) -> Result<TokenKind> {
        let start_line = self.line;
        let start_column = self.column;
        let start_pos = self.current_pos;

        self.advance(); // 'f'
        let Some(quote) = self.advance() else {
            return Err(KestrelError::new(ErrorKind::UnterminatedFString, None));
        };

        let unterminated = |lexer: &Self| {
            KestrelError::new(
                ErrorKind::UnterminatedFString,
                Some(Span::new(start_pos, lexer.current_pos, start_line, start_column)),
            )
        };

        let mut body = String::new();
        let mut depth = 0usize;
        loop {
            let Some(c) = self.advance() else {
                return Err(unterminated(self));
            };
            match c {
                c if c == quote && depth == 0 => return Ok(TokenKind::FString(body)),
                '{' => {
                    depth += 1;
                    body.push(c);
                }
                '}' => {
                    depth = depth.saturating_sub(1);
                    body.push(c);
                }
                '"' | '\'' if depth > 0 => {
                    body.push(c);
                    loop {
                        match self.advance() {
                            Some(inner) => {
                                body.push(inner);
                                if inner == c {
                                    break;
                                }
                            }
                            None => return Err(unterminated(self)),
                        }
                    }
                }
                _ => body.push(c),
            }
        }
    }

    /// Scan a number literal. A trailing `f`/`F` not followed by an
    /// identifier character makes it single precision.
    fn scan_number(&mut self) -> Result<TokenKind> {
        let start = self.current_pos;
        let start_line = self.line;
        let start_column = self.column;

        // Consume digits
        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() {
                self.advance();
            } else {
                break;
            }
        }

        // Check for decimal point followed by a digit
        if self.peek_char() == Some('.') && self.peek_second().is_some_and(|c| c.is_ascii_digit()) {
            self.advance(); // Consume the dot

            while let Some(c) = self.peek_char() {
                if c.is_ascii_digit() {
                    self.advance();
                } else {
                    break;
                }
            }
        }

        let source = self.source;
        let text = &source[start..self.current_pos];
        let invalid = |lexer: &Self| {
            KestrelError::new(
                ErrorKind::InvalidNumber(text.to_string()),
                Some(Span::new(start, lexer.current_pos, start_line, start_column)),
            )
        };

        let suffix = matches!(self.peek_char(), Some('f') | Some('F'))
            && !self
                .peek_second()
                .is_some_and(|c| c.is_alphanumeric() || c == '_');
        if suffix {
            let value = text.parse::<f32>().map_err(|_| invalid(self))?;
            self.advance();
            return Ok(TokenKind::Float(value));
        }

        text.parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| invalid(self))
    }

    /// Scan an identifier or keyword
    fn scan_identifier(&mut self) -> TokenKind {
        let start = self.current_pos;

        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || c == '_' {
                self.advance();
            } else {
                break;
            }
        }

        let source = self.source;
        let text = &source[start..self.current_pos];

        // Check if it's a keyword
        lookup_keyword(text).unwrap_or_else(|| TokenKind::Ident(text.to_string()))
    }
}
