use crate::errors::EngineError;

/// Kind of a single DSL token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Eof,
    Var,
    Asgn,
    Dot,
    Ident,
    Reference,
    LParen,
    RParen,
    Number,
    Duration,
    Str,
    Regex,
    Plus,
    Minus,
    Mult,
    Div,
    Not,
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    RegexEqual,
    RegexNotEqual,
    And,
    Or,
    True,
    False,
}

/// One token: kind, byte offset of its first character, and its literal
/// text. String, reference and regex literals include their delimiters so
/// the token stream reconstructs the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: usize,
    pub literal: String,
}

impl Token {
    fn new(kind: TokenKind, pos: usize, literal: impl Into<String>) -> Self {
        Token {
            kind,
            pos,
            literal: literal.into(),
        }
    }
}

/// Single-pass scanner over a DSL source string.
///
/// Regex literals are only recognized immediately after `=~`, `!~` or `=`;
/// anywhere else `/` is the division operator. After the end of input every
/// call returns the EOF token positioned at the source length.
pub struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    // kind of the previously emitted token, for regex context
    prev: Option<TokenKind>,
}

/// Tokenize an entire source string, EOF token included.
pub fn lex(src: &str) -> Result<Vec<Token>, EngineError> {
    let mut lx = Lexer::new(src);
    let mut tokens = Vec::new();
    loop {
        let tok = lx.next_token()?;
        let done = tok.kind == TokenKind::Eof;
        tokens.push(tok);
        if done {
            return Ok(tokens);
        }
    }
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Lexer {
            src,
            pos: 0,
            prev: None,
        }
    }

    /// Produce the next token, skipping whitespace and line comments.
    pub fn next_token(&mut self) -> Result<Token, EngineError> {
        let tok = self.scan()?;
        self.prev = Some(tok.kind);
        Ok(tok)
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek2(&self) -> Option<char> {
        self.rest().chars().nth(1)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn err(&self, pos: usize, msg: impl Into<String>) -> EngineError {
        EngineError::Lex {
            pos,
            msg: msg.into(),
        }
    }

    fn in_regex_context(&self) -> bool {
        matches!(
            self.prev,
            Some(TokenKind::Asgn) | Some(TokenKind::RegexEqual) | Some(TokenKind::RegexNotEqual)
        )
    }

    fn skip_space_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(' ') | Some('\t') | Some('\n') | Some('\r') => {
                    self.bump();
                }
                // `//` opens a comment except where a regex literal is expected
                Some('/') if self.peek2() == Some('/') && !self.in_regex_context() => {
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                _ => return,
            }
        }
    }

    fn scan(&mut self) -> Result<Token, EngineError> {
        self.skip_space_and_comments();
        let start = self.pos;
        let c = match self.peek() {
            Some(c) => c,
            None => return Ok(Token::new(TokenKind::Eof, self.src.len(), "")),
        };
        match c {
            '(' => self.single(TokenKind::LParen),
            ')' => self.single(TokenKind::RParen),
            '.' => self.single(TokenKind::Dot),
            '+' => self.single(TokenKind::Plus),
            '-' => self.single(TokenKind::Minus),
            '*' => self.single(TokenKind::Mult),
            '/' => {
                if self.in_regex_context() {
                    self.scan_regex(start)
                } else {
                    self.single(TokenKind::Div)
                }
            }
            '=' => {
                self.bump();
                match self.peek() {
                    Some('=') => {
                        self.bump();
                        Ok(Token::new(TokenKind::Equal, start, "=="))
                    }
                    Some('~') => {
                        self.bump();
                        Ok(Token::new(TokenKind::RegexEqual, start, "=~"))
                    }
                    _ => Ok(Token::new(TokenKind::Asgn, start, "=")),
                }
            }
            '!' => {
                self.bump();
                match self.peek() {
                    Some('=') => {
                        self.bump();
                        Ok(Token::new(TokenKind::NotEqual, start, "!="))
                    }
                    Some('~') => {
                        self.bump();
                        Ok(Token::new(TokenKind::RegexNotEqual, start, "!~"))
                    }
                    _ => Ok(Token::new(TokenKind::Not, start, "!")),
                }
            }
            '>' => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                    Ok(Token::new(TokenKind::GreaterEqual, start, ">="))
                } else {
                    Ok(Token::new(TokenKind::Greater, start, ">"))
                }
            }
            '<' => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                    Ok(Token::new(TokenKind::LessEqual, start, "<="))
                } else {
                    Ok(Token::new(TokenKind::Less, start, "<"))
                }
            }
            '\'' => self.scan_string(start),
            '"' => self.scan_reference(start),
            '0'..='9' => self.scan_number(start),
            c if c.is_ascii_alphabetic() || c == '_' => self.scan_ident(start),
            c => Err(self.err(start, format!("unexpected character {:?}", c))),
        }
    }

    fn single(&mut self, kind: TokenKind) -> Result<Token, EngineError> {
        let start = self.pos;
        match self.bump() {
            Some(c) => Ok(Token::new(kind, start, c.to_string())),
            None => Err(self.err(start, "unexpected end of input")),
        }
    }

    fn scan_ident(&mut self, start: usize) -> Result<Token, EngineError> {
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.bump();
            } else {
                break;
            }
        }
        let lit = &self.src[start..self.pos];
        let kind = match lit {
            "AND" => TokenKind::And,
            "OR" => TokenKind::Or,
            "TRUE" => TokenKind::True,
            "FALSE" => TokenKind::False,
            "var" => TokenKind::Var,
            _ => TokenKind::Ident,
        };
        Ok(Token::new(kind, start, lit))
    }

    // number := [0-9]+ ('.' [0-9]+)?, optionally followed by a duration
    // unit. A leading '.' is never part of a number; it lexes as Dot.
    fn scan_number(&mut self, start: usize) -> Result<Token, EngineError> {
        while matches!(self.peek(), Some('0'..='9')) {
            self.bump();
        }
        if self.peek() == Some('.') && matches!(self.peek2(), Some('0'..='9')) {
            self.bump();
            while matches!(self.peek(), Some('0'..='9')) {
                self.bump();
            }
        }
        // duration unit, maximal munch: `m` alone is minutes, `ms` is
        // milliseconds
        let kind = match self.peek() {
            Some('u') | Some('µ') | Some('s') | Some('h') | Some('d') | Some('w') => {
                self.bump();
                TokenKind::Duration
            }
            Some('m') => {
                self.bump();
                if self.peek() == Some('s') {
                    self.bump();
                }
                TokenKind::Duration
            }
            _ => TokenKind::Number,
        };
        Ok(Token::new(kind, start, &self.src[start..self.pos]))
    }

    // reference := '"' ... '"' with \" escape; literal keeps the quotes
    fn scan_reference(&mut self, start: usize) -> Result<Token, EngineError> {
        self.bump();
        loop {
            match self.bump() {
                Some('\\') if self.peek() == Some('"') => {
                    self.bump();
                }
                Some('"') => {
                    return Ok(Token::new(
                        TokenKind::Reference,
                        start,
                        &self.src[start..self.pos],
                    ))
                }
                Some(_) => {}
                None => return Err(self.err(start, "unterminated reference")),
            }
        }
    }

    // string := '...' with \' escape, or '''...''' where single quotes
    // need no escaping; the triple form ends at the first ''' not preceded
    // by a backslash
    fn scan_string(&mut self, start: usize) -> Result<Token, EngineError> {
        if self.rest().starts_with("'''") {
            self.pos += 3;
            loop {
                if self.rest().starts_with("'''") && !self.src[..self.pos].ends_with('\\') {
                    self.pos += 3;
                    return Ok(Token::new(
                        TokenKind::Str,
                        start,
                        &self.src[start..self.pos],
                    ));
                }
                if self.bump().is_none() {
                    return Err(self.err(start, "unterminated string"));
                }
            }
        }
        self.bump();
        loop {
            match self.bump() {
                Some('\\') if self.peek() == Some('\'') => {
                    self.bump();
                }
                Some('\'') => {
                    return Ok(Token::new(
                        TokenKind::Str,
                        start,
                        &self.src[start..self.pos],
                    ))
                }
                Some(_) => {}
                None => return Err(self.err(start, "unterminated string")),
            }
        }
    }

    // regex := '/' ... '/' with \/ escape; literal keeps the slashes
    fn scan_regex(&mut self, start: usize) -> Result<Token, EngineError> {
        self.bump();
        loop {
            match self.bump() {
                Some('\\') if self.peek() == Some('/') => {
                    self.bump();
                }
                Some('/') => {
                    return Ok(Token::new(
                        TokenKind::Regex,
                        start,
                        &self.src[start..self.pos],
                    ))
                }
                Some(_) => {}
                None => return Err(self.err(start, "unterminated regex")),
            }
        }
    }
}

/// Strip the delimiters and unescape a string literal.
pub fn unquote_string(literal: &str) -> String {
    let inner = if literal.len() >= 6 && literal.starts_with("'''") && literal.ends_with("'''") {
        &literal[3..literal.len() - 3]
    } else if literal.len() >= 2 {
        &literal[1..literal.len() - 1]
    } else {
        literal
    };
    inner.replace("\\'", "'")
}

/// Strip the quotes and unescape a reference literal.
pub fn unquote_reference(literal: &str) -> String {
    let inner = if literal.len() >= 2 {
        &literal[1..literal.len() - 1]
    } else {
        literal
    };
    inner.replace("\\\"", "\"")
}

/// Strip the slashes and unescape a regex literal.
pub fn unquote_regex(literal: &str) -> String {
    let inner = if literal.len() >= 2 {
        &literal[1..literal.len() - 1]
    } else {
        literal
    };
    inner.replace("\\/", "/")
}

/// Parse a duration literal (`10s`, `42.21m`, `1ms`) into a chrono
/// duration. The literal must already have lexed as a Duration token.
pub fn parse_duration(literal: &str) -> Result<chrono::Duration, EngineError> {
    let unit_start = literal
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .ok_or_else(|| EngineError::Parse {
            pos: 0,
            msg: format!("invalid duration {}", literal),
        })?;
    let (num, unit) = literal.split_at(unit_start);
    let value: f64 = num.parse().map_err(|_| EngineError::Parse {
        pos: 0,
        msg: format!("invalid duration {}", literal),
    })?;
    let nanos = match unit {
        "u" | "µ" => value * 1_000.0,
        "ms" => value * 1_000_000.0,
        "s" => value * 1_000_000_000.0,
        "m" => value * 60.0 * 1_000_000_000.0,
        "h" => value * 3_600.0 * 1_000_000_000.0,
        "d" => value * 86_400.0 * 1_000_000_000.0,
        "w" => value * 7.0 * 86_400.0 * 1_000_000_000.0,
        _ => {
            return Err(EngineError::Parse {
                pos: 0,
                msg: format!("unknown duration unit {}", unit),
            })
        }
    };
    Ok(chrono::Duration::nanoseconds(nanos as i64))
}
