//! Lexical analyzer for BASIC source programs.
//!
//! Converts raw source text into a stream of typed tokens that the parser
//! turns into a line-numbered program. The scanner walks the input one
//! character at a time with a small amount of lookahead.
//!
//! ## Token classes
//!
//! - **Literals**: integers (`42`), floats (`3.14`, `.5`, `2E3`), strings
//!   (`"HELLO"`, no embedded quotes or escapes)
//! - **Identifiers**: a letter plus trailing alphanumerics, optionally
//!   ending in `$` for string variables (`A`, `B2`, `N$`)
//! - **Function names**: `FN` followed by a letter (`FNA`, also `FN A`)
//! - **Built-ins**: the fixed set `SIN COS TAN ATN EXP ABS LOG SQR INT
//!   RND TAB DEG PI TIME LEN LEFT$ MID$ RIGHT$ CHR$`
//! - **Keywords**: `LET READ DATA PRINT GOTO IF THEN FOR NEXT TO STEP END
//!   STOP DEF GOSUB DIM REM RETURN INPUT RESTORE`
//! - **Operators**: `= < <= > >= <>` and `+ - * / ^ % ( ) , ; :`
//! - **Layout**: newlines are emitted as explicit separator tokens because
//!   statements are line-addressed; runs of blank lines collapse to one
//!
//! Keywords, built-ins, identifiers and function names are
//! case-insensitive and normalized to upper case. `REM` consumes the rest
//! of its line and yields a single token carrying the remark text.
//!
//! ## Error handling
//!
//! Illegal characters and malformed literals are recorded with their line
//! number and skipped; scanning continues with the next character. The
//! driver decides what to do with the collected errors.

use crate::error::BasicError;
use std::fmt;

/// Names dispatched through the built-in function registry.
pub const BUILTIN_NAMES: &[&str] = &[
    "SIN", "COS", "TAN", "ATN", "EXP", "ABS", "LOG", "SQR", "INT", "RND", "TAB", "DEG", "PI",
    "TIME", "LEN", "LEFT$", "MID$", "RIGHT$", "CHR$",
];

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    Integer(i64),
    Float(f64),
    Str(String),

    // Names
    Ident(String),
    Fname(String),
    Bltin(String),

    // Keywords
    Let,
    Read,
    Data,
    Print,
    Goto,
    If,
    Then,
    For,
    Next,
    To,
    Step,
    End,
    Stop,
    Def,
    Gosub,
    Dim,
    Return,
    Input,
    Restore,

    /// REM together with the text of the remark.
    Rem(String),

    // Relational operators
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,

    // Arithmetic and punctuation
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Percent,
    LeftParen,
    RightParen,
    Comma,
    Semicolon,
    Colon,

    // Layout
    Newline,
    Eof,
}

impl TokenKind {
    /// Category name used by the lex dump.
    pub fn type_name(&self) -> &'static str {
        match self {
            TokenKind::Integer(_) => "INTEGER",
            TokenKind::Float(_) => "FLOAT",
            TokenKind::Str(_) => "STRING",
            TokenKind::Ident(_) => "IDENT",
            TokenKind::Fname(_) => "FNAME",
            TokenKind::Bltin(_) => "BLTIN",
            TokenKind::Let => "LET",
            TokenKind::Read => "READ",
            TokenKind::Data => "DATA",
            TokenKind::Print => "PRINT",
            TokenKind::Goto => "GOTO",
            TokenKind::If => "IF",
            TokenKind::Then => "THEN",
            TokenKind::For => "FOR",
            TokenKind::Next => "NEXT",
            TokenKind::To => "TO",
            TokenKind::Step => "STEP",
            TokenKind::End => "END",
            TokenKind::Stop => "STOP",
            TokenKind::Def => "DEF",
            TokenKind::Gosub => "GOSUB",
            TokenKind::Dim => "DIM",
            TokenKind::Return => "RETURN",
            TokenKind::Input => "INPUT",
            TokenKind::Restore => "RESTORE",
            TokenKind::Rem(_) => "REM",
            TokenKind::Equal => "=",
            TokenKind::NotEqual => "NE",
            TokenKind::Less => "LT",
            TokenKind::LessEqual => "LE",
            TokenKind::Greater => "GT",
            TokenKind::GreaterEqual => "GE",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Caret => "^",
            TokenKind::Percent => "%",
            TokenKind::LeftParen => "(",
            TokenKind::RightParen => ")",
            TokenKind::Comma => ",",
            TokenKind::Semicolon => ";",
            TokenKind::Colon => ":",
            TokenKind::Newline => "NEWLINE",
            TokenKind::Eof => "EOF",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TokenKind::Integer(n) => write!(f, "{}", n),
            TokenKind::Float(x) => write!(f, "{}", x),
            TokenKind::Str(s) => write!(f, "\"{}\"", s),
            TokenKind::Ident(s) | TokenKind::Fname(s) | TokenKind::Bltin(s) => write!(f, "{}", s),
            TokenKind::Rem(s) => write!(f, "REM {}", s),
            TokenKind::Newline => write!(f, "\\n"),
            other => write!(f, "{}", other.type_name()),
        }
    }
}

/// A token together with its 1-based source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

impl Token {
    /// Printed width of the lexeme, used for caret underlining.
    pub fn width(&self) -> usize {
        self.kind.to_string().chars().count()
    }
}

/// Character scanner producing the token stream.
pub struct Lexer {
    input: Vec<char>,
    position: usize,
    line: usize,
    column: usize,
    errors: Vec<BasicError>,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            position: 0,
            line: 1,
            column: 1,
            errors: Vec::new(),
        }
    }

    /// Tokenizes the whole input, ending with an `Eof` token.
    ///
    /// Lexical errors do not stop the scan; they are collected and can be
    /// retrieved with [`Lexer::take_errors`] afterwards.
    pub fn tokenize(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();

        loop {
            match self.next_token() {
                Ok(token) => {
                    let done = token.kind == TokenKind::Eof;
                    tokens.push(token);
                    if done {
                        break;
                    }
                }
                Err(err) => self.errors.push(err),
            }
        }

        tokens
    }

    /// Lexical errors collected during the last `tokenize` call.
    pub fn take_errors(&mut self) -> Vec<BasicError> {
        std::mem::take(&mut self.errors)
    }

    fn next_token(&mut self) -> Result<Token, BasicError> {
        self.skip_whitespace();

        let line = self.line;
        let column = self.column;

        if self.is_at_end() {
            return Ok(Token {
                kind: TokenKind::Eof,
                line,
                column,
            });
        }

        let c = self.advance();

        let kind = match c {
            '\n' => {
                self.line += 1;
                self.column = 1;
                // Collapse blank lines into a single separator.
                loop {
                    match self.peek() {
                        ' ' | '\t' | '\r' => {
                            self.advance();
                        }
                        '\n' => {
                            self.advance();
                            self.line += 1;
                            self.column = 1;
                        }
                        _ => break,
                    }
                }
                TokenKind::Newline
            }
            '(' => TokenKind::LeftParen,
            ')' => TokenKind::RightParen,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            ':' => TokenKind::Colon,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '^' => TokenKind::Caret,
            '%' => TokenKind::Percent,
            '=' => TokenKind::Equal,
            '<' => match self.peek() {
                '=' => {
                    self.advance();
                    TokenKind::LessEqual
                }
                '>' => {
                    self.advance();
                    TokenKind::NotEqual
                }
                _ => TokenKind::Less,
            },
            '>' => {
                if self.peek() == '=' {
                    self.advance();
                    TokenKind::GreaterEqual
                } else {
                    TokenKind::Greater
                }
            }
            '"' => self.string_literal(line, column)?,
            c if c.is_ascii_digit() => self.number_literal(c, line, column)?,
            '.' if self.peek().is_ascii_digit() => self.number_literal('.', line, column)?,
            c if c.is_ascii_alphabetic() => self.word(c),
            _ => {
                return Err(BasicError::Lex(format!(
                    "Illegal character '{}' at line {}, column {}",
                    c, line, column
                )));
            }
        };

        Ok(Token { kind, line, column })
    }

    /// Scans a string literal. The opening quote is already consumed.
    /// Strings have no escape sequences and may not span lines.
    fn string_literal(&mut self, line: usize, column: usize) -> Result<TokenKind, BasicError> {
        let mut value = String::new();

        loop {
            if self.is_at_end() || self.peek() == '\n' {
                return Err(BasicError::Lex(format!(
                    "Unterminated string at line {}, column {}",
                    line, column
                )));
            }
            let c = self.advance();
            if c == '"' {
                break;
            }
            value.push(c);
        }

        Ok(TokenKind::Str(value))
    }

    /// Scans a numeric literal. Integers and floats are distinct token
    /// kinds; a fraction or exponent makes the literal a float.
    fn number_literal(
        &mut self,
        first: char,
        line: usize,
        column: usize,
    ) -> Result<TokenKind, BasicError> {
        let mut value = String::from(first);
        let mut is_float = first == '.';

        while self.peek().is_ascii_digit() {
            value.push(self.advance());
        }

        if !is_float && self.peek() == '.' && self.peek_next().is_ascii_digit() {
            is_float = true;
            value.push(self.advance());
            while self.peek().is_ascii_digit() {
                value.push(self.advance());
            }
        }

        if matches!(self.peek(), 'e' | 'E') {
            let mut ahead = self.position + 1;
            if matches!(self.input.get(ahead).copied(), Some('+' | '-')) {
                ahead += 1;
            }
            if matches!(self.input.get(ahead), Some(d) if d.is_ascii_digit()) {
                is_float = true;
                value.push(self.advance());
                if matches!(self.peek(), '+' | '-') {
                    value.push(self.advance());
                }
                while self.peek().is_ascii_digit() {
                    value.push(self.advance());
                }
            }
        }

        if is_float {
            match value.parse::<f64>() {
                Ok(x) => Ok(TokenKind::Float(x)),
                Err(_) => Err(BasicError::Lex(format!(
                    "Invalid number '{}' at line {}, column {}",
                    value, line, column
                ))),
            }
        } else {
            match value.parse::<i64>() {
                Ok(n) => Ok(TokenKind::Integer(n)),
                Err(_) => Err(BasicError::Lex(format!(
                    "Invalid number '{}' at line {}, column {}",
                    value, line, column
                ))),
            }
        }
    }

    /// Scans an identifier, keyword, built-in name or function name. The
    /// whole language is case-insensitive, so words are normalized to
    /// upper case before classification.
    fn word(&mut self, first: char) -> TokenKind {
        let mut value = String::from(first);

        while self.peek().is_ascii_alphanumeric() {
            value.push(self.advance());
        }
        if self.peek() == '$' {
            value.push(self.advance());
        }

        let upper = value.to_ascii_uppercase();

        if upper == "REM" {
            return TokenKind::Rem(self.remark_text());
        }

        match upper.as_str() {
            "LET" => TokenKind::Let,
            "READ" => TokenKind::Read,
            "DATA" => TokenKind::Data,
            "PRINT" => TokenKind::Print,
            "GOTO" => TokenKind::Goto,
            "IF" => TokenKind::If,
            "THEN" => TokenKind::Then,
            "FOR" => TokenKind::For,
            "NEXT" => TokenKind::Next,
            "TO" => TokenKind::To,
            "STEP" => TokenKind::Step,
            "END" => TokenKind::End,
            "STOP" => TokenKind::Stop,
            "DEF" => TokenKind::Def,
            "GOSUB" => TokenKind::Gosub,
            "DIM" => TokenKind::Dim,
            "RETURN" => TokenKind::Return,
            "INPUT" => TokenKind::Input,
            "RESTORE" => TokenKind::Restore,
            _ if BUILTIN_NAMES.contains(&upper.as_str()) => TokenKind::Bltin(upper),
            _ if upper.len() == 3
                && upper.starts_with("FN")
                && upper.as_bytes()[2].is_ascii_alphabetic() =>
            {
                TokenKind::Fname(upper)
            }
            "FN" => {
                // "FN A" with a single blank before the letter.
                if self.peek() == ' '
                    && self
                        .peek_next()
                        .is_ascii_alphabetic()
                {
                    self.advance();
                    let letter = self.advance().to_ascii_uppercase();
                    TokenKind::Fname(format!("FN{}", letter))
                } else {
                    TokenKind::Ident(upper)
                }
            }
            _ => TokenKind::Ident(upper),
        }
    }

    /// Consumes the remark text through the end of the line, leaving the
    /// newline itself for the normal scan.
    fn remark_text(&mut self) -> String {
        let mut text = String::new();
        while !self.is_at_end() && self.peek() != '\n' {
            text.push(self.advance());
        }
        text.trim().to_string()
    }

    fn skip_whitespace(&mut self) {
        while !self.is_at_end() {
            match self.peek() {
                ' ' | '\r' | '\t' => {
                    self.advance();
                }
                _ => break,
            }
        }
    }

    fn is_at_end(&self) -> bool {
        self.position >= self.input.len()
    }

    fn advance(&mut self) -> char {
        if !self.is_at_end() {
            self.column += 1;
            let c = self.input[self.position];
            self.position += 1;
            c
        } else {
            '\0'
        }
    }

    fn peek(&self) -> char {
        if self.is_at_end() {
            '\0'
        } else {
            self.input[self.position]
        }
    }

    fn peek_next(&self) -> char {
        if self.position + 1 >= self.input.len() {
            '\0'
        } else {
            self.input[self.position + 1]
        }
    }
}
