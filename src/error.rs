//! Error handling for the BASIC interpreter.
//!
//! Every phase of the pipeline reports through a single `BasicError` enum
//! so the driver can print all failures the same way. The categories map
//! to the phase where the error can occur:
//!
//! - **Lexical** (`Lex`): illegal characters or malformed literals. These
//!   are non-fatal; the lexer records them and keeps scanning.
//! - **Syntax** (`Syntax`): a malformed numbered line. The parser stops at
//!   the first bad line and the program is never run.
//! - **Runtime** (`Runtime`, `Type`, `Index`, `UndefinedVariable`,
//!   `UndefinedFunction`, `Argument`): raised during execution and
//!   terminate the program with a message naming the line.
//! - **I/O** (`Io`): file system failures, converted from
//!   `std::io::Error` so `?` works on file operations.
//!
//! Errors that carry a source position are echoed through
//! [`SourceReporter`], which prints the offending line and underlines the
//! token span.

use std::error::Error;
use std::fmt;

/// Error type shared by the lexer, parser, tree interpreter and stack VM.
#[derive(Debug, Clone, PartialEq)]
pub enum BasicError {
    /// Illegal character or malformed literal during tokenization.
    Lex(String),

    /// Malformed statement on a numbered line.
    Syntax(String),

    /// General execution failure that fits no narrower category.
    Runtime(String),

    /// Operation applied to a value of the wrong type.
    Type(String),

    /// Array subscript below the configured base or past the allocated
    /// extent.
    Index(String),

    /// Reference to a variable that was never assigned.
    UndefinedVariable(String),

    /// Call to a function that is neither built in nor defined by DEF.
    UndefinedFunction(String),

    /// Built-in or user function called with the wrong arguments.
    Argument(String),

    /// File system or stream failure.
    Io(String),
}

impl fmt::Display for BasicError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BasicError::Lex(msg) => write!(f, "Lexical error: {}", msg),
            BasicError::Syntax(msg) => write!(f, "Syntax error: {}", msg),
            BasicError::Runtime(msg) => write!(f, "Runtime error: {}", msg),
            BasicError::Type(msg) => write!(f, "Type error: {}", msg),
            BasicError::Index(msg) => write!(f, "Index error: {}", msg),
            BasicError::UndefinedVariable(msg) => write!(f, "Undefined variable {}", msg),
            BasicError::UndefinedFunction(msg) => write!(f, "Undefined function {}", msg),
            BasicError::Argument(msg) => write!(f, "Argument error: {}", msg),
            BasicError::Io(msg) => write!(f, "IO error: {}", msg),
        }
    }
}

impl Error for BasicError {}

impl From<std::io::Error> for BasicError {
    fn from(err: std::io::Error) -> Self {
        BasicError::Io(err.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BasicError>;

/// Prints positioned errors together with the source line they point at.
///
/// The reporter holds the full program text. Given a line and column it
/// echoes that line to standard error and underlines the offending span
/// with carets, then prints the message prefixed by the line number.
pub struct SourceReporter<'a> {
    source: &'a str,
}

impl<'a> SourceReporter<'a> {
    pub fn new(source: &'a str) -> Self {
        Self { source }
    }

    /// Reports `message` at the given 1-based line and column, underlining
    /// `width` characters. Falls back to a plain message when the line is
    /// out of range.
    pub fn report(&self, line: usize, column: usize, width: usize, message: &str) {
        match self.source.lines().nth(line.saturating_sub(1)) {
            Some(text) => {
                eprintln!("{}", text);
                let pad = column.saturating_sub(1);
                eprintln!("{}{}", " ".repeat(pad), "^".repeat(width.max(1)));
                eprintln!("{}: {}", line, message);
            }
            None => eprintln!("{}: {}", line, message),
        }
    }
}
