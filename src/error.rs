use crate::tokenizer::Token;
use std::fmt::{self, Display, Formatter};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    IO(#[from] std::io::Error),
    #[error("tokenizer error: {message} (line {line})")]
    Tokenizer { message: String, line: usize },
    #[error("parser error: {message} (line {line})")]
    Parser { message: String, line: usize },
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Safety(#[from] SafetyError),
}

pub type Result<T> = std::result::Result<T, Error>;

pub fn tokenizer_error<T>(message: &str, line: usize) -> Result<T> {
    Err(Error::Tokenizer {
        message: message.to_string(),
        line,
    })
}

pub fn parser_error<T>(message: &str, token: &Token) -> Result<T> {
    let message = if token.lexeme.is_empty() {
        format!("{} at end of input", message)
    } else {
        format!("{}, found '{}'", message, token.lexeme)
    };

    Err(Error::Parser {
        message,
        line: token.line,
    })
}

pub fn runtime_error<T>(error: RuntimeError) -> Result<T> {
    Err(Error::Runtime(error))
}

/// Errors raised while evaluating a program. All of them except
/// [`RuntimeError::BadMemory`] can be caught with `try`/`catch`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("Division by zero")]
    DivisionByZero { line: usize },
    #[error("Modulo by zero")]
    ModuloByZero { line: usize },
    #[error("Undefined variable '{name}'")]
    UndefinedVariable { name: String, line: usize },
    #[error("Type mismatch: {message}")]
    TypeMismatch { message: String, line: usize },
    #[error("Invalid operation: {message}")]
    InvalidOperation { message: String, line: usize },
    #[error("Maximum call depth of {limit} exceeded")]
    Recursion { limit: usize, line: usize },
    #[error("Function call failed: {message}")]
    FunctionCall { message: String, line: usize },
    #[error("Internal state corrupted: {message}")]
    BadMemory { message: String, line: usize },
    #[error("Failed to read input")]
    InputFailed { line: usize },
    #[error("Invalid input: {message}")]
    InvalidInput { message: String, line: usize },
}

impl RuntimeError {
    pub fn line(&self) -> usize {
        match self {
            RuntimeError::DivisionByZero { line }
            | RuntimeError::ModuloByZero { line }
            | RuntimeError::UndefinedVariable { line, .. }
            | RuntimeError::TypeMismatch { line, .. }
            | RuntimeError::InvalidOperation { line, .. }
            | RuntimeError::Recursion { line, .. }
            | RuntimeError::FunctionCall { line, .. }
            | RuntimeError::BadMemory { line, .. }
            | RuntimeError::InputFailed { line }
            | RuntimeError::InvalidInput { line, .. } => *line,
        }
    }

    /// The short lowercase text bound to a `catch` variable.
    pub fn description(&self) -> &'static str {
        match self {
            RuntimeError::DivisionByZero { .. } => "division by zero",
            RuntimeError::ModuloByZero { .. } => "modulo by zero",
            RuntimeError::UndefinedVariable { .. } => "undefined variable",
            RuntimeError::TypeMismatch { .. } => "type mismatch",
            RuntimeError::InvalidOperation { .. } => "invalid operation",
            RuntimeError::Recursion { .. } => "maximum recursion depth exceeded",
            RuntimeError::FunctionCall { .. } => "function call failed",
            RuntimeError::BadMemory { .. } => "bad memory access",
            RuntimeError::InputFailed { .. } => "input failed",
            RuntimeError::InvalidInput { .. } => "invalid input",
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            RuntimeError::DivisionByZero { .. } => ErrorCode::error(Subsystem::Math, 0x01),
            RuntimeError::ModuloByZero { .. } => ErrorCode::error(Subsystem::Math, 0x02),
            RuntimeError::UndefinedVariable { .. } => ErrorCode::error(Subsystem::Runtime, 0x03),
            RuntimeError::TypeMismatch { .. } => ErrorCode::error(Subsystem::Type, 0x04),
            RuntimeError::InvalidOperation { .. } => ErrorCode::error(Subsystem::Runtime, 0x05),
            RuntimeError::Recursion { .. } => ErrorCode::error(Subsystem::Runtime, 0x06),
            RuntimeError::FunctionCall { .. } => ErrorCode::error(Subsystem::Runtime, 0x07),
            RuntimeError::BadMemory { .. } => ErrorCode {
                severity: Severity::Fatal,
                subsystem: Subsystem::Runtime,
                code: 0x08,
            },
            RuntimeError::InputFailed { .. } => ErrorCode::error(Subsystem::Io, 0x09),
            RuntimeError::InvalidInput { .. } => ErrorCode::error(Subsystem::Io, 0x0A),
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.code().severity == Severity::Fatal
    }
}

/// Raised by the loop-safety manager. These end the offending loop but are
/// never visible to `try`/`catch`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SafetyError {
    #[error("Loop exceeded the maximum of {limit} iterations")]
    IterationLimit { limit: u64, line: usize },
    #[error("Loop nesting exceeded the maximum depth of {limit}")]
    DepthExceeded { limit: usize, line: usize },
}

impl SafetyError {
    pub fn line(&self) -> usize {
        match self {
            SafetyError::IterationLimit { line, .. } | SafetyError::DepthExceeded { line, .. } => {
                *line
            }
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            SafetyError::IterationLimit { .. } => ErrorCode::error(Subsystem::Runtime, 0x0B),
            SafetyError::DepthExceeded { .. } => ErrorCode::error(Subsystem::Runtime, 0x0C),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error = 0x2,
    Fatal = 0xF,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsystem {
    Runtime = 0x0,
    Math = 0x1,
    Type = 0x2,
    Io = 0x4,
}

/// Compact `{severity, subsystem, code}` triple used in structured log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode {
    pub severity: Severity,
    pub subsystem: Subsystem,
    pub code: u8,
}

impl ErrorCode {
    fn error(subsystem: Subsystem, code: u8) -> Self {
        ErrorCode {
            severity: Severity::Error,
            subsystem,
            code,
        }
    }

    pub fn packed(&self) -> u32 {
        ((self.severity as u32) << 16) | ((self.subsystem as u32) << 8) | self.code as u32
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "E{:05X}", self.packed())
    }
}
