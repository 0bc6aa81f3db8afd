//! Error model: a tag + message pair implementing `Display` and
//! `std::error::Error`.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Lexical,
    Syntactic,
    Compile,
    Runtime,
    StackOverflow,
}

/// One diagnostic. `source_name`/`line` are omitted (`None`) only for
/// errors raised before any source location is known (e.g. a host-side
/// misuse of the stack API outside of a running chunk).
#[derive(Clone, Debug)]
pub struct LuaError {
    pub kind: ErrorKind,
    pub message: String,
    pub source_name: Option<String>,
    pub line: Option<u32>,
}

impl LuaError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        LuaError {
            kind,
            message: message.into(),
            source_name: None,
            line: None,
        }
    }

    pub fn at(mut self, source_name: &str, line: u32) -> Self {
        self.source_name = Some(source_name.to_string());
        self.line = Some(line);
        self
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Runtime, message)
    }

    pub fn compile(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Compile, message)
    }
}

/// `<file>:<line>: <message>`, falling back to a bare message when no
/// location is attached.
impl fmt::Display for LuaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.source_name, self.line) {
            (Some(name), Some(line)) => write!(f, "{}:{}: {}", name, line, self.message),
            _ => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for LuaError {}

pub type LuaResult<T> = Result<T, LuaError>;
