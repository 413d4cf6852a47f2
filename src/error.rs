use std::fmt;

use thiserror::Error;

/// The error taxonomy. Lower layers surface kinds unchanged; each layer
/// may wrap with context but never swallows a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Corrupt,
    Nomem,
    Syntax,
    Arith,
    DoesntExist,
    AlreadyExists,
    TypeDeser,
    PagerFull,
    PageStackOverflow,
    DuplicateCommit,
    InvalidArgument,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            ErrorKind::Io => "io",
            ErrorKind::Corrupt => "corrupt",
            ErrorKind::Nomem => "nomem",
            ErrorKind::Syntax => "syntax",
            ErrorKind::Arith => "arith",
            ErrorKind::DoesntExist => "doesnt_exist",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::TypeDeser => "type_deser",
            ErrorKind::PagerFull => "pager_full",
            ErrorKind::PageStackOverflow => "page_stack_overflow",
            ErrorKind::DuplicateCommit => "duplicate_commit",
            ErrorKind::InvalidArgument => "invalid_argument",
        };
        write!(f, "{}", s)
    }
}

#[derive(Error, Debug)]
#[error("{kind}: {msg}")]
pub struct DbError {
    kind: ErrorKind,
    msg: String,
}

impl DbError {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            msg: msg.into(),
        }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, msg)
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Corrupt, msg)
    }

    pub fn syntax(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Syntax, msg)
    }

    pub fn arith(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Arith, msg)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Prepend "component/operation" context, keeping the kind.
    pub fn wrap(self, ctx: &str) -> Self {
        Self {
            kind: self.kind,
            msg: format!("{}: {}", ctx, self.msg),
        }
    }

    /// The hash index and rptree treat type deserialization failures as
    /// on-disk corruption.
    pub fn type_deser_to_corrupt(self) -> Self {
        if self.kind == ErrorKind::TypeDeser {
            Self {
                kind: ErrorKind::Corrupt,
                msg: self.msg,
            }
        } else {
            self
        }
    }

    pub fn show_backtrace(&self) {
        log::error!("{}\n{:?}", self, backtrace::Backtrace::new());
    }
}

impl From<std::io::Error> for DbError {
    fn from(e: std::io::Error) -> Self {
        DbError::new(ErrorKind::Io, e.to_string())
    }
}
