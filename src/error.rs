//! Error types
//!
//! Three layers, matching where a failure is detected:
//! - [`ExprError`]: packet definition and production errors (before any I/O)
//! - [`CodecError`]: framing violations while collecting a stream
//! - [`Error`]: everything a handler or the multiplexer can report

use std::io;

use mio::Token;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("framing error: {0}")]
    Codec(#[from] CodecError),

    #[error("packet definition error: {0}")]
    Expr(#[from] ExprError),

    /// Data was offered to a handler that is closing or closed.
    #[error("handler is closed")]
    Closed,

    #[error("no handler registered for {0:?}")]
    UnknownToken(Token),

    #[error("handler {0:?} has a different type")]
    HandlerType(Token),
}

/// Runtime framing violations raised by collectors.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The inner collector of a delimited collector needed more than its limit.
    #[error("inner collector needs more than {limit} bytes")]
    LimitExceeded { limit: usize },

    /// The stream ended in the middle of a value.
    #[error("stream ended after {received} of {expected} bytes")]
    Truncated { received: usize, expected: usize },

    #[error("line exceeds {max_len} bytes without delimiter")]
    LineTooLong { max_len: usize },

    /// A lookback field referenced a value that cannot be used as a length.
    #[error("field {field} cannot be used as a length")]
    InvalidLength { field: usize },

    #[error("collector already closed")]
    AlreadyClosed,

    #[error("sink write failed: {0}")]
    Sink(#[source] io::Error),
}

/// Packet definition and production errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExprError {
    /// A lookback points at its own position or a later one.
    #[error("field {field} looks back at position {target}, which is not earlier")]
    ForwardReference { field: usize, target: usize },

    #[error("field {field} looks back at unknown name {name:?}")]
    UnknownName { field: usize, name: String },

    #[error("name {0:?} is used by more than one field")]
    DuplicateName(String),

    /// The lookback target does not decode to an integer.
    #[error("field {target} is not an integer and cannot supply a length")]
    NotALength { target: usize },

    #[error("expected {expected} values, got {got}")]
    Arity { expected: usize, got: usize },

    #[error("field {index} expects {expected}, got {found}")]
    Mismatch {
        index: usize,
        expected: &'static str,
        found: &'static str,
    },

    #[error("field {index} is fixed at {expected} bytes, got {got}")]
    LengthMismatch {
        index: usize,
        expected: usize,
        got: usize,
    },
}
