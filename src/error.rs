//! Error taxonomy for session loading and analysis.
//!
//! Core routines return [`Result<T>`]. The empty-result class
//! ([`Error::Empty`]) is the only recoverable one: batch analyses check
//! [`Error::is_empty_result`] and skip or NaN-pad the affected session.
//! Everything else aborts the current operation.

use thiserror::Error;

/// Errors raised by the session model and the statistics engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// An option was set to a value outside its accepted set, or two options
    /// contradict each other.
    #[error("configuration error: {0}")]
    Config(String),

    /// A stage was requested before the stage it depends on.
    #[error("{0} not loaded")]
    NotLoaded(&'static str),

    /// A frame, segment or array index lies outside the recorded range.
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// Input stores are inconsistent (lengths, monotonicity, multi-part
    /// parameter mismatch).
    #[error("data integrity error: {0}")]
    DataIntegrity(String),

    /// A query matched nothing.
    #[error("empty result: {0}")]
    Empty(String),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    pub fn out_of_range(message: impl Into<String>) -> Self {
        Error::OutOfRange(message.into())
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Error::DataIntegrity(message.into())
    }

    pub fn empty(message: impl Into<String>) -> Self {
        Error::Empty(message.into())
    }

    /// `true` for the recoverable "query matched nothing" class.
    pub fn is_empty_result(&self) -> bool {
        matches!(self, Error::Empty(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// `true` if an `anyhow` error wraps an [`Error::Empty`].
pub fn is_empty_result(err: &anyhow::Error) -> bool {
    err.downcast_ref::<Error>().is_some_and(Error::is_empty_result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_recoverable() {
        assert!(Error::empty("No segments").is_empty_result());
        assert!(!Error::config("bad").is_empty_result());
        assert!(!Error::NotLoaded("alignment").is_empty_result());
    }

    #[test]
    fn empty_survives_anyhow_round_trip() {
        let err: anyhow::Error = Error::empty("No frames").into();
        assert!(is_empty_result(&err));
        let err: anyhow::Error = Error::integrity("lengths").into();
        assert!(!is_empty_result(&err));
    }

    #[test]
    fn messages_name_the_class() {
        assert_eq!(Error::NotLoaded("alignment").to_string(), "alignment not loaded");
        assert!(Error::out_of_range("frame 12").to_string().contains("frame 12"));
    }
}
