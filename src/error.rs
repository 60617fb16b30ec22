use std::fmt;

use thiserror::Error;

use crate::message::Peer;

/// Errors raised while turning a record into canonical text or a frame.
#[derive(Error, Debug)]
pub enum EncodingError {
    #[error("failed to render canonical text: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame too large: {size} bytes (max {max} bytes)")]
    FrameTooLarge { size: usize, max: usize },

    #[error("field `{field}` holds {value}, which has no canonical form")]
    NonFiniteFloat { field: String, value: f64 },
}

/// Errors raised while rebuilding records from canonical text.
///
/// A decoding error is fatal to that single message only.
#[derive(Error, Debug)]
pub enum DecodingError {
    #[error("malformed canonical text: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload is not valid utf-8")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("value is not a record")]
    NotARecord,

    #[error("record has no `_type` discriminator")]
    MissingTag,

    #[error("unknown record type: {0}")]
    UnknownType(String),

    #[error("record {record} is missing field `{field}`")]
    MissingField {
        record: &'static str,
        field: &'static str,
    },

    #[error("record {record} has invalid field `{field}`: {reason}")]
    InvalidField {
        record: &'static str,
        field: &'static str,
        reason: String,
    },

    #[error("expected a {expected} record, got {found}")]
    UnexpectedType {
        expected: &'static str,
        found: &'static str,
    },

    #[error("bulk frame declared {declared} items but carried {decoded}")]
    CountMismatch { declared: u64, decoded: usize },
}

/// Errors raised while reading length-prefixed frames off a byte source.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame too large: {size} bytes (max {max} bytes)")]
    TooLarge { size: u64, max: usize },

    #[error("invalid frame header: {0}")]
    InvalidHeader(String),

    #[error("stream closed after {received} of {expected} bytes")]
    Truncated { expected: usize, received: usize },
}

#[derive(Error, Debug)]
pub enum ReceiveError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Decoding(#[from] DecodingError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MiningError {
    #[error("difficulty bits {0} exceed the 256-bit hash space")]
    DifficultyOutOfRange(u32),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Source(#[from] config::ConfigError),

    #[error("invalid peer address `{0}`, expected host:port")]
    InvalidPeer(String),
}

/// Why the last attempt of a send failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    Refused,
    Timeout,
    BrokenPipe,
    Other,
}

impl FailureReason {
    pub fn classify(err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::ConnectionRefused => Self::Refused,
            std::io::ErrorKind::TimedOut => Self::Timeout,
            std::io::ErrorKind::BrokenPipe => Self::BrokenPipe,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Refused => "connection refused",
            Self::Timeout => "timed out",
            Self::BrokenPipe => "broken pipe",
            Self::Other => "unknown failure",
        })
    }
}

/// A send that exhausted its retry budget.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to reach {peer} after {attempts} attempts: {reason}")]
pub struct TransportFailure {
    pub peer: Peer,
    pub attempts: u32,
    pub reason: FailureReason,
}

#[cfg(test)]
mod tests {
    use std::io::{Error, ErrorKind};

    use super::*;

    #[test]
    fn classify_io_errors() {
        let cases = [
            (ErrorKind::ConnectionRefused, FailureReason::Refused),
            (ErrorKind::TimedOut, FailureReason::Timeout),
            (ErrorKind::BrokenPipe, FailureReason::BrokenPipe),
            (ErrorKind::ConnectionReset, FailureReason::Other),
            (ErrorKind::AddrNotAvailable, FailureReason::Other),
        ];

        for (kind, reason) in cases {
            assert_eq!(FailureReason::classify(&Error::from(kind)), reason, "{kind:?}");
        }
    }

    #[test]
    fn failure_names_peer_and_attempts() {
        let failure = TransportFailure {
            peer: Peer::new("10.0.0.1", 9000),
            attempts: 3,
            reason: FailureReason::Timeout,
        };

        assert_eq!(failure.to_string(), "failed to reach 10.0.0.1:9000 after 3 attempts: timed out");
    }
}
