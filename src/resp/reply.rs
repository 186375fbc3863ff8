//! Parsed RESP reply trees.
//!
//! A [`Reply`] is the fully-decoded form of one server frame.  Replies are
//! immutable after construction and are shared as `Arc<Reply>` when more
//! than one consumer needs them (pub/sub fanout, logging).  `Nil` covers
//! both the null bulk string (`$-1`) and the null array (`*-1`).

use std::fmt;
use std::sync::Arc;

/// One decoded server frame.
///
/// `Array` is a RESP2 `*` frame; `Push` is a RESP3 `>` frame.  The two
/// carry identical payload shapes but must stay distinguishable so the
/// connection core can route push frames around the acknowledgement
/// cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Integer(i64),
    Status(String),
    Error(String),
    Bulk(Vec<u8>),
    Nil,
    Array(Vec<Reply>),
    Push(Vec<Reply>),
}

impl Reply {
    /// Build a RESP2 array of bulk strings, mainly for tests and fakes.
    pub fn string_array<S: AsRef<[u8]>>(items: &[S]) -> Reply {
        Reply::Array(
            items
                .iter()
                .map(|s| Reply::Bulk(s.as_ref().to_vec()))
                .collect(),
        )
    }

    /// Build a RESP3 push array of bulk strings.
    pub fn push_array<S: AsRef<[u8]>>(items: &[S]) -> Reply {
        Reply::Push(
            items
                .iter()
                .map(|s| Reply::Bulk(s.as_ref().to_vec()))
                .collect(),
        )
    }

    /// Status reply equal to `OK`, case-insensitively.
    pub fn is_ok(&self) -> bool {
        matches!(self, Reply::Status(s) if s.eq_ignore_ascii_case("OK"))
    }

    /// Status reply equal to `QUEUED`, case-insensitively.
    pub fn is_queued(&self) -> bool {
        matches!(self, Reply::Status(s) if s.eq_ignore_ascii_case("QUEUED"))
    }

    /// Transient-unavailability error, recognized by text prefix.
    /// Specific to the QuarkDB dialect.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Reply::Error(text) => {
                text.starts_with("ERR unavailable") || text.starts_with("UNAVAILABLE")
            }
            _ => false,
        }
    }

    pub fn is_push(&self) -> bool {
        matches!(self, Reply::Push(_))
    }

    /// Elements of an array or push frame, if this is one.
    pub fn elements(&self) -> Option<&[Reply]> {
        match self {
            Reply::Array(elems) | Reply::Push(elems) => Some(elems),
            _ => None,
        }
    }

    /// Bulk payload interpreted as UTF-8, if this is a bulk string.
    pub fn as_bulk_str(&self) -> Option<&str> {
        match self {
            Reply::Bulk(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Reply::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// True if this bulk string equals `expected` byte-for-byte.
    pub fn bulk_equals(&self, expected: &str) -> bool {
        matches!(self, Reply::Bulk(bytes) if bytes.as_slice() == expected.as_bytes())
    }
}

/// Shared handle to a delivered reply.
pub type ReplyPtr = Arc<Reply>;

impl fmt::Display for Reply {
    /// Human-readable rendering used in log messages, in the style of the
    /// redis-cli output: arrays as numbered lines, bulks quoted.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Integer(value) => write!(f, "(integer) {value}"),
            Reply::Status(text) => write!(f, "{text}"),
            Reply::Error(text) => write!(f, "(error) {text}"),
            Reply::Nil => write!(f, "(nil)"),
            Reply::Bulk(bytes) => write!(f, "\"{}\"", String::from_utf8_lossy(bytes)),
            Reply::Array(elems) | Reply::Push(elems) => {
                for (i, elem) in elems.iter().enumerate() {
                    writeln!(f, "{}) {elem}", i + 1)?;
                }
                Ok(())
            }
        }
    }
}
