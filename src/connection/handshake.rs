//! Out-of-band connection handshakes.
//!
//! A handshake provider feeds requests onto the wire before any user
//! request on a fresh connection, and judges each reply.  The connection
//! core drives it strictly sequentially: provide, await, validate,
//! repeat, until the provider declares completion or rejects the
//! connection.

use crate::resp::{EncodedRequest, Reply};

/// Verdict on one handshake reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// Reply accepted, another handshake request follows.
    ValidIncomplete,
    /// Reply accepted, handshake done; user traffic may flow.
    ValidComplete,
    /// Reply rejected; the connection must be dropped.
    Invalid,
}

/// A multi-step handshake driven by the connection core.
pub trait Handshake: Send {
    /// Next request to put on the wire.  Called once at connection start
    /// and once after every `ValidIncomplete` verdict.
    fn provide_handshake(&mut self) -> EncodedRequest;

    /// Judge the reply to the most recently provided request.
    fn validate_response(&mut self, reply: &Reply) -> HandshakeStatus;

    /// Rewind to the first step; called on every reconnection.
    fn restart(&mut self);
}

// ---------------------------------------------------------------------------
// AuthHandshake
// ---------------------------------------------------------------------------

/// Single-step `AUTH` handshake.  With a user, sends the two-argument
/// form; without one, the legacy password-only form.
pub struct AuthHandshake {
    user: Option<String>,
    password: String,
}

impl AuthHandshake {
    pub fn with_password(password: &str) -> AuthHandshake {
        AuthHandshake {
            user: None,
            password: password.to_owned(),
        }
    }

    pub fn with_user(user: &str, password: &str) -> AuthHandshake {
        AuthHandshake {
            user: Some(user.to_owned()),
            password: password.to_owned(),
        }
    }
}

impl Handshake for AuthHandshake {
    fn provide_handshake(&mut self) -> EncodedRequest {
        match &self.user {
            Some(user) => EncodedRequest::new(&["AUTH", user, &self.password]),
            None => EncodedRequest::new(&["AUTH", &self.password]),
        }
    }

    fn validate_response(&mut self, reply: &Reply) -> HandshakeStatus {
        if reply.is_ok() {
            HandshakeStatus::ValidComplete
        } else {
            HandshakeStatus::Invalid
        }
    }

    fn restart(&mut self) {}
}

// ---------------------------------------------------------------------------
// PingHandshake
// ---------------------------------------------------------------------------

/// Single-step liveness handshake: sends `PING <token>` and expects the
/// token echoed back.
pub struct PingHandshake {
    token: String,
}

impl PingHandshake {
    pub fn new(token: &str) -> PingHandshake {
        PingHandshake {
            token: token.to_owned(),
        }
    }
}

impl Handshake for PingHandshake {
    fn provide_handshake(&mut self) -> EncodedRequest {
        EncodedRequest::new(&["PING", &self.token])
    }

    fn validate_response(&mut self, reply: &Reply) -> HandshakeStatus {
        let echoed = match reply {
            Reply::Bulk(bytes) => bytes.as_slice() == self.token.as_bytes(),
            Reply::Status(text) => text == &self.token,
            _ => false,
        };
        if echoed {
            HandshakeStatus::ValidComplete
        } else {
            HandshakeStatus::Invalid
        }
    }

    fn restart(&mut self) {}
}
