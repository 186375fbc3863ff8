//! Pub/sub message model.
//!
//! A [`Message`] is one classified incoming pub/sub frame.  Data frames
//! (`Message`, `PatternMessage`) carry a payload; control frames carry
//! the server-side count of active subscriptions instead.  Payloads are
//! raw bytes, since versioned-hash notifications carry RESP-encoded
//! binary data, not text.

/// The six recognized pub/sub frame kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Message,
    PatternMessage,
    Subscribe,
    PatternSubscribe,
    Unsubscribe,
    PatternUnsubscribe,
}

impl MessageType {
    /// Is this a `(p)(un)subscribe` confirmation rather than a data frame?
    pub fn is_control(self) -> bool {
        !matches!(self, MessageType::Message | MessageType::PatternMessage)
    }
}

/// One classified pub/sub frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    message_type: MessageType,
    channel: String,
    pattern: String,
    payload: Vec<u8>,
    active_subscriptions: i64,
}

impl Message {
    /// A plain `message` frame.
    pub fn message(channel: &str, payload: impl AsRef<[u8]>) -> Message {
        Message {
            message_type: MessageType::Message,
            channel: channel.to_owned(),
            pattern: String::new(),
            payload: payload.as_ref().to_vec(),
            active_subscriptions: 0,
        }
    }

    /// A `pmessage` frame delivered through a pattern subscription.
    pub fn pattern_message(pattern: &str, channel: &str, payload: impl AsRef<[u8]>) -> Message {
        Message {
            message_type: MessageType::PatternMessage,
            channel: channel.to_owned(),
            pattern: pattern.to_owned(),
            payload: payload.as_ref().to_vec(),
            active_subscriptions: 0,
        }
    }

    /// A subscription control frame.
    pub fn control(message_type: MessageType, target: &str, active_subscriptions: i64) -> Message {
        debug_assert!(message_type.is_control());
        let on_pattern = matches!(
            message_type,
            MessageType::PatternSubscribe | MessageType::PatternUnsubscribe
        );
        Message {
            message_type,
            channel: if on_pattern {
                String::new()
            } else {
                target.to_owned()
            },
            pattern: if on_pattern {
                target.to_owned()
            } else {
                String::new()
            },
            payload: Vec::new(),
            active_subscriptions,
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn active_subscriptions(&self) -> i64 {
        self.active_subscriptions
    }
}
