//! Classification of incoming frames into pub/sub messages.
//!
//! Only RESP2 arrays and RESP3 push frames qualify.  A push frame whose
//! first element is the literal bulk string `pubsub` has its keyword
//! shifted one position to the right.  Classification failure is not an
//! error; the caller decides whether an unclassifiable frame is fatal.

use crate::resp::Reply;

use super::message::{Message, MessageType};

fn as_str(reply: &Reply) -> Option<&str> {
    reply.as_bulk_str()
}

/// Classify `reply` as a pub/sub message, extracting its fields.
pub fn parse_message(reply: &Reply) -> Option<Message> {
    let (elements, base) = match reply {
        Reply::Array(elements) => (elements.as_slice(), 0),
        Reply::Push(elements) => {
            let shifted = elements.first().is_some_and(|e| e.bulk_equals("pubsub"));
            (elements.as_slice(), usize::from(shifted))
        }
        _ => return None,
    };

    let keyword = as_str(elements.get(base)?)?;
    let arity = if keyword == "pmessage" { 4 } else { 3 };
    if elements.len() != base + arity {
        return None;
    }

    match keyword {
        "message" => {
            let channel = as_str(&elements[base + 1])?;
            let payload = match &elements[base + 2] {
                Reply::Bulk(bytes) => bytes,
                _ => return None,
            };
            Some(Message::message(channel, payload))
        }
        "pmessage" => {
            let pattern = as_str(&elements[base + 1])?;
            let channel = as_str(&elements[base + 2])?;
            let payload = match &elements[base + 3] {
                Reply::Bulk(bytes) => bytes,
                _ => return None,
            };
            Some(Message::pattern_message(pattern, channel, payload))
        }
        "subscribe" | "psubscribe" | "unsubscribe" | "punsubscribe" => {
            let target = as_str(&elements[base + 1])?;
            let count = elements[base + 2].as_integer()?;
            let message_type = match keyword {
                "subscribe" => MessageType::Subscribe,
                "psubscribe" => MessageType::PatternSubscribe,
                "unsubscribe" => MessageType::Unsubscribe,
                _ => MessageType::PatternUnsubscribe,
            };
            Some(Message::control(message_type, target, count))
        }
        _ => None,
    }
}
