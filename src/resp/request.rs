//! Encoded RESP requests.
//!
//! An [`EncodedRequest`] is an argument vector already serialized as a
//! length-prefixed RESP array of bulk strings, the only request form ever
//! put on the wire; inline commands are never emitted.  The type is
//! move-only on purpose: a request buffer is written once and never
//! duplicated, so `Clone` is deliberately not implemented.

use std::collections::VecDeque;
use std::fmt;

/// A serialized request, ready for the writer thread.
///
/// Encoding of `[a0, …, a_{n-1}]` is the literal bytes
/// `*n\r\n$|a0|\r\na0\r\n…$|a_{n-1}|\r\na_{n-1}\r\n`, produced in exactly
/// one allocation sized up-front.
#[derive(PartialEq, Eq)]
pub struct EncodedRequest {
    buffer: Box<[u8]>,
}

impl EncodedRequest {
    /// Encode an argument list.
    pub fn new<A: AsRef<[u8]>>(args: &[A]) -> EncodedRequest {
        let mut length = 1 + decimal_width(args.len()) + 2;
        for arg in args {
            let arg = arg.as_ref();
            length += 1 + decimal_width(arg.len()) + 2 + arg.len() + 2;
        }

        let mut buffer = Vec::with_capacity(length);
        buffer.push(b'*');
        push_decimal(&mut buffer, args.len());
        buffer.extend_from_slice(b"\r\n");

        for arg in args {
            let arg = arg.as_ref();
            buffer.push(b'$');
            push_decimal(&mut buffer, arg.len());
            buffer.extend_from_slice(b"\r\n");
            buffer.extend_from_slice(arg);
            buffer.extend_from_slice(b"\r\n");
        }

        debug_assert_eq!(buffer.len(), length);
        EncodedRequest {
            buffer: buffer.into_boxed_slice(),
        }
    }

    /// Take ownership of an already-encoded buffer.
    pub fn from_raw(buffer: Vec<u8>) -> EncodedRequest {
        EncodedRequest {
            buffer: buffer.into_boxed_slice(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Concatenate several encoded requests into one write unit.
    pub fn fuse_into_block(block: &VecDeque<EncodedRequest>) -> EncodedRequest {
        let fused_size: usize = block.iter().map(EncodedRequest::len).sum();
        let mut buffer = Vec::with_capacity(fused_size);
        for req in block {
            buffer.extend_from_slice(req.as_bytes());
        }
        EncodedRequest::from_raw(buffer)
    }

    /// Fuse a block and wrap it in `MULTI` / `EXEC`, producing a single
    /// transaction write unit.
    pub fn fuse_into_block_and_surround(mut block: VecDeque<EncodedRequest>) -> EncodedRequest {
        block.push_front(EncodedRequest::new(&["MULTI"]));
        block.push_back(EncodedRequest::new(&["EXEC"]));
        EncodedRequest::fuse_into_block(&block)
    }
}

impl fmt::Debug for EncodedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncodedRequest({:?})", String::from_utf8_lossy(&self.buffer))
    }
}

/// Number of decimal digits needed to format `value`.
fn decimal_width(value: usize) -> usize {
    let mut width = 1;
    let mut rest = value / 10;
    while rest > 0 {
        width += 1;
        rest /= 10;
    }
    width
}

/// Append `value` in decimal, no leading zeros.
fn push_decimal(buffer: &mut Vec<u8>, value: usize) {
    let start = buffer.len();
    let mut rest = value;
    loop {
        buffer.push(b'0' + (rest % 10) as u8);
        rest /= 10;
        if rest == 0 {
            break;
        }
    }
    buffer[start..].reverse();
}
