//! Streaming RESP frame decoder.
//!
//! Byte chunks arrive from the reader thread in arbitrary sizes; the
//! decoder accumulates them and yields fully-formed [`Reply`] trees in
//! FIFO order.  Each [`ResponseDecoder::pull`] reports one of three
//! outcomes: a complete reply, "need more bytes" (parser state is
//! preserved across the call), or an irrecoverable protocol error, which
//! stays sticky until [`ResponseDecoder::restart`].
//!
//! Frame kinds: `+status`, `-error`, `:integer`, `$bulk` (`$-1` = nil),
//! `*array` (`*-1` = nil) and the RESP3 `>push` frame, which parses like
//! an array but is tagged separately so the connection core can route it
//! out-of-band.

use bytes::{Buf, BytesMut};
use nom::IResult;
use nom::branch::alt;
use nom::bytes::streaming::{take, take_until};
use nom::character::streaming::{char, crlf, digit1};
use nom::combinator::{map, map_res, opt};
use nom::multi::count;
use nom::sequence::{delimited, pair, preceded, terminated};

use super::reply::Reply;

/// Outcome of one [`ResponseDecoder::pull`].
#[derive(Debug, PartialEq, Eq)]
pub enum DecodeStatus {
    /// One complete reply, removed from the stream.
    Ok(Reply),
    /// The buffered bytes do not yet form a complete frame.
    Incomplete,
    /// The stream is corrupt; feed no further bytes, tear down and
    /// [`ResponseDecoder::restart`].
    ProtocolError,
}

/// Streaming decoder over an internal accumulation buffer.
#[derive(Default)]
pub struct ResponseDecoder {
    buffer: BytesMut,
    corrupt: bool,
}

impl ResponseDecoder {
    pub fn new() -> ResponseDecoder {
        ResponseDecoder::default()
    }

    /// Append a chunk received from the socket.
    pub fn feed(&mut self, bytes: &[u8]) {
        if !bytes.is_empty() {
            self.buffer.extend_from_slice(bytes);
        }
    }

    /// Try to extract the next complete reply.
    pub fn pull(&mut self) -> DecodeStatus {
        if self.corrupt {
            return DecodeStatus::ProtocolError;
        }

        let (consumed, reply) = match read_reply(&self.buffer) {
            Ok((rest, reply)) => (self.buffer.len() - rest.len(), reply),
            Err(nom::Err::Incomplete(_)) => return DecodeStatus::Incomplete,
            Err(_) => {
                self.corrupt = true;
                return DecodeStatus::ProtocolError;
            }
        };

        self.buffer.advance(consumed);
        DecodeStatus::Ok(reply)
    }

    /// Drop all buffered bytes and clear any sticky error.
    pub fn restart(&mut self) {
        self.buffer.clear();
        self.corrupt = false;
    }

    /// Decode one reply from a self-contained byte string, e.g. a pub/sub
    /// payload that itself carries RESP-encoded data.  Returns `None` if
    /// the bytes are corrupt or incomplete.
    pub fn parse_encoded(bytes: &[u8]) -> Option<Reply> {
        let mut decoder = ResponseDecoder::new();
        decoder.feed(bytes);
        match decoder.pull() {
            DecodeStatus::Ok(reply) => Some(reply),
            DecodeStatus::Incomplete | DecodeStatus::ProtocolError => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Frame grammar
// ---------------------------------------------------------------------------

fn read_decimal(input: &[u8]) -> IResult<&[u8], i64> {
    map_res(
        pair(opt(char('-')), digit1),
        |(minus, digits): (Option<char>, &[u8])| -> Result<i64, ()> {
            let text = std::str::from_utf8(digits).map_err(|_| ())?;
            let value: i64 = text.parse().map_err(|_| ())?;
            Ok(if minus.is_some() { -value } else { value })
        },
    )(input)
}

fn read_status(input: &[u8]) -> IResult<&[u8], Reply> {
    let line = preceded(char('+'), terminated(take_until("\r\n"), crlf));
    map(line, |s: &[u8]| {
        Reply::Status(String::from_utf8_lossy(s).into_owned())
    })(input)
}

fn read_error(input: &[u8]) -> IResult<&[u8], Reply> {
    let line = preceded(char('-'), terminated(take_until("\r\n"), crlf));
    map(line, |s: &[u8]| {
        Reply::Error(String::from_utf8_lossy(s).into_owned())
    })(input)
}

fn read_integer(input: &[u8]) -> IResult<&[u8], Reply> {
    let value = preceded(char(':'), terminated(read_decimal, crlf));
    map(value, Reply::Integer)(input)
}

fn read_bulk(input: &[u8]) -> IResult<&[u8], Reply> {
    let (rest, size) = delimited(char('$'), read_decimal, crlf)(input)?;
    if size < 0 {
        return Ok((rest, Reply::Nil));
    }
    #[allow(clippy::cast_sign_loss)]
    let (rest, data) = terminated(take(size as usize), crlf)(rest)?;
    Ok((rest, Reply::Bulk(data.to_vec())))
}

fn read_array(input: &[u8]) -> IResult<&[u8], Reply> {
    let (rest, size) = delimited(char('*'), read_decimal, crlf)(input)?;
    if size < 0 {
        return Ok((rest, Reply::Nil));
    }
    #[allow(clippy::cast_sign_loss)]
    let (rest, elems) = count(read_reply, size as usize)(rest)?;
    Ok((rest, Reply::Array(elems)))
}

fn read_push(input: &[u8]) -> IResult<&[u8], Reply> {
    let (rest, size) = delimited(char('>'), read_decimal, crlf)(input)?;
    if size < 0 {
        return Ok((rest, Reply::Nil));
    }
    #[allow(clippy::cast_sign_loss)]
    let (rest, elems) = count(read_reply, size as usize)(rest)?;
    Ok((rest, Reply::Push(elems)))
}

fn read_reply(input: &[u8]) -> IResult<&[u8], Reply> {
    alt((
        read_integer,
        read_status,
        read_error,
        read_bulk,
        read_array,
        read_push,
    ))(input)
}
