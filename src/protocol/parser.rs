//! Incremental RESP Parser
//!
//! Parses client request frames out of a growing byte buffer. The parser is
//! re-entrant per connection: it either yields one complete frame plus the
//! number of bytes it consumed, or reports that the frame is still
//! incomplete so the caller can read more from the socket and retry. That
//! contract is what makes pipelining work — the connection loop keeps
//! draining complete frames from the front of its buffer before touching
//! the network again.
//!
//! Accepted request forms:
//! - bulk arrays: `*N\r\n$L\r\n<bytes>\r\n...` (the normal client encoding)
//! - inline commands: a single whitespace-split line for anything that does
//!   not start with a known type prefix (input only; replies are never
//!   inline)

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::Bytes;
use std::num::ParseIntError;
use thiserror::Error;

/// Errors that can occur during RESP parsing.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// Invalid integer in a length or `:` frame
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Invalid UTF-8 in a simple string, error message, or length line
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Bulk string length is negative (but not -1 for null)
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// Array length is negative (but not -1 for null)
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// Protocol violation (missing CRLF, empty inline line, ...)
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The frame exceeds the maximum allowed size
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB, same as Redis).
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum array nesting depth.
pub const MAX_NESTING_DEPTH: usize = 32;

/// An incremental RESP frame parser.
///
/// # Returns from [`RespParser::parse`]
///
/// - `Ok(Some((value, consumed)))` — one complete frame; advance the buffer
///   by `consumed` bytes
/// - `Ok(None)` — incomplete; read more bytes and call again
/// - `Err(e)` — protocol violation; the connection should be dropped
#[derive(Debug, Default)]
pub struct RespParser {
    depth: usize,
}

impl RespParser {
    pub fn new() -> Self {
        Self { depth: 0 }
    }

    /// Attempts to parse one RESP frame from the front of `buf`.
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        self.depth = 0;
        self.parse_frame(buf)
    }

    fn parse_frame(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }

        if self.depth > MAX_NESTING_DEPTH {
            return Err(ParseError::ProtocolError(format!(
                "maximum nesting depth exceeded: {}",
                MAX_NESTING_DEPTH
            )));
        }

        match buf[0] {
            prefix::SIMPLE_STRING => self.parse_line(buf, |s| RespValue::SimpleString(s)),
            prefix::ERROR => self.parse_line(buf, |s| RespValue::Error(s)),
            prefix::INTEGER => self.parse_integer(buf),
            prefix::BULK_STRING => self.parse_bulk_string(buf),
            prefix::ARRAY => self.parse_array(buf),
            _ => self.parse_inline(buf),
        }
    }

    /// Parses a one-line frame (`+...\r\n` or `-...\r\n`).
    fn parse_line(
        &mut self,
        buf: &[u8],
        build: impl FnOnce(String) -> RespValue,
    ) -> ParseResult<Option<(RespValue, usize)>> {
        match find_crlf(&buf[1..]) {
            Some(pos) => {
                let s = std::str::from_utf8(&buf[1..1 + pos])
                    .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;
                Ok(Some((build(s.to_string()), 1 + pos + 2)))
            }
            None => Ok(None),
        }
    }

    /// Parses an integer frame: `:<integer>\r\n`
    fn parse_integer(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        match find_crlf(&buf[1..]) {
            Some(pos) => {
                let n = parse_i64(&buf[1..1 + pos])?;
                Ok(Some((RespValue::Integer(n), 1 + pos + 2)))
            }
            None => Ok(None),
        }
    }

    /// Parses a bulk string: `$<length>\r\n<data>\r\n`
    fn parse_bulk_string(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let length_end = match find_crlf(&buf[1..]) {
            Some(pos) => pos,
            None => return Ok(None),
        };

        let length = parse_i64(&buf[1..1 + length_end])?;

        if length == -1 {
            return Ok(Some((RespValue::Null, 1 + length_end + 2)));
        }
        if length < 0 {
            return Err(ParseError::InvalidBulkLength(length));
        }

        let length = length as usize;
        if length > MAX_BULK_SIZE {
            return Err(ParseError::MessageTooLarge {
                size: length,
                max: MAX_BULK_SIZE,
            });
        }

        let data_start = 1 + length_end + 2;
        let total = data_start + length + 2;
        if buf.len() < total {
            return Ok(None);
        }

        if &buf[data_start + length..total] != CRLF {
            return Err(ParseError::ProtocolError(
                "bulk string missing trailing CRLF".to_string(),
            ));
        }

        let data = Bytes::copy_from_slice(&buf[data_start..data_start + length]);
        Ok(Some((RespValue::BulkString(data), total)))
    }

    /// Parses an array: `*<count>\r\n<elements...>`
    fn parse_array(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let count_end = match find_crlf(&buf[1..]) {
            Some(pos) => pos,
            None => return Ok(None),
        };

        let count = parse_i64(&buf[1..1 + count_end])?;

        if count == -1 {
            return Ok(Some((RespValue::Null, 1 + count_end + 2)));
        }
        if count < 0 {
            return Err(ParseError::InvalidArrayLength(count));
        }

        let count = count as usize;
        let mut elements = Vec::with_capacity(count.min(1024));
        let mut consumed = 1 + count_end + 2;

        self.depth += 1;
        for _ in 0..count {
            if consumed >= buf.len() {
                return Ok(None);
            }
            match self.parse_frame(&buf[consumed..])? {
                Some((value, used)) => {
                    elements.push(value);
                    consumed += used;
                }
                None => return Ok(None),
            }
        }
        self.depth -= 1;

        Ok(Some((RespValue::Array(elements), consumed)))
    }

    /// Parses an inline command: one whitespace-split line.
    fn parse_inline(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let crlf_pos = match find_crlf(buf) {
            Some(pos) => pos,
            None => return Ok(None),
        };

        let line = std::str::from_utf8(&buf[..crlf_pos])
            .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            return Err(ParseError::ProtocolError("empty inline command".to_string()));
        }

        let elements = parts
            .into_iter()
            .map(|s| RespValue::BulkString(Bytes::from(s.to_string())))
            .collect();

        Ok(Some((RespValue::Array(elements), crlf_pos + 2)))
    }
}

/// Converts a parsed request frame into an argv of raw byte strings.
///
/// Request frames are arrays of bulk strings (the inline form is already
/// normalized to that shape by the parser). Anything else is a protocol
/// violation.
pub fn frame_to_argv(frame: RespValue) -> ParseResult<Vec<Bytes>> {
    let items = match frame {
        RespValue::Array(items) => items,
        _ => {
            return Err(ParseError::ProtocolError(
                "expected array of bulk strings".to_string(),
            ))
        }
    };

    let mut argv = Vec::with_capacity(items.len());
    for item in items {
        match item {
            RespValue::BulkString(b) => argv.push(b),
            RespValue::SimpleString(s) => argv.push(Bytes::from(s)),
            other => {
                return Err(ParseError::ProtocolError(format!(
                    "unexpected argument frame: {}",
                    other
                )))
            }
        }
    }
    Ok(argv)
}

#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

fn parse_i64(raw: &[u8]) -> ParseResult<i64> {
    let s = std::str::from_utf8(raw).map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;
    s.parse()
        .map_err(|e: ParseIntError| ParseError::InvalidInteger(e.to_string()))
}

/// Parses a single RESP frame from a byte slice.
pub fn parse_message(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    RespParser::new().parse(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_string() {
        let result = parse_message(b"+OK\r\n").unwrap().unwrap();
        assert_eq!(result.0, RespValue::SimpleString("OK".to_string()));
        assert_eq!(result.1, 5);
    }

    #[test]
    fn test_parse_simple_string_incomplete() {
        assert!(parse_message(b"+OK").unwrap().is_none());
    }

    #[test]
    fn test_parse_error_frame() {
        let result = parse_message(b"-ERR unknown command\r\n").unwrap().unwrap();
        assert_eq!(result.0, RespValue::Error("ERR unknown command".to_string()));
    }

    #[test]
    fn test_parse_integer() {
        let result = parse_message(b":1000\r\n").unwrap().unwrap();
        assert_eq!(result.0, RespValue::Integer(1000));
        let result = parse_message(b":-42\r\n").unwrap().unwrap();
        assert_eq!(result.0, RespValue::Integer(-42));
    }

    #[test]
    fn test_parse_bulk_string() {
        let result = parse_message(b"$5\r\nhello\r\n").unwrap().unwrap();
        assert_eq!(result.0, RespValue::BulkString(Bytes::from("hello")));
        assert_eq!(result.1, 11);
    }

    #[test]
    fn test_parse_null_bulk_string() {
        let result = parse_message(b"$-1\r\n").unwrap().unwrap();
        assert_eq!(result.0, RespValue::Null);
    }

    #[test]
    fn test_parse_empty_bulk_string() {
        let result = parse_message(b"$0\r\n\r\n").unwrap().unwrap();
        assert_eq!(result.0, RespValue::BulkString(Bytes::from("")));
    }

    #[test]
    fn test_parse_bulk_string_incomplete() {
        assert!(parse_message(b"$5\r\nhel").unwrap().is_none());
    }

    #[test]
    fn test_parse_array() {
        let result = parse_message(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(
            result.0,
            RespValue::Array(vec![
                RespValue::BulkString(Bytes::from("GET")),
                RespValue::BulkString(Bytes::from("name")),
            ])
        );
        assert_eq!(result.1, 23);
    }

    #[test]
    fn test_parse_array_incomplete_tail() {
        assert!(parse_message(b"*2\r\n$3\r\nGET\r\n$4\r\nna")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_parse_nested_array() {
        let result = parse_message(b"*2\r\n:1\r\n*2\r\n:2\r\n:3\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(
            result.0,
            RespValue::Array(vec![
                RespValue::Integer(1),
                RespValue::Array(vec![RespValue::Integer(2), RespValue::Integer(3)]),
            ])
        );
    }

    #[test]
    fn test_parse_inline_command() {
        let result = parse_message(b"SET foo bar\r\n").unwrap().unwrap();
        assert_eq!(
            result.0,
            RespValue::Array(vec![
                RespValue::BulkString(Bytes::from("SET")),
                RespValue::BulkString(Bytes::from("foo")),
                RespValue::BulkString(Bytes::from("bar")),
            ])
        );
        assert_eq!(result.1, 13);
    }

    #[test]
    fn test_parse_invalid_integer() {
        assert!(matches!(
            parse_message(b":not_a_number\r\n"),
            Err(ParseError::InvalidInteger(_))
        ));
    }

    #[test]
    fn test_parse_negative_bulk_length() {
        assert!(matches!(
            parse_message(b"$-2\r\n"),
            Err(ParseError::InvalidBulkLength(-2))
        ));
    }

    #[test]
    fn test_binary_safe_bulk_string() {
        let result = parse_message(b"$5\r\nhel\x00o\r\n").unwrap().unwrap();
        assert_eq!(result.0, RespValue::BulkString(Bytes::from(&b"hel\x00o"[..])));
    }

    #[test]
    fn test_roundtrip() {
        let original = RespValue::Array(vec![
            RespValue::bulk_string(Bytes::from("SET")),
            RespValue::bulk_string(Bytes::from("key")),
            RespValue::bulk_string(Bytes::from("value")),
        ]);
        let serialized = original.serialize();
        let (parsed, consumed) = parse_message(&serialized).unwrap().unwrap();
        assert_eq!(original, parsed);
        assert_eq!(consumed, serialized.len());
    }

    #[test]
    fn test_pipelined_frames_parse_one_at_a_time() {
        let buf = b"*1\r\n$4\r\nPING\r\n*1\r\n$4\r\nPING\r\n";
        let (first, consumed) = parse_message(buf).unwrap().unwrap();
        assert!(matches!(first, RespValue::Array(_)));
        let (second, _) = parse_message(&buf[consumed..]).unwrap().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_frame_to_argv() {
        let frame = RespValue::Array(vec![
            RespValue::BulkString(Bytes::from("GET")),
            RespValue::BulkString(Bytes::from("k")),
        ]);
        let argv = frame_to_argv(frame).unwrap();
        assert_eq!(argv, vec![Bytes::from("GET"), Bytes::from("k")]);
    }

    #[test]
    fn test_frame_to_argv_rejects_non_array() {
        assert!(frame_to_argv(RespValue::Integer(1)).is_err());
    }
}
