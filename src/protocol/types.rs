//! RESP (Redis Serialization Protocol) Data Types
//!
//! Defines the wire-level value enum used for both parsing incoming frames
//! and serializing outgoing replies, plus the ingest-side type adaptation
//! helper that turns raw bulk bytes into an integer, float, or string.
//!
//! ## Protocol Format
//!
//! Each RESP frame starts with a type prefix byte:
//! - `+` Simple String
//! - `-` Error
//! - `:` Integer
//! - `$` Bulk String (`$-1` is the null bulk)
//! - `*` Array
//!
//! All frames are terminated with CRLF (`\r\n`).

use bytes::Bytes;
use std::fmt;

/// The CRLF terminator used by RESP.
pub const CRLF: &[u8] = b"\r\n";

/// RESP type prefix bytes.
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A value in the RESP protocol.
///
/// Covers every reply shape the server produces: acknowledgements, errors,
/// counts, scalar payloads, and (possibly nested) collections.
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// Non-binary-safe string without CRLF. Format: `+<string>\r\n`
    SimpleString(String),

    /// Error condition. Format: `-<message>\r\n`
    Error(String),

    /// 64-bit signed integer. Format: `:<integer>\r\n`
    Integer(i64),

    /// Binary-safe string. Format: `$<length>\r\n<data>\r\n`
    BulkString(Bytes),

    /// Null bulk string (`$-1\r\n`); also produced when parsing `*-1\r\n`.
    Null,

    /// Array of any RESP values. Format: `*<count>\r\n<elements...>`
    Array(Vec<RespValue>),
}

impl RespValue {
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    /// Bulk string carrying a float formatted with trailing-zero trimming.
    pub fn bulk_float(f: f64) -> Self {
        RespValue::BulkString(Bytes::from(format_float(f)))
    }

    pub fn null() -> Self {
        RespValue::Null
    }

    pub fn array(values: Vec<RespValue>) -> Self {
        RespValue::Array(values)
    }

    /// The canonical acknowledgement reply.
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    pub fn pong() -> Self {
        RespValue::SimpleString("PONG".to_string())
    }

    /// Serializes the value to a fresh byte vector.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes the value into an existing buffer.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => {
                buf.push(prefix::SIMPLE_STRING);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            RespValue::Error(s) => {
                buf.push(prefix::ERROR);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            RespValue::Integer(n) => {
                buf.push(prefix::INTEGER);
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(CRLF);
            }
            RespValue::BulkString(data) => {
                buf.push(prefix::BULK_STRING);
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            RespValue::Null => {
                buf.push(prefix::BULK_STRING);
                buf.extend_from_slice(b"-1");
                buf.extend_from_slice(CRLF);
            }
            RespValue::Array(values) => {
                buf.push(prefix::ARRAY);
                buf.extend_from_slice(values.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                for value in values {
                    value.serialize_into(buf);
                }
            }
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::Null)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RespValue::BulkString(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[RespValue]> {
        match self {
            RespValue::Array(arr) => Some(arr),
            _ => None,
        }
    }
}

impl fmt::Display for RespValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RespValue::SimpleString(s) => write!(f, "\"{}\"", s),
            RespValue::Error(s) => write!(f, "(error) {}", s),
            RespValue::Integer(n) => write!(f, "(integer) {}", n),
            RespValue::BulkString(data) => {
                if let Ok(s) = std::str::from_utf8(data) {
                    write!(f, "\"{}\"", s)
                } else {
                    write!(f, "(binary data, {} bytes)", data.len())
                }
            }
            RespValue::Null => write!(f, "(nil)"),
            RespValue::Array(values) => {
                if values.is_empty() {
                    write!(f, "(empty array)")
                } else {
                    writeln!(f)?;
                    for (i, v) in values.iter().enumerate() {
                        writeln!(f, "{}) {}", i + 1, v)?;
                    }
                    Ok(())
                }
            }
        }
    }
}

/// Result of adapting raw bulk bytes at the ingest boundary.
///
/// The rule is int-first, float-second, string-fallback: `"42"` becomes an
/// integer, `"2.5"` a float, anything else stays a byte string. Storage
/// internals only ever see the adapted form and never re-parse raw bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum Adapted {
    Int(i64),
    Float(f64),
    Str(Bytes),
}

/// Adapts a bulk body to its numeric type when it parses as one.
pub fn adapt_type(raw: Bytes) -> Adapted {
    if let Ok(s) = std::str::from_utf8(&raw) {
        if let Ok(n) = s.parse::<i64>() {
            return Adapted::Int(n);
        }
        if let Ok(f) = s.parse::<f64>() {
            // NaN has no ordering and no stable wire form; keep the bytes.
            if !f.is_nan() {
                return Adapted::Float(f);
            }
        }
    }
    Adapted::Str(raw)
}

/// Formats a float the way scores are rendered on the wire: the shortest
/// representation that round-trips, with trailing zeros trimmed, so `2.0`
/// renders as `2` and infinities as `inf` / `-inf`.
pub fn format_float(f: f64) -> String {
    format!("{}", f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_string_serialize() {
        assert_eq!(RespValue::simple_string("OK").serialize(), b"+OK\r\n");
    }

    #[test]
    fn test_error_serialize() {
        assert_eq!(
            RespValue::error("ERR unknown command").serialize(),
            b"-ERR unknown command\r\n"
        );
    }

    #[test]
    fn test_integer_serialize() {
        assert_eq!(RespValue::integer(1000).serialize(), b":1000\r\n");
        assert_eq!(RespValue::integer(-42).serialize(), b":-42\r\n");
    }

    #[test]
    fn test_bulk_string_serialize() {
        assert_eq!(
            RespValue::bulk_string(Bytes::from("hello")).serialize(),
            b"$5\r\nhello\r\n"
        );
    }

    #[test]
    fn test_null_serialize() {
        assert_eq!(RespValue::null().serialize(), b"$-1\r\n");
    }

    #[test]
    fn test_array_serialize() {
        let value = RespValue::array(vec![
            RespValue::bulk_string(Bytes::from("GET")),
            RespValue::bulk_string(Bytes::from("name")),
        ]);
        assert_eq!(value.serialize(), b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n");
    }

    #[test]
    fn test_nested_array_serialize() {
        let value = RespValue::array(vec![
            RespValue::integer(1),
            RespValue::array(vec![RespValue::integer(2), RespValue::integer(3)]),
        ]);
        assert_eq!(value.serialize(), b"*2\r\n:1\r\n*2\r\n:2\r\n:3\r\n");
    }

    #[test]
    fn test_adapt_int_first() {
        assert_eq!(adapt_type(Bytes::from("42")), Adapted::Int(42));
        assert_eq!(adapt_type(Bytes::from("-7")), Adapted::Int(-7));
    }

    #[test]
    fn test_adapt_float_second() {
        assert_eq!(adapt_type(Bytes::from("2.5")), Adapted::Float(2.5));
        assert_eq!(
            adapt_type(Bytes::from("inf")),
            Adapted::Float(f64::INFINITY)
        );
    }

    #[test]
    fn test_adapt_string_fallback() {
        assert_eq!(
            adapt_type(Bytes::from("hello")),
            Adapted::Str(Bytes::from("hello"))
        );
        assert_eq!(
            adapt_type(Bytes::from("nan")),
            Adapted::Str(Bytes::from("nan"))
        );
    }

    #[test]
    fn test_format_float_trims() {
        assert_eq!(format_float(2.0), "2");
        assert_eq!(format_float(2.5), "2.5");
        assert_eq!(format_float(f64::INFINITY), "inf");
        assert_eq!(format_float(f64::NEG_INFINITY), "-inf");
    }
}
