//! Stored Value Variants
//!
//! Every key maps to exactly one `Value`. The scalar variants (`Int`,
//! `Float`, `Str`) come out of the ingest-side type adaptation rule; the
//! container variants own their contents until the key is deleted, expired,
//! evicted, or overwritten with a different variant.
//!
//! The `TYPE` command and all type-mismatch errors are answered from the
//! variant tag — nothing in the server reflects on raw bytes to decide what
//! a key holds.

use crate::protocol::types::{format_float, Adapted};
use crate::storage::hash::HashValue;
use crate::storage::sorted_set::SortedSet;
use bytes::Bytes;
use std::collections::{HashSet, VecDeque};

/// Fixed per-element bookkeeping charged by `size_of` for container
/// entries (pointers, lengths, hashes).
const ELEMENT_OVERHEAD: usize = 16;

/// A value stored under a key: one scalar or one container.
#[derive(Debug, Clone)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(Bytes),
    List(VecDeque<Bytes>),
    Set(HashSet<Bytes>),
    SortedSet(SortedSet),
    Hash(HashValue),
}

impl Value {
    /// The type name reported by TYPE and used in mismatch errors.
    /// All three scalar variants present as "string" on the wire.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) | Value::Float(_) | Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::SortedSet(_) => "zset",
            Value::Hash(_) => "hash",
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_) | Value::Str(_))
    }

    /// Renders a scalar as its wire bytes. Containers have no scalar form.
    pub fn scalar_bytes(&self) -> Option<Bytes> {
        match self {
            Value::Int(n) => Some(Bytes::from(n.to_string())),
            Value::Float(f) => Some(Bytes::from(format_float(*f))),
            Value::Str(b) => Some(b.clone()),
            _ => None,
        }
    }

    /// The integer reading of a scalar, when it has one.
    ///
    /// `Str` bytes that happen to parse as an integer count (they can arise
    /// from APPEND/SETRANGE edits); floats do not, even when integral.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Str(b) => std::str::from_utf8(b).ok()?.parse().ok(),
            _ => None,
        }
    }

    /// The float reading of a scalar, when it has one.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            Value::Str(b) => {
                let f: f64 = std::str::from_utf8(b).ok()?.parse().ok()?;
                (!f.is_nan()).then_some(f)
            }
            _ => None,
        }
    }

    /// True for a container variant with nothing left in it. Keys holding
    /// an empty container are removed by the keyspace on write-back.
    pub fn is_empty_container(&self) -> bool {
        match self {
            Value::List(l) => l.is_empty(),
            Value::Set(s) => s.is_empty(),
            Value::SortedSet(z) => z.is_empty(),
            Value::Hash(h) => h.is_empty(),
            _ => false,
        }
    }

    /// Estimated retained bytes for this value.
    ///
    /// The formula is explicit per variant rather than derived from
    /// allocator internals:
    /// - scalars: 8 bytes, or the byte length for `Str`
    /// - list/set: Σ element length + 16 bytes bookkeeping per element
    /// - hash: Σ (field + value length) + 32 bytes per field (bookkeeping
    ///   plus the optional field expiry)
    /// - sorted set: Σ member length × 2 (member map + ordered view) + 8
    ///   bytes score + 16 bytes bookkeeping per member
    pub fn size_of(&self) -> usize {
        match self {
            Value::Int(_) | Value::Float(_) => 8,
            Value::Str(b) => b.len(),
            Value::List(l) => l.iter().map(|v| v.len() + ELEMENT_OVERHEAD).sum(),
            Value::Set(s) => s.iter().map(|v| v.len() + ELEMENT_OVERHEAD).sum(),
            Value::SortedSet(z) => z.mem_usage(),
            Value::Hash(h) => h.mem_usage(),
        }
    }
}

impl From<Adapted> for Value {
    fn from(adapted: Adapted) -> Self {
        match adapted {
            Adapted::Int(n) => Value::Int(n),
            Adapted::Float(f) => Value::Float(f),
            Adapted::Str(b) => Value::Str(b),
        }
    }
}
