//! Command Layer
//!
//! Everything between a parsed argv and a RESP reply: the error taxonomy,
//! the command registry of descriptors, the dispatcher that walks
//! argv -> descriptor -> key extraction -> ACL -> handler, and the per-family
//! handler modules.
//!
//! ## Architecture
//!
//! ```text
//! argv ──> dispatch ──> CommandSpec ──> keys fn ──> ACL ──> handler
//!                            │                                 │
//!                       registry.rs                     strings.rs keys.rs
//!                                                       lists.rs sets.rs
//!                                                       hashes.rs sorted_sets.rs
//!                                                       pubsub_cmds.rs admin.rs
//! ```
//!
//! Handlers are pure functions over (server, session, argv). They return
//! `Result<Reply, CommandError>`; the dispatcher maps errors onto the
//! `-ERR ...` wire form so validation failures never mutate anything.

pub mod admin;
pub mod dispatch;
pub mod hashes;
pub mod keys;
pub mod lists;
pub mod pubsub_cmds;
pub mod registry;
pub mod sets;
pub mod sorted_sets;
pub mod strings;

pub use dispatch::{dispatch, Session};
pub use registry::{AccessedKeys, CommandRegistry, CommandSpec};

use crate::protocol::RespValue;
use bytes::Bytes;
use thiserror::Error;

/// Error kinds a command can produce. Every variant surfaces to the client
/// as a single `-ERR ...` line; integer sentinels and null bulks (TTL -2,
/// missing-key GET) are successful replies, not errors.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CommandError {
    /// Argv length or shape does not match the command.
    #[error("wrong number of arguments for '{0}' command")]
    WrongArgs(String),

    /// Operation on a value of the wrong container kind.
    #[error("value at {key} is not a {expected}")]
    TypeMismatch { key: String, expected: &'static str },

    /// A numeric or option token did not parse.
    #[error("{0}")]
    Parse(String),

    /// Mutually exclusive options supplied together.
    #[error("{0}")]
    OptionConflict(String),

    /// An addressed key or field does not exist where required.
    #[error("{0}")]
    NotFound(String),

    /// Index or rank outside the container.
    #[error("{0}")]
    OutOfRange(String),

    /// A module command failed internally.
    #[error("module error: {0}")]
    Module(String),

    /// ACL denied the command.
    #[error("permission denied for '{0}' command")]
    Auth(String),

    /// A backing collaborator is temporarily unavailable.
    #[error("{0}")]
    Transient(String),

    #[error("unknown command '{0}'")]
    Unknown(String),

    /// Over the memory cap under the noeviction policy.
    #[error("command not allowed when used memory > 'maxmemory'")]
    OutOfMemory,
}

impl CommandError {
    pub fn wrong_args(cmd: &str) -> Self {
        CommandError::WrongArgs(cmd.to_lowercase())
    }

    pub fn wrong_type(key: &[u8], expected: &'static str) -> Self {
        CommandError::TypeMismatch {
            key: String::from_utf8_lossy(key).into_owned(),
            expected,
        }
    }

    pub fn not_a_float() -> Self {
        CommandError::Parse("value is not a valid float".to_string())
    }

    pub fn not_an_integer() -> Self {
        CommandError::Parse("value is not an integer or out of range".to_string())
    }

    pub fn syntax() -> Self {
        CommandError::Parse("syntax error".to_string())
    }

    /// The wire form: one `-ERR ...` line.
    pub fn to_resp(&self) -> RespValue {
        RespValue::error(format!("ERR {}", self))
    }
}

/// A handler's successful output: one reply frame, or several written
/// back-to-back (subscription confirmations are one frame per channel).
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    One(RespValue),
    Many(Vec<RespValue>),
}

impl Reply {
    pub fn value(v: RespValue) -> CommandResult {
        Ok(Reply::One(v))
    }

    pub fn frames(frames: Vec<RespValue>) -> CommandResult {
        Ok(Reply::Many(frames))
    }

    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            Reply::One(v) => v.serialize_into(buf),
            Reply::Many(frames) => {
                for frame in frames {
                    frame.serialize_into(buf);
                }
            }
        }
    }
}

impl From<RespValue> for Reply {
    fn from(v: RespValue) -> Self {
        Reply::One(v)
    }
}

pub type CommandResult = Result<Reply, CommandError>;

// ========================================================================
// Argv helpers shared by every family module
// ========================================================================

/// UTF-8 view of an argument token.
pub fn as_str(raw: &Bytes) -> Result<&str, CommandError> {
    std::str::from_utf8(raw).map_err(|_| CommandError::Parse("invalid UTF-8 argument".to_string()))
}

/// Uppercased option token for case-insensitive matching.
pub fn upper(raw: &Bytes) -> String {
    String::from_utf8_lossy(raw).to_ascii_uppercase()
}

/// Integer argument, with the canonical integer error.
pub fn parse_int(raw: &Bytes) -> Result<i64, CommandError> {
    as_str(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(CommandError::not_an_integer)
}

/// Float argument, with the canonical float error. Accepts `inf`/`-inf`
/// (and `+inf`); rejects NaN.
pub fn parse_float(raw: &Bytes) -> Result<f64, CommandError> {
    let f: f64 = as_str(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(CommandError::not_a_float)?;
    if f.is_nan() {
        return Err(CommandError::not_a_float());
    }
    Ok(f)
}
