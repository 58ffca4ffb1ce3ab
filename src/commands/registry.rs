//! Command Registry
//!
//! A flat list of command descriptors built once at startup. Each
//! descriptor declares the canonical name, an optional sub-command (each
//! sub-command is an independent descriptor), category tags, the owning
//! module tag, a key-extraction function, and the handler itself.
//!
//! The key-extraction function maps an argv onto the three access sets —
//! channels, read keys, write keys — that drive ACL checks and the
//! on-write eviction check before the handler runs.

use crate::commands::{CommandError, CommandResult, Session};
use crate::server::Server;
use bytes::Bytes;

/// The access sets a command touches, extracted from its argv.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccessedKeys {
    pub channels: Vec<Bytes>,
    pub read: Vec<Bytes>,
    pub write: Vec<Bytes>,
}

impl AccessedKeys {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn reads(keys: Vec<Bytes>) -> Self {
        Self {
            read: keys,
            ..Self::default()
        }
    }

    pub fn writes(keys: Vec<Bytes>) -> Self {
        Self {
            write: keys,
            ..Self::default()
        }
    }

    pub fn channels(channels: Vec<Bytes>) -> Self {
        Self {
            channels,
            ..Self::default()
        }
    }
}

pub type KeysFn = fn(&[Bytes]) -> Result<AccessedKeys, CommandError>;
pub type HandlerFn = fn(&Server, &mut Session, &[Bytes]) -> CommandResult;

/// One command (or sub-command) descriptor.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Canonical uppercase name.
    pub name: &'static str,
    /// Uppercase sub-command name; descriptors of the same name with
    /// different subs are independent commands.
    pub sub: Option<&'static str>,
    /// Category tags (read/write/fast/slow/dangerous/...).
    pub categories: &'static [&'static str],
    /// Owning module tag.
    pub module: &'static str,
    pub keys: KeysFn,
    pub handler: HandlerFn,
}

/// The startup-built registry of every built-in command.
#[derive(Debug)]
pub struct CommandRegistry {
    commands: Vec<CommandSpec>,
}

impl CommandRegistry {
    /// Builds the registry from every family's registration function.
    pub fn standard() -> Self {
        let mut commands = Vec::new();
        crate::commands::strings::register(&mut commands);
        crate::commands::keys::register(&mut commands);
        crate::commands::lists::register(&mut commands);
        crate::commands::sets::register(&mut commands);
        crate::commands::hashes::register(&mut commands);
        crate::commands::sorted_sets::register(&mut commands);
        crate::commands::pubsub_cmds::register(&mut commands);
        crate::commands::admin::register(&mut commands);
        Self { commands }
    }

    /// Every registered descriptor; the public enumeration surface used by
    /// COMMAND LIST and tests.
    pub fn all(&self) -> &[CommandSpec] {
        &self.commands
    }

    /// Resolves an argv to a descriptor. Commands with sub-commands
    /// consume argv[1] as the selector.
    pub fn lookup(&self, argv: &[Bytes]) -> Result<&CommandSpec, CommandError> {
        let name = String::from_utf8_lossy(&argv[0]).to_ascii_uppercase();
        let candidates: Vec<&CommandSpec> = self
            .commands
            .iter()
            .filter(|c| c.name == name)
            .collect();

        if candidates.is_empty() {
            return Err(CommandError::Unknown(name.to_lowercase()));
        }
        if candidates.len() == 1 && candidates[0].sub.is_none() {
            return Ok(candidates[0]);
        }

        let Some(sub_raw) = argv.get(1) else {
            return Err(CommandError::wrong_args(&name));
        };
        let sub = String::from_utf8_lossy(sub_raw).to_ascii_uppercase();
        candidates
            .into_iter()
            .find(|c| c.sub == Some(sub.as_str()))
            .ok_or_else(|| {
                CommandError::Unknown(format!("{} {}", name.to_lowercase(), sub.to_lowercase()))
            })
    }
}

// ========================================================================
// Shared key-extraction shapes
// ========================================================================

/// No keys and no channels (PING, INFO, ...).
pub fn no_keys(_argv: &[Bytes]) -> Result<AccessedKeys, CommandError> {
    Ok(AccessedKeys::none())
}

/// argv[1] is read.
pub fn key_read(argv: &[Bytes]) -> Result<AccessedKeys, CommandError> {
    Ok(AccessedKeys::reads(argv.get(1).cloned().into_iter().collect()))
}

/// argv[1] is written.
pub fn key_write(argv: &[Bytes]) -> Result<AccessedKeys, CommandError> {
    Ok(AccessedKeys::writes(argv.get(1).cloned().into_iter().collect()))
}

/// argv[1..] are read.
pub fn keys_read(argv: &[Bytes]) -> Result<AccessedKeys, CommandError> {
    Ok(AccessedKeys::reads(argv.iter().skip(1).cloned().collect()))
}

/// argv[1..] are written.
pub fn keys_write(argv: &[Bytes]) -> Result<AccessedKeys, CommandError> {
    Ok(AccessedKeys::writes(argv.iter().skip(1).cloned().collect()))
}

/// argv[1], argv[3], argv[5], ... are written (MSET shape).
pub fn alternating_keys_write(argv: &[Bytes]) -> Result<AccessedKeys, CommandError> {
    Ok(AccessedKeys::writes(
        argv.iter().skip(1).step_by(2).cloned().collect(),
    ))
}

/// argv[1] is written, argv[2..] are read (STORE shape).
pub fn store_keys(argv: &[Bytes]) -> Result<AccessedKeys, CommandError> {
    let mut keys = AccessedKeys::none();
    if let Some(dst) = argv.get(1) {
        keys.write.push(dst.clone());
    }
    keys.read.extend(argv.iter().skip(2).cloned());
    Ok(keys)
}

/// argv[1] and argv[2] are both written (RENAME / LMOVE / SMOVE shape).
pub fn two_keys_write(argv: &[Bytes]) -> Result<AccessedKeys, CommandError> {
    Ok(AccessedKeys::writes(
        argv.iter().skip(1).take(2).cloned().collect(),
    ))
}
