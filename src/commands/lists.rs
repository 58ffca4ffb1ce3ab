//! List Command Family
//!
//! Head/tail pushes and pops (with the X variants that refuse to create),
//! index addressing with negative-from-tail semantics, trimming that drops
//! the key when nothing is left, and the atomic two-key LMOVE.

use crate::commands::registry::{self, CommandSpec};
use crate::commands::{parse_int, upper, CommandError, CommandResult, Reply, Session};
use crate::protocol::RespValue;
use crate::server::Server;
use crate::storage::{KeyEntry, Value};
use bytes::Bytes;
use std::collections::VecDeque;

pub fn register(out: &mut Vec<CommandSpec>) {
    let specs = [
        ("LPUSH", &["write", "denyoom", "list", "fast"][..], registry::key_write as registry::KeysFn, cmd_lpush as registry::HandlerFn),
        ("RPUSH", &["write", "denyoom", "list", "fast"], registry::key_write, cmd_rpush),
        ("LPUSHX", &["write", "denyoom", "list", "fast"], registry::key_write, cmd_lpushx),
        ("RPUSHX", &["write", "denyoom", "list", "fast"], registry::key_write, cmd_rpushx),
        ("LPOP", &["write", "list", "fast"], registry::key_write, cmd_lpop),
        ("RPOP", &["write", "list", "fast"], registry::key_write, cmd_rpop),
        ("LLEN", &["read", "list", "fast"], registry::key_read, cmd_llen),
        ("LINDEX", &["read", "list", "slow"], registry::key_read, cmd_lindex),
        ("LRANGE", &["read", "list", "slow"], registry::key_read, cmd_lrange),
        ("LSET", &["write", "denyoom", "list", "slow"], registry::key_write, cmd_lset),
        ("LREM", &["write", "list", "slow"], registry::key_write, cmd_lrem),
        ("LTRIM", &["write", "list", "slow"], registry::key_write, cmd_ltrim),
        ("LMOVE", &["write", "denyoom", "list", "slow"], registry::two_keys_write, cmd_lmove),
    ];
    out.extend(specs.map(|(name, categories, keys, handler)| CommandSpec {
        name,
        sub: None,
        categories,
        module: "list",
        keys,
        handler,
    }));
}

/// The entry's list, or a type error.
fn as_list<'a>(entry: &'a mut KeyEntry, key: &[u8]) -> Result<&'a mut VecDeque<Bytes>, CommandError> {
    match &mut entry.value {
        Value::List(items) => Ok(items),
        _ => Err(CommandError::wrong_type(key, "list")),
    }
}

#[derive(Clone, Copy, PartialEq)]
enum End {
    Left,
    Right,
}

impl End {
    fn parse(raw: &Bytes) -> Result<Self, CommandError> {
        match upper(raw).as_str() {
            "LEFT" => Ok(End::Left),
            "RIGHT" => Ok(End::Right),
            _ => Err(CommandError::syntax()),
        }
    }
}

fn push(server: &Server, session: &Session, argv: &[Bytes], end: End, create: bool) -> CommandResult {
    let cmd = if end == End::Left { "LPUSH" } else { "RPUSH" };
    if argv.len() < 3 {
        return Err(CommandError::wrong_args(cmd));
    }
    let key = argv[1].clone();
    let values = &argv[2..];

    let run = |entry: &mut KeyEntry| -> CommandResult {
        let items = as_list(entry, &key)?;
        for value in values {
            match end {
                // Each value lands at the head in turn: LPUSH a b c -> [c, b, a].
                End::Left => items.push_front(value.clone()),
                End::Right => items.push_back(value.clone()),
            }
        }
        Reply::value(RespValue::integer(items.len() as i64))
    };

    if create {
        server
            .keyspace()
            .entry_or_insert(session.db, &key, || Value::List(VecDeque::new()), run)
    } else {
        // X variant: refuse to create the list.
        server
            .keyspace()
            .write_entry(session.db, &key, run)
            .unwrap_or(Reply::value(RespValue::integer(0)))
    }
}

/// LPUSH key value [value ...]
fn cmd_lpush(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    push(server, session, argv, End::Left, true)
}

/// RPUSH key value [value ...]
fn cmd_rpush(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    push(server, session, argv, End::Right, true)
}

/// LPUSHX key value [value ...] -> 0 when the list does not exist
fn cmd_lpushx(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    push(server, session, argv, End::Left, false)
}

/// RPUSHX key value [value ...]
fn cmd_rpushx(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    push(server, session, argv, End::Right, false)
}

fn pop(server: &Server, session: &Session, argv: &[Bytes], end: End) -> CommandResult {
    let cmd = if end == End::Left { "LPOP" } else { "RPOP" };
    if !(2..=3).contains(&argv.len()) {
        return Err(CommandError::wrong_args(cmd));
    }
    let key = &argv[1];
    let count = match argv.get(2) {
        Some(raw) => {
            let n = parse_int(raw)?;
            if n < 0 {
                return Err(CommandError::OutOfRange("value is out of range, must be positive".to_string()));
            }
            Some(n as usize)
        }
        None => None,
    };

    let popped = server.keyspace().write_entry(session.db, key, |entry| {
        let items = as_list(entry, key)?;
        let take = count.unwrap_or(1).min(items.len());
        let mut out = Vec::with_capacity(take);
        for _ in 0..take {
            let item = match end {
                End::Left => items.pop_front(),
                End::Right => items.pop_back(),
            };
            match item {
                Some(item) => out.push(item),
                None => break,
            }
        }
        Ok(out)
    });

    match popped {
        None => Reply::value(RespValue::Null),
        Some(Err(e)) => Err(e),
        Some(Ok(items)) => match count {
            None => Reply::value(
                items
                    .into_iter()
                    .next()
                    .map(RespValue::BulkString)
                    .unwrap_or(RespValue::Null),
            ),
            Some(_) => Reply::value(RespValue::Array(
                items.into_iter().map(RespValue::BulkString).collect(),
            )),
        },
    }
}

/// LPOP key [count]
fn cmd_lpop(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    pop(server, session, argv, End::Left)
}

/// RPOP key [count]
fn cmd_rpop(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    pop(server, session, argv, End::Right)
}

/// LLEN key
fn cmd_llen(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 2 {
        return Err(CommandError::wrong_args("LLEN"));
    }
    let key = &argv[1];
    let len = server
        .keyspace()
        .read_entry(session.db, key, |entry| match &entry.value {
            Value::List(items) => Ok(items.len()),
            _ => Err(CommandError::wrong_type(key, "list")),
        })
        .transpose()?
        .unwrap_or(0);
    Reply::value(RespValue::integer(len as i64))
}

/// LINDEX key index (negative addresses from the tail)
fn cmd_lindex(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 3 {
        return Err(CommandError::wrong_args("LINDEX"));
    }
    let key = &argv[1];
    let index = parse_int(&argv[2])?;

    let found = server
        .keyspace()
        .read_entry(session.db, key, |entry| match &entry.value {
            Value::List(items) => {
                let len = items.len() as i64;
                let at = if index < 0 { len + index } else { index };
                if at < 0 || at >= len {
                    Ok(None)
                } else {
                    Ok(items.get(at as usize).cloned())
                }
            }
            _ => Err(CommandError::wrong_type(key, "list")),
        })
        .transpose()?
        .flatten();
    Reply::value(found.map(RespValue::BulkString).unwrap_or(RespValue::Null))
}

/// Normalizes an inclusive (start, stop) window against a length; `None`
/// when the window is empty after normalization (start > stop included).
fn normalize_window(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    let mut start = if start < 0 { len + start } else { start };
    let mut stop = if stop < 0 { len + stop } else { stop };
    if start < 0 {
        start = 0;
    }
    if stop >= len {
        stop = len - 1;
    }
    if start > stop || start >= len || stop < 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}

/// LRANGE key start stop
fn cmd_lrange(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 4 {
        return Err(CommandError::wrong_args("LRANGE"));
    }
    let key = &argv[1];
    let start = parse_int(&argv[2])?;
    let stop = parse_int(&argv[3])?;

    let items = server
        .keyspace()
        .read_entry(session.db, key, |entry| match &entry.value {
            Value::List(items) => match normalize_window(start, stop, items.len()) {
                Some((from, to)) => Ok(items
                    .iter()
                    .skip(from)
                    .take(to - from + 1)
                    .cloned()
                    .collect::<Vec<_>>()),
                None => Ok(Vec::new()),
            },
            _ => Err(CommandError::wrong_type(key, "list")),
        })
        .transpose()?
        .unwrap_or_default();
    Reply::value(RespValue::Array(
        items.into_iter().map(RespValue::BulkString).collect(),
    ))
}

/// LSET key index value
fn cmd_lset(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 4 {
        return Err(CommandError::wrong_args("LSET"));
    }
    let key = &argv[1];
    let index = parse_int(&argv[2])?;
    let value = argv[3].clone();

    let result = server.keyspace().write_entry(session.db, key, |entry| {
        let items = as_list(entry, key)?;
        let len = items.len() as i64;
        let at = if index < 0 { len + index } else { index };
        if at < 0 || at >= len {
            return Err(CommandError::OutOfRange("index out of range".to_string()));
        }
        items[at as usize] = value;
        Ok(())
    });
    match result {
        None => Err(CommandError::NotFound("no such key".to_string())),
        Some(Err(e)) => Err(e),
        Some(Ok(())) => Reply::value(RespValue::ok()),
    }
}

/// LREM key count value
///
/// count > 0 removes from head to tail, count < 0 from tail to head,
/// count = 0 removes every occurrence.
fn cmd_lrem(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 4 {
        return Err(CommandError::wrong_args("LREM"));
    }
    let key = &argv[1];
    let count = parse_int(&argv[2])?;
    let needle = argv[3].clone();

    let removed = server
        .keyspace()
        .write_entry(session.db, key, |entry| {
            let items = as_list(entry, key)?;
            let max_remove = if count == 0 {
                usize::MAX
            } else {
                count.unsigned_abs() as usize
            };
            let mut removed = 0usize;

            if count >= 0 {
                let mut i = 0;
                while i < items.len() && removed < max_remove {
                    if items[i] == needle {
                        items.remove(i);
                        removed += 1;
                    } else {
                        i += 1;
                    }
                }
            } else {
                let mut i = items.len();
                while i > 0 && removed < max_remove {
                    i -= 1;
                    if items[i] == needle {
                        items.remove(i);
                        removed += 1;
                    }
                }
            }
            Ok(removed)
        })
        .transpose()?
        .unwrap_or(0);
    Reply::value(RespValue::integer(removed as i64))
}

/// LTRIM key start stop — an empty result deletes the key.
fn cmd_ltrim(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 4 {
        return Err(CommandError::wrong_args("LTRIM"));
    }
    let key = &argv[1];
    let start = parse_int(&argv[2])?;
    let stop = parse_int(&argv[3])?;

    server
        .keyspace()
        .write_entry(session.db, key, |entry| {
            let items = as_list(entry, key)?;
            match normalize_window(start, stop, items.len()) {
                Some((from, to)) => {
                    items.truncate(to + 1);
                    items.drain(..from);
                }
                None => items.clear(),
            }
            Ok(())
        })
        .transpose()?;
    Reply::value(RespValue::ok())
}

/// LMOVE source destination LEFT|RIGHT LEFT|RIGHT
///
/// Atomically pops from the source's chosen end and pushes to the
/// destination's chosen end, under one database lock.
fn cmd_lmove(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 5 {
        return Err(CommandError::wrong_args("LMOVE"));
    }
    let src = argv[1].clone();
    let dst = argv[2].clone();
    let from = End::parse(&argv[3])?;
    let to = End::parse(&argv[4])?;

    server.keyspace().with_db(session.db, |view| {
        // Validate both ends before mutating anything.
        match view.live(&src) {
            None => return Reply::value(RespValue::Null),
            Some(entry) if !matches!(entry.value, Value::List(_)) => {
                return Err(CommandError::wrong_type(&src, "list"));
            }
            Some(_) => {}
        }
        if let Some(entry) = view.live(&dst) {
            if !matches!(entry.value, Value::List(_)) {
                return Err(CommandError::wrong_type(&dst, "list"));
            }
        }

        let element = {
            let Some(entry) = view.live_mut(&src) else {
                return Reply::value(RespValue::Null);
            };
            let items = as_list(entry, &src)?;
            let popped = match from {
                End::Left => items.pop_front(),
                End::Right => items.pop_back(),
            };
            match popped {
                Some(e) => e,
                None => return Reply::value(RespValue::Null),
            }
        };
        view.drop_if_empty(&src);

        match view.live_mut(&dst) {
            Some(entry) => {
                let items = as_list(entry, &dst)?;
                match to {
                    End::Left => items.push_front(element.clone()),
                    End::Right => items.push_back(element.clone()),
                }
            }
            None => {
                let mut items = VecDeque::new();
                items.push_back(element.clone());
                view.set_value(dst.clone(), Value::List(items));
            }
        }
        Reply::value(RespValue::BulkString(element))
    })
}
