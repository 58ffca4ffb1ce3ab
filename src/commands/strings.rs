//! String-Scalar Command Family
//!
//! SET and its option surface, the counter commands, and the byte-level
//! editors. Values enter through the ingest adaptation rule, so a SET of
//! "42" stores an integer and INCR never re-parses raw bytes; APPEND and
//! SETRANGE re-adapt their result for the same reason.

use crate::commands::registry::{self, CommandSpec};
use crate::commands::{as_str, parse_int, upper, CommandError, CommandResult, Reply, Session};
use crate::protocol::types::{adapt_type, format_float};
use crate::protocol::RespValue;
use crate::server::Server;
use crate::storage::keyspace::SetExpiry;
use crate::storage::Value;
use bytes::Bytes;
use std::time::Duration;

pub fn register(out: &mut Vec<CommandSpec>) {
    let specs = [
        ("SET", &["write", "denyoom", "string", "slow"][..], registry::key_write as registry::KeysFn, cmd_set as registry::HandlerFn),
        ("GET", &["read", "string", "fast"], registry::key_read, cmd_get),
        ("GETDEL", &["write", "string", "fast"], registry::key_write, cmd_getdel),
        ("MSET", &["write", "denyoom", "string", "slow"], registry::alternating_keys_write, cmd_mset),
        ("MGET", &["read", "string", "fast"], registry::keys_read, cmd_mget),
        ("APPEND", &["write", "denyoom", "string", "fast"], registry::key_write, cmd_append),
        ("STRLEN", &["read", "string", "fast"], registry::key_read, cmd_strlen),
        ("SETRANGE", &["write", "denyoom", "string", "slow"], registry::key_write, cmd_setrange),
        ("GETRANGE", &["read", "string", "slow"], registry::key_read, cmd_getrange),
        ("INCR", &["write", "denyoom", "string", "fast"], registry::key_write, cmd_incr),
        ("DECR", &["write", "denyoom", "string", "fast"], registry::key_write, cmd_decr),
        ("INCRBY", &["write", "denyoom", "string", "fast"], registry::key_write, cmd_incrby),
        ("DECRBY", &["write", "denyoom", "string", "fast"], registry::key_write, cmd_decrby),
        ("INCRBYFLOAT", &["write", "denyoom", "string", "fast"], registry::key_write, cmd_incrbyfloat),
    ];
    out.extend(specs.map(|(name, categories, keys, handler)| CommandSpec {
        name,
        sub: None,
        categories,
        module: "string",
        keys,
        handler,
    }));
}

/// SET key value [NX|XX] [GET] [EX s | PX ms | EXAT s | PXAT ms]
///
/// The expiry options are mutually exclusive, as are NX and XX. Without an
/// expiry option an existing key keeps its expiration.
fn cmd_set(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() < 3 {
        return Err(CommandError::wrong_args("SET"));
    }
    let key = argv[1].clone();
    let value = Value::from(adapt_type(argv[2].clone()));

    let mut nx = false;
    let mut xx = false;
    let mut want_old = false;
    let mut expiry = SetExpiry::Keep;
    let mut expiry_option: Option<&'static str> = None;

    let set_expiry = |opt: &'static str,
                      at: SetExpiry,
                      prev: &mut Option<&'static str>|
     -> Result<SetExpiry, CommandError> {
        if let Some(existing) = prev {
            return Err(CommandError::OptionConflict(format!(
                "cannot specify {} when {} is already specified",
                opt, existing
            )));
        }
        *prev = Some(opt);
        Ok(at)
    };

    let mut i = 3;
    while i < argv.len() {
        match upper(&argv[i]).as_str() {
            "NX" => {
                if xx {
                    return Err(CommandError::OptionConflict(
                        "cannot specify NX when XX is already specified".to_string(),
                    ));
                }
                nx = true;
            }
            "XX" => {
                if nx {
                    return Err(CommandError::OptionConflict(
                        "cannot specify XX when NX is already specified".to_string(),
                    ));
                }
                xx = true;
            }
            "GET" => want_old = true,
            opt @ ("EX" | "PX" | "EXAT" | "PXAT") => {
                i += 1;
                let raw = argv.get(i).ok_or_else(CommandError::syntax)?;
                let n = parse_int(raw)?;
                if n <= 0 {
                    return Err(CommandError::Parse(
                        "invalid expire time in 'set' command".to_string(),
                    ));
                }
                let clock = server.keyspace().clock();
                let at = match opt {
                    "EX" => clock.now() + Duration::from_secs(n as u64),
                    "PX" => clock.now() + Duration::from_millis(n as u64),
                    "EXAT" => clock.instant_at_wall_ms(n as u64 * 1000),
                    _ => clock.instant_at_wall_ms(n as u64),
                };
                let opt_name: &'static str = match opt {
                    "EX" => "EX",
                    "PX" => "PX",
                    "EXAT" => "EXAT",
                    _ => "PXAT",
                };
                expiry = set_expiry(opt_name, SetExpiry::At(at), &mut expiry_option)?;
            }
            _ => return Err(CommandError::syntax()),
        }
        i += 1;
    }

    server.keyspace().with_db(session.db, |view| {
        let old = view.live(&key).map(|e| e.value.clone());

        if want_old {
            if let Some(value) = &old {
                if !value.is_scalar() {
                    return Err(CommandError::wrong_type(&key, "string"));
                }
            }
        }
        let old_reply = || match &old {
            Some(value) => value
                .scalar_bytes()
                .map(RespValue::BulkString)
                .unwrap_or(RespValue::Null),
            None => RespValue::Null,
        };

        if (nx && old.is_some()) || (xx && old.is_none()) {
            return Reply::value(if want_old { old_reply() } else { RespValue::Null });
        }

        let reply = if want_old { old_reply() } else { RespValue::ok() };
        view.set_value_with(key.clone(), value, expiry);
        Reply::value(reply)
    })
}

/// GET key
fn cmd_get(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 2 {
        return Err(CommandError::wrong_args("GET"));
    }
    read_scalar(server, session.db, &argv[1])
        .map(|opt| Reply::One(opt.map(RespValue::BulkString).unwrap_or(RespValue::Null)))
}

/// GETDEL key
fn cmd_getdel(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 2 {
        return Err(CommandError::wrong_args("GETDEL"));
    }
    let key = &argv[1];
    server.keyspace().with_db(session.db, |view| {
        let Some(entry) = view.live(key) else {
            return Reply::value(RespValue::Null);
        };
        let Some(bytes) = entry.value.scalar_bytes() else {
            return Err(CommandError::wrong_type(key, "string"));
        };
        view.remove(key);
        Reply::value(RespValue::BulkString(bytes))
    })
}

/// MSET key value [key value ...]
fn cmd_mset(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() < 3 || argv.len() % 2 != 1 {
        return Err(CommandError::wrong_args("MSET"));
    }
    let pairs = argv[1..]
        .chunks(2)
        .map(|pair| (pair[0].clone(), Value::from(adapt_type(pair[1].clone()))))
        .collect();
    server.keyspace().set_values(session.db, pairs);
    Reply::value(RespValue::ok())
}

/// MGET key [key ...]
fn cmd_mget(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() < 2 {
        return Err(CommandError::wrong_args("MGET"));
    }
    let keys: Vec<Bytes> = argv[1..].to_vec();
    let values = server.keyspace().get_values(session.db, &keys);
    let replies = keys
        .iter()
        .map(|key| {
            values
                .get(key)
                .and_then(|v| v.as_ref())
                .and_then(|v| v.scalar_bytes())
                .map(RespValue::BulkString)
                .unwrap_or(RespValue::Null)
        })
        .collect();
    Reply::value(RespValue::Array(replies))
}

/// APPEND key value -> length after append
fn cmd_append(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 3 {
        return Err(CommandError::wrong_args("APPEND"));
    }
    let key = argv[1].clone();
    let suffix = argv[2].clone();

    server.keyspace().entry_or_insert(
        session.db,
        &key,
        || Value::Str(Bytes::new()),
        |entry| {
            let Some(current) = entry.value.scalar_bytes() else {
                return Err(CommandError::wrong_type(&key, "string"));
            };
            let mut combined = Vec::with_capacity(current.len() + suffix.len());
            combined.extend_from_slice(&current);
            combined.extend_from_slice(&suffix);
            let len = combined.len();
            entry.value = Value::from(adapt_type(Bytes::from(combined)));
            Reply::value(RespValue::integer(len as i64))
        },
    )
}

/// STRLEN key
fn cmd_strlen(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 2 {
        return Err(CommandError::wrong_args("STRLEN"));
    }
    let len = read_scalar(server, session.db, &argv[1])?
        .map(|b| b.len())
        .unwrap_or(0);
    Reply::value(RespValue::integer(len as i64))
}

/// SETRANGE key offset value -> length after write
fn cmd_setrange(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 4 {
        return Err(CommandError::wrong_args("SETRANGE"));
    }
    let key = argv[1].clone();
    let offset = parse_int(&argv[2])?;
    if offset < 0 {
        return Err(CommandError::OutOfRange("offset is out of range".to_string()));
    }
    let patch = argv[3].clone();

    server.keyspace().entry_or_insert(
        session.db,
        &key,
        || Value::Str(Bytes::new()),
        |entry| {
            let Some(current) = entry.value.scalar_bytes() else {
                return Err(CommandError::wrong_type(&key, "string"));
            };
            let offset = offset as usize;
            let mut buf = current.to_vec();
            if buf.len() < offset + patch.len() {
                buf.resize(offset + patch.len(), 0);
            }
            buf[offset..offset + patch.len()].copy_from_slice(&patch);
            let len = buf.len();
            entry.value = Value::from(adapt_type(Bytes::from(buf)));
            Reply::value(RespValue::integer(len as i64))
        },
    )
}

/// GETRANGE key start stop (inclusive, negative indices from the tail)
fn cmd_getrange(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 4 {
        return Err(CommandError::wrong_args("GETRANGE"));
    }
    let start = parse_int(&argv[2])?;
    let stop = parse_int(&argv[3])?;

    let Some(bytes) = read_scalar(server, session.db, &argv[1])? else {
        return Reply::value(RespValue::bulk_string(Bytes::new()));
    };

    let len = bytes.len() as i64;
    let mut start = if start < 0 { len + start } else { start };
    let mut stop = if stop < 0 { len + stop } else { stop };
    if start < 0 {
        start = 0;
    }
    if stop >= len {
        stop = len - 1;
    }
    if start > stop || len == 0 {
        return Reply::value(RespValue::bulk_string(Bytes::new()));
    }
    Reply::value(RespValue::bulk_string(
        bytes.slice(start as usize..=stop as usize),
    ))
}

/// INCR key
fn cmd_incr(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 2 {
        return Err(CommandError::wrong_args("INCR"));
    }
    incr_by(server, session.db, &argv[1], 1)
}

/// DECR key
fn cmd_decr(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 2 {
        return Err(CommandError::wrong_args("DECR"));
    }
    incr_by(server, session.db, &argv[1], -1)
}

/// INCRBY key increment
fn cmd_incrby(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 3 {
        return Err(CommandError::wrong_args("INCRBY"));
    }
    let delta = parse_int(&argv[2])?;
    incr_by(server, session.db, &argv[1], delta)
}

/// DECRBY key decrement
fn cmd_decrby(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 3 {
        return Err(CommandError::wrong_args("DECRBY"));
    }
    let delta = parse_int(&argv[2])?;
    incr_by(
        server,
        session.db,
        &argv[1],
        delta.checked_neg().ok_or_else(CommandError::not_an_integer)?,
    )
}

/// INCRBYFLOAT key increment
fn cmd_incrbyfloat(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 3 {
        return Err(CommandError::wrong_args("INCRBYFLOAT"));
    }
    let delta: f64 = as_str(&argv[2])
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|f: &f64| !f.is_nan())
        .ok_or_else(CommandError::not_a_float)?;
    let key = argv[1].clone();

    server.keyspace().entry_or_insert(
        session.db,
        &key,
        || Value::Int(0),
        |entry| {
            let current = match entry.value.as_float() {
                Some(f) => f,
                None if entry.value.is_scalar() => return Err(CommandError::not_a_float()),
                None => return Err(CommandError::wrong_type(&key, "string")),
            };
            let next = current + delta;
            if next.is_nan() {
                return Err(CommandError::Parse(
                    "increment would produce NaN".to_string(),
                ));
            }
            // Store the formatted result so the value round-trips the same
            // way it is rendered.
            let rendered = format_float(next);
            entry.value = Value::from(adapt_type(Bytes::from(rendered.clone())));
            Reply::value(RespValue::bulk_string(rendered))
        },
    )
}

/// Absent keys count from zero; non-integer scalars are a parse error.
fn incr_by(server: &Server, db: usize, key: &Bytes, delta: i64) -> CommandResult {
    server.keyspace().entry_or_insert(
        db,
        key,
        || Value::Int(0),
        |entry| {
            let current = match entry.value.as_int() {
                Some(n) => n,
                None if entry.value.is_scalar() => return Err(CommandError::not_an_integer()),
                None => return Err(CommandError::wrong_type(key, "string")),
            };
            let next = current
                .checked_add(delta)
                .ok_or_else(CommandError::not_an_integer)?;
            entry.value = Value::Int(next);
            Reply::value(RespValue::integer(next))
        },
    )
}

/// Live scalar bytes for a key; `Ok(None)` when absent, error on containers.
fn read_scalar(server: &Server, db: usize, key: &Bytes) -> Result<Option<Bytes>, CommandError> {
    match server.keyspace().read_entry(db, key, |entry| {
        entry
            .value
            .scalar_bytes()
            .ok_or_else(|| CommandError::wrong_type(key, "string"))
    }) {
        None => Ok(None),
        Some(Ok(bytes)) => Ok(Some(bytes)),
        Some(Err(e)) => Err(e),
    }
}
