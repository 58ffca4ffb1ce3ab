//! Hash Command Family
//!
//! Field-level reads and writes plus the per-field expiry surface
//! (HEXPIRE and friends). Field expiry is checked exactly the way key
//! expiry is: an expired field reads as absent immediately and is removed
//! from the structure on the next mutating contact.

use crate::commands::registry::{self, CommandSpec};
use crate::commands::{as_str, parse_int, upper, CommandError, CommandResult, Reply, Session};
use crate::protocol::types::format_float;
use crate::protocol::RespValue;
use crate::server::Server;
use crate::storage::hash::{field_expiry_reply, ExpiryCondition, HashValue};
use crate::storage::{KeyEntry, Value};
use bytes::Bytes;
use std::time::{Duration, Instant};

pub fn register(out: &mut Vec<CommandSpec>) {
    let specs = [
        ("HSET", &["write", "denyoom", "hash", "fast"][..], registry::key_write as registry::KeysFn, cmd_hset as registry::HandlerFn),
        ("HSETNX", &["write", "denyoom", "hash", "fast"], registry::key_write, cmd_hsetnx),
        ("HGET", &["read", "hash", "fast"], registry::key_read, cmd_hget),
        ("HMGET", &["read", "hash", "fast"], registry::key_read, cmd_hmget),
        ("HGETALL", &["read", "hash", "slow"], registry::key_read, cmd_hgetall),
        ("HDEL", &["write", "hash", "fast"], registry::key_write, cmd_hdel),
        ("HEXISTS", &["read", "hash", "fast"], registry::key_read, cmd_hexists),
        ("HLEN", &["read", "hash", "fast"], registry::key_read, cmd_hlen),
        ("HKEYS", &["read", "hash", "slow"], registry::key_read, cmd_hkeys),
        ("HVALS", &["read", "hash", "slow"], registry::key_read, cmd_hvals),
        ("HSTRLEN", &["read", "hash", "fast"], registry::key_read, cmd_hstrlen),
        ("HINCRBY", &["write", "denyoom", "hash", "fast"], registry::key_write, cmd_hincrby),
        ("HINCRBYFLOAT", &["write", "denyoom", "hash", "fast"], registry::key_write, cmd_hincrbyfloat),
        ("HRANDFIELD", &["read", "hash", "slow"], registry::key_read, cmd_hrandfield),
        ("HEXPIRE", &["write", "hash", "fast"], registry::key_write, cmd_hexpire),
        ("HPEXPIRE", &["write", "hash", "fast"], registry::key_write, cmd_hpexpire),
        ("HEXPIREAT", &["write", "hash", "fast"], registry::key_write, cmd_hexpireat),
        ("HPEXPIREAT", &["write", "hash", "fast"], registry::key_write, cmd_hpexpireat),
        ("HTTL", &["read", "hash", "fast"], registry::key_read, cmd_httl),
        ("HPTTL", &["read", "hash", "fast"], registry::key_read, cmd_hpttl),
        ("HPERSIST", &["write", "hash", "fast"], registry::key_write, cmd_hpersist),
    ];
    out.extend(specs.map(|(name, categories, keys, handler)| CommandSpec {
        name,
        sub: None,
        categories,
        module: "hash",
        keys,
        handler,
    }));
}

fn as_hash<'a>(entry: &'a mut KeyEntry, key: &[u8]) -> Result<&'a mut HashValue, CommandError> {
    match &mut entry.value {
        Value::Hash(hash) => Ok(hash),
        _ => Err(CommandError::wrong_type(key, "hash")),
    }
}

/// Runs a read closure over a live hash; absent keys yield the default.
fn read_hash<R: Default>(
    server: &Server,
    db: usize,
    key: &[u8],
    f: impl FnOnce(&HashValue, Instant) -> R,
) -> Result<R, CommandError> {
    let now = server.keyspace().now();
    server
        .keyspace()
        .read_entry(db, key, |entry| match &entry.value {
            Value::Hash(hash) => Ok(f(hash, now)),
            _ => Err(CommandError::wrong_type(key, "hash")),
        })
        .transpose()
        .map(Option::unwrap_or_default)
}

/// HSET key field value [field value ...] -> number of new fields
fn cmd_hset(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() < 4 || argv.len() % 2 != 0 {
        return Err(CommandError::wrong_args("HSET"));
    }
    let key = argv[1].clone();
    let now = server.keyspace().now();

    server.keyspace().entry_or_insert(
        session.db,
        &key,
        || Value::Hash(HashValue::new()),
        |entry| {
            let hash = as_hash(entry, &key)?;
            let created = argv[2..]
                .chunks(2)
                .filter(|pair| hash.set(pair[0].clone(), pair[1].clone(), now))
                .count();
            Reply::value(RespValue::integer(created as i64))
        },
    )
}

/// HSETNX key field value -> 1 when the field was created
fn cmd_hsetnx(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 4 {
        return Err(CommandError::wrong_args("HSETNX"));
    }
    let key = argv[1].clone();
    let now = server.keyspace().now();

    server.keyspace().entry_or_insert(
        session.db,
        &key,
        || Value::Hash(HashValue::new()),
        |entry| {
            let hash = as_hash(entry, &key)?;
            let created = hash.set_if_absent(argv[2].clone(), argv[3].clone(), now);
            Reply::value(RespValue::integer(created as i64))
        },
    )
}

/// HGET key field
fn cmd_hget(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 3 {
        return Err(CommandError::wrong_args("HGET"));
    }
    let value = read_hash(server, session.db, &argv[1], |hash, now| {
        hash.get(&argv[2], now).cloned()
    })?;
    Reply::value(value.map(RespValue::BulkString).unwrap_or(RespValue::Null))
}

/// HMGET key field [field ...]
fn cmd_hmget(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() < 3 {
        return Err(CommandError::wrong_args("HMGET"));
    }
    let values = read_hash(server, session.db, &argv[1], |hash, now| {
        argv[2..]
            .iter()
            .map(|field| hash.get(field, now).cloned())
            .collect::<Vec<_>>()
    })?;
    // Absent key: every requested field reads as nil.
    let values = if values.is_empty() {
        vec![None; argv.len() - 2]
    } else {
        values
    };
    Reply::value(RespValue::Array(
        values
            .into_iter()
            .map(|v| v.map(RespValue::BulkString).unwrap_or(RespValue::Null))
            .collect(),
    ))
}

/// HGETALL key -> flat [field, value, ...] array, sorted by field
fn cmd_hgetall(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 2 {
        return Err(CommandError::wrong_args("HGETALL"));
    }
    let mut pairs = read_hash(server, session.db, &argv[1], |hash, now| {
        hash.iter_live(now)
            .map(|(f, v)| (f.clone(), v.clone()))
            .collect::<Vec<_>>()
    })?;
    pairs.sort();
    let mut out = Vec::with_capacity(pairs.len() * 2);
    for (field, value) in pairs {
        out.push(RespValue::BulkString(field));
        out.push(RespValue::BulkString(value));
    }
    Reply::value(RespValue::Array(out))
}

/// HDEL key field [field ...]
fn cmd_hdel(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() < 3 {
        return Err(CommandError::wrong_args("HDEL"));
    }
    let key = &argv[1];
    let now = server.keyspace().now();
    let removed = server
        .keyspace()
        .write_entry(session.db, key, |entry| {
            let hash = as_hash(entry, key)?;
            Ok(argv[2..].iter().filter(|f| hash.remove(f, now)).count())
        })
        .transpose()?
        .unwrap_or(0);
    Reply::value(RespValue::integer(removed as i64))
}

/// HEXISTS key field
fn cmd_hexists(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 3 {
        return Err(CommandError::wrong_args("HEXISTS"));
    }
    let found = read_hash(server, session.db, &argv[1], |hash, now| {
        hash.contains(&argv[2], now)
    })?;
    Reply::value(RespValue::integer(found as i64))
}

/// HLEN key
fn cmd_hlen(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 2 {
        return Err(CommandError::wrong_args("HLEN"));
    }
    let len = read_hash(server, session.db, &argv[1], |hash, now| hash.len(now))?;
    Reply::value(RespValue::integer(len as i64))
}

/// HKEYS key
fn cmd_hkeys(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 2 {
        return Err(CommandError::wrong_args("HKEYS"));
    }
    let mut fields = read_hash(server, session.db, &argv[1], |hash, now| {
        hash.iter_live(now).map(|(f, _)| f.clone()).collect::<Vec<_>>()
    })?;
    fields.sort();
    Reply::value(RespValue::Array(
        fields.into_iter().map(RespValue::BulkString).collect(),
    ))
}

/// HVALS key
fn cmd_hvals(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 2 {
        return Err(CommandError::wrong_args("HVALS"));
    }
    let mut pairs = read_hash(server, session.db, &argv[1], |hash, now| {
        hash.iter_live(now)
            .map(|(f, v)| (f.clone(), v.clone()))
            .collect::<Vec<_>>()
    })?;
    pairs.sort();
    Reply::value(RespValue::Array(
        pairs
            .into_iter()
            .map(|(_, v)| RespValue::BulkString(v))
            .collect(),
    ))
}

/// HSTRLEN key field
fn cmd_hstrlen(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 3 {
        return Err(CommandError::wrong_args("HSTRLEN"));
    }
    let len = read_hash(server, session.db, &argv[1], |hash, now| {
        hash.get(&argv[2], now).map(|v| v.len()).unwrap_or(0)
    })?;
    Reply::value(RespValue::integer(len as i64))
}

/// HINCRBY key field increment
fn cmd_hincrby(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 4 {
        return Err(CommandError::wrong_args("HINCRBY"));
    }
    let key = argv[1].clone();
    let delta = parse_int(&argv[3])?;
    let now = server.keyspace().now();

    server.keyspace().entry_or_insert(
        session.db,
        &key,
        || Value::Hash(HashValue::new()),
        |entry| {
            let hash = as_hash(entry, &key)?;
            let current = match hash.get(&argv[2], now) {
                Some(raw) => as_str(raw)?
                    .parse::<i64>()
                    .map_err(|_| CommandError::not_an_integer())?,
                None => 0,
            };
            let next = current
                .checked_add(delta)
                .ok_or_else(CommandError::not_an_integer)?;
            hash.set(argv[2].clone(), Bytes::from(next.to_string()), now);
            Reply::value(RespValue::integer(next))
        },
    )
}

/// HINCRBYFLOAT key field increment
fn cmd_hincrbyfloat(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 4 {
        return Err(CommandError::wrong_args("HINCRBYFLOAT"));
    }
    let key = argv[1].clone();
    let delta: f64 = as_str(&argv[3])
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|f: &f64| !f.is_nan())
        .ok_or_else(CommandError::not_a_float)?;
    let now = server.keyspace().now();

    server.keyspace().entry_or_insert(
        session.db,
        &key,
        || Value::Hash(HashValue::new()),
        |entry| {
            let hash = as_hash(entry, &key)?;
            let current: f64 = match hash.get(&argv[2], now) {
                Some(raw) => as_str(raw)?
                    .parse()
                    .map_err(|_| CommandError::not_a_float())?,
                None => 0.0,
            };
            let next = current + delta;
            if next.is_nan() {
                return Err(CommandError::Parse(
                    "increment would produce NaN".to_string(),
                ));
            }
            let rendered = format_float(next);
            hash.set(argv[2].clone(), Bytes::from(rendered.clone()), now);
            Reply::value(RespValue::bulk_string(rendered))
        },
    )
}

/// HRANDFIELD key [count [WITHVALUES]]
fn cmd_hrandfield(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if !(2..=4).contains(&argv.len()) {
        return Err(CommandError::wrong_args("HRANDFIELD"));
    }
    let count = argv.get(2).map(parse_int).transpose()?;
    let with_values = match argv.get(3) {
        None => false,
        Some(raw) if upper(raw) == "WITHVALUES" => true,
        Some(_) => return Err(CommandError::syntax()),
    };

    let picked = read_hash(server, session.db, &argv[1], |hash, now| {
        hash.random_fields(count.unwrap_or(1), now)
    })?;

    match count {
        None => Reply::value(
            picked
                .into_iter()
                .next()
                .map(|(f, _)| RespValue::BulkString(f))
                .unwrap_or(RespValue::Null),
        ),
        Some(_) => {
            let mut out = Vec::new();
            for (field, value) in picked {
                out.push(RespValue::BulkString(field));
                if with_values {
                    out.push(RespValue::BulkString(value));
                }
            }
            Reply::value(RespValue::Array(out))
        }
    }
}

/// Parsed `[NX|XX|GT|LT] FIELDS numfields field [field ...]` tail.
fn parse_fields_tail(
    argv: &[Bytes],
    mut at: usize,
    cmd: &str,
) -> Result<(ExpiryCondition, Vec<Bytes>), CommandError> {
    let mut condition = ExpiryCondition::Always;
    match argv.get(at).map(upper).as_deref() {
        Some("NX") => {
            condition = ExpiryCondition::IfNone;
            at += 1;
        }
        Some("XX") => {
            condition = ExpiryCondition::IfSome;
            at += 1;
        }
        Some("GT") => {
            condition = ExpiryCondition::IfGreater;
            at += 1;
        }
        Some("LT") => {
            condition = ExpiryCondition::IfLess;
            at += 1;
        }
        _ => {}
    }

    if argv.get(at).map(upper).as_deref() != Some("FIELDS") {
        return Err(CommandError::Parse(format!(
            "mandatory keyword FIELDS is missing in '{}' command",
            cmd.to_lowercase()
        )));
    }
    at += 1;
    let numfields = parse_int(argv.get(at).ok_or_else(|| CommandError::wrong_args(cmd))?)?;
    at += 1;

    let fields: Vec<Bytes> = argv[at..].to_vec();
    if numfields <= 0 || fields.len() != numfields as usize {
        return Err(CommandError::Parse(
            "numfields must match the number of supplied fields".to_string(),
        ));
    }
    Ok((condition, fields))
}

/// Applies a per-field deadline, replying one code per field.
fn apply_field_expiry(
    server: &Server,
    session: &Session,
    key: &Bytes,
    at: Instant,
    condition: ExpiryCondition,
    fields: &[Bytes],
) -> CommandResult {
    let now = server.keyspace().now();
    let codes = server.keyspace().write_entry(session.db, key, |entry| {
        let hash = as_hash(entry, key)?;
        Ok(fields
            .iter()
            .map(|field| hash.set_field_expiry(field, at, condition, now))
            .collect::<Vec<i64>>())
    });

    let codes = match codes {
        None => vec![field_expiry_reply::NO_FIELD; fields.len()],
        Some(Err(e)) => return Err(e),
        Some(Ok(codes)) => codes,
    };
    Reply::value(RespValue::Array(
        codes.into_iter().map(RespValue::Integer).collect(),
    ))
}

/// HEXPIRE key seconds [NX|XX|GT|LT] FIELDS numfields field [field ...]
fn cmd_hexpire(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() < 6 {
        return Err(CommandError::wrong_args("HEXPIRE"));
    }
    let n = parse_int(&argv[2])?;
    let (condition, fields) = parse_fields_tail(argv, 3, "HEXPIRE")?;
    let now = server.keyspace().now();
    let at = if n <= 0 {
        now
    } else {
        now + Duration::from_secs(n as u64)
    };
    apply_field_expiry(server, session, &argv[1], at, condition, &fields)
}

/// HPEXPIRE key milliseconds [NX|XX|GT|LT] FIELDS numfields field ...
fn cmd_hpexpire(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() < 6 {
        return Err(CommandError::wrong_args("HPEXPIRE"));
    }
    let n = parse_int(&argv[2])?;
    let (condition, fields) = parse_fields_tail(argv, 3, "HPEXPIRE")?;
    let now = server.keyspace().now();
    let at = if n <= 0 {
        now
    } else {
        now + Duration::from_millis(n as u64)
    };
    apply_field_expiry(server, session, &argv[1], at, condition, &fields)
}

/// HEXPIREAT key unix-seconds [NX|XX|GT|LT] FIELDS numfields field ...
fn cmd_hexpireat(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() < 6 {
        return Err(CommandError::wrong_args("HEXPIREAT"));
    }
    let epoch = parse_int(&argv[2])?.max(0) as u64;
    let (condition, fields) = parse_fields_tail(argv, 3, "HEXPIREAT")?;
    let at = server.keyspace().clock().instant_at_wall_ms(epoch * 1000);
    apply_field_expiry(server, session, &argv[1], at, condition, &fields)
}

/// HPEXPIREAT key unix-milliseconds [NX|XX|GT|LT] FIELDS numfields field ...
fn cmd_hpexpireat(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() < 6 {
        return Err(CommandError::wrong_args("HPEXPIREAT"));
    }
    let epoch_ms = parse_int(&argv[2])?.max(0) as u64;
    let (condition, fields) = parse_fields_tail(argv, 3, "HPEXPIREAT")?;
    let at = server.keyspace().clock().instant_at_wall_ms(epoch_ms);
    apply_field_expiry(server, session, &argv[1], at, condition, &fields)
}

/// Per-field TTL read: remaining time, -1 without expiry, -2 no field.
fn field_ttl(server: &Server, session: &Session, argv: &[Bytes], cmd: &str, in_millis: bool) -> CommandResult {
    if argv.len() < 5 {
        return Err(CommandError::wrong_args(cmd));
    }
    let (condition, fields) = parse_fields_tail(argv, 2, cmd)?;
    if condition != ExpiryCondition::Always {
        return Err(CommandError::syntax());
    }
    let now = server.keyspace().now();

    let codes = read_hash(server, session.db, &argv[1], |hash, now_hash| {
        fields
            .iter()
            .map(|field| match hash.expiry_of(field, now_hash) {
                None => -2,
                Some(None) => -1,
                Some(Some(at)) => {
                    let ms = at.saturating_duration_since(now).as_millis() as i64;
                    if in_millis {
                        ms
                    } else {
                        (ms + 500) / 1000
                    }
                }
            })
            .collect::<Vec<i64>>()
    })?;

    let codes = if codes.is_empty() {
        vec![-2; fields.len()]
    } else {
        codes
    };
    Reply::value(RespValue::Array(
        codes.into_iter().map(RespValue::Integer).collect(),
    ))
}

/// HTTL key FIELDS numfields field [field ...]
fn cmd_httl(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    field_ttl(server, session, argv, "HTTL", false)
}

/// HPTTL key FIELDS numfields field [field ...]
fn cmd_hpttl(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    field_ttl(server, session, argv, "HPTTL", true)
}

/// HPERSIST key FIELDS numfields field [field ...]
fn cmd_hpersist(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() < 5 {
        return Err(CommandError::wrong_args("HPERSIST"));
    }
    let (condition, fields) = parse_fields_tail(argv, 2, "HPERSIST")?;
    if condition != ExpiryCondition::Always {
        return Err(CommandError::syntax());
    }
    let now = server.keyspace().now();

    let codes = server.keyspace().write_entry(session.db, &argv[1], |entry| {
        let hash = as_hash(entry, &argv[1])?;
        Ok(fields
            .iter()
            .map(|field| hash.persist_field(field, now))
            .collect::<Vec<i64>>())
    });
    let codes = match codes {
        None => vec![-2; fields.len()],
        Some(Err(e)) => return Err(e),
        Some(Ok(codes)) => codes,
    };
    Reply::value(RespValue::Array(
        codes.into_iter().map(RespValue::Integer).collect(),
    ))
}
