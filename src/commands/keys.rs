//! Generic Key Command Family
//!
//! Whole-key operations that work the same for every value type: deletion,
//! existence, expiry management, renaming, database selection, and the
//! introspection commands over access metadata.

use crate::commands::registry::{self, AccessedKeys, CommandSpec};
use crate::commands::{parse_int, upper, CommandError, CommandResult, Reply, Session};
use crate::glob::GlobPattern;
use crate::protocol::RespValue;
use crate::server::Server;
use bytes::Bytes;
use std::time::{Duration, Instant};

pub fn register(out: &mut Vec<CommandSpec>) {
    let flat = [
        ("DEL", &["write", "keyspace", "slow"][..], registry::keys_write as registry::KeysFn, cmd_del as registry::HandlerFn),
        ("EXISTS", &["read", "keyspace", "fast"], registry::keys_read, cmd_exists),
        ("EXPIRE", &["write", "keyspace", "fast"], registry::key_write, cmd_expire),
        ("PEXPIRE", &["write", "keyspace", "fast"], registry::key_write, cmd_pexpire),
        ("EXPIREAT", &["write", "keyspace", "fast"], registry::key_write, cmd_expireat),
        ("PEXPIREAT", &["write", "keyspace", "fast"], registry::key_write, cmd_pexpireat),
        ("TTL", &["read", "keyspace", "fast"], registry::key_read, cmd_ttl),
        ("PTTL", &["read", "keyspace", "fast"], registry::key_read, cmd_pttl),
        ("PERSIST", &["write", "keyspace", "fast"], registry::key_write, cmd_persist),
        ("TYPE", &["read", "keyspace", "fast"], registry::key_read, cmd_type),
        ("RENAME", &["write", "keyspace", "slow"], registry::two_keys_write, cmd_rename),
        ("RENAMENX", &["write", "keyspace", "slow"], registry::two_keys_write, cmd_renamenx),
        ("KEYS", &["read", "keyspace", "slow", "dangerous"], registry::no_keys, cmd_keys),
        ("RANDOMKEY", &["read", "keyspace", "slow"], registry::no_keys, cmd_randomkey),
        ("TOUCH", &["read", "keyspace", "fast"], registry::keys_read, cmd_touch),
        ("SELECT", &["fast", "connection"], registry::no_keys, cmd_select),
        ("MOVE", &["write", "keyspace", "fast"], registry::key_write, cmd_move),
        ("FLUSHDB", &["write", "keyspace", "slow", "dangerous"], registry::no_keys, cmd_flushdb),
        ("FLUSHALL", &["write", "keyspace", "slow", "dangerous"], registry::no_keys, cmd_flushall),
        ("DBSIZE", &["read", "keyspace", "fast"], registry::no_keys, cmd_dbsize),
    ];
    out.extend(flat.map(|(name, categories, keys, handler)| CommandSpec {
        name,
        sub: None,
        categories,
        module: "generic",
        keys,
        handler,
    }));

    out.push(CommandSpec {
        name: "OBJECT",
        sub: Some("FREQ"),
        categories: &["read", "keyspace", "slow"],
        module: "generic",
        keys: object_keys,
        handler: cmd_object_freq,
    });
    out.push(CommandSpec {
        name: "OBJECT",
        sub: Some("IDLETIME"),
        categories: &["read", "keyspace", "slow"],
        module: "generic",
        keys: object_keys,
        handler: cmd_object_idletime,
    });
}

fn object_keys(argv: &[Bytes]) -> Result<AccessedKeys, CommandError> {
    Ok(AccessedKeys::reads(argv.get(2).cloned().into_iter().collect()))
}

/// DEL key [key ...]
fn cmd_del(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() < 2 {
        return Err(CommandError::wrong_args("DEL"));
    }
    let deleted = argv[1..]
        .iter()
        .filter(|key| server.keyspace().delete_live(session.db, key))
        .count();
    Reply::value(RespValue::integer(deleted as i64))
}

/// EXISTS key [key ...] -> count of existing keys (repeats count twice)
fn cmd_exists(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() < 2 {
        return Err(CommandError::wrong_args("EXISTS"));
    }
    let keys: Vec<Bytes> = argv[1..].to_vec();
    let live = server.keyspace().keys_exist(session.db, &keys);
    let count = keys.iter().filter(|k| live.get(*k).copied().unwrap_or(false)).count();
    Reply::value(RespValue::integer(count as i64))
}

/// Restriction on when an expiry update applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExpireOption {
    Always,
    /// NX: only when the key has no expiry.
    IfNone,
    /// XX: only when the key has one.
    IfSome,
    /// GT: only when later than the current (no expiry counts as infinite).
    IfGreater,
    /// LT: only when earlier than the current.
    IfLess,
}

fn parse_expire_option(argv: &[Bytes], at: usize, cmd: &str) -> Result<ExpireOption, CommandError> {
    match argv.get(at) {
        None => Ok(ExpireOption::Always),
        Some(raw) => match upper(raw).as_str() {
            "NX" => Ok(ExpireOption::IfNone),
            "XX" => Ok(ExpireOption::IfSome),
            "GT" => Ok(ExpireOption::IfGreater),
            "LT" => Ok(ExpireOption::IfLess),
            _ => Err(CommandError::Parse(format!(
                "unsupported option in '{}' command",
                cmd.to_lowercase()
            ))),
        },
    }
}

/// Applies a deadline to a key under an option. Returns 1 on update, 0 when
/// the key is absent or the option rejected the update.
fn apply_expire(
    server: &Server,
    db: usize,
    key: &[u8],
    at: Instant,
    option: ExpireOption,
) -> CommandResult {
    let updated = server
        .keyspace()
        .write_entry(db, key, |entry| {
            let allowed = match (option, entry.expires_at) {
                (ExpireOption::Always, _) => true,
                (ExpireOption::IfNone, current) => current.is_none(),
                (ExpireOption::IfSome, current) => current.is_some(),
                (ExpireOption::IfGreater, current) => current.map(|c| at > c).unwrap_or(false),
                (ExpireOption::IfLess, current) => current.map(|c| at < c).unwrap_or(true),
            };
            if allowed {
                entry.expires_at = Some(at);
            }
            allowed
        })
        .unwrap_or(false);
    Reply::value(RespValue::integer(updated as i64))
}

/// EXPIRE key seconds [NX|XX|GT|LT]
fn cmd_expire(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if !(3..=4).contains(&argv.len()) {
        return Err(CommandError::wrong_args("EXPIRE"));
    }
    let n = parse_int(&argv[2])?;
    let option = parse_expire_option(argv, 3, "EXPIRE")?;
    let now = server.keyspace().now();
    let at = if n <= 0 {
        now
    } else {
        now + Duration::from_secs(n as u64)
    };
    apply_expire(server, session.db, &argv[1], at, option)
}

/// PEXPIRE key milliseconds [NX|XX|GT|LT]
fn cmd_pexpire(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if !(3..=4).contains(&argv.len()) {
        return Err(CommandError::wrong_args("PEXPIRE"));
    }
    let n = parse_int(&argv[2])?;
    let option = parse_expire_option(argv, 3, "PEXPIRE")?;
    let now = server.keyspace().now();
    let at = if n <= 0 {
        now
    } else {
        now + Duration::from_millis(n as u64)
    };
    apply_expire(server, session.db, &argv[1], at, option)
}

/// EXPIREAT key unix-seconds [NX|XX|GT|LT]
fn cmd_expireat(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if !(3..=4).contains(&argv.len()) {
        return Err(CommandError::wrong_args("EXPIREAT"));
    }
    let epoch = parse_int(&argv[2])?.max(0) as u64;
    let option = parse_expire_option(argv, 3, "EXPIREAT")?;
    let at = server.keyspace().clock().instant_at_wall_ms(epoch * 1000);
    apply_expire(server, session.db, &argv[1], at, option)
}

/// PEXPIREAT key unix-milliseconds [NX|XX|GT|LT]
fn cmd_pexpireat(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if !(3..=4).contains(&argv.len()) {
        return Err(CommandError::wrong_args("PEXPIREAT"));
    }
    let epoch_ms = parse_int(&argv[2])?.max(0) as u64;
    let option = parse_expire_option(argv, 3, "PEXPIREAT")?;
    let at = server.keyspace().clock().instant_at_wall_ms(epoch_ms);
    apply_expire(server, session.db, &argv[1], at, option)
}

/// Remaining lifetime: -2 absent key, -1 persistent, else the remainder in
/// the requested unit.
fn remaining(server: &Server, db: usize, key: &[u8], in_millis: bool) -> i64 {
    match server.keyspace().get_expiry(db, key) {
        None => -2,
        Some(None) => -1,
        Some(Some(at)) => {
            let now = server.keyspace().now();
            let ms = at.saturating_duration_since(now).as_millis() as i64;
            if in_millis {
                ms
            } else {
                // Round to the nearest second so a fresh EX 1 reads as 1.
                (ms + 500) / 1000
            }
        }
    }
}

/// TTL key
fn cmd_ttl(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 2 {
        return Err(CommandError::wrong_args("TTL"));
    }
    Reply::value(RespValue::integer(remaining(server, session.db, &argv[1], false)))
}

/// PTTL key
fn cmd_pttl(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 2 {
        return Err(CommandError::wrong_args("PTTL"));
    }
    Reply::value(RespValue::integer(remaining(server, session.db, &argv[1], true)))
}

/// PERSIST key -> 1 when an expiry was removed
fn cmd_persist(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 2 {
        return Err(CommandError::wrong_args("PERSIST"));
    }
    let removed = server
        .keyspace()
        .write_entry(session.db, &argv[1], |entry| {
            let had = entry.expires_at.is_some();
            entry.expires_at = None;
            had
        })
        .unwrap_or(false);
    Reply::value(RespValue::integer(removed as i64))
}

/// TYPE key -> variant tag, or "none"
fn cmd_type(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 2 {
        return Err(CommandError::wrong_args("TYPE"));
    }
    let name = server
        .keyspace()
        .type_of(session.db, &argv[1])
        .unwrap_or("none");
    Reply::value(RespValue::simple_string(name))
}

/// RENAME key newkey
fn cmd_rename(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 3 {
        return Err(CommandError::wrong_args("RENAME"));
    }
    match server
        .keyspace()
        .rename(session.db, &argv[1], argv[2].clone(), false)
    {
        None => Err(CommandError::NotFound("no such key".to_string())),
        Some(_) => Reply::value(RespValue::ok()),
    }
}

/// RENAMENX key newkey -> 1 when renamed, 0 when newkey existed
fn cmd_renamenx(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 3 {
        return Err(CommandError::wrong_args("RENAMENX"));
    }
    match server
        .keyspace()
        .rename(session.db, &argv[1], argv[2].clone(), true)
    {
        None => Err(CommandError::NotFound("no such key".to_string())),
        Some(renamed) => Reply::value(RespValue::integer(renamed as i64)),
    }
}

/// KEYS pattern
fn cmd_keys(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 2 {
        return Err(CommandError::wrong_args("KEYS"));
    }
    let pattern = GlobPattern::new(argv[1].clone());
    let mut keys = server.keyspace().keys_matching(session.db, &pattern);
    keys.sort();
    Reply::value(RespValue::Array(
        keys.into_iter().map(RespValue::BulkString).collect(),
    ))
}

/// RANDOMKEY
fn cmd_randomkey(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 1 {
        return Err(CommandError::wrong_args("RANDOMKEY"));
    }
    Reply::value(
        server
            .keyspace()
            .random_key(session.db)
            .map(RespValue::BulkString)
            .unwrap_or(RespValue::Null),
    )
}

/// TOUCH key [key ...] -> count of existing keys touched
fn cmd_touch(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() < 2 {
        return Err(CommandError::wrong_args("TOUCH"));
    }
    let keys: Vec<Bytes> = argv[1..].to_vec();
    let touched = server.keyspace().touch(session.db, &keys);
    Reply::value(RespValue::integer(touched as i64))
}

/// SELECT index
fn cmd_select(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 2 {
        return Err(CommandError::wrong_args("SELECT"));
    }
    let index = parse_int(&argv[1])?;
    if index < 0 || index as usize >= server.keyspace().database_count() {
        return Err(CommandError::OutOfRange("DB index is out of range".to_string()));
    }
    session.db = index as usize;
    Reply::value(RespValue::ok())
}

/// MOVE key db -> 1 when moved
fn cmd_move(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 3 {
        return Err(CommandError::wrong_args("MOVE"));
    }
    let target = parse_int(&argv[2])?;
    if target < 0 || target as usize >= server.keyspace().database_count() {
        return Err(CommandError::OutOfRange("DB index is out of range".to_string()));
    }
    let moved = server
        .keyspace()
        .move_key(session.db, target as usize, &argv[1]);
    Reply::value(RespValue::integer(moved as i64))
}

/// FLUSHDB
fn cmd_flushdb(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 1 {
        return Err(CommandError::wrong_args("FLUSHDB"));
    }
    server.keyspace().flush(session.db as i64);
    Reply::value(RespValue::ok())
}

/// FLUSHALL
fn cmd_flushall(server: &Server, _session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 1 {
        return Err(CommandError::wrong_args("FLUSHALL"));
    }
    server.keyspace().flush(-1);
    Reply::value(RespValue::ok())
}

/// DBSIZE
fn cmd_dbsize(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 1 {
        return Err(CommandError::wrong_args("DBSIZE"));
    }
    Reply::value(RespValue::integer(server.keyspace().dbsize(session.db) as i64))
}

/// OBJECT FREQ key -> the LFU access counter
fn cmd_object_freq(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 3 {
        return Err(CommandError::wrong_args("OBJECT"));
    }
    match server.keyspace().object_freq(session.db, &argv[2]) {
        Some(freq) => Reply::value(RespValue::integer(freq as i64)),
        None => Err(CommandError::NotFound("no such key".to_string())),
    }
}

/// OBJECT IDLETIME key -> seconds since last access
fn cmd_object_idletime(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 3 {
        return Err(CommandError::wrong_args("OBJECT"));
    }
    match server.keyspace().object_idle_time(session.db, &argv[2]) {
        Some(idle) => Reply::value(RespValue::integer(idle as i64)),
        None => Err(CommandError::NotFound("no such key".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::dispatch::dispatch;
    use tokio::sync::mpsc;

    fn b(s: &str) -> Bytes {
        Bytes::from(s.to_string())
    }

    fn setup() -> (Server, Session) {
        let (tx, _rx) = mpsc::channel(4);
        (Server::for_tests(), Session::new(1, tx))
    }

    fn run(server: &Server, session: &mut Session, parts: &[&str]) -> Vec<u8> {
        let argv: Vec<Bytes> = parts.iter().map(|p| b(p)).collect();
        let mut buf = Vec::new();
        dispatch(server, session, &argv).serialize_into(&mut buf);
        buf
    }

    #[test]
    fn test_del_and_exists() {
        let (server, mut session) = setup();
        run(&server, &mut session, &["SET", "a", "1"]);
        run(&server, &mut session, &["SET", "b", "2"]);

        assert_eq!(run(&server, &mut session, &["EXISTS", "a", "b", "c"]), b":2\r\n");
        assert_eq!(run(&server, &mut session, &["DEL", "a", "c"]), b":1\r\n");
        assert_eq!(run(&server, &mut session, &["EXISTS", "a"]), b":0\r\n");
    }

    #[test]
    fn test_expire_ttl_persist_cycle() {
        let (server, mut session) = setup();
        run(&server, &mut session, &["SET", "k", "v"]);
        assert_eq!(run(&server, &mut session, &["TTL", "k"]), b":-1\r\n");
        assert_eq!(run(&server, &mut session, &["EXPIRE", "k", "100"]), b":1\r\n");

        let ttl_reply = run(&server, &mut session, &["TTL", "k"]);
        let ttl: i64 = std::str::from_utf8(&ttl_reply[1..ttl_reply.len() - 2])
            .unwrap()
            .parse()
            .unwrap();
        assert!((1..=100).contains(&ttl));

        assert_eq!(run(&server, &mut session, &["PERSIST", "k"]), b":1\r\n");
        assert_eq!(run(&server, &mut session, &["TTL", "k"]), b":-1\r\n");
        assert_eq!(run(&server, &mut session, &["PERSIST", "k"]), b":0\r\n");
        assert_eq!(run(&server, &mut session, &["EXPIRE", "missing", "10"]), b":0\r\n");
    }

    #[test]
    fn test_expired_key_reads_absent() {
        let (server, mut session) = setup();
        run(&server, &mut session, &["SET", "k", "v"]);
        run(&server, &mut session, &["PEXPIRE", "k", "20"]);

        server
            .keyspace()
            .clock()
            .advance(Duration::from_millis(100));
        assert_eq!(run(&server, &mut session, &["TTL", "k"]), b":-2\r\n");
        assert_eq!(run(&server, &mut session, &["EXISTS", "k"]), b":0\r\n");
    }

    #[test]
    fn test_expire_options() {
        let (server, mut session) = setup();
        run(&server, &mut session, &["SET", "k", "v"]);

        // NX: applies only when no expiry exists.
        assert_eq!(run(&server, &mut session, &["EXPIRE", "k", "100", "NX"]), b":1\r\n");
        assert_eq!(run(&server, &mut session, &["EXPIRE", "k", "200", "NX"]), b":0\r\n");
        // GT: later deadline wins.
        assert_eq!(run(&server, &mut session, &["EXPIRE", "k", "50", "GT"]), b":0\r\n");
        assert_eq!(run(&server, &mut session, &["EXPIRE", "k", "500", "GT"]), b":1\r\n");
        // LT: earlier deadline wins.
        assert_eq!(run(&server, &mut session, &["EXPIRE", "k", "800", "LT"]), b":0\r\n");
        assert_eq!(run(&server, &mut session, &["EXPIRE", "k", "10", "LT"]), b":1\r\n");
        // XX on a persistent key fails.
        run(&server, &mut session, &["PERSIST", "k"]);
        assert_eq!(run(&server, &mut session, &["EXPIRE", "k", "10", "XX"]), b":0\r\n");
    }

    #[test]
    fn test_type_reports_variant() {
        let (server, mut session) = setup();
        run(&server, &mut session, &["SET", "s", "x"]);
        run(&server, &mut session, &["LPUSH", "l", "x"]);
        run(&server, &mut session, &["SADD", "st", "x"]);
        run(&server, &mut session, &["HSET", "h", "f", "v"]);
        run(&server, &mut session, &["ZADD", "z", "1", "m"]);

        assert_eq!(run(&server, &mut session, &["TYPE", "s"]), b"+string\r\n");
        assert_eq!(run(&server, &mut session, &["TYPE", "l"]), b"+list\r\n");
        assert_eq!(run(&server, &mut session, &["TYPE", "st"]), b"+set\r\n");
        assert_eq!(run(&server, &mut session, &["TYPE", "h"]), b"+hash\r\n");
        assert_eq!(run(&server, &mut session, &["TYPE", "z"]), b"+zset\r\n");
        assert_eq!(run(&server, &mut session, &["TYPE", "none"]), b"+none\r\n");
    }

    #[test]
    fn test_rename_and_renamenx() {
        let (server, mut session) = setup();
        assert_eq!(
            run(&server, &mut session, &["RENAME", "missing", "dst"]),
            b"-ERR no such key\r\n"
        );

        run(&server, &mut session, &["SET", "a", "1"]);
        run(&server, &mut session, &["SET", "b", "2"]);
        assert_eq!(run(&server, &mut session, &["RENAMENX", "a", "b"]), b":0\r\n");
        assert_eq!(run(&server, &mut session, &["RENAME", "a", "b"]), b"+OK\r\n");
        assert_eq!(run(&server, &mut session, &["GET", "b"]), b"$1\r\n1\r\n");
    }

    #[test]
    fn test_keys_pattern() {
        let (server, mut session) = setup();
        for key in ["hello", "hallo", "world"] {
            run(&server, &mut session, &["SET", key, "1"]);
        }
        assert_eq!(
            run(&server, &mut session, &["KEYS", "h?llo"]),
            b"*2\r\n$5\r\nhallo\r\n$5\r\nhello\r\n"
        );
    }

    #[test]
    fn test_select_isolates_databases() {
        let (server, mut session) = setup();
        run(&server, &mut session, &["SET", "k", "db0"]);
        assert_eq!(run(&server, &mut session, &["SELECT", "1"]), b"+OK\r\n");
        assert_eq!(run(&server, &mut session, &["GET", "k"]), b"$-1\r\n");
        assert_eq!(run(&server, &mut session, &["SELECT", "99"]),
            b"-ERR DB index is out of range\r\n");
    }

    #[test]
    fn test_move_between_databases() {
        let (server, mut session) = setup();
        run(&server, &mut session, &["SET", "k", "v"]);
        assert_eq!(run(&server, &mut session, &["MOVE", "k", "1"]), b":1\r\n");
        assert_eq!(run(&server, &mut session, &["GET", "k"]), b"$-1\r\n");
        run(&server, &mut session, &["SELECT", "1"]);
        assert_eq!(run(&server, &mut session, &["GET", "k"]), b"$1\r\nv\r\n");
    }

    #[test]
    fn test_flush_and_dbsize() {
        let (server, mut session) = setup();
        run(&server, &mut session, &["SET", "a", "1"]);
        run(&server, &mut session, &["SET", "b", "2"]);
        assert_eq!(run(&server, &mut session, &["DBSIZE"]), b":2\r\n");
        assert_eq!(run(&server, &mut session, &["FLUSHDB"]), b"+OK\r\n");
        assert_eq!(run(&server, &mut session, &["DBSIZE"]), b":0\r\n");
    }

    #[test]
    fn test_object_freq_counts_accesses() {
        let (server, mut session) = setup();
        run(&server, &mut session, &["SET", "k", "v"]);
        let before = run(&server, &mut session, &["OBJECT", "FREQ", "k"]);
        run(&server, &mut session, &["GET", "k"]);
        run(&server, &mut session, &["GET", "k"]);
        let after = run(&server, &mut session, &["OBJECT", "FREQ", "k"]);
        assert_ne!(before, after);

        assert_eq!(
            run(&server, &mut session, &["OBJECT", "FREQ", "missing"]),
            b"-ERR no such key\r\n"
        );
    }
}
