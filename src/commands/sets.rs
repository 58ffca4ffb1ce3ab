//! Set Command Family
//!
//! Unordered membership plus the union/intersection/difference algebra
//! with optional destination stores. Replies that enumerate members sort
//! them to keep the output stable; membership itself is unordered.

use crate::commands::registry::{self, CommandSpec};
use crate::commands::{parse_int, CommandError, CommandResult, Reply, Session};
use crate::protocol::RespValue;
use crate::server::Server;
use crate::storage::{KeyEntry, Value};
use bytes::Bytes;
use rand::seq::IteratorRandom;
use rand::Rng;
use std::collections::HashSet;

pub fn register(out: &mut Vec<CommandSpec>) {
    let specs = [
        ("SADD", &["write", "denyoom", "set", "fast"][..], registry::key_write as registry::KeysFn, cmd_sadd as registry::HandlerFn),
        ("SREM", &["write", "set", "fast"], registry::key_write, cmd_srem),
        ("SMEMBERS", &["read", "set", "slow"], registry::key_read, cmd_smembers),
        ("SISMEMBER", &["read", "set", "fast"], registry::key_read, cmd_sismember),
        ("SCARD", &["read", "set", "fast"], registry::key_read, cmd_scard),
        ("SPOP", &["write", "set", "fast"], registry::key_write, cmd_spop),
        ("SRANDMEMBER", &["read", "set", "slow"], registry::key_read, cmd_srandmember),
        ("SMOVE", &["write", "set", "fast"], registry::two_keys_write, cmd_smove),
        ("SUNION", &["read", "set", "slow"], registry::keys_read, cmd_sunion),
        ("SUNIONSTORE", &["write", "denyoom", "set", "slow"], registry::store_keys, cmd_sunionstore),
        ("SINTER", &["read", "set", "slow"], registry::keys_read, cmd_sinter),
        ("SINTERSTORE", &["write", "denyoom", "set", "slow"], registry::store_keys, cmd_sinterstore),
        ("SDIFF", &["read", "set", "slow"], registry::keys_read, cmd_sdiff),
        ("SDIFFSTORE", &["write", "denyoom", "set", "slow"], registry::store_keys, cmd_sdiffstore),
    ];
    out.extend(specs.map(|(name, categories, keys, handler)| CommandSpec {
        name,
        sub: None,
        categories,
        module: "set",
        keys,
        handler,
    }));
}

fn as_set<'a>(entry: &'a mut KeyEntry, key: &[u8]) -> Result<&'a mut HashSet<Bytes>, CommandError> {
    match &mut entry.value {
        Value::Set(members) => Ok(members),
        _ => Err(CommandError::wrong_type(key, "set")),
    }
}

/// A snapshot of one set key; absent keys read as empty.
fn read_set(entry: Option<&KeyEntry>, key: &[u8]) -> Result<HashSet<Bytes>, CommandError> {
    match entry {
        None => Ok(HashSet::new()),
        Some(entry) => match &entry.value {
            Value::Set(members) => Ok(members.clone()),
            _ => Err(CommandError::wrong_type(key, "set")),
        },
    }
}

fn sorted_members(members: HashSet<Bytes>) -> RespValue {
    let mut items: Vec<Bytes> = members.into_iter().collect();
    items.sort();
    RespValue::Array(items.into_iter().map(RespValue::BulkString).collect())
}

/// SADD key member [member ...]
fn cmd_sadd(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() < 3 {
        return Err(CommandError::wrong_args("SADD"));
    }
    let key = argv[1].clone();
    let members = &argv[2..];

    server.keyspace().entry_or_insert(
        session.db,
        &key,
        || Value::Set(HashSet::new()),
        |entry| {
            let set = as_set(entry, &key)?;
            let added = members
                .iter()
                .filter(|m| set.insert((*m).clone()))
                .count();
            Reply::value(RespValue::integer(added as i64))
        },
    )
}

/// SREM key member [member ...]
fn cmd_srem(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() < 3 {
        return Err(CommandError::wrong_args("SREM"));
    }
    let key = &argv[1];
    let removed = server
        .keyspace()
        .write_entry(session.db, key, |entry| {
            let set = as_set(entry, key)?;
            Ok(argv[2..].iter().filter(|m| set.remove(*m)).count())
        })
        .transpose()?
        .unwrap_or(0);
    Reply::value(RespValue::integer(removed as i64))
}

/// SMEMBERS key
fn cmd_smembers(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 2 {
        return Err(CommandError::wrong_args("SMEMBERS"));
    }
    let key = &argv[1];
    let members = server
        .keyspace()
        .read_entry(session.db, key, |entry| match &entry.value {
            Value::Set(members) => Ok(members.clone()),
            _ => Err(CommandError::wrong_type(key, "set")),
        })
        .transpose()?
        .unwrap_or_default();
    Reply::value(sorted_members(members))
}

/// SISMEMBER key member
fn cmd_sismember(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 3 {
        return Err(CommandError::wrong_args("SISMEMBER"));
    }
    let key = &argv[1];
    let found = server
        .keyspace()
        .read_entry(session.db, key, |entry| match &entry.value {
            Value::Set(members) => Ok(members.contains(&argv[2])),
            _ => Err(CommandError::wrong_type(key, "set")),
        })
        .transpose()?
        .unwrap_or(false);
    Reply::value(RespValue::integer(found as i64))
}

/// SCARD key
fn cmd_scard(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 2 {
        return Err(CommandError::wrong_args("SCARD"));
    }
    let key = &argv[1];
    let card = server
        .keyspace()
        .read_entry(session.db, key, |entry| match &entry.value {
            Value::Set(members) => Ok(members.len()),
            _ => Err(CommandError::wrong_type(key, "set")),
        })
        .transpose()?
        .unwrap_or(0);
    Reply::value(RespValue::integer(card as i64))
}

/// SPOP key [count] — removes random members.
fn cmd_spop(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if !(2..=3).contains(&argv.len()) {
        return Err(CommandError::wrong_args("SPOP"));
    }
    let key = &argv[1];
    let count = match argv.get(2) {
        Some(raw) => {
            let n = parse_int(raw)?;
            if n < 0 {
                return Err(CommandError::OutOfRange(
                    "value is out of range, must be positive".to_string(),
                ));
            }
            Some(n as usize)
        }
        None => None,
    };

    let popped = server.keyspace().write_entry(session.db, key, |entry| {
        let set = as_set(entry, key)?;
        let take = count.unwrap_or(1).min(set.len());
        let victims: Vec<Bytes> = set
            .iter()
            .cloned()
            .choose_multiple(&mut rand::thread_rng(), take);
        for member in &victims {
            set.remove(member);
        }
        Ok(victims)
    });

    match popped {
        None => Reply::value(if count.is_none() {
            RespValue::Null
        } else {
            RespValue::Array(Vec::new())
        }),
        Some(Err(e)) => Err(e),
        Some(Ok(victims)) => match count {
            None => Reply::value(
                victims
                    .into_iter()
                    .next()
                    .map(RespValue::BulkString)
                    .unwrap_or(RespValue::Null),
            ),
            Some(_) => Reply::value(RespValue::Array(
                victims.into_iter().map(RespValue::BulkString).collect(),
            )),
        },
    }
}

/// SRANDMEMBER key [count] — positive count samples without replacement,
/// negative with replacement, absent count returns one member.
fn cmd_srandmember(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if !(2..=3).contains(&argv.len()) {
        return Err(CommandError::wrong_args("SRANDMEMBER"));
    }
    let key = &argv[1];
    let count = argv.get(2).map(parse_int).transpose()?;

    let members = server
        .keyspace()
        .read_entry(session.db, key, |entry| match &entry.value {
            Value::Set(members) => {
                let mut rng = rand::thread_rng();
                let picked: Vec<Bytes> = match count {
                    None | Some(1) => members.iter().cloned().choose(&mut rng).into_iter().collect(),
                    Some(n) if n == 0 => Vec::new(),
                    Some(n) if n > 0 => members
                        .iter()
                        .cloned()
                        .choose_multiple(&mut rng, n as usize),
                    Some(n) => {
                        let pool: Vec<&Bytes> = members.iter().collect();
                        if pool.is_empty() {
                            Vec::new()
                        } else {
                            (0..n.unsigned_abs() as usize)
                                .map(|_| pool[rng.gen_range(0..pool.len())].clone())
                                .collect()
                        }
                    }
                };
                Ok(picked)
            }
            _ => Err(CommandError::wrong_type(key, "set")),
        })
        .transpose()?
        .unwrap_or_default();

    match count {
        None => Reply::value(
            members
                .into_iter()
                .next()
                .map(RespValue::BulkString)
                .unwrap_or(RespValue::Null),
        ),
        Some(_) => Reply::value(RespValue::Array(
            members.into_iter().map(RespValue::BulkString).collect(),
        )),
    }
}

/// SMOVE source destination member
fn cmd_smove(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 4 {
        return Err(CommandError::wrong_args("SMOVE"));
    }
    let src = argv[1].clone();
    let dst = argv[2].clone();
    let member = argv[3].clone();

    server.keyspace().with_db(session.db, |view| {
        // Validate both keys before mutating either.
        match view.live(&src) {
            None => return Reply::value(RespValue::integer(0)),
            Some(entry) if !matches!(entry.value, Value::Set(_)) => {
                return Err(CommandError::wrong_type(&src, "set"));
            }
            Some(_) => {}
        }
        if let Some(entry) = view.live(&dst) {
            if !matches!(entry.value, Value::Set(_)) {
                return Err(CommandError::wrong_type(&dst, "set"));
            }
        }

        let moved = {
            let Some(entry) = view.live_mut(&src) else {
                return Reply::value(RespValue::integer(0));
            };
            let set = as_set(entry, &src)?;
            set.remove(&member)
        };
        view.drop_if_empty(&src);
        if !moved {
            return Reply::value(RespValue::integer(0));
        }

        match view.live_mut(&dst) {
            Some(entry) => {
                as_set(entry, &dst)?.insert(member);
            }
            None => {
                let mut members = HashSet::new();
                members.insert(member);
                view.set_value(dst.clone(), Value::Set(members));
            }
        }
        Reply::value(RespValue::integer(1))
    })
}

#[derive(Clone, Copy)]
enum SetAlgebra {
    Union,
    Inter,
    Diff,
}

impl SetAlgebra {
    fn apply(self, sources: Vec<HashSet<Bytes>>) -> HashSet<Bytes> {
        let mut iter = sources.into_iter();
        let Some(first) = iter.next() else {
            return HashSet::new();
        };
        iter.fold(first, |acc, next| match self {
            SetAlgebra::Union => acc.union(&next).cloned().collect(),
            SetAlgebra::Inter => acc.intersection(&next).cloned().collect(),
            SetAlgebra::Diff => acc.difference(&next).cloned().collect(),
        })
    }
}

/// Snapshot every source key under one database lock and combine.
fn combine(
    server: &Server,
    session: &Session,
    keys: &[Bytes],
    op: SetAlgebra,
) -> Result<HashSet<Bytes>, CommandError> {
    server.keyspace().with_db(session.db, |view| {
        let mut sources = Vec::with_capacity(keys.len());
        for key in keys {
            let snapshot = read_set(view.live(key), key)?;
            sources.push(snapshot);
        }
        Ok(op.apply(sources))
    })
}

fn algebra(server: &Server, session: &mut Session, argv: &[Bytes], op: SetAlgebra, cmd: &str) -> CommandResult {
    if argv.len() < 2 {
        return Err(CommandError::wrong_args(cmd));
    }
    let result = combine(server, session, &argv[1..], op)?;
    Reply::value(sorted_members(result))
}

fn algebra_store(
    server: &Server,
    session: &mut Session,
    argv: &[Bytes],
    op: SetAlgebra,
    cmd: &str,
) -> CommandResult {
    if argv.len() < 3 {
        return Err(CommandError::wrong_args(cmd));
    }
    let dst = argv[1].clone();
    let sources: Vec<Bytes> = argv[2..].to_vec();

    server.keyspace().with_db(session.db, |view| {
        let mut snapshots = Vec::with_capacity(sources.len());
        for key in &sources {
            let snapshot = read_set(view.live(key), key)?;
            snapshots.push(snapshot);
        }
        let result = op.apply(snapshots);
        let len = result.len();
        if len == 0 {
            view.remove(&dst);
        } else {
            view.set_value(dst.clone(), Value::Set(result));
        }
        Reply::value(RespValue::integer(len as i64))
    })
}

/// SUNION key [key ...]
fn cmd_sunion(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    algebra(server, session, argv, SetAlgebra::Union, "SUNION")
}

/// SUNIONSTORE destination key [key ...]
fn cmd_sunionstore(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    algebra_store(server, session, argv, SetAlgebra::Union, "SUNIONSTORE")
}

/// SINTER key [key ...]
fn cmd_sinter(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    algebra(server, session, argv, SetAlgebra::Inter, "SINTER")
}

/// SINTERSTORE destination key [key ...]
fn cmd_sinterstore(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    algebra_store(server, session, argv, SetAlgebra::Inter, "SINTERSTORE")
}

/// SDIFF key [key ...]
fn cmd_sdiff(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    algebra(server, session, argv, SetAlgebra::Diff, "SDIFF")
}

/// SDIFFSTORE destination key [key ...]
fn cmd_sdiffstore(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    algebra_store(server, session, argv, SetAlgebra::Diff, "SDIFFSTORE")
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
    fn test_sadd_dedup_and_scard() {
        let (server, mut session) = setup();
        assert_eq!(run(&server, &mut session, &["SADD", "s", "a", "b", "a"]), b":2\r\n");
        assert_eq!(run(&server, &mut session, &["SADD", "s", "b", "c"]), b":1\r\n");
        assert_eq!(run(&server, &mut session, &["SCARD", "s"]), b":3\r\n");
        assert_eq!(
            run(&server, &mut session, &["SMEMBERS", "s"]),
            b"*3\r\n$1\r\na\r\n$1\r\nb\r\n$1\r\nc\r\n"
        );
    }

    #[test]
    fn test_sismember_and_srem() {
        let (server, mut session) = setup();
        run(&server, &mut session, &["SADD", "s", "a", "b"]);
        assert_eq!(run(&server, &mut session, &["SISMEMBER", "s", "a"]), b":1\r\n");
        assert_eq!(run(&server, &mut session, &["SISMEMBER", "s", "z"]), b":0\r\n");

        assert_eq!(run(&server, &mut session, &["SREM", "s", "a", "z"]), b":1\r\n");
        assert_eq!(run(&server, &mut session, &["SCARD", "s"]), b":1\r\n");

        // Emptying the set removes the key.
        run(&server, &mut session, &["SREM", "s", "b"]);
        assert_eq!(run(&server, &mut session, &["EXISTS", "s"]), b":0\r\n");
    }

    #[test]
    fn test_spop_removes_members() {
        let (server, mut session) = setup();
        run(&server, &mut session, &["SADD", "s", "a", "b", "c"]);

        let reply = run(&server, &mut session, &["SPOP", "s"]);
        assert!(reply.starts_with(b"$1\r\n"));
        assert_eq!(run(&server, &mut session, &["SCARD", "s"]), b":2\r\n");

        let reply = run(&server, &mut session, &["SPOP", "s", "5"]);
        assert!(reply.starts_with(b"*2\r\n"));
        assert_eq!(run(&server, &mut session, &["EXISTS", "s"]), b":0\r\n");
        assert_eq!(run(&server, &mut session, &["SPOP", "s"]), b"$-1\r\n");
    }

    #[test]
    fn test_srandmember_counts() {
        let (server, mut session) = setup();
        run(&server, &mut session, &["SADD", "s", "a", "b", "c"]);

        assert!(run(&server, &mut session, &["SRANDMEMBER", "s"]).starts_with(b"$1\r\n"));
        assert!(run(&server, &mut session, &["SRANDMEMBER", "s", "2"]).starts_with(b"*2\r\n"));
        // Positive count is capped at the cardinality.
        assert!(run(&server, &mut session, &["SRANDMEMBER", "s", "9"]).starts_with(b"*3\r\n"));
        // Negative count samples with replacement.
        assert!(run(&server, &mut session, &["SRANDMEMBER", "s", "-5"]).starts_with(b"*5\r\n"));
        assert_eq!(run(&server, &mut session, &["SRANDMEMBER", "s", "0"]), b"*0\r\n");
        // Set is untouched.
        assert_eq!(run(&server, &mut session, &["SCARD", "s"]), b":3\r\n");
    }

    #[test]
    fn test_smove() {
        let (server, mut session) = setup();
        run(&server, &mut session, &["SADD", "src", "a", "b"]);
        run(&server, &mut session, &["SADD", "dst", "x"]);

        assert_eq!(run(&server, &mut session, &["SMOVE", "src", "dst", "a"]), b":1\r\n");
        assert_eq!(run(&server, &mut session, &["SISMEMBER", "dst", "a"]), b":1\r\n");
        assert_eq!(run(&server, &mut session, &["SISMEMBER", "src", "a"]), b":0\r\n");
        assert_eq!(run(&server, &mut session, &["SMOVE", "src", "dst", "nope"]), b":0\r\n");
    }

    #[test]
    fn test_union_inter_diff() {
        let (server, mut session) = setup();
        run(&server, &mut session, &["SADD", "a", "1", "2", "3"]);
        run(&server, &mut session, &["SADD", "b", "2", "3", "4"]);

        assert_eq!(
            run(&server, &mut session, &["SUNION", "a", "b"]),
            b"*4\r\n$1\r\n1\r\n$1\r\n2\r\n$1\r\n3\r\n$1\r\n4\r\n"
        );
        assert_eq!(
            run(&server, &mut session, &["SINTER", "a", "b"]),
            b"*2\r\n$1\r\n2\r\n$1\r\n3\r\n"
        );
        assert_eq!(
            run(&server, &mut session, &["SDIFF", "a", "b"]),
            b"*1\r\n$1\r\n1\r\n"
        );
        // Absent keys read as empty sets.
        assert_eq!(
            run(&server, &mut session, &["SDIFF", "a", "missing"]),
            b"*3\r\n$1\r\n1\r\n$1\r\n2\r\n$1\r\n3\r\n"
        );
    }

    #[test]
    fn test_store_variants() {
        let (server, mut session) = setup();
        run(&server, &mut session, &["SADD", "a", "1", "2"]);
        run(&server, &mut session, &["SADD", "b", "2", "3"]);

        assert_eq!(
            run(&server, &mut session, &["SINTERSTORE", "out", "a", "b"]),
            b":1\r\n"
        );
        assert_eq!(
            run(&server, &mut session, &["SMEMBERS", "out"]),
            b"*1\r\n$1\r\n2\r\n"
        );

        // An empty result deletes the destination.
        assert_eq!(
            run(&server, &mut session, &["SDIFFSTORE", "out", "a", "a"]),
            b":0\r\n"
        );
        assert_eq!(run(&server, &mut session, &["EXISTS", "out"]), b":0\r\n");
    }

    #[test]
    fn test_type_mismatch() {
        let (server, mut session) = setup();
        run(&server, &mut session, &["SET", "k", "v"]);
        assert_eq!(
            run(&server, &mut session, &["SADD", "k", "x"]),
            b"-ERR value at k is not a set\r\n"
        );
        assert_eq!(
            run(&server, &mut session, &["SUNION", "k"]),
            b"-ERR value at k is not a set\r\n"
        );
    }
}
