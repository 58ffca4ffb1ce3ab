//! Sorted-Set Command Family
//!
//! The full sorted-set surface: conditional adds, rank and score lookups,
//! the three-way range selector (rank / score / lex), range stores, the
//! weighted set algebra with aggregators, pops, random members, and range
//! deletions. The container itself lives in `storage::sorted_set`; this
//! module is argv parsing, type checking, and reply shaping.

use crate::commands::registry::{self, AccessedKeys, CommandSpec};
use crate::commands::{parse_float, parse_int, upper, CommandError, CommandResult, Reply, Session};
use crate::protocol::RespValue;
use crate::server::Server;
use crate::storage::sorted_set::{diff_of, inter_of, union_of, Added, AddFlags, Aggregate, LexBound, Limit};
use crate::storage::{KeyEntry, SortedSet, Value};
use bytes::Bytes;

pub fn register(out: &mut Vec<CommandSpec>) {
    let specs = [
        ("ZADD", &["write", "denyoom", "sortedset", "fast"][..], registry::key_write as registry::KeysFn, cmd_zadd as registry::HandlerFn),
        ("ZINCRBY", &["write", "denyoom", "sortedset", "fast"], registry::key_write, cmd_zincrby),
        ("ZCARD", &["read", "sortedset", "fast"], registry::key_read, cmd_zcard),
        ("ZSCORE", &["read", "sortedset", "fast"], registry::key_read, cmd_zscore),
        ("ZMSCORE", &["read", "sortedset", "fast"], registry::key_read, cmd_zmscore),
        ("ZRANK", &["read", "sortedset", "slow"], registry::key_read, cmd_zrank),
        ("ZREVRANK", &["read", "sortedset", "slow"], registry::key_read, cmd_zrevrank),
        ("ZRANGE", &["read", "sortedset", "slow"], registry::key_read, cmd_zrange),
        ("ZRANGESTORE", &["write", "denyoom", "sortedset", "slow"], registry::store_keys, cmd_zrangestore),
        ("ZUNION", &["read", "sortedset", "slow"], zset_algebra_keys, cmd_zunion),
        ("ZUNIONSTORE", &["write", "denyoom", "sortedset", "slow"], zset_algebra_store_keys, cmd_zunionstore),
        ("ZINTER", &["read", "sortedset", "slow"], zset_algebra_keys, cmd_zinter),
        ("ZINTERSTORE", &["write", "denyoom", "sortedset", "slow"], zset_algebra_store_keys, cmd_zinterstore),
        ("ZDIFF", &["read", "sortedset", "slow"], zset_algebra_keys, cmd_zdiff),
        ("ZDIFFSTORE", &["write", "denyoom", "sortedset", "slow"], zset_algebra_store_keys, cmd_zdiffstore),
        ("ZPOPMIN", &["write", "sortedset", "fast"], registry::key_write, cmd_zpopmin),
        ("ZPOPMAX", &["write", "sortedset", "fast"], registry::key_write, cmd_zpopmax),
        ("ZRANDMEMBER", &["read", "sortedset", "slow"], registry::key_read, cmd_zrandmember),
        ("ZREM", &["write", "sortedset", "fast"], registry::key_write, cmd_zrem),
        ("ZREMRANGEBYRANK", &["write", "sortedset", "slow"], registry::key_write, cmd_zremrangebyrank),
        ("ZREMRANGEBYSCORE", &["write", "sortedset", "slow"], registry::key_write, cmd_zremrangebyscore),
        ("ZREMRANGEBYLEX", &["write", "sortedset", "slow"], registry::key_write, cmd_zremrangebylex),
    ];
    out.extend(specs.map(|(name, categories, keys, handler)| CommandSpec {
        name,
        sub: None,
        categories,
        module: "sortedset",
        keys,
        handler,
    }));
}

/// `CMD numkeys key [key ...] [options]`: the numkeys keys are read.
fn zset_algebra_keys(argv: &[Bytes]) -> Result<AccessedKeys, CommandError> {
    let numkeys = argv.get(1).map(parse_int).transpose()?.unwrap_or(0).max(0) as usize;
    Ok(AccessedKeys::reads(
        argv.iter().skip(2).take(numkeys).cloned().collect(),
    ))
}

/// `CMD dst numkeys key [key ...] [options]`: dst written, sources read.
fn zset_algebra_store_keys(argv: &[Bytes]) -> Result<AccessedKeys, CommandError> {
    let mut keys = AccessedKeys::none();
    if let Some(dst) = argv.get(1) {
        keys.write.push(dst.clone());
    }
    let numkeys = argv.get(2).map(parse_int).transpose()?.unwrap_or(0).max(0) as usize;
    keys.read.extend(argv.iter().skip(3).take(numkeys).cloned());
    Ok(keys)
}

fn as_zset<'a>(entry: &'a mut KeyEntry, key: &[u8]) -> Result<&'a mut SortedSet, CommandError> {
    match &mut entry.value {
        Value::SortedSet(zset) => Ok(zset),
        _ => Err(CommandError::wrong_type(key, "sorted set")),
    }
}

/// Runs a read closure over a live sorted set; absent keys yield the
/// default.
fn read_zset<R: Default>(
    server: &Server,
    db: usize,
    key: &[u8],
    f: impl FnOnce(&SortedSet) -> R,
) -> Result<R, CommandError> {
    server
        .keyspace()
        .read_entry(db, key, |entry| match &entry.value {
            Value::SortedSet(zset) => Ok(f(zset)),
            _ => Err(CommandError::wrong_type(key, "sorted set")),
        })
        .transpose()
        .map(Option::unwrap_or_default)
}

fn pairs_reply(pairs: Vec<(Bytes, f64)>, withscores: bool) -> RespValue {
    let mut out = Vec::with_capacity(pairs.len() * if withscores { 2 } else { 1 });
    for (member, score) in pairs {
        out.push(RespValue::BulkString(member));
        if withscores {
            out.push(RespValue::bulk_float(score));
        }
    }
    RespValue::Array(out)
}

/// ZADD key [NX|XX] [GT|LT] [CH] [INCR] score member [score member ...]
fn cmd_zadd(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() < 4 {
        return Err(CommandError::wrong_args("ZADD"));
    }
    let key = argv[1].clone();
    let mut flags = AddFlags::default();

    let mut i = 2;
    while i < argv.len() {
        match upper(&argv[i]).as_str() {
            "NX" => flags.nx = true,
            "XX" => flags.xx = true,
            "GT" => flags.gt = true,
            "LT" => flags.lt = true,
            "CH" => flags.ch = true,
            "INCR" => flags.incr = true,
            _ => break,
        }
        i += 1;
    }

    if flags.nx && flags.xx {
        return Err(CommandError::OptionConflict(
            "XX and NX options at the same time are not compatible".to_string(),
        ));
    }
    if (flags.gt && flags.lt) || (flags.nx && (flags.gt || flags.lt)) {
        return Err(CommandError::OptionConflict(
            "GT, LT, and/or NX options at the same time are not compatible".to_string(),
        ));
    }

    let tail = &argv[i..];
    if tail.is_empty() || tail.len() % 2 != 0 {
        return Err(CommandError::wrong_args("ZADD"));
    }
    let mut pairs = Vec::with_capacity(tail.len() / 2);
    for pair in tail.chunks(2) {
        pairs.push((pair[1].clone(), parse_float(&pair[0])?));
    }
    if flags.incr && pairs.len() != 1 {
        return Err(CommandError::OptionConflict(
            "INCR option supports a single increment-element pair".to_string(),
        ));
    }

    // XX against a missing key must not create it.
    if flags.xx && !server.keyspace().keys_exist(session.db, &[key.clone()])[&key] {
        return Reply::value(if flags.incr {
            RespValue::Null
        } else {
            RespValue::integer(0)
        });
    }

    server.keyspace().entry_or_insert(
        session.db,
        &key,
        || Value::SortedSet(SortedSet::new()),
        |entry| {
            let zset = as_zset(entry, &key)?;
            match zset.add(pairs, flags) {
                Ok(Added::Count(n)) => Reply::value(RespValue::integer(n)),
                Ok(Added::Score(Some(score))) => Reply::value(RespValue::bulk_float(score)),
                Ok(Added::Score(None)) => Reply::value(RespValue::Null),
                Err(_) => Err(CommandError::Parse(
                    "resulting score is not a number (NaN)".to_string(),
                )),
            }
        },
    )
}

/// ZINCRBY key increment member
fn cmd_zincrby(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 4 {
        return Err(CommandError::wrong_args("ZINCRBY"));
    }
    let key = argv[1].clone();
    let delta = parse_float(&argv[2])?;
    let member = argv[3].clone();

    server.keyspace().entry_or_insert(
        session.db,
        &key,
        || Value::SortedSet(SortedSet::new()),
        |entry| {
            let zset = as_zset(entry, &key)?;
            let flags = AddFlags {
                incr: true,
                ..Default::default()
            };
            match zset.add(vec![(member.clone(), delta)], flags) {
                Ok(Added::Score(Some(score))) => Reply::value(RespValue::bulk_float(score)),
                Ok(_) => Reply::value(RespValue::Null),
                Err(_) => Err(CommandError::Parse(
                    "resulting score is not a number (NaN)".to_string(),
                )),
            }
        },
    )
}

/// ZCARD key
fn cmd_zcard(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 2 {
        return Err(CommandError::wrong_args("ZCARD"));
    }
    let card = read_zset(server, session.db, &argv[1], |z| z.len())?;
    Reply::value(RespValue::integer(card as i64))
}

/// ZSCORE key member
fn cmd_zscore(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 3 {
        return Err(CommandError::wrong_args("ZSCORE"));
    }
    let score = read_zset(server, session.db, &argv[1], |z| z.score(&argv[2]))?;
    Reply::value(score.map(RespValue::bulk_float).unwrap_or(RespValue::Null))
}

/// ZMSCORE key member [member ...]
fn cmd_zmscore(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() < 3 {
        return Err(CommandError::wrong_args("ZMSCORE"));
    }
    let scores = read_zset(server, session.db, &argv[1], |z| {
        argv[2..].iter().map(|m| z.score(m)).collect::<Vec<_>>()
    })?;
    let scores = if scores.is_empty() {
        vec![None; argv.len() - 2]
    } else {
        scores
    };
    Reply::value(RespValue::Array(
        scores
            .into_iter()
            .map(|s| s.map(RespValue::bulk_float).unwrap_or(RespValue::Null))
            .collect(),
    ))
}

fn rank_reply(
    server: &Server,
    session: &Session,
    argv: &[Bytes],
    cmd: &str,
    rev: bool,
) -> CommandResult {
    if !(3..=4).contains(&argv.len()) {
        return Err(CommandError::wrong_args(cmd));
    }
    let withscore = match argv.get(3) {
        None => false,
        Some(raw) if upper(raw) == "WITHSCORE" => true,
        Some(_) => return Err(CommandError::syntax()),
    };

    let found = read_zset(server, session.db, &argv[1], |z| z.rank(&argv[2], rev))?;
    match found {
        None => Reply::value(RespValue::Null),
        Some((rank, score)) => {
            if withscore {
                Reply::value(RespValue::Array(vec![
                    RespValue::integer(rank as i64),
                    RespValue::bulk_float(score),
                ]))
            } else {
                Reply::value(RespValue::integer(rank as i64))
            }
        }
    }
}

/// ZRANK key member [WITHSCORE] — ascending-score position, lex tie-break.
fn cmd_zrank(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    rank_reply(server, session, argv, "ZRANK", false)
}

/// ZREVRANK key member [WITHSCORE]
fn cmd_zrevrank(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    rank_reply(server, session, argv, "ZREVRANK", true)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum RangeBy {
    Rank,
    Score,
    Lex,
}

#[derive(Debug)]
struct RangeQuery {
    start: Bytes,
    stop: Bytes,
    by: RangeBy,
    rev: bool,
    limit: Limit,
    limit_given: bool,
    withscores: bool,
}

/// Parses `start stop [BYSCORE|BYLEX] [REV] [LIMIT offset count]
/// [WITHSCORES]` beginning at `argv[at]`.
fn parse_range_query(argv: &[Bytes], at: usize, cmd: &str) -> Result<RangeQuery, CommandError> {
    let start = argv
        .get(at)
        .cloned()
        .ok_or_else(|| CommandError::wrong_args(cmd))?;
    let stop = argv
        .get(at + 1)
        .cloned()
        .ok_or_else(|| CommandError::wrong_args(cmd))?;

    let mut query = RangeQuery {
        start,
        stop,
        by: RangeBy::Rank,
        rev: false,
        limit: Limit::all(),
        limit_given: false,
        withscores: false,
    };

    let mut i = at + 2;
    while i < argv.len() {
        match upper(&argv[i]).as_str() {
            "BYSCORE" => query.by = RangeBy::Score,
            "BYLEX" => query.by = RangeBy::Lex,
            "REV" => query.rev = true,
            "WITHSCORES" => query.withscores = true,
            "LIMIT" => {
                let offset = parse_int(argv.get(i + 1).ok_or_else(CommandError::syntax)?)?;
                let count = parse_int(argv.get(i + 2).ok_or_else(CommandError::syntax)?)?;
                if offset < 0 {
                    return Err(CommandError::OutOfRange("offset is out of range".to_string()));
                }
                query.limit = Limit {
                    offset: offset as usize,
                    count,
                };
                query.limit_given = true;
                i += 2;
            }
            _ => return Err(CommandError::syntax()),
        }
        i += 1;
    }

    if query.limit_given && query.by == RangeBy::Rank {
        return Err(CommandError::OptionConflict(
            "syntax error, LIMIT is only supported in combination with either BYSCORE or BYLEX"
                .to_string(),
        ));
    }
    Ok(query)
}

/// Runs a parsed range query against one sorted set.
fn select_range(zset: &SortedSet, query: &RangeQuery) -> Result<Vec<(Bytes, f64)>, CommandError> {
    match query.by {
        RangeBy::Rank => {
            let start = parse_int(&query.start)?;
            let stop = parse_int(&query.stop)?;
            Ok(zset.range_by_rank(start, stop, query.rev))
        }
        RangeBy::Score => {
            // Under REV the bounds arrive highest-first.
            let (lo, hi) = if query.rev {
                (&query.stop, &query.start)
            } else {
                (&query.start, &query.stop)
            };
            let min = parse_float(lo)?;
            let max = parse_float(hi)?;
            Ok(zset.range_by_score(min, max, query.rev, query.limit))
        }
        RangeBy::Lex => {
            let (lo, hi) = if query.rev {
                (&query.stop, &query.start)
            } else {
                (&query.start, &query.stop)
            };
            let min = LexBound::parse(lo).ok_or_else(|| {
                CommandError::Parse("min or max not valid string range item".to_string())
            })?;
            let max = LexBound::parse(hi).ok_or_else(|| {
                CommandError::Parse("min or max not valid string range item".to_string())
            })?;
            Ok(zset.range_by_lex(&min, &max, query.rev, query.limit))
        }
    }
}

/// ZRANGE key start stop [BYSCORE|BYLEX] [REV] [LIMIT offset count]
/// [WITHSCORES]
fn cmd_zrange(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() < 4 {
        return Err(CommandError::wrong_args("ZRANGE"));
    }
    let query = parse_range_query(argv, 2, "ZRANGE")?;
    let selected = server
        .keyspace()
        .read_entry(session.db, &argv[1], |entry| match &entry.value {
            Value::SortedSet(zset) => select_range(zset, &query),
            _ => Err(CommandError::wrong_type(&argv[1], "sorted set")),
        });
    let pairs = selected.transpose()?.unwrap_or_default();
    Reply::value(pairs_reply(pairs, query.withscores))
}

/// ZRANGESTORE dst src start stop [BYSCORE|BYLEX] [REV] [LIMIT ...]
fn cmd_zrangestore(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() < 5 {
        return Err(CommandError::wrong_args("ZRANGESTORE"));
    }
    let dst = argv[1].clone();
    let src = argv[2].clone();
    let query = parse_range_query(argv, 3, "ZRANGESTORE")?;
    if query.withscores {
        return Err(CommandError::syntax());
    }

    server.keyspace().with_db(session.db, |view| {
        let selection = match view.live(&src) {
            None => Vec::new(),
            Some(entry) => match &entry.value {
                Value::SortedSet(zset) => select_range(zset, &query)?,
                _ => return Err(CommandError::wrong_type(&src, "sorted set")),
            },
        };

        let len = selection.len();
        if len == 0 {
            view.remove(&dst);
        } else {
            let mut out = SortedSet::new();
            for (member, score) in selection {
                out.upsert(member, score);
            }
            view.set_value(dst.clone(), Value::SortedSet(out));
        }
        Reply::value(RespValue::integer(len as i64))
    })
}

#[derive(Debug, Clone, Copy)]
enum ZsetAlgebra {
    Union,
    Inter,
    Diff,
}

struct AlgebraArgs {
    keys: Vec<Bytes>,
    weights: Vec<f64>,
    aggregate: Aggregate,
    withscores: bool,
}

/// Parses `numkeys key [key ...] [WEIGHTS w ...] [AGGREGATE SUM|MIN|MAX]
/// [WITHSCORES]` beginning at `argv[at]`.
fn parse_algebra_args(argv: &[Bytes], at: usize, cmd: &str) -> Result<AlgebraArgs, CommandError> {
    let numkeys = parse_int(argv.get(at).ok_or_else(|| CommandError::wrong_args(cmd))?)?;
    if numkeys <= 0 {
        return Err(CommandError::Parse(
            "at least 1 input key is needed".to_string(),
        ));
    }
    let numkeys = numkeys as usize;
    let keys: Vec<Bytes> = argv
        .iter()
        .skip(at + 1)
        .take(numkeys)
        .cloned()
        .collect();
    if keys.len() != numkeys {
        return Err(CommandError::syntax());
    }

    let mut args = AlgebraArgs {
        keys,
        weights: vec![1.0; numkeys],
        aggregate: Aggregate::Sum,
        withscores: false,
    };

    let mut i = at + 1 + numkeys;
    while i < argv.len() {
        match upper(&argv[i]).as_str() {
            "WEIGHTS" => {
                for w in 0..numkeys {
                    args.weights[w] =
                        parse_float(argv.get(i + 1 + w).ok_or_else(CommandError::syntax)?)?;
                }
                i += numkeys;
            }
            "AGGREGATE" => {
                let raw = argv.get(i + 1).ok_or_else(CommandError::syntax)?;
                args.aggregate = Aggregate::parse(raw).ok_or_else(CommandError::syntax)?;
                i += 1;
            }
            "WITHSCORES" => args.withscores = true,
            _ => return Err(CommandError::syntax()),
        }
        i += 1;
    }
    Ok(args)
}

/// Snapshots the sources out of one locked database view and combines
/// them. Absent keys read as empty sets.
fn combine_in_view(
    view: &mut crate::storage::DbView<'_>,
    args: &AlgebraArgs,
    op: ZsetAlgebra,
) -> Result<SortedSet, CommandError> {
    let mut snapshots = Vec::with_capacity(args.keys.len());
    for key in &args.keys {
        let snapshot = match view.live(key) {
            None => SortedSet::new(),
            Some(entry) => match &entry.value {
                Value::SortedSet(zset) => zset.clone(),
                _ => return Err(CommandError::wrong_type(key, "sorted set")),
            },
        };
        snapshots.push(snapshot);
    }

    let weighted: Vec<(&SortedSet, f64)> = snapshots
        .iter()
        .zip(args.weights.iter().copied())
        .collect();
    Ok(match op {
        ZsetAlgebra::Union => union_of(&weighted, args.aggregate),
        ZsetAlgebra::Inter => inter_of(&weighted, args.aggregate),
        ZsetAlgebra::Diff => match weighted.split_first() {
            Some((first, rest)) => {
                let rest: Vec<&SortedSet> = rest.iter().map(|(z, _)| *z).collect();
                diff_of(*first, &rest)
            }
            None => SortedSet::new(),
        },
    })
}

fn algebra(server: &Server, session: &mut Session, argv: &[Bytes], op: ZsetAlgebra, cmd: &str) -> CommandResult {
    if argv.len() < 3 {
        return Err(CommandError::wrong_args(cmd));
    }
    let args = parse_algebra_args(argv, 1, cmd)?;
    let combined = server
        .keyspace()
        .with_db(session.db, |view| combine_in_view(view, &args, op))?;
    Reply::value(pairs_reply(
        combined.iter_asc().collect(),
        args.withscores,
    ))
}

fn algebra_store(
    server: &Server,
    session: &mut Session,
    argv: &[Bytes],
    op: ZsetAlgebra,
    cmd: &str,
) -> CommandResult {
    if argv.len() < 4 {
        return Err(CommandError::wrong_args(cmd));
    }
    let dst = argv[1].clone();
    let args = parse_algebra_args(argv, 2, cmd)?;
    if args.withscores {
        return Err(CommandError::syntax());
    }

    // Snapshot, combine, and commit under one database lock.
    server.keyspace().with_db(session.db, |view| {
        let combined = combine_in_view(view, &args, op)?;
        let len = combined.len();
        if len == 0 {
            view.remove(&dst);
        } else {
            view.set_value(dst.clone(), Value::SortedSet(combined));
        }
        Reply::value(RespValue::integer(len as i64))
    })
}

/// ZUNION numkeys key [key ...] [WEIGHTS ...] [AGGREGATE ...] [WITHSCORES]
fn cmd_zunion(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    algebra(server, session, argv, ZsetAlgebra::Union, "ZUNION")
}

/// ZUNIONSTORE dst numkeys key [key ...] [WEIGHTS ...] [AGGREGATE ...]
fn cmd_zunionstore(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    algebra_store(server, session, argv, ZsetAlgebra::Union, "ZUNIONSTORE")
}

/// ZINTER numkeys key [key ...] [WEIGHTS ...] [AGGREGATE ...] [WITHSCORES]
fn cmd_zinter(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    algebra(server, session, argv, ZsetAlgebra::Inter, "ZINTER")
}

/// ZINTERSTORE dst numkeys key [key ...] [WEIGHTS ...] [AGGREGATE ...]
fn cmd_zinterstore(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    algebra_store(server, session, argv, ZsetAlgebra::Inter, "ZINTERSTORE")
}

/// ZDIFF numkeys key [key ...] [WITHSCORES]
fn cmd_zdiff(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    algebra(server, session, argv, ZsetAlgebra::Diff, "ZDIFF")
}

/// ZDIFFSTORE dst numkeys key [key ...]
fn cmd_zdiffstore(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    algebra_store(server, session, argv, ZsetAlgebra::Diff, "ZDIFFSTORE")
}

fn pop(server: &Server, session: &Session, argv: &[Bytes], cmd: &str, min: bool) -> CommandResult {
    if !(2..=3).contains(&argv.len()) {
        return Err(CommandError::wrong_args(cmd));
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
            n as usize
        }
        None => 1,
    };

    let popped = server
        .keyspace()
        .write_entry(session.db, key, |entry| {
            let zset = as_zset(entry, key)?;
            Ok(if min {
                zset.pop_min(count)
            } else {
                zset.pop_max(count)
            })
        })
        .transpose()?
        .unwrap_or_default();
    Reply::value(pairs_reply(popped, true))
}

/// ZPOPMIN key [count] — lowest scores first, ties by member.
fn cmd_zpopmin(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    pop(server, session, argv, "ZPOPMIN", true)
}

/// ZPOPMAX key [count]
fn cmd_zpopmax(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    pop(server, session, argv, "ZPOPMAX", false)
}

/// ZRANDMEMBER key [count [WITHSCORES]]
fn cmd_zrandmember(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if !(2..=4).contains(&argv.len()) {
        return Err(CommandError::wrong_args("ZRANDMEMBER"));
    }
    let count = argv.get(2).map(parse_int).transpose()?;
    let withscores = match argv.get(3) {
        None => false,
        Some(raw) if upper(raw) == "WITHSCORES" => true,
        Some(_) => return Err(CommandError::syntax()),
    };

    let picked = read_zset(server, session.db, &argv[1], |z| {
        z.random_members(count.unwrap_or(1))
    })?;

    match count {
        None => Reply::value(
            picked
                .into_iter()
                .next()
                .map(|(m, _)| RespValue::BulkString(m))
                .unwrap_or(RespValue::Null),
        ),
        Some(_) => Reply::value(pairs_reply(picked, withscores)),
    }
}

/// ZREM key member [member ...]
fn cmd_zrem(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() < 3 {
        return Err(CommandError::wrong_args("ZREM"));
    }
    let key = &argv[1];
    let removed = server
        .keyspace()
        .write_entry(session.db, key, |entry| {
            let zset = as_zset(entry, key)?;
            Ok(argv[2..]
                .iter()
                .filter(|m| zset.take(m).is_some())
                .count())
        })
        .transpose()?
        .unwrap_or(0);
    Reply::value(RespValue::integer(removed as i64))
}

/// ZREMRANGEBYRANK key start stop
fn cmd_zremrangebyrank(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 4 {
        return Err(CommandError::wrong_args("ZREMRANGEBYRANK"));
    }
    let key = &argv[1];
    let start = parse_int(&argv[2])?;
    let stop = parse_int(&argv[3])?;

    let removed = server
        .keyspace()
        .write_entry(session.db, key, |entry| {
            let zset = as_zset(entry, key)?;
            zset.remove_range_by_rank(start, stop)
                .ok_or_else(|| CommandError::OutOfRange("indices out of bounds".to_string()))
        })
        .transpose()?
        .unwrap_or(0);
    Reply::value(RespValue::integer(removed as i64))
}

/// ZREMRANGEBYSCORE key min max
fn cmd_zremrangebyscore(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 4 {
        return Err(CommandError::wrong_args("ZREMRANGEBYSCORE"));
    }
    let key = &argv[1];
    let min = parse_float(&argv[2])?;
    let max = parse_float(&argv[3])?;

    let removed = server
        .keyspace()
        .write_entry(session.db, key, |entry| {
            let zset = as_zset(entry, key)?;
            Ok(zset.remove_range_by_score(min, max))
        })
        .transpose()?
        .unwrap_or(0);
    Reply::value(RespValue::integer(removed as i64))
}

/// ZREMRANGEBYLEX key min max — removes nothing unless scores are uniform.
fn cmd_zremrangebylex(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 4 {
        return Err(CommandError::wrong_args("ZREMRANGEBYLEX"));
    }
    let key = &argv[1];
    let min = LexBound::parse(&argv[2])
        .ok_or_else(|| CommandError::Parse("min or max not valid string range item".to_string()))?;
    let max = LexBound::parse(&argv[3])
        .ok_or_else(|| CommandError::Parse("min or max not valid string range item".to_string()))?;

    let removed = server
        .keyspace()
        .write_entry(session.db, key, |entry| {
            let zset = as_zset(entry, key)?;
            Ok(zset.remove_range_by_lex(&min, &max))
        })
        .transpose()?
        .unwrap_or(0);
    Reply::value(RespValue::integer(removed as i64))
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
    fn test_zadd_zrange_scenario() {
        let (server, mut session) = setup();
        assert_eq!(
            run(&server, &mut session, &["ZADD", "z", "1", "a", "2", "b", "3", "c"]),
            b":3\r\n"
        );
        assert_eq!(
            run(&server, &mut session, &["ZRANGE", "z", "0", "-1", "WITHSCORES"]),
            b"*6\r\n$1\r\na\r\n$1\r\n1\r\n$1\r\nb\r\n$1\r\n2\r\n$1\r\nc\r\n$1\r\n3\r\n"
        );
        // XX GT with a lower score: no update.
        assert_eq!(
            run(&server, &mut session, &["ZADD", "z", "XX", "GT", "0", "b"]),
            b":0\r\n"
        );
        assert_eq!(run(&server, &mut session, &["ZSCORE", "z", "b"]), b"$1\r\n2\r\n");
    }

    #[test]
    fn test_zadd_flag_conflicts() {
        let (server, mut session) = setup();
        assert_eq!(
            run(&server, &mut session, &["ZADD", "z", "NX", "XX", "1", "a"]),
            b"-ERR XX and NX options at the same time are not compatible\r\n"
        );
        assert_eq!(
            run(&server, &mut session, &["ZADD", "z", "NX", "GT", "1", "a"]),
            b"-ERR GT, LT, and/or NX options at the same time are not compatible\r\n"
        );
    }

    #[test]
    fn test_zadd_incr() {
        let (server, mut session) = setup();
        assert_eq!(
            run(&server, &mut session, &["ZADD", "z", "INCR", "2.5", "m"]),
            b"$3\r\n2.5\r\n"
        );
        assert_eq!(
            run(&server, &mut session, &["ZADD", "z", "INCR", "1.5", "m"]),
            b"$1\r\n4\r\n"
        );
        // XX INCR on a missing member: nil, nothing created.
        assert_eq!(
            run(&server, &mut session, &["ZADD", "z", "XX", "INCR", "1", "nope"]),
            b"$-1\r\n"
        );
        assert_eq!(run(&server, &mut session, &["ZCARD", "z"]), b":1\r\n");
        // Two pairs under INCR: rejected.
        assert!(run(
            &server,
            &mut session,
            &["ZADD", "z", "INCR", "1", "a", "2", "b"]
        )
        .starts_with(b"-ERR"));
    }

    #[test]
    fn test_zscore_and_zmscore() {
        let (server, mut session) = setup();
        run(&server, &mut session, &["ZADD", "z", "1.5", "a", "inf", "b"]);
        assert_eq!(run(&server, &mut session, &["ZSCORE", "z", "a"]), b"$3\r\n1.5\r\n");
        assert_eq!(run(&server, &mut session, &["ZSCORE", "z", "b"]), b"$3\r\ninf\r\n");
        assert_eq!(run(&server, &mut session, &["ZSCORE", "z", "x"]), b"$-1\r\n");
        assert_eq!(
            run(&server, &mut session, &["ZMSCORE", "z", "a", "x"]),
            b"*2\r\n$3\r\n1.5\r\n$-1\r\n"
        );
        // Non-numeric score: the canonical float error.
        assert_eq!(
            run(&server, &mut session, &["ZADD", "z", "abc", "m"]),
            b"-ERR value is not a valid float\r\n"
        );
    }

    #[test]
    fn test_zrank_ties_break_lexicographically() {
        let (server, mut session) = setup();
        run(&server, &mut session, &["ZADD", "z", "1", "bb", "1", "aa", "2", "cc"]);

        assert_eq!(run(&server, &mut session, &["ZRANK", "z", "aa"]), b":0\r\n");
        assert_eq!(run(&server, &mut session, &["ZRANK", "z", "bb"]), b":1\r\n");
        assert_eq!(run(&server, &mut session, &["ZREVRANK", "z", "cc"]), b":0\r\n");
        assert_eq!(
            run(&server, &mut session, &["ZRANK", "z", "cc", "WITHSCORE"]),
            b"*2\r\n:2\r\n$1\r\n2\r\n"
        );
        assert_eq!(run(&server, &mut session, &["ZRANK", "z", "zz"]), b"$-1\r\n");
    }

    #[test]
    fn test_zrange_byscore() {
        let (server, mut session) = setup();
        run(&server, &mut session, &["ZADD", "z", "1", "a", "2", "b", "3", "c"]);

        assert_eq!(
            run(&server, &mut session, &["ZRANGE", "z", "2", "+inf", "BYSCORE"]),
            b"*2\r\n$1\r\nb\r\n$1\r\nc\r\n"
        );
        assert_eq!(
            run(&server, &mut session, &["ZRANGE", "z", "3", "1", "BYSCORE", "REV"]),
            b"*3\r\n$1\r\nc\r\n$1\r\nb\r\n$1\r\na\r\n"
        );
        assert_eq!(
            run(
                &server,
                &mut session,
                &["ZRANGE", "z", "-inf", "+inf", "BYSCORE", "LIMIT", "1", "1"]
            ),
            b"*1\r\n$1\r\nb\r\n"
        );
        // LIMIT without BYSCORE/BYLEX is rejected.
        assert!(run(
            &server,
            &mut session,
            &["ZRANGE", "z", "0", "-1", "LIMIT", "0", "1"]
        )
        .starts_with(b"-ERR"));
    }

    #[test]
    fn test_zrange_bylex() {
        let (server, mut session) = setup();
        run(
            &server,
            &mut session,
            &["ZADD", "z", "0", "a", "0", "b", "0", "c", "0", "d"],
        );
        assert_eq!(
            run(&server, &mut session, &["ZRANGE", "z", "[b", "(d", "BYLEX"]),
            b"*2\r\n$1\r\nb\r\n$1\r\nc\r\n"
        );
        assert_eq!(
            run(&server, &mut session, &["ZRANGE", "z", "-", "+", "BYLEX"]),
            b"*4\r\n$1\r\na\r\n$1\r\nb\r\n$1\r\nc\r\n$1\r\nd\r\n"
        );

        // Mixed scores: the lex form selects nothing.
        run(&server, &mut session, &["ZADD", "z", "9", "e"]);
        assert_eq!(
            run(&server, &mut session, &["ZRANGE", "z", "-", "+", "BYLEX"]),
            b"*0\r\n"
        );
    }

    #[test]
    fn test_zrangestore() {
        let (server, mut session) = setup();
        run(&server, &mut session, &["ZADD", "z", "1", "a", "2", "b", "3", "c"]);

        assert_eq!(
            run(&server, &mut session, &["ZRANGESTORE", "out", "z", "0", "1"]),
            b":2\r\n"
        );
        assert_eq!(
            run(&server, &mut session, &["ZRANGE", "out", "0", "-1", "WITHSCORES"]),
            b"*4\r\n$1\r\na\r\n$1\r\n1\r\n$1\r\nb\r\n$1\r\n2\r\n"
        );

        // Empty selection deletes the destination.
        assert_eq!(
            run(&server, &mut session, &["ZRANGESTORE", "out", "z", "9", "9"]),
            b":0\r\n"
        );
        assert_eq!(run(&server, &mut session, &["EXISTS", "out"]), b":0\r\n");
    }

    #[test]
    fn test_algebra_idempotence() {
        let (server, mut session) = setup();
        run(&server, &mut session, &["ZADD", "a", "1", "x", "2", "y"]);

        // ZUNION(A, A) with SUM doubles every score.
        assert_eq!(
            run(&server, &mut session, &["ZUNION", "2", "a", "a", "WITHSCORES"]),
            b"*4\r\n$1\r\nx\r\n$1\r\n2\r\n$1\r\ny\r\n$1\r\n4\r\n"
        );
        assert_eq!(
            run(&server, &mut session, &["ZINTER", "2", "a", "a", "WITHSCORES"]),
            b"*4\r\n$1\r\nx\r\n$1\r\n2\r\n$1\r\ny\r\n$1\r\n4\r\n"
        );
        assert_eq!(run(&server, &mut session, &["ZDIFF", "2", "a", "a"]), b"*0\r\n");
    }

    #[test]
    fn test_algebra_weights_and_aggregate() {
        let (server, mut session) = setup();
        run(&server, &mut session, &["ZADD", "a", "1", "x", "4", "y"]);
        run(&server, &mut session, &["ZADD", "b", "10", "y", "3", "z"]);

        assert_eq!(
            run(
                &server,
                &mut session,
                &["ZUNION", "2", "a", "b", "WEIGHTS", "2", "1", "AGGREGATE", "MIN", "WITHSCORES"]
            ),
            b"*6\r\n$1\r\nx\r\n$1\r\n2\r\n$1\r\nz\r\n$1\r\n3\r\n$1\r\ny\r\n$1\r\n8\r\n"
        );
        assert_eq!(
            run(&server, &mut session, &["ZINTERSTORE", "out", "2", "a", "b"]),
            b":1\r\n"
        );
        assert_eq!(
            run(&server, &mut session, &["ZSCORE", "out", "y"]),
            b"$2\r\n14\r\n"
        );
        assert_eq!(
            run(&server, &mut session, &["ZDIFFSTORE", "out2", "2", "a", "b"]),
            b":1\r\n"
        );
        assert_eq!(run(&server, &mut session, &["ZSCORE", "out2", "x"]), b"$1\r\n1\r\n");
    }

    #[test]
    fn test_zpop_ties_by_lex() {
        let (server, mut session) = setup();
        run(&server, &mut session, &["ZADD", "z", "1", "b", "1", "a", "2", "c"]);

        assert_eq!(
            run(&server, &mut session, &["ZPOPMIN", "z"]),
            b"*2\r\n$1\r\na\r\n$1\r\n1\r\n"
        );
        assert_eq!(
            run(&server, &mut session, &["ZPOPMAX", "z", "2"]),
            b"*4\r\n$1\r\nc\r\n$1\r\n2\r\n$1\r\nb\r\n$1\r\n1\r\n"
        );
        // Set emptied: key removed.
        assert_eq!(run(&server, &mut session, &["EXISTS", "z"]), b":0\r\n");
    }

    #[test]
    fn test_zrandmember_counts() {
        let (server, mut session) = setup();
        run(&server, &mut session, &["ZADD", "z", "1", "a", "2", "b", "3", "c"]);

        assert!(run(&server, &mut session, &["ZRANDMEMBER", "z"]).starts_with(b"$1\r\n"));
        assert_eq!(run(&server, &mut session, &["ZRANDMEMBER", "z", "0"]), b"*0\r\n");
        assert!(run(&server, &mut session, &["ZRANDMEMBER", "z", "9"]).starts_with(b"*3\r\n"));
        assert!(run(&server, &mut session, &["ZRANDMEMBER", "z", "-5"]).starts_with(b"*5\r\n"));
        assert!(
            run(&server, &mut session, &["ZRANDMEMBER", "z", "2", "WITHSCORES"])
                .starts_with(b"*4\r\n")
        );
    }

    #[test]
    fn test_zremrange_family() {
        let (server, mut session) = setup();
        run(
            &server,
            &mut session,
            &["ZADD", "z", "1", "a", "2", "b", "3", "c", "4", "d"],
        );

        assert_eq!(
            run(&server, &mut session, &["ZREMRANGEBYSCORE", "z", "3", "4"]),
            b":2\r\n"
        );
        assert_eq!(
            run(&server, &mut session, &["ZREMRANGEBYRANK", "z", "0", "0"]),
            b":1\r\n"
        );
        assert_eq!(
            run(&server, &mut session, &["ZREMRANGEBYRANK", "z", "5", "9"]),
            b"-ERR indices out of bounds\r\n"
        );

        // Lex deletion on a uniform-score set.
        run(&server, &mut session, &["ZADD", "w", "0", "a", "0", "b", "0", "c"]);
        assert_eq!(
            run(&server, &mut session, &["ZREMRANGEBYLEX", "w", "[a", "[b"]),
            b":2\r\n"
        );
        // Mixed scores remove nothing.
        run(&server, &mut session, &["ZADD", "w", "5", "q"]);
        assert_eq!(
            run(&server, &mut session, &["ZREMRANGEBYLEX", "w", "-", "+"]),
            b":0\r\n"
        );
    }

    #[test]
    fn test_zincrby() {
        let (server, mut session) = setup();
        assert_eq!(
            run(&server, &mut session, &["ZINCRBY", "z", "3", "m"]),
            b"$1\r\n3\r\n"
        );
        assert_eq!(
            run(&server, &mut session, &["ZINCRBY", "z", "-0.5", "m"]),
            b"$3\r\n2.5\r\n"
        );
    }

    #[test]
    fn test_type_mismatch() {
        let (server, mut session) = setup();
        run(&server, &mut session, &["SET", "k", "v"]);
        assert_eq!(
            run(&server, &mut session, &["ZADD", "k", "1", "m"]),
            b"-ERR value at k is not a sorted set\r\n"
        );
        assert_eq!(
            run(&server, &mut session, &["ZRANGE", "k", "0", "-1"]),
            b"-ERR value at k is not a sorted set\r\n"
        );
    }
}
