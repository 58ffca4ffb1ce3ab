//! Pub/Sub Command Family
//!
//! Subscription management and publishing. The session owns its channel
//! and pattern index lists; the bus owns the forward maps. Confirmation
//! frames go out through the normal reply path (one frame per channel),
//! while published messages arrive through the session's push channel.

use crate::commands::registry::{self, AccessedKeys, CommandSpec};
use crate::commands::{CommandError, CommandResult, Reply, Session};
use crate::glob::GlobPattern;
use crate::protocol::RespValue;
use crate::server::Server;
use bytes::Bytes;

pub fn register(out: &mut Vec<CommandSpec>) {
    let flat = [
        ("SUBSCRIBE", &["pubsub", "fast"][..], channel_keys as registry::KeysFn, cmd_subscribe as registry::HandlerFn),
        ("UNSUBSCRIBE", &["pubsub", "fast"], channel_keys, cmd_unsubscribe),
        ("PSUBSCRIBE", &["pubsub", "fast"], channel_keys, cmd_psubscribe),
        ("PUNSUBSCRIBE", &["pubsub", "fast"], channel_keys, cmd_punsubscribe),
        ("PUBLISH", &["pubsub", "fast"], channel_keys, cmd_publish),
    ];
    out.extend(flat.map(|(name, categories, keys, handler)| CommandSpec {
        name,
        sub: None,
        categories,
        module: "pubsub",
        keys,
        handler,
    }));

    for (sub, handler) in [
        ("CHANNELS", cmd_pubsub_channels as registry::HandlerFn),
        ("NUMPAT", cmd_pubsub_numpat),
        ("NUMSUB", cmd_pubsub_numsub),
    ] {
        out.push(CommandSpec {
            name: "PUBSUB",
            sub: Some(sub),
            categories: &["pubsub", "slow"],
            module: "pubsub",
            keys: registry::no_keys,
            handler,
        });
    }
}

/// Every non-command token is a channel (or pattern) for ACL purposes.
fn channel_keys(argv: &[Bytes]) -> Result<AccessedKeys, CommandError> {
    Ok(AccessedKeys::channels(argv.iter().skip(1).cloned().collect()))
}

fn confirmation(kind: &str, channel: Option<&Bytes>, count: usize) -> RespValue {
    RespValue::Array(vec![
        RespValue::bulk_string(kind.to_string()),
        channel
            .map(|c| RespValue::BulkString(c.clone()))
            .unwrap_or(RespValue::Null),
        RespValue::integer(count as i64),
    ])
}

/// SUBSCRIBE channel [channel ...]
fn cmd_subscribe(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() < 2 {
        return Err(CommandError::wrong_args("SUBSCRIBE"));
    }
    let mut frames = Vec::with_capacity(argv.len() - 1);
    for channel in &argv[1..] {
        if !session.channels.contains(channel) {
            session.channels.push(channel.clone());
        }
        let index = server.bus().subscribe(
            session.id,
            &session.push_tx,
            channel.clone(),
            session.subscription_count(),
        );
        frames.push(confirmation("subscribe", Some(channel), index));
    }
    Reply::frames(frames)
}

/// PSUBSCRIBE pattern [pattern ...]
fn cmd_psubscribe(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() < 2 {
        return Err(CommandError::wrong_args("PSUBSCRIBE"));
    }
    let mut frames = Vec::with_capacity(argv.len() - 1);
    for pattern in &argv[1..] {
        if !session.patterns.contains(pattern) {
            session.patterns.push(pattern.clone());
        }
        let index = server.bus().psubscribe(
            session.id,
            &session.push_tx,
            pattern.clone(),
            session.subscription_count(),
        );
        frames.push(confirmation("psubscribe", Some(pattern), index));
    }
    Reply::frames(frames)
}

/// UNSUBSCRIBE [channel ...] — no channels means all of them.
fn cmd_unsubscribe(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    let targets: Vec<Bytes> = if argv.len() > 1 {
        argv[1..].to_vec()
    } else {
        session.channels.clone()
    };

    if targets.is_empty() {
        return Reply::frames(vec![confirmation("unsubscribe", None, 0)]);
    }

    let mut frames = Vec::with_capacity(targets.len());
    for channel in &targets {
        server.bus().unsubscribe(session.id, channel);
        session.channels.retain(|c| c != channel);
        frames.push(confirmation(
            "unsubscribe",
            Some(channel),
            session.subscription_count(),
        ));
    }
    Reply::frames(frames)
}

/// PUNSUBSCRIBE [pattern ...] — no patterns means all of them.
fn cmd_punsubscribe(server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    let targets: Vec<Bytes> = if argv.len() > 1 {
        argv[1..].to_vec()
    } else {
        session.patterns.clone()
    };

    if targets.is_empty() {
        return Reply::frames(vec![confirmation("punsubscribe", None, 0)]);
    }

    let mut frames = Vec::with_capacity(targets.len());
    for pattern in &targets {
        server.bus().punsubscribe(session.id, pattern);
        session.patterns.retain(|p| p != pattern);
        frames.push(confirmation(
            "punsubscribe",
            Some(pattern),
            session.subscription_count(),
        ));
    }
    Reply::frames(frames)
}

/// PUBLISH channel message -> number of subscribers reached
fn cmd_publish(server: &Server, _session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 3 {
        return Err(CommandError::wrong_args("PUBLISH"));
    }
    let delivered = server.bus().publish(&argv[1], &argv[2]);
    Reply::value(RespValue::integer(delivered as i64))
}

/// PUBSUB CHANNELS [pattern]
fn cmd_pubsub_channels(server: &Server, _session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if !(2..=3).contains(&argv.len()) {
        return Err(CommandError::wrong_args("PUBSUB"));
    }
    let filter = argv.get(2).map(|raw| GlobPattern::new(raw.clone()));
    let mut channels = server.bus().channels(filter.as_ref());
    channels.sort();
    Reply::value(RespValue::Array(
        channels.into_iter().map(RespValue::BulkString).collect(),
    ))
}

/// PUBSUB NUMPAT
fn cmd_pubsub_numpat(server: &Server, _session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 2 {
        return Err(CommandError::wrong_args("PUBSUB"));
    }
    Reply::value(RespValue::integer(server.bus().num_pat() as i64))
}

/// PUBSUB NUMSUB [channel ...] -> flat [channel, count, ...] array
fn cmd_pubsub_numsub(server: &Server, _session: &mut Session, argv: &[Bytes]) -> CommandResult {
    let channels: Vec<Bytes> = argv[2..].to_vec();
    let counts = server.bus().num_sub(&channels);
    let mut out = Vec::with_capacity(counts.len() * 2);
    for (channel, count) in counts {
        out.push(RespValue::BulkString(channel));
        out.push(RespValue::integer(count as i64));
    }
    Reply::value(RespValue::Array(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::dispatch::dispatch;
    use crate::pubsub::message_frame;
    use tokio::sync::mpsc;

    fn b(s: &str) -> Bytes {
        Bytes::from(s.to_string())
    }

    fn run(server: &Server, session: &mut Session, parts: &[&str]) -> Vec<u8> {
        let argv: Vec<Bytes> = parts.iter().map(|p| b(p)).collect();
        let mut buf = Vec::new();
        dispatch(server, session, &argv).serialize_into(&mut buf);
        buf
    }

    #[test]
    fn test_subscribe_publish_message_frame() {
        let server = Server::for_tests();
        let (tx_x, mut rx_x) = mpsc::channel(16);
        let mut x = Session::new(1, tx_x);
        let (tx_y, _rx_y) = mpsc::channel(16);
        let mut y = Session::new(2, tx_y);

        assert_eq!(
            run(&server, &mut x, &["SUBSCRIBE", "ch"]),
            b"*3\r\n$9\r\nsubscribe\r\n$2\r\nch\r\n:1\r\n"
        );
        assert_eq!(run(&server, &mut y, &["PUBLISH", "ch", "hi"]), b":1\r\n");

        let frame = rx_x.try_recv().unwrap();
        assert_eq!(
            frame,
            message_frame(b"ch", b"hi")
        );
        assert_eq!(&frame[..], b"*3\r\n$7\r\nmessage\r\n$2\r\nch\r\n$2\r\nhi\r\n");
    }

    #[test]
    fn test_fanout_delivers_exactly_once_per_connection() {
        let server = Server::for_tests();
        let mut sessions = Vec::new();
        let mut receivers = Vec::new();
        for id in 0..5 {
            let (tx, rx) = mpsc::channel(16);
            let mut session = Session::new(id, tx);
            run(&server, &mut session, &["SUBSCRIBE", "ch"]);
            sessions.push(session);
            receivers.push(rx);
        }

        let (tx, _rx) = mpsc::channel(4);
        let mut publisher = Session::new(99, tx);
        assert_eq!(run(&server, &mut publisher, &["PUBLISH", "ch", "m"]), b":5\r\n");

        for rx in &mut receivers {
            assert!(rx.try_recv().is_ok());
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn test_subscription_counts_across_kinds() {
        let server = Server::for_tests();
        let (tx, _rx) = mpsc::channel(16);
        let mut session = Session::new(1, tx);

        run(&server, &mut session, &["SUBSCRIBE", "a", "b"]);
        // Third subscription overall: the pattern confirms with count 3.
        assert_eq!(
            run(&server, &mut session, &["PSUBSCRIBE", "news.*"]),
            b"*3\r\n$10\r\npsubscribe\r\n$6\r\nnews.*\r\n:3\r\n"
        );

        // Repeat subscription is idempotent: same index, nothing added.
        assert_eq!(
            run(&server, &mut session, &["SUBSCRIBE", "a"]),
            b"*3\r\n$9\r\nsubscribe\r\n$1\r\na\r\n:1\r\n"
        );
        assert_eq!(session.subscription_count(), 3);
    }

    #[test]
    fn test_unsubscribe_all_and_remaining_counts() {
        let server = Server::for_tests();
        let (tx, _rx) = mpsc::channel(16);
        let mut session = Session::new(1, tx);
        run(&server, &mut session, &["SUBSCRIBE", "a", "b"]);

        let reply = run(&server, &mut session, &["UNSUBSCRIBE"]);
        assert_eq!(
            reply,
            b"*3\r\n$11\r\nunsubscribe\r\n$1\r\na\r\n:1\r\n*3\r\n$11\r\nunsubscribe\r\n$1\r\nb\r\n:0\r\n"
        );
        assert!(session.channels.is_empty());

        // Nothing left: one frame with a null channel.
        assert_eq!(
            run(&server, &mut session, &["UNSUBSCRIBE"]),
            b"*3\r\n$11\r\nunsubscribe\r\n$-1\r\n:0\r\n"
        );
    }

    #[test]
    fn test_pattern_subscription_receives_pmessage() {
        let server = Server::for_tests();
        let (tx, mut rx) = mpsc::channel(16);
        let mut session = Session::new(1, tx);
        run(&server, &mut session, &["PSUBSCRIBE", "news.*"]);

        let (ptx, _prx) = mpsc::channel(4);
        let mut publisher = Session::new(2, ptx);
        assert_eq!(
            run(&server, &mut publisher, &["PUBLISH", "news.sports", "goal"]),
            b":1\r\n"
        );
        assert_eq!(
            &rx.try_recv().unwrap()[..],
            b"*4\r\n$8\r\npmessage\r\n$6\r\nnews.*\r\n$11\r\nnews.sports\r\n$4\r\ngoal\r\n"
        );
        assert_eq!(
            run(&server, &mut publisher, &["PUBLISH", "weather", "x"]),
            b":0\r\n"
        );
    }

    #[test]
    fn test_pubsub_introspection() {
        let server = Server::for_tests();
        let (tx, _rx) = mpsc::channel(16);
        let mut session = Session::new(1, tx);
        run(&server, &mut session, &["SUBSCRIBE", "alpha", "beta"]);
        run(&server, &mut session, &["PSUBSCRIBE", "a.*", "b.*"]);

        assert_eq!(
            run(&server, &mut session, &["PUBSUB", "CHANNELS"]),
            b"*2\r\n$5\r\nalpha\r\n$4\r\nbeta\r\n"
        );
        assert_eq!(
            run(&server, &mut session, &["PUBSUB", "CHANNELS", "a*"]),
            b"*1\r\n$5\r\nalpha\r\n"
        );
        assert_eq!(run(&server, &mut session, &["PUBSUB", "NUMPAT"]), b":2\r\n");
        assert_eq!(
            run(&server, &mut session, &["PUBSUB", "NUMSUB", "alpha", "nope"]),
            b"*4\r\n$5\r\nalpha\r\n:1\r\n$4\r\nnope\r\n:0\r\n"
        );
    }
}
