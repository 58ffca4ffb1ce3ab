//! Command Dispatcher
//!
//! Maps one parsed argv onto a reply: descriptor lookup (registry first,
//! then module-host registrations), key extraction, ACL authorization, the
//! on-write capacity check, and finally the handler call. Errors at any
//! stage become a single `-ERR ...` line and never mutate the keyspace.

use crate::commands::{CommandError, Reply};
use crate::pubsub::{ConnId, PushFrame};
use crate::server::Server;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Per-connection command state: the selected database, the connection's
/// subscription index lists (the reverse side of the bus's forward maps),
/// and the writer handle pub/sub deliveries go through.
#[derive(Debug)]
pub struct Session {
    pub id: ConnId,
    /// Currently selected database index.
    pub db: usize,
    /// Exact-channel subscriptions, in subscription order.
    pub channels: Vec<Bytes>,
    /// Pattern subscriptions, in subscription order.
    pub patterns: Vec<Bytes>,
    /// Bounded writer handle the bus delivers push frames through.
    pub push_tx: mpsc::Sender<PushFrame>,
    /// Set by QUIT; the connection loop closes after replying.
    pub should_quit: bool,
}

impl Session {
    pub fn new(id: ConnId, push_tx: mpsc::Sender<PushFrame>) -> Self {
        Self {
            id,
            db: 0,
            channels: Vec::new(),
            patterns: Vec::new(),
            push_tx,
            should_quit: false,
        }
    }

    /// Total subscription count (channels + patterns), the number reported
    /// in subscribe/unsubscribe confirmations.
    pub fn subscription_count(&self) -> usize {
        self.channels.len() + self.patterns.len()
    }
}

/// Executes one command and always produces a reply.
pub fn dispatch(server: &Server, session: &mut Session, argv: &[Bytes]) -> Reply {
    match execute(server, session, argv) {
        Ok(reply) => reply,
        Err(e) => {
            trace!(error = %e, "command error");
            Reply::One(e.to_resp())
        }
    }
}

fn execute(server: &Server, session: &mut Session, argv: &[Bytes]) -> Result<Reply, CommandError> {
    if argv.is_empty() {
        return Err(CommandError::Parse("empty command".to_string()));
    }

    let name = String::from_utf8_lossy(&argv[0]).to_ascii_uppercase();

    // Built-in registry first, then module-host registrations.
    let (keys_fn, handler, grows_memory) = match server.registry().lookup(argv) {
        Ok(spec) => (spec.keys, spec.handler, spec.categories.contains(&"denyoom")),
        Err(unknown @ CommandError::Unknown(_)) => match server.modules().lookup(&name) {
            Some(spec) => (spec.keys, spec.handler, spec.grows_memory),
            None => return Err(unknown),
        },
        Err(e) => return Err(e),
    };

    let keys = keys_fn(argv)?;

    if !server
        .acl()
        .authorize(session.id, &name, &keys.read, &keys.write, &keys.channels)
    {
        debug!(conn = session.id, command = %name, "acl denied");
        return Err(CommandError::Auth(name.to_lowercase()));
    }

    // On-write eviction check: evict per policy, or reject a
    // memory-growing write under noeviction, before the handler touches
    // anything. Writes that free memory (DEL, expiry updates) stay allowed.
    if !keys.write.is_empty() && grows_memory {
        server.check_write_capacity()?;
    }

    let result = handler(server, session, argv);
    server.stats().note_command();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::Server;
    use std::sync::Arc;

    fn b(s: &str) -> Bytes {
        Bytes::from(s.to_string())
    }

    fn session() -> Session {
        let (tx, _rx) = mpsc::channel(4);
        Session::new(1, tx)
    }

    fn reply_bytes(reply: &Reply) -> Vec<u8> {
        let mut buf = Vec::new();
        reply.serialize_into(&mut buf);
        buf
    }

    #[test]
    fn test_dispatch_round_trip() {
        let server = Server::for_tests();
        let mut session = session();

        let reply = dispatch(&server, &mut session, &[b("SET"), b("foo"), b("bar")]);
        assert_eq!(reply_bytes(&reply), b"+OK\r\n");

        let reply = dispatch(&server, &mut session, &[b("GET"), b("foo")]);
        assert_eq!(reply_bytes(&reply), b"$3\r\nbar\r\n");
    }

    #[test]
    fn test_unknown_command_reply() {
        let server = Server::for_tests();
        let mut session = session();
        let reply = dispatch(&server, &mut session, &[b("FROBNICATE")]);
        assert_eq!(reply_bytes(&reply), b"-ERR unknown command 'frobnicate'\r\n");
    }

    #[test]
    fn test_validation_error_does_not_mutate() {
        let server = Server::for_tests();
        let mut session = session();

        let reply = dispatch(&server, &mut session, &[b("SET"), b("k")]);
        assert!(reply_bytes(&reply).starts_with(b"-ERR"));

        let reply = dispatch(&server, &mut session, &[b("EXISTS"), b("k")]);
        assert_eq!(reply_bytes(&reply), b":0\r\n");
    }

    #[test]
    fn test_deny_all_acl_blocks_commands() {
        let server = Server::for_tests_with_acl(Arc::new(crate::acl::DenyAll));
        let mut session = session();
        let reply = dispatch(&server, &mut session, &[b("SET"), b("k"), b("v")]);
        assert!(reply_bytes(&reply).starts_with(b"-ERR permission denied"));
    }

    #[test]
    fn test_pipelined_incr_sequence() {
        let server = Server::for_tests();
        let mut session = session();
        for expected in 1..=5 {
            let reply = dispatch(&server, &mut session, &[b("INCR"), b("n")]);
            assert_eq!(reply_bytes(&reply), format!(":{}\r\n", expected).into_bytes());
        }
    }
}
