//! Server Admin Command Family
//!
//! Connection liveness (PING/ECHO/QUIT), the INFO text surface, registry
//! enumeration (COMMAND LIST with its filters), configuration reads, and
//! the persistence / module-host collaborator commands.

use crate::commands::registry::{self, CommandSpec};
use crate::commands::{upper, CommandError, CommandResult, Reply, Session};
use crate::glob::GlobPattern;
use crate::protocol::RespValue;
use crate::server::Server;
use bytes::Bytes;

pub fn register(out: &mut Vec<CommandSpec>) {
    let flat = [
        ("PING", &["fast", "connection"][..], registry::no_keys as registry::KeysFn, cmd_ping as registry::HandlerFn),
        ("ECHO", &["fast", "connection"], registry::no_keys, cmd_echo),
        ("QUIT", &["fast", "connection"], registry::no_keys, cmd_quit),
        ("INFO", &["slow", "dangerous"], registry::no_keys, cmd_info),
        ("TIME", &["fast"], registry::no_keys, cmd_time),
        ("SAVE", &["slow", "dangerous"], registry::no_keys, cmd_save),
        ("BGREWRITEAOF", &["slow", "dangerous"], registry::no_keys, cmd_bgrewriteaof),
        ("LASTSAVE", &["fast", "dangerous"], registry::no_keys, cmd_lastsave),
    ];
    out.extend(flat.map(|(name, categories, keys, handler)| CommandSpec {
        name,
        sub: None,
        categories,
        module: "admin",
        keys,
        handler,
    }));

    out.push(CommandSpec {
        name: "COMMAND",
        sub: Some("LIST"),
        categories: &["slow"],
        module: "admin",
        keys: registry::no_keys,
        handler: cmd_command_list,
    });
    out.push(CommandSpec {
        name: "CONFIG",
        sub: Some("GET"),
        categories: &["slow", "dangerous"],
        module: "admin",
        keys: registry::no_keys,
        handler: cmd_config_get,
    });
    out.push(CommandSpec {
        name: "MODULE",
        sub: Some("LIST"),
        categories: &["slow", "dangerous"],
        module: "admin",
        keys: registry::no_keys,
        handler: cmd_module_list,
    });
    out.push(CommandSpec {
        name: "MODULE",
        sub: Some("UNLOAD"),
        categories: &["slow", "dangerous"],
        module: "admin",
        keys: registry::no_keys,
        handler: cmd_module_unload,
    });
}

/// PING [message]
fn cmd_ping(_server: &Server, _session: &mut Session, argv: &[Bytes]) -> CommandResult {
    match argv.len() {
        1 => Reply::value(RespValue::pong()),
        2 => Reply::value(RespValue::BulkString(argv[1].clone())),
        _ => Err(CommandError::wrong_args("PING")),
    }
}

/// ECHO message
fn cmd_echo(_server: &Server, _session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 2 {
        return Err(CommandError::wrong_args("ECHO"));
    }
    Reply::value(RespValue::BulkString(argv[1].clone()))
}

/// QUIT — reply OK, then the connection loop closes the socket.
fn cmd_quit(_server: &Server, session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 1 {
        return Err(CommandError::wrong_args("QUIT"));
    }
    session.should_quit = true;
    Reply::value(RespValue::ok())
}

/// INFO [section]
fn cmd_info(server: &Server, _session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() > 2 {
        return Err(CommandError::wrong_args("INFO"));
    }
    let section = argv.get(1).map(upper);
    let wanted = |name: &str| {
        section
            .as_deref()
            .map(|s| s.eq_ignore_ascii_case(name))
            .unwrap_or(true)
    };

    let mut text = String::new();
    if wanted("SERVER") {
        text.push_str("# Server\r\n");
        text.push_str(&format!("version:{}\r\n", crate::VERSION));
        text.push_str(&format!("uptime_in_seconds:{}\r\n", server.uptime_secs()));
        text.push_str("\r\n");
    }
    if wanted("CLIENTS") {
        text.push_str("# Clients\r\n");
        text.push_str(&format!(
            "connected_clients:{}\r\n",
            server.stats().active_connections()
        ));
        text.push_str("\r\n");
    }
    if wanted("MEMORY") {
        text.push_str("# Memory\r\n");
        text.push_str(&format!("used_memory:{}\r\n", server.keyspace().used_memory()));
        text.push_str(&format!("maxmemory:{}\r\n", server.eviction_config().max_memory));
        text.push_str(&format!(
            "maxmemory_policy:{}\r\n",
            server.eviction_config().policy
        ));
        text.push_str("\r\n");
    }
    if wanted("STATS") {
        let (expired, evicted) = server.keyspace().removal_counts();
        text.push_str("# Stats\r\n");
        text.push_str(&format!(
            "total_connections_received:{}\r\n",
            server.stats().connections_accepted()
        ));
        text.push_str(&format!(
            "total_commands_processed:{}\r\n",
            server.stats().commands_processed()
        ));
        text.push_str(&format!("expired_keys:{}\r\n", expired));
        text.push_str(&format!("evicted_keys:{}\r\n", evicted));
        text.push_str("\r\n");
    }
    if wanted("KEYSPACE") {
        text.push_str("# Keyspace\r\n");
        for db in 0..server.keyspace().database_count() {
            let keys = server.keyspace().dbsize(db);
            if keys > 0 {
                text.push_str(&format!("db{}:keys={}\r\n", db, keys));
            }
        }
    }
    Reply::value(RespValue::bulk_string(text))
}

/// TIME -> [unix-seconds, microseconds]
fn cmd_time(server: &Server, _session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 1 {
        return Err(CommandError::wrong_args("TIME"));
    }
    let ms = server.keyspace().clock().wall_ms();
    Reply::value(RespValue::Array(vec![
        RespValue::bulk_string((ms / 1000).to_string()),
        RespValue::bulk_string(((ms % 1000) * 1000).to_string()),
    ]))
}

/// COMMAND LIST [FILTERBY ACLCAT cat | PATTERN glob | MODULE mod]
///
/// Enumerates the registry plus module-host registrations. Sub-commands
/// list as `name|sub`.
fn cmd_command_list(server: &Server, _session: &mut Session, argv: &[Bytes]) -> CommandResult {
    enum Filter {
        All,
        Category(String),
        Pattern(GlobPattern),
        Module(String),
    }

    let filter = match argv.get(2) {
        None => Filter::All,
        Some(raw) if upper(raw) == "FILTERBY" => {
            let kind = argv.get(3).ok_or_else(CommandError::syntax)?;
            let value = argv.get(4).ok_or_else(CommandError::syntax)?;
            match upper(kind).as_str() {
                "ACLCAT" => Filter::Category(String::from_utf8_lossy(value).to_lowercase()),
                "PATTERN" => Filter::Pattern(GlobPattern::new(value.clone())),
                "MODULE" => Filter::Module(String::from_utf8_lossy(value).to_lowercase()),
                _ => return Err(CommandError::syntax()),
            }
        }
        Some(_) => return Err(CommandError::syntax()),
    };

    let mut names: Vec<String> = Vec::new();
    let mut push = |name: String, categories: &[&str], module: &str| {
        let keep = match &filter {
            Filter::All => true,
            Filter::Category(cat) => categories.iter().any(|c| c.eq_ignore_ascii_case(cat)),
            Filter::Pattern(pattern) => pattern.matches(name.as_bytes()),
            Filter::Module(m) => module.eq_ignore_ascii_case(m),
        };
        if keep {
            names.push(name);
        }
    };

    for spec in server.registry().all() {
        let name = match spec.sub {
            Some(sub) => format!("{}|{}", spec.name.to_lowercase(), sub.to_lowercase()),
            None => spec.name.to_lowercase(),
        };
        push(name, spec.categories, spec.module);
    }
    for spec in server.modules().all() {
        let categories: Vec<&str> = spec.categories.iter().map(String::as_str).collect();
        push(spec.name.to_lowercase(), &categories, &spec.module);
    }

    names.sort();
    Reply::value(RespValue::Array(
        names
            .into_iter()
            .map(|n| RespValue::bulk_string(n))
            .collect(),
    ))
}

/// CONFIG GET parameter
fn cmd_config_get(server: &Server, _session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 3 {
        return Err(CommandError::wrong_args("CONFIG"));
    }
    let parameter = String::from_utf8_lossy(&argv[2]).to_lowercase();
    let value = match parameter.as_str() {
        "maxmemory" => Some(server.eviction_config().max_memory.to_string()),
        "maxmemory-policy" => Some(server.eviction_config().policy.to_string()),
        "eviction-interval" => Some(server.eviction_config().interval.as_millis().to_string()),
        "databases" => Some(server.keyspace().database_count().to_string()),
        _ => None,
    };
    match value {
        Some(value) => Reply::value(RespValue::Array(vec![
            RespValue::bulk_string(parameter),
            RespValue::bulk_string(value),
        ])),
        None => Reply::value(RespValue::Array(Vec::new())),
    }
}

/// SAVE — synchronous snapshot through the persistence collaborator.
fn cmd_save(server: &Server, _session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 1 {
        return Err(CommandError::wrong_args("SAVE"));
    }
    server
        .persistence()
        .take_snapshot()
        .map_err(|e| CommandError::Transient(e.to_string()))?;
    Reply::value(RespValue::ok())
}

/// BGREWRITEAOF — append-log compaction through the collaborator.
fn cmd_bgrewriteaof(server: &Server, _session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 1 {
        return Err(CommandError::wrong_args("BGREWRITEAOF"));
    }
    server
        .persistence()
        .rewrite_aof()
        .map_err(|e| CommandError::Transient(e.to_string()))?;
    Reply::value(RespValue::simple_string(
        "Background append only file rewriting started",
    ))
}

/// LASTSAVE -> millisecond epoch of the latest snapshot, 0 when none
fn cmd_lastsave(server: &Server, _session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 1 {
        return Err(CommandError::wrong_args("LASTSAVE"));
    }
    Reply::value(RespValue::integer(
        server.persistence().latest_snapshot_ms() as i64,
    ))
}

/// MODULE LIST
fn cmd_module_list(server: &Server, _session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 2 {
        return Err(CommandError::wrong_args("MODULE"));
    }
    let mut paths = server.modules().paths();
    paths.sort();
    Reply::value(RespValue::Array(
        paths.into_iter().map(RespValue::bulk_string).collect(),
    ))
}

/// MODULE UNLOAD name
fn cmd_module_unload(server: &Server, _session: &mut Session, argv: &[Bytes]) -> CommandResult {
    if argv.len() != 3 {
        return Err(CommandError::wrong_args("MODULE"));
    }
    let name = String::from_utf8_lossy(&argv[2]).into_owned();
    if server.modules().unload(&name) {
        Reply::value(RespValue::ok())
    } else {
        Err(CommandError::NotFound(format!(
            "no such module '{}'",
            name
        )))
    }
}
