//! The Server Engine
//!
//! One `Server` value owns every piece of global state: the keyspace, the
//! command registry, the pub/sub bus, the clock, the module host, and the
//! ACL / persistence collaborators. It is created once at startup and
//! shared behind an `Arc`; there are no process-wide singletons.
//!
//! `serve` runs the accept loop: one tokio task per accepted connection,
//! a background eviction sweeper, and a watch-channel shutdown that closes
//! the listener, cancels every connection, waits for the workers to drain,
//! and lets the sweeper exit.

use crate::acl::{Acl, AllowAll};
use crate::clock::Clock;
use crate::commands::{CommandError, CommandRegistry};
use crate::connection::handle_connection;
use crate::modules::ModuleHost;
use crate::persistence::{Disabled, Persistence};
use crate::pubsub::{ConnId, PubSubBus};
use crate::storage::{enforce_capacity, EvictionConfig, EvictionSweeper, Keyspace};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};

/// Startup configuration, filled in from the CLI flags.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
    /// Directory for snapshots and logs; empty disables persistence.
    pub data_dir: String,
    pub eviction: EvictionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            port: 6379,
            data_dir: String::new(),
            eviction: EvictionConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

/// Connection and command counters surfaced by INFO.
#[derive(Debug, Default)]
pub struct ServerStats {
    connections_accepted: AtomicU64,
    active_connections: AtomicU64,
    commands_processed: AtomicU64,
}

impl ServerStats {
    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn note_command(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connections_accepted(&self) -> u64 {
        self.connections_accepted.load(Ordering::Relaxed)
    }

    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn commands_processed(&self) -> u64 {
        self.commands_processed.load(Ordering::Relaxed)
    }
}

/// The engine: all shared state behind one value.
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    clock: Arc<Clock>,
    keyspace: Arc<Keyspace>,
    registry: CommandRegistry,
    bus: Arc<PubSubBus>,
    modules: ModuleHost,
    acl: Arc<dyn Acl>,
    persistence: Arc<dyn Persistence>,
    stats: ServerStats,
    started: Instant,
    next_conn_id: AtomicU64,
}

impl Server {
    /// Builds a server with the default collaborators (allow-all ACL,
    /// disabled persistence).
    pub fn new(config: ServerConfig) -> Self {
        Self::with_collaborators(config, Arc::new(AllowAll), Arc::new(Disabled))
    }

    /// Builds a server with explicit ACL and persistence collaborators.
    pub fn with_collaborators(
        config: ServerConfig,
        acl: Arc<dyn Acl>,
        persistence: Arc<dyn Persistence>,
    ) -> Self {
        let clock = Arc::new(Clock::new());
        Self {
            keyspace: Arc::new(Keyspace::new(Arc::clone(&clock))),
            registry: CommandRegistry::standard(),
            bus: Arc::new(PubSubBus::new()),
            modules: ModuleHost::new(),
            acl,
            persistence,
            stats: ServerStats::default(),
            started: Instant::now(),
            next_conn_id: AtomicU64::new(1),
            clock,
            config,
        }
    }

    pub fn keyspace(&self) -> &Keyspace {
        &self.keyspace
    }

    pub fn keyspace_handle(&self) -> Arc<Keyspace> {
        Arc::clone(&self.keyspace)
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn bus(&self) -> &PubSubBus {
        &self.bus
    }

    pub fn modules(&self) -> &ModuleHost {
        &self.modules
    }

    pub fn acl(&self) -> &dyn Acl {
        self.acl.as_ref()
    }

    pub fn persistence(&self) -> &dyn Persistence {
        self.persistence.as_ref()
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn eviction_config(&self) -> &EvictionConfig {
        &self.config.eviction
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    pub fn next_conn_id(&self) -> ConnId {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    /// On-write capacity check: evicts per policy when a cap is configured,
    /// or rejects the write under noeviction.
    pub fn check_write_capacity(&self) -> Result<(), CommandError> {
        enforce_capacity(&self.keyspace, &self.config.eviction)
            .map(|_| ())
            .map_err(|_| CommandError::OutOfMemory)
    }

    /// Runs the accept loop until the shutdown signal fires, then drains
    /// every connection worker.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, shutdown: watch::Sender<bool>) {
        let sweeper = EvictionSweeper::start(
            Arc::clone(&self.keyspace),
            self.config.eviction.clone(),
        );

        let mut shutdown_rx = shutdown.subscribe();
        let mut workers = JoinSet::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let server = Arc::clone(&self);
                        let conn_shutdown = shutdown.subscribe();
                        workers.spawn(handle_connection(server, stream, addr, conn_shutdown));
                    }
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                    }
                },
                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        // Listener closes here; workers observe the same shutdown signal,
        // flush their writers, and unwind.
        drop(listener);
        info!("listener closed, draining {} connection workers", workers.len());
        while workers.join_next().await.is_some() {}
        sweeper.stop();
        info!("server shutdown complete");
    }

    /// Minimal server for in-process tests: default collaborators, no
    /// listener, no sweeper.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self::new(ServerConfig::default())
    }

    #[cfg(test)]
    pub fn for_tests_with_acl(acl: Arc<dyn Acl>) -> Self {
        Self::with_collaborators(ServerConfig::default(), acl, Arc::new(Disabled))
    }

    #[cfg(test)]
    pub fn for_tests_with_eviction(eviction: EvictionConfig) -> Self {
        Self::new(ServerConfig {
            eviction,
            ..ServerConfig::default()
        })
    }
}
