//! # EmberKV - An In-Memory, Multi-Database, RESP-Speaking Key-Value Server
//!
//! EmberKV accepts pipelined client connections over TCP, speaks the Redis
//! Serialization Protocol, and maintains sixteen isolated databases of
//! typed values (string-scalar, list, set, sorted set, hash) with key
//! expiration, per-field hash expiration, memory-pressure eviction, a
//! pub/sub bus, and a runtime command registry that external modules can
//! extend.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                               Server                                 │
//! │                                                                      │
//! │  ┌─────────────┐   ┌──────────────┐   ┌────────────┐                 │
//! │  │ TCP Listener│──>│ Connection   │──>│ Dispatcher │                 │
//! │  │             │   │ task (1/conn)│   │ + Registry │                 │
//! │  └─────────────┘   └──────┬───────┘   └─────┬──────┘                 │
//! │                           │                 │                        │
//! │                     ┌─────▼─────┐     ┌─────▼──────────────────────┐ │
//! │                     │ RESP      │     │         Keyspace           │ │
//! │                     │ parser    │     │  DB0 .. DB15, one RwLock   │ │
//! │                     └───────────┘     │  per database              │ │
//! │                                       └─────▲──────────────────────┘ │
//! │  ┌─────────────┐                            │                        │
//! │  │ Pub/Sub bus │<── SUBSCRIBE/PUBLISH  ┌────┴────────────┐           │
//! │  └─────────────┘                       │ EvictionSweeper │           │
//! │                                        │ (tokio task)    │           │
//! │                                        └─────────────────┘           │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Data flow: bytes → RESP parser → argv → dispatcher → handler →
//! keyspace/value container → RESP reply bytes. Published messages
//! traverse the bus to each matching subscriber's bounded writer.
//!
//! ## Design Highlights
//!
//! ### Lazy + active expiry
//!
//! Keys (and hash fields) with a deadline are enforced two ways: every
//! accessor checks expiry on contact and purges what it finds stale, and
//! a background sweeper removes what lazy purging never touches.
//!
//! ### Typed values behind one tag
//!
//! Every key maps to one tagged `Value` variant. Raw bytes are adapted
//! once at the protocol boundary (int first, float second, string
//! fallback); TYPE and all mismatch errors are answered from the tag.
//!
//! ### Eviction policies
//!
//! With a memory cap configured, victims are selected per policy
//! (lru/lfu/random/ttl over all keys or only expiring ones), both from the
//! sweeper and from an on-write check. Under `noeviction` growth writes
//! fail instead.
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP parser and reply serialization
//! - [`storage`]: value variants, containers, keyspace, eviction
//! - [`commands`]: registry, dispatcher, and the command families
//! - [`pubsub`]: subscription state and publish fan-out
//! - [`connection`]: per-client task, buffers, session state
//! - [`server`]: the engine value owning all shared state
//! - [`acl`], [`persistence`], [`modules`]: collaborator seams

pub mod acl;
pub mod clock;
pub mod commands;
pub mod connection;
pub mod glob;
pub mod modules;
pub mod persistence;
pub mod protocol;
pub mod pubsub;
pub mod server;
pub mod storage;

pub use acl::{Acl, AllowAll};
pub use clock::Clock;
pub use commands::{CommandError, CommandRegistry, Session};
pub use connection::{handle_connection, ConnectionError};
pub use glob::GlobPattern;
pub use modules::{ModuleCommandSpec, ModuleHost};
pub use persistence::{Persistence, PersistenceError};
pub use protocol::{ParseError, RespParser, RespValue};
pub use pubsub::PubSubBus;
pub use server::{Server, ServerConfig};
pub use storage::{EvictionConfig, EvictionPolicy, Keyspace, Value};

/// The default port EmberKV listens on (same as Redis).
pub const DEFAULT_PORT: u16 = 6379;

/// The default address EmberKV binds to.
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1";

/// Version of EmberKV.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
