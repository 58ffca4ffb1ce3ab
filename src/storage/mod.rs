//! Storage Layer
//!
//! Everything that lives behind a key: the tagged value variants, the two
//! stateful containers with internal structure (sorted set, hash with
//! per-field expiry), the multi-database keyspace that owns every entry,
//! and the eviction machinery that keeps memory bounded.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Keyspace                             │
//! │  ┌──────────┐ ┌──────────┐ ┌──────────┐      ┌──────────┐   │
//! │  │   DB 0   │ │   DB 1   │ │   DB 2   │ ...  │  DB 15   │   │
//! │  │  RwLock  │ │  RwLock  │ │  RwLock  │      │  RwLock  │   │
//! │  │ key→entry│ │ key→entry│ │ key→entry│      │ key→entry│   │
//! │  └──────────┘ └──────────┘ └──────────┘      └──────────┘   │
//! └──────────────────────────────────────────────────────────────┘
//!                             ▲
//!                             │
//!              ┌──────────────┴──────────────┐
//!              │       EvictionSweeper       │
//!              │   (background tokio task)   │
//!              └─────────────────────────────┘
//! ```
//!
//! Each entry is `{value, expires_at, access-meta}`; expiry is enforced
//! lazily on contact and actively by the sweeper.

pub mod eviction;
pub mod hash;
pub mod keyspace;
pub mod sorted_set;
pub mod value;

pub use eviction::{enforce_capacity, EvictionConfig, EvictionPolicy, EvictionSweeper};
pub use hash::{ExpiryCondition, HashValue};
pub use keyspace::{AccessMeta, DbView, KeyEntry, Keyspace, SetExpiry, DATABASE_COUNT};
pub use sorted_set::{AddFlags, Aggregate, LexBound, Limit, SortedSet};
pub use value::Value;
