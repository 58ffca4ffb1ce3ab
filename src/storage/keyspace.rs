//! Multi-Database Keyspace
//!
//! The keyspace owns every `KeyEntry` in the server. It is a fixed array of
//! databases, each an isolated `key -> entry` map behind its own
//! reader/writer lock; an operation always names the database it acts on
//! and keys in one database are invisible to every other.
//!
//! ## Expiry discipline
//!
//! Expiration is lazy *and* active. Every accessor checks `expires_at`
//! against the shared clock before admitting an entry, purges stale
//! entries on contact, and the background sweeper (`storage::eviction`)
//! removes whatever lazy purging never touches. A write that lands on an
//! expired key purges it first, so the write behaves like a fresh create.
//!
//! ## Concurrency
//!
//! One `RwLock` per database. Handlers receive entry references only for
//! the duration of a closure call and do pure compute under the guard, so
//! every lock release is scope-guaranteed. Access metadata lives in
//! atomics inside the entry, which lets the read path update LRU/LFU
//! bookkeeping without taking the write lock.

use crate::clock::Clock;
use crate::glob::GlobPattern;
use crate::storage::value::Value;
use bytes::Bytes;
use rand::seq::IteratorRandom;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::debug;

/// Number of databases the server creates (SELECT 0..15).
pub const DATABASE_COUNT: usize = 16;

/// Fixed bookkeeping charged per key entry on top of key and value bytes.
const ENTRY_OVERHEAD: usize = 64;

/// LRU stamp and LFU counter for one entry.
///
/// Atomics so the read path can record accesses under the read lock. The
/// frequency counter only ever increments; it is not decayed.
#[derive(Debug, Default)]
pub struct AccessMeta {
    last_access_ms: AtomicU64,
    frequency: AtomicU64,
}

impl AccessMeta {
    pub fn touch(&self, stamp_ms: u64) {
        self.last_access_ms.store(stamp_ms, Ordering::Relaxed);
        self.frequency.fetch_add(1, Ordering::Relaxed);
    }

    pub fn last_access_ms(&self) -> u64 {
        self.last_access_ms.load(Ordering::Relaxed)
    }

    pub fn frequency(&self) -> u64 {
        self.frequency.load(Ordering::Relaxed)
    }
}

/// One keyed record: the value, its optional expiry, and access metadata.
#[derive(Debug)]
pub struct KeyEntry {
    pub value: Value,
    pub expires_at: Option<Instant>,
    pub meta: AccessMeta,
}

impl KeyEntry {
    pub fn new(value: Value, stamp_ms: u64) -> Self {
        let meta = AccessMeta::default();
        meta.touch(stamp_ms);
        Self {
            value,
            expires_at: None,
            meta,
        }
    }

    #[inline]
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }

    /// Estimated retained bytes for this entry excluding the key itself.
    pub fn size_of(&self) -> usize {
        self.value.size_of() + ENTRY_OVERHEAD
    }
}

/// Expiry treatment for a value write.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SetExpiry {
    /// Preserve whatever expiry the key already carries (the default).
    Keep,
    /// Make the key persistent.
    Persist,
    /// Set this deadline.
    At(Instant),
}

/// One isolated key -> entry namespace.
#[derive(Debug, Default)]
struct Database {
    entries: RwLock<HashMap<Bytes, KeyEntry>>,
}

/// The keyspace: every database plus the clock and expiry/eviction counters.
#[derive(Debug)]
pub struct Keyspace {
    databases: Vec<Database>,
    clock: Arc<Clock>,
    expired_keys: AtomicU64,
    evicted_keys: AtomicU64,
}

impl Keyspace {
    pub fn new(clock: Arc<Clock>) -> Self {
        Self {
            databases: (0..DATABASE_COUNT).map(|_| Database::default()).collect(),
            clock,
            expired_keys: AtomicU64::new(0),
            evicted_keys: AtomicU64::new(0),
        }
    }

    pub fn database_count(&self) -> usize {
        self.databases.len()
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    fn stamp(&self) -> u64 {
        self.clock.elapsed_ms()
    }

    fn note_expired(&self, n: u64) {
        if n > 0 {
            self.expired_keys.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn note_evicted(&self, n: u64) {
        if n > 0 {
            self.evicted_keys.fetch_add(n, Ordering::Relaxed);
        }
    }

    /// (expired, evicted) lifetime counters for INFO.
    pub fn removal_counts(&self) -> (u64, u64) {
        (
            self.expired_keys.load(Ordering::Relaxed),
            self.evicted_keys.load(Ordering::Relaxed),
        )
    }

    // ========================================================================
    // Public contract: whole-key operations
    // ========================================================================

    /// Existence per key; stale keys report false and are purged.
    pub fn keys_exist(&self, db: usize, keys: &[Bytes]) -> HashMap<Bytes, bool> {
        keys.iter()
            .map(|key| {
                let live = self.read_entry(db, key, |_| ()).is_some();
                (key.clone(), live)
            })
            .collect()
    }

    /// Value clones per key; absent keys map to `None`. Counts as an access.
    pub fn get_values(&self, db: usize, keys: &[Bytes]) -> HashMap<Bytes, Option<Value>> {
        keys.iter()
            .map(|key| {
                let value = self.read_entry(db, key, |entry| entry.value.clone());
                (key.clone(), value)
            })
            .collect()
    }

    /// Writes one value, honoring the requested expiry treatment. A write
    /// onto an expired key behaves like a fresh create.
    pub fn set_value(&self, db: usize, key: Bytes, value: Value, expiry: SetExpiry) {
        let Some(database) = self.databases.get(db) else {
            return;
        };
        let now = self.now();
        let stamp = self.stamp();
        let mut entries = database.entries.write().unwrap();

        if entries.get(&key).map(|e| e.is_expired(now)).unwrap_or(false) {
            entries.remove(&key);
            self.note_expired(1);
        }

        match entries.get_mut(&key) {
            Some(entry) => {
                entry.value = value;
                entry.meta.touch(stamp);
                match expiry {
                    SetExpiry::Keep => {}
                    SetExpiry::Persist => entry.expires_at = None,
                    SetExpiry::At(at) => entry.expires_at = Some(at),
                }
            }
            None => {
                let mut entry = KeyEntry::new(value, stamp);
                if let SetExpiry::At(at) = expiry {
                    entry.expires_at = Some(at);
                }
                entries.insert(key, entry);
            }
        }
    }

    /// Batch write preserving prior expirations.
    pub fn set_values(&self, db: usize, pairs: Vec<(Bytes, Value)>) {
        for (key, value) in pairs {
            self.set_value(db, key, value, SetExpiry::Keep);
        }
    }

    /// Sets or clears a key's expiry. `at = None` makes the key persistent;
    /// `keep_if_earlier` only overwrites when the new deadline is earlier
    /// than the current one. Returns false when the key does not exist.
    pub fn set_expiry(
        &self,
        db: usize,
        key: &[u8],
        at: Option<Instant>,
        keep_if_earlier: bool,
    ) -> bool {
        self.write_entry(db, key, |entry| {
            match (at, entry.expires_at) {
                (None, _) => entry.expires_at = None,
                (Some(new), Some(current)) if keep_if_earlier && new >= current => {}
                (Some(new), _) => entry.expires_at = Some(new),
            }
        })
        .is_some()
    }

    /// The key's expiry slot: `None` = no key, `Some(None)` = persistent.
    pub fn get_expiry(&self, db: usize, key: &[u8]) -> Option<Option<Instant>> {
        self.read_entry(db, key, |entry| entry.expires_at)
    }

    pub fn delete(&self, db: usize, key: &[u8]) -> bool {
        let Some(database) = self.databases.get(db) else {
            return false;
        };
        let mut entries = database.entries.write().unwrap();
        entries.remove(key).is_some()
    }

    /// Deletes a key, counting only live keys as deleted; removing an
    /// already-expired entry is a purge, not a delete.
    pub fn delete_live(&self, db: usize, key: &[u8]) -> bool {
        let Some(database) = self.databases.get(db) else {
            return false;
        };
        let now = self.now();
        let mut entries = database.entries.write().unwrap();
        match entries.remove(key) {
            Some(entry) if entry.is_expired(now) => {
                self.note_expired(1);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Updates access metadata without reading values. Returns how many of
    /// the keys exist.
    pub fn touch(&self, db: usize, keys: &[Bytes]) -> usize {
        keys.iter()
            .filter(|key| self.read_entry(db, key, |_| ()).is_some())
            .count()
    }

    /// One key chosen uniformly at random among live keys of the database.
    pub fn random_key(&self, db: usize) -> Option<Bytes> {
        let database = self.databases.get(db)?;
        let now = self.now();
        let entries = database.entries.read().unwrap();
        entries
            .iter()
            .filter(|(_, e)| !e.is_expired(now))
            .map(|(k, _)| k.clone())
            .choose(&mut rand::thread_rng())
    }

    /// Clears one database, or every database when `db = -1`.
    pub fn flush(&self, db: i64) {
        if db < 0 {
            for database in &self.databases {
                database.entries.write().unwrap().clear();
            }
            debug!("flushed all databases");
        } else if let Some(database) = self.databases.get(db as usize) {
            database.entries.write().unwrap().clear();
            debug!(db, "flushed database");
        }
    }

    /// The variant tag name for TYPE, or `None` when the key is absent.
    pub fn type_of(&self, db: usize, key: &[u8]) -> Option<&'static str> {
        self.read_entry(db, key, |entry| entry.value.type_name())
    }

    /// Live-key count.
    pub fn dbsize(&self, db: usize) -> usize {
        let Some(database) = self.databases.get(db) else {
            return 0;
        };
        let now = self.now();
        let entries = database.entries.read().unwrap();
        entries.values().filter(|e| !e.is_expired(now)).count()
    }

    /// Live keys matching a glob pattern.
    pub fn keys_matching(&self, db: usize, pattern: &GlobPattern) -> Vec<Bytes> {
        let Some(database) = self.databases.get(db) else {
            return Vec::new();
        };
        let now = self.now();
        let entries = database.entries.read().unwrap();
        entries
            .iter()
            .filter(|(key, e)| !e.is_expired(now) && pattern.matches(key))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Renames a key. `None` = source missing; `Some(false)` = destination
    /// existed and `fail_if_dst_exists` blocked the rename; `Some(true)` =
    /// renamed (destination replaced unless blocked).
    pub fn rename(
        &self,
        db: usize,
        src: &[u8],
        dst: Bytes,
        fail_if_dst_exists: bool,
    ) -> Option<bool> {
        let database = self.databases.get(db)?;
        let now = self.now();
        let mut entries = database.entries.write().unwrap();

        if entries.get(src).map(|e| e.is_expired(now)).unwrap_or(true) {
            if entries.remove(src).is_some() {
                self.note_expired(1);
            }
            return None;
        }

        let dst_live = entries.get(&dst).map(|e| !e.is_expired(now)).unwrap_or(false);
        if fail_if_dst_exists && dst_live {
            return Some(false);
        }

        let entry = entries.remove(src)?;
        entries.insert(dst, entry);
        Some(true)
    }

    /// Moves a key to another database. Fails (false) when the source key
    /// is absent or the destination database already holds the key. The two
    /// database locks are taken in ascending index order.
    pub fn move_key(&self, src_db: usize, dst_db: usize, key: &[u8]) -> bool {
        if src_db == dst_db
            || src_db >= self.databases.len()
            || dst_db >= self.databases.len()
        {
            return false;
        }
        let now = self.now();

        let (lo, hi) = (src_db.min(dst_db), src_db.max(dst_db));
        let lo_guard = self.databases[lo].entries.write().unwrap();
        let hi_guard = self.databases[hi].entries.write().unwrap();
        let (mut src_entries, mut dst_entries) = if src_db == lo {
            (lo_guard, hi_guard)
        } else {
            (hi_guard, lo_guard)
        };

        let src_live = src_entries.get(key).map(|e| !e.is_expired(now)).unwrap_or(false);
        let dst_live = dst_entries.get(key).map(|e| !e.is_expired(now)).unwrap_or(false);
        if !src_live || dst_live {
            return false;
        }

        if let Some(entry) = src_entries.remove(key) {
            dst_entries.insert(Bytes::copy_from_slice(key), entry);
            return true;
        }
        false
    }

    // ========================================================================
    // Scoped entry access for the command layer
    // ========================================================================

    /// Runs `f` over a live entry under the read lock, counting the access.
    /// Expired entries are purged (upgrading to the write lock) and report
    /// absent. The reference never outlives the call.
    pub fn read_entry<R>(&self, db: usize, key: &[u8], f: impl FnOnce(&KeyEntry) -> R) -> Option<R> {
        let database = self.databases.get(db)?;
        let now = self.now();

        {
            let entries = database.entries.read().unwrap();
            match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => {
                    entry.meta.touch(self.stamp());
                    return Some(f(entry));
                }
                Some(_) => {} // stale: fall through to purge
                None => return None,
            }
        }

        let mut entries = database.entries.write().unwrap();
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                self.note_expired(1);
                None
            }
            Some(entry) => {
                // Raced with a writer that refreshed the key.
                entry.meta.touch(self.stamp());
                Some(f(entry))
            }
            None => None,
        }
    }

    /// Runs `f` over a live entry under the write lock. Purges stale
    /// entries first; drops the key afterwards when `f` left an empty
    /// container behind.
    pub fn write_entry<R>(
        &self,
        db: usize,
        key: &[u8],
        f: impl FnOnce(&mut KeyEntry) -> R,
    ) -> Option<R> {
        let database = self.databases.get(db)?;
        let now = self.now();
        let mut entries = database.entries.write().unwrap();

        if entries.get(key).map(|e| e.is_expired(now)).unwrap_or(false) {
            entries.remove(key);
            self.note_expired(1);
            return None;
        }

        let stamp = self.stamp();
        let result = {
            let entry = entries.get_mut(key)?;
            entry.meta.touch(stamp);
            let result = f(&mut *entry);
            if !entry.value.is_empty_container() {
                return Some(result);
            }
            result
        };
        entries.remove(key);
        Some(result)
    }

    /// Runs `f` over the entry, creating it with `make` when absent (or
    /// expired). Drops the key afterwards when `f` left an empty container.
    pub fn entry_or_insert<R>(
        &self,
        db: usize,
        key: &Bytes,
        make: impl FnOnce() -> Value,
        f: impl FnOnce(&mut KeyEntry) -> R,
    ) -> R {
        let database = &self.databases[db];
        let now = self.now();
        let stamp = self.stamp();
        let mut entries = database.entries.write().unwrap();

        if entries.get(key).map(|e| e.is_expired(now)).unwrap_or(false) {
            entries.remove(key);
            self.note_expired(1);
        }

        let result = {
            let entry = entries
                .entry(key.clone())
                .or_insert_with(|| KeyEntry::new(make(), stamp));
            entry.meta.touch(stamp);
            let result = f(&mut *entry);
            if !entry.value.is_empty_container() {
                return result;
            }
            result
        };
        entries.remove(key);
        result
    }

    /// Runs `f` over a whole database map for multi-key commands. The
    /// single write lock covers every key the command touches.
    pub fn with_db<R>(&self, db: usize, f: impl FnOnce(&mut DbView<'_>) -> R) -> R {
        let database = &self.databases[db];
        let mut entries = database.entries.write().unwrap();
        let mut view = DbView {
            entries: &mut entries,
            now: self.now(),
            stamp: self.stamp(),
            expired: 0,
        };
        let result = f(&mut view);
        let expired = view.expired;
        drop(entries);
        self.note_expired(expired);
        result
    }

    // ========================================================================
    // Memory accounting & eviction support
    // ========================================================================

    /// Estimated retained bytes across all databases.
    pub fn used_memory(&self) -> usize {
        let mut total = 0;
        for database in &self.databases {
            let entries = database.entries.read().unwrap();
            total += entries
                .iter()
                .map(|(key, entry)| key.len() + entry.size_of())
                .sum::<usize>();
        }
        total
    }

    /// Visits every live entry in every database (read-locked one database
    /// at a time). Used by the eviction engine to gather candidates; does
    /// not count as an access.
    pub fn scan_entries(&self, mut f: impl FnMut(usize, &Bytes, &KeyEntry)) {
        let now = self.now();
        for (db, database) in self.databases.iter().enumerate() {
            let entries = database.entries.read().unwrap();
            for (key, entry) in entries.iter() {
                if !entry.is_expired(now) {
                    f(db, key, entry);
                }
            }
        }
    }

    /// Removes every expired key everywhere. Called by the sweeper.
    pub fn purge_expired_all(&self) -> u64 {
        let now = self.now();
        let mut purged = 0u64;
        for database in &self.databases {
            let mut entries = database.entries.write().unwrap();
            let before = entries.len();
            entries.retain(|_, entry| !entry.is_expired(now));
            purged += (before - entries.len()) as u64;
        }
        self.note_expired(purged);
        purged
    }

    /// LFU counter for OBJECT FREQ; does not count as an access.
    pub fn object_freq(&self, db: usize, key: &[u8]) -> Option<u64> {
        self.peek_entry(db, key, |entry| entry.meta.frequency())
    }

    /// Seconds since last access for OBJECT IDLETIME; not itself an access.
    pub fn object_idle_time(&self, db: usize, key: &[u8]) -> Option<u64> {
        self.peek_entry(db, key, |entry| {
            let now_ms = self.clock.elapsed_ms();
            now_ms.saturating_sub(entry.meta.last_access_ms()) / 1000
        })
    }

    /// Like `read_entry` but without touching access metadata.
    fn peek_entry<R>(&self, db: usize, key: &[u8], f: impl FnOnce(&KeyEntry) -> R) -> Option<R> {
        let database = self.databases.get(db)?;
        let now = self.now();
        let entries = database.entries.read().unwrap();
        entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(f)
    }
}

/// Mutable view over one database for multi-key commands, with the same
/// lazy-expiry discipline as the single-key accessors.
pub struct DbView<'a> {
    entries: &'a mut HashMap<Bytes, KeyEntry>,
    now: Instant,
    stamp: u64,
    expired: u64,
}

impl DbView<'_> {
    pub fn now(&self) -> Instant {
        self.now
    }

    fn purge_if_stale(&mut self, key: &[u8]) {
        if self
            .entries
            .get(key)
            .map(|e| e.is_expired(self.now))
            .unwrap_or(false)
        {
            self.entries.remove(key);
            self.expired += 1;
        }
    }

    /// Live entry reference; counts as an access.
    pub fn live(&mut self, key: &[u8]) -> Option<&KeyEntry> {
        self.purge_if_stale(key);
        let entry = self.entries.get(key)?;
        entry.meta.touch(self.stamp);
        Some(entry)
    }

    /// Live mutable entry reference; counts as an access. The caller is
    /// responsible for `drop_if_empty` after emptying a container.
    pub fn live_mut(&mut self, key: &[u8]) -> Option<&mut KeyEntry> {
        self.purge_if_stale(key);
        let entry = self.entries.get_mut(key)?;
        entry.meta.touch(self.stamp);
        Some(entry)
    }

    /// Writes a value, preserving prior expiration, purging stale first.
    pub fn set_value(&mut self, key: Bytes, value: Value) {
        self.set_value_with(key, value, SetExpiry::Keep);
    }

    /// Writes a value with an explicit expiry treatment.
    pub fn set_value_with(&mut self, key: Bytes, value: Value, expiry: SetExpiry) {
        self.purge_if_stale(&key);
        match self.entries.get_mut(&key) {
            Some(entry) => {
                entry.value = value;
                entry.meta.touch(self.stamp);
                match expiry {
                    SetExpiry::Keep => {}
                    SetExpiry::Persist => entry.expires_at = None,
                    SetExpiry::At(at) => entry.expires_at = Some(at),
                }
            }
            None => {
                let mut entry = KeyEntry::new(value, self.stamp);
                if let SetExpiry::At(at) = expiry {
                    entry.expires_at = Some(at);
                }
                self.entries.insert(key, entry);
            }
        }
    }

    pub fn remove(&mut self, key: &[u8]) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drops the key when its container is empty.
    pub fn drop_if_empty(&mut self, key: &[u8]) {
        if self
            .entries
            .get(key)
            .map(|e| e.value.is_empty_container())
            .unwrap_or(false)
        {
            self.entries.remove(key);
        }
    }
}
