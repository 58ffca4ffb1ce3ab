//! Eviction Policies and the Background Sweeper
//!
//! Two jobs share this module. First, the policy machinery: when a memory
//! cap is configured and consumption exceeds it, victims are selected and
//! deleted according to the configured policy until consumption is back
//! under the cap. Second, active expiry: a background task that removes
//! expired keys which lazy (on-contact) purging would never reach.
//!
//! The sweeper runs both jobs every `interval`. Write commands additionally
//! run the capacity check inline, which is where the NoEviction policy
//! turns into a write error instead of an eviction.

use crate::storage::keyspace::Keyspace;
use bytes::Bytes;
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// Victim-selection policy for memory pressure.
///
/// The volatile variants restrict the candidate set to keys carrying an
/// expiry; the allkeys variants consider every live key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Reject writes when over the cap instead of evicting.
    #[default]
    NoEviction,
    AllKeysLru,
    AllKeysLfu,
    AllKeysRandom,
    VolatileLru,
    VolatileLfu,
    VolatileRandom,
    /// Evict the key whose expiry is closest.
    VolatileTtl,
}

impl EvictionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionPolicy::NoEviction => "noeviction",
            EvictionPolicy::AllKeysLru => "allkeys-lru",
            EvictionPolicy::AllKeysLfu => "allkeys-lfu",
            EvictionPolicy::AllKeysRandom => "allkeys-random",
            EvictionPolicy::VolatileLru => "volatile-lru",
            EvictionPolicy::VolatileLfu => "volatile-lfu",
            EvictionPolicy::VolatileRandom => "volatile-random",
            EvictionPolicy::VolatileTtl => "volatile-ttl",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "noeviction" => Some(EvictionPolicy::NoEviction),
            "allkeys-lru" => Some(EvictionPolicy::AllKeysLru),
            "allkeys-lfu" => Some(EvictionPolicy::AllKeysLfu),
            "allkeys-random" => Some(EvictionPolicy::AllKeysRandom),
            "volatile-lru" => Some(EvictionPolicy::VolatileLru),
            "volatile-lfu" => Some(EvictionPolicy::VolatileLfu),
            "volatile-random" => Some(EvictionPolicy::VolatileRandom),
            "volatile-ttl" => Some(EvictionPolicy::VolatileTtl),
            _ => None,
        }
    }

    /// True when only keys with an expiry are candidates.
    pub fn is_volatile(&self) -> bool {
        matches!(
            self,
            EvictionPolicy::VolatileLru
                | EvictionPolicy::VolatileLfu
                | EvictionPolicy::VolatileRandom
                | EvictionPolicy::VolatileTtl
        )
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Eviction and sweeper configuration.
#[derive(Debug, Clone)]
pub struct EvictionConfig {
    pub policy: EvictionPolicy,
    /// Byte cap; 0 disables memory-pressure eviction entirely.
    pub max_memory: usize,
    /// Interval between sweeper passes.
    pub interval: Duration,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            policy: EvictionPolicy::NoEviction,
            max_memory: 0,
            interval: Duration::from_millis(100),
        }
    }
}

/// Memory consumption exceeds the cap and the policy forbids eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverMemoryLimit;

/// Brings consumption back under the cap, deleting victims per the policy.
///
/// Returns the number of evicted keys. Under NoEviction an over-cap
/// keyspace is an error (the caller turns it into a write rejection).
/// Exhausting the candidate set stops quietly: eviction is best-effort.
pub fn enforce_capacity(
    keyspace: &Keyspace,
    config: &EvictionConfig,
) -> Result<u64, OverMemoryLimit> {
    if config.max_memory == 0 {
        return Ok(0);
    }

    let mut evicted = 0u64;
    while keyspace.used_memory() > config.max_memory {
        if config.policy == EvictionPolicy::NoEviction {
            return Err(OverMemoryLimit);
        }
        let Some((db, key)) = select_victim(keyspace, config.policy) else {
            warn!(
                used = keyspace.used_memory(),
                cap = config.max_memory,
                "over memory cap but no eviction candidates remain"
            );
            break;
        };
        if keyspace.delete(db, &key) {
            keyspace.note_evicted(1);
            evicted += 1;
            trace!(db, key = ?key, policy = %config.policy, "evicted key");
        }
    }

    if evicted > 0 {
        debug!(evicted, policy = %config.policy, "memory pressure eviction");
    }
    Ok(evicted)
}

/// Picks one victim according to the policy, scanning live entries.
fn select_victim(keyspace: &Keyspace, policy: EvictionPolicy) -> Option<(usize, Bytes)> {
    let volatile_only = policy.is_volatile();

    match policy {
        EvictionPolicy::NoEviction => None,

        EvictionPolicy::AllKeysRandom | EvictionPolicy::VolatileRandom => {
            // Reservoir sample of one over the candidate stream.
            let mut rng = rand::thread_rng();
            let mut seen = 0usize;
            let mut picked = None;
            keyspace.scan_entries(|db, key, entry| {
                if volatile_only && entry.expires_at.is_none() {
                    return;
                }
                seen += 1;
                if rng.gen_range(0..seen) == 0 {
                    picked = Some((db, key.clone()));
                }
            });
            picked
        }

        EvictionPolicy::AllKeysLru | EvictionPolicy::VolatileLru => {
            let mut best: Option<(u64, usize, Bytes)> = None;
            keyspace.scan_entries(|db, key, entry| {
                if volatile_only && entry.expires_at.is_none() {
                    return;
                }
                let stamp = entry.meta.last_access_ms();
                if best.as_ref().map(|(s, _, _)| stamp < *s).unwrap_or(true) {
                    best = Some((stamp, db, key.clone()));
                }
            });
            best.map(|(_, db, key)| (db, key))
        }

        EvictionPolicy::AllKeysLfu | EvictionPolicy::VolatileLfu => {
            let mut best: Option<(u64, usize, Bytes)> = None;
            keyspace.scan_entries(|db, key, entry| {
                if volatile_only && entry.expires_at.is_none() {
                    return;
                }
                let freq = entry.meta.frequency();
                if best.as_ref().map(|(f, _, _)| freq < *f).unwrap_or(true) {
                    best = Some((freq, db, key.clone()));
                }
            });
            best.map(|(_, db, key)| (db, key))
        }

        EvictionPolicy::VolatileTtl => {
            let mut best: Option<(Instant, usize, Bytes)> = None;
            keyspace.scan_entries(|db, key, entry| {
                let Some(at) = entry.expires_at else {
                    return;
                };
                if best.as_ref().map(|(b, _, _)| at < *b).unwrap_or(true) {
                    best = Some((at, db, key.clone()));
                }
            });
            best.map(|(_, db, key)| (db, key))
        }
    }
}

/// Handle to the running sweeper task; dropping it stops the sweeper.
#[derive(Debug)]
pub struct EvictionSweeper {
    shutdown_tx: watch::Sender<bool>,
}

impl EvictionSweeper {
    /// Starts the sweeper as a background task.
    pub fn start(keyspace: Arc<Keyspace>, config: EvictionConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(sweeper_loop(keyspace, config, shutdown_rx));
        info!("background eviction sweeper started");
        Self { shutdown_tx }
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for EvictionSweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweeper_loop(
    keyspace: Arc<Keyspace>,
    config: EvictionConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(config.interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("eviction sweeper received shutdown signal");
                    return;
                }
            }
        }

        let expired = keyspace.purge_expired_all();
        if expired > 0 {
            debug!(expired, "expired keys swept");
        }

        // NoEviction over-cap is handled by write commands; the sweeper
        // only reports it.
        if let Err(OverMemoryLimit) = enforce_capacity(&keyspace, &config) {
            trace!(
                used = keyspace.used_memory(),
                cap = config.max_memory,
                "memory over cap under noeviction"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::storage::keyspace::SetExpiry;
    use crate::storage::value::Value;
    use bytes::Bytes;

    fn keyspace() -> Arc<Keyspace> {
        Arc::new(Keyspace::new(Arc::new(Clock::new())))
    }

    fn fill(ks: &Keyspace, count: usize, payload: usize) {
        for i in 0..count {
            ks.set_value(
                0,
                Bytes::from(format!("key{}", i)),
                Value::Str(Bytes::from(vec![b'x'; payload])),
                SetExpiry::Keep,
            );
        }
    }

    #[test]
    fn test_policy_parse_roundtrip() {
        for name in [
            "noeviction",
            "allkeys-lru",
            "allkeys-lfu",
            "allkeys-random",
            "volatile-lru",
            "volatile-lfu",
            "volatile-random",
            "volatile-ttl",
        ] {
            let policy = EvictionPolicy::parse(name).unwrap();
            assert_eq!(policy.as_str(), name);
        }
        assert_eq!(EvictionPolicy::parse("bogus"), None);
    }

    #[test]
    fn test_noeviction_reports_over_limit() {
        let ks = keyspace();
        fill(&ks, 10, 1000);
        let config = EvictionConfig {
            policy: EvictionPolicy::NoEviction,
            max_memory: 1024,
            ..Default::default()
        };
        assert_eq!(enforce_capacity(&ks, &config), Err(OverMemoryLimit));
    }

    #[test]
    fn test_cap_zero_disables_enforcement() {
        let ks = keyspace();
        fill(&ks, 10, 1000);
        let config = EvictionConfig::default();
        assert_eq!(enforce_capacity(&ks, &config), Ok(0));
        assert_eq!(ks.dbsize(0), 10);
    }

    #[test]
    fn test_lru_evicts_least_recently_used() {
        let ks = keyspace();
        fill(&ks, 4, 1000);

        // Touch everything except key0 so key0 holds the oldest stamp.
        ks.clock().advance(std::time::Duration::from_millis(100));
        for i in 1..4 {
            ks.touch(0, &[Bytes::from(format!("key{}", i))]);
        }

        let picked = select_victim(&ks, EvictionPolicy::AllKeysLru).unwrap();
        assert_eq!(picked.1, Bytes::from("key0"));
    }

    #[test]
    fn test_lfu_evicts_least_frequent() {
        let ks = keyspace();
        fill(&ks, 3, 100);
        for _ in 0..5 {
            ks.touch(0, &[Bytes::from("key1"), Bytes::from("key2")]);
        }
        let picked = select_victim(&ks, EvictionPolicy::AllKeysLfu).unwrap();
        assert_eq!(picked.1, Bytes::from("key0"));
    }

    #[test]
    fn test_volatile_policies_only_consider_expiring_keys() {
        let ks = keyspace();
        fill(&ks, 3, 100);
        let at = ks.now() + std::time::Duration::from_secs(60);
        ks.set_expiry(0, b"key2", Some(at), false);

        let picked = select_victim(&ks, EvictionPolicy::VolatileLru).unwrap();
        assert_eq!(picked.1, Bytes::from("key2"));
        let picked = select_victim(&ks, EvictionPolicy::VolatileRandom).unwrap();
        assert_eq!(picked.1, Bytes::from("key2"));
    }

    #[test]
    fn test_volatile_ttl_picks_closest_deadline() {
        let ks = keyspace();
        fill(&ks, 3, 100);
        ks.set_expiry(0, b"key0", Some(ks.now() + std::time::Duration::from_secs(300)), false);
        ks.set_expiry(0, b"key1", Some(ks.now() + std::time::Duration::from_secs(30)), false);

        let picked = select_victim(&ks, EvictionPolicy::VolatileTtl).unwrap();
        assert_eq!(picked.1, Bytes::from("key1"));
    }

    #[test]
    fn test_enforce_capacity_evicts_until_under_cap() {
        let ks = keyspace();
        fill(&ks, 10, 1000);
        let used = ks.used_memory();
        let config = EvictionConfig {
            policy: EvictionPolicy::AllKeysRandom,
            max_memory: used / 2,
            ..Default::default()
        };

        let evicted = enforce_capacity(&ks, &config).unwrap();
        assert!(evicted > 0);
        assert!(ks.used_memory() <= used / 2);
        let (_, counted) = ks.removal_counts();
        assert_eq!(counted, evicted);
    }

    #[tokio::test]
    async fn test_sweeper_purges_expired_keys() {
        let ks = keyspace();
        fill(&ks, 5, 10);
        for i in 0..5 {
            ks.set_expiry(
                0,
                format!("key{}", i).as_bytes(),
                Some(ks.now() + std::time::Duration::from_millis(20)),
                false,
            );
        }
        ks.set_value(
            0,
            Bytes::from("stay"),
            Value::Int(1),
            SetExpiry::Keep,
        );

        let config = EvictionConfig {
            interval: Duration::from_millis(10),
            ..Default::default()
        };
        let _sweeper = EvictionSweeper::start(Arc::clone(&ks), config);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(ks.dbsize(0), 1);
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_drop() {
        let ks = keyspace();
        {
            let _sweeper = EvictionSweeper::start(
                Arc::clone(&ks),
                EvictionConfig {
                    interval: Duration::from_millis(10),
                    ..Default::default()
                },
            );
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        // Sweeper is gone; lazily expired keys survive until contact.
        fill(&ks, 1, 10);
        ks.set_expiry(0, b"key0", Some(ks.now()), false);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(ks.get_expiry(0, b"key0").is_none());
    }
}
