//! Hash Container with Per-Field Expiry
//!
//! A map of fields to byte-string values where each field carries its own
//! optional expiry, independent of the key's. Field expiry follows the
//! same two rules as key expiry: a field past its deadline is reported
//! absent immediately, and is structurally removed on the next mutating
//! contact with the hash.
//!
//! Read methods therefore take `now` and filter; mutating methods purge.

use bytes::Bytes;
use rand::seq::IteratorRandom;
use rand::Rng;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Instant;

/// One field slot: the value plus its independent expiry.
#[derive(Debug, Clone)]
pub struct HashField {
    pub value: Bytes,
    pub expires_at: Option<Instant>,
}

impl HashField {
    fn new(value: Bytes) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }
}

/// Condition restricting when a field expiry update applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpiryCondition {
    #[default]
    Always,
    /// Only when the field has no expiry yet.
    IfNone,
    /// Only when the field already has an expiry.
    IfSome,
    /// Only when the new deadline is later than the current one.
    IfGreater,
    /// Only when the new deadline is earlier than the current one.
    IfLess,
}

/// Reply codes for a per-field expiry update, one per addressed field.
pub mod field_expiry_reply {
    /// No such field.
    pub const NO_FIELD: i64 = -2;
    /// The condition rejected the update.
    pub const CONDITION_FAILED: i64 = 0;
    /// Expiry set.
    pub const APPLIED: i64 = 1;
    /// Deadline was already due; the field was deleted on the spot.
    pub const DELETED: i64 = 2;
}

/// A hash value: fields with independently expiring slots.
#[derive(Debug, Clone, Default)]
pub struct HashValue {
    fields: HashMap<Bytes, HashField>,
}

impl HashValue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live fields.
    pub fn len(&self, now: Instant) -> usize {
        self.fields.values().filter(|f| !f.is_expired(now)).count()
    }

    /// True when no field (live or stale) remains. Stale fields are removed
    /// by mutating contact, so emptiness here means the key can be dropped.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Drops every field past its deadline.
    pub fn purge_expired(&mut self, now: Instant) {
        self.fields.retain(|_, f| !f.is_expired(now));
    }

    pub fn get(&self, field: &[u8], now: Instant) -> Option<&Bytes> {
        self.fields
            .get(field)
            .filter(|f| !f.is_expired(now))
            .map(|f| &f.value)
    }

    pub fn contains(&self, field: &[u8], now: Instant) -> bool {
        self.fields
            .get(field)
            .map(|f| !f.is_expired(now))
            .unwrap_or(false)
    }

    /// Sets one field. Returns true when the field was newly created.
    /// An existing field keeps its expiry across the value update, the way
    /// a key-level write preserves key expiry unless told otherwise.
    pub fn set(&mut self, field: Bytes, value: Bytes, now: Instant) -> bool {
        self.purge_expired(now);
        match self.fields.get_mut(&field) {
            Some(slot) => {
                slot.value = value;
                false
            }
            None => {
                self.fields.insert(field, HashField::new(value));
                true
            }
        }
    }

    /// Sets one field only when absent. Returns true when it was created.
    pub fn set_if_absent(&mut self, field: Bytes, value: Bytes, now: Instant) -> bool {
        self.purge_expired(now);
        if self.fields.contains_key(&field) {
            false
        } else {
            self.fields.insert(field, HashField::new(value));
            true
        }
    }

    /// Removes one field. Returns true when a live field was deleted.
    pub fn remove(&mut self, field: &[u8], now: Instant) -> bool {
        let was_live = self.contains(field, now);
        self.fields.remove(field);
        self.purge_expired(now);
        was_live
    }

    /// The field's expiry slot: `None` = no such field,
    /// `Some(None)` = live without expiry, `Some(Some(at))` = live with one.
    pub fn expiry_of(&self, field: &[u8], now: Instant) -> Option<Option<Instant>> {
        self.fields
            .get(field)
            .filter(|f| !f.is_expired(now))
            .map(|f| f.expires_at)
    }

    /// Applies an expiry deadline to one field, returning the per-field
    /// reply code. A deadline at or before `now` deletes the field
    /// immediately (code 2), matching an expiry of zero seconds.
    pub fn set_field_expiry(
        &mut self,
        field: &[u8],
        at: Instant,
        condition: ExpiryCondition,
        now: Instant,
    ) -> i64 {
        self.purge_expired(now);
        let Some(slot) = self.fields.get_mut(field) else {
            return field_expiry_reply::NO_FIELD;
        };

        let allowed = match condition {
            ExpiryCondition::Always => true,
            ExpiryCondition::IfNone => slot.expires_at.is_none(),
            ExpiryCondition::IfSome => slot.expires_at.is_some(),
            ExpiryCondition::IfGreater => slot.expires_at.map(|cur| at > cur).unwrap_or(true),
            ExpiryCondition::IfLess => slot.expires_at.map(|cur| at < cur).unwrap_or(true),
        };
        if !allowed {
            return field_expiry_reply::CONDITION_FAILED;
        }

        if at <= now {
            self.fields.remove(field);
            return field_expiry_reply::DELETED;
        }
        slot.expires_at = Some(at);
        field_expiry_reply::APPLIED
    }

    /// Clears one field's expiry. Returns 1 when an expiry was removed,
    /// -1 when the field had none, -2 when there is no such field.
    pub fn persist_field(&mut self, field: &[u8], now: Instant) -> i64 {
        self.purge_expired(now);
        match self.fields.get_mut(field) {
            Some(slot) if slot.expires_at.is_some() => {
                slot.expires_at = None;
                1
            }
            Some(_) => -1,
            None => field_expiry_reply::NO_FIELD,
        }
    }

    pub fn iter_live(&self, now: Instant) -> impl Iterator<Item = (&Bytes, &Bytes)> {
        self.fields
            .iter()
            .filter(move |(_, f)| !f.is_expired(now))
            .map(|(k, f)| (k, &f.value))
    }

    /// Random live fields with the ZRANDMEMBER count convention: positive
    /// without replacement, negative with, zero empty.
    pub fn random_fields(&self, count: i64, now: Instant) -> Vec<(Bytes, Bytes)> {
        let mut rng = rand::thread_rng();
        match count.cmp(&0) {
            Ordering::Equal => Vec::new(),
            Ordering::Greater => self
                .iter_live(now)
                .choose_multiple(&mut rng, count as usize)
                .into_iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            Ordering::Less => {
                let pool: Vec<_> = self.iter_live(now).collect();
                if pool.is_empty() {
                    return Vec::new();
                }
                (0..count.unsigned_abs() as usize)
                    .map(|_| {
                        let (k, v) = pool[rng.gen_range(0..pool.len())];
                        (k.clone(), v.clone())
                    })
                    .collect()
            }
        }
    }

    /// Estimated retained bytes: field and value lengths plus 32 bytes of
    /// bookkeeping (map slot + expiry option) per field.
    pub fn mem_usage(&self) -> usize {
        self.fields
            .iter()
            .map(|(k, f)| k.len() + f.value.len() + 32)
            .sum()
    }
}
