//! Pub/Sub Bus
//!
//! Channel and pattern subscription state plus publish fan-out. The bus
//! owns the forward maps (channel -> subscribers, pattern -> subscribers);
//! each connection's session owns the reverse index lists it needs for
//! teardown. Neither side points owningly at the other, so disconnect and
//! unsubscribe can race without either seeing a dangling reference.
//!
//! ## Fan-out
//!
//! Publishing is non-blocking per subscriber: each subscriber is a bounded
//! writer handle, and a frame is delivered with `try_send`. A subscriber
//! whose buffer is full (or whose connection is gone) is evicted from the
//! channel on the spot — a slow consumer never blocks the publisher or the
//! other subscribers.

use crate::glob::GlobPattern;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Identifies one client connection for subscription bookkeeping.
pub type ConnId = u64;

/// Frames pushed to a subscriber's writer, already serialized.
pub type PushFrame = Bytes;

/// Capacity of each subscriber's push buffer.
pub const SUBSCRIBER_BUFFER: usize = 256;

#[derive(Debug, Clone)]
struct Subscriber {
    sender: mpsc::Sender<PushFrame>,
    /// The subscription's ordinal among the connection's subscriptions,
    /// fixed at first subscribe and returned on repeats.
    index: usize,
}

#[derive(Debug, Default)]
struct SubscriberMap {
    entries: HashMap<Bytes, HashMap<ConnId, Subscriber>>,
}

impl SubscriberMap {
    /// Returns the subscription index, inserting when absent (idempotent).
    fn subscribe(
        &mut self,
        name: Bytes,
        conn: ConnId,
        sender: &mpsc::Sender<PushFrame>,
        index: usize,
    ) -> usize {
        let subscribers = self.entries.entry(name).or_default();
        match subscribers.get(&conn) {
            Some(existing) => existing.index,
            None => {
                subscribers.insert(
                    conn,
                    Subscriber {
                        sender: sender.clone(),
                        index,
                    },
                );
                index
            }
        }
    }

    fn unsubscribe(&mut self, name: &[u8], conn: ConnId) -> bool {
        let Some(subscribers) = self.entries.get_mut(name) else {
            return false;
        };
        let removed = subscribers.remove(&conn).is_some();
        if subscribers.is_empty() {
            self.entries.remove(name);
        }
        removed
    }
}

/// The process-wide pub/sub bus.
#[derive(Debug, Default)]
pub struct PubSubBus {
    channels: RwLock<SubscriberMap>,
    patterns: RwLock<SubscriberMap>,
}

impl PubSubBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes a connection to an exact channel. Repeated subscriptions
    /// return the existing index.
    pub fn subscribe(
        &self,
        conn: ConnId,
        sender: &mpsc::Sender<PushFrame>,
        channel: Bytes,
        index: usize,
    ) -> usize {
        self.channels
            .write()
            .unwrap()
            .subscribe(channel, conn, sender, index)
    }

    /// Subscribes a connection to a glob pattern.
    pub fn psubscribe(
        &self,
        conn: ConnId,
        sender: &mpsc::Sender<PushFrame>,
        pattern: Bytes,
        index: usize,
    ) -> usize {
        self.patterns
            .write()
            .unwrap()
            .subscribe(pattern, conn, sender, index)
    }

    pub fn unsubscribe(&self, conn: ConnId, channel: &[u8]) -> bool {
        self.channels.write().unwrap().unsubscribe(channel, conn)
    }

    pub fn punsubscribe(&self, conn: ConnId, pattern: &[u8]) -> bool {
        self.patterns.write().unwrap().unsubscribe(pattern, conn)
    }

    /// Delivers a message to every exact subscriber of `channel` and every
    /// pattern subscriber whose pattern matches it. Returns the number of
    /// deliveries. Subscribers with a full or closed buffer are evicted
    /// from that channel/pattern.
    pub fn publish(&self, channel: &[u8], message: &[u8]) -> usize {
        let mut delivered = 0usize;

        let exact_frame = message_frame(channel, message);
        delivered += fan_out(&self.channels, |name| {
            (name.as_ref() == channel).then(|| exact_frame.clone())
        });

        delivered += fan_out(&self.patterns, |pattern| {
            GlobPattern::new(pattern.clone())
                .matches(channel)
                .then(|| pmessage_frame(pattern, channel, message))
        });

        trace!(
            channel = %String::from_utf8_lossy(channel),
            delivered,
            "published message"
        );
        delivered
    }

    /// Active exact channels, optionally filtered by a pattern.
    pub fn channels(&self, filter: Option<&GlobPattern>) -> Vec<Bytes> {
        let channels = self.channels.read().unwrap();
        channels
            .entries
            .keys()
            .filter(|name| filter.map(|p| p.matches(name)).unwrap_or(true))
            .cloned()
            .collect()
    }

    /// Number of distinct patterns with at least one subscriber.
    pub fn num_pat(&self) -> usize {
        self.patterns.read().unwrap().entries.len()
    }

    /// Exact-channel subscriber counts, in query order.
    pub fn num_sub(&self, channels: &[Bytes]) -> Vec<(Bytes, usize)> {
        let map = self.channels.read().unwrap();
        channels
            .iter()
            .map(|name| {
                let count = map.entries.get(name).map(|s| s.len()).unwrap_or(0);
                (name.clone(), count)
            })
            .collect()
    }

    /// Removes every subscription a connection holds. Called on disconnect
    /// with the session's own index lists, before the connection is reaped.
    pub fn remove_connection(&self, conn: ConnId, channels: &[Bytes], patterns: &[Bytes]) {
        for channel in channels {
            self.unsubscribe(conn, channel);
        }
        for pattern in patterns {
            self.punsubscribe(conn, pattern);
        }
        if !channels.is_empty() || !patterns.is_empty() {
            debug!(
                conn,
                channels = channels.len(),
                patterns = patterns.len(),
                "removed subscriptions on disconnect"
            );
        }
    }
}

/// Fans a frame out over one subscriber map. `frame_for` decides whether a
/// channel/pattern receives the message and builds its frame. Full or
/// closed subscribers are evicted after the delivery pass.
fn fan_out(
    map: &RwLock<SubscriberMap>,
    frame_for: impl Fn(&Bytes) -> Option<PushFrame>,
) -> usize {
    let mut delivered = 0usize;
    let mut evict: Vec<(Bytes, ConnId)> = Vec::new();

    {
        let guard = map.read().unwrap();
        for (name, subscribers) in guard.entries.iter() {
            let Some(frame) = frame_for(name) else {
                continue;
            };
            for (conn, subscriber) in subscribers.iter() {
                match subscriber.sender.try_send(frame.clone()) {
                    Ok(()) => delivered += 1,
                    Err(_) => {
                        // Buffer full or receiver gone: evict, do not wait.
                        evict.push((name.clone(), *conn));
                    }
                }
            }
        }
    }

    if !evict.is_empty() {
        let mut guard = map.write().unwrap();
        for (name, conn) in evict {
            debug!(conn, name = %String::from_utf8_lossy(&name), "evicting slow subscriber");
            guard.unsubscribe(&name, conn);
        }
    }

    delivered
}

/// `*3 $7 message <channel> <payload>` push frame.
pub fn message_frame(channel: &[u8], message: &[u8]) -> PushFrame {
    let mut buf = Vec::with_capacity(32 + channel.len() + message.len());
    buf.extend_from_slice(b"*3\r\n$7\r\nmessage\r\n");
    push_bulk(&mut buf, channel);
    push_bulk(&mut buf, message);
    Bytes::from(buf)
}

/// `*4 $8 pmessage <pattern> <channel> <payload>` push frame.
pub fn pmessage_frame(pattern: &[u8], channel: &[u8], message: &[u8]) -> PushFrame {
    let mut buf = Vec::with_capacity(40 + pattern.len() + channel.len() + message.len());
    buf.extend_from_slice(b"*4\r\n$8\r\npmessage\r\n");
    push_bulk(&mut buf, pattern);
    push_bulk(&mut buf, channel);
    push_bulk(&mut buf, message);
    Bytes::from(buf)
}

fn push_bulk(buf: &mut Vec<u8>, data: &[u8]) {
    buf.push(b'$');
    buf.extend_from_slice(data.len().to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &str) -> Bytes {
        Bytes::from(s.to_string())
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let bus = PubSubBus::new();
        let (tx, _rx) = mpsc::channel(4);

        assert_eq!(bus.subscribe(1, &tx, b("ch"), 1), 1);
        // Repeat returns the existing index even when a new one is offered.
        assert_eq!(bus.subscribe(1, &tx, b("ch"), 5), 1);
        assert_eq!(bus.num_sub(&[b("ch")]), vec![(b("ch"), 1)]);
    }

    #[test]
    fn test_publish_reaches_exact_subscribers() {
        let bus = PubSubBus::new();
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        bus.subscribe(1, &tx1, b("ch"), 1);
        bus.subscribe(2, &tx2, b("ch"), 1);

        assert_eq!(bus.publish(b"ch", b"hi"), 2);

        let expected = message_frame(b"ch", b"hi");
        assert_eq!(rx1.try_recv().unwrap(), expected);
        assert_eq!(rx2.try_recv().unwrap(), expected);
        // Exactly once each.
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn test_publish_matches_patterns() {
        let bus = PubSubBus::new();
        let (tx, mut rx) = mpsc::channel(4);
        bus.psubscribe(1, &tx, b("news.*"), 1);

        assert_eq!(bus.publish(b"news.sports", b"goal"), 1);
        assert_eq!(
            rx.try_recv().unwrap(),
            pmessage_frame(b"news.*", b"news.sports", b"goal")
        );

        assert_eq!(bus.publish(b"weather.today", b"rain"), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_exact_and_pattern_both_deliver() {
        let bus = PubSubBus::new();
        let (tx, mut rx) = mpsc::channel(4);
        bus.subscribe(1, &tx, b("ch"), 1);
        bus.psubscribe(1, &tx, b("c*"), 2);

        assert_eq!(bus.publish(b"ch", b"x"), 2);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_slow_subscriber_is_evicted() {
        let bus = PubSubBus::new();
        let (tx, _rx) = mpsc::channel(1);
        bus.subscribe(1, &tx, b("ch"), 1);

        // First publish fills the buffer; the second finds it full and
        // evicts the subscriber from the channel.
        assert_eq!(bus.publish(b"ch", b"one"), 1);
        assert_eq!(bus.publish(b"ch", b"two"), 0);
        assert!(bus.channels(None).is_empty());
    }

    #[test]
    fn test_unsubscribe_and_channel_listing() {
        let bus = PubSubBus::new();
        let (tx, _rx) = mpsc::channel(4);
        bus.subscribe(1, &tx, b("alpha"), 1);
        bus.subscribe(1, &tx, b("beta"), 2);

        let mut listed = bus.channels(None);
        listed.sort();
        assert_eq!(listed, vec![b("alpha"), b("beta")]);

        let filtered = bus.channels(Some(&GlobPattern::new(b("a*").to_vec())));
        assert_eq!(filtered, vec![b("alpha")]);

        assert!(bus.unsubscribe(1, b"alpha"));
        assert!(!bus.unsubscribe(1, b"alpha"));
        assert_eq!(bus.channels(None), vec![b("beta")]);
    }

    #[test]
    fn test_num_pat_counts_distinct_patterns() {
        let bus = PubSubBus::new();
        let (tx, _rx) = mpsc::channel(4);
        assert_eq!(bus.num_pat(), 0);
        bus.psubscribe(1, &tx, b("a.*"), 1);
        bus.psubscribe(2, &tx, b("a.*"), 1);
        bus.psubscribe(1, &tx, b("b.*"), 2);
        assert_eq!(bus.num_pat(), 2);
    }

    #[test]
    fn test_remove_connection_clears_everything() {
        let bus = PubSubBus::new();
        let (tx, _rx) = mpsc::channel(4);
        bus.subscribe(7, &tx, b("ch"), 1);
        bus.psubscribe(7, &tx, b("p.*"), 2);

        bus.remove_connection(7, &[b("ch")], &[b("p.*")]);
        assert!(bus.channels(None).is_empty());
        assert_eq!(bus.num_pat(), 0);
        assert_eq!(bus.publish(b"ch", b"x"), 0);
    }
}
