//! Pub/Sub Messaging
//!
//! Channel subscriptions (exact and glob-pattern), publish fan-out, and
//! the introspection surface behind PUBSUB CHANNELS / NUMPAT / NUMSUB.

pub mod bus;

pub use bus::{message_frame, pmessage_frame, ConnId, PubSubBus, PushFrame, SUBSCRIBER_BUFFER};
