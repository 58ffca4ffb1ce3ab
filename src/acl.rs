//! ACL Collaborator Seam
//!
//! Real user administration is a collaborator, not part of the core. The
//! dispatcher asks this trait for a permit before every handler call,
//! passing the command name and the access sets its key-extraction
//! function produced.

use crate::pubsub::ConnId;
use bytes::Bytes;
use std::fmt::Debug;

/// Authorization policy consulted per command dispatch.
pub trait Acl: Debug + Send + Sync {
    /// Permit or deny one command for one connection.
    fn authorize(
        &self,
        conn: ConnId,
        command: &str,
        read_keys: &[Bytes],
        write_keys: &[Bytes],
        channels: &[Bytes],
    ) -> bool;
}

/// The default policy: everything is permitted.
#[derive(Debug, Default)]
pub struct AllowAll;

impl Acl for AllowAll {
    fn authorize(&self, _: ConnId, _: &str, _: &[Bytes], _: &[Bytes], _: &[Bytes]) -> bool {
        true
    }
}

/// Deny-everything policy, used to exercise the deny path in tests.
#[derive(Debug, Default)]
pub struct DenyAll;

impl Acl for DenyAll {
    fn authorize(&self, _: ConnId, _: &str, _: &[Bytes], _: &[Bytes], _: &[Bytes]) -> bool {
        false
    }
}
