//! Ticket identifiers and their generator.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Prefix used for proxy-granting ticket IOUs.
pub const PROXY_GRANTING_TICKET_IOU_PREFIX: &str = "PGTIOU";

/// Bytes of OS randomness embedded in every identifier.
const RANDOM_BYTES: usize = 32;

/// The four kinds of tickets the engine issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketKind {
    /// Ticket-granting ticket, one per SSO session.
    TicketGranting,
    /// Service ticket handed to a relying service.
    Service,
    /// Proxy-granting ticket, issued to a service that may proxy.
    ProxyGranting,
    /// Proxy ticket, issued from a proxy-granting ticket.
    Proxy,
}

impl TicketKind {
    /// Identifier prefix for this kind.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::TicketGranting => "TGT",
            Self::Service => "ST",
            Self::ProxyGranting => "PGT",
            Self::Proxy => "PT",
        }
    }

    /// Resolve a kind from an identifier prefix.
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "TGT" => Some(Self::TicketGranting),
            "ST" => Some(Self::Service),
            "PGT" => Some(Self::ProxyGranting),
            "PT" => Some(Self::Proxy),
            _ => None,
        }
    }

    /// Returns true for kinds that grant other tickets.
    pub fn is_granting(&self) -> bool {
        matches!(self, Self::TicketGranting | Self::ProxyGranting)
    }
}

impl fmt::Display for TicketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Opaque ticket identifier, e.g. `ST-12-3q2+7w...-node1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(pub String);

impl TicketId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Kind encoded in the identifier prefix, if it is a known one.
    pub fn kind(&self) -> Option<TicketKind> {
        let prefix = self.0.split('-').next()?;
        TicketKind::from_prefix(prefix)
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TicketId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Generates unique, unguessable ticket identifiers.
///
/// Format: `{PREFIX}-{counter}-{random}-{suffix}` where `random` is 32 bytes
/// from the OS RNG in URL-safe base64 and `suffix` names the issuing node.
#[derive(Debug)]
pub struct TicketIdGenerator {
    counter: AtomicU64,
    suffix: String,
}

impl TicketIdGenerator {
    /// Create a generator whose identifiers end with `suffix`.
    ///
    /// Characters other than ASCII alphanumerics, `.` and `_` are dropped from
    /// the suffix so identifiers stay URL-safe.
    pub fn new(suffix: &str) -> Self {
        let suffix: String = suffix
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '.' || *c == '_')
            .collect();
        Self {
            counter: AtomicU64::new(0),
            suffix: if suffix.is_empty() { "cas".to_string() } else { suffix },
        }
    }

    /// Next identifier for a ticket of `kind`.
    pub fn next(&self, kind: TicketKind) -> TicketId {
        TicketId(self.next_with_prefix(kind.prefix()))
    }

    /// Next proxy-granting ticket IOU.
    pub fn next_proxy_iou(&self) -> String {
        self.next_with_prefix(PROXY_GRANTING_TICKET_IOU_PREFIX)
    }

    fn next_with_prefix(&self, prefix: &str) -> String {
        let count = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let mut random = [0u8; RANDOM_BYTES];
        OsRng.fill_bytes(&mut random);
        format!(
            "{}-{}-{}-{}",
            prefix,
            count,
            URL_SAFE_NO_PAD.encode(random),
            self.suffix
        )
    }
}
