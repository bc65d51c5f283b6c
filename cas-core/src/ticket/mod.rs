//! Ticket model: shared lifecycle state plus a tagged body per ticket kind.
//!
//! Granting tickets (TGT, PGT) carry the authentication and track what they
//! issued; service tickets (ST, PT) point back at the granting ticket that
//! issued them. Lookups across the chain are left to the store.

mod id;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::expiration::ExpirationPolicy;
use crate::principal::{Authentication, Principal};
use crate::service::Service;

pub use id::{TicketId, TicketIdGenerator, TicketKind, PROXY_GRANTING_TICKET_IOU_PREFIX};

/// Lifecycle state common to every ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketState {
    pub id: TicketId,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub previous_last_used_at: Option<DateTime<Utc>>,
    pub count_of_uses: u32,
    /// Policy copied in at issuance; later policy changes do not affect it.
    pub expiration_policy: ExpirationPolicy,
}

impl TicketState {
    pub fn new(id: TicketId, expiration_policy: ExpirationPolicy, now: DateTime<Utc>) -> Self {
        Self {
            id,
            created_at: now,
            last_used_at: now,
            previous_last_used_at: None,
            count_of_uses: 0,
            expiration_policy,
        }
    }

    /// Expired by this ticket's own policy. Ancestors are not consulted.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration_policy.is_expired(
            self.created_at,
            self.last_used_at,
            self.count_of_uses,
            now,
        )
    }

    /// Record one use at `now`.
    pub fn record_use(&mut self, now: DateTime<Utc>) {
        self.previous_last_used_at = Some(self.last_used_at);
        self.last_used_at = now;
        self.count_of_uses = self.count_of_uses.saturating_add(1);
    }

    /// Record a use if the ticket is still valid. Returns false when it was
    /// already expired or exhausted, leaving the state unchanged.
    pub fn try_consume(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_expired(now) || !self.expiration_policy.allows_use(self.count_of_uses) {
            return false;
        }
        self.record_use(now);
        true
    }
}

/// Body of a ticket-granting or proxy-granting ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantingTicket {
    pub authentication: Authentication,
    /// Service that received this ticket as a proxy-granting ticket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxied_by: Option<Service>,
    /// Granting ticket this one descends from (PGT only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<TicketId>,
    /// Service and proxy tickets issued from this ticket.
    #[serde(default)]
    pub services: BTreeMap<TicketId, Service>,
    /// Proxy-granting tickets descending from this ticket.
    #[serde(default)]
    pub descendants: BTreeSet<TicketId>,
}

impl GrantingTicket {
    pub fn new(authentication: Authentication) -> Self {
        Self {
            authentication,
            proxied_by: None,
            parent: None,
            services: BTreeMap::new(),
            descendants: BTreeSet::new(),
        }
    }
}

/// Body of a service or proxy ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTicket {
    /// The TGT (for ST) or PGT (for PT) that issued this ticket.
    pub granting_ticket: TicketId,
    pub service: Service,
    /// True when issued directly from a credential-based login.
    #[serde(default)]
    pub from_new_login: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "body")]
pub enum TicketBody {
    TicketGranting(GrantingTicket),
    ProxyGranting(GrantingTicket),
    Service(ServiceTicket),
    Proxy(ServiceTicket),
}

/// A ticket of any kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub state: TicketState,
    pub body: TicketBody,
}

impl Ticket {
    pub fn id(&self) -> &TicketId {
        &self.state.id
    }

    pub fn kind(&self) -> TicketKind {
        match self.body {
            TicketBody::TicketGranting(_) => TicketKind::TicketGranting,
            TicketBody::ProxyGranting(_) => TicketKind::ProxyGranting,
            TicketBody::Service(_) => TicketKind::Service,
            TicketBody::Proxy(_) => TicketKind::Proxy,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.state.is_expired(now)
    }

    /// Granting body of a TGT or PGT.
    pub fn as_granting(&self) -> Option<&GrantingTicket> {
        match &self.body {
            TicketBody::TicketGranting(g) | TicketBody::ProxyGranting(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_granting_mut(&mut self) -> Option<&mut GrantingTicket> {
        match &mut self.body {
            TicketBody::TicketGranting(g) | TicketBody::ProxyGranting(g) => Some(g),
            _ => None,
        }
    }

    /// Service body of an ST or PT.
    pub fn as_service(&self) -> Option<&ServiceTicket> {
        match &self.body {
            TicketBody::Service(s) | TicketBody::Proxy(s) => Some(s),
            _ => None,
        }
    }

    /// The granting ticket this ticket descends from, if any.
    pub fn parent(&self) -> Option<&TicketId> {
        match &self.body {
            TicketBody::TicketGranting(g) | TicketBody::ProxyGranting(g) => g.parent.as_ref(),
            TicketBody::Service(s) | TicketBody::Proxy(s) => Some(&s.granting_ticket),
        }
    }

    /// Principal of a granting ticket. Service tickets resolve it through
    /// their granting ticket.
    pub fn principal(&self) -> Option<&Principal> {
        self.as_granting().map(|g| &g.authentication.principal)
    }
}
