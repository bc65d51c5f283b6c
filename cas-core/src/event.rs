//! Events recorded for every ticket operation and authentication outcome.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::service::Service;
use crate::ticket::TicketId;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CasEventKind {
    // Authentication
    /// Credentials were accepted.
    AuthenticationSucceeded,
    /// Credentials were rejected.
    AuthenticationFailed,
    /// An attempt was rejected by the failure throttle.
    AuthenticationThrottled,

    // Ticket lifecycle
    /// A ticket-granting ticket was created.
    TicketGrantingTicketCreated,
    /// A ticket-granting ticket and its descendants were destroyed.
    TicketGrantingTicketDestroyed,
    /// A service ticket was issued.
    ServiceTicketGranted,
    /// A service or proxy ticket validated successfully.
    ServiceTicketValidated,
    /// A service or proxy ticket failed validation.
    ServiceTicketValidationFailed,
    /// A proxy-granting ticket was created.
    ProxyGrantingTicketCreated,
    /// A proxy ticket was issued.
    ProxyTicketGranted,
    /// Expired tickets were removed by the registry cleaner.
    TicketsExpired,
}

/// A recorded event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CasEvent {
    pub id: Uuid,

    /// When the event occurred.
    pub ts: DateTime<Utc>,

    pub kind: CasEventKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket: Option<TicketId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<Service>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,

    /// Additional context, ordered for deterministic output.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl CasEvent {
    pub fn new(kind: CasEventKind, ts: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            ts,
            kind,
            principal: None,
            ticket: None,
            service: None,
            client_ip: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    pub fn with_ticket(mut self, ticket: &TicketId) -> Self {
        self.ticket = Some(ticket.clone());
        self
    }

    pub fn with_service(mut self, service: &Service) -> Self {
        self.service = Some(service.clone());
        self
    }

    pub fn with_client_ip(mut self, ip: Option<impl Into<String>>) -> Self {
        self.client_ip = ip.map(Into::into);
        self
    }

    /// Add metadata to the event (builder pattern).
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
