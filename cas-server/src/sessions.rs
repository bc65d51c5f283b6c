//! Single sign-on session introspection and invalidation.
//!
//! A session is a live TGT, or a PGT when proxied sessions are included.
//! Nothing here owns tickets: listing reads through the store and every
//! removal goes through [`CentralAuthenticationService`].

use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use cas_core::{Attributes, ExpirationPolicy, Service, Ticket, TicketId};

use crate::cas::CentralAuthenticationService;
use crate::error::CasError;

/// Which sessions a listing or bulk destroy covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionScope {
    /// TGTs and PGTs.
    #[default]
    All,
    /// Only PGTs.
    Proxied,
    /// Only TGTs, reported without proxy fields.
    Direct,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown session type '{0}' (expected ALL, PROXIED or DIRECT)")]
pub struct UnknownScope(String);

impl FromStr for SessionScope {
    type Err = UnknownScope;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ALL" => Ok(Self::All),
            "PROXIED" => Ok(Self::Proxied),
            "DIRECT" => Ok(Self::Direct),
            _ => Err(UnknownScope(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySummary {
    pub name: &'static str,
    pub time_to_live: Option<u64>,
    pub time_to_idle: Option<u64>,
    pub max_uses: Option<u32>,
}

impl From<&ExpirationPolicy> for PolicySummary {
    fn from(policy: &ExpirationPolicy) -> Self {
        Self {
            name: policy.name(),
            time_to_live: policy.time_to_live_secs,
            time_to_idle: policy.time_to_idle_secs,
            max_uses: policy.max_uses,
        }
    }
}

/// One active session as reported by `/actuator/ssoSessions`.
#[derive(Debug, Clone, Serialize)]
pub struct SsoSession {
    pub authenticated_principal: String,
    pub principal_attributes: Attributes,
    pub authentication_date: DateTime<Utc>,
    pub authentication_attributes: Attributes,
    pub ticket_granting_ticket: TicketId,
    pub number_of_uses: u32,
    pub expiration_policy: PolicySummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_proxied: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxied_by: Option<Service>,
    pub authenticated_services: BTreeMap<TicketId, Service>,
}

impl SsoSession {
    fn from_ticket(ticket: &Ticket, scope: SessionScope) -> Option<Self> {
        let granting = ticket.as_granting()?;
        let authentication = &granting.authentication;
        let (is_proxied, proxied_by) = match scope {
            SessionScope::Direct => (None, None),
            _ => (
                Some(granting.proxied_by.is_some()),
                granting.proxied_by.clone(),
            ),
        };
        Some(Self {
            authenticated_principal: authentication.principal.id.clone(),
            principal_attributes: authentication.principal.attributes.clone(),
            authentication_date: authentication.authenticated_at,
            authentication_attributes: authentication.attributes.clone(),
            ticket_granting_ticket: ticket.id().clone(),
            number_of_uses: ticket.state.count_of_uses,
            expiration_policy: PolicySummary::from(&ticket.state.expiration_policy),
            is_proxied,
            proxied_by,
            authenticated_services: granting.services.clone(),
        })
    }

    fn is_proxied(&self) -> bool {
        self.is_proxied.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub active_sso_sessions: Vec<SsoSession>,
    pub total_ticket_granting_tickets: usize,
    pub total_proxy_granting_tickets: usize,
    pub total_tickets: usize,
    pub total_principals: usize,
    pub total_usage_count: u64,
}

impl SessionReport {
    fn new(sessions: Vec<SsoSession>) -> Self {
        let mut ticket_granting = 0;
        let mut proxy_granting = 0;
        let mut usage = 0u64;
        let mut principals = HashSet::new();
        for session in &sessions {
            if session.is_proxied() {
                proxy_granting += 1;
            } else {
                ticket_granting += 1;
                principals.insert(session.authenticated_principal.as_str());
            }
            usage += u64::from(session.number_of_uses);
        }
        Self {
            total_ticket_granting_tickets: ticket_granting,
            total_proxy_granting_tickets: proxy_granting,
            total_tickets: ticket_granting + proxy_granting,
            total_principals: principals.len(),
            total_usage_count: usage,
            active_sso_sessions: sessions,
        }
    }
}

#[derive(Clone)]
pub struct SessionRegistry {
    cas: Arc<CentralAuthenticationService>,
}

impl SessionRegistry {
    pub fn new(cas: Arc<CentralAuthenticationService>) -> Self {
        Self { cas }
    }

    /// Active sessions in `scope`, optionally for one principal
    /// (case-insensitive).
    pub async fn list(
        &self,
        scope: SessionScope,
        username: Option<&str>,
    ) -> Result<SessionReport, CasError> {
        let sessions = self.active(scope, username).await?;
        Ok(SessionReport::new(sessions))
    }

    /// Destroy one session with everything issued beneath it.
    pub async fn destroy(&self, id: &TicketId) -> Result<bool, CasError> {
        self.cas.destroy_ticket_granting_ticket(id).await
    }

    /// Destroy every session of a principal. Returns the destroyed TGT ids.
    pub async fn destroy_for_principal(&self, username: &str) -> Result<Vec<TicketId>, CasError> {
        let mut destroyed = Vec::new();
        for session in self.active(SessionScope::Direct, Some(username)).await? {
            if self.destroy(&session.ticket_granting_ticket).await? {
                destroyed.push(session.ticket_granting_ticket);
            }
        }
        Ok(destroyed)
    }

    /// Destroy every session in `scope`. Returns how many were destroyed.
    pub async fn destroy_scope(&self, scope: SessionScope) -> Result<usize, CasError> {
        let mut destroyed = 0;
        for session in self.active(scope, None).await? {
            // Destroying a TGT may already have removed PGTs listed after it.
            if self.destroy(&session.ticket_granting_ticket).await? {
                destroyed += 1;
            }
        }
        Ok(destroyed)
    }

    async fn active(
        &self,
        scope: SessionScope,
        username: Option<&str>,
    ) -> Result<Vec<SsoSession>, CasError> {
        let tickets = self.cas.active_granting_tickets().await?;
        let sessions = tickets
            .iter()
            .filter(|t| {
                let proxied = t.as_granting().is_some_and(|g| g.proxied_by.is_some());
                match scope {
                    SessionScope::All => true,
                    SessionScope::Proxied => proxied,
                    SessionScope::Direct => !proxied,
                }
            })
            .filter(|t| match username {
                Some(username) => t.principal().is_some_and(|p| p.same_id(username)),
                None => true,
            })
            .filter_map(|t| SsoSession::from_ticket(t, scope))
            .collect();
        Ok(sessions)
    }
}
