//! Central authentication service: every ticket operation behind the endpoints.
//!
//! Expiration is evaluated along the whole granting chain. A service ticket
//! is only valid while its own policy and every granting ticket above it are
//! valid; a granting ticket that has disappeared counts as expired.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use cas_auth::{AuthenticationEngine, AuthenticationError, ClientInfo, Credential};
use cas_core::{
    Assertion, Authentication, CasEvent, CasEventKind, Clock, Principal, Service, Ticket,
    TicketId, TicketKind,
};

use crate::error::CasError;
use crate::events::EventLog;
use crate::proxy_callback::ProxyCallback;
use crate::services::{RegisteredService, ServiceRegistry};
use crate::store::{StoreError, TicketStore};
use crate::tickets::TicketFactory;

/// Longest granting chain that is followed (TGT, then nested PGTs).
const MAX_CHAIN_DEPTH: usize = 16;

/// Options of a validation request.
#[derive(Debug, Clone, Default)]
pub struct ValidationRequest {
    /// Only accept tickets issued from a credential-based login.
    pub renew: bool,
    /// Accept proxy tickets as well as service tickets.
    pub allow_proxy_tickets: bool,
    /// Callback that receives a new proxy-granting ticket.
    pub pgt_url: Option<Service>,
}

/// Tickets created by a successful login.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub ticket_granting_ticket: TicketId,
    pub service_ticket: Option<TicketId>,
    pub principal: Principal,
}

pub struct CentralAuthenticationService {
    store: Arc<dyn TicketStore>,
    factory: Arc<TicketFactory>,
    engine: Arc<AuthenticationEngine>,
    registry: Arc<ServiceRegistry>,
    events: Arc<EventLog>,
    proxy_callback: Arc<dyn ProxyCallback>,
    clock: Arc<dyn Clock>,
}

impl CentralAuthenticationService {
    pub fn new(
        store: Arc<dyn TicketStore>,
        factory: Arc<TicketFactory>,
        engine: Arc<AuthenticationEngine>,
        registry: Arc<ServiceRegistry>,
        events: Arc<EventLog>,
        proxy_callback: Arc<dyn ProxyCallback>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            factory,
            engine,
            registry,
            events,
            proxy_callback,
            clock,
        }
    }

    pub fn store(&self) -> &Arc<dyn TicketStore> {
        &self.store
    }

    pub fn factory(&self) -> &TicketFactory {
        &self.factory
    }

    pub fn engine(&self) -> &AuthenticationEngine {
        &self.engine
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Registered and enabled service for `service`.
    pub fn authorized_service(&self, service: &Service) -> Result<&RegisteredService, CasError> {
        self.registry.find_enabled(service).ok_or_else(|| {
            CasError::UnauthorizedService(format!(
                "Service '{service}' is not authorized to use CAS"
            ))
        })
    }

    /// Whether a session may be reused for `service` without new credentials.
    pub fn allows_sso(&self, service: &Service) -> bool {
        self.registry
            .find_enabled(service)
            .is_some_and(|s| s.is_sso_enabled())
    }

    /// Run the authentication engine and record the outcome.
    pub fn authenticate(
        &self,
        credential: &Credential,
        client: &ClientInfo,
    ) -> Result<Authentication, CasError> {
        let now = self.clock.now();
        match self.engine.authenticate(credential, client, now) {
            Ok(authentication) => {
                self.events.record(
                    CasEvent::new(CasEventKind::AuthenticationSucceeded, now)
                        .with_principal(&authentication.principal.id)
                        .with_client_ip(client.ip.clone())
                        .with_metadata("handler", &authentication.handler),
                );
                Ok(authentication)
            }
            Err(err) => {
                let kind = if err == AuthenticationError::ThrottledTooManyAttempts {
                    CasEventKind::AuthenticationThrottled
                } else {
                    CasEventKind::AuthenticationFailed
                };
                self.events.record(
                    CasEvent::new(kind, now)
                        .with_principal(credential.id())
                        .with_client_ip(client.ip.clone())
                        .with_metadata("error", err.to_string()),
                );
                Err(err.into())
            }
        }
    }

    /// Authenticate and open a session, with a first service ticket when a
    /// service is given.
    pub async fn login(
        &self,
        credential: &Credential,
        client: &ClientInfo,
        service: Option<&Service>,
    ) -> Result<LoginOutcome, CasError> {
        if let Some(service) = service {
            self.authorized_service(service)?;
        }
        let authentication = self.authenticate(credential, client)?;
        self.create_ticket_granting_ticket(authentication, service, client)
            .await
    }

    /// Create a TGT (and the first ST) for an authentication.
    ///
    /// Both tickets are built in memory and stored with a single `put_all`,
    /// so the store never holds a service ticket without its TGT.
    pub async fn create_ticket_granting_ticket(
        &self,
        authentication: Authentication,
        service: Option<&Service>,
        client: &ClientInfo,
    ) -> Result<LoginOutcome, CasError> {
        let now = self.clock.now();
        if let Some(service) = service {
            self.authorized_service(service)?;
        }

        let principal = authentication.principal.clone();
        let mut tgt = self.factory.ticket_granting(authentication, now);
        let service_ticket = service.map(|service| {
            let st = self
                .factory
                .service(tgt.id(), service.clone(), true, now);
            tgt.state.record_use(now);
            if let Some(granting) = tgt.as_granting_mut() {
                granting.services.insert(st.id().clone(), service.clone());
            }
            st
        });

        let tgt_id = tgt.id().clone();
        let st_id = service_ticket.as_ref().map(|st| st.id().clone());
        let mut batch = vec![tgt];
        batch.extend(service_ticket);
        self.store.put_all(&batch).await?;

        info!(ticket = %tgt_id, principal = %principal.id, "Created ticket-granting ticket");
        self.events.record(
            CasEvent::new(CasEventKind::TicketGrantingTicketCreated, now)
                .with_ticket(&tgt_id)
                .with_principal(&principal.id)
                .with_client_ip(client.ip.clone()),
        );
        if let (Some(st_id), Some(service)) = (&st_id, service) {
            self.record_granted(CasEventKind::ServiceTicketGranted, st_id, service, &principal, now);
        }

        Ok(LoginOutcome {
            ticket_granting_ticket: tgt_id,
            service_ticket: st_id,
            principal,
        })
    }

    /// Issue a service ticket from an existing session (single sign-on).
    pub async fn grant_service_ticket(
        &self,
        tgt_id: &TicketId,
        service: &Service,
    ) -> Result<TicketId, CasError> {
        let now = self.clock.now();
        let registered = self.authorized_service(service)?;
        if !registered.is_sso_enabled() {
            return Err(CasError::UnauthorizedService(format!(
                "Service '{service}' does not allow single sign-on"
            )));
        }
        let tgt = self
            .live_granting_ticket(tgt_id, TicketKind::TicketGranting, now)
            .await?;

        let st = self.factory.service(tgt_id, service.clone(), false, now);
        let st_id = st.id().clone();
        self.attach(&tgt, &st, service, now).await?;

        if let Some(principal) = tgt.principal() {
            self.record_granted(CasEventKind::ServiceTicketGranted, &st_id, service, principal, now);
        }
        Ok(st_id)
    }

    /// Principal of a live TGT.
    pub async fn session_principal(&self, tgt_id: &TicketId) -> Result<Principal, CasError> {
        let now = self.clock.now();
        let tgt = self
            .live_granting_ticket(tgt_id, TicketKind::TicketGranting, now)
            .await?;
        tgt.principal()
            .cloned()
            .ok_or_else(|| CasError::invalid_ticket(tgt_id))
    }

    /// Issue a proxy ticket for `target` from a proxy-granting ticket.
    pub async fn grant_proxy_ticket(
        &self,
        pgt_id: &TicketId,
        target: &Service,
    ) -> Result<TicketId, CasError> {
        let now = self.clock.now();
        let pgt = self
            .live_granting_ticket(pgt_id, TicketKind::ProxyGranting, now)
            .await?;
        let registered = self.authorized_service(target)?;
        if !registered.is_sso_enabled() {
            return Err(CasError::UnauthorizedService(format!(
                "Service '{target}' does not accept proxy tickets"
            )));
        }

        let pt = self.factory.proxy(pgt_id, target.clone(), now);
        let pt_id = pt.id().clone();
        self.attach(&pgt, &pt, target, now).await?;

        if let Some(principal) = pgt.principal() {
            self.record_granted(CasEventKind::ProxyTicketGranted, &pt_id, target, principal, now);
        }
        Ok(pt_id)
    }

    /// Store `child` and record it (and one use) on its granting ticket.
    async fn attach(
        &self,
        granting: &Ticket,
        child: &Ticket,
        service: &Service,
        now: DateTime<Utc>,
    ) -> Result<(), CasError> {
        self.store.put(child).await?;

        let child_id = child.id().clone();
        let service = service.clone();
        let recorded = self
            .store
            .modify(granting.id(), &move |t: &mut Ticket| {
                t.state.record_use(now);
                if let Some(g) = t.as_granting_mut() {
                    g.services.insert(child_id.clone(), service.clone());
                }
            })
            .await;

        if let Err(err) = recorded {
            // The granting ticket vanished (logout, cleaner) after the lookup.
            self.discard(child.id()).await;
            return Err(err.into());
        }
        Ok(())
    }

    /// Validate a service ticket (or a proxy ticket, when allowed) for `service`.
    pub async fn validate_service_ticket(
        &self,
        id: &TicketId,
        service: &Service,
        request: &ValidationRequest,
    ) -> Result<Assertion, CasError> {
        let now = self.clock.now();
        let result = self.validate(id, service, request, now).await;

        let event = match &result {
            Ok(assertion) => CasEvent::new(CasEventKind::ServiceTicketValidated, now)
                .with_principal(&assertion.principal.id),
            Err(err) => {
                debug!(ticket = %id, service = %service, error = %err, "Validation failed");
                CasEvent::new(CasEventKind::ServiceTicketValidationFailed, now)
                    .with_metadata("code", err.code().as_str())
                    .with_metadata("reason", err.to_string())
            }
        };
        self.events
            .record(event.with_ticket(id).with_service(service));
        result
    }

    async fn validate(
        &self,
        id: &TicketId,
        service: &Service,
        request: &ValidationRequest,
        now: DateTime<Utc>,
    ) -> Result<Assertion, CasError> {
        match id.kind() {
            Some(TicketKind::Service) => {}
            Some(TicketKind::Proxy) if request.allow_proxy_tickets => {}
            Some(TicketKind::Proxy) => {
                return Err(CasError::InvalidTicket(format!(
                    "Ticket '{id}' is a proxy ticket and may only be validated as such"
                )));
            }
            _ => return Err(CasError::invalid_ticket(id)),
        }

        let ticket = self.store.get(id).await?;
        let body = ticket
            .as_service()
            .cloned()
            .ok_or_else(|| CasError::invalid_ticket(id))?;

        let Some(chain) = self.ancestors(&ticket, now).await? else {
            self.discard(id).await;
            return Err(CasError::InvalidTicket(format!("Ticket '{id}' has expired")));
        };

        let matching = self
            .registry
            .find(&body.service)
            .map(|r| r.matching())
            .unwrap_or_default();
        if !body.service.matches(service, matching) {
            // A presentation for the wrong service still uses the ticket up.
            if let Ok(burned) = self.store.consume(id, now).await {
                if burned.is_expired(now) {
                    self.discard(id).await;
                }
            }
            return Err(CasError::InvalidService(format!(
                "Ticket '{id}' does not match supplied service. \
                 The original service was '{}' and the supplied service was '{service}'.",
                body.service
            )));
        }

        let consumed = self.store.consume(id, now).await?;
        if consumed.is_expired(now) {
            self.discard(id).await;
        }

        let registered = self.authorized_service(&body.service)?;
        if request.renew && !body.from_new_login {
            return Err(CasError::InvalidTicket(format!(
                "Ticket '{id}' was not issued from a new login"
            )));
        }

        let granting = chain
            .first()
            .and_then(Ticket::as_granting)
            .ok_or_else(|| CasError::invalid_ticket(id))?;
        let authentication = &granting.authentication;
        let proxies = chain
            .iter()
            .filter_map(|t| t.as_granting().and_then(|g| g.proxied_by.clone()))
            .collect();

        let proxy_granting_ticket_iou = match &request.pgt_url {
            Some(url) => Some(
                self.establish_proxy_granting_ticket(
                    registered,
                    &body.granting_ticket,
                    authentication.clone(),
                    url,
                    now,
                )
                .await?,
            ),
            None => None,
        };

        info!(ticket = %id, service = %body.service, principal = %authentication.principal.id, "Validated ticket");
        Ok(Assertion {
            principal: registered.release(&authentication.principal),
            service: body.service,
            authentication_date: authentication.authenticated_at,
            from_new_login: body.from_new_login,
            proxy_granting_ticket_iou,
            proxies,
        })
    }

    /// Create a PGT under `parent`, deliver it to `url` and return its IOU.
    async fn establish_proxy_granting_ticket(
        &self,
        registered: &RegisteredService,
        parent: &TicketId,
        authentication: Authentication,
        url: &Service,
        now: DateTime<Utc>,
    ) -> Result<String, CasError> {
        if !registered.allows_proxy() {
            return Err(CasError::UnauthorizedServiceProxy(format!(
                "Service '{}' is not allowed to use proxy authentication",
                registered.name()
            )));
        }
        if !registered.accepts_proxy_callback(url) {
            return Err(CasError::InvalidProxyCallback(format!(
                "The supplied proxy callback url '{url}' could not be authenticated"
            )));
        }

        let principal = authentication.principal.id.clone();
        let pgt = self
            .factory
            .proxy_granting(parent, authentication, url.clone(), now);
        let pgt_id = pgt.id().clone();
        self.store.put(&pgt).await?;

        let child = pgt_id.clone();
        let linked = self
            .store
            .modify(parent, &move |t: &mut Ticket| {
                if let Some(g) = t.as_granting_mut() {
                    g.descendants.insert(child.clone());
                }
            })
            .await;
        if let Err(err) = linked {
            self.discard(&pgt_id).await;
            return Err(err.into());
        }

        let iou = self.factory.proxy_iou();
        if let Err(err) = self.proxy_callback.deliver(url, &pgt_id, &iou).await {
            warn!(callback = %url, error = %err, "Proxy callback failed");
            self.discard(&pgt_id).await;
            return Err(CasError::InvalidProxyCallback(format!(
                "The supplied proxy callback url '{url}' could not be authenticated"
            )));
        }

        self.events.record(
            CasEvent::new(CasEventKind::ProxyGrantingTicketCreated, now)
                .with_ticket(&pgt_id)
                .with_service(url)
                .with_principal(principal),
        );
        Ok(iou)
    }

    /// Destroy a TGT (or PGT) with every ticket issued beneath it.
    ///
    /// Returns false when there was nothing to destroy; calling it twice is
    /// not an error.
    pub async fn destroy_ticket_granting_ticket(&self, id: &TicketId) -> Result<bool, CasError> {
        let ticket = match self.store.get(id).await {
            Ok(ticket) => ticket,
            Err(StoreError::NotFound(_)) => return Ok(false),
            Err(err) => return Err(err.into()),
        };
        let Some(principal) = ticket.principal().map(|p| p.id.clone()) else {
            return Ok(false);
        };

        let removed = self.remove_tree(&ticket).await?;
        info!(ticket = %id, principal = %principal, removed, "Destroyed ticket-granting ticket");
        self.events.record(
            CasEvent::new(CasEventKind::TicketGrantingTicketDestroyed, self.clock.now())
                .with_ticket(id)
                .with_principal(principal)
                .with_metadata("removed", removed.to_string()),
        );
        Ok(true)
    }

    /// Remove tickets that are expired by their own policy or their chain.
    pub async fn delete_expired_tickets(&self) -> Result<usize, CasError> {
        let now = self.clock.now();
        let mut removed = self.store.delete_expired(now).await?;

        // Whatever is left is valid by its own policy; drop it if its chain is not.
        let tickets = self.store.list(None).await?;
        let by_id: HashMap<&TicketId, &Ticket> = tickets.iter().map(|t| (t.id(), t)).collect();
        let mut doomed = Vec::new();
        for ticket in &tickets {
            let expired = match expired_in_snapshot(ticket, &by_id, now) {
                Some(expired) => expired,
                // Parent missing from the listing; it may be newer than it.
                None => self.ancestors(ticket, now).await?.is_none(),
            };
            if expired {
                doomed.push(ticket.id().clone());
            }
        }
        if !doomed.is_empty() {
            removed += self.store.delete_many(&doomed).await?;
        }
        if removed == 0 {
            return Ok(0);
        }

        self.events.record(
            CasEvent::new(CasEventKind::TicketsExpired, now)
                .with_metadata("removed", removed.to_string()),
        );
        Ok(removed)
    }

    /// TGTs and PGTs that are valid along their whole chain, oldest first.
    pub async fn active_granting_tickets(&self) -> Result<Vec<Ticket>, CasError> {
        let now = self.clock.now();
        let tickets = self.store.list(None).await?;
        let by_id: HashMap<&TicketId, &Ticket> = tickets.iter().map(|t| (t.id(), t)).collect();
        let active = tickets
            .iter()
            .filter(|t| t.kind().is_granting())
            .filter(|t| expired_in_snapshot(t, &by_id, now) == Some(false))
            .cloned()
            .collect();
        Ok(active)
    }

    /// A TGT or PGT that exists and is valid along its whole chain.
    async fn live_granting_ticket(
        &self,
        id: &TicketId,
        kind: TicketKind,
        now: DateTime<Utc>,
    ) -> Result<Ticket, CasError> {
        if id.kind() != Some(kind) {
            return Err(CasError::invalid_ticket(id));
        }
        let ticket = self.store.get(id).await?;
        if self.ancestors(&ticket, now).await?.is_none() {
            if let Err(err) = self.remove_tree(&ticket).await {
                warn!(ticket = %id, error = %err, "Failed to remove expired ticket");
            }
            return Err(CasError::InvalidTicket(format!("Ticket '{id}' has expired")));
        }
        Ok(ticket)
    }

    /// Granting tickets above `ticket`, nearest first. `None` when `ticket`
    /// or any of them is expired or missing.
    async fn ancestors(
        &self,
        ticket: &Ticket,
        now: DateTime<Utc>,
    ) -> Result<Option<Vec<Ticket>>, CasError> {
        if ticket.is_expired(now) {
            return Ok(None);
        }
        let mut chain: Vec<Ticket> = Vec::new();
        let mut next = ticket.parent().cloned();
        while let Some(parent_id) = next {
            if chain.len() >= MAX_CHAIN_DEPTH {
                return Ok(None);
            }
            let parent = match self.store.get(&parent_id).await {
                Ok(parent) => parent,
                Err(StoreError::NotFound(_)) => return Ok(None),
                Err(err) => return Err(err.into()),
            };
            if parent.is_expired(now) {
                return Ok(None);
            }
            next = parent.parent().cloned();
            chain.push(parent);
        }
        Ok(Some(chain))
    }

    /// Delete `root` plus every service ticket and proxy-granting ticket
    /// below it. Returns how many tickets were removed.
    async fn remove_tree(&self, root: &Ticket) -> Result<usize, CasError> {
        let mut seen: HashSet<TicketId> = HashSet::from([root.id().clone()]);
        let mut doomed = vec![root.id().clone()];
        let mut pending = vec![root.clone()];

        while let Some(ticket) = pending.pop() {
            let Some(granting) = ticket.as_granting() else {
                continue;
            };
            for id in granting.services.keys() {
                if seen.insert(id.clone()) {
                    doomed.push(id.clone());
                }
            }
            for id in &granting.descendants {
                if !seen.insert(id.clone()) {
                    continue;
                }
                match self.store.get(id).await {
                    Ok(child) => {
                        doomed.push(id.clone());
                        pending.push(child);
                    }
                    Err(StoreError::NotFound(_)) => {}
                    Err(err) => return Err(err.into()),
                }
            }
        }

        Ok(self.store.delete_many(&doomed).await?)
    }

    /// Best-effort delete of a ticket that can no longer be used.
    async fn discard(&self, id: &TicketId) {
        if let Err(err) = self.store.delete(id).await {
            warn!(ticket = %id, error = %err, "Failed to delete ticket");
        }
    }

    fn record_granted(
        &self,
        kind: CasEventKind,
        ticket: &TicketId,
        service: &Service,
        principal: &Principal,
        now: DateTime<Utc>,
    ) {
        info!(ticket = %ticket, service = %service, principal = %principal.id, "Granted ticket");
        self.events.record(
            CasEvent::new(kind, now)
                .with_ticket(ticket)
                .with_service(service)
                .with_principal(&principal.id),
        );
    }
}

/// Chain expiry evaluated against a listing. `None` when a parent is not in it.
fn expired_in_snapshot(
    ticket: &Ticket,
    by_id: &HashMap<&TicketId, &Ticket>,
    now: DateTime<Utc>,
) -> Option<bool> {
    let mut current = ticket;
    for _ in 0..=MAX_CHAIN_DEPTH {
        if current.is_expired(now) {
            return Some(true);
        }
        match current.parent() {
            None => return Some(false),
            Some(parent) => current = *by_id.get(parent)?,
        }
    }
    Some(true)
}
