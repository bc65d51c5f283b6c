//! Ticket factory: identifiers plus the expiration policy for each new ticket.

use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};

use cas_core::{
    Authentication, ExpirationPolicies, GrantingTicket, Service, ServiceTicket, Ticket,
    TicketBody, TicketId, TicketIdGenerator, TicketKind, TicketState,
};

/// Builds tickets in memory. Persisting them is the caller's job.
pub struct TicketFactory {
    ids: TicketIdGenerator,
    policies: ArcSwap<ExpirationPolicies>,
}

impl TicketFactory {
    pub fn new(node_id: &str, policies: ExpirationPolicies) -> Self {
        Self {
            ids: TicketIdGenerator::new(node_id),
            policies: ArcSwap::from_pointee(policies),
        }
    }

    pub fn policies(&self) -> Arc<ExpirationPolicies> {
        self.policies.load_full()
    }

    /// Replace the policies applied to tickets issued from now on.
    pub fn set_policies(&self, policies: ExpirationPolicies) {
        self.policies.store(Arc::new(policies));
    }

    fn state(&self, kind: TicketKind, now: DateTime<Utc>) -> TicketState {
        let policy = self.policies.load().for_kind(kind).clone();
        TicketState::new(self.ids.next(kind), policy, now)
    }

    pub fn ticket_granting(&self, authentication: Authentication, now: DateTime<Utc>) -> Ticket {
        Ticket {
            state: self.state(TicketKind::TicketGranting, now),
            body: TicketBody::TicketGranting(GrantingTicket::new(authentication)),
        }
    }

    pub fn service(
        &self,
        granting_ticket: &TicketId,
        service: Service,
        from_new_login: bool,
        now: DateTime<Utc>,
    ) -> Ticket {
        Ticket {
            state: self.state(TicketKind::Service, now),
            body: TicketBody::Service(ServiceTicket {
                granting_ticket: granting_ticket.clone(),
                service,
                from_new_login,
            }),
        }
    }

    /// PGT for `proxied_by`, descending from `parent` (the ticket whose
    /// validation requested it).
    pub fn proxy_granting(
        &self,
        parent: &TicketId,
        authentication: Authentication,
        proxied_by: Service,
        now: DateTime<Utc>,
    ) -> Ticket {
        let mut granting = GrantingTicket::new(authentication);
        granting.parent = Some(parent.clone());
        granting.proxied_by = Some(proxied_by);
        Ticket {
            state: self.state(TicketKind::ProxyGranting, now),
            body: TicketBody::ProxyGranting(granting),
        }
    }

    pub fn proxy(&self, pgt: &TicketId, service: Service, now: DateTime<Utc>) -> Ticket {
        Ticket {
            state: self.state(TicketKind::Proxy, now),
            body: TicketBody::Proxy(ServiceTicket {
                granting_ticket: pgt.clone(),
                service,
                from_new_login: false,
            }),
        }
    }

    pub fn proxy_iou(&self) -> String {
        self.ids.next_proxy_iou()
    }
}
