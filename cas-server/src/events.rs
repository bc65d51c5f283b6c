//! Bounded in-memory event log.
//!
//! Every event is also emitted through `tracing`, so the log only needs to
//! hold recent history for `/actuator/events`.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use cas_core::{CasEvent, CasEventKind};

pub const DEFAULT_CAPACITY: usize = 10_000;

#[derive(Debug)]
pub struct EventLog {
    events: Mutex<VecDeque<CasEvent>>,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    /// Record an event, dropping the oldest one when full.
    pub fn record(&self, event: CasEvent) {
        emit(&event);
        let mut events = self.lock();
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Events oldest first.
    pub fn list(&self) -> Vec<CasEvent> {
        self.lock().iter().cloned().collect()
    }

    /// Remove all events, returning how many were held.
    pub fn clear(&self) -> usize {
        let mut events = self.lock();
        let count = events.len();
        events.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<CasEvent>> {
        // A panic while holding the lock cannot leave the deque inconsistent.
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

fn emit(event: &CasEvent) {
    let principal = event.principal.as_deref().unwrap_or("");
    let ticket = event.ticket.as_ref().map(|t| t.as_str()).unwrap_or("");
    let service = event.service.as_ref().map(|s| s.as_str()).unwrap_or("");
    let client_ip = event.client_ip.as_deref().unwrap_or("");

    match event.kind {
        CasEventKind::AuthenticationFailed
        | CasEventKind::AuthenticationThrottled
        | CasEventKind::ServiceTicketValidationFailed => tracing::warn!(
            kind = ?event.kind,
            principal,
            ticket,
            service,
            client_ip,
            metadata = ?event.metadata,
            "CAS event"
        ),
        _ => tracing::info!(
            kind = ?event.kind,
            principal,
            ticket,
            service,
            client_ip,
            metadata = ?event.metadata,
            "CAS event"
        ),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[test]
    fn bounded_log_drops_oldest() {
        let log = EventLog::new(2);
        let now = Utc::now();
        log.record(CasEvent::new(CasEventKind::AuthenticationFailed, now).with_principal("a"));
        log.record(CasEvent::new(CasEventKind::AuthenticationFailed, now).with_principal("b"));
        log.record(CasEvent::new(CasEventKind::AuthenticationSucceeded, now).with_principal("c"));

        let events = log.list();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].principal.as_deref(), Some("b"));
        assert_eq!(events[1].kind, CasEventKind::AuthenticationSucceeded);
    }

    #[test]
    fn clear_reports_count() {
        let log = EventLog::default();
        log.record(CasEvent::new(CasEventKind::TicketsExpired, Utc::now()));
        assert_eq!(log.clear(), 1);
        assert!(log.is_empty());
        assert_eq!(log.clear(), 0);
    }
}
