//! # CAS Core
//!
//! Pure domain types for the CAS ticketing engine.
//!
//! ## Design Principles
//!
//! This crate is intentionally **IO-free**:
//! - No filesystem operations
//! - No network calls
//! - No database interactions
//!
//! Time is never read directly by the types here; callers pass `now` in,
//! usually from a [`Clock`]. Storage, HTTP and logging live in `cas-server`.
//!
//! ## Stability
//!
//! The serde representation of [`Ticket`] is what `cas-server` persists, so
//! field names and enum tags are part of the public API.
//!
//! ## Modules
//!
//! - [`ticket`] - Ticket ids, shared lifecycle state, per-kind bodies
//! - [`expiration`] - Expiration policies (TTL, idle time, max uses)
//! - [`principal`] - Principals and authentications
//! - [`service`] - Services and how presented URLs are matched
//! - [`protocol`] - Validation and proxy responses in XML and JSON
//! - [`event`] - Events for the event log
//! - [`clock`] - Injected time source

pub mod clock;
pub mod event;
pub mod expiration;
pub mod principal;
pub mod protocol;
pub mod service;
pub mod ticket;

pub use clock::{Clock, ManualClock, SystemClock};
pub use event::{CasEvent, CasEventKind};
pub use expiration::{ExpirationPolicies, ExpirationPolicy};
pub use principal::{Attributes, Authentication, CredentialKind, Principal};
pub use protocol::{
    Assertion, AuthenticationSuccess, ProtocolFailure, ProtocolVersion, ProxyResponse,
    ResponseFormat, ServiceResponse, ValidationErrorCode,
};
pub use service::{Service, ServiceMatching};
pub use ticket::{
    GrantingTicket, ServiceTicket, Ticket, TicketBody, TicketId, TicketIdGenerator, TicketKind,
    TicketState,
};
