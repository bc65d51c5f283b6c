//! CLI commands.

pub mod admin;
pub mod tickets;

pub use admin::{clear_events, clear_throttles, destroy_session, destroy_sessions, list_events, list_sessions};
pub use tickets::{login, proxy, validate, ProtocolArg};
