//! CAS server: ticket registry, validation, SSO sessions and the HTTP
//! surface that exposes them.
//!
//! [`app::CasApp`] assembles everything from a [`config::CasConfig`]; the
//! binary adds a listener, the registry cleaner and shutdown handling.

pub mod app;
pub mod cas;
pub mod cleaner;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod http;
pub mod proxy_callback;
pub mod services;
pub mod sessions;
pub mod store;
pub mod tickets;

pub use app::CasApp;
pub use cas::{CentralAuthenticationService, LoginOutcome, ValidationRequest};
pub use config::{CasConfig, ConfigError};
pub use error::CasError;
