//! Supporting services for the HTTP layer.

mod rate_limit;
mod registry;

pub use rate_limit::{limit_logins, LoginRateLimiter, RateLimited};
pub use registry::{
    AttributeRelease, ProxyPolicy, RegisteredService, RegistryError, ServiceDefinition,
    ServiceRegistry,
};
