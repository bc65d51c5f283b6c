//! Registered services: which URLs may request tickets, and what they receive.

use regex::Regex;
use serde::{Deserialize, Serialize};

use cas_core::{Principal, Service, ServiceMatching};

/// Which principal attributes a service receives on validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeRelease {
    #[default]
    All,
    Allow(Vec<String>),
    None,
}

/// Proxy settings of a registered service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyPolicy {
    pub allowed: bool,
    /// Regex that a `pgtUrl` must match.
    pub callback_pattern: String,
}

impl Default for ProxyPolicy {
    fn default() -> Self {
        Self {
            allowed: false,
            callback_pattern: "^https://.*".to_string(),
        }
    }
}

/// A service definition as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub id: u64,
    pub name: String,
    /// Regex matched against the full service URL.
    pub pattern: String,
    #[serde(default = "enabled")]
    pub enabled: bool,
    #[serde(default = "enabled")]
    pub sso_enabled: bool,
    #[serde(default)]
    pub proxy: ProxyPolicy,
    #[serde(default)]
    pub release: AttributeRelease,
    #[serde(default)]
    pub matching: ServiceMatching,
}

fn enabled() -> bool {
    true
}

impl ServiceDefinition {
    /// Accepts any http(s) service, releases everything and allows proxying
    /// to https callbacks.
    pub fn catch_all() -> Self {
        Self {
            id: 1,
            name: "default".to_string(),
            pattern: "^https?://.*".to_string(),
            enabled: true,
            sso_enabled: true,
            proxy: ProxyPolicy {
                allowed: true,
                ..ProxyPolicy::default()
            },
            release: AttributeRelease::All,
            matching: ServiceMatching::Exact,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("service {id}: invalid pattern: {source}")]
    InvalidPattern {
        id: u64,
        #[source]
        source: regex::Error,
    },
}

/// A definition with its patterns compiled.
#[derive(Debug, Clone)]
pub struct RegisteredService {
    pub definition: ServiceDefinition,
    pattern: Regex,
    callback: Regex,
}

impl RegisteredService {
    fn compile(definition: ServiceDefinition) -> Result<Self, RegistryError> {
        let invalid = |source| RegistryError::InvalidPattern {
            id: definition.id,
            source,
        };
        let pattern = Regex::new(&definition.pattern).map_err(invalid)?;
        let callback = Regex::new(&definition.proxy.callback_pattern).map_err(invalid)?;
        Ok(Self {
            definition,
            pattern,
            callback,
        })
    }

    pub fn id(&self) -> u64 {
        self.definition.id
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn is_enabled(&self) -> bool {
        self.definition.enabled
    }

    pub fn is_sso_enabled(&self) -> bool {
        self.definition.sso_enabled
    }

    pub fn matching(&self) -> ServiceMatching {
        self.definition.matching
    }

    pub fn matches(&self, service: &Service) -> bool {
        self.pattern.is_match(service.as_str())
    }

    pub fn allows_proxy(&self) -> bool {
        self.definition.proxy.allowed
    }

    /// Proxying is allowed and `url` is an https URL matching the callback pattern.
    pub fn accepts_proxy_callback(&self, url: &Service) -> bool {
        self.allows_proxy() && url.is_https() && self.callback.is_match(url.as_str())
    }

    /// The principal as this service may see it.
    pub fn release(&self, principal: &Principal) -> Principal {
        match &self.definition.release {
            AttributeRelease::All => principal.with_releasable_attributes(),
            AttributeRelease::Allow(names) => principal.with_released_attributes(names),
            AttributeRelease::None => Principal::new(principal.id.clone()),
        }
    }
}

/// Registered services, consulted in definition order.
#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    services: Vec<RegisteredService>,
}

impl ServiceRegistry {
    pub fn new(definitions: Vec<ServiceDefinition>) -> Result<Self, RegistryError> {
        let services = definitions
            .into_iter()
            .map(RegisteredService::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { services })
    }

    /// First registered service whose pattern matches.
    pub fn find(&self, service: &Service) -> Option<&RegisteredService> {
        self.services.iter().find(|s| s.matches(service))
    }

    /// Matching service, if it is enabled.
    pub fn find_enabled(&self, service: &Service) -> Option<&RegisteredService> {
        self.find(service).filter(|s| s.is_enabled())
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(id: u64, pattern: &str) -> ServiceDefinition {
        ServiceDefinition {
            id,
            name: format!("svc-{id}"),
            pattern: pattern.to_string(),
            ..ServiceDefinition::catch_all()
        }
    }

    #[test]
    fn first_match_wins() {
        let registry = ServiceRegistry::new(vec![
            definition(1, r"^https://app\.example\.org/.*"),
            definition(2, "^https://.*"),
        ])
        .unwrap();
        let found = registry
            .find(&Service::new("https://app.example.org/home"))
            .unwrap();
        assert_eq!(found.id(), 1);
        let other = registry
            .find(&Service::new("https://other.example.org"))
            .unwrap();
        assert_eq!(other.id(), 2);
        assert!(registry.find(&Service::new("ftp://example.org")).is_none());
    }

    #[test]
    fn disabled_service_is_not_enabled() {
        let mut def = definition(1, "^https://.*");
        def.enabled = false;
        let registry = ServiceRegistry::new(vec![def]).unwrap();
        let svc = Service::new("https://app.example.org");
        assert!(registry.find(&svc).is_some());
        assert!(registry.find_enabled(&svc).is_none());
    }

    #[test]
    fn invalid_pattern_rejected() {
        let err = ServiceRegistry::new(vec![definition(7, "(")]).unwrap_err();
        assert!(err.to_string().starts_with("service 7"));
    }

    #[test]
    fn attribute_release() {
        let principal = Principal::new("casuser")
            .with_attribute("mail", "casuser@example.org")
            .with_attribute("memberOf", "staff");

        let mut def = definition(1, ".*");
        def.release = AttributeRelease::Allow(vec!["mail".to_string()]);
        let registry = ServiceRegistry::new(vec![def]).unwrap();
        let released = registry
            .find(&Service::new("https://a"))
            .unwrap()
            .release(&principal);
        assert_eq!(released.attributes.len(), 1);
        assert!(released.attributes.contains_key("mail"));

        let none = RegisteredService::compile(ServiceDefinition {
            release: AttributeRelease::None,
            ..definition(2, ".*")
        })
        .unwrap()
        .release(&principal);
        assert!(none.attributes.is_empty());
        assert_eq!(none.id, "casuser");
    }

    #[test]
    fn release_all_skips_unrenderable_names() {
        let principal = Principal::new("casuser")
            .with_attribute("mail", "casuser@example.org")
            .with_attribute("x>evil</cas:x><cas:user>admin</cas:user><cas:y", "1");
        let released = RegisteredService::compile(definition(1, ".*"))
            .unwrap()
            .release(&principal);
        assert_eq!(released.attributes.keys().collect::<Vec<_>>(), vec!["mail"]);
    }

    #[test]
    fn proxy_callback_must_be_https_and_match() {
        let registry = ServiceRegistry::new(vec![ServiceDefinition::catch_all()]).unwrap();
        let svc = registry.find(&Service::new("https://app.example.org")).unwrap();
        assert!(svc.accepts_proxy_callback(&Service::new("https://app.example.org/pgt")));
        assert!(!svc.accepts_proxy_callback(&Service::new("http://app.example.org/pgt")));

        let mut def = definition(1, ".*");
        def.proxy.allowed = false;
        let closed = RegisteredService::compile(def).unwrap();
        assert!(!closed.accepts_proxy_callback(&Service::new("https://app.example.org/pgt")));
    }

    #[test]
    fn definition_from_json_with_defaults() {
        let def: ServiceDefinition = serde_json::from_str(
            r#"{"id": 3, "name": "portal", "pattern": "^https://portal\\..*",
                "release": {"allow": ["mail"]}, "matching": "ignore-query"}"#,
        )
        .unwrap();
        assert!(def.enabled);
        assert!(def.sso_enabled);
        assert!(!def.proxy.allowed);
        assert_eq!(def.release, AttributeRelease::Allow(vec!["mail".to_string()]));
        assert_eq!(def.matching, ServiceMatching::IgnoreQuery);
    }
}
