//! Server configuration.
//!
//! Loaded from one JSON file. Every section and field has a default, so an
//! empty object (or no file at all) yields a working single-node server with
//! the demo account `casuser` / `Mellon`.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use cas_auth::{
    AcceptUsersHandler, KeyError, PasswordAccount, PasswordDigest, PrivateKey, PublicKey,
};
use cas_core::{Attributes, ExpirationPolicies};

use crate::services::{RegistryError, ServiceDefinition, ServiceRegistry};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("account '{0}': password_sha256 is not a 64 character hex digest")]
    InvalidDigest(String),

    #[error("account '{0}' has neither password nor password_sha256")]
    MissingPassword(String),

    #[error("trusted issuer '{issuer}': {source}")]
    InvalidIssuerKey {
        issuer: String,
        #[source]
        source: KeyError,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("signing key {path}: {source}")]
    InvalidSigningKey {
        path: PathBuf,
        #[source]
        source: KeyError,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CasConfig {
    pub server: ServerSettings,
    pub tickets: TicketSettings,
    pub throttle: ThrottleSettings,
    pub login_rate: LoginRateSettings,
    pub accounts: BTreeMap<String, AccountSettings>,
    pub token: TokenSettings,
    /// Issuer name to base64 Ed25519 public key.
    pub trusted_issuers: BTreeMap<String, String>,
    pub services: Vec<ServiceDefinition>,
    pub actuator: ActuatorSettings,
    pub protocol: ProtocolSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Public name; also the audience of delegated assertions.
    pub name: String,
    /// Path under which every endpoint is mounted, e.g. `/cas`.
    pub prefix: String,
    /// Suffix of ticket ids; identifies the issuing node.
    pub node_id: Option<String>,
    pub event_capacity: usize,
    /// Mark the TGC cookie `Secure`.
    pub secure_cookie: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            name: "https://cas.example.org".to_string(),
            prefix: String::new(),
            node_id: None,
            event_capacity: crate::events::DEFAULT_CAPACITY,
            secure_cookie: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TicketSettings {
    pub policies: ExpirationPolicies,
    pub cleaner_interval_secs: u64,
}

impl Default for TicketSettings {
    fn default() -> Self {
        Self {
            policies: ExpirationPolicies::default(),
            cleaner_interval_secs: 120,
        }
    }
}

impl TicketSettings {
    pub fn cleaner_interval(&self) -> Duration {
        Duration::from_secs(self.cleaner_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleSettings {
    /// Failures within the window before attempts are refused; 0 disables.
    pub threshold: usize,
    pub window_secs: u64,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            threshold: 5,
            window_secs: 300,
        }
    }
}

impl ThrottleSettings {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.window_secs).unwrap_or(i64::MAX / 1000))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginRateSettings {
    pub per_second: u32,
    pub burst: u32,
}

impl Default for LoginRateSettings {
    fn default() -> Self {
        Self {
            per_second: 5,
            burst: 20,
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountSettings {
    /// Plain-text password, for demos and tests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Hex SHA-256 of the password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_sha256: Option<String>,
    pub disabled: bool,
    pub attributes: Attributes,
}

impl std::fmt::Debug for AccountSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountSettings")
            .field("password", &self.password.as_ref().map(|_| "***REDACTED***"))
            .field("password_sha256", &self.password_sha256)
            .field("disabled", &self.disabled)
            .field("attributes", &self.attributes)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenSettings {
    /// Base64 Ed25519 signing key for principal tokens. Generated on first use.
    pub key_path: Option<PathBuf>,
    pub default_validity_secs: u64,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            key_path: None,
            default_validity_secs: 3600,
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorSettings {
    /// Bearer token for `/actuator/*`; open when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
}

impl std::fmt::Debug for ActuatorSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActuatorSettings")
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "***REDACTED***"))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolSettings {
    /// Include attributes in CAS 2.0 `/serviceValidate` responses.
    pub v2_attributes: bool,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self { v2_attributes: true }
    }
}

impl Default for CasConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            tickets: TicketSettings::default(),
            throttle: ThrottleSettings::default(),
            login_rate: LoginRateSettings::default(),
            accounts: BTreeMap::from([(
                "casuser".to_string(),
                AccountSettings {
                    password: Some("Mellon".to_string()),
                    ..AccountSettings::default()
                },
            )]),
            token: TokenSettings::default(),
            trusted_issuers: BTreeMap::new(),
            services: vec![ServiceDefinition::catch_all()],
            actuator: ActuatorSettings::default(),
            protocol: ProtocolSettings::default(),
        }
    }
}

impl CasConfig {
    /// Read `path`, or use defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn password_handler(&self) -> Result<AcceptUsersHandler, ConfigError> {
        let mut handler = AcceptUsersHandler::new();
        for (username, settings) in &self.accounts {
            let digest = match (&settings.password_sha256, &settings.password) {
                (Some(hex), _) => PasswordDigest::from_hex(hex)
                    .ok_or_else(|| ConfigError::InvalidDigest(username.clone()))?,
                (None, Some(password)) => PasswordDigest::of(password),
                (None, None) => return Err(ConfigError::MissingPassword(username.clone())),
            };
            let account = PasswordAccount {
                digest,
                disabled: settings.disabled,
                attributes: settings.attributes.clone(),
            };
            handler = handler.with_account(username.clone(), account);
        }
        Ok(handler)
    }

    pub fn issuer_keys(&self) -> Result<HashMap<String, PublicKey>, ConfigError> {
        self.trusted_issuers
            .iter()
            .map(|(issuer, key)| {
                PublicKey::from_base64(key)
                    .map(|key| (issuer.clone(), key))
                    .map_err(|source| ConfigError::InvalidIssuerKey {
                        issuer: issuer.clone(),
                        source,
                    })
            })
            .collect()
    }

    pub fn service_registry(&self) -> Result<ServiceRegistry, ConfigError> {
        Ok(ServiceRegistry::new(self.services.clone())?)
    }

    /// Configured signing key path, or `<data dir>/cas/token.key`.
    pub fn token_key_path(&self) -> PathBuf {
        self.token
            .key_path
            .clone()
            .unwrap_or_else(|| data_dir().join("token.key"))
    }
}

/// `dirs::data_local_dir()/cas`, or `./cas` when there is none.
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cas")
}

/// Load the signing key at `path`, creating it (mode 0600) when missing.
pub fn load_or_create_signing_key(path: &Path) -> Result<PrivateKey, ConfigError> {
    let io = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    if path.exists() {
        let encoded = std::fs::read_to_string(path).map_err(io)?;
        return PrivateKey::from_base64(encoded.trim()).map_err(|source| {
            ConfigError::InvalidSigningKey {
                path: path.to_path_buf(),
                source,
            }
        });
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io)?;
    }
    let key = PrivateKey::generate();
    std::fs::write(path, key.to_base64().as_bytes()).map_err(io)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(io)?;
    }
    Ok(key)
}

/// Parse a duration like "90s", "5m", "8h" or "1d" into seconds. A bare
/// number is seconds.
pub fn parse_duration(s: &str) -> Option<u64> {
    let s = s.trim();
    let (digits, unit) = match s.char_indices().last()? {
        (i, 's') => (&s[..i], 1),
        (i, 'm') => (&s[..i], 60),
        (i, 'h') => (&s[..i], 3600),
        (i, 'd') => (&s[..i], 86_400),
        _ => (s, 1),
    };
    let n: u64 = digits.parse().ok()?;
    n.checked_mul(unit).filter(|secs| *secs > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_gets_defaults() {
        let config: CasConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.tickets.cleaner_interval_secs, 120);
        assert_eq!(config.throttle.threshold, 5);
        assert!(config.accounts.contains_key("casuser"));
        assert_eq!(config.services.len(), 1);
        assert!(config.protocol.v2_attributes);
        assert_eq!(config.tickets.policies, ExpirationPolicies::default());
    }

    #[test]
    fn sections_override_defaults() {
        let config: CasConfig = serde_json::from_str(
            r#"{
                "server": {"name": "https://sso.example.edu", "prefix": "/cas", "node_id": "n1"},
                "tickets": {"policies": {"service": {"time_to_live_secs": 30, "max_uses": 2}}},
                "accounts": {"alice": {"password": "pw", "attributes": {"mail": ["a@x"]}}},
                "actuator": {"bearer_token": "s3cret"}
            }"#,
        )
        .unwrap();
        assert_eq!(config.server.prefix, "/cas");
        assert_eq!(config.server.node_id.as_deref(), Some("n1"));
        assert_eq!(config.tickets.policies.service.time_to_live_secs, Some(30));
        assert_eq!(config.tickets.policies.service.max_uses, Some(2));
        assert!(!config.accounts.contains_key("casuser"));
        assert_eq!(config.password_handler().unwrap().len(), 1);
        assert!(!format!("{:?}", config.actuator).contains("s3cret"));
    }

    #[test]
    fn bad_digest_is_rejected() {
        let mut config = CasConfig::default();
        config.accounts.insert(
            "bob".to_string(),
            AccountSettings {
                password_sha256: Some("abc".to_string()),
                ..AccountSettings::default()
            },
        );
        assert!(matches!(
            config.password_handler(),
            Err(ConfigError::InvalidDigest(user)) if user == "bob"
        ));
    }

    #[test]
    fn invalid_service_pattern_is_a_config_error() {
        let mut config = CasConfig::default();
        config.services[0].pattern = "(".to_string();
        assert!(matches!(config.service_registry(), Err(ConfigError::Registry(_))));
    }

    #[test]
    fn signing_key_is_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("token.key");
        let first = load_or_create_signing_key(&path).unwrap();
        let second = load_or_create_signing_key(&path).unwrap();
        assert_eq!(first.public_key().to_bytes(), second.public_key().to_bytes());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("90"), Some(90));
        assert_eq!(parse_duration("5m"), Some(300));
        assert_eq!(parse_duration("8h"), Some(28_800));
        assert_eq!(parse_duration("1d"), Some(86_400));
        assert_eq!(parse_duration("0s"), None);
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration(""), None);
    }
}
