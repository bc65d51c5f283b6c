//! Authenticated identities and their attributes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Multi-valued attribute map, ordered for deterministic output.
pub type Attributes = BTreeMap<String, Vec<String>>;

/// An authenticated identity plus the attributes released about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    #[serde(default)]
    pub attributes: Attributes,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: Attributes::new(),
        }
    }

    /// Add a value to an attribute (builder pattern).
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    /// Case-insensitive comparison of principal ids.
    pub fn same_id(&self, id: &str) -> bool {
        self.id.eq_ignore_ascii_case(id)
    }

    /// Copy of this principal with only the named attributes kept.
    ///
    /// Attributes whose names are not valid XML names are never released,
    /// even when listed.
    pub fn with_released_attributes(&self, allowed: &[String]) -> Principal {
        Principal {
            id: self.id.clone(),
            attributes: releasable(&self.attributes, |name| allowed.iter().any(|a| a == name)),
        }
    }

    /// Copy of this principal with every attribute that has a valid XML name.
    pub fn with_releasable_attributes(&self) -> Principal {
        Principal {
            id: self.id.clone(),
            attributes: releasable(&self.attributes, |_| true),
        }
    }
}

/// Attributes that pass `keep` and can be rendered as `cas:<name>` elements.
pub fn releasable(attributes: &Attributes, keep: impl Fn(&str) -> bool) -> Attributes {
    attributes
        .iter()
        .filter(|(name, _)| is_xml_name(name) && keep(name))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Whether `name` is an XML NCName (an element name without a prefix).
pub fn is_xml_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '\u{b7}'))
}

/// Kind of credential that produced an authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    /// Username and password.
    Password,
    /// Signed principal token.
    Token,
    /// Assertion from a trusted external identity provider.
    DelegatedAssertion,
}

impl CredentialKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Password => "UsernamePasswordCredential",
            Self::Token => "TokenCredential",
            Self::DelegatedAssertion => "DelegatedAssertionCredential",
        }
    }
}

/// Result of a successful primary authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authentication {
    pub principal: Principal,
    pub authenticated_at: DateTime<Utc>,
    pub credential_kind: CredentialKind,
    /// Name of the handler that accepted the credential.
    pub handler: String,
    /// Authentication metadata (not principal attributes).
    #[serde(default)]
    pub attributes: Attributes,
}

impl Authentication {
    pub fn new(
        principal: Principal,
        authenticated_at: DateTime<Utc>,
        credential_kind: CredentialKind,
        handler: impl Into<String>,
    ) -> Self {
        let handler = handler.into();
        let mut attributes = Attributes::new();
        attributes.insert(
            "credentialType".to_string(),
            vec![credential_kind.as_str().to_string()],
        );
        attributes.insert(
            "successfulAuthenticationHandlers".to_string(),
            vec![handler.clone()],
        );
        Self {
            principal,
            authenticated_at,
            credential_kind,
            handler,
            attributes,
        }
    }
}
