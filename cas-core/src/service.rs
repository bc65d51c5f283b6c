//! Relying services identified by URL.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A service that requests or validates tickets, identified by its URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Service(pub String);

impl Service {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The URL without query string or fragment.
    pub fn without_query(&self) -> &str {
        let end = self
            .0
            .find(|c| c == '?' || c == '#')
            .unwrap_or(self.0.len());
        &self.0[..end]
    }

    /// Returns true if the URL uses https.
    pub fn is_https(&self) -> bool {
        self.0
            .get(..8)
            .is_some_and(|scheme| scheme.eq_ignore_ascii_case("https://"))
    }

    /// Check whether `presented` identifies this service under `matching`.
    pub fn matches(&self, presented: &Service, matching: ServiceMatching) -> bool {
        match matching {
            ServiceMatching::Exact => self.0 == presented.0,
            ServiceMatching::IgnoreQuery => self.without_query() == presented.without_query(),
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a presented service is compared with the one a ticket was issued for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceMatching {
    /// Byte-for-byte equality.
    #[default]
    Exact,
    /// Equality after dropping query string and fragment.
    IgnoreQuery,
}
