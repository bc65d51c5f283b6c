//! Ticket-granting cookie (TGC): carries the TGT id between logins.

use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue};

use cas_core::{TicketId, TicketKind};

pub const TGC_NAME: &str = "TGC";

#[derive(Debug, Clone)]
pub struct CookieSettings {
    /// Cookie path; the mount prefix, or `/`.
    pub path: String,
    pub secure: bool,
}

impl CookieSettings {
    pub fn new(prefix: &str, secure: bool) -> Self {
        let path = if prefix.is_empty() { "/" } else { prefix };
        Self {
            path: path.to_string(),
            secure,
        }
    }

    /// Session cookie: no `Max-Age`, the TGT's own policy decides expiry.
    pub fn issue(&self, tgt: &TicketId) -> Option<HeaderValue> {
        HeaderValue::from_str(&format!(
            "{TGC_NAME}={tgt}; HttpOnly{}; SameSite=Lax; Path={}",
            self.secure_flag(),
            self.path
        ))
        .ok()
    }

    pub fn clear(&self) -> Option<HeaderValue> {
        HeaderValue::from_str(&format!(
            "{TGC_NAME}=; HttpOnly{}; SameSite=Lax; Path={}; Max-Age=0",
            self.secure_flag(),
            self.path
        ))
        .ok()
    }

    fn secure_flag(&self) -> &'static str {
        if self.secure {
            "; Secure"
        } else {
            ""
        }
    }
}

pub fn set(headers: &mut HeaderMap, value: Option<HeaderValue>) {
    if let Some(value) = value {
        headers.append(SET_COOKIE, value);
    }
}

/// TGT id from the request's `TGC` cookie. Values that are not TGT ids are
/// ignored.
pub fn read(headers: &HeaderMap) -> Option<TicketId> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|header| header.split(';'))
        .filter_map(|pair| pair.trim().strip_prefix(TGC_NAME)?.strip_prefix('='))
        .map(|value| TicketId::new(value.trim()))
        .find(|id| id.kind() == Some(TicketKind::TicketGranting))
}
