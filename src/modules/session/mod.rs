//! Cookie and authentication state with an explicit expiry.
//!
//! A cache is valid strictly before `expires_at`; once invalid it is never
//! reused and the client authenticates again.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::core::TransportResponse;

fn chrono_duration(duration: Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or_else(|_| ChronoDuration::days(365 * 100))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCache {
    pub cookies: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub user_agent: String,
    pub is_authenticated: bool,
}

impl SessionCache {
    /// Anonymous session valid for `ttl` from now.
    pub fn new(user_agent: impl Into<String>, ttl: Duration) -> Self {
        let created_at = Utc::now();
        Self {
            cookies: BTreeMap::new(),
            created_at,
            expires_at: created_at
                .checked_add_signed(chrono_duration(ttl))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            user_agent: user_agent.into(),
            is_authenticated: false,
        }
    }

    /// Fresh authenticated session carrying `cookies`.
    pub fn authenticated(
        user_agent: impl Into<String>,
        ttl: Duration,
        cookies: BTreeMap<String, String>,
    ) -> Self {
        let mut session = Self::new(user_agent, ttl);
        session.cookies = cookies;
        session.is_authenticated = true;
        session
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Valid and authenticated.
    pub fn is_usable(&self) -> bool {
        self.is_authenticated && self.is_valid()
    }

    /// Forces expiry; the next operation must authenticate again.
    pub fn invalidate(&mut self) {
        self.is_authenticated = false;
        self.cookies.clear();
        self.expires_at = Utc::now().min(self.expires_at);
    }

    pub fn set_cookie(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.cookies.insert(name.into(), value.into());
    }

    /// Merges every `Set-Cookie` of `response`; returns the names that were
    /// set. Empty values delete the cookie.
    pub fn absorb_cookies(&mut self, response: &TransportResponse) -> Vec<String> {
        let mut names = Vec::new();
        for (name, value) in response.set_cookies() {
            if value.is_empty() || value.eq_ignore_ascii_case("deleted") {
                self.cookies.remove(&name);
            } else {
                self.cookies.insert(name.clone(), value);
                names.push(name);
            }
        }
        names
    }

    /// `Cookie` header value, or `None` without cookies.
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}
