use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct Subscription {
    pub id: String,
    pub hub: String,
    pub topic: String,
    pub callback_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Subscription {
    /// A hub has answered at least one verification challenge for this row.
    pub fn is_verified(&self) -> bool {
        self.expires_at.is_some()
    }

    /// Whether a refresh pass should renew this lease now.
    ///
    /// Rows that were never verified are waiting on their first handshake
    /// and are never renewed proactively.
    pub fn needs_renewal(
        &self,
        now: DateTime<Utc>,
        interval: TimeDelta,
        expected_callback_url: &str,
        force_update: bool,
    ) -> bool {
        let expires_at = match self.expires_at {
            Some(expires_at) => expires_at,
            None => return false,
        };

        force_update
            || expires_at - now < interval
            || self.callback_url != expected_callback_url
    }
}

pub fn make_callback_url(base_url: &str, id: &str) -> String {
    format!("{}/{}", base_url, id)
}

/// Outcome of adding a (hub, topic) pair to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Added {
    pub id: String,
    pub callback_url: String,
    /// Set only when an existing row was rewritten to a new callback url.
    pub previous_callback_url: Option<String>,
    pub created: bool,
}

impl Added {
    /// The hub has to hear about this row again.
    pub fn needs_hub_request(&self) -> bool {
        self.created || self.previous_callback_url.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Subscribe,
    Unsubscribe,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Subscribe => "subscribe",
            Mode::Unsubscribe => "unsubscribe",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<Mode> for String {
    fn from(value: Mode) -> Self {
        value.as_str().to_string()
    }
}
