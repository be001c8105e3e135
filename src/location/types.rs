//! Core types for the location subsystem.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Loopback sentinel returned when no provider yields a usable address.
pub const LOOPBACK_SENTINEL: &str = "127.0.0.1";

/// Sentinel returned when IP discovery fails for an unexpected reason.
pub const UNKNOWN_SENTINEL: &str = "Unknown";

/// Addresses that can never be geolocated explicitly.
pub const LOCAL_SENTINELS: &[&str] = &[LOOPBACK_SENTINEL, "localhost", UNKNOWN_SENTINEL];

/// True if `ip` is one of the local/invalid sentinels.
pub fn is_sentinel(ip: &str) -> bool {
    LOCAL_SENTINELS.contains(&ip.trim())
}

/// Outcome of a single geolocation attempt.
///
/// On success the three informational fields are always present (possibly
/// empty strings) and `error` is `None`. On failure the location fields are
/// `None` and `error` describes what went wrong.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoResult {
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    /// IP reported by the provider in auto-detect mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_ip: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GeoResult {
    /// A successful lookup; the location fields are trimmed.
    pub fn found(city: &str, region: &str, country: &str, resolved_ip: Option<String>) -> Self {
        Self {
            city: Some(city.trim().to_string()),
            region: Some(region.trim().to_string()),
            country: Some(country.trim().to_string()),
            resolved_ip,
            success: true,
            error: None,
        }
    }

    /// A failed lookup carrying the error's message.
    pub fn failed(err: &LocationError) -> Self {
        Self {
            city: None,
            region: None,
            country: None,
            resolved_ip: None,
            success: false,
            error: Some(err.to_string()),
        }
    }

    /// One-line human summary, e.g. "Palmas, Tocantins, Brazil".
    pub fn display_line(&self) -> String {
        if !self.success {
            return format!("unresolved ({})", self.error.as_deref().unwrap_or("unknown error"));
        }
        [&self.city, &self.region, &self.country]
            .iter()
            .filter_map(|f| f.as_deref())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Snapshot of who is asking. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientInfo {
    pub ip: String,
    pub user_agent: String,
    pub session_id: String,
    pub captured_at: DateTime<Utc>,
}

/// Failure kinds produced while talking to providers.
///
/// None of these escape the resolvers: they end up either in
/// [`GeoResult::error`] or as a sentinel address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocationError {
    #[error("request timed out")]
    Timeout,
    #[error("{0}")]
    Transport(String),
    #[error("HTTP error {0}")]
    HttpStatus(u16),
    #[error("{0}")]
    ProviderFailure(String),
    #[error("local or invalid IP")]
    LocalOrInvalidAddress,
    #[error("no provider returned an acceptable result")]
    NotFound,
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
    #[error("invalid provider configuration: {0}")]
    InvalidConfig(String),
}
