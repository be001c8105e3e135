//! Provider clients: IP-echo services and the geolocation API.
//!
//! A provider call is a single GET with a short timeout. Failures are
//! classified into [`LocationError`]; retry and fallback belong to the
//! resolver, never to the client.

use std::error::Error as _;
use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use super::types::LocationError;

pub const DEFAULT_ECHO_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_GEO_TIMEOUT: Duration = Duration::from_secs(5);

const USER_AGENT: &str = concat!("citygate/", env!("CARGO_PKG_VERSION"));

// ─── Transport ──────────────────────────────────────────────────

/// Outbound GET. Returns the body of a 2xx response.
pub trait Transport: Send + Sync {
    fn get(&self, url: &str, timeout: Duration) -> Result<String, LocationError>;
}

/// Blocking HTTP transport backed by a shared `ureq` agent.
pub struct HttpTransport {
    agent: ureq::Agent,
}

impl HttpTransport {
    pub fn new() -> Self {
        let agent = ureq::AgentBuilder::new()
            .user_agent(USER_AGENT)
            .build();
        Self { agent }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str, timeout: Duration) -> Result<String, LocationError> {
        let response = self
            .agent
            .get(url)
            .timeout(timeout)
            .call()
            .map_err(classify_ureq_error)?;

        response.into_string().map_err(|e| {
            if is_timeout_io(&e) {
                LocationError::Timeout
            } else {
                LocationError::Transport(e.to_string())
            }
        })
    }
}

fn classify_ureq_error(err: ureq::Error) -> LocationError {
    match err {
        ureq::Error::Status(code, _) => LocationError::HttpStatus(code),
        ureq::Error::Transport(t) => {
            let mut source = t.source();
            while let Some(e) = source {
                if let Some(io_err) = e.downcast_ref::<io::Error>() {
                    if is_timeout_io(io_err) {
                        return LocationError::Timeout;
                    }
                }
                source = e.source();
            }
            let msg = t.to_string();
            if msg.contains("timed out") {
                LocationError::Timeout
            } else {
                LocationError::Transport(msg)
            }
        }
    }
}

fn is_timeout_io(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}

// ─── Endpoint descriptors ───────────────────────────────────────

/// How an IP-echo provider shapes its answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    /// The whole body, trimmed, is the value.
    RawText,
    /// A JSON object; the value lives under `field`.
    JsonField,
}

/// A statically configured IP-echo provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEndpoint {
    pub name: String,
    pub url: String,
    pub format: ResponseFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ProviderEndpoint {
    pub fn raw_text(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            format: ResponseFormat::RawText,
            field: None,
        }
    }

    pub fn json_field(name: &str, url: &str, field: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            format: ResponseFormat::JsonField,
            field: Some(field.to_string()),
        }
    }

    pub fn validate(&self) -> Result<(), LocationError> {
        if self.url.trim().is_empty() {
            return Err(LocationError::InvalidConfig(format!("provider '{}' has no url", self.name)));
        }
        if self.format == ResponseFormat::JsonField
            && self.field.as_deref().map_or(true, |f| f.trim().is_empty())
        {
            return Err(LocationError::InvalidConfig(format!(
                "provider '{}' uses json_field but names no field",
                self.name
            )));
        }
        Ok(())
    }

    /// Pull the value out of a response body.
    ///
    /// Proxied answers such as httpbin's `"client, proxy"` are cut to their
    /// first entry, which is the originating address.
    pub fn extract(&self, body: &str) -> Result<String, LocationError> {
        let value = match self.format {
            ResponseFormat::RawText => body.to_string(),
            ResponseFormat::JsonField => {
                let field = self.field.as_deref().unwrap_or_default();
                let json: Value = serde_json::from_str(body)
                    .map_err(|e| LocationError::InvalidResponse(e.to_string()))?;
                json_string(&json, field)
                    .ok_or_else(|| LocationError::InvalidResponse(format!("missing field '{}'", field)))?
            }
        };
        Ok(value.split(',').next().unwrap_or_default().trim().to_string())
    }
}

/// Default IP-echo chain, in priority order.
pub fn default_echo_endpoints() -> Vec<ProviderEndpoint> {
    vec![
        ProviderEndpoint::json_field("ipify", "https://api.ipify.org?format=json", "ip"),
        ProviderEndpoint::raw_text("icanhazip", "https://icanhazip.com"),
        ProviderEndpoint::json_field("httpbin", "https://httpbin.org/ip", "origin"),
    ]
}

/// JSON keys of the geolocation record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoFields {
    pub status: String,
    pub message: String,
    pub city: String,
    pub region: String,
    pub country: String,
    pub ip: String,
}

impl Default for GeoFields {
    fn default() -> Self {
        Self {
            status: "status".into(),
            message: "message".into(),
            city: "city".into(),
            region: "regionName".into(),
            country: "country".into(),
            ip: "query".into(),
        }
    }
}

/// The geolocation provider.
///
/// `url` is a template; `{ip}` is replaced by the URL-encoded address, or
/// by nothing in auto-detect mode so the provider uses the caller's IP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoEndpoint {
    pub name: String,
    pub url: String,
    pub success_status: String,
    /// Whether the provider may be asked to detect the caller itself.
    pub auto_detect: bool,
    pub fields: GeoFields,
}

impl Default for GeoEndpoint {
    fn default() -> Self {
        Self {
            name: "ip-api".into(),
            url: "http://ip-api.com/json/{ip}?fields=status,message,city,regionName,country,query".into(),
            success_status: "success".into(),
            auto_detect: true,
            fields: GeoFields::default(),
        }
    }
}

impl GeoEndpoint {
    pub fn validate(&self) -> Result<(), LocationError> {
        if !self.url.contains("{ip}") {
            return Err(LocationError::InvalidConfig(format!(
                "geolocation provider '{}' url lacks an {{ip}} placeholder",
                self.name
            )));
        }
        Ok(())
    }

    pub fn url_for(&self, ip: Option<&str>) -> String {
        match ip {
            Some(ip) => self.url.replace("{ip}", &urlencoding::encode(ip.trim())),
            None => self.url.replace("{ip}", ""),
        }
    }

    /// Parse a response body into a record, or the provider's failure.
    pub fn parse(&self, body: &str) -> Result<GeoRecord, LocationError> {
        let json: Value =
            serde_json::from_str(body).map_err(|e| LocationError::InvalidResponse(e.to_string()))?;

        let status = json_string(&json, &self.fields.status).unwrap_or_default();
        if status != self.success_status {
            let message = json_string(&json, &self.fields.message)
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| "provider reported failure".to_string());
            return Err(LocationError::ProviderFailure(message));
        }

        Ok(GeoRecord {
            city: json_string(&json, &self.fields.city).unwrap_or_default().trim().to_string(),
            region: json_string(&json, &self.fields.region).unwrap_or_default().trim().to_string(),
            country: json_string(&json, &self.fields.country).unwrap_or_default().trim().to_string(),
            ip: json_string(&json, &self.fields.ip)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        })
    }
}

/// Fields extracted from a successful geolocation response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoRecord {
    pub city: String,
    pub region: String,
    pub country: String,
    pub ip: Option<String>,
}

fn json_string(json: &Value, key: &str) -> Option<String> {
    match json.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ─── Client ─────────────────────────────────────────────────────

/// One outbound call to one endpoint, no retries.
pub struct ProviderClient<'a> {
    transport: &'a dyn Transport,
    timeout: Duration,
}

impl<'a> ProviderClient<'a> {
    pub fn new(transport: &'a dyn Transport, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub fn fetch(&self, endpoint: &ProviderEndpoint) -> Result<String, LocationError> {
        trace!(provider = %endpoint.name, url = %endpoint.url, "fetching");
        let body = self.transport.get(&endpoint.url, self.timeout)?;
        endpoint.extract(&body)
    }

    pub fn fetch_geo(&self, endpoint: &GeoEndpoint, ip: Option<&str>) -> Result<GeoRecord, LocationError> {
        let url = endpoint.url_for(ip);
        trace!(provider = %endpoint.name, url = %url, "fetching");
        let body = self.transport.get(&url, self.timeout)?;
        endpoint.parse(&body)
    }
}
