//! Location resolver: orchestrates the fallback chain.
//!
//! IP flow:  echo providers (in order) → geolocation auto-detect → "127.0.0.1"
//! Geo flow: explicit IP → provider; sentinel/absent IP → auto-detect or short-circuit

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::providers::{
    self, GeoEndpoint, GeoRecord, HttpTransport, ProviderClient, ProviderEndpoint, Transport,
};
use super::types::{is_sentinel, GeoResult, LocationError, LOOPBACK_SENTINEL, UNKNOWN_SENTINEL};

/// Static provider configuration for a resolver.
#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub echo: Vec<ProviderEndpoint>,
    pub geo: GeoEndpoint,
    pub echo_timeout: Duration,
    pub geo_timeout: Duration,
    /// Also reject 172.16/12, link-local and IPv6 private ranges.
    pub strict_private_ranges: bool,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            echo: providers::default_echo_endpoints(),
            geo: GeoEndpoint::default(),
            echo_timeout: providers::DEFAULT_ECHO_TIMEOUT,
            geo_timeout: providers::DEFAULT_GEO_TIMEOUT,
            strict_private_ranges: false,
        }
    }
}

impl ResolverSettings {
    pub fn validate(&self) -> Result<(), LocationError> {
        for ep in &self.echo {
            ep.validate()?;
        }
        self.geo.validate()
    }
}

/// Outcome of walking the IP provider chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovery {
    /// An echo provider returned an acceptable address.
    Echo(String),
    /// Geolocation auto-detect reported an acceptable address; `geo` is the
    /// location it returned in the same response.
    AutoDetected { ip: String, geo: GeoResult },
    /// No acceptable address. Holds the auto-detect outcome when that
    /// provider was called.
    Exhausted(Option<GeoResult>),
}

/// Discovers the caller's public IP and geolocates addresses.
///
/// Holds no per-request state; one instance can serve any number of
/// sequential or concurrent resolutions.
#[derive(Clone)]
pub struct LocationResolver {
    transport: Arc<dyn Transport>,
    settings: ResolverSettings,
}

impl LocationResolver {
    /// A resolver using the default providers over HTTP.
    pub fn new() -> Self {
        Self::with_transport(Arc::new(HttpTransport::new()), ResolverSettings::default())
    }

    pub fn with_transport(transport: Arc<dyn Transport>, settings: ResolverSettings) -> Self {
        Self { transport, settings }
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    /// Best-effort public IP of the caller. Never fails.
    ///
    /// Returns "127.0.0.1" when no provider produced an acceptable address
    /// and "Unknown" if discovery could not run at all.
    pub fn resolve_client_ip(&self) -> String {
        match self.discover_ip() {
            Ok(ip) => ip,
            Err(LocationError::NotFound) => {
                warn!("no provider returned a public IP, using {}", LOOPBACK_SENTINEL);
                LOOPBACK_SENTINEL.to_string()
            }
            Err(e) => {
                warn!(error = %e, "IP discovery aborted");
                UNKNOWN_SENTINEL.to_string()
            }
        }
    }

    /// Walk the provider chain; first acceptable address wins.
    pub fn discover_ip(&self) -> Result<String, LocationError> {
        match self.discover()? {
            Discovery::Echo(ip) | Discovery::AutoDetected { ip, .. } => Ok(ip),
            Discovery::Exhausted(_) => Err(LocationError::NotFound),
        }
    }

    /// Walk the provider chain, keeping what the auto-detect call returned
    /// so the caller never has to ask the geolocation provider again.
    ///
    /// Each provider is called at most once. Errors only on invalid settings.
    pub fn discover(&self) -> Result<Discovery, LocationError> {
        self.settings.validate()?;

        let echo = ProviderClient::new(self.transport.as_ref(), self.settings.echo_timeout);
        for endpoint in &self.settings.echo {
            match echo.fetch(endpoint).and_then(|ip| self.accept(ip)) {
                Ok(ip) => {
                    debug!(provider = %endpoint.name, ip = %ip, "public IP discovered");
                    return Ok(Discovery::Echo(ip));
                }
                Err(e) => warn!(provider = %endpoint.name, error = %e, "IP provider skipped"),
            }
        }

        if !self.settings.geo.auto_detect {
            return Ok(Discovery::Exhausted(None));
        }

        let geo = ProviderClient::new(self.transport.as_ref(), self.settings.geo_timeout);
        let attempt = geo.fetch_geo(&self.settings.geo, None);
        let reported = attempt
            .as_ref()
            .map_err(LocationError::clone)
            .and_then(|rec| rec.ip.clone().ok_or(LocationError::InvalidResponse("no IP reported".into())))
            .and_then(|ip| self.accept(ip));
        let result = self.geo_result(attempt, None);

        match reported {
            Ok(ip) => {
                debug!(provider = %self.settings.geo.name, ip = %ip, "public IP discovered");
                Ok(Discovery::AutoDetected { ip, geo: result })
            }
            Err(e) => {
                warn!(provider = %self.settings.geo.name, error = %e, "IP auto-detect failed");
                Ok(Discovery::Exhausted(Some(result)))
            }
        }
    }

    /// Discover the caller and geolocate it in one pass. Never fails.
    ///
    /// Returns the address to report (a sentinel when discovery failed) and
    /// the geolocation outcome. The geolocation provider is queried at most
    /// once: an auto-detect answer from discovery, successful or not, is
    /// reused as the result.
    pub fn locate_client(&self) -> (String, GeoResult) {
        match self.discover() {
            Ok(Discovery::Echo(ip)) => {
                let geo = self.geolocate(Some(&ip));
                (ip, geo)
            }
            Ok(Discovery::AutoDetected { ip, geo }) => (ip, geo),
            Ok(Discovery::Exhausted(attempt)) => {
                warn!("no provider returned a public IP, using {}", LOOPBACK_SENTINEL);
                let geo = attempt.unwrap_or_else(|| self.geolocate(Some(LOOPBACK_SENTINEL)));
                (LOOPBACK_SENTINEL.to_string(), geo)
            }
            Err(e) => {
                warn!(error = %e, "IP discovery aborted");
                (UNKNOWN_SENTINEL.to_string(), GeoResult::failed(&e))
            }
        }
    }

    /// Geolocate `ip`, or let the provider detect the caller. Never fails.
    pub fn geolocate(&self, ip: Option<&str>) -> GeoResult {
        let explicit = ip.map(str::trim).filter(|ip| !ip.is_empty() && !is_sentinel(ip));

        if explicit.is_none() && !self.settings.geo.auto_detect {
            debug!(ip = ?ip, "skipping geolocation of local or invalid IP");
            return GeoResult::failed(&LocationError::LocalOrInvalidAddress);
        }

        let client = ProviderClient::new(self.transport.as_ref(), self.settings.geo_timeout);
        self.geo_result(client.fetch_geo(&self.settings.geo, explicit), explicit)
    }

    fn geo_result(&self, attempt: Result<GeoRecord, LocationError>, explicit: Option<&str>) -> GeoResult {
        match attempt {
            Ok(rec) => {
                let resolved_ip = if explicit.is_none() { rec.ip } else { None };
                let result = GeoResult::found(&rec.city, &rec.region, &rec.country, resolved_ip);
                debug!(ip = ?explicit, location = %result.display_line(), "geolocated");
                result
            }
            Err(e) => {
                warn!(ip = ?explicit, error = %e, "geolocation failed");
                GeoResult::failed(&e)
            }
        }
    }

    fn accept(&self, ip: String) -> Result<String, LocationError> {
        if is_acceptable_ip(&ip, self.settings.strict_private_ranges) {
            Ok(ip)
        } else {
            Err(LocationError::LocalOrInvalidAddress)
        }
    }
}

impl Default for LocationResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether an echoed address is usable as the caller's public IP.
///
/// Without `strict`, only empty values, the loopback sentinel, and the
/// `10.` / `192.168.` prefixes are rejected.
pub fn is_acceptable_ip(ip: &str, strict: bool) -> bool {
    let ip = ip.trim();
    if ip.is_empty() || ip == LOOPBACK_SENTINEL || ip.starts_with("192.168.") || ip.starts_with("10.") {
        return false;
    }
    if strict {
        if let Ok(addr) = ip.parse::<IpAddr>() {
            return !is_non_public(&addr);
        }
    }
    true
}

fn is_non_public(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80
        }
    }
}
