//! Allow-list matching and the access decision pipeline.
//!
//! Session city → allow-list (no network)
//! Session IP   → geolocate → allow-list
//! Nothing      → discover IP → geolocate → allow-list
//!                (an auto-detect answer from discovery is the geolocation)

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::location::types::UNKNOWN_SENTINEL;
use crate::location::{normalize_city_name, ClientInfo, GeoResult, LocationResolver};

const UNKNOWN_USER_AGENT: &str = "Unknown Browser";
const UNKNOWN_SESSION: &str = "unknown";

/// True iff `city` normalizes to the same form as some entry of `allow_list`.
pub fn is_allowed<S: AsRef<str>>(city: Option<&str>, allow_list: &[S]) -> bool {
    let city = match city.map(normalize_city_name) {
        Some(c) if !c.is_empty() => c,
        _ => return false,
    };
    allow_list
        .iter()
        .any(|entry| normalize_city_name(entry.as_ref()) == city)
}

/// The configured set of permitted cities, normalized once.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    entries: Vec<String>,
    normalized: Vec<String>,
}

impl AllowList {
    pub fn new<I, S>(cities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries: Vec<String> = cities.into_iter().map(Into::into).collect();
        let normalized = entries.iter().map(|c| normalize_city_name(c)).collect();
        Self { entries, normalized }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn normalized(&self) -> &[String] {
        &self.normalized
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, city: Option<&str>) -> bool {
        let city = match city.map(normalize_city_name) {
            Some(c) if !c.is_empty() => c,
            _ => return false,
        };
        self.normalized.iter().any(|n| *n == city)
    }
}

/// What the host application knows about the visiting session.
///
/// `real_ip` / `real_city` are values obtained out-of-band (for example by
/// a client-side measurement) and override resolution when present.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionContext {
    pub session_id: Option<String>,
    pub user_agent: Option<String>,
    pub real_ip: Option<String>,
    pub real_city: Option<String>,
}

impl SessionContext {
    fn real_ip(&self) -> Option<&str> {
        non_blank(self.real_ip.as_deref())
    }

    fn real_city(&self) -> Option<&str> {
        non_blank(self.real_city.as_deref())
    }
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

/// Where the city used for the decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Session,
    Geolocation,
}

/// Admission decision plus diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct AccessDecision {
    pub allowed: bool,
    pub city: Option<String>,
    pub normalized_city: String,
    pub source: DecisionSource,
    pub client: ClientInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo: Option<GeoResult>,
}

/// Resolver plus allow-list: the single decision point.
#[derive(Clone)]
pub struct AccessGate {
    resolver: LocationResolver,
    allow_list: AllowList,
}

impl AccessGate {
    pub fn new(resolver: LocationResolver, allow_list: AllowList) -> Self {
        Self { resolver, allow_list }
    }

    pub fn resolver(&self) -> &LocationResolver {
        &self.resolver
    }

    pub fn allow_list(&self) -> &AllowList {
        &self.allow_list
    }

    /// Snapshot of the client, resolving the IP only if the session lacks one.
    pub fn client_info(&self, ctx: &SessionContext) -> ClientInfo {
        let ip = match ctx.real_ip() {
            Some(ip) => ip.to_string(),
            None => self.resolver.resolve_client_ip(),
        };
        self.snapshot(ctx, ip)
    }

    /// Run the full pipeline for one request. Never fails; an unresolvable
    /// city is a denial.
    pub fn check(&self, ctx: &SessionContext) -> AccessDecision {
        if let Some(city) = ctx.real_city() {
            let ip = ctx.real_ip().unwrap_or(UNKNOWN_SENTINEL).to_string();
            return self.decide(ctx, ip, Some(city.to_string()), DecisionSource::Session, None);
        }

        let (ip, geo) = match ctx.real_ip() {
            Some(ip) => (ip.to_string(), self.resolver.geolocate(Some(ip))),
            None => self.resolver.locate_client(),
        };
        let ip = geo.resolved_ip.clone().unwrap_or(ip);
        let city = if geo.success { geo.city.clone() } else { None };

        self.decide(ctx, ip, city, DecisionSource::Geolocation, Some(geo))
    }

    fn decide(
        &self,
        ctx: &SessionContext,
        ip: String,
        city: Option<String>,
        source: DecisionSource,
        geo: Option<GeoResult>,
    ) -> AccessDecision {
        let allowed = self.allow_list.contains(city.as_deref());
        let normalized_city = city.as_deref().map(normalize_city_name).unwrap_or_default();
        let client = self.snapshot(ctx, ip);

        info!(
            session = %client.session_id,
            ip = %client.ip,
            city = ?city,
            source = ?source,
            allowed,
            "access decision"
        );

        AccessDecision { allowed, city, normalized_city, source, client, geo }
    }

    fn snapshot(&self, ctx: &SessionContext, ip: String) -> ClientInfo {
        ClientInfo {
            ip,
            user_agent: non_blank(ctx.user_agent.as_deref())
                .unwrap_or(UNKNOWN_USER_AGENT)
                .to_string(),
            session_id: non_blank(ctx.session_id.as_deref())
                .unwrap_or(UNKNOWN_SESSION)
                .to_string(),
            captured_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::{GeoEndpoint, LocationError, ProviderEndpoint, ResolverSettings, Transport};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const ECHO: &str = "https://echo.test/";
    const GEO_PALMAS: &str =
        r#"{"status":"success","city":"Palmas","regionName":"Tocantins","country":"Brazil","query":"203.0.113.9"}"#;

    const GEO_AUTO: &str = "http://geo.test/";

    /// Echo and geolocation each answer with a fixed body.
    struct FixedTransport {
        echo_body: Result<String, LocationError>,
        geo_body: Result<String, LocationError>,
        calls: Mutex<Vec<String>>,
    }

    impl FixedTransport {
        fn new(geo_body: Result<&str, LocationError>) -> Arc<Self> {
            Self::with_echo(Ok("203.0.113.9"), geo_body)
        }

        fn with_echo(echo_body: Result<&str, LocationError>, geo_body: Result<&str, LocationError>) -> Arc<Self> {
            Arc::new(Self {
                echo_body: echo_body.map(str::to_string),
                geo_body: geo_body.map(str::to_string),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Transport for FixedTransport {
        fn get(&self, url: &str, _timeout: Duration) -> Result<String, LocationError> {
            self.calls.lock().unwrap().push(url.to_string());
            if url == ECHO {
                self.echo_body.clone()
            } else {
                self.geo_body.clone()
            }
        }
    }

    fn gate(transport: Arc<FixedTransport>, cities: &[&str]) -> AccessGate {
        let settings = ResolverSettings {
            echo: vec![ProviderEndpoint::raw_text("echo", ECHO)],
            geo: GeoEndpoint { url: "http://geo.test/{ip}".into(), ..GeoEndpoint::default() },
            ..ResolverSettings::default()
        };
        AccessGate::new(
            LocationResolver::with_transport(transport, settings),
            AllowList::new(cities.iter().copied()),
        )
    }

    #[test]
    fn test_is_allowed_cases() {
        assert!(is_allowed(Some("Palmas - TO"), &["Palmas"]));
        assert!(is_allowed(Some("palmas"), &["Other", "PALMAS, Tocantins"]));
        assert!(!is_allowed(Some("Other City"), &["Palmas"]));
        assert!(!is_allowed(None, &["Palmas"]));
        assert!(!is_allowed(Some(""), &["Palmas"]));
        assert!(!is_allowed(Some("Palmas"), &[] as &[&str]));
        assert!(is_allowed(Some("São Paulo"), &[String::from("Sao Paulo")]));
    }

    #[test]
    fn test_is_allowed_order_independent() {
        let a = ["Palmas", "Gurupi", "Araguaína"];
        let b = ["Araguaína", "Palmas", "Gurupi"];
        for city in ["araguaina", "Gurupi - TO", "Porto Nacional"] {
            assert_eq!(is_allowed(Some(city), &a), is_allowed(Some(city), &b));
        }
    }

    #[test]
    fn test_allow_list_matches_free_function() {
        let list = AllowList::new(["Palmas", "São Paulo"]);
        assert_eq!(list.normalized(), &["palmas".to_string(), "sao paulo".to_string()]);
        for city in [Some("Palmas-TO"), Some("sao paulo, SP"), Some("Rio"), None, Some("  ")] {
            assert_eq!(list.contains(city), is_allowed(city, list.entries()));
        }
    }

    #[test]
    fn test_blank_allow_list_entry_never_matches() {
        let list = AllowList::new(["", "Palmas"]);
        assert!(!list.contains(Some("")));
        assert!(!list.contains(Some(" , ")));
    }

    #[test]
    fn test_session_city_bypasses_network() {
        let t = FixedTransport::new(Ok(GEO_PALMAS));
        let ctx = SessionContext {
            session_id: Some("abc".into()),
            real_city: Some("Palmas - TO".into()),
            ..SessionContext::default()
        };
        let d = gate(t.clone(), &["Palmas"]).check(&ctx);
        assert!(d.allowed);
        assert_eq!(d.source, DecisionSource::Session);
        assert_eq!(d.normalized_city, "palmas");
        assert_eq!(d.client.ip, "Unknown");
        assert_eq!(d.client.session_id, "abc");
        assert!(d.geo.is_none());
        assert!(t.calls().is_empty());
    }

    #[test]
    fn test_session_city_not_in_list() {
        let t = FixedTransport::new(Ok(GEO_PALMAS));
        let ctx = SessionContext {
            real_ip: Some("203.0.113.9".into()),
            real_city: Some("Gurupi".into()),
            ..SessionContext::default()
        };
        let d = gate(t.clone(), &["Palmas"]).check(&ctx);
        assert!(!d.allowed);
        assert_eq!(d.client.ip, "203.0.113.9");
        assert!(t.calls().is_empty());
    }

    #[test]
    fn test_session_ip_skips_discovery() {
        let t = FixedTransport::new(Ok(GEO_PALMAS));
        let ctx = SessionContext { real_ip: Some("198.51.100.7".into()), ..SessionContext::default() };
        let d = gate(t.clone(), &["Palmas"]).check(&ctx);
        assert!(d.allowed);
        assert_eq!(d.source, DecisionSource::Geolocation);
        assert_eq!(t.calls(), vec!["http://geo.test/198.51.100.7".to_string()]);
    }

    #[test]
    fn test_full_pipeline() {
        let t = FixedTransport::new(Ok(GEO_PALMAS));
        let d = gate(t.clone(), &["Palmas"]).check(&SessionContext::default());
        assert!(d.allowed);
        assert_eq!(d.city.as_deref(), Some("Palmas"));
        assert_eq!(d.client.ip, "203.0.113.9");
        assert_eq!(d.client.user_agent, "Unknown Browser");
        assert_eq!(d.client.session_id, "unknown");
        assert_eq!(t.calls(), vec![ECHO.to_string(), "http://geo.test/203.0.113.9".to_string()]);
    }

    #[test]
    fn test_failed_geolocation_denies() {
        let t = FixedTransport::new(Err(LocationError::Timeout));
        let d = gate(t, &["Palmas"]).check(&SessionContext::default());
        assert!(!d.allowed);
        assert_eq!(d.city, None);
        assert_eq!(d.normalized_city, "");
        let geo = d.geo.unwrap();
        assert!(!geo.success);
        assert_eq!(geo.error.as_deref(), Some("request timed out"));
    }

    #[test]
    fn test_auto_detect_answer_is_reused() {
        let t = FixedTransport::with_echo(Err(LocationError::Timeout), Ok(GEO_PALMAS));
        let d = gate(t.clone(), &["Palmas"]).check(&SessionContext::default());
        assert!(d.allowed);
        assert_eq!(d.city.as_deref(), Some("Palmas"));
        assert_eq!(d.client.ip, "203.0.113.9");
        assert_eq!(d.geo.unwrap().resolved_ip.as_deref(), Some("203.0.113.9"));
        assert_eq!(t.calls(), vec![ECHO.to_string(), GEO_AUTO.to_string()]);
    }

    #[test]
    fn test_failed_auto_detect_is_not_retried() {
        let t = FixedTransport::with_echo(Err(LocationError::Timeout), Err(LocationError::Timeout));
        let d = gate(t.clone(), &["Palmas"]).check(&SessionContext::default());
        assert!(!d.allowed);
        assert_eq!(d.client.ip, "127.0.0.1");
        assert_eq!(d.geo.unwrap().error.as_deref(), Some("request timed out"));
        assert_eq!(t.calls(), vec![ECHO.to_string(), GEO_AUTO.to_string()]);
    }

    #[test]
    fn test_unacceptable_auto_detect_ip_still_geolocates_once() {
        let t = FixedTransport::with_echo(
            Ok("10.0.0.3"),
            Ok(r#"{"status":"success","city":"Palmas","regionName":"Tocantins","country":"Brazil"}"#),
        );
        let d = gate(t.clone(), &["Palmas"]).check(&SessionContext::default());
        assert!(d.allowed);
        assert_eq!(d.client.ip, "127.0.0.1");
        assert_eq!(t.calls(), vec![ECHO.to_string(), GEO_AUTO.to_string()]);
    }

    #[test]
    fn test_empty_allow_list_denies() {
        let t = FixedTransport::new(Ok(GEO_PALMAS));
        let d = gate(t, &[]).check(&SessionContext::default());
        assert!(!d.allowed);
        assert_eq!(d.city.as_deref(), Some("Palmas"));
    }

    #[test]
    fn test_client_info_defaults_and_override() {
        let t = FixedTransport::new(Ok(GEO_PALMAS));
        let g = gate(t.clone(), &["Palmas"]);

        let info = g.client_info(&SessionContext::default());
        assert_eq!(info.ip, "203.0.113.9");
        assert_eq!(info.user_agent, "Unknown Browser");

        let ctx = SessionContext {
            real_ip: Some("198.51.100.7".into()),
            user_agent: Some("Mozilla/5.0".into()),
            session_id: Some("s-1".into()),
            ..SessionContext::default()
        };
        let info = g.client_info(&ctx);
        assert_eq!(info.ip, "198.51.100.7");
        assert_eq!(info.user_agent, "Mozilla/5.0");
        assert_eq!(info.session_id, "s-1");
        assert_eq!(t.calls().len(), 1);
    }

    #[test]
    fn test_decision_serializes() {
        let t = FixedTransport::new(Ok(GEO_PALMAS));
        let ctx = SessionContext { real_city: Some("Palmas".into()), ..SessionContext::default() };
        let json = serde_json::to_value(gate(t, &["Palmas"]).check(&ctx)).unwrap();
        assert_eq!(json["allowed"], true);
        assert_eq!(json["source"], "session");
        assert!(json.get("geo").is_none());
        assert_eq!(json["client"]["user_agent"], "Unknown Browser");
    }
}
