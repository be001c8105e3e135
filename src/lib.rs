//! City allow-list gate.
//!
//! Discovers a visitor's public IP through an ordered chain of IP-echo
//! services, geolocates it, and checks the normalized city name against a
//! configured allow-list. Every step degrades to a well-formed result;
//! nothing here returns an error to the caller of [`AccessGate::check`].

pub mod access;
pub mod config;
pub mod location;
pub mod server;

pub use access::{is_allowed, AccessDecision, AccessGate, AllowList, DecisionSource, SessionContext};
pub use config::{Config, ConfigError};
pub use location::{normalize_city_name, ClientInfo, GeoResult, LocationError, LocationResolver};
