//! Location subsystem.
//!
//! Public-IP discovery over IP-echo services, IP geolocation, and city name
//! normalization.

pub mod normalize;
pub mod providers;
pub mod resolver;
pub mod types;

pub use normalize::{normalize_city_name, normalize_opt};
pub use providers::{GeoEndpoint, GeoFields, HttpTransport, ProviderClient, ProviderEndpoint, ResponseFormat, Transport};
pub use resolver::{is_acceptable_ip, Discovery, LocationResolver, ResolverSettings};
pub use types::{ClientInfo, GeoResult, LocationError};
