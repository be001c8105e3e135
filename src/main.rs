use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use citygate::location::{HttpTransport, LocationResolver};
use citygate::{normalize_city_name, AccessGate, AllowList, Config, SessionContext};
use tracing_subscriber::EnvFilter;

/// citygate: decide whether a visitor is in an allowed city.
///
/// Discovers the public IP, geolocates it, and matches the city against
/// the allow-list. The decision is printed as JSON on stdout.
///
/// Examples:
///   citygate --allow Palmas
///   citygate --allow Palmas --ip 203.0.113.9
///   citygate --allow "São Paulo" --city "Sao Paulo - SP"
///   citygate --config citygate.toml --serve --port 8080
///   citygate --normalize "Palmas - TO"
#[derive(Parser)]
#[command(name = "citygate", version, about, long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Allowed city (repeatable). Replaces the configured allow-list.
    #[arg(long = "allow", short = 'a')]
    allow: Vec<String>,

    /// Known client IP; skips IP discovery.
    #[arg(long)]
    ip: Option<String>,

    /// Known client city; skips discovery and geolocation.
    #[arg(long)]
    city: Option<String>,

    /// Session identifier used to tag the client snapshot.
    #[arg(long)]
    session_id: Option<String>,

    /// Print the normalized form of a city name and exit.
    #[arg(long, value_name = "TEXT")]
    normalize: Option<String>,

    /// Print the discovered public IP and exit.
    #[arg(long)]
    discover_ip: bool,

    /// Print a sample configuration file and exit.
    #[arg(long)]
    print_config: bool,

    /// Serve the HTTP API instead of running a single check.
    #[arg(long)]
    serve: bool,

    /// Listen address for --serve (overrides the config).
    #[arg(long)]
    host: Option<String>,

    /// Listen port for --serve (overrides the config).
    #[arg(long)]
    port: Option<u16>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(ref text) = cli.normalize {
        println!("{}", normalize_city_name(text));
        return Ok(());
    }

    if cli.print_config {
        print!("{}", Config::sample());
        return Ok(());
    }

    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    if !cli.allow.is_empty() {
        config.allowed_cities = cli.allow.clone();
    }

    init_logging(&config.log_level);

    let resolver = LocationResolver::with_transport(Arc::new(HttpTransport::new()), config.resolver_settings());

    if cli.discover_ip {
        println!("{}", resolver.resolve_client_ip());
        return Ok(());
    }

    let allow_list: AllowList = config.allow_list();
    if allow_list.is_empty() {
        tracing::warn!("allow-list is empty; every request will be denied");
    }
    let gate = AccessGate::new(resolver, allow_list);

    if cli.serve {
        let host = cli.host.unwrap_or(config.server.host);
        let port = cli.port.unwrap_or(config.server.port);
        let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
        return runtime
            .block_on(citygate::server::start(gate, &host, port))
            .with_context(|| format!("serving on {}:{}", host, port));
    }

    let ctx = SessionContext {
        session_id: cli.session_id,
        user_agent: None,
        real_ip: cli.ip,
        real_city: cli.city,
    };
    let decision = gate.check(&ctx);

    eprintln!(
        "  {} {}",
        if decision.allowed { "allowed" } else { "denied" },
        decision.city.as_deref().unwrap_or("(no city)"),
    );
    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(())
}

/// Logs go to stderr; `RUST_LOG` wins over the configured level.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
