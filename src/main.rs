//! Gatekeeper server binary.
//!
//! ```text
//! CLI flags ─▶ config file (optional) ─▶ overrides ─▶ validate
//!     → logging + metrics exporter
//!     → in-process store (optionally seeded with an admin)
//!     → HttpServer::run until SIGINT/SIGTERM
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, Utc};
use clap::Parser;
use tokio::net::TcpListener;

use gatekeeper::config::validation::validate_config;
use gatekeeper::config::{load_config, AppConfig, ConfigError, Environment};
use gatekeeper::lifecycle::{spawn_signal_handler, Shutdown};
use gatekeeper::models::{Scope, Token, User};
use gatekeeper::observability::{logging::init_logging, metrics::init_metrics};
use gatekeeper::store::MemoryStore;
use gatekeeper::{AppState, HttpServer};

const ADMIN_PERMISSIONS: [&str; 3] = ["movies:read", "movies:write", "metrics:view"];

#[derive(Parser, Debug)]
#[command(name = "gatekeeper")]
#[command(about = "Movie API behind a rate limiting, authenticating request pipeline", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// API server port
    #[arg(long)]
    port: Option<u16>,

    /// Environment (development|staging|production)
    #[arg(long)]
    env: Option<Environment>,

    /// Rate limiter maximum requests per second
    #[arg(long)]
    limiter_rps: Option<f64>,

    /// Rate limiter maximum burst
    #[arg(long)]
    limiter_burst: Option<u32>,

    /// Enable rate limiter
    #[arg(long)]
    limiter_enabled: Option<bool>,

    /// Trusted CORS origins (space separated)
    #[arg(long)]
    cors_trusted_origins: Option<String>,

    /// Create an activated user with every permission and print a 24h token for it.
    #[arg(long, value_name = "EMAIL")]
    bootstrap_admin: Option<String>,
}

impl Cli {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(port) = self.port {
            let host = config
                .listener
                .bind_address
                .rsplit_once(':')
                .map_or("0.0.0.0", |(host, _)| host);
            config.listener.bind_address = format!("{host}:{port}");
        }
        if let Some(env) = self.env {
            config.environment = env;
        }
        if let Some(rps) = self.limiter_rps {
            config.limiter.requests_per_second = rps;
        }
        if let Some(burst) = self.limiter_burst {
            config.limiter.burst = burst;
        }
        if let Some(enabled) = self.limiter_enabled {
            config.limiter.enabled = enabled;
        }
        if let Some(origins) = &self.cors_trusted_origins {
            config.cors.trusted_origins = origins.split_whitespace().map(String::from).collect();
        }
    }

    fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => AppConfig::default(),
        };
        self.apply(&mut config);
        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }
}

fn bootstrap_admin(store: &MemoryStore, email: &str) -> String {
    let admin = store.insert_user(User {
        id: 0,
        created_at: Utc::now(),
        name: "admin".into(),
        email: email.into(),
        activated: true,
        version: 0,
    });
    store.add_permissions_for_user(admin.id, ADMIN_PERMISSIONS);

    let token = Token::generate(admin.id, Duration::hours(24), Scope::Authentication);
    store.insert_token(&token);
    tracing::info!(user_id = admin.id, email, "Bootstrapped admin user");
    token.plaintext
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = cli.load()?;

    init_logging(&config.observability);
    tracing::info!("gatekeeper v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        environment = config.environment.as_str(),
        limiter_enabled = config.limiter.enabled,
        limiter_rps = config.limiter.requests_per_second,
        limiter_burst = config.limiter.burst,
        trusted_origins = ?config.cors.trusted_origins,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let store = Arc::new(MemoryStore::new());
    if let Some(email) = &cli.bootstrap_admin {
        let token = bootstrap_admin(&store, email);
        println!("authentication token for {email}: {token}");
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server_shutdown = spawn_signal_handler(&shutdown);

    let server = HttpServer::with_state(AppState::with_store(config, store));
    server.run(listener, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
