use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use marketspace::auth;
use marketspace::chat::channels::ChannelResolver;
use marketspace::config::{generate_config_template, Config};
use marketspace::db;
use marketspace::notify::email::{EmailTransport, SandboxMailer, SmtpMailer};
use marketspace::notify::push::{HttpPushClient, PushTransport, SandboxPush};
use marketspace::promo::sweep;
use marketspace::routes;
use marketspace::state::AppState;
use marketspace::ws::ConnectionRegistry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "marketspace=info".parse().unwrap()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "marketspace=info".parse().unwrap()),
            )
            .init();
    }

    tracing::info!("Marketspace realtime server v{} starting", env!("CARGO_PKG_VERSION"));

    // Initialize SQLite database
    let database = db::init_db(&config.data_dir)?;

    // Load or generate JWT signing key (256-bit random, stored in data_dir)
    let jwt_secret = auth::jwt::load_or_generate_jwt_secret(&config.data_dir)?;

    // Outbound transports. Disabled sections fall back to logging sandboxes.
    let push_config = config.push.clone().unwrap_or_default();
    let push: Arc<dyn PushTransport> = if push_config.enabled {
        Arc::new(HttpPushClient::new(push_config.api_key))
    } else {
        tracing::info!("Push delivery disabled, using sandbox transport");
        Arc::new(SandboxPush)
    };

    let email_config = config.email.clone().unwrap_or_default();
    let email: Arc<dyn EmailTransport> = if email_config.enabled {
        Arc::new(SmtpMailer::new(&email_config)?)
    } else {
        tracing::info!("Email delivery disabled, using sandbox transport");
        Arc::new(SandboxMailer)
    };

    // Build application state
    let app_state = AppState {
        db: database,
        jwt_secret,
        connections: Arc::new(ConnectionRegistry::new()),
        channels: Arc::new(ChannelResolver::new()),
        push,
        email,
    };

    // Background promotion expiry sweep
    let sweep_config = config.sweep.clone().unwrap_or_default();
    sweep::spawn_promotion_sweep(app_state.clone(), sweep_config);

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
