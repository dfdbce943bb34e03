use anyhow::{Context, Result};
use buffett_server::config::Config;
use buffett_server::{AppState, app};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(config.log_filter()).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true);

    match config.logging.format.to_lowercase().as_str() {
        "json" => builder.json().init(),
        "compact" => builder.compact().init(),
        _ => builder.pretty().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::load().context("Failed to load configuration")?;
    init_tracing(&config);

    let state = AppState::from_config(&config).context("Failed to build application state")?;
    let app = app(state);

    let addr = config.socket_addr();
    info!("Buffett analyzer listening on http://{}", addr);
    info!(
        "Google redirect URI: {}",
        config.oauth.redirect_uri.as_deref().unwrap_or_default()
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, app).await?;

    Ok(())
}
