use std::path::PathBuf;
use std::sync::Arc;

use gitmirror::error::Result;
use gitmirror::events::TracingSink;
use gitmirror::logging::{FileLogger, setup_logging};
use gitmirror::process::SystemRunner;
use gitmirror::{AppState, MirrorConfig, api, load_config};
use tracing::{error, info};

const DEFAULT_CONFIG_PATH: &str = "gitmirror.toml";

/// File (if any), then environment overrides, then validation.
fn resolve_config() -> Result<MirrorConfig> {
    let explicit = std::env::var("GITMIRROR_CONFIG").ok();
    let path = explicit
        .as_deref()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    let mut config = load_config(&path, explicit.is_some())?;
    config.apply_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let config = match resolve_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let file_logger = config.log_dir.clone().map(FileLogger::new);
    let _log_guard = match setup_logging(file_logger.as_ref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Logging setup failed: {}", e);
            std::process::exit(1);
        }
    };

    let bind_address = config.bind_address.clone();
    info!("Mirroring into {}", config.base_dir.display());
    info!("Using git at {}", config.git.display());

    let state = Arc::new(AppState::new(
        config,
        Arc::new(SystemRunner),
        Arc::new(TracingSink),
    ));
    let app = api::router(state);

    let listener = match tokio::net::TcpListener::bind(&bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Could not bind {}: {}", bind_address, e);
            std::process::exit(1);
        }
    };
    info!("Server running at http://{}/", bind_address);

    if let Err(e) = axum::serve(listener, app).await {
        error!("Server stopped: {}", e);
        std::process::exit(1);
    }
}
