use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_rest::AppState;
use securemed_core::config::{
    artifact_dir_from_env_value, master_key_from_env_value, optional_path_from_env_value,
};
use securemed_core::constants::{
    ENV_ARTIFACT_DIR, ENV_ASSIGNMENTS_FILE, ENV_AUDIT_LOG, ENV_MASTER_KEY,
};
use securemed_core::notify::LogNotifier;
use securemed_core::{ClinicalVault, CoreConfig};
use std::sync::Arc;

/// Main entry point for the SecureMed service
///
/// Resolves configuration once, opens the clinical vault and serves the REST API.
///
/// # Environment Variables
/// - `SECUREMED_MASTER_KEY`: 64 hex characters; the service refuses to start without it
/// - `SECUREMED_ARTIFACT_DIR`: sealed artifact storage (default: "artifact_data")
/// - `SECUREMED_AUDIT_LOG`: JSON-lines audit log; in-memory when unset
/// - `SECUREMED_ASSIGNMENTS_FILE`: YAML list of primary clinician assignments
/// - `SECUREMED_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `API_KEY`: shared secret expected in `x-api-key`
///
/// # Errors
/// Returns an error if the configuration is invalid, the vault cannot be opened, or the
/// server cannot bind or fails while running.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("securemed_core=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = CoreConfig::new(
        artifact_dir_from_env_value(std::env::var(ENV_ARTIFACT_DIR).ok()),
        optional_path_from_env_value(std::env::var(ENV_AUDIT_LOG).ok()),
        optional_path_from_env_value(std::env::var(ENV_ASSIGNMENTS_FILE).ok()),
        master_key_from_env_value(std::env::var(ENV_MASTER_KEY).ok())?,
    );
    let api_key = match std::env::var("API_KEY") {
        Ok(key) if !key.trim().is_empty() => key,
        _ => anyhow::bail!("API_KEY must be set"),
    };
    let rest_addr =
        std::env::var("SECUREMED_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());

    let vault = ClinicalVault::open(&cfg, Arc::new(LogNotifier))?;
    let app = api_rest::router(AppState::new(vault, api_key));

    tracing::info!("++ Starting SecureMed REST on {}", rest_addr);
    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
