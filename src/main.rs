use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info};

use veriaidpo::api::{self, auth::JwtKeys, ApiState};
use veriaidpo::context::AppContext;
use veriaidpo::environment::Settings;
use veriaidpo::logging::configure_logging;

#[tokio::main]
async fn main() -> Result<()> {
    configure_logging();

    let settings = Settings::from_env().context("Invalid configuration")?;
    info!(
        "Starting VeriAIDPO (registry {}, models {}, device {})",
        settings.registry_path.display(),
        settings.artifacts.models_dir.display(),
        settings.artifacts.device
    );

    let ctx = AppContext::from_settings(&settings)?;
    if !settings.preload_tasks.is_empty() {
        let loaded = ctx.preload(&settings).await;
        info!(
            "Preloaded {}/{} task variants",
            loaded,
            settings.preload_tasks.len()
        );
    }

    let keys = Arc::new(JwtKeys::from_settings(settings.jwt_secret.as_deref())?);
    if let Err(e) = api::serve(ApiState { ctx, keys }, settings.port).await {
        error!("Server stopped: {:#}", e);
        return Err(e);
    }
    Ok(())
}
