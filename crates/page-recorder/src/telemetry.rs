use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogConfig;
use crate::error::{RecorderError, Result};

static TRACING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Install a global fmt subscriber.
///
/// `RUST_LOG` overrides the configured level. Returns `Ok(false)` if a
/// subscriber was already installed by an earlier call.
pub fn init_tracing(config: &LogConfig) -> Result<bool> {
    if TRACING_INITIALIZED.swap(true, Ordering::SeqCst) {
        return Ok(false);
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| RecorderError::ConfigError {
            message: format!("invalid log filter: {}", e),
        })?;

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init();

    if let Err(err) = installed {
        // Someone else owns the global subscriber; keep going with theirs.
        tracing::debug!(error = %err, "tracing subscriber already set");
        return Ok(false);
    }

    tracing::info!(level = %config.level, "tracing initialized");
    Ok(true)
}
