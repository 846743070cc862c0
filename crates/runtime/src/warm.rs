use std::path::PathBuf;

use tracing::{info, warn};

use crate::service::TtsService;

/// Build model instances ahead of the first request.
///
/// Each configuration is loaded into the cache and parked on the host.
/// Failures are logged and skipped so one bad path does not keep the server
/// from starting.
///
/// # Returns
/// Number of configurations that loaded.
pub async fn preload_models(service: &TtsService, configs: &[PathBuf]) -> usize {
    if configs.is_empty() {
        return 0;
    }
    info!(count = configs.len(), "preloading model instances");

    let mut loaded = 0;
    for path in configs {
        match service.preload(path).await {
            Ok(id) => {
                info!(config = %id, "model instance preloaded");
                loaded += 1;
            }
            Err(e) => warn!(config = %path.display(), error = %e, "preload failed"),
        }
    }

    info!(loaded, requested = configs.len(), "preloading complete");
    loaded
}
