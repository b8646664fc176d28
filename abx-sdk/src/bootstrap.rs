//! Snapshot bootstrap: object store first, local mirror as fallback.

use std::time::SystemTime;

use tracing::{info, warn};

use abx_store::ObjectStore;

use crate::config::SdkConfig;
use crate::error::Error;
use crate::Result;

/// Object keys the snapshot generator writes start with this prefix and
/// embed the config version, so the lexically largest key is the newest.
pub(crate) const SNAPSHOT_KEY_PREFIX: &str = "snapshot-";

/// Load raw snapshot bytes for bootstrap.
///
/// Tries the object store first and mirrors a successful download to the
/// local cache file (best effort). On any store failure it falls back to
/// the local file, provided it exists and is younger than the configured
/// TTL. When both paths fail, construction of the client fails and the
/// host decides whether to run without experiments.
pub(crate) async fn load_snapshot_bytes(
    config: &SdkConfig,
    store: &dyn ObjectStore,
) -> Result<Vec<u8>> {
    match fetch_latest_snapshot(store).await {
        Ok((key, bytes)) => {
            info!(key = %key, size = bytes.len(), "fetched latest snapshot");
            if let Some(path) = &config.local_cache_path {
                if let Err(e) = tokio::fs::write(path, &bytes).await {
                    warn!(path = %path.display(), error = %e, "failed to mirror snapshot locally");
                }
            }
            Ok(bytes)
        }
        Err(store_err) => {
            warn!(error = %store_err, "snapshot fetch failed, trying local cache");
            load_local_cache(config).await.map_err(|local_err| {
                Error::Bootstrap(format!(
                    "object store failed ({store_err}) and local cache unusable ({local_err})"
                ))
            })
        }
    }
}

/// Pick the lexically largest snapshot key and download it.
///
/// Lexical order equals version order because keys embed UUIDv7 config
/// versions.
async fn fetch_latest_snapshot(store: &dyn ObjectStore) -> Result<(String, Vec<u8>)> {
    let mut keys: Vec<String> = store
        .list()
        .await?
        .into_iter()
        .filter(|k| k.starts_with(SNAPSHOT_KEY_PREFIX))
        .collect();

    keys.sort_unstable();
    let latest = keys
        .pop()
        .ok_or_else(|| Error::Bootstrap("no snapshots found in bucket".to_string()))?;

    let bytes = store.get(&latest).await?;
    Ok((latest, bytes))
}

async fn load_local_cache(config: &SdkConfig) -> Result<Vec<u8>> {
    let path = config
        .local_cache_path
        .as_ref()
        .ok_or_else(|| Error::Bootstrap("no local cache path configured".to_string()))?;

    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|_| Error::Bootstrap("local cache file does not exist".to_string()))?;

    let age = metadata
        .modified()
        .ok()
        .and_then(|mtime| SystemTime::now().duration_since(mtime).ok())
        .ok_or_else(|| Error::Bootstrap("local cache mtime unavailable".to_string()))?;

    if age > config.local_cache_ttl {
        return Err(Error::Bootstrap(format!(
            "local cache is stale ({age:?} old, TTL {:?})",
            config.local_cache_ttl
        )));
    }

    let bytes = tokio::fs::read(path).await?;
    info!(path = %path.display(), "loaded configuration from local cache file");
    Ok(bytes)
}
