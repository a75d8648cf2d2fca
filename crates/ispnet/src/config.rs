//! CLI-specific config wrappers.
//!
//! Loads the shared `ispnet-config` file, layers global flag overrides on
//! top and wires the result into a `Platform`.

use std::path::PathBuf;
use std::sync::Arc;

use ispnet_config::Config;
use ispnet_core::{BlobKey, FileStore, InMemoryRegistry, Platform};
use tokio_util::sync::CancellationToken;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Everything a device-bound command needs.
pub struct Context {
    pub platform: Platform,
    pub config: Config,
    pub config_path: PathBuf,
    pub cancel: CancellationToken,
}

/// `--config` or the platform default.
pub fn config_path(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(ispnet_config::config_path)
}

/// Load the config and apply `--concurrency`, `--timeout` and `--insecure`.
pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    let mut cfg = ispnet_config::load_config_from(&config_path(global))?;
    apply_overrides(&mut cfg, global)?;
    Ok(cfg)
}

fn apply_overrides(cfg: &mut Config, global: &GlobalOpts) -> Result<(), CliError> {
    if let Some(concurrency) = global.concurrency {
        if concurrency == 0 {
            return Err(CliError::Validation {
                field: "concurrency".into(),
                reason: "must be at least 1".into(),
            });
        }
        cfg.defaults.concurrency = concurrency;
    }
    if let Some(timeout) = global.timeout {
        cfg.defaults.api_timeout = timeout;
        cfg.defaults.snmp_timeout = timeout;
    }
    if global.insecure {
        cfg.defaults.insecure = true;
        for device in cfg.devices.values_mut() {
            device.insecure = Some(true);
            device.ca_cert = None;
        }
    }
    Ok(())
}

/// Build the platform over the file store in the configured data dir.
pub async fn build_context(
    global: &GlobalOpts,
    cancel: CancellationToken,
) -> Result<Context, CliError> {
    let config_path = config_path(global);
    let config = load(global)?;
    if config.devices.is_empty() {
        return Err(CliError::NoConfig {
            path: config_path.display().to_string(),
        });
    }

    let engine = ispnet_config::engine_config(&config)?;
    let descriptors = ispnet_config::device_descriptors(&config)?;
    let registry = Arc::new(InMemoryRegistry::from_descriptors(descriptors));
    let data_dir = ispnet_config::data_dir(&config.defaults);
    tracing::debug!(data_dir = %data_dir.display(), devices = registry.len(), "building platform");
    let mut store = FileStore::open(data_dir).await?;
    if let Some(passphrase) = ispnet_config::backup_key(&config.defaults)? {
        store = store.with_blob_key(BlobKey::from_passphrase(&passphrase)?);
    }
    let store = Arc::new(store);

    let platform = Platform::builder(engine)
        .registry(registry)
        .store(store)
        .build()?;

    Ok(Context {
        platform,
        config,
        config_path,
        cancel,
    })
}
