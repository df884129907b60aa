//! Layered configuration loading
//!
//! Priority (highest to lowest):
//! 1. Environment variables (`{PREFIX}`, `__` separates nested keys)
//! 2. YAML file
//! 3. Serialized `Default` of the target type

use std::path::Path;

use errors::{VoltageError, VoltageResult};
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};

/// Build the figment without extracting it
///
/// A given `path` must exist; `None` loads defaults and environment only.
pub fn layered_figment<T>(path: Option<&Path>, env_prefix: &str) -> VoltageResult<Figment>
where
    T: Serialize + Default,
{
    let mut figment = Figment::from(Serialized::defaults(T::default()));

    if let Some(path) = path {
        if !path.exists() {
            return Err(VoltageError::MissingConfig(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        info!("Loading configuration from {}", path.display());
        figment = figment.merge(Yaml::file(path));
    } else {
        debug!("No configuration file given, using defaults");
    }

    Ok(figment.merge(Env::prefixed(env_prefix).split("__")))
}

/// Load `T` from defaults, an optional YAML file and the environment
pub fn load_layered<T>(path: Option<&Path>, env_prefix: &str) -> VoltageResult<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    let config = layered_figment::<T>(path, env_prefix)?.extract()?;
    Ok(config)
}
