use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::schema::CourierConfig;

/// Loads the Courier configuration.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Resolve the config path: explicit path > COURIER_CONFIG env >
    /// ~/.courier/courier.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("COURIER_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".courier")
            .join("courier.toml")
    }

    /// Load the config from disk.
    ///
    /// A missing file yields defaults (with a warning). A file that exists
    /// but fails to parse is a hard error: silently resetting to defaults
    /// would re-open security-relevant fields like channel allow-lists.
    pub fn load(path: Option<&Path>) -> courier_core::Result<CourierConfig> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            let raw = std::fs::read_to_string(&config_path)?;
            toml::from_str::<CourierConfig>(&raw).map_err(|e| {
                courier_core::CourierError::Config(format!(
                    "failed to parse {}: {e}",
                    config_path.display()
                ))
            })?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            CourierConfig::default()
        };

        let config = Self::apply_env_overrides(config);

        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{w}");
                }
            }
            Err(e) => return Err(courier_core::CourierError::Config(e)),
        }

        Ok(config)
    }

    /// Env var overrides. API key: config file takes priority, env is the
    /// fallback.
    fn apply_env_overrides(mut config: CourierConfig) -> CourierConfig {
        if let Ok(v) = std::env::var("COURIER_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Ok(v) = std::env::var("COURIER_PROVIDER_MODEL") {
            config.provider.model = v;
        }
        if config.provider.api_key.is_none()
            && let Ok(v) = std::env::var("COURIER_API_KEY")
        {
            config.provider.api_key = Some(v);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.toml");
        let config = ConfigLoader::load(Some(&path)).unwrap();
        assert_eq!(config.agent.max_iterations, 20);
    }

    #[test]
    fn unparsable_file_is_a_hard_error_not_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "this is {{ not toml").unwrap();

        let err = ConfigLoader::load(Some(&path)).unwrap_err();
        assert!(matches!(err, courier_core::CourierError::Config(_)));
    }

    #[test]
    fn valid_file_loads_channel_policies() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier.toml");
        std::fs::write(
            &path,
            r#"
            [channels.tg]
            type = "telegram"
            [channels.tg.access]
            allow_list = ["alice"]
            "#,
        )
        .unwrap();

        let config = ConfigLoader::load(Some(&path)).unwrap();
        let access = &config.channels["tg"].access;
        assert!(access.permits("alice"));
        assert!(!access.permits("bob"));
    }
}
