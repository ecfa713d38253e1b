//! Engine configuration loader.
//!
//! Reads `reconcile.toml` and deserializes it into [`EngineConfig`]. Falls
//! back to defaults when the file is missing or malformed.

use std::path::{Path, PathBuf};

use reconcile_types::config::{EngineConfig, StateBackendKind};

/// Config file name looked up in the working directory.
pub const CONFIG_FILE: &str = "reconcile.toml";

/// Load engine configuration from `path`.
///
/// - If the file does not exist, returns [`EngineConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - Otherwise returns the parsed config.
pub async fn load_engine_config(path: &Path) -> EngineConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config found at {}, using defaults", path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            EngineConfig::default()
        }
    }
}

/// Data directory from `RECONCILE_DATA_DIR`, falling back to
/// `~/.reconcile` (or `./.reconcile` without a home directory).
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("RECONCILE_DATA_DIR") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".reconcile")
}

/// Where the configured state backend lives: the explicit `state.path`, or
/// a backend-specific file under `data_dir`.
pub fn state_path(config: &EngineConfig, data_dir: &Path) -> PathBuf {
    if let Some(path) = &config.state.path {
        return path.clone();
    }
    match config.state.backend {
        StateBackendKind::File => data_dir.join("state.json"),
        StateBackendKind::Sqlite => data_dir.join("state.db"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_engine_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_engine_config(&tmp.path().join(CONFIG_FILE)).await;
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.state.backend, StateBackendKind::File);
    }

    #[tokio::test]
    async fn test_load_engine_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE);
        tokio::fs::write(
            &path,
            r#"
concurrency = 2

[state]
backend = "sqlite"

[env]
STAGE = "prod"
"#,
        )
        .await
        .unwrap();

        let config = load_engine_config(&path).await;
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.state.backend, StateBackendKind::Sqlite);
        assert_eq!(config.env["STAGE"], "prod");
    }

    #[tokio::test]
    async fn test_load_engine_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE);
        tokio::fs::write(&path, "concurrency = = 3").await.unwrap();

        let config = load_engine_config(&path).await;
        assert_eq!(config.concurrency, 4);
    }

    #[test]
    fn test_state_path_prefers_explicit_path() {
        let mut config = EngineConfig::default();
        let data = Path::new("/data");
        assert_eq!(state_path(&config, data), data.join("state.json"));

        config.state.backend = StateBackendKind::Sqlite;
        assert_eq!(state_path(&config, data), data.join("state.db"));

        config.state.path = Some(PathBuf::from("/elsewhere/s.db"));
        assert_eq!(state_path(&config, data), PathBuf::from("/elsewhere/s.db"));
    }
}
