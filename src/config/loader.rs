//! Configuration Loader
//!
//! Environment-aware loading built on the `config` crate. Sources, lowest
//! precedence first:
//!
//! 1. serde defaults of [`WorkerConfig`]
//! 2. base TOML file (`FSM_WORKER_CONFIG` or an explicit path)
//! 3. environment overlay next to it (`worker.production.toml` for `worker.toml`)
//! 4. environment variables `FSM_WORKER__SECTION__KEY`

use config::{Config, Environment, File, FileFormat};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::WorkerConfig;
use crate::constants::env_vars;

const ENV_PREFIX: &str = "FSM_WORKER";
const ENV_SEPARATOR: &str = "__";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<WorkerConfig> {
        let path = env::var(env_vars::CONFIG_PATH).ok().map(PathBuf::from);
        Self::load_from_path(path.as_deref())
    }

    /// Load configuration from a specific base file
    pub fn load_from_path(path: Option<&Path>) -> ConfigResult<WorkerConfig> {
        let environment = Self::detect_environment();
        Self::load_with_env(path, &environment, None)
    }

    /// Load with an explicit environment name and, optionally, an explicit
    /// variable map instead of the process environment
    pub fn load_with_env(
        path: Option<&Path>,
        environment: &str,
        env_source: Option<HashMap<String, String>>,
    ) -> ConfigResult<WorkerConfig> {
        let mut builder = Config::builder();

        if let Some(base) = path {
            if !base.is_file() {
                return Err(ConfigurationError::config_file_not_found(base));
            }
            debug!(path = %base.display(), "Loading base configuration file");
            builder = builder.add_source(File::from(base).format(FileFormat::Toml));

            if let Some(overlay) = Self::environment_overlay_path(base, environment) {
                debug!(path = %overlay.display(), environment, "Checking environment overlay");
                builder = builder.add_source(
                    File::from(overlay.as_path())
                        .format(FileFormat::Toml)
                        .required(false),
                );
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator(ENV_SEPARATOR)
                .separator(ENV_SEPARATOR)
                .try_parsing(true)
                .source(env_source),
        );

        let config: WorkerConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        info!(
            environment,
            store = if config.database.is_configured() { "postgres" } else { "in_memory" },
            messaging = ?config.messaging.provider,
            max_chain_length = config.executor.max_chain_length,
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Detect the current environment from environment variables
    pub fn detect_environment() -> String {
        env::var(env_vars::ENVIRONMENT)
            .or_else(|_| env::var(env_vars::APP_ENVIRONMENT))
            .unwrap_or_else(|_| "development".to_string())
    }

    fn environment_overlay_path(base: &Path, environment: &str) -> Option<PathBuf> {
        let stem = base.file_stem()?.to_str()?;
        let file_name = format!("{stem}.{environment}.toml");
        Some(base.with_file_name(file_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MessagingBackend;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_defaults_without_file() {
        let config = ConfigLoader::load_with_env(None, "test", Some(HashMap::new())).unwrap();
        assert_eq!(config, WorkerConfig::default());
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let err = ConfigLoader::load_with_env(
            Some(Path::new("/nonexistent/worker.toml")),
            "test",
            Some(HashMap::new()),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::ConfigFileNotFound { .. }));
    }

    #[test]
    fn test_file_values_and_overlay() {
        let dir = TempDir::new().unwrap();
        let base = write_file(
            &dir,
            "worker.toml",
            r#"
[executor]
max_chain_length = 8

[retry.report]
max_attempts = 7
"#,
        );
        write_file(
            &dir,
            "worker.production.toml",
            r#"
[executor]
max_chain_length = 32
"#,
        );

        let dev = ConfigLoader::load_with_env(Some(&base), "development", Some(HashMap::new()))
            .unwrap();
        assert_eq!(dev.executor.max_chain_length, 8);
        assert_eq!(dev.retry.report.max_attempts, 7);

        let prod =
            ConfigLoader::load_with_env(Some(&base), "production", Some(HashMap::new())).unwrap();
        assert_eq!(prod.executor.max_chain_length, 32);
        assert_eq!(prod.retry.report.max_attempts, 7);
    }

    #[test]
    fn test_environment_variables_override_file() {
        let dir = TempDir::new().unwrap();
        let base = write_file(&dir, "worker.toml", "[consumer]\nbatch_size = 4\n");

        let vars = HashMap::from([
            ("FSM_WORKER__CONSUMER__BATCH_SIZE".to_string(), "25".to_string()),
            (
                "FSM_WORKER__DATABASE__URL".to_string(),
                "postgresql://localhost/fsm".to_string(),
            ),
            ("FSM_WORKER__MESSAGING__PROVIDER".to_string(), "pgmq".to_string()),
        ]);

        let config = ConfigLoader::load_with_env(Some(&base), "test", Some(vars)).unwrap();
        assert_eq!(config.consumer.batch_size, 25);
        assert_eq!(config.database.url, "postgresql://localhost/fsm");
        assert_eq!(config.messaging.provider, MessagingBackend::Pgmq);
    }

    #[test]
    fn test_shipped_configuration_files() {
        let base = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/worker.toml");

        let dev = ConfigLoader::load_with_env(Some(&base), "development", Some(HashMap::new()))
            .unwrap();
        assert_eq!(dev, WorkerConfig::default());

        // production overlay switches to pgmq, which needs a database url
        let err = ConfigLoader::load_with_env(Some(&base), "production", Some(HashMap::new()))
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingRequiredField { .. }));

        let vars = HashMap::from([(
            "FSM_WORKER__DATABASE__URL".to_string(),
            "postgresql://db/fsm".to_string(),
        )]);
        let prod = ConfigLoader::load_with_env(Some(&base), "production", Some(vars)).unwrap();
        assert_eq!(prod.messaging.provider, MessagingBackend::Pgmq);
        assert_eq!(prod.consumer.batch_size, 25);
        assert_eq!(prod.retry.infra.max_attempts, 10);
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let dir = TempDir::new().unwrap();
        let base = write_file(&dir, "worker.toml", "[consumer]\nbatch_size = 0\n");
        let err =
            ConfigLoader::load_with_env(Some(&base), "test", Some(HashMap::new())).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidValue { .. }));
    }
}
