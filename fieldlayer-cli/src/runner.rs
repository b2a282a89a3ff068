//! CLI runner for common setup and operations.
//!
//! Encapsulates config loading, logging initialization, runtime and service
//! creation to reduce duplication across command handlers.

use std::path::{Path, PathBuf};

use fieldlayer::config::{config_file_path, ConfigFile};
use fieldlayer::logging::{init_logging, LoggingGuard};
use fieldlayer::service::FieldLayerService;
use tokio::runtime::Runtime;
use tracing::info;

use crate::error::CliError;

/// Loads the configuration at `path`, or the default file when `None`.
///
/// A missing default file yields the built-in defaults; a missing explicit
/// file is an error.
pub fn load_config(path: Option<&Path>) -> Result<ConfigFile, CliError> {
    match path {
        Some(path) if !path.exists() => Err(CliError::Config(format!(
            "config file '{}' does not exist",
            path.display()
        ))),
        Some(path) => Ok(ConfigFile::load_from(path)?),
        None => Ok(ConfigFile::load()?),
    }
}

/// Resolves the config path a command should write to.
pub fn config_path(path: Option<PathBuf>) -> PathBuf {
    path.unwrap_or_else(config_file_path)
}

/// Runner that manages CLI lifecycle and common operations.
pub struct CliRunner {
    /// Logging guard - keeps logging active while runner exists
    logging_guard: LoggingGuard,
    /// Loaded configuration file
    config: ConfigFile,
}

impl CliRunner {
    /// Create a new CLI runner, loading config and initializing logging.
    ///
    /// # Arguments
    ///
    /// * `config_path` - Explicit config file, or `None` for the default
    /// * `stdout` - Mirror log output to stdout
    pub fn new(config_path: Option<&Path>, stdout: bool) -> Result<Self, CliError> {
        let config = load_config(config_path)?;

        let logging_guard = init_logging(
            &config.logging.directory,
            &config.logging.file,
            &config.logging.level,
            stdout,
        )
        .map_err(|e| CliError::LoggingInit(e.to_string()))?;

        Ok(Self {
            logging_guard,
            config,
        })
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    /// Path of the log file this run writes.
    pub fn log_path(&self) -> &Path {
        self.logging_guard.log_path()
    }

    /// Log startup information for a command.
    pub fn log_startup(&self, command: &str) {
        info!("FieldLayer v{}", fieldlayer::VERSION);
        info!(
            command,
            zoom = self.config.grid.zoom,
            workers = self.config.workers.count,
            provider = %self.config.provider.preferred,
            "FieldLayer CLI starting"
        );
    }

    /// Build the multi-threaded runtime the service runs on.
    pub fn create_runtime(&self) -> Result<Runtime, CliError> {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("fieldlayer")
            .build()
            .map_err(CliError::Runtime)
    }

    /// Create the service on `runtime`.
    pub fn create_service(&self, runtime: &Runtime) -> Result<FieldLayerService, CliError> {
        FieldLayerService::builder(self.config.clone())
            .with_runtime(runtime.handle().clone())
            .build()
            .map_err(CliError::ServiceCreation)
            .inspect(|_| info!("Service created successfully"))
    }
}
