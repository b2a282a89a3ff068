//! Configuration for fieldlayer.
//!
//! Settings live in `~/.fieldlayer/config.ini`. Every section is optional;
//! missing keys fall back to the component defaults.
//!
//! ```ini
//! [provider]
//! preferred = sentinel
//! secondary = backup
//! fallback = true
//!
//! [provider.sentinel]
//! type = sentinel_hub
//! token = ...
//!
//! [provider.backup]
//! type = raster
//! base_url = https://raster.example.com/v1/imagery
//! api_key = ...
//!
//! [tenant.acme]
//! daily_processing_units = 250
//! ```
//!
//! # Example
//!
//! ```
//! use fieldlayer::config::ConfigFile;
//!
//! let config = ConfigFile::from_ini_str("[workers]\ncount = 2\n").unwrap();
//! assert_eq!(config.workers.count, 2);
//! assert_eq!(config.cache.clear_ttl_days, 5);
//! ```

mod defaults;
mod file;
mod parser;
mod settings;
mod writer;

pub use defaults::{
    default_ledger_path, default_queue_snapshot_path, DEFAULT_GRID_ZOOM, DEFAULT_LOG_LEVEL,
    DEFAULT_PROVIDER_NAME, DEFAULT_PROVIDER_TIMEOUT_SECS,
};
pub use file::{config_directory, config_file_path, ConfigFileError};
pub use settings::{
    CacheSection, ClusterSection, ConfigFile, GridSection, LedgerSection, LoggingSection,
    PipelineSection, ProviderSection, QueueSection, QuotaSection, TenantSection, WorkersSection,
};
