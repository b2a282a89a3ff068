//! FieldLayer - Satellite vegetation-index acquisition for farm parcels
//!
//! This library maps land parcels onto a global tile grid, batches stale
//! parcels into bounding-box acquisition requests, fetches imagery from
//! metered providers, computes vegetation indices and serves the results from
//! an expiring cache.
//!
//! # High-Level API
//!
//! For most use cases, the [`service`] module provides a simplified facade:
//!
//! ```ignore
//! use fieldlayer::service::FieldLayerService;
//! use fieldlayer::config::ConfigFile;
//!
//! let mut service = FieldLayerService::builder(ConfigFile::default()).build()?;
//! service.generate_grid(&[region])?;
//! service.register_land(&parcel)?;
//! service.start();
//! let lookup = service.get(&parcel.land_id, None);
//! ```
//!
//! # Data flow
//!
//! ```text
//! mapper → cluster → queue → provider → compute → cache
//!                          ↘   ledger (observes every stage)  ↙
//! ```

pub mod cache;
pub mod cluster;
pub mod compute;
pub mod config;
pub mod coord;
pub mod grid;
pub mod ids;
pub mod ledger;
pub mod logging;
pub mod mapper;
pub mod provider;
pub mod queue;
pub mod service;
pub mod time;
pub mod usage;
pub mod worker;

/// Version of the FieldLayer library and CLI.
///
/// This is synchronized across all components in the workspace.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
