//! High-level service facade for FieldLayer operations.
//!
//! This module wires every component from configuration and exposes the
//! platform-facing operations, following the Facade pattern.
//!
//! # Example
//!
//! ```ignore
//! use fieldlayer::config::ConfigFile;
//! use fieldlayer::queue::Priority;
//! use fieldlayer::service::FieldLayerService;
//!
//! let mut service = FieldLayerService::builder(ConfigFile::load()?).build()?;
//! service.generate_grid(&regions)?;
//! for parcel in &parcels {
//!     service.register_land(parcel)?;
//! }
//! service.start();
//!
//! // Reads come from the cache only.
//! let lookup = service.get(&land_id, None);
//!
//! // Ask for fresher data without bypassing the cluster builder.
//! service.request_refresh(&land_id, Priority::REFRESH)?;
//!
//! service.shutdown().await?;
//! ```

mod builder;
mod error;
mod facade;
mod trigger;

pub use builder::FieldLayerServiceBuilder;
pub use error::ServiceError;
pub use facade::FieldLayerService;
pub use trigger::LandRefreshTrigger;
