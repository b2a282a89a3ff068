//! CLI command implementations.
//!
//! # Command Modules
//!
//! - [`init`] - Configuration initialization
//! - [`tile`] - Grid tile lookup for a coordinate
//! - [`run`] - Pipeline run over a lands file (also backs `usage`)
//! - [`report`] - Text and JSON rendering of run results

pub mod init;
pub mod report;
pub mod run;
pub mod tile;
