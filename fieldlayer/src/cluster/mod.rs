//! Cluster builder.
//!
//! Batches geographically close lands that need refresh into one bounding-box
//! acquisition so a single provider call serves many parcels.
//!
//! # Algorithm (per tenant)
//!
//! 1. Drop lands already held by an active cluster; reject lands whose own
//!    bounding box exceeds the area cap.
//! 2. Bucket the rest by coarse cell of their centroid.
//! 3. Split any bucket over a cap at the median of its longer axis until
//!    every piece fits.
//! 4. Greedily merge adjacent pieces, smallest merged area first, while the
//!    merged box stays under the area cap and the land count under the batch
//!    cap.
//!
//! The cluster key is a hash of the sorted land IDs, so the same pending set
//! always produces the same keys.

mod active;
mod builder;
mod daemon;
mod planner;
mod types;

pub use active::ActiveClusters;
pub use builder::{ClusterBuildReport, ClusterBuilder};
pub use daemon::{ClusterScheduler, DEFAULT_SCHEDULE_INTERVAL_SECS};
pub use planner::{cluster_key, derive_priority, plan_clusters};
pub use types::{ClusterError, ClusterPlan, ClusterSettings, LandCluster};
