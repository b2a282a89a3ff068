use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coord::BoundingBox;
use crate::ids::{LandId, TenantId};
use crate::queue::Priority;

/// Default coarse cell edge in degrees.
pub const DEFAULT_CELL_SIZE_DEG: f64 = 0.1;

/// Default cluster area cap in square kilometres.
pub const DEFAULT_MAX_AREA_KM2: f64 = 100.0;

/// Default maximum lands per cluster.
pub const DEFAULT_MAX_LANDS: usize = 50;

/// Clustering limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterSettings {
    pub cell_size_deg: f64,
    pub max_area_km2: f64,
    pub max_lands: usize,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            cell_size_deg: DEFAULT_CELL_SIZE_DEG,
            max_area_km2: DEFAULT_MAX_AREA_KM2,
            max_lands: DEFAULT_MAX_LANDS,
        }
    }
}

/// A batch of lands acquired with one bounding-box request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandCluster {
    /// Hex SHA-256 of the sorted land IDs.
    pub key: String,
    pub tenant_id: TenantId,
    /// Sorted.
    pub land_ids: Vec<LandId>,
    /// Mapping revision of each land when the cluster was planned.
    #[serde(default)]
    pub revisions: BTreeMap<LandId, u64>,
    pub bbox: BoundingBox,
    pub area_km2: f64,
    pub priority: Priority,
    /// Oldest cache expiry in the group; `None` when any land was never cached.
    pub oldest_expiry: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClusterError {
    #[error("land {land_id} covers {area_km2:.2} km², above the cluster cap of {max_area_km2:.2} km²")]
    ClusterAreaExceeded {
        land_id: LandId,
        area_km2: f64,
        max_area_km2: f64,
    },
}

/// Output of a planning pass.
#[derive(Debug, Clone, Default)]
pub struct ClusterPlan {
    pub clusters: Vec<LandCluster>,
    pub rejected: Vec<ClusterError>,
}
