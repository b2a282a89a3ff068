//! Registry of clusters with an outstanding queue entry.

use dashmap::DashMap;

use super::types::LandCluster;
use crate::ids::LandId;

/// Clusters currently being acquired. A land belongs to at most one.
#[derive(Debug, Default)]
pub struct ActiveClusters {
    clusters: DashMap<String, LandCluster>,
    by_land: DashMap<LandId, String>,
}

impl ActiveClusters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a cluster. Returns `false` if the key is already active or
    /// any of its lands is held by another cluster.
    pub fn insert(&self, cluster: LandCluster) -> bool {
        if self.clusters.contains_key(&cluster.key) {
            return false;
        }
        if cluster.land_ids.iter().any(|l| self.by_land.contains_key(l)) {
            return false;
        }
        for land in &cluster.land_ids {
            self.by_land.insert(land.clone(), cluster.key.clone());
        }
        self.clusters.insert(cluster.key.clone(), cluster);
        true
    }

    /// Releases a cluster and its lands.
    pub fn release(&self, key: &str) -> Option<LandCluster> {
        let (_, cluster) = self.clusters.remove(key)?;
        for land in &cluster.land_ids {
            self.by_land.remove_if(land, |_, k| k == key);
        }
        Some(cluster)
    }

    pub fn get(&self, key: &str) -> Option<LandCluster> {
        self.clusters.get(key).map(|c| c.value().clone())
    }

    pub fn cluster_for_land(&self, land: &LandId) -> Option<String> {
        self.by_land.get(land).map(|k| k.value().clone())
    }

    pub fn contains_land(&self, land: &LandId) -> bool {
        self.by_land.contains_key(land)
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}
