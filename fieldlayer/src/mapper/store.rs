//! In-memory mapping store.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::types::LandTileMapping;
use crate::ids::{LandId, TenantId};

/// Concurrent map of land ID to its authoritative mapping.
#[derive(Debug, Default)]
pub struct MappingStore {
    pub(super) mappings: DashMap<LandId, LandTileMapping>,
}

impl MappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, land_id: &LandId) -> Option<LandTileMapping> {
        self.mappings.get(land_id).map(|m| m.value().clone())
    }

    pub fn contains(&self, land_id: &LandId) -> bool {
        self.mappings.contains_key(land_id)
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Snapshot of every mapping, sorted by land ID.
    pub fn all(&self) -> Vec<LandTileMapping> {
        let mut all: Vec<_> = self.mappings.iter().map(|m| m.value().clone()).collect();
        all.sort_by(|a, b| a.land_id.cmp(&b.land_id));
        all
    }

    /// Mappings due for acquisition at `now`, sorted by land ID.
    pub fn pending(&self, now: DateTime<Utc>) -> Vec<LandTileMapping> {
        let mut pending: Vec<_> = self
            .mappings
            .iter()
            .filter(|m| m.is_pending(now))
            .map(|m| m.value().clone())
            .collect();
        pending.sort_by(|a, b| a.land_id.cmp(&b.land_id));
        pending
    }

    /// Land IDs owned by `tenant`.
    pub fn lands_for_tenant(&self, tenant: &TenantId) -> Vec<LandId> {
        let mut ids: Vec<_> = self
            .mappings
            .iter()
            .filter(|m| &m.tenant_id == tenant)
            .map(|m| m.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Flags a land for refresh, raising its requested priority.
    ///
    /// Returns `false` when the land has no mapping.
    pub fn mark_needs_refresh(&self, land_id: &LandId, priority: Option<i32>) -> bool {
        let Some(mut mapping) = self.mappings.get_mut(land_id) else {
            return false;
        };
        mapping.needs_refresh = true;
        if let Some(p) = priority {
            mapping.requested_priority = Some(mapping.requested_priority.map_or(p, |old| old.max(p)));
        }
        true
    }

    /// Records a freshly cached index value for a land computed against
    /// mapping `revision`.
    ///
    /// `store` runs under the land's lock, and only while the mapping is
    /// still at `revision`, so a concurrent boundary change either sees the
    /// stored value (and drops it) or makes this a no-op. Clears the refresh
    /// flag and any requested priority. Returns `false` when the land is gone
    /// or its boundary changed since `revision`.
    pub fn record_cached(
        &self,
        land_id: &LandId,
        revision: u64,
        value: f64,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
        store: impl FnOnce(),
    ) -> bool {
        let Some(mut mapping) = self.mappings.get_mut(land_id) else {
            return false;
        };
        if mapping.revision != revision {
            return false;
        }
        store();
        mapping.last_index_value = Some(value);
        mapping.cache_expiry = Some(expires_at);
        mapping.needs_refresh = false;
        mapping.requested_priority = None;
        mapping.updated_at = now;
        true
    }

    #[cfg(test)]
    pub(crate) fn insert_for_test(&self, mapping: LandTileMapping) {
        self.mappings.insert(mapping.land_id.clone(), mapping);
    }

    pub(super) fn remove(&self, land_id: &LandId) -> Option<LandTileMapping> {
        self.mappings.remove(land_id).map(|(_, m)| m)
    }
}
