//! Pure clustering pass over a set of pending mappings.

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use super::types::{ClusterError, ClusterPlan, ClusterSettings, LandCluster};
use crate::coord::BoundingBox;
use crate::ids::{LandId, TenantId};
use crate::mapper::LandTileMapping;
use crate::queue::Priority;

/// Stable cluster key: hex SHA-256 over the sorted, newline-joined land IDs.
pub fn cluster_key(land_ids: &[LandId]) -> String {
    let mut sorted: Vec<&str> = land_ids.iter().map(|l| l.as_str()).collect();
    sorted.sort_unstable();
    let mut hasher = Sha256::new();
    for (i, id) in sorted.iter().enumerate() {
        if i > 0 {
            hasher.update(b"\n");
        }
        hasher.update(id.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Queue priority for a group of lands.
///
/// Never-cached lands are maximally stale. Expired lands start at
/// [`Priority::EXPIRED_BASE`] and gain 5 per day overdue (capped at +45).
/// Lands only flagged for refresh get [`Priority::REFRESH`]. Explicit
/// requested priorities raise the result.
pub fn derive_priority<'a>(
    lands: impl IntoIterator<Item = &'a LandTileMapping>,
    now: DateTime<Utc>,
) -> Priority {
    let mut never_cached = false;
    let mut oldest: Option<DateTime<Utc>> = None;
    let mut requested: Option<i32> = None;

    for land in lands {
        match land.cache_expiry {
            None => never_cached = true,
            Some(expiry) => oldest = Some(oldest.map_or(expiry, |o| o.min(expiry))),
        }
        if let Some(r) = land.requested_priority {
            requested = Some(requested.map_or(r, |p| p.max(r)));
        }
    }

    let derived = match (never_cached, oldest) {
        (true, _) | (false, None) => Priority::MAX,
        (false, Some(expiry)) if expiry < now => {
            let days = (now - expiry).num_days().clamp(0, 9);
            Priority(Priority::EXPIRED_BASE.0 + (days as i32) * 5)
        }
        (false, Some(_)) => Priority::REFRESH,
    };

    match requested {
        Some(r) => derived.max(Priority(r)),
        None => derived,
    }
}

#[derive(Debug, Clone)]
struct Group {
    members: Vec<usize>,
    bbox: BoundingBox,
}

#[derive(Debug, Clone, Copy)]
struct MergeCandidate {
    area_km2: f64,
    a: usize,
    b: usize,
}

impl PartialEq for MergeCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MergeCandidate {}

impl PartialOrd for MergeCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.area_km2
            .total_cmp(&other.area_km2)
            .then(self.a.cmp(&other.a))
            .then(self.b.cmp(&other.b))
    }
}

fn union_bbox(lands: &[&LandTileMapping], members: &[usize]) -> BoundingBox {
    members
        .iter()
        .map(|&i| lands[i].bbox)
        .reduce(|acc, b| acc.union(&b))
        .unwrap_or(BoundingBox::new(0.0, 0.0, 0.0, 0.0))
}

fn fits(bbox: &BoundingBox, count: usize, settings: &ClusterSettings) -> bool {
    count <= settings.max_lands && bbox.area_km2() <= settings.max_area_km2
}

/// Splits at the median of the longer axis until every piece fits.
fn split_to_fit(
    lands: &[&LandTileMapping],
    mut members: Vec<usize>,
    settings: &ClusterSettings,
    out: &mut Vec<Group>,
) {
    let bbox = union_bbox(lands, &members);
    if members.len() <= 1 || fits(&bbox, members.len(), settings) {
        out.push(Group { members, bbox });
        return;
    }

    let by_lon = bbox.width_km() >= bbox.height_km();
    members.sort_by(|&x, &y| {
        let (cx, cy) = (lands[x].centroid, lands[y].centroid);
        let primary = if by_lon {
            cx.lon.total_cmp(&cy.lon)
        } else {
            cx.lat.total_cmp(&cy.lat)
        };
        primary.then_with(|| lands[x].land_id.cmp(&lands[y].land_id))
    });
    let upper = members.split_off(members.len() / 2);
    split_to_fit(lands, members, settings, out);
    split_to_fit(lands, upper, settings, out);
}

/// Whether two boxes are within one coarse cell of each other.
fn adjacent(a: &BoundingBox, b: &BoundingBox, cell: f64) -> bool {
    a.west - cell <= b.east
        && b.west - cell <= a.east
        && a.south - cell <= b.north
        && b.south - cell <= a.north
}

/// Live groups by every coarse cell their bbox touches.
///
/// Two groups can only be adjacent when one touches a cell in the other's
/// 3x3 neighbourhood, so merge candidates come from here instead of from
/// every pair.
struct CellIndex {
    cell: f64,
    cells: HashMap<(i64, i64), Vec<usize>>,
}

impl CellIndex {
    fn new(cell: f64) -> Self {
        Self {
            cell,
            cells: HashMap::new(),
        }
    }

    /// Cell rows and columns covered by `bbox`, widened by `margin` cells.
    fn span(&self, bbox: &BoundingBox, margin: i64) -> impl Iterator<Item = (i64, i64)> {
        let cell_of = |v: f64| (v / self.cell).floor() as i64;
        let (rows, cols) = (
            cell_of(bbox.south) - margin..=cell_of(bbox.north) + margin,
            cell_of(bbox.west) - margin..=cell_of(bbox.east) + margin,
        );
        rows.flat_map(move |r| cols.clone().map(move |c| (r, c)))
    }

    fn insert(&mut self, id: usize, bbox: &BoundingBox) {
        for key in self.span(bbox, 0).collect::<Vec<_>>() {
            self.cells.entry(key).or_default().push(id);
        }
    }

    fn remove(&mut self, id: usize, bbox: &BoundingBox) {
        for key in self.span(bbox, 0).collect::<Vec<_>>() {
            if let Some(ids) = self.cells.get_mut(&key) {
                ids.retain(|&other| other != id);
                if ids.is_empty() {
                    self.cells.remove(&key);
                }
            }
        }
    }

    /// Groups touching the 3x3 neighbourhood of `bbox`, excluding `id`.
    fn neighbours(&self, id: usize, bbox: &BoundingBox) -> BTreeSet<usize> {
        self.span(bbox, 1)
            .filter_map(|key| self.cells.get(&key))
            .flatten()
            .copied()
            .filter(|&other| other != id)
            .collect()
    }
}

fn candidate(
    groups: &[Option<Group>],
    a: usize,
    b: usize,
    settings: &ClusterSettings,
) -> Option<MergeCandidate> {
    let (ga, gb) = (groups[a].as_ref()?, groups[b].as_ref()?);
    if !adjacent(&ga.bbox, &gb.bbox, settings.cell_size_deg) {
        return None;
    }
    let merged = ga.bbox.union(&gb.bbox);
    let count = ga.members.len() + gb.members.len();
    fits(&merged, count, settings).then(|| MergeCandidate {
        area_km2: merged.area_km2(),
        a: a.min(b),
        b: a.max(b),
    })
}

/// Clusters one tenant's pending lands.
fn plan_tenant(
    tenant: &TenantId,
    lands: &[&LandTileMapping],
    settings: &ClusterSettings,
    now: DateTime<Utc>,
    plan: &mut ClusterPlan,
) {
    let cell = settings.cell_size_deg.max(f64::EPSILON);

    // 1-2: reject oversized lands, bucket the rest by coarse cell.
    let mut cells: BTreeMap<(i64, i64), Vec<usize>> = BTreeMap::new();
    for (i, land) in lands.iter().enumerate() {
        let area = land.bbox.area_km2();
        if area > settings.max_area_km2 {
            plan.rejected.push(ClusterError::ClusterAreaExceeded {
                land_id: land.land_id.clone(),
                area_km2: area,
                max_area_km2: settings.max_area_km2,
            });
            continue;
        }
        let key = (
            (land.centroid.lat / cell).floor() as i64,
            (land.centroid.lon / cell).floor() as i64,
        );
        cells.entry(key).or_default().push(i);
    }

    // 3: split oversized cells.
    let mut initial = Vec::new();
    for (_, members) in cells {
        split_to_fit(lands, members, settings, &mut initial);
    }

    // 4: greedy merge, smallest merged area first, among neighbouring groups.
    let mut groups: Vec<Option<Group>> = initial.into_iter().map(Some).collect();
    let mut index = CellIndex::new(cell);
    for (id, group) in groups.iter().enumerate() {
        if let Some(group) = group {
            index.insert(id, &group.bbox);
        }
    }
    let mut heap = BinaryHeap::new();
    for a in 0..groups.len() {
        let Some(ga) = &groups[a] else { continue };
        for b in index.neighbours(a, &ga.bbox).into_iter().filter(|&b| b > a) {
            if let Some(c) = candidate(&groups, a, b, settings) {
                heap.push(Reverse(c));
            }
        }
    }

    while let Some(Reverse(c)) = heap.pop() {
        // Candidates whose groups were already merged away are stale.
        if groups[c.a].is_none() || groups[c.b].is_none() {
            continue;
        }
        let (Some(ga), Some(gb)) = (groups[c.a].take(), groups[c.b].take()) else {
            continue;
        };
        index.remove(c.a, &ga.bbox);
        index.remove(c.b, &gb.bbox);
        let mut members = ga.members;
        members.extend(gb.members);
        let merged = Group {
            bbox: ga.bbox.union(&gb.bbox),
            members,
        };
        let k = groups.len();
        index.insert(k, &merged.bbox);
        let neighbours = index.neighbours(k, &merged.bbox);
        groups.push(Some(merged));
        for other in neighbours {
            if let Some(c) = candidate(&groups, other, k, settings) {
                heap.push(Reverse(c));
            }
        }
    }

    // 5: emit clusters.
    for group in groups.into_iter().flatten() {
        let members: Vec<&LandTileMapping> = group.members.iter().map(|&i| lands[i]).collect();
        let mut land_ids: Vec<LandId> = members.iter().map(|m| m.land_id.clone()).collect();
        land_ids.sort();
        let oldest_expiry = if members.iter().any(|m| m.cache_expiry.is_none()) {
            None
        } else {
            members.iter().filter_map(|m| m.cache_expiry).min()
        };
        let revisions = members
            .iter()
            .map(|m| (m.land_id.clone(), m.revision))
            .collect();
        plan.clusters.push(LandCluster {
            key: cluster_key(&land_ids),
            tenant_id: tenant.clone(),
            land_ids,
            revisions,
            bbox: group.bbox,
            area_km2: group.bbox.area_km2(),
            priority: derive_priority(members.iter().copied(), now),
            oldest_expiry,
            created_at: now,
        });
    }
}

/// Clusters pending lands, grouping per tenant.
///
/// Output order is deterministic: tenants sorted, then clusters by key.
pub fn plan_clusters(
    pending: &[LandTileMapping],
    settings: &ClusterSettings,
    now: DateTime<Utc>,
) -> ClusterPlan {
    let mut by_tenant: BTreeMap<&TenantId, Vec<&LandTileMapping>> = BTreeMap::new();
    for mapping in pending {
        by_tenant.entry(&mapping.tenant_id).or_default().push(mapping);
    }

    let mut plan = ClusterPlan::default();
    for (tenant, mut lands) in by_tenant {
        lands.sort_by(|a, b| a.land_id.cmp(&b.land_id));
        let start = plan.clusters.len();
        plan_tenant(tenant, &lands, settings, now, &mut plan);
        plan.clusters[start..].sort_by(|a, b| a.key.cmp(&b.key));
    }
    plan
}
