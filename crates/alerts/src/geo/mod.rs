//! Geospatial subscriber index.
//!
//! Answers "which subscribers are within `r` meters of `p`" without scanning
//! every subscriber. Subscribers are bucketed into a latitude/longitude grid;
//! a query visits only the cells overlapping the search cap and then applies
//! the exact haversine test. Callers only see the distance contract, so the
//! bucketing strategy can change without touching them.

mod distance;
mod grid;

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

pub use distance::{haversine_m, within, EARTH_RADIUS_M};
pub use grid::{CellKey, Coverage, Grid};

use crate::entities::{GeoPoint, SessionId, SubscriberRecord};
use crate::errors::AlertResult;

/// A subscriber matched by a radius query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Nearby {
    pub session_id: SessionId,
    pub distance_m: f64,
}

#[derive(Debug, Default)]
struct IndexState {
    records: HashMap<SessionId, SubscriberRecord>,
    cells: HashMap<CellKey, HashSet<SessionId>>,
}

impl IndexState {
    fn detach(&mut self, grid: &Grid, session_id: &SessionId) -> Option<SubscriberRecord> {
        let record = self.records.remove(session_id)?;
        let key = grid.cell_of(record.location);
        if let Some(bucket) = self.cells.get_mut(&key) {
            bucket.remove(session_id);
            if bucket.is_empty() {
                self.cells.remove(&key);
            }
        }
        Some(record)
    }

    fn attach(&mut self, grid: &Grid, record: SubscriberRecord) {
        self.cells
            .entry(grid.cell_of(record.location))
            .or_default()
            .insert(record.session_id);
        self.records.insert(record.session_id, record);
    }
}

/// Concurrent subscriber index.
///
/// Every mutation happens under one write lock, so a query never observes a
/// subscriber half-moved between cells.
pub struct GeoIndex {
    grid: Grid,
    state: RwLock<IndexState>,
}

impl GeoIndex {
    /// Create an empty index with the given cell size in degrees.
    #[must_use]
    pub fn new(cell_degrees: f64) -> Self {
        Self {
            grid: Grid::new(cell_degrees),
            state: RwLock::new(IndexState::default()),
        }
    }

    /// Rebuild an index from persisted records.
    pub fn from_records(
        cell_degrees: f64,
        records: impl IntoIterator<Item = SubscriberRecord>,
    ) -> AlertResult<Self> {
        let grid = Grid::new(cell_degrees);
        let mut state = IndexState::default();
        for record in records {
            record.location.validate()?;
            state.detach(&grid, &record.session_id);
            state.attach(&grid, record);
        }
        Ok(Self {
            grid,
            state: RwLock::new(state),
        })
    }

    /// Insert or move a subscriber. Idempotent.
    pub async fn upsert(
        &self,
        session_id: SessionId,
        location: GeoPoint,
        registered_at: DateTime<Utc>,
    ) -> AlertResult<()> {
        location.validate()?;
        let mut state = self.state.write().await;
        state.detach(&self.grid, &session_id);
        state.attach(
            &self.grid,
            SubscriberRecord {
                session_id,
                location,
                registered_at,
            },
        );
        debug!(session_id = %session_id, location = %location, "Subscriber location updated");
        Ok(())
    }

    /// Remove a subscriber. No-op if absent.
    pub async fn remove(&self, session_id: &SessionId) -> bool {
        let removed = self
            .state
            .write()
            .await
            .detach(&self.grid, session_id)
            .is_some();
        if removed {
            debug!(session_id = %session_id, "Subscriber removed");
        }
        removed
    }

    /// Current record for a subscriber.
    pub async fn get(&self, session_id: &SessionId) -> Option<SubscriberRecord> {
        self.state.read().await.records.get(session_id).cloned()
    }

    /// Number of tracked subscribers.
    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Copy of every record, for persistence.
    pub async fn snapshot(&self) -> Vec<SubscriberRecord> {
        let mut records: Vec<_> = self.state.read().await.records.values().cloned().collect();
        records.sort_by_key(|r| r.session_id);
        records
    }

    /// Session ids within `radius_m` of `center`.
    pub async fn query(&self, center: GeoPoint, radius_m: f64) -> HashSet<SessionId> {
        self.query_with_distance(center, radius_m)
            .await
            .into_iter()
            .map(|n| n.session_id)
            .collect()
    }

    /// Subscribers within `radius_m` of `center`, nearest first.
    pub async fn query_with_distance(&self, center: GeoPoint, radius_m: f64) -> Vec<Nearby> {
        if radius_m.is_nan() || radius_m < 0.0 {
            return Vec::new();
        }

        let state = self.state.read().await;
        let coverage = self.grid.coverage(center, radius_m);

        let mut matches = Vec::new();
        let mut consider = |record: &SubscriberRecord| {
            let distance_m = haversine_m(center, record.location);
            if distance_m <= radius_m {
                matches.push(Nearby {
                    session_id: record.session_id,
                    distance_m,
                });
            }
        };

        if matches!(coverage, Coverage::Everything) {
            state.records.values().for_each(&mut consider);
        } else if coverage.cell_count() >= state.cells.len() {
            // Fewer occupied cells than covered cells: walk the occupied ones.
            for (key, bucket) in &state.cells {
                if !coverage.contains(*key) {
                    continue;
                }
                for session_id in bucket {
                    if let Some(record) = state.records.get(session_id) {
                        consider(record);
                    }
                }
            }
        } else {
            for key in coverage.keys() {
                let Some(bucket) = state.cells.get(&key) else {
                    continue;
                };
                for session_id in bucket {
                    if let Some(record) = state.records.get(session_id) {
                        consider(record);
                    }
                }
            }
        }
        drop(state);

        matches.sort_by(|a, b| {
            a.distance_m
                .total_cmp(&b.distance_m)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        debug!(
            center = %center,
            radius_m,
            matched = matches.len(),
            "Geo query"
        );
        matches
    }
}
