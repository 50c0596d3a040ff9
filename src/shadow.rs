//! Offline copy of service orders.
//!
//! The database stays the source of truth. The cache mirrors every write that
//! succeeds, keeps writes the database rejected as `pending` until
//! [`reconcile`] pushes them back, and answers dashboard and list reads when
//! the database cannot.

use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::{
    dashboard::DashboardStats,
    db,
    models::ServiceOrder,
    orders::{self, OrderFilter},
};

#[derive(Debug, Error)]
pub enum ShadowError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Synced,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowEntry {
    pub order: ServiceOrder,
    pub sync: SyncState,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    orders: Vec<ShadowEntry>,
    stats: Option<DashboardStats>,
}

impl Snapshot {
    fn refresh_stats(&mut self) {
        let day_start = db::day_start(Utc::now());
        self.stats = Some(DashboardStats::from_orders(
            self.orders.iter().map(|entry| &entry.order),
            &day_start,
        ));
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub synced: usize,
    pub failed: usize,
}

pub struct ShadowCache {
    path: Option<PathBuf>,
    inner: RwLock<Snapshot>,
}

impl ShadowCache {
    /// `None` keeps the cache in memory only.
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            inner: RwLock::new(Snapshot::default()),
        }
    }

    /// Replaces the in-memory state with the file contents, if any.
    pub async fn load(&self) -> Result<usize, ShadowError> {
        let Some(path) = self.path.as_ref() else {
            return Ok(0);
        };
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        let count = snapshot.orders.len();
        *self.inner.write().await = snapshot;
        Ok(count)
    }

    pub async fn clear(&self) -> Result<(), ShadowError> {
        let mut snapshot = self.inner.write().await;
        *snapshot = Snapshot::default();
        self.persist(&snapshot).await
    }

    /// Loads the database copy as the new baseline. Pending entries win over
    /// the stored row with the same id and stay pending.
    pub async fn prime(&self, orders: Vec<ServiceOrder>) -> Result<(), ShadowError> {
        let mut snapshot = self.inner.write().await;
        let mut pending: Vec<ShadowEntry> = snapshot
            .orders
            .drain(..)
            .filter(|entry| entry.sync == SyncState::Pending)
            .collect();
        let mut primed: Vec<ShadowEntry> = orders
            .into_iter()
            .map(|order| {
                match pending.iter().position(|entry| entry.order.id == order.id) {
                    Some(index) => pending.swap_remove(index),
                    None => ShadowEntry {
                        order,
                        sync: SyncState::Synced,
                    },
                }
            })
            .collect();
        primed.append(&mut pending);
        snapshot.orders = primed;
        snapshot.refresh_stats();
        self.persist(&snapshot).await
    }

    /// Inserts or replaces the copy of `order`.
    pub async fn record(&self, order: ServiceOrder, sync: SyncState) -> Result<(), ShadowError> {
        let mut snapshot = self.inner.write().await;
        match snapshot
            .orders
            .iter_mut()
            .find(|entry| entry.order.id == order.id)
        {
            Some(entry) => {
                entry.order = order;
                // A later synced write does not clear an earlier pending one.
                if entry.sync == SyncState::Synced {
                    entry.sync = sync;
                }
            }
            None => snapshot.orders.push(ShadowEntry { order, sync }),
        }
        snapshot.refresh_stats();
        self.persist(&snapshot).await
    }

    pub async fn get(&self, id: &str) -> Option<ShadowEntry> {
        self.inner
            .read()
            .await
            .orders
            .iter()
            .find(|entry| entry.order.id == id)
            .cloned()
    }

    pub async fn list(&self, filter: &OrderFilter) -> Vec<ServiceOrder> {
        let snapshot = self.inner.read().await;
        let mut orders: Vec<ServiceOrder> = snapshot
            .orders
            .iter()
            .map(|entry| &entry.order)
            .filter(|order| filter.matches(order))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        orders
    }

    pub async fn pending(&self) -> Vec<ServiceOrder> {
        self.inner
            .read()
            .await
            .orders
            .iter()
            .filter(|entry| entry.sync == SyncState::Pending)
            .map(|entry| entry.order.clone())
            .collect()
    }

    pub async fn pending_count(&self) -> usize {
        self.inner
            .read()
            .await
            .orders
            .iter()
            .filter(|entry| entry.sync == SyncState::Pending)
            .count()
    }

    pub async fn mark_synced(&self, id: &str) -> Result<(), ShadowError> {
        let mut snapshot = self.inner.write().await;
        if let Some(entry) = snapshot.orders.iter_mut().find(|entry| entry.order.id == id) {
            entry.sync = SyncState::Synced;
        }
        self.persist(&snapshot).await
    }

    /// Counts recomputed from the cached set; `owner` narrows to one user.
    pub async fn stats(&self, owner: Option<&str>, day_start: &str) -> DashboardStats {
        let snapshot = self.inner.read().await;
        DashboardStats::from_orders(
            snapshot
                .orders
                .iter()
                .map(|entry| &entry.order)
                .filter(|order| owner.map_or(true, |owner| order.user_id == owner)),
            day_start,
        )
    }

    /// Last stats derived for the whole set, as persisted alongside it.
    pub async fn last_stats(&self) -> Option<DashboardStats> {
        self.inner.read().await.stats
    }

    /// Startup sequence: push anything left pending by the previous run, then
    /// start over from the database. Entries the database still rejects are
    /// carried into the new baseline instead of being dropped.
    pub async fn restore(&self, pool: &SqlitePool) -> Result<ReconcileReport, ShadowError> {
        let loaded = self.load().await?;
        let report = reconcile(pool, self).await;
        if loaded > 0 {
            log::info!(
                "Shadow cache: {loaded} entries on disk, {} synced, {} still failing",
                report.synced,
                report.failed
            );
        }
        if report.failed > 0 {
            log::warn!(
                "Shadow cache: {} pending entries could not be written back and will be kept",
                report.failed
            );
        } else {
            self.clear().await?;
        }
        match orders::all(pool).await {
            Ok(orders) => self.prime(orders).await?,
            Err(err) => log::warn!("Shadow cache: could not prime from database: {err}"),
        }
        Ok(report)
    }

    async fn persist(&self, snapshot: &Snapshot) -> Result<(), ShadowError> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        db::ensure_parent_dir(path)?;
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

/// Writes every pending entry back to the database.
pub async fn reconcile(pool: &SqlitePool, cache: &ShadowCache) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    for order in cache.pending().await {
        match orders::upsert(pool, &order).await {
            Ok(()) => {
                report.synced += 1;
                if let Err(err) = cache.mark_synced(&order.id).await {
                    log::warn!("Shadow cache: could not persist sync of {}: {err}", order.id);
                }
            }
            Err(err) => {
                report.failed += 1;
                log::warn!("Shadow cache: order {} still pending: {err}", order.id);
            }
        }
    }
    report
}
