//! Dashboard counts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::{
    db,
    models::{BudgetStatus, ServiceOrder, ServiceStatus},
    shadow::ShadowCache,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub active: i64,
    pub completed_today: i64,
    pub pending: i64,
    pub budget_pending: i64,
    pub budget_approved: i64,
    pub budget_rejected: i64,
}

impl DashboardStats {
    /// `day_start` is an RFC 3339 timestamp in the same shape as `updated_at`.
    pub fn from_orders<'a>(
        orders: impl IntoIterator<Item = &'a ServiceOrder>,
        day_start: &str,
    ) -> Self {
        let mut stats = Self::default();
        for order in orders {
            match order.status {
                ServiceStatus::Active => stats.active += 1,
                ServiceStatus::Pending => stats.pending += 1,
                ServiceStatus::Completed => {
                    if order.updated_at.as_str() >= day_start {
                        stats.completed_today += 1;
                    }
                }
            }
            match order.budget_status {
                BudgetStatus::Pending => stats.budget_pending += 1,
                BudgetStatus::Approved => stats.budget_approved += 1,
                BudgetStatus::Rejected => stats.budget_rejected += 1,
            }
        }
        stats
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsSource {
    Database,
    Shadow,
}

async fn count_status(
    pool: &SqlitePool,
    status: ServiceStatus,
    owner: Option<&str>,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM service_orders WHERE status = ? AND (? IS NULL OR user_id = ?)",
    )
    .bind(status)
    .bind(owner)
    .bind(owner)
    .fetch_one(pool)
    .await
}

async fn count_completed_since(
    pool: &SqlitePool,
    day_start: &str,
    owner: Option<&str>,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        r#"SELECT COUNT(*) FROM service_orders
           WHERE status = ? AND updated_at >= ? AND (? IS NULL OR user_id = ?)"#,
    )
    .bind(ServiceStatus::Completed)
    .bind(day_start)
    .bind(owner)
    .bind(owner)
    .fetch_one(pool)
    .await
}

async fn count_budget(
    pool: &SqlitePool,
    budget_status: BudgetStatus,
    owner: Option<&str>,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM service_orders WHERE budget_status = ? AND (? IS NULL OR user_id = ?)",
    )
    .bind(budget_status)
    .bind(owner)
    .bind(owner)
    .fetch_one(pool)
    .await
}

/// Runs the six counts concurrently. Any failure discards the whole batch.
pub async fn query_stats(
    pool: &SqlitePool,
    owner: Option<&str>,
    now: DateTime<Utc>,
) -> Result<DashboardStats, sqlx::Error> {
    let day_start = db::day_start(now);
    let (active, completed_today, pending, budget_pending, budget_approved, budget_rejected) = tokio::try_join!(
        count_status(pool, ServiceStatus::Active, owner),
        count_completed_since(pool, &day_start, owner),
        count_status(pool, ServiceStatus::Pending, owner),
        count_budget(pool, BudgetStatus::Pending, owner),
        count_budget(pool, BudgetStatus::Approved, owner),
        count_budget(pool, BudgetStatus::Rejected, owner),
    )?;

    Ok(DashboardStats {
        active,
        completed_today,
        pending,
        budget_pending,
        budget_approved,
        budget_rejected,
    })
}

/// Database counts, or the shadow cache's recomputed counts when the batch
/// fails.
pub async fn load_stats(
    pool: &SqlitePool,
    shadow: &ShadowCache,
    owner: Option<&str>,
    now: DateTime<Utc>,
) -> (DashboardStats, StatsSource) {
    match query_stats(pool, owner, now).await {
        Ok(stats) => (stats, StatsSource::Database),
        Err(err) => {
            log::warn!("Dashboard counts unavailable, using shadow copy: {err}");
            let stats = shadow.stats(owner, &db::day_start(now)).await;
            (stats, StatsSource::Shadow)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::test_pool,
        orders::{self, sample_order},
        shadow::SyncState,
    };
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 5, 15, 0, 0).unwrap()
    }

    fn fixture() -> Vec<ServiceOrder> {
        let mut orders = Vec::new();

        let mut active = sample_order("Active Approved", "user-1");
        active.status = ServiceStatus::Active;
        active.budget_status = BudgetStatus::Approved;
        orders.push(active);

        let mut active_pending = sample_order("Active Pending Budget", "user-2");
        active_pending.status = ServiceStatus::Active;
        orders.push(active_pending);

        let mut done_today = sample_order("Done Today", "user-1");
        done_today.status = ServiceStatus::Completed;
        done_today.budget_status = BudgetStatus::Approved;
        done_today.updated_at = "2024-06-05T08:00:00Z".to_string();
        orders.push(done_today);

        let mut done_yesterday = sample_order("Done Yesterday", "user-1");
        done_yesterday.status = ServiceStatus::Completed;
        done_yesterday.budget_status = BudgetStatus::Rejected;
        done_yesterday.updated_at = "2024-06-04T23:59:59Z".to_string();
        orders.push(done_yesterday);

        orders.push(sample_order("Fresh", "user-2"));
        orders
    }

    #[test]
    fn counts_each_predicate() {
        let orders = fixture();
        let stats = DashboardStats::from_orders(&orders, &db::day_start(now()));
        assert_eq!(
            stats,
            DashboardStats {
                active: 2,
                completed_today: 1,
                pending: 1,
                budget_pending: 2,
                budget_approved: 2,
                budget_rejected: 1,
            }
        );
    }

    #[tokio::test]
    async fn database_counts_match_shadow_counts() {
        let pool = test_pool().await;
        let shadow = ShadowCache::new(None);
        for order in fixture() {
            orders::insert(&pool, &order, &order.user_id).await.unwrap();
            shadow.record(order, SyncState::Synced).await.unwrap();
        }

        let day_start = db::day_start(now());
        for owner in [None, Some("user-1"), Some("user-2")] {
            let from_db = query_stats(&pool, owner, now()).await.unwrap();
            assert_eq!(from_db, shadow.stats(owner, &day_start).await, "owner {owner:?}");
        }

        let (stats, source) = load_stats(&pool, &shadow, Some("user-2"), now()).await;
        assert_eq!(source, StatsSource::Database);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.completed_today, 0);
    }

    #[tokio::test]
    async fn falls_back_to_shadow_when_queries_fail() {
        let pool = test_pool().await;
        let shadow = ShadowCache::new(None);
        for order in fixture() {
            shadow.record(order, SyncState::Pending).await.unwrap();
        }
        pool.close().await;

        let (stats, source) = load_stats(&pool, &shadow, None, now()).await;
        assert_eq!(source, StatsSource::Shadow);
        assert_eq!(stats.active, 2);
        assert_eq!(stats.completed_today, 1);
        assert_eq!(stats.budget_rejected, 1);
    }
}
