use std::sync::Arc;

use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::broadcast;

use crate::{
    auth::LocalAccount,
    config::Config,
    models::{AppointmentRow, ServiceOrder},
    shadow::ShadowCache,
    storage::PhotoStorage,
};

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<Config>,
    pub local_accounts: Arc<Vec<LocalAccount>>,
    pub shadow: Arc<ShadowCache>,
    pub storage: PhotoStorage,
    pub events: broadcast::Sender<ServerEvent>,
}

impl AppState {
    /// Fire-and-forget: no subscribers is not an error.
    pub fn publish(&self, event: ServerEvent) {
        let _ = self.events.send(event);
    }
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct ServerEvent {
    pub kind: String,
    pub order_id: Option<String>,
    pub appointment_id: Option<String>,
    pub status: Option<String>,
    pub budget_status: Option<String>,
    pub client_name: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
}

impl ServerEvent {
    pub fn from_order(kind: &str, order: &ServiceOrder) -> Self {
        Self {
            kind: kind.to_string(),
            order_id: Some(order.id.clone()),
            status: Some(order.status.to_string()),
            budget_status: Some(order.budget_status.to_string()),
            client_name: Some(order.client_name.clone()),
            date: Some(order.due_date.clone()),
            ..Self::default()
        }
    }

    pub fn from_appointment(kind: &str, row: &AppointmentRow) -> Self {
        Self {
            kind: kind.to_string(),
            appointment_id: Some(row.id.clone()),
            status: Some(row.status.clone()),
            client_name: Some(row.client_name.clone()),
            date: Some(row.date.clone()),
            time: Some(row.time.clone()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
pub async fn test_state() -> (AppState, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::for_tests(dir.path());
    let db = crate::db::test_pool().await;
    crate::db::seed_defaults(&db, &config.accounts).await.unwrap();
    let local_accounts = crate::auth::local_accounts(&config.accounts).unwrap();
    let (events, _) = broadcast::channel(16);

    let state = AppState {
        db,
        shadow: Arc::new(ShadowCache::new(Some(config.shadow_path.clone()))),
        storage: PhotoStorage::new(config.upload_dir.clone()),
        local_accounts: Arc::new(local_accounts),
        config: Arc::new(config),
        events,
    };
    (state, dir)
}
