//! Service order repository.
//!
//! SQLite is the source of truth. Every mutation that reaches the database
//! also appends a row to `service_history`.

use std::collections::HashMap;

use chrono::NaiveDate;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use thiserror::Error;

use crate::{
    auth::new_id,
    db,
    models::{
        BudgetStatus, ServiceHistoryRow, ServiceOrder, ServiceOrderRow, ServiceStatus, ServiceType,
        HISTORY_BUDGET_CHANGED, HISTORY_CREATED, HISTORY_PHOTO_ADDED, HISTORY_RECONCILED,
        HISTORY_STATUS_CHANGED,
    },
};

const ORDER_COLUMNS: &str = "id, client_name, phone, address, service_type, due_date, status, \
                             budget_cents, budget_status, user_id, created_at, updated_at";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrderInputError {
    #[error("Client name is required.")]
    MissingClientName,
    #[error("Phone number is required.")]
    MissingPhone,
    #[error("Address is required.")]
    MissingAddress,
    #[error("Due date is required.")]
    MissingDueDate,
    #[error("Due date must look like YYYY-MM-DD.")]
    InvalidDueDate,
    #[error("Please choose a valid service type.")]
    InvalidServiceType,
    #[error("Please choose a valid budget status.")]
    InvalidBudgetStatus,
    #[error("Budget must be a non-negative amount with at most two decimals.")]
    InvalidBudget,
}

/// Raw form input for a new order.
#[derive(Debug, Clone, Default)]
pub struct NewServiceOrder {
    pub client_name: String,
    pub phone: String,
    pub address: String,
    pub service_type: String,
    pub due_date: String,
    pub budget: String,
    pub budget_status: String,
}

impl NewServiceOrder {
    /// Collects every problem so the form can show them together.
    pub fn validate(&self, owner: &str, now: &str) -> Result<ServiceOrder, Vec<OrderInputError>> {
        let mut errors = Vec::new();
        if self.client_name.trim().is_empty() {
            errors.push(OrderInputError::MissingClientName);
        }
        if self.phone.trim().is_empty() {
            errors.push(OrderInputError::MissingPhone);
        }
        if self.address.trim().is_empty() {
            errors.push(OrderInputError::MissingAddress);
        }
        if self.due_date.trim().is_empty() {
            errors.push(OrderInputError::MissingDueDate);
        } else if NaiveDate::parse_from_str(self.due_date.trim(), "%Y-%m-%d").is_err() {
            errors.push(OrderInputError::InvalidDueDate);
        }
        let service_type = self.service_type.parse::<ServiceType>();
        if service_type.is_err() {
            errors.push(OrderInputError::InvalidServiceType);
        }
        let budget_status = if self.budget_status.trim().is_empty() {
            Ok(BudgetStatus::Pending)
        } else {
            self.budget_status.parse::<BudgetStatus>()
        };
        if budget_status.is_err() {
            errors.push(OrderInputError::InvalidBudgetStatus);
        }
        let budget_cents = parse_amount(&self.budget);
        if budget_cents.is_none() {
            errors.push(OrderInputError::InvalidBudget);
        }

        match (service_type, budget_status, budget_cents) {
            (Ok(service_type), Ok(budget_status), Some(budget_cents)) if errors.is_empty() => {
                Ok(ServiceOrder {
                    id: new_id(),
                    client_name: self.client_name.trim().to_string(),
                    phone: self.phone.trim().to_string(),
                    address: self.address.trim().to_string(),
                    service_type,
                    due_date: self.due_date.trim().to_string(),
                    status: ServiceStatus::Pending,
                    budget_cents,
                    budget_status,
                    photos: Vec::new(),
                    user_id: owner.to_string(),
                    created_at: now.to_string(),
                    updated_at: now.to_string(),
                })
            }
            _ => Err(errors),
        }
    }
}

/// Parses `"1234"`, `"1234.5"` or `"1234.50"` into minor units. Blank means 0.
pub fn parse_amount(input: &str) -> Option<i64> {
    let input = input.trim();
    if input.is_empty() {
        return Some(0);
    }
    let (whole, fraction) = match input.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (input, ""),
    };
    if whole.is_empty() || !whole.chars().all(|ch| ch.is_ascii_digit()) {
        return None;
    }
    if fraction.len() > 2 || !fraction.chars().all(|ch| ch.is_ascii_digit()) {
        return None;
    }
    let whole: i64 = whole.parse().ok()?;
    let fraction: i64 = match fraction.len() {
        0 => 0,
        1 => fraction.parse::<i64>().ok()? * 10,
        _ => fraction.parse().ok()?,
    };
    whole.checked_mul(100)?.checked_add(fraction)
}

#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub status: Option<ServiceStatus>,
    pub budget_status: Option<BudgetStatus>,
    pub service_type: Option<ServiceType>,
    pub client_name: Option<String>,
    pub owner: Option<String>,
}

impl OrderFilter {
    pub fn matches(&self, order: &ServiceOrder) -> bool {
        self.status.map_or(true, |status| order.status == status)
            && self
                .budget_status
                .map_or(true, |status| order.budget_status == status)
            && self
                .service_type
                .map_or(true, |service_type| order.service_type == service_type)
            && self.owner.as_deref().map_or(true, |owner| order.user_id == owner)
            && self.matches_name(&order.client_name)
    }

    /// Case-insensitive substring match. Runs in Rust for both stores since
    /// SQLite's `lower()` only folds ASCII.
    pub fn matches_name(&self, client_name: &str) -> bool {
        match self.client_name.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(name) => client_name.to_lowercase().contains(&name.to_lowercase()),
        }
    }
}

pub async fn insert(pool: &SqlitePool, order: &ServiceOrder, actor: &str) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        r#"INSERT INTO service_orders
           (id, client_name, phone, address, service_type, due_date, status, budget_cents, budget_status, user_id, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&order.id)
    .bind(&order.client_name)
    .bind(&order.phone)
    .bind(&order.address)
    .bind(order.service_type)
    .bind(&order.due_date)
    .bind(order.status)
    .bind(order.budget_cents)
    .bind(order.budget_status)
    .bind(&order.user_id)
    .bind(&order.created_at)
    .bind(&order.updated_at)
    .execute(&mut *tx)
    .await?;

    for url in &order.photos {
        sqlx::query("INSERT INTO service_photos (id, service_id, url, created_at) VALUES (?, ?, ?, ?)")
            .bind(new_id())
            .bind(&order.id)
            .bind(url)
            .bind(&order.created_at)
            .execute(&mut *tx)
            .await?;
    }

    record_history(
        &mut tx,
        &order.id,
        HISTORY_CREATED,
        None,
        Some(order.status.as_str()),
        Some(actor),
    )
    .await?;
    tx.commit().await
}

/// Writes a shadow copy back: inserts it, or overwrites the mutable fields
/// of the stored row. Photos missing from the database are added.
pub async fn upsert(pool: &SqlitePool, order: &ServiceOrder) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        r#"INSERT INTO service_orders
           (id, client_name, phone, address, service_type, due_date, status, budget_cents, budget_status, user_id, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
           ON CONFLICT(id) DO UPDATE SET
             status = excluded.status,
             budget_status = excluded.budget_status,
             budget_cents = excluded.budget_cents,
             updated_at = excluded.updated_at"#,
    )
    .bind(&order.id)
    .bind(&order.client_name)
    .bind(&order.phone)
    .bind(&order.address)
    .bind(order.service_type)
    .bind(&order.due_date)
    .bind(order.status)
    .bind(order.budget_cents)
    .bind(order.budget_status)
    .bind(&order.user_id)
    .bind(&order.created_at)
    .bind(&order.updated_at)
    .execute(&mut *tx)
    .await?;

    let stored = sqlx::query_scalar::<_, String>("SELECT url FROM service_photos WHERE service_id = ?")
        .bind(&order.id)
        .fetch_all(&mut *tx)
        .await?;
    for url in order.photos.iter().filter(|url| !stored.contains(url)) {
        sqlx::query("INSERT INTO service_photos (id, service_id, url, created_at) VALUES (?, ?, ?, ?)")
            .bind(new_id())
            .bind(&order.id)
            .bind(url)
            .bind(&order.updated_at)
            .execute(&mut *tx)
            .await?;
    }

    record_history(
        &mut tx,
        &order.id,
        HISTORY_RECONCILED,
        None,
        Some(order.status.as_str()),
        None,
    )
    .await?;
    tx.commit().await
}

pub async fn fetch(pool: &SqlitePool, id: &str) -> Result<Option<ServiceOrder>, sqlx::Error> {
    let row = sqlx::query_as::<_, ServiceOrderRow>(&format!(
        "SELECT {ORDER_COLUMNS} FROM service_orders WHERE id = ? LIMIT 1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let photos = sqlx::query_scalar::<_, String>(
        "SELECT url FROM service_photos WHERE service_id = ? ORDER BY created_at, rowid",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    Ok(Some(ServiceOrder::from_row(row, photos)))
}

pub async fn list(pool: &SqlitePool, filter: &OrderFilter) -> Result<Vec<ServiceOrder>, sqlx::Error> {
    let mut query: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT {ORDER_COLUMNS} FROM service_orders WHERE 1 = 1"));
    if let Some(status) = filter.status {
        query.push(" AND status = ").push_bind(status);
    }
    if let Some(budget_status) = filter.budget_status {
        query.push(" AND budget_status = ").push_bind(budget_status);
    }
    if let Some(service_type) = filter.service_type {
        query.push(" AND service_type = ").push_bind(service_type);
    }
    if let Some(owner) = filter.owner.as_deref() {
        query.push(" AND user_id = ").push_bind(owner.to_string());
    }
    query.push(" ORDER BY updated_at DESC, created_at DESC");

    let mut rows = query
        .build_query_as::<ServiceOrderRow>()
        .fetch_all(pool)
        .await?;
    rows.retain(|row| filter.matches_name(&row.client_name));
    with_photos(pool, rows).await
}

pub async fn all(pool: &SqlitePool) -> Result<Vec<ServiceOrder>, sqlx::Error> {
    list(pool, &OrderFilter::default()).await
}

async fn with_photos(
    pool: &SqlitePool,
    rows: Vec<ServiceOrderRow>,
) -> Result<Vec<ServiceOrder>, sqlx::Error> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let mut query: QueryBuilder<Sqlite> =
        QueryBuilder::new("SELECT service_id, url FROM service_photos WHERE service_id IN (");
    let mut ids = query.separated(", ");
    for row in &rows {
        ids.push_bind(row.id.clone());
    }
    ids.push_unseparated(") ORDER BY created_at, rowid");

    let photo_rows = query
        .build_query_as::<(String, String)>()
        .fetch_all(pool)
        .await?;
    let mut photos: HashMap<String, Vec<String>> = HashMap::new();
    for (service_id, url) in photo_rows {
        photos.entry(service_id).or_default().push(url);
    }

    Ok(rows
        .into_iter()
        .map(|row| {
            let urls = photos.remove(&row.id).unwrap_or_default();
            ServiceOrder::from_row(row, urls)
        })
        .collect())
}

pub async fn update_status(
    pool: &SqlitePool,
    id: &str,
    status: ServiceStatus,
    actor: &str,
) -> Result<Option<ServiceOrder>, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let current = sqlx::query_scalar::<_, ServiceStatus>("SELECT status FROM service_orders WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
    let Some(current) = current else {
        return Ok(None);
    };

    sqlx::query("UPDATE service_orders SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status)
        .bind(db::now())
        .bind(id)
        .execute(&mut *tx)
        .await?;
    record_history(
        &mut tx,
        id,
        HISTORY_STATUS_CHANGED,
        Some(current.as_str()),
        Some(status.as_str()),
        Some(actor),
    )
    .await?;
    tx.commit().await?;

    fetch(pool, id).await
}

pub async fn update_budget_status(
    pool: &SqlitePool,
    id: &str,
    budget_status: BudgetStatus,
    actor: &str,
) -> Result<Option<ServiceOrder>, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let current =
        sqlx::query_scalar::<_, BudgetStatus>("SELECT budget_status FROM service_orders WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
    let Some(current) = current else {
        return Ok(None);
    };

    sqlx::query("UPDATE service_orders SET budget_status = ?, updated_at = ? WHERE id = ?")
        .bind(budget_status)
        .bind(db::now())
        .bind(id)
        .execute(&mut *tx)
        .await?;
    record_history(
        &mut tx,
        id,
        HISTORY_BUDGET_CHANGED,
        Some(current.as_str()),
        Some(budget_status.as_str()),
        Some(actor),
    )
    .await?;
    tx.commit().await?;

    fetch(pool, id).await
}

pub async fn add_photo(
    pool: &SqlitePool,
    id: &str,
    url: &str,
    actor: &str,
) -> Result<Option<ServiceOrder>, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let now = db::now();
    let updated = sqlx::query("UPDATE service_orders SET updated_at = ? WHERE id = ?")
        .bind(&now)
        .bind(id)
        .execute(&mut *tx)
        .await?;
    if updated.rows_affected() == 0 {
        return Ok(None);
    }

    sqlx::query("INSERT INTO service_photos (id, service_id, url, created_at) VALUES (?, ?, ?, ?)")
        .bind(new_id())
        .bind(id)
        .bind(url)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
    record_history(&mut tx, id, HISTORY_PHOTO_ADDED, None, None, Some(actor)).await?;
    tx.commit().await?;

    fetch(pool, id).await
}

pub async fn history(pool: &SqlitePool, id: &str) -> Result<Vec<ServiceHistoryRow>, sqlx::Error> {
    sqlx::query_as::<_, ServiceHistoryRow>(
        r#"SELECT id, service_id, action, old_status, new_status, actor_id, created_at
           FROM service_history
           WHERE service_id = ?
           ORDER BY created_at DESC, rowid DESC"#,
    )
    .bind(id)
    .fetch_all(pool)
    .await
}

async fn record_history(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    service_id: &str,
    action: &str,
    old_status: Option<&str>,
    new_status: Option<&str>,
    actor: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO service_history (id, service_id, action, old_status, new_status, actor_id, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(new_id())
    .bind(service_id)
    .bind(action)
    .bind(old_status)
    .bind(new_status)
    .bind(actor)
    .bind(db::now())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[cfg(test)]
pub fn sample_order(client_name: &str, owner: &str) -> ServiceOrder {
    NewServiceOrder {
        client_name: client_name.to_string(),
        phone: "(11) 99999-0000".to_string(),
        address: "12 Oak Street".to_string(),
        service_type: "repair".to_string(),
        due_date: "2024-06-20".to_string(),
        budget: "150.00".to_string(),
        budget_status: String::new(),
    }
    .validate(owner, "2024-06-05T10:00:00Z")
    .unwrap()
}
