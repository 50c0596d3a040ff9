use std::{fs, path::Path};

use chrono::{DateTime, NaiveTime, SecondsFormat, Utc};
use sqlx::SqlitePool;

use crate::{
    auth::hash_password,
    config::{BootstrapAccount, DEFAULT_ADMIN_PASSWORD, DEFAULT_STAFF_PASSWORD},
};

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

pub fn ensure_sqlite_dir(db_url: &str) -> std::io::Result<()> {
    let path = if let Some(path) = db_url.strip_prefix("sqlite://") {
        Some(path)
    } else if let Some(path) = db_url.strip_prefix("sqlite:") {
        Some(path)
    } else {
        None
    };

    let Some(path) = path else {
        return Ok(());
    };

    let path = path.split('?').next().unwrap_or(path);
    if path == ":memory:" || path.is_empty() {
        return Ok(());
    }

    let path = path.strip_prefix("file:").unwrap_or(path);
    ensure_parent_dir(Path::new(path))
}

pub fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// RFC 3339, second precision, `Z` suffix. Every stored timestamp uses this
/// shape so string comparison in SQL matches time order.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn now() -> String {
    timestamp(Utc::now())
}

/// Midnight UTC of the day containing `at`.
pub fn day_start(at: DateTime<Utc>) -> String {
    timestamp(at.date_naive().and_time(NaiveTime::MIN).and_utc())
}

pub async fn seed_defaults(pool: &SqlitePool, accounts: &[BootstrapAccount]) -> Result<(), sqlx::Error> {
    for account in accounts {
        seed_account(pool, account).await?;
    }
    Ok(())
}

async fn seed_account(pool: &SqlitePool, account: &BootstrapAccount) -> Result<(), sqlx::Error> {
    let existing = sqlx::query_as::<_, (String,)>("SELECT id FROM users WHERE email = ? LIMIT 1")
        .bind(&account.email)
        .fetch_optional(pool)
        .await?;

    if existing.is_some() {
        return Ok(());
    }

    if account.password == DEFAULT_ADMIN_PASSWORD || account.password == DEFAULT_STAFF_PASSWORD {
        log::warn!(
            "Default password in use for {}. Set ADMIN_PASSWORD / STAFF_PASSWORD in production.",
            account.email
        );
    }

    let password_hash = hash_password(&account.password)
        .map_err(|_| sqlx::Error::Protocol("password hash failed".into()))?;

    sqlx::query(
        r#"INSERT INTO users (id, email, display_name, role, password_hash, active, created_at)
           VALUES (?, ?, ?, ?, ?, 1, ?)"#,
    )
    .bind(account.id)
    .bind(&account.email)
    .bind(&account.display_name)
    .bind(account.role)
    .bind(password_hash)
    .bind(now())
    .execute(pool)
    .await?;

    log::info!("Seeded {} account {}", account.role, account.email);
    Ok(())
}

#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}

/// On-disk pool with several connections, for tests that need real
/// concurrency between writers.
#[cfg(test)]
pub async fn file_pool(path: &Path) -> SqlitePool {
    let options = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}
