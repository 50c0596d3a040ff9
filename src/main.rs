mod appointments;
mod auth;
mod config;
mod dashboard;
mod db;
mod error;
mod models;
mod orders;
mod routes;
mod shadow;
mod slots;
mod state;
mod storage;
mod templates;

use std::str::FromStr;
use std::sync::Arc;

use actix_files::Files;
use actix_web::{middleware, web, App, HttpServer};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio::sync::broadcast;

use crate::{
    config::Config,
    shadow::ShadowCache,
    state::AppState,
    storage::{PhotoStorage, PUBLIC_PREFIX},
};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    if let Err(err) = run().await {
        eprintln!("Startup error: {err}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .init();

    let config = Config::from_env();
    db::ensure_sqlite_dir(&config.database_url)?;

    let connect_options = SqliteConnectOptions::from_str(&config.database_url)?
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(connect_options)
        .await?;

    db::run_migrations(&pool).await?;
    db::seed_defaults(&pool, &config.accounts).await?;

    let local_accounts = auth::local_accounts(&config.accounts)
        .map_err(|err| format!("could not hash bootstrap passwords: {err}"))?;

    let shadow = ShadowCache::new(Some(config.shadow_path.clone()));
    let report = shadow.restore(&pool).await?;
    if report.synced > 0 {
        log::info!("Wrote back {} offline orders", report.synced);
    }
    if let Some(stats) = shadow.last_stats().await {
        log::info!(
            "Shadow cache primed: {} active, {} pending, {} budgets awaiting approval",
            stats.active,
            stats.pending,
            stats.budget_pending
        );
    }

    std::fs::create_dir_all(&config.upload_dir)?;
    let storage = PhotoStorage::new(config.upload_dir.clone());
    let (events, _) = broadcast::channel(64);

    let address = format!("0.0.0.0:{}", config.port);
    let state = AppState {
        db: pool,
        config: Arc::new(config),
        local_accounts: Arc::new(local_accounts),
        shadow: Arc::new(shadow),
        storage,
        events,
    };

    log::info!("Starting Workbench on http://{address}");

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(middleware::Logger::default())
            .service(Files::new("/static", "./static").prefer_utf8(true))
            .service(Files::new(PUBLIC_PREFIX, state.storage.root()))
            .configure(routes::public::configure)
            .configure(routes::member::configure)
            .configure(routes::admin::configure)
            .configure(routes::events::configure)
    })
    .bind(address)?
    .run()
    .await?;

    Ok(())
}
