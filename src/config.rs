use std::{env, path::PathBuf, time::Duration};

use crate::models::{ROLE_ADMIN, ROLE_STAFF};

pub const DEFAULT_ADMIN_PASSWORD: &str = "admin";
pub const DEFAULT_STAFF_PASSWORD: &str = "change-me";

/// Accounts that exist before anyone can sign in. They are seeded into the
/// users table and double as the local fallback when the lookup fails.
#[derive(Clone, Debug)]
pub struct BootstrapAccount {
    pub id: &'static str,
    pub email: String,
    pub display_name: String,
    pub role: &'static str,
    pub password: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub shadow_path: PathBuf,
    pub auth_timeout: Duration,
    pub accounts: Vec<BootstrapAccount>,
}

impl Config {
    pub fn from_env() -> Self {
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://./data/workbench.db".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(8080);
        let upload_dir = env::var("UPLOAD_DIR").unwrap_or_else(|_| "./data/uploads".to_string());
        let shadow_path = env::var("SHADOW_PATH").unwrap_or_else(|_| "./data/shadow.json".to_string());
        let auth_timeout_ms: u64 = env::var("AUTH_TIMEOUT_MS")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(2000);

        let admin = BootstrapAccount {
            id: "bootstrap-admin",
            email: env::var("ADMIN_EMAIL").unwrap_or_else(|_| "admin@example.com".to_string()),
            display_name: env::var("ADMIN_DISPLAY_NAME")
                .unwrap_or_else(|_| "Administrator".to_string()),
            role: ROLE_ADMIN,
            password: env::var("ADMIN_PASSWORD")
                .unwrap_or_else(|_| DEFAULT_ADMIN_PASSWORD.to_string()),
        };
        let staff = BootstrapAccount {
            id: "bootstrap-staff",
            email: env::var("STAFF_EMAIL").unwrap_or_else(|_| "user@example.com".to_string()),
            display_name: env::var("STAFF_DISPLAY_NAME").unwrap_or_else(|_| "Staff".to_string()),
            role: ROLE_STAFF,
            password: env::var("STAFF_PASSWORD")
                .unwrap_or_else(|_| DEFAULT_STAFF_PASSWORD.to_string()),
        };

        Self {
            database_url,
            port,
            upload_dir: PathBuf::from(upload_dir),
            shadow_path: PathBuf::from(shadow_path),
            auth_timeout: Duration::from_millis(auth_timeout_ms),
            accounts: vec![admin, staff],
        }
    }
}

#[cfg(test)]
impl Config {
    pub fn for_tests(root: &std::path::Path) -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            port: 0,
            upload_dir: root.join("uploads"),
            shadow_path: root.join("shadow.json"),
            auth_timeout: Duration::from_millis(2000),
            accounts: vec![
                BootstrapAccount {
                    id: "bootstrap-admin",
                    email: "admin@example.com".to_string(),
                    display_name: "Administrator".to_string(),
                    role: ROLE_ADMIN,
                    password: "admin-secret".to_string(),
                },
                BootstrapAccount {
                    id: "bootstrap-staff",
                    email: "user@example.com".to_string(),
                    display_name: "Staff".to_string(),
                    role: ROLE_STAFF,
                    password: "staff-secret".to_string(),
                },
            ],
        }
    }
}
