use actix_web::{
    body::BoxBody,
    dev::{ServiceRequest, ServiceResponse},
    error::ErrorUnauthorized,
    http::header,
    middleware::Next,
    web, Error, HttpMessage, HttpRequest, HttpResponse,
};
use actix_web::cookie::{Cookie, SameSite, time::Duration};
use actix_web_httpauth::extractors::basic::BasicAuth;
use argon2::{
    password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand_core::OsRng;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{config::BootstrapAccount, models::{UserRow, ROLE_ADMIN}, state::AppState};

pub const AUTH_REALM: &str = "Workbench";
const LOGOUT_COOKIE: &str = "wb_logged_out";

/// Session context: resolved once per request and carried in extensions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub role: String,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }

    /// Owner filter for queries: admins see every order.
    pub fn scope(&self) -> Option<&str> {
        if self.is_admin() {
            None
        } else {
            Some(self.id.as_str())
        }
    }
}

/// Bootstrap account with its hash precomputed, checked when the users table
/// cannot answer in time.
#[derive(Clone, Debug)]
pub struct LocalAccount {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub role: String,
    pub password_hash: String,
}

pub fn local_accounts(accounts: &[BootstrapAccount]) -> Result<Vec<LocalAccount>, password_hash::Error> {
    accounts
        .iter()
        .map(|account| {
            Ok(LocalAccount {
                id: account.id.to_string(),
                email: account.email.clone(),
                display_name: account.display_name.clone(),
                role: account.role.to_string(),
                password_hash: hash_password(&account.password)?,
            })
        })
        .collect()
}

pub fn hash_password(password: &str) -> Result<String, password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, password_hash: &str) -> bool {
    let parsed_hash = PasswordHash::new(password_hash);
    match parsed_hash {
        Ok(hash) => Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok(),
        Err(_) => false,
    }
}

async fn authenticate(req: &ServiceRequest, credentials: &BasicAuth) -> Result<AuthUser, Error> {
    let state = req
        .app_data::<web::Data<AppState>>()
        .ok_or_else(|| ErrorUnauthorized("Unauthorized"))?;
    let email = credentials.user_id();
    let password = credentials.password().unwrap_or_default();
    authenticate_credentials(state, email, password)
        .await
        .ok_or_else(|| ErrorUnauthorized("Unauthorized"))
}

async fn lookup_user(pool: &SqlitePool, email: &str) -> Result<Option<UserRow>, sqlx::Error> {
    sqlx::query_as::<_, UserRow>(
        r#"SELECT id, email, display_name, role, password_hash, active, created_at
           FROM users
           WHERE email = ? AND active = 1
           LIMIT 1"#,
    )
    .bind(email.trim())
    .fetch_optional(pool)
    .await
}

/// Checks credentials against the users table, racing the lookup against the
/// configured deadline. Only a failed or late lookup consults the local
/// bootstrap accounts; an unknown user or a wrong password is final.
pub async fn authenticate_credentials(
    state: &AppState,
    email: &str,
    password: &str,
) -> Option<AuthUser> {
    let lookup = tokio::time::timeout(state.config.auth_timeout, lookup_user(&state.db, email)).await;

    let user = match lookup {
        Ok(Ok(user)) => user?,
        Ok(Err(err)) => {
            log::warn!("User lookup failed, trying local accounts: {err}");
            return authenticate_local(&state.local_accounts, email, password);
        }
        Err(_) => {
            log::warn!(
                "User lookup timed out after {:?}, trying local accounts",
                state.config.auth_timeout
            );
            return authenticate_local(&state.local_accounts, email, password);
        }
    };

    if !verify_password(password, &user.password_hash) {
        return None;
    }

    Some(AuthUser {
        id: user.id,
        email: user.email,
        display_name: user.display_name,
        role: user.role,
    })
}

fn authenticate_local(accounts: &[LocalAccount], email: &str, password: &str) -> Option<AuthUser> {
    let account = accounts.iter().find(|account| account.email == email.trim())?;
    if !verify_password(password, &account.password_hash) {
        return None;
    }
    Some(AuthUser {
        id: account.id.clone(),
        email: account.email.clone(),
        display_name: account.display_name.clone(),
        role: account.role.clone(),
    })
}

pub async fn member_validator(
    req: ServiceRequest,
    credentials: BasicAuth,
) -> Result<ServiceRequest, (Error, ServiceRequest)> {
    match authenticate(&req, &credentials).await {
        Ok(user) => {
            req.extensions_mut().insert(user);
            Ok(req)
        }
        Err(err) => Err((err, req)),
    }
}

pub async fn admin_validator(
    req: ServiceRequest,
    credentials: BasicAuth,
) -> Result<ServiceRequest, (Error, ServiceRequest)> {
    match authenticate(&req, &credentials).await {
        Ok(user) => {
            if !user.is_admin() {
                return Err((ErrorUnauthorized("Admin access required"), req));
            }
            req.extensions_mut().insert(user);
            Ok(req)
        }
        Err(err) => Err((err, req)),
    }
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn logout_cookie(req: &HttpRequest) -> Cookie<'static> {
    let mut builder = Cookie::build(LOGOUT_COOKIE, "1")
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(Duration::days(365));
    if req.connection_info().scheme() == "https" {
        builder = builder.secure(true);
    }
    builder.finish()
}

pub fn clear_logout_cookie(req: &HttpRequest) -> Cookie<'static> {
    let mut builder = Cookie::build(LOGOUT_COOKIE, "")
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(Duration::seconds(0));
    if req.connection_info().scheme() == "https" {
        builder = builder.secure(true);
    }
    builder.finish()
}

pub fn is_logged_out(req: &HttpRequest) -> bool {
    req.cookie(LOGOUT_COOKIE).is_some()
}

pub async fn logout_guard<B>(
    req: ServiceRequest,
    next: Next<B>,
) -> Result<ServiceResponse<BoxBody>, Error>
where
    B: actix_web::body::MessageBody + 'static,
{
    if is_logged_out(req.request()) {
        let login_target = if req.path().starts_with("/admin") {
            "/admin/services"
        } else {
            "/app/dashboard"
        };
        let login_url = format!("/login?next={}", login_target);
        let body = format!(
            r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>Signed out</title>
    <link rel="stylesheet" href="/static/app.css" />
  </head>
  <body>
    <main class="card narrow">
      <h1>You're signed out</h1>
      <p>Your session has been closed.</p>
      <p><a href="{login_url}">Sign in again</a> or <a href="/">return to the public site</a>.</p>
    </main>
  </body>
</html>"#
        );
        let response = HttpResponse::Unauthorized()
            .insert_header((header::CACHE_CONTROL, "no-store"))
            .content_type("text/html; charset=utf-8")
            .body(body);
        return Ok(req.into_response(response));
    }

    let res = next.call(req).await?;
    Ok(res.map_into_boxed_body())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_state;

    #[test]
    fn hashes_verify_only_their_password() {
        let hash = hash_password("s3cret").unwrap();
        assert!(verify_password("s3cret", &hash));
        assert!(!verify_password("S3cret", &hash));
        assert!(!verify_password("s3cret", "not-a-hash"));
    }

    #[tokio::test]
    async fn resolves_role_from_the_users_table() {
        let (state, _dir) = test_state().await;

        let admin = authenticate_credentials(&state, "admin@example.com", "admin-secret")
            .await
            .unwrap();
        assert!(admin.is_admin());
        assert_eq!(admin.scope(), None);

        let staff = authenticate_credentials(&state, "user@example.com", "staff-secret")
            .await
            .unwrap();
        assert!(!staff.is_admin());
        assert_eq!(staff.scope(), Some("bootstrap-staff"));

        assert!(authenticate_credentials(&state, "user@example.com", "wrong")
            .await
            .is_none());
        assert!(authenticate_credentials(&state, "nobody@example.com", "staff-secret")
            .await
            .is_none());
    }

    #[tokio::test]
    async fn inactive_users_cannot_sign_in() {
        let (state, _dir) = test_state().await;
        sqlx::query("UPDATE users SET active = 0 WHERE email = ?")
            .bind("user@example.com")
            .execute(&state.db)
            .await
            .unwrap();

        assert!(authenticate_credentials(&state, "user@example.com", "staff-secret")
            .await
            .is_none());
    }

    #[tokio::test]
    async fn falls_back_to_local_accounts_when_lookup_times_out() {
        let (mut state, _dir) = test_state().await;
        let mut config = (*state.config).clone();
        config.auth_timeout = std::time::Duration::from_millis(20);
        state.config = std::sync::Arc::new(config);

        // The test pool has one connection; holding it stalls the lookup.
        let _held = state.db.acquire().await.unwrap();

        let admin = authenticate_credentials(&state, "admin@example.com", "admin-secret")
            .await
            .unwrap();
        assert_eq!(admin.id, "bootstrap-admin");
        assert!(authenticate_credentials(&state, "user@example.com", "wrong")
            .await
            .is_none());
    }

    #[tokio::test]
    async fn falls_back_to_local_accounts_when_lookup_fails() {
        let (state, _dir) = test_state().await;
        state.db.close().await;

        let admin = authenticate_credentials(&state, "admin@example.com", "admin-secret")
            .await
            .unwrap();
        assert_eq!(admin.id, "bootstrap-admin");
        assert!(admin.is_admin());

        assert!(authenticate_credentials(&state, "admin@example.com", "nope")
            .await
            .is_none());
        assert!(authenticate_credentials(&state, "someone@example.com", "admin-secret")
            .await
            .is_none());
    }
}
