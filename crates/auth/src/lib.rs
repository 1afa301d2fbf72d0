use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use concierge_config::AuthConfig;
use cuid2::CuidConstructor;
use once_cell::sync::Lazy;
use rand::RngCore;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tracing::{debug, info};

static CUID: Lazy<CuidConstructor> = Lazy::new(CuidConstructor::new);

/// Resolves session tokens into verified user and company identities.
#[derive(Clone)]
pub struct Authenticator {
    pool: SqlitePool,
    session_ttl: Duration,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("user not found")]
    UserNotFound,
    #[error("company not found")]
    CompanyNotFound,
    #[error("session not found")]
    SessionNotFound,
    #[error("session expired")]
    SessionExpired,
    #[error("invalid session token")]
    InvalidSession,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub public_id: String,
    pub company_id: i64,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AuthSession {
    pub token: String,
    pub user_id: i64,
    pub expires_at: DateTime<Utc>,
}

impl Authenticator {
    pub fn new(pool: SqlitePool, config: AuthConfig) -> Self {
        // chrono durations are bounded by i64 milliseconds
        let ttl_seconds = i64::try_from(config.session_ttl_seconds)
            .unwrap_or(i64::MAX)
            .min(i64::MAX / 1_000);
        let session_ttl = Duration::seconds(ttl_seconds);

        Self { pool, session_ttl }
    }

    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    pub async fn create_company(&self, name: &str) -> Result<i64, AuthError> {
        let id = sqlx::query("INSERT INTO companies (name, created_at) VALUES (?, ?)")
            .bind(name)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?
            .last_insert_rowid();

        info!(company_id = id, name, "created company");
        Ok(id)
    }

    pub async fn create_user(
        &self,
        company_id: i64,
        email: Option<&str>,
        display_name: Option<&str>,
    ) -> Result<User, AuthError> {
        let company: Option<i64> = sqlx::query_scalar("SELECT id FROM companies WHERE id = ?")
            .bind(company_id)
            .fetch_optional(&self.pool)
            .await?;
        if company.is_none() {
            return Err(AuthError::CompanyNotFound);
        }

        let now = Utc::now().to_rfc3339();
        let public_id = new_public_id();

        let id = sqlx::query(
            "INSERT INTO users (public_id, company_id, email, display_name, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&public_id)
        .bind(company_id)
        .bind(email)
        .bind(display_name)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        info!(user_id = id, company_id, "created user");

        Ok(User {
            id,
            public_id,
            company_id,
            email: email.map(str::to_owned),
            display_name: display_name.map(str::to_owned),
        })
    }

    pub async fn authenticate_token(&self, token: &str) -> Result<(User, AuthSession), AuthError> {
        if token.trim().is_empty() {
            return Err(AuthError::InvalidSession);
        }

        let row = sqlx::query("SELECT user_id, expires_at FROM sessions WHERE token = ?")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Err(AuthError::SessionNotFound);
        };

        let user_id: i64 = row.try_get("user_id")?;
        let expires_at: String = row.try_get("expires_at")?;

        let expires_at = DateTime::parse_from_rfc3339(&expires_at)
            .map_err(|_| AuthError::InvalidSession)?
            .with_timezone(&Utc);

        if expires_at <= Utc::now() {
            sqlx::query("DELETE FROM sessions WHERE token = ?")
                .bind(token)
                .execute(&self.pool)
                .await?;
            debug!(user_id, "removed expired session");
            return Err(AuthError::SessionExpired);
        }

        let user = self.fetch_user(user_id).await?;
        let session = AuthSession {
            token: token.to_owned(),
            user_id,
            expires_at,
        };

        Ok((user, session))
    }

    pub async fn user_profile(&self, user_id: i64) -> Result<User, AuthError> {
        self.fetch_user(user_id).await
    }

    pub async fn issue_session(&self, user_id: i64) -> Result<AuthSession, AuthError> {
        self.fetch_user(user_id).await?;

        let token = generate_session_token();
        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(self.session_ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        sqlx::query(
            "INSERT INTO sessions (user_id, token, created_at, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(&token)
        .bind(now.to_rfc3339())
        .bind(expires_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(AuthSession {
            token,
            user_id,
            expires_at,
        })
    }

    pub async fn revoke_session(&self, token: &str) -> Result<(), AuthError> {
        let result = sqlx::query("DELETE FROM sessions WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AuthError::SessionNotFound);
        }
        Ok(())
    }

    async fn fetch_user(&self, id: i64) -> Result<User, AuthError> {
        let row = sqlx::query(
            "SELECT id, public_id, company_id, email, display_name FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AuthError::UserNotFound)?;

        Ok(User {
            id,
            public_id: row.try_get("public_id")?,
            company_id: row.try_get("company_id")?,
            email: row.try_get("email")?,
            display_name: row.try_get("display_name")?,
        })
    }
}

fn generate_session_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn new_public_id() -> String {
    CUID.create_id()
}
