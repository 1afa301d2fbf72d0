use chrono::{DateTime, Duration, Utc};
use concierge_auth::{AuthError, Authenticator};
use concierge_config::AuthConfig;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use tempfile::TempDir;

type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

fn default_auth_config() -> AuthConfig {
    AuthConfig {
        session_ttl_seconds: 3_600,
        system_token: None,
    }
}

struct TestContext {
    pool: SqlitePool,
    authenticator: Authenticator,
    _temp_dir: TempDir,
    config: AuthConfig,
}

impl TestContext {
    async fn new(config: AuthConfig) -> TestResult<Self> {
        let temp_dir = TempDir::new()?;
        let db_path = temp_dir.path().join("auth.sqlite");
        let db_url = format!("sqlite://{}", db_path.display());

        let options = SqliteConnectOptions::from_str(&db_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        MIGRATOR.run(&pool).await?;

        let authenticator = Authenticator::new(pool.clone(), config.clone());

        Ok(Self {
            pool,
            authenticator,
            _temp_dir: temp_dir,
            config,
        })
    }

    async fn new_default() -> TestResult<Self> {
        Self::new(default_auth_config()).await
    }

    fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }

    async fn seed_user(&self, email: &str) -> TestResult<concierge_auth::User> {
        let company_id = self.authenticator.create_company("Acme").await?;
        let user = self
            .authenticator
            .create_user(company_id, Some(email), Some("Alice"))
            .await?;
        Ok(user)
    }
}

#[tokio::test]
async fn create_user_requires_existing_company() -> TestResult {
    let ctx = TestContext::new_default().await?;

    let err = ctx
        .authenticator()
        .create_user(999, Some("ghost@example.com"), None)
        .await
        .expect_err("unknown company must be rejected");
    assert!(matches!(err, AuthError::CompanyNotFound));

    let user_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(ctx.pool())
        .await?;
    assert_eq!(user_count, 0);

    Ok(())
}

#[tokio::test]
async fn created_users_get_distinct_public_ids() -> TestResult {
    let ctx = TestContext::new_default().await?;
    let company_id = ctx.authenticator().create_company("Acme").await?;

    let first = ctx
        .authenticator()
        .create_user(company_id, Some("a@example.com"), None)
        .await?;
    let second = ctx
        .authenticator()
        .create_user(company_id, Some("b@example.com"), None)
        .await?;

    assert_ne!(first.public_id, second.public_id);
    assert_eq!(first.company_id, company_id);
    assert_eq!(second.company_id, company_id);

    Ok(())
}

#[tokio::test]
async fn issued_session_authenticates_with_company() -> TestResult {
    let ctx = TestContext::new_default().await?;
    let user = ctx.seed_user("alice@example.com").await?;

    let session = ctx.authenticator().issue_session(user.id).await?;

    let ttl = Duration::seconds(ctx.config.session_ttl_seconds as i64);
    let remaining = session.expires_at - Utc::now();
    assert!(
        (remaining - ttl).num_seconds().abs() <= 2,
        "session ttl should respect configuration"
    );

    let (resolved, resolved_session) = ctx
        .authenticator()
        .authenticate_token(&session.token)
        .await?;
    assert_eq!(resolved, user);
    assert_eq!(resolved.company_id, user.company_id);
    assert_eq!(resolved_session.user_id, user.id);

    let stored_expires: String =
        sqlx::query_scalar("SELECT expires_at FROM sessions WHERE token = ?")
            .bind(&session.token)
            .fetch_one(ctx.pool())
            .await?;
    let parsed = DateTime::parse_from_rfc3339(&stored_expires)?.with_timezone(&Utc);
    assert_eq!(parsed.timestamp(), session.expires_at.timestamp());

    Ok(())
}

#[tokio::test]
async fn session_tokens_are_unique_per_issue() -> TestResult {
    let ctx = TestContext::new_default().await?;
    let user = ctx.seed_user("alice@example.com").await?;

    let first = ctx.authenticator().issue_session(user.id).await?;
    let second = ctx.authenticator().issue_session(user.id).await?;

    assert_ne!(first.token, second.token);
    assert!(first.token.len() >= 43, "token must carry 32 bytes of entropy");

    Ok(())
}

#[tokio::test]
async fn issue_session_rejects_unknown_user() -> TestResult {
    let ctx = TestContext::new_default().await?;

    let err = ctx
        .authenticator()
        .issue_session(42)
        .await
        .expect_err("unknown user must not get a session");
    assert!(matches!(err, AuthError::UserNotFound));

    Ok(())
}

#[tokio::test]
async fn authenticate_token_rejects_blank_and_unknown_tokens() -> TestResult {
    let ctx = TestContext::new_default().await?;

    let blank = ctx
        .authenticator()
        .authenticate_token("   ")
        .await
        .expect_err("blank token");
    assert!(matches!(blank, AuthError::InvalidSession));

    let unknown = ctx
        .authenticator()
        .authenticate_token("does-not-exist")
        .await
        .expect_err("unknown token");
    assert!(matches!(unknown, AuthError::SessionNotFound));

    Ok(())
}

#[tokio::test]
async fn expired_session_is_removed_on_use() -> TestResult {
    let ctx = TestContext::new_default().await?;
    let user = ctx.seed_user("alice@example.com").await?;

    let expired_at = (Utc::now() - Duration::minutes(5)).to_rfc3339();
    sqlx::query(
        "INSERT INTO sessions (user_id, token, created_at, expires_at) VALUES (?, ?, ?, ?)",
    )
    .bind(user.id)
    .bind("stale-token")
    .bind(Utc::now().to_rfc3339())
    .bind(&expired_at)
    .execute(ctx.pool())
    .await?;

    let err = ctx
        .authenticator()
        .authenticate_token("stale-token")
        .await
        .expect_err("expired session must fail");
    assert!(matches!(err, AuthError::SessionExpired));

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE token = ?")
        .bind("stale-token")
        .fetch_one(ctx.pool())
        .await?;
    assert_eq!(remaining, 0, "expired session should be purged");

    Ok(())
}

#[tokio::test]
async fn revoked_session_no_longer_authenticates() -> TestResult {
    let ctx = TestContext::new_default().await?;
    let user = ctx.seed_user("alice@example.com").await?;
    let session = ctx.authenticator().issue_session(user.id).await?;

    ctx.authenticator().revoke_session(&session.token).await?;

    let err = ctx
        .authenticator()
        .authenticate_token(&session.token)
        .await
        .expect_err("revoked session");
    assert!(matches!(err, AuthError::SessionNotFound));

    let again = ctx
        .authenticator()
        .revoke_session(&session.token)
        .await
        .expect_err("double revoke");
    assert!(matches!(again, AuthError::SessionNotFound));

    Ok(())
}

#[tokio::test]
async fn huge_ttl_saturates_instead_of_overflowing() -> TestResult {
    let ctx = TestContext::new(AuthConfig {
        session_ttl_seconds: u64::MAX,
        system_token: None,
    })
    .await?;
    let user = ctx.seed_user("alice@example.com").await?;

    let session = ctx.authenticator().issue_session(user.id).await?;
    assert!(session.expires_at > Utc::now() + Duration::days(365));

    ctx.authenticator()
        .authenticate_token(&session.token)
        .await?;

    Ok(())
}
