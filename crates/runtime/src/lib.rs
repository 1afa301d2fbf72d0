use std::sync::Arc;

use anyhow::{Context, Result};
use concierge_auth::Authenticator;
use concierge_chats::{ChatStore, SqliteChatStore};
use concierge_config::AppConfig;
use concierge_database::initialize_database;
use concierge_gateway::hub::spawn_presence_relay;
use concierge_gateway::{GatewayState, Hub};
use sqlx::SqlitePool;
use tracing::info;

pub mod telemetry {
    use anyhow::Result;
    use tracing::Level;
    use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

    pub fn init_tracing() -> Result<()> {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let subscriber = SubscriberBuilder::default()
            .with_max_level(Level::TRACE)
            .with_env_filter(env_filter)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|error| anyhow::anyhow!("failed to set tracing subscriber: {error}"))
    }
}

/// Long-lived services shared by the HTTP server and the admin commands.
///
/// The hub's reaper and presence relay run as background tasks and stop on
/// their own once the last handle to the hub is dropped.
#[derive(Clone)]
pub struct BackendServices {
    pub db_pool: SqlitePool,
    pub authenticator: Authenticator,
    pub store: Arc<SqliteChatStore>,
    pub hub: Arc<Hub>,
}

impl BackendServices {
    /// Must be called from within a tokio runtime.
    pub async fn initialise(config: &AppConfig) -> Result<Self> {
        config.validate().context("invalid configuration")?;

        let db_pool = initialize_database(&config.database)
            .await
            .context("failed to initialise database")?;

        let authenticator = Authenticator::new(db_pool.clone(), config.auth.clone());
        let store = Arc::new(SqliteChatStore::new(db_pool.clone()));

        let (hub, reaper) = Hub::new();
        tokio::spawn(reaper.run(config.hub.sweep_interval()));
        spawn_presence_relay(&hub);

        info!(
            outbound_capacity = config.hub.outbound_capacity,
            heartbeat_seconds = config.hub.heartbeat_interval_seconds,
            idle_timeout_seconds = config.hub.idle_timeout_seconds,
            "message hub ready"
        );

        Ok(Self {
            db_pool,
            authenticator,
            store,
            hub,
        })
    }

    pub fn chat_store(&self) -> Arc<dyn ChatStore> {
        self.store.clone()
    }

    pub fn gateway_state(&self, config: &AppConfig) -> GatewayState {
        GatewayState::new(
            config.clone(),
            self.authenticator.clone(),
            self.chat_store(),
            self.hub.clone(),
        )
    }
}

pub async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(?error, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
}
