//! Shared application state for the gateway

use std::sync::Arc;

use concierge_auth::Authenticator;
use concierge_chats::{AccessGate, ChatStore};
use concierge_config::AppConfig;

use crate::hub::Hub;

/// Everything a handler or session needs, cloned cheaply per request.
#[derive(Clone)]
pub struct GatewayState {
    config: Arc<AppConfig>,
    authenticator: Authenticator,
    store: Arc<dyn ChatStore>,
    gate: AccessGate,
    hub: Arc<Hub>,
}

impl GatewayState {
    pub fn new(
        config: AppConfig,
        authenticator: Authenticator,
        store: Arc<dyn ChatStore>,
        hub: Arc<Hub>,
    ) -> Self {
        let gate = AccessGate::new(store.clone());
        Self {
            config: Arc::new(config),
            authenticator,
            store,
            gate,
            hub,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }

    pub fn store(&self) -> &Arc<dyn ChatStore> {
        &self.store
    }

    pub fn gate(&self) -> &AccessGate {
        &self.gate
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }
}
