// src/api/state.rs
use crate::client::EduTalksClient;
use crate::config::AppConfig;
use crate::errors::{FlowError, Result};
use crate::payment::{SubscriptionCache, SubscriptionFlow};
use crate::pending::PendingPaymentStore;
use crate::poller::{CancelHandle, CancelSignal, cancel_pair};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub client: EduTalksClient,
    pub store: Arc<dyn PendingPaymentStore>,
    pub subscription: SubscriptionCache,
    watchers: Arc<Mutex<HashMap<String, (Uuid, CancelHandle)>>>,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<dyn PendingPaymentStore>) -> Result<Self> {
        let client = EduTalksClient::from_config(config.api.clone())?;
        Ok(Self {
            config: Arc::new(config),
            client,
            store,
            subscription: SubscriptionCache::new(),
            watchers: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn subscription_flow(&self) -> SubscriptionFlow<EduTalksClient> {
        SubscriptionFlow::new(
            self.client.clone(),
            self.store.clone(),
            self.subscription.clone(),
            self.config.poll.clone(),
            self.config.status_page_url.clone(),
        )
    }

    /// Registers a background verification; one per transaction.
    pub async fn watch(&self, transaction_id: &str) -> Result<(Uuid, CancelSignal)> {
        let mut watchers = self.watchers.lock().await;
        if watchers.contains_key(transaction_id) {
            return Err(FlowError::AlreadyWatching(transaction_id.to_string()));
        }
        let (handle, signal) = cancel_pair();
        let token = Uuid::new_v4();
        watchers.insert(transaction_id.to_string(), (token, handle));
        Ok((token, signal))
    }

    /// Cancels a running verification. False if none was running.
    pub async fn unwatch(&self, transaction_id: &str) -> bool {
        match self.watchers.lock().await.remove(transaction_id) {
            Some((_, handle)) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Drops the registration of a verification that ended on its own.
    pub async fn finish_watch(&self, transaction_id: &str, token: Uuid) {
        let mut watchers = self.watchers.lock().await;
        if watchers.get(transaction_id).is_some_and(|(current, _)| *current == token) {
            watchers.remove(transaction_id);
        }
    }
}
