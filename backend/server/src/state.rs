use std::{collections::HashMap, sync::Arc};

use reqwest::Client;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{config::Config, error::AppError, store::Store};

pub struct AppState<S> {
    pub config: Config,
    pub store: S,
    pub locks: ZoneLocks,
    pub client: Client,
}

impl<S: Store> AppState<S> {
    pub fn new(config: Config, store: S) -> Result<Arc<Self>, AppError> {
        let client = Client::builder().timeout(config.fetch_timeout).build()?;

        Ok(Arc::new(Self {
            config,
            store,
            locks: ZoneLocks::default(),
            client,
        }))
    }
}

/// One mutex per zone code, serializing each zone's read-derive-append sequence.
#[derive(Default)]
pub struct ZoneLocks {
    zones: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ZoneLocks {
    pub async fn lock(&self, code: &str) -> OwnedMutexGuard<()> {
        let zone = {
            let mut zones = self.zones.lock().await;
            zones.entry(code.to_string()).or_default().clone()
        };

        zone.lock_owned().await
    }
}
