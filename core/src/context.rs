use std::sync::Arc;

use crate::checkpoint::{CheckpointStore, FileCheckpointStore};
use crate::config::AppConfig;
use crate::error::CliError;
use crate::events_out::{start_events_out, EventsOutTx};
use crate::executor::registry::ExecutorRegistry;

/// Long-lived resources shared by every run of one process.
#[derive(Clone)]
pub struct AppContext {
    cfg: Arc<AppConfig>,
    registry: Arc<ExecutorRegistry>,
    events_out: Option<EventsOutTx>,
    checkpoint_store: Option<Arc<dyn CheckpointStore>>,
}

impl AppContext {
    /// Start the events writer and open the configured checkpoint directory.
    pub async fn new(cfg: AppConfig, registry: ExecutorRegistry) -> Result<Self, CliError> {
        let events_out = start_events_out(&cfg.events_out)
            .await
            .map_err(CliError::Config)?;
        let checkpoint_store: Option<Arc<dyn CheckpointStore>> = if cfg.checkpoint.enabled {
            Some(Arc::new(FileCheckpointStore::new(&cfg.checkpoint.directory)))
        } else {
            None
        };

        Ok(Self {
            cfg: Arc::new(cfg),
            registry: Arc::new(registry),
            events_out,
            checkpoint_store,
        })
    }

    /// Context without background writers or durable storage.
    pub fn from_parts(cfg: AppConfig, registry: ExecutorRegistry) -> Self {
        Self {
            cfg: Arc::new(cfg),
            registry: Arc::new(registry),
            events_out: None,
            checkpoint_store: None,
        }
    }

    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoint_store = Some(store);
        self
    }

    pub fn cfg(&self) -> &AppConfig {
        &self.cfg
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    pub fn events_out(&self) -> Option<EventsOutTx> {
        self.events_out.clone()
    }

    pub fn checkpoint_store(&self) -> Option<Arc<dyn CheckpointStore>> {
        self.checkpoint_store.clone()
    }
}
