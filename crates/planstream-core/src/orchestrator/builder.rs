//! Builder for creating and configuring PlanServer instances.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::task;

use super::PlanServer;
use crate::{
    active::ActivePlans,
    config::OrchestratorConfig,
    error::{PlanError, Result},
    model::ModelClient,
    store::{PlanStore, SqliteStore},
};

/// Builder for creating and configuring [`PlanServer`] instances.
#[derive(Default)]
pub struct PlanServerBuilder {
    database_path: Option<PathBuf>,
    store: Option<Arc<dyn PlanStore>>,
    model: Option<Arc<dyn ModelClient>>,
    config: OrchestratorConfig,
}

impl PlanServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a custom database file path for the SQLite store.
    ///
    /// If not specified, uses XDG Base Directory specification:
    /// `$XDG_DATA_HOME/planstream/planstream.db` or
    /// `~/.local/share/planstream/planstream.db`
    pub fn with_database_path<P: AsRef<Path>>(mut self, path: Option<P>) -> Self {
        if let Some(path) = path {
            self.database_path = Some(path.as_ref().to_path_buf());
        }
        self
    }

    /// Uses `store` instead of SQLite. Takes precedence over a database path.
    pub fn with_store(mut self, store: Arc<dyn PlanStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_model(mut self, model: Arc<dyn ModelClient>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the configured server.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::Configuration` if no model client was given,
    /// `PlanError::XdgDirectory` if the default path cannot be resolved, and
    /// `PlanError::FileSystem` or `PlanError::Database` if the SQLite store
    /// cannot be opened.
    pub async fn build(self) -> Result<PlanServer> {
        let model = self.model.ok_or_else(|| PlanError::Configuration {
            message: "a model client is required".to_string(),
        })?;

        let store: Arc<dyn PlanStore> = match self.store {
            Some(store) => store,
            None => {
                let db_path = match self.database_path {
                    Some(path) => path,
                    None => Self::default_database_path()?,
                };
                let store = task::spawn_blocking(move || SqliteStore::open(db_path))
                    .await
                    .map_err(|e| PlanError::join(&e))??;
                Arc::new(store)
            }
        };

        Ok(PlanServer {
            store,
            model,
            config: Arc::new(self.config),
            active: Arc::new(ActivePlans::new()),
        })
    }

    /// Returns the default database path following XDG Base Directory
    /// specification.
    pub fn default_database_path() -> Result<PathBuf> {
        xdg::BaseDirectories::with_prefix("planstream")
            .place_data_file("planstream.db")
            .map_err(|e| PlanError::XdgDirectory(e.to_string()))
    }
}
