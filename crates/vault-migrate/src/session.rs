use std::sync::Arc;

use tracing::info;

use vault_model::IdentityModel;
use vault_store::{LegacyStorage, SqliteStorage};

use crate::config::VaultConfig;
use crate::engine::{MigrationEngine, MigrationOutcome};
use crate::error::MigrateResult;
use crate::version::FileVersionMarker;

/// An opened vault: storage migrated as far as it will go, then the model
/// loaded over the relational store.
///
/// No model exists before the migration has run, so callers never see a
/// tree that is only partly migrated.
#[derive(Debug)]
pub struct Session {
    config: VaultConfig,
    outcome: MigrationOutcome,
    model: IdentityModel,
}

impl Session {
    pub fn open(config: VaultConfig) -> MigrateResult<Self> {
        let legacy = Arc::new(LegacyStorage::open(&config.legacy_path())?);
        let current = Arc::new(SqliteStorage::open(&config.database_path())?);
        let marker = Arc::new(FileVersionMarker::new(config.version_path()));

        let outcome = MigrationEngine::new(legacy, current.clone(), marker).run()?;
        let model = IdentityModel::load(current)?;
        info!(
            data_dir = %config.data_dir.display(),
            status = ?outcome.status,
            "vault session opened"
        );
        Ok(Self {
            config,
            outcome,
            model,
        })
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn outcome(&self) -> &MigrationOutcome {
        &self.outcome
    }

    pub fn model(&self) -> &IdentityModel {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut IdentityModel {
        &mut self.model
    }

    pub fn into_model(self) -> IdentityModel {
        self.model
    }
}
