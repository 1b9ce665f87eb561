//! Destination provisioning pass.

use crate::error::{EngineError, ProvisionError};
use async_trait::async_trait;
use engine_core::{
    schema::translator::{schemas_equal, translate},
    state::StateStore,
};
use model::{
    core::identifiers::{SourceId, TableKey},
    destination::DestinationSchema,
    tracking::TrackedTable,
};
use std::path::PathBuf;
use tokio::fs;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// The destination was already there with the given schema.
    Exists { observed: DestinationSchema },
    Created,
    Conflict { reason: String },
}

/// Makes sure a destination exists with at least the given schema.
#[async_trait]
pub trait DestinationProvisioner: Send + Sync {
    async fn ensure(
        &self,
        destination: &str,
        schema: &DestinationSchema,
    ) -> Result<ProvisionOutcome, ProvisionError>;
}

/// Keeps one `<destination>.schema.json` file per destination.
pub struct FileProvisioner {
    dir: PathBuf,
}

impl FileProvisioner {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn schema_path(&self, destination: &str) -> PathBuf {
        self.dir.join(format!("{destination}.schema.json"))
    }
}

#[async_trait]
impl DestinationProvisioner for FileProvisioner {
    async fn ensure(
        &self,
        destination: &str,
        schema: &DestinationSchema,
    ) -> Result<ProvisionOutcome, ProvisionError> {
        let path = self.schema_path(destination);
        match fs::read_to_string(&path).await {
            Ok(existing) => Ok(match DestinationSchema::from_json(&existing) {
                Ok(observed) => ProvisionOutcome::Exists { observed },
                Err(e) => ProvisionOutcome::Conflict {
                    reason: format!("{} is not a schema file: {e}", path.display()),
                },
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                fs::create_dir_all(&self.dir).await?;
                fs::write(&path, serde_json::to_vec_pretty(schema)?).await?;
                Ok(ProvisionOutcome::Created)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionStatus {
    Created,
    Unchanged,
    Drifted,
    Conflict(String),
    Failed(String),
}

#[derive(Debug, Default)]
pub struct ProvisionReport {
    pub tables: Vec<(TableKey, ProvisionStatus)>,
}

impl ProvisionReport {
    pub fn status(&self, key: &TableKey) -> Option<&ProvisionStatus> {
        self.tables.iter().find(|(k, _)| k == key).map(|(_, s)| s)
    }
}

/// Ensures every tracked table's destination exists and reports drift.
///
/// Drift is only reported; the destination is never migrated.
pub async fn provision_tables(
    state: &dyn StateStore,
    provisioner: &dyn DestinationProvisioner,
    source: Option<SourceId>,
) -> Result<ProvisionReport, EngineError> {
    let mut report = ProvisionReport::default();

    for table in state.list_tracked(source).await? {
        let status = match provision_table(state, provisioner, &table).await {
            Ok(status) => status,
            Err(e) => {
                error!(table = %table.key, error = %e, "Provisioning failed");
                ProvisionStatus::Failed(e.to_string())
            }
        };
        report.tables.push((table.key.clone(), status));
    }

    Ok(report)
}

async fn provision_table(
    state: &dyn StateStore,
    provisioner: &dyn DestinationProvisioner,
    table: &TrackedTable,
) -> Result<ProvisionStatus, EngineError> {
    let destination = table.destination_name();
    let desired = translate(&table.columns);
    let desired_json = desired.to_json().map_err(ProvisionError::from)?;

    let status = match provisioner.ensure(&destination, &desired).await? {
        ProvisionOutcome::Created => {
            state
                .cache_destination_schema(&table.key, &desired_json)
                .await?;
            info!(table = %table.key, %destination, "Destination created");
            ProvisionStatus::Created
        }
        ProvisionOutcome::Exists { observed } => {
            let cached = match &table.destination_schema {
                Some(cached) => cached.clone(),
                None => {
                    let observed_json = observed.to_json().map_err(ProvisionError::from)?;
                    state
                        .cache_destination_schema(&table.key, &observed_json)
                        .await?;
                    observed_json
                }
            };

            if schemas_equal(&cached, &desired_json) {
                ProvisionStatus::Unchanged
            } else {
                warn!(
                    table = %table.key,
                    %destination,
                    cached = %cached,
                    desired = %desired_json,
                    "Schema drift detected"
                );
                ProvisionStatus::Drifted
            }
        }
        ProvisionOutcome::Conflict { reason } => {
            warn!(table = %table.key, %destination, %reason, "Destination conflict");
            ProvisionStatus::Conflict(reason)
        }
    };
    Ok(status)
}
