//! Definition lifecycle: create, read, update, delete.

use crate::error::ServiceError;
use crate::io::IoPolicy;
use crate::metrics::Metrics;
use crate::tables::TableCache;
use serde::{Deserialize, Serialize};
use statebus_core::{validate_definition_id, Definition, MachineSpec, PartitionAssignor};
use statebus_storage::{DefinitionStore, InsertOutcome};
use std::sync::Arc;

/// Request body for creating a definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDefinition {
    /// Caller-chosen id. A UUIDv4 is generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, alias = "stateMachineName")]
    pub name: String,

    #[serde(flatten)]
    pub spec: MachineSpec,
}

/// Manages stored definitions.
pub struct DefinitionService {
    store: Arc<dyn DefinitionStore>,
    tables: Arc<TableCache>,
    assignor: PartitionAssignor,
    io: IoPolicy,
    metrics: Option<Arc<Metrics>>,
}

impl DefinitionService {
    pub fn new(
        store: Arc<dyn DefinitionStore>,
        tables: Arc<TableCache>,
        assignor: PartitionAssignor,
        io: IoPolicy,
    ) -> Self {
        Self {
            store,
            tables,
            assignor,
            io,
            metrics: None,
        }
    }

    /// Sets the metrics instance.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn assignor(&self) -> &PartitionAssignor {
        &self.assignor
    }

    /// Validates, assigns a partition and stores a new definition.
    pub async fn create(&self, request: NewDefinition) -> Result<Definition, ServiceError> {
        let result = self.create_inner(request).await;
        self.record("create", &result);
        result
    }

    async fn create_inner(&self, request: NewDefinition) -> Result<Definition, ServiceError> {
        request.spec.compile()?;

        let id = request
            .id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        validate_definition_id(&id)?;

        let definition = Definition {
            partition: self.assignor.assign(&id),
            id,
            name: request.name,
            spec: request.spec,
        };

        let outcome = self
            .io
            .call("definition insert", self.store.insert_if_absent(&definition))
            .await?;
        match outcome {
            InsertOutcome::Inserted => {
                tracing::info!(
                    "Created definition {} ({}) on partition {}",
                    definition.id,
                    definition.name,
                    definition.partition
                );
                Ok(definition)
            }
            InsertOutcome::Conflict => {
                tracing::warn!("Definition {} already exists", definition.id);
                Err(ServiceError::Conflict(definition.id))
            }
        }
    }

    /// Fetches a definition.
    pub async fn get(&self, id: &str) -> Result<Definition, ServiceError> {
        let result = self.get_inner(id).await;
        self.record("get", &result);
        result
    }

    async fn get_inner(&self, id: &str) -> Result<Definition, ServiceError> {
        if validate_definition_id(id).is_err() {
            return Err(ServiceError::NotFound(id.to_string()));
        }
        self.io
            .call("definition get", self.store.get(id))
            .await?
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))
    }

    /// Replaces states, events and transitions. Id, name and partition are
    /// kept.
    pub async fn update(&self, id: &str, spec: MachineSpec) -> Result<Definition, ServiceError> {
        let result = self.update_inner(id, spec).await;
        self.record("update", &result);
        result
    }

    async fn update_inner(&self, id: &str, spec: MachineSpec) -> Result<Definition, ServiceError> {
        spec.compile()?;
        if validate_definition_id(id).is_err() {
            return Err(ServiceError::NotFound(id.to_string()));
        }

        let updated = self
            .io
            .call("definition update", self.store.update_fields(id, &spec))
            .await?
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))?;

        self.invalidate(id);
        tracing::info!("Updated definition {}", id);
        Ok(updated)
    }

    /// Removes a definition permanently.
    pub async fn delete(&self, id: &str) -> Result<Definition, ServiceError> {
        let result = self.delete_inner(id).await;
        self.record("delete", &result);
        result
    }

    async fn delete_inner(&self, id: &str) -> Result<Definition, ServiceError> {
        if validate_definition_id(id).is_err() {
            return Err(ServiceError::NotFound(id.to_string()));
        }

        let removed = self
            .io
            .call("definition delete", self.store.delete(id))
            .await?
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))?;

        self.invalidate(id);
        tracing::info!("Deleted definition {}", id);
        Ok(removed)
    }

    fn invalidate(&self, id: &str) {
        self.tables.invalidate(id);
        if let Some(ref metrics) = self.metrics {
            metrics.tables_cached.set(self.tables.len() as f64);
        }
    }

    fn record<T>(&self, operation: &str, result: &Result<T, ServiceError>) {
        if let Some(ref metrics) = self.metrics {
            let code = match result {
                Ok(_) => "ok".to_string(),
                Err(e) => e.error_code().to_string(),
            };
            metrics
                .definition_ops_total
                .with_label_values(&[operation, code.as_str()])
                .inc();
        }
    }
}
