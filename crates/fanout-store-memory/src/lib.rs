//! In-memory local store for the fanout engine
//!
//! Holds one node's independent copy of the data, with per-entity
//! autoincrement identifier assignment. Mirrors the quirks of the storage
//! family the engine targets: condition-based remove/update cannot report an
//! affected-row count and return [`AffectedRows::Unsupported`], which the
//! engine surfaces as the `-2` sentinel.

mod condition;
mod pipeline;

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use fanout_store::{
    AffectedRows, EntitySchema, FindOptions, LocalStore, RemoveTarget, SavedRow, SchemaRegistry,
    StoreError,
};
use serde_json::{Value, json};
use tracing::debug;

/// Rows of one entity type plus its identifier counter
#[derive(Debug, Default)]
struct Table {
    rows: Vec<Value>,
    next_id: u64,
}

/// In-memory store implementation
#[derive(Debug, Clone)]
pub struct MemoryStore {
    schemas: SchemaRegistry,
    tables: Arc<DashMap<String, Table>>,
}

impl MemoryStore {
    /// Create a store serving the given schemas
    pub fn new(schemas: SchemaRegistry) -> Self {
        Self {
            schemas,
            tables: Arc::new(DashMap::new()),
        }
    }

    fn schema_for(&self, entity: &str) -> Result<Arc<EntitySchema>, StoreError> {
        self.schemas
            .get(entity)
            .ok_or_else(|| StoreError::UnknownEntity(entity.to_string()))
    }

    /// Number of rows currently stored for the entity type
    pub fn row_count(&self, entity: &str) -> usize {
        self.tables
            .get(entity)
            .map(|table| table.rows.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn find(
        &self,
        entity: &str,
        condition: &Value,
        options: &FindOptions,
    ) -> Result<Vec<Value>, StoreError> {
        let schema = self.schema_for(entity)?;
        condition::validate(&schema, condition)?;

        let offset = options.offset.unwrap_or(0) as usize;
        let limit = options.limit.map(|limit| limit as usize).unwrap_or(usize::MAX);

        let rows = match self.tables.get(entity) {
            Some(table) => table
                .rows
                .iter()
                .filter(|row| condition::matches(row, condition))
                .skip(offset)
                .take(limit)
                .cloned()
                .collect(),
            None => Vec::new(),
        };

        Ok(rows)
    }

    async fn find_one(&self, entity: &str, condition: &Value) -> Result<Option<Value>, StoreError> {
        let mut rows = self
            .find(
                entity,
                condition,
                &FindOptions {
                    limit: Some(1),
                    offset: None,
                },
            )
            .await?;
        Ok(rows.pop())
    }

    async fn save(&self, entity: &str, entities: Vec<Value>) -> Result<Vec<SavedRow>, StoreError> {
        let schema = self.schema_for(entity)?;
        let mut table = self.tables.entry(entity.to_string()).or_default();

        let mut saved = Vec::with_capacity(entities.len());
        for value in entities {
            let mut row = value
                .as_object()
                .cloned()
                .ok_or_else(|| StoreError::Other(format!("cannot save non-object {value}")))?;

            // Identity assignment is local to this node.
            let id = match row.get(&schema.id_field) {
                Some(existing) if !existing.is_null() => existing.clone(),
                _ => {
                    table.next_id += 1;
                    json!(table.next_id)
                }
            };
            row.insert(schema.id_field.clone(), id.clone());

            let stored = Value::Object(row);
            table.rows.push(stored.clone());
            saved.push(SavedRow { entity: stored, id });
        }

        debug!(
            "Saved {} rows of '{}' ({} total)",
            saved.len(),
            entity,
            table.rows.len()
        );
        Ok(saved)
    }

    async fn remove(&self, entity: &str, target: RemoveTarget) -> Result<AffectedRows, StoreError> {
        let schema = self.schema_for(entity)?;
        let Some(mut table) = self.tables.get_mut(entity) else {
            return Ok(match target {
                RemoveTarget::Ids(_) => AffectedRows::Count(0),
                RemoveTarget::Condition(_) => AffectedRows::Unsupported,
            });
        };

        match target {
            RemoveTarget::Ids(ids) => {
                let before = table.rows.len();
                table.rows.retain(|row| {
                    let id = row.get(&schema.id_field).unwrap_or(&Value::Null);
                    !ids.contains(id)
                });
                Ok(AffectedRows::Count((before - table.rows.len()) as u64))
            }
            RemoveTarget::Condition(cond) => {
                condition::validate(&schema, &cond)?;
                table.rows.retain(|row| !condition::matches(row, &cond));
                // This storage family cannot count condition-based removals.
                Ok(AffectedRows::Unsupported)
            }
        }
    }

    async fn update(
        &self,
        entity: &str,
        cond: &Value,
        update: &Value,
    ) -> Result<AffectedRows, StoreError> {
        let schema = self.schema_for(entity)?;
        condition::validate(&schema, cond)?;

        // Accept `{"$set": {...}}` or a bare field map.
        let changes = update
            .get("$set")
            .unwrap_or(update)
            .as_object()
            .ok_or_else(|| StoreError::Other(format!("invalid update document {update}")))?;
        for field in changes.keys() {
            if !schema.has_field(field) {
                return Err(StoreError::UnknownField {
                    entity: schema.name.clone(),
                    field: field.clone(),
                });
            }
        }

        if let Some(mut table) = self.tables.get_mut(entity) {
            for row in table.rows.iter_mut() {
                if !condition::matches(row, cond) {
                    continue;
                }
                if let Some(object) = row.as_object_mut() {
                    for (field, value) in changes {
                        object.insert(field.clone(), value.clone());
                    }
                }
            }
        }

        // Same driver limitation as condition-based remove.
        Ok(AffectedRows::Unsupported)
    }

    async fn aggregate(&self, entity: &str, stages: &[Value]) -> Result<Vec<Value>, StoreError> {
        let schema = self.schema_for(entity)?;
        let rows = self
            .tables
            .get(entity)
            .map(|table| table.rows.clone())
            .unwrap_or_default();
        pipeline::run(&schema, rows, stages)
    }

    fn schema(&self, entity: &str) -> Option<Arc<EntitySchema>> {
        self.schemas.get(entity)
    }
}
