//! Entity schema descriptors
//!
//! Schemas are plain data structures constructed once at startup and passed
//! by reference wherever entity metadata is needed. The registry is an
//! explicitly constructed object owned by the composition root; there is no
//! module-level cache of known entity definitions.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// One persisted field of an entity type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Field name as it appears in stored records
    pub name: String,
}

impl FieldDescriptor {
    /// Create a field descriptor
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A relation from one entity type to another
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationDescriptor {
    /// Field on this entity holding the related identifier
    pub field: String,
    /// Related entity type name
    pub target: String,
}

/// Schema description of one entity type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySchema {
    /// Entity type name (the `__class__` tag on wire records)
    pub name: String,
    /// Schema family identifier (the `__registry__` tag on wire records)
    pub registry: String,
    /// Identifier field, assigned per node on save
    pub id_field: String,
    /// Persisted fields, excluding the identifier
    pub fields: Vec<FieldDescriptor>,
    /// Relations to other entity types
    pub relations: Vec<RelationDescriptor>,
}

impl EntitySchema {
    /// Create a schema with no fields or relations yet
    pub fn new(
        name: impl Into<String>,
        registry: impl Into<String>,
        id_field: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            registry: registry.into(),
            id_field: id_field.into(),
            fields: Vec::new(),
            relations: Vec::new(),
        }
    }

    /// Add persisted fields
    pub fn with_fields<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields
            .extend(names.into_iter().map(|name| FieldDescriptor::new(name)));
        self
    }

    /// Add a relation
    pub fn with_relation(mut self, field: impl Into<String>, target: impl Into<String>) -> Self {
        self.relations.push(RelationDescriptor {
            field: field.into(),
            target: target.into(),
        });
        self
    }

    /// Whether the schema declares the field (identifier included)
    pub fn has_field(&self, name: &str) -> bool {
        name == self.id_field || self.fields.iter().any(|field| field.name == name)
    }
}

/// Explicitly constructed registry of entity schemas.
#[derive(Debug, Default, Clone)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Arc<EntitySchema>>,
}

impl SchemaRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema under its entity type name
    pub fn register(&mut self, schema: EntitySchema) {
        self.schemas.insert(schema.name.clone(), Arc::new(schema));
    }

    /// Look up a schema by entity type name
    pub fn get(&self, entity: &str) -> Option<Arc<EntitySchema>> {
        self.schemas.get(entity).cloned()
    }

    /// All registered entity type names
    pub fn entity_names(&self) -> Vec<String> {
        self.schemas.keys().cloned().collect()
    }
}
