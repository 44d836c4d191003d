//! Schema registry - logical entity types mapped to backend columns
//!
//! The registry is built once at startup (from the built-in catalog or a
//! YAML file) and shared read-only behind an `Arc`. Every lookup takes
//! `&self`, so concurrent readers need no synchronization.
//!
//! # YAML format
//!
//! ```yaml
//! entities:
//!   - name: Cat
//!     table: cat
//!     identity: id
//!     fields:
//!       - { name: id, column: id, type: string, filterable: true, sortable: true }
//!       - { name: breed, column: breed, type: string, filterable: true, groupable: true }
//!     navigations:
//!       - { name: stats, target: CatStats, collection: true, left_key: id, right_key: catId, kind: metrics }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;
use crate::value::FieldType;

/// Binding of one logical field to its backend column and capabilities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldBinding {
    /// Name used in query strings
    #[serde(rename = "name")]
    pub logical_name: String,
    /// Column name in both backends
    #[serde(rename = "column")]
    pub backend_column: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub filterable: bool,
    #[serde(default)]
    pub sortable: bool,
    #[serde(default)]
    pub groupable: bool,
    /// Time-series metric column of a metrics entity
    #[serde(default)]
    pub metric: bool,
}

impl FieldBinding {
    /// Create a binding with no query capabilities
    pub fn new(logical_name: &str, backend_column: &str, field_type: FieldType) -> Self {
        Self {
            logical_name: logical_name.to_string(),
            backend_column: backend_column.to_string(),
            field_type,
            filterable: false,
            sortable: false,
            groupable: false,
            metric: false,
        }
    }

    pub fn with_filter(mut self) -> Self {
        self.filterable = true;
        self
    }

    pub fn with_sort(mut self) -> Self {
        self.sortable = true;
        self
    }

    pub fn with_group(mut self) -> Self {
        self.groupable = true;
        self
    }

    /// Mark as a metric column (filterable and sortable)
    pub fn as_metric(mut self) -> Self {
        self.metric = true;
        self.filterable = true;
        self.sortable = true;
        self
    }
}

/// Kind of data behind a navigation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    /// Plain related records held by the primary store
    #[default]
    Association,
    /// Time-series metrics served by the metrics gateway
    Metrics,
}

/// Relationship used by `$expand`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationBinding {
    pub name: String,
    /// Target entity type
    pub target: String,
    /// One-to-many when true, one-to-one otherwise
    #[serde(default)]
    pub collection: bool,
    /// Logical field on the source entity
    pub left_key: String,
    /// Logical field on the target entity
    pub right_key: String,
    #[serde(default)]
    pub kind: RelationKind,
}

impl NavigationBinding {
    pub fn is_metrics(&self) -> bool {
        self.kind == RelationKind::Metrics
    }
}

/// All bindings for one entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityBinding {
    pub name: String,
    /// Table / selection name in both backends
    pub table: String,
    /// Logical name of the identity field
    pub identity: String,
    pub fields: Vec<FieldBinding>,
    #[serde(default)]
    pub navigations: Vec<NavigationBinding>,
    /// Logical name of the sample timestamp (metrics entities only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_field: Option<String>,
}

impl EntityBinding {
    pub fn field(&self, name: &str) -> Option<&FieldBinding> {
        self.fields.iter().find(|f| f.logical_name == name)
    }

    pub fn field_by_column(&self, column: &str) -> Option<&FieldBinding> {
        self.fields.iter().find(|f| f.backend_column == column)
    }

    /// Backend column for a logical field
    pub fn column(&self, name: &str) -> Option<&str> {
        self.field(name).map(|f| f.backend_column.as_str())
    }

    pub fn navigation(&self, name: &str) -> Option<&NavigationBinding> {
        self.navigations.iter().find(|n| n.name == name)
    }

    pub fn metric_fields(&self) -> impl Iterator<Item = &FieldBinding> {
        self.fields.iter().filter(|f| f.metric)
    }

    pub fn timestamp_column(&self) -> Option<&str> {
        self.timestamp_field
            .as_deref()
            .and_then(|name| self.column(name))
    }
}

#[derive(Deserialize)]
struct SchemaFile {
    entities: Vec<EntityBinding>,
}

/// Registry of every entity type known to the gateway
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    entities: HashMap<String, EntityBinding>,
}

impl SchemaRegistry {
    /// Build and validate a registry
    pub fn from_entities(entities: Vec<EntityBinding>) -> Result<Self, SchemaError> {
        let mut registry = Self::default();
        for entity in entities {
            if registry.entities.contains_key(&entity.name) {
                return Err(SchemaError::DuplicateEntity(entity.name));
            }
            registry.entities.insert(entity.name.clone(), entity);
        }
        registry.validate()?;
        Ok(registry)
    }

    /// Load a registry from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, SchemaError> {
        let file: SchemaFile = serde_yaml::from_str(yaml)?;
        Self::from_entities(file.entities)
    }

    /// Load a registry from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub(crate) fn insert_unchecked(&mut self, entity: EntityBinding) {
        self.entities.insert(entity.name.clone(), entity);
    }

    /// Check identities, navigation targets and join keys
    pub fn validate(&self) -> Result<(), SchemaError> {
        for entity in self.entities.values() {
            if entity.field(&entity.identity).is_none() {
                return Err(SchemaError::UnknownIdentity {
                    entity: entity.name.clone(),
                    identity: entity.identity.clone(),
                });
            }
            for nav in &entity.navigations {
                let target =
                    self.entities
                        .get(&nav.target)
                        .ok_or_else(|| SchemaError::UnknownTarget {
                            entity: entity.name.clone(),
                            navigation: nav.name.clone(),
                            target: nav.target.clone(),
                        })?;
                for (owner, key) in [(entity, &nav.left_key), (target, &nav.right_key)] {
                    if owner.field(key).is_none() {
                        return Err(SchemaError::UnknownJoinKey {
                            entity: entity.name.clone(),
                            navigation: nav.name.clone(),
                            key: key.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    pub fn entity(&self, name: &str) -> Option<&EntityBinding> {
        self.entities.get(name)
    }

    pub fn entity_by_table(&self, table: &str) -> Option<&EntityBinding> {
        self.entities.values().find(|e| e.table == table)
    }

    /// Target entity of a navigation
    pub fn target_of(&self, nav: &NavigationBinding) -> Option<&EntityBinding> {
        self.entities.get(&nav.target)
    }

    /// Entity type names, sorted
    pub fn entity_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entities.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const YAML: &str = r#"
entities:
  - name: Dog
    table: dog
    identity: id
    fields:
      - { name: id, column: id, type: string, filterable: true, sortable: true }
      - { name: name, column: dog_name, type: string, filterable: true }
    navigations:
      - { name: stats, target: DogStats, collection: true, left_key: id, right_key: dogId, kind: metrics }
  - name: DogStats
    table: dog_stats
    identity: dogId
    timestamp_field: timestamp
    fields:
      - { name: dogId, column: dog_id, type: string, filterable: true }
      - { name: barkRate, column: bark_rate, type: double, metric: true }
      - { name: timestamp, column: timestamp, type: timestamp }
"#;

    #[test]
    fn test_from_yaml() {
        let registry = SchemaRegistry::from_yaml(YAML).unwrap();
        assert_eq!(registry.len(), 2);

        let dog = registry.entity("Dog").unwrap();
        assert_eq!(dog.column("name"), Some("dog_name"));
        assert_eq!(dog.field_by_column("dog_name").unwrap().logical_name, "name");

        let nav = dog.navigation("stats").unwrap();
        assert!(nav.is_metrics());
        assert!(nav.collection);

        let stats = registry.target_of(nav).unwrap();
        assert_eq!(stats.table, "dog_stats");
        assert_eq!(stats.timestamp_column(), Some("timestamp"));
        assert_eq!(stats.metric_fields().count(), 1);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(YAML.as_bytes()).unwrap();
        let registry = SchemaRegistry::from_file(file.path()).unwrap();
        assert!(registry.entity_by_table("dog").is_some());
    }

    #[test]
    fn test_unknown_target_rejected() {
        let yaml = YAML.replace("target: DogStats", "target: Missing");
        let err = SchemaRegistry::from_yaml(&yaml).unwrap_err();
        assert!(matches!(err, SchemaError::UnknownTarget { .. }));
    }

    #[test]
    fn test_unknown_join_key_rejected() {
        let yaml = YAML.replace("right_key: dogId", "right_key: ownerId");
        let err = SchemaRegistry::from_yaml(&yaml).unwrap_err();
        assert!(matches!(err, SchemaError::UnknownJoinKey { key, .. } if key == "ownerId"));
    }

    #[test]
    fn test_duplicate_entity_rejected() {
        let dog = SchemaRegistry::from_yaml(YAML)
            .unwrap()
            .entity("DogStats")
            .cloned()
            .unwrap();
        let err = SchemaRegistry::from_entities(vec![dog.clone(), dog]).unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateEntity(name) if name == "DogStats"));
    }
}
