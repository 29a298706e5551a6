//! Entity descriptors loaded from TOML configuration data.

use std::path::Path;

use hashbrown::HashSet;
use serde::Deserialize;

use crate::types::ROW_ID_COLUMN;

use super::{SchemaError, descriptor::EntityDescriptor};

const BUILTIN_CATALOG: &str = include_str!("lattice.toml");

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default, rename = "entity")]
    entities: Vec<EntityDescriptor>,
}

/// Ordered, validated set of entity descriptors.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Catalog {
    entities: Vec<EntityDescriptor>,
}

impl Catalog {
    /// Catalog for the chain-explorer collections bundled with the crate.
    pub fn builtin() -> Result<Self, SchemaError> {
        Self::from_toml_str(BUILTIN_CATALOG)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, SchemaError> {
        let file: CatalogFile = toml::from_str(text)?;
        Self::from_entities(file.entities)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Validates and wraps descriptors, keeping their order.
    pub fn from_entities(entities: Vec<EntityDescriptor>) -> Result<Self, SchemaError> {
        {
            let mut names = HashSet::new();
            for entity in &entities {
                validate_entity(entity)?;
                if !names.insert(entity.name.as_str()) {
                    return Err(SchemaError::DuplicateEntity(entity.name.clone()));
                }
            }
        }
        Ok(Self { entities })
    }

    pub fn get(&self, name: &str) -> Option<&EntityDescriptor> {
        self.entities.iter().find(|e| e.name == name)
    }

    pub fn require(&self, name: &str) -> Result<&EntityDescriptor, SchemaError> {
        self.get(name)
            .ok_or_else(|| SchemaError::UnknownEntity(name.to_string()))
    }

    pub fn entities(&self) -> &[EntityDescriptor] {
        &self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

fn validate_entity(entity: &EntityDescriptor) -> Result<(), SchemaError> {
    for (what, value) in [
        ("name", &entity.name),
        ("collection", &entity.collection),
        ("table", &entity.table),
    ] {
        if value.trim().is_empty() {
            return Err(SchemaError::Invalid {
                entity: entity.name.clone(),
                message: format!("empty {what}"),
            });
        }
    }

    if entity.batch_size == 0 {
        return Err(SchemaError::Invalid {
            entity: entity.name.clone(),
            message: "batch_size must be positive".to_string(),
        });
    }

    let mut columns = HashSet::new();
    for field in &entity.fields {
        let column = field.column_name();
        if column == ROW_ID_COLUMN {
            return Err(SchemaError::ReservedColumn {
                entity: entity.name.clone(),
                column: column.to_string(),
            });
        }
        if !columns.insert(column) {
            return Err(SchemaError::DuplicateColumn {
                entity: entity.name.clone(),
                column: column.to_string(),
            });
        }
    }
    Ok(())
}
