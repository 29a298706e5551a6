//! Run configuration (`migrate.toml`).
//!
//! ```toml
//! checkpoints = true
//!
//! [source]
//! export_dir = "dump/lattice"
//!
//! [destination]
//! sqlite_path = "lattice.db"
//!
//! [entities.node]
//! batch_size = 500
//! resume = true
//! ```

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    core::migrator::StartPoint,
    runtime::handle::{EntityJob, RunPlan},
    schema::{SchemaError, catalog::Catalog},
    types::ObjectId,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("entity `{entity}`: {message}")]
    Invalid { entity: String, message: String },
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SourceSection {
    pub export_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DestinationSection {
    pub sqlite_path: Option<PathBuf>,
}

/// Per-entity overrides; entities without a section are not migrated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySettings {
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default = "default_true")]
    pub migrate: bool,
    #[serde(default)]
    pub start_id: Option<String>,
    #[serde(default)]
    pub resume: bool,
}

impl Default for EntitySettings {
    fn default() -> Self {
        Self {
            batch_size: None,
            migrate: true,
            start_id: None,
            resume: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrateConfig {
    #[serde(default = "default_true")]
    pub checkpoints: bool,
    /// Entity catalog; the built-in one when unset.
    #[serde(default)]
    pub catalog: Option<PathBuf>,
    #[serde(default)]
    pub source: SourceSection,
    #[serde(default)]
    pub destination: DestinationSection,
    #[serde(default)]
    pub entities: BTreeMap<String, EntitySettings>,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            checkpoints: true,
            catalog: None,
            source: SourceSection::default(),
            destination: DestinationSection::default(),
            entities: BTreeMap::new(),
        }
    }
}

impl MigrateConfig {
    /// Load from a TOML file. A relative `catalog` path is resolved against
    /// the config file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })?;

        if let Some(base) = path.parent() {
            config.catalog = config
                .catalog
                .map(|c| if c.is_relative() { base.join(c) } else { c });
        }
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            message: e.to_string(),
        })
    }

    /// Catalog named by `catalog`, or the built-in one.
    pub fn load_catalog(&self) -> Result<Catalog, ConfigError> {
        Ok(match &self.catalog {
            Some(path) => Catalog::load(path)?,
            None => Catalog::builtin()?,
        })
    }

    /// Jobs for every configured entity with `migrate = true`, in catalog
    /// order, optionally narrowed to `only`.
    pub fn build_plan(&self, catalog: &Catalog, only: Option<&[String]>) -> Result<RunPlan, ConfigError> {
        for name in self.entities.keys() {
            catalog.require(name)?;
        }
        if let Some(only) = only {
            for name in only {
                if !self.entities.contains_key(name) {
                    return Err(ConfigError::Invalid {
                        entity: name.clone(),
                        message: "not configured in [entities]".to_string(),
                    });
                }
            }
        }

        let mut jobs = Vec::new();
        for entity in catalog.entities() {
            let Some(settings) = self.entities.get(&entity.name) else {
                continue;
            };
            if !settings.migrate {
                continue;
            }
            if let Some(only) = only {
                if !only.contains(&entity.name) {
                    continue;
                }
            }

            let batch_size = settings.batch_size.unwrap_or(entity.batch_size);
            if batch_size == 0 {
                return Err(invalid(&entity.name, "batch_size must be positive"));
            }

            let start = match (&settings.start_id, settings.resume) {
                (Some(_), true) => {
                    return Err(invalid(&entity.name, "start_id and resume are mutually exclusive"));
                }
                (Some(raw), false) => {
                    let id = ObjectId::parse_str(raw)
                        .map_err(|e| invalid(&entity.name, &format!("start_id: {e}")))?;
                    StartPoint::After(id)
                }
                (None, true) => StartPoint::Checkpoint,
                (None, false) => StartPoint::Beginning,
            };

            jobs.push(EntityJob {
                entity: entity.clone(),
                batch_size,
                start,
            });
        }
        Ok(RunPlan::new(jobs))
    }
}

fn invalid(entity: &str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        entity: entity.to_string(),
        message: message.to_string(),
    }
}
