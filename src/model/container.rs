use crate::model::{ContainerType, Id, SettingDef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default user for catalog records that predate audit tracking
fn default_user() -> String {
    "system".to_string()
}

/// Default timestamp for catalog records that predate audit tracking
fn default_timestamp() -> DateTime<Utc> {
    DateTime::from_timestamp(0, 0).unwrap_or_else(Utc::now)
}

/// Metadata half of a container. This is what the lookup tree is built from;
/// the settings payload is only fetched when a stack actually resolves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerMetadata {
    pub id: Id,
    pub name: String,
    #[serde(rename = "type")]
    pub container_type: ContainerType,
    /// The machine definition this container targets, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<Id>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_type: Option<String>,
    /// Nozzle name scope for quality containers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    /// Root material id scope for quality containers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub material: Option<Id>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buildplate: Option<String>,
    /// Extruder position for per-extruder quality_changes containers; absent
    /// means the container applies to the global stack.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
    /// Explicit global/scoped marker for quality containers. Unset means
    /// "derive from the scope fields".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_quality: Option<bool>,
}

impl ContainerMetadata {
    pub fn new(id: impl Into<Id>, name: impl Into<String>, container_type: ContainerType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            container_type,
            definition: None,
            quality_type: None,
            variant: None,
            material: None,
            buildplate: None,
            position: None,
            global_quality: None,
        }
    }

    /// Whether this quality record carries any nozzle/buildplate/material scope.
    pub fn has_scope(&self) -> bool {
        self.variant.is_some() || self.buildplate.is_some() || self.material.is_some()
    }
}

/// A metadata-tagged, sparse key/value bundle. Only locally overridden
/// setting keys are present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    #[serde(flatten)]
    pub meta: ContainerMetadata,
    /// Sparse overrides: setting key -> value.
    #[serde(default)]
    pub settings: HashMap<String, serde_json::Value>,
    /// Per-setting declarations. Only machine definition containers carry
    /// these; empty everywhere else.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub setting_defs: HashMap<String, SettingDef>,

    /// Audit fields for tracking who created/modified this container
    #[serde(default = "default_user")]
    pub created_by: String,
    #[serde(default = "default_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_user")]
    pub updated_by: String,
    #[serde(default = "default_timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl Container {
    pub fn new(meta: ContainerMetadata) -> Self {
        let now = Utc::now();
        Self {
            meta,
            settings: HashMap::new(),
            setting_defs: HashMap::new(),
            created_by: default_user(),
            created_at: now,
            updated_by: default_user(),
            updated_at: now,
        }
    }

    /// The id of the process-wide "no override" placeholder for a slot type.
    /// These are plain catalog containers with no settings, constructed once
    /// by the store at startup rather than held as globals.
    pub fn empty_id(container_type: ContainerType) -> Id {
        format!("empty_{}", container_type.as_str())
    }

    /// Build the empty placeholder container for one slot type.
    pub fn empty(container_type: ContainerType) -> Self {
        let id = Self::empty_id(container_type);
        Self::new(ContainerMetadata::new(id.clone(), id, container_type))
    }

    pub fn is_empty_placeholder(&self) -> bool {
        self.meta.id == Self::empty_id(self.meta.container_type)
    }

    pub fn id(&self) -> &Id {
        &self.meta.id
    }

    pub fn touch(&mut self, user: &str) {
        self.updated_by = user.to_string();
        self.updated_at = Utc::now();
    }
}
