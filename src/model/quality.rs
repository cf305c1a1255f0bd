use crate::model::{ContainerMetadata, Id};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Child key of a lookup-tree node. Descent order is fixed: nozzle, then
/// buildplate, then material.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecificityKey {
    Nozzle(String),
    Buildplate(String),
    Material(Id),
}

/// Leaf for one quality container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityLeaf {
    pub container_id: Id,
    pub name: String,
    pub quality_type: String,
}

impl QualityLeaf {
    pub fn from_metadata(meta: &ContainerMetadata, quality_type: &str) -> Self {
        Self {
            container_id: meta.id.clone(),
            name: meta.name.clone(),
            quality_type: quality_type.to_string(),
        }
    }
}

/// Leaf for one named quality-changes profile: the global container plus one
/// container per extruder position it covers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityChangesLeaf {
    pub name: String,
    pub quality_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global: Option<Id>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extruders: HashMap<usize, Id>,
}

/// One node of the scoped-quality lookup tree: qualities stored at this
/// specificity, plus children keyed by the next specificity axis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityNode {
    /// quality_type -> leaf. Two records with an identical scope tuple
    /// compose here, last insert per quality_type wins.
    pub qualities: HashMap<String, QualityLeaf>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub children: HashMap<SpecificityKey, QualityNode>,
}

impl QualityNode {
    pub fn child(&self, key: &SpecificityKey) -> Option<&QualityNode> {
        self.children.get(key)
    }

    pub fn child_or_insert(&mut self, key: SpecificityKey) -> &mut QualityNode {
        self.children.entry(key).or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.qualities.is_empty() && self.children.is_empty()
    }
}

/// Root tree entry for one machine definition id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineNode {
    /// Global qualities stored directly on the machine root, never descended
    /// into children. quality_type -> leaf.
    pub global_qualities: HashMap<String, QualityLeaf>,
    /// Scoped qualities. Root-level entries here (no nozzle/buildplate/
    /// material scope, explicitly non-global) are the machine's
    /// extruder-scoped qualities.
    #[serde(default)]
    pub scoped: QualityNode,
    /// quality_type -> profile name -> leaf.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub quality_changes: HashMap<String, HashMap<String, QualityChangesLeaf>>,
}

impl MachineNode {
    /// Whether this machine carries root-level per-extruder qualities. When
    /// it does, global entries are never used for per-extruder binding.
    pub fn has_extruder_scoped_qualities(&self) -> bool {
        !self.scoped.qualities.is_empty()
    }
}

/// The full multi-dimensional quality index, rebuilt from catalog metadata
/// on every catalog change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityTree {
    pub machines: HashMap<Id, MachineNode>,
}

impl QualityTree {
    pub fn machine(&self, definition_id: &Id) -> Option<&MachineNode> {
        self.machines.get(definition_id)
    }

    pub fn machine_or_insert(&mut self, definition_id: Id) -> &mut MachineNode {
        self.machines.entry(definition_id).or_default()
    }
}

/// Resolved per-machine bundle for one quality_type. Created transiently by
/// a resolution query, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityGroup {
    pub name: String,
    pub quality_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_for_global: Option<QualityLeaf>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub nodes_for_extruders: HashMap<usize, QualityLeaf>,
    pub is_available: bool,
}

impl QualityGroup {
    pub fn new(name: impl Into<String>, quality_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            quality_type: quality_type.into(),
            node_for_global: None,
            nodes_for_extruders: HashMap::new(),
            is_available: false,
        }
    }
}

/// Resolved bundle for one named user profile, keyed by profile name on top
/// of its base quality_type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityChangesGroup {
    pub name: String,
    pub quality_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_for_global: Option<Id>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub nodes_for_extruders: HashMap<usize, Id>,
    /// Inherited from the QualityGroup sharing this quality_type.
    pub is_available: bool,
}
