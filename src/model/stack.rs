use crate::model::{Container, ContainerType, Id};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One slot in an override chain, in priority order from strongest override
/// to weakest default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackSlot {
    User,
    QualityChanges,
    Quality,
    Material,
    Variant,
    DefinitionChanges,
    Definition,
}

impl StackSlot {
    /// Walk order for property resolution, strongest first.
    pub const ORDERED: [StackSlot; 7] = [
        StackSlot::User,
        StackSlot::QualityChanges,
        StackSlot::Quality,
        StackSlot::Material,
        StackSlot::Variant,
        StackSlot::DefinitionChanges,
        StackSlot::Definition,
    ];

    /// The container type a slot accepts.
    pub fn container_type(&self) -> ContainerType {
        match self {
            StackSlot::User => ContainerType::User,
            StackSlot::QualityChanges => ContainerType::QualityChanges,
            StackSlot::Quality => ContainerType::Quality,
            StackSlot::Material => ContainerType::Material,
            StackSlot::Variant => ContainerType::Variant,
            StackSlot::DefinitionChanges => ContainerType::DefinitionChanges,
            StackSlot::Definition => ContainerType::Definition,
        }
    }
}

/// An ordered chain of container references, exactly one per slot. Slots
/// never go empty; "no override" is the per-type empty placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerStack {
    pub id: Id,
    pub name: String,
    pub user: Id,
    pub quality_changes: Id,
    pub quality: Id,
    pub material: Id,
    pub variant: Id,
    pub definition_changes: Id,
    pub definition: Id,
}

impl ContainerStack {
    /// A stack with every override slot pointing at its empty placeholder.
    pub fn bare(id: impl Into<Id>, name: impl Into<String>, definition: impl Into<Id>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            user: Container::empty_id(ContainerType::User),
            quality_changes: Container::empty_id(ContainerType::QualityChanges),
            quality: Container::empty_id(ContainerType::Quality),
            material: Container::empty_id(ContainerType::Material),
            variant: Container::empty_id(ContainerType::Variant),
            definition_changes: Container::empty_id(ContainerType::DefinitionChanges),
            definition: definition.into(),
        }
    }

    pub fn container_id(&self, slot: StackSlot) -> &Id {
        match slot {
            StackSlot::User => &self.user,
            StackSlot::QualityChanges => &self.quality_changes,
            StackSlot::Quality => &self.quality,
            StackSlot::Material => &self.material,
            StackSlot::Variant => &self.variant,
            StackSlot::DefinitionChanges => &self.definition_changes,
            StackSlot::Definition => &self.definition,
        }
    }

    pub fn set_container_id(&mut self, slot: StackSlot, id: impl Into<Id>) {
        let id = id.into();
        match slot {
            StackSlot::User => self.user = id,
            StackSlot::QualityChanges => self.quality_changes = id,
            StackSlot::Quality => self.quality = id,
            StackSlot::Material => self.material = id,
            StackSlot::Variant => self.variant = id,
            StackSlot::DefinitionChanges => self.definition_changes = id,
            StackSlot::Definition => self.definition = id,
        }
    }

    /// Reset a slot back to its empty placeholder.
    pub fn clear_slot(&mut self, slot: StackSlot) {
        self.set_container_id(slot, Container::empty_id(slot.container_type()));
    }

    pub fn slot_is_empty(&self, slot: StackSlot) -> bool {
        self.container_id(slot) == &Container::empty_id(slot.container_type())
    }
}

/// The override chain of one physical extruder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtruderStack {
    #[serde(flatten)]
    pub stack: ContainerStack,
    pub position: usize,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ExtruderStack {
    pub fn new(id: impl Into<Id>, position: usize, definition: impl Into<Id>) -> Self {
        let id = id.into();
        Self {
            stack: ContainerStack::bare(id.clone(), format!("Extruder {}", position + 1), definition),
            position,
            enabled: true,
        }
    }
}

/// The machine-level override chain plus its extruders, keyed by dense
/// position starting at 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalStack {
    #[serde(flatten)]
    pub stack: ContainerStack,
    pub extruders: BTreeMap<usize, ExtruderStack>,
    /// Whether qualities are searched under this machine's own definition id.
    #[serde(default)]
    pub has_machine_quality: bool,
    /// Explicit override for the definition id used during quality search.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_definition: Option<Id>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buildplate_name: Option<String>,
}

impl GlobalStack {
    pub fn new(id: impl Into<Id>, name: impl Into<String>, definition: impl Into<Id>) -> Self {
        Self {
            stack: ContainerStack::bare(id, name, definition),
            extruders: BTreeMap::new(),
            has_machine_quality: false,
            quality_definition: None,
            buildplate_name: None,
        }
    }

    pub fn id(&self) -> &Id {
        &self.stack.id
    }

    pub fn definition_id(&self) -> &Id {
        &self.stack.definition
    }

    /// Positions of the currently enabled extruders, ascending.
    pub fn enabled_positions(&self) -> Vec<usize> {
        self.extruders
            .values()
            .filter(|e| e.enabled)
            .map(|e| e.position)
            .collect()
    }

    /// The position user-pinned extruder-index settings fall back to.
    pub fn default_extruder_position(&self) -> usize {
        self.enabled_positions().first().copied().unwrap_or(0)
    }

    /// Structural integrity check, run by the store before accepting an
    /// upsert. A stack that fails here would break resolution invariants.
    pub fn validate(&self) -> Result<()> {
        if self.extruders.is_empty() {
            return Err(anyhow!("machine stack '{}' has no extruders", self.stack.id));
        }
        for (expected, (position, extruder)) in self.extruders.iter().enumerate() {
            if *position != expected || extruder.position != expected {
                return Err(anyhow!(
                    "machine stack '{}' has non-dense extruder positions (found {} at index {})",
                    self.stack.id,
                    extruder.position,
                    expected
                ));
            }
        }
        for stack in std::iter::once(&self.stack).chain(self.extruders.values().map(|e| &e.stack)) {
            for slot in StackSlot::ORDERED {
                if stack.container_id(slot).is_empty() {
                    return Err(anyhow!(
                        "stack '{}' has an unset {:?} slot",
                        stack.id,
                        slot
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Per-extruder view used by quality resolution: what hardware and material
/// the extruder currently carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtruderConfig {
    pub position: usize,
    pub enabled: bool,
    /// Nozzle name, absent when the machine has no nozzle concept.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_name: Option<String>,
    /// Root material id without diameter, absent when no material is loaded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub material_id: Option<Id>,
    /// Fallback root material ids, most preferred first, deduplicated.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallback_material_ids: Vec<Id>,
}

/// Immutable snapshot of everything quality resolution needs to know about
/// the active machine. Pure input: building one never mutates the stacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineState {
    pub definition_id: Id,
    pub has_machine_quality: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_definition: Option<Id>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buildplate_name: Option<String>,
    pub extruders: Vec<ExtruderConfig>,
}

impl MachineState {
    /// The definition id qualities are searched under: the machine's own id
    /// (or explicit override) when it declares machine qualities, else the
    /// generic fallback.
    pub fn quality_search_id<'a>(&'a self, generic_fallback: &'a Id) -> &'a Id {
        if self.has_machine_quality {
            self.quality_definition.as_ref().unwrap_or(&self.definition_id)
        } else {
            generic_fallback
        }
    }

    pub fn enabled_positions(&self) -> Vec<usize> {
        self.extruders
            .iter()
            .filter(|e| e.enabled)
            .map(|e| e.position)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_walk_order_is_strongest_first() {
        assert_eq!(StackSlot::ORDERED[0], StackSlot::User);
        assert_eq!(StackSlot::ORDERED[6], StackSlot::Definition);
    }

    #[test]
    fn bare_stack_points_at_empty_placeholders() {
        let stack = ContainerStack::bare("machine_1", "Machine 1", "ultiplex_2");
        assert_eq!(stack.quality, "empty_quality");
        assert_eq!(stack.quality_changes, "empty_quality_changes");
        assert!(stack.slot_is_empty(StackSlot::User));
        assert!(!stack.slot_is_empty(StackSlot::Definition));
    }

    #[test]
    fn validate_rejects_sparse_extruder_positions() {
        let mut global = GlobalStack::new("machine_1", "Machine 1", "ultiplex_2");
        global
            .extruders
            .insert(1, ExtruderStack::new("machine_1_e1", 1, "ultiplex_2_extruder"));
        assert!(global.validate().is_err());

        global
            .extruders
            .insert(0, ExtruderStack::new("machine_1_e0", 0, "ultiplex_2_extruder"));
        let mut positions_fixed = GlobalStack::new("machine_2", "Machine 2", "ultiplex_2");
        positions_fixed
            .extruders
            .insert(0, ExtruderStack::new("machine_2_e0", 0, "ultiplex_2_extruder"));
        assert!(positions_fixed.validate().is_ok());
    }

    #[test]
    fn default_extruder_skips_disabled_positions() {
        let mut global = GlobalStack::new("machine_1", "Machine 1", "ultiplex_2");
        global
            .extruders
            .insert(0, ExtruderStack::new("machine_1_e0", 0, "ultiplex_2_extruder"));
        global
            .extruders
            .insert(1, ExtruderStack::new("machine_1_e1", 1, "ultiplex_2_extruder"));
        global.extruders.get_mut(&0).unwrap().enabled = false;
        assert_eq!(global.default_extruder_position(), 1);
    }
}
