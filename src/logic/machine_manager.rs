use crate::logic::notify::{Notifier, Signal};
use crate::logic::quality_manager::QualityManager;
use crate::model::{
    Container, ContainerMetadata, ContainerType, ExtruderConfig, GlobalStack, Id, MachineState,
    QualityChangesGroup, QualityGroup, SettingKind, StackSlot, VariantType,
};
use crate::store::traits::{ContainerFilter, ContainerStore, MaterialLookup, VariantLookup};
use anyhow::{anyhow, Result};
use log::debug;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// The active machine's resolved selection. The none/none tuple is the valid
/// "not supported" state, not a failure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActiveState {
    pub quality_group: Option<QualityGroup>,
    pub quality_changes_group: Option<QualityChangesGroup>,
}

/// Orchestrates the active machine: reacts to material/variant/enablement/
/// selection changes, keeps every extruder's sub-configuration consistent,
/// and emits one coalesced notification batch per transition. Every
/// transition is synchronous from the caller's perspective, re-entrant and
/// idempotent; invalid requests are no-ops returning false.
pub struct MachineManager<S, M, V> {
    store: Arc<S>,
    qualities: Arc<QualityManager<S>>,
    materials: Arc<M>,
    variants: Arc<V>,
    notifier: Arc<Notifier>,
    preferred_quality_type: Option<String>,
    active_machine: RwLock<Option<Id>>,
    active: RwLock<ActiveState>,
}

impl<S, M, V> MachineManager<S, M, V>
where
    S: ContainerStore,
    M: MaterialLookup,
    V: VariantLookup,
{
    pub fn new(
        store: Arc<S>,
        qualities: Arc<QualityManager<S>>,
        materials: Arc<M>,
        variants: Arc<V>,
        notifier: Arc<Notifier>,
        preferred_quality_type: Option<String>,
    ) -> Self {
        Self {
            store,
            qualities,
            materials,
            variants,
            notifier,
            preferred_quality_type,
            active_machine: RwLock::new(None),
            active: RwLock::new(ActiveState::default()),
        }
    }

    /// Current `(quality_group, quality_changes_group)` tuple.
    pub fn active_state(&self) -> ActiveState {
        self.active.read().clone()
    }

    pub fn active_machine_id(&self) -> Option<Id> {
        self.active_machine.read().clone()
    }

    /// Activate a machine: extruders without a nozzle get the machine's
    /// default variant bound, then the initial quality selection resolves.
    pub async fn set_active_machine(&self, machine_id: &Id) -> Result<bool> {
        let Some(mut machine) = self.store.get_machine_stack(machine_id).await? else {
            return Ok(false);
        };
        let _scope = self.notifier.batch();
        *self.active_machine.write() = Some(machine_id.clone());
        *self.active.write() = ActiveState::default();
        if self.assign_default_variants(&mut machine).await? {
            self.store.upsert_machine_stack(machine.clone()).await?;
        }
        self.refresh_quality_state(machine).await?;
        Ok(true)
    }

    /// Bind the machine's default nozzle variant to every extruder that has
    /// none. Returns whether anything changed.
    async fn assign_default_variants(&self, machine: &mut GlobalStack) -> Result<bool> {
        let definition_id = machine.definition_id().clone();
        let Some(default_name) = self
            .variants
            .default_variant(&definition_id, VariantType::Nozzle)
        else {
            return Ok(false);
        };
        let candidates = self
            .store
            .find_containers_metadata(&ContainerFilter {
                container_type: Some(ContainerType::Variant),
                definition: Some(definition_id),
                name: Some(default_name),
                ..Default::default()
            })
            .await?;
        let Some(default_variant) = candidates.first() else {
            return Ok(false);
        };

        let mut changed = false;
        for extruder in machine.extruders.values_mut() {
            if extruder.stack.slot_is_empty(StackSlot::Variant) {
                extruder
                    .stack
                    .set_container_id(StackSlot::Variant, default_variant.id.clone());
                self.notifier.emit(Signal::VariantChanged {
                    position: extruder.position,
                });
                changed = true;
            }
        }
        Ok(changed)
    }

    /// Snapshot of the machine configuration quality resolution consumes.
    pub async fn machine_state(&self) -> Result<MachineState> {
        let machine = self.active_stack().await?;
        self.machine_state_of(&machine).await
    }

    pub async fn quality_groups(&self) -> Result<HashMap<String, QualityGroup>> {
        let state = self.machine_state().await?;
        self.qualities.quality_groups(&state).await
    }

    pub async fn quality_changes_groups(&self) -> Result<HashMap<String, QualityChangesGroup>> {
        let state = self.machine_state().await?;
        self.qualities.quality_changes_groups(&state).await
    }

    /// Material changed: rebind the extruder's material slot, then follow the
    /// quality rules. `None` unloads the material.
    pub async fn set_material(&self, position: usize, material_id: Option<Id>) -> Result<bool> {
        let mut machine = self.active_stack().await?;
        if !machine.extruders.contains_key(&position) {
            return Ok(false);
        }
        let container_id = match material_id {
            Some(id) => {
                if self.store.get_container(&id).await?.is_none() {
                    return Ok(false);
                }
                id
            }
            None => Container::empty_id(ContainerType::Material),
        };

        let _scope = self.notifier.batch();
        machine
            .extruders
            .get_mut(&position)
            .map(|e| e.stack.set_container_id(StackSlot::Material, container_id));
        self.store.upsert_machine_stack(machine.clone()).await?;
        self.notifier.emit(Signal::MaterialChanged { position });
        self.refresh_quality_state(machine).await?;
        Ok(true)
    }

    /// Variant (nozzle) changed: rebind the variant slot, re-resolve a
    /// compatible material (same one if still valid, else the machine's
    /// default for the new nozzle), then follow the quality rules.
    pub async fn set_variant(&self, position: usize, variant_id: Id) -> Result<bool> {
        let mut machine = self.active_stack().await?;
        if !machine.extruders.contains_key(&position) {
            return Ok(false);
        }
        let Some(variant) = self.store.get_container(&variant_id).await? else {
            return Ok(false);
        };
        let nozzle_name = variant.meta.name.clone();

        let _scope = self.notifier.batch();
        let definition_id = machine.definition_id().clone();
        let Some(extruder) = machine.extruders.get_mut(&position) else {
            return Ok(false);
        };
        extruder.stack.set_container_id(StackSlot::Variant, variant_id);
        self.notifier.emit(Signal::VariantChanged { position });

        let current_material = extruder.stack.material.clone();
        let keep_current = !extruder.stack.slot_is_empty(StackSlot::Material)
            && self.materials.is_compatible(
                &definition_id,
                Some(&nozzle_name),
                &self
                    .materials
                    .root_material_id_without_diameter(&current_material),
            );
        if !keep_current {
            let replacement = self
                .materials
                .default_material(&definition_id, position, Some(&nozzle_name))
                .unwrap_or_else(|| Container::empty_id(ContainerType::Material));
            extruder.stack.set_container_id(StackSlot::Material, replacement);
            self.notifier.emit(Signal::MaterialChanged { position });
        }

        self.store.upsert_machine_stack(machine.clone()).await?;
        self.refresh_quality_state(machine).await?;
        Ok(true)
    }

    /// Enable or disable one extruder. Disabling the last enabled extruder
    /// is rejected. User overrides of extruder-index settings that now point
    /// at a disabled or out-of-range extruder are relocated to the machine
    /// stack, pinned to the current default extruder.
    pub async fn set_extruder_enabled(&self, position: usize, enabled: bool) -> Result<bool> {
        let mut machine = self.active_stack().await?;
        if !machine.extruders.contains_key(&position) {
            return Ok(false);
        }
        if !enabled && machine.enabled_positions() == vec![position] {
            return Ok(false);
        }

        let _scope = self.notifier.batch();
        machine.extruders.get_mut(&position).map(|e| e.enabled = enabled);
        self.notifier.emit(Signal::ExtruderEnabledChanged { position });
        self.relocate_extruder_index_settings(&mut machine).await?;
        self.store.upsert_machine_stack(machine.clone()).await?;
        self.refresh_quality_state(machine).await?;
        Ok(true)
    }

    /// Explicit quality selection. Rejected (no state change) unless the
    /// group binds a global node and a node for every enabled extruder.
    pub async fn set_quality_group(&self, group: &QualityGroup) -> Result<bool> {
        let mut machine = self.active_stack().await?;
        if !Self::quality_group_is_bound(group, &machine) {
            return Ok(false);
        }
        let _scope = self.notifier.batch();
        self.apply_quality_group(&mut machine, group.clone()).await?;
        Ok(true)
    }

    /// Explicit profile selection. Rejected unless the profile binds every
    /// required node and its base quality_type still resolves.
    pub async fn set_quality_changes_group(&self, group: &QualityChangesGroup) -> Result<bool> {
        let mut machine = self.active_stack().await?;
        let state = self.machine_state_of(&machine).await?;
        let quality_groups = self.qualities.quality_groups(&state).await?;
        let Some(base) = quality_groups.get(&group.quality_type) else {
            return Ok(false);
        };
        if !base.is_available || group.node_for_global.is_none() {
            return Ok(false);
        }
        let bound = machine
            .enabled_positions()
            .iter()
            .all(|p| group.nodes_for_extruders.contains_key(p));
        if !bound {
            return Ok(false);
        }

        let _scope = self.notifier.batch();
        self.apply_quality_changes_group(&mut machine, base.clone(), group.clone())
            .await?;
        Ok(true)
    }

    /// Extract the current user edits into a named profile and activate it.
    /// Returns None when no quality is active to base the profile on.
    pub async fn create_quality_changes(&self, name: &str) -> Result<Option<QualityChangesGroup>> {
        let machine = self.active_stack().await?;
        let Some(quality_type) = self
            .active
            .read()
            .quality_group
            .as_ref()
            .map(|g| g.quality_type.clone())
        else {
            return Ok(None);
        };
        let state = self.machine_state_of(&machine).await?;
        let search_definition = state
            .quality_search_id(self.qualities.generic_definition_id())
            .clone();

        let _scope = self.notifier.batch();
        let group = self
            .qualities
            .create_quality_changes(&machine, &search_definition, &quality_type, name)
            .await?;
        if !self.set_quality_changes_group(&group).await? {
            debug!("created profile '{}' could not be activated", group.name);
        }
        Ok(Some(group))
    }

    /// Fold the user overrides into the active profile, clearing them.
    pub async fn update_quality_changes(&self) -> Result<bool> {
        let machine = self.active_stack().await?;
        let _scope = self.notifier.batch();
        self.qualities.fold_user_changes(&machine).await
    }

    pub async fn rename_quality_changes_group(
        &self,
        group: &QualityChangesGroup,
        new_name: &str,
    ) -> Result<String> {
        let name = self
            .qualities
            .rename_quality_changes_group(group, new_name)
            .await?;
        let mut active = self.active.write();
        if let Some(current) = active.quality_changes_group.as_mut() {
            if current.name == group.name {
                current.name = name.clone();
            }
        }
        Ok(name)
    }

    pub async fn remove_quality_changes_group(&self, group: &QualityChangesGroup) -> Result<()> {
        let _scope = self.notifier.batch();
        self.qualities.remove_quality_changes_group(group).await?;
        let was_active = {
            let mut active = self.active.write();
            match active.quality_changes_group.as_ref() {
                Some(current) if current.name == group.name => {
                    active.quality_changes_group = None;
                    true
                }
                _ => false,
            }
        };
        if was_active {
            self.notifier.emit(Signal::ActiveQualityChanged);
        }
        Ok(())
    }

    async fn active_stack(&self) -> Result<GlobalStack> {
        let id = self
            .active_machine
            .read()
            .clone()
            .ok_or_else(|| anyhow!("no active machine"))?;
        self.store
            .get_machine_stack(&id)
            .await?
            .ok_or_else(|| anyhow!("active machine stack '{}' not found", id))
    }

    async fn machine_state_of(&self, machine: &GlobalStack) -> Result<MachineState> {
        let mut extruders = Vec::new();
        for extruder in machine.extruders.values() {
            let variant_name = if extruder.stack.slot_is_empty(StackSlot::Variant) {
                None
            } else {
                self.store
                    .get_container(&extruder.stack.variant)
                    .await?
                    .map(|c| c.meta.name)
            };
            let (material_id, fallbacks) = if extruder.stack.slot_is_empty(StackSlot::Material) {
                (None, Vec::new())
            } else {
                let root = self
                    .materials
                    .root_material_id_without_diameter(&extruder.stack.material);
                let fallbacks = self.materials.fallback_material_ids(&extruder.stack.material);
                (Some(root), fallbacks)
            };
            extruders.push(ExtruderConfig {
                position: extruder.position,
                enabled: extruder.enabled,
                variant_name,
                material_id,
                fallback_material_ids: fallbacks,
            });
        }
        Ok(MachineState {
            definition_id: machine.definition_id().clone(),
            has_machine_quality: machine.has_machine_quality,
            quality_definition: machine.quality_definition.clone(),
            buildplate_name: machine.buildplate_name.clone(),
            extruders,
        })
    }

    /// The quality follow rules run after every axis change: keep the
    /// current quality_type while it stays available; fall back to the
    /// preferred, then the lexicographically-first available type; the
    /// none/none tuple is the valid "not supported" end state.
    async fn refresh_quality_state(&self, mut machine: GlobalStack) -> Result<()> {
        let state = self.machine_state_of(&machine).await?;
        let groups = self.qualities.quality_groups(&state).await?;

        let (current_type, changes_active) = {
            let active = self.active.read();
            (
                active.quality_group.as_ref().map(|g| g.quality_type.clone()),
                active.quality_changes_group.clone(),
            )
        };

        if let Some(quality_type) = &current_type {
            if groups.get(quality_type).map(|g| g.is_available).unwrap_or(false) {
                // Assignment unchanged; rebind in case the nodes moved.
                let group = groups[quality_type].clone();
                match changes_active {
                    Some(changes) => {
                        self.apply_quality_changes_group(&mut machine, group, changes)
                            .await?
                    }
                    None => self.apply_quality_group(&mut machine, group).await?,
                }
                return Ok(());
            }
        }

        let mut available: Vec<&String> = groups
            .iter()
            .filter(|(_, g)| g.is_available)
            .map(|(quality_type, _)| quality_type)
            .collect();
        available.sort();

        if available.is_empty() {
            if changes_active.is_none() {
                self.enter_not_supported(&mut machine).await?;
            }
            return Ok(());
        }

        let pick = self
            .preferred_quality_type
            .as_ref()
            .filter(|preferred| available.iter().any(|t| t == preferred))
            .cloned()
            .unwrap_or_else(|| available[0].clone());
        let group = groups[&pick].clone();
        self.apply_quality_group(&mut machine, group).await?;
        Ok(())
    }

    async fn enter_not_supported(&self, machine: &mut GlobalStack) -> Result<()> {
        machine.stack.clear_slot(StackSlot::Quality);
        machine.stack.clear_slot(StackSlot::QualityChanges);
        for extruder in machine.extruders.values_mut() {
            extruder.stack.clear_slot(StackSlot::Quality);
            extruder.stack.clear_slot(StackSlot::QualityChanges);
        }
        self.store.upsert_machine_stack(machine.clone()).await?;
        let mut active = self.active.write();
        if *active != ActiveState::default() {
            *active = ActiveState::default();
            drop(active);
            self.notifier.emit(Signal::ActiveQualityChanged);
        }
        Ok(())
    }

    fn quality_group_is_bound(group: &QualityGroup, machine: &GlobalStack) -> bool {
        group.node_for_global.is_some()
            && machine
                .enabled_positions()
                .iter()
                .all(|p| group.nodes_for_extruders.contains_key(p))
    }

    async fn apply_quality_group(
        &self,
        machine: &mut GlobalStack,
        group: QualityGroup,
    ) -> Result<()> {
        Self::bind_quality_slots(machine, &group);
        machine.stack.clear_slot(StackSlot::QualityChanges);
        for extruder in machine.extruders.values_mut() {
            extruder.stack.clear_slot(StackSlot::QualityChanges);
        }
        self.store.upsert_machine_stack(machine.clone()).await?;

        let next = ActiveState {
            quality_group: Some(group),
            quality_changes_group: None,
        };
        self.store_active_state(next);
        Ok(())
    }

    async fn apply_quality_changes_group(
        &self,
        machine: &mut GlobalStack,
        base: QualityGroup,
        changes: QualityChangesGroup,
    ) -> Result<()> {
        Self::bind_quality_slots(machine, &base);
        match &changes.node_for_global {
            Some(id) => machine.stack.set_container_id(StackSlot::QualityChanges, id.clone()),
            None => machine.stack.clear_slot(StackSlot::QualityChanges),
        }
        for extruder in machine.extruders.values_mut() {
            match changes.nodes_for_extruders.get(&extruder.position) {
                Some(id) => extruder
                    .stack
                    .set_container_id(StackSlot::QualityChanges, id.clone()),
                None => extruder.stack.clear_slot(StackSlot::QualityChanges),
            }
        }
        self.store.upsert_machine_stack(machine.clone()).await?;

        let next = ActiveState {
            quality_group: Some(base),
            quality_changes_group: Some(changes),
        };
        self.store_active_state(next);
        Ok(())
    }

    fn bind_quality_slots(machine: &mut GlobalStack, group: &QualityGroup) {
        match &group.node_for_global {
            Some(leaf) => machine
                .stack
                .set_container_id(StackSlot::Quality, leaf.container_id.clone()),
            None => machine.stack.clear_slot(StackSlot::Quality),
        }
        for extruder in machine.extruders.values_mut() {
            match group.nodes_for_extruders.get(&extruder.position) {
                Some(leaf) => extruder
                    .stack
                    .set_container_id(StackSlot::Quality, leaf.container_id.clone()),
                None => extruder.stack.clear_slot(StackSlot::Quality),
            }
        }
    }

    fn store_active_state(&self, next: ActiveState) {
        let mut active = self.active.write();
        if *active != next {
            *active = next;
            drop(active);
            self.notifier.emit(Signal::ActiveQualityChanged);
        }
    }

    /// Move user-set extruder-index values that point at a disabled or
    /// out-of-range extruder into the machine's user container, pinned to
    /// the current default extruder. Surfaced as a notice signal per key.
    async fn relocate_extruder_index_settings(&self, machine: &mut GlobalStack) -> Result<()> {
        let Some(definition) = self.store.get_container(&machine.stack.definition).await? else {
            return Ok(());
        };
        let index_keys: Vec<&String> = definition
            .setting_defs
            .iter()
            .filter(|(_, def)| def.kind == SettingKind::ExtruderIndex)
            .map(|(key, _)| key)
            .collect();
        if index_keys.is_empty() {
            return Ok(());
        }

        let enabled = machine.enabled_positions();
        let default_position = machine.default_extruder_position();
        let mut relocated: Vec<String> = Vec::new();

        let user_slots: Vec<Id> = std::iter::once(machine.stack.user.clone())
            .chain(machine.extruders.values().map(|e| e.stack.user.clone()))
            .collect();
        for user_id in user_slots {
            if user_id == Container::empty_id(ContainerType::User) {
                continue;
            }
            let Some(mut user) = self.store.get_container(&user_id).await? else {
                continue;
            };
            let mut dirty = false;
            for key in &index_keys {
                let stale = user
                    .settings
                    .get(*key)
                    .and_then(|v| v.as_u64())
                    .map(|target| !enabled.contains(&(target as usize)))
                    .unwrap_or(false);
                if stale {
                    user.settings.remove(*key);
                    relocated.push((*key).clone());
                    dirty = true;
                }
            }
            if dirty {
                user.touch("user");
                self.store.update_container(user).await?;
            }
        }

        if relocated.is_empty() {
            return Ok(());
        }

        let mut machine_user = self
            .ensure_machine_user_container(machine)
            .await?;
        for key in relocated {
            machine_user
                .settings
                .insert(key.clone(), serde_json::json!(default_position));
            debug!(
                "relocated extruder-index setting '{}' to extruder {}",
                key, default_position
            );
            self.notifier.emit(Signal::SettingValueChanged {
                key: key.clone(),
                value: serde_json::json!(default_position),
            });
            self.notifier.emit(Signal::SettingRelocated { key });
        }
        machine_user.touch("user");
        self.store.update_container(machine_user).await?;
        Ok(())
    }

    /// The global stack's user container, created on first write so the
    /// shared empty placeholder is never mutated.
    async fn ensure_machine_user_container(&self, machine: &mut GlobalStack) -> Result<Container> {
        if !machine.stack.slot_is_empty(StackSlot::User) {
            if let Some(container) = self.store.get_container(&machine.stack.user).await? {
                return Ok(container);
            }
        }
        let id = format!("{}_user", machine.id());
        let container = Container::new(ContainerMetadata::new(
            id.clone(),
            id.clone(),
            ContainerType::User,
        ));
        self.store.add_container(container.clone()).await?;
        machine.stack.set_container_id(StackSlot::User, id);
        Ok(container)
    }
}
