use crate::model::{
    Container, ContainerMetadata, ContainerType, GlobalStack, Id, QualityChangesGroup, StackSlot,
};
use crate::store::traits::{ContainerStore, StackFilter, StoreError};
use anyhow::Result;
use log::debug;
use std::collections::HashMap;
use uuid::Uuid;

/// Write every key present in `source` into `target`. Keys only present in
/// `target` are kept. Merging an empty source is a no-op.
pub fn merge_settings(target: &mut Container, source: &Container) {
    for (key, value) in &source.settings {
        target.settings.insert(key.clone(), value.clone());
    }
}

/// Profile authoring: extracting ad-hoc user edits into durable, named
/// quality_changes containers, and the structural operations on them.
pub struct ProfileEngine;

impl ProfileEngine {
    /// Synthesize a quality_changes container per stack (global + every
    /// extruder) from the current quality_changes and user overrides, with
    /// the quality_changes values winning on conflict. The user containers
    /// are not touched by this step.
    pub async fn create_quality_changes<S: ContainerStore>(
        store: &S,
        machine: &GlobalStack,
        search_definition: &Id,
        quality_type: &str,
        name: &str,
    ) -> Result<QualityChangesGroup> {
        let name = store.unique_name(name).await?;

        let global_id = Self::synthesize_one(
            store,
            &machine.stack,
            search_definition,
            quality_type,
            &name,
            None,
        )
        .await?;

        let mut extruder_ids = HashMap::new();
        for extruder in machine.extruders.values() {
            let id = Self::synthesize_one(
                store,
                &extruder.stack,
                search_definition,
                quality_type,
                &name,
                Some(extruder.position),
            )
            .await?;
            extruder_ids.insert(extruder.position, id);
        }

        debug!(
            "created quality_changes '{}' ({}) for machine '{}'",
            name,
            quality_type,
            machine.id()
        );
        Ok(QualityChangesGroup {
            name,
            quality_type: quality_type.to_string(),
            node_for_global: Some(global_id),
            nodes_for_extruders: extruder_ids,
            is_available: true,
        })
    }

    async fn synthesize_one<S: ContainerStore>(
        store: &S,
        stack: &crate::model::ContainerStack,
        search_definition: &Id,
        quality_type: &str,
        name: &str,
        position: Option<usize>,
    ) -> Result<Id> {
        let mut meta = ContainerMetadata::new(
            Uuid::new_v4().to_string(),
            name,
            ContainerType::QualityChanges,
        );
        meta.definition = Some(search_definition.clone());
        meta.quality_type = Some(quality_type.to_string());
        meta.position = position;

        let mut container = Container::new(meta);
        // Union of user and quality_changes overrides; quality_changes wins.
        if let Some(user) = store.get_container(stack.container_id(StackSlot::User)).await? {
            merge_settings(&mut container, &user);
        }
        if let Some(changes) = store
            .get_container(stack.container_id(StackSlot::QualityChanges))
            .await?
        {
            merge_settings(&mut container, &changes);
        }

        let id = container.id().clone();
        store.add_container(container).await?;
        Ok(id)
    }

    /// Fold the user overrides of every stack permanently into its active
    /// quality_changes container, then clear the user containers. Returns
    /// false (no-op) when no quality_changes profile is active.
    pub async fn fold_user_changes<S: ContainerStore>(
        store: &S,
        machine: &GlobalStack,
    ) -> Result<bool> {
        if machine.stack.slot_is_empty(StackSlot::QualityChanges) {
            return Ok(false);
        }
        let stacks = std::iter::once(&machine.stack)
            .chain(machine.extruders.values().map(|e| &e.stack));
        for stack in stacks {
            if stack.slot_is_empty(StackSlot::QualityChanges) {
                continue;
            }
            let Some(mut target) = store
                .get_container(stack.container_id(StackSlot::QualityChanges))
                .await?
            else {
                continue;
            };
            let Some(mut user) = store.get_container(stack.container_id(StackSlot::User)).await?
            else {
                continue;
            };
            merge_settings(&mut target, &user);
            target.touch("user");
            store.update_container(target).await?;

            if !user.is_empty_placeholder() && !user.settings.is_empty() {
                user.settings.clear();
                user.touch("user");
                store.update_container(user).await?;
            }
        }
        Ok(true)
    }

    /// Structural copy of every container in a group under a new unique name.
    pub async fn duplicate_quality_changes<S: ContainerStore>(
        store: &S,
        group: &QualityChangesGroup,
        new_name: &str,
    ) -> Result<QualityChangesGroup> {
        let name = store.unique_name(new_name).await?;

        let mut duplicated = QualityChangesGroup {
            name: name.clone(),
            quality_type: group.quality_type.clone(),
            node_for_global: None,
            nodes_for_extruders: HashMap::new(),
            is_available: group.is_available,
        };
        if let Some(global_id) = &group.node_for_global {
            duplicated.node_for_global = Some(Self::copy_one(store, global_id, &name).await?);
        }
        for (position, id) in &group.nodes_for_extruders {
            duplicated
                .nodes_for_extruders
                .insert(*position, Self::copy_one(store, id, &name).await?);
        }
        Ok(duplicated)
    }

    async fn copy_one<S: ContainerStore>(store: &S, id: &Id, name: &str) -> Result<Id> {
        let source = store
            .get_container(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let mut copy = source.clone();
        copy.meta.id = Uuid::new_v4().to_string();
        copy.meta.name = name.to_string();
        copy.touch("user");
        let new_id = copy.id().clone();
        store.add_container(copy).await?;
        Ok(new_id)
    }

    /// In-place rename of every container in a group. Container ids stay
    /// stable, so stacks referencing the group keep resolving. Renaming to
    /// the current name is a no-op returning the unchanged name.
    pub async fn rename_quality_changes_group<S: ContainerStore>(
        store: &S,
        group: &QualityChangesGroup,
        new_name: &str,
    ) -> Result<String> {
        if new_name == group.name {
            return Ok(group.name.clone());
        }
        let name = store.unique_name(new_name).await?;
        for id in Self::group_container_ids(group) {
            if let Some(mut container) = store.get_container(&id).await? {
                container.meta.name = name.clone();
                container.touch("user");
                store.update_container(container).await?;
            }
        }
        Ok(name)
    }

    /// Delete every container in a group, then reset every stack across all
    /// machines whose quality_changes slot referenced a deleted id back to
    /// the empty placeholder.
    pub async fn remove_quality_changes_group<S: ContainerStore>(
        store: &S,
        group: &QualityChangesGroup,
    ) -> Result<()> {
        let removed = Self::group_container_ids(group);
        for id in &removed {
            store.remove_container(id).await?;
        }

        for mut machine in store.find_machine_stacks(&StackFilter::default()).await? {
            let mut dirty = false;
            if removed.contains(&machine.stack.quality_changes) {
                machine.stack.clear_slot(StackSlot::QualityChanges);
                dirty = true;
            }
            for extruder in machine.extruders.values_mut() {
                if removed.contains(&extruder.stack.quality_changes) {
                    extruder.stack.clear_slot(StackSlot::QualityChanges);
                    dirty = true;
                }
            }
            if dirty {
                debug!(
                    "resetting quality_changes slots on machine '{}' after profile removal",
                    machine.id()
                );
                store.upsert_machine_stack(machine).await?;
            }
        }
        Ok(())
    }

    fn group_container_ids(group: &QualityChangesGroup) -> Vec<Id> {
        group
            .node_for_global
            .iter()
            .cloned()
            .chain(group.nodes_for_extruders.values().cloned())
            .collect()
    }
}
