use crate::config::AppConfig;
use crate::logic::merge::ProfileEngine;
use crate::logic::notify::{Notifier, RebuildDebouncer, Signal};
use crate::logic::resolve::QualityResolver;
use crate::logic::tree::{CatalogDiagnostic, QualityTreeBuilder};
use crate::model::{
    ContainerType, GlobalStack, Id, MachineState, QualityChangesGroup, QualityGroup, QualityTree,
};
use crate::store::traits::{CatalogEvent, ContainerFilter, ContainerStore};
use anyhow::Result;
use log::debug;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Owns the quality lookup tree: rebuilds it when the catalog changes
/// (debounced), answers group-resolution queries, and hosts the profile
/// authoring operations. All reads see a fully built tree; rebuilds happen
/// at the synchronization points below, never mid-query.
pub struct QualityManager<S> {
    store: Arc<S>,
    notifier: Arc<Notifier>,
    generic_definition_id: Id,
    tree: RwLock<QualityTree>,
    diagnostics: RwLock<Vec<CatalogDiagnostic>>,
    debouncer: Mutex<RebuildDebouncer>,
    catalog_events: Mutex<mpsc::UnboundedReceiver<CatalogEvent>>,
}

impl<S: ContainerStore> QualityManager<S> {
    pub fn new(
        store: Arc<S>,
        catalog_events: mpsc::UnboundedReceiver<CatalogEvent>,
        notifier: Arc<Notifier>,
        config: &AppConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            generic_definition_id: config.resolution.generic_definition_id.clone(),
            tree: RwLock::new(QualityTree::default()),
            diagnostics: RwLock::new(Vec::new()),
            debouncer: Mutex::new(RebuildDebouncer::new(config.debounce_interval())),
            catalog_events: Mutex::new(catalog_events),
        }
    }

    pub fn generic_definition_id(&self) -> &Id {
        &self.generic_definition_id
    }

    /// Full rebuild from the current catalog. Replaces the tree atomically
    /// and retains the diagnostics of skipped records.
    pub async fn rebuild(&self) -> Result<()> {
        let mut metadata = self
            .store
            .find_containers_metadata(&ContainerFilter::of_type(ContainerType::Quality))
            .await?;
        metadata.extend(
            self.store
                .find_containers_metadata(&ContainerFilter::of_type(ContainerType::QualityChanges))
                .await?,
        );

        let (tree, diagnostics) = QualityTreeBuilder::build(&metadata);
        debug!(
            "rebuilt quality tree: {} machines, {} records skipped",
            tree.machines.len(),
            diagnostics.len()
        );
        *self.tree.write() = tree;
        *self.diagnostics.write() = diagnostics;
        self.debouncer.lock().reset();
        self.notifier.emit(Signal::QualityCatalogRebuilt);
        Ok(())
    }

    /// Synchronization point: drain pending catalog events and rebuild once
    /// if the debounce quiet period has elapsed. Returns whether a rebuild
    /// ran.
    pub async fn maybe_rebuild(&self) -> Result<bool> {
        {
            let mut events = self.catalog_events.lock();
            let mut debouncer = self.debouncer.lock();
            while let Ok(event) = events.try_recv() {
                if Self::affects_tree(&event) {
                    debouncer.note_change();
                }
            }
            if !debouncer.take_if_due() {
                return Ok(false);
            }
        }
        self.rebuild().await?;
        Ok(true)
    }

    fn affects_tree(event: &CatalogEvent) -> bool {
        let container_type = match event {
            CatalogEvent::ContainerAdded { container_type, .. }
            | CatalogEvent::ContainerChanged { container_type, .. }
            | CatalogEvent::ContainerRemoved { container_type, .. } => container_type,
        };
        matches!(
            container_type,
            ContainerType::Quality | ContainerType::QualityChanges
        )
    }

    /// Diagnostics from the last rebuild (skipped catalog records).
    pub fn diagnostics(&self) -> Vec<CatalogDiagnostic> {
        self.diagnostics.read().clone()
    }

    pub async fn quality_groups(
        &self,
        machine: &MachineState,
    ) -> Result<HashMap<String, QualityGroup>> {
        self.maybe_rebuild().await?;
        let tree = self.tree.read();
        Ok(QualityResolver::quality_groups(
            &tree,
            machine,
            &self.generic_definition_id,
        ))
    }

    pub async fn quality_changes_groups(
        &self,
        machine: &MachineState,
    ) -> Result<HashMap<String, QualityChangesGroup>> {
        self.maybe_rebuild().await?;
        let tree = self.tree.read();
        Ok(QualityResolver::quality_changes_groups(
            &tree,
            machine,
            &self.generic_definition_id,
        ))
    }

    /// Extract the machine's current quality_changes + user overrides into a
    /// new named profile. Rebuilds immediately so the profile resolves on
    /// the very next query.
    pub async fn create_quality_changes(
        &self,
        machine: &GlobalStack,
        search_definition: &Id,
        quality_type: &str,
        name: &str,
    ) -> Result<QualityChangesGroup> {
        let group = ProfileEngine::create_quality_changes(
            &*self.store,
            machine,
            search_definition,
            quality_type,
            name,
        )
        .await?;
        self.rebuild().await?;
        Ok(group)
    }

    pub async fn duplicate_quality_changes(
        &self,
        group: &QualityChangesGroup,
        new_name: &str,
    ) -> Result<QualityChangesGroup> {
        let duplicated =
            ProfileEngine::duplicate_quality_changes(&*self.store, group, new_name).await?;
        self.rebuild().await?;
        Ok(duplicated)
    }

    pub async fn rename_quality_changes_group(
        &self,
        group: &QualityChangesGroup,
        new_name: &str,
    ) -> Result<String> {
        let name = ProfileEngine::rename_quality_changes_group(&*self.store, group, new_name).await?;
        if name != group.name {
            self.rebuild().await?;
        }
        Ok(name)
    }

    pub async fn remove_quality_changes_group(&self, group: &QualityChangesGroup) -> Result<()> {
        ProfileEngine::remove_quality_changes_group(&*self.store, group).await?;
        self.rebuild().await?;
        Ok(())
    }

    pub async fn fold_user_changes(&self, machine: &GlobalStack) -> Result<bool> {
        let folded = ProfileEngine::fold_user_changes(&*self.store, machine).await?;
        if folded {
            self.rebuild().await?;
        }
        Ok(folded)
    }
}
