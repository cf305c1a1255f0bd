use crate::model::{
    Container, ContainerMetadata, ContainerType, GlobalStack, Id, VariantType,
};
use crate::store::traits::{
    CatalogEvent, ContainerFilter, ContainerStore, MaterialLookup, StackFilter, VariantLookup,
};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::RwLock;

/// In-memory container catalog. Stands in for the application's persistent
/// store; the empty "no override" placeholders are seeded at construction so
/// bare stacks always resolve.
#[derive(Debug)]
pub struct InMemoryStore {
    containers: Arc<RwLock<HashMap<Id, Container>>>,
    stacks: Arc<RwLock<HashMap<Id, GlobalStack>>>,
    subscribers: parking_lot::Mutex<Vec<mpsc::UnboundedSender<CatalogEvent>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        let mut containers = HashMap::new();
        for container_type in [
            ContainerType::Definition,
            ContainerType::DefinitionChanges,
            ContainerType::Variant,
            ContainerType::Material,
            ContainerType::Quality,
            ContainerType::QualityChanges,
            ContainerType::User,
        ] {
            let empty = Container::empty(container_type);
            containers.insert(empty.id().clone(), empty);
        }
        Self {
            containers: Arc::new(RwLock::new(containers)),
            stacks: Arc::new(RwLock::new(HashMap::new())),
            subscribers: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Register a change listener. Events are emitted per mutation; bursts
    /// are coalesced downstream by the rebuild debouncer, not here.
    pub fn subscribe_changes(&self) -> mpsc::UnboundedReceiver<CatalogEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    fn emit(&self, event: CatalogEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    async fn name_in_use(&self, name: &str) -> bool {
        let containers = self.containers.read().await;
        containers.values().any(|c| c.meta.name == name)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ContainerStore for InMemoryStore {
    async fn find_containers_metadata(
        &self,
        filter: &ContainerFilter,
    ) -> Result<Vec<ContainerMetadata>> {
        let containers = self.containers.read().await;
        let mut found: Vec<ContainerMetadata> = containers
            .values()
            .map(|c| c.meta.clone())
            .filter(|meta| filter.matches(meta))
            .collect();
        // Stable output order regardless of map iteration
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    async fn get_container(&self, id: &Id) -> Result<Option<Container>> {
        let containers = self.containers.read().await;
        Ok(containers.get(id).cloned())
    }

    async fn add_container(&self, mut container: Container) -> Result<()> {
        // Imported quality_changes with a colliding name in the same
        // (definition, quality_type) scope get a uniquified name.
        if container.meta.container_type == ContainerType::QualityChanges {
            let scope_filter = ContainerFilter {
                container_type: Some(ContainerType::QualityChanges),
                definition: container.meta.definition.clone(),
                quality_type: container.meta.quality_type.clone(),
                name: Some(container.meta.name.clone()),
            };
            let colliding = self
                .find_containers_metadata(&scope_filter)
                .await?
                .into_iter()
                .any(|meta| meta.id != container.meta.id && meta.position == container.meta.position);
            if colliding {
                container.meta.name = self.unique_name(&container.meta.name).await?;
            }
        }

        let event = CatalogEvent::ContainerAdded {
            id: container.id().clone(),
            container_type: container.meta.container_type,
        };
        let mut containers = self.containers.write().await;
        containers.insert(container.id().clone(), container);
        drop(containers);
        self.emit(event);
        Ok(())
    }

    async fn update_container(&self, container: Container) -> Result<()> {
        let event = CatalogEvent::ContainerChanged {
            id: container.id().clone(),
            container_type: container.meta.container_type,
        };
        let mut containers = self.containers.write().await;
        containers.insert(container.id().clone(), container);
        drop(containers);
        self.emit(event);
        Ok(())
    }

    async fn remove_container(&self, id: &Id) -> Result<bool> {
        let mut containers = self.containers.write().await;
        let removed = containers.remove(id);
        drop(containers);
        match removed {
            Some(container) => {
                self.emit(CatalogEvent::ContainerRemoved {
                    id: id.clone(),
                    container_type: container.meta.container_type,
                });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn unique_name(&self, base: &str) -> Result<String> {
        if !self.name_in_use(base).await {
            return Ok(base.to_string());
        }
        let mut counter = 2;
        loop {
            let candidate = format!("{} #{}", base, counter);
            if !self.name_in_use(&candidate).await {
                return Ok(candidate);
            }
            counter += 1;
        }
    }

    async fn find_machine_stacks(&self, filter: &StackFilter) -> Result<Vec<GlobalStack>> {
        let stacks = self.stacks.read().await;
        let mut found: Vec<GlobalStack> = stacks
            .values()
            .filter(|stack| filter.matches(stack))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(found)
    }

    async fn get_machine_stack(&self, id: &Id) -> Result<Option<GlobalStack>> {
        let stacks = self.stacks.read().await;
        Ok(stacks.get(id).cloned())
    }

    async fn upsert_machine_stack(&self, stack: GlobalStack) -> Result<()> {
        stack.validate()?;
        let mut stacks = self.stacks.write().await;
        stacks.insert(stack.id().clone(), stack);
        Ok(())
    }
}

/// Table-backed material collaborator for tests and the demo binary.
#[derive(Debug, Default)]
pub struct StaticMaterialLookup {
    /// material id -> fallback root material ids, most preferred first.
    pub fallbacks: HashMap<Id, Vec<Id>>,
    /// (definition, nozzle) -> default material id. Nozzle None covers
    /// machines without a nozzle concept.
    pub defaults: HashMap<(Id, Option<String>), Id>,
    /// (definition, nozzle) -> materials usable with that nozzle. Missing
    /// entry means everything is compatible.
    pub compatibility: HashMap<(Id, Option<String>), Vec<Id>>,
}

impl MaterialLookup for StaticMaterialLookup {
    fn fallback_material_ids(&self, material_id: &Id) -> Vec<Id> {
        self.fallbacks.get(material_id).cloned().unwrap_or_default()
    }

    fn root_material_id_without_diameter(&self, material_id: &Id) -> Id {
        // Material ids carry an optional "_<diameter>mm" suffix.
        match material_id.rfind("_") {
            Some(idx) if material_id[idx + 1..].ends_with("mm") => material_id[..idx].to_string(),
            _ => material_id.clone(),
        }
    }

    fn default_material(
        &self,
        definition_id: &Id,
        _position: usize,
        nozzle: Option<&str>,
    ) -> Option<Id> {
        self.defaults
            .get(&(definition_id.clone(), nozzle.map(str::to_string)))
            .or_else(|| self.defaults.get(&(definition_id.clone(), None)))
            .cloned()
    }

    fn is_compatible(&self, definition_id: &Id, nozzle: Option<&str>, material_id: &Id) -> bool {
        match self
            .compatibility
            .get(&(definition_id.clone(), nozzle.map(str::to_string)))
        {
            Some(allowed) => allowed.contains(material_id),
            None => true,
        }
    }
}

/// Table-backed variant collaborator for tests and the demo binary.
#[derive(Debug, Default)]
pub struct StaticVariantLookup {
    pub defaults: HashMap<(Id, VariantType), String>,
}

impl VariantLookup for StaticVariantLookup {
    fn default_variant(&self, definition_id: &Id, variant_type: VariantType) -> Option<String> {
        self.defaults
            .get(&(definition_id.clone(), variant_type))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ContainerMetadata;

    #[tokio::test]
    async fn empty_placeholders_are_seeded() {
        let store = InMemoryStore::new();
        let quality = store
            .get_container(&Container::empty_id(ContainerType::Quality))
            .await
            .unwrap();
        assert!(quality.is_some());
        assert!(quality.unwrap().settings.is_empty());
    }

    #[tokio::test]
    async fn unique_name_counts_up_from_base() {
        let store = InMemoryStore::new();
        let meta = ContainerMetadata::new("qc_1", "My Profile", ContainerType::QualityChanges);
        store.add_container(Container::new(meta)).await.unwrap();

        assert_eq!(store.unique_name("Other").await.unwrap(), "Other");
        assert_eq!(store.unique_name("My Profile").await.unwrap(), "My Profile #2");
    }

    #[tokio::test]
    async fn change_events_reach_subscribers() {
        let store = InMemoryStore::new();
        let mut rx = store.subscribe_changes();

        let meta = ContainerMetadata::new("q_draft", "Draft", ContainerType::Quality);
        store.add_container(Container::new(meta)).await.unwrap();
        store.remove_container(&"q_draft".to_string()).await.unwrap();

        assert!(matches!(
            rx.try_recv().unwrap(),
            CatalogEvent::ContainerAdded { .. }
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            CatalogEvent::ContainerRemoved { .. }
        ));
    }

    #[test]
    fn diameter_suffix_is_stripped() {
        let lookup = StaticMaterialLookup::default();
        assert_eq!(
            lookup.root_material_id_without_diameter(&"generic_pla_2.85mm".to_string()),
            "generic_pla"
        );
        assert_eq!(
            lookup.root_material_id_without_diameter(&"generic_pla".to_string()),
            "generic_pla"
        );
    }
}
