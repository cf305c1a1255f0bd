use crate::model::{Container, ContainerMetadata, ContainerType, GlobalStack, Id, VariantType};
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Catalog mutation notification, consumed to schedule lookup-tree rebuilds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CatalogEvent {
    ContainerAdded { id: Id, container_type: ContainerType },
    ContainerChanged { id: Id, container_type: ContainerType },
    ContainerRemoved { id: Id, container_type: ContainerType },
}

/// The distinguishable failure kind for an unavailable or corrupted catalog
/// store. Everything else in the core is a no-op, never an error.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("catalog store unavailable: {0}")]
    Unavailable(String),
    #[error("container not found: {0}")]
    NotFound(Id),
}

/// Metadata query filter. All present fields must match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_type: Option<ContainerType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<Id>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ContainerFilter {
    pub fn of_type(container_type: ContainerType) -> Self {
        Self {
            container_type: Some(container_type),
            ..Default::default()
        }
    }

    pub fn matches(&self, meta: &ContainerMetadata) -> bool {
        if let Some(t) = self.container_type {
            if meta.container_type != t {
                return false;
            }
        }
        if let Some(definition) = &self.definition {
            if meta.definition.as_ref() != Some(definition) {
                return false;
            }
        }
        if let Some(quality_type) = &self.quality_type {
            if meta.quality_type.as_ref() != Some(quality_type) {
                return false;
            }
        }
        if let Some(name) = &self.name {
            if &meta.name != name {
                return false;
            }
        }
        true
    }
}

/// Machine stack query filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<Id>,
}

impl StackFilter {
    pub fn matches(&self, stack: &GlobalStack) -> bool {
        match &self.definition {
            Some(definition) => stack.definition_id() == definition,
            None => true,
        }
    }
}

/// The external container catalog. Persistence and serialization live
/// entirely behind this trait; the core only sees metadata-tagged bundles.
#[async_trait::async_trait]
pub trait ContainerStore: Send + Sync {
    async fn find_containers_metadata(
        &self,
        filter: &ContainerFilter,
    ) -> Result<Vec<ContainerMetadata>>;
    async fn get_container(&self, id: &Id) -> Result<Option<Container>>;
    async fn add_container(&self, container: Container) -> Result<()>;
    /// Replace an existing container in place.
    async fn update_container(&self, container: Container) -> Result<()>;
    async fn remove_container(&self, id: &Id) -> Result<bool>;
    /// Produce a name not currently used by any container, derived from base.
    async fn unique_name(&self, base: &str) -> Result<String>;

    async fn find_machine_stacks(&self, filter: &StackFilter) -> Result<Vec<GlobalStack>>;
    async fn get_machine_stack(&self, id: &Id) -> Result<Option<GlobalStack>>;
    async fn upsert_machine_stack(&self, stack: GlobalStack) -> Result<()>;
}

/// Material identity collaborator. Implementations wrap whatever material
/// database the application ships.
pub trait MaterialLookup: Send + Sync {
    /// Fallback root material ids to also try during quality search, most
    /// preferred first. May contain duplicates; callers deduplicate.
    fn fallback_material_ids(&self, material_id: &Id) -> Vec<Id>;
    /// Strip the diameter component off a material id.
    fn root_material_id_without_diameter(&self, material_id: &Id) -> Id;
    /// The machine's configured default material for a nozzle, if any.
    fn default_material(&self, definition_id: &Id, position: usize, nozzle: Option<&str>)
        -> Option<Id>;
    /// Whether a material may be used with the given nozzle on this machine.
    fn is_compatible(&self, definition_id: &Id, nozzle: Option<&str>, material_id: &Id) -> bool;
}

/// Variant identity collaborator.
pub trait VariantLookup: Send + Sync {
    fn default_variant(&self, definition_id: &Id, variant_type: VariantType) -> Option<String>;
}
