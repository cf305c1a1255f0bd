pub mod config;
pub mod logic;
pub mod model;
pub mod seed;
pub mod store;

// Export logic types
pub use logic::{
    merge_settings, ActiveState, CatalogDiagnostic, CatalogDiagnosticKind, MachineManager,
    Notifier, ProfileEngine, QualityManager, QualityResolver, QualityTreeBuilder,
    RebuildDebouncer, Signal, StackResolver,
};

// Export all model types
pub use model::*;

// Export seed module
pub use seed::*;

// Export store types
pub use store::{
    CatalogEvent, ContainerFilter, ContainerStore, InMemoryStore, MaterialLookup, StackFilter,
    StaticMaterialLookup, StaticVariantLookup, StoreError, VariantLookup,
};
