use preset_db_rust::config::AppConfig;
use preset_db_rust::logic::{MachineManager, Notifier, QualityManager};
use preset_db_rust::seed;
use preset_db_rust::store::InMemoryStore;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    // Initialize logging
    use env_logger::Builder;
    use log::LevelFilter;

    Builder::new().filter_level(LevelFilter::Info).init();

    println!("preset-db: per-extruder slicing-configuration resolver");

    // Load configuration
    let config = AppConfig::load()?;
    println!(
        "Configuration loaded: generic definition '{}', debounce {}ms",
        config.resolution.generic_definition_id, config.rebuild.debounce_ms
    );

    let store = Arc::new(InMemoryStore::new());
    let notifier = Arc::new(Notifier::new());
    let quality_manager = Arc::new(QualityManager::new(
        store.clone(),
        store.subscribe_changes(),
        notifier.clone(),
        &config,
    ));
    let machine_manager = MachineManager::new(
        store.clone(),
        quality_manager.clone(),
        Arc::new(seed::seed_material_lookup()),
        Arc::new(seed::seed_variant_lookup()),
        notifier.clone(),
        config.resolution.preferred_quality_type.clone(),
    );

    println!("Loading seed catalog...");
    seed::load_seed_data(&*store).await?;
    quality_manager.rebuild().await?;

    machine_manager
        .set_active_machine(&seed::SEED_MACHINE_ID.to_string())
        .await?;

    let groups = machine_manager.quality_groups().await?;
    let mut quality_types: Vec<_> = groups.keys().collect();
    quality_types.sort();
    println!("Resolved quality groups for '{}':", seed::SEED_MACHINE_ID);
    for quality_type in quality_types {
        let group = &groups[quality_type];
        println!(
            "  {:<8} name={:<8} available={} extruder_bindings={}",
            quality_type,
            group.name,
            group.is_available,
            group.nodes_for_extruders.len()
        );
    }

    let active = machine_manager.active_state();
    match active.quality_group {
        Some(group) => println!("Active quality: {} ({})", group.name, group.quality_type),
        None => println!("Active quality: not supported"),
    }

    for batch in notifier.take_batches() {
        log::info!("notification batch: {:?}", batch);
    }

    Ok(())
}
