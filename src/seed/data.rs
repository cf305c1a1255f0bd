use crate::model::{
    Container, ContainerMetadata, ContainerType, ExtruderStack, GlobalStack, ResolveFunction,
    SettingDef, SettingKind, StackSlot, VariantType,
};
use crate::store::memory::{StaticMaterialLookup, StaticVariantLookup};
use crate::store::traits::ContainerStore;
use anyhow::Result;
use serde_json::json;

pub const SEED_MACHINE_ID: &str = "ultiplex_2_1";
pub const SEED_DEFINITION_ID: &str = "ultiplex_2";

/// Helper to build a quality container with its scope metadata.
fn quality(
    id: &str,
    name: &str,
    quality_type: &str,
    variant: Option<&str>,
    material: Option<&str>,
) -> Container {
    let mut meta = ContainerMetadata::new(id, name, ContainerType::Quality);
    meta.definition = Some(SEED_DEFINITION_ID.to_string());
    meta.quality_type = Some(quality_type.to_string());
    meta.variant = variant.map(str::to_string);
    meta.material = material.map(str::to_string);
    Container::new(meta)
}

fn variant(id: &str, name: &str) -> Container {
    let mut meta = ContainerMetadata::new(id, name, ContainerType::Variant);
    meta.definition = Some(SEED_DEFINITION_ID.to_string());
    Container::new(meta)
}

fn material(id: &str, name: &str) -> Container {
    let meta = ContainerMetadata::new(id, name, ContainerType::Material);
    Container::new(meta)
}

fn user_container(id: &str) -> Container {
    Container::new(ContainerMetadata::new(id, id, ContainerType::User))
}

/// Load a demonstration catalog: a two-extruder machine with nozzle- and
/// material-scoped qualities, mirroring the configurations the resolution
/// rules are specified against.
pub async fn load_seed_data<S: ContainerStore>(store: &S) -> Result<()> {
    // Machine definition with resolve-function and extruder-index settings
    let mut definition = Container::new(ContainerMetadata::new(
        SEED_DEFINITION_ID,
        "Ultiplex 2",
        ContainerType::Definition,
    ));
    definition.settings.insert("layer_height".into(), json!(0.2));
    definition
        .settings
        .insert("print_temperature".into(), json!(200));
    definition
        .settings
        .insert("support_extruder_nr".into(), json!(0));
    definition.setting_defs.insert(
        "print_temperature".into(),
        SettingDef {
            kind: SettingKind::Value,
            resolve: Some(ResolveFunction::MaxOverExtruders),
        },
    );
    definition.setting_defs.insert(
        "support_extruder_nr".into(),
        SettingDef {
            kind: SettingKind::ExtruderIndex,
            resolve: None,
        },
    );
    store.add_container(definition).await?;

    for container in [
        variant("ultiplex_0.4", "0.4mm"),
        variant("ultiplex_0.6", "0.6mm"),
        material("generic_pla", "Generic PLA"),
        material("generic_abs", "Generic ABS"),
        material("brandx_pla_plus", "BrandX PLA+"),
    ] {
        store.add_container(container).await?;
    }

    for container in [
        quality("q_draft", "Draft", "draft", None, None),
        quality("q_normal", "Normal", "normal", None, None),
        quality("q_fine_04_pla", "Fine", "fine", Some("0.4mm"), Some("generic_pla")),
        quality("q_normal_04", "Normal", "normal", Some("0.4mm"), None),
    ] {
        store.add_container(container).await?;
    }

    // The machine itself: two extruders, 0.4mm nozzles, PLA loaded
    let mut machine = GlobalStack::new(SEED_MACHINE_ID, "Ultiplex #1", SEED_DEFINITION_ID);
    machine.has_machine_quality = true;
    let global_user_id = format!("{SEED_MACHINE_ID}_user");
    store.add_container(user_container(&global_user_id)).await?;
    machine.stack.set_container_id(StackSlot::User, global_user_id);

    for position in 0..2usize {
        let mut extruder = ExtruderStack::new(
            format!("{SEED_MACHINE_ID}_e{position}"),
            position,
            SEED_DEFINITION_ID,
        );
        let user_id = format!("{SEED_MACHINE_ID}_e{position}_user");
        store.add_container(user_container(&user_id)).await?;
        extruder.stack.set_container_id(StackSlot::User, user_id);
        extruder.stack.set_container_id(StackSlot::Variant, "ultiplex_0.4");
        extruder.stack.set_container_id(StackSlot::Material, "generic_pla");
        machine.extruders.insert(position, extruder);
    }
    store.upsert_machine_stack(machine).await?;

    Ok(())
}

/// Material collaborator matching the seed catalog.
pub fn seed_material_lookup() -> StaticMaterialLookup {
    let mut lookup = StaticMaterialLookup::default();
    lookup.fallbacks.insert(
        "brandx_pla_plus".to_string(),
        vec!["generic_pla".to_string()],
    );
    lookup.defaults.insert(
        (SEED_DEFINITION_ID.to_string(), Some("0.4mm".to_string())),
        "generic_pla".to_string(),
    );
    lookup.defaults.insert(
        (SEED_DEFINITION_ID.to_string(), Some("0.6mm".to_string())),
        "generic_abs".to_string(),
    );
    // The 0.6mm nozzle only takes ABS; everything runs through 0.4mm
    lookup.compatibility.insert(
        (SEED_DEFINITION_ID.to_string(), Some("0.6mm".to_string())),
        vec!["generic_abs".to_string()],
    );
    lookup
}

/// Variant collaborator matching the seed catalog.
pub fn seed_variant_lookup() -> StaticVariantLookup {
    let mut lookup = StaticVariantLookup::default();
    lookup.defaults.insert(
        (SEED_DEFINITION_ID.to_string(), VariantType::Nozzle),
        "0.4mm".to_string(),
    );
    lookup
}
