use crate::model::{
    ContainerMetadata, ContainerType, Id, QualityLeaf, QualityTree, SpecificityKey,
};
use log::warn;
use serde::{Deserialize, Serialize};

/// Why a catalog record was skipped during a tree rebuild. The build always
/// continues; these surface on the diagnostics channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogDiagnostic {
    pub container_id: Id,
    pub kind: CatalogDiagnosticKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CatalogDiagnosticKind {
    /// Flagged global but also carries nozzle/buildplate/material scope.
    GlobalWithScope,
    MissingDefinition,
    MissingQualityType,
}

/// Builds the quality lookup tree from the full container-metadata catalog.
/// Always a full rebuild: cheap, and there is never a half-updated tree to
/// reason about.
pub struct QualityTreeBuilder;

impl QualityTreeBuilder {
    pub fn build(metadata: &[ContainerMetadata]) -> (QualityTree, Vec<CatalogDiagnostic>) {
        let mut tree = QualityTree::default();
        let mut diagnostics = Vec::new();

        for meta in metadata {
            let result = match meta.container_type {
                ContainerType::Quality => Self::insert_quality(&mut tree, meta),
                ContainerType::QualityChanges => Self::insert_quality_changes(&mut tree, meta),
                _ => Ok(()),
            };
            if let Err(diagnostic) = result {
                warn!(
                    "skipping catalog record '{}': {}",
                    diagnostic.container_id, diagnostic.message
                );
                diagnostics.push(diagnostic);
            }
        }

        (tree, diagnostics)
    }

    fn insert_quality(
        tree: &mut QualityTree,
        meta: &ContainerMetadata,
    ) -> Result<(), CatalogDiagnostic> {
        let definition = Self::required_definition(meta)?;
        let quality_type = Self::required_quality_type(meta)?;

        // A record flagged global must not also carry scope identity.
        if meta.global_quality == Some(true) && meta.has_scope() {
            return Err(CatalogDiagnostic {
                container_id: meta.id.clone(),
                kind: CatalogDiagnosticKind::GlobalWithScope,
                message: format!(
                    "quality '{}' is flagged global but scoped to variant={:?} buildplate={:?} material={:?}",
                    meta.id, meta.variant, meta.buildplate, meta.material
                ),
            });
        }

        let is_global = meta.global_quality.unwrap_or(!meta.has_scope()) && !meta.has_scope();
        let machine = tree.machine_or_insert(definition);
        let leaf = QualityLeaf::from_metadata(meta, &quality_type);

        if is_global {
            machine.global_qualities.insert(quality_type, leaf);
        } else {
            // Descend only the scope levels the record actually names, in
            // fixed nozzle -> buildplate -> material order.
            let mut node = &mut machine.scoped;
            if let Some(variant) = &meta.variant {
                node = node.child_or_insert(SpecificityKey::Nozzle(variant.clone()));
            }
            if let Some(buildplate) = &meta.buildplate {
                node = node.child_or_insert(SpecificityKey::Buildplate(buildplate.clone()));
            }
            if let Some(material) = &meta.material {
                node = node.child_or_insert(SpecificityKey::Material(material.clone()));
            }
            node.qualities.insert(quality_type, leaf);
        }
        Ok(())
    }

    fn insert_quality_changes(
        tree: &mut QualityTree,
        meta: &ContainerMetadata,
    ) -> Result<(), CatalogDiagnostic> {
        let definition = Self::required_definition(meta)?;
        let quality_type = Self::required_quality_type(meta)?;

        let machine = tree.machine_or_insert(definition);
        let leaf = machine
            .quality_changes
            .entry(quality_type.clone())
            .or_default()
            .entry(meta.name.clone())
            .or_default();
        leaf.name = meta.name.clone();
        leaf.quality_type = quality_type;
        match meta.position {
            Some(position) => {
                leaf.extruders.insert(position, meta.id.clone());
            }
            None => leaf.global = Some(meta.id.clone()),
        }
        Ok(())
    }

    fn required_definition(meta: &ContainerMetadata) -> Result<Id, CatalogDiagnostic> {
        meta.definition.clone().ok_or_else(|| CatalogDiagnostic {
            container_id: meta.id.clone(),
            kind: CatalogDiagnosticKind::MissingDefinition,
            message: format!("'{}' names no machine definition", meta.id),
        })
    }

    fn required_quality_type(meta: &ContainerMetadata) -> Result<String, CatalogDiagnostic> {
        meta.quality_type.clone().ok_or_else(|| CatalogDiagnostic {
            container_id: meta.id.clone(),
            kind: CatalogDiagnosticKind::MissingQualityType,
            message: format!("'{}' names no quality_type", meta.id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ContainerType;

    fn quality_meta(id: &str, quality_type: &str) -> ContainerMetadata {
        let mut meta = ContainerMetadata::new(id, id, ContainerType::Quality);
        meta.definition = Some("ultiplex_2".to_string());
        meta.quality_type = Some(quality_type.to_string());
        meta
    }

    #[test]
    fn unscoped_records_land_on_the_machine_root_as_global() {
        let (tree, diagnostics) = QualityTreeBuilder::build(&[quality_meta("q_draft", "draft")]);
        assert!(diagnostics.is_empty());
        let machine = tree.machine(&"ultiplex_2".to_string()).unwrap();
        assert!(machine.global_qualities.contains_key("draft"));
        assert!(machine.scoped.is_empty());
    }

    #[test]
    fn scoped_records_descend_in_fixed_order() {
        let mut meta = quality_meta("q_fine_pla", "fine");
        meta.variant = Some("0.4mm".to_string());
        meta.material = Some("generic_pla".to_string());

        let (tree, _) = QualityTreeBuilder::build(&[meta]);
        let machine = tree.machine(&"ultiplex_2".to_string()).unwrap();
        let nozzle = machine
            .scoped
            .child(&SpecificityKey::Nozzle("0.4mm".to_string()))
            .unwrap();
        // No buildplate named, so material hangs directly off the nozzle node
        let material = nozzle
            .child(&SpecificityKey::Material("generic_pla".to_string()))
            .unwrap();
        assert!(material.qualities.contains_key("fine"));
        assert!(nozzle.qualities.is_empty());
    }

    #[test]
    fn identical_scope_tuples_compose_at_one_leaf() {
        let mut fine = quality_meta("q_fine", "fine");
        fine.variant = Some("0.4mm".to_string());
        let mut normal = quality_meta("q_normal", "normal");
        normal.variant = Some("0.4mm".to_string());

        let (tree, _) = QualityTreeBuilder::build(&[fine, normal]);
        let machine = tree.machine(&"ultiplex_2".to_string()).unwrap();
        let nozzle = machine
            .scoped
            .child(&SpecificityKey::Nozzle("0.4mm".to_string()))
            .unwrap();
        assert_eq!(nozzle.qualities.len(), 2);
    }

    #[test]
    fn global_flag_with_scope_is_rejected_and_reported() {
        let mut meta = quality_meta("q_bad", "fine");
        meta.global_quality = Some(true);
        meta.material = Some("generic_pla".to_string());

        let (tree, diagnostics) = QualityTreeBuilder::build(&[meta, quality_meta("q_ok", "draft")]);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].container_id, "q_bad");
        assert_eq!(diagnostics[0].kind, CatalogDiagnosticKind::GlobalWithScope);
        // Build continues past the bad record
        assert!(tree
            .machine(&"ultiplex_2".to_string())
            .unwrap()
            .global_qualities
            .contains_key("draft"));
    }

    #[test]
    fn explicitly_non_global_unscoped_record_is_extruder_scoped() {
        let mut meta = quality_meta("q_machine_fine", "fine");
        meta.global_quality = Some(false);

        let (tree, _) = QualityTreeBuilder::build(&[meta]);
        let machine = tree.machine(&"ultiplex_2".to_string()).unwrap();
        assert!(machine.has_extruder_scoped_qualities());
        assert!(machine.global_qualities.is_empty());
    }

    #[test]
    fn quality_changes_build_the_parallel_name_tree() {
        let mut global = ContainerMetadata::new("qc_g", "My Profile", ContainerType::QualityChanges);
        global.definition = Some("ultiplex_2".to_string());
        global.quality_type = Some("fine".to_string());
        let mut per_extruder = global.clone();
        per_extruder.id = "qc_e0".to_string();
        per_extruder.position = Some(0);

        let (tree, diagnostics) = QualityTreeBuilder::build(&[global, per_extruder]);
        assert!(diagnostics.is_empty());
        let machine = tree.machine(&"ultiplex_2".to_string()).unwrap();
        let leaf = &machine.quality_changes["fine"]["My Profile"];
        assert_eq!(leaf.global.as_deref(), Some("qc_g"));
        assert_eq!(leaf.extruders[&0], "qc_e0");
    }
}
