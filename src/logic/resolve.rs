use crate::model::{
    ExtruderConfig, Id, MachineNode, MachineState, QualityChangesGroup, QualityGroup, QualityLeaf,
    QualityNode, QualityTree, SpecificityKey,
};
use itertools::Itertools;
use std::collections::HashMap;

/// Resolves quality and quality-changes groups for one machine configuration
/// against the current lookup tree. Pure: fixed tree + fixed machine state
/// always produce the same mapping.
pub struct QualityResolver;

impl QualityResolver {
    /// Quality-group resolution: seed from global qualities, then walk the
    /// per-extruder specificity chain most-specific first, then compute
    /// availability over the enabled extruders.
    pub fn quality_groups(
        tree: &QualityTree,
        machine: &MachineState,
        generic_fallback: &Id,
    ) -> HashMap<String, QualityGroup> {
        let search_id = machine.quality_search_id(generic_fallback);
        let machine_node = tree.machine(search_id);
        let generic_node = tree.machine(generic_fallback);

        let mut groups: HashMap<String, QualityGroup> = HashMap::new();

        // Global qualities: prefer the machine's own, fall back to the
        // generic node's only when the machine has none. Never mix.
        if let Some(globals) = Self::global_entries(machine_node, generic_node) {
            for (quality_type, leaf) in globals {
                let mut group = QualityGroup::new(leaf.name.clone(), quality_type.clone());
                group.node_for_global = Some(leaf.clone());
                groups.insert(quality_type.clone(), group);
            }
        }

        // Per-extruder walk. Bindings are computed for every extruder;
        // enablement only matters for availability.
        for extruder in &machine.extruders {
            let mut nodes: Vec<&QualityNode> = Vec::new();
            if let Some(node) = machine_node {
                Self::collect_search_nodes(&node.scoped, machine, extruder, &mut nodes);
            }
            for node in nodes {
                Self::bind_entries(&mut groups, extruder.position, &node.qualities);
            }
            // Weakest fallback: the machine root itself. Machines with
            // extruder-scoped qualities never fall back to global entries
            // here, even though globals still seeded node_for_global above.
            if let Some(fallback) = Self::root_fallback_entries(machine_node, generic_node) {
                Self::bind_entries(&mut groups, extruder.position, fallback);
            }
        }

        Self::update_availability(&mut groups, machine);
        groups
    }

    /// Quality-changes resolution: one group per profile name, availability
    /// inherited from the quality group sharing its quality_type. Profiles
    /// sharing a name across quality types are keyed with the quality type
    /// appended, so none of them shadows another.
    pub fn quality_changes_groups(
        tree: &QualityTree,
        machine: &MachineState,
        generic_fallback: &Id,
    ) -> HashMap<String, QualityChangesGroup> {
        let quality_groups = Self::quality_groups(tree, machine, generic_fallback);
        let search_id = machine.quality_search_id(generic_fallback);

        let mut groups = HashMap::new();
        let Some(machine_node) = tree.machine(search_id) else {
            return groups;
        };

        let mut name_counts: HashMap<&String, usize> = HashMap::new();
        for by_name in machine_node.quality_changes.values() {
            for name in by_name.keys() {
                *name_counts.entry(name).or_insert(0) += 1;
            }
        }

        for (quality_type, by_name) in &machine_node.quality_changes {
            let is_available = quality_groups
                .get(quality_type)
                .map(|g| g.is_available)
                .unwrap_or(false);
            for (name, leaf) in by_name {
                let key = if name_counts[name] > 1 {
                    format!("{} ({})", name, quality_type)
                } else {
                    name.clone()
                };
                groups.insert(
                    key,
                    QualityChangesGroup {
                        name: name.clone(),
                        quality_type: quality_type.clone(),
                        node_for_global: leaf.global.clone(),
                        nodes_for_extruders: leaf.extruders.clone(),
                        is_available,
                    },
                );
            }
        }
        groups
    }

    /// Recursive specificity descent: nozzle, then buildplate, then the
    /// material candidate list. Deeper nodes are appended before their
    /// parents, so the resulting list is most-specific first.
    fn collect_search_nodes<'t>(
        node: &'t QualityNode,
        machine: &MachineState,
        extruder: &ExtruderConfig,
        out: &mut Vec<&'t QualityNode>,
    ) {
        // An extruder with no material loaded never descends; only the
        // machine-root fallback applies to it.
        if extruder.material_id.is_none() {
            return;
        }
        if let Some(variant_name) = &extruder.variant_name {
            if let Some(child) = node.child(&SpecificityKey::Nozzle(variant_name.clone())) {
                Self::collect_search_nodes(child, machine, extruder, out);
                out.push(child);
            }
        }
        if let Some(buildplate) = &machine.buildplate_name {
            if let Some(child) = node.child(&SpecificityKey::Buildplate(buildplate.clone())) {
                Self::collect_search_nodes(child, machine, extruder, out);
                out.push(child);
            }
        }
        for material_id in Self::material_candidates(extruder) {
            if let Some(child) = node.child(&SpecificityKey::Material(material_id)) {
                out.push(child);
            }
        }
    }

    /// Root material id plus fallbacks, deduplicated, order preserved. Empty
    /// when the extruder has no material assigned.
    fn material_candidates(extruder: &ExtruderConfig) -> Vec<Id> {
        let Some(material_id) = &extruder.material_id else {
            return Vec::new();
        };
        std::iter::once(material_id.clone())
            .chain(extruder.fallback_material_ids.iter().cloned())
            .unique()
            .collect()
    }

    fn global_entries<'t>(
        machine_node: Option<&'t MachineNode>,
        generic_node: Option<&'t MachineNode>,
    ) -> Option<&'t HashMap<String, QualityLeaf>> {
        match machine_node {
            Some(node) if !node.global_qualities.is_empty() => Some(&node.global_qualities),
            _ => generic_node.map(|node| &node.global_qualities),
        }
    }

    /// The entries the machine root contributes to per-extruder binding.
    /// Machines with root-level extruder-scoped qualities use exactly those;
    /// everyone else falls back to the global entries.
    fn root_fallback_entries<'t>(
        machine_node: Option<&'t MachineNode>,
        generic_node: Option<&'t MachineNode>,
    ) -> Option<&'t HashMap<String, QualityLeaf>> {
        if let Some(node) = machine_node {
            if node.has_extruder_scoped_qualities() {
                return Some(&node.scoped.qualities);
            }
            if !node.global_qualities.is_empty() {
                return Some(&node.global_qualities);
            }
        }
        generic_node.map(|node| &node.global_qualities)
    }

    /// First match wins, per quality_type, per extruder. Groups created here
    /// (scoped-only quality types) seed node_for_global from the creating
    /// leaf so they stay selectable.
    fn bind_entries(
        groups: &mut HashMap<String, QualityGroup>,
        position: usize,
        entries: &HashMap<String, QualityLeaf>,
    ) {
        for (quality_type, leaf) in entries {
            let group = groups.entry(quality_type.clone()).or_insert_with(|| {
                let mut group = QualityGroup::new(leaf.name.clone(), quality_type.clone());
                group.node_for_global = Some(leaf.clone());
                group
            });
            group
                .nodes_for_extruders
                .entry(position)
                .or_insert_with(|| leaf.clone());
        }
    }

    fn update_availability(groups: &mut HashMap<String, QualityGroup>, machine: &MachineState) {
        let enabled = machine.enabled_positions();
        for group in groups.values_mut() {
            group.is_available = group.node_for_global.is_some()
                && enabled
                    .iter()
                    .all(|position| group.nodes_for_extruders.contains_key(position));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::tree::QualityTreeBuilder;
    use crate::model::{ContainerMetadata, ContainerType};

    fn quality_meta(
        id: &str,
        quality_type: &str,
        variant: Option<&str>,
        material: Option<&str>,
    ) -> ContainerMetadata {
        let mut meta = ContainerMetadata::new(id, id, ContainerType::Quality);
        meta.definition = Some("x".to_string());
        meta.quality_type = Some(quality_type.to_string());
        meta.variant = variant.map(str::to_string);
        meta.material = material.map(str::to_string);
        meta
    }

    fn machine(extruders: Vec<ExtruderConfig>) -> MachineState {
        MachineState {
            definition_id: "x".to_string(),
            has_machine_quality: true,
            quality_definition: None,
            buildplate_name: None,
            extruders,
        }
    }

    fn extruder(position: usize, variant: Option<&str>, material: Option<&str>) -> ExtruderConfig {
        ExtruderConfig {
            position,
            enabled: true,
            variant_name: variant.map(str::to_string),
            material_id: material.map(str::to_string),
            fallback_material_ids: Vec::new(),
        }
    }

    fn scenario_tree() -> QualityTree {
        // One global "draft" for definition x, one scoped "fine" for
        // (x, nozzle 0.4mm, material generic_pla)
        let (tree, diagnostics) = QualityTreeBuilder::build(&[
            quality_meta("q_draft", "draft", None, None),
            quality_meta("q_fine", "fine", Some("0.4mm"), Some("generic_pla")),
        ]);
        assert!(diagnostics.is_empty());
        tree
    }

    #[test]
    fn global_and_scoped_qualities_are_both_available() {
        let tree = scenario_tree();
        let machine = machine(vec![extruder(0, Some("0.4mm"), Some("generic_pla"))]);
        let fallback = "fdmprinter".to_string();

        let groups = QualityResolver::quality_groups(&tree, &machine, &fallback);
        assert_eq!(groups.len(), 2);
        assert!(groups["draft"].is_available);
        assert!(groups["fine"].is_available);
        // "fine" binds the scoped leaf, "draft" the machine-root global one
        assert_eq!(groups["fine"].nodes_for_extruders[&0].container_id, "q_fine");
        assert_eq!(groups["draft"].nodes_for_extruders[&0].container_id, "q_draft");
    }

    #[test]
    fn switching_material_away_drops_the_scoped_quality() {
        let tree = scenario_tree();
        let machine = machine(vec![extruder(0, Some("0.4mm"), Some("generic_abs"))]);
        let fallback = "fdmprinter".to_string();

        let groups = QualityResolver::quality_groups(&tree, &machine, &fallback);
        assert!(groups["draft"].is_available);
        assert!(!groups.contains_key("fine"));
    }

    #[test]
    fn most_specific_node_wins_over_less_specific_ones() {
        let (tree, _) = QualityTreeBuilder::build(&[
            quality_meta("q_fine_global", "fine", None, None),
            quality_meta("q_fine_nozzle", "fine", Some("0.4mm"), None),
            quality_meta("q_fine_nozzle_mat", "fine", Some("0.4mm"), Some("generic_pla")),
        ]);
        let machine = machine(vec![extruder(0, Some("0.4mm"), Some("generic_pla"))]);
        let fallback = "fdmprinter".to_string();

        let groups = QualityResolver::quality_groups(&tree, &machine, &fallback);
        assert_eq!(
            groups["fine"].nodes_for_extruders[&0].container_id,
            "q_fine_nozzle_mat"
        );
    }

    #[test]
    fn fallback_material_ids_are_tried_in_order() {
        let (tree, _) = QualityTreeBuilder::build(&[quality_meta(
            "q_fine_pla",
            "fine",
            Some("0.4mm"),
            Some("generic_pla"),
        )]);
        let mut ext = extruder(0, Some("0.4mm"), Some("brandx_pla_plus"));
        ext.fallback_material_ids =
            vec!["generic_pla".to_string(), "generic_pla".to_string()];
        let machine = machine(vec![ext]);
        let fallback = "fdmprinter".to_string();

        let groups = QualityResolver::quality_groups(&tree, &machine, &fallback);
        assert_eq!(groups["fine"].nodes_for_extruders[&0].container_id, "q_fine_pla");
    }

    #[test]
    fn disabled_extruders_are_excluded_from_availability() {
        let (tree, _) = QualityTreeBuilder::build(&[quality_meta(
            "q_fine_pla",
            "fine",
            Some("0.4mm"),
            Some("generic_pla"),
        )]);
        let mut ext1 = extruder(1, Some("0.8mm"), Some("generic_abs"));
        ext1.enabled = false;
        let mut state = machine(vec![extruder(0, Some("0.4mm"), Some("generic_pla")), ext1]);
        let fallback = "fdmprinter".to_string();

        let groups = QualityResolver::quality_groups(&tree, &state, &fallback);
        assert!(groups["fine"].is_available);

        // Re-enabling the extruder without a matching node flips it false
        state.extruders[1].enabled = true;
        let groups = QualityResolver::quality_groups(&tree, &state, &fallback);
        assert!(!groups["fine"].is_available);
    }

    #[test]
    fn extruder_scoped_machines_never_bind_global_entries_per_extruder() {
        let mut machine_scoped = quality_meta("q_fine_e", "fine", None, None);
        machine_scoped.global_quality = Some(false);
        let (tree, _) = QualityTreeBuilder::build(&[
            quality_meta("q_draft_g", "draft", None, None),
            machine_scoped,
        ]);
        let state = machine(vec![extruder(0, None, None)]);
        let fallback = "fdmprinter".to_string();

        let groups = QualityResolver::quality_groups(&tree, &state, &fallback);
        // "draft" keeps its global node but gets no extruder binding
        assert!(groups["draft"].node_for_global.is_some());
        assert!(groups["draft"].nodes_for_extruders.is_empty());
        assert!(!groups["draft"].is_available);
        // the extruder-scoped entry binds normally
        assert!(groups["fine"].is_available);
        assert_eq!(groups["fine"].nodes_for_extruders[&0].container_id, "q_fine_e");
    }

    #[test]
    fn machines_without_own_globals_fall_back_to_the_generic_node() {
        let mut generic_draft = quality_meta("q_generic_draft", "draft", None, None);
        generic_draft.definition = Some("fdmprinter".to_string());
        let (tree, _) = QualityTreeBuilder::build(&[generic_draft]);

        let mut state = machine(vec![extruder(0, None, None)]);
        state.has_machine_quality = false;
        let fallback = "fdmprinter".to_string();

        let groups = QualityResolver::quality_groups(&tree, &state, &fallback);
        assert!(groups["draft"].is_available);
        assert_eq!(
            groups["draft"].nodes_for_extruders[&0].container_id,
            "q_generic_draft"
        );
    }

    #[test]
    fn resolution_is_deterministic_across_calls() {
        let tree = scenario_tree();
        let machine = machine(vec![
            extruder(0, Some("0.4mm"), Some("generic_pla")),
            extruder(1, Some("0.4mm"), Some("generic_abs")),
        ]);
        let fallback = "fdmprinter".to_string();

        let first = QualityResolver::quality_groups(&tree, &machine, &fallback);
        for _ in 0..10 {
            assert_eq!(QualityResolver::quality_groups(&tree, &machine, &fallback), first);
        }
    }

    #[test]
    fn changes_groups_inherit_availability_from_their_base_type() {
        let mut qc = ContainerMetadata::new("qc_mine", "Mine", ContainerType::QualityChanges);
        qc.definition = Some("x".to_string());
        qc.quality_type = Some("fine".to_string());
        let mut qc_e0 = qc.clone();
        qc_e0.id = "qc_mine_e0".to_string();
        qc_e0.position = Some(0);

        let records = vec![
            quality_meta("q_fine", "fine", Some("0.4mm"), Some("generic_pla")),
            qc,
            qc_e0,
        ];
        let (tree, _) = QualityTreeBuilder::build(&records);
        let fallback = "fdmprinter".to_string();

        let available = machine(vec![extruder(0, Some("0.4mm"), Some("generic_pla"))]);
        let groups = QualityResolver::quality_changes_groups(&tree, &available, &fallback);
        assert!(groups["Mine"].is_available);
        assert_eq!(groups["Mine"].quality_type, "fine");

        let unavailable = machine(vec![extruder(0, Some("0.4mm"), Some("generic_abs"))]);
        let groups = QualityResolver::quality_changes_groups(&tree, &unavailable, &fallback);
        assert!(!groups["Mine"].is_available);
    }

    #[test]
    fn extruders_without_a_material_skip_the_specificity_descent() {
        let (tree, _) = QualityTreeBuilder::build(&[
            quality_meta("q_draft", "draft", None, None),
            quality_meta("q_normal", "normal", None, None),
            quality_meta("q_normal_04", "normal", Some("0.4mm"), None),
            quality_meta("q_fine_04", "fine", Some("0.4mm"), None),
        ]);
        let machine = machine(vec![extruder(0, Some("0.4mm"), None)]);
        let fallback = "fdmprinter".to_string();

        let groups = QualityResolver::quality_groups(&tree, &machine, &fallback);
        // The nozzle-scoped-only type never surfaces without a material
        assert!(!groups.contains_key("fine"));
        // "normal" binds its machine-root entry, not the nozzle-scoped one
        assert_eq!(groups["normal"].nodes_for_extruders[&0].container_id, "q_normal");
        assert!(groups["normal"].is_available);
        assert!(groups["draft"].is_available);
    }

    #[test]
    fn same_named_profiles_across_quality_types_both_surface() {
        let mut qc_fine = ContainerMetadata::new("qc_f", "My Profile", ContainerType::QualityChanges);
        qc_fine.definition = Some("x".to_string());
        qc_fine.quality_type = Some("fine".to_string());
        let mut qc_draft = qc_fine.clone();
        qc_draft.id = "qc_d".to_string();
        qc_draft.quality_type = Some("draft".to_string());

        let records = vec![
            quality_meta("q_fine", "fine", None, None),
            quality_meta("q_draft", "draft", None, None),
            qc_fine,
            qc_draft,
        ];
        let (tree, _) = QualityTreeBuilder::build(&records);
        let machine = machine(vec![extruder(0, None, None)]);
        let fallback = "fdmprinter".to_string();

        let groups = QualityResolver::quality_changes_groups(&tree, &machine, &fallback);
        assert_eq!(groups.len(), 2);
        assert_eq!(
            groups["My Profile (fine)"].node_for_global.as_deref(),
            Some("qc_f")
        );
        assert_eq!(
            groups["My Profile (draft)"].node_for_global.as_deref(),
            Some("qc_d")
        );
        // The stored profile name stays unqualified on the group itself
        assert_eq!(groups["My Profile (fine)"].name, "My Profile");
    }

    #[test]
    fn buildplate_scope_outranks_the_nozzle_level() {
        let mut plate = quality_meta("q_fine_plate", "fine", Some("0.4mm"), None);
        plate.buildplate = Some("Glass".to_string());
        let mut full = quality_meta("q_fine_full", "fine", Some("0.4mm"), Some("generic_pla"));
        full.buildplate = Some("Glass".to_string());
        let (tree, _) = QualityTreeBuilder::build(&[
            quality_meta("q_fine_nozzle", "fine", Some("0.4mm"), None),
            plate,
            full,
        ]);
        let mut state = machine(vec![extruder(0, Some("0.4mm"), Some("generic_pla"))]);
        state.buildplate_name = Some("Glass".to_string());
        let fallback = "fdmprinter".to_string();

        let groups = QualityResolver::quality_groups(&tree, &state, &fallback);
        assert_eq!(
            groups["fine"].nodes_for_extruders[&0].container_id,
            "q_fine_full"
        );

        // Without the buildplate only the nozzle level remains reachable
        state.buildplate_name = None;
        let groups = QualityResolver::quality_groups(&tree, &state, &fallback);
        assert_eq!(
            groups["fine"].nodes_for_extruders[&0].container_id,
            "q_fine_nozzle"
        );
    }

    #[test]
    fn quality_definition_override_redirects_the_search() {
        // Qualities live under "x"; the machine reports a derived definition
        // id but points its quality search back at "x"
        let (tree, _) = QualityTreeBuilder::build(&[quality_meta("q_draft", "draft", None, None)]);
        let mut state = machine(vec![extruder(0, None, None)]);
        state.definition_id = "x_at_home".to_string();
        state.quality_definition = Some("x".to_string());
        let fallback = "fdmprinter".to_string();

        let groups = QualityResolver::quality_groups(&tree, &state, &fallback);
        assert!(groups["draft"].is_available);
        assert_eq!(groups["draft"].nodes_for_extruders[&0].container_id, "q_draft");
    }
}
