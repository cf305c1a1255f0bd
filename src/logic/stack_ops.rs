use crate::model::{ContainerStack, GlobalStack, ResolveFunction, StackSlot};
use crate::store::traits::ContainerStore;
use anyhow::Result;
use serde_json::Value;

/// Effective-value resolution over container stacks. Values come from the
/// catalog store; an unknown key resolves to None ("use system default"),
/// never an error.
pub struct StackResolver;

impl StackResolver {
    /// Walk one chain top-down and return the first slot that defines the key.
    pub async fn raw_value<S: ContainerStore>(
        store: &S,
        stack: &ContainerStack,
        key: &str,
    ) -> Result<Option<Value>> {
        for slot in StackSlot::ORDERED {
            if let Some(container) = store.get_container(stack.container_id(slot)).await? {
                if let Some(value) = container.settings.get(key) {
                    return Ok(Some(value.clone()));
                }
            }
        }
        Ok(None)
    }

    /// Effective value for one extruder: the extruder chain first, then the
    /// machine chain as its fallback.
    pub async fn extruder_value<S: ContainerStore>(
        store: &S,
        global: &GlobalStack,
        position: usize,
        key: &str,
    ) -> Result<Option<Value>> {
        if let Some(extruder) = global.extruders.get(&position) {
            if let Some(value) = Self::raw_value(store, &extruder.stack, key).await? {
                return Ok(Some(value));
            }
        }
        Self::raw_value(store, &global.stack, key).await
    }

    /// Effective machine-level value. When the machine definition declares a
    /// resolve function for the key, the aggregation over the enabled
    /// extruders' values replaces the raw slot walk.
    pub async fn global_value<S: ContainerStore>(
        store: &S,
        global: &GlobalStack,
        key: &str,
    ) -> Result<Option<Value>> {
        if let Some(resolve) = Self::resolve_function(store, global, key).await? {
            if let Some(value) = Self::evaluate_resolve(store, global, key, resolve).await? {
                return Ok(Some(value));
            }
        }
        Self::raw_value(store, &global.stack, key).await
    }

    async fn resolve_function<S: ContainerStore>(
        store: &S,
        global: &GlobalStack,
        key: &str,
    ) -> Result<Option<ResolveFunction>> {
        let Some(definition) = store.get_container(&global.stack.definition).await? else {
            return Ok(None);
        };
        Ok(definition.setting_defs.get(key).and_then(|def| def.resolve))
    }

    async fn evaluate_resolve<S: ContainerStore>(
        store: &S,
        global: &GlobalStack,
        key: &str,
        resolve: ResolveFunction,
    ) -> Result<Option<Value>> {
        let mut values = Vec::new();
        for extruder in global.extruders.values().filter(|e| e.enabled) {
            if let Some(value) = Self::extruder_value(store, global, extruder.position, key).await? {
                values.push(value);
            }
        }
        if values.is_empty() {
            return Ok(None);
        }

        let picked = match resolve {
            ResolveFunction::FirstExtruder => values.into_iter().next(),
            ResolveFunction::MinOverExtruders => Self::extreme(values, |a, b| a < b),
            ResolveFunction::MaxOverExtruders => Self::extreme(values, |a, b| a > b),
            ResolveFunction::SumOverExtruders => {
                let sum: f64 = values.iter().filter_map(Value::as_f64).sum();
                serde_json::Number::from_f64(sum).map(Value::Number)
            }
        };
        Ok(picked)
    }

    /// Pick the value whose numeric reading wins the comparison; non-numeric
    /// values are ignored.
    fn extreme(values: Vec<Value>, wins: impl Fn(f64, f64) -> bool) -> Option<Value> {
        let mut best: Option<(f64, Value)> = None;
        for value in values {
            let Some(number) = value.as_f64() else { continue };
            match &best {
                Some((current, _)) if !wins(number, *current) => {}
                _ => best = Some((number, value)),
            }
        }
        best.map(|(_, value)| value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Container, ContainerMetadata, ContainerType, ExtruderStack, SettingDef,
    };
    use crate::store::memory::InMemoryStore;
    use serde_json::json;

    async fn fixture() -> (InMemoryStore, GlobalStack) {
        let store = InMemoryStore::new();

        let mut definition = Container::new(ContainerMetadata::new(
            "ultiplex_2",
            "Ultiplex 2",
            ContainerType::Definition,
        ));
        definition.settings.insert("layer_height".into(), json!(0.2));
        definition
            .settings
            .insert("print_temperature".into(), json!(200));
        definition.setting_defs.insert(
            "print_temperature".into(),
            SettingDef {
                resolve: Some(ResolveFunction::MaxOverExtruders),
                ..Default::default()
            },
        );
        store.add_container(definition).await.unwrap();

        let mut global = GlobalStack::new("machine_1", "Machine 1", "ultiplex_2");
        for position in 0..2 {
            global.extruders.insert(
                position,
                ExtruderStack::new(format!("machine_1_e{position}"), position, "ultiplex_2"),
            );
        }
        (store, global)
    }

    #[tokio::test]
    async fn first_defining_slot_wins() {
        let (store, mut global) = fixture().await;

        let mut user = Container::new(ContainerMetadata::new(
            "machine_1_user",
            "machine_1_user",
            ContainerType::User,
        ));
        user.settings.insert("layer_height".into(), json!(0.1));
        store.add_container(user).await.unwrap();
        global.stack.set_container_id(StackSlot::User, "machine_1_user");

        let value = StackResolver::raw_value(&store, &global.stack, "layer_height")
            .await
            .unwrap();
        assert_eq!(value, Some(json!(0.1)));
    }

    #[tokio::test]
    async fn unknown_keys_resolve_to_none() {
        let (store, global) = fixture().await;
        let value = StackResolver::global_value(&store, &global, "no_such_setting")
            .await
            .unwrap();
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn resolve_function_aggregates_over_enabled_extruders() {
        let (store, mut global) = fixture().await;

        for (position, temperature) in [(0usize, 210), (1usize, 240)] {
            let id = format!("mat_user_e{position}");
            let mut material = Container::new(ContainerMetadata::new(
                id.clone(),
                id.clone(),
                ContainerType::Material,
            ));
            material
                .settings
                .insert("print_temperature".into(), json!(temperature));
            store.add_container(material).await.unwrap();
            global
                .extruders
                .get_mut(&position)
                .unwrap()
                .stack
                .set_container_id(StackSlot::Material, id);
        }

        let value = StackResolver::global_value(&store, &global, "print_temperature")
            .await
            .unwrap();
        assert_eq!(value, Some(json!(240)));

        // Disabling the hotter extruder changes the aggregate
        global.extruders.get_mut(&1).unwrap().enabled = false;
        let value = StackResolver::global_value(&store, &global, "print_temperature")
            .await
            .unwrap();
        assert_eq!(value, Some(json!(210)));
    }
}
