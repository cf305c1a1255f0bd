use serde::{Deserialize, Serialize};

pub type Id = String;

/// The role a container plays inside an override stack. Fixed at creation,
/// never changes afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerType {
    Definition,
    DefinitionChanges,
    Variant,
    Material,
    Quality,
    QualityChanges,
    User,
}

impl ContainerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerType::Definition => "definition",
            ContainerType::DefinitionChanges => "definition_changes",
            ContainerType::Variant => "variant",
            ContainerType::Material => "material",
            ContainerType::Quality => "quality",
            ContainerType::QualityChanges => "quality_changes",
            ContainerType::User => "user",
        }
    }
}

impl std::fmt::Display for ContainerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which swappable hardware component a variant profile describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantType {
    Nozzle,
    BuildPlate,
}

/// How a setting's value is interpreted by the managers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingKind {
    /// A plain value.
    #[default]
    Value,
    /// The value names an extruder position and must stay within the
    /// currently enabled extruder set.
    ExtruderIndex,
}

/// Aggregation evaluated for a global-stack "value" read instead of the raw
/// slot walk, over the raw values of all currently enabled extruders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveFunction {
    MinOverExtruders,
    MaxOverExtruders,
    SumOverExtruders,
    FirstExtruder,
}

/// Per-setting declaration carried by machine definition containers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingDef {
    #[serde(default)]
    pub kind: SettingKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolve: Option<ResolveFunction>,
}
