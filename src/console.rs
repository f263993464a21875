//! Outbound interface to the console hosting the module.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::ModuleConfig;
use crate::engine::QueryKind;

/// Module status shown to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
    Connecting,
    Ok,
    BadConfig,
    Disconnected,
}

/// A console variable exposed for a title field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableDefinition {
    pub variable_id: String,
    pub name: String,
}

/// Definition sets passed through to the console untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionKind {
    Actions,
    Feedbacks,
    Presets,
}

impl DefinitionKind {
    pub const ALL: [Self; 3] = [Self::Actions, Self::Feedbacks, Self::Presets];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Actions => "actions",
            Self::Feedbacks => "feedbacks",
            Self::Presets => "presets",
        }
    }

    #[must_use]
    pub fn query_kind(self) -> QueryKind {
        match self {
            Self::Actions => QueryKind::Actions,
            Self::Feedbacks => QueryKind::Feedbacks,
            Self::Presets => QueryKind::Presets,
        }
    }
}

/// Calls the bridge makes into the console.
pub trait ConsoleSink: Send + Sync + 'static {
    fn set_variable_definitions(&self, definitions: &[VariableDefinition]);
    fn set_variable_values(&self, values: &Map<String, Value>);
    /// Ask the console to re-poll every feedback.
    fn check_feedbacks(&self);
    fn set_status(&self, status: ModuleStatus, message: Option<&str>);
    fn set_definitions(&self, kind: DefinitionKind, definitions: &Value);
    /// Persist an updated module configuration.
    fn save_config(&self, config: &ModuleConfig);
}
