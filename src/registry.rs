//! Titles known to the engine and the console variables derived from them.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::console::VariableDefinition;

/// One editable field of a title.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TitleVariable {
    pub name: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Title {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub variables: Vec<TitleVariable>,
}

/// Current value of a title variable, keyed by variable id in the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct VarData {
    pub title: String,
    pub varname: String,
    pub value: Value,
}

#[derive(Debug, Default)]
pub struct TitleRegistry {
    titles_by_name: HashMap<String, Title>,
    titles_by_id: HashMap<String, Title>,
    var_data: BTreeMap<String, VarData>,
}

impl TitleRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `getTitles` reply: either an array of titles or `{titles: [...]}`.
    pub fn parse_titles(reply: Value) -> Result<Vec<Title>, serde_json::Error> {
        let list = match reply {
            Value::Object(mut map) => map.remove("titles").unwrap_or(Value::Array(Vec::new())),
            Value::Null => Value::Array(Vec::new()),
            other => other,
        };
        serde_json::from_value(list)
    }

    /// Replace the whole registry.
    pub fn replace_titles(&mut self, titles: Vec<Title>) {
        self.titles_by_name.clear();
        self.titles_by_id.clear();
        self.var_data.clear();

        for title in titles {
            for var in &title.variables {
                self.var_data.insert(
                    variable_id(&title.name, &var.name),
                    VarData {
                        title: title.name.clone(),
                        varname: var.name.clone(),
                        value: var.value.clone(),
                    },
                );
            }
            self.titles_by_name.insert(title.name.clone(), title.clone());
            self.titles_by_id.insert(title.id.clone(), title);
        }
        debug!(
            titles = self.titles_by_id.len(),
            variables = self.var_data.len(),
            "title registry rebuilt"
        );
    }

    #[must_use]
    pub fn title_by_id(&self, id: &str) -> Option<&Title> {
        self.titles_by_id.get(id)
    }

    #[must_use]
    pub fn title_by_name(&self, name: &str) -> Option<&Title> {
        self.titles_by_name.get(name)
    }

    #[must_use]
    pub fn definitions(&self) -> Vec<VariableDefinition> {
        self.var_data
            .iter()
            .map(|(variable_id, data)| VariableDefinition {
                variable_id: variable_id.clone(),
                name: format!("{} {}", data.title, data.varname),
            })
            .collect()
    }

    #[must_use]
    pub fn values(&self) -> Map<String, Value> {
        self.var_data
            .iter()
            .map(|(id, data)| (id.clone(), data.value.clone()))
            .collect()
    }

    #[must_use]
    pub fn var_data(&self, variable_id: &str) -> Option<&VarData> {
        self.var_data.get(variable_id)
    }

    /// Apply a `data` notification and return the changed values.
    ///
    /// Unknown titles and variables are ignored.
    pub fn apply_data_event(&mut self, title_id: &str, variables: &Value) -> Map<String, Value> {
        let mut changed = Map::new();
        let Some(title_name) = self.titles_by_id.get(title_id).map(|t| t.name.clone()) else {
            debug!(title_id, "data event for unknown title");
            return changed;
        };

        for (name, value) in data_pairs(variables) {
            let id = variable_id(&title_name, &name);
            match self.var_data.get_mut(&id) {
                Some(data) => {
                    data.value = value.clone();
                    changed.insert(id, value);
                }
                None => debug!(title = %title_name, variable = %name, "data event for unknown variable"),
            }
        }
        changed
    }
}

/// Accepts `[{name, value}]` or `{name: value}`.
fn data_pairs(variables: &Value) -> Vec<(String, Value)> {
    match variables {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| {
                let name = item.get("name")?.as_str()?.to_owned();
                let value = item.get("value").cloned().unwrap_or(Value::Null);
                Some((name, value))
            })
            .collect(),
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        _ => Vec::new(),
    }
}

/// Console-safe variable id for `title`'s `varname`.
#[must_use]
pub fn variable_id(title: &str, varname: &str) -> String {
    format!("{title}_{varname}")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
