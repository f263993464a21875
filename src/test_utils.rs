//! Shared fakes for unit and integration tests.
//!
//! [`ScriptedEngine`] answers remote calls from per-method scripts and counts
//! them. [`RecordingSink`] records every call the bridge makes into the
//! console.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::config::ModuleConfig;
use crate::console::{ConsoleSink, DefinitionKind, ModuleStatus, VariableDefinition};
use crate::engine::RemoteEngine;
use crate::error::{BridgeError, Result};

type Script = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

/// A [`RemoteEngine`] driven by per-method scripts.
#[derive(Default)]
pub struct ScriptedEngine {
    scripts: HashMap<String, Script>,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
}

impl ScriptedEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer `method` with `reply`.
    #[must_use]
    pub fn on(self, method: &str, reply: Value) -> Self {
        self.on_fn(method, move |_| Ok(reply.clone()))
    }

    /// Answer `method` by running `script` on the call arguments.
    #[must_use]
    pub fn on_fn<F>(mut self, method: &str, script: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.scripts.insert(method.to_owned(), Arc::new(script));
        self
    }

    /// Number of calls made to `method`.
    #[must_use]
    pub fn calls(&self, method: &str) -> usize {
        crate::lock(&self.calls)
            .iter()
            .filter(|(m, _)| m == method)
            .count()
    }

    /// Arguments of every call made to `method`, in order.
    #[must_use]
    pub fn call_args(&self, method: &str) -> Vec<Vec<Value>> {
        crate::lock(&self.calls)
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, args)| args.clone())
            .collect()
    }
}

#[async_trait]
impl RemoteEngine for ScriptedEngine {
    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        crate::lock(&self.calls).push((method.to_owned(), args.clone()));
        match self.scripts.get(method) {
            Some(script) => script(&args),
            None => Err(BridgeError::UnknownMethod(method.to_owned())),
        }
    }
}

/// One recorded console call.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    VariableDefinitions(Vec<VariableDefinition>),
    VariableValues(Map<String, Value>),
    CheckFeedbacks,
    Status(ModuleStatus, Option<String>),
    Definitions(DefinitionKind, Value),
    SaveConfig(ModuleConfig),
}

/// A [`ConsoleSink`] that records calls.
#[derive(Debug, Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<SinkCall>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn calls(&self) -> Vec<SinkCall> {
        crate::lock(&self.calls).clone()
    }

    #[must_use]
    pub fn check_feedbacks_count(&self) -> usize {
        crate::lock(&self.calls)
            .iter()
            .filter(|c| matches!(c, SinkCall::CheckFeedbacks))
            .count()
    }

    #[must_use]
    pub fn last_status(&self) -> Option<ModuleStatus> {
        crate::lock(&self.calls).iter().rev().find_map(|c| match c {
            SinkCall::Status(status, _) => Some(*status),
            _ => None,
        })
    }

    #[must_use]
    pub fn statuses(&self) -> Vec<ModuleStatus> {
        crate::lock(&self.calls)
            .iter()
            .filter_map(|c| match c {
                SinkCall::Status(status, _) => Some(*status),
                _ => None,
            })
            .collect()
    }

    /// Most recent definitions pushed for `kind`.
    #[must_use]
    pub fn definitions(&self, kind: DefinitionKind) -> Option<Value> {
        crate::lock(&self.calls).iter().rev().find_map(|c| match c {
            SinkCall::Definitions(k, value) if *k == kind => Some(value.clone()),
            _ => None,
        })
    }

    /// Every variable value update, in order.
    #[must_use]
    pub fn variable_values(&self) -> Vec<Map<String, Value>> {
        crate::lock(&self.calls)
            .iter()
            .filter_map(|c| match c {
                SinkCall::VariableValues(values) => Some(values.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        crate::lock(&self.calls).clear();
    }

    fn push(&self, call: SinkCall) {
        crate::lock(&self.calls).push(call);
    }
}

impl ConsoleSink for RecordingSink {
    fn set_variable_definitions(&self, definitions: &[VariableDefinition]) {
        self.push(SinkCall::VariableDefinitions(definitions.to_vec()));
    }

    fn set_variable_values(&self, values: &Map<String, Value>) {
        self.push(SinkCall::VariableValues(values.clone()));
    }

    fn check_feedbacks(&self) {
        self.push(SinkCall::CheckFeedbacks);
    }

    fn set_status(&self, status: ModuleStatus, message: Option<&str>) {
        self.push(SinkCall::Status(status, message.map(str::to_owned)));
    }

    fn set_definitions(&self, kind: DefinitionKind, definitions: &Value) {
        self.push(SinkCall::Definitions(kind, definitions.clone()));
    }

    fn save_config(&self, config: &ModuleConfig) {
        self.push(SinkCall::SaveConfig(config.clone()));
    }
}
