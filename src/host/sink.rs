//! Console sink that publishes every call as an [`EventEnvelope`].

use serde_json::{Map, Value, json};
use tokio::sync::broadcast;

use crate::config::ModuleConfig;
use crate::console::{ConsoleSink, DefinitionKind, ModuleStatus, VariableDefinition};
use crate::host::contract::{EventEnvelope, events};

pub struct BroadcastSink {
    event_tx: broadcast::Sender<EventEnvelope>,
}

impl BroadcastSink {
    #[must_use]
    pub fn new(event_tx: broadcast::Sender<EventEnvelope>) -> Self {
        Self { event_tx }
    }

    fn emit(&self, event: &str, payload: Value) {
        let envelope = EventEnvelope::new(uuid::Uuid::new_v4().to_string(), event, payload);
        // No subscriber means nobody is listening yet; the event is dropped.
        let _ = self.event_tx.send(envelope);
    }
}

impl ConsoleSink for BroadcastSink {
    fn set_variable_definitions(&self, definitions: &[VariableDefinition]) {
        self.emit(
            events::VARIABLE_DEFINITIONS,
            json!({ "definitions": definitions }),
        );
    }

    fn set_variable_values(&self, values: &Map<String, Value>) {
        self.emit(events::VARIABLE_VALUES, json!({ "values": values }));
    }

    fn check_feedbacks(&self) {
        self.emit(events::FEEDBACKS_CHECK, json!({}));
    }

    fn set_status(&self, status: ModuleStatus, message: Option<&str>) {
        self.emit(
            events::MODULE_STATUS,
            json!({ "status": status, "message": message }),
        );
    }

    fn set_definitions(&self, kind: DefinitionKind, definitions: &Value) {
        let event = match kind {
            DefinitionKind::Actions => events::DEFINITIONS_ACTIONS,
            DefinitionKind::Feedbacks => events::DEFINITIONS_FEEDBACKS,
            DefinitionKind::Presets => events::DEFINITIONS_PRESETS,
        };
        self.emit(event, json!({ "definitions": definitions }));
    }

    fn save_config(&self, config: &ModuleConfig) {
        self.emit(events::CONFIG_SAVE, json!({ "config": config }));
    }
}
