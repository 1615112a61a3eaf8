//! Outbound notifications about engine activity.
//!
//! The engine emits events through the [`EventSink`] trait after the store
//! writes land; sink failures are the sink's problem, never the run's. All
//! trait methods default to no-ops so a sink only implements what it cares
//! about.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::chain::InferenceStatus;
use crate::fact::{Fact, FactId, Scope};

/// One engine notification, serializable for outbound transports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    RunCompleted {
        scope: Scope,
        status: InferenceStatus,
        facts_derived: usize,
        facts_retracted: usize,
        duration_ms: u64,
    },
    FactsDerived {
        scope: Scope,
        facts: Vec<Fact>,
    },
    FactsRetracted {
        scope: Scope,
        fact_ids: Vec<FactId>,
    },
}

impl EngineEvent {
    /// The event as a JSON payload for wire transports.
    pub fn payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Receiver of engine notifications.
pub trait EventSink: Send + Sync {
    fn run_completed(&self, _event: &EngineEvent) {}
    fn facts_derived(&self, _event: &EngineEvent) {}
    fn facts_retracted(&self, _event: &EngineEvent) {}
}

/// Discards everything. The default sink.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {}

/// Collects events in memory for inspection. Test double and debugging aid.
#[derive(Debug, Default)]
pub struct BufferedSink {
    events: Mutex<Vec<EngineEvent>>,
}

impl BufferedSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every buffered event, oldest first.
    pub fn drain(&self) -> Vec<EngineEvent> {
        match self.events.lock() {
            Ok(mut events) => std::mem::take(&mut *events),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    fn push(&self, event: &EngineEvent) {
        let mut events = match self.events.lock() {
            Ok(events) => events,
            Err(poisoned) => poisoned.into_inner(),
        };
        events.push(event.clone());
    }
}

impl EventSink for BufferedSink {
    fn run_completed(&self, event: &EngineEvent) {
        self.push(event);
    }

    fn facts_derived(&self, event: &EngineEvent) {
        self.push(event);
    }

    fn facts_retracted(&self, event: &EngineEvent) {
        self.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffered_sink_drains_in_order() {
        let sink = BufferedSink::new();
        let first = EngineEvent::FactsRetracted {
            scope: Scope::Global,
            fact_ids: vec![],
        };
        let second = EngineEvent::RunCompleted {
            scope: Scope::Global,
            status: InferenceStatus::Success,
            facts_derived: 2,
            facts_retracted: 0,
            duration_ms: 3,
        };
        sink.facts_retracted(&first);
        sink.run_completed(&second);

        assert_eq!(sink.drain(), vec![first, second]);
        assert!(sink.drain().is_empty());
    }

    #[test]
    fn payload_is_tagged_json() {
        let event = EngineEvent::RunCompleted {
            scope: Scope::Workspace("w1".into()),
            status: InferenceStatus::Success,
            facts_derived: 1,
            facts_retracted: 0,
            duration_ms: 10,
        };
        let payload = event.payload();
        assert_eq!(payload["event"], "run_completed");
        assert_eq!(payload["facts_derived"], 1);
    }
}
