//! Notification events produced by running operations.
//!
//! Events are built while the engine holds locks and are delivered to
//! listeners only after every lock has been released.

use crate::element::{ElementId, ElementState, OperationId};
use serde::Serialize;

/// What changed on an element.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// Lifecycle state transition.
    State {
        old: ElementState,
        new: ElementState,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
    /// Value (position, counts) update.
    Value {
        old: Option<f64>,
        new: Option<f64>,
        /// Set when the read failed; `new` is then `None`.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// The operation driving the element finished.
    OperationEnded {
        operation: OperationId,
        state: ElementState,
    },
}

/// One queued notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ElementEvent {
    pub element: ElementId,
    pub name: String,
    #[serde(flatten)]
    pub kind: EventKind,
    /// Priority events bypass change filtering on the listener side and are
    /// always the last value event of an operation for their element.
    pub priority: bool,
}

impl ElementEvent {
    pub fn state(
        element: ElementId,
        name: &str,
        old: ElementState,
        new: ElementState,
        status: Option<String>,
    ) -> Self {
        Self {
            element,
            name: name.to_string(),
            kind: EventKind::State { old, new, status },
            priority: false,
        }
    }

    pub fn value(
        element: ElementId,
        name: &str,
        old: Option<f64>,
        new: Result<f64, String>,
        priority: bool,
    ) -> Self {
        let (new, error) = match new {
            Ok(v) => (Some(v), None),
            Err(e) => (None, Some(e)),
        };
        Self {
            element,
            name: name.to_string(),
            kind: EventKind::Value { old, new, error },
            priority,
        }
    }

    pub fn operation_ended(
        element: ElementId,
        name: &str,
        operation: OperationId,
        state: ElementState,
    ) -> Self {
        Self {
            element,
            name: name.to_string(),
            kind: EventKind::OperationEnded { operation, state },
            priority: false,
        }
    }

    /// New state carried by a state event.
    pub fn new_state(&self) -> Option<ElementState> {
        match &self.kind {
            EventKind::State { new, .. } => Some(*new),
            _ => None,
        }
    }

    /// New value carried by a value event.
    pub fn new_value(&self) -> Option<f64> {
        match &self.kind {
            EventKind::Value { new, .. } => *new,
            _ => None,
        }
    }

    pub fn is_state(&self) -> bool {
        matches!(self.kind, EventKind::State { .. })
    }

    pub fn is_value(&self) -> bool {
        matches!(self.kind, EventKind::Value { .. })
    }

    pub fn is_operation_ended(&self) -> bool {
        matches!(self.kind, EventKind::OperationEnded { .. })
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
