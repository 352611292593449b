//! Operation requests and dispatch plans.
//!
//! An [`OperationRequest`] names what to start. The dispatcher resolves it
//! into a [`DispatchPlan`]: the implied controllers (deduplicated, ordered by
//! id, which is the lock order) and the implied elements (request order).

use crate::controller::PoolController;
use crate::element::Element;
use crate::error::EngineError;
use pool_common::element::{Axis, ElementId, OperationId};
use std::collections::HashSet;
use std::sync::Arc;

/// What an operation does to its elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Moves motors.
    Motion,
    /// Counts on channels.
    Acquisition,
}

/// Element the operation was requested on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestSource {
    /// One physical element. The caller holds its operation lock.
    Single(ElementId),
    /// A group. Member operation locks are taken by the dispatcher.
    Group(ElementId),
}

impl RequestSource {
    /// Id of the single element or of the group.
    pub fn element(self) -> ElementId {
        match self {
            Self::Single(id) | Self::Group(id) => id,
        }
    }

    /// True for a group source.
    pub fn is_group(self) -> bool {
        matches!(self, Self::Group(_))
    }
}

/// Target value of one element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Target {
    /// Element to drive.
    pub element: ElementId,
    /// Dial position for motors, integration time (or `-count`) for channels.
    pub value: f64,
}

impl Target {
    /// Target `value` for `element`.
    pub fn new(element: ElementId, value: f64) -> Self {
        Self { element, value }
    }
}

/// Request to start an operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRequest {
    /// What the operation does.
    pub kind: OperationKind,
    /// Element the operation runs on.
    pub source: RequestSource,
    /// Elements and targets, in request order.
    pub targets: Vec<Target>,
    /// Element started last and governing completion.
    pub master: Option<ElementId>,
    /// `false` skips polling (internal follow-up operations).
    pub wait: bool,
}

impl OperationRequest {
    /// Operation on one physical element.
    pub fn single(kind: OperationKind, element: ElementId, value: f64) -> Self {
        Self {
            kind,
            source: RequestSource::Single(element),
            targets: vec![Target::new(element, value)],
            master: None,
            wait: true,
        }
    }

    /// Operation on the members of a group.
    pub fn group(kind: OperationKind, group: ElementId, targets: Vec<Target>) -> Self {
        Self {
            kind,
            source: RequestSource::Group(group),
            targets,
            master: None,
            wait: true,
        }
    }

    /// Designate the master element.
    pub fn with_master(mut self, master: ElementId) -> Self {
        self.master = Some(master);
        self
    }

    /// Sub-operation started from the polling loop of `source`; not polled
    /// on its own.
    pub fn followup(kind: OperationKind, source: RequestSource, targets: Vec<Target>) -> Self {
        Self {
            kind,
            source,
            targets,
            master: None,
            wait: false,
        }
    }

    /// Structural checks that need no registry access.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.targets.is_empty() {
            return Err(EngineError::InvalidRequest("no element to operate".to_string()));
        }
        let mut seen = HashSet::new();
        for target in &self.targets {
            if !seen.insert(target.element) {
                return Err(EngineError::InvalidRequest(format!(
                    "element {} listed twice",
                    target.element
                )));
            }
            if !target.value.is_finite() {
                return Err(EngineError::InvalidRequest(format!(
                    "target of element {} is not a finite number",
                    target.element
                )));
            }
        }
        if let RequestSource::Single(id) = self.source {
            if self.targets.len() != 1 || self.targets[0].element != id {
                return Err(EngineError::InvalidRequest(format!(
                    "single element request on {id} must target only that element"
                )));
            }
        }
        if let Some(master) = self.master {
            if !seen.contains(&master) {
                return Err(EngineError::InvalidRequest(format!(
                    "master {master} is not part of the request"
                )));
            }
        }
        Ok(())
    }
}

/// One controller involved in an operation.
#[derive(Debug, Clone)]
pub struct ImpliedController {
    /// The controller.
    pub controller: Arc<PoolController>,
    /// Indices into `DispatchPlan::elements`, in request order.
    pub members: Vec<usize>,
}

/// One element involved in an operation.
#[derive(Debug, Clone)]
pub struct ImpliedElement {
    /// The element.
    pub element: Arc<Element>,
    /// Index into `DispatchPlan::controllers`.
    pub controller: usize,
    /// Axis on its controller.
    pub axis: Axis,
    /// Dial position or master value sent to `start_one`.
    pub target: f64,
    /// The element is the master of the operation.
    pub is_master: bool,
}

/// Resolved form of an `OperationRequest`.
#[derive(Debug, Clone)]
pub struct DispatchPlan {
    /// Operation the plan belongs to.
    pub operation: OperationId,
    /// What the operation does.
    pub kind: OperationKind,
    /// Element the operation runs on.
    pub source: RequestSource,
    /// Follow-up plans are not polled.
    pub wait: bool,
    /// The element the request was made on (single element or group).
    pub running: Arc<Element>,
    /// Ordered by ascending controller id.
    pub controllers: Vec<ImpliedController>,
    /// In request order.
    pub elements: Vec<ImpliedElement>,
    /// Index of the master in `elements`.
    pub master: Option<usize>,
}

impl DispatchPlan {
    /// The group, for group requests.
    pub fn group(&self) -> Option<&Arc<Element>> {
        self.source.is_group().then_some(&self.running)
    }

    /// Indices of non-master elements, in request order.
    pub fn non_master(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.elements.len()).filter(move |&i| Some(i) != self.master)
    }

    /// Non-master elements first, then the master.
    pub fn start_order(&self) -> Vec<usize> {
        self.non_master().chain(self.master).collect()
    }

    /// Index in `elements` of the element `id`.
    pub fn index_of(&self, id: ElementId) -> Option<usize> {
        self.elements.iter().position(|e| e.element.id() == id)
    }

    /// Element references ordered by ascending id (element lock order).
    pub fn elements_by_id(&self) -> Vec<&Element> {
        let mut elements: Vec<&Element> = self.elements.iter().map(|e| &*e.element).collect();
        elements.sort_by_key(|e| e.id());
        elements
    }

    /// Implied controllers, in lock order.
    pub fn controller_refs(&self) -> impl Iterator<Item = &PoolController> {
        self.controllers.iter().map(|c| &*c.controller)
    }

    /// True when an abort was requested on the running element or any member.
    pub fn abort_requested(&self) -> bool {
        self.running.abort_requested() || self.elements.iter().any(|e| e.element.abort_requested())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
