//! Element and controller registries.
//!
//! Both registries are cheap to clone handles over a coarse `RwLock`. The
//! lock is only held while resolving ids; operations keep `Arc`s to what they
//! resolved and never touch the registry again.

use crate::controller::PoolController;
use crate::element::Element;
use crate::error::EngineError;
use parking_lot::RwLock;
use pool_common::controller::CtrlCapabilities;
use pool_common::element::{Axis, ControllerId, ElementId};
use std::collections::HashMap;
use std::sync::Arc;

/// Hardware location of an element.
#[derive(Debug, Clone)]
pub struct Resolved {
    /// The physical element.
    pub element: Arc<Element>,
    /// Its controller.
    pub controller: ControllerId,
    /// Its axis.
    pub axis: Axis,
    /// Capabilities of the controller.
    pub capabilities: CtrlCapabilities,
}

#[derive(Default)]
struct ElementMap {
    by_id: HashMap<ElementId, Arc<Element>>,
    by_name: HashMap<String, ElementId>,
}

/// Registry of all elements (physical and groups).
#[derive(Clone, Default)]
pub struct ElementRegistry {
    inner: Arc<RwLock<ElementMap>>,
}

impl ElementRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an element.
    ///
    /// # Errors
    /// Returns `EngineError::AlreadyRegistered` on a duplicate id or name.
    pub fn register(&self, element: Element) -> Result<Arc<Element>, EngineError> {
        let mut map = self.inner.write();
        if map.by_id.contains_key(&element.id()) {
            return Err(EngineError::AlreadyRegistered(element.id().to_string()));
        }
        if map.by_name.contains_key(element.name()) {
            return Err(EngineError::AlreadyRegistered(element.name().to_string()));
        }
        let element = Arc::new(element);
        map.by_name.insert(element.name().to_string(), element.id());
        map.by_id.insert(element.id(), Arc::clone(&element));
        Ok(element)
    }

    /// Unregister `id`, returning the element if it existed.
    pub fn remove(&self, id: ElementId) -> Option<Arc<Element>> {
        let mut map = self.inner.write();
        let element = map.by_id.remove(&id)?;
        map.by_name.remove(element.name());
        Some(element)
    }

    /// Element by id.
    pub fn get(&self, id: ElementId) -> Result<Arc<Element>, EngineError> {
        self.inner
            .read()
            .by_id
            .get(&id)
            .cloned()
            .ok_or(EngineError::UnknownElement(id))
    }

    /// Element by name.
    pub fn find(&self, name: &str) -> Option<Arc<Element>> {
        let map = self.inner.read();
        map.by_name.get(name).and_then(|id| map.by_id.get(id)).cloned()
    }

    /// Groups listing `id` as a member.
    pub fn groups_containing(&self, id: ElementId) -> Vec<Arc<Element>> {
        self.inner
            .read()
            .by_id
            .values()
            .filter(|e| e.members().contains(&id))
            .cloned()
            .collect()
    }

    /// All elements, sorted by id.
    pub fn all(&self) -> Vec<Arc<Element>> {
        let mut all: Vec<_> = self.inner.read().by_id.values().cloned().collect();
        all.sort_by_key(|e| e.id());
        all
    }

    /// Resolve a physical element to its controller and axis.
    pub fn resolve(&self, id: ElementId) -> Result<Resolved, EngineError> {
        let element = self.get(id)?;
        resolve_element(element)
    }

    /// Resolve several elements under a single read lock.
    pub fn resolve_many(&self, ids: &[ElementId]) -> Result<Vec<Resolved>, EngineError> {
        let map = self.inner.read();
        ids.iter()
            .map(|id| {
                let element = map
                    .by_id
                    .get(id)
                    .cloned()
                    .ok_or(EngineError::UnknownElement(*id))?;
                resolve_element(element)
            })
            .collect()
    }
}

fn resolve_element(element: Arc<Element>) -> Result<Resolved, EngineError> {
    match (element.controller(), element.axis()) {
        (Some(controller), Some(axis)) => Ok(Resolved {
            controller,
            axis,
            capabilities: element.capabilities(),
            element,
        }),
        _ => Err(EngineError::InvalidRequest(format!(
            "'{}' is a {} and has no hardware axis",
            element.name(),
            element.kind()
        ))),
    }
}

/// Registry of controller instances.
#[derive(Clone, Default)]
pub struct ControllerRegistry {
    inner: Arc<RwLock<HashMap<ControllerId, Arc<PoolController>>>>,
}

impl ControllerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a controller.
    ///
    /// # Errors
    /// Returns `EngineError::AlreadyRegistered` on a duplicate id or name.
    pub fn register(&self, controller: PoolController) -> Result<Arc<PoolController>, EngineError> {
        let mut map = self.inner.write();
        if map.contains_key(&controller.id()) {
            return Err(EngineError::AlreadyRegistered(controller.id().to_string()));
        }
        if map.values().any(|c| c.name() == controller.name()) {
            return Err(EngineError::AlreadyRegistered(controller.name().to_string()));
        }
        let controller = Arc::new(controller);
        map.insert(controller.id(), Arc::clone(&controller));
        Ok(controller)
    }

    /// Controller by id.
    pub fn get(&self, id: ControllerId) -> Result<Arc<PoolController>, EngineError> {
        self.inner
            .read()
            .get(&id)
            .cloned()
            .ok_or(EngineError::UnknownController(id))
    }

    /// All controllers, sorted by id.
    pub fn all(&self) -> Vec<Arc<PoolController>> {
        let mut all: Vec<_> = self.inner.read().values().cloned().collect();
        all.sort_by_key(|c| c.id());
        all
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
