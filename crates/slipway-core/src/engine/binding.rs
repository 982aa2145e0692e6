//! Read-only access to the external beacon → entity identity data.
//!
//! The engines only need two facts about a beacon's owner: which entity it
//! is currently bound to (to detect remapping) and whether that entity is
//! under maintenance (to ignore its detections).

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

/// The entity a beacon is currently bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityBinding {
    /// External identity (e.g. a boat) the beacon is attached to.
    pub entity_id: String,

    /// Detections for entities under maintenance are ignored.
    #[serde(default)]
    pub under_maintenance: bool,
}

impl EntityBinding {
    /// A binding to an entity that is in service.
    #[must_use]
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            under_maintenance: false,
        }
    }
}

/// Narrow capability queried once per sample.
pub trait BindingResolver: Send + Sync {
    /// The binding of `beacon_id`, or `None` if the beacon is unbound.
    fn resolved_binding(&self, beacon_id: &str) -> Option<EntityBinding>;
}

/// Resolver for deployments without identity data: every beacon is unbound.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBindings;

impl BindingResolver for NoBindings {
    fn resolved_binding(&self, _beacon_id: &str) -> Option<EntityBinding> {
        None
    }
}

/// In-memory binding table that the wiring layer can update at runtime.
#[derive(Debug, Default)]
pub struct StaticBindings {
    inner: RwLock<HashMap<String, EntityBinding>>,
}

impl StaticBindings {
    /// Create a table from an initial mapping.
    #[must_use]
    pub fn new(bindings: HashMap<String, EntityBinding>) -> Self {
        Self {
            inner: RwLock::new(bindings),
        }
    }

    /// Bind `beacon_id` to `entity_id`, replacing any previous binding.
    pub fn bind(&self, beacon_id: impl Into<String>, entity_id: impl Into<String>) {
        self.write().insert(beacon_id.into(), EntityBinding::new(entity_id));
    }

    /// Remove the binding of `beacon_id`.
    pub fn unbind(&self, beacon_id: &str) -> Option<EntityBinding> {
        self.write().remove(beacon_id)
    }

    /// Flag or clear maintenance for the entity bound to `beacon_id`.
    /// Returns `false` if the beacon is unbound.
    pub fn set_maintenance(&self, beacon_id: &str, under_maintenance: bool) -> bool {
        self.write().get_mut(beacon_id).map_or(false, |binding| {
            binding.under_maintenance = under_maintenance;
            true
        })
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, EntityBinding>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BindingResolver for StaticBindings {
    fn resolved_binding(&self, beacon_id: &str) -> Option<EntityBinding> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(beacon_id)
            .cloned()
    }
}
