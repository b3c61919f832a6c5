//! Policy enforcement layer.
//!
//! Every engine operation exposed by the gateway goes through [`Policy`].
//! Reads and lifecycle calls are authorized against the ownership registry
//! before the engine is contacted; creates are validated and rewritten
//! before delegation and recorded after the engine reports success.
//!
//! The registry lock is never held across an engine call. Lookups return
//! owned strings and the guard is dropped before any `.await`.

use crate::engine::DynEngine;
use crate::error::{CoreError, Result};
use crate::identity::Identity;
use crate::registry::{Registry, ResourceKind};
use std::sync::Arc;

mod container;
mod exec;
mod image;
mod system;
mod volume;

pub use exec::ExecSession;
pub use image::{image_owned, normalize_reference};

/// Authorizes, rewrites and delegates engine operations.
#[derive(Clone)]
pub struct Policy {
    engine: DynEngine,
    registry: Arc<Registry>,
    identity: Arc<Identity>,
}

impl Policy {
    #[must_use]
    pub fn new(engine: DynEngine, registry: Arc<Registry>, identity: Identity) -> Self {
        Self {
            engine,
            registry,
            identity: Arc::new(identity),
        }
    }

    /// Ownership registry shared with the lifecycle manager.
    #[must_use]
    pub const fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Backend engine.
    #[must_use]
    pub const fn engine(&self) -> &DynEngine {
        &self.engine
    }

    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Resolves `candidate` to an owned id, logging denials.
    fn resolve(&self, kind: ResourceKind, candidate: &str) -> Result<String> {
        self.registry.resolve(kind, candidate).map_err(|err| {
            tracing::warn!(%kind, id = candidate, "denied: {err}");
            CoreError::from(err)
        })
    }

    /// Requires an exact owned id.
    fn require(&self, kind: ResourceKind, id: &str) -> Result<()> {
        if self.registry.contains(kind, id) {
            return Ok(());
        }
        tracing::warn!(%kind, id, "denied: not owned");
        Err(crate::registry::RegistryError::NotFound {
            kind,
            id: id.to_string(),
        }
        .into())
    }
}
