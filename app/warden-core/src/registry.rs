//! Ownership registry.
//!
//! Tracks every identifier the gateway itself caused to exist, per resource
//! kind. Containers and images are also reachable through aliases
//! (caller-chosen names, repository tags) that point at the runtime ID.
//!
//! All four sets live behind one `RwLock`. Callers must never hold a guard
//! across an engine call: every method takes the lock, does its work and
//! releases it before returning.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

/// Kind of resource tracked by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Containers (IDs and names).
    Container,
    /// Exec sessions.
    Exec,
    /// Images (IDs and tags).
    Image,
    /// Volumes.
    Volume,
}

impl ResourceKind {
    /// Every kind, in a stable order.
    pub const ALL: [Self; 4] = [Self::Container, Self::Exec, Self::Image, Self::Volume];
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Container => "container",
            Self::Exec => "exec instance",
            Self::Image => "image",
            Self::Volume => "volume",
        };
        f.write_str(name)
    }
}

/// Lookup failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Nothing owned matches the candidate.
    #[error("no such {kind}: {id}")]
    NotFound {
        /// Resource kind searched.
        kind: ResourceKind,
        /// Caller-supplied candidate.
        id: String,
    },

    /// The candidate prefixes more than one owned resource.
    #[error("{kind} reference {id} is ambiguous ({matches} matches)")]
    Ambiguous {
        /// Resource kind searched.
        kind: ResourceKind,
        /// Caller-supplied candidate.
        id: String,
        /// Number of distinct resources matched.
        matches: usize,
    },
}

#[derive(Debug, Default)]
struct OwnedSet {
    ids: HashSet<String>,
    /// alias -> id
    aliases: HashMap<String, String>,
}

impl OwnedSet {
    fn target<'a>(&'a self, key: &'a str) -> Option<&'a str> {
        if self.ids.contains(key) {
            return Some(key);
        }
        self.aliases.get(key).map(String::as_str)
    }
}

/// Concurrency-safe store of owned resource identifiers.
#[derive(Debug, Default)]
pub struct Registry {
    sets: RwLock<HashMap<ResourceKind, OwnedSet>>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `id` as owned. Recording an existing id is a no-op.
    pub fn record(&self, kind: ResourceKind, id: impl Into<String>) {
        let id = id.into();
        if id.is_empty() {
            return;
        }
        let mut sets = self.sets.write().unwrap_or_else(PoisonError::into_inner);
        sets.entry(kind).or_default().ids.insert(id);
    }

    /// Records `alias` as another name for the owned `id`, recording `id`
    /// as well if it was not yet known.
    pub fn record_alias(&self, kind: ResourceKind, alias: impl Into<String>, id: impl Into<String>) {
        let (alias, id) = (alias.into(), id.into());
        if id.is_empty() {
            return;
        }
        let mut sets = self.sets.write().unwrap_or_else(PoisonError::into_inner);
        let set = sets.entry(kind).or_default();
        if !alias.is_empty() && alias != id {
            set.aliases.insert(alias, id.clone());
        }
        set.ids.insert(id);
    }

    /// Exact membership test over ids and aliases.
    #[must_use]
    pub fn contains(&self, kind: ResourceKind, id: &str) -> bool {
        let sets = self.sets.read().unwrap_or_else(PoisonError::into_inner);
        sets.get(&kind).is_some_and(|set| set.target(id).is_some())
    }

    /// Resolves a full or abbreviated identifier to the owned id.
    ///
    /// An exact id or alias wins immediately. Otherwise `candidate` is
    /// matched as a prefix of every stored id (aliases only match exactly);
    /// it resolves only if exactly one id matches.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] when nothing matches (an empty
    /// candidate never matches) and [`RegistryError::Ambiguous`] when the
    /// prefix selects more than one resource.
    pub fn resolve(&self, kind: ResourceKind, candidate: &str) -> Result<String, RegistryError> {
        let not_found = || RegistryError::NotFound {
            kind,
            id: candidate.to_string(),
        };
        if candidate.is_empty() {
            return Err(not_found());
        }

        let sets = self.sets.read().unwrap_or_else(PoisonError::into_inner);
        let Some(set) = sets.get(&kind) else {
            return Err(not_found());
        };
        if let Some(id) = set.target(candidate) {
            return Ok(id.to_string());
        }

        let mut found = set.ids.iter().filter(|id| id.starts_with(candidate));
        match (found.next(), found.next()) {
            (None, _) => Err(not_found()),
            (Some(id), None) => Ok(id.to_string()),
            (Some(_), Some(_)) => Err(RegistryError::Ambiguous {
                kind,
                id: candidate.to_string(),
                matches: 2 + found.count(),
            }),
        }
    }

    /// Removes `id` and every alias pointing at it. Returns whether the id
    /// was owned.
    pub fn forget(&self, kind: ResourceKind, id: &str) -> bool {
        let mut sets = self.sets.write().unwrap_or_else(PoisonError::into_inner);
        let Some(set) = sets.get_mut(&kind) else {
            return false;
        };
        set.aliases.retain(|_, target| target != id);
        set.ids.remove(id)
    }

    /// Owned ids of `kind` (aliases excluded), sorted.
    #[must_use]
    pub fn ids(&self, kind: ResourceKind) -> Vec<String> {
        let sets = self.sets.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<String> = sets
            .get(&kind)
            .map(|set| set.ids.iter().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Number of owned ids of `kind`.
    #[must_use]
    pub fn count(&self, kind: ResourceKind) -> usize {
        let sets = self.sets.read().unwrap_or_else(PoisonError::into_inner);
        sets.get(&kind).map_or(0, |set| set.ids.len())
    }
}
