//! Identity collaborator
//!
//! The engine never owns people. It asks an [`IdentityProvider`] to resolve an
//! opaque actor id once per operation and uses only the department, seniority
//! and capability set it gets back.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::auth::Capability;
use crate::consult::{ActorId, DepartmentId};

/// A person as seen by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    #[serde(default)]
    pub display_name: String,
    pub department: DepartmentId,
    /// Higher is more senior
    #[serde(default)]
    pub seniority: u32,
    #[serde(default)]
    pub capabilities: HashSet<Capability>,
}

impl Actor {
    pub fn new(id: impl Into<ActorId>, department: impl Into<DepartmentId>, seniority: u32) -> Self {
        Self {
            id: id.into(),
            display_name: String::new(),
            department: department.into(),
            seniority,
            capabilities: HashSet::new(),
        }
    }

    /// Builder-style capability grant
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn is_member_of(&self, department: &str) -> bool {
        self.department == department
    }
}

/// Resolves actor ids at the time of each check
pub trait IdentityProvider: Send + Sync {
    fn resolve(&self, actor_id: &str) -> Option<Actor>;
}

/// Shared reference to an identity provider
pub type SharedIdentityProvider = Arc<dyn IdentityProvider>;

/// In-memory directory, loaded from configuration or built in tests
#[derive(Default)]
pub struct StaticDirectory {
    actors: RwLock<HashMap<ActorId, Actor>>,
}

impl StaticDirectory {
    pub fn new(actors: impl IntoIterator<Item = Actor>) -> Self {
        Self {
            actors: RwLock::new(actors.into_iter().map(|a| (a.id.clone(), a)).collect()),
        }
    }

    /// Add or replace an actor
    pub fn upsert(&self, actor: Actor) {
        self.actors
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(actor.id.clone(), actor);
    }

    /// Remove an actor; later operations by them resolve to unknown
    pub fn remove(&self, actor_id: &str) -> Option<Actor> {
        self.actors
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(actor_id)
    }

    pub fn len(&self) -> usize {
        self.actors.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IdentityProvider for StaticDirectory {
    fn resolve(&self, actor_id: &str) -> Option<Actor> {
        self.actors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(actor_id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_reflects_latest_state() {
        let directory = StaticDirectory::new([Actor::new("dr-ng", "cardiology", 2)]);
        assert_eq!(directory.resolve("dr-ng").unwrap().seniority, 2);

        directory.upsert(
            Actor::new("dr-ng", "cardiology", 3).with_capability(Capability::ForceClose),
        );
        let resolved = directory.resolve("dr-ng").unwrap();
        assert_eq!(resolved.seniority, 3);
        assert!(resolved.has(Capability::ForceClose));

        directory.remove("dr-ng");
        assert!(directory.resolve("dr-ng").is_none());
        assert!(directory.is_empty());
    }

    #[test]
    fn test_membership() {
        let actor = Actor::new("rn-1", "oncology", 1);
        assert!(actor.is_member_of("oncology"));
        assert!(!actor.is_member_of("cardiology"));
    }
}
