//! Entity kinds and registry identifiers.

use crate::domain::registry::ArenaKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Every kind of record the registry stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Node,
    Publisher,
    Subscription,
    GuardCondition,
    Timer,
    Client,
    Service,
    Event,
}

impl EntityKind {
    /// The six kinds a wait set holds, in tie-break order.
    pub const WAITABLE: [EntityKind; 6] = [
        EntityKind::Subscription,
        EntityKind::GuardCondition,
        EntityKind::Timer,
        EntityKind::Client,
        EntityKind::Service,
        EntityKind::Event,
    ];

    /// Position of this kind inside a wait set, if it is waitable.
    #[must_use]
    pub fn wait_set_index(self) -> Option<usize> {
        Self::WAITABLE.iter().position(|kind| *kind == self)
    }

    /// Human-readable name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Publisher => "publisher",
            Self::Subscription => "subscription",
            Self::GuardCondition => "guard condition",
            Self::Timer => "timer",
            Self::Client => "client",
            Self::Service => "service",
            Self::Event => "event",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry identifier of a live (or formerly live) entity.
///
/// Copyable on purpose: wait sets keep these, never the owning handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityId {
    pub(crate) key: ArenaKey,
    pub(crate) kind: EntityKind,
}

impl EntityId {
    pub(crate) fn new(key: ArenaKey, kind: EntityKind) -> Self {
        Self { key, kind }
    }

    /// Kind of the entity this id refers to.
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Registry key.
    #[must_use]
    pub fn key(&self) -> ArenaKey {
        self.key
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.key)
    }
}
