//! Directory tree types shared by the watcher, client and reconciler
//!
//! The directory tree is owned by the external directory service. Lintel only
//! holds a read-only, possibly stale view of it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{LintelError, Result};

/// Opaque unique identifier of a directory node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DirectoryId(pub Uuid);

impl DirectoryId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    /// Build an id from a small integer; handy for fixtures and logs
    pub fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }
}

impl fmt::Display for DirectoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for DirectoryId {
    type Err = LintelError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| LintelError::Decode(format!("invalid directory id '{}': {}", s, e)))
    }
}

impl From<Uuid> for DirectoryId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// A node of the directory tree as reported by the directory service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryNode {
    pub id: DirectoryId,
    /// Parent node; `None` for the root
    #[serde(default, alias = "parent_id")]
    pub parent: Option<DirectoryId>,
    #[serde(default)]
    pub deleted: bool,
}

impl DirectoryNode {
    pub fn root(id: DirectoryId) -> Self {
        Self { id, parent: None, deleted: false }
    }

    pub fn child(id: DirectoryId, parent: DirectoryId) -> Self {
        Self { id, parent: Some(parent), deleted: false }
    }
}

/// Lifecycle event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    #[serde(alias = "create")]
    Created,
    #[serde(alias = "move", alias = "update")]
    Moved,
    #[serde(alias = "delete", alias = "delete_hard", alias = "delete_soft")]
    Deleted,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Moved => write!(f, "moved"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

/// A directory lifecycle event, delivered at least once and possibly out of order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEvent {
    #[serde(alias = "nodeID", alias = "directory_id")]
    pub node_id: DirectoryId,
    /// Parent at event time (Created / Moved only)
    #[serde(default, alias = "parentID", skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<DirectoryId>,
    pub kind: EventKind,
    /// Monotonically increasing per node
    #[serde(alias = "seq")]
    pub sequence: u64,
}

impl DirectoryEvent {
    pub fn created(node_id: DirectoryId, parent_id: Option<DirectoryId>, sequence: u64) -> Self {
        Self { node_id, parent_id, kind: EventKind::Created, sequence }
    }

    pub fn moved(node_id: DirectoryId, parent_id: DirectoryId, sequence: u64) -> Self {
        Self { node_id, parent_id: Some(parent_id), kind: EventKind::Moved, sequence }
    }

    pub fn deleted(node_id: DirectoryId, sequence: u64) -> Self {
        Self { node_id, parent_id: None, kind: EventKind::Deleted, sequence }
    }

    /// Decode an event from its JSON wire form and check it is self-consistent
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let event: DirectoryEvent = serde_json::from_slice(payload)?;
        event.validate()?;
        Ok(event)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn validate(&self) -> Result<()> {
        if self.parent_id == Some(self.node_id) {
            return Err(LintelError::Decode(format!(
                "node {} cannot be its own parent",
                self.node_id
            )));
        }
        if self.kind == EventKind::Moved && self.parent_id.is_none() {
            return Err(LintelError::Decode(format!(
                "moved event for {} has no parent",
                self.node_id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_decoding() {
        let node = DirectoryId::from_u128(2);
        let parent = DirectoryId::from_u128(1);
        let json = format!(
            r#"{{"node_id":"{}","parent_id":"{}","kind":"created","sequence":1}}"#,
            node, parent
        );

        let event = DirectoryEvent::decode(json.as_bytes()).unwrap();
        assert_eq!(event, DirectoryEvent::created(node, Some(parent), 1));
    }

    #[test]
    fn test_event_kind_aliases() {
        let node = DirectoryId::from_u128(7);
        let json = format!(r#"{{"nodeID":"{}","kind":"delete","seq":4}}"#, node);

        let event = DirectoryEvent::decode(json.as_bytes()).unwrap();
        assert_eq!(event.kind, EventKind::Deleted);
        assert_eq!(event.sequence, 4);
        assert!(event.parent_id.is_none());
    }

    #[test]
    fn test_self_parent_rejected() {
        let node = DirectoryId::from_u128(3);
        let event = DirectoryEvent::created(node, Some(node), 1);
        let bytes = serde_json::to_vec(&event).unwrap();

        let err = DirectoryEvent::decode(&bytes).unwrap_err();
        assert!(matches!(err, LintelError::Decode(_)));
    }

    #[test]
    fn test_moved_without_parent_rejected() {
        let json = format!(
            r#"{{"node_id":"{}","kind":"moved","sequence":9}}"#,
            DirectoryId::from_u128(5)
        );
        assert!(DirectoryEvent::decode(json.as_bytes()).is_err());
    }

    #[test]
    fn test_directory_id_parse() {
        let id: DirectoryId = "00000000-0000-0000-0000-00000000002a".parse().unwrap();
        assert_eq!(id, DirectoryId::from_u128(42));
        assert!("not-a-uuid".parse::<DirectoryId>().is_err());
    }

    #[test]
    fn test_node_parent_alias() {
        let json = format!(
            r#"{{"id":"{}","parent_id":"{}"}}"#,
            DirectoryId::from_u128(2),
            DirectoryId::from_u128(1)
        );
        let node: DirectoryNode = serde_json::from_str(&json).unwrap();
        assert_eq!(node.parent, Some(DirectoryId::from_u128(1)));
        assert!(!node.deleted);
    }
}
