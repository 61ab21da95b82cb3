//! Shared types

pub mod directory;
pub mod error;
pub mod permission;

pub use directory::{DirectoryEvent, DirectoryId, DirectoryNode, EventKind};
pub use error::{ErrorKind, LintelError, Result};
pub use permission::{
    AssignmentQuery, DirectoryPermissionLink, EffectivePermission, EffectiveQuery, NewRole,
    NodeDelta, NodeState, Permission, Role, RoleAssignment, RoleId, RoleUpdate,
};
