//! # Silo Core - Authorization Engine & Change Polling
//!
//! Decides requests against object-level ACLs with bucket -> collection
//! -> record inheritance, and serves the `_since`/`_before` polling
//! protocol sync clients use to fetch incremental changes.

pub mod authorization;
pub mod engine;
pub mod poll;

pub use authorization::{
    build_permission_tuple, build_permissions_set, object_type, AuthorizationPolicy,
    AuthorizationRequest, ObjectType,
};
pub use engine::{EngineError, EngineResult, RecordEngine};
pub use poll::{poll_changes, PollError, PollPage, PollQuery};
