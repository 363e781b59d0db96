//! Identifiers and roles shared by every crate in the workspace.

pub mod types;

pub use types::{DroverId, Role, TransferId, UserId};
