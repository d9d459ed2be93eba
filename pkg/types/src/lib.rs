//! Object model shared by the state store, the quota engine and the API.

pub mod config;
pub mod ledger;
pub mod meta;
pub mod namespace;
pub mod node;
pub mod quantity;
pub mod quota;
pub mod resources;
pub mod status;
pub mod subnamespace;
pub mod tenant;
pub mod validate;

pub use meta::{Object, ObjectMeta, OwnerReference};
pub use resources::ResourceList;
