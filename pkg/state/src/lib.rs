//! Object store consumed by the quota engine: versioned CRUD, watch, conflict retry.

pub mod client;
pub mod error;
pub mod retry;
pub mod watch;

pub use client::StateStore;
pub use error::{Result, StoreError};
pub use retry::retry_on_conflict;
