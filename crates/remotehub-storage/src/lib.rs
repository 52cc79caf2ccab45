//! Storage backends for remotehub.
//!
//! - [`RedbStore`]: persistent store on an embedded redb database
//! - [`MemoryStore`]: in-process store for tests and ephemeral hubs
//!
//! Both implement [`remotehub_core::HubStore`] with the same semantics.

pub mod error;
pub mod memory;
pub mod redb_store;

pub use error::{Error, Result};
pub use memory::MemoryStore;
pub use redb_store::RedbStore;
