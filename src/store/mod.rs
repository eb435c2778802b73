pub mod filestore;
pub mod generic;
pub mod memory;

pub use deskcore::store::error::{Result, StoreError};
pub use deskcore::store::traits::*;
pub use filestore::FileStore;
pub use memory::MemoryStore;
