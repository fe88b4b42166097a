pub mod async_adapter;
pub mod config_store;
pub mod in_memory;
pub mod sqlite_store;
pub mod types;

pub use async_adapter::AsyncConfigStore;
pub use config_store::{ConfigMutation, ConfigStore};
pub use in_memory::InMemoryConfigStore;
pub use sqlite_store::{ConfigStoreError, SqliteConfigStore};
pub use types::*;
