pub mod kv_store;
pub mod settings;

pub use kv_store::{create_shared_kv_store, KvStore, SharedKvStore};
pub use settings::{keys, MatchmakingSettings};
