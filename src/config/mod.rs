pub mod store;

pub use store::{FileStore, PersistedConfig, PersistedCredentials, PersistedRuntimeState, DEFAULT_STATE_DIR};
