//! Client-side presence and chat synchronization for friendhub.
//!
//! A [`SyncEngine`] consumes the backend's notification stream and keeps a
//! [`Store`] consistent with it; user actions go through the same engine.

pub mod backend;
pub mod call;
pub mod engine;
pub mod error;
pub mod events;
pub mod identity;
pub mod ipc;
pub mod memory;
pub mod roster;
pub mod status;
pub mod store;
pub mod transcript;

pub use backend::Backend;
pub use backend_api as api;
pub use engine::SyncEngine;
pub use error::{BackendError, Result};
pub use identity::AuthFlow;
pub use memory::MemoryBackend;
pub use store::{AppState, Store, StoreEvent};
