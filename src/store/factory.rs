//! Store backend selection
//!
//! Encapsulates the logic for constructing the appropriate store
//! implementation from configuration, following the same strategy pattern
//! the rest of the crate uses for swappable backends.

use super::memory::MemoryStore;
use super::Store;
use crate::config::{StoreBackend, StoreConfig};
use crate::error::{WasherError, WasherResult};
use std::sync::Arc;

/// Factory for creating store instances
pub struct StoreFactory;

impl StoreFactory {
    /// Create a store handle from the backing-store configuration
    ///
    /// No connection URL selects the in-process backend. A loopback URL is
    /// treated as the local emulator, which this crate also serves with the
    /// in-process backend. A live URL requires the hosting application to
    /// supply its networked store implementation; asking the factory for one
    /// is a configuration error, not a silent fallback.
    pub fn create(config: &StoreConfig) -> WasherResult<Arc<dyn Store>> {
        match config.backend() {
            StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
            StoreBackend::Emulator(url) => {
                tracing::info!(url = %url, "using in-process store for local emulator");
                Ok(Arc::new(MemoryStore::new()))
            }
            StoreBackend::Live(url) => Err(WasherError::ConfigError(format!(
                "live store backend for {} must be supplied by the host application",
                url
            ))),
        }
    }
}
