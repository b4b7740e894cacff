//! WasherWatch core
//!
//! Machine reservation and lifecycle management for a shared laundry room,
//! layered on a real-time synchronized keyed store. The crate covers the
//! reservation state machine, the ownership/claim protocol (race-avoidance
//! via atomic conditional updates), reminder throttling, and notification
//! dispatch; UI, authentication wiring, and the live networked store are
//! external collaborators behind the traits in [`store`].

pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod model;
pub mod notify;
pub mod relay;
pub mod store;
pub mod ticker;

pub use config::AppConfig;
pub use engine::{EngineConfig, MachineEngine};
pub use error::{WasherError, WasherResult};
pub use model::{Identity, Machine, MachineState, Notification, NotificationKind, Room};
pub use notify::NotificationDispatcher;

/// Install the global tracing subscriber
///
/// Filter comes from `RUST_LOG`, defaulting to `info`. Safe to call more
/// than once; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}
