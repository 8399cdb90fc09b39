//! Playgate Core - Playback Authorization Library
//!
//! This crate authorizes and supervises media playback sessions:
//! - Startup credential acquisition with a durable per-identity cache
//! - Concurrency slot reservation and periodic keepalive
//! - startPlayback grant acquisition with bounded retry policies
//! - Player backend configuration and lifecycle supervision
//! - Content metadata lookup
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Playback Session                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐        │
//! │  │ Authorization│  │  Heartbeat   │  │    Retry     │        │
//! │  │ Orchestrator │  │  Scheduler   │  │    Policy    │        │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘        │
//! │         │                 │                 │                │
//! │         └─────────────────┼─────────────────┘                │
//! │                           │                                  │
//! │                    ┌──────┴──────┐                           │
//! │                    │ Entitlement │                           │
//! │                    │     API     │                           │
//! │                    └──────┬──────┘                           │
//! │                           │                                  │
//! │  ┌──────────────┐  ┌──────┴──────┐  ┌──────────────┐         │
//! │  │   Session    │  │   Player    │  │   Content    │         │
//! │  │    Store     │  │   Backend   │  │   Client     │         │
//! │  └──────────────┘  └─────────────┘  └──────────────┘         │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod authorize;
pub mod backend;
pub mod cache;
pub mod content;
pub mod entitlement;
pub mod error;
pub mod heartbeat;
pub mod lifecycle;
pub mod retry;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use authorize::{AuthState, Orchestrator};
pub use backend::{
    create_backend, HeadlessBackend, PlaybackSetup, PlayerBackend, PlayerEvent, PlayerEventKind,
    SUPPORTED_PLAYER_TYPES,
};
pub use cache::{FileStore, MemoryStore, SessionStore};
pub use content::{ContentClient, ContentMetadata};
pub use entitlement::{EntitlementApi, HttpEntitlementClient, SlotStatus};
pub use error::{Error, Result};
pub use heartbeat::{HeartbeatScheduler, LimitCallback};
pub use lifecycle::{LifecycleState, PlaybackSession};
pub use retry::{decide, Countdown, RetryBudget, RetryDecision};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the library with default configuration
pub fn init() {
    tracing::info!(version = VERSION, "Playgate Core initialized");
}
