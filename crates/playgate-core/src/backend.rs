//! Player backend capability
//!
//! The playback lifecycle controller drives any media SDK through this
//! interface: setup with a playback grant, unload, and a typed event
//! subscription. Each backend instance owns its own subscriber list; there
//! is no global event bus.

use crate::{Error, PlaybackGrant, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Player backend kinds this build knows how to construct
pub const SUPPORTED_PLAYER_TYPES: &[&str] = &["headless"];

/// Event kinds a backend can emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerEventKind {
    Error,
    Paused,
    Play,
    PlaybackFinished,
}

/// Events flowing from the backend into the lifecycle controller
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    Error(String),
    Paused,
    Play,
    PlaybackFinished,
}

impl PlayerEvent {
    pub fn kind(&self) -> PlayerEventKind {
        match self {
            PlayerEvent::Error(_) => PlayerEventKind::Error,
            PlayerEvent::Paused => PlayerEventKind::Paused,
            PlayerEvent::Play => PlayerEventKind::Play,
            PlayerEvent::PlaybackFinished => PlayerEventKind::PlaybackFinished,
        }
    }
}

/// Subscriber callback for backend events
pub type EventHandler = Box<dyn Fn(&PlayerEvent) + Send + Sync>;

/// Per-instance event registry mapping event kinds to their subscribers
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Mutex<HashMap<PlayerEventKind, Vec<EventHandler>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, kind: PlayerEventKind, handler: EventHandler) {
        let mut handlers = self.handlers.lock().expect("event handler lock poisoned");
        handlers.entry(kind).or_default().push(handler);
    }

    pub fn dispatch(&self, event: &PlayerEvent) {
        let handlers = self.handlers.lock().expect("event handler lock poisoned");
        if let Some(subscribers) = handlers.get(&event.kind()) {
            for handler in subscribers {
                handler(event);
            }
        }
    }
}

/// Everything a backend needs to configure playback: the grant plus the
/// FairPlay certificate URL from the cached startup data
#[derive(Debug, Clone)]
pub struct PlaybackSetup {
    pub grant: PlaybackGrant,
    pub fairplay_certificate_url: String,
}

/// Capability interface every media backend adapter implements.
///
/// `setup` and `unload` default to no-ops in trivial adapters; the
/// lifecycle controller only assumes the documented contract: `is_setup`
/// reflects whether `setup` succeeded and `unload` has not yet run.
#[async_trait]
pub trait PlayerBackend: Send + Sync {
    /// Configures the backend with a playback grant and starts reproduction
    async fn setup(&self, setup: &PlaybackSetup) -> Result<()>;

    /// Fully stops reproduction and blocks future playback
    async fn unload(&self);

    async fn is_setup(&self) -> bool;

    /// Registers a subscriber for one event kind on this instance
    fn on_event(&self, kind: PlayerEventKind, handler: EventHandler);
}

/// No-op backend for headless runs and tests.
///
/// Records the last setup it received and lets callers emit events as a real
/// media SDK would.
#[derive(Default)]
pub struct HeadlessBackend {
    dispatcher: EventDispatcher,
    set_up: AtomicBool,
    playback_allowed: AtomicBool,
    last_setup: Mutex<Option<PlaybackSetup>>,
    unload_count: AtomicU32,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self {
            dispatcher: EventDispatcher::new(),
            set_up: AtomicBool::new(false),
            playback_allowed: AtomicBool::new(true),
            last_setup: Mutex::new(None),
            unload_count: AtomicU32::new(0),
        }
    }

    /// Emits a backend event to all subscribers, as the media SDK would
    pub fn emit(&self, event: PlayerEvent) {
        self.dispatcher.dispatch(&event);
    }

    pub fn last_setup(&self) -> Option<PlaybackSetup> {
        self.last_setup
            .lock()
            .expect("setup record lock poisoned")
            .clone()
    }

    pub fn unload_calls(&self) -> u32 {
        self.unload_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlayerBackend for HeadlessBackend {
    async fn setup(&self, setup: &PlaybackSetup) -> Result<()> {
        if !self.playback_allowed.load(Ordering::SeqCst) {
            debug!("Playback rejected, ignoring setup");
            return Ok(());
        }
        info!(
            content_url = %setup.grant.content_url,
            license_url = %setup.grant.license_url,
            "Headless backend configured"
        );
        *self.last_setup.lock().expect("setup record lock poisoned") = Some(setup.clone());
        self.set_up.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn unload(&self) {
        self.unload_count.fetch_add(1, Ordering::SeqCst);
        self.playback_allowed.store(false, Ordering::SeqCst);
        if self.set_up.swap(false, Ordering::SeqCst) {
            info!("Headless backend unloaded");
        }
    }

    async fn is_setup(&self) -> bool {
        self.set_up.load(Ordering::SeqCst)
    }

    fn on_event(&self, kind: PlayerEventKind, handler: EventHandler) {
        self.dispatcher.subscribe(kind, handler);
    }
}

impl std::fmt::Debug for dyn PlayerBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PlayerBackend")
    }
}

/// Builds a backend by kind, failing fast on unknown player types
pub fn create_backend(kind: &str) -> Result<Arc<dyn PlayerBackend>> {
    match kind {
        "headless" => Ok(Arc::new(HeadlessBackend::new())),
        _ => Err(Error::UnknownPlayerType {
            requested: kind.to_string(),
            supported: SUPPORTED_PLAYER_TYPES.join(", "),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PlaybackGrant;
    use std::sync::atomic::AtomicU32;

    fn setup_payload() -> PlaybackSetup {
        PlaybackSetup {
            grant: PlaybackGrant {
                content_url: "https://cdn.example.com/manifest.mpd".into(),
                license_url: "https://license.example.com/wv".into(),
                playback_id: 696833473,
                playback_type_id: 3,
            },
            fairplay_certificate_url: "https://certs.example.com/fp".into(),
        }
    }

    #[test]
    fn test_unknown_player_type_fails_fast() {
        let err = create_backend("bitmovin").unwrap_err();
        match err {
            Error::UnknownPlayerType { requested, supported } => {
                assert_eq!(requested, "bitmovin");
                assert!(supported.contains("headless"));
            }
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_dispatcher_routes_by_kind() {
        let dispatcher = EventDispatcher::new();
        let plays = Arc::new(AtomicU32::new(0));
        let pauses = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&plays);
        dispatcher.subscribe(
            PlayerEventKind::Play,
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let counter = Arc::clone(&pauses);
        dispatcher.subscribe(
            PlayerEventKind::Paused,
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        dispatcher.dispatch(&PlayerEvent::Play);
        dispatcher.dispatch(&PlayerEvent::Play);
        dispatcher.dispatch(&PlayerEvent::PlaybackFinished);

        assert_eq!(plays.load(Ordering::SeqCst), 2);
        assert_eq!(pauses.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_headless_setup_and_unload() {
        let backend = HeadlessBackend::new();
        assert!(!backend.is_setup().await);

        backend.setup(&setup_payload()).await.unwrap();
        assert!(backend.is_setup().await);
        assert_eq!(
            backend.last_setup().unwrap().grant.playback_id,
            696833473
        );

        backend.unload().await;
        assert!(!backend.is_setup().await);

        // Once rejected, setup is ignored
        backend.setup(&setup_payload()).await.unwrap();
        assert!(!backend.is_setup().await);
    }
}
