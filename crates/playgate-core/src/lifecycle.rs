//! Playback lifecycle controller
//!
//! Owns a playback session end to end: authorizes, configures the player
//! backend, tracks play/pause transitions from backend events, and is the
//! sole owner of session teardown. Termination is one-shot: the backend is
//! unloaded at most once, the heartbeat stopped once, and the concurrency
//! slot released once, regardless of how many triggers race in.

use crate::{
    authorize::Orchestrator,
    backend::{PlaybackSetup, PlayerBackend, PlayerEvent, PlayerEventKind},
    cache::SessionStore,
    heartbeat::{HeartbeatScheduler, LimitCallback},
    ConcurrencyState, EntitlementApi, Error, Identity, PlaybackGrant, Result, SessionConfig,
    SessionId,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

/// Playback session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Configuring,
    Playing,
    Paused,
    Terminated,
}

impl LifecycleState {
    /// Whether a transition to `next` is legal. Terminated is absorbing.
    pub fn can_transition_to(&self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Uninitialized, Configuring)
                | (Configuring, Playing)
                | (Configuring, Paused)
                | (Playing, Paused)
                | (Paused, Playing)
                | (Uninitialized | Configuring | Playing | Paused, Terminated)
        )
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Uninitialized => write!(f, "uninitialized"),
            LifecycleState::Configuring => write!(f, "configuring"),
            LifecycleState::Playing => write!(f, "playing"),
            LifecycleState::Paused => write!(f, "paused"),
            LifecycleState::Terminated => write!(f, "terminated"),
        }
    }
}

/// A single playback session: one identity, one backend, one grant
pub struct PlaybackSession {
    id: SessionId,
    identity: Identity,
    api: Arc<dyn EntitlementApi>,
    store: Arc<dyn SessionStore>,
    backend: Arc<dyn PlayerBackend>,
    orchestrator: Orchestrator,
    heartbeat: Arc<HeartbeatScheduler>,
    state: RwLock<LifecycleState>,
    terminated: AtomicBool,
    /// Terminal triggers (backend events, heartbeat limit) funnel in here
    teardown_tx: mpsc::UnboundedSender<String>,
    teardown_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl PlaybackSession {
    pub fn new(
        config: SessionConfig,
        api: Arc<dyn EntitlementApi>,
        store: Arc<dyn SessionStore>,
        backend: Arc<dyn PlayerBackend>,
    ) -> Arc<Self> {
        let concurrency = Arc::new(RwLock::new(ConcurrencyState::Unknown));
        let heartbeat = Arc::new(HeartbeatScheduler::new(
            Arc::clone(&api),
            Arc::clone(&concurrency),
        ));

        let (teardown_tx, teardown_rx) = mpsc::unbounded_channel();
        let on_limit: LimitCallback = {
            let tx = teardown_tx.clone();
            Arc::new(move || {
                let _ = tx.send(Error::ConcurrencyLimit.to_string());
            })
        };

        let orchestrator = Orchestrator::new(
            Arc::clone(&api),
            Arc::clone(&store),
            &config,
            concurrency,
            Arc::clone(&heartbeat),
            on_limit,
        );

        let session = Arc::new(Self {
            id: SessionId::new(),
            identity: config.identity,
            api,
            store,
            backend,
            orchestrator,
            heartbeat,
            state: RwLock::new(LifecycleState::Uninitialized),
            terminated: AtomicBool::new(false),
            teardown_tx,
            teardown_rx: Mutex::new(Some(teardown_rx)),
        });
        session.attach_backend();
        session
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub async fn state(&self) -> LifecycleState {
        *self.state.read().await
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Subscribes to the backend's event stream. Terminal events go through
    /// the teardown channel; play/pause toggle the state machine.
    fn attach_backend(self: &Arc<Self>) {
        let tx = self.teardown_tx.clone();
        self.backend.on_event(
            PlayerEventKind::Error,
            Box::new(move |event| {
                if let PlayerEvent::Error(message) = event {
                    let _ = tx.send(format!("Player error: {message}"));
                }
            }),
        );

        let tx = self.teardown_tx.clone();
        self.backend.on_event(
            PlayerEventKind::PlaybackFinished,
            Box::new(move |_| {
                let _ = tx.send("Playback finished".to_string());
            }),
        );

        let weak = Arc::downgrade(self);
        self.backend.on_event(
            PlayerEventKind::Play,
            Box::new(move |_| {
                if let Some(session) = weak.upgrade() {
                    tokio::spawn(async move { session.on_playback_started().await });
                }
            }),
        );

        let weak = Arc::downgrade(self);
        self.backend.on_event(
            PlayerEventKind::Paused,
            Box::new(move |_| {
                if let Some(session) = weak.upgrade() {
                    tokio::spawn(async move { session.on_playback_paused().await });
                }
            }),
        );
    }

    fn spawn_teardown_listener(self: &Arc<Self>) {
        let receiver = self
            .teardown_rx
            .lock()
            .expect("teardown receiver lock poisoned")
            .take();
        if let Some(mut rx) = receiver {
            let weak = Arc::downgrade(self);
            tokio::spawn(async move {
                while let Some(reason) = rx.recv().await {
                    match weak.upgrade() {
                        Some(session) => session.terminate(&reason).await,
                        None => break,
                    }
                }
            });
        }
    }

    /// Authorizes playback and configures the backend with the grant.
    ///
    /// On failure the error is surfaced to the caller, the session returns
    /// to Uninitialized, and `play` may be invoked again. Callers serialize
    /// `play` invocations per session.
    pub async fn play(
        self: &Arc<Self>,
        playback_type_id: u32,
        playback_id: i64,
    ) -> Result<PlaybackGrant> {
        self.spawn_teardown_listener();
        self.set_state(LifecycleState::Configuring).await?;

        match self.configure(playback_type_id, playback_id).await {
            Ok(grant) => Ok(grant),
            Err(err) => {
                // Make a later play() possible, unless teardown won the race
                let mut state = self.state.write().await;
                if *state == LifecycleState::Configuring {
                    *state = LifecycleState::Uninitialized;
                }
                Err(err)
            }
        }
    }

    async fn configure(&self, playback_type_id: u32, playback_id: i64) -> Result<PlaybackGrant> {
        let grant = self
            .orchestrator
            .authorize(playback_type_id, playback_id)
            .await?;

        let startup = self.store.startup(&self.identity)?.ok_or_else(|| {
            Error::Cache("startup data missing after successful authorization".into())
        })?;
        let setup = PlaybackSetup {
            grant: grant.clone(),
            fairplay_certificate_url: startup.fairplay_certificate_url,
        };
        self.backend.setup(&setup).await?;

        info!(session_id = %self.id, playback_id, "Playback configured");
        Ok(grant)
    }

    async fn on_playback_started(&self) {
        if self.is_terminated() {
            debug!("Ignoring play event on terminated session");
            return;
        }
        let _ = self.set_state(LifecycleState::Playing).await;
    }

    async fn on_playback_paused(&self) {
        if self.is_terminated() {
            debug!("Ignoring pause event on terminated session");
            return;
        }
        let _ = self.set_state(LifecycleState::Paused).await;
    }

    async fn set_state(&self, next: LifecycleState) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.can_transition_to(next) {
            return Err(Error::InvalidStateTransition {
                from: state.to_string(),
                to: next.to_string(),
            });
        }
        info!(from = %*state, to = %next, "Playback state transition");
        *state = next;
        Ok(())
    }

    /// Fully stops the session. Idempotent: callable from backend events,
    /// the heartbeat limit callback, page departure, or the API consumer.
    pub async fn terminate(&self, reason: &str) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            debug!(reason, "Session already terminated");
            return;
        }
        info!(session_id = %self.id, reason, "Terminating playback session");
        *self.state.write().await = LifecycleState::Terminated;

        self.backend.unload().await;
        self.heartbeat.stop(reason);

        // Best effort: the server auto-expires idle slots
        if let Err(err) = self.api.release_slot().await {
            warn!(error = %err, "Concurrency DELETE failed; the slot will auto-expire server-side");
        }
    }

    /// Page-departure equivalent: awaited so the release call gets its
    /// chance to go out before the process unwinds.
    pub async fn shutdown(&self) {
        self.terminate("Player unloaded, leaving page").await;
    }
}
