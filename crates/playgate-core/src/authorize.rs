//! Authorization orchestrator
//!
//! Drives the startup -> concurrency -> startPlayback handshake to a
//! playback grant, consulting the retry policy on failure:
//! - startup credentials are reused from the session cache when present
//! - the concurrency slot is checked once per attempt, then kept alive by
//!   the heartbeat scheduler
//! - gateway failures re-issue the same startPlayback call; mak rejections
//!   invalidate the cache and redo the whole sequence, each on its own
//!   bounded budget

use crate::{
    cache::SessionStore,
    heartbeat::{HeartbeatScheduler, LimitCallback},
    retry::{decide, RetryBudget, RetryDecision},
    ConcurrencyState, EntitlementApi, Error, Identity, PlaybackGrant, Result, SessionConfig,
    SlotStatus, StartupData,
};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Authorization progress, tracked for logging and observability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Idle,
    FetchingStartup,
    CheckingConcurrency,
    AcquiringGrant,
    Authorized,
    Failed,
}

impl std::fmt::Display for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthState::Idle => write!(f, "idle"),
            AuthState::FetchingStartup => write!(f, "fetching-startup"),
            AuthState::CheckingConcurrency => write!(f, "checking-concurrency"),
            AuthState::AcquiringGrant => write!(f, "acquiring-grant"),
            AuthState::Authorized => write!(f, "authorized"),
            AuthState::Failed => write!(f, "failed"),
        }
    }
}

/// Top-level state machine producing playback grants
pub struct Orchestrator {
    api: Arc<dyn EntitlementApi>,
    store: Arc<dyn SessionStore>,
    identity: Identity,
    max_gateway_retries: u32,
    max_mak_retries: u32,
    /// Shared with the heartbeat scheduler; last write wins, terminal on
    /// limit-reached
    concurrency: Arc<RwLock<ConcurrencyState>>,
    heartbeat: Arc<HeartbeatScheduler>,
    on_limit: LimitCallback,
    state: RwLock<AuthState>,
}

impl Orchestrator {
    pub fn new(
        api: Arc<dyn EntitlementApi>,
        store: Arc<dyn SessionStore>,
        config: &SessionConfig,
        concurrency: Arc<RwLock<ConcurrencyState>>,
        heartbeat: Arc<HeartbeatScheduler>,
        on_limit: LimitCallback,
    ) -> Self {
        Self {
            api,
            store,
            identity: config.identity.clone(),
            max_gateway_retries: config.max_gateway_retries,
            max_mak_retries: config.max_mak_retries,
            concurrency,
            heartbeat,
            on_limit,
            state: RwLock::new(AuthState::Idle),
        }
    }

    pub async fn state(&self) -> AuthState {
        *self.state.read().await
    }

    async fn set_state(&self, next: AuthState) {
        let mut state = self.state.write().await;
        if *state != next {
            info!(from = %*state, to = %next, "Authorization state");
            *state = next;
        }
    }

    /// Runs the full authorization sequence for one piece of content.
    ///
    /// Re-entrant through the retry loop only; callers serialize invocations
    /// per session.
    pub async fn authorize(
        &self,
        playback_type_id: u32,
        playback_id: i64,
    ) -> Result<PlaybackGrant> {
        let mut budget = RetryBudget::new(self.max_gateway_retries, self.max_mak_retries);

        loop {
            let startup = match self.fetch_startup().await {
                Ok(startup) => startup,
                Err(err) => return self.fail(err).await,
            };

            if let Err(err) = self.check_concurrency(&startup).await {
                return self.fail(err).await;
            }

            self.set_state(AuthState::AcquiringGrant).await;
            let renewal = self.store.renewal(&self.identity)?;
            match self
                .api
                .start_playback(playback_type_id, playback_id, &startup, renewal.as_ref())
                .await
            {
                Ok((grant, fresh_renewal)) => {
                    if let Some(renewal) = fresh_renewal {
                        debug!("Keeping startPlayback rights data for future renewals");
                        self.store.put_renewal(&self.identity, &renewal)?;
                    }
                    self.set_state(AuthState::Authorized).await;
                    return Ok(grant);
                }
                Err(err) => {
                    warn!(code = err.error_code(), error = %err, "startPlayback failed");
                    match decide(&err, &mut budget) {
                        RetryDecision::RetryStartPlayback => {
                            debug!(
                                remaining = budget.gateway.remaining(),
                                "Retrying startPlayback after gateway failure"
                            );
                        }
                        RetryDecision::RetryFromStartup => {
                            debug!(
                                remaining = budget.mak.remaining(),
                                "Retrying from startup to generate a new mak"
                            );
                            self.store.invalidate(&self.identity)?;
                        }
                        RetryDecision::Fail => return self.fail(err).await,
                    }
                }
            }
        }
    }

    async fn fail(&self, err: Error) -> Result<PlaybackGrant> {
        self.set_state(AuthState::Failed).await;
        Err(err)
    }

    /// Reuses cached startup credentials, or calls out for fresh ones.
    ///
    /// A cache miss also drops any renewal record: it would otherwise
    /// outlive the mak it was issued under.
    async fn fetch_startup(&self) -> Result<StartupData> {
        self.set_state(AuthState::FetchingStartup).await;

        if let Some(data) = self.store.startup(&self.identity)? {
            debug!("Reusing previous mak from cache");
            return Ok(data);
        }

        self.store.invalidate(&self.identity)?;
        let data = self.api.startup().await?;
        self.store.put_startup(&self.identity, &data)?;
        Ok(data)
    }

    /// Resolves the concurrency slot when still unknown for this attempt and
    /// keeps it alive via the heartbeat scheduler.
    async fn check_concurrency(&self, startup: &StartupData) -> Result<()> {
        if *self.concurrency.read().await == ConcurrencyState::Unknown {
            self.set_state(AuthState::CheckingConcurrency).await;
            match self.api.acquire_slot().await {
                Ok(SlotStatus::LimitReached) => {
                    *self.concurrency.write().await = ConcurrencyState::LimitReached;
                }
                Ok(SlotStatus::Granted) => {
                    let mut state = self.concurrency.write().await;
                    if *state != ConcurrencyState::LimitReached {
                        *state = ConcurrencyState::Granted;
                    }
                }
                // The state stays unknown and is rechecked on a later attempt
                Err(err) => {
                    warn!(error = %err, "Concurrency call failed; disregarding to allow playback");
                }
            }
        }

        if *self.concurrency.read().await == ConcurrencyState::LimitReached {
            return Err(Error::ConcurrencyLimit);
        }

        self.heartbeat
            .start(startup.heartbeat_interval_ms, Arc::clone(&self.on_limit));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryStore, SessionStore};
    use crate::test_support::{sample_grant, sample_renewal, sample_startup, ScriptedApi};

    fn config() -> SessionConfig {
        SessionConfig::new(Identity {
            user_token: "tok".into(),
            device_name: "webClient".into(),
            ip: "10.0.0.1".into(),
            unique_id: "dev-42".into(),
        })
    }

    struct Fixture {
        api: Arc<ScriptedApi>,
        store: Arc<MemoryStore>,
        heartbeat: Arc<HeartbeatScheduler>,
        orchestrator: Orchestrator,
    }

    fn fixture_with(config: SessionConfig) -> Fixture {
        let api = Arc::new(ScriptedApi::new());
        let store = Arc::new(MemoryStore::new());
        let concurrency = Arc::new(RwLock::new(ConcurrencyState::Unknown));
        let heartbeat = Arc::new(HeartbeatScheduler::new(
            Arc::clone(&api) as Arc<dyn EntitlementApi>,
            Arc::clone(&concurrency),
        ));
        let orchestrator = Orchestrator::new(
            Arc::clone(&api) as Arc<dyn EntitlementApi>,
            Arc::clone(&store) as Arc<dyn SessionStore>,
            &config,
            concurrency,
            Arc::clone(&heartbeat),
            Arc::new(|| {}),
        );
        Fixture {
            api,
            store,
            heartbeat,
            orchestrator,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(config())
    }

    #[tokio::test]
    async fn test_cold_cache_issues_exactly_one_startup() {
        let fx = fixture();

        let grant = fx.orchestrator.authorize(3, 696833473).await.unwrap();
        assert_eq!(grant.playback_id, 696833473);
        assert_eq!(fx.api.startup_calls(), 1);
        assert_eq!(fx.api.slot_calls(), 1);
        assert_eq!(fx.api.playback_calls(), 1);
        assert_eq!(fx.orchestrator.state().await, AuthState::Authorized);

        // The fresh credentials are cached for the next session
        let cached = fx.store.startup(&config().identity).unwrap().unwrap();
        assert_eq!(cached.mak, "mak-1");
    }

    #[tokio::test]
    async fn test_warm_cache_issues_zero_startups() {
        let fx = fixture();
        fx.store
            .put_startup(&config().identity, &sample_startup("mak-cached"))
            .unwrap();

        fx.orchestrator.authorize(3, 696833473).await.unwrap();

        assert_eq!(fx.api.startup_calls(), 0);
        assert_eq!(fx.api.playback_args()[0].0, "mak-cached");
    }

    #[tokio::test]
    async fn test_gateway_failure_retries_same_call_once() {
        let fx = fixture();
        fx.api.queue_playback(Err(Error::Transport { status: 504 }));
        fx.api.queue_playback(Ok((sample_grant("second-attempt"), None)));

        let grant = fx.orchestrator.authorize(3, 696833473).await.unwrap();

        // The grant comes from the second attempt; the whole sequence was
        // not redone
        assert!(grant.content_url.contains("second-attempt"));
        assert_eq!(fx.api.playback_calls(), 2);
        assert_eq!(fx.api.startup_calls(), 1);
        assert_eq!(fx.api.slot_calls(), 1);
    }

    #[tokio::test]
    async fn test_gateway_budget_exhaustion_surfaces_original_error() {
        let fx = fixture();
        fx.api.queue_playback(Err(Error::Transport { status: 502 }));
        fx.api.queue_playback(Err(Error::Transport { status: 502 }));

        let err = fx.orchestrator.authorize(3, 696833473).await.unwrap_err();

        assert!(matches!(err, Error::Transport { status: 502 }));
        // Default budget of 1 means two calls in total
        assert_eq!(fx.api.playback_calls(), 2);
        assert_eq!(fx.orchestrator.state().await, AuthState::Failed);
    }

    fn mak_rejection() -> Error {
        Error::Entitlement {
            status: 301,
            business_code: Some("AUTH TOKEN MISMATCH".into()),
            message: "The DRM token presented is out of phase".into(),
        }
    }

    #[tokio::test]
    async fn test_mak_rejection_redoes_full_sequence() {
        let fx = fixture();
        fx.store
            .put_startup(&config().identity, &sample_startup("mak-stale"))
            .unwrap();
        fx.store
            .put_renewal(&config().identity, &sample_renewal("pet-stale"))
            .unwrap();
        fx.api.queue_playback(Err(mak_rejection()));
        fx.api.queue_playback(Err(mak_rejection()));
        fx.api
            .queue_playback(Ok((sample_grant("final"), Some(sample_renewal("pet-final")))));

        let grant = fx.orchestrator.authorize(3, 696833473).await.unwrap();
        assert!(grant.content_url.contains("final"));

        // Two rejections, two fresh startups after the stale cached one
        assert_eq!(fx.api.playback_calls(), 3);
        assert_eq!(fx.api.startup_calls(), 2);

        let args = fx.api.playback_args();
        assert_eq!(args[0].0, "mak-stale");
        assert_eq!(args[1].0, "mak-1");
        assert_eq!(args[2].0, "mak-2");
        // Renewal data was invalidated with the mak; the retried calls fell
        // back to the initial GET handshake
        assert!(args[0].1.is_some());
        assert!(args[1].1.is_none());
        assert!(args[2].1.is_none());

        // Caches repopulated from the final successful calls only
        let cached = fx.store.startup(&config().identity).unwrap().unwrap();
        assert_eq!(cached.mak, "mak-2");
        let renewal = fx.store.renewal(&config().identity).unwrap().unwrap();
        assert_eq!(renewal.pet, "pet-final");
    }

    #[tokio::test]
    async fn test_mak_budget_exhaustion() {
        let fx = fixture();
        for _ in 0..4 {
            fx.api.queue_playback(Err(mak_rejection()));
        }

        let err = fx.orchestrator.authorize(3, 696833473).await.unwrap_err();

        assert!(err.is_mak_rejected());
        // Initial attempt plus the default budget of 3
        assert_eq!(fx.api.playback_calls(), 4);
        assert_eq!(fx.api.startup_calls(), 4);
    }

    #[tokio::test]
    async fn test_concurrency_limit_blocks_playback() {
        let fx = fixture();
        fx.api.queue_slot(Ok(SlotStatus::LimitReached));

        let err = fx.orchestrator.authorize(3, 696833473).await.unwrap_err();

        assert!(matches!(err, Error::ConcurrencyLimit));
        // No startPlayback was issued and no heartbeat was started
        assert_eq!(fx.api.playback_calls(), 0);
        assert!(!fx.heartbeat.is_running());
        assert_eq!(fx.orchestrator.state().await, AuthState::Failed);
    }

    #[tokio::test]
    async fn test_concurrency_check_failure_allows_playback() {
        let fx = fixture();
        fx.api.queue_slot(Err(Error::Transport { status: 500 }));

        fx.orchestrator.authorize(3, 696833473).await.unwrap();

        assert_eq!(fx.api.slot_calls(), 1);
        assert_eq!(fx.api.playback_calls(), 1);
    }

    #[tokio::test]
    async fn test_heartbeat_started_after_grant() {
        let fx = fixture();
        fx.orchestrator.authorize(3, 696833473).await.unwrap();
        assert!(fx.heartbeat.is_running());
    }

    #[tokio::test]
    async fn test_renewal_round_trip_shapes_next_call_as_post() {
        let fx = fixture();
        fx.api
            .queue_playback(Ok((sample_grant("first"), Some(sample_renewal("pet-1")))));

        fx.orchestrator.authorize(3, 696833473).await.unwrap();
        fx.orchestrator.authorize(3, 696833473).await.unwrap();

        let args = fx.api.playback_args();
        // First call was the GET handshake, the second carried the persisted
        // renewal payload unchanged
        assert!(args[0].1.is_none());
        let renewal = args[1].1.as_ref().unwrap();
        assert_eq!(renewal.pet, "pet-1");
        assert_eq!(renewal.rights_object, sample_renewal("pet-1").rights_object);
    }

    #[tokio::test]
    async fn test_gateway_retry_does_not_refetch_startup_or_slot() {
        let config = {
            let mut config = config();
            config.max_gateway_retries = 2;
            config
        };
        let fx = fixture_with(config);
        fx.api.queue_playback(Err(Error::Transport { status: 504 }));
        fx.api.queue_playback(Err(Error::Transport { status: 504 }));
        fx.api.queue_playback(Ok((sample_grant("third"), None)));

        let grant = fx.orchestrator.authorize(3, 696833473).await.unwrap();

        assert!(grant.content_url.contains("third"));
        assert_eq!(fx.api.playback_calls(), 3);
        assert_eq!(fx.api.startup_calls(), 1);
        assert_eq!(fx.api.slot_calls(), 1);
    }
}
