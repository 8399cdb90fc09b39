//! Scripted entitlement API for unit tests
//!
//! Queues per-operation outcomes and records call counts plus the renewal
//! payload each startPlayback call carried.

use crate::{
    EntitlementApi, PlaybackGrant, RenewalData, Result, SlotStatus, StartupData,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

pub(crate) fn sample_startup(mak: &str) -> StartupData {
    StartupData {
        mak: mak.into(),
        country: "US".into(),
        subscriber_id: "sub-1".into(),
        fairplay_certificate_url: "https://certs.example.com/fp".into(),
        heartbeat_interval_ms: 120_000,
    }
}

pub(crate) fn sample_grant(tag: &str) -> PlaybackGrant {
    PlaybackGrant {
        content_url: format!("https://cdn.example.com/{tag}/manifest.mpd"),
        license_url: "https://license.example.com/wv".into(),
        playback_id: 696833473,
        playback_type_id: 3,
    }
}

pub(crate) fn sample_renewal(pet: &str) -> RenewalData {
    RenewalData {
        rights_object: serde_json::json!({"rights": "all"}),
        pet: pet.into(),
    }
}

type PlaybackOutcome = Result<(PlaybackGrant, Option<RenewalData>)>;

#[derive(Default)]
pub(crate) struct ScriptedApi {
    startup_queue: Mutex<VecDeque<Result<StartupData>>>,
    slot_queue: Mutex<VecDeque<Result<SlotStatus>>>,
    playback_queue: Mutex<VecDeque<PlaybackOutcome>>,
    release_queue: Mutex<VecDeque<Result<()>>>,
    always_limit: AtomicBool,
    startup_count: AtomicU32,
    slot_count: AtomicU32,
    release_count: AtomicU32,
    playback_count: AtomicU32,
    /// The renewal payload and mak each startPlayback call carried
    playback_args: Mutex<Vec<(String, Option<RenewalData>)>>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_startup(&self, outcome: Result<StartupData>) {
        self.startup_queue.lock().unwrap().push_back(outcome);
    }

    pub fn queue_slot(&self, outcome: Result<SlotStatus>) {
        self.slot_queue.lock().unwrap().push_back(outcome);
    }

    pub fn queue_playback(&self, outcome: PlaybackOutcome) {
        self.playback_queue.lock().unwrap().push_back(outcome);
    }

    pub fn queue_release(&self, outcome: Result<()>) {
        self.release_queue.lock().unwrap().push_back(outcome);
    }

    /// Every slot call without a queued outcome reports the limit
    pub fn always_limit_reached(&self) {
        self.always_limit.store(true, Ordering::SeqCst);
    }

    pub fn startup_calls(&self) -> u32 {
        self.startup_count.load(Ordering::SeqCst)
    }

    pub fn slot_calls(&self) -> u32 {
        self.slot_count.load(Ordering::SeqCst)
    }

    pub fn release_calls(&self) -> u32 {
        self.release_count.load(Ordering::SeqCst)
    }

    pub fn playback_calls(&self) -> u32 {
        self.playback_count.load(Ordering::SeqCst)
    }

    pub fn playback_args(&self) -> Vec<(String, Option<RenewalData>)> {
        self.playback_args.lock().unwrap().clone()
    }
}

#[async_trait]
impl EntitlementApi for ScriptedApi {
    async fn startup(&self) -> Result<StartupData> {
        let call = self.startup_count.fetch_add(1, Ordering::SeqCst) + 1;
        match self.startup_queue.lock().unwrap().pop_front() {
            Some(outcome) => outcome,
            None => Ok(sample_startup(&format!("mak-{call}"))),
        }
    }

    async fn acquire_slot(&self) -> Result<SlotStatus> {
        self.slot_count.fetch_add(1, Ordering::SeqCst);
        if let Some(outcome) = self.slot_queue.lock().unwrap().pop_front() {
            return outcome;
        }
        if self.always_limit.load(Ordering::SeqCst) {
            return Ok(SlotStatus::LimitReached);
        }
        Ok(SlotStatus::Granted)
    }

    async fn release_slot(&self) -> Result<()> {
        self.release_count.fetch_add(1, Ordering::SeqCst);
        self.release_queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn start_playback(
        &self,
        _playback_type_id: u32,
        _playback_id: i64,
        startup: &StartupData,
        renewal: Option<&RenewalData>,
    ) -> PlaybackOutcome {
        self.playback_count.fetch_add(1, Ordering::SeqCst);
        self.playback_args
            .lock()
            .unwrap()
            .push((startup.mak.clone(), renewal.cloned()));
        match self.playback_queue.lock().unwrap().pop_front() {
            Some(outcome) => outcome,
            None => Ok((sample_grant("default"), None)),
        }
    }
}
