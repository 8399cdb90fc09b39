//! Entitlement service client
//!
//! Stateless request builders/callers for the remote operations behind the
//! credential-injecting proxy:
//! - startup (session credentials)
//! - concurrency slot acquire/release
//! - startPlayback (playback grant)
//!
//! No retry logic lives here; failures are classified by the retry policy in
//! the orchestrator.

use crate::{
    Error, Identity, PlaybackGrant, RenewalData, Result, SessionConfig, StartupData,
    DEFAULT_HEARTBEAT_INTERVAL_MS,
};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

/// Outcome of a concurrency slot call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Granted,
    /// The account has no free streaming slot for this device
    LimitReached,
}

/// The remote entitlement operations the orchestrator depends on
#[async_trait]
pub trait EntitlementApi: Send + Sync {
    /// Obtains fresh startup credentials (mak) for the session identity
    async fn startup(&self) -> Result<StartupData>;

    /// Acquires or renews the concurrency slot for this device.
    ///
    /// A slot-limit rejection arrives as a 2xx response carrying a business
    /// error, so it is reported as a successful call with
    /// [`SlotStatus::LimitReached`], never as an `Err`.
    async fn acquire_slot(&self) -> Result<SlotStatus>;

    /// Frees the concurrency slot; the server auto-expires idle slots, so
    /// callers treat failures as non-fatal.
    async fn release_slot(&self) -> Result<()>;

    /// Requests a playback grant. Uses the initial GET handshake when no
    /// renewal data exists, otherwise a POST carrying `{rightsObject, pet}`.
    ///
    /// Returns the grant plus renewal data to persist when this was a first
    /// (GET) call and the response included it.
    async fn start_playback(
        &self,
        playback_type_id: u32,
        playback_id: i64,
        startup: &StartupData,
        renewal: Option<&RenewalData>,
    ) -> Result<(PlaybackGrant, Option<RenewalData>)>;
}

#[derive(Debug, Deserialize)]
struct StartupResponse {
    mak: String,
    country: String,
    #[serde(rename = "subscriberId")]
    subscriber_id: String,
    #[serde(rename = "fairPlayCertificateURL")]
    fairplay_certificate_url: String,
    #[serde(rename = "heartbeatfreqms")]
    heartbeat_freq_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
struct ConcurrencyRequest {
    #[serde(rename = "deviceId")]
    device_id: String,
    /// JSON-encoded string, not a nested object
    properties: String,
}

#[derive(Debug, Default, Deserialize)]
struct ConcurrencyResponse {
    header: Option<ConcurrencyHeader>,
}

#[derive(Debug, Deserialize)]
struct ConcurrencyHeader {
    code: String,
    #[serde(default)]
    errors: Vec<ConcurrencyError>,
}

#[derive(Debug, Deserialize)]
struct ConcurrencyError {
    code: String,
}

#[derive(Debug, Deserialize)]
struct PlaybackResponse {
    #[serde(rename = "contentUrl")]
    content_url: String,
    #[serde(rename = "licenseUrl")]
    license_url: String,
    #[serde(rename = "playbackId")]
    playback_id: Option<i64>,
    #[serde(rename = "playbackTypeId")]
    playback_type_id: Option<u32>,
    #[serde(rename = "rightsObject")]
    rights_object: Option<serde_json::Value>,
    pet: Option<String>,
}

/// Structured error body the service returns on rejections
#[derive(Debug, Deserialize)]
struct ErrorBody {
    status: Option<u16>,
    code: Option<String>,
    message: Option<String>,
    description: Option<String>,
}

/// HTTP implementation of [`EntitlementApi`] against the proxy base URL
pub struct HttpEntitlementClient {
    http: Client,
    base: Url,
    config: SessionConfig,
}

impl HttpEntitlementClient {
    pub fn new(base: Url, config: SessionConfig) -> Self {
        Self {
            http: Client::new(),
            base,
            config,
        }
    }

    pub fn with_client(http: Client, base: Url, config: SessionConfig) -> Self {
        Self { http, base, config }
    }

    fn identity(&self) -> &Identity {
        &self.config.identity
    }

    fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        let joined = format!("{}/{}", url.path().trim_end_matches('/'), path);
        url.set_path(&joined);
        url
    }
}

/// Maps a non-2xx response into the error taxonomy: gateway failures are
/// classified on the HTTP status line alone, then a parseable service error
/// body becomes [`Error::Entitlement`], anything else a transport failure
/// carrying the HTTP status.
fn classify_failure(http_status: u16, body: &str) -> Error {
    // A proxy may attach any body to a 502/504; the status line decides
    if matches!(http_status, 502 | 504) {
        return Error::Transport { status: http_status };
    }
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(status) = parsed.status {
            let message = parsed
                .message
                .or(parsed.description)
                .unwrap_or_else(|| body.to_string());
            return Error::Entitlement {
                status,
                business_code: parsed.code,
                message,
            };
        }
    }
    Error::Transport { status: http_status }
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify_failure(status.as_u16(), &body))
}

/// The slot limit is signalled only by this exact shape: `header.code` of
/// `"-1"` with a first nested error code `"40008"`. Anything else allows
/// playback.
fn slot_limit_reached(response: &ConcurrencyResponse) -> bool {
    response.header.as_ref().is_some_and(|header| {
        header.code == "-1" && header.errors.first().is_some_and(|e| e.code == "40008")
    })
}

#[async_trait]
impl EntitlementApi for HttpEntitlementClient {
    async fn startup(&self) -> Result<StartupData> {
        let identity = self.identity();
        let mut url = self.endpoint("auth/startup");
        url.query_pairs_mut()
            .append_pair("deviceName", &identity.device_name)
            .append_pair("userToken", &identity.user_token)
            .append_pair("ip", &identity.ip)
            .append_pair("uniqueId", &identity.unique_id);

        let response = check(self.http.get(url).send().await?).await?;
        let body: StartupResponse = response.json().await?;

        info!(country = %body.country, "Got new mak from startup");
        Ok(StartupData {
            mak: body.mak,
            country: body.country,
            subscriber_id: body.subscriber_id,
            fairplay_certificate_url: body.fairplay_certificate_url,
            heartbeat_interval_ms: body.heartbeat_freq_ms.unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_MS),
        })
    }

    async fn acquire_slot(&self) -> Result<SlotStatus> {
        let identity = self.identity();
        debug!("Calling concurrency to keep our slot");

        let mut url = self.endpoint("concurrency/streams");
        url.query_pairs_mut()
            .append_pair("userToken", &identity.user_token)
            .append_pair("uniqueId", &identity.unique_id);

        let properties = serde_json::to_string(&serde_json::json!({
            "userAgent": format!("playgate-core/{}", crate::VERSION),
            "timestamp": Utc::now().timestamp_millis(),
        }))?;
        let request = ConcurrencyRequest {
            device_id: identity.unique_id.clone(),
            properties,
        };

        let response = check(self.http.put(url).json(&request).send().await?).await?;

        // Limit detection lives in the success path: the service answers 2xx
        // for this condition. An unparseable body allows playback.
        let parsed: ConcurrencyResponse = response.json().await.unwrap_or_default();
        if slot_limit_reached(&parsed) {
            warn!("Concurrency stream revoked (no available slots)");
            return Ok(SlotStatus::LimitReached);
        }
        Ok(SlotStatus::Granted)
    }

    async fn release_slot(&self) -> Result<()> {
        let identity = self.identity();
        debug!("Calling concurrency stream DELETE to free the slot");

        let mut url = self.endpoint("concurrency/streams");
        url.query_pairs_mut()
            .append_pair("userToken", &identity.user_token)
            .append_pair("uniqueId", &identity.unique_id);

        check(self.http.delete(url).send().await?).await?;
        Ok(())
    }

    async fn start_playback(
        &self,
        playback_type_id: u32,
        playback_id: i64,
        startup: &StartupData,
        renewal: Option<&RenewalData>,
    ) -> Result<(PlaybackGrant, Option<RenewalData>)> {
        let identity = self.identity();
        let mut url = self.endpoint("auth/startPlayback");
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("mak", &startup.mak)
                .append_pair("subscriberId", &startup.subscriber_id)
                .append_pair("country", &startup.country)
                .append_pair("contentId", &playback_id.to_string())
                .append_pair("contentTypeId", &playback_type_id.to_string())
                .append_pair("deviceName", &identity.device_name)
                .append_pair("ip", &identity.ip)
                .append_pair("network", &self.config.network)
                .append_pair("uniqueId", &identity.unique_id)
                .append_pair("userToken", &identity.user_token)
                .append_pair("contentUrlType", &self.config.content_url_type);
            if let Some(pkgs) = &self.config.preferred_media_pkgs {
                query.append_pair("preferredMediaPkgs", pkgs);
            }
            if let Some(drm) = &self.config.preferred_drm {
                query.append_pair("preferredDRM", drm);
            }
        }

        let request: RequestBuilder = match renewal {
            Some(data) => {
                debug!("Reusing previous startPlayback rights data, sending POST");
                self.http.post(url).json(data)
            }
            None => {
                debug!("Initial GET to startPlayback");
                self.http.get(url)
            }
        };

        let response = check(request.send().await?).await?;
        let body: PlaybackResponse = response.json().await?;

        // Renewal data is captured only from a first (GET) handshake
        let fresh_renewal = if renewal.is_none() {
            match (body.rights_object, body.pet) {
                (Some(rights_object), Some(pet)) => Some(RenewalData { rights_object, pet }),
                _ => None,
            }
        } else {
            None
        };

        let grant = PlaybackGrant {
            content_url: body.content_url,
            license_url: body.license_url,
            playback_id: body.playback_id.unwrap_or(playback_id),
            playback_type_id: body.playback_type_id.unwrap_or(playback_type_id),
        };
        Ok((grant, fresh_renewal))
    }
}
