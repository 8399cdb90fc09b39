//! Core types for Playgate

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Heartbeat interval used when the startup response does not provide one
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 120_000; // 2 minutes

/// Default number of retries for bad gateway / gateway timeout failures
pub const DEFAULT_MAX_GATEWAY_RETRIES: u32 = 1;

/// Default number of full startup-to-startPlayback retries on mak rejection
pub const DEFAULT_MAX_MAK_RETRIES: u32 = 3;

/// Unique identifier for a playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client identity attached to every entitlement call.
///
/// Immutable for the life of a session; also forms the session-cache key, so
/// two different identities never share cached credentials.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub user_token: String,
    pub device_name: String,
    pub ip: String,
    pub unique_id: String,
}

impl Identity {
    /// Cache key in the form `"{prefix}-{userToken}|{deviceName}|{ip}|{uniqueId}"`
    pub fn cache_key(&self, prefix: &str) -> String {
        format!(
            "{prefix}-{}|{}|{}|{}",
            self.user_token, self.device_name, self.ip, self.unique_id
        )
    }
}

/// Credentials obtained from a successful startup call.
///
/// Cached per identity and reused across sessions until the service rejects
/// the mak (status 301/519 on startPlayback), at which point it is
/// invalidated together with any renewal data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartupData {
    /// Media access key required by every playback authorization
    pub mak: String,
    pub country: String,
    pub subscriber_id: String,
    #[serde(rename = "fairPlayCertificateURL")]
    pub fairplay_certificate_url: String,
    /// How often the concurrency slot must be renewed
    pub heartbeat_interval_ms: u64,
}

/// Rights payload returned by the first successful startPlayback call.
///
/// When present, subsequent startPlayback calls switch from the initial GET
/// handshake to a POST carrying this payload verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewalData {
    pub rights_object: serde_json::Value,
    pub pet: String,
}

/// Playback grant returned by a successful startPlayback call.
///
/// Consumed exactly once to configure the player backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackGrant {
    pub content_url: String,
    pub license_url: String,
    pub playback_id: i64,
    pub playback_type_id: u32,
}

/// Concurrency slot status for the current authorization attempt.
///
/// Starts unknown, resolves on the first concurrency call, and is terminal
/// once the limit is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConcurrencyState {
    Unknown,
    Granted,
    LimitReached,
}

impl std::fmt::Display for ConcurrencyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConcurrencyState::Unknown => write!(f, "unknown"),
            ConcurrencyState::Granted => write!(f, "granted"),
            ConcurrencyState::LimitReached => write!(f, "limit-reached"),
        }
    }
}

/// Per-session playback settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub identity: Identity,
    /// Network type reported to the entitlement service
    pub network: String,
    pub content_url_type: String,
    pub preferred_media_pkgs: Option<String>,
    pub preferred_drm: Option<String>,
    pub max_gateway_retries: u32,
    pub max_mak_retries: u32,
}

impl SessionConfig {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            network: "WIFI".to_string(),
            content_url_type: "manifest".to_string(),
            preferred_media_pkgs: None,
            preferred_drm: None,
            max_gateway_retries: DEFAULT_MAX_GATEWAY_RETRIES,
            max_mak_retries: DEFAULT_MAX_MAK_RETRIES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Identity {
        Identity {
            user_token: "tok".into(),
            device_name: "webClient".into(),
            ip: "10.0.0.1".into(),
            unique_id: "dev-42".into(),
        }
    }

    #[test]
    fn test_cache_key_format() {
        assert_eq!(
            identity().cache_key("startup"),
            "startup-tok|webClient|10.0.0.1|dev-42"
        );
        assert_eq!(
            identity().cache_key("startplayback"),
            "startplayback-tok|webClient|10.0.0.1|dev-42"
        );
    }

    #[test]
    fn test_startup_data_wire_names() {
        let data = StartupData {
            mak: "mak-1".into(),
            country: "US".into(),
            subscriber_id: "sub-1".into(),
            fairplay_certificate_url: "https://certs.example.com/fp".into(),
            heartbeat_interval_ms: 120_000,
        };

        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["subscriberId"], "sub-1");
        assert_eq!(json["fairPlayCertificateURL"], "https://certs.example.com/fp");
        assert_eq!(json["heartbeatIntervalMs"], 120_000);
    }

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::new(identity());
        assert_eq!(config.network, "WIFI");
        assert_eq!(config.content_url_type, "manifest");
        assert_eq!(config.max_gateway_retries, 1);
        assert_eq!(config.max_mak_retries, 3);
    }
}
