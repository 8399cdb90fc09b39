//! Playgate CLI - Headless Playback Authorization Client
//!
//! Features:
//! - Content metadata lookup
//! - Full playback authorization (startup, concurrency, startPlayback)
//! - Session supervision with concurrency keepalive until interrupted

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use playgate_core::{
    create_backend, ContentClient, EntitlementApi, FileStore, HttpEntitlementClient, Identity,
    PlaybackSession, SessionConfig, SessionStore, DEFAULT_MAX_GATEWAY_RETRIES,
    DEFAULT_MAX_MAK_RETRIES,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use url::Url;

/// Playgate CLI - Playback authorization toolkit
#[derive(Parser)]
#[command(name = "playgate")]
#[command(version)]
#[command(about = "Headless playback authorization client", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Base URL of the credential-injecting proxy
    #[arg(long, default_value = "http://localhost:5000/api")]
    api_base: Url,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct IdentityArgs {
    /// Subscriber authentication token
    #[arg(long)]
    user_token: String,

    /// Device name reported to the entitlement service
    #[arg(long, default_value = "webClient")]
    device_name: String,

    /// Client IP reported to the entitlement service
    #[arg(long)]
    ip: String,

    /// Stable device identifier
    #[arg(long)]
    unique_id: String,
}

impl IdentityArgs {
    fn into_identity(self) -> Identity {
        Identity {
            user_token: self.user_token,
            device_name: self.device_name,
            ip: self.ip,
            unique_id: self.unique_id,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Look up content metadata and playback identifiers
    Metadata {
        /// Content type (movie, episode, ...)
        content_type: String,

        /// Content identifier
        content_id: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Authorize playback and hold the session until interrupted
    Play {
        /// Content type; resolved to playback identifiers via metadata
        #[arg(long, requires = "content_id", conflicts_with = "playback_id")]
        content_type: Option<String>,

        /// Content identifier
        #[arg(long, requires = "content_type")]
        content_id: Option<String>,

        /// Playback identifier, when already known
        #[arg(long, requires = "playback_type_id")]
        playback_id: Option<i64>,

        /// Playback type identifier, when already known
        #[arg(long, requires = "playback_id")]
        playback_type_id: Option<u32>,

        #[command(flatten)]
        identity: IdentityArgs,

        /// Player backend to configure
        #[arg(long, default_value = "headless")]
        player: String,

        /// Directory for cached session credentials
        #[arg(long, default_value = ".playgate-cache")]
        cache_dir: PathBuf,

        /// Network type reported to the entitlement service
        #[arg(long, default_value = "WIFI")]
        network: String,

        /// Content URL type to request
        #[arg(long, default_value = "manifest")]
        content_url_type: String,

        /// Preferred media packages, comma separated
        #[arg(long)]
        preferred_media_pkgs: Option<String>,

        /// Preferred DRM system
        #[arg(long)]
        preferred_drm: Option<String>,

        /// Retries for bad gateway / gateway timeout failures
        #[arg(long, default_value_t = DEFAULT_MAX_GATEWAY_RETRIES)]
        max_gateway_retries: u32,

        /// Full-sequence retries on mak rejection
        #[arg(long, default_value_t = DEFAULT_MAX_MAK_RETRIES)]
        max_mak_retries: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(level).init();

    match cli.command {
        Commands::Metadata {
            content_type,
            content_id,
            json,
        } => {
            let client = ContentClient::new(cli.api_base);
            let metadata = client
                .metadata(&content_type, &content_id)
                .await
                .context("Content metadata lookup failed")?;

            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "playbackId": metadata.playback_id,
                        "playbackTypeId": metadata.playback_type_id,
                        "title": metadata.title,
                        "description": metadata.description,
                    })
                );
            } else {
                println!("Title:            {}", metadata.title.as_deref().unwrap_or("-"));
                println!("Playback id:      {}", metadata.playback_id);
                println!("Playback type id: {}", metadata.playback_type_id);
                if let Some(description) = &metadata.description {
                    println!("Description:      {description}");
                }
            }
        }

        Commands::Play {
            content_type,
            content_id,
            playback_id,
            playback_type_id,
            identity,
            player,
            cache_dir,
            network,
            content_url_type,
            preferred_media_pkgs,
            preferred_drm,
            max_gateway_retries,
            max_mak_retries,
        } => {
            let (playback_type_id, playback_id) = match (content_type, content_id) {
                (Some(content_type), Some(content_id)) => {
                    let client = ContentClient::new(cli.api_base.clone());
                    let metadata = client
                        .metadata(&content_type, &content_id)
                        .await
                        .context("Content metadata lookup failed")?;
                    info!(
                        playback_id = metadata.playback_id,
                        playback_type_id = metadata.playback_type_id,
                        title = metadata.title.as_deref().unwrap_or("-"),
                        "Resolved playback identifiers"
                    );
                    (metadata.playback_type_id, metadata.playback_id)
                }
                _ => {
                    let playback_id = playback_id
                        .context("Either --content-type/--content-id or --playback-id/--playback-type-id is required")?;
                    let playback_type_id = playback_type_id
                        .context("--playback-type-id is required with --playback-id")?;
                    (playback_type_id, playback_id)
                }
            };

            let mut config = SessionConfig::new(identity.into_identity());
            config.network = network;
            config.content_url_type = content_url_type;
            config.preferred_media_pkgs = preferred_media_pkgs;
            config.preferred_drm = preferred_drm;
            config.max_gateway_retries = max_gateway_retries;
            config.max_mak_retries = max_mak_retries;

            let api: Arc<dyn EntitlementApi> = Arc::new(HttpEntitlementClient::new(
                cli.api_base,
                config.clone(),
            ));
            info!(cache_dir = %cache_dir.display(), "Opening session cache");
            let store: Arc<dyn SessionStore> = Arc::new(
                FileStore::new(&cache_dir).context("Failed to open the session cache")?,
            );
            let backend = create_backend(&player)?;

            let session = PlaybackSession::new(config, api, store, backend);
            let grant = session
                .play(playback_type_id, playback_id)
                .await
                .context("Playback authorization failed")?;

            println!("Authorized playback {}", grant.playback_id);
            println!("Content url: {}", grant.content_url);
            println!("License url: {}", grant.license_url);
            println!("Holding the session; press Ctrl-C to stop");

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            session.shutdown().await;
        }
    }

    Ok(())
}
