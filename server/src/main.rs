use std::{net::SocketAddr, sync::Arc};

use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::GlobalKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};

use server::config::ServerConfig;
use server::{router, AppState};
use speech_provider::OpenAiSpeechClient;
use tts_core::{AudioCache, InMemorySettingsStore, SpeechService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    async_main().await
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let methods = [
        axum::http::Method::GET,
        axum::http::Method::POST,
        axum::http::Method::DELETE,
        axum::http::Method::OPTIONS,
    ];
    let permissive = || {
        CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(methods.clone())
            .allow_headers(tower_http::cors::Any)
            .expose_headers(tower_http::cors::Any)
    };

    let Some(ref allowed_origins) = config.cors_allowed_origins else {
        warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (development mode)");
        return permissive();
    };

    let origins: Vec<axum::http::HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    if origins.is_empty() {
        warn!("CORS_ALLOWED_ORIGINS has no valid origin, falling back to permissive CORS");
        return permissive();
    }

    info!("CORS configured for {} origin(s)", origins.len());
    CorsLayer::new()
        .allow_origin(tower_http::cors::AllowOrigin::list(origins))
        .allow_methods(methods)
        .allow_headers(tower_http::cors::Any)
        .expose_headers(tower_http::cors::Any)
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting speech server...");

    let config = ServerConfig::from_env();
    if config.system_api_key.is_none() {
        warn!("OPENAI_API_KEY not set, only tenants with their own key can synthesize");
    }

    let synthesizer = OpenAiSpeechClient::new(&config.provider_base_url)?;
    let cache = Arc::new(AudioCache::new(config.audio_cache_max_entries));
    let speech = SpeechService::new(
        cache,
        Arc::new(InMemorySettingsStore::new()),
        Arc::new(synthesizer),
    )
    .with_system_key(config.system_api_key.clone())
    .with_provider_timeout(config.provider_timeout());

    info!(
        "Server configuration loaded: port={}, rate_limit={}/min, provider_timeout={}s, audio_cache_max_entries={}",
        config.port,
        config.rate_limit_per_minute,
        config.provider_timeout_secs,
        config.audio_cache_max_entries
    );

    // Global key: every client shares one budget, which behaves well behind
    // proxies where the peer address is the proxy's.
    let replenish_ms = (60_000 / u64::from(config.rate_limit_per_minute.max(1))).max(1);
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(replenish_ms)
            .burst_size(config.rate_limit_per_minute.max(1))
            .key_extractor(GlobalKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid rate limit configuration"))?,
    );
    info!("Rate limiting: {} requests per minute", config.rate_limit_per_minute);

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(GovernorLayer::new(governor_conf))
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(cors_layer(&config))
        .into_inner();

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    let app = router(AppState::new(speech, config)).layer(middleware_stack);

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT."))?;

    info!("Server listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
