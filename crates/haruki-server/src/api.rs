use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    http::Method,
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use haruki_client::{build_http_client, GameProxy, SekaiApiClient};
use haruki_shared::constants::{
    CHUNK_TTL_SECS, GAME_API_TIMEOUT_SECS, PUBLIC_CACHE_TTL_SECS, SINK_TIMEOUT_SECS,
};
use haruki_shared::{CompactSchema, SekaiCodec};
use haruki_store::Database;

use crate::cache::ResponseCache;
use crate::chunks::ChunkAssembler;
use crate::config::Config;
use crate::sync::ThirdPartySyncer;
use crate::webhook::{self, WebhookDispatcher};
use crate::{ios, public, upload};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Arc<Mutex<Database>>,
    pub codec: Arc<SekaiCodec>,
    pub schema: Arc<CompactSchema>,
    pub cache: ResponseCache,
    pub chunks: ChunkAssembler,
    pub syncer: ThirdPartySyncer,
    pub webhooks: WebhookDispatcher,
    /// Account-existence check; `None` when no endpoint is configured.
    pub sekai_api: Option<SekaiApiClient>,
    pub game_proxy: GameProxy,
}

impl AppState {
    /// Wires the shared services from a loaded configuration.
    pub fn new(config: Config, db: Database, schema: CompactSchema) -> anyhow::Result<Self> {
        let sekai = &config.sekai_client;
        let codec = sekai.codec().context("invalid sekai_client AES keys")?;

        let game_http = build_http_client(
            Duration::from_secs(GAME_API_TIMEOUT_SECS),
            sekai.proxy.as_deref().filter(|p| !p.is_empty()),
        )?;
        let sink_http = build_http_client(Duration::from_secs(SINK_TIMEOUT_SECS), None)?;

        let sekai_api = if sekai.sekai_api_endpoint.is_empty() {
            None
        } else {
            Some(SekaiApiClient::new(
                game_http.clone(),
                sekai.sekai_api_endpoint.as_str(),
                sekai.sekai_api_token.as_str(),
            ))
        };

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            codec: Arc::new(codec),
            schema: Arc::new(schema),
            cache: ResponseCache::new(Duration::from_secs(PUBLIC_CACHE_TTL_SECS)),
            chunks: ChunkAssembler::new(Duration::from_secs(CHUNK_TTL_SECS)),
            syncer: ThirdPartySyncer::new(sink_http.clone(), Arc::new(config.third_party.clone())),
            webhooks: WebhookDispatcher::new(sink_http),
            sekai_api,
            game_proxy: GameProxy::new(game_http, sekai.primary_hosts()),
            config: Arc::new(config),
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    let uploads = Router::new()
        .route("/manual/:server/:user_id/:data_type/upload", post(upload::manual_upload))
        .route(
            "/harukiproxy/:server/:user_id/:data_type/upload",
            post(upload::haruki_proxy_upload),
        )
        .route("/inherit/:server/:upload_type/submit", post(upload::inherit_submit))
        .route("/ios/script/upload", post(upload::ios_chunk_upload))
        .route("/ios/script/:upload_code/upload", post(upload::ios_chunk_upload))
        .route(
            "/ios/proxy/:server/*path",
            get(upload::ios_proxy).post(upload::ios_proxy),
        );

    Router::new()
        .route("/health", get(health_check))
        .route("/public/:server/:data_type/:user_id", get(public::public_read))
        .route("/private/:server/:data_type/:user_id", get(public::private_read))
        .route(
            "/api/user/:toolbox_user_id/game-data/:server/:data_type/:user_id",
            get(public::user_read),
        )
        .route(
            "/api/oauth2/game-data/:server/:data_type/:user_id",
            get(public::oauth_read),
        )
        .route("/ios/module/:upload_code/:file_name", get(ios::module_handler))
        .route("/ios/script/:upload_code/haruki-toolbox.js", get(ios::script_handler))
        .route("/webhook/subscribers", get(webhook::list_subscribers))
        .route(
            "/webhook/:server/:data_type/:user_id",
            put(webhook::subscribe).delete(webhook::unsubscribe),
        )
        .merge(uploads)
        .layer(DefaultBodyLimit::max(state.config.backend.body_limit_bytes()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
