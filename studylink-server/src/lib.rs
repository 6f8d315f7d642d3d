//! studylink-server library
//!
//! Coordinates a webcam study session: participants register over a
//! WebSocket, the survey platform reports stage transitions over HTTP, and
//! each first-occurrence stage is relayed back to the participant's browser
//! and persisted as a per-participant snapshot.

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use studylink_common::config::{AuthConfig, Config};
use studylink_common::Identifier;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod monitor;
pub mod persistence;
pub mod registry;
pub mod relay;

use monitor::MonitorBroadcaster;
use persistence::PersistenceGateway;
use registry::ParticipantRegistry;
use relay::Coordinator;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ParticipantRegistry>,
    pub coordinator: Arc<Coordinator>,
    pub monitor: MonitorBroadcaster,
    /// Credential for the `/private` area
    pub auth: Arc<AuthConfig>,
    pub force_https: bool,
    pub public_dir: PathBuf,
    pub private_dir: PathBuf,
}

impl AppState {
    /// Wire up a fresh registry, coordinator and monitor feed
    pub fn new(config: &Config, identifier: Identifier, persistence: PersistenceGateway) -> Self {
        let registry = Arc::new(ParticipantRegistry::new(identifier));
        let monitor = MonitorBroadcaster::default();
        let coordinator = Arc::new(Coordinator::new(
            Arc::clone(&registry),
            persistence,
            monitor.clone(),
        ));

        Self {
            registry,
            coordinator,
            monitor,
            auth: Arc::new(config.auth.clone()),
            force_https: config.force_https,
            public_dir: config.public_dir.clone(),
            private_dir: config.private_dir.clone(),
        }
    }
}

/// Build application router
///
/// Everything under `/private` sits behind the access gate; all other
/// paths fall through to the public static files.
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;
    use axum::routing::{get, post};

    let private = Router::new()
        .route("/events", get(api::monitor_events))
        .fallback_service(ServeDir::new(&state.private_dir))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::require_basic_auth,
        ));

    let public = Router::new()
        .route("/ws", get(api::ws_handler))
        .route("/get_uuid", post(api::get_uuid))
        .route("/qualtrics", post(api::notify_stage))
        .merge(api::health_routes());

    Router::new()
        .merge(public)
        .nest("/private", private)
        .fallback_service(ServeDir::new(&state.public_dir))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::redirect_to_https,
        ))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
