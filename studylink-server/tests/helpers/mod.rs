//! Shared test harness for studylink-server integration tests
//!
//! Builds the full router around an in-memory snapshot store and temporary
//! static directories. Participant sockets are simulated with the same
//! registration path the WebSocket handler uses.

#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request},
    response::Response,
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::Value;
use studylink_common::config::Config;
use studylink_common::{Identifier, ServerMessage};
use studylink_server::api::ws::handle_client_text;
use studylink_server::persistence::{MemoryStore, PersistOutcome, PersistenceGateway};
use studylink_server::{build_router, AppState};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::util::ServiceExt;
use uuid::Uuid;

pub const LAB_USER: &str = "lab";
pub const LAB_PASS: &str = "s3cret";

/// One isolated server instance
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub persisted: mpsc::UnboundedReceiver<PersistOutcome>,
    _public: TempDir,
    _private: TempDir,
}

impl TestApp {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    /// Start with a config adjusted by `tweak`
    pub async fn start_with(tweak: impl FnOnce(&mut Config)) -> Self {
        let public = tempfile::tempdir().expect("public dir");
        let private = tempfile::tempdir().expect("private dir");
        std::fs::write(public.path().join("index.html"), "<h1>participant</h1>").unwrap();
        std::fs::write(private.path().join("server_index.html"), "<h1>recorder</h1>").unwrap();

        let mut config = Config::default();
        config.public_dir = public.path().to_path_buf();
        config.private_dir = private.path().to_path_buf();
        config.auth.username = Some(LAB_USER.to_string());
        config.auth.password = Some(LAB_PASS.to_string());
        tweak(&mut config);

        let store = Arc::new(MemoryStore::new());
        let (tx, persisted) = mpsc::unbounded_channel();
        let persistence = PersistenceGateway::start(store.clone(), Some(tx));
        let state = AppState::new(
            &config,
            Identifier::new(Uuid::NAMESPACE_URL),
            persistence,
        );

        TestApp {
            router: build_router(state.clone()),
            state,
            store,
            persisted,
            _public: public,
            _private: private,
        }
    }

    pub async fn request(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.expect("router is infallible")
    }

    /// Open a simulated participant socket and register `name` on it
    ///
    /// Returns the assigned identifier and the socket's outbound queue,
    /// with the `uuid` message already consumed.
    pub async fn connect(&self, name: &str) -> (Uuid, mpsc::UnboundedReceiver<ServerMessage>) {
        let (handle, mut rx) = self.state.registry.open_connection();
        let frame = serde_json::json!({"event": "register_user", "data": {"name": name}});
        let id = handle_client_text(&self.state, &handle, &frame.to_string())
            .await
            .expect("registration accepted");

        match rx.recv().await {
            Some(ServerMessage::Uuid(assigned)) => assert_eq!(assigned, id),
            other => panic!("expected uuid message, got {:?}", other),
        }
        (id, rx)
    }
}

pub fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn post_form(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap()
}

pub fn get_with_basic(uri: &str, user: &str, pass: &str) -> Request<Body> {
    let credential = STANDARD.encode(format!("{}:{}", user, pass));
    Request::builder()
        .method("GET")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Basic {}", credential))
        .body(Body::empty())
        .unwrap()
}

pub fn stage(location: &str, video: &str, id: &Uuid) -> Request<Body> {
    post_json(
        "/qualtrics",
        serde_json::json!({"location": location, "video_name": video, "uuid": id.to_string()}),
    )
}

pub async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Should read body");
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

pub async fn body_json(response: Response) -> Value {
    serde_json::from_str(&body_text(response).await).expect("Should parse JSON")
}
