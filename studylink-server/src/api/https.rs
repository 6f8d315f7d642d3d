//! HTTPS enforcement behind a TLS-terminating proxy
//!
//! The server itself speaks plain HTTP; the hosting proxy reports the
//! original scheme in `X-Forwarded-Proto`. Webcam capture in the browser
//! requires a secure origin, so plain-http visitors are redirected.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, Uri},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use tracing::debug;

use crate::AppState;

pub const FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Target URL when the request arrived over plain http, `None` otherwise
pub fn https_target(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    let proto = headers.get(FORWARDED_PROTO)?.to_str().ok()?;
    // A proxy chain may append several values; the first is the client's
    let first = proto.split(',').next()?.trim();
    if !first.eq_ignore_ascii_case("http") {
        return None;
    }

    let host = headers.get(header::HOST)?.to_str().ok()?;
    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    Some(format!("https://{}{}", host, path))
}

/// Redirect middleware, active only when `force_https` is configured
pub async fn redirect_to_https(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if state.force_https {
        if let Some(target) = https_target(request.headers(), request.uri()) {
            debug!(%target, "Redirecting to https");
            return Redirect::permanent(&target).into_response();
        }
    }
    next.run(request).await
}
