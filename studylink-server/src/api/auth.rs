//! Access gate for the lab-only `/private` area
//!
//! HTTP Basic authentication against the single configured credential.
//! No sessions, no expiry, no rate limiting. With no credential configured
//! every request is refused.

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::{debug, warn};

use crate::AppState;

/// Challenge sent with every rejection
pub const CHALLENGE: &str = "Basic realm=\"private\"";

/// Why a request was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    /// No Authorization header
    Missing,
    /// Header present but not a decodable Basic credential
    Malformed,
    /// Credential does not match
    Mismatch,
    /// The server has no credential configured
    Unconfigured,
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let mut response = (StatusCode::UNAUTHORIZED, "Not authenticated").into_response();
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static(CHALLENGE));
        response
    }
}

/// Decode a `Basic <base64(user:pass)>` header value
fn decode_basic(value: &str) -> Option<(String, String)> {
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

/// Check an Authorization header value against the expected credential
pub fn check_basic_auth(
    header_value: Option<&str>,
    expected: Option<(&str, &str)>,
) -> Result<(), GateError> {
    let (expected_user, expected_pass) = expected.ok_or(GateError::Unconfigured)?;
    let value = header_value.ok_or(GateError::Missing)?;
    let (user, pass) = decode_basic(value).ok_or(GateError::Malformed)?;

    if user == expected_user && pass == expected_pass {
        Ok(())
    } else {
        Err(GateError::Mismatch)
    }
}

/// Access gate middleware
///
/// Applied to the `/private` router only.
pub async fn require_basic_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, GateError> {
    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match check_basic_auth(header_value, state.auth.credentials()) {
        Ok(()) => Ok(next.run(request).await),
        Err(GateError::Missing) => {
            debug!(path = %request.uri().path(), "Private request without credentials");
            Err(GateError::Missing)
        }
        Err(e) => {
            warn!(path = %request.uri().path(), reason = ?e, "Private request refused");
            Err(e)
        }
    }
}
