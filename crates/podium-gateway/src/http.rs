//! HTTP edge.
//!
//! Terminates HTTP, extracts the tenant frontend key and resource from the
//! path (`/bbb/<frontend_key>/<resource>`), parses query parameters into
//! the ordered map used by the signer, and writes the gateway's response
//! verbatim.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State};
use axum::http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tracing::debug;

use podium_core::bbb::Params;

use crate::gateway::{Gateway, GatewayRequest, GatewayResponse};

/// Shared edge state.
#[derive(Clone)]
pub struct EdgeState {
    pub gateway: Arc<Gateway>,
    /// Trust `X-Forwarded-For` for client addresses.
    pub reverse_proxy: bool,
}

/// Build the edge router.
pub fn build_router(state: EdgeState) -> axum::Router {
    axum::Router::new()
        .route(
            "/bbb/{frontend_key}/{resource}",
            get(api_handler).post(api_handler),
        )
        .route("/health", get(health_handler))
        .with_state(state)
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn api_handler(
    State(state): State<EdgeState>,
    Path((frontend_key, resource)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let params = parse_params(query.as_deref().unwrap_or(""));
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);

    let client_addr = if state.reverse_proxy {
        headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(',').next().unwrap_or(v).trim().to_string())
    } else {
        None
    };

    debug!(frontend = %frontend_key, resource = %resource, "incoming request");

    let req = GatewayRequest {
        frontend_key,
        resource,
        params,
        body: if body.is_empty() {
            None
        } else {
            Some(body.to_vec())
        },
        content_type,
        client_addr,
    };

    write_response(state.gateway.dispatch(req).await)
}

/// Decode a raw query string into the ordered parameter map.
fn parse_params(query: &str) -> Params {
    url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

fn write_response(res: GatewayResponse) -> Response {
    let status = StatusCode::from_u16(res.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&res.content_type) {
        headers.insert(CONTENT_TYPE, value);
    }
    for (name, value) in &res.headers {
        if let (Ok(name), Ok(value)) = (
            name.parse::<HeaderName>(),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }

    (status, headers, res.body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_parsing_decodes_plus_and_percent() {
        let params = parse_params("name=Test+Meeting&meetingID=abc%3A123&checksum=ff");
        assert_eq!(params.get("name"), Some("Test Meeting"));
        assert_eq!(params.get("meetingID"), Some("abc:123"));
        assert_eq!(params.checksum(), Some("ff"));
    }

    #[test]
    fn empty_query_yields_empty_params() {
        assert!(parse_params("").is_empty());
    }
}
