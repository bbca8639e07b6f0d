use crate::error::Result as WebResult;
use crate::AppState;
use axum::body::Bytes;
use axum::extract::{RawQuery, State};
use axum::http::{header::CONTENT_TYPE, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use domain::error::Error as DomainError;
use domain::gateway::{ProxyMethod, ProxyRequest};
use log::*;

const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Forwards GET/POST/PUT/PATCH/DELETE below the proxy mount prefix to the backend and
/// relays the backend's status and body unchanged.
///
/// The path is taken from the raw request URI so percent-encoded segments reach the
/// backend (and the traversal checks) exactly as the browser sent them.
pub async fn forward(
    State(app_state): State<AppState>,
    method: Method,
    uri: Uri,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> WebResult<Response> {
    let mount_prefix = app_state.config().proxy_mount_prefix.trim_end_matches('/');
    let path = uri
        .path()
        .strip_prefix(mount_prefix)
        .filter(|path| path.starts_with('/'))
        .ok_or_else(|| DomainError::path_rejected(uri.path()))?;

    let request = ProxyRequest {
        method: ProxyMethod::try_from(&method)?,
        path: path.to_string(),
        query,
        body: Some(body),
    };

    let proxied = app_state.backend.forward(request).await?;
    debug!("{method} {path} answered {}", proxied.status);

    let status = StatusCode::from_u16(proxied.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = proxied
        .content_type
        .as_deref()
        .and_then(|value| HeaderValue::from_str(value).ok())
        .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));

    Ok((status, [(CONTENT_TYPE, content_type)], proxied.body).into_response())
}
