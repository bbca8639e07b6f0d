//! Reverse-proxy client that maps one inbound gateway request onto one backend call.

use crate::error::{DomainErrorKind, Error, InternalErrorKind};
use crate::gateway::credentials::{BackendCredentials, API_KEY_HEADER};
use bytes::Bytes;
use log::*;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use service::config::Config;
use std::time::Duration;

const JSON_CONTENT_TYPE: &str = "application/json";

/// The HTTP verbs the gateway forwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProxyMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl ProxyMethod {
    /// Whether the inbound body is forwarded for this method.
    pub fn carries_body(self) -> bool {
        !matches!(self, ProxyMethod::Get)
    }
}

impl TryFrom<&Method> for ProxyMethod {
    type Error = Error;

    fn try_from(method: &Method) -> Result<Self, Self::Error> {
        match *method {
            Method::GET => Ok(ProxyMethod::Get),
            Method::POST => Ok(ProxyMethod::Post),
            Method::PUT => Ok(ProxyMethod::Put),
            Method::PATCH => Ok(ProxyMethod::Patch),
            Method::DELETE => Ok(ProxyMethod::Delete),
            _ => Err(Error {
                source: None,
                error_kind: DomainErrorKind::Internal(InternalErrorKind::Other(format!(
                    "method {method} is not proxied"
                ))),
            }),
        }
    }
}

impl From<ProxyMethod> for Method {
    fn from(method: ProxyMethod) -> Self {
        match method {
            ProxyMethod::Get => Method::GET,
            ProxyMethod::Post => Method::POST,
            ProxyMethod::Put => Method::PUT,
            ProxyMethod::Patch => Method::PATCH,
            ProxyMethod::Delete => Method::DELETE,
        }
    }
}

/// An inbound request, already stripped of the gateway's mount prefix.
#[derive(Clone, Debug)]
pub struct ProxyRequest {
    pub method: ProxyMethod,
    /// Backend path, starting with `/`.
    pub path: String,
    /// Raw query string without the leading `?`.
    pub query: Option<String>,
    pub body: Option<Bytes>,
}

/// The backend's answer, relayed verbatim to the browser.
#[derive(Clone, Debug)]
pub struct ProxyResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// Decides which backend paths are reachable through the proxy.
///
/// Dot segments (plain or percent-encoded), encoded separators, backslashes, NUL bytes and
/// empty interior segments are always rejected. When an allow-list is configured, the path
/// must also equal one of its prefixes or continue below one at a `/` boundary.
#[derive(Clone, Debug, Default)]
pub struct PathPolicy {
    allowed_prefixes: Vec<String>,
}

impl PathPolicy {
    pub fn new(allowed_prefixes: Vec<String>) -> Self {
        let allowed_prefixes = allowed_prefixes
            .into_iter()
            .map(|prefix| prefix.trim().trim_end_matches('/').to_owned())
            .filter(|prefix| !prefix.is_empty())
            .map(|prefix| {
                if prefix.starts_with('/') {
                    prefix
                } else {
                    format!("/{prefix}")
                }
            })
            .collect();

        Self { allowed_prefixes }
    }

    pub fn check(&self, path: &str) -> Result<(), Error> {
        if escapes_api_surface(path) || !self.is_allowed(path) {
            warn!("Rejecting proxy path {path:?}");
            return Err(Error::path_rejected(path));
        }
        Ok(())
    }

    fn is_allowed(&self, path: &str) -> bool {
        self.allowed_prefixes.is_empty()
            || self.allowed_prefixes.iter().any(|prefix| {
                path == prefix
                    || path
                        .strip_prefix(prefix.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            })
    }
}

fn escapes_api_surface(path: &str) -> bool {
    let Some(relative) = path.strip_prefix('/') else {
        return true;
    };

    let lowered = path.to_ascii_lowercase();
    if path.contains('\\')
        || path.contains('\0')
        || ["%2f", "%5c", "%00"]
            .iter()
            .any(|encoded| lowered.contains(encoded))
    {
        return true;
    }

    let segments: Vec<&str> = relative.split('/').collect();
    let last = segments.len() - 1;
    segments.iter().enumerate().any(|(index, segment)| {
        // A trailing slash leaves one empty final segment, which is fine.
        if segment.is_empty() {
            return index != last;
        }
        let decoded = segment.to_ascii_lowercase().replace("%2e", ".");
        decoded == "." || decoded == ".."
    })
}

fn outbound_url(base_url: &str, path: &str, query: Option<&str>) -> String {
    match query.filter(|query| !query.is_empty()) {
        Some(query) => format!("{base_url}{path}?{query}"),
        None => format!("{base_url}{path}"),
    }
}

/// Forwards requests to the backend with the service credential injected.
#[derive(Clone, Debug)]
pub struct BackendClient {
    http: reqwest::Client,
    credentials: BackendCredentials,
    policy: PathPolicy,
}

impl BackendClient {
    pub fn new(
        credentials: BackendCredentials,
        policy: PathPolicy,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(format!("relay-gateway/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            credentials,
            policy,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, Error> {
        Self::new(
            BackendCredentials::from_config(config),
            PathPolicy::new(config.proxy_allowed_paths.clone()),
            Duration::from_secs(config.proxy_timeout_secs),
        )
    }

    /// Performs exactly one backend call for `request` and returns the backend's status and
    /// body unchanged. Transport failures become `ExternalErrorKind::Network`; the backend's
    /// own 4xx/5xx answers are returned as successful `ProxyResponse`s.
    pub async fn forward(&self, request: ProxyRequest) -> Result<ProxyResponse, Error> {
        self.policy.check(&request.path)?;
        let base_url = self.credentials.base_url()?;
        let api_key = self.credentials.api_key_header()?;

        let url = outbound_url(base_url, &request.path, request.query.as_deref());
        debug!("Forwarding {:?} {}", request.method, url);

        let mut outbound = self
            .http
            .request(request.method.into(), &url)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .header(API_KEY_HEADER, api_key);

        if request.method.carries_body() {
            outbound = outbound.body(request.body.unwrap_or_default());
        }

        let response = outbound.send().await.map_err(|err| {
            warn!("Backend request {:?} {} failed: {err}", request.method, url);
            Error::from(err)
        })?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = response.bytes().await.map_err(|err| {
            warn!("Reading backend response for {url} failed: {err}");
            Error::from(err)
        })?;

        trace!("Backend answered {status} for {url}");

        Ok(ProxyResponse {
            status,
            content_type,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExternalErrorKind;
    use mockito::{Matcher, Server};

    fn client_for(base_url: &str) -> BackendClient {
        BackendClient::new(
            BackendCredentials::new(Some(base_url.to_string()), Some("test-key".to_string())),
            PathPolicy::default(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn request(method: ProxyMethod, path: &str, query: Option<&str>, body: &str) -> ProxyRequest {
        ProxyRequest {
            method,
            path: path.to_string(),
            query: query.map(str::to_string),
            body: Some(Bytes::from(body.to_string())),
        }
    }

    #[tokio::test]
    async fn post_is_forwarded_with_body_and_credential() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/items/5/retry")
            .match_header("x-api-key", "test-key")
            .match_header("content-type", "application/json")
            .match_body("{}")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success":true}"#)
            .create_async()
            .await;

        let response = client_for(&server.url())
            .forward(request(ProxyMethod::Post, "/items/5/retry", None, "{}"))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body, Bytes::from_static(br#"{"success":true}"#));
        assert_eq!(response.content_type.as_deref(), Some("application/json"));
    }

    #[tokio::test]
    async fn query_string_is_passed_through_unchanged() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/items")
            .match_query(Matcher::Exact("page=2&sort=asc".to_string()))
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let response = client_for(&server.url())
            .forward(request(ProxyMethod::Get, "/items", Some("page=2&sort=asc"), ""))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.body, Bytes::from_static(b"[]"));
    }

    #[tokio::test]
    async fn get_never_carries_a_body() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/items/1")
            .match_body("")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        client_for(&server.url())
            .forward(request(ProxyMethod::Get, "/items/1", None, r#"{"ignored":true}"#))
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn delete_forwards_its_body() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("DELETE", "/items/7")
            .match_body(r#"{"force":true}"#)
            .with_status(204)
            .create_async()
            .await;

        let response = client_for(&server.url())
            .forward(request(ProxyMethod::Delete, "/items/7", None, r#"{"force":true}"#))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.status, 204);
    }

    #[tokio::test]
    async fn backend_errors_are_passed_through_unchanged() {
        let mut server = Server::new_async().await;
        server
            .mock("PUT", "/items/9")
            .with_status(422)
            .with_header("content-type", "application/json")
            .with_body(r#"{"detail":"name is required"}"#)
            .create_async()
            .await;

        let response = client_for(&server.url())
            .forward(request(ProxyMethod::Put, "/items/9", None, "{}"))
            .await
            .unwrap();

        assert_eq!(response.status, 422);
        assert_eq!(
            response.body,
            Bytes::from_static(br#"{"detail":"name is required"}"#)
        );
    }

    #[tokio::test]
    async fn connection_failure_is_a_network_error() {
        // Nothing listens on port 1.
        let err = client_for("http://127.0.0.1:1")
            .forward(request(ProxyMethod::Get, "/items", None, ""))
            .await
            .unwrap_err();

        assert_eq!(
            err.error_kind,
            DomainErrorKind::External(ExternalErrorKind::Network)
        );
    }

    #[tokio::test]
    async fn missing_base_url_fails_without_a_request() {
        let client = BackendClient::new(
            BackendCredentials::new(None, Some("test-key".to_string())),
            PathPolicy::default(),
            Duration::from_secs(5),
        )
        .unwrap();

        let err = client
            .forward(request(ProxyMethod::Get, "/items", None, ""))
            .await
            .unwrap_err();

        assert_eq!(
            err.error_kind,
            DomainErrorKind::Internal(InternalErrorKind::Config)
        );
    }

    #[tokio::test]
    async fn traversal_is_rejected_before_contacting_the_backend() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", Matcher::Any)
            .expect(0)
            .create_async()
            .await;
        let client = client_for(&server.url());

        for path in ["/items/../admin", "/items/%2e%2E/admin", "/items//x", "/a%2Fb"] {
            let err = client
                .forward(request(ProxyMethod::Get, path, None, ""))
                .await
                .unwrap_err();
            assert_eq!(
                err.error_kind,
                DomainErrorKind::Internal(InternalErrorKind::PathRejected),
                "{path} should be rejected"
            );
        }

        mock.assert_async().await;
    }

    #[test]
    fn allow_list_matches_on_segment_boundaries() {
        let policy = PathPolicy::new(vec!["/items".to_string(), "queue/".to_string()]);

        assert!(policy.check("/items").is_ok());
        assert!(policy.check("/items/5/retry").is_ok());
        assert!(policy.check("/queue/status").is_ok());
        assert!(policy.check("/itemsx").is_err());
        assert!(policy.check("/admin").is_err());
    }

    #[test]
    fn default_policy_allows_plain_paths_and_trailing_slash() {
        let policy = PathPolicy::default();

        assert!(policy.check("/items/5/retry").is_ok());
        assert!(policy.check("/items/").is_ok());
        assert!(policy.check("/v1.2/items").is_ok());
        assert!(policy.check("items").is_err());
        assert!(policy.check("/..").is_err());
        assert!(policy.check("/a\\b").is_err());
    }

    #[test]
    fn outbound_url_drops_an_empty_query() {
        assert_eq!(outbound_url("http://b", "/x", Some("")), "http://b/x");
        assert_eq!(outbound_url("http://b", "/x", Some("a=1")), "http://b/x?a=1");
        assert_eq!(outbound_url("http://b", "/x", None), "http://b/x");
    }
}
