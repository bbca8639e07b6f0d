//! Transports for the single upstream event connection.

use crate::error::{Error, RelayErrorKind};
use crate::message::{decode_frame, RelayMessage, DEFAULT_EVENT};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use log::*;
use reqwest::header::{HeaderValue, ACCEPT};
use service::config::{Config, RelayTransport};
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

/// Header carrying the service credential on the upstream handshake.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Decoded messages of one established connection. The stream ending, or yielding an
/// error, means the connection is lost.
pub type UpstreamStream = BoxStream<'static, Result<RelayMessage, Error>>;

/// A source of relay messages. `connect` returns once the handshake has succeeded.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn connect(&self) -> Result<UpstreamStream, Error>;
}

/// Builds the upstream selected by `relay_transport`. Without a configured URL the
/// returned upstream fails every connect with a configuration error.
pub fn from_config(config: &Config) -> Arc<dyn Upstream> {
    let Some(url) = config.relay_upstream_url() else {
        return Arc::new(Unconfigured);
    };
    let api_key = config.backend_api_key();
    let idle_timeout = (config.relay_idle_timeout_secs > 0)
        .then(|| Duration::from_secs(config.relay_idle_timeout_secs));

    match config.relay_transport {
        RelayTransport::Websocket => {
            Arc::new(WebSocketUpstream::new(url, api_key).with_idle_timeout(idle_timeout))
        }
        RelayTransport::Sse => {
            Arc::new(ServerPushUpstream::new(url, api_key).with_idle_timeout(idle_timeout))
        }
    }
}

/// Ends `stream` with a [`RelayErrorKind::Transport`] error once no item arrived for
/// `idle`. A half-open connection never errors on its own, so this is what turns a silent
/// upstream into a reconnect.
pub fn idle_guard<S, T>(stream: S, idle: Option<Duration>) -> BoxStream<'static, Result<T, Error>>
where
    S: Stream<Item = Result<T, Error>> + Send + 'static,
    T: Send + 'static,
{
    let Some(idle) = idle else {
        return stream.boxed();
    };

    futures::stream::unfold(Some(stream.boxed()), move |state| async move {
        let mut stream = state?;
        match tokio::time::timeout(idle, stream.next()).await {
            Ok(Some(item)) => Some((item, Some(stream))),
            Ok(None) => None,
            Err(_) => Some((
                Err(Error::new(
                    RelayErrorKind::Transport,
                    format!("no upstream traffic for {idle:?}"),
                )),
                None,
            )),
        }
    })
    .boxed()
}

fn api_key_header(api_key: &str) -> Result<HeaderValue, Error> {
    let mut value = HeaderValue::from_str(api_key)
        .map_err(|err| Error::new(RelayErrorKind::Config, err))?;
    value.set_sensitive(true);
    Ok(value)
}

struct Unconfigured;

#[async_trait]
impl Upstream for Unconfigured {
    async fn connect(&self) -> Result<UpstreamStream, Error> {
        Err(Error::new(
            RelayErrorKind::Config,
            "no relay upstream URL is configured",
        ))
    }
}

/// Socket client; every text frame carries one `{"event", "data"}` envelope.
pub struct WebSocketUpstream {
    url: String,
    api_key: Option<String>,
    idle_timeout: Option<Duration>,
}

impl WebSocketUpstream {
    pub fn new(url: String, api_key: Option<String>) -> Self {
        Self {
            url,
            api_key,
            idle_timeout: None,
        }
    }

    /// Any frame, pings included, counts as traffic.
    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }
}

#[async_trait]
impl Upstream for WebSocketUpstream {
    async fn connect(&self) -> Result<UpstreamStream, Error> {
        let mut request = self.url.as_str().into_client_request()?;
        if let Some(api_key) = &self.api_key {
            request
                .headers_mut()
                .insert(API_KEY_HEADER, api_key_header(api_key)?);
        }

        let (socket, response) = tokio_tungstenite::connect_async(request).await?;
        debug!(
            "Websocket handshake with {} answered {}",
            self.url,
            response.status()
        );

        let frames = idle_guard(
            socket.map(|frame| frame.map_err(|err| Error::new(RelayErrorKind::Transport, err))),
            self.idle_timeout,
        );

        let messages = futures::stream::unfold(Some(frames), |state| async move {
            let mut frames = state?;
            loop {
                match frames.next().await? {
                    Ok(Message::Text(text)) => {
                        return Some((Ok(decode_frame(text.as_str())), Some(frames)))
                    }
                    Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                        Ok(text) => return Some((Ok(decode_frame(text)), Some(frames))),
                        Err(_) => warn!("Ignoring non UTF-8 binary frame from relay upstream"),
                    },
                    Ok(Message::Close(close)) => {
                        info!("Relay upstream sent close frame: {close:?}");
                        return None;
                    }
                    Ok(_) => {}
                    Err(err) => return Some((Err(err), None)),
                }
            }
        });

        Ok(messages.boxed())
    }
}

/// Server-push (`text/event-stream`) client.
pub struct ServerPushUpstream {
    url: String,
    api_key: Option<String>,
    http: reqwest::Client,
    idle_timeout: Option<Duration>,
}

impl ServerPushUpstream {
    pub fn new(url: String, api_key: Option<String>) -> Self {
        // No overall timeout: the response body is the long-lived event stream.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|err| {
                warn!("Falling back to default HTTP client for relay upstream: {err}");
                reqwest::Client::new()
            });

        Self {
            url,
            api_key,
            http,
            idle_timeout: None,
        }
    }

    /// Any received bytes, comment lines included, count as traffic.
    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }
}

#[async_trait]
impl Upstream for ServerPushUpstream {
    async fn connect(&self) -> Result<UpstreamStream, Error> {
        let mut request = self
            .http
            .get(&self.url)
            .header(ACCEPT, "text/event-stream");
        if let Some(api_key) = &self.api_key {
            request = request.header(API_KEY_HEADER, api_key_header(api_key)?);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::new(
                RelayErrorKind::Handshake,
                format!("event source {} answered {status}", self.url),
            ));
        }
        debug!("Event source {} answered {status}", self.url);

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|err| Error::new(RelayErrorKind::Transport, err)));
        let events = idle_guard(bytes, self.idle_timeout)
            .eventsource()
            .map(|item| match item {
                Ok(event) => {
                    let name = if event.event.is_empty() {
                        DEFAULT_EVENT.to_string()
                    } else {
                        event.event
                    };
                    Ok(RelayMessage::new(name, event.data))
                }
                Err(err) => Err(Error::new(RelayErrorKind::Transport, err.to_string())),
            });

        Ok(events.boxed())
    }
}
