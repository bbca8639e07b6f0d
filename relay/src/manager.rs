use crate::backoff::Backoff;
use crate::error::{Error, RelayErrorKind};
use crate::message::RelayMessage;
use crate::registry::{SubscriberId, SubscriberRegistry};
use crate::upstream::{self, Upstream};
use futures::{Stream, StreamExt};
use log::*;
use serde::Serialize;
use service::config::{Config, StartupMode};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Lifecycle state of the upstream connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Observable status of the relay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelayStatus {
    pub state: RelayState,
    /// Reason of the most recent failure, cleared on connect.
    pub last_error: Option<String>,
    /// Failed attempts since the last successful connect.
    pub retries: u32,
    pub subscribers: usize,
}

#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub subscriber_buffer: usize,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
    /// Deadline for `Upstream::connect`; a stalled handshake counts as a failed attempt.
    pub connect_timeout: Duration,
    pub startup_mode: StartupMode,
}

impl RelayOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            subscriber_buffer: config.relay_subscriber_buffer,
            backoff_min: Duration::from_millis(config.relay_backoff_min_ms),
            backoff_max: Duration::from_millis(config.relay_backoff_max_ms),
            connect_timeout: Duration::from_secs(config.relay_connect_timeout_secs),
            startup_mode: config.startup_mode,
        }
    }
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            subscriber_buffer: 64,
            backoff_min: Duration::from_millis(500),
            backoff_max: Duration::from_millis(30_000),
            connect_timeout: Duration::from_secs(10),
            startup_mode: StartupMode::Serve,
        }
    }
}

/// Owns the single upstream connection and fans its messages out to every subscriber.
///
/// The reader task is spawned lazily by the first [`Manager::attach`] (or an explicit
/// [`Manager::start`]) and lives until [`Manager::shutdown`]. It reconnects with
/// exponential backoff for as long as it lives; subscribers stay attached meanwhile.
pub struct Manager {
    registry: Arc<SubscriberRegistry>,
    upstream: Arc<dyn Upstream>,
    options: RelayOptions,
    status: Arc<watch::Sender<RelayStatus>>,
    cancel: CancellationToken,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Manager {
    pub fn new(upstream: Arc<dyn Upstream>, options: RelayOptions) -> Self {
        let (status, _) = watch::channel(RelayStatus::default());
        Self {
            registry: Arc::new(SubscriberRegistry::new(options.subscriber_buffer)),
            upstream,
            options,
            status: Arc::new(status),
            cancel: CancellationToken::new(),
            reader: Mutex::new(None),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(upstream::from_config(config), RelayOptions::from_config(config))
    }

    /// Spawns the reader task unless it is already running, the relay was shut down, or
    /// the process runs in [`StartupMode::Build`].
    pub fn start(&self) {
        if self.options.startup_mode == StartupMode::Build {
            debug!("Startup mode is build, relay upstream stays disconnected");
            return;
        }

        let mut reader = self.reader.lock().unwrap_or_else(PoisonError::into_inner);
        if reader.is_some() || self.cancel.is_cancelled() {
            return;
        }

        info!("Starting relay upstream reader");
        *reader = Some(tokio::spawn(run_reader(
            Arc::clone(&self.upstream),
            Arc::clone(&self.registry),
            Arc::clone(&self.status),
            self.cancel.clone(),
            Backoff::new(self.options.backoff_min, self.options.backoff_max),
            self.options.connect_timeout,
        )));
    }

    /// Registers a new subscriber and makes sure the upstream connection is running.
    pub fn attach(&self) -> SubscriberHandle {
        let (id, receiver) = self.registry.attach();
        self.start();
        SubscriberHandle {
            id,
            receiver,
            registry: Arc::clone(&self.registry),
        }
    }

    /// Idempotent; dropping a [`SubscriberHandle`] does the same.
    pub fn detach(&self, id: &SubscriberId) {
        self.registry.detach(id);
    }

    pub fn status(&self) -> RelayStatus {
        let mut status = self.status.borrow().clone();
        status.subscribers = self.registry.len();
        status
    }

    /// Receiver that observes every state transition of the upstream connection.
    pub fn watch_status(&self) -> watch::Receiver<RelayStatus> {
        self.status.subscribe()
    }

    /// Stops the reader, ends every subscriber stream and leaves the relay disconnected.
    pub async fn shutdown(&self) {
        info!("Shutting down relay");
        self.cancel.cancel();

        let reader = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reader) = reader {
            if let Err(err) = reader.await {
                warn!("Relay reader ended abnormally: {err}");
            }
        }

        self.registry.clear();
        self.status.send_modify(|status| {
            status.state = RelayState::Disconnected;
        });
    }
}

async fn run_reader(
    upstream: Arc<dyn Upstream>,
    registry: Arc<SubscriberRegistry>,
    status: Arc<watch::Sender<RelayStatus>>,
    cancel: CancellationToken,
    mut backoff: Backoff,
    connect_timeout: Duration,
) {
    loop {
        status.send_modify(|status| status.state = RelayState::Connecting);

        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            connected = tokio::time::timeout(connect_timeout, upstream.connect()) => {
                connected.unwrap_or_else(|_| {
                    Err(Error::new(
                        RelayErrorKind::Connect,
                        format!("no handshake within {connect_timeout:?}"),
                    ))
                })
            }
        };

        let failure = match connected {
            Ok(mut stream) => {
                backoff.reset();
                status.send_modify(|status| {
                    status.state = RelayState::Connected;
                    status.last_error = None;
                    status.retries = 0;
                });
                info!("Relay upstream connected");

                loop {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return,
                        frame = stream.next() => match frame {
                            Some(Ok(message)) => {
                                let delivered = registry.broadcast(&message);
                                trace!("Relayed {} event to {delivered} subscriber(s)", message.event);
                            }
                            Some(Err(err)) => break err.to_string(),
                            None => break "upstream closed the connection".to_string(),
                        }
                    }
                }
            }
            Err(err) => err.to_string(),
        };

        let delay = backoff.next_delay();
        warn!("Relay upstream failed: {failure}. Reconnecting in {delay:?}");
        status.send_modify(|status| {
            status.state = RelayState::Failed;
            status.last_error = Some(failure);
            status.retries = status.retries.saturating_add(1);
        });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    debug!("Relay upstream reader stopped");
}

/// A browser's attachment to the relay. Dropping it detaches the subscriber.
pub struct SubscriberHandle {
    id: SubscriberId,
    receiver: mpsc::Receiver<RelayMessage>,
    registry: Arc<SubscriberRegistry>,
}

impl SubscriberHandle {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next message, or `None` once the subscriber was detached and its queue drained.
    pub async fn recv(&mut self) -> Option<RelayMessage> {
        self.receiver.recv().await
    }

    pub fn into_stream(self) -> impl Stream<Item = RelayMessage> + Send + 'static {
        futures::stream::unfold(self, |mut handle| async move {
            handle.recv().await.map(|message| (message, handle))
        })
    }
}

impl Drop for SubscriberHandle {
    fn drop(&mut self) {
        self.registry.detach(&self.id);
    }
}
