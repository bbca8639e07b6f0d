use std::error::Error as StdError;
use std::fmt;
use tokio_tungstenite::tungstenite;

/// Errors raised while talking to the upstream event source. They never reach a browser:
/// the reader task records them in the relay status and schedules a reconnect.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: RelayErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayErrorKind {
    /// The upstream URL or credential is missing or malformed.
    Config,
    /// The transport could not be established (refused, DNS, TLS).
    Connect,
    /// The upstream answered the handshake with a non-success status.
    Handshake,
    /// An established connection failed while reading.
    Transport,
}

impl Error {
    pub fn new(
        error_kind: RelayErrorKind,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self {
            source: Some(source.into()),
            error_kind,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{:?}: {source}", self.error_kind),
            None => write!(f, "{:?}", self.error_kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<tungstenite::Error> for Error {
    fn from(err: tungstenite::Error) -> Self {
        let error_kind = match err {
            tungstenite::Error::Http(_) | tungstenite::Error::HttpFormat(_) => {
                RelayErrorKind::Handshake
            }
            tungstenite::Error::Url(_) => RelayErrorKind::Config,
            _ => RelayErrorKind::Connect,
        };
        Self::new(error_kind, err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let error_kind = if err.is_builder() {
            RelayErrorKind::Config
        } else {
            RelayErrorKind::Connect
        };
        Self::new(error_kind, err)
    }
}
