//! The backend base URL and service API key used to authenticate every outbound call.

use crate::error::Error;
use log::*;
use reqwest::header::HeaderValue;
use service::config::Config;
use std::fmt;

/// Header carrying the service credential on outbound backend calls.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Backend location and service credential, read once from configuration at startup and
/// immutable afterwards. Missing values are reported at the point of use so that no
/// request is ever attempted without them.
#[derive(Clone)]
pub struct BackendCredentials {
    base_url: Option<String>,
    api_key: Option<String>,
}

impl BackendCredentials {
    pub fn new(base_url: Option<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.map(|url| url.trim_end_matches('/').to_owned()),
            api_key,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.backend_base_url(), config.backend_api_key())
    }

    /// Returns `(base_url, api_key)`, or a configuration error if either is missing.
    pub fn get(&self) -> Result<(&str, &str), Error> {
        Ok((self.base_url()?, self.api_key()?))
    }

    pub fn base_url(&self) -> Result<&str, Error> {
        self.base_url.as_deref().filter(|url| !url.is_empty()).ok_or_else(|| {
            error!("BACKEND_BASE_URL is not configured, refusing to contact the backend");
            Error::config("BACKEND_BASE_URL is not configured")
        })
    }

    pub fn api_key(&self) -> Result<&str, Error> {
        self.api_key.as_deref().filter(|key| !key.is_empty()).ok_or_else(|| {
            error!("BACKEND_API_KEY is not configured, refusing to contact the backend");
            Error::config("BACKEND_API_KEY is not configured")
        })
    }

    /// The API key as a header value, marked sensitive so it never shows up in debug output.
    pub fn api_key_header(&self) -> Result<HeaderValue, Error> {
        let mut value = HeaderValue::from_str(self.api_key()?).map_err(|err| {
            warn!("Failed to create api key header value: {err:?}");
            let mut config_error = Error::config("BACKEND_API_KEY is not a valid header value");
            config_error.source = Some(Box::new(err));
            config_error
        })?;
        value.set_sensitive(true);
        Ok(value)
    }
}

impl fmt::Debug for BackendCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendCredentials")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DomainErrorKind, InternalErrorKind};

    #[test]
    fn get_returns_both_values_with_trailing_slash_trimmed() {
        let credentials = BackendCredentials::new(
            Some("http://backend:8000/".to_string()),
            Some("secret".to_string()),
        );

        let (base_url, api_key) = credentials.get().unwrap();
        assert_eq!(base_url, "http://backend:8000");
        assert_eq!(api_key, "secret");
    }

    #[test]
    fn missing_base_url_is_a_config_error() {
        let credentials = BackendCredentials::new(None, Some("secret".to_string()));

        let err = credentials.get().unwrap_err();
        assert_eq!(
            err.error_kind,
            DomainErrorKind::Internal(InternalErrorKind::Config)
        );
    }

    #[test]
    fn missing_api_key_is_a_config_error() {
        let credentials = BackendCredentials::new(Some("http://backend".to_string()), None);

        assert!(credentials.api_key_header().is_err());
    }

    #[test]
    fn debug_output_redacts_the_api_key() {
        let credentials = BackendCredentials::new(
            Some("http://backend".to_string()),
            Some("super-secret".to_string()),
        );

        let debug = format!("{credentials:?}");
        assert!(!debug.contains("super-secret"));
        assert!(credentials.api_key_header().unwrap().is_sensitive());
    }
}
