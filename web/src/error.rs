use std::error::Error as StdError;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::*;
use serde_json::json;

use domain::error::{
    DomainErrorKind, EntityErrorKind, Error as DomainError, ExternalErrorKind, InternalErrorKind,
};

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug)]
pub struct Error(DomainError);

impl StdError for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> core::result::Result<(), std::fmt::Error> {
        write!(fmt, "{self:?}")
    }
}

// Error detail stays in the log; clients only ever see the status and a generic body.
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self.0.error_kind {
            DomainErrorKind::Internal(internal_error_kind) => match internal_error_kind {
                InternalErrorKind::Entity(entity_error_kind) => match entity_error_kind {
                    EntityErrorKind::NotFound => {
                        (StatusCode::NOT_FOUND, "NOT FOUND").into_response()
                    }
                    EntityErrorKind::Invalid => {
                        (StatusCode::UNPROCESSABLE_ENTITY, "UNPROCESSABLE ENTITY").into_response()
                    }
                    EntityErrorKind::Unauthenticated => {
                        (StatusCode::UNAUTHORIZED, "UNAUTHORIZED").into_response()
                    }
                    EntityErrorKind::Other(message) => {
                        error!("Entity error: {message}, source: {:?}", self.0.source);
                        (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL SERVER ERROR").into_response()
                    }
                },
                InternalErrorKind::PathRejected => {
                    (StatusCode::BAD_REQUEST, "BAD REQUEST").into_response()
                }
                InternalErrorKind::Config => {
                    error!("Gateway is misconfigured: {:?}", self.0.source);
                    (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL SERVER ERROR").into_response()
                }
                InternalErrorKind::Other(message) => {
                    error!("Internal error: {message}, source: {:?}", self.0.source);
                    (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL SERVER ERROR").into_response()
                }
            },
            DomainErrorKind::External(external_error_kind) => match external_error_kind {
                ExternalErrorKind::Network => {
                    warn!("Upstream request failed: {:?}", self.0.source);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(json!({"error": "Upstream request failed"})),
                    )
                        .into_response()
                }
                ExternalErrorKind::Other(message) => {
                    error!("External error: {message}, source: {:?}", self.0.source);
                    (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL SERVER ERROR").into_response()
                }
            },
        }
    }
}

impl<E> From<E> for Error
where
    E: Into<DomainError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    fn error(error_kind: DomainErrorKind) -> Error {
        Error::from(DomainError {
            source: Some("connection refused".into()),
            error_kind,
        })
    }

    #[tokio::test]
    async fn network_failure_is_a_generic_500_without_detail() {
        let response =
            error(DomainErrorKind::External(ExternalErrorKind::Network)).into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], br#"{"error":"Upstream request failed"}"#);
    }

    #[test]
    fn kinds_map_to_status_codes() {
        let cases = [
            (
                DomainErrorKind::Internal(InternalErrorKind::PathRejected),
                StatusCode::BAD_REQUEST,
            ),
            (
                DomainErrorKind::Internal(InternalErrorKind::Config),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                DomainErrorKind::Internal(InternalErrorKind::Entity(
                    EntityErrorKind::Unauthenticated,
                )),
                StatusCode::UNAUTHORIZED,
            ),
            (
                DomainErrorKind::Internal(InternalErrorKind::Entity(EntityErrorKind::NotFound)),
                StatusCode::NOT_FOUND,
            ),
            (
                DomainErrorKind::Internal(InternalErrorKind::Entity(EntityErrorKind::Invalid)),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
        ];

        for (kind, status) in cases {
            assert_eq!(error(kind).into_response().status(), status);
        }
    }
}
