use crate::extractors::authenticated_user::AuthenticatedUser;
use crate::AppState;
use async_stream::stream;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::Stream;
use log::*;
use relay::RelayStatus;
use std::convert::Infallible;

/// Streams relayed backend events to one browser for as long as it stays connected.
///
/// Each connection is its own relay subscriber. Nothing sent before the connection was
/// opened is replayed. When the browser disconnects axum drops the stream, which drops
/// the subscriber handle and detaches it.
pub(crate) async fn events_handler(
    AuthenticatedUser(user): AuthenticatedUser,
    State(app_state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut subscriber = app_state.relay.attach();
    debug!(
        "Relay subscriber {} attached for user {}",
        subscriber.id(),
        user.id
    );

    let stream = stream! {
        while let Some(message) = subscriber.recv().await {
            yield Ok(message.to_sse_event());
        }

        // The relay dropped this subscriber (shutdown or a full buffer).
        debug!("Relay stream ended for user {}", user.id);
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Current upstream connection state and subscriber count.
pub(crate) async fn status_handler(State(app_state): State<AppState>) -> Json<RelayStatus> {
    Json(app_state.relay.status())
}
