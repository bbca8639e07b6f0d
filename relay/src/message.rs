use axum::response::sse::Event;
use serde::Deserialize;
use serde_json::Value;

/// Event name used when the upstream frame does not name one.
pub const DEFAULT_EVENT: &str = "message";

/// One decoded upstream frame, pushed unchanged to every live subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayMessage {
    pub event: String,
    pub payload: String,
}

impl RelayMessage {
    /// Builds a message, falling back to [`DEFAULT_EVENT`] for names that are empty or
    /// would break SSE framing.
    pub fn new(event: impl Into<String>, payload: impl Into<String>) -> Self {
        let event = event.into();
        let event = if event.is_empty() || event.contains(['\r', '\n']) {
            DEFAULT_EVENT.to_string()
        } else {
            event
        };

        Self {
            event,
            payload: payload.into(),
        }
    }

    pub fn to_sse_event(&self) -> Event {
        // CR is a line terminator in SSE. Normalize it so multi-line payloads keep their lines.
        let data = self.payload.replace("\r\n", "\n").replace('\r', "\n");
        Event::default().event(&self.event).data(data)
    }
}

#[derive(Deserialize)]
struct Envelope {
    event: Option<String>,
    #[serde(default)]
    data: Value,
}

/// Decodes a socket frame of the form `{"event": <name>, "data": <json>}`.
///
/// String data is relayed as the bare string, any other JSON value as its JSON text.
/// Frames that are not JSON objects or carry no `event` become a [`DEFAULT_EVENT`]
/// with the raw frame as payload.
pub fn decode_frame(frame: &str) -> RelayMessage {
    match serde_json::from_str::<Envelope>(frame) {
        Ok(Envelope {
            event: Some(event),
            data,
        }) => {
            let payload = match data {
                Value::String(text) => text,
                Value::Null => String::new(),
                other => other.to_string(),
            };
            RelayMessage::new(event, payload)
        }
        _ => RelayMessage::new(DEFAULT_EVENT, frame),
    }
}
