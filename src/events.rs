use bytes::Bytes;
use serde::{Serialize, Serializer};

use crate::session::SessionId;

/// Events pushed to the subscriber that created a session.
///
/// Per session, `Data` arrives in the order the bytes were received and
/// `Disconnected` is always the last event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SessionEvent {
    #[serde(rename_all = "camelCase")]
    Data {
        session_id: SessionId,
        #[serde(serialize_with = "lossy_utf8")]
        data: Bytes,
    },
    #[serde(rename_all = "camelCase")]
    Error { session_id: SessionId, error: String },
    #[serde(rename_all = "camelCase")]
    Disconnected { session_id: SessionId },
}

impl SessionEvent {
    pub fn session_id(&self) -> &SessionId {
        match self {
            SessionEvent::Data { session_id, .. }
            | SessionEvent::Error { session_id, .. }
            | SessionEvent::Disconnected { session_id } => session_id,
        }
    }
}

fn lossy_utf8<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(data))
}

/// What a transport reports to the session that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Data(Bytes),
    /// Recoverable; the session stays alive.
    Error(String),
    /// The remote end went away. Nothing follows this.
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_shape() {
        let event = SessionEvent::Data {
            session_id: SessionId::from("s-1"),
            data: Bytes::from_static(b"ls -la\r\n"),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "data", "sessionId": "s-1", "data": "ls -la\r\n"})
        );

        let json = serde_json::to_value(SessionEvent::Disconnected {
            session_id: SessionId::from("s-1"),
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "disconnected", "sessionId": "s-1"})
        );
    }

    #[test]
    fn test_session_id_covers_every_event() {
        let id = SessionId::from("s-2");
        let events = [
            SessionEvent::Data {
                session_id: id.clone(),
                data: Bytes::new(),
            },
            SessionEvent::Error {
                session_id: id.clone(),
                error: "boom".to_string(),
            },
            SessionEvent::Disconnected {
                session_id: id.clone(),
            },
        ];
        assert!(events.iter().all(|event| event.session_id() == &id));
    }
}
