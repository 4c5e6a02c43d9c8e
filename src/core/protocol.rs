//! Wire format of the notification endpoint.
//!
//! Inbound: `{"type":"notification","notification":{...}}` or `{"type":"pong"}`.
//! Outbound: `{"type":"ping"}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{WebSocketError, WebSocketResult};

pub const PING_FRAME: &str = r#"{"type":"ping"}"#;

/// A notification pushed by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// Decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Notification(Notification),
    Pong,
}

#[derive(Deserialize)]
struct RawInbound {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    notification: Option<Notification>,
}

impl InboundMessage {
    pub fn decode(payload: &[u8]) -> WebSocketResult<Self> {
        let raw: RawInbound = sonic_rs::from_slice(payload)
            .map_err(|err| WebSocketError::ParseFailed(err.to_string()))?;

        match (raw.kind.as_str(), raw.notification) {
            ("pong", _) => Ok(InboundMessage::Pong),
            ("notification", Some(notification)) => Ok(InboundMessage::Notification(notification)),
            ("notification", None) => Err(WebSocketError::UnknownMessage(
                "notification frame without payload".to_string(),
            )),
            (other, _) => Err(WebSocketError::UnknownMessage(format!("type={other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOTIFICATION: &str = r#"{
        "type": "notification",
        "notification": {
            "id": 42,
            "type": "booking_confirmed",
            "title": "Booking confirmed",
            "message": "Your gala dress is reserved",
            "is_read": false,
            "created_at": "2024-05-01T12:30:00Z"
        }
    }"#;

    #[test]
    fn decodes_notification_payload() {
        let decoded = InboundMessage::decode(NOTIFICATION.as_bytes()).unwrap();
        let InboundMessage::Notification(notification) = decoded else {
            panic!("expected notification, got {decoded:?}");
        };
        assert_eq!(notification.id, 42);
        assert_eq!(notification.kind, "booking_confirmed");
        assert!(!notification.is_read);
        assert_eq!(notification.created_at.to_rfc3339(), "2024-05-01T12:30:00+00:00");
    }

    #[test]
    fn decodes_pong() {
        assert_eq!(
            InboundMessage::decode(br#"{"type":"pong"}"#).unwrap(),
            InboundMessage::Pong
        );
    }

    #[test]
    fn rejects_unknown_and_malformed_frames() {
        assert!(matches!(
            InboundMessage::decode(br#"{"type":"presence"}"#),
            Err(WebSocketError::UnknownMessage(_))
        ));
        assert!(matches!(
            InboundMessage::decode(br#"{"type":"notification"}"#),
            Err(WebSocketError::UnknownMessage(_))
        ));
        assert!(matches!(
            InboundMessage::decode(b"not json"),
            Err(WebSocketError::ParseFailed(_))
        ));
    }
}
