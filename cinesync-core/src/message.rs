//! Binary message envelope exchanged over room WebSocket connections.
//!
//! Frames are length-free protobuf messages carried in WebSocket binary
//! frames. The envelope carries the message type, a server timestamp, the
//! sender identity, and one payload variant.

use prost::Message as _;

use crate::models::{Current, Status, User};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum MessageType {
    Unknown = 0,
    Error = 1,
    Chat = 2,
    Status = 3,
    Current = 4,
    ViewerCount = 5,
    Ping = 6,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Sender {
    #[prost(string, tag = "1")]
    pub user_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub username: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PlaybackStatus {
    #[prost(bool, tag = "1")]
    pub is_playing: bool,
    #[prost(double, tag = "2")]
    pub current_time: f64,
    #[prost(double, tag = "3")]
    pub playback_rate: f64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CurrentPayload {
    #[prost(string, tag = "1")]
    pub movie_id: ::prost::alloc::string::String,
    #[prost(bool, tag = "2")]
    pub is_live: bool,
    #[prost(message, optional, tag = "3")]
    pub status: ::core::option::Option<PlaybackStatus>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Envelope {
    #[prost(enumeration = "MessageType", tag = "1")]
    pub r#type: i32,
    /// Server wall-clock in unix milliseconds.
    #[prost(int64, tag = "2")]
    pub timestamp: i64,
    #[prost(message, optional, tag = "3")]
    pub sender: ::core::option::Option<Sender>,
    #[prost(oneof = "Payload", tags = "4, 5, 6, 7, 8")]
    pub payload: ::core::option::Option<Payload>,
}

#[derive(Clone, PartialEq, ::prost::Oneof)]
pub enum Payload {
    #[prost(string, tag = "4")]
    ChatContent(::prost::alloc::string::String),
    #[prost(message, tag = "5")]
    PlaybackStatus(PlaybackStatus),
    #[prost(message, tag = "6")]
    Current(CurrentPayload),
    #[prost(int64, tag = "7")]
    ViewerCount(i64),
    #[prost(string, tag = "8")]
    ErrorMessage(::prost::alloc::string::String),
}

impl From<&Status> for PlaybackStatus {
    fn from(status: &Status) -> Self {
        Self {
            is_playing: status.is_playing,
            current_time: status.seek,
            playback_rate: status.rate,
        }
    }
}

impl From<&User> for Sender {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id.as_str().to_string(),
            username: user.username.clone(),
        }
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl Envelope {
    #[must_use]
    pub fn chat(sender: Sender, content: String) -> Self {
        Self {
            r#type: MessageType::Chat as i32,
            timestamp: now_millis(),
            sender: Some(sender),
            payload: Some(Payload::ChatContent(content)),
        }
    }

    #[must_use]
    pub fn status(sender: Sender, status: &Status) -> Self {
        Self {
            r#type: MessageType::Status as i32,
            timestamp: now_millis(),
            sender: Some(sender),
            payload: Some(Payload::PlaybackStatus(status.into())),
        }
    }

    #[must_use]
    pub fn current(current: &Current) -> Self {
        let payload = CurrentPayload {
            movie_id: current
                .movie
                .as_ref()
                .map(|m| m.id.as_str().to_string())
                .unwrap_or_default(),
            is_live: current.movie.as_ref().is_some_and(|m| m.is_live),
            status: Some((&current.status).into()),
        };
        Self {
            r#type: MessageType::Current as i32,
            timestamp: now_millis(),
            sender: None,
            payload: Some(Payload::Current(payload)),
        }
    }

    #[must_use]
    pub fn viewer_count(count: i64) -> Self {
        Self {
            r#type: MessageType::ViewerCount as i32,
            timestamp: now_millis(),
            sender: None,
            payload: Some(Payload::ViewerCount(count)),
        }
    }

    #[must_use]
    pub fn ping() -> Self {
        Self {
            r#type: MessageType::Ping as i32,
            timestamp: now_millis(),
            sender: None,
            payload: None,
        }
    }

    #[must_use]
    pub fn error(message: String) -> Self {
        Self {
            r#type: MessageType::Error as i32,
            timestamp: now_millis(),
            sender: None,
            payload: Some(Payload::ErrorMessage(message)),
        }
    }

    #[must_use]
    pub fn message_type(&self) -> MessageType {
        MessageType::try_from(self.r#type).unwrap_or(MessageType::Unknown)
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, prost::DecodeError> {
        Self::decode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_round_trip() {
        let msg = Envelope::chat(
            Sender {
                user_id: "u1".into(),
                username: "alice".into(),
            },
            "hello".into(),
        );
        let bytes = msg.to_bytes();
        let decoded = Envelope::from_bytes(&bytes).unwrap();

        assert_eq!(decoded.message_type(), MessageType::Chat);
        assert_eq!(decoded.sender.unwrap().username, "alice");
        assert_eq!(decoded.payload, Some(Payload::ChatContent("hello".into())));
    }

    #[test]
    fn test_status_payload() {
        let mut status = Status::new();
        status.set(true, 42.0, 1.5, 0.0);
        let msg = Envelope::status(
            Sender {
                user_id: "u1".into(),
                username: "a".into(),
            },
            &status,
        );

        let decoded = Envelope::from_bytes(&msg.to_bytes()).unwrap();
        match decoded.payload {
            Some(Payload::PlaybackStatus(s)) => {
                assert!(s.is_playing);
                assert!((s.current_time - 42.0).abs() < f64::EPSILON);
                assert!((s.playback_rate - 1.5).abs() < f64::EPSILON);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn test_ping_has_no_payload() {
        let decoded = Envelope::from_bytes(&Envelope::ping().to_bytes()).unwrap();
        assert_eq!(decoded.message_type(), MessageType::Ping);
        assert!(decoded.payload.is_none());
        assert!(decoded.sender.is_none());
    }

    #[test]
    fn test_unknown_type_is_tolerated() {
        let mut msg = Envelope::ping();
        msg.r#type = 9999;
        let decoded = Envelope::from_bytes(&msg.to_bytes()).unwrap();
        assert_eq!(decoded.message_type(), MessageType::Unknown);
    }
}
