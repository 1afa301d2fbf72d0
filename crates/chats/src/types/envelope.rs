//! The envelope exchanged with connected clients and fanned out by the hub.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::entities::StoredMessage;
use crate::types::ChatError;

/// Every kind that can appear on the wire.
///
/// Clients may send the durable kinds (`message`, `text`, `sticker`,
/// `message_read`) and the ephemeral kinds (`typing`, `user_status`,
/// `sending_file`). The rest are produced by the server only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Message,
    Text,
    Typing,
    MessageRead,
    Sticker,
    SendingFile,
    Notification,
    UserStatus,
    Reaction,
    Edit,
    Delete,
    Pin,
    Error,
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Message => "message",
            MessageKind::Text => "text",
            MessageKind::Typing => "typing",
            MessageKind::MessageRead => "message_read",
            MessageKind::Sticker => "sticker",
            MessageKind::SendingFile => "sending_file",
            MessageKind::Notification => "notification",
            MessageKind::UserStatus => "user_status",
            MessageKind::Reaction => "reaction",
            MessageKind::Edit => "edit",
            MessageKind::Delete => "delete",
            MessageKind::Pin => "pin",
            MessageKind::Error => "error",
            MessageKind::System => "system",
        }
    }

    /// Persisted before it is routed.
    pub fn is_durable(&self) -> bool {
        matches!(
            self,
            MessageKind::Message | MessageKind::Text | MessageKind::Sticker | MessageKind::MessageRead
        )
    }

    /// Routed without touching storage.
    pub fn is_ephemeral(&self) -> bool {
        matches!(
            self,
            MessageKind::Typing | MessageKind::UserStatus | MessageKind::SendingFile
        )
    }

    /// Whether a client is allowed to send this kind over its socket.
    pub fn client_allowed(&self) -> bool {
        self.is_durable() || self.is_ephemeral()
    }

    /// Whether the sender's own sessions receive a copy when routed.
    pub fn echoes_to_sender(&self) -> bool {
        !matches!(
            self,
            MessageKind::Typing
                | MessageKind::MessageRead
                | MessageKind::SendingFile
                | MessageKind::UserStatus
        )
    }

    /// Kinds that are stored as message rows.
    pub fn is_content(&self) -> bool {
        matches!(
            self,
            MessageKind::Message | MessageKind::Text | MessageKind::Sticker | MessageKind::System
        )
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Value::String(s.to_owned()))
            .map_err(|_| ChatError::validation(format!("unknown message kind '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct OnlineStatus {
    pub user_id: i64,
    pub is_online: bool,
}

/// Wire and routing unit.
///
/// `conversation_id` defaults to zero when absent so the session can answer
/// with a protocol error instead of failing the decode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default)]
    pub conversation_id: i64,
    #[serde(default)]
    pub sender_id: i64,
    #[serde(rename = "type", alias = "message_type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forwarded_from_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sticker_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_silent: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extras: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub online_status: Option<OnlineStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl Envelope {
    pub fn new(kind: MessageKind, conversation_id: i64, sender_id: i64) -> Self {
        Self {
            id: None,
            conversation_id,
            sender_id,
            kind,
            content: String::new(),
            reply_to_id: None,
            forwarded_from_id: None,
            media_id: None,
            sticker_id: None,
            is_silent: None,
            extras: None,
            online_status: None,
            created_at: None,
        }
    }

    /// Protocol error addressed to a single session.
    pub fn error(conversation_id: i64, message: impl Into<String>) -> Self {
        Self::new(MessageKind::Error, conversation_id, 0).with_content(message)
    }

    pub fn presence(conversation_id: i64, user_id: i64, is_online: bool) -> Self {
        let mut envelope = Self::new(MessageKind::UserStatus, conversation_id, user_id);
        envelope.online_status = Some(OnlineStatus { user_id, is_online });
        envelope
    }

    /// Server notification carrying an `event` name in `extras`.
    pub fn notification(conversation_id: i64, sender_id: i64, event: &str) -> Self {
        let mut extras = Map::new();
        extras.insert("event".to_owned(), Value::String(event.to_owned()));
        Self::new(MessageKind::Notification, conversation_id, sender_id).with_extras(extras)
    }

    /// Envelope describing a persisted message, tagged with `kind`.
    pub fn from_stored(kind: MessageKind, message: &StoredMessage) -> Self {
        Self {
            id: Some(message.id),
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            kind,
            content: message.content.clone(),
            reply_to_id: message.reply_to_id,
            forwarded_from_id: message.forwarded_from_id,
            media_id: message.media_id,
            sticker_id: message.sticker_id,
            is_silent: message.is_silent.then_some(true),
            extras: message.extras.clone(),
            online_status: None,
            created_at: Some(message.created_at.clone()),
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_extras(mut self, extras: Map<String, Value>) -> Self {
        self.extras = Some(extras);
        self
    }

    /// Insert one key into `extras`, creating the object when needed.
    pub fn with_extra(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extras
            .get_or_insert_with(Map::new)
            .insert(key.to_owned(), value.into());
        self
    }

    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_type_and_message_type_alias() {
        let primary = Envelope::decode(r#"{"conversation_id":7,"type":"typing"}"#).unwrap();
        assert_eq!(primary.kind, MessageKind::Typing);

        let alias =
            Envelope::decode(r#"{"conversation_id":7,"message_type":"message_read"}"#).unwrap();
        assert_eq!(alias.kind, MessageKind::MessageRead);
        assert_eq!(alias.content, "");
    }

    #[test]
    fn missing_conversation_decodes_as_zero() {
        let envelope = Envelope::decode(r#"{"type":"text","content":"hi"}"#).unwrap();
        assert_eq!(envelope.conversation_id, 0);
    }

    #[test]
    fn unknown_kind_and_non_object_extras_are_rejected() {
        assert!(Envelope::decode(r#"{"conversation_id":1,"type":"shout"}"#).is_err());
        assert!(Envelope::decode(r#"{"conversation_id":1,"type":"text","extras":[1]}"#).is_err());
        assert!(Envelope::decode("not json").is_err());
    }

    #[test]
    fn serializes_kind_under_type_and_skips_empty_options() {
        let value = serde_json::to_value(Envelope::presence(3, 9, true)).unwrap();
        assert_eq!(
            value,
            json!({
                "conversation_id": 3,
                "sender_id": 9,
                "type": "user_status",
                "content": "",
                "online_status": { "user_id": 9, "is_online": true }
            })
        );
    }

    #[test]
    fn echo_table_matches_kind_groups() {
        for kind in [
            MessageKind::Typing,
            MessageKind::MessageRead,
            MessageKind::SendingFile,
            MessageKind::UserStatus,
        ] {
            assert!(!kind.echoes_to_sender(), "{kind} must not echo");
        }
        for kind in [
            MessageKind::Message,
            MessageKind::Text,
            MessageKind::Sticker,
            MessageKind::Notification,
            MessageKind::Reaction,
            MessageKind::Edit,
            MessageKind::Delete,
            MessageKind::Pin,
            MessageKind::System,
            MessageKind::Error,
        ] {
            assert!(kind.echoes_to_sender(), "{kind} must echo");
        }
    }

    #[test]
    fn only_durable_and_ephemeral_kinds_are_client_allowed() {
        assert!(MessageKind::Text.client_allowed());
        assert!(MessageKind::Typing.client_allowed());
        assert!(!MessageKind::Notification.client_allowed());
        assert!(!MessageKind::Error.client_allowed());
        assert!(!MessageKind::Edit.client_allowed());
    }

    #[test]
    fn kind_round_trips_through_its_name() {
        assert_eq!("sending_file".parse::<MessageKind>().unwrap(), MessageKind::SendingFile);
        assert_eq!(MessageKind::SendingFile.as_str(), "sending_file");
        assert!("SendingFile".parse::<MessageKind>().is_err());
    }

    #[test]
    fn with_extra_builds_object() {
        let envelope = Envelope::notification(4, 1, "call_started").with_extra("room_token", "abc");
        let extras = envelope.extras.unwrap();
        assert_eq!(extras["event"], json!("call_started"));
        assert_eq!(extras["room_token"], json!("abc"));
    }
}
