use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::session::ProfileContext;

/// Messages sent to the realtime endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// First message on a fresh channel; personalizes the coach
    #[serde(rename = "session.init")]
    SessionInit { profile: ProfileContext },

    /// One captured frame, base64-encoded PCM16
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },

    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },

    #[serde(rename = "response.create")]
    ResponseCreate,
}

impl ClientMessage {
    pub fn session_init(profile: ProfileContext) -> Self {
        ClientMessage::SessionInit { profile }
    }

    pub fn audio_append(audio: String) -> Self {
        ClientMessage::InputAudioBufferAppend { audio }
    }

    /// A user text turn
    pub fn user_text(text: impl Into<String>) -> Self {
        ClientMessage::ConversationItemCreate {
            item: ConversationItem::user_text(text),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A conversation item carrying user input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub role: String,
    pub content: Vec<ContentPart>,
}

impl ConversationItem {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            kind: "message".to_string(),
            role: "user".to_string(),
            content: vec![ContentPart::InputText { text: text.into() }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "input_text")]
    InputText { text: String },
}

/// Messages received from the realtime endpoint
///
/// Unrecognized `type` values parse as `Unknown` so newer servers don't
/// break older clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "session.ready")]
    SessionReady,

    /// Base64 PCM16 audio fragment at 24kHz
    #[serde(rename = "response.audio.delta")]
    AudioDelta { delta: String },

    #[serde(rename = "response.audio_transcript.delta")]
    TranscriptDelta { delta: String },

    #[serde(rename = "response.audio_transcript.done")]
    TranscriptDone { transcript: String },

    #[serde(rename = "response.done")]
    ResponseDone,

    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: Option<RemoteErrorPayload>,
    },

    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Wire name of this message, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::SessionReady => "session.ready",
            ServerMessage::AudioDelta { .. } => "response.audio.delta",
            ServerMessage::TranscriptDelta { .. } => "response.audio_transcript.delta",
            ServerMessage::TranscriptDone { .. } => "response.audio_transcript.done",
            ServerMessage::ResponseDone => "response.done",
            ServerMessage::Error { .. } => "error",
            ServerMessage::Unknown => "unknown",
        }
    }
}

/// Error body: either a bare string or an object with a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RemoteErrorPayload {
    Text(String),
    Detail {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl RemoteErrorPayload {
    pub fn message(&self) -> &str {
        match self {
            RemoteErrorPayload::Text(message) => message,
            RemoteErrorPayload::Detail { message, .. } => message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_create_is_bare_type() {
        let json = ClientMessage::ResponseCreate.to_json().unwrap();
        assert_eq!(json, r#"{"type":"response.create"}"#);
    }

    #[test]
    fn test_user_text_shape() {
        let json = ClientMessage::user_text("hi coach").to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "conversation.item.create");
        assert_eq!(value["item"]["type"], "message");
        assert_eq!(value["item"]["role"], "user");
        assert_eq!(value["item"]["content"][0]["type"], "input_text");
        assert_eq!(value["item"]["content"][0]["text"], "hi coach");
    }

    #[test]
    fn test_unknown_type_is_tolerated() {
        let msg = ServerMessage::from_json(r#"{"type":"rate_limits.updated","limits":[]}"#).unwrap();
        assert_eq!(msg, ServerMessage::Unknown);
    }

    #[test]
    fn test_ready_with_extra_fields() {
        let msg = ServerMessage::from_json(r#"{"type":"session.ready","session_id":"abc"}"#).unwrap();
        assert_eq!(msg, ServerMessage::SessionReady);
    }

    #[test]
    fn test_error_payload_forms() {
        let text = ServerMessage::from_json(r#"{"type":"error","error":"quota exceeded"}"#).unwrap();
        let detail =
            ServerMessage::from_json(r#"{"type":"error","error":{"message":"bad audio","code":"invalid"}}"#)
                .unwrap();

        match (text, detail) {
            (ServerMessage::Error { error: Some(a) }, ServerMessage::Error { error: Some(b) }) => {
                assert_eq!(a.message(), "quota exceeded");
                assert_eq!(b.message(), "bad audio");
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }
}
