//! Wire types for the per-session chat WebSocket.
//!
//! The client speaks three shapes: a plain chat message, a model selection
//! (tagged with `type`), and a persona toggle. The server answers with tagged
//! events; chunk events stream one generation token each.

use serde::{Deserialize, Serialize};

use super::chat::SessionId;

/// Tag marker so the untagged enum only matches `{"type": "select_model"}`.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectModelTag {
    SelectModel,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ClientMessage {
    SelectModel {
        #[serde(rename = "type")]
        _tag: SelectModelTag,
        model: String,
    },
    SetPersona {
        use_persona: bool,
        /// Legacy clients echo the session id; the socket path is authoritative.
        #[serde(default)]
        session_id: Option<serde_json::Value>,
    },
    Chat {
        message: String,
        #[serde(default)]
        session_id: Option<serde_json::Value>,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    SessionInfo {
        use_persona: Option<bool>,
        disable_toggle: bool,
        disable_model_select: bool,
        session_id: SessionId,
        selected_model: Option<String>,
    },
    ModelSelected {
        model: String,
    },
    AssistantResponseStart,
    AssistantResponseChunk {
        message: String,
    },
    AssistantResponseEnd,
    Error {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chat_message() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"message": "hello", "session_id": 7}"#).unwrap();
        match msg {
            ClientMessage::Chat { message, .. } => assert_eq!(message, "hello"),
            other => panic!("expected Chat, got {:?}", other),
        }
    }

    #[test]
    fn parses_select_model() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type": "select_model", "model": "gemma3:1b"}"#).unwrap();
        match msg {
            ClientMessage::SelectModel { model, .. } => assert_eq!(model, "gemma3:1b"),
            other => panic!("expected SelectModel, got {:?}", other),
        }
    }

    #[test]
    fn parses_persona_toggle_with_string_session_id() {
        // The browser pulls the session id from a DOM attribute, so it arrives
        // as a string. It must still deserialize.
        let msg: ClientMessage =
            serde_json::from_str(r#"{"use_persona": true, "session_id": "12"}"#).unwrap();
        match msg {
            ClientMessage::SetPersona { use_persona, .. } => assert!(use_persona),
            other => panic!("expected SetPersona, got {:?}", other),
        }
    }

    #[test]
    fn session_info_event_wire_shape() {
        let event = ServerEvent::SessionInfo {
            use_persona: Some(true),
            disable_toggle: true,
            disable_model_select: true,
            session_id: 3,
            selected_model: Some("gemma3:1b".to_string()),
        };
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "session_info");
        assert_eq!(json["disable_model_select"], true);
        assert_eq!(json["selected_model"], "gemma3:1b");
    }

    #[test]
    fn chunk_event_wire_shape() {
        let event = ServerEvent::AssistantResponseChunk {
            message: " token".to_string(),
        };
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "assistant_response_chunk");
        assert_eq!(json["message"], " token");
    }
}
