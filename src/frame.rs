//! The GoTTY wire protocol: a single leading ASCII byte tag followed by a
//! UTF-8 payload. This tag table is a compatibility contract with existing
//! front-ends and MUST NOT change.

use base64::Engine;
use serde::{Deserialize, Serialize};

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    /// `'0'` - raw keyboard input, written verbatim (not base64) to the PTY.
    Input(String),
    /// `'1'` - liveness probe; server replies with Pong.
    Ping,
    /// `'2'` - terminal resize; payload is `{"columns":N,"rows":M}`.
    Resize { columns: u16, rows: u16 },
}

#[derive(Debug, Deserialize)]
struct ResizePayload {
    columns: u16,
    rows: u16,
}

impl ClientFrame {
    /// Decode one WebSocket text frame. Unknown tags return `None` per
    /// spec ("unknown tags are ignored"); malformed known tags are an error.
    pub fn decode(text: &str) -> Result<Option<Self>, FrameError> {
        let mut chars = text.chars();
        let tag = chars.next().ok_or(FrameError::Empty)?;
        let payload = chars.as_str();
        match tag {
            '0' => Ok(Some(ClientFrame::Input(payload.to_string()))),
            '1' => Ok(Some(ClientFrame::Ping)),
            '2' => {
                let parsed: ResizePayload = serde_json::from_str(payload)
                    .map_err(|e| FrameError::BadResize(e.to_string()))?;
                Ok(Some(ClientFrame::Resize {
                    columns: parsed.columns,
                    rows: parsed.rows,
                }))
            }
            _ => Ok(None),
        }
    }
}

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    /// `'0'` - base64-encoded PTY output bytes.
    Output(Vec<u8>),
    /// `'1'` - empty-payload reply to a client Ping.
    Pong,
    /// `'2'` - rendered window title.
    SetWindowTitle(String),
    /// `'3'` - JSON blob of front-end terminal preferences.
    SetPreferences(serde_json::Value),
    /// `'4'` - reconnect delay, in seconds.
    SetReconnect(u32),
}

impl ServerFrame {
    /// Encode to the wire text representation (tag byte + payload).
    pub fn encode(&self) -> String {
        match self {
            ServerFrame::Output(bytes) => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
                format!("0{encoded}")
            }
            ServerFrame::Pong => "1".to_string(),
            ServerFrame::SetWindowTitle(title) => format!("2{title}"),
            ServerFrame::SetPreferences(prefs) => {
                format!("3{}", serde_json::to_string(prefs).unwrap_or_default())
            }
            ServerFrame::SetReconnect(secs) => format!("4{secs}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,
    #[error("malformed resize payload: {0}")]
    BadResize(String),
}

/// The first message a client sends after the WebSocket upgrade completes.
/// Carries the optional extra CLI arguments and, when credential auth is
/// configured, the shared auth token. Used once, then discarded.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InitMessage {
    #[serde(rename = "Arguments", default)]
    pub arguments: String,
    #[serde(rename = "AuthToken", default)]
    pub auth_token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_input_is_literal_not_base64() {
        let frame = ClientFrame::decode("0hello\n").unwrap().unwrap();
        assert_eq!(frame, ClientFrame::Input("hello\n".to_string()));
    }

    #[test]
    fn decode_ping() {
        let frame = ClientFrame::decode("1").unwrap().unwrap();
        assert_eq!(frame, ClientFrame::Ping);
    }

    #[test]
    fn decode_resize() {
        let frame = ClientFrame::decode(r#"2{"columns":120,"rows":40}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            frame,
            ClientFrame::Resize {
                columns: 120,
                rows: 40
            }
        );
    }

    #[test]
    fn decode_malformed_resize_errors() {
        let result = ClientFrame::decode("2not json");
        assert!(matches!(result, Err(FrameError::BadResize(_))));
    }

    #[test]
    fn decode_unknown_tag_is_ignored() {
        let result = ClientFrame::decode("9whatever").unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn decode_empty_is_error() {
        assert!(matches!(ClientFrame::decode(""), Err(FrameError::Empty)));
    }

    #[test]
    fn encode_output_is_base64() {
        let encoded = ServerFrame::Output(b"hi".to_vec()).encode();
        assert_eq!(encoded, format!("0{}", base64::engine::general_purpose::STANDARD.encode(b"hi")));
    }

    #[test]
    fn encode_pong_has_empty_payload() {
        assert_eq!(ServerFrame::Pong.encode(), "1");
    }

    #[test]
    fn encode_set_window_title() {
        assert_eq!(
            ServerFrame::SetWindowTitle("my-shell".to_string()).encode(),
            "2my-shell"
        );
    }

    #[test]
    fn encode_set_reconnect() {
        assert_eq!(ServerFrame::SetReconnect(10).encode(), "410");
    }

    #[test]
    fn init_message_roundtrip() {
        let json = r#"{"Arguments":"--foo=bar","AuthToken":"secret"}"#;
        let msg: InitMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.arguments, "--foo=bar");
        assert_eq!(msg.auth_token, "secret");
    }

    #[test]
    fn init_message_defaults_when_fields_missing() {
        let msg: InitMessage = serde_json::from_str("{}").unwrap();
        assert_eq!(msg.arguments, "");
        assert_eq!(msg.auth_token, "");
    }
}
