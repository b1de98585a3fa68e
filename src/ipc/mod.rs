//! IPC protocol with the UI shell.
//!
//! JSON lines on stdin/stdout. Events go out as
//! `{"event": "<name>", "data": {...}}`; commands come in as
//! `{"command": "<name>", ...}`. stdout belongs to this protocol, which is
//! why logging writes to stderr.

pub mod bridge;

use serde::{Deserialize, Serialize};

use crate::command::CommandKind;
use crate::session::SessionState;

/// Events emitted to the UI shell via stdout.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum EngineEvent {
    Starting {},
    Ready {},
    StateChange { state: SessionState },
    RecordingStart {},
    RecordingStop {},
    Transcription { text: String, is_final: bool },
    Response { text: String },
    CommandDispatch { kind: CommandKind, payload: String },
    SpeakingStart { text: String },
    SpeakingEnd {},
    Connectivity { connected: bool },
    Error { message: String },
    AudioDevices { input: Vec<String>, output: Vec<String> },
    Pong {},
    Stopping {},
}

/// Commands received from the UI shell via stdin.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command")]
#[serde(rename_all = "snake_case")]
pub enum EngineCommand {
    StartListening {},
    StopListening {},
    Query {
        text: String,
        #[serde(default)]
        image: Option<String>,
        #[serde(default)]
        with_screen: bool,
    },
    SystemSpeak {
        text: String,
    },
    ListAudioDevices {},
    Ping {},
    Stop {},
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_shape() {
        let ev = EngineEvent::Transcription {
            text: "hello".into(),
            is_final: true,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "transcription");
        assert_eq!(json["data"]["text"], "hello");
        assert_eq!(json["data"]["is_final"], true);

        let ev = EngineEvent::StateChange {
            state: SessionState::Listening,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "state_change");
        assert_eq!(json["data"]["state"], "listening");

        let ev = EngineEvent::CommandDispatch {
            kind: CommandKind::Open,
            payload: "notepad".into(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["data"]["kind"], "OPEN");
    }

    #[test]
    fn test_command_parsing() {
        let cmd: EngineCommand =
            serde_json::from_str(r#"{"command":"start_listening"}"#).unwrap();
        assert!(matches!(cmd, EngineCommand::StartListening {}));

        let cmd: EngineCommand =
            serde_json::from_str(r#"{"command":"query","text":"open notepad"}"#).unwrap();
        match cmd {
            EngineCommand::Query {
                text,
                image,
                with_screen,
            } => {
                assert_eq!(text, "open notepad");
                assert!(image.is_none());
                assert!(!with_screen);
            }
            _ => panic!("expected query"),
        }

        let cmd: EngineCommand = serde_json::from_str(
            r#"{"command":"query","text":"what is on screen","with_screen":true}"#,
        )
        .unwrap();
        assert!(matches!(cmd, EngineCommand::Query { with_screen: true, .. }));
    }

    #[test]
    fn test_unknown_command_is_rejected() {
        assert!(serde_json::from_str::<EngineCommand>(r#"{"command":"reboot"}"#).is_err());
    }
}
