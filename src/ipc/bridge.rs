//! IPC bridge: blocking stdin reader thread and stdout event emitter.

use std::io::{self, BufRead, Write};

use tokio::sync::mpsc;
use tracing::{debug, error};

use super::{EngineCommand, EngineEvent};

/// Emit an event as one JSON line on stdout and flush.
pub fn emit_event(event: &EngineEvent) {
    let json = match serde_json::to_string(event) {
        Ok(j) => j,
        Err(e) => {
            error!("Failed to serialize event: {e}");
            return;
        }
    };
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    // Write/flush errors are ignored; the pipe may be closed.
    let _ = writeln!(handle, "{json}");
    let _ = handle.flush();
}

/// Convenience helper for error events.
pub fn emit_error(message: impl Into<String>) {
    emit_event(&EngineEvent::Error {
        message: message.into(),
    });
}

/// Spawn a blocking thread that reads JSON lines from stdin and forwards
/// deserialized commands through the returned channel. The thread exits when
/// stdin closes (parent process gone).
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<EngineCommand> {
    let (tx, rx) = mpsc::unbounded_channel();

    std::thread::spawn(move || {
        let stdin = io::stdin();
        let reader = stdin.lock();
        for line in reader.lines() {
            match line {
                Ok(text) => {
                    let trimmed = text.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<EngineCommand>(trimmed) {
                        Ok(cmd) => {
                            debug!(?cmd, "Received command");
                            if tx.send(cmd).is_err() {
                                break; // main task is gone
                            }
                        }
                        Err(e) => {
                            error!("Invalid JSON command: {e} — input: {trimmed}");
                            emit_error(format!("Invalid JSON command: {e}"));
                        }
                    }
                }
                Err(e) => {
                    error!("stdin read error: {e}");
                    break;
                }
            }
        }
        debug!("stdin reader thread exiting");
    });

    rx
}
