//! Sequential command execution, concurrent with speech playback.
//!
//! The executor is an explicitly spawned task with a cancellation flag and a
//! joinable handle, not a fire-and-forget call. Commands run strictly in
//! parse order; each OS call returns before the next starts, so keystrokes
//! and clicks never interleave. Speech playback for the same turn runs
//! concurrently with no ordering between the two.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::{parse_click_coords, Command, CommandKind};
use crate::automation::Automation;
use crate::config::ExecConfig;

/// Progress reports from a running executor task.
#[derive(Debug)]
pub enum ExecutorEvent {
    /// A command is being handed to the OS.
    Dispatched { kind: CommandKind, payload: String },
    /// One command failed; the rest of the queue still runs.
    CommandFailed {
        kind: CommandKind,
        payload: String,
        error: String,
    },
    /// The queue is drained (or cancelled).
    Finished,
}

/// Handle to a spawned executor task.
pub struct ExecutorHandle {
    cancel: Arc<AtomicBool>,
    pub join: JoinHandle<()>,
}

impl ExecutorHandle {
    /// Ask the task to stop before its next command. Already-dispatched
    /// commands run to completion.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }
}

/// Spawn the executor for one assistant turn. Returns immediately so the
/// caller can start speech playback concurrently.
pub fn spawn(
    commands: Vec<Command>,
    automation: Arc<dyn Automation>,
    cfg: ExecConfig,
    events: mpsc::UnboundedSender<ExecutorEvent>,
) -> ExecutorHandle {
    let cancel = Arc::new(AtomicBool::new(false));
    let task_cancel = cancel.clone();
    let join = tokio::spawn(async move {
        run(commands, automation, cfg, events, task_cancel).await;
    });
    ExecutorHandle { cancel, join }
}

async fn run(
    commands: Vec<Command>,
    automation: Arc<dyn Automation>,
    cfg: ExecConfig,
    events: mpsc::UnboundedSender<ExecutorEvent>,
    cancel: Arc<AtomicBool>,
) {
    for (i, cmd) in commands.iter().enumerate() {
        if cancel.load(Ordering::SeqCst) {
            info!(remaining = commands.len() - i, "Executor cancelled");
            break;
        }

        // After OPEN the new window needs time to take foreground focus:
        // a longer settle before TYPE, a shorter one otherwise, then a
        // focusing click so the next action lands in the opened window.
        if i > 0 && commands[i - 1].kind == CommandKind::Open {
            let delay = if cmd.kind == CommandKind::Type {
                cfg.settle_before_type()
            } else {
                cfg.settle_after_open()
            };
            tokio::time::sleep(delay).await;
            if let Err(e) = automation.click(cfg.focus_x, cfg.focus_y) {
                warn!("Focusing click failed: {e}");
            }
        }

        let _ = events.send(ExecutorEvent::Dispatched {
            kind: cmd.kind,
            payload: cmd.payload.clone(),
        });
        if let Err(e) = dispatch(automation.as_ref(), cmd) {
            warn!(kind = %cmd.kind, payload = %cmd.payload, "Command failed: {e}");
            let _ = events.send(ExecutorEvent::CommandFailed {
                kind: cmd.kind,
                payload: cmd.payload.clone(),
                error: e.to_string(),
            });
        }
    }
    let _ = events.send(ExecutorEvent::Finished);
}

fn dispatch(automation: &dyn Automation, cmd: &Command) -> anyhow::Result<()> {
    match cmd.kind {
        CommandKind::Type => automation.type_text(&cmd.payload),
        CommandKind::Open => automation.open_app(&cmd.payload),
        CommandKind::Search => automation.search_web(&cmd.payload),
        CommandKind::Press => automation.press_keys(&cmd.payload),
        CommandKind::Click => {
            let (x, y) = parse_click_coords(&cmd.payload)
                .ok_or_else(|| anyhow::anyhow!("Malformed CLICK payload: {}", cmd.payload))?;
            automation.click(x, y)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    /// Records every OS call with the paused-clock time it happened at.
    struct RecordingAutomation {
        calls: Mutex<Vec<(String, Instant)>>,
        fail_on: Option<&'static str>,
    }

    impl RecordingAutomation {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                fail_on: None,
            })
        }

        fn failing_on(label: &'static str) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                fail_on: Some(label),
            })
        }

        fn record(&self, label: String) -> anyhow::Result<()> {
            let fail = self
                .fail_on
                .map(|f| label.starts_with(f))
                .unwrap_or(false);
            self.calls.lock().unwrap().push((label, Instant::now()));
            if fail {
                anyhow::bail!("injected failure");
            }
            Ok(())
        }

        fn labels(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(l, _)| l.clone())
                .collect()
        }

        fn time_of(&self, label: &str) -> Instant {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .find(|(l, _)| l == label)
                .map(|(_, t)| *t)
                .unwrap()
        }
    }

    impl Automation for RecordingAutomation {
        fn type_text(&self, text: &str) -> anyhow::Result<()> {
            self.record(format!("type:{text}"))
        }
        fn open_app(&self, name: &str) -> anyhow::Result<()> {
            self.record(format!("open:{name}"))
        }
        fn search_web(&self, query: &str) -> anyhow::Result<()> {
            self.record(format!("search:{query}"))
        }
        fn press_keys(&self, combo: &str) -> anyhow::Result<()> {
            self.record(format!("press:{combo}"))
        }
        fn click(&self, x: i32, y: i32) -> anyhow::Result<()> {
            self.record(format!("click:{x},{y}"))
        }
    }

    fn cmd(kind: CommandKind, payload: &str) -> Command {
        Command {
            kind,
            payload: payload.into(),
        }
    }

    async fn run_to_completion(
        commands: Vec<Command>,
        automation: Arc<RecordingAutomation>,
    ) -> Vec<ExecutorEvent> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawn(commands, automation, ExecConfig::default(), tx);
        handle.join.await.unwrap();
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_dispatch_in_parse_order() {
        let automation = RecordingAutomation::new();
        run_to_completion(
            vec![
                cmd(CommandKind::Press, "ctrl+t"),
                cmd(CommandKind::Type, "hello"),
                cmd(CommandKind::Click, "10,20"),
            ],
            automation.clone(),
        )
        .await;
        assert_eq!(
            automation.labels(),
            vec!["press:ctrl+t", "type:hello", "click:10,20"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_then_type_waits_and_focus_clicks() {
        let automation = RecordingAutomation::new();
        run_to_completion(
            vec![
                cmd(CommandKind::Open, "notepad"),
                cmd(CommandKind::Type, "hello world"),
            ],
            automation.clone(),
        )
        .await;

        // Focus click at the default screen center lands between the two
        assert_eq!(
            automation.labels(),
            vec!["open:notepad", "click:960,540", "type:hello world"]
        );
        let opened = automation.time_of("open:notepad");
        let typed = automation.time_of("type:hello world");
        assert!(typed - opened >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_then_non_type_uses_shorter_settle() {
        let automation = RecordingAutomation::new();
        run_to_completion(
            vec![
                cmd(CommandKind::Open, "chrome"),
                cmd(CommandKind::Press, "ctrl+l"),
            ],
            automation.clone(),
        )
        .await;

        assert_eq!(
            automation.labels(),
            vec!["open:chrome", "click:960,540", "press:ctrl+l"]
        );
        let opened = automation.time_of("open:chrome");
        let pressed = automation.time_of("press:ctrl+l");
        let gap = pressed - opened;
        assert!(gap >= Duration::from_secs(2));
        assert!(gap < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_failure_does_not_abort_queue() {
        let automation = RecordingAutomation::failing_on("press");
        let events = run_to_completion(
            vec![
                cmd(CommandKind::Type, "a"),
                cmd(CommandKind::Press, "ctrl+z"),
                cmd(CommandKind::Type, "b"),
            ],
            automation.clone(),
        )
        .await;

        assert_eq!(automation.labels(), vec!["type:a", "press:ctrl+z", "type:b"]);
        let failed: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, ExecutorEvent::CommandFailed { .. }))
            .collect();
        assert_eq!(failed.len(), 1);
        assert!(matches!(events.last(), Some(ExecutorEvent::Finished)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_click_payload_fails_locally() {
        let automation = RecordingAutomation::new();
        let events = run_to_completion(
            vec![cmd(CommandKind::Click, "abc,def"), cmd(CommandKind::Type, "x")],
            automation.clone(),
        )
        .await;
        // No OS click happened, but the queue continued
        assert_eq!(automation.labels(), vec!["type:x"]);
        assert!(events
            .iter()
            .any(|e| matches!(e, ExecutorEvent::CommandFailed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_before_next_command() {
        let automation = RecordingAutomation::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = spawn(
            vec![cmd(CommandKind::Type, "a"), cmd(CommandKind::Type, "b")],
            automation.clone(),
            ExecConfig::default(),
            tx,
        );
        handle.cancel();
        handle.join.await.unwrap();
        // Cancelled before the loop started or between commands; never mid-call
        assert!(automation.labels().len() <= 2);
    }
}
