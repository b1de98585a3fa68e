//! Text injection into the focused window.
//!
//! Primary path: save clipboard -> set text -> simulate paste -> restore
//! clipboard. Clipboard paste delivers the text literally, so no escaping is
//! needed. If the clipboard is unavailable, fall back to the platform's
//! keystroke tool, escaping characters that are special in its syntax.

use std::thread;
use std::time::Duration;

use arboard::Clipboard;
use tracing::{info, warn};

/// Inject text into the currently focused application.
pub fn inject_text(text: &str) -> anyhow::Result<()> {
    if text.is_empty() {
        return Ok(());
    }
    match inject_via_clipboard(text) {
        Ok(()) => Ok(()),
        Err(e) => {
            warn!("Clipboard injection failed ({e}), falling back to direct keystrokes");
            inject_direct(text)
        }
    }
}

/// Clipboard-mediated injection: save -> set -> paste -> restore.
fn inject_via_clipboard(text: &str) -> anyhow::Result<()> {
    info!(text_len = text.len(), "Injecting text via clipboard");

    let mut clipboard =
        Clipboard::new().map_err(|e| anyhow::anyhow!("Failed to open clipboard: {e}"))?;
    let previous = clipboard.get_text().ok();

    clipboard
        .set_text(text)
        .map_err(|e| anyhow::anyhow!("Failed to set clipboard text: {e}"))?;

    // Let the clipboard settle before pasting
    thread::sleep(Duration::from_millis(50));
    simulate_paste()?;
    thread::sleep(Duration::from_millis(100));

    if let Some(prev) = previous {
        if let Err(e) = clipboard.set_text(prev) {
            warn!("Failed to restore clipboard: {e}");
        }
    }

    Ok(())
}

/// Simulate Ctrl+V (Cmd+V on macOS).
fn simulate_paste() -> anyhow::Result<()> {
    use rdev::{simulate, EventType, Key};

    let delay = Duration::from_millis(20);
    let modifier = if cfg!(target_os = "macos") {
        Key::MetaLeft
    } else {
        Key::ControlLeft
    };

    simulate(&EventType::KeyPress(modifier))
        .map_err(|e| anyhow::anyhow!("Failed to simulate modifier press: {e:?}"))?;
    thread::sleep(delay);
    simulate(&EventType::KeyPress(Key::KeyV))
        .map_err(|e| anyhow::anyhow!("Failed to simulate V press: {e:?}"))?;
    thread::sleep(delay);
    simulate(&EventType::KeyRelease(Key::KeyV))
        .map_err(|e| anyhow::anyhow!("Failed to simulate V release: {e:?}"))?;
    thread::sleep(delay);
    simulate(&EventType::KeyRelease(modifier))
        .map_err(|e| anyhow::anyhow!("Failed to simulate modifier release: {e:?}"))?;

    Ok(())
}

/// Escape characters that SendKeys treats as control syntax.
fn escape_sendkeys(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '+' | '^' | '%' | '~' | '(' | ')' | '{' | '}' | '[' | ']' => {
                out.push('{');
                out.push(c);
                out.push('}');
            }
            _ => out.push(c),
        }
    }
    out
}

/// Direct keystroke fallback via the platform typing tool.
#[cfg(target_os = "windows")]
fn inject_direct(text: &str) -> anyhow::Result<()> {
    let escaped = escape_sendkeys(text).replace('\'', "''");
    let script = format!(
        "Add-Type -AssemblyName System.Windows.Forms; \
         [System.Windows.Forms.SendKeys]::SendWait('{escaped}')"
    );
    let status = std::process::Command::new("powershell")
        .args(["-WindowStyle", "Hidden", "-Command", &script])
        .status()?;
    anyhow::ensure!(status.success(), "SendKeys injection exited with {status}");
    Ok(())
}

#[cfg(target_os = "macos")]
fn inject_direct(text: &str) -> anyhow::Result<()> {
    let escaped = text.replace('\\', "\\\\").replace('"', "\\\"");
    let script = format!("tell application \"System Events\" to keystroke \"{escaped}\"");
    let status = std::process::Command::new("osascript")
        .args(["-e", &script])
        .status()?;
    anyhow::ensure!(status.success(), "osascript keystroke exited with {status}");
    Ok(())
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn inject_direct(text: &str) -> anyhow::Result<()> {
    let status = std::process::Command::new("xdotool")
        .args(["type", "--delay", "12", "--", text])
        .status()?;
    anyhow::ensure!(status.success(), "xdotool type exited with {status}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_sendkeys_wraps_special_chars() {
        assert_eq!(escape_sendkeys("a+b"), "a{+}b");
        assert_eq!(escape_sendkeys("100%"), "100{%}");
        assert_eq!(escape_sendkeys("f(x) = {y}"), "f{(}x{)} = {{}y{}}");
        assert_eq!(escape_sendkeys("[0]^2~"), "{[}0{]}{^}2{~}");
    }

    #[test]
    fn test_escape_sendkeys_passes_plain_text() {
        let plain = "hello world 123";
        assert_eq!(escape_sendkeys(plain), plain);
    }
}
