//! Full-screen capture for vision-augmented turns.
//!
//! Shells out to the platform screenshot tool, reads the PNG and returns it
//! as a base64 data URL ready to attach to a user message.

use std::path::PathBuf;
use std::process::Command;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tracing::debug;
use uuid::Uuid;

fn temp_png_path() -> PathBuf {
    std::env::temp_dir().join(format!("navi-screen-{}.png", Uuid::new_v4()))
}

/// Capture the primary screen and return it as a `data:image/png;base64,`
/// URL.
pub fn capture_screen() -> anyhow::Result<String> {
    let path = temp_png_path();
    let result = capture_to(&path);
    let data = match result {
        Ok(()) => std::fs::read(&path)
            .map_err(|e| anyhow::anyhow!("Failed to read screenshot: {e}")),
        Err(e) => Err(e),
    };
    let _ = std::fs::remove_file(&path);
    let bytes = data?;
    debug!(bytes = bytes.len(), "Captured screen");
    Ok(format!("data:image/png;base64,{}", BASE64.encode(bytes)))
}

#[cfg(target_os = "windows")]
fn capture_to(path: &std::path::Path) -> anyhow::Result<()> {
    let script = format!(
        "Add-Type -AssemblyName System.Windows.Forms,System.Drawing; \
         $b = [System.Windows.Forms.SystemInformation]::VirtualScreen; \
         $bmp = New-Object System.Drawing.Bitmap $b.Width, $b.Height; \
         $g = [System.Drawing.Graphics]::FromImage($bmp); \
         $g.CopyFromScreen($b.Left, $b.Top, 0, 0, $bmp.Size); \
         $bmp.Save('{}', [System.Drawing.Imaging.ImageFormat]::Png)",
        path.display()
    );
    let status = Command::new("powershell")
        .args(["-WindowStyle", "Hidden", "-Command", &script])
        .status()?;
    anyhow::ensure!(status.success(), "Screen capture exited with {status}");
    Ok(())
}

#[cfg(target_os = "macos")]
fn capture_to(path: &std::path::Path) -> anyhow::Result<()> {
    let status = Command::new("screencapture")
        .arg("-x")
        .arg(path)
        .status()?;
    anyhow::ensure!(status.success(), "screencapture exited with {status}");
    Ok(())
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn capture_to(path: &std::path::Path) -> anyhow::Result<()> {
    // Try the common tools in order; the first one present wins.
    for (tool, args) in [
        ("gnome-screenshot", vec!["-f"]),
        ("scrot", vec![]),
        ("import", vec!["-window", "root"]),
    ] {
        let mut cmd = Command::new(tool);
        cmd.args(&args).arg(path);
        match cmd.status() {
            Ok(status) if status.success() => return Ok(()),
            _ => continue,
        }
    }
    anyhow::bail!("No screenshot tool available (tried gnome-screenshot, scrot, import)")
}
