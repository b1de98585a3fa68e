//! OS-level automation primitives.
//!
//! The [`Automation`] trait is the seam between the command executor's
//! ordering rules and the real OS surface, so the executor can be tested
//! against a recording fake. [`OsAutomation`] is the live implementation:
//! keystroke injection, app launch, browser search, key combos and pointer
//! clicks.

pub mod inject;
pub mod keys;
pub mod launch;
pub mod screen;

pub use screen::capture_screen;

/// What the executor needs from the operating system.
pub trait Automation: Send + Sync {
    /// Send literal text to the window with input focus.
    fn type_text(&self, text: &str) -> anyhow::Result<()>;
    /// Launch an application by friendly name.
    fn open_app(&self, name: &str) -> anyhow::Result<()>;
    /// Open the default browser on a web search for `query`.
    fn search_web(&self, query: &str) -> anyhow::Result<()>;
    /// Send a `+`-separated key combination to the focused window.
    fn press_keys(&self, combo: &str) -> anyhow::Result<()>;
    /// Move the pointer to absolute screen coordinates and left-click.
    fn click(&self, x: i32, y: i32) -> anyhow::Result<()>;
}

/// The live OS implementation.
pub struct OsAutomation {
    search_url: String,
}

impl OsAutomation {
    pub fn new(search_url: impl Into<String>) -> Self {
        Self {
            search_url: search_url.into(),
        }
    }
}

impl Automation for OsAutomation {
    fn type_text(&self, text: &str) -> anyhow::Result<()> {
        inject::inject_text(text)
    }

    fn open_app(&self, name: &str) -> anyhow::Result<()> {
        launch::open_app(name)
    }

    fn search_web(&self, query: &str) -> anyhow::Result<()> {
        let url = launch::search_url(&self.search_url, query)?;
        launch::open_url(&url)
    }

    fn press_keys(&self, combo: &str) -> anyhow::Result<()> {
        keys::press_combo(combo)
    }

    fn click(&self, x: i32, y: i32) -> anyhow::Result<()> {
        keys::click_at(x, y)
    }
}
