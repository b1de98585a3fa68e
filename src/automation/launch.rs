//! Application launching and browser-based web search.

use std::process::Command;

use tracing::info;
use url::Url;

/// Resolve a friendly application name to the platform launch target.
/// Unknown names fall through to a best-effort literal launch.
fn resolve_alias(name: &str) -> &str {
    #[cfg(target_os = "windows")]
    let resolved = match name {
        "chrome" | "google chrome" => "chrome",
        "edge" | "microsoft edge" => "msedge",
        "firefox" => "firefox",
        "notepad" => "notepad",
        "calculator" | "calc" => "calc",
        "explorer" | "file explorer" | "files" => "explorer",
        "vscode" | "vs code" | "visual studio code" => "code",
        "cmd" | "command prompt" => "cmd",
        "terminal" | "powershell" => "powershell",
        "task manager" => "taskmgr",
        "paint" => "mspaint",
        _ => return name,
    };

    #[cfg(target_os = "macos")]
    let resolved = match name {
        "chrome" | "google chrome" => "Google Chrome",
        "edge" | "microsoft edge" => "Microsoft Edge",
        "firefox" => "Firefox",
        "notepad" => "TextEdit",
        "calculator" | "calc" => "Calculator",
        "explorer" | "file explorer" | "files" => "Finder",
        "vscode" | "vs code" | "visual studio code" => "Visual Studio Code",
        "terminal" => "Terminal",
        _ => return name,
    };

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    let resolved = match name {
        "chrome" | "google chrome" => "google-chrome",
        "edge" | "microsoft edge" => "microsoft-edge",
        "firefox" => "firefox",
        "notepad" => "gedit",
        "calculator" | "calc" => "gnome-calculator",
        "explorer" | "file explorer" | "files" => "nautilus",
        "vscode" | "vs code" | "visual studio code" => "code",
        "terminal" => "gnome-terminal",
        _ => return name,
    };

    resolved
}

/// Launch an application by friendly name, detached.
pub fn open_app(name: &str) -> anyhow::Result<()> {
    let lowered = name.trim().to_lowercase();
    let target = resolve_alias(&lowered);
    info!(app = %name, target = %target, "Launching application");

    #[cfg(target_os = "windows")]
    {
        // `start` detaches and resolves App Paths entries like the original
        Command::new("cmd").args(["/C", "start", "", target]).spawn()?;
    }
    #[cfg(target_os = "macos")]
    {
        Command::new("open").args(["-a", target]).spawn()?;
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        Command::new(target).spawn()?;
    }
    Ok(())
}

/// Open a URL in the default browser.
pub fn open_url(url: &str) -> anyhow::Result<()> {
    info!(url = %url, "Opening URL in default browser");

    #[cfg(target_os = "windows")]
    {
        Command::new("cmd").args(["/C", "start", "", url]).spawn()?;
    }
    #[cfg(target_os = "macos")]
    {
        Command::new("open").arg(url).spawn()?;
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        Command::new("xdg-open").arg(url).spawn()?;
    }
    Ok(())
}

/// Build the search-engine URL with the query encoded as the `q` parameter.
pub fn search_url(base: &str, query: &str) -> anyhow::Result<String> {
    let url = Url::parse_with_params(base, &[("q", query)])?;
    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_aliases_resolve() {
        // Every platform maps the common aliases somewhere
        assert_ne!(resolve_alias("calc"), "calc-unknown");
        let vs = resolve_alias("vs code");
        assert_eq!(vs, resolve_alias("vscode"));
        assert_eq!(vs, resolve_alias("visual studio code"));
    }

    #[test]
    fn test_unknown_name_passes_through() {
        assert_eq!(resolve_alias("some-custom-tool"), "some-custom-tool");
    }

    #[test]
    fn test_search_url_encodes_query() {
        let url = search_url("https://www.google.com/search", "rust async & await?").unwrap();
        assert!(url.starts_with("https://www.google.com/search?q="));
        assert!(!url.contains(' '));
        // The query round-trips through the encoding
        let parsed = Url::parse(&url).unwrap();
        let q = parsed
            .query_pairs()
            .find(|(k, _)| k == "q")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        assert_eq!(q, "rust async & await?");
    }
}
