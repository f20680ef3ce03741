use async_trait::async_trait;
use companion_core::AppLauncher;
use tokio::process::Command;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchTarget {
    Program(&'static str),
    Url(&'static str),
}

const KNOWN_APPS: &[(&str, LaunchTarget)] = &[
    ("calculator", LaunchTarget::Program("calc")),
    ("notepad", LaunchTarget::Program("notepad")),
    ("paint", LaunchTarget::Program("mspaint")),
    ("explorer", LaunchTarget::Program("explorer")),
    ("cmd", LaunchTarget::Program("cmd")),
    ("spotify", LaunchTarget::Url("spotify:")),
    ("browser", LaunchTarget::Url("https://google.com")),
];

pub fn resolve(name: &str) -> Option<LaunchTarget> {
    let wanted = name.trim().to_lowercase();
    KNOWN_APPS
        .iter()
        .find(|(known, _)| *known == wanted)
        .map(|(_, target)| *target)
}

fn url_opener(url: &str) -> Command {
    if cfg!(target_os = "windows") {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", "start", "", url]);
        cmd
    } else if cfg!(target_os = "macos") {
        let mut cmd = Command::new("open");
        cmd.arg(url);
        cmd
    } else {
        let mut cmd = Command::new("xdg-open");
        cmd.arg(url);
        cmd
    }
}

/// Launches applications from a fixed allow-list on the local desktop.
#[derive(Debug, Default, Clone)]
pub struct DesktopLauncher;

#[async_trait]
impl AppLauncher for DesktopLauncher {
    async fn open_app(&self, name: &str) -> String {
        let name = name.trim();
        let Some(target) = resolve(name) else {
            info!(app = %name, "No launch target for app");
            return format!("I don't know how to open {name}.");
        };

        let mut command = match target {
            LaunchTarget::Program(program) => Command::new(program),
            LaunchTarget::Url(url) => url_opener(url),
        };

        match command.spawn() {
            Ok(_) => {
                info!(app = %name, target = ?target, "App launched");
                format!("Opening {name}...")
            }
            Err(e) => {
                warn!(app = %name, target = ?target, error = %e, "App launch failed");
                format!("I couldn't open {name}.")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_is_case_insensitive_and_trimmed() {
        assert_eq!(resolve(" Calculator "), Some(LaunchTarget::Program("calc")));
        assert_eq!(resolve("PAINT"), Some(LaunchTarget::Program("mspaint")));
        assert_eq!(resolve("spotify"), Some(LaunchTarget::Url("spotify:")));
        assert_eq!(resolve("browser"), Some(LaunchTarget::Url("https://google.com")));
    }

    #[test]
    fn unknown_names_do_not_resolve() {
        assert_eq!(resolve("photoshop"), None);
        assert_eq!(resolve(""), None);
    }

    #[tokio::test]
    async fn unknown_app_gets_a_polite_refusal() {
        let status = DesktopLauncher.open_app("  Photoshop ").await;
        assert_eq!(status, "I don't know how to open Photoshop.");
    }
}
