//! Desktop notifications via `notify-send` (Linux) or `osascript` (macOS).

use std::process::Stdio;

use tracing::debug;

use super::NotificationSink;

/// Pops up desktop notifications. Delivery is best effort.
#[derive(Debug, Clone)]
pub struct DesktopSink {
    app_name: String,
}

impl DesktopSink {
    pub fn new(app_name: &str) -> Self {
        Self {
            app_name: app_name.to_string(),
        }
    }

    fn send(&self, title: &str, message: &str) {
        let Some((program, args)) = command_for(&self.app_name, title, message) else {
            debug!("desktop notifications unsupported on this platform");
            return;
        };

        // Inside a runtime (including blocking tasks) let tokio reap the
        // child; otherwise wait on a detached thread.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let result = tokio::process::Command::new(program)
                        .args(&args)
                        .stdout(Stdio::null())
                        .stderr(Stdio::null())
                        .status()
                        .await;
                    if let Err(e) = result {
                        debug!(program, error = %e, "desktop notification failed");
                    }
                });
            }
            Err(_) => {
                std::thread::spawn(move || {
                    let result = std::process::Command::new(program)
                        .args(&args)
                        .stdout(Stdio::null())
                        .stderr(Stdio::null())
                        .status();
                    if let Err(e) = result {
                        debug!(program, error = %e, "desktop notification failed");
                    }
                });
            }
        }
    }
}

impl NotificationSink for DesktopSink {
    fn file_changes_detected(&self, summary: &str) {
        self.send("Changes Detected", summary);
    }

    fn sync_error(&self, message: &str) {
        self.send("Sync Error", message);
    }

    fn sync_success(&self, message: &str) {
        self.send("Sync Complete", message);
    }
}

/// Program and arguments that show a notification on this platform.
fn command_for(app_name: &str, title: &str, message: &str) -> Option<(&'static str, Vec<String>)> {
    let full_title = format!("{app_name} - {title}");
    if cfg!(target_os = "linux") {
        Some((
            "notify-send",
            vec![format!("--app-name={app_name}"), full_title, message.to_string()],
        ))
    } else if cfg!(target_os = "macos") {
        let script = format!(
            "display notification \"{}\" with title \"{}\"",
            escape_applescript(message),
            escape_applescript(&full_title)
        );
        Some(("osascript", vec!["-e".to_string(), script]))
    } else {
        None
    }
}

fn escape_applescript(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
