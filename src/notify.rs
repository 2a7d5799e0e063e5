//! Desktop notifications over the freedesktop notification service.
//!
//! Speaks to `org.freedesktop.Notifications` through the `gdbus` CLI so no
//! bus bindings are needed. The server-assigned id is kept so a shown
//! notification can be updated in place or closed.

use std::process::Command;

use anyhow::{Context, Result};

const DEFAULT_APPNAME: &str = "hookwm";

/// Show a notification and return a handle for later updates.
pub fn notify(summary: &str, body: &str) -> Result<Notification> {
    let mut notification = Notification::new(summary, body);
    notification.show()?;
    Ok(notification)
}

pub struct Notification {
    pub summary: String,
    pub body: String,
    /// Seconds before auto-dismiss; negative leaves it to the server.
    pub timeout: i32,
    /// 0 low, 1 normal, 2 critical.
    pub urgency: u8,
    pub appname: String,
    replace_id: u32,
}

impl Notification {
    pub fn new(summary: &str, body: &str) -> Self {
        Self {
            summary: summary.trim_start_matches('-').to_string(),
            body: body.to_string(),
            timeout: -1,
            urgency: 1,
            appname: DEFAULT_APPNAME.to_string(),
            replace_id: 0,
        }
    }

    pub fn timeout(mut self, seconds: i32) -> Self {
        self.timeout = seconds;
        self
    }

    pub fn urgency(mut self, urgency: u8) -> Self {
        self.urgency = urgency;
        self
    }

    /// Show (or re-show, replacing the previous popup) this notification.
    pub fn show(&mut self) -> Result<()> {
        let timeout_ms = if self.timeout < 0 { -1 } else { self.timeout * 1000 };
        let hints = if self.urgency != 1 {
            format!("{{'urgency': <byte {}>}}", self.urgency)
        } else {
            "{}".to_string()
        };

        let output = Command::new("gdbus")
            .args([
                "call",
                "--session",
                "--dest=org.freedesktop.Notifications",
                "--object-path=/org/freedesktop/Notifications",
                "--method=org.freedesktop.Notifications.Notify",
                &self.appname,
                &self.replace_id.to_string(),
                "",
                &self.summary,
                &self.body,
                "[]",
                &hints,
                &timeout_ms.to_string(),
            ])
            .output()
            .context("Failed to run gdbus")?;
        if !output.status.success() {
            anyhow::bail!(
                "Notification call failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        // Reply looks like "(uint32 42,)"; keep the id for updates.
        let stdout = String::from_utf8_lossy(&output.stdout);
        self.replace_id = stdout
            .split_whitespace()
            .nth(1)
            .map(|token| token.trim_end_matches([',', ')']))
            .and_then(|token| token.parse().ok())
            .context("Unparseable notification reply")?;
        Ok(())
    }

    /// Replace the popup's content.
    pub fn update(&mut self, summary: Option<&str>, body: Option<&str>) -> Result<()> {
        if let Some(summary) = summary {
            self.summary = summary.to_string();
        }
        if let Some(body) = body {
            self.body = body.to_string();
        }
        self.show()
    }

    /// Dismiss the popup.
    pub fn close(&self) -> Result<()> {
        let output = Command::new("gdbus")
            .args([
                "call",
                "--session",
                "--dest=org.freedesktop.Notifications",
                "--object-path=/org/freedesktop/Notifications",
                "--method=org.freedesktop.Notifications.CloseNotification",
                &self.replace_id.to_string(),
            ])
            .output()
            .context("Failed to run gdbus")?;
        if !output.status.success() {
            anyhow::bail!(
                "Notification close failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}
