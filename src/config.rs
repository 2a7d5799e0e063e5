//! Configuration file support for hookwm.
//!
//! The config file is the script surface: key bindings map key definitions
//! to actions, and window rules run when matching windows appear. Loaded
//! from ~/.config/hookwm/config.toml unless overridden on the command line.
//!
//! A missing file is not an error (the daemon exits cleanly without one);
//! a file that exists but does not parse is the one fatal configuration
//! path.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::actions::WindowStateUpdate;
use crate::display::DisplayConn;
use crate::window::Matcher;
use crate::wm::Wm;

/// Top-level configuration
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Persist and restore keyboard layout groups per window.
    pub track_kbd_layout: bool,
    /// Key definition -> action.
    pub keys: BTreeMap<String, KeyAction>,
    /// Window rules, applied in file order.
    #[serde(rename = "rule")]
    pub rules: Vec<Rule>,
}

/// Action bound to a key. Either a bare action name or a parameterized
/// table form.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum KeyAction {
    Simple(SimpleAction),
    /// Run a command. The program path may use `~`.
    Spawn { spawn: String },
    /// Switch to a desktop.
    Desktop { desktop: i64 },
    /// Move the active window to a desktop.
    #[serde(rename_all = "kebab-case")]
    ToDesktop { to_desktop: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SimpleAction {
    Close,
    FocusNext,
    FocusPrev,
    Restart,
    Maximize,
    Minimize,
    Restore,
}

/// A window rule: criteria plus the effects to apply when a window
/// matching them shows up.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct Rule {
    #[serde(rename = "match")]
    pub matcher: Matcher,
    /// Move the window to this desktop.
    pub desktop: Option<i64>,
    /// Ask the window manager to (un)decorate the window.
    pub decorated: Option<bool>,
    pub skip_taskbar: Option<bool>,
    pub skip_pager: Option<bool>,
    /// Switch to the window's desktop and focus it.
    pub activate: bool,
    /// Also apply during the startup replay of pre-existing windows.
    pub on_startup: bool,
}

impl Config {
    /// Default config file path (~/.config/hookwm/config.toml)
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hookwm")
            .join("config.toml")
    }

    /// Load and parse a config file. Parse failures propagate; the caller
    /// decides whether they are fatal.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {:?}", path))?;
        let config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse {:?}", path))?;
        log::info!("Loaded config from {:?}", path);
        Ok(config)
    }
}

/// Register everything the config describes on `wm`. Also used as the
/// reload step of a restart, after `stop` has cleared the registries.
pub fn apply<C: DisplayConn>(wm: &mut Wm<C>, config: &Config) -> Result<()> {
    wm.track_kbd_layout = config.track_kbd_layout;

    for (keydef, action) in &config.keys {
        let action = action.clone();
        wm.on_key(None, keydef, move |wm| run_action(wm, &action))?;
    }

    for rule in &config.rules {
        let matcher = (!rule.matcher.is_empty()).then(|| rule.matcher.clone());
        let on_startup = rule.on_startup;
        let rule = rule.clone();
        let callback = move |wm: &mut Wm<C>| apply_rule(wm, &rule);
        if on_startup {
            wm.on_create(matcher, callback);
        } else {
            wm.on_manage(matcher, callback);
        }
    }
    Ok(())
}

fn run_action<C: DisplayConn>(wm: &mut Wm<C>, action: &KeyAction) -> Result<()> {
    match action {
        KeyAction::Simple(SimpleAction::Close) => wm.close_window(None),
        KeyAction::Simple(SimpleAction::FocusNext) => wm.focus_next(None),
        KeyAction::Simple(SimpleAction::FocusPrev) => wm.focus_prev(None),
        KeyAction::Simple(SimpleAction::Restart) => {
            wm.request_restart();
            Ok(())
        }
        KeyAction::Simple(SimpleAction::Maximize) => {
            let window = match wm.current_window()? {
                Some(window) => window,
                None => return Ok(()),
            };
            let view = wm.window(window);
            let on = !(view.maximized_vert()? && view.maximized_horz()?);
            wm.set_window_state(
                window,
                WindowStateUpdate {
                    vmax: Some(on),
                    hmax: Some(on),
                    ..Default::default()
                },
            )
        }
        KeyAction::Simple(SimpleAction::Minimize) => match wm.current_window()? {
            Some(window) => wm.minimize_window(window),
            None => Ok(()),
        },
        KeyAction::Simple(SimpleAction::Restore) => match wm.current_window()? {
            Some(window) => wm.restore_window(window),
            None => Ok(()),
        },
        KeyAction::Spawn { spawn } => spawn_command(spawn),
        KeyAction::Desktop { desktop } => wm.activate_desktop(*desktop),
        KeyAction::ToDesktop { to_desktop } => match wm.current_window()? {
            Some(window) => wm.change_window_desktop(window, *to_desktop),
            None => Ok(()),
        },
    }
}

fn spawn_command(command: &str) -> Result<()> {
    let mut parts = command.split_whitespace();
    let program = parts.next().context("Empty spawn command")?;
    let program = shellexpand::tilde(program).into_owned();
    log::info!("Spawning {}", command);
    Command::new(program)
        .args(parts)
        .spawn()
        .with_context(|| format!("Failed to spawn {}", command))?;
    Ok(())
}

fn apply_rule<C: DisplayConn>(wm: &mut Wm<C>, rule: &Rule) -> Result<()> {
    let window = wm.event_window().context("Rule fired outside an event")?;

    if let Some(desktop) = rule.desktop {
        wm.change_window_desktop(window, desktop)?;
    }

    let update = WindowStateUpdate {
        decorate: rule.decorated,
        taskbar: rule.skip_taskbar.map(|skip| !skip),
        pager: rule.skip_pager.map(|skip| !skip),
        ..Default::default()
    };
    if update.decorate.is_some() || update.taskbar.is_some() || update.pager.is_some() {
        wm.set_window_state(window, update)?;
    }

    if rule.activate {
        wm.focus_and_raise(window)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_actions() {
        let toml = r#"
[keys]
"Mod+q" = "close"
"Mod+j" = "focus-next"
"Mod+Shift+r" = "restart"
"Mod+Return" = { spawn = "xterm -e tmux" }
"Mod+2" = { desktop = 1 }
"Mod+Shift+2" = { to-desktop = 1 }
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.keys["Mod+q"], KeyAction::Simple(SimpleAction::Close));
        assert_eq!(
            config.keys["Mod+j"],
            KeyAction::Simple(SimpleAction::FocusNext)
        );
        assert_eq!(
            config.keys["Mod+Return"],
            KeyAction::Spawn {
                spawn: "xterm -e tmux".to_string()
            }
        );
        assert_eq!(config.keys["Mod+2"], KeyAction::Desktop { desktop: 1 });
        assert_eq!(
            config.keys["Mod+Shift+2"],
            KeyAction::ToDesktop { to_desktop: 1 }
        );
    }

    #[test]
    fn test_parse_rules() {
        let toml = r#"
[[rule]]
match = { cls = "(?i)firefox" }
desktop = 1
activate = true

[[rule]]
match = { name = "popup", role = "dialog" }
decorated = false
skip-taskbar = true
on-startup = true
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.rules.len(), 2);

        let first = &config.rules[0];
        assert_eq!(first.matcher.cls.as_deref(), Some("(?i)firefox"));
        assert_eq!(first.desktop, Some(1));
        assert!(first.activate);
        assert!(!first.on_startup);

        let second = &config.rules[1];
        assert_eq!(second.matcher.name.as_deref(), Some("popup"));
        assert_eq!(second.matcher.role.as_deref(), Some("dialog"));
        assert_eq!(second.decorated, Some(false));
        assert_eq!(second.skip_taskbar, Some(true));
        assert!(second.on_startup);
    }

    #[test]
    fn test_empty_config() {
        let config: Config = toml::from_str("").unwrap();
        assert!(!config.track_kbd_layout);
        assert!(config.keys.is_empty());
        assert!(config.rules.is_empty());
    }

    #[test]
    fn test_unknown_rule_field_rejected() {
        let toml = r#"
[[rule]]
match = { cls = "x" }
no-such-effect = true
"#;
        assert!(toml::from_str::<Config>(toml).is_err());
    }

    #[test]
    fn test_track_kbd_layout_flag() {
        let config: Config = toml::from_str("track-kbd-layout = true").unwrap();
        assert!(config.track_kbd_layout);
    }
}
