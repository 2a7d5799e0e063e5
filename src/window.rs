//! Derived window attributes and matchers.
//!
//! A [`WindowView`] is a cheap per-event handle around a window id. Each
//! derived attribute is computed from property reads on first access and
//! memoized for the lifetime of the view only; a fresh view sees fresh
//! server state.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use once_cell::sync::Lazy;
use once_cell::unsync::OnceCell;
use regex::Regex;
use serde::Deserialize;
use x11rb::protocol::xproto::{Atom, Window};

use crate::atoms::AtomCache;
use crate::display::DisplayConn;
use crate::props::{self, PropertyValue};

/// Desktop index meaning "on all desktops".
pub const ALL_DESKTOPS: i64 = -1;

/// Process-wide compiled-pattern cache, keyed by pattern text.
static RE_CACHE: Lazy<Mutex<HashMap<String, Regex>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Unanchored regex search with pattern memoization.
fn match_string(pattern: &str, data: &str) -> Result<bool> {
    let mut cache = RE_CACHE.lock().unwrap();
    if !cache.contains_key(pattern) {
        cache.insert(pattern.to_string(), Regex::new(pattern)?);
    }
    Ok(cache[pattern].is_match(data))
}

/// Optional window criteria, AND-combined.
///
/// `name`, `cls`, `role` and `title` are regular expressions matched against
/// the corresponding attribute (the empty string when the attribute is
/// absent); `desktop` is exact equality.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Matcher {
    /// First part of `WM_CLASS` (the instance).
    pub name: Option<String>,
    /// Second part of `WM_CLASS`.
    pub cls: Option<String>,
    /// `WM_WINDOW_ROLE`.
    pub role: Option<String>,
    /// `_NET_WM_NAME`.
    pub title: Option<String>,
    /// Exact desktop index (-1 for "all desktops").
    pub desktop: Option<i64>,
}

impl Matcher {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.cls.is_none()
            && self.role.is_none()
            && self.title.is_none()
            && self.desktop.is_none()
    }
}

/// Lazily-computed view over one window.
pub struct WindowView<'a, C: DisplayConn> {
    conn: &'a C,
    atoms: &'a AtomCache,
    root: Window,
    id: Window,
    desktop: OnceCell<Option<i64>>,
    name_cls: OnceCell<(Option<String>, Option<String>)>,
    title: OnceCell<Option<String>>,
    role: OnceCell<Option<String>>,
    state: OnceCell<Vec<String>>,
    pid: OnceCell<Option<u32>>,
}

impl<'a, C: DisplayConn> WindowView<'a, C> {
    pub fn new(conn: &'a C, atoms: &'a AtomCache, root: Window, id: Window) -> Self {
        Self {
            conn,
            atoms,
            root,
            id,
            desktop: OnceCell::new(),
            name_cls: OnceCell::new(),
            title: OnceCell::new(),
            role: OnceCell::new(),
            state: OnceCell::new(),
            pid: OnceCell::new(),
        }
    }

    pub fn id(&self) -> Window {
        self.id
    }

    fn read(
        &self,
        window: Window,
        property: &str,
        type_: Option<&str>,
        split: bool,
    ) -> Result<Option<PropertyValue>> {
        let property = self.atoms.intern(self.conn, property)?;
        let type_: Atom = match type_ {
            Some(name) => self.atoms.intern(self.conn, name)?,
            None => 0,
        };
        props::read_property(self.conn, window, property, type_, split)
    }

    /// Desktop the window sits on: `Some(-1)` for all desktops, `None` when
    /// the property is absent.
    pub fn desktop(&self) -> Result<Option<i64>> {
        self.desktop
            .get_or_try_init(|| {
                let result = self.read(self.id, "_NET_WM_DESKTOP", Some("CARDINAL"), false)?;
                Ok(result.and_then(|v| v.first_card32()).map(|d| {
                    // Both sentinel encodings collapse to "all desktops".
                    if d == 0x0FFF_FFFF || d == 0xFFFF_FFFF {
                        ALL_DESKTOPS
                    } else {
                        i64::from(d)
                    }
                }))
            })
            .copied()
    }

    fn name_and_class(&self) -> Result<&(Option<String>, Option<String>)> {
        self.name_cls.get_or_try_init(|| {
            let result = self.read(self.id, "WM_CLASS", Some("STRING"), true)?;
            match result {
                Some(PropertyValue::Text(parts)) if parts.len() == 2 => {
                    Ok((Some(parts[0].clone()), Some(parts[1].clone())))
                }
                _ => Ok((None, None)),
            }
        })
    }

    /// First part of `WM_CLASS`.
    pub fn name(&self) -> Result<Option<String>> {
        Ok(self.name_and_class()?.0.clone())
    }

    /// Second part of `WM_CLASS`.
    pub fn cls(&self) -> Result<Option<String>> {
        Ok(self.name_and_class()?.1.clone())
    }

    /// `_NET_WM_NAME`.
    pub fn title(&self) -> Result<Option<String>> {
        self.title
            .get_or_try_init(|| {
                let result = self.read(self.id, "_NET_WM_NAME", Some("UTF8_STRING"), false)?;
                Ok(match result {
                    Some(PropertyValue::Text(parts)) => parts.into_iter().next(),
                    _ => None,
                })
            })
            .cloned()
    }

    /// `WM_WINDOW_ROLE`.
    pub fn role(&self) -> Result<Option<String>> {
        self.role
            .get_or_try_init(|| {
                let result = self.read(self.id, "WM_WINDOW_ROLE", Some("STRING"), false)?;
                Ok(match result {
                    Some(PropertyValue::Text(parts)) => {
                        parts.into_iter().next().filter(|s| !s.is_empty())
                    }
                    _ => None,
                })
            })
            .cloned()
    }

    /// Names of the atoms in `_NET_WM_STATE`. Atoms that fail to resolve
    /// are skipped.
    pub fn state(&self) -> Result<&Vec<String>> {
        self.state.get_or_try_init(|| {
            let result = self.read(self.id, "_NET_WM_STATE", Some("ATOM"), false)?;
            let mut names = Vec::new();
            if let Some(value) = result {
                for &atom in value.card32s() {
                    match self.atoms.name_of(self.conn, atom) {
                        Ok(name) if !name.is_empty() => names.push(name),
                        _ => {}
                    }
                }
            }
            Ok(names)
        })
    }

    fn has_state(&self, name: &str) -> Result<bool> {
        Ok(self.state()?.iter().any(|s| s == name))
    }

    pub fn maximized_vert(&self) -> Result<bool> {
        self.has_state("_NET_WM_STATE_MAXIMIZED_VERT")
    }

    pub fn maximized_horz(&self) -> Result<bool> {
        self.has_state("_NET_WM_STATE_MAXIMIZED_HORZ")
    }

    pub fn urgent(&self) -> Result<bool> {
        self.has_state("_NET_WM_STATE_DEMANDS_ATTENTION")
    }

    pub fn fullscreen(&self) -> Result<bool> {
        self.has_state("_NET_WM_STATE_FULLSCREEN")
    }

    /// `_NET_WM_PID`.
    pub fn pid(&self) -> Result<Option<u32>> {
        self.pid
            .get_or_try_init(|| {
                let result = self.read(self.id, "_NET_WM_PID", Some("CARDINAL"), false)?;
                Ok(result.and_then(|v| v.first_card32()))
            })
            .copied()
    }

    /// Name of the running window manager, from the supporting-WM-check
    /// chase. `None` when no compliant window manager is running.
    pub fn wm_name(&self) -> Result<Option<String>> {
        let check = self.read(self.root, "_NET_SUPPORTING_WM_CHECK", Some("WINDOW"), false)?;
        let check_window = match check.and_then(|v| v.first_card32()) {
            Some(w) => w,
            None => return Ok(None),
        };
        let result = self.read(check_window, "_NET_WM_NAME", Some("UTF8_STRING"), false)?;
        Ok(match result {
            Some(PropertyValue::Text(parts)) => parts.into_iter().next(),
            _ => None,
        })
    }

    /// Whether the window manager decorates this window.
    ///
    /// No compliant window manager, the override-redirect attribute, the
    /// Openbox undecorated state, or a cleared decorations field in
    /// `_MOTIF_WM_HINTS` all mean "not decorated"; so does any read failure
    /// along the way.
    pub fn decorated(&self) -> bool {
        self.decorated_inner().unwrap_or(false)
    }

    fn decorated_inner(&self) -> Result<bool> {
        let wm_name = match self.wm_name()? {
            Some(name) => name,
            None => return Ok(false),
        };
        match self.conn.window_attributes(self.id)? {
            Some(attrs) if attrs.override_redirect => return Ok(false),
            Some(_) => {}
            None => return Ok(false),
        }
        if wm_name == "Openbox" {
            return Ok(!self.has_state("_OB_WM_STATE_UNDECORATED")?);
        }
        let hints = self.read(self.id, "_MOTIF_WM_HINTS", Some("_MOTIF_WM_HINTS"), false)?;
        if let Some(value) = hints {
            let fields = value.card32s();
            // Field 2 of the 5-field hints struct is the decorations flag.
            if fields.len() >= 3 && fields[2] == 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Whether the window satisfies every provided criterion.
    pub fn matches(&self, matcher: &Matcher) -> Result<bool> {
        if let Some(pattern) = &matcher.name {
            if !match_string(pattern, self.name()?.as_deref().unwrap_or(""))? {
                return Ok(false);
            }
        }
        if let Some(pattern) = &matcher.cls {
            if !match_string(pattern, self.cls()?.as_deref().unwrap_or(""))? {
                return Ok(false);
            }
        }
        if let Some(pattern) = &matcher.role {
            if !match_string(pattern, self.role()?.as_deref().unwrap_or(""))? {
                return Ok(false);
            }
        }
        if let Some(pattern) = &matcher.title {
            if !match_string(pattern, self.title()?.as_deref().unwrap_or(""))? {
                return Ok(false);
            }
        }
        if let Some(desktop) = matcher.desktop {
            if self.desktop()? != Some(desktop) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_string_is_search_not_anchor() {
        assert!(match_string("term", "xterm-256color").unwrap());
        assert!(match_string("^xterm", "xterm-256color").unwrap());
        assert!(!match_string("^term", "xterm-256color").unwrap());
        assert!(match_string("(?i)firefox", "Firefox").unwrap());
    }

    #[test]
    fn test_match_string_caches_patterns() {
        assert!(match_string("cache-me-[0-9]+", "cache-me-42").unwrap());
        assert!(RE_CACHE.lock().unwrap().contains_key("cache-me-[0-9]+"));
    }

    #[test]
    fn test_match_string_invalid_pattern() {
        assert!(match_string("([unclosed", "anything").is_err());
    }

    #[test]
    fn test_empty_matcher() {
        assert!(Matcher::default().is_empty());
        let m = Matcher {
            cls: Some("urxvt".into()),
            ..Default::default()
        };
        assert!(!m.is_empty());
    }
}
