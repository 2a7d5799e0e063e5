//! Key combination parsing.
//!
//! A key definition is a string of `+`-joined tokens: every token but the
//! last names a modifier, the last names a key symbol. Whitespace around
//! `+` is insignificant, and several space-separated combos may appear in
//! one definition. Lock keys must not affect whether a grab matches, so
//! every combo expands into four grab masks (plain, CapsLock, NumLock,
//! both).

use anyhow::Result;
use x11rb::protocol::xproto::ModMask;

use crate::display::DisplayConn;

/// A single physical key plus the modifier bits that must be held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyCombo {
    pub keycode: u8,
    pub mask: u16,
}

impl KeyCombo {
    /// The four grab masks this combo answers to regardless of lock-key
    /// state: plain, CapsLock, NumLock, and both.
    pub fn grab_masks(&self) -> [u16; 4] {
        let lock = u16::from(ModMask::LOCK);
        let numlock = u16::from(ModMask::M2);
        [
            self.mask,
            self.mask | lock,
            self.mask | numlock,
            self.mask | lock | numlock,
        ]
    }
}

/// Modifier name to mask bit. Win/Mod/Hyper/Super are synonyms for Mod4.
fn modifier_mask(name: &str) -> Option<u16> {
    let mask = match name {
        "Alt" => ModMask::M1,
        "Control" | "Ctrl" => ModMask::CONTROL,
        "Shift" => ModMask::SHIFT,
        "Win" | "Mod" | "Hyper" | "Super" => ModMask::M4,
        _ => return None,
    };
    Some(u16::from(mask))
}

/// Spelling variants accepted for key symbol names.
fn key_alias(name: &str) -> &str {
    match name {
        "Enter" => "Return",
        "Esc" => "Escape",
        "PgUp" | "PageUp" => "Prior",
        "PgDn" | "PageDown" => "Next",
        "Del" => "Delete",
        "Ins" => "Insert",
        "Backspace" => "BackSpace",
        other => other,
    }
}

/// Key symbol name to X keysym.
fn keysym_from_name(name: &str) -> Option<u32> {
    // Single printable ASCII characters are their own keysym.
    let mut chars = name.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if (' '..='~').contains(&c) {
            return Some(c.to_ascii_lowercase() as u32);
        }
    }

    let sym = match name {
        "Return" => 0xff0d,
        "Tab" => 0xff09,
        "Escape" => 0xff1b,
        "space" => 0x20,
        "BackSpace" => 0xff08,
        "Delete" => 0xffff,
        "Insert" => 0xff63,
        "Home" => 0xff50,
        "End" => 0xff57,
        "Prior" => 0xff55,
        "Next" => 0xff56,
        "Left" => 0xff51,
        "Up" => 0xff52,
        "Right" => 0xff53,
        "Down" => 0xff54,
        "Pause" => 0xff13,
        "Print" => 0xff61,
        "Menu" => 0xff67,
        "F1" => 0xffbe,
        "F2" => 0xffbf,
        "F3" => 0xffc0,
        "F4" => 0xffc1,
        "F5" => 0xffc2,
        "F6" => 0xffc3,
        "F7" => 0xffc4,
        "F8" => 0xffc5,
        "F9" => 0xffc6,
        "F10" => 0xffc7,
        "F11" => 0xffc8,
        "F12" => 0xffc9,
        "XF86AudioMute" => 0x1008ff12,
        "XF86AudioLowerVolume" => 0x1008ff11,
        "XF86AudioRaiseVolume" => 0x1008ff13,
        "XF86AudioPlay" => 0x1008ff14,
        "XF86AudioNext" => 0x1008ff17,
        "XF86AudioPrev" => 0x1008ff16,
        "XF86MonBrightnessUp" => 0x1008ff02,
        "XF86MonBrightnessDown" => 0x1008ff03,
        _ => return None,
    };
    Some(sym)
}

/// Parse one combo token like `Ctrl+Shift+a`.
fn parse_combo(conn: &impl DisplayConn, token: &str) -> Result<Option<KeyCombo>> {
    let parts: Vec<&str> = token.split('+').collect();
    let (key_name, mod_names) = match parts.split_last() {
        Some(split) => split,
        None => return Ok(None),
    };

    let mut mask = 0u16;
    for name in mod_names {
        match modifier_mask(name) {
            Some(bit) => mask |= bit,
            None => {
                log::warn!("Unknown modifier [{}] in [{}]", name, token);
                return Ok(None);
            }
        }
    }

    let keysym = match keysym_from_name(key_alias(key_name)) {
        Some(sym) => sym,
        None => {
            log::warn!("Unknown key symbol [{}] in [{}]", key_name, token);
            return Ok(None);
        }
    };
    let keycode = match conn.keycode_for_keysym(keysym)? {
        Some(code) => code,
        None => {
            log::warn!("No keycode for key symbol [{}] in [{}]", key_name, token);
            return Ok(None);
        }
    };

    Ok(Some(KeyCombo { keycode, mask }))
}

/// Parse a key definition into combos.
///
/// Returns `Ok(None)` if any token fails to resolve; the failure is logged,
/// not fatal.
pub fn parse_keydef(conn: &impl DisplayConn, keydef: &str) -> Result<Option<Vec<KeyCombo>>> {
    // Collapse whitespace around '+' so "Ctrl + a" and "Ctrl+a" parse the
    // same, then split the remainder into combos.
    let normalized = keydef
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace(" +", "+")
        .replace("+ ", "+");

    let mut combos = Vec::new();
    for token in normalized.split_whitespace() {
        match parse_combo(conn, token)? {
            Some(combo) => combos.push(combo),
            None => return Ok(None),
        }
    }
    if combos.is_empty() {
        return Ok(None);
    }
    Ok(Some(combos))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modifier_aliases() {
        assert_eq!(modifier_mask("Ctrl"), modifier_mask("Control"));
        assert_eq!(modifier_mask("Win"), modifier_mask("Mod"));
        assert_eq!(modifier_mask("Hyper"), modifier_mask("Super"));
        assert_eq!(modifier_mask("Alt"), Some(u16::from(ModMask::M1)));
        assert_eq!(modifier_mask("Meta"), None);
    }

    #[test]
    fn test_keysym_names() {
        assert_eq!(keysym_from_name("Return"), Some(0xff0d));
        assert_eq!(keysym_from_name(key_alias("Enter")), Some(0xff0d));
        assert_eq!(keysym_from_name("a"), Some(0x61));
        assert_eq!(keysym_from_name("1"), Some(0x31));
        assert_eq!(keysym_from_name(key_alias("PgUp")), Some(0xff55));
        assert_eq!(keysym_from_name("NoSuchKey"), None);
    }

    #[test]
    fn test_grab_mask_expansion() {
        let combo = KeyCombo {
            keycode: 38,
            mask: u16::from(ModMask::CONTROL),
        };
        let masks = combo.grab_masks();
        assert_eq!(masks.len(), 4);
        assert_eq!(masks[0], u16::from(ModMask::CONTROL));
        assert!(masks.contains(&(u16::from(ModMask::CONTROL) | u16::from(ModMask::LOCK))));
        assert!(masks.contains(&(u16::from(ModMask::CONTROL) | u16::from(ModMask::M2))));
        assert!(masks.contains(
            &(u16::from(ModMask::CONTROL) | u16::from(ModMask::LOCK) | u16::from(ModMask::M2))
        ));
        // All four are distinct.
        let mut unique = masks.to_vec();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), 4);
    }
}
