//! Queries and imperative window actions.
//!
//! Everything here speaks the extended window-manager hints protocol: state
//! changes go out as client messages to the root window and the running
//! window manager applies them, surfacing later as new native events.

use anyhow::Result;
use x11rb::protocol::xproto::Window;

use crate::display::{DisplayConn, Geometry};
use crate::props::{self, PropertyValue};
use crate::window::Matcher;
use crate::wm::Wm;

/// Marker property naming windows this tool should leave out of its own
/// taskbar handling.
pub const STATE_PROPERTY: &str = "_HOOKWM_STATE";
pub const SKIP_TASKBAR_ATOM: &str = "_HOOKWM_SKIP_TASKBAR";

/// One `set_window_state` request; unset fields are left alone.
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowStateUpdate {
    /// Show the window in the taskbar.
    pub taskbar: Option<bool>,
    /// Show the window in the pager.
    pub pager: Option<bool>,
    /// Let the window manager decorate the window.
    pub decorate: Option<bool>,
    /// Include the window in this tool's own taskbar handling.
    pub own_taskbar: Option<bool>,
    /// Maximize vertically. Only applied when equal to `hmax`.
    pub vmax: Option<bool>,
    /// Maximize horizontally.
    pub hmax: Option<bool>,
}

impl<C: DisplayConn> Wm<C> {
    fn intern(&self, name: &str) -> Result<u32> {
        self.atoms().intern(self.conn(), name)
    }

    /// Read a named property from `window`. `type_` of `None` accepts any
    /// type.
    pub fn get_property(
        &self,
        window: Window,
        property: &str,
        type_: Option<&str>,
    ) -> Result<Option<PropertyValue>> {
        let property = self.intern(property)?;
        let type_ = match type_ {
            Some(name) => self.intern(name)?,
            None => 0,
        };
        props::read_property(self.conn(), window, property, type_, false)
    }

    /// Replace a named property on `window`.
    pub fn set_property(
        &self,
        window: Window,
        property: &str,
        type_: &str,
        format: u8,
        value: &PropertyValue,
    ) -> Result<()> {
        let property = self.intern(property)?;
        let type_ = self.intern(type_)?;
        props::write_property(self.conn(), window, property, type_, format, value)?;
        self.conn().flush()
    }

    fn root_card32_list(&self, property: &str, type_: &str) -> Result<Vec<u32>> {
        let value = self.get_property(self.root(), property, Some(type_))?;
        Ok(value.map(|v| v.card32s().to_vec()).unwrap_or_default())
    }

    /// Client windows in creation order, from the window manager's
    /// published list.
    pub fn clients(&self) -> Result<Vec<Window>> {
        self.root_card32_list("_NET_CLIENT_LIST", "WINDOW")
    }

    /// Client windows in stacking order, topmost last.
    pub fn stacked_clients(&self) -> Result<Vec<Window>> {
        self.root_card32_list("_NET_CLIENT_LIST_STACKING", "WINDOW")
    }

    /// Currently active window, if any.
    pub fn current_window(&self) -> Result<Option<Window>> {
        let value = self.get_property(self.root(), "_NET_ACTIVE_WINDOW", Some("WINDOW"))?;
        Ok(value.and_then(|v| v.first_card32()).filter(|&w| w != 0))
    }

    /// Current desktop index.
    pub fn current_desktop(&self) -> Result<Option<i64>> {
        let value = self.get_property(self.root(), "_NET_CURRENT_DESKTOP", Some("CARDINAL"))?;
        Ok(value.and_then(|v| v.first_card32()).map(i64::from))
    }

    /// Name of the running window manager, `None` when no compliant window
    /// manager is running.
    pub fn wm_name(&self) -> Result<Option<String>> {
        self.window(self.root()).wm_name()
    }

    /// Workarea geometry `[x, y, width, height]` for `desktop` (current
    /// desktop when `None`).
    pub fn workarea(&self, desktop: Option<i64>) -> Result<Option<[u32; 4]>> {
        let desktop = match desktop {
            Some(d) => d,
            None => match self.current_desktop()? {
                Some(d) => d,
                None => return Ok(None),
            },
        };
        if desktop < 0 {
            return Ok(None);
        }
        let areas = self.root_card32_list("_NET_WORKAREA", "CARDINAL")?;
        let start = desktop as usize * 4;
        match areas.get(start..start + 4) {
            Some(slice) => Ok(Some([slice[0], slice[1], slice[2], slice[3]])),
            None => Ok(None),
        }
    }

    /// Window geometry without decorations.
    pub fn window_geometry(&self, window: Window) -> Result<Geometry> {
        self.conn().geometry(window)
    }

    /// Size of the root window.
    pub fn screen_size(&self) -> Result<(u16, u16)> {
        let geometry = self.conn().geometry(self.root())?;
        Ok((geometry.width, geometry.height))
    }

    /// Windows from `clients` that satisfy `matcher`.
    pub fn find_clients(&self, clients: &[Window], matcher: &Matcher) -> Vec<Window> {
        clients
            .iter()
            .copied()
            .filter(|&window| match self.window(window).matches(matcher) {
                Ok(matched) => matched,
                Err(err) => {
                    log::warn!("Matcher failed for 0x{:x}: {:#}", window, err);
                    false
                }
            })
            .collect()
    }

    /// First window from `clients` that satisfies `matcher`.
    pub fn find_client(&self, clients: &[Window], matcher: &Matcher) -> Option<Window> {
        self.find_clients(clients, matcher).into_iter().next()
    }

    fn send_message(&self, window: Window, message_type: &str, data: [u32; 5]) -> Result<()> {
        let message_type = self.intern(message_type)?;
        self.conn().send_wm_message(window, message_type, data)
    }

    /// Switch to desktop `num`. Negative indices are ignored.
    pub fn activate_desktop(&self, num: i64) -> Result<()> {
        if num < 0 {
            return Ok(());
        }
        self.send_message(self.root(), "_NET_CURRENT_DESKTOP", [num as u32, 0, 0, 0, 0])?;
        self.conn().flush()
    }

    /// Move `window` to `desktop`. Negative indices are ignored.
    pub fn change_window_desktop(&self, window: Window, desktop: i64) -> Result<()> {
        if desktop < 0 {
            return Ok(());
        }
        self.send_message(window, "_NET_WM_DESKTOP", [desktop as u32, 0, 0, 0, 0])?;
        self.conn().flush()
    }

    /// Give `window` the input focus.
    pub fn focus_window(&self, window: Window) -> Result<()> {
        // Source indication 2: direct user action through a pager-like tool.
        self.send_message(window, "_NET_ACTIVE_WINDOW", [2, x11rb::CURRENT_TIME, 0, 0, 0])?;
        self.conn().flush()
    }

    /// Activate the window's desktop, raise it and focus it.
    pub fn focus_and_raise(&self, window: Window) -> Result<()> {
        self.activate_window_desktop(window)?;
        self.conn().raise_window(window)?;
        self.focus_window(window)
    }

    /// Float `window` up the stacking order.
    pub fn place_window_above(&self, window: Window) -> Result<()> {
        self.conn().raise_window(window)?;
        self.conn().flush()
    }

    /// Float `window` down the stacking order.
    pub fn place_window_below(&self, window: Window) -> Result<()> {
        self.conn().lower_window(window)?;
        self.conn().flush()
    }

    fn change_hidden_state(&self, window: Window, minimize: bool) -> Result<()> {
        let hidden = self.intern("_NET_WM_STATE_HIDDEN")?;
        self.send_message(window, "_NET_WM_STATE", [u32::from(minimize), hidden, 0, 0, 0])?;
        self.conn().flush()
    }

    pub fn minimize_window(&self, window: Window) -> Result<()> {
        self.change_hidden_state(window, true)
    }

    pub fn restore_window(&self, window: Window) -> Result<()> {
        self.change_hidden_state(window, false)
    }

    /// Apply the set fields of `update` to `window`.
    pub fn set_window_state(&self, window: Window, update: WindowStateUpdate) -> Result<()> {
        if let Some(decorate) = update.decorate {
            if self.wm_name()?.as_deref() == Some("Openbox") {
                let undecorated = self.intern("_OB_WM_STATE_UNDECORATED")?;
                self.send_message(
                    window,
                    "_NET_WM_STATE",
                    [u32::from(!decorate), undecorated, 0, 0, 0],
                )?;
            } else {
                // Rewrite the decorations field of the legacy hints struct,
                // preserving the other four fields when present.
                let hints = self.get_property(window, "_MOTIF_WM_HINTS", None)?;
                let mut fields = match hints {
                    Some(value) if value.card32s().len() == 5 => value.card32s().to_vec(),
                    _ => vec![2, 0, 0, 0, 0],
                };
                fields[2] = u32::from(decorate);
                self.set_property(
                    window,
                    "_MOTIF_WM_HINTS",
                    "_MOTIF_WM_HINTS",
                    32,
                    &PropertyValue::Card32(fields),
                )?;
            }
        }

        if let Some(taskbar) = update.taskbar {
            let skip = self.intern("_NET_WM_STATE_SKIP_TASKBAR")?;
            self.send_message(window, "_NET_WM_STATE", [u32::from(!taskbar), skip, 0, 0, 0])?;
        }

        if update.vmax.is_some() && update.vmax == update.hmax {
            let vert = self.intern("_NET_WM_STATE_MAXIMIZED_VERT")?;
            let horz = self.intern("_NET_WM_STATE_MAXIMIZED_HORZ")?;
            let on = update.vmax.unwrap_or(false);
            self.send_message(window, "_NET_WM_STATE", [u32::from(on), vert, horz, 0, 0])?;
        }

        if let Some(own_taskbar) = update.own_taskbar {
            let values = if own_taskbar {
                Vec::new()
            } else {
                vec![self.intern(SKIP_TASKBAR_ATOM)?]
            };
            self.set_property(window, STATE_PROPERTY, "ATOM", 32, &PropertyValue::Card32(values))?;
        }

        if let Some(pager) = update.pager {
            let skip = self.intern("_NET_WM_STATE_SKIP_PAGER")?;
            self.send_message(window, "_NET_WM_STATE", [u32::from(!pager), skip, 0, 0, 0])?;
        }

        self.conn().flush()
    }

    /// Change window geometry relative to the current workarea. Unset
    /// coordinates keep their current value.
    pub fn moveresize_window(
        &self,
        window: Window,
        x: Option<i32>,
        y: Option<i32>,
        width: Option<u32>,
        height: Option<u32>,
    ) -> Result<()> {
        // Gravity in the low byte, presence bits 8-11, source indication 2
        // in bits 12-15.
        let mut flags: u32 = 2 << 12;
        if x.is_some() {
            flags |= 1 << 8;
        }
        if y.is_some() {
            flags |= 1 << 9;
        }
        if width.is_some() {
            flags |= 1 << 10;
        }
        if height.is_some() {
            flags |= 1 << 11;
        }
        let [offset_x, offset_y, _, _] = self.workarea(None)?.unwrap_or_default();
        self.send_message(
            window,
            "_NET_MOVERESIZE_WINDOW",
            [
                flags,
                (x.unwrap_or(0) + offset_x as i32) as u32,
                (y.unwrap_or(0) + offset_y as i32) as u32,
                width.unwrap_or(0).max(1),
                height.unwrap_or(0).max(1),
            ],
        )?;
        self.conn().flush()
    }

    /// Change window geometry by margins from the workarea edges of the
    /// window's own desktop.
    pub fn moveresize_window_margins(
        &self,
        window: Window,
        left: u32,
        top: u32,
        right: u32,
        bottom: u32,
    ) -> Result<()> {
        let desktop = self.window(window).desktop()?;
        let [area_x, area_y, area_w, area_h] = match self.workarea(desktop)? {
            Some(area) => area,
            None => return Ok(()),
        };
        let flags: u32 = 0x2F00;
        self.send_message(
            window,
            "_NET_MOVERESIZE_WINDOW",
            [
                flags,
                left + area_x,
                top + area_y,
                area_w.saturating_sub(right + left).max(1),
                area_h.saturating_sub(bottom + top).max(1),
            ],
        )?;
        self.conn().flush()
    }

    /// Ask the window manager to close `window` (the active window when
    /// `None`).
    pub fn close_window(&self, window: Option<Window>) -> Result<()> {
        let window = match window.map_or_else(|| self.current_window(), |w| Ok(Some(w)))? {
            Some(w) => w,
            None => return Ok(()),
        };
        self.send_message(window, "_NET_CLOSE_WINDOW", [x11rb::CURRENT_TIME, 0, 0, 0, 0])?;
        self.conn().flush()
    }

    fn focus_step(&self, window: Window, direction: i64) -> Result<()> {
        let desktop = self.window(window).desktop()?;
        let matcher = Matcher {
            desktop,
            ..Default::default()
        };
        let mates = self.find_clients(&self.clients()?, &matcher);
        let index = match mates.iter().position(|&w| w == window) {
            Some(index) => index,
            None => return Ok(()),
        };
        let next = mates[(index as i64 + direction).rem_euclid(mates.len() as i64) as usize];
        self.focus_and_raise(next)
    }

    /// Focus the next client on the window's desktop, in client-creation
    /// order, wrapping around. Starts from the active window when `None`.
    pub fn focus_next(&self, window: Option<Window>) -> Result<()> {
        match window.map_or_else(|| self.current_window(), |w| Ok(Some(w)))? {
            Some(window) => self.focus_step(window, 1),
            None => Ok(()),
        }
    }

    /// Focus the previous client on the window's desktop.
    pub fn focus_prev(&self, window: Option<Window>) -> Result<()> {
        match window.map_or_else(|| self.current_window(), |w| Ok(Some(w)))? {
            Some(window) => self.focus_step(window, -1),
            None => Ok(()),
        }
    }

    /// Activate the desktop `window` sits on.
    ///
    /// `None` when the window has no desktop property, `Some(false)` when
    /// its desktop is already current (no request issued), `Some(true)`
    /// after issuing the switch.
    pub fn activate_window_desktop(&self, window: Window) -> Result<Option<bool>> {
        let desktop = match self.window(window).desktop()? {
            Some(desktop) => desktop,
            None => return Ok(None),
        };
        if self.current_desktop()? == Some(desktop) {
            return Ok(Some(false));
        }
        self.activate_desktop(desktop)?;
        Ok(Some(true))
    }
}
