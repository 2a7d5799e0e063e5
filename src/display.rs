//! Display-server connection seam.
//!
//! The dispatcher only needs a narrow slice of the X11 protocol: property
//! reads/writes, passive key grabs, event delivery, window attribute probes
//! and EWMH client messages. That slice is expressed as the [`DisplayConn`]
//! trait so the dispatch core can run against an in-memory fake in tests,
//! with [`XDisplay`] as the real x11rb-backed implementation.

use std::cell::RefCell;
use std::collections::HashMap;
use std::os::unix::io::{AsRawFd, RawFd};

use anyhow::{Context, Result};
use x11rb::connection::Connection;
use x11rb::protocol::xkb::{self, ConnectionExt as _};
use x11rb::protocol::xproto::*;
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as _;

/// Native event, translated to the subset the dispatcher routes on.
///
/// Everything else the server delivers is skipped at translation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WmEvent {
    KeyPress { window: Window, state: u16, keycode: u8 },
    KeyRelease { window: Window, state: u16, keycode: u8 },
    Create { window: Window, parent: Window, override_redirect: bool },
    Destroy { window: Window },
    FocusIn { window: Window, mode: FocusMode },
    FocusOut { window: Window, mode: FocusMode },
    Property { window: Window, atom: Atom, deleted: bool },
}

impl WmEvent {
    /// The window the event is reported relative to.
    pub fn window(&self) -> Window {
        match *self {
            WmEvent::KeyPress { window, .. }
            | WmEvent::KeyRelease { window, .. }
            | WmEvent::Create { window, .. }
            | WmEvent::Destroy { window }
            | WmEvent::FocusIn { window, .. }
            | WmEvent::FocusOut { window, .. }
            | WmEvent::Property { window, .. } => window,
        }
    }
}

/// How a focus transition was generated (XFocusChangeEvent mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusMode {
    Normal,
    Grab,
    Ungrab,
    WhileGrabbed,
}

impl From<NotifyMode> for FocusMode {
    fn from(mode: NotifyMode) -> Self {
        match mode {
            NotifyMode::GRAB => FocusMode::Grab,
            NotifyMode::UNGRAB => FocusMode::Ungrab,
            NotifyMode::WHILE_GRABBED => FocusMode::WhileGrabbed,
            _ => FocusMode::Normal,
        }
    }
}

/// One segment of a property read, as reported by the server.
#[derive(Debug, Clone, Default)]
pub struct PropSegment {
    /// Actual type of the property (0 when the property is absent).
    pub type_: Atom,
    /// Element width in bits: 0 (absent), 8, 16 or 32.
    pub format: u8,
    /// Raw bytes of this segment.
    pub value: Vec<u8>,
    /// Bytes still held by the server past this segment.
    pub bytes_after: u32,
}

/// Window attributes relevant to managing decisions.
#[derive(Debug, Clone, Copy)]
pub struct WindowAttributes {
    pub override_redirect: bool,
    pub viewable: bool,
}

/// Window geometry without decorations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
}

/// The protocol operations the dispatcher depends on.
///
/// Implementations must be non-blocking on the event path: `next_event`
/// returns `Ok(None)` once the queue is empty rather than waiting.
pub trait DisplayConn {
    /// Root window of the default screen.
    fn root(&self) -> Window;

    /// File descriptor of the server connection, for readiness polling.
    fn connection_fd(&self) -> RawFd;

    /// Intern a named atom, creating it if missing.
    fn intern_atom(&self, name: &str) -> Result<Atom>;

    /// Resolve an atom back to its name.
    fn atom_name(&self, atom: Atom) -> Result<String>;

    /// One segmented property read. Offsets and lengths are in 32-bit words.
    fn get_property(
        &self,
        window: Window,
        property: Atom,
        type_: Atom,
        long_offset: u32,
        long_length: u32,
    ) -> Result<PropSegment>;

    /// Replace a property with `n_items` format-sized elements.
    fn change_property(
        &self,
        window: Window,
        property: Atom,
        type_: Atom,
        format: u8,
        n_items: u32,
        data: &[u8],
    ) -> Result<()>;

    /// Subscribe `window` to the given event classes.
    fn select_input(&self, window: Window, mask: EventMask) -> Result<()>;

    /// Next pending event, or `None` when the queue is drained.
    fn next_event(&self) -> Result<Option<WmEvent>>;

    /// Send a format-32 client message to the root window on behalf of `window`.
    fn send_wm_message(&self, window: Window, message_type: Atom, data: [u32; 5]) -> Result<()>;

    /// Issue a passive key grab on `window`.
    fn grab_key(&self, window: Window, mask: u16, keycode: u8) -> Result<()>;

    /// Release one passive key grab.
    fn ungrab_key(&self, window: Window, mask: u16, keycode: u8) -> Result<()>;

    /// Release every key grab on `window` (AnyKey / AnyModifier).
    fn ungrab_all_keys(&self, window: Window) -> Result<()>;

    /// Probe window attributes. `Ok(None)` means the window is already gone;
    /// the expected create/probe race is not an error.
    fn window_attributes(&self, window: Window) -> Result<Option<WindowAttributes>>;

    /// Window geometry.
    fn geometry(&self, window: Window) -> Result<Geometry>;

    /// Children of `window`, bottom-to-top.
    fn query_tree(&self, window: Window) -> Result<Vec<Window>>;

    /// Restack `window` to the top.
    fn raise_window(&self, window: Window) -> Result<()>;

    /// Restack `window` to the bottom.
    fn lower_window(&self, window: Window) -> Result<()>;

    /// Resolve a keysym to a keycode through the server keyboard mapping.
    fn keycode_for_keysym(&self, keysym: u32) -> Result<Option<u8>>;

    /// Currently locked keyboard layout group.
    fn keyboard_group(&self) -> Result<u8>;

    /// Lock the keyboard layout group.
    fn set_keyboard_group(&self, group: u8) -> Result<()>;

    /// Push buffered requests to the server.
    fn flush(&self) -> Result<()>;

    /// Flush and wait until the server has processed everything.
    fn sync(&self) -> Result<()>;
}

/// Live X11 connection.
pub struct XDisplay {
    conn: RustConnection,
    root: Window,
    /// keysym -> keycode, built from the keyboard mapping on first use.
    keymap: RefCell<Option<HashMap<u32, u8>>>,
    xkb_ready: bool,
}

impl XDisplay {
    /// Connect to the display named by `$DISPLAY`.
    pub fn connect() -> Result<Self> {
        let (conn, screen_num) =
            RustConnection::connect(None).context("Failed to connect to X11 server")?;
        let root = conn.setup().roots[screen_num].root;

        // Keyboard layout tracking needs the XKB extension; everything else
        // works without it.
        let xkb_ready = match conn.xkb_use_extension(1, 0) {
            Ok(cookie) => cookie.reply().map(|r| r.supported).unwrap_or(false),
            Err(_) => false,
        };
        if !xkb_ready {
            log::warn!("XKB extension unavailable, keyboard layout tracking disabled");
        }

        log::info!("Connected to X11, screen {}, root window 0x{:x}", screen_num, root);

        Ok(Self {
            conn,
            root,
            keymap: RefCell::new(None),
            xkb_ready,
        })
    }

    fn keymap_lookup(&self, keysym: u32) -> Result<Option<u8>> {
        let mut cache = self.keymap.borrow_mut();
        if cache.is_none() {
            let setup = self.conn.setup();
            let min_keycode = setup.min_keycode;
            let max_keycode = setup.max_keycode;
            let mapping = self
                .conn
                .get_keyboard_mapping(min_keycode, max_keycode - min_keycode + 1)?
                .reply()?;
            let keysyms_per_keycode = mapping.keysyms_per_keycode as usize;

            let mut map: HashMap<u32, u8> = HashMap::new();
            for (i, chunk) in mapping.keysyms.chunks(keysyms_per_keycode).enumerate() {
                for sym in chunk {
                    if *sym != 0 {
                        map.entry(*sym).or_insert(min_keycode + i as u8);
                    }
                }
            }
            *cache = Some(map);
        }
        Ok(cache.as_ref().unwrap().get(&keysym).copied())
    }
}

/// Translate a native event to the routed subset.
fn translate(event: &Event) -> Option<WmEvent> {
    match event {
        Event::KeyPress(e) => Some(WmEvent::KeyPress {
            window: e.event,
            state: u16::from(e.state),
            keycode: e.detail,
        }),
        Event::KeyRelease(e) => Some(WmEvent::KeyRelease {
            window: e.event,
            state: u16::from(e.state),
            keycode: e.detail,
        }),
        Event::CreateNotify(e) => Some(WmEvent::Create {
            window: e.window,
            parent: e.parent,
            override_redirect: e.override_redirect,
        }),
        Event::DestroyNotify(e) => Some(WmEvent::Destroy { window: e.window }),
        Event::FocusIn(e) => Some(WmEvent::FocusIn {
            window: e.event,
            mode: FocusMode::from(e.mode),
        }),
        Event::FocusOut(e) => Some(WmEvent::FocusOut {
            window: e.event,
            mode: FocusMode::from(e.mode),
        }),
        Event::PropertyNotify(e) => Some(WmEvent::Property {
            window: e.window,
            atom: e.atom,
            deleted: e.state == Property::DELETE,
        }),
        _ => None,
    }
}

impl DisplayConn for XDisplay {
    fn root(&self) -> Window {
        self.root
    }

    fn connection_fd(&self) -> RawFd {
        self.conn.stream().as_raw_fd()
    }

    fn intern_atom(&self, name: &str) -> Result<Atom> {
        Ok(self.conn.intern_atom(false, name.as_bytes())?.reply()?.atom)
    }

    fn atom_name(&self, atom: Atom) -> Result<String> {
        let reply = self.conn.get_atom_name(atom)?.reply()?;
        Ok(String::from_utf8_lossy(&reply.name).into_owned())
    }

    fn get_property(
        &self,
        window: Window,
        property: Atom,
        type_: Atom,
        long_offset: u32,
        long_length: u32,
    ) -> Result<PropSegment> {
        let reply = self
            .conn
            .get_property(false, window, property, type_, long_offset, long_length)?
            .reply()?;
        Ok(PropSegment {
            type_: reply.type_,
            format: reply.format,
            value: reply.value,
            bytes_after: reply.bytes_after,
        })
    }

    fn change_property(
        &self,
        window: Window,
        property: Atom,
        type_: Atom,
        format: u8,
        n_items: u32,
        data: &[u8],
    ) -> Result<()> {
        self.conn
            .change_property(PropMode::REPLACE, window, property, type_, format, n_items, data)?;
        Ok(())
    }

    fn select_input(&self, window: Window, mask: EventMask) -> Result<()> {
        self.conn
            .change_window_attributes(window, &ChangeWindowAttributesAux::new().event_mask(mask))?;
        Ok(())
    }

    fn next_event(&self) -> Result<Option<WmEvent>> {
        loop {
            match self.conn.poll_for_event()? {
                None => return Ok(None),
                Some(Event::Error(e)) => {
                    // Asynchronous protocol errors from unchecked requests
                    // end up here; decode and keep going.
                    log::error!(
                        "X error: {:?} (request {}:{}) resource 0x{:x}",
                        e.error_kind,
                        e.major_opcode,
                        e.minor_opcode,
                        e.bad_value
                    );
                }
                Some(event) => {
                    if let Some(translated) = translate(&event) {
                        return Ok(Some(translated));
                    }
                    log::trace!("Skipping event {:?}", event);
                }
            }
        }
    }

    fn send_wm_message(&self, window: Window, message_type: Atom, data: [u32; 5]) -> Result<()> {
        let event = ClientMessageEvent {
            response_type: CLIENT_MESSAGE_EVENT,
            format: 32,
            sequence: 0,
            window,
            type_: message_type,
            data: ClientMessageData::from(data),
        };
        self.conn
            .send_event(false, self.root, EventMask::SUBSTRUCTURE_REDIRECT, event)?;
        Ok(())
    }

    fn grab_key(&self, window: Window, mask: u16, keycode: u8) -> Result<()> {
        self.conn.grab_key(
            false,
            window,
            ModMask::from(mask),
            keycode,
            GrabMode::ASYNC,
            GrabMode::ASYNC,
        )?;
        Ok(())
    }

    fn ungrab_key(&self, window: Window, mask: u16, keycode: u8) -> Result<()> {
        self.conn.ungrab_key(keycode, window, ModMask::from(mask))?;
        Ok(())
    }

    fn ungrab_all_keys(&self, window: Window) -> Result<()> {
        self.conn.ungrab_key(Grab::ANY, window, ModMask::ANY)?;
        Ok(())
    }

    fn window_attributes(&self, window: Window) -> Result<Option<WindowAttributes>> {
        // The window may be gone by the time we probe it; that race is
        // expected and not worth a server error report.
        match self.conn.get_window_attributes(window)?.reply() {
            Ok(attrs) => Ok(Some(WindowAttributes {
                override_redirect: attrs.override_redirect,
                viewable: attrs.map_state == MapState::VIEWABLE,
            })),
            Err(_) => Ok(None),
        }
    }

    fn geometry(&self, window: Window) -> Result<Geometry> {
        let reply = self.conn.get_geometry(window)?.reply()?;
        Ok(Geometry {
            x: reply.x,
            y: reply.y,
            width: reply.width,
            height: reply.height,
        })
    }

    fn query_tree(&self, window: Window) -> Result<Vec<Window>> {
        Ok(self.conn.query_tree(window)?.reply()?.children)
    }

    fn raise_window(&self, window: Window) -> Result<()> {
        self.conn
            .configure_window(window, &ConfigureWindowAux::new().stack_mode(StackMode::ABOVE))?;
        Ok(())
    }

    fn lower_window(&self, window: Window) -> Result<()> {
        self.conn
            .configure_window(window, &ConfigureWindowAux::new().stack_mode(StackMode::BELOW))?;
        Ok(())
    }

    fn keycode_for_keysym(&self, keysym: u32) -> Result<Option<u8>> {
        self.keymap_lookup(keysym)
    }

    fn keyboard_group(&self) -> Result<u8> {
        anyhow::ensure!(self.xkb_ready, "XKB extension unavailable");
        let reply = self
            .conn
            .xkb_get_state(xkb::ID::USE_CORE_KBD.into())?
            .reply()?;
        Ok(u8::from(reply.group))
    }

    fn set_keyboard_group(&self, group: u8) -> Result<()> {
        anyhow::ensure!(self.xkb_ready, "XKB extension unavailable");
        let group = match group {
            0 => xkb::Group::M1,
            1 => xkb::Group::M2,
            2 => xkb::Group::M3,
            _ => xkb::Group::M4,
        };
        self.conn.xkb_latch_lock_state(
            xkb::ID::USE_CORE_KBD.into(),
            ModMask::from(0u16),
            ModMask::from(0u16),
            true,
            group,
            ModMask::from(0u16),
            false,
            0,
        )?;
        self.conn.flush()?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.conn.flush()?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.conn.sync()?;
        Ok(())
    }
}
