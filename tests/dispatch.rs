//! Dispatch-core tests against an in-memory display.
//!
//! `FakeDisplay` implements the display-connection trait with scripted
//! events, stored properties and a grab ledger, so the whole registration
//! and routing machinery runs without an X server.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::os::unix::io::RawFd;
use std::rc::Rc;

use anyhow::Result;
use x11rb::protocol::xproto::{Atom, EventMask, ModMask, Window};

use hookwm::display::{
    DisplayConn, FocusMode, Geometry, PropSegment, WindowAttributes, WmEvent,
};
use hookwm::props::PropertyValue;
use hookwm::window::Matcher;
use hookwm::wm::{DispatchOutcome, Wm};

const ROOT: Window = 1;

#[derive(Default)]
struct State {
    atoms: HashMap<String, Atom>,
    atom_names: HashMap<Atom, String>,
    next_atom: Atom,
    properties: HashMap<(Window, Atom), (Atom, u8, Vec<u8>)>,
    events: VecDeque<WmEvent>,
    grabs: Vec<(Window, u16, u8)>,
    ungrabs: Vec<(Window, u16, u8)>,
    ungrab_alls: Vec<Window>,
    selected: HashMap<Window, EventMask>,
    messages: Vec<(Window, Atom, [u32; 5])>,
    live_windows: Vec<Window>,
    kbd_group: u8,
}

struct FakeDisplay {
    state: RefCell<State>,
}

impl FakeDisplay {
    fn new() -> Self {
        let mut state = State::default();
        state.next_atom = 100;
        state.live_windows.push(ROOT);
        Self {
            state: RefCell::new(state),
        }
    }

    fn atom(&self, name: &str) -> Atom {
        let mut state = self.state.borrow_mut();
        if let Some(&atom) = state.atoms.get(name) {
            return atom;
        }
        let atom = state.next_atom;
        state.next_atom += 1;
        state.atoms.insert(name.to_string(), atom);
        state.atom_names.insert(atom, name.to_string());
        atom
    }

    fn push_event(&self, event: WmEvent) {
        self.state.borrow_mut().events.push_back(event);
    }

    fn pending_events(&self) -> usize {
        self.state.borrow().events.len()
    }

    /// Make attribute probes for `window` succeed.
    fn add_live(&self, window: Window) {
        self.state.borrow_mut().live_windows.push(window);
    }

    fn set_raw_property(&self, window: Window, name: &str, type_name: &str, format: u8, data: Vec<u8>) {
        let property = self.atom(name);
        let type_ = self.atom(type_name);
        self.state
            .borrow_mut()
            .properties
            .insert((window, property), (type_, format, data));
    }

    fn set_card32_property(&self, window: Window, name: &str, type_name: &str, values: &[u32]) {
        let data = values.iter().flat_map(|v| v.to_ne_bytes()).collect();
        self.set_raw_property(window, name, type_name, 32, data);
    }

    /// Register `window` as a live client in `_NET_CLIENT_LIST`.
    fn add_client(&self, window: Window) {
        self.add_live(window);
        let list_atom = self.atom("_NET_CLIENT_LIST");
        let mut clients: Vec<u32> = {
            let state = self.state.borrow();
            state
                .properties
                .get(&(ROOT, list_atom))
                .map(|(_, _, data)| {
                    data.chunks_exact(4)
                        .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
                        .collect()
                })
                .unwrap_or_default()
        };
        clients.push(window);
        self.set_card32_property(ROOT, "_NET_CLIENT_LIST", "WINDOW", &clients);
    }

    fn grabs(&self) -> Vec<(Window, u16, u8)> {
        self.state.borrow().grabs.clone()
    }

    fn ungrabs(&self) -> Vec<(Window, u16, u8)> {
        self.state.borrow().ungrabs.clone()
    }

    fn messages(&self) -> Vec<(Window, Atom, [u32; 5])> {
        self.state.borrow().messages.clone()
    }

    fn kbd_group(&self) -> u8 {
        self.state.borrow().kbd_group
    }

    fn set_kbd_group_state(&self, group: u8) {
        self.state.borrow_mut().kbd_group = group;
    }
}

impl DisplayConn for FakeDisplay {
    fn root(&self) -> Window {
        ROOT
    }

    fn connection_fd(&self) -> RawFd {
        -1
    }

    fn intern_atom(&self, name: &str) -> Result<Atom> {
        Ok(self.atom(name))
    }

    fn atom_name(&self, atom: Atom) -> Result<String> {
        self.state
            .borrow()
            .atom_names
            .get(&atom)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no such atom {}", atom))
    }

    fn get_property(
        &self,
        window: Window,
        property: Atom,
        type_: Atom,
        long_offset: u32,
        long_length: u32,
    ) -> Result<PropSegment> {
        let state = self.state.borrow();
        let (actual_type, format, data) = match state.properties.get(&(window, property)) {
            Some(entry) => entry,
            None => return Ok(PropSegment::default()),
        };
        if type_ != 0 && type_ != *actual_type {
            return Ok(PropSegment::default());
        }
        let start = (long_offset as usize * 4).min(data.len());
        let end = (start + long_length as usize * 4).min(data.len());
        Ok(PropSegment {
            type_: *actual_type,
            format: *format,
            value: data[start..end].to_vec(),
            bytes_after: (data.len() - end) as u32,
        })
    }

    fn change_property(
        &self,
        window: Window,
        property: Atom,
        type_: Atom,
        format: u8,
        _n_items: u32,
        data: &[u8],
    ) -> Result<()> {
        self.state
            .borrow_mut()
            .properties
            .insert((window, property), (type_, format, data.to_vec()));
        Ok(())
    }

    fn select_input(&self, window: Window, mask: EventMask) -> Result<()> {
        self.state.borrow_mut().selected.insert(window, mask);
        Ok(())
    }

    fn next_event(&self) -> Result<Option<WmEvent>> {
        Ok(self.state.borrow_mut().events.pop_front())
    }

    fn send_wm_message(&self, window: Window, message_type: Atom, data: [u32; 5]) -> Result<()> {
        self.state
            .borrow_mut()
            .messages
            .push((window, message_type, data));
        Ok(())
    }

    fn grab_key(&self, window: Window, mask: u16, keycode: u8) -> Result<()> {
        self.state.borrow_mut().grabs.push((window, mask, keycode));
        Ok(())
    }

    fn ungrab_key(&self, window: Window, mask: u16, keycode: u8) -> Result<()> {
        self.state.borrow_mut().ungrabs.push((window, mask, keycode));
        Ok(())
    }

    fn ungrab_all_keys(&self, window: Window) -> Result<()> {
        self.state.borrow_mut().ungrab_alls.push(window);
        Ok(())
    }

    fn window_attributes(&self, window: Window) -> Result<Option<WindowAttributes>> {
        let live = self.state.borrow().live_windows.contains(&window);
        Ok(live.then_some(WindowAttributes {
            override_redirect: false,
            viewable: true,
        }))
    }

    fn geometry(&self, _window: Window) -> Result<Geometry> {
        Ok(Geometry {
            x: 0,
            y: 0,
            width: 1280,
            height: 800,
        })
    }

    fn query_tree(&self, _window: Window) -> Result<Vec<Window>> {
        Ok(self.state.borrow().live_windows.clone())
    }

    fn raise_window(&self, _window: Window) -> Result<()> {
        Ok(())
    }

    fn lower_window(&self, _window: Window) -> Result<()> {
        Ok(())
    }

    fn keycode_for_keysym(&self, keysym: u32) -> Result<Option<u8>> {
        // Keep the common test keys stable, derive the rest.
        let code = match keysym {
            0x61 => 38, // a
            0x62 => 56, // b
            0xff0d => 36, // Return
            sym => (sym % 200 + 10) as u8,
        };
        Ok(Some(code))
    }

    fn keyboard_group(&self) -> Result<u8> {
        Ok(self.state.borrow().kbd_group)
    }

    fn set_keyboard_group(&self, group: u8) -> Result<()> {
        self.state.borrow_mut().kbd_group = group;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

fn new_wm() -> Wm<FakeDisplay> {
    Wm::new(FakeDisplay::new()).unwrap()
}

fn counter() -> (Rc<Cell<u32>>, Rc<Cell<u32>>) {
    let count = Rc::new(Cell::new(0));
    (count.clone(), count)
}

const CTRL: u16 = 4;
const SHIFT: u16 = 1;

fn lock_mask() -> u16 {
    u16::from(ModMask::LOCK)
}

fn numlock_mask() -> u16 {
    u16::from(ModMask::M2)
}

#[test]
fn key_grab_registers_four_mask_variants() {
    let mut wm = new_wm();
    let (count, c) = counter();
    let binding = wm
        .on_key(None, "Ctrl+a", move |_| {
            c.set(c.get() + 1);
            Ok(())
        })
        .unwrap()
        .expect("binding should register");

    let mut grabs = wm.conn().grabs();
    grabs.sort_unstable();
    let mut expected = vec![
        (ROOT, CTRL, 38),
        (ROOT, CTRL | lock_mask(), 38),
        (ROOT, CTRL | numlock_mask(), 38),
        (ROOT, CTRL | lock_mask() | numlock_mask(), 38),
    ];
    expected.sort_unstable();
    assert_eq!(grabs, expected);

    // Every lock variant routes to the same callback.
    for &(_, mask, keycode) in &expected {
        wm.conn().push_event(WmEvent::KeyPress {
            window: ROOT,
            state: mask,
            keycode,
        });
    }
    assert_eq!(wm.drain_events().unwrap(), DispatchOutcome::Continue);
    assert_eq!(count.get(), 4);

    // Unbinding releases exactly those four grabs and nothing fires anymore.
    wm.unbind_key(&binding).unwrap();
    let mut ungrabs = wm.conn().ungrabs();
    ungrabs.sort_unstable();
    assert_eq!(ungrabs, expected);

    wm.conn().push_event(WmEvent::KeyPress {
        window: ROOT,
        state: CTRL,
        keycode: 38,
    });
    wm.drain_events().unwrap();
    assert_eq!(count.get(), 4);
}

#[test]
fn keypress_routes_only_registered_combo() {
    let mut wm = new_wm();
    let (count, c) = counter();
    wm.on_key(None, "Ctrl+a", move |_| {
        c.set(c.get() + 1);
        Ok(())
    })
    .unwrap();

    wm.conn().push_event(WmEvent::KeyPress {
        window: ROOT,
        state: CTRL,
        keycode: 38,
    });
    wm.drain_events().unwrap();
    assert_eq!(count.get(), 1);

    // Unregistered combos do not fire: wrong modifier, wrong keycode.
    wm.conn().push_event(WmEvent::KeyPress {
        window: ROOT,
        state: SHIFT,
        keycode: 38,
    });
    wm.conn().push_event(WmEvent::KeyPress {
        window: ROOT,
        state: CTRL,
        keycode: 56,
    });
    wm.drain_events().unwrap();
    assert_eq!(count.get(), 1);
}

#[test]
fn key_rebinding_replaces_previous_callback() {
    let mut wm = new_wm();
    let (first_count, first) = counter();
    let (second_count, second) = counter();
    wm.on_key(None, "Ctrl+a", move |_| {
        first.set(first.get() + 1);
        Ok(())
    })
    .unwrap();
    wm.on_key(None, "Ctrl+a", move |_| {
        second.set(second.get() + 1);
        Ok(())
    })
    .unwrap();

    wm.conn().push_event(WmEvent::KeyPress {
        window: ROOT,
        state: CTRL,
        keycode: 38,
    });
    wm.drain_events().unwrap();
    assert_eq!(first_count.get(), 0);
    assert_eq!(second_count.get(), 1);
}

#[test]
fn destroy_notification_is_deduplicated() {
    let mut wm = new_wm();
    let (count, c) = counter();
    wm.on_destroy(None, move |_| {
        c.set(c.get() + 1);
        Ok(())
    });

    wm.conn().push_event(WmEvent::Destroy { window: 5 });
    wm.conn().push_event(WmEvent::Destroy { window: 5 });
    wm.drain_events().unwrap();
    assert_eq!(count.get(), 1);

    // A different destruction in between re-arms the window.
    wm.conn().push_event(WmEvent::Destroy { window: 6 });
    wm.conn().push_event(WmEvent::Destroy { window: 5 });
    wm.drain_events().unwrap();
    assert_eq!(count.get(), 3);
}

#[test]
fn property_handlers_route_specific_then_wildcard() {
    let mut wm = new_wm();
    let order = Rc::new(RefCell::new(Vec::new()));

    let o = order.clone();
    wm.on_property_change(None, &["_NET_WM_STATE"], move |_| {
        o.borrow_mut().push("wildcard");
        Ok(())
    })
    .unwrap();
    let o = order.clone();
    wm.on_property_change(Some(7), &["_NET_WM_STATE"], move |_| {
        o.borrow_mut().push("specific");
        Ok(())
    })
    .unwrap();

    let state_atom = wm.conn().atom("_NET_WM_STATE");
    let other_atom = wm.conn().atom("_NET_WM_NAME");

    // Both fire for the subscribed window, window-specific first.
    wm.conn().push_event(WmEvent::Property {
        window: 7,
        atom: state_atom,
        deleted: false,
    });
    wm.drain_events().unwrap();
    assert_eq!(*order.borrow(), vec!["specific", "wildcard"]);

    // Only the wildcard subscriber fires for other windows.
    order.borrow_mut().clear();
    wm.conn().push_event(WmEvent::Property {
        window: 8,
        atom: state_atom,
        deleted: false,
    });
    wm.drain_events().unwrap();
    assert_eq!(*order.borrow(), vec!["wildcard"]);

    // Unsubscribed atoms and deletions are not routed.
    order.borrow_mut().clear();
    wm.conn().push_event(WmEvent::Property {
        window: 7,
        atom: other_atom,
        deleted: false,
    });
    wm.conn().push_event(WmEvent::Property {
        window: 7,
        atom: state_atom,
        deleted: true,
    });
    wm.drain_events().unwrap();
    assert!(order.borrow().is_empty());
}

#[test]
fn destroying_a_window_purges_its_registrations() {
    let mut wm = new_wm();
    let (count, c) = counter();
    wm.on_property_change(Some(7), &["_NET_WM_STATE"], move |_| {
        c.set(c.get() + 1);
        Ok(())
    })
    .unwrap();
    let state_atom = wm.conn().atom("_NET_WM_STATE");

    wm.conn().push_event(WmEvent::Destroy { window: 7 });
    wm.conn().push_event(WmEvent::Property {
        window: 7,
        atom: state_atom,
        deleted: false,
    });
    wm.drain_events().unwrap();
    assert_eq!(count.get(), 0);
}

#[test]
fn activate_window_desktop_tristate() {
    let wm = new_wm();
    wm.conn().set_card32_property(ROOT, "_NET_CURRENT_DESKTOP", "CARDINAL", &[2]);
    let current_desktop_atom = wm.conn().atom("_NET_CURRENT_DESKTOP");

    // No desktop property: None, no request.
    assert_eq!(wm.activate_window_desktop(20).unwrap(), None);
    assert!(wm.conn().messages().is_empty());

    // Same desktop: Some(false), still no request.
    wm.conn().set_card32_property(21, "_NET_WM_DESKTOP", "CARDINAL", &[2]);
    assert_eq!(wm.activate_window_desktop(21).unwrap(), Some(false));
    assert!(wm.conn().messages().is_empty());

    // Different desktop: Some(true) and exactly one switch request.
    wm.conn().set_card32_property(22, "_NET_WM_DESKTOP", "CARDINAL", &[4]);
    assert_eq!(wm.activate_window_desktop(22).unwrap(), Some(true));
    let messages = wm.conn().messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].1, current_desktop_atom);
    assert_eq!(messages[0].2[0], 4);
}

#[test]
fn focus_history_is_duplicate_free_and_ordered() {
    let mut wm = new_wm();
    for &window in &[5u32, 6, 5, 7] {
        wm.conn().push_event(WmEvent::FocusIn {
            window,
            mode: FocusMode::Normal,
        });
    }
    wm.drain_events().unwrap();
    assert_eq!(wm.focus_history(), &[6, 5, 7]);

    // Destruction drops the window from the history.
    wm.conn().push_event(WmEvent::Destroy { window: 5 });
    wm.drain_events().unwrap();
    assert_eq!(wm.focus_history(), &[6, 7]);
}

#[test]
fn property_write_read_roundtrip() {
    let wm = new_wm();
    wm.set_property(9, "MY_PROP", "CARDINAL", 32, &PropertyValue::Card32(vec![1, 2, 3]))
        .unwrap();
    let value = wm.get_property(9, "MY_PROP", Some("CARDINAL")).unwrap();
    assert_eq!(value, Some(PropertyValue::Card32(vec![1, 2, 3])));
}

#[test]
fn long_properties_are_read_in_segments() {
    let wm = new_wm();
    // 300 words is well past the 50-word first segment.
    let values: Vec<u32> = (0..300).collect();
    wm.set_property(9, "LONG_PROP", "CARDINAL", 32, &PropertyValue::Card32(values.clone()))
        .unwrap();
    let value = wm.get_property(9, "LONG_PROP", Some("CARDINAL")).unwrap();
    assert_eq!(value, Some(PropertyValue::Card32(values)));
}

#[test]
fn startup_replay_fires_create_but_not_manage() {
    let mut wm = new_wm();
    wm.conn().add_client(10);
    wm.conn().add_client(11);

    let (create_count, c) = counter();
    wm.on_create(None, move |_| {
        c.set(c.get() + 1);
        Ok(())
    });
    let (manage_count, m) = counter();
    wm.on_manage(None, move |_| {
        m.set(m.get() + 1);
        Ok(())
    });

    wm.init().unwrap();
    assert_eq!(create_count.get(), 2);
    assert_eq!(manage_count.get(), 0);
    // The replay flag outlives init itself...
    assert!(wm.startup());

    // ...and drops at the first live creation, which fires both hooks.
    wm.conn().add_live(12);
    wm.conn().push_event(WmEvent::Create {
        window: 12,
        parent: ROOT,
        override_redirect: false,
    });
    wm.drain_events().unwrap();
    assert!(!wm.startup());
    assert_eq!(create_count.get(), 3);
    assert_eq!(manage_count.get(), 1);
}

#[test]
fn vanished_window_create_is_dropped() {
    let mut wm = new_wm();
    let (count, c) = counter();
    wm.on_create(None, move |_| {
        c.set(c.get() + 1);
        Ok(())
    });

    // Window 99 is not live: the attribute probe fails and no handler runs,
    // but the startup flag still drops.
    wm.conn().push_event(WmEvent::Create {
        window: 99,
        parent: ROOT,
        override_redirect: false,
    });
    wm.drain_events().unwrap();
    assert_eq!(count.get(), 0);
    assert!(!wm.startup());
}

#[test]
fn create_handlers_filter_on_matchers() {
    let mut wm = new_wm();
    wm.conn().add_live(30);
    wm.conn().add_live(31);
    wm.conn()
        .set_raw_property(30, "WM_CLASS", "STRING", 8, b"xterm\0XTerm\0".to_vec());
    wm.conn()
        .set_raw_property(31, "WM_CLASS", "STRING", 8, b"navigator\0Firefox\0".to_vec());

    let (term_count, t) = counter();
    wm.on_manage(
        Some(Matcher {
            cls: Some("(?i)xterm".into()),
            ..Default::default()
        }),
        move |_| {
            t.set(t.get() + 1);
            Ok(())
        },
    );
    let (any_count, a) = counter();
    wm.on_manage(None, move |_| {
        a.set(a.get() + 1);
        Ok(())
    });

    for window in [30, 31] {
        wm.conn().push_event(WmEvent::Create {
            window,
            parent: ROOT,
            override_redirect: false,
        });
    }
    wm.drain_events().unwrap();
    assert_eq!(term_count.get(), 1);
    assert_eq!(any_count.get(), 2);
}

#[test]
fn restart_request_aborts_remaining_drain() {
    let mut wm = new_wm();
    wm.on_key(None, "Ctrl+a", |wm| {
        wm.request_restart();
        Ok(())
    })
    .unwrap();
    let (count, c) = counter();
    wm.on_destroy(None, move |_| {
        c.set(c.get() + 1);
        Ok(())
    });

    wm.conn().push_event(WmEvent::KeyPress {
        window: ROOT,
        state: CTRL,
        keycode: 38,
    });
    wm.conn().push_event(WmEvent::Destroy { window: 40 });

    assert_eq!(wm.drain_events().unwrap(), DispatchOutcome::RestartRequested);
    // The queued destroy was skipped, not dispatched.
    assert_eq!(count.get(), 0);
    assert_eq!(wm.conn().pending_events(), 1);
}

#[test]
fn failing_handler_does_not_stop_dispatch() {
    let mut wm = new_wm();
    wm.on_destroy(None, |_| anyhow::bail!("handler blew up"));
    let (count, c) = counter();
    wm.on_destroy(None, move |_| {
        c.set(c.get() + 1);
        Ok(())
    });

    wm.conn().push_event(WmEvent::Destroy { window: 50 });
    wm.conn().push_event(WmEvent::Destroy { window: 51 });
    assert_eq!(wm.drain_events().unwrap(), DispatchOutcome::Continue);
    assert_eq!(count.get(), 2);
}

#[test]
fn stop_clears_registries_and_ungrabs_everything() {
    let mut wm = new_wm();
    wm.conn().add_client(60);
    let (key_count, k) = counter();
    wm.on_key(None, "Ctrl+a", move |_| {
        k.set(k.get() + 1);
        Ok(())
    })
    .unwrap();
    let (deinit_count, d) = counter();
    wm.on_deinit(move |_| {
        d.set(d.get() + 1);
        Ok(())
    });

    wm.stop(false).unwrap();
    assert_eq!(deinit_count.get(), 1);

    // Blanket ungrab on root and every client.
    let ungrab_alls = wm.conn().state.borrow().ungrab_alls.clone();
    assert!(ungrab_alls.contains(&ROOT));
    assert!(ungrab_alls.contains(&60));

    // Registries are gone: the old binding no longer routes.
    wm.conn().push_event(WmEvent::KeyPress {
        window: ROOT,
        state: CTRL,
        keycode: 38,
    });
    wm.drain_events().unwrap();
    assert_eq!(key_count.get(), 0);
}

#[test]
fn kbd_layout_tracking_follows_focus() {
    let mut wm = new_wm();
    wm.track_kbd_layout = true;

    // Focus-in restores the group stored on the window, defaulting to 0.
    wm.conn().set_card32_property(70, "_HOOKWM_KBD_GROUP", "CARDINAL", &[2]);
    wm.conn().push_event(WmEvent::FocusIn {
        window: 70,
        mode: FocusMode::Normal,
    });
    wm.drain_events().unwrap();
    assert_eq!(wm.conn().kbd_group(), 2);

    wm.conn().push_event(WmEvent::FocusIn {
        window: 71,
        mode: FocusMode::Normal,
    });
    wm.drain_events().unwrap();
    assert_eq!(wm.conn().kbd_group(), 0);

    // Focus-out persists the active group onto the window.
    wm.conn().set_kbd_group_state(3);
    wm.conn().push_event(WmEvent::FocusOut {
        window: 71,
        mode: FocusMode::Normal,
    });
    wm.drain_events().unwrap();
    let value = wm.get_property(71, "_HOOKWM_KBD_GROUP", Some("CARDINAL")).unwrap();
    assert_eq!(value, Some(PropertyValue::Card32(vec![3])));

    // Grab-initiated transitions are ignored.
    wm.conn().push_event(WmEvent::FocusIn {
        window: 70,
        mode: FocusMode::Grab,
    });
    wm.drain_events().unwrap();
    assert_eq!(wm.conn().kbd_group(), 3);
}

#[test]
fn desktop_sentinels_normalize_to_all_desktops() {
    let wm = new_wm();
    wm.conn().set_card32_property(80, "_NET_WM_DESKTOP", "CARDINAL", &[0xFFFF_FFFF]);
    assert_eq!(wm.window(80).desktop().unwrap(), Some(-1));
    wm.conn().set_card32_property(81, "_NET_WM_DESKTOP", "CARDINAL", &[0x0FFF_FFFF]);
    assert_eq!(wm.window(81).desktop().unwrap(), Some(-1));
    wm.conn().set_card32_property(82, "_NET_WM_DESKTOP", "CARDINAL", &[3]);
    assert_eq!(wm.window(82).desktop().unwrap(), Some(3));
    assert_eq!(wm.window(83).desktop().unwrap(), None);
}

#[test]
fn event_window_is_set_during_dispatch() {
    let mut wm = new_wm();
    wm.conn().add_live(90);
    let seen = Rc::new(Cell::new(None));
    let s = seen.clone();
    wm.on_create(None, move |wm| {
        s.set(wm.event_window());
        Ok(())
    });

    wm.conn().push_event(WmEvent::Create {
        window: 90,
        parent: ROOT,
        override_redirect: false,
    });
    wm.drain_events().unwrap();
    assert_eq!(seen.get(), Some(90));
}
