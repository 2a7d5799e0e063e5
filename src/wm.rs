//! The dispatcher: handler registries and event routing.
//!
//! A single [`Wm`] owns the display connection, the reactor and every
//! handler registry. The reactor reports the connection readable, the
//! dispatcher drains the whole pending queue (including events generated
//! synchronously by handler side effects) and routes each event to the
//! registered callbacks. Everything runs on one thread; handlers run to
//! completion before the next event is looked at.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result};
use x11rb::protocol::xproto::{Atom, EventMask, Window};

use crate::atoms::AtomCache;
use crate::display::{DisplayConn, FocusMode, WmEvent};
use crate::keys::{self, KeyCombo};
use crate::props;
use crate::reactor::{Reactor, TimerId, Wake, DISPLAY_TOKEN};
use crate::window::{Matcher, WindowView};

/// Per-window property carrying the keyboard layout group.
pub const KBD_GROUP_PROPERTY: &str = "_HOOKWM_KBD_GROUP";

/// Result of one handler invocation, checked by the drain loop after every
/// callback. A restart request aborts the rest of the current drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Continue,
    RestartRequested,
}

/// User callback. Failures are caught at the dispatch boundary and logged.
pub type Handler<C> = Rc<RefCell<dyn FnMut(&mut Wm<C>) -> Result<()>>>;

/// Timer callback. Returning `Ok(true)` stops the timer's schedule.
pub type TimerHandler<C> = Rc<RefCell<dyn FnMut(&mut Wm<C>) -> Result<bool>>>;

/// Token for removing a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Token for removing a key binding: the four grab entries one `on_key`
/// registration produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyBinding {
    pub window: Window,
    pub keycode: u8,
    pub masks: [u16; 4],
}

/// The event currently being dispatched, valid for one handler invocation.
#[derive(Debug, Clone, Copy)]
pub struct EventContext {
    pub event: WmEvent,
    pub window: Window,
}

struct CreateEntry<C: DisplayConn> {
    id: HandlerId,
    matcher: Option<Matcher>,
    ignore_startup: bool,
    callback: Handler<C>,
}

pub struct Wm<C: DisplayConn> {
    conn: C,
    root: Window,
    atoms: AtomCache,
    reactor: Reactor,

    key_handlers: HashMap<Window, HashMap<(u16, u8), Handler<C>>>,
    property_handlers: HashMap<Atom, HashMap<Option<Window>, Vec<(HandlerId, Handler<C>)>>>,
    create_handlers: Vec<CreateEntry<C>>,
    destroy_handlers: HashMap<Option<Window>, Vec<(HandlerId, Handler<C>)>>,
    init_handlers: Vec<Handler<C>>,
    deinit_handlers: Vec<Handler<C>>,
    timer_handlers: HashMap<TimerId, TimerHandler<C>>,

    /// Most-recently-focused last; a window appears at most once.
    focus_history: Vec<Window>,
    current: Option<EventContext>,
    recently_destroyed: Option<Window>,
    /// Raised for the whole startup replay, lowered at the entry of the
    /// first live CreateNotify dispatch.
    startup: bool,
    restart_requested: bool,
    next_handler_id: u64,

    /// Persist and restore per-window keyboard layout groups on focus
    /// changes.
    pub track_kbd_layout: bool,
}

impl<C: DisplayConn> Wm<C> {
    pub fn new(conn: C) -> Result<Self> {
        let root = conn.root();
        Ok(Self {
            conn,
            root,
            atoms: AtomCache::new(),
            reactor: Reactor::new()?,
            key_handlers: HashMap::new(),
            property_handlers: HashMap::new(),
            create_handlers: Vec::new(),
            destroy_handlers: HashMap::new(),
            init_handlers: Vec::new(),
            deinit_handlers: Vec::new(),
            timer_handlers: HashMap::new(),
            focus_history: Vec::new(),
            current: None,
            recently_destroyed: None,
            startup: false,
            restart_requested: false,
            next_handler_id: 0,
            track_kbd_layout: false,
        })
    }

    pub fn conn(&self) -> &C {
        &self.conn
    }

    pub fn root(&self) -> Window {
        self.root
    }

    pub fn atoms(&self) -> &AtomCache {
        &self.atoms
    }

    /// Whether the startup replay is still in effect.
    pub fn startup(&self) -> bool {
        self.startup
    }

    /// The event being dispatched right now.
    pub fn event(&self) -> Option<WmEvent> {
        self.current.map(|ctx| ctx.event)
    }

    /// The window the current event targets.
    pub fn event_window(&self) -> Option<Window> {
        self.current.map(|ctx| ctx.window)
    }

    /// A lazily-computed view over `window`.
    pub fn window(&self, window: Window) -> WindowView<'_, C> {
        WindowView::new(&self.conn, &self.atoms, self.root, window)
    }

    /// Focus history, most-recently-focused last.
    pub fn focus_history(&self) -> &[Window] {
        &self.focus_history
    }

    /// Ask the drain loop to stop after the current callback and run the
    /// restart sequence instead of the remaining queued events.
    pub fn request_restart(&mut self) {
        self.restart_requested = true;
    }

    fn next_id(&mut self) -> HandlerId {
        let id = HandlerId(self.next_handler_id);
        self.next_handler_id += 1;
        id
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Bind `keydef` on `window` (root if `None`).
    ///
    /// The definition must parse to exactly one combo; anything else is a
    /// logged registration error, returned as `Ok(None)`. The combo is
    /// grabbed under the four lock-mask variants, all routed to `callback`;
    /// re-binding an identical combo replaces the previous callback.
    pub fn on_key(
        &mut self,
        window: Option<Window>,
        keydef: &str,
        callback: impl FnMut(&mut Wm<C>) -> Result<()> + 'static,
    ) -> Result<Option<KeyBinding>> {
        let target = window.unwrap_or(self.root);
        let combo = match keys::parse_keydef(&self.conn, keydef)? {
            Some(combos) if combos.len() == 1 => combos[0],
            _ => {
                log::error!("Invalid key definition [{}]", keydef);
                return Ok(None);
            }
        };
        Ok(Some(self.grab_combo(target, combo, callback)?))
    }

    fn grab_combo(
        &mut self,
        window: Window,
        combo: KeyCombo,
        callback: impl FnMut(&mut Wm<C>) -> Result<()> + 'static,
    ) -> Result<KeyBinding> {
        let handler: Handler<C> = Rc::new(RefCell::new(callback));
        let masks = combo.grab_masks();
        for &mask in &masks {
            self.conn.grab_key(window, mask, combo.keycode)?;
            let bucket = self.key_handlers.entry(window).or_default();
            if bucket.insert((mask, combo.keycode), handler.clone()).is_some() {
                log::debug!(
                    "Replaced key handler (mask 0x{:x}, keycode {}) on 0x{:x}",
                    mask,
                    combo.keycode,
                    window
                );
            }
        }
        self.conn.flush()?;
        Ok(KeyBinding {
            window,
            keycode: combo.keycode,
            masks,
        })
    }

    /// Release the four grabs and registry entries of `binding`.
    ///
    /// Only valid while the window still exists; on session stop a blanket
    /// ungrab replaces per-binding release.
    pub fn unbind_key(&mut self, binding: &KeyBinding) -> Result<()> {
        for &mask in &binding.masks {
            self.conn.ungrab_key(binding.window, mask, binding.keycode)?;
            if let Some(bucket) = self.key_handlers.get_mut(&binding.window) {
                bucket.remove(&(mask, binding.keycode));
                if bucket.is_empty() {
                    self.key_handlers.remove(&binding.window);
                }
            }
        }
        self.conn.flush()?;
        Ok(())
    }

    /// Run `callback` for every window creation, including the synthetic
    /// replay of windows that already existed at `init`.
    pub fn on_create(
        &mut self,
        matcher: Option<Matcher>,
        callback: impl FnMut(&mut Wm<C>) -> Result<()> + 'static,
    ) -> HandlerId {
        self.register_create(matcher, false, callback)
    }

    /// Like [`on_create`](Self::on_create) but silent during the startup
    /// replay: only live creations fire.
    pub fn on_manage(
        &mut self,
        matcher: Option<Matcher>,
        callback: impl FnMut(&mut Wm<C>) -> Result<()> + 'static,
    ) -> HandlerId {
        self.register_create(matcher, true, callback)
    }

    fn register_create(
        &mut self,
        matcher: Option<Matcher>,
        ignore_startup: bool,
        callback: impl FnMut(&mut Wm<C>) -> Result<()> + 'static,
    ) -> HandlerId {
        let id = self.next_id();
        self.create_handlers.push(CreateEntry {
            id,
            matcher,
            ignore_startup,
            callback: Rc::new(RefCell::new(callback)),
        });
        id
    }

    pub fn remove_create_handler(&mut self, id: HandlerId) {
        self.create_handlers.retain(|entry| entry.id != id);
    }

    /// Run `callback` when `window` (or any window, for `None`) is
    /// destroyed. Only the destroyed window's id is still valid inside the
    /// callback; its properties are gone.
    pub fn on_destroy(
        &mut self,
        window: Option<Window>,
        callback: impl FnMut(&mut Wm<C>) -> Result<()> + 'static,
    ) -> HandlerId {
        let id = self.next_id();
        self.destroy_handlers
            .entry(window)
            .or_default()
            .push((id, Rc::new(RefCell::new(callback))));
        id
    }

    pub fn remove_destroy_handler(&mut self, id: HandlerId) {
        for list in self.destroy_handlers.values_mut() {
            list.retain(|(entry_id, _)| *entry_id != id);
        }
        self.destroy_handlers.retain(|_, list| !list.is_empty());
    }

    /// Run `callback` when any of `properties` changes on `window` (or on
    /// any window, for `None`).
    pub fn on_property_change(
        &mut self,
        window: Option<Window>,
        properties: &[&str],
        callback: impl FnMut(&mut Wm<C>) -> Result<()> + 'static,
    ) -> Result<HandlerId> {
        let id = self.next_id();
        let handler: Handler<C> = Rc::new(RefCell::new(callback));
        for name in properties {
            let atom = self.atoms.intern(&self.conn, name)?;
            self.property_handlers
                .entry(atom)
                .or_default()
                .entry(window)
                .or_default()
                .push((id, handler.clone()));
        }
        Ok(id)
    }

    pub fn remove_property_handler(&mut self, id: HandlerId) {
        for buckets in self.property_handlers.values_mut() {
            for list in buckets.values_mut() {
                list.retain(|(entry_id, _)| *entry_id != id);
            }
            buckets.retain(|_, list| !list.is_empty());
        }
        self.property_handlers.retain(|_, buckets| !buckets.is_empty());
    }

    /// Run `callback` whenever a session initializes (including after a
    /// restart). Failures here are fatal: they abort `init`.
    pub fn on_init(&mut self, callback: impl FnMut(&mut Wm<C>) -> Result<()> + 'static) {
        self.init_handlers.push(Rc::new(RefCell::new(callback)));
    }

    /// Run `callback` whenever the session stops. Failures are logged and
    /// do not abort the remaining deinit handlers.
    pub fn on_deinit(&mut self, callback: impl FnMut(&mut Wm<C>) -> Result<()> + 'static) {
        self.deinit_handlers.push(Rc::new(RefCell::new(callback)));
    }

    /// Schedule `callback` every `timeout`, first firing after
    /// `first_timeout` (or `timeout`). The callback stops its own schedule
    /// by returning `Ok(true)`.
    pub fn on_timer(
        &mut self,
        timeout: Duration,
        start: bool,
        first_timeout: Option<Duration>,
        callback: impl FnMut(&mut Wm<C>) -> Result<bool> + 'static,
    ) -> TimerId {
        let id = self
            .reactor
            .add_timer(first_timeout.unwrap_or(timeout), timeout, start);
        self.timer_handlers.insert(id, Rc::new(RefCell::new(callback)));
        id
    }

    pub fn timer_start(&mut self, id: TimerId) {
        self.reactor.timer_start(id);
    }

    pub fn timer_stop(&mut self, id: TimerId) {
        self.reactor.timer_stop(id);
    }

    pub fn timer_again(&mut self, id: TimerId) {
        self.reactor.timer_again(id);
    }

    pub fn timer_remaining(&self, id: TimerId) -> Option<Duration> {
        self.reactor.timer_remaining(id)
    }

    pub fn timer_overdue(&self, id: TimerId, timeout: Duration) -> bool {
        self.reactor.timer_overdue(id, timeout)
    }

    pub fn remove_timer(&mut self, id: TimerId) {
        self.reactor.remove_timer(id);
        self.timer_handlers.remove(&id);
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Bring the session up: subscribe to root structure changes, run init
    /// handlers, then replay a synthetic creation for every existing client
    /// window so handlers observe the same state as on a cold boot.
    pub fn init(&mut self) -> Result<()> {
        self.conn
            .select_input(self.root, EventMask::SUBSTRUCTURE_NOTIFY)
            .context("Failed to subscribe to root window")?;

        let init_handlers = self.init_handlers.clone();
        for handler in init_handlers {
            (&mut *handler.borrow_mut())(self).context("Init handler failed")?;
        }

        self.startup = true;
        for window in self.clients()? {
            let event = WmEvent::Create {
                window,
                parent: self.root,
                override_redirect: false,
            };
            self.process_create(event, window)?;
        }
        self.conn.sync()?;
        Ok(())
    }

    /// Tear the session down. When not exiting the process, every key grab
    /// is released with a blanket any-key/any-modifier ungrab so a restarted
    /// session starts clean.
    pub fn stop(&mut self, is_exit: bool) -> Result<()> {
        self.key_handlers.clear();
        self.property_handlers.clear();
        self.create_handlers.clear();
        self.destroy_handlers.clear();
        self.focus_history.clear();
        self.current = None;
        self.recently_destroyed = None;

        if !is_exit {
            if let Err(err) = self.conn.ungrab_all_keys(self.root) {
                log::warn!("Failed to ungrab keys on root: {:#}", err);
            }
            match self.clients() {
                Ok(clients) => {
                    for window in clients {
                        let _ = self.conn.ungrab_all_keys(window);
                    }
                }
                Err(err) => log::warn!("Failed to list clients during stop: {:#}", err),
            }
        }

        self.reactor.stop_all_timers();
        let timer_ids: Vec<TimerId> = self.timer_handlers.keys().copied().collect();
        for id in timer_ids {
            self.reactor.remove_timer(id);
        }
        self.timer_handlers.clear();

        let deinit_handlers = std::mem::take(&mut self.deinit_handlers);
        for handler in &deinit_handlers {
            if let Err(err) = (&mut *handler.borrow_mut())(self) {
                log::error!("Shutdown error: {:#}", err);
            }
        }
        self.init_handlers.clear();

        self.conn.flush()?;
        Ok(())
    }

    /// Reactor loop: drain events on connection readiness, fire timers,
    /// restart on request (running `reload` between stop and init), exit
    /// cleanly on a watched signal.
    pub fn run(&mut self, mut reload: impl FnMut(&mut Self) -> Result<()>) -> Result<()> {
        self.reactor
            .register_io(self.conn.connection_fd(), DISPLAY_TOKEN)?;
        self.reactor.watch_signal(libc::SIGINT)?;

        loop {
            let wakes = self.reactor.wait()?;
            for wake in wakes {
                let outcome = match wake {
                    Wake::Io(DISPLAY_TOKEN) => self.drain_events()?,
                    Wake::Io(_) => DispatchOutcome::Continue,
                    Wake::Timer(id) => self.fire_timer(id)?,
                    Wake::Signal(signum) => {
                        log::info!("Got signal {}, shutting down", signum);
                        self.stop(true)?;
                        return Ok(());
                    }
                };
                if outcome == DispatchOutcome::RestartRequested {
                    self.stop(false)?;
                    log::info!("Restarting...");
                    reload(self).context("Restart reload failed")?;
                    self.init()?;
                    log::info!("Started successfully");
                    // Anything else in this wake batch belongs to the old
                    // session.
                    break;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Drain every pending event, including events generated synchronously
    /// by handler side effects. A restart request skips the rest of the
    /// queue for this drain.
    pub fn drain_events(&mut self) -> Result<DispatchOutcome> {
        while let Some(event) = self.conn.next_event()? {
            if self.dispatch(event)? == DispatchOutcome::RestartRequested {
                return Ok(DispatchOutcome::RestartRequested);
            }
        }
        self.conn.flush()?;
        Ok(DispatchOutcome::Continue)
    }

    fn dispatch(&mut self, event: WmEvent) -> Result<DispatchOutcome> {
        match event {
            WmEvent::KeyPress { window, state, keycode } => {
                self.handle_keypress(event, window, state, keycode)
            }
            WmEvent::KeyRelease { state, keycode, .. } => {
                log::debug!("KeyRelease {} {}", state, keycode);
                Ok(DispatchOutcome::Continue)
            }
            WmEvent::Create { window, .. } => self.handle_create(event, window),
            WmEvent::Destroy { window } => self.handle_destroy(event, window),
            WmEvent::FocusIn { window, mode } => self.handle_focus_in(window, mode),
            WmEvent::FocusOut { window, mode } => self.handle_focus_out(window, mode),
            WmEvent::Property { window, atom, deleted } => {
                self.handle_property(event, window, atom, deleted)
            }
        }
    }

    /// Run one user callback, catching its failure and converting a pending
    /// restart request into the outcome the drain loop checks.
    fn invoke(&mut self, handler: &Handler<C>) -> DispatchOutcome {
        if let Err(err) = (&mut *handler.borrow_mut())(self) {
            log::error!("Handler error: {:#}", err);
        }
        if std::mem::take(&mut self.restart_requested) {
            DispatchOutcome::RestartRequested
        } else {
            DispatchOutcome::Continue
        }
    }

    fn handle_keypress(
        &mut self,
        event: WmEvent,
        window: Window,
        state: u16,
        keycode: u8,
    ) -> Result<DispatchOutcome> {
        log::debug!("KeyPress {} {}", state, keycode);
        let handler = self
            .key_handlers
            .get(&window)
            .and_then(|bucket| bucket.get(&(state, keycode)))
            .cloned();
        match handler {
            Some(handler) => {
                self.current = Some(EventContext { event, window });
                Ok(self.invoke(&handler))
            }
            None => Ok(DispatchOutcome::Continue),
        }
    }

    fn handle_create(&mut self, event: WmEvent, window: Window) -> Result<DispatchOutcome> {
        // The startup replay is over the moment a live creation arrives,
        // even one whose window is already gone by the time we probe it.
        self.startup = false;
        if self.conn.window_attributes(window)?.is_none() {
            // Vanished before the probe; treat as never existed.
            return Ok(DispatchOutcome::Continue);
        }
        self.process_create(event, window)
    }

    /// Subscribe the window to further notifications and run the create
    /// handlers in registration order, each self-filtering on its matcher
    /// and startup predicate.
    fn process_create(&mut self, event: WmEvent, window: Window) -> Result<DispatchOutcome> {
        self.conn.select_input(
            window,
            EventMask::STRUCTURE_NOTIFY | EventMask::PROPERTY_CHANGE | EventMask::FOCUS_CHANGE,
        )?;
        self.current = Some(EventContext { event, window });

        let entries: Vec<(Option<Matcher>, bool, Handler<C>)> = self
            .create_handlers
            .iter()
            .map(|entry| (entry.matcher.clone(), entry.ignore_startup, entry.callback.clone()))
            .collect();
        for (matcher, ignore_startup, callback) in entries {
            if ignore_startup && self.startup {
                continue;
            }
            if let Some(matcher) = &matcher {
                match self.window(window).matches(matcher) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(err) => {
                        log::error!("Matcher failed for 0x{:x}: {:#}", window, err);
                        continue;
                    }
                }
            }
            if self.invoke(&callback) == DispatchOutcome::RestartRequested {
                return Ok(DispatchOutcome::RestartRequested);
            }
        }
        Ok(DispatchOutcome::Continue)
    }

    fn handle_destroy(&mut self, event: WmEvent, window: Window) -> Result<DispatchOutcome> {
        // The server can notify the same logical destruction twice; handlers
        // must not.
        if self.recently_destroyed == Some(window) {
            return Ok(DispatchOutcome::Continue);
        }
        self.recently_destroyed = Some(window);

        let mut handlers: Vec<Handler<C>> = Vec::new();
        if let Some(list) = self.destroy_handlers.get(&None) {
            handlers.extend(list.iter().map(|(_, handler)| handler.clone()));
        }
        if let Some(list) = self.destroy_handlers.get(&Some(window)) {
            handlers.extend(list.iter().map(|(_, handler)| handler.clone()));
        }

        self.current = Some(EventContext { event, window });
        let mut outcome = DispatchOutcome::Continue;
        for handler in handlers {
            if self.invoke(&handler) == DispatchOutcome::RestartRequested {
                outcome = DispatchOutcome::RestartRequested;
                break;
            }
        }
        // Registry cleanup happens no matter what the handlers did.
        self.purge_window(window);
        Ok(outcome)
    }

    fn purge_window(&mut self, window: Window) {
        self.key_handlers.remove(&window);
        self.destroy_handlers.remove(&Some(window));
        self.focus_history.retain(|&w| w != window);
        self.property_handlers.retain(|_, buckets| {
            buckets.remove(&Some(window));
            !buckets.is_empty()
        });
    }

    fn handle_property(
        &mut self,
        event: WmEvent,
        window: Window,
        atom: Atom,
        deleted: bool,
    ) -> Result<DispatchOutcome> {
        // Deletions are not actionable.
        if deleted {
            return Ok(DispatchOutcome::Continue);
        }
        let buckets = match self.property_handlers.get(&atom) {
            Some(buckets) => buckets,
            None => return Ok(DispatchOutcome::Continue),
        };

        // Window-specific subscribers run before wildcard subscribers.
        let mut handlers: Vec<Handler<C>> = Vec::new();
        if let Some(list) = buckets.get(&Some(window)) {
            handlers.extend(list.iter().map(|(_, handler)| handler.clone()));
        }
        if let Some(list) = buckets.get(&None) {
            handlers.extend(list.iter().map(|(_, handler)| handler.clone()));
        }

        self.current = Some(EventContext { event, window });
        for handler in handlers {
            if self.invoke(&handler) == DispatchOutcome::RestartRequested {
                return Ok(DispatchOutcome::RestartRequested);
            }
        }
        Ok(DispatchOutcome::Continue)
    }

    fn handle_focus_in(&mut self, window: Window, mode: FocusMode) -> Result<DispatchOutcome> {
        self.focus_history.retain(|&w| w != window);
        self.focus_history.push(window);

        if self.track_kbd_layout
            && matches!(mode, FocusMode::Normal | FocusMode::WhileGrabbed)
        {
            let group = self
                .read_kbd_group(window)
                .unwrap_or_else(|err| {
                    log::warn!("Failed to read layout group for 0x{:x}: {:#}", window, err);
                    None
                })
                .unwrap_or(0);
            if let Err(err) = self.conn.set_keyboard_group(group) {
                log::warn!("Failed to set keyboard layout group {}: {:#}", group, err);
            }
        }
        Ok(DispatchOutcome::Continue)
    }

    fn handle_focus_out(&mut self, window: Window, mode: FocusMode) -> Result<DispatchOutcome> {
        if self.track_kbd_layout
            && matches!(mode, FocusMode::Normal | FocusMode::WhileGrabbed)
        {
            match self.conn.keyboard_group() {
                Ok(group) => {
                    if let Err(err) = self.write_kbd_group(window, group) {
                        log::warn!(
                            "Failed to store layout group on 0x{:x}: {:#}",
                            window,
                            err
                        );
                    }
                }
                Err(err) => log::warn!("Failed to query keyboard layout group: {:#}", err),
            }
        }
        Ok(DispatchOutcome::Continue)
    }

    fn read_kbd_group(&self, window: Window) -> Result<Option<u8>> {
        let property = self.atoms.intern(&self.conn, KBD_GROUP_PROPERTY)?;
        let cardinal = self.atoms.intern(&self.conn, "CARDINAL")?;
        let value = props::read_property(&self.conn, window, property, cardinal, false)?;
        Ok(value.and_then(|v| v.first_card32()).map(|g| g as u8))
    }

    fn write_kbd_group(&self, window: Window, group: u8) -> Result<()> {
        let property = self.atoms.intern(&self.conn, KBD_GROUP_PROPERTY)?;
        let cardinal = self.atoms.intern(&self.conn, "CARDINAL")?;
        props::write_property(
            &self.conn,
            window,
            property,
            cardinal,
            32,
            &props::PropertyValue::Card32(vec![u32::from(group)]),
        )
    }

    fn fire_timer(&mut self, id: TimerId) -> Result<DispatchOutcome> {
        let handler = match self.timer_handlers.get(&id) {
            Some(handler) => handler.clone(),
            None => return Ok(DispatchOutcome::Continue),
        };
        match (&mut *handler.borrow_mut())(self) {
            Ok(true) => self.reactor.timer_stop(id),
            Ok(false) => {}
            Err(err) => log::error!("Timer handler error: {:#}", err),
        }
        if std::mem::take(&mut self.restart_requested) {
            Ok(DispatchOutcome::RestartRequested)
        } else {
            Ok(DispatchOutcome::Continue)
        }
    }
}
