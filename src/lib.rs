//! hookwm - scriptable hotkey and window-event daemon for EWMH desktops.
//!
//! A single-threaded reactor drains the X11 event queue and routes key
//! presses, window creation/destruction, focus changes and property changes
//! to registered handlers, which issue window-management requests back
//! through the extended window-manager hints protocol.

pub mod actions;
pub mod atoms;
pub mod config;
pub mod display;
pub mod keys;
pub mod notify;
pub mod props;
pub mod reactor;
pub mod window;
pub mod wm;

pub use actions::WindowStateUpdate;
pub use display::{DisplayConn, FocusMode, WmEvent, XDisplay};
pub use props::{PropertyValue, ProtocolError};
pub use window::Matcher;
pub use wm::{DispatchOutcome, HandlerId, KeyBinding, Wm};
