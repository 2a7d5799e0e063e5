//! Atom interning cache.
//!
//! Handler registrations intern arbitrary property names at runtime, so the
//! cache is a growable map rather than a fixed struct of well-known atoms.
//! Entries live for the whole process; there is no eviction.

use std::cell::RefCell;
use std::collections::HashMap;

use anyhow::Result;
use x11rb::protocol::xproto::Atom;

use crate::display::DisplayConn;

/// Memoized string -> atom interning.
///
/// The first lookup for a name round-trips to the server (always with
/// create-if-missing semantics); later lookups hit the cache.
#[derive(Default)]
pub struct AtomCache {
    cache: RefCell<HashMap<String, Atom>>,
}

impl AtomCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `name`, creating the atom on the server if it does not exist.
    pub fn intern(&self, conn: &impl DisplayConn, name: &str) -> Result<Atom> {
        if let Some(&atom) = self.cache.borrow().get(name) {
            return Ok(atom);
        }
        let atom = conn.intern_atom(name)?;
        self.cache.borrow_mut().insert(name.to_string(), atom);
        Ok(atom)
    }

    /// Resolve an atom back to its name. Not cached; callers that iterate
    /// atom lists (state decoding) skip individual failures.
    pub fn name_of(&self, conn: &impl DisplayConn, atom: Atom) -> Result<String> {
        conn.atom_name(atom)
    }
}
