//! # Table Registry
//!
//! Maps server-side table ids to the instrument and role they were
//! subscribed for. The decoder consults this on every inbound frame while
//! the resubscription cycle rebuilds the dynamic portion, so all access
//! goes through one mutex: a reader observes the mapping before or after a
//! rebuild step, never a torn entry.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::protocol::constants::{FIRST_DYNAMIC_TABLE, LAST_FIXED_TABLE};

/// What a subscription table carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableRole {
    /// Table 1, the session-bind heartbeat subscription.
    Bind,
    /// Tables 2-7, fixed account/message feeds.
    Core,
    /// Tables 8-14, fixed underlying currency-pair feeds.
    ForexUnderlying,
    /// Dynamic per-instrument top-of-book quote table.
    StrikeQuote,
    /// Dynamic per-instrument five-level depth table.
    StrikeDepth,
    /// Dynamic per-market hierarchy push table.
    Hierarchy,
}

/// A registered subscription table.
#[derive(Debug, Clone)]
pub struct TableEntry {
    /// The role the table was subscribed for.
    pub role: TableRole,
    /// Instrument (or currency pair) bound to the table, when any.
    pub instrument: Option<String>,
}

struct Inner {
    next_table: u32,
    entries: HashMap<u32, TableEntry>,
}

/// Table-id allocator and live lookup.
///
/// Ids at or below [`LAST_FIXED_TABLE`] have a session-long fixed meaning;
/// ids from [`FIRST_DYNAMIC_TABLE`] upward are handed out by [`allocate`]
/// and are never reused within a session, even across [`reset`] cycles.
///
/// [`allocate`]: TableRegistry::allocate
/// [`reset`]: TableRegistry::reset
pub struct TableRegistry {
    inner: Mutex<Inner>,
}

impl TableRegistry {
    /// Creates an empty registry with the dynamic counter at its start.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_table: FIRST_DYNAMIC_TABLE,
                entries: HashMap::new(),
            }),
        }
    }

    /// Registers a fixed table id (1-14) directly.
    pub fn register(&self, table: u32, instrument: Option<&str>, role: TableRole) {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        inner.entries.insert(
            table,
            TableEntry {
                role,
                instrument: instrument.map(str::to_owned),
            },
        );
    }

    /// Allocates the next dynamic table id and registers it in one step,
    /// so the id grant and the mapping the decoder sees are never split.
    pub fn allocate(&self, role: TableRole, instrument: Option<&str>) -> u32 {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        let table = inner.next_table;
        inner.next_table += 1;
        inner.entries.insert(
            table,
            TableEntry {
                role,
                instrument: instrument.map(str::to_owned),
            },
        );
        table
    }

    /// Looks up a table id. A miss means the frame belongs to an expired
    /// or not-yet-registered subscription and is dropped by the caller.
    pub fn lookup(&self, table: u32) -> Option<TableEntry> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner.entries.get(&table).cloned()
    }

    /// Clears every dynamic entry. Fixed ids survive; the dynamic counter
    /// keeps advancing so retired ids are never handed out again.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        inner.entries.retain(|id, _| *id <= LAST_FIXED_TABLE);
    }

    /// Total number of registered tables.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner.entries.len()
    }

    /// Whether the registry holds no tables at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of registered dynamic tables (ids ≥ [`FIRST_DYNAMIC_TABLE`]).
    pub fn dynamic_len(&self) -> usize {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner
            .entries
            .keys()
            .filter(|id| **id >= FIRST_DYNAMIC_TABLE)
            .count()
    }
}

impl Default for TableRegistry {
    fn default() -> Self {
        Self::new()
    }
}
