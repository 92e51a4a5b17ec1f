//! Boundary to the runtime being debugged.
//!
//! The runtime reports loaded scripts and resolved breakpoints. Payloads
//! follow the Chrome DevTools Protocol `Debugger.scriptParsed` and
//! `Debugger.breakpointResolved` notifications; every field is optional on
//! the wire so a malformed payload simply reads as "nothing to see".

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::ops::ControlFlow;
use std::rc::{Rc, Weak};
use tracing::debug;

lazy_static! {
    /// A `node_modules` path segment (either separator) or a `node:` builtin
    static ref RE_MODULE_PATH: Regex = Regex::new(r"(^|[/\\])node_modules([/\\]|$)|^node:").unwrap();
}

/// True when `url` points at a dependency or a runtime builtin rather than
/// user code.
pub fn is_module_path(url: &str) -> bool {
    RE_MODULE_PATH.is_match(url)
}

// ============================================================================
// Event payloads
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptParsed {
    #[serde(default)]
    pub script_id: String,

    /// URL or path the script was loaded from
    #[serde(default)]
    pub url: String,

    /// Source map reference, empty or absent when the script has none
    #[serde(rename = "sourceMapURL", default, skip_serializing_if = "Option::is_none")]
    pub source_map_url: Option<String>,
}

impl ScriptParsed {
    pub fn has_source_map(&self) -> bool {
        self.source_map_url
            .as_deref()
            .is_some_and(|s| !s.is_empty())
    }

    /// A user script shipped with a source map
    pub fn is_non_module_sourcemap(&self) -> bool {
        self.has_source_map() && !is_module_path(&self.url)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointResolved {
    #[serde(default)]
    pub breakpoint_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(default)]
    pub script_id: String,

    #[serde(default)]
    pub line_number: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_number: Option<u32>,
}

// ============================================================================
// Listener registry
// ============================================================================

type Handler<E> = Rc<RefCell<Box<dyn FnMut(&E) -> ControlFlow<()>>>>;

trait ListenerSet {
    fn remove(&self, id: u64) -> bool;
    fn contains(&self, id: u64) -> bool;
}

struct Registry<E: 'static> {
    kind: &'static str,
    next_id: Cell<u64>,
    listeners: RefCell<Vec<(u64, Handler<E>)>>,
}

impl<E: 'static> Registry<E> {
    fn new(kind: &'static str) -> Rc<Self> {
        Rc::new(Self {
            kind,
            next_id: Cell::new(0),
            listeners: RefCell::new(Vec::new()),
        })
    }

    fn subscribe(
        self: &Rc<Self>,
        handler: impl FnMut(&E) -> ControlFlow<()> + 'static,
    ) -> Subscription {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let handler: Box<dyn FnMut(&E) -> ControlFlow<()>> = Box::new(handler);
        self.listeners
            .borrow_mut()
            .push((id, Rc::new(RefCell::new(handler))));

        let set: Rc<dyn ListenerSet> = self.clone();
        Subscription {
            id,
            kind: self.kind,
            registry: Rc::downgrade(&set),
        }
    }

    fn emit(&self, event: &E) {
        // Snapshot so handlers can subscribe or unsubscribe while we iterate.
        let snapshot: Vec<(u64, Handler<E>)> = self
            .listeners
            .borrow()
            .iter()
            .map(|(id, handler)| (*id, Rc::clone(handler)))
            .collect();

        for (id, handler) in snapshot {
            if !self.contains(id) {
                continue;
            }
            let Ok(mut handler) = handler.try_borrow_mut() else {
                debug!("Skipping re-entrant {} listener {}", self.kind, id);
                continue;
            };
            if (*handler)(event).is_break() {
                drop(handler);
                self.remove(id);
                debug!("{} listener {} unsubscribed itself", self.kind, id);
            }
        }
    }

    fn len(&self) -> usize {
        self.listeners.borrow().len()
    }
}

impl<E: 'static> ListenerSet for Registry<E> {
    fn remove(&self, id: u64) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    fn contains(&self, id: u64) -> bool {
        self.listeners.borrow().iter().any(|(listener_id, _)| *listener_id == id)
    }
}

/// Handle to one registered listener. Disposing is idempotent and dropping
/// the handle disposes it.
pub struct Subscription {
    id: u64,
    kind: &'static str,
    registry: Weak<dyn ListenerSet>,
}

impl Subscription {
    pub fn dispose(&self) {
        if let Some(registry) = self.registry.upgrade() {
            if registry.remove(self.id) {
                debug!("Released {} listener {}", self.kind, self.id);
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.contains(self.id))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("active", &self.is_active())
            .finish()
    }
}

// ============================================================================
// Runtime event source
// ============================================================================

/// Notification source for one debugged runtime. Clones share listeners.
#[derive(Clone)]
pub struct RuntimeEvents {
    name: Rc<str>,
    script_parsed: Rc<Registry<ScriptParsed>>,
    breakpoint_resolved: Rc<Registry<BreakpointResolved>>,
}

impl RuntimeEvents {
    pub fn new(name: &str) -> Self {
        Self {
            name: Rc::from(name),
            script_parsed: Registry::new("scriptParsed"),
            breakpoint_resolved: Registry::new("breakpointResolved"),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Listen for loaded scripts. Return `ControlFlow::Break` to stop.
    pub fn on_script_parsed(
        &self,
        handler: impl FnMut(&ScriptParsed) -> ControlFlow<()> + 'static,
    ) -> Subscription {
        self.script_parsed.subscribe(handler)
    }

    /// Listen for breakpoints bound to code. Return `ControlFlow::Break` to stop.
    pub fn on_breakpoint_resolved(
        &self,
        handler: impl FnMut(&BreakpointResolved) -> ControlFlow<()> + 'static,
    ) -> Subscription {
        self.breakpoint_resolved.subscribe(handler)
    }

    pub fn emit_script_parsed(&self, event: &ScriptParsed) {
        self.script_parsed.emit(event);
    }

    pub fn emit_breakpoint_resolved(&self, event: &BreakpointResolved) {
        self.breakpoint_resolved.emit(event);
    }

    /// Listeners currently registered across both notifications
    pub fn listener_count(&self) -> usize {
        self.script_parsed.len() + self.breakpoint_resolved.len()
    }
}

impl std::fmt::Debug for RuntimeEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeEvents")
            .field("name", &self.name)
            .field("listeners", &self.listener_count())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
