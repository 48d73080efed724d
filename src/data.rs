//! Hierarchical, type-erased data contexts.
//!
//! A [`DataContext`] is a name-keyed table of typed slots shared by all
//! vertices of a running graph. Contexts form a tree per run: a graph's
//! context points up to its cluster's context (and from there to the
//! caller-supplied root), and registers the contexts of completed sub-runs
//! as children so their outputs stay visible. Lookup walks local slots,
//! then children in registration order, then the parent chain, guarding
//! against revisits with a pointer-identity set.
//!
//! The slot table is populated during a registration phase and then frozen
//! before concurrent execution starts: after [`freeze`](DataContext::freeze),
//! writes to unknown names are rejected instead of racing the table.

use miette::Diagnostic;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tracing::warn;

/// Type-erased value stored in a data slot.
pub type AnyValue = Arc<dyn Any + Send + Sync>;

type ReleaseHook = Box<dyn FnOnce() + Send>;

#[derive(Debug, Error, Diagnostic)]
pub enum DataContextError {
    /// Write to a name that was never registered, after the table froze.
    #[error("data entry `{name}` is not registered and the context is frozen")]
    #[diagnostic(
        code(dagflow::data::frozen),
        help("declare the entry as a vertex output (or register it) before execution starts")
    )]
    Frozen { name: String },

    /// A required value was absent at injection time.
    #[error("no value present for data entry `{name}`")]
    #[diagnostic(code(dagflow::data::missing))]
    Missing { name: String },
}

#[derive(Default)]
struct DataSlot {
    value: RwLock<Option<AnyValue>>,
}

/// A node in the per-run data context tree.
#[derive(Default)]
pub struct DataContext {
    slots: RwLock<FxHashMap<String, Arc<DataSlot>>>,
    frozen: AtomicBool,
    parent: RwLock<Weak<DataContext>>,
    children: RwLock<Vec<Arc<DataContext>>>,
    release: Mutex<Option<ReleaseHook>>,
}

impl DataContext {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a slot for `name`. Idempotent; rejected once frozen.
    pub fn register(&self, name: impl Into<String>) -> Result<(), DataContextError> {
        let name = name.into();
        if self.frozen.load(Ordering::Acquire) {
            return Err(DataContextError::Frozen { name });
        }
        self.slots
            .write()
            .entry(name)
            .or_insert_with(|| Arc::new(DataSlot::default()));
        Ok(())
    }

    /// End the registration phase. Subsequent writes must hit known slots.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    /// Store a type-erased value under `name`.
    pub fn set_any(&self, name: &str, value: AnyValue) -> Result<(), DataContextError> {
        if let Some(slot) = self.slots.read().get(name) {
            *slot.value.write() = Some(value);
            return Ok(());
        }
        if self.frozen.load(Ordering::Acquire) {
            return Err(DataContextError::Frozen {
                name: name.to_string(),
            });
        }
        let slot = Arc::new(DataSlot::default());
        *slot.value.write() = Some(value);
        self.slots.write().insert(name.to_string(), slot);
        Ok(())
    }

    /// Store a typed value under `name`.
    pub fn set<T: Send + Sync + 'static>(
        &self,
        name: &str,
        value: T,
    ) -> Result<(), DataContextError> {
        self.set_any(name, Arc::new(value))
    }

    /// Look up a value by name across the context tree.
    #[must_use]
    pub fn get_any(&self, name: &str) -> Option<AnyValue> {
        let mut visited = Vec::new();
        self.lookup(name, &mut visited)
    }

    /// Typed lookup; `None` when absent or of a different type.
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.get_any(name)?.downcast::<T>().ok()
    }

    fn lookup(&self, name: &str, visited: &mut Vec<*const DataContext>) -> Option<AnyValue> {
        let me = self as *const DataContext;
        if visited.contains(&me) {
            return None;
        }
        visited.push(me);
        if let Some(slot) = self.slots.read().get(name)
            && let Some(value) = slot.value.read().clone()
        {
            return Some(value);
        }
        let children: Vec<_> = self.children.read().clone();
        for child in children {
            if let Some(value) = child.lookup(name, visited) {
                return Some(value);
            }
        }
        let parent = self.parent.read().upgrade();
        parent.and_then(|p| p.lookup(name, visited))
    }

    /// Remove and return a value, searching the tree like [`get_any`].
    ///
    /// [`get_any`]: DataContext::get_any
    #[must_use]
    pub fn take_any(&self, name: &str) -> Option<AnyValue> {
        let mut visited = Vec::new();
        self.take(name, &mut visited)
    }

    fn take(&self, name: &str, visited: &mut Vec<*const DataContext>) -> Option<AnyValue> {
        let me = self as *const DataContext;
        if visited.contains(&me) {
            return None;
        }
        visited.push(me);
        if let Some(slot) = self.slots.read().get(name)
            && let Some(value) = slot.value.write().take()
        {
            return Some(value);
        }
        let children: Vec<_> = self.children.read().clone();
        for child in children {
            if let Some(value) = child.take(name, visited) {
                return Some(value);
            }
        }
        let parent = self.parent.read().upgrade();
        parent.and_then(|p| p.take(name, visited))
    }

    /// Move a value from one name to another, clearing the source.
    pub fn move_value(&self, from: &str, to: &str) -> Result<(), DataContextError> {
        let value = self.take_any(from).ok_or_else(|| DataContextError::Missing {
            name: from.to_string(),
        })?;
        self.set_any(to, value)
    }

    pub fn set_parent(&self, parent: &Arc<DataContext>) {
        *self.parent.write() = Arc::downgrade(parent);
    }

    pub fn clear_parent(&self) {
        *self.parent.write() = Weak::new();
    }

    /// Register a child context whose slots become visible to lookups here.
    pub fn add_child(&self, child: Arc<DataContext>) {
        self.children.write().push(child);
    }

    pub fn clear_children(&self) {
        self.children.write().clear();
    }

    /// Unregister a single child by identity, leaving the rest linked.
    pub fn remove_child(&self, child: &Arc<DataContext>) {
        self.children.write().retain(|c| !Arc::ptr_eq(c, child));
    }

    /// Install a hook fired when this context is reset or dropped.
    ///
    /// An already-installed hook fires immediately: the resource it guards
    /// must not leak just because a new run reused the same root context.
    pub fn set_release_hook(&self, hook: ReleaseHook) {
        let previous = self.release.lock().replace(hook);
        if let Some(previous) = previous {
            previous();
        }
    }

    fn fire_release(&self) {
        let hook = self.release.lock().take();
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Clear all values and links, unfreeze, and fire the release hook.
    ///
    /// Slots themselves survive so a pooled context keeps its table across
    /// runs.
    pub fn reset(&self) {
        for slot in self.slots.read().values() {
            *slot.value.write() = None;
        }
        self.children.write().clear();
        *self.parent.write() = Weak::new();
        self.frozen.store(false, Ordering::Release);
        self.fire_release();
    }

    /// Debug helper: number of registered slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }
}

impl Drop for DataContext {
    fn drop(&mut self) {
        let hook = self.release.get_mut().take();
        if let Some(hook) = hook {
            hook();
        }
        if !self.children.get_mut().is_empty() {
            warn!("data context dropped with live children");
            self.children.get_mut().clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn typed_set_get() {
        let ctx = DataContext::new();
        ctx.set("s0", String::from("test0")).unwrap();
        assert_eq!(ctx.get::<String>("s0").unwrap().as_str(), "test0");
        assert!(ctx.get::<i64>("s0").is_none());
        assert!(ctx.get::<String>("absent").is_none());
    }

    #[test]
    fn frozen_rejects_unknown_names() {
        let ctx = DataContext::new();
        ctx.register("known").unwrap();
        ctx.freeze();
        assert!(ctx.set("known", 1i64).is_ok());
        assert!(matches!(
            ctx.set("unknown", 1i64),
            Err(DataContextError::Frozen { .. })
        ));
        assert!(ctx.register("late").is_err());
    }

    #[test]
    fn lookup_walks_children_then_parent() {
        let root = DataContext::new();
        let mid = DataContext::new();
        let leaf = DataContext::new();
        root.set("from_root", 1i64).unwrap();
        leaf.set("from_leaf", 2i64).unwrap();
        mid.set_parent(&root);
        mid.add_child(leaf);
        assert_eq!(*mid.get::<i64>("from_root").unwrap(), 1);
        assert_eq!(*mid.get::<i64>("from_leaf").unwrap(), 2);
        // Child registered on the root sees nothing extra through mid.
        assert!(mid.get::<i64>("absent").is_none());
    }

    #[test]
    fn lookup_survives_link_cycles() {
        let a = DataContext::new();
        let b = DataContext::new();
        a.add_child(b.clone());
        b.set_parent(&a);
        b.add_child(a.clone());
        assert!(a.get::<i64>("nothing").is_none());
        // Break the Arc cycle before drop.
        a.clear_children();
        b.clear_children();
    }

    #[test]
    fn move_value_clears_source() {
        let ctx = DataContext::new();
        ctx.set("src", String::from("v")).unwrap();
        ctx.move_value("src", "dst").unwrap();
        assert!(ctx.get::<String>("src").is_none());
        assert_eq!(ctx.get::<String>("dst").unwrap().as_str(), "v");
        assert!(ctx.move_value("src", "dst").is_err());
    }

    #[test]
    fn reset_keeps_slots_clears_values() {
        let ctx = DataContext::new();
        ctx.set("a", 1i64).unwrap();
        ctx.freeze();
        ctx.reset();
        assert!(!ctx.is_frozen());
        assert!(ctx.get::<i64>("a").is_none());
        // Slot survived: writable even after a re-freeze.
        ctx.freeze();
        assert!(ctx.set("a", 2i64).is_ok());
    }

    #[test]
    fn release_hook_fires_exactly_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let ctx = DataContext::new();
        let f = fired.clone();
        ctx.set_release_hook(Box::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
        }));
        ctx.reset();
        ctx.reset();
        drop(ctx);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn replacing_release_hook_fires_previous() {
        let fired = Arc::new(AtomicUsize::new(0));
        let ctx = DataContext::new();
        let f1 = fired.clone();
        ctx.set_release_hook(Box::new(move || {
            f1.fetch_add(1, Ordering::SeqCst);
        }));
        let f2 = fired.clone();
        ctx.set_release_hook(Box::new(move || {
            f2.fetch_add(10, Ordering::SeqCst);
        }));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        drop(ctx);
        assert_eq!(fired.load(Ordering::SeqCst), 11);
    }
}
