//! Observable key/value model.
//!
//! The widget reads its data from a [`ReactiveModel`]: values are looked up
//! by key and every change of key `k` is announced as the event `change:k`.
//! [`Model`] is a single-threaded implementation with shared state, so clones
//! observe and mutate the same store.
//!
//! # Invariants
//!
//! 1. Setting a key to the value it already holds notifies nobody.
//! 2. Listeners run after the new value is stored, so a listener that reads
//!    the key sees the new value.
//! 3. A `set` issued from inside a listener is queued and dispatched after
//!    the current notification finishes; notifications never nest.
//! 4. Dropping a [`Subscription`] removes its listener; no call reaches it
//!    afterwards.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::{Rc, Weak};

use serde_json::Value;
use tracing::trace;

/// Name of the event announcing a change of `key`.
pub fn change_event(key: &str) -> String {
    format!("change:{key}")
}

/// Source of widget data.
pub trait ReactiveModel {
    fn get(&self, key: &str) -> Option<Value>;

    /// Call `listener` with the event name whenever `key` changes, for as
    /// long as the returned subscription is alive.
    fn subscribe(&self, key: &str, listener: impl Fn(&str) + 'static) -> Subscription;
}

struct Listener {
    id: u64,
    event: String,
    callback: Rc<dyn Fn(&str)>,
    live: Rc<Cell<bool>>,
}

#[derive(Default)]
struct ModelState {
    values: HashMap<String, Value>,
    listeners: Vec<Listener>,
    next_id: u64,
    dispatching: bool,
    pending: VecDeque<String>,
}

#[derive(Clone, Default)]
pub struct Model {
    inner: Rc<RefCell<ModelState>>,
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.borrow();
        f.debug_struct("Model")
            .field("keys", &state.values.keys().collect::<Vec<_>>())
            .field("listeners", &state.listeners.len())
            .finish()
    }
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key` and announce `change:key`. A no-op when the
    /// key already holds an equal value.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        let value = value.into();
        {
            let mut state = self.inner.borrow_mut();
            if state.values.get(key) == Some(&value) {
                return;
            }
            state.values.insert(key.to_string(), value);
            state.pending.push_back(change_event(key));
            if state.dispatching {
                trace!(key, "change queued behind running dispatch");
                return;
            }
            state.dispatching = true;
        }
        let _guard = DispatchGuard(&self.inner);
        self.drain();
    }

    fn drain(&self) {
        loop {
            let (event, callbacks) = {
                let mut state = self.inner.borrow_mut();
                let Some(event) = state.pending.pop_front() else {
                    return;
                };
                state.listeners.retain(|l| l.live.get());
                let callbacks: Vec<_> = state
                    .listeners
                    .iter()
                    .filter(|l| l.event == event)
                    .map(|l| (Rc::clone(&l.live), Rc::clone(&l.callback)))
                    .collect();
                (event, callbacks)
            };
            trace!(event = %event, listeners = callbacks.len(), "dispatching");
            for (live, callback) in callbacks {
                // A listener dropped by an earlier one in this round is skipped.
                if live.get() {
                    callback(event.as_str());
                }
            }
        }
    }

    /// Listen for a raw event name.
    pub fn on(&self, event: &str, callback: impl Fn(&str) + 'static) -> Subscription {
        let mut state = self.inner.borrow_mut();
        state.next_id += 1;
        let id = state.next_id;
        let live = Rc::new(Cell::new(true));
        state.listeners.push(Listener {
            id,
            event: event.to_string(),
            callback: Rc::new(callback),
            live: Rc::clone(&live),
        });
        Subscription {
            model: Rc::downgrade(&self.inner),
            id,
            live,
        }
    }

    pub fn listener_count(&self) -> usize {
        let state = self.inner.borrow();
        state.listeners.iter().filter(|l| l.live.get()).count()
    }
}

impl ReactiveModel for Model {
    fn get(&self, key: &str) -> Option<Value> {
        self.inner.borrow().values.get(key).cloned()
    }

    fn subscribe(&self, key: &str, listener: impl Fn(&str) + 'static) -> Subscription {
        self.on(&change_event(key), listener)
    }
}

struct DispatchGuard<'a>(&'a Rc<RefCell<ModelState>>);

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.0.try_borrow_mut() {
            state.dispatching = false;
            state.pending.clear();
        }
    }
}

/// Handle to a registered listener. Dropping it unsubscribes.
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    model: Weak<RefCell<ModelState>>,
    id: u64,
    live: Rc<Cell<bool>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}

    pub fn is_active(&self) -> bool {
        self.live.get() && self.model.strong_count() > 0
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.live.set(false);
        let Some(model) = self.model.upgrade() else {
            return;
        };
        match model.try_borrow_mut() {
            Ok(mut state) => state.listeners.retain(|l| l.id != self.id),
            // Pruned by the next dispatch; it is never called again either way.
            Err(_) => trace!(id = self.id, "model borrowed, listener removal deferred"),
        }
    }
}
