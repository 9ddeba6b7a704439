//! The single authoritative state container.
//!
//! Readers hold a [`Store`] and take [`AppState`] snapshots or register
//! callbacks. Writes go through [`StoreWriter`], which only exists inside the
//! foreground loop (see [`crate::foreground`]). Each write builds a new
//! snapshot off to the side and publishes it in one swap, so a subscriber
//! never sees a half-applied change. Subscribers are then called
//! synchronously, in registration order, on the foreground task.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard, RwLock, Weak,
};

use shared::domain::{Identity, Item, ItemId};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::{
    foreground::ForegroundToken,
    state::{AppState, SessionStatus},
};

type Callback = dyn Fn(&AppState) + Send + Sync;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// A fetch response arrived after a later-issued fetch had already applied.
    StaleFetch { sequence: u64, applied: u64 },
    /// The item targeted by an update or delete is no longer in the store.
    MissingTarget(ItemId),
    /// An update issued later for the same item has already applied.
    StaleUpdate {
        id: ItemId,
        sequence: u64,
        applied: u64,
    },
    /// A logout or a newer login took over the session while this login was
    /// waiting on the backend.
    SupersededLogin,
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },
    /// The owning interactor was shut down before the completion ran.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    ItemsReplaced { count: usize },
    ItemAdded(Item),
    ItemUpdated(Item),
    ItemRemoved(ItemId),
    SessionChanged(SessionStatus),
    IdentityChanged(Option<Identity>),
    Ignored {
        operation: &'static str,
        reason: IgnoreReason,
    },
}

#[derive(Debug, Clone)]
pub enum IdentityChange {
    Keep,
    Set(Identity),
    Clear,
}

#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    state: RwLock<Arc<AppState>>,
    version: AtomicU64,
    subscribers: Mutex<Registry>,
    events: broadcast::Sender<StoreEvent>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: Vec<(u64, Arc<Callback>)>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Store {
    pub(crate) fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            inner: Arc::new(StoreInner {
                state: RwLock::new(Arc::new(AppState::default())),
                version: AtomicU64::new(0),
                subscribers: Mutex::new(Registry::default()),
                events,
            }),
        }
    }

    pub fn snapshot(&self) -> Arc<AppState> {
        let guard = self
            .inner
            .state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    /// Number of mutations published so far.
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::Acquire)
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&AppState) + Send + Sync + 'static,
    {
        let mut registry = lock(&self.inner.subscribers);
        registry.next_id += 1;
        let id = registry.next_id;
        registry.entries.push((id, Arc::new(callback)));
        debug!(subscriber = id, "store subscriber registered");
        Subscription {
            id,
            store: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subscribers).entries.len()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.events.subscribe()
    }

    fn publish(&self, next: AppState, events: Vec<StoreEvent>) {
        let next = Arc::new(next);
        {
            let mut guard = self
                .inner
                .state
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *guard = Arc::clone(&next);
        }
        self.inner.version.fetch_add(1, Ordering::AcqRel);

        // Callbacks run without the registry lock so they may unsubscribe.
        let callbacks: Vec<Arc<Callback>> = lock(&self.inner.subscribers)
            .entries
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback(&next);
        }

        for event in events {
            let _ = self.inner.events.send(event);
        }
    }

    fn emit(&self, event: StoreEvent) {
        let _ = self.inner.events.send(event);
    }
}

/// Handle returned by [`Store::subscribe`]. Dropping it keeps the callback
/// registered; call [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    id: u64,
    store: Weak<StoreInner>,
}

impl Subscription {
    /// Removes the callback. Safe to call any number of times, and after the
    /// store itself is gone.
    pub fn unsubscribe(&self) {
        let Some(inner) = self.store.upgrade() else {
            return;
        };
        let mut registry = lock(&inner.subscribers);
        let before = registry.entries.len();
        registry.entries.retain(|(id, _)| *id != self.id);
        if registry.entries.len() != before {
            debug!(subscriber = self.id, "store subscriber removed");
        }
    }
}

/// Write capability over the store. Only the foreground loop can mint one.
pub struct StoreWriter<'a> {
    store: &'a Store,
}

impl<'a> StoreWriter<'a> {
    pub(crate) fn new(store: &'a Store, _token: &ForegroundToken) -> Self {
        Self { store }
    }

    pub fn state(&self) -> Arc<AppState> {
        self.store.snapshot()
    }

    /// Runs `change` against a private copy of the current state and publishes
    /// the copy if the closure reported any events.
    fn apply<R>(&self, change: impl FnOnce(&mut AppState) -> (R, Vec<StoreEvent>)) -> R {
        let mut next = AppState::clone(&self.store.snapshot());
        let (result, events) = change(&mut next);
        if !events.is_empty() {
            self.store.publish(next, events);
        }
        result
    }

    pub fn replace_items(&self, items: Vec<Item>) {
        self.apply(|state| {
            let mut unique: Vec<Item> = Vec::with_capacity(items.len());
            for item in items {
                if unique.iter().any(|existing| existing.id == item.id) {
                    warn!(item_id = %item.id, "dropping duplicate id in fetched items");
                    continue;
                }
                unique.push(item);
            }
            let count = unique.len();
            state.items = unique;
            ((), vec![StoreEvent::ItemsReplaced { count }])
        })
    }

    /// Appends a newly created item. If the id is already present (a fetch may
    /// have delivered it first) the existing entry is replaced in place.
    pub fn append_item(&self, item: Item) {
        self.insert_item_before(item, |_| false)
    }

    /// Like [`append_item`](Self::append_item), but a new item goes in front
    /// of the first existing item matching `before` instead of at the end.
    pub fn insert_item_before(&self, item: Item, before: impl Fn(&Item) -> bool) {
        self.apply(|state| match state.position(&item.id) {
            Some(index) => {
                state.items[index] = item.clone();
                ((), vec![StoreEvent::ItemUpdated(item)])
            }
            None => {
                let index = state
                    .items
                    .iter()
                    .position(|existing| before(existing))
                    .unwrap_or(state.items.len());
                state.items.insert(index, item.clone());
                ((), vec![StoreEvent::ItemAdded(item)])
            }
        })
    }

    pub fn replace_item(&self, item: Item) -> bool {
        self.apply(|state| match state.position(&item.id) {
            Some(index) => {
                state.items[index] = item.clone();
                (true, vec![StoreEvent::ItemUpdated(item)])
            }
            None => (false, Vec::new()),
        })
    }

    pub fn remove_item(&self, id: &ItemId) -> bool {
        self.apply(|state| match state.position(id) {
            Some(index) => {
                state.items.remove(index);
                (true, vec![StoreEvent::ItemRemoved(id.clone())])
            }
            None => (false, Vec::new()),
        })
    }

    /// Moves the session along a valid edge and updates the identity in the
    /// same mutation. Invalid edges leave the store untouched.
    pub fn transition_session(
        &self,
        next: SessionStatus,
        identity: IdentityChange,
    ) -> Result<(), IgnoreReason> {
        self.apply(|state| {
            if !state.session.can_transition_to(&next) {
                return (
                    Err(IgnoreReason::InvalidTransition {
                        from: state.session.label(),
                        to: next.label(),
                    }),
                    Vec::new(),
                );
            }

            let mut events = vec![StoreEvent::SessionChanged(next.clone())];
            state.session = next;
            let identity = match identity {
                IdentityChange::Keep => None,
                IdentityChange::Set(identity) => Some(Some(identity)),
                IdentityChange::Clear => Some(None),
            };
            if let Some(identity) = identity {
                if state.identity != identity {
                    state.identity = identity.clone();
                    events.push(StoreEvent::IdentityChanged(identity));
                }
            }
            (Ok(()), events)
        })
    }

    /// Records a completion that was deliberately not applied.
    pub fn ignored(&self, operation: &'static str, reason: IgnoreReason) {
        debug!(operation, ?reason, "completion ignored");
        self.store.emit(StoreEvent::Ignored { operation, reason });
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
