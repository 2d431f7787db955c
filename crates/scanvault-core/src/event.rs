//! Change notification.
//!
//! The store owns one [`EventBus`]. Every mutation, cleanup pass and error is
//! published to all registered listeners. A listener that panics is logged
//! and skipped; it never aborts the operation that emitted the event or the
//! delivery to other listeners.

use std::{
  collections::BTreeMap,
  panic::{AssertUnwindSafe, catch_unwind},
  sync::{
    Arc, Mutex, PoisonError, Weak,
    atomic::{AtomicU64, Ordering},
  },
};

use serde::{Deserialize, Serialize};

use crate::record::{EntityType, now_millis};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
  Write,
  Delete,
  Clear,
  Cleanup,
  Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
  pub kind:         ChangeKind,
  pub entity_type:  Option<EntityType>,
  pub timestamp:    i64,
  pub record_count: Option<u64>,
  pub error:        Option<String>,
}

impl ChangeEvent {
  pub fn new(kind: ChangeKind, entity_type: Option<EntityType>) -> Self {
    Self {
      kind,
      entity_type,
      timestamp: now_millis(),
      record_count: None,
      error: None,
    }
  }

  pub fn with_count(mut self, count: u64) -> Self {
    self.record_count = Some(count);
    self
  }

  pub fn failure(entity_type: Option<EntityType>, error: impl ToString) -> Self {
    let mut event = Self::new(ChangeKind::Error, entity_type);
    event.error = Some(error.to_string());
    event
  }
}

type Listener = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
  next_id:   AtomicU64,
  listeners: Mutex<BTreeMap<u64, Listener>>,
}

/// Publish/subscribe registry for [`ChangeEvent`]s.
///
/// Cloning is cheap and yields a handle to the same registry.
#[derive(Clone, Default)]
pub struct EventBus {
  registry: Arc<Registry>,
}

impl std::fmt::Debug for EventBus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("EventBus")
      .field("listeners", &self.listener_count())
      .finish()
  }
}

impl EventBus {
  pub fn new() -> Self { Self::default() }

  /// Register `listener`. It stays registered until
  /// [`Subscription::unsubscribe`] is called; dropping the handle does not
  /// unregister.
  pub fn subscribe<F>(&self, listener: F) -> Subscription
  where
    F: Fn(&ChangeEvent) + Send + Sync + 'static,
  {
    let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
    self
      .registry
      .listeners
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(id, Arc::new(listener));
    Subscription { id, registry: Arc::downgrade(&self.registry) }
  }

  /// Deliver `event` to every listener registered at the time of the call.
  pub fn publish(&self, event: &ChangeEvent) {
    // Snapshot first so listeners may (un)subscribe while being invoked.
    let listeners: Vec<(u64, Listener)> = self
      .registry
      .listeners
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .iter()
      .map(|(id, l)| (*id, Arc::clone(l)))
      .collect();

    for (id, listener) in listeners {
      if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
        tracing::warn!(listener = id, kind = ?event.kind, "change listener panicked");
      }
    }
  }

  pub fn listener_count(&self) -> usize {
    self
      .registry
      .listeners
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .len()
  }
}

/// Capability to remove a listener from the [`EventBus`] it was registered on.
#[derive(Debug)]
pub struct Subscription {
  id:       u64,
  registry: Weak<Registry>,
}

impl Subscription {
  /// Remove the listener. Returns `false` if it was already removed or the
  /// bus no longer exists.
  pub fn unsubscribe(self) -> bool {
    let Some(registry) = self.registry.upgrade() else {
      return false;
    };
    registry
      .listeners
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(&self.id)
      .is_some()
  }
}
