//! Change notifications and the listener registry they are delivered through.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use serde::Serialize;

use crate::models::{Message, Recipient};

/// Why a `messages-changed` notification fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeReason {
    InitDefaults,
    Load,
    Add,
    Update,
    Delete,
    Clear,
    Recipient,
    Import,
    ThreadCreated,
    ThreadDeleted,
    ThreadUpdated,
    ThreadChanged,
}

impl ChangeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeReason::InitDefaults => "init-defaults",
            ChangeReason::Load => "load",
            ChangeReason::Add => "add",
            ChangeReason::Update => "update",
            ChangeReason::Delete => "delete",
            ChangeReason::Clear => "clear",
            ChangeReason::Recipient => "recipient",
            ChangeReason::Import => "import",
            ChangeReason::ThreadCreated => "thread-created",
            ChangeReason::ThreadDeleted => "thread-deleted",
            ChangeReason::ThreadUpdated => "thread-updated",
            ChangeReason::ThreadChanged => "thread-changed",
        }
    }
}

impl fmt::Display for ChangeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full snapshot of the thread that is current after the mutation.
/// `message` is the single element touched, for incremental consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesChanged {
    pub reason: ChangeReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    pub messages: Vec<Message>,
    pub recipient: Recipient,
    pub thread_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageOperation {
    Load,
    Save,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageErrorEvent {
    pub error: String,
    pub operation: StorageOperation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    MessagesChanged(MessagesChanged),
    StorageError(StorageErrorEvent),
}

impl StoreEvent {
    pub fn reason(&self) -> Option<ChangeReason> {
        match self {
            StoreEvent::MessagesChanged(change) => Some(change.reason),
            StoreEvent::StorageError(_) => None,
        }
    }
}

type Listener<T> = Rc<dyn Fn(&T)>;

struct Registry<T> {
    next_id: u64,
    listeners: Vec<(u64, Listener<T>)>,
}

/// Single-threaded observer list.
///
/// `emit` snapshots the listener list before calling out, so listeners may
/// subscribe, unsubscribe or re-enter their owner while being notified.
pub struct ListenerSet<T> {
    inner: Rc<RefCell<Registry<T>>>,
}

impl<T: 'static> ListenerSet<T> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Registry {
                next_id: 0,
                listeners: Vec::new(),
            })),
        }
    }

    pub fn add(&self, listener: impl Fn(&T) + 'static) -> Subscription {
        let id = {
            let mut registry = self.inner.borrow_mut();
            registry.next_id += 1;
            let id = registry.next_id;
            registry.listeners.push((id, Rc::new(listener)));
            id
        };

        let weak: Weak<RefCell<Registry<T>>> = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.borrow_mut().listeners.retain(|(lid, _)| *lid != id);
            }
        })
    }

    pub fn emit(&self, event: &T) {
        let snapshot: Vec<Listener<T>> = self
            .inner
            .borrow()
            .listeners
            .iter()
            .map(|(_, l)| Rc::clone(l))
            .collect();
        for listener in snapshot {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: 'static> Default for ListenerSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by every `subscribe`-style call.
///
/// Dropping it keeps the listener registered; call `unsubscribe` to remove it.
#[must_use = "keep the subscription to be able to unsubscribe later"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
