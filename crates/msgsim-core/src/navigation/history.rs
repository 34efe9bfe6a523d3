use std::cell::{Cell, RefCell};

use crate::events::{ListenerSet, Subscription};

/// Session history of the host: one current location plus back/forward entries
pub trait HistoryBackend {
    fn location(&self) -> String;

    /// Add a navigable entry after the current one
    fn push(&self, url: &str);

    /// Overwrite the current entry in place
    fn replace(&self, url: &str);

    /// Called with the new location after every back/forward traversal.
    /// Never called for `push` or `replace`.
    fn on_popstate(&self, listener: Box<dyn Fn(&str)>) -> Subscription;
}

/// In-process history with browser semantics. Pushing truncates forward
/// entries; traversal outside the entry list is ignored.
pub struct MemoryHistory {
    entries: RefCell<Vec<String>>,
    index: Cell<usize>,
    listeners: ListenerSet<String>,
}

impl MemoryHistory {
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            entries: RefCell::new(vec![initial.into()]),
            index: Cell::new(0),
            listeners: ListenerSet::new(),
        }
    }

    pub fn back(&self) -> bool {
        self.go(-1)
    }

    pub fn forward(&self) -> bool {
        self.go(1)
    }

    /// Move the cursor by `delta` entries and notify popstate listeners.
    /// Returns false (and does nothing) if the target is out of range.
    pub fn go(&self, delta: isize) -> bool {
        if delta == 0 {
            return false;
        }
        let len = self.entries.borrow().len();
        let Some(target) = self.index.get().checked_add_signed(delta) else {
            return false;
        };
        if target >= len {
            return false;
        }
        self.index.set(target);
        let location = self.location();
        self.listeners.emit(&location);
        true
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.borrow().clone()
    }

    pub fn index(&self) -> usize {
        self.index.get()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl HistoryBackend for MemoryHistory {
    fn location(&self) -> String {
        self.entries.borrow()[self.index.get()].clone()
    }

    fn push(&self, url: &str) {
        let mut entries = self.entries.borrow_mut();
        let next = self.index.get() + 1;
        entries.truncate(next);
        entries.push(url.to_string());
        self.index.set(next);
    }

    fn replace(&self, url: &str) {
        let idx = self.index.get();
        self.entries.borrow_mut()[idx] = url.to_string();
    }

    fn on_popstate(&self, listener: Box<dyn Fn(&str)>) -> Subscription {
        self.listeners.add(move |location: &String| listener(location.as_str()))
    }
}
