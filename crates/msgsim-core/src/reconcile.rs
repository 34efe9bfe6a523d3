//! Converges the navigation reference, the last-active pointer and the
//! repository contents into exactly one current thread.
//!
//! Priority: a reference in the address that names a live thread always wins;
//! otherwise the last-active pointer; otherwise the first listed thread. Every
//! correction of the address is a replace, never a push, so self-healing never
//! becomes a back-button step.

use std::rc::Rc;

use tracing::{debug, info, warn};

use crate::constants::LAST_THREAD_KEY;
use crate::events::{ChangeReason, StoreEvent, Subscription};
use crate::navigation::NavigationState;
use crate::storage::KeyValueStorage;
use crate::store::ThreadRepository;

/// Persisted hint of the most recently viewed thread. Not versioned, never
/// trusted without checking the repository.
#[derive(Clone)]
pub struct LastActivePointer {
    storage: Rc<dyn KeyValueStorage>,
}

impl LastActivePointer {
    pub fn new(storage: Rc<dyn KeyValueStorage>) -> Self {
        Self { storage }
    }

    pub fn get(&self) -> Option<String> {
        match self.storage.get(LAST_THREAD_KEY) {
            Ok(Some(id)) if !id.is_empty() => Some(id),
            Ok(_) => None,
            Err(e) => {
                warn!("Failed to read last active thread: {}", e);
                None
            }
        }
    }

    pub fn set(&self, id: &str) {
        if id.is_empty() {
            return;
        }
        if let Err(e) = self.storage.set(LAST_THREAD_KEY, id) {
            warn!("Failed to save last active thread: {}", e);
        }
    }

}

/// Which rule picked the current thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    Address,
    LastActive,
    FirstThread,
}

impl ResolutionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionSource::Address => "address",
            ResolutionSource::LastActive => "last-active",
            ResolutionSource::FirstThread => "first-thread",
        }
    }
}

/// What happened to the address during resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressAction {
    /// Already carried the resolved id
    Kept,
    /// Rewritten in place
    Replaced,
}

impl AddressAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressAction::Kept => "kept",
            AddressAction::Replaced => "replaced",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub thread_id: String,
    pub source: ResolutionSource,
    pub address: AddressAction,
}

pub struct Reconciler {
    repo: Rc<ThreadRepository>,
    nav: NavigationState,
    pointer: LastActivePointer,
}

impl Reconciler {
    pub fn new(repo: Rc<ThreadRepository>, nav: NavigationState, pointer: LastActivePointer) -> Self {
        Self { repo, nav, pointer }
    }

    pub fn repository(&self) -> &Rc<ThreadRepository> {
        &self.repo
    }

    pub fn navigation(&self) -> &NavigationState {
        &self.nav
    }

    pub fn pointer(&self) -> &LastActivePointer {
        &self.pointer
    }

    /// Resolve against whatever the address currently carries
    pub fn reconcile(&self) -> Resolution {
        let reference = self.nav.current_thread_id();
        self.resolve(reference.as_deref())
    }

    /// Resolve an explicit reference. `Some("")` counts as a reference that
    /// names no thread, not as an absent one.
    pub fn resolve(&self, reference: Option<&str>) -> Resolution {
        let resolution = match reference {
            Some(id) if self.repo.contains_thread(id) => {
                let thread_id = self.repo.load_thread(id);
                self.pointer.set(&thread_id);
                Resolution {
                    thread_id,
                    source: ResolutionSource::Address,
                    address: AddressAction::Kept,
                }
            }
            Some(stale) => {
                warn!("Address names unknown thread {:?}", stale);
                self.fall_back()
            }
            None => self.fall_back(),
        };
        debug!(
            "Resolved thread {} via {:?} (address {:?})",
            resolution.thread_id, resolution.source, resolution.address
        );
        resolution
    }

    fn fall_back(&self) -> Resolution {
        if let Some(last) = self.pointer.get().filter(|id| self.repo.contains_thread(id)) {
            let thread_id = self.repo.load_thread(&last);
            let address = self.rewrite_address(&thread_id);
            return Resolution {
                thread_id,
                source: ResolutionSource::LastActive,
                address,
            };
        }

        let thread_id = match self.repo.list_threads().into_iter().next() {
            Some(first) => self.repo.load_thread(&first.id),
            // Nothing loaded yet; load_thread seeds a default thread
            None => self.repo.load_thread(""),
        };
        let address = self.rewrite_address(&thread_id);
        self.pointer.set(&thread_id);
        Resolution {
            thread_id,
            source: ResolutionSource::FirstThread,
            address,
        }
    }

    fn rewrite_address(&self, thread_id: &str) -> AddressAction {
        if self.nav.current_thread_id().as_deref() == Some(thread_id) {
            return AddressAction::Kept;
        }
        self.nav.replace_current_thread_id(Some(thread_id));
        AddressAction::Replaced
    }

    /// User navigation to a thread: a new history entry, then resolution.
    /// Unknown ids never get an entry of their own; the fallback rewrites the
    /// current one.
    pub fn open_thread(&self, id: &str) -> Resolution {
        let known = self.repo.contains_thread(id);
        if known && self.nav.current_thread_id().as_deref() != Some(id) {
            self.nav.set_current_thread_id(Some(id));
        }
        self.resolve(Some(id))
    }

    /// Delete and re-resolve so the address never keeps a removed thread
    pub fn delete_thread(&self, id: &str) -> Option<Resolution> {
        if !self.repo.delete_thread(id) {
            return None;
        }
        Some(self.reconcile())
    }

    /// Startup resolution plus the two live subscriptions: back/forward
    /// re-resolves, and current-thread changes update the pointer.
    pub fn start(self: &Rc<Self>) -> ReconcilerSession {
        let initial = self.reconcile();
        info!("Starting on thread {} via {:?}", initial.thread_id, initial.source);

        let weak = Rc::downgrade(self);
        let navigation = self.nav.on_thread_id_change(move |reference| {
            if let Some(reconciler) = weak.upgrade() {
                reconciler.resolve(reference.as_deref());
            }
        });

        let pointer = self.pointer.clone();
        let current = self.repo.subscribe(move |event| {
            let StoreEvent::MessagesChanged(change) = event else {
                return;
            };
            let switched = matches!(
                change.reason,
                ChangeReason::ThreadChanged | ChangeReason::ThreadDeleted | ChangeReason::Import
            );
            if switched {
                pointer.set(&change.thread_id);
            }
        });

        ReconcilerSession {
            initial,
            subscriptions: vec![navigation, current],
        }
    }
}

/// Live subscriptions installed by `Reconciler::start`
#[must_use = "dropping the session keeps it running; call stop() to detach"]
pub struct ReconcilerSession {
    initial: Resolution,
    subscriptions: Vec<Subscription>,
}

impl ReconcilerSession {
    pub fn initial(&self) -> &Resolution {
        &self.initial
    }

    pub fn stop(self) {
        for subscription in self.subscriptions {
            subscription.unsubscribe();
        }
    }
}
