//! Thread repository: the authoritative collection of conversations.
//!
//! All operations run synchronously on in-memory state and notify listeners
//! before returning. Persistence is debounced through a `FrameDebouncer`;
//! a failed write is reported as a `storage-error` event and never rolls back
//! the in-memory mutation.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::debounce::FrameDebouncer;
use crate::constants::{COPY_SUFFIX, CURRENT_SCHEMA_VERSION, THREADS_STORAGE_KEY};
use crate::events::{
    ChangeReason, ListenerSet, MessagesChanged, StorageErrorEvent, StorageOperation, StoreEvent,
    Subscription,
};
use crate::migrate::{self, ImportPayload};
use crate::models::message::seed_messages;
use crate::models::{time, Image, Message, MessagePatch, Recipient, RecipientPatch, Thread};
use crate::storage::{KeyValueStorage, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to serialize threads: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Rejected import. Nothing was created and the current thread is untouched.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Invalid format: expected a message array or an object with `messages`")]
    InvalidFormat,
}

#[derive(Serialize)]
struct ThreadsPayload<'a> {
    version: u64,
    threads: &'a [Thread],
}

#[derive(Serialize)]
struct ExportPayload<'a> {
    version: u64,
    messages: &'a [Message],
    recipient: &'a Recipient,
}

#[derive(Default)]
struct RepoState {
    threads: Vec<Thread>,
    current_thread_id: Option<String>,
}

impl RepoState {
    fn index_of(&self, id: &str) -> Option<usize> {
        self.threads.iter().position(|t| t.id == id)
    }

    fn current_index(&self) -> Option<usize> {
        self.current_thread_id.as_deref().and_then(|id| self.index_of(id))
    }

    /// Index of the thread `list_threads()` would put first
    fn newest_index(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, thread) in self.threads.iter().enumerate() {
            match best {
                Some(b) if thread.updated_at <= self.threads[b].updated_at => {}
                _ => best = Some(i),
            }
        }
        best
    }

    /// Guarantee a valid current thread, seeding one if the collection is empty
    fn ensure_current(&mut self) -> usize {
        if let Some(idx) = self.current_index() {
            return idx;
        }
        if self.threads.is_empty() {
            self.threads.push(Thread::seeded(time::now()));
        }
        let idx = self.newest_index().unwrap_or(0);
        self.current_thread_id = Some(self.threads[idx].id.clone());
        idx
    }
}

pub struct ThreadRepository {
    storage: Rc<dyn KeyValueStorage>,
    state: RefCell<RepoState>,
    saver: FrameDebouncer,
    listeners: ListenerSet<StoreEvent>,
}

impl ThreadRepository {
    /// Repository whose saves fire on the next frame
    pub fn new(storage: Rc<dyn KeyValueStorage>) -> Self {
        Self::with_saver(storage, FrameDebouncer::next_frame())
    }

    pub fn with_debounce(storage: Rc<dyn KeyValueStorage>, delay: Duration) -> Self {
        Self::with_saver(storage, FrameDebouncer::new(delay))
    }

    fn with_saver(storage: Rc<dyn KeyValueStorage>, saver: FrameDebouncer) -> Self {
        Self {
            storage,
            state: RefCell::new(RepoState::default()),
            saver,
            listeners: ListenerSet::new(),
        }
    }

    pub fn subscribe(&self, listener: impl Fn(&StoreEvent) + 'static) -> Subscription {
        self.listeners.add(listener)
    }

    // =========================================================================
    // Load / persistence
    // =========================================================================

    /// Read the persisted payload. Never fails: absent, corrupt or
    /// unrecognized data falls back to one seeded default thread.
    pub fn load(&self) {
        let now = time::now();
        let raw = match self.storage.get(THREADS_STORAGE_KEY) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to read threads: {}", e);
                self.report_storage_error(&e.to_string(), StorageOperation::Load);
                None
            }
        };

        let migration = raw
            .as_deref()
            .and_then(|raw| match serde_json::from_str::<Value>(raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("Discarding corrupt thread payload: {}", e);
                    None
                }
            })
            .and_then(|value| {
                let migration = migrate::migrate(value, now);
                if migration.is_none() {
                    warn!("Discarding thread payload with unrecognized schema");
                }
                migration
            });

        match migration {
            Some(migration) if !migration.threads.is_empty() => {
                info!(
                    "Loaded {} threads (migrated: {})",
                    migration.threads.len(),
                    migration.migrated
                );
                {
                    let mut state = self.state.borrow_mut();
                    state.threads = migration.threads;
                    state.current_thread_id = None;
                    state.ensure_current();
                }
                if migration.migrated {
                    self.save();
                }
                self.notify(ChangeReason::Load, None);
            }
            _ => {
                info!("Seeding default thread");
                {
                    let mut state = self.state.borrow_mut();
                    state.threads = vec![Thread::seeded(now)];
                    state.current_thread_id = None;
                    state.ensure_current();
                }
                self.save();
                self.notify(ChangeReason::InitDefaults, None);
            }
        }
    }

    /// Write the whole payload now, cancelling any pending debounced save.
    /// Returns false (after emitting `storage-error`) if the write failed.
    pub fn save(&self) -> bool {
        self.saver.cancel();
        match self.write_now() {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to save threads: {}", e);
                self.report_storage_error(&e.to_string(), StorageOperation::Save);
                false
            }
        }
    }

    fn write_now(&self) -> Result<(), StoreError> {
        let json = {
            let state = self.state.borrow();
            serde_json::to_string(&ThreadsPayload {
                version: CURRENT_SCHEMA_VERSION,
                threads: &state.threads,
            })?
        };
        self.storage.set(THREADS_STORAGE_KEY, &json)?;
        debug!("Saved threads ({} bytes)", json.len());
        Ok(())
    }

    fn schedule_save(&self) {
        self.saver.schedule(Instant::now());
    }

    /// Call once per UI frame; performs the pending save when it is due.
    pub fn on_frame(&self) {
        if self.saver.take_due(Instant::now()) {
            self.save();
        }
    }

    /// Perform a pending save immediately, regardless of its deadline
    pub fn flush(&self) {
        if self.saver.is_pending() {
            self.save();
        }
    }

    pub fn has_pending_save(&self) -> bool {
        self.saver.is_pending()
    }

    // =========================================================================
    // Threads
    // =========================================================================

    /// Append a seeded thread. The current thread does not change.
    pub fn create_thread(&self) -> Thread {
        let thread = Thread::seeded(time::now());
        self.state.borrow_mut().threads.push(thread.clone());
        debug!("Created thread {}", thread.id);
        self.schedule_save();
        self.notify(ChangeReason::ThreadCreated, None);
        thread
    }

    /// Deep copy under a new id named "<display name> (Copy)"
    pub fn duplicate_thread(&self, id: &str) -> Option<Thread> {
        let copy = {
            let mut state = self.state.borrow_mut();
            let source = &state.threads[state.index_of(id)?];
            let now = time::now();
            let mut copy = Thread::with_content(
                source.messages.iter().map(Message::with_new_ids).collect(),
                source.recipient.clone(),
                now,
            );
            copy.name = Some(format!("{}{}", source.display_name(), COPY_SUFFIX));
            state.threads.push(copy.clone());
            copy
        };
        debug!("Duplicated thread {} as {}", id, copy.id);
        self.schedule_save();
        self.notify(ChangeReason::ThreadCreated, None);
        Some(copy)
    }

    /// Remove a thread. The repository is never left empty: deleting the last
    /// thread seeds a fresh one and makes it current.
    pub fn delete_thread(&self, id: &str) -> bool {
        {
            let mut state = self.state.borrow_mut();
            let Some(idx) = state.index_of(id) else {
                return false;
            };
            state.threads.remove(idx);
            if state.current_thread_id.as_deref() == Some(id) {
                state.current_thread_id = None;
            }
            state.ensure_current();
        }
        debug!("Deleted thread {}", id);
        self.schedule_save();
        self.notify(ChangeReason::ThreadDeleted, None);
        true
    }

    /// Set or clear the display-name override. Blank names clear it.
    pub fn rename_thread(&self, id: &str, name: Option<&str>) -> bool {
        let name = name.map(str::trim).filter(|n| !n.is_empty());
        {
            let mut state = self.state.borrow_mut();
            let Some(idx) = state.index_of(id) else {
                return false;
            };
            let thread = &mut state.threads[idx];
            if thread.name.as_deref() == name {
                return false;
            }
            thread.name = name.map(str::to_string);
            thread.touch(time::now());
        }
        self.schedule_save();
        self.notify(ChangeReason::ThreadUpdated, None);
        true
    }

    /// Make `id` current. Unknown ids fall back to the first listed thread;
    /// the resolved id is returned and carried by the `thread-changed` event.
    pub fn load_thread(&self, id: &str) -> String {
        let (resolved, seeded) = {
            let mut state = self.state.borrow_mut();
            if state.index_of(id).is_some() {
                state.current_thread_id = Some(id.to_string());
                (id.to_string(), false)
            } else {
                let seeded = state.threads.is_empty();
                state.current_thread_id = None;
                let idx = state.ensure_current();
                (state.threads[idx].id.clone(), seeded)
            }
        };
        if resolved != id {
            warn!("Unknown thread {:?}, fell back to {}", id, resolved);
        }
        if seeded {
            self.schedule_save();
        }
        self.notify(ChangeReason::ThreadChanged, None);
        resolved
    }

    /// Snapshot ordered by `updated_at`, newest first
    pub fn list_threads(&self) -> Vec<Thread> {
        let mut threads = self.state.borrow().threads.clone();
        threads.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        threads
    }

    pub fn get_thread(&self, id: &str) -> Option<Thread> {
        let state = self.state.borrow();
        state.index_of(id).map(|idx| state.threads[idx].clone())
    }

    pub fn contains_thread(&self, id: &str) -> bool {
        self.state.borrow().index_of(id).is_some()
    }

    pub fn thread_count(&self) -> usize {
        self.state.borrow().threads.len()
    }

    pub fn current_thread_id(&self) -> Option<String> {
        let state = self.state.borrow();
        state.current_index().map(|idx| state.threads[idx].id.clone())
    }

    pub fn get_current_thread(&self) -> Option<Thread> {
        let state = self.state.borrow();
        state.current_index().map(|idx| state.threads[idx].clone())
    }

    pub fn get_messages(&self) -> Vec<Message> {
        self.get_current_thread()
            .map(|t| t.messages)
            .unwrap_or_default()
    }

    pub fn get_recipient(&self) -> Recipient {
        self.get_current_thread()
            .map(|t| t.recipient)
            .unwrap_or_default()
    }

    pub fn thread_display_name(thread: &Thread) -> String {
        thread.display_name().to_string()
    }

    // =========================================================================
    // Messages of the current thread
    // =========================================================================

    /// Insert a blank card after `after_id`, or at the end if omitted/unknown
    pub fn add_message(&self, after_id: Option<&str>) -> Message {
        let msg = self.with_current(|thread| {
            let now = time::now();
            let msg = Message::blank(now);
            match after_id.and_then(|id| thread.message_index(id)) {
                Some(idx) => thread.messages.insert(idx + 1, msg.clone()),
                None => thread.messages.push(msg.clone()),
            }
            thread.touch(now);
            msg
        });
        self.schedule_save();
        self.notify(ChangeReason::Add, Some(msg.clone()));
        msg
    }

    pub fn update_message(&self, id: &str, patch: MessagePatch) -> Option<Message> {
        let updated = self.with_current(|thread| {
            let idx = thread.message_index(id)?;
            thread.messages[idx].apply(patch);
            thread.touch(time::now());
            Some(thread.messages[idx].clone())
        })?;
        self.schedule_save();
        self.notify(ChangeReason::Update, Some(updated.clone()));
        Some(updated)
    }

    pub fn delete_message(&self, id: &str) -> Option<Message> {
        let removed = self.with_current(|thread| {
            let idx = thread.message_index(id)?;
            let removed = thread.messages.remove(idx);
            thread.touch(time::now());
            Some(removed)
        })?;
        self.schedule_save();
        self.notify(ChangeReason::Delete, Some(removed.clone()));
        Some(removed)
    }

    pub fn insert_image(&self, id: &str, src: &str) -> Option<Message> {
        if src.is_empty() {
            return None;
        }
        let updated = self.with_current(|thread| {
            let idx = thread.message_index(id)?;
            thread.messages[idx].images.push(Image::new(src));
            thread.touch(time::now());
            Some(thread.messages[idx].clone())
        })?;
        self.schedule_save();
        self.notify(ChangeReason::Update, Some(updated.clone()));
        Some(updated)
    }

    /// Merge trimmed fields. A merge that changes nothing writes nothing and
    /// emits nothing.
    pub fn update_recipient(&self, patch: RecipientPatch) -> bool {
        let changed = self.with_current(|thread| {
            let changed = thread.recipient.merge(&patch);
            if changed {
                thread.touch(time::now());
            }
            changed
        });
        if changed {
            self.schedule_save();
            self.notify(ChangeReason::Recipient, None);
        }
        changed
    }

    /// Restart the demo: seed conversation and default recipient
    pub fn clear(&self) {
        self.with_current(|thread| {
            let now = time::now();
            thread.messages = seed_messages(now);
            thread.recipient = Recipient::default();
            thread.touch(now);
        });
        self.schedule_save();
        self.notify(ChangeReason::Clear, None);
    }

    // =========================================================================
    // Import / export
    // =========================================================================

    /// `{ version, messages, recipient }` of the current thread
    pub fn export_json(&self, pretty: bool) -> Result<String, StoreError> {
        let thread = self.with_current(|thread| thread.clone());
        let payload = ExportPayload {
            version: CURRENT_SCHEMA_VERSION,
            messages: &thread.messages,
            recipient: &thread.recipient,
        };
        let json = if pretty {
            serde_json::to_string_pretty(&payload)?
        } else {
            serde_json::to_string(&payload)?
        };
        Ok(json)
    }

    /// Create a new thread from exported or legacy content and make it current.
    /// Existing threads are never overwritten.
    pub fn import_json(&self, text: &str) -> Result<Thread, ImportError> {
        let value: Value = serde_json::from_str(text).map_err(|e| {
            warn!("Import rejected, invalid JSON: {}", e);
            ImportError::InvalidJson(e)
        })?;
        let payload = ImportPayload::decode(value).ok_or_else(|| {
            warn!("Import rejected, expected a message array or {{ messages }}");
            ImportError::InvalidFormat
        })?;

        let (raw_messages, raw_recipient) = payload.into_parts();
        let now = time::now();
        let total = raw_messages.len();
        let repaired = migrate::repair_messages(raw_messages, now);
        if repaired.messages.len() < total {
            warn!(
                "Import dropped {} invalid messages",
                total - repaired.messages.len()
            );
        }
        let recipient = match raw_recipient {
            Some(raw) => migrate::repair_recipient(Some(&raw)).0,
            None => Recipient::default(),
        };

        let thread = Thread::with_content(repaired.messages, recipient, now);
        {
            let mut state = self.state.borrow_mut();
            state.threads.push(thread.clone());
            state.current_thread_id = Some(thread.id.clone());
        }
        info!(
            "Imported {} messages into thread {}",
            thread.messages.len(),
            thread.id
        );
        self.schedule_save();
        self.notify(ChangeReason::Import, None);
        Ok(thread)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn with_current<R>(&self, f: impl FnOnce(&mut Thread) -> R) -> R {
        let mut state = self.state.borrow_mut();
        let idx = state.ensure_current();
        f(&mut state.threads[idx])
    }

    fn notify(&self, reason: ChangeReason, message: Option<Message>) {
        let event = {
            let state = self.state.borrow();
            match state.current_index() {
                Some(idx) => {
                    let thread = &state.threads[idx];
                    MessagesChanged {
                        reason,
                        message,
                        messages: thread.messages.clone(),
                        recipient: thread.recipient.clone(),
                        thread_id: thread.id.clone(),
                    }
                }
                None => MessagesChanged {
                    reason,
                    message,
                    messages: Vec::new(),
                    recipient: Recipient::default(),
                    thread_id: String::new(),
                },
            }
        };
        self.listeners.emit(&StoreEvent::MessagesChanged(event));
    }

    fn report_storage_error(&self, error: &str, operation: StorageOperation) {
        self.listeners
            .emit(&StoreEvent::StorageError(StorageErrorEvent {
                error: error.to_string(),
                operation,
            }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{DEFAULT_MESSAGES, DEFAULT_RECIPIENT_NAME};
    use crate::models::Sender;
    use crate::storage::MemoryStorage;
    use proptest::prelude::*;
    use serde_json::json;

    fn repo_with(storage: Rc<MemoryStorage>) -> ThreadRepository {
        ThreadRepository::new(storage)
    }

    fn loaded() -> (Rc<MemoryStorage>, ThreadRepository) {
        let storage = Rc::new(MemoryStorage::new());
        let repo = repo_with(Rc::clone(&storage));
        repo.load();
        (storage, repo)
    }

    fn record(repo: &ThreadRepository) -> (Rc<RefCell<Vec<StoreEvent>>>, Subscription) {
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        let sub = repo.subscribe(move |e| sink.borrow_mut().push(e.clone()));
        (events, sub)
    }

    fn reasons(events: &RefCell<Vec<StoreEvent>>) -> Vec<ChangeReason> {
        events.borrow().iter().filter_map(StoreEvent::reason).collect()
    }

    fn persisted(storage: &MemoryStorage) -> Value {
        let raw = storage.get(THREADS_STORAGE_KEY).unwrap().unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn test_load_empty_storage_seeds_and_persists() {
        let storage = Rc::new(MemoryStorage::new());
        let repo = repo_with(Rc::clone(&storage));
        let (events, _sub) = record(&repo);

        repo.load();

        assert_eq!(reasons(&events), vec![ChangeReason::InitDefaults]);
        assert_eq!(repo.get_messages().len(), DEFAULT_MESSAGES.len());
        assert_eq!(repo.get_recipient().name, DEFAULT_RECIPIENT_NAME);

        let payload = persisted(&storage);
        assert_eq!(payload["version"], CURRENT_SCHEMA_VERSION);
        assert_eq!(payload["threads"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_load_corrupt_json_seeds_defaults() {
        let storage = Rc::new(MemoryStorage::new());
        storage.set(THREADS_STORAGE_KEY, "{not json").unwrap();
        let repo = repo_with(Rc::clone(&storage));
        let (events, _sub) = record(&repo);

        repo.load();

        assert_eq!(reasons(&events), vec![ChangeReason::InitDefaults]);
        assert_eq!(repo.thread_count(), 1);
        assert_eq!(persisted(&storage)["version"], CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_load_all_threads_invalid_seeds_defaults() {
        let storage = Rc::new(MemoryStorage::new());
        storage
            .set(
                THREADS_STORAGE_KEY,
                &json!({"version": 2, "threads": [{"id": ""}]}).to_string(),
            )
            .unwrap();
        let repo = repo_with(Rc::clone(&storage));
        let (events, _sub) = record(&repo);
        repo.load();
        assert_eq!(reasons(&events), vec![ChangeReason::InitDefaults]);
        assert!(repo.get_current_thread().is_some());
    }

    #[test]
    fn test_load_v1_migrates_and_repersists() {
        let storage = Rc::new(MemoryStorage::new());
        let v1 = json!({
            "version": 1,
            "messages": [
                {"id": "", "sender": "self", "message": "a", "timestamp": 1_714_564_800_000i64},
                {"sender": "other", "message": "b"}
            ],
            "recipient": {"name": "Bob", "location": "SF"}
        });
        storage.set(THREADS_STORAGE_KEY, &v1.to_string()).unwrap();

        let repo = repo_with(Rc::clone(&storage));
        let (events, _sub) = record(&repo);
        repo.load();

        assert_eq!(reasons(&events), vec![ChangeReason::Load]);
        let threads = repo.list_threads();
        assert_eq!(threads.len(), 1);
        let texts: Vec<_> = threads[0].messages.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(texts, vec!["a", "b"]);
        assert_eq!(threads[0].recipient.name, "Bob");

        let payload = persisted(&storage);
        assert_eq!(payload["version"], CURRENT_SCHEMA_VERSION);
        assert!(payload.get("threads").is_some());
        assert!(payload.get("messages").is_none());
    }

    #[test]
    fn test_load_current_schema_does_not_rewrite() {
        let (storage, repo) = loaded();
        let saved = storage.get(THREADS_STORAGE_KEY).unwrap().unwrap();
        let first_id = repo.current_thread_id().unwrap();

        let reloaded = repo_with(Rc::clone(&storage));
        let (events, _sub) = record(&reloaded);
        reloaded.load();

        assert_eq!(reasons(&events), vec![ChangeReason::Load]);
        assert_eq!(events.borrow().len(), 1);
        assert_eq!(reloaded.current_thread_id().unwrap(), first_id);
        assert_eq!(storage.get(THREADS_STORAGE_KEY).unwrap().unwrap(), saved);
    }

    #[test]
    fn test_create_thread_is_appended_not_current() {
        let (_storage, repo) = loaded();
        let t0 = repo.get_current_thread().unwrap();
        let (events, _sub) = record(&repo);

        let t1 = repo.create_thread();

        assert_eq!(repo.list_threads().len(), 2);
        assert!(t1.updated_at >= t0.updated_at);
        assert_ne!(t1.id, t0.id);
        assert_eq!(repo.current_thread_id().unwrap(), t0.id);
        assert_eq!(t1.messages.len(), DEFAULT_MESSAGES.len());
        assert_eq!(reasons(&events), vec![ChangeReason::ThreadCreated]);
        assert!(repo.has_pending_save());
    }

    #[test]
    fn test_duplicate_thread() {
        let (_storage, repo) = loaded();
        let source = repo.get_current_thread().unwrap();

        let copy = repo.duplicate_thread(&source.id).unwrap();
        assert_ne!(copy.id, source.id);
        assert_eq!(copy.name.as_deref(), Some("Dreamer (Copy)"));
        assert_eq!(copy.recipient, source.recipient);
        let texts = |t: &Thread| t.messages.iter().map(|m| m.message.clone()).collect::<Vec<_>>();
        assert_eq!(texts(&copy), texts(&source));
        assert!(copy
            .messages
            .iter()
            .zip(&source.messages)
            .all(|(a, b)| a.id != b.id));

        assert!(repo.duplicate_thread("missing").is_none());
    }

    #[test]
    fn test_delete_only_thread_seeds_replacement() {
        let (_storage, repo) = loaded();
        let only = repo.current_thread_id().unwrap();
        let (events, _sub) = record(&repo);

        assert!(repo.delete_thread(&only));

        let current = repo.get_current_thread().unwrap();
        assert_ne!(current.id, only);
        assert_eq!(repo.thread_count(), 1);
        assert_eq!(current.messages.len(), DEFAULT_MESSAGES.len());
        assert_eq!(reasons(&events), vec![ChangeReason::ThreadDeleted]);
        assert!(!repo.delete_thread(&only));
    }

    #[test]
    fn test_delete_current_moves_to_first_remaining() {
        let (_storage, repo) = loaded();
        let t1 = repo.create_thread();
        let t2 = repo.create_thread();
        repo.load_thread(&t1.id);

        repo.delete_thread(&t1.id);

        let current = repo.current_thread_id().unwrap();
        assert_eq!(current, repo.list_threads()[0].id);
        assert!(!repo.contains_thread(&t1.id));
        assert!(repo.contains_thread(&t2.id));
    }

    #[test]
    fn test_load_thread_unknown_falls_back() {
        let (_storage, repo) = loaded();
        repo.create_thread();
        let (events, _sub) = record(&repo);

        let resolved = repo.load_thread("ghost");

        assert_eq!(resolved, repo.list_threads()[0].id);
        assert_eq!(repo.current_thread_id().unwrap(), resolved);
        let events = events.borrow();
        match &events[0] {
            StoreEvent::MessagesChanged(change) => {
                assert_eq!(change.reason, ChangeReason::ThreadChanged);
                assert_eq!(change.thread_id, resolved);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_load_thread_before_load_seeds() {
        let storage = Rc::new(MemoryStorage::new());
        let repo = repo_with(storage);
        let resolved = repo.load_thread("anything");
        assert_eq!(repo.current_thread_id(), Some(resolved));
        assert_eq!(repo.thread_count(), 1);
    }

    #[test]
    fn test_message_lifecycle_emits_in_order() {
        let (_storage, repo) = loaded();
        let (events, _sub) = record(&repo);

        let created = repo.add_message(None);
        assert_eq!(created.sender, Sender::User);
        assert_eq!(created.message, "");

        let updated = repo
            .update_message(&created.id, MessagePatch::text("hi").sender(Sender::Other))
            .unwrap();
        assert_eq!(updated.message, "hi");
        assert_eq!(updated.sender, Sender::Other);

        repo.delete_message(&created.id).unwrap();
        assert!(repo.get_messages().iter().all(|m| m.id != created.id));

        assert_eq!(
            reasons(&events),
            vec![ChangeReason::Add, ChangeReason::Update, ChangeReason::Delete]
        );
    }

    #[test]
    fn test_add_message_after_reference() {
        let (_storage, repo) = loaded();
        let first = repo.get_messages()[0].clone();

        let inserted = repo.add_message(Some(&first.id));
        assert_eq!(repo.get_messages()[1].id, inserted.id);

        let appended = repo.add_message(Some("missing"));
        assert_eq!(repo.get_messages().last().unwrap().id, appended.id);
    }

    #[test]
    fn test_unknown_message_ids_emit_nothing() {
        let (_storage, repo) = loaded();
        let (events, _sub) = record(&repo);
        assert!(repo.update_message("nope", MessagePatch::text("x")).is_none());
        assert!(repo.delete_message("nope").is_none());
        assert!(repo.insert_image("nope", "data:,").is_none());
        assert!(events.borrow().is_empty());
    }

    #[test]
    fn test_event_carries_full_snapshot() {
        let (_storage, repo) = loaded();
        let (events, _sub) = record(&repo);
        let created = repo.add_message(None);

        let events = events.borrow();
        let StoreEvent::MessagesChanged(change) = &events[0] else {
            panic!("expected messages-changed");
        };
        assert_eq!(change.message.as_ref().unwrap().id, created.id);
        assert_eq!(change.messages, repo.get_messages());
        assert_eq!(change.recipient, repo.get_recipient());
        assert_eq!(change.thread_id, repo.current_thread_id().unwrap());
    }

    #[test]
    fn test_listener_sees_committed_state() {
        let storage = Rc::new(MemoryStorage::new());
        let repo = Rc::new(repo_with(storage));
        repo.load();

        let observed = Rc::new(RefCell::new(0usize));
        let (repo_ref, sink) = (Rc::clone(&repo), Rc::clone(&observed));
        let _sub = repo.subscribe(move |_| {
            *sink.borrow_mut() = repo_ref.get_messages().len();
        });

        let before = repo.get_messages().len();
        repo.add_message(None);
        assert_eq!(*observed.borrow(), before + 1);
    }

    #[test]
    fn test_insert_image_appends() {
        let (storage, repo) = loaded();
        let created = repo.add_message(None);

        let msg = repo.insert_image(&created.id, "data:image/png;base64,abc").unwrap();
        assert_eq!(msg.images.len(), 1);
        assert_eq!(msg.images[0].src, "data:image/png;base64,abc");
        assert!(repo.insert_image(&created.id, "").is_none());

        repo.on_frame();
        let payload = persisted(&storage);
        let saved = &payload["threads"][0]["messages"];
        assert!(saved
            .as_array()
            .unwrap()
            .iter()
            .any(|m| m["images"][0]["src"] == "data:image/png;base64,abc"));
    }

    #[test]
    fn test_update_recipient_suppresses_noop() {
        let (_storage, repo) = loaded();
        let (events, _sub) = record(&repo);
        let before = repo.get_recipient();

        let changed = repo.update_recipient(RecipientPatch {
            name: Some(format!(" {} ", before.name)),
            location: Some(format!(" {} ", before.location)),
        });
        assert!(!changed);
        assert!(events.borrow().is_empty());
        assert!(!repo.has_pending_save());

        assert!(repo.update_recipient(RecipientPatch {
            name: Some("Alice".to_string()),
            location: None,
        }));
        assert_eq!(repo.get_recipient().name, "Alice");
        assert_eq!(reasons(&events), vec![ChangeReason::Recipient]);
    }

    #[test]
    fn test_clear_restores_demo() {
        let (_storage, repo) = loaded();
        let default_shape: Vec<_> = repo
            .get_messages()
            .iter()
            .map(|m| (m.sender, m.message.clone()))
            .collect();
        let default_recipient = repo.get_recipient();

        repo.update_recipient(RecipientPatch {
            name: Some("Someone Else".to_string()),
            location: Some("Somewhere Else".to_string()),
        });
        let extra = repo.add_message(None);
        repo.update_message(&extra.id, MessagePatch::text("changed"));

        repo.clear();

        let shape: Vec<_> = repo
            .get_messages()
            .iter()
            .map(|m| (m.sender, m.message.clone()))
            .collect();
        assert_eq!(shape, default_shape);
        assert_eq!(repo.get_recipient(), default_recipient);
    }

    #[test]
    fn test_rename_thread() {
        let (_storage, repo) = loaded();
        let id = repo.current_thread_id().unwrap();
        let (events, _sub) = record(&repo);

        assert!(repo.rename_thread(&id, Some("  Plans  ")));
        assert_eq!(repo.get_thread(&id).unwrap().display_name(), "Plans");
        assert!(!repo.rename_thread(&id, Some("Plans")));
        assert!(repo.rename_thread(&id, Some("   ")));
        assert_eq!(repo.get_thread(&id).unwrap().name, None);
        assert!(!repo.rename_thread("missing", Some("x")));

        assert_eq!(
            reasons(&events),
            vec![ChangeReason::ThreadUpdated, ChangeReason::ThreadUpdated]
        );
    }

    #[test]
    fn test_list_threads_newest_first() {
        let (_storage, repo) = loaded();
        let t0 = repo.current_thread_id().unwrap();
        let t1 = repo.create_thread();
        std::thread::sleep(Duration::from_millis(5));
        repo.add_message(None); // touches t0

        let listed: Vec<_> = repo.list_threads().into_iter().map(|t| t.id).collect();
        assert_eq!(listed, vec![t0, t1.id]);
    }

    #[test]
    fn test_list_order_survives_reload() {
        let (storage, repo) = loaded();
        for _ in 0..5 {
            repo.create_thread();
        }
        repo.add_message(None);
        repo.flush();
        let before: Vec<_> = repo.list_threads().into_iter().map(|t| t.id).collect();

        let reloaded = repo_with(Rc::clone(&storage));
        reloaded.load();
        let after: Vec<_> = reloaded.list_threads().into_iter().map(|t| t.id).collect();
        assert_eq!(after, before);
        assert_eq!(reloaded.list_threads()[0].id, before[0]);
    }

    #[test]
    fn test_export_shape() {
        let (_storage, repo) = loaded();
        let parsed: Value = serde_json::from_str(&repo.export_json(true).unwrap()).unwrap();
        assert_eq!(parsed["version"], CURRENT_SCHEMA_VERSION);
        assert!(parsed["messages"].is_array());
        assert!(parsed["recipient"].is_object());
        assert!(!repo.export_json(false).unwrap().contains('\n'));
    }

    #[test]
    fn test_import_creates_current_thread() {
        let (_storage, repo) = loaded();
        let original = repo.current_thread_id().unwrap();
        let (events, _sub) = record(&repo);

        let payload = json!({
            "recipient": {"name": "  Bob  ", "location": "  SF  "},
            "messages": [
                {"sender": "self", "message": "ok", "timestamp": 1_714_564_800_000i64},
                {"sender": "other", "message": "yo"},
                {"sender": "nope", "message": "bad"}
            ]
        });
        let thread = repo.import_json(&payload.to_string()).unwrap();

        assert_eq!(repo.current_thread_id().unwrap(), thread.id);
        assert!(repo.contains_thread(&original));
        assert_eq!(repo.thread_count(), 2);
        let messages = repo.get_messages();
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| !m.id.is_empty()));
        assert!(messages[0].timestamp < messages[1].timestamp);
        assert_eq!(repo.get_recipient().name, "Bob");
        assert_eq!(repo.get_recipient().location, "SF");
        assert_eq!(reasons(&events), vec![ChangeReason::Import]);
    }

    #[test]
    fn test_import_bare_array() {
        let (_storage, repo) = loaded();
        let thread = repo
            .import_json(r#"[{"sender":"other","message":"legacy"}]"#)
            .unwrap();
        assert_eq!(thread.messages[0].message, "legacy");
        assert_eq!(thread.recipient, Recipient::default());
    }

    #[test]
    fn test_import_failures_leave_state_untouched() {
        let (_storage, repo) = loaded();
        let before = repo.list_threads();
        let current = repo.current_thread_id();
        let (events, _sub) = record(&repo);

        assert!(matches!(repo.import_json("{oops"), Err(ImportError::InvalidJson(_))));
        assert!(matches!(
            repo.import_json(r#"{"messages": 5}"#),
            Err(ImportError::InvalidFormat)
        ));

        assert_eq!(repo.list_threads(), before);
        assert_eq!(repo.current_thread_id(), current);
        assert!(events.borrow().is_empty());
    }

    #[test]
    fn test_export_import_round_trip() {
        let (_storage, repo) = loaded();
        repo.update_recipient(RecipientPatch {
            name: Some("Ann".to_string()),
            location: Some("Oslo".to_string()),
        });
        let added = repo.add_message(None);
        repo.insert_image(&added.id, "data:image/gif;base64,R0lG");
        let source = repo.get_current_thread().unwrap();

        let imported = repo.import_json(&repo.export_json(false).unwrap()).unwrap();

        assert_ne!(imported.id, source.id);
        assert_eq!(imported.recipient, source.recipient);
        let shape = |t: &Thread| {
            t.messages
                .iter()
                .map(|m| (m.sender, m.message.clone(), m.images.len(), time::to_iso(&m.timestamp)))
                .collect::<Vec<_>>()
        };
        assert_eq!(shape(&imported), shape(&source));
    }

    #[test]
    fn test_debounced_saves_coalesce() {
        let (storage, repo) = loaded();
        let msg = repo.add_message(None);
        for text in ["h", "he", "hel", "hell", "hello"] {
            repo.update_message(&msg.id, MessagePatch::text(text));
        }
        assert!(repo.has_pending_save());

        // Nothing written until the frame fires
        let payload = persisted(&storage);
        assert!(payload["threads"][0]["messages"]
            .as_array()
            .unwrap()
            .iter()
            .all(|m| m["id"] != msg.id.as_str()));

        repo.on_frame();
        assert!(!repo.has_pending_save());
        let payload = persisted(&storage);
        let saved = payload["threads"][0]["messages"]
            .as_array()
            .unwrap()
            .iter()
            .find(|m| m["id"] == msg.id.as_str())
            .cloned()
            .unwrap();
        assert_eq!(saved["message"], "hello");
    }

    #[test]
    fn test_write_failure_keeps_mutation_and_reports() {
        let (storage, repo) = loaded();
        let (events, _sub) = record(&repo);
        storage.fail_with("quota");

        let msg = repo.add_message(None);
        repo.flush();

        assert!(repo.get_messages().iter().any(|m| m.id == msg.id));
        let events = events.borrow();
        assert!(events.iter().any(|e| matches!(
            e,
            StoreEvent::StorageError(StorageErrorEvent {
                operation: StorageOperation::Save,
                ..
            })
        )));
    }

    #[test]
    fn test_quota_exceeded_is_reported() {
        let storage = Rc::new(MemoryStorage::with_quota(64));
        let repo = repo_with(Rc::clone(&storage));
        let (events, _sub) = record(&repo);

        repo.load();

        // Seeded in memory even though the payload never fit
        assert_eq!(repo.thread_count(), 1);
        assert!(storage.get(THREADS_STORAGE_KEY).unwrap().is_none());
        assert!(events
            .borrow()
            .iter()
            .any(|e| matches!(e, StoreEvent::StorageError(_))));
    }

    proptest! {
        #[test]
        fn prop_never_empty_and_current_valid(ops in prop::collection::vec((0u8..4, 0usize..8), 1..40)) {
            let (_storage, repo) = loaded();
            for (op, pick) in ops {
                let threads = repo.list_threads();
                let target = threads[pick % threads.len()].id.clone();
                match op {
                    0 => { repo.delete_thread(&target); }
                    1 => { repo.create_thread(); }
                    2 => { repo.load_thread(&target); }
                    _ => { repo.load_thread("ghost"); }
                }
                prop_assert!(!repo.list_threads().is_empty());
                let current = repo.get_current_thread();
                prop_assert!(current.is_some());
                let current_id = current.map(|t| t.id).unwrap_or_default();
                prop_assert!(repo.list_threads().iter().any(|t| t.id == current_id));
            }
        }
    }
}
