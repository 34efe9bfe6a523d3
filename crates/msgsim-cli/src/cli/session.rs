//! One process invocation = one page load: open storage, load the repository,
//! reconcile the address, run a command, flush.

use std::rc::Rc;

use anyhow::{Context, Result};
use msgsim_core::models::time;
use msgsim_core::{
    CoreConfig, FileStorage, HistoryBackend, KeyValueStorage, LastActivePointer, MemoryHistory,
    MessagePatch, NavigationState, Reconciler, ReconcilerSession, RecipientPatch, Resolution,
    Sender, StoreEvent, Subscription, Thread, ThreadRepository,
};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::protocol::{CliCommand, Response};

/// Address the simulated page is served from
pub const BASE_ADDRESS: &str = "msgsim://local/";

pub struct Session {
    repo: Rc<ThreadRepository>,
    history: Rc<MemoryHistory>,
    reconciler: Rc<Reconciler>,
    running: ReconcilerSession,
    storage_errors: Subscription,
}

impl Session {
    /// Open the data directory and resolve `reference` as if it were the
    /// `?thread=` of the page address
    pub fn open(config: &CoreConfig, reference: Option<&str>) -> Result<Self> {
        let storage = FileStorage::new(&config.data_dir)
            .with_context(|| format!("Failed to open data dir: {}", config.data_dir.display()))?
            .with_quota(config.storage_quota_bytes);
        let storage: Rc<dyn KeyValueStorage> = Rc::new(storage);

        let repo = Rc::new(ThreadRepository::with_debounce(
            Rc::clone(&storage),
            config.save_debounce,
        ));
        let storage_errors = repo.subscribe(|event| {
            if let StoreEvent::StorageError(e) = event {
                warn!("Storage {:?} failed: {}", e.operation, e.error);
            }
        });
        repo.load();

        let history = Rc::new(MemoryHistory::new(BASE_ADDRESS));
        let nav = NavigationState::new(history.clone());
        if let Some(reference) = reference {
            nav.replace_current_thread_id(Some(reference));
        }

        let reconciler = Rc::new(Reconciler::new(
            Rc::clone(&repo),
            nav,
            LastActivePointer::new(storage),
        ));
        let running = reconciler.start();

        Ok(Self {
            repo,
            history,
            reconciler,
            running,
            storage_errors,
        })
    }

    pub fn initial(&self) -> &Resolution {
        self.running.initial()
    }

    pub fn repository(&self) -> &Rc<ThreadRepository> {
        &self.repo
    }

    pub fn address(&self) -> String {
        self.history.location()
    }

    /// Run a command and stamp the response with the resulting thread and address
    pub fn execute(&self, command: CliCommand) -> Response {
        debug!("Executing {:?}", command);
        let mut response = self.handle(command);
        response.thread = self.repo.current_thread_id();
        response.address = Some(self.address());
        response
    }

    /// Write anything pending and detach
    pub fn close(self) {
        self.repo.flush();
        self.running.stop();
        self.storage_errors.unsubscribe();
    }

    fn handle(&self, command: CliCommand) -> Response {
        match command {
            CliCommand::ListThreads => {
                let current = self.repo.current_thread_id();
                let threads: Vec<_> = self
                    .repo
                    .list_threads()
                    .iter()
                    .map(|t| {
                        json!({
                            "id": t.id,
                            "name": ThreadRepository::thread_display_name(t),
                            "messages": t.messages.len(),
                            "updatedAt": time::to_iso(&t.updated_at),
                            "current": current.as_deref() == Some(t.id.as_str()),
                        })
                    })
                    .collect();
                Response::success(json!(threads))
            }

            CliCommand::Show => match self.repo.get_current_thread() {
                Some(thread) => Response::success(json!(thread)),
                None => Response::error("not_found", "No current thread"),
            },

            CliCommand::NewThread => {
                let thread = self.repo.create_thread();
                Response::success(thread_summary(&thread))
            }

            CliCommand::DuplicateThread { thread_id } => {
                match self.repo.duplicate_thread(&thread_id) {
                    Some(thread) => Response::success(thread_summary(&thread)),
                    None => thread_not_found(&thread_id),
                }
            }

            CliCommand::DeleteThread { thread_id } => {
                match self.reconciler.delete_thread(&thread_id) {
                    Some(resolution) => Response::success(resolution_json(&resolution)),
                    None => thread_not_found(&thread_id),
                }
            }

            CliCommand::RenameThread { thread_id, name } => {
                if !self.repo.contains_thread(&thread_id) {
                    return thread_not_found(&thread_id);
                }
                let changed = self.repo.rename_thread(&thread_id, name.as_deref());
                Response::success(json!({ "changed": changed }))
            }

            CliCommand::OpenThread { thread_id } => {
                let resolution = self.reconciler.open_thread(&thread_id);
                Response::success(resolution_json(&resolution))
            }

            CliCommand::AddMessage {
                after,
                text,
                sender,
            } => {
                let patch = match build_patch(text, sender) {
                    Ok(patch) => patch,
                    Err(response) => return response,
                };
                let created = self.repo.add_message(after.as_deref());
                let message = if patch == MessagePatch::default() {
                    created
                } else {
                    self.repo
                        .update_message(&created.id, patch)
                        .unwrap_or(created)
                };
                Response::success(json!(message))
            }

            CliCommand::EditMessage {
                message_id,
                text,
                sender,
            } => {
                let patch = match build_patch(text, sender) {
                    Ok(patch) => patch,
                    Err(response) => return response,
                };
                if patch == MessagePatch::default() {
                    return Response::error("invalid_args", "Nothing to change");
                }
                match self.repo.update_message(&message_id, patch) {
                    Some(message) => Response::success(json!(message)),
                    None => message_not_found(&message_id),
                }
            }

            CliCommand::DeleteMessage { message_id } => {
                match self.repo.delete_message(&message_id) {
                    Some(message) => Response::success(json!(message)),
                    None => message_not_found(&message_id),
                }
            }

            CliCommand::AddImage { message_id, src } => {
                if src.is_empty() {
                    return Response::error("invalid_args", "Image source is empty");
                }
                match self.repo.insert_image(&message_id, &src) {
                    Some(message) => Response::success(json!(message)),
                    None => message_not_found(&message_id),
                }
            }

            CliCommand::SetRecipient { name, location } => {
                let changed = self.repo.update_recipient(RecipientPatch { name, location });
                Response::success(json!({
                    "changed": changed,
                    "recipient": self.repo.get_recipient(),
                }))
            }

            CliCommand::Clear => {
                self.repo.clear();
                Response::success(json!({ "messages": self.repo.get_messages().len() }))
            }

            CliCommand::Export => {
                let exported = self
                    .repo
                    .export_json(false)
                    .map_err(anyhow::Error::from)
                    .and_then(|text| {
                        serde_json::from_str::<Value>(&text).context("Failed to re-read export")
                    });
                match exported {
                    Ok(value) => Response::success(value),
                    Err(e) => Response::error("export_failed", &format!("{:#}", e)),
                }
            }

            CliCommand::Import { json } => match self.repo.import_json(&json) {
                Ok(thread) => {
                    // Give the new thread its own history entry
                    let resolution = self.reconciler.open_thread(&thread.id);
                    let mut summary = thread_summary(&thread);
                    summary["source"] = json!(resolution.source.as_str());
                    Response::success(summary)
                }
                Err(e) => Response::error("import_failed", &e.to_string()),
            },
        }
    }
}

fn build_patch(text: Option<String>, sender: Option<String>) -> Result<MessagePatch, Response> {
    let sender = match sender.as_deref() {
        Some(raw) => Some(Sender::parse(raw).ok_or_else(|| {
            Response::error(
                "invalid_sender",
                &format!("Unknown sender {:?} (expected \"self\" or \"other\")", raw),
            )
        })?),
        None => None,
    };
    Ok(MessagePatch {
        message: text,
        sender,
        images: None,
    })
}

fn thread_summary(thread: &Thread) -> Value {
    json!({
        "id": thread.id,
        "name": ThreadRepository::thread_display_name(thread),
        "messages": thread.messages.len(),
    })
}

fn resolution_json(resolution: &Resolution) -> Value {
    json!({
        "threadId": resolution.thread_id,
        "source": resolution.source.as_str(),
        "address": resolution.address.as_str(),
    })
}

fn thread_not_found(id: &str) -> Response {
    Response::error("not_found", &format!("Thread not found: {}", id))
}

fn message_not_found(id: &str) -> Response {
    Response::error("not_found", &format!("Message not found in current thread: {}", id))
}
