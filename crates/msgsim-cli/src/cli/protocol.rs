use serde::{Deserialize, Serialize};

/// Outcome of one command, printed as JSON
#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    /// Current thread after the command
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread: Option<String>,
    /// Address after the command
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl Response {
    pub fn success(result: serde_json::Value) -> Self {
        Self {
            result: Some(result),
            error: None,
            thread: None,
            address: None,
        }
    }

    pub fn error(code: &str, message: &str) -> Self {
        Self {
            result: None,
            error: Some(ErrorInfo {
                code: code.to_string(),
                message: message.to_string(),
            }),
            thread: None,
            address: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// CLI command parsed from arguments
#[derive(Debug, Clone)]
pub enum CliCommand {
    /// List threads, newest first
    ListThreads,
    /// Dump the current thread
    Show,
    /// Create a seeded thread (does not switch to it)
    NewThread,
    DuplicateThread { thread_id: String },
    DeleteThread { thread_id: String },
    RenameThread { thread_id: String, name: Option<String> },
    /// Navigate to a thread (new history entry)
    OpenThread { thread_id: String },
    AddMessage {
        after: Option<String>,
        text: Option<String>,
        sender: Option<String>,
    },
    EditMessage {
        message_id: String,
        text: Option<String>,
        sender: Option<String>,
    },
    DeleteMessage { message_id: String },
    AddImage { message_id: String, src: String },
    SetRecipient {
        name: Option<String>,
        location: Option<String>,
    },
    /// Restore the demo conversation in the current thread
    Clear,
    /// `{ version, messages, recipient }` of the current thread
    Export,
    /// Import JSON text as a new current thread
    Import { json: String },
}
