//! # Data Model
//!
//! Wire-level and in-process types shared by every other module: the
//! [`Request`] the dispatch engine tracks from submission to completion, the
//! unified [`Response`] adapters must produce, and the streaming [`Chunk`]
//! events the [`crate::stream`] parser emits.
//!
//! None of these types know about any particular vendor's JSON shape —
//! that translation is the adapter's job (see [`crate::providers`]).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A role a message can be authored under.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Hash, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single turn in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Priority hint a caller attaches to a request.
///
/// The dispatch engine does not reorder the pending queue by priority
/// (spec.md §4.9.2 specifies strict FIFO); this is carried through so
/// callers can express intent and a future scheduler has somewhere to
/// read it from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

/// Per-request generation options (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionOptions {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub stop: Option<Vec<String>>,
    #[serde(default = "default_n")]
    pub n: u32,
    #[serde(default)]
    pub stream: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_id: Option<String>,
}

fn default_temperature() -> f32 {
    0.7
}
fn default_n() -> u32 {
    1
}
fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: None,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            stop: None,
            n: default_n(),
            stream: false,
            timeout_ms: default_timeout_ms(),
            priority: Priority::default(),
            user_id: None,
        }
    }
}

/// Caller-supplied shape for a completion call (spec.md §6 "Required input
/// shape for `opts`"). `provider` is optional: when absent the engine
/// resolves one from `model` via the registry's model index (spec.md §4.9
/// step 2).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CompletionParams {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub provider: Option<String>,
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(flatten)]
    pub options: CompletionOptions,
}

/// Lifecycle status of a tracked [`Request`].
///
/// `pending -> processing -> (completed | failed)`; retries only re-enter
/// `processing` from `processing` (spec.md §3 invariant).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// A request tracked by the dispatch engine from submission to completion.
///
/// Owned exclusively by the [`crate::dispatch::DispatchEngine`]; nothing
/// outside the engine mutates a `Request` in place.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: String,
    pub provider: String,
    pub model: String,
    pub messages: Vec<Message>,
    pub options: CompletionOptions,
    pub status: RequestStatus,
    pub retries: u32,
    pub is_async: bool,
    pub response: Option<Response>,
    pub error: Option<crate::error::GatewayError>,
    pub submitted_at: chrono::DateTime<chrono::Utc>,
}

impl Request {
    pub fn new(id: String, provider: String, params: CompletionParams, is_async: bool) -> Self {
        Self {
            id,
            provider,
            model: params.model,
            messages: params.messages,
            options: params.options,
            status: RequestStatus::Pending,
            retries: 0,
            is_async,
            response: None,
            error: None,
            submitted_at: chrono::Utc::now(),
        }
    }
}

/// One completion choice in a [`Response`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: Message,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub finish_reason: Option<String>,
}

/// Token accounting for a completed request.
///
/// Invariant: `total_tokens == prompt_tokens + completion_tokens`
/// (spec.md §3, §8).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// The unified shape every provider adapter must produce (spec.md §3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub model: String,
    pub provider: String,
    pub choices: Vec<Choice>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub usage: Option<Usage>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub cached: bool,
}

impl Response {
    /// Content of the first choice, for callers that only want the text
    /// (the common case in tests and examples).
    pub fn content(&self) -> &str {
        self.choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or_default()
    }
}

/// One incremental event in a streaming response (spec.md §3, §4.8).
///
/// The terminal chunk is the one carrying `Some(finish_reason)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Chunk {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub finish_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub usage: Option<Usage>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Chunk {
    pub fn is_terminal(&self) -> bool {
        self.finish_reason.is_some()
    }
}

/// The result of folding an ordered chunk sequence (spec.md §4.8
/// `accumulate`).
#[derive(Debug, Clone, Default)]
pub struct Accumulated {
    pub content: String,
    pub role: Option<Role>,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

/// Fold an ordered sequence of chunks into a single terminal result.
pub fn accumulate<'a>(chunks: impl IntoIterator<Item = &'a Chunk>) -> Accumulated {
    let mut out = Accumulated::default();
    for chunk in chunks {
        if let Some(content) = &chunk.content {
            out.content.push_str(content);
        }
        if out.role.is_none() {
            out.role = chunk.role;
        }
        if chunk.finish_reason.is_some() {
            out.finish_reason = chunk.finish_reason.clone();
        }
        if chunk.usage.is_some() {
            out.usage = chunk.usage;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_total_matches_invariant() {
        let usage = Usage::new(10, 5);
        assert_eq!(usage.total_tokens, 15);
    }

    #[test]
    fn accumulate_folds_in_order() {
        let chunks = vec![
            Chunk {
                role: Some(Role::Assistant),
                ..Default::default()
            },
            Chunk {
                content: Some("Hel".to_string()),
                ..Default::default()
            },
            Chunk {
                content: Some("lo".to_string()),
                finish_reason: Some("stop".to_string()),
                ..Default::default()
            },
        ];

        let acc = accumulate(&chunks);
        assert_eq!(acc.content, "Hello");
        assert_eq!(acc.role, Some(Role::Assistant));
        assert_eq!(acc.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn completion_options_defaults_match_spec() {
        let opts = CompletionOptions::default();
        assert_eq!(opts.temperature, 0.7);
        assert_eq!(opts.n, 1);
        assert_eq!(opts.timeout_ms, 30_000);
        assert_eq!(opts.priority, Priority::Normal);
        assert!(!opts.stream);
    }
}
