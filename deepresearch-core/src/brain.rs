//! LLM completion capability used by the planner and extractor adapters.
//!
//! The engine never talks to a model vendor directly. Anything that can turn a
//! prompt into text implements [`LlmProvider`]; [`MockLlmProvider`] replays
//! scripted responses so the scheduling engine stays deterministic in tests.

use crate::error::LlmError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// A single prompt sent to a completion backend.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// System instruction framing the task.
    pub system: String,
    /// User prompt.
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: Option<usize>,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            temperature: 0.4,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Trait for text completion backends.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Complete the request and return the response text.
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError>;

    /// Return the model name, for logging.
    fn model_name(&self) -> &str;
}

enum MockReply {
    Text(String),
    Fail(LlmError),
}

/// Scripted provider: replies are consumed in FIFO order.
///
/// When the queue is empty the fallback text is returned (empty by default),
/// and every request is recorded for later inspection.
pub struct MockLlmProvider {
    model: String,
    replies: Mutex<VecDeque<MockReply>>,
    fallback: String,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            replies: Mutex::new(VecDeque::new()),
            fallback: String::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Create a provider that answers every request with `text`.
    pub fn with_response(text: &str) -> Self {
        Self {
            fallback: text.to_string(),
            ..Self::new()
        }
    }

    /// Queue a text reply.
    pub fn queue_response(&self, text: impl Into<String>) {
        lock(&self.replies).push_back(MockReply::Text(text.into()));
    }

    /// Queue a failure.
    pub fn queue_error(&self, error: LlmError) {
        lock(&self.replies).push_back(MockReply::Fail(error));
    }

    /// Requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        lock(&self.requests).clone()
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        lock(&self.requests).push(request);
        match lock(&self.replies).pop_front() {
            Some(MockReply::Text(text)) => Ok(text),
            Some(MockReply::Fail(err)) => Err(err),
            None => Ok(self.fallback.clone()),
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
