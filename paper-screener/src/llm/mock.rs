use super::{LlmProvider, ScreeningError};
use crate::prompt::ScreeningRequest;
use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

type Responder = Box<dyn Fn(&ScreeningRequest) -> Result<String, ScreeningError> + Send + Sync>;

/// Mock provider for development and testing.
///
/// Answers come from, in order: the scripted queue, the responder closure,
/// and finally the default response.
pub struct MockProvider {
    name: String,
    default_response: String,
    scripted: Mutex<VecDeque<Result<String, ScreeningError>>>,
    responder: Option<Responder>,
    response_delay_ms: u64,
    calls: AtomicUsize,
}

impl MockProvider {
    pub fn new(default_response: impl Into<String>) -> Self {
        Self {
            name: "mock".to_string(),
            default_response: default_response.into(),
            scripted: Mutex::new(VecDeque::new()),
            responder: None,
            response_delay_ms: 0,
            calls: AtomicUsize::new(0),
        }
    }

    /// Answer every request through `responder`.
    pub fn from_fn<F>(responder: F) -> Self
    where
        F: Fn(&ScreeningRequest) -> Result<String, ScreeningError> + Send + Sync + 'static,
    {
        let mut mock = Self::new(String::new());
        mock.responder = Some(Box::new(responder));
        mock
    }

    /// Queue answers consumed one per call before any other source.
    pub fn with_responses(self, responses: Vec<Result<String, ScreeningError>>) -> Self {
        if let Ok(mut scripted) = self.scripted.lock() {
            scripted.extend(responses);
        }
        self
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.response_delay_ms = delay_ms;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_scripted(&self) -> Option<Result<String, ScreeningError>> {
        self.scripted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, request: &ScreeningRequest) -> Result<String, ScreeningError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.response_delay_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(self.response_delay_ms)).await;
        }

        if let Some(scripted) = self.next_scripted() {
            return scripted;
        }
        match &self.responder {
            Some(responder) => responder(request),
            None => Ok(self.default_response.clone()),
        }
    }
}

/// A well-formed model answer with the given judgments.
pub fn verdict_json(field_match: bool, method_match: bool) -> String {
    json!({
        "field_match": {"value": field_match, "reason": "field judged by mock"},
        "method_match": {"value": method_match, "reason": "method judged by mock"},
        "summary": {
            "problem": "mock problem",
            "method": "mock method",
            "data": null,
            "highlights": "mock highlights"
        }
    })
    .to_string()
}
