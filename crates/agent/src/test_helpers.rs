//! Shared test helpers for orchestrator tests.

use agentweave_core::agent::ProviderConfig;
use agentweave_core::error::ProviderError;
use agentweave_core::provider::{GenerationMeta, PromptMessage, Provider, ProviderChunk};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// What the provider does for one `generate` call.
pub enum Step {
    /// Stream accumulated updates, then finish with the last text
    Stream(Vec<String>),
    /// Stream accumulated updates and keep the stream open
    Hang(Vec<String>),
    /// Send an error chunk after the updates
    ErrorAfter(Vec<String>, String),
    /// Close the stream without a terminal chunk
    Truncate(Vec<String>),
    /// Fail the `generate` call itself
    Reject(ProviderError),
}

impl Step {
    /// A reply streamed in two chunks.
    pub fn reply(text: &str) -> Self {
        let half: String = text.chars().take(text.chars().count() / 2).collect();
        Step::Stream(vec![half, text.to_string()])
    }
}

/// A mock provider that plays one scripted [`Step`] per call.
///
/// Panics if more calls are made than steps provided.
pub struct SequentialMockProvider {
    steps: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<(Vec<PromptMessage>, ProviderConfig, GenerationMeta)>>,
    cancels: Mutex<Vec<String>>,
    held: Mutex<Vec<mpsc::Sender<ProviderChunk>>>,
}

impl SequentialMockProvider {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            calls: Mutex::new(Vec::new()),
            cancels: Mutex::new(Vec::new()),
            held: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Prompts received by the `n`-th call (0-based).
    pub fn prompts(&self, n: usize) -> Vec<PromptMessage> {
        self.calls.lock().unwrap()[n].0.clone()
    }

    pub fn config(&self, n: usize) -> ProviderConfig {
        self.calls.lock().unwrap()[n].1.clone()
    }

    pub fn cancelled_requests(&self) -> Vec<String> {
        self.cancels.lock().unwrap().clone()
    }
}

fn updates(request_id: &str, texts: &[String]) -> Vec<ProviderChunk> {
    texts
        .iter()
        .map(|t| ProviderChunk::update(request_id, t.clone()))
        .collect()
}

#[async_trait::async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn generate(
        &self,
        prompts: Vec<PromptMessage>,
        config: ProviderConfig,
        meta: GenerationMeta,
    ) -> Result<mpsc::Receiver<ProviderChunk>, ProviderError> {
        let request_id = meta.request_id.clone();
        self.calls.lock().unwrap().push((prompts, config, meta));
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("SequentialMockProvider: no more steps"));

        let (chunks, hold) = match step {
            Step::Reject(e) => return Err(e),
            Step::Stream(texts) => {
                let mut chunks = updates(&request_id, &texts[..texts.len().saturating_sub(1)]);
                let last = texts.last().cloned().unwrap_or_default();
                chunks.push(ProviderChunk::done(&request_id, last));
                (chunks, false)
            }
            Step::Hang(texts) => (updates(&request_id, &texts), true),
            Step::ErrorAfter(texts, message) => {
                let mut chunks = updates(&request_id, &texts);
                chunks.push(ProviderChunk::error(&request_id, "ProviderError", message));
                (chunks, false)
            }
            Step::Truncate(texts) => (updates(&request_id, &texts), false),
        };

        let (tx, rx) = mpsc::channel(chunks.len().max(1) + 1);
        for chunk in chunks {
            tx.try_send(chunk).unwrap();
        }
        if hold {
            self.held.lock().unwrap().push(tx);
        }
        Ok(rx)
    }

    async fn cancel(&self, request_id: &str) -> Result<(), ProviderError> {
        self.cancels.lock().unwrap().push(request_id.to_string());
        self.held.lock().unwrap().clear();
        Ok(())
    }
}
