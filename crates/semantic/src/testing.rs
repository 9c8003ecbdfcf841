//! A controllable provider for tests across the workspace.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::provider::{EmbeddingProvider, StubEmbeddingProvider};
use crate::SemanticError;

/// Stub-backed provider with scripted vectors, failures and latency.
///
/// Texts containing a registered needle (case-insensitive) get that
/// needle's vector; everything else falls back to the deterministic stub.
pub struct ScriptedProvider {
    stub: StubEmbeddingProvider,
    rules: Mutex<Vec<(String, Vec<f32>)>>,
    queued_failures: Mutex<VecDeque<SemanticError>>,
    failure: Mutex<Option<SemanticError>>,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
    texts: AtomicUsize,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedProvider {
    pub fn new(model: impl Into<String>, dimension: usize) -> Self {
        Self {
            stub: StubEmbeddingProvider::new(model, dimension),
            rules: Mutex::new(Vec::new()),
            queued_failures: Mutex::new(VecDeque::new()),
            failure: Mutex::new(None),
            delay: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
            texts: AtomicUsize::new(0),
        }
    }

    pub fn with_vector(self, needle: &str, vector: Vec<f32>) -> Self {
        self.set_vector(needle, vector);
        self
    }

    pub fn set_vector(&self, needle: &str, vector: Vec<f32>) {
        lock(&self.rules).push((needle.to_lowercase(), vector));
    }

    /// Fail the next `n` calls with `err`.
    pub fn fail_next(&self, n: usize, err: SemanticError) {
        let mut queue = lock(&self.queued_failures);
        for _ in 0..n {
            queue.push_back(err.clone());
        }
    }

    /// Fail every call until cleared with `None`.
    pub fn fail_always(&self, err: Option<SemanticError>) {
        *lock(&self.failure) = err;
    }

    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = delay;
    }

    /// Provider calls made, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Texts embedded by successful calls.
    pub fn texts_embedded(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let lowered = text.to_lowercase();
        lock(&self.rules)
            .iter()
            .find(|(needle, _)| lowered.contains(needle.as_str()))
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| self.stub.vector_for(text))
    }
}

#[async_trait]
impl EmbeddingProvider for ScriptedProvider {
    fn model(&self) -> &str {
        self.stub.model()
    }

    fn name(&self) -> &str {
        "scripted"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SemanticError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = lock(&self.failure).clone() {
            return Err(err);
        }
        if let Some(err) = lock(&self.queued_failures).pop_front() {
            return Err(err);
        }
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}
