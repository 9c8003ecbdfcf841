#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use hybrid_search::{AppConfig, SearchStack};
use index::{IndexBackend, InMemoryBackend, ManualClock, SearchableItem};
use semantic::testing::ScriptedProvider;
use semantic::RetryConfig;

pub const MODEL: &str = "scripted-v1";
pub const DIM: usize = 16;

pub struct Harness {
    pub stack: SearchStack,
    pub provider: Arc<ScriptedProvider>,
    pub clock: Arc<ManualClock>,
    pub backend: Arc<dyn IndexBackend>,
}

/// Defaults with the scripted model and single-attempt retries.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.embedding.model = MODEL.to_string();
    config.embedding.dimension = DIM;
    config.embedding.retry = RetryConfig::default()
        .with_max_attempts(1)
        .with_jitter(false);
    config
}

pub fn harness() -> Harness {
    harness_with(test_config())
}

pub fn harness_with(config: AppConfig) -> Harness {
    let backend: Arc<dyn IndexBackend> = Arc::new(InMemoryBackend::new());
    harness_on(config, backend)
}

/// Build a stack over an existing backend, as a restarted process would.
pub fn harness_on(config: AppConfig, backend: Arc<dyn IndexBackend>) -> Harness {
    let provider = Arc::new(ScriptedProvider::new(MODEL, DIM));
    let clock = Arc::new(ManualClock::new(day(30)));
    let stack = SearchStack::builder(config)
        .backend(backend.clone())
        .provider(provider.clone())
        .clock(clock.clone())
        .build()
        .expect("stack builds");
    Harness {
        stack,
        provider,
        clock,
        backend,
    }
}

pub fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, d, 12, 0, 0).unwrap()
}

pub fn clip(id: &str, title: &str, d: u32) -> SearchableItem {
    SearchableItem::new(id, title, day(d))
}

/// Unit vector along `axis`, optionally tilted toward `axis + 1`.
pub fn axis(axis: usize, tilt: f32) -> Vec<f32> {
    let mut v = vec![0.0; DIM];
    v[axis] = 1.0;
    v[(axis + 1) % DIM] = tilt;
    v
}
