//! Mock variant invoker for testing.
//!
//! [`MockInvoker`] answers every prompt without a model backend. Replies can
//! be scripted per prompt with a delay and an outcome, which makes completion
//! order deterministic under paused tokio time.
//!
//! Only available with the `test-utils` feature:
//!
//! ```toml
//! [dev-dependencies]
//! swatch-variant = { version = "...", features = ["test-utils"] }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
#[cfg(feature = "config")]
use clap::Args;
use serde::{Deserialize, Serialize};

use crate::dispatch::VariantInvoker;
use crate::types::{PreparedInput, VariantInput};
use crate::{Error, Result};

const DEFAULT_MOCK_RESPONSE: &str =
    "Mid-weight cotton twill in deep indigo with a diagonal weave and soft brushed texture.";

/// Configuration for the mock invoker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(Args))]
pub struct MockConfig {
    /// Text returned for every prompt without a scripted reply.
    #[cfg_attr(feature = "config", arg(long = "mock-response", env = "MOCK_RESPONSE"))]
    #[serde(default)]
    pub mock_response: Option<String>,

    /// Lower bound of the simulated call latency, in milliseconds.
    #[cfg_attr(
        feature = "config",
        arg(long = "mock-min-latency-ms", env = "MOCK_MIN_LATENCY_MS", default_value = "0")
    )]
    #[serde(default)]
    pub min_latency_ms: u64,

    /// Upper bound of the simulated call latency, in milliseconds.
    #[cfg_attr(
        feature = "config",
        arg(long = "mock-max-latency-ms", env = "MOCK_MAX_LATENCY_MS", default_value = "0")
    )]
    #[serde(default)]
    pub max_latency_ms: u64,
}

impl MockConfig {
    /// Converts this configuration into an invoker.
    pub fn into_invoker(self) -> MockInvoker {
        MockInvoker::from_config(self)
    }

    /// Draws a latency within the configured bounds for one call.
    fn sample_latency(&self) -> Duration {
        let min = self.min_latency_ms.min(self.max_latency_ms);
        let max = self.max_latency_ms.max(self.min_latency_ms);
        if min == max {
            return Duration::from_millis(min);
        }

        Duration::from_millis(rand::random_range(min..=max))
    }
}

/// What a scripted call does once its delay has elapsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOutcome {
    /// Returns the text.
    Text(String),
    /// Returns no text.
    Empty,
    /// Returns an invocation error.
    Fail(String),
    /// Panics inside the call.
    Panic,
}

/// Scripted reply for one prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockReply {
    delay: Duration,
    outcome: MockOutcome,
}

impl MockReply {
    /// Replies with text.
    pub fn text(text: impl Into<String>) -> Self {
        Self::immediate(MockOutcome::Text(text.into()))
    }

    /// Replies without text.
    pub fn empty() -> Self {
        Self::immediate(MockOutcome::Empty)
    }

    /// Fails with an invocation error.
    pub fn failure(message: impl Into<String>) -> Self {
        Self::immediate(MockOutcome::Fail(message.into()))
    }

    /// Panics inside the call.
    pub fn panic() -> Self {
        Self::immediate(MockOutcome::Panic)
    }

    fn immediate(outcome: MockOutcome) -> Self {
        Self {
            delay: Duration::ZERO,
            outcome,
        }
    }

    /// Delays the reply.
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Debug, Default)]
struct Counters {
    calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

/// Invoker answering from scripted replies or a configured template.
///
/// Clones share their call counters.
#[derive(Debug, Clone, Default)]
pub struct MockInvoker {
    config: Arc<MockConfig>,
    replies: Arc<HashMap<String, MockReply>>,
    fallback: Option<MockReply>,
    counters: Arc<Counters>,
}

impl MockInvoker {
    /// Creates an invoker answering instantly with the default text.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an invoker from configuration.
    pub fn from_config(config: MockConfig) -> Self {
        Self {
            config: Arc::new(config),
            ..Self::default()
        }
    }

    /// Scripts the reply to an exact prompt.
    pub fn with_reply(mut self, prompt: impl Into<String>, reply: MockReply) -> Self {
        Arc::make_mut(&mut self.replies).insert(prompt.into(), reply);
        self
    }

    /// Scripts the reply to every prompt without its own reply.
    pub fn with_default(mut self, reply: MockReply) -> Self {
        self.fallback = Some(reply);
        self
    }

    /// Returns the number of calls received so far.
    pub fn calls(&self) -> usize {
        self.counters.calls.load(Ordering::SeqCst)
    }

    /// Returns the highest number of calls that were in flight at once.
    pub fn peak_concurrency(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }

    fn reply_for(&self, prompt: &str) -> MockReply {
        if let Some(reply) = self.replies.get(prompt).or(self.fallback.as_ref()) {
            return reply.clone();
        }

        let text = self
            .config
            .mock_response
            .clone()
            .unwrap_or_else(|| DEFAULT_MOCK_RESPONSE.to_owned());
        MockReply::text(text).after(self.config.sample_latency())
    }
}

#[async_trait]
impl VariantInvoker for MockInvoker {
    async fn invoke(&self, _input: &PreparedInput, prompt: &str) -> Result<Option<String>> {
        let counters = &self.counters;
        counters.calls.fetch_add(1, Ordering::SeqCst);
        let active = counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak.fetch_max(active, Ordering::SeqCst);

        let reply = self.reply_for(prompt);
        if !reply.delay.is_zero() {
            tokio::time::sleep(reply.delay).await;
        }

        counters.active.fetch_sub(1, Ordering::SeqCst);

        match reply.outcome {
            MockOutcome::Text(text) => Ok(Some(text)),
            MockOutcome::Empty => Ok(None),
            MockOutcome::Fail(message) => Err(Error::invocation(message)),
            MockOutcome::Panic => panic!("mock invoker panicked on prompt '{prompt}'"),
        }
    }
}

/// Prompt source producing `prompt-1` through `prompt-{width}`.
///
/// Pairs with [`MockInvoker::with_reply`] to script individual slots.
pub fn numbered_prompts(_input: &VariantInput, width: usize) -> Result<Vec<String>> {
    Ok((1..=width).map(|slot| format!("prompt-{slot}")).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prepared() -> PreparedInput {
        VariantInput::png(&b"fabric"[..])
            .prepare()
            .expect("valid input")
    }

    #[tokio::test]
    async fn test_default_reply_uses_template() -> anyhow::Result<()> {
        let invoker = MockConfig {
            mock_response: Some("Silk charmeuse".into()),
            ..MockConfig::default()
        }
        .into_invoker();

        let text = invoker.invoke(&prepared(), "anything").await?;
        assert_eq!(text.as_deref(), Some("Silk charmeuse"));
        assert_eq!(invoker.calls(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let invoker = MockInvoker::new().with_reply("bad", MockReply::failure("quota"));
        let result = invoker.invoke(&prepared(), "bad").await;
        assert!(matches!(result, Err(Error::Invocation { .. })));
    }

    #[test]
    fn test_latency_stays_within_bounds() {
        let config = MockConfig {
            mock_response: None,
            min_latency_ms: 80,
            max_latency_ms: 20,
        };

        for _ in 0..32 {
            let latency = config.sample_latency();
            assert!(latency >= Duration::from_millis(20));
            assert!(latency <= Duration::from_millis(80));
        }
        assert_eq!(MockConfig::default().sample_latency(), Duration::ZERO);
    }
}
