//! The text-generation capability consumed by annotation.
//!
//! A [`Rater`] turns prompts into free text. Which implementation backs it is
//! a configuration choice ([`RaterSpec`]); the annotation code depends only on
//! the trait.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::gateway::{
    Attribution, ChatGateway, ChatModel, ChatRequest, Message, ProviderError, ProviderGateway,
};

pub const DEFAULT_TEMPERATURE: f32 = 0.3;
pub const DEFAULT_MAX_TOKENS: u32 = 256;
pub const DEFAULT_CONCURRENCY: usize = 8;

#[async_trait]
pub trait Rater: Send + Sync {
    /// Source name used in annotator ids and output file names.
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String, ProviderError>;

    /// One result per prompt, in input order.
    async fn generate_all(&self, prompts: &[String]) -> Vec<Result<String, ProviderError>> {
        let futs: Vec<_> = prompts.iter().map(|p| self.generate(p)).collect();
        stream::iter(futs)
            .buffered(DEFAULT_CONCURRENCY)
            .collect()
            .await
    }
}

// =============================================================================
// Gateway-backed rater
// =============================================================================

/// Chat model behind a [`ChatGateway`]; the prompt is sent as one user message.
pub struct GatewayRater {
    name: String,
    model: ChatModel,
    gateway: Arc<dyn ChatGateway>,
    temperature: f32,
    max_tokens: u32,
    concurrency: usize,
    job_id: Option<Uuid>,
}

impl GatewayRater {
    pub fn new(name: impl Into<String>, model: ChatModel, gateway: Arc<dyn ChatGateway>) -> Self {
        Self {
            name: name.into(),
            model,
            gateway,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            concurrency: DEFAULT_CONCURRENCY,
            job_id: None,
        }
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = max;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    pub fn job(mut self, job_id: Uuid) -> Self {
        self.job_id = Some(job_id);
        self
    }

    fn request(&self, prompt: &str) -> ChatRequest {
        let mut attribution = Attribution::new("rater::generate");
        if let Some(job) = self.job_id {
            attribution = attribution.with_job(job);
        }
        ChatRequest::new(self.model.clone(), vec![Message::user(prompt)], attribution)
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
    }
}

#[async_trait]
impl Rater for GatewayRater {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        let resp = self.gateway.chat(self.request(prompt)).await?;
        Ok(resp.content)
    }

    async fn generate_all(&self, prompts: &[String]) -> Vec<Result<String, ProviderError>> {
        let futs: Vec<_> = prompts.iter().map(|p| self.generate(p)).collect();
        stream::iter(futs)
            .buffered(self.concurrency)
            .collect()
            .await
    }
}

// =============================================================================
// Simulated rater
// =============================================================================

const OPTION_ANSWERS: [&str; 3] = ["1 - Low", "2 - Medium", "3 - High"];

/// Offline behavior of a [`SimulatedRater`].
#[derive(Debug, Clone, PartialEq)]
pub enum SimulatedBehavior {
    /// Always the same text.
    Constant(String),
    /// The n-th call returns `responses[n % len]`.
    Sequence(Vec<String>),
    /// A random option; with probability `unparseable_rate`, text without one.
    Random { unparseable_rate: f64 },
}

/// Seeded rater for tests and dry runs.
pub struct SimulatedRater {
    name: String,
    behavior: SimulatedBehavior,
    rng: Mutex<StdRng>,
    calls: AtomicUsize,
}

impl SimulatedRater {
    pub fn new(name: impl Into<String>, behavior: SimulatedBehavior, seed: u64) -> Self {
        Self {
            name: name.into(),
            behavior,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn constant(name: impl Into<String>, response: impl Into<String>) -> Self {
        Self::new(name, SimulatedBehavior::Constant(response.into()), 0)
    }

    /// Number of `generate` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_random(&self, unparseable_rate: f64) -> String {
        let mut rng = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if rng.gen_bool(unparseable_rate.clamp(0.0, 1.0)) {
            return "I would rather not pick an option here.".to_string();
        }
        OPTION_ANSWERS[rng.gen_range(0..3)].to_string()
    }
}

#[async_trait]
impl Rater for SimulatedRater {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, _prompt: &str) -> Result<String, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(match &self.behavior {
            SimulatedBehavior::Constant(text) => text.clone(),
            SimulatedBehavior::Sequence(responses) if responses.is_empty() => String::new(),
            SimulatedBehavior::Sequence(responses) => responses[n % responses.len()].clone(),
            SimulatedBehavior::Random { unparseable_rate } => self.next_random(*unparseable_rate),
        })
    }

    async fn generate_all(&self, prompts: &[String]) -> Vec<Result<String, ProviderError>> {
        let mut out = Vec::with_capacity(prompts.len());
        for p in prompts {
            out.push(self.generate(p).await);
        }
        out
    }
}

// =============================================================================
// Configuration
// =============================================================================

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

/// Rater selection as written in a run configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RaterSpec {
    Openrouter {
        name: String,
        model: String,
        #[serde(default = "default_temperature")]
        temperature: f32,
        #[serde(default = "default_max_tokens")]
        max_tokens: u32,
        #[serde(default = "default_concurrency")]
        concurrency: usize,
    },
    Simulated {
        name: String,
        #[serde(default)]
        seed: u64,
        #[serde(default)]
        unparseable_rate: f64,
    },
}

impl RaterSpec {
    pub fn name(&self) -> &str {
        match self {
            RaterSpec::Openrouter { name, .. } | RaterSpec::Simulated { name, .. } => name,
        }
    }
}

/// Build the rater for `spec`. OpenRouter raters share `gateway` when given,
/// otherwise a gateway is created from the environment.
pub fn build_rater(
    spec: &RaterSpec,
    gateway: Option<Arc<dyn ChatGateway>>,
    job_id: Uuid,
) -> Result<Arc<dyn Rater>, ProviderError> {
    match spec {
        RaterSpec::Openrouter {
            name,
            model,
            temperature,
            max_tokens,
            concurrency,
        } => {
            let gateway = match gateway {
                Some(g) => g,
                None => Arc::new(ProviderGateway::from_env()?),
            };
            Ok(Arc::new(
                GatewayRater::new(name.clone(), ChatModel::openrouter(model.clone()), gateway)
                    .temperature(*temperature)
                    .max_tokens(*max_tokens)
                    .concurrency(*concurrency)
                    .job(job_id),
            ))
        }
        RaterSpec::Simulated {
            name,
            seed,
            unparseable_rate,
        } => Ok(Arc::new(SimulatedRater::new(
            name.clone(),
            SimulatedBehavior::Random {
                unparseable_rate: *unparseable_rate,
            },
            *seed,
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sequence_cycles_in_call_order() {
        let rater = SimulatedRater::new(
            "sim",
            SimulatedBehavior::Sequence(vec!["a".into(), "b".into()]),
            0,
        );
        let out = rater
            .generate_all(&["p1".into(), "p2".into(), "p3".into()])
            .await;
        let texts: Vec<String> = out.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(texts, vec!["a", "b", "a"]);
        assert_eq!(rater.calls(), 3);
    }

    #[tokio::test]
    async fn random_rater_is_seeded() {
        let a = SimulatedRater::new("a", SimulatedBehavior::Random { unparseable_rate: 0.2 }, 7);
        let b = SimulatedRater::new("b", SimulatedBehavior::Random { unparseable_rate: 0.2 }, 7);
        let prompts: Vec<String> = (0..20).map(|i| i.to_string()).collect();
        let ra: Vec<String> = a.generate_all(&prompts).await.into_iter().map(|r| r.unwrap()).collect();
        let rb: Vec<String> = b.generate_all(&prompts).await.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(ra, rb);
    }

    #[test]
    fn spec_from_toml_uses_defaults() {
        let spec: RaterSpec = toml::from_str(
            r#"
            kind = "openrouter"
            name = "GPT3"
            model = "openai/gpt-3.5-turbo"
            "#,
        )
        .unwrap();
        match spec {
            RaterSpec::Openrouter {
                temperature,
                max_tokens,
                ..
            } => {
                assert!((temperature - 0.3).abs() < 1e-6);
                assert_eq!(max_tokens, 256);
            }
            other => panic!("unexpected spec {other:?}"),
        }
    }
}
