//! Bounded re-asking of a rater until every dimension of an argument has an
//! answer.
//!
//! Each round sends the still-unresolved prompts in one `generate_all` batch.
//! A pair is committed as soon as its response parses, or once it has used
//! its last attempt, in which case the rating is committed as absent. A
//! transport error counts as an unparseable response for that round.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::rater::Rater;
use crate::ratings::RatingRecord;

use super::audit::{prompt_hash, AuditEntry, AuditError, AuditSink};
use super::parser::parse_response;

/// Attempts per (argument, dimension) before giving up.
pub const MAX_ATTEMPTS: u32 = 5;

/// The prompt for one dimension of one argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionPrompt {
    pub dimension: String,
    pub prompt: String,
}

impl DimensionPrompt {
    pub fn new(dimension: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            dimension: dimension.into(),
            prompt: prompt.into(),
        }
    }
}

pub struct RetryController {
    rater: Arc<dyn Rater>,
    audit: Arc<dyn AuditSink>,
    max_attempts: u32,
}

impl RetryController {
    pub fn new(rater: Arc<dyn Rater>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            rater,
            audit,
            max_attempts: MAX_ATTEMPTS,
        }
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n.max(1);
        self
    }

    /// Resolve every prompt of one argument. Records come back in prompt
    /// order; each carries the last raw response seen for its dimension.
    pub async fn resolve(
        &self,
        argument_id: &str,
        prompts: &[DimensionPrompt],
    ) -> Result<Vec<RatingRecord>, AuditError> {
        let mut committed: Vec<Option<RatingRecord>> = vec![None; prompts.len()];
        let mut pending: Vec<usize> = (0..prompts.len()).collect();
        let mut attempt = 0u32;

        while !pending.is_empty() {
            attempt += 1;
            let timestamp = Utc::now().to_rfc3339();
            let batch: Vec<String> = pending.iter().map(|&i| prompts[i].prompt.clone()).collect();

            let start = Instant::now();
            let mut responses = self.rater.generate_all(&batch).await.into_iter();
            let run_time = start.elapsed().as_secs_f64();

            let mut unresolved = Vec::new();
            for &i in &pending {
                let prompt = &prompts[i];
                let (text, error) = match responses.next() {
                    Some(Ok(text)) => (Some(text), None),
                    Some(Err(err)) => (None, Some(err.to_string())),
                    None => (None, Some("rater returned too few responses".to_string())),
                };
                let parsed = text.as_deref().and_then(parse_response);

                self.audit.record(AuditEntry {
                    timestamp: timestamp.clone(),
                    model: self.rater.name().to_string(),
                    run_time,
                    attempt,
                    argument_id: argument_id.to_string(),
                    dimension: prompt.dimension.clone(),
                    prompt_hash: prompt_hash(&prompt.prompt),
                    prompt: prompt.prompt.clone(),
                    response: text.clone(),
                    parsed_response: parsed.map(|v| v.option().to_string()),
                    error,
                })?;

                if parsed.is_none() && attempt < self.max_attempts {
                    unresolved.push(i);
                    continue;
                }

                if parsed.is_none() {
                    tracing::warn!(
                        argument = argument_id,
                        dimension = %prompt.dimension,
                        attempts = attempt,
                        "no parseable answer; committing absent rating"
                    );
                }
                let mut record = RatingRecord::new(argument_id, prompt.dimension.clone(), parsed);
                if let Some(text) = text {
                    record = record.with_response(text);
                }
                committed[i] = Some(record);
            }

            if !unresolved.is_empty() {
                tracing::debug!(
                    argument = argument_id,
                    attempt,
                    unresolved = unresolved.len(),
                    "re-asking unresolved dimensions"
                );
            }
            pending = unresolved;
        }

        Ok(committed.into_iter().flatten().collect())
    }
}

// =============================================================================
// TESTS
// =============================================================================
