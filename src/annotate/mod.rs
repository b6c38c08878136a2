//! Producing rating records from model text.
//!
//! An [`AnnotationJob`] rates every argument on every dimension, once per
//! rater and prompt condition, and writes one replicate file per
//! (rater, condition) run.

pub mod audit;
pub mod parser;
pub mod retry;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::prompts::{Argument, PromptBuilder, PromptError, PromptTemplate, TEMPLATES};
use crate::rater::Rater;
use crate::ratings::RatingRecord;
use crate::store::{next_replicate_path, write_jsonl, IngestError};
use crate::taxonomy::QualityDimension;

pub use audit::{AuditEntry, AuditError, AuditSink, AuditWorker, JsonlAuditSink, MemoryAuditSink};
pub use parser::{parse_response, parse_response_detailed, ParseTier, ParsedResponse};
pub use retry::{DimensionPrompt, RetryController, MAX_ATTEMPTS};

#[derive(Debug, thiserror::Error)]
pub enum AnnotateError {
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error(transparent)]
    Audit(#[from] AuditError),
    #[error(transparent)]
    Ingest(#[from] IngestError),
}

/// `<log_dir>/log-<UTC timestamp>.jsonl`.
pub fn audit_log_path(log_dir: impl AsRef<Path>) -> PathBuf {
    let stamp = Utc::now().format("%Y-%m-%dT%H-%M-%S");
    log_dir.as_ref().join(format!("log-{stamp}.jsonl"))
}

/// Summary of one written replicate file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicateOutput {
    pub rater: String,
    pub condition: String,
    pub path: PathBuf,
    pub records: usize,
    pub unparseable: usize,
}

pub struct AnnotationJob {
    arguments: Vec<Argument>,
    dimensions: Vec<QualityDimension>,
    templates: Vec<PromptTemplate>,
    out_dir: PathBuf,
    parallelism: usize,
    max_attempts: u32,
}

impl AnnotationJob {
    pub fn new(
        arguments: Vec<Argument>,
        dimensions: Vec<QualityDimension>,
        out_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            arguments,
            dimensions,
            templates: TEMPLATES.to_vec(),
            out_dir: out_dir.into(),
            parallelism: 1,
            max_attempts: MAX_ATTEMPTS,
        }
    }

    pub fn templates(mut self, templates: Vec<PromptTemplate>) -> Self {
        self.templates = templates;
        self
    }

    /// Arguments in flight at once.
    pub fn parallelism(mut self, n: usize) -> Self {
        self.parallelism = n.max(1);
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n.max(1);
        self
    }

    /// Run every rater under every template. Builders are validated before
    /// any rater is called.
    pub async fn run(
        &self,
        raters: &[Arc<dyn Rater>],
        audit: Arc<dyn AuditSink>,
    ) -> Result<Vec<ReplicateOutput>, AnnotateError> {
        let builders = self
            .templates
            .iter()
            .map(|t| PromptBuilder::new(*t))
            .collect::<Result<Vec<_>, _>>()?;

        std::fs::create_dir_all(&self.out_dir).map_err(|source| IngestError::Io {
            path: self.out_dir.clone(),
            source,
        })?;

        let mut outputs = Vec::new();
        for rater in raters {
            let controller = RetryController::new(rater.clone(), audit.clone())
                .max_attempts(self.max_attempts);
            for builder in &builders {
                outputs.push(self.run_condition(rater.as_ref(), &controller, builder).await?);
            }
        }
        Ok(outputs)
    }

    async fn run_condition(
        &self,
        rater: &dyn Rater,
        controller: &RetryController,
        builder: &PromptBuilder,
    ) -> Result<ReplicateOutput, AnnotateError> {
        let condition = builder.template().condition();
        info!(
            rater = rater.name(),
            condition = %condition,
            arguments = self.arguments.len(),
            "annotating"
        );

        let per_argument: Vec<Vec<RatingRecord>> = stream::iter(self.arguments.iter())
            .map(|argument| {
                let prompts: Vec<DimensionPrompt> = self
                    .dimensions
                    .iter()
                    .map(|d| DimensionPrompt::new(d.dimension.clone(), builder.build(argument, d)))
                    .collect();
                async move { controller.resolve(&argument.id, &prompts).await }
            })
            .buffered(self.parallelism)
            .try_collect()
            .await?;
        let records: Vec<_> = per_argument.into_iter().flatten().collect();

        let path = next_replicate_path(&self.out_dir, rater.name(), &condition)?;
        write_jsonl(&path, &records)?;
        let unparseable = records.iter().filter(|r| r.rating.is_none()).count();
        info!(
            path = %path.display(),
            records = records.len(),
            unparseable,
            "wrote replicate"
        );

        Ok(ReplicateOutput {
            rater: rater.name().to_string(),
            condition,
            path,
            records: records.len(),
            unparseable,
        })
    }
}
