//! Run configuration files.
//!
//! Files are TOML or JSON, chosen by extension. Every field has a default so
//! a config only needs to name what differs.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::agreement::AgreementEngine;
use crate::derived::RoundingMode;
use crate::prompts::{template_by_slug, PromptTemplate, TEMPLATES};
use crate::rater::RaterSpec;
use crate::ratings::AnnotatorConfig;
use crate::taxonomy::{ExclusionSet, Taxonomy};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse TOML config {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to parse JSON config {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unknown prompt template '{0}'")]
    UnknownTemplate(String),
}

/// Load `path` as TOML when it ends in `.toml`, JSON otherwise.
pub fn load_config<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let is_toml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("toml"));
    if is_toml {
        toml::from_str(&raw).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })
    } else {
        serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn default_replicates() -> usize {
    3
}

fn default_ratings_dir() -> PathBuf {
    PathBuf::from("data/ratings")
}

/// Agreement computation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgreementConfig {
    pub ratings_dir: PathBuf,
    /// Replicate files read per population.
    pub replicates: usize,
    pub rounding: RoundingMode,
    pub exclusions: ExclusionSet,
    pub annotators: Vec<AnnotatorConfig>,
}

impl Default for AgreementConfig {
    fn default() -> Self {
        Self {
            ratings_dir: default_ratings_dir(),
            replicates: default_replicates(),
            rounding: RoundingMode::default(),
            exclusions: ExclusionSet::reference(),
            annotators: Vec::new(),
        }
    }
}

impl AgreementConfig {
    pub fn engine(&self) -> AgreementEngine {
        AgreementEngine::new(Taxonomy::argument_quality(), self.exclusions.clone())
            .rounding(self.rounding)
            .replicates(self.replicates)
    }
}

/// Annotation job settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotateConfig {
    pub arguments: PathBuf,
    pub dimensions: PathBuf,
    pub out_dir: PathBuf,
    pub log_dir: PathBuf,
    /// Arguments annotated concurrently.
    pub parallelism: usize,
    pub max_attempts: u32,
    /// Template slugs; empty means all four.
    pub templates: Vec<String>,
    pub raters: Vec<RaterSpec>,
}

impl Default for AnnotateConfig {
    fn default() -> Self {
        Self {
            arguments: PathBuf::from("data/arguments.tsv"),
            dimensions: PathBuf::from("data/dimensions_definitions.jsonl"),
            out_dir: default_ratings_dir(),
            log_dir: PathBuf::from("data/logs"),
            parallelism: 1,
            max_attempts: crate::annotate::MAX_ATTEMPTS,
            templates: Vec::new(),
            raters: Vec::new(),
        }
    }
}

impl AnnotateConfig {
    pub fn prompt_templates(&self) -> Result<Vec<PromptTemplate>, ConfigError> {
        if self.templates.is_empty() {
            return Ok(TEMPLATES.to_vec());
        }
        self.templates
            .iter()
            .map(|slug| {
                template_by_slug(slug).ok_or_else(|| ConfigError::UnknownTemplate(slug.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratings::{Aggregation, PromptVariant};

    #[test]
    fn toml_agreement_config_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agreement.toml");
        std::fs::write(
            &path,
            r#"
            ratings_dir = "preds"

            [[annotators]]
            source = "human"
            prompt_variant = "novice"

            [[annotators]]
            source = "GPT3"
            prompt_variant = "novice"
            reasoning = true
            aggregation = "majority"
            "#,
        )
        .unwrap();
        let cfg: AgreementConfig = load_config(&path).unwrap();
        assert_eq!(cfg.ratings_dir, PathBuf::from("preds"));
        assert_eq!(cfg.replicates, 3);
        assert_eq!(cfg.exclusions.len(), 16);
        assert_eq!(cfg.annotators[1].aggregation, Aggregation::Majority);
        assert_eq!(cfg.annotators[0].prompt_variant, PromptVariant::Novice);
    }

    #[test]
    fn json_annotate_config_and_templates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("annotate.json");
        std::fs::write(
            &path,
            r#"{"templates": ["novice"], "raters": [{"kind": "simulated", "name": "sim", "seed": 3}]}"#,
        )
        .unwrap();
        let cfg: AnnotateConfig = load_config(&path).unwrap();
        assert_eq!(cfg.max_attempts, 5);
        assert_eq!(cfg.prompt_templates().unwrap().len(), 1);
        assert_eq!(cfg.raters[0].name(), "sim");

        let bad = AnnotateConfig {
            templates: vec!["haiku".into()],
            ..AnnotateConfig::default()
        };
        assert!(matches!(bad.prompt_templates(), Err(ConfigError::UnknownTemplate(_))));
    }
}
