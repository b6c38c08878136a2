#![forbid(unsafe_code)]

//! # argqual-harness
//!
//! Inter-annotator agreement and consensus for argument quality ratings.
//!
//! Human and model raters score arguments on a taxonomy of quality
//! dimensions (1 = low, 2 = medium, 3 = high, `?` = cannot judge). This
//! crate derives the composite dimensions, collapses replicate raters into a
//! majority annotator, and measures reliability with ordinal Krippendorff's
//! alpha per dimension and pooled across dimensions.
//!
//! Model ratings are produced by prompting a [`rater::Rater`] and parsing
//! its free-text answer; unparseable answers are re-asked a bounded number
//! of times and every round is written to an audit log.

pub mod agreement;
pub mod annotate;
pub mod config;
pub mod consensus;
pub mod derived;
pub mod evaluation;
pub mod gateway;
pub mod prompts;
pub mod rater;
pub mod ratings;
pub mod store;
pub mod taxonomy;

pub use agreement::{
    ordinal_alpha, AgreementEngine, AgreementReport, AlphaUndefined, MemoryRatingSource,
    PairwiseAgreement, RatingSource, ReliabilityMatrix,
};
pub use annotate::{
    parse_response, AnnotateError, AnnotationJob, AuditSink, JsonlAuditSink, RetryController,
    MAX_ATTEMPTS,
};
pub use derived::RoundingMode;
pub use gateway::{ChatGateway, ProviderError, ProviderGateway};
pub use rater::{Rater, RaterSpec};
pub use ratings::{AnnotatorConfig, AnnotatorTable, RatingRecord, Score, Verdict};
pub use store::{DirectoryRatingSource, IngestError};
pub use taxonomy::{ExclusionSet, QualityDimension, Taxonomy};
