#![forbid(unsafe_code)]

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use argqual_harness::agreement::distribution::RatingDistribution;
use argqual_harness::agreement::perfect::perfect_agreement;
use argqual_harness::agreement::sweep_configs;
use argqual_harness::annotate::{audit_log_path, AnnotationJob, AuditSink, JsonlAuditSink};
use argqual_harness::config::{load_config, AgreementConfig, AnnotateConfig};
use argqual_harness::derived::RoundingMode;
use argqual_harness::rater::{build_rater, Rater};
use argqual_harness::ratings::{AnnotatorConfig, PromptVariant};
use argqual_harness::store::{
    import_human_tsv, load_arguments, load_dimension_definitions, reparse_responses, write_jsonl,
    DirectoryRatingSource,
};
use argqual_harness::taxonomy::ExclusionSet;

#[derive(Parser)]
#[command(name = "argqual", version, about = "Argument quality agreement harness")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command that reads replicate files.
#[derive(clap::Args)]
struct AgreementArgs {
    /// TOML or JSON agreement config; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    ratings_dir: Option<PathBuf>,
    /// Replicate files read per population
    #[arg(long)]
    replicates: Option<usize>,
    /// Keep items that the reference exclusion list removes
    #[arg(long)]
    no_exclusions: bool,
    /// Round derived means half to even instead of half away from zero
    #[arg(long)]
    half_even: bool,
}

impl AgreementArgs {
    fn resolve(&self) -> Result<AgreementConfig, Box<dyn std::error::Error>> {
        let mut cfg: AgreementConfig = match &self.config {
            Some(path) => load_config(path)?,
            None => AgreementConfig::default(),
        };
        if let Some(dir) = &self.ratings_dir {
            cfg.ratings_dir = dir.clone();
        }
        if let Some(k) = self.replicates {
            cfg.replicates = k;
        }
        if self.no_exclusions {
            cfg.exclusions = ExclusionSet::empty();
        }
        if self.half_even {
            cfg.rounding = RoundingMode::HalfEven;
        }
        Ok(cfg)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Krippendorff's alpha over the given annotator populations
    Alpha {
        #[command(flatten)]
        agreement: AgreementArgs,
        /// source:variant[:reasoning][:majority], e.g. GPT3:novice:majority
        #[arg(long = "annotator")]
        annotators: Vec<String>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Alpha for every pair of configurations from sources × variants
    Sweep {
        #[command(flatten)]
        agreement: AgreementArgs,
        #[arg(long = "source", required = true)]
        sources: Vec<String>,
        /// Defaults to both variants
        #[arg(long = "variant")]
        variants: Vec<String>,
        #[arg(long)]
        out: PathBuf,
    },
    /// Rate arguments with the configured raters
    Annotate {
        #[arg(long)]
        config: PathBuf,
    },
    /// Recompute `rating` from `response` in a JSONL file
    Reparse {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    /// Split a human annotation TSV into replicate files
    ImportHuman {
        #[arg(long)]
        tsv: PathBuf,
        /// Annotator set name, e.g. novice or expert
        #[arg(long)]
        set: String,
        #[arg(long)]
        out_dir: PathBuf,
    },
    /// Alpha of a model majority on items where humans agree perfectly
    Perfect {
        #[command(flatten)]
        agreement: AgreementArgs,
        /// Human population, e.g. human:novice
        #[arg(long)]
        humans: String,
        /// Model population; its replicates are collapsed to a majority
        #[arg(long)]
        model: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Majority annotator of one population as JSONL records
    Consensus {
        #[command(flatten)]
        agreement: AgreementArgs,
        /// Population to collapse, e.g. GPT3:novice:reasoning
        #[arg(long)]
        annotator: String,
        #[arg(long)]
        out: PathBuf,
    },
    /// Rating value counts per population
    Distribution {
        #[command(flatten)]
        agreement: AgreementArgs,
        #[arg(long = "annotator", required = true)]
        annotators: Vec<String>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Run the synthetic reliability suite
    Eval {
        #[arg(long)]
        case: Option<String>,
        #[arg(long)]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Alpha {
            agreement,
            annotators,
            out,
        } => {
            let mut cfg = agreement.resolve()?;
            if !annotators.is_empty() {
                cfg.annotators = parse_annotators(&annotators)?;
            }
            if cfg.annotators.is_empty() {
                return Err("alpha requires --annotator or annotators in --config".into());
            }
            let source = DirectoryRatingSource::new(&cfg.ratings_dir);
            let report = cfg.engine().alphas(&source, &cfg.annotators)?;
            emit_json(out.as_deref(), &report)?;
        }
        Commands::Sweep {
            agreement,
            sources,
            variants,
            out,
        } => {
            let cfg = agreement.resolve()?;
            let variants = if variants.is_empty() {
                PromptVariant::ALL.to_vec()
            } else {
                variants
                    .iter()
                    .map(|v| parse_variant(v))
                    .collect::<Result<Vec<_>, _>>()?
            };
            let configs = sweep_configs(&sources, &variants);
            let source = DirectoryRatingSource::new(&cfg.ratings_dir);
            let pairs = cfg.engine().sweep(&source, &configs)?;
            let mut file = File::create(out)?;
            for pair in &pairs {
                writeln!(file, "{}", serde_json::to_string(pair)?)?;
            }
            info!(pairs = pairs.len(), "sweep complete");
        }
        Commands::Annotate { config } => {
            let cfg: AnnotateConfig = load_config(&config)?;
            if cfg.raters.is_empty() {
                return Err("annotate config lists no raters".into());
            }
            let arguments = load_arguments(&cfg.arguments)?;
            let dimensions = load_dimension_definitions(&cfg.dimensions)?;
            let job_id = Uuid::new_v4();
            let raters = cfg
                .raters
                .iter()
                .map(|spec| build_rater(spec, None, job_id))
                .collect::<Result<Vec<Arc<dyn Rater>>, _>>()?;

            std::fs::create_dir_all(&cfg.log_dir)?;
            let log_path = audit_log_path(&cfg.log_dir);
            let (sink, worker) = JsonlAuditSink::new(&log_path)?;
            info!(job = %job_id, log = %log_path.display(), "starting annotation");

            let outputs = {
                let audit: Arc<dyn AuditSink> = Arc::new(sink);
                AnnotationJob::new(arguments, dimensions, &cfg.out_dir)
                    .templates(cfg.prompt_templates()?)
                    .parallelism(cfg.parallelism)
                    .max_attempts(cfg.max_attempts)
                    .run(&raters, audit)
                    .await?
            };
            worker.join()?;
            for output in &outputs {
                println!("{}", serde_json::to_string(output)?);
            }
        }
        Commands::Reparse { input, out } => {
            let (lines, parsed) = reparse_responses(&input, &out)?;
            println!("reparsed {lines} lines; {parsed} with a rating");
        }
        Commands::ImportHuman { tsv, set, out_dir } => {
            for path in import_human_tsv(&tsv, &set, &out_dir)? {
                println!("{}", path.display());
            }
        }
        Commands::Perfect {
            agreement,
            humans,
            model,
            out,
        } => {
            let cfg = agreement.resolve()?;
            let engine = cfg.engine();
            let source = DirectoryRatingSource::new(&cfg.ratings_dir);
            let humans = parse_annotator(&humans)?;
            let model = parse_annotator(&model)?.majority();

            let human_tables = engine.replicate_tables(&source, &humans)?;
            let model_tables = engine.population(&source, &model)?;
            let Some(majority) = model_tables.first() else {
                return Err(format!("no replicate files for {model}").into());
            };
            let result = perfect_agreement(&human_tables, majority, engine.taxonomy().names());
            emit_json(out.as_deref(), &result)?;
        }
        Commands::Consensus {
            agreement,
            annotator,
            out,
        } => {
            let cfg = agreement.resolve()?;
            let source = DirectoryRatingSource::new(&cfg.ratings_dir);
            let config = parse_annotator(&annotator)?.majority();
            let rows = cfg.engine().population(&source, &config)?;
            let Some(majority) = rows.first() else {
                return Err(format!("no replicate files for {config}").into());
            };
            let records = majority.to_records();
            write_jsonl(&out, &records)?;
            info!(annotator = %majority.annotator, records = records.len(), "wrote consensus");
        }
        Commands::Distribution {
            agreement,
            annotators,
            out,
        } => {
            let cfg = agreement.resolve()?;
            let engine = cfg.engine();
            let source = DirectoryRatingSource::new(&cfg.ratings_dir);
            let mut dist = RatingDistribution::default();
            for config in parse_annotators(&annotators)? {
                let replicates = engine.replicate_tables(&source, &config)?;
                dist.add_population(config.label(), &replicates, engine.taxonomy().names());
            }
            emit_json(out.as_deref(), &dist)?;
        }
        Commands::Eval { case, out } => {
            let results = argqual_harness::evaluation::run_synthetic_suite(case.as_deref())?;
            let mut file = File::create(out)?;
            for result in &results {
                let line = serde_json::to_string(result)?;
                writeln!(file, "{line}")?;
            }
            let failed: Vec<&str> = results
                .iter()
                .filter(|r| !r.metrics.within_expected)
                .map(|r| r.case_name.as_str())
                .collect();
            if !failed.is_empty() {
                return Err(format!("alpha outside expected band: {}", failed.join(", ")).into());
            }
        }
    }

    Ok(())
}

fn emit_json<T: serde::Serialize>(out: Option<&Path>, value: &T) -> Result<(), io::Error> {
    let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
    match out {
        Some(path) => std::fs::write(path, json),
        None => {
            println!("{json}");
            Ok(())
        }
    }
}

fn parse_variant(raw: &str) -> Result<PromptVariant, String> {
    match raw {
        "expert" => Ok(PromptVariant::Expert),
        "novice" => Ok(PromptVariant::Novice),
        other => Err(format!("unknown prompt variant '{other}'")),
    }
}

/// `source:variant[:reasoning][:majority]`.
fn parse_annotator(raw: &str) -> Result<AnnotatorConfig, String> {
    let mut parts = raw.split(':');
    let source = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("annotator '{raw}' has no source"))?;
    let variant = parts
        .next()
        .ok_or_else(|| format!("annotator '{raw}' has no prompt variant"))?;
    let mut config = AnnotatorConfig::new(source, parse_variant(variant)?);
    for flag in parts {
        config = match flag {
            "reasoning" => config.reasoning(true),
            "majority" => config.majority(),
            other => return Err(format!("unknown annotator flag '{other}' in '{raw}'")),
        };
    }
    Ok(config)
}

fn parse_annotators(raw: &[String]) -> Result<Vec<AnnotatorConfig>, String> {
    raw.iter().map(|a| parse_annotator(a)).collect()
}
