//! On-disk formats: rating JSONL, replicate discovery, argument and
//! definition inputs, human annotation import and response re-parsing.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::agreement::RatingSource;
use crate::annotate::parser::parse_response;
use crate::prompts::Argument;
use crate::ratings::{numeric_verdict, AnnotatorConfig, RatingRecord};
use crate::taxonomy::QualityDimension;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}:{line}: malformed record: {source}")]
    MalformedRecord {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("{path}:{line}: {message}")]
    Tsv {
        path: PathBuf,
        line: usize,
        message: String,
    },
    #[error("bad replicate pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

impl IngestError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

// =============================================================================
// JSONL
// =============================================================================

fn open_lines(path: &Path) -> Result<impl Iterator<Item = (usize, std::io::Result<String>)>, IngestError> {
    let file = File::open(path).map_err(|e| IngestError::io(path, e))?;
    Ok(BufReader::new(file)
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l)))
}

/// Read rating records; a record that fails to decode aborts the read with
/// its line number.
pub fn read_rating_records(path: impl AsRef<Path>) -> Result<Vec<RatingRecord>, IngestError> {
    let path = path.as_ref();
    let mut records = Vec::new();
    for (line_no, line) in open_lines(path)? {
        let line = line.map_err(|e| IngestError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|source| IngestError::MalformedRecord {
            path: path.to_path_buf(),
            line: line_no,
            source,
        })?;
        records.push(record);
    }
    Ok(records)
}

pub fn write_jsonl<T: Serialize>(path: impl AsRef<Path>, rows: &[T]) -> Result<(), IngestError> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| IngestError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    for row in rows {
        let line = serde_json::to_string(row).map_err(|source| IngestError::MalformedRecord {
            path: path.to_path_buf(),
            line: 0,
            source,
        })?;
        writeln!(writer, "{line}").map_err(|e| IngestError::io(path, e))?;
    }
    writer.flush().map_err(|e| IngestError::io(path, e))
}

// =============================================================================
// Replicate files
// =============================================================================

/// Glob matching `<source>-<variant>[-reasoning]-<n>.jsonl`; `-` and `_` are
/// both accepted as separators.
pub fn replicate_pattern(dir: &Path, config: &AnnotatorConfig) -> String {
    let reasoning = if config.reasoning { "reasoning[-_]" } else { "" };
    let name = format!(
        "{}[-_]{}[-_]{reasoning}[0-9]*.jsonl",
        glob::Pattern::escape(&config.source),
        config.prompt_variant,
    );
    format!("{}/{name}", glob::Pattern::escape(&dir.to_string_lossy()))
}

fn trailing_index(path: &Path) -> Option<usize> {
    path.file_stem()?
        .to_str()?
        .rsplit(['-', '_'])
        .next()?
        .parse()
        .ok()
}

/// Replicate files of one population, sorted by their numeric suffix.
pub fn discover_replicate_files(
    dir: impl AsRef<Path>,
    config: &AnnotatorConfig,
    limit: usize,
) -> Result<Vec<PathBuf>, IngestError> {
    let pattern = replicate_pattern(dir.as_ref(), config);
    let mut files: Vec<(usize, PathBuf)> = glob::glob(&pattern)?
        .filter_map(Result::ok)
        .filter_map(|p| trailing_index(&p).map(|i| (i, p)))
        .collect();
    files.sort();
    Ok(files.into_iter().take(limit).map(|(_, p)| p).collect())
}

/// Path for the next replicate of `source`/`condition` in `dir`:
/// `<source>-<condition>-<highest existing + 1>.jsonl`.
pub fn next_replicate_path(
    dir: impl AsRef<Path>,
    source: &str,
    condition: &str,
) -> Result<PathBuf, IngestError> {
    let dir = dir.as_ref();
    let prefix = format!("{source}-{condition}-");
    let entries = fs::read_dir(dir).map_err(|e| IngestError::io(dir, e))?;
    let mut highest = 0usize;
    for entry in entries {
        let entry = entry.map_err(|e| IngestError::io(dir, e))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let index = name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(".jsonl"))
            .filter(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|n| n.parse::<usize>().ok());
        if let Some(index) = index {
            highest = highest.max(index);
        }
    }
    Ok(dir.join(format!("{prefix}{}.jsonl", highest + 1)))
}

/// Rating source over a directory of replicate files.
#[derive(Debug, Clone)]
pub struct DirectoryRatingSource {
    dir: PathBuf,
}

impl DirectoryRatingSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl RatingSource for DirectoryRatingSource {
    fn replicates(
        &self,
        config: &AnnotatorConfig,
        limit: usize,
    ) -> Result<Vec<Vec<RatingRecord>>, IngestError> {
        discover_replicate_files(&self.dir, config, limit)?
            .iter()
            .map(read_rating_records)
            .collect()
    }
}

// =============================================================================
// Inputs
// =============================================================================

/// Tab-separated `id, issue, stance, conclusion, argument` with a header row.
pub fn load_arguments(path: impl AsRef<Path>) -> Result<Vec<Argument>, IngestError> {
    let path = path.as_ref();
    let mut arguments = Vec::new();
    for (line_no, line) in open_lines(path)?.skip(1) {
        let line = line.map_err(|e| IngestError::io(path, e))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let cols: Vec<&str> = line.split('\t').collect();
        let [id, issue, stance, conclusion, argument] = cols.as_slice() else {
            return Err(IngestError::Tsv {
                path: path.to_path_buf(),
                line: line_no,
                message: format!("expected 5 columns, found {}", cols.len()),
            });
        };
        arguments.push(Argument {
            id: id.to_string(),
            issue: issue.to_string(),
            stance: stance.to_string(),
            conclusion: conclusion.to_string(),
            argument: argument.to_string(),
        });
    }
    Ok(arguments)
}

/// One [`QualityDimension`] per JSONL line.
pub fn load_dimension_definitions(
    path: impl AsRef<Path>,
) -> Result<Vec<QualityDimension>, IngestError> {
    let path = path.as_ref();
    let mut dims = Vec::new();
    for (line_no, line) in open_lines(path)? {
        let line = line.map_err(|e| IngestError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        dims.push(
            serde_json::from_str(&line).map_err(|source| IngestError::MalformedRecord {
                path: path.to_path_buf(),
                line: line_no,
                source,
            })?,
        );
    }
    Ok(dims)
}

// =============================================================================
// Human annotations
// =============================================================================

const SKIPPED_HUMAN_COLUMN: &str = "argumentative";

/// Split a human annotation TSV (`id, <ignored>, <dimensions...>`) into one
/// record list per annotator slot. Consecutive rows with the same id are
/// successive annotators of that item.
pub fn split_human_annotations(
    path: impl AsRef<Path>,
) -> Result<Vec<Vec<RatingRecord>>, IngestError> {
    let path = path.as_ref();
    let mut lines = open_lines(path)?;
    let header: Vec<String> = match lines.next() {
        Some((_, line)) => line
            .map_err(|e| IngestError::io(path, e))?
            .trim()
            .split('\t')
            .map(str::to_string)
            .collect(),
        None => return Ok(Vec::new()),
    };

    let mut slots: Vec<Vec<RatingRecord>> = Vec::new();
    let mut last_id: Option<String> = None;
    let mut slot = 0usize;

    for (line_no, line) in lines {
        let line = line.map_err(|e| IngestError::io(path, e))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let cols: Vec<&str> = line.split('\t').collect();
        let Some(id) = cols.first().copied() else {
            return Err(IngestError::Tsv {
                path: path.to_path_buf(),
                line: line_no,
                message: "missing id column".to_string(),
            });
        };

        slot = if last_id.as_deref() == Some(id) { slot + 1 } else { 0 };
        if slots.len() <= slot {
            slots.resize_with(slot + 1, Vec::new);
        }

        for (dim, cell) in header.iter().zip(cols.iter()).skip(2) {
            if dim == SKIPPED_HUMAN_COLUMN {
                continue;
            }
            let rating = cell.trim().parse::<f64>().ok().and_then(numeric_verdict);
            slots[slot].push(RatingRecord::new(id, dim.clone(), rating));
        }
        last_id = Some(id.to_string());
    }
    Ok(slots)
}

/// Write `human-<set>-<slot>.jsonl` files (slots numbered from 1).
pub fn import_human_tsv(
    path: impl AsRef<Path>,
    set: &str,
    out_dir: impl AsRef<Path>,
) -> Result<Vec<PathBuf>, IngestError> {
    let out_dir = out_dir.as_ref();
    fs::create_dir_all(out_dir).map_err(|e| IngestError::io(out_dir, e))?;
    let mut written = Vec::new();
    for (i, records) in split_human_annotations(path)?.iter().enumerate() {
        let out = out_dir.join(format!("human-{set}-{}.jsonl", i + 1));
        write_jsonl(&out, records)?;
        written.push(out);
    }
    tracing::info!(set, files = written.len(), "imported human annotations");
    Ok(written)
}

// =============================================================================
// Re-parsing
// =============================================================================

/// Recompute `rating` from `response` on every line of `input`, keeping all
/// other fields. Lines without a string `response` get `rating: null`.
/// Returns (lines, lines with a parsed rating).
pub fn reparse_responses(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
) -> Result<(usize, usize), IngestError> {
    let input = input.as_ref();
    let mut rows: Vec<serde_json::Value> = Vec::new();
    let mut parsed = 0;
    for (line_no, line) in open_lines(input)? {
        let line = line.map_err(|e| IngestError::io(input, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let mut row: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&line)
            .map_err(|source| IngestError::MalformedRecord {
                path: input.to_path_buf(),
                line: line_no,
                source,
            })?;
        let rating = row
            .get("response")
            .and_then(|r| r.as_str())
            .and_then(parse_response);
        if rating.is_some() {
            parsed += 1;
        }
        row.insert(
            "rating".to_string(),
            rating
                .map(|v| serde_json::Value::String(v.option().to_string()))
                .unwrap_or(serde_json::Value::Null),
        );
        rows.push(serde_json::Value::Object(row));
    }
    write_jsonl(output, &rows)?;
    Ok((rows.len(), parsed))
}

// =============================================================================
// TESTS
// =============================================================================
