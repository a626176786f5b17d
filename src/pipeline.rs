//! End-to-end runs: read tables, apply the pure steps, write one output.
//!
//! Every input is read and schema-checked before anything is computed, and
//! the output file is only created once the run has nothing left that can fail.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;

use crate::category::{Category, Granularity};
use crate::consolidate::{
    ConsolidateParams, ConsolidatedRow, ConsensusRecord, PredictionRecord, PREDICTION_COLUMNS,
    consolidate,
};
use crate::decode::{Annotation, RawAnnotation, decode};
use crate::matrix::ConfusionMatrix;
use crate::reduce::{CONSENSUS_COLUMNS, SkipStats, VoteParams, aggregate_votes};
use crate::table;
use crate::trust::{annotator_records, trusted_annotators};
use crate::truth::TruthLookup;

pub const ANNOTATION_COLUMNS: [&str; 5] =
    ["user_name", "subject_ids", "annotations", "subject_data", "metadata"];

pub const MATCHED_COLUMNS: [&str; 2] = ["subject_id", "#truth_classification_label"];

pub const MATRIX_COLUMNS: [&str; 3] = ["data.most_likely", "idx_max_score", "ntn_category"];

#[derive(Debug, Deserialize)]
struct MatchedRow {
    #[serde(deserialize_with = "table::lenient_id")]
    subject_id: Option<i64>,
    #[serde(rename = "#truth_classification_label")]
    truth_label: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MatrixRow {
    #[serde(rename = "data.most_likely")]
    consensus: Option<String>,
    idx_max_score: Option<String>,
    ntn_category: Option<String>,
}

/// Where a run writes: `<dir>/<stem>.csv`.
#[derive(Debug, Clone)]
pub struct OutputTarget {
    pub dir: PathBuf,
    pub stem: String,
}

impl OutputTarget {
    fn with_suffix(&self, suffix: &str) -> Self {
        Self {
            dir: self.dir.clone(),
            stem: format!("{}_{}", self.stem, suffix),
        }
    }

    fn path(&self) -> Result<PathBuf> {
        table::output_path(&self.dir, &self.stem)
            .with_context(|| format!("Failed to prepare output directory {}", self.dir.display()))
    }
}

pub struct ReduceJob {
    pub annotations: PathBuf,
    pub matched: PathBuf,
    pub output: OutputTarget,
    /// Minimum volunteer accuracy as a fraction.
    pub accuracy_threshold: f64,
    pub votes: VoteParams,
}

#[derive(Debug)]
pub struct ReduceReport {
    pub output: PathBuf,
    pub subjects: usize,
    /// Matched-table rows skipped for an unreadable subject id.
    pub unreadable_subjects: usize,
    pub classifications: usize,
    pub annotators: usize,
    pub trusted: usize,
    pub votes_counted: u64,
    pub skipped: SkipStats,
}

/// Classification export + matched truth → consensus table.
pub fn run_reduce(job: &ReduceJob) -> Result<ReduceReport> {
    let granularity = job.votes.granularity;

    let raw: Vec<RawAnnotation> = table::read_rows(&job.annotations, &ANNOTATION_COLUMNS)
        .context("Failed to read classification table")?;
    let matched: Vec<MatchedRow> = table::read_rows(&job.matched, &MATCHED_COLUMNS)
        .context("Failed to read matched table")?;

    let mut unreadable_subjects = 0;
    let matched: Vec<(i64, Option<&str>)> = matched
        .iter()
        .enumerate()
        .filter_map(|(i, m)| match m.subject_id {
            Some(id) => Some((id, m.truth_label.as_deref())),
            None => {
                log::debug!("Matched row {}: unreadable subject_id, skipping", i + 2);
                unreadable_subjects += 1;
                None
            }
        })
        .collect();

    let truth = TruthLookup::from_labels(matched.iter().copied(), granularity);
    let subjects: Vec<i64> = matched.iter().map(|(id, _)| *id).collect();
    log::info!(
        "{} subjects, {} with known truth ({} categories)",
        truth.len(),
        truth.known_count(),
        granularity.label()
    );

    let annotations = decode_all(&raw);

    let records = annotator_records(&annotations, &truth, granularity);
    let trusted = trusted_annotators(&records, job.accuracy_threshold);
    log::info!(
        "{} of {} volunteers meet accuracy {:.0}%",
        trusted.len(),
        records.len(),
        job.accuracy_threshold * 100.0
    );

    let reduction = aggregate_votes(&annotations, &trusted, &subjects, job.votes);

    let output = job.output.path()?;
    table::write_rows(&output, &reduction.rows)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    Ok(ReduceReport {
        output,
        subjects: reduction.rows.len(),
        unreadable_subjects,
        classifications: raw.len(),
        annotators: records.len(),
        trusted: trusted.len(),
        votes_counted: reduction.votes_counted,
        skipped: reduction.skipped,
    })
}

fn decode_all(raw: &[RawAnnotation]) -> Vec<Annotation> {
    let pb = ProgressBar::new(raw.len() as u64);
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}) {msg}",
    ) {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_message("Decoding...");

    let decoded: Vec<Annotation> = raw
        .iter()
        .map(|row| {
            let a = decode(row);
            pb.inc(1);
            a
        })
        .collect();

    pb.finish_with_message(format!("Decoded {} classifications", decoded.len()));
    decoded
}

pub struct ConsolidateJob {
    pub consensus: PathBuf,
    pub predictions: PathBuf,
    pub output: OutputTarget,
    pub params: ConsolidateParams,
}

#[derive(Debug)]
pub struct ConsolidateReport {
    pub output: PathBuf,
    pub rows: usize,
    pub unreadable_keys: usize,
    pub consensus_only: usize,
    pub prediction_only: usize,
    pub dropped_retired: usize,
    pub dropped_agreement: usize,
}

/// Consensus table + model predictions → consolidated table.
pub fn run_consolidate(job: &ConsolidateJob) -> Result<ConsolidateReport> {
    let consensus: Vec<ConsensusRecord> = table::read_rows(&job.consensus, &CONSENSUS_COLUMNS)
        .context("Failed to read consensus table")?;
    let predictions: Vec<PredictionRecord> =
        table::read_rows(&job.predictions, &PREDICTION_COLUMNS)
            .context("Failed to read prediction table")?;

    let out = consolidate(consensus, predictions, job.params);
    let header = ConsolidatedRow::headers(job.params.granularity);
    let records: Vec<Vec<String>> = out.rows.iter().map(ConsolidatedRow::to_record).collect();

    let output = job.output.path()?;
    table::write_records(&output, &header, &records)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    Ok(ConsolidateReport {
        output,
        rows: out.rows.len(),
        unreadable_keys: out.unreadable_keys,
        consensus_only: out.consensus_only,
        prediction_only: out.prediction_only,
        dropped_retired: out.dropped_retired,
        dropped_agreement: out.dropped_agreement,
    })
}

pub struct MatrixJob {
    pub consolidated: PathBuf,
    pub output: OutputTarget,
    pub granularity: Granularity,
}

#[derive(Debug)]
pub struct MatrixReport {
    pub consensus: ConfusionMatrix,
    pub model: ConfusionMatrix,
    pub consensus_output: PathBuf,
    pub model_output: PathBuf,
}

/// Consolidated table → consensus-vs-truth and model-vs-truth matrices.
pub fn run_matrix(job: &MatrixJob) -> Result<MatrixReport> {
    let rows: Vec<MatrixRow> = table::read_rows(&job.consolidated, &MATRIX_COLUMNS)
        .context("Failed to read consolidated table")?;
    let g = job.granularity;
    let categories = g.categories();

    let truth: Vec<Option<Category>> = rows
        .iter()
        .map(|r| r.ntn_category.as_deref().and_then(parse_truth_cell).map(|c| c.at(g)))
        .collect();
    let consensus = ConfusionMatrix::build(
        rows.iter()
            .zip(&truth)
            .map(|(r, t)| (parse_category_cell(r.consensus.as_deref(), g), *t)),
        categories,
    );
    let model = ConfusionMatrix::build(
        rows.iter()
            .zip(&truth)
            .map(|(r, t)| (parse_category_cell(r.idx_max_score.as_deref(), g), *t)),
        categories,
    );

    let consensus_output = write_matrix(&consensus, &job.output.with_suffix("consensus_matrix"))?;
    let model_output = write_matrix(&model, &job.output.with_suffix("model_matrix"))?;

    Ok(MatrixReport {
        consensus,
        model,
        consensus_output,
        model_output,
    })
}

fn parse_category_cell(cell: Option<&str>, g: Granularity) -> Option<Category> {
    cell.and_then(|s| s.parse::<Category>().ok()).map(|c| c.at(g))
}

/// Truth cells hold a category name, or a raw model class index in tables
/// that never went through consolidation.
fn parse_truth_cell(cell: &str) -> Option<Category> {
    cell.parse::<Category>()
        .ok()
        .or_else(|| Category::parse_model_index(cell))
}

fn write_matrix(matrix: &ConfusionMatrix, target: &OutputTarget) -> Result<PathBuf> {
    let path = target.path()?;
    let (header, rows) = matrix.table();
    table::write_records(&path, &header, &rows)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

/// Resolve a file name against an input directory; absolute paths pass through.
pub fn resolve(dir: &Path, file: &Path) -> PathBuf {
    if file.is_absolute() {
        file.to_path_buf()
    } else {
        dir.join(file)
    }
}
