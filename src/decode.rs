use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::category::Category;
use crate::table;

/// Sub-question asked after a volunteer picks the composite TRACK choice.
pub const TRACK_SUBTYPE_QUESTION: &str = "WHATTYPEOFTRACKISIT";

/// One row of the classification export, payloads still undecoded.
#[derive(Debug, Clone, Deserialize)]
pub struct RawAnnotation {
    pub user_name: String,
    #[serde(deserialize_with = "table::lenient_id")]
    pub subject_ids: Option<i64>,
    pub subject_data: String,
    pub annotations: String,
    pub metadata: String,
}

/// A volunteer classification with each payload decoded on its own.
///
/// A bad payload only spoils its own field, so later stages can decide in
/// their own order which failure a record is skipped for.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub user: String,
    /// Subject as listed in the export's id column.
    pub listed_subject: Option<i64>,
    /// Subject as keyed in the subject-data payload.
    pub subject_id: Result<i64, SkipReason>,
    /// Choice as given: a track subtype when the sub-question was answered,
    /// the composite TRACK otherwise.
    pub choice: Result<Category, SkipReason>,
    pub elapsed_secs: Result<f64, SkipReason>,
}

/// Why a record never reaches aggregation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SkipReason {
    #[error("subject data is not a single-key object: {0}")]
    SubjectData(String),
    #[error("annotation payload has no choice: {0}")]
    Annotation(String),
    #[error("unrecognized choice: {0}")]
    UnknownChoice(String),
    #[error("metadata payload unreadable: {0}")]
    Metadata(String),
    #[error("bad timestamp: {0}")]
    Timestamp(String),
}

#[derive(Deserialize)]
struct Task {
    value: Vec<TaskValue>,
}

#[derive(Deserialize)]
struct TaskValue {
    choice: String,
    #[serde(default)]
    answers: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct ClassificationMetadata {
    started_at: String,
    finished_at: String,
}

/// Decode one export row. Pure: the same row always decodes the same way.
pub fn decode(raw: &RawAnnotation) -> Annotation {
    Annotation {
        user: raw.user_name.clone(),
        listed_subject: raw.subject_ids,
        subject_id: subject_id(&raw.subject_data),
        choice: choice(&raw.annotations),
        elapsed_secs: elapsed_secs(&raw.metadata),
    }
}

/// The subject id is the sole key of the subject-data object.
pub fn subject_id(payload: &str) -> Result<i64, SkipReason> {
    let object: serde_json::Map<String, Value> =
        serde_json::from_str(payload).map_err(|e| SkipReason::SubjectData(e.to_string()))?;
    let mut keys = object.keys();
    match (keys.next(), keys.next()) {
        (Some(key), None) => table::parse_id(key)
            .ok_or_else(|| SkipReason::SubjectData(format!("non-numeric key {key:?}"))),
        (None, _) => Err(SkipReason::SubjectData("no keys".into())),
        (Some(_), Some(_)) => Err(SkipReason::SubjectData(format!("{} keys", object.len()))),
    }
}

/// Top-level choice of the first task, resolved through the track sub-question.
pub fn choice(payload: &str) -> Result<Category, SkipReason> {
    let tasks: Vec<Task> =
        serde_json::from_str(payload).map_err(|e| SkipReason::Annotation(e.to_string()))?;
    let value = tasks
        .into_iter()
        .next()
        .and_then(|t| t.value.into_iter().next())
        .ok_or_else(|| SkipReason::Annotation("empty task list".into()))?;

    let top: Category = value
        .choice
        .parse()
        .map_err(|_| SkipReason::UnknownChoice(value.choice.clone()))?;
    if top != Category::Track {
        return Ok(top);
    }

    // Unanswered sub-question leaves the composite choice in place
    match value.answers.get(TRACK_SUBTYPE_QUESTION).and_then(Value::as_str) {
        Some(subtype) => match subtype.parse::<Category>() {
            Ok(c) if c.is_track() => Ok(c),
            _ => Err(SkipReason::UnknownChoice(subtype.to_string())),
        },
        None => Ok(Category::Track),
    }
}

/// `finished_at - started_at` in seconds.
pub fn elapsed_secs(payload: &str) -> Result<f64, SkipReason> {
    let meta: ClassificationMetadata =
        serde_json::from_str(payload).map_err(|e| SkipReason::Metadata(e.to_string()))?;
    let start = parse_timestamp(&meta.started_at)?;
    let end = parse_timestamp(&meta.finished_at)?;
    let delta = end.signed_duration_since(start);
    // Microseconds overflow only past ~292k years
    Ok(match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => delta.num_milliseconds() as f64 / 1000.0,
    })
}

/// ISO-8601 timestamp; a trailing `Z` is UTC, a missing offset is taken as UTC.
fn parse_timestamp(s: &str) -> Result<DateTime<FixedOffset>, SkipReason> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt);
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc().fixed_offset())
        .ok_or_else(|| SkipReason::Timestamp(s.to_string()))
}
