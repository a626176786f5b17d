//! Join volunteer consensus with model predictions and score both against truth.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::category::{Category, Granularity, argmax};
use crate::reduce::CONSENSUS_COLUMNS;
use crate::table;
use crate::truth::normalize_truth;

/// Columns the prediction table must carry.
pub const PREDICTION_COLUMNS: [&str; 20] = [
    "subject_id",
    "filename",
    "run",
    "event",
    "truth_classification",
    "pred_skim",
    "pred_cascade",
    "pred_tgtrack",
    "pred_starttrack",
    "pred_stoptrack",
    "energy",
    "zenith",
    "oneweight",
    "signal_charge",
    "bg_charge",
    "qratio",
    "qtot",
    "max_score_val",
    "idx_max_score",
    "ntn_category",
];

/// Physical observables copied through untouched.
const OBSERVABLE_COLUMNS: [&str; 7] = [
    "energy",
    "zenith",
    "oneweight",
    "signal_charge",
    "bg_charge",
    "qratio",
    "qtot",
];

/// Consensus table row as read back from disk.
///
/// The category stays text: older consensus files may hold track subtypes
/// or lowercase names.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConsensusRecord {
    #[serde(deserialize_with = "table::lenient_id")]
    pub subject_id: Option<i64>,
    pub event_id: Option<String>,
    #[serde(rename = "data.num_votes")]
    pub num_votes: Option<u32>,
    #[serde(rename = "data.most_likely")]
    pub most_likely: Option<String>,
    #[serde(rename = "data.agreement")]
    pub agreement: Option<f64>,
}

/// Model prediction row. Observables are kept as text so they round-trip exactly.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PredictionRecord {
    #[serde(deserialize_with = "table::lenient_id")]
    pub subject_id: Option<i64>,
    pub filename: Option<String>,
    pub run: Option<String>,
    pub event: Option<String>,
    pub truth_classification: Option<String>,
    pub pred_skim: Option<f64>,
    pub pred_cascade: Option<f64>,
    pub pred_tgtrack: Option<f64>,
    pub pred_starttrack: Option<f64>,
    pub pred_stoptrack: Option<f64>,
    pub energy: Option<String>,
    pub zenith: Option<String>,
    pub oneweight: Option<String>,
    pub signal_charge: Option<String>,
    pub bg_charge: Option<String>,
    pub qratio: Option<String>,
    pub qtot: Option<String>,
    pub ntn_category: Option<String>,
}

impl PredictionRecord {
    pub fn scores(&self) -> ModelScores {
        ModelScores {
            pred_skim: self.pred_skim,
            pred_cascade: self.pred_cascade,
            pred_tgtrack: self.pred_tgtrack,
            pred_starttrack: self.pred_starttrack,
            pred_stoptrack: self.pred_stoptrack,
        }
    }

    fn observables(&self) -> [&Option<String>; 7] {
        [
            &self.energy,
            &self.zenith,
            &self.oneweight,
            &self.signal_charge,
            &self.bg_charge,
            &self.qratio,
            &self.qtot,
        ]
    }

    /// Truth from the model class column, falling back to the raw simulation label.
    fn truth(&self, granularity: Granularity) -> Option<Category> {
        self.ntn_category
            .as_deref()
            .and_then(Category::parse_model_index)
            .or_else(|| {
                self.truth_classification
                    .as_deref()
                    .and_then(|l| normalize_truth(l, granularity))
            })
            .map(|c| c.at(granularity))
    }
}

/// Per-subtype model scores as written by the network.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ModelScores {
    pub pred_skim: Option<f64>,
    pub pred_cascade: Option<f64>,
    pub pred_tgtrack: Option<f64>,
    pub pred_starttrack: Option<f64>,
    pub pred_stoptrack: Option<f64>,
}

impl ModelScores {
    fn get(&self, category: Category) -> Option<f64> {
        match category {
            Category::Skimming => self.pred_skim,
            Category::Cascade => self.pred_cascade,
            Category::ThroughgoingTrack => self.pred_tgtrack,
            Category::StartingTrack => self.pred_starttrack,
            Category::StoppingTrack => self.pred_stoptrack,
            Category::Track => {
                let parts = [self.pred_tgtrack, self.pred_starttrack, self.pred_stoptrack];
                if parts.iter().all(Option::is_none) {
                    None
                } else {
                    Some(parts.iter().flatten().sum())
                }
            }
        }
    }

    /// One score per category of the granularity, in precedence order.
    /// Coarse runs sum the three subtype scores into TRACK.
    pub fn per_category(&self, granularity: Granularity) -> Vec<(Category, Option<f64>)> {
        granularity
            .categories()
            .iter()
            .map(|&c| (c, self.get(c)))
            .collect()
    }
}

/// Highest score and its category; `None` when no score is present.
pub fn model_plurality(scores: &[(Category, Option<f64>)]) -> Option<(Category, f64)> {
    argmax(scores.iter().filter_map(|&(c, s)| s.map(|s| (c, s))))
}

/// What to write for an accuracy flag when one side is unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccuracyPolicy {
    /// Unknown counts as wrong.
    #[default]
    Zero,
    /// Unknown stays unknown (empty cell).
    Null,
}

impl AccuracyPolicy {
    fn score(self, predicted: Option<Category>, truth: Option<Category>) -> Option<u8> {
        match (predicted, truth) {
            (Some(p), Some(t)) => Some(u8::from(p == t)),
            _ => match self {
                Self::Zero => Some(0),
                Self::Null => None,
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConsolidateParams {
    pub granularity: Granularity,
    /// Minimum vote count; `None` or 0 disables the cut.
    pub retirement_limit: Option<u32>,
    pub agreement_cut: f64,
    pub unknown_accuracy: AccuracyPolicy,
}

/// One joined subject with its derived columns.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsolidatedRow {
    pub subject_id: i64,
    pub event_id: Option<String>,
    pub num_votes: Option<u32>,
    pub consensus: Option<Category>,
    pub agreement: Option<f64>,
    pub filename: Option<String>,
    pub run: Option<String>,
    pub event: Option<String>,
    pub truth_classification: Option<String>,
    pub scores: Vec<(Category, Option<f64>)>,
    pub observables: [Option<String>; 7],
    pub max_score: Option<f64>,
    pub model_category: Option<Category>,
    pub truth: Option<Category>,
    pub consensus_accuracy: Option<u8>,
    pub model_accuracy: Option<u8>,
}

impl ConsolidatedRow {
    /// Header row for the consolidated table at this granularity.
    pub fn headers(granularity: Granularity) -> Vec<String> {
        let mut headers: Vec<String> = CONSENSUS_COLUMNS.iter().map(|s| s.to_string()).collect();
        headers.extend(
            ["filename", "run", "event", "truth_classification"]
                .iter()
                .map(|s| s.to_string()),
        );
        headers.extend(
            granularity
                .categories()
                .iter()
                .map(|c| c.score_column().to_string()),
        );
        headers.extend(OBSERVABLE_COLUMNS.iter().map(|s| s.to_string()));
        headers.extend(
            [
                "max_score_val",
                "idx_max_score",
                "ntn_category",
                "consensus_accuracy",
                "model_accuracy",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        headers
    }

    /// Cells in `headers` order; nulls become empty cells.
    pub fn to_record(&self) -> Vec<String> {
        fn cell<T: ToString>(v: &Option<T>) -> String {
            v.as_ref().map(ToString::to_string).unwrap_or_default()
        }
        // Debug keeps the decimal point on whole numbers ("1.0", not "1")
        fn float(v: &Option<f64>) -> String {
            v.map(|x| format!("{x:?}")).unwrap_or_default()
        }

        let mut record = vec![
            self.subject_id.to_string(),
            cell(&self.event_id),
            cell(&self.num_votes),
            cell(&self.consensus),
            float(&self.agreement),
            cell(&self.filename),
            cell(&self.run),
            cell(&self.event),
            cell(&self.truth_classification),
        ];
        record.extend(self.scores.iter().map(|(_, s)| float(s)));
        record.extend(self.observables.iter().map(cell));
        record.extend([
            float(&self.max_score),
            cell(&self.model_category),
            cell(&self.truth),
            cell(&self.consensus_accuracy),
            cell(&self.model_accuracy),
        ]);
        record
    }
}

/// Joined rows plus how many each filter removed.
#[derive(Debug, Clone)]
pub struct Consolidation {
    pub rows: Vec<ConsolidatedRow>,
    /// Input rows (either table) without a readable subject id.
    pub unreadable_keys: usize,
    pub consensus_only: usize,
    pub prediction_only: usize,
    pub dropped_retired: usize,
    pub dropped_agreement: usize,
}

/// Outer-join consensus and predictions on subject id, then filter and score.
///
/// Rows come out ordered by subject id. The retirement cut only removes
/// rows that carry a vote count; the agreement cut removes every row whose
/// agreement is missing or below the cut.
pub fn consolidate(
    consensus: Vec<ConsensusRecord>,
    predictions: Vec<PredictionRecord>,
    params: ConsolidateParams,
) -> Consolidation {
    let g = params.granularity;

    let mut joined: BTreeMap<i64, (Option<ConsensusRecord>, Option<PredictionRecord>)> =
        BTreeMap::new();
    let mut unreadable_keys = 0;
    for (i, c) in consensus.into_iter().enumerate() {
        let Some(id) = c.subject_id else {
            log::debug!("Consensus row {}: unreadable subject_id, skipping", i + 2);
            unreadable_keys += 1;
            continue;
        };
        let slot = &mut joined.entry(id).or_default().0;
        if slot.is_some() {
            log::warn!("Duplicate consensus row for subject {id}, keeping the first");
        } else {
            *slot = Some(c);
        }
    }
    for (i, p) in predictions.into_iter().enumerate() {
        let Some(id) = p.subject_id else {
            log::debug!("Prediction row {}: unreadable subject_id, skipping", i + 2);
            unreadable_keys += 1;
            continue;
        };
        let slot = &mut joined.entry(id).or_default().1;
        if slot.is_some() {
            log::warn!("Duplicate prediction row for subject {id}, keeping the first");
        } else {
            *slot = Some(p);
        }
    }

    let consensus_only = joined.values().filter(|(c, p)| c.is_some() && p.is_none()).count();
    let prediction_only = joined.values().filter(|(c, p)| c.is_none() && p.is_some()).count();

    let limit = params.retirement_limit.filter(|&l| l > 0);
    let mut dropped_retired = 0;
    let mut dropped_agreement = 0;
    let mut rows = Vec::with_capacity(joined.len());

    for (subject_id, (c, p)) in joined {
        if let (Some(limit), Some(votes)) = (limit, c.as_ref().and_then(|c| c.num_votes)) {
            if votes < limit {
                dropped_retired += 1;
                continue;
            }
        }

        let c = c.unwrap_or_default();
        let consensus = c.most_likely.as_deref().and_then(|s| match s.parse::<Category>() {
            Ok(cat) => Some(cat.at(g)),
            Err(e) => {
                log::debug!("Subject {subject_id}: {e}");
                None
            }
        });

        let p = p.unwrap_or_default();
        let scores = p.scores().per_category(g);
        let model = model_plurality(&scores);
        let truth = p.truth(g);

        if !c.agreement.is_some_and(|a| a >= params.agreement_cut) {
            dropped_agreement += 1;
            continue;
        }

        let model_category = model.map(|(cat, _)| cat);
        rows.push(ConsolidatedRow {
            subject_id,
            event_id: c.event_id,
            num_votes: c.num_votes,
            consensus,
            agreement: c.agreement,
            observables: p.observables().map(Clone::clone),
            filename: p.filename,
            run: p.run,
            event: p.event,
            truth_classification: p.truth_classification,
            scores,
            max_score: model.map(|(_, s)| s),
            model_category,
            truth,
            consensus_accuracy: params.unknown_accuracy.score(consensus, truth),
            model_accuracy: params.unknown_accuracy.score(model_category, truth),
        });
    }

    Consolidation {
        rows,
        unreadable_keys,
        consensus_only,
        prediction_only,
        dropped_retired,
        dropped_agreement,
    }
}
