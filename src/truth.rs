//! Simulation truth labels → pipeline categories.
//!
//! The matched-simulation tables carry the fine-grained topology label of
//! each simulated event. Bundles are folded into the matching track subtype
//! and uncontained cascades count as skimming, since that is how volunteers
//! are asked to see them.

use std::collections::HashMap;

use crate::category::{Category, Granularity};

const TRUTH_LABELS: &[(&str, Category)] = &[
    ("throughgoing_track", Category::ThroughgoingTrack),
    ("throughgoing_bundle", Category::ThroughgoingTrack),
    ("stopping_track", Category::StoppingTrack),
    ("stopping_bundle", Category::StoppingTrack),
    ("starting_track", Category::StartingTrack),
    ("skimming_track", Category::Skimming),
    ("uncontained_cascade", Category::Skimming),
    ("contained_em_hadr_cascade", Category::Cascade),
    ("contained_hadron_cascade", Category::Cascade),
];

/// Map a raw truth label to its category at the given granularity.
/// Unmapped labels are unknown truth, never an error.
pub fn normalize_truth(label: &str, granularity: Granularity) -> Option<Category> {
    let label = label.trim();
    TRUTH_LABELS
        .iter()
        .find(|(raw, _)| *raw == label)
        .map(|(_, category)| category.at(granularity))
}

/// Subject id → normalized truth, built once per run from the matched table.
#[derive(Debug, Default, Clone)]
pub struct TruthLookup {
    truth: HashMap<i64, Option<Category>>,
}

impl TruthLookup {
    pub fn from_labels<'a>(
        rows: impl IntoIterator<Item = (i64, Option<&'a str>)>,
        granularity: Granularity,
    ) -> Self {
        let mut truth = HashMap::new();
        for (subject_id, label) in rows {
            let category = label.and_then(|l| normalize_truth(l, granularity));
            truth.entry(subject_id).or_insert(category);
        }
        Self { truth }
    }

    /// Known truth for a subject; `None` for unknown subjects and unmapped labels alike.
    pub fn get(&self, subject_id: i64) -> Option<Category> {
        self.truth.get(&subject_id).copied().flatten()
    }

    pub fn len(&self) -> usize {
        self.truth.len()
    }

    pub fn is_empty(&self) -> bool {
        self.truth.is_empty()
    }

    pub fn known_count(&self) -> usize {
        self.truth.values().filter(|t| t.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coarse_table() {
        for label in [
            "throughgoing_track",
            "stopping_track",
            "starting_track",
            "throughgoing_bundle",
            "stopping_bundle",
        ] {
            assert_eq!(normalize_truth(label, Granularity::Coarse), Some(Category::Track), "{label}");
        }
        assert_eq!(normalize_truth("skimming_track", Granularity::Coarse), Some(Category::Skimming));
        assert_eq!(normalize_truth("uncontained_cascade", Granularity::Coarse), Some(Category::Skimming));
        assert_eq!(
            normalize_truth("contained_em_hadr_cascade", Granularity::Coarse),
            Some(Category::Cascade)
        );
        assert_eq!(
            normalize_truth("contained_hadron_cascade", Granularity::Coarse),
            Some(Category::Cascade)
        );
    }

    #[test]
    fn fine_table_keeps_track_subtypes() {
        assert_eq!(
            normalize_truth("throughgoing_bundle", Granularity::Fine),
            Some(Category::ThroughgoingTrack)
        );
        assert_eq!(normalize_truth("stopping_bundle", Granularity::Fine), Some(Category::StoppingTrack));
        assert_eq!(normalize_truth("starting_track", Granularity::Fine), Some(Category::StartingTrack));
    }

    #[test]
    fn unmapped_labels_are_unknown() {
        assert_eq!(normalize_truth("double_bang", Granularity::Coarse), None);
        assert_eq!(normalize_truth("", Granularity::Fine), None);
        // Already-canonical names are not raw truth labels
        assert_eq!(normalize_truth("TRACK", Granularity::Coarse), None);
    }

    #[test]
    fn lookup_keeps_first_label_per_subject() {
        let lookup = TruthLookup::from_labels(
            [
                (1, Some("starting_track")),
                (2, None),
                (3, Some("mystery")),
                (1, Some("skimming_track")),
            ],
            Granularity::Coarse,
        );
        assert_eq!(lookup.len(), 3);
        assert_eq!(lookup.known_count(), 1);
        assert_eq!(lookup.get(1), Some(Category::Track));
        assert_eq!(lookup.get(2), None);
        assert_eq!(lookup.get(3), None);
        assert_eq!(lookup.get(99), None);
    }
}
