//! Volunteer trust: historical accuracy against simulation truth.
//!
//! Trust is measured over every decoded classification a volunteer made,
//! before any elapsed-time cut, so it must be computed from the full set.

use std::collections::{BTreeMap, HashSet};

use crate::category::Granularity;
use crate::decode::Annotation;
use crate::truth::TruthLookup;

/// Per-volunteer tally of classifications checked against truth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnnotatorRecord {
    pub correct: u32,
    pub total: u32,
}

impl AnnotatorRecord {
    /// `correct / total`, undefined for a volunteer with nothing attributed.
    pub fn accuracy(&self) -> Option<f64> {
        if self.total == 0 {
            None
        } else {
            Some(self.correct as f64 / self.total as f64)
        }
    }

    pub fn passes(&self, threshold: f64) -> bool {
        self.accuracy().is_some_and(|acc| acc >= threshold)
    }
}

/// Accumulate correct/total per volunteer over the export's listed subject
/// ids. A classification of a subject with unknown truth still counts
/// toward the total; one whose choice cannot be read is not attributed.
pub fn annotator_records(
    annotations: &[Annotation],
    truth: &TruthLookup,
    granularity: Granularity,
) -> BTreeMap<String, AnnotatorRecord> {
    let mut records: BTreeMap<String, AnnotatorRecord> = BTreeMap::new();
    for a in annotations {
        let Ok(choice) = a.choice.as_ref().copied() else {
            continue;
        };
        let record = records.entry(a.user.clone()).or_default();
        record.total += 1;
        let expected = a.listed_subject.and_then(|id| truth.get(id));
        if expected == Some(choice.at(granularity)) {
            record.correct += 1;
        }
    }
    records
}

/// Volunteers whose accuracy meets `threshold` (a fraction in `[0, 1]`).
pub fn trusted_annotators(
    records: &BTreeMap<String, AnnotatorRecord>,
    threshold: f64,
) -> HashSet<String> {
    records
        .iter()
        .filter(|(_, r)| r.passes(threshold))
        .map(|(user, _)| user.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::Category;
    use crate::decode::SkipReason;

    fn ann(user: &str, subject_id: i64, choice: Category, elapsed_secs: f64) -> Annotation {
        Annotation {
            user: user.into(),
            listed_subject: Some(subject_id),
            subject_id: Ok(subject_id),
            choice: Ok(choice),
            elapsed_secs: Ok(elapsed_secs),
        }
    }

    fn truth(g: Granularity) -> TruthLookup {
        TruthLookup::from_labels(
            [
                (1, Some("starting_track")),
                (2, Some("contained_hadron_cascade")),
                (3, None),
            ],
            g,
        )
    }

    #[test]
    fn subtype_choice_is_correct_for_collapsed_truth() {
        let anns = [ann("alice", 1, Category::StartingTrack, 10.0)];
        let records = annotator_records(&anns, &truth(Granularity::Coarse), Granularity::Coarse);
        assert_eq!(records["alice"], AnnotatorRecord { correct: 1, total: 1 });
    }

    #[test]
    fn fast_classifications_still_count_toward_trust() {
        let anns = [
            ann("alice", 1, Category::StartingTrack, 5.0),
            ann("alice", 2, Category::Cascade, 0.5),
        ];
        let records = annotator_records(&anns, &truth(Granularity::Coarse), Granularity::Coarse);
        assert_eq!(records["alice"], AnnotatorRecord { correct: 2, total: 2 });
    }

    #[test]
    fn broken_metadata_still_counts_toward_trust() {
        let mut a = ann("alice", 1, Category::StartingTrack, 0.0);
        a.elapsed_secs = Err(SkipReason::Metadata("eof".into()));
        a.subject_id = Err(SkipReason::SubjectData("no keys".into()));
        let mut unreadable = ann("alice", 2, Category::Cascade, 10.0);
        unreadable.choice = Err(SkipReason::Annotation("empty task list".into()));
        let mut unlisted = ann("alice", 2, Category::Cascade, 10.0);
        unlisted.listed_subject = None;

        let records = annotator_records(
            &[a, unreadable, unlisted],
            &truth(Granularity::Coarse),
            Granularity::Coarse,
        );
        assert_eq!(records["alice"], AnnotatorRecord { correct: 1, total: 2 });
    }

    #[test]
    fn unknown_truth_counts_in_total_only() {
        let anns = [
            ann("bob", 3, Category::Cascade, 10.0),
            ann("bob", 77, Category::Cascade, 10.0),
            ann("bob", 2, Category::Cascade, 10.0),
        ];
        let records = annotator_records(&anns, &truth(Granularity::Coarse), Granularity::Coarse);
        let bob = records["bob"];
        assert_eq!(bob, AnnotatorRecord { correct: 1, total: 3 });
        assert!((bob.accuracy().unwrap() - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn fine_run_distinguishes_subtypes() {
        let anns = [
            ann("carol", 1, Category::StoppingTrack, 10.0),
            ann("carol", 1, Category::Track, 10.0),
            ann("carol", 1, Category::StartingTrack, 10.0),
        ];
        let records = annotator_records(&anns, &truth(Granularity::Fine), Granularity::Fine);
        assert_eq!(records["carol"], AnnotatorRecord { correct: 1, total: 3 });
    }

    #[test]
    fn threshold_is_inclusive() {
        let mut records = BTreeMap::new();
        records.insert("half".to_string(), AnnotatorRecord { correct: 1, total: 2 });
        records.insert("low".to_string(), AnnotatorRecord { correct: 1, total: 4 });
        records.insert("perfect".to_string(), AnnotatorRecord { correct: 3, total: 3 });

        let trusted = trusted_annotators(&records, 0.5);
        assert!(trusted.contains("half"));
        assert!(trusted.contains("perfect"));
        assert!(!trusted.contains("low"));
    }

    #[test]
    fn zero_total_never_passes() {
        let mut records = BTreeMap::new();
        records.insert("ghost".to_string(), AnnotatorRecord::default());
        records.insert("wrong".to_string(), AnnotatorRecord { correct: 0, total: 5 });

        assert_eq!(AnnotatorRecord::default().accuracy(), None);
        let trusted = trusted_annotators(&records, 0.0);
        assert!(!trusted.contains("ghost"));
        assert!(trusted.contains("wrong"));
    }

    #[test]
    fn independent_of_order() {
        let mut anns = vec![
            ann("a", 1, Category::Track, 10.0),
            ann("b", 2, Category::Skimming, 10.0),
            ann("a", 2, Category::Cascade, 10.0),
            ann("b", 1, Category::ThroughgoingTrack, 10.0),
        ];
        let t = truth(Granularity::Coarse);
        let forward = annotator_records(&anns, &t, Granularity::Coarse);
        anns.reverse();
        let backward = annotator_records(&anns, &t, Granularity::Coarse);
        assert_eq!(forward, backward);
    }
}
