//! Vote reduction: trusted, time-qualifying classifications → one consensus
//! row per known subject.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::category::{Category, Granularity, argmax};
use crate::decode::{Annotation, SkipReason};

/// Classifications at or under this many seconds are treated as reflex clicks.
pub const MIN_ELAPSED_SECS: f64 = 6.0;

/// Consensus output columns, in file order.
pub const CONSENSUS_COLUMNS: [&str; 5] = [
    "subject_id",
    "event_id",
    "data.num_votes",
    "data.most_likely",
    "data.agreement",
];

/// Votes per category for one subject, kept in precedence order.
#[derive(Debug, Clone, PartialEq)]
pub struct VoteTally {
    counts: Vec<(Category, u32)>,
}

impl VoteTally {
    /// Zero votes for every category of the granularity.
    pub fn new(granularity: Granularity) -> Self {
        Self {
            counts: granularity.categories().iter().map(|&c| (c, 0)).collect(),
        }
    }

    /// Count one vote. Returns false if the category is not tallied at this granularity.
    pub fn add(&mut self, category: Category) -> bool {
        match self.counts.iter_mut().find(|(c, _)| *c == category) {
            Some((_, n)) => {
                *n += 1;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, category: Category) -> u32 {
        self.counts
            .iter()
            .find(|(c, _)| *c == category)
            .map_or(0, |(_, n)| *n)
    }

    pub fn total(&self) -> u32 {
        self.counts.iter().map(|(_, n)| n).sum()
    }

    /// Plurality category and its vote count; `None` when nobody voted.
    pub fn plurality(&self) -> Option<(Category, u32)> {
        argmax(self.counts.iter().copied()).filter(|&(_, n)| n > 0)
    }

    /// Share of votes held by the plurality category, 0 with no votes.
    pub fn agreement(&self) -> f64 {
        let total = self.total();
        match self.plurality() {
            Some((_, max)) if total > 0 => max as f64 / total as f64,
            _ => 0.0,
        }
    }
}

/// One row of the consensus table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsensusRow {
    pub subject_id: i64,
    pub event_id: i64,
    #[serde(rename = "data.num_votes")]
    pub num_votes: u32,
    #[serde(rename = "data.most_likely")]
    pub most_likely: Option<Category>,
    #[serde(rename = "data.agreement")]
    pub agreement: f64,
}

impl ConsensusRow {
    fn from_tally(subject_id: i64, tally: &VoteTally) -> Self {
        let plurality = tally.plurality();
        Self {
            subject_id,
            event_id: subject_id,
            num_votes: plurality.map_or(0, |(_, n)| n),
            most_likely: plurality.map(|(c, _)| c),
            agreement: tally.agreement(),
        }
    }
}

/// Records that did not become votes, by diagnostic bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkipStats {
    /// Too fast, or metadata/timestamps unreadable.
    pub time: u64,
    /// Volunteer below the trust threshold.
    pub user: u64,
    /// Subject data unreadable or subject not in the known set.
    pub key: u64,
    /// Annotation unreadable or choice not tallied at this granularity.
    pub choice: u64,
}

impl SkipStats {
    pub fn record(&mut self, reason: &SkipReason) {
        match reason {
            SkipReason::Metadata(_) | SkipReason::Timestamp(_) => self.time += 1,
            SkipReason::SubjectData(_) => self.key += 1,
            SkipReason::Annotation(_) | SkipReason::UnknownChoice(_) => self.choice += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.time + self.user + self.key + self.choice
    }
}

/// Output table plus the diagnostics of how it was built.
#[derive(Debug, Clone)]
pub struct Reduction {
    pub rows: Vec<ConsensusRow>,
    pub votes_counted: u64,
    pub skipped: SkipStats,
}

#[derive(Debug, Clone, Copy)]
pub struct VoteParams {
    pub granularity: Granularity,
    /// Exclusive lower bound on elapsed seconds.
    pub min_elapsed_secs: f64,
}

impl Default for VoteParams {
    fn default() -> Self {
        Self {
            granularity: Granularity::default(),
            min_elapsed_secs: MIN_ELAPSED_SECS,
        }
    }
}

fn skip(skipped: &mut SkipStats, user: &str, reason: &SkipReason) {
    log::debug!("Skipping classification by {user}: {reason}");
    skipped.record(reason);
}

/// Tally trusted votes and derive one consensus row per known subject.
///
/// `subjects` fixes both the output set and its order; every subject gets a
/// row even with zero votes. Skips are checked in order: volunteer trust,
/// elapsed time, subject membership, tallyable choice.
pub fn aggregate_votes(
    annotations: &[Annotation],
    trusted: &HashSet<String>,
    subjects: &[i64],
    params: VoteParams,
) -> Reduction {
    let mut tallies: HashMap<i64, VoteTally> = subjects
        .iter()
        .map(|&id| (id, VoteTally::new(params.granularity)))
        .collect();

    let mut skipped = SkipStats::default();
    let mut votes_counted = 0u64;

    for a in annotations {
        if !trusted.contains(&a.user) {
            skipped.user += 1;
            continue;
        }
        match &a.elapsed_secs {
            Ok(secs) if *secs > params.min_elapsed_secs => {}
            Ok(_) => {
                skipped.time += 1;
                continue;
            }
            Err(reason) => {
                skip(&mut skipped, &a.user, reason);
                continue;
            }
        }
        let subject_id = match &a.subject_id {
            Ok(id) => *id,
            Err(reason) => {
                skip(&mut skipped, &a.user, reason);
                continue;
            }
        };
        let Some(tally) = tallies.get_mut(&subject_id) else {
            log::debug!("Subject {} not in matched table, skipping vote", subject_id);
            skipped.key += 1;
            continue;
        };
        let choice = match &a.choice {
            Ok(choice) => *choice,
            Err(reason) => {
                skip(&mut skipped, &a.user, reason);
                continue;
            }
        };
        if tally.add(choice.at(params.granularity)) {
            votes_counted += 1;
        } else {
            log::debug!(
                "Choice {} not tallied in a {} run (subject {})",
                choice,
                params.granularity.label(),
                subject_id
            );
            skipped.choice += 1;
        }
    }

    let mut seen = HashSet::with_capacity(subjects.len());
    let rows = subjects
        .iter()
        .filter(|id| seen.insert(**id))
        .filter_map(|id| tallies.get(id).map(|t| ConsensusRow::from_tally(*id, t)))
        .collect();

    Reduction {
        rows,
        votes_counted,
        skipped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ann(user: &str, subject_id: i64, choice: Category, elapsed_secs: f64) -> Annotation {
        Annotation {
            user: user.into(),
            listed_subject: Some(subject_id),
            subject_id: Ok(subject_id),
            choice: Ok(choice),
            elapsed_secs: Ok(elapsed_secs),
        }
    }

    fn trusted(users: &[&str]) -> HashSet<String> {
        users.iter().map(|u| u.to_string()).collect()
    }

    fn tally(counts: &[(Category, u32)]) -> VoteTally {
        let mut t = VoteTally::new(Granularity::Coarse);
        for &(c, n) in counts {
            for _ in 0..n {
                assert!(t.add(c));
            }
        }
        t
    }

    #[test]
    fn subtype_vote_lands_on_track() {
        let anns = [ann("alice", 7, Category::StartingTrack, 10.0)];
        let out = aggregate_votes(&anns, &trusted(&["alice"]), &[7], VoteParams::default());
        assert_eq!(out.votes_counted, 1);
        assert_eq!(
            out.rows,
            vec![ConsensusRow {
                subject_id: 7,
                event_id: 7,
                num_votes: 1,
                most_likely: Some(Category::Track),
                agreement: 1.0,
            }]
        );
    }

    #[test]
    fn cutoff_is_exclusive() {
        let anns = [
            ann("alice", 7, Category::Cascade, 5.0),
            ann("alice", 7, Category::Cascade, 6.0),
            ann("alice", 7, Category::Cascade, 6.001),
        ];
        let out = aggregate_votes(&anns, &trusted(&["alice"]), &[7], VoteParams::default());
        assert_eq!(out.votes_counted, 1);
        assert_eq!(out.skipped.time, 2);
        assert_eq!(out.rows[0].num_votes, 1);
    }

    #[test]
    fn every_known_subject_gets_a_row() {
        let anns = [ann("alice", 2, Category::Skimming, 30.0)];
        let out = aggregate_votes(&anns, &trusted(&["alice"]), &[1, 2, 3, 2], VoteParams::default());
        let ids: Vec<i64> = out.rows.iter().map(|r| r.subject_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        let empty = &out.rows[0];
        assert_eq!(empty.most_likely, None);
        assert_eq!(empty.num_votes, 0);
        assert_eq!(empty.agreement, 0.0);
    }

    #[test]
    fn skip_buckets() {
        let anns = [
            ann("mallory", 1, Category::Cascade, 30.0),
            ann("alice", 1, Category::Cascade, 2.0),
            ann("alice", 99, Category::Cascade, 30.0),
            ann("alice", 1, Category::Cascade, 30.0),
        ];
        let out = aggregate_votes(&anns, &trusted(&["alice"]), &[1], VoteParams::default());
        assert_eq!(
            out.skipped,
            SkipStats { time: 1, user: 1, key: 1, choice: 0 }
        );
        assert_eq!(out.votes_counted, 1);
    }

    #[test]
    fn checks_user_then_time_then_key_then_choice() {
        let broken = |user: &str| Annotation {
            user: user.into(),
            listed_subject: Some(1),
            subject_id: Err(SkipReason::SubjectData("no keys".into())),
            choice: Err(SkipReason::Annotation("empty task list".into())),
            elapsed_secs: Err(SkipReason::Metadata("eof".into())),
        };

        let mut bad_key = ann("alice", 1, Category::Cascade, 30.0);
        bad_key.subject_id = Err(SkipReason::SubjectData("2 keys".into()));
        bad_key.choice = Err(SkipReason::UnknownChoice("NOTSURE".into()));

        let mut bad_choice = ann("alice", 1, Category::Cascade, 30.0);
        bad_choice.choice = Err(SkipReason::UnknownChoice("NOTSURE".into()));

        let mut fast_bad_key = ann("alice", 1, Category::Cascade, 3.0);
        fast_bad_key.subject_id = Err(SkipReason::SubjectData("no keys".into()));

        let anns = [broken("mallory"), broken("alice"), bad_key, bad_choice, fast_bad_key];
        let out = aggregate_votes(&anns, &trusted(&["alice"]), &[1], VoteParams::default());
        assert_eq!(
            out.skipped,
            SkipStats { time: 2, user: 1, key: 1, choice: 1 }
        );
        assert_eq!(out.votes_counted, 0);
    }

    #[test]
    fn composite_track_is_not_a_fine_vote() {
        let params = VoteParams {
            granularity: Granularity::Fine,
            ..VoteParams::default()
        };
        let anns = [
            ann("alice", 1, Category::Track, 30.0),
            ann("alice", 1, Category::StoppingTrack, 30.0),
        ];
        let out = aggregate_votes(&anns, &trusted(&["alice"]), &[1], params);
        assert_eq!(out.skipped.choice, 1);
        assert_eq!(out.rows[0].most_likely, Some(Category::StoppingTrack));
    }

    #[test]
    fn tie_goes_to_earlier_category() {
        let t = tally(&[(Category::Track, 3), (Category::Cascade, 3)]);
        assert_eq!(t.get(Category::Track), 3);
        assert_eq!(t.get(Category::Skimming), 0);
        assert_eq!(t.total(), 6);
        assert_eq!(t.plurality(), Some((Category::Cascade, 3)));
        assert!((t.agreement() - 0.5).abs() < 1e-12);

        // Insertion order does not matter, only precedence
        let t = tally(&[(Category::Cascade, 3), (Category::Track, 3)]);
        assert_eq!(t.plurality(), Some((Category::Cascade, 3)));

        let t = tally(&[(Category::Track, 4), (Category::Cascade, 3)]);
        assert_eq!(t.plurality(), Some((Category::Track, 4)));
        assert!((t.agreement() - 4.0 / 7.0).abs() < 1e-12);
    }

    #[test]
    fn agreement_bounds() {
        let t = VoteTally::new(Granularity::Fine);
        assert_eq!(t.total(), 0);
        assert_eq!(t.plurality(), None);
        assert_eq!(t.agreement(), 0.0);

        let t = tally(&[(Category::Skimming, 1), (Category::Cascade, 1), (Category::Track, 1)]);
        let a = t.agreement();
        assert!((0.0..=1.0).contains(&a));
        assert_eq!(t.plurality(), Some((Category::Skimming, 1)));
    }

    #[test]
    fn skip_reasons_map_to_buckets() {
        let mut s = SkipStats::default();
        s.record(&SkipReason::Timestamp("x".into()));
        s.record(&SkipReason::Metadata("x".into()));
        s.record(&SkipReason::SubjectData("x".into()));
        s.record(&SkipReason::UnknownChoice("x".into()));
        s.record(&SkipReason::Annotation("x".into()));
        assert_eq!(s, SkipStats { time: 2, user: 0, key: 1, choice: 2 });
        assert_eq!(s.total(), 5);
    }
}
