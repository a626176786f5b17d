use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Event classes shared by volunteer choices, truth labels, and model scores.
///
/// `Track` is the composite coarse class; the three track subtypes only
/// survive in a fine-grained run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Category {
    Skimming,
    Cascade,
    ThroughgoingTrack,
    StartingTrack,
    StoppingTrack,
    Track,
}

/// How finely track events are distinguished within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// Five classes, track subtypes kept apart.
    Fine,
    /// Three classes, track subtypes collapsed into TRACK.
    #[default]
    Coarse,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown category: {0:?}")]
pub struct CategoryParseError(pub String);

const FINE: [Category; 5] = [
    Category::Skimming,
    Category::Cascade,
    Category::ThroughgoingTrack,
    Category::StartingTrack,
    Category::StoppingTrack,
];

const COARSE: [Category; 3] = [Category::Skimming, Category::Cascade, Category::Track];

impl Granularity {
    /// Categories of this granularity in precedence order.
    ///
    /// Every plurality decision scans in this order and keeps the first
    /// category to reach a new strict maximum, so earlier entries win ties.
    pub fn categories(self) -> &'static [Category] {
        match self {
            Self::Fine => &FINE,
            Self::Coarse => &COARSE,
        }
    }

    pub fn contains(self, category: Category) -> bool {
        self.categories().contains(&category)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Fine => "5-way",
            Self::Coarse => "3-way",
        }
    }
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skimming => "SKIMMING",
            Self::Cascade => "CASCADE",
            Self::ThroughgoingTrack => "THROUGHGOINGTRACK",
            Self::StartingTrack => "STARTINGTRACK",
            Self::StoppingTrack => "STOPPINGTRACK",
            Self::Track => "TRACK",
        }
    }

    pub fn is_track(self) -> bool {
        matches!(
            self,
            Self::ThroughgoingTrack | Self::StartingTrack | Self::StoppingTrack | Self::Track
        )
    }

    /// Fold any track subtype into TRACK. Idempotent.
    pub fn collapse(self) -> Self {
        if self.is_track() { Self::Track } else { self }
    }

    /// Express this category at the given granularity.
    ///
    /// Collapsing only goes one way: a composite TRACK stays TRACK in a fine
    /// run, where it never equals a subtype and is not a tallyable class.
    pub fn at(self, granularity: Granularity) -> Self {
        match granularity {
            Granularity::Fine => self,
            Granularity::Coarse => self.collapse(),
        }
    }

    /// Model class index as written in the `ntn_category` column.
    pub fn from_model_index(index: i64) -> Option<Self> {
        match index {
            0 => Some(Self::Skimming),
            1 => Some(Self::Cascade),
            2 => Some(Self::ThroughgoingTrack),
            3 => Some(Self::StartingTrack),
            4 => Some(Self::StoppingTrack),
            _ => None,
        }
    }

    /// Parse a model class index cell, integral floats included.
    pub fn parse_model_index(cell: &str) -> Option<Self> {
        crate::table::parse_id(cell).and_then(Self::from_model_index)
    }

    /// Name of the per-category score column in the prediction tables.
    pub fn score_column(self) -> &'static str {
        match self {
            Self::Skimming => "pred_skim",
            Self::Cascade => "pred_cascade",
            Self::ThroughgoingTrack => "pred_tgtrack",
            Self::StartingTrack => "pred_starttrack",
            Self::StoppingTrack => "pred_stoptrack",
            Self::Track => "pred_track",
        }
    }

    /// Human-facing axis label.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Skimming => "Skimming",
            Self::Cascade => "Cascade",
            Self::ThroughgoingTrack => "Throughgoing Track",
            Self::StartingTrack => "Starting Track",
            Self::StoppingTrack => "Stopping Track",
            Self::Track => "Track",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = CategoryParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SKIMMING" => Ok(Self::Skimming),
            "CASCADE" => Ok(Self::Cascade),
            "THROUGHGOINGTRACK" => Ok(Self::ThroughgoingTrack),
            "STARTINGTRACK" => Ok(Self::StartingTrack),
            "STOPPINGTRACK" => Ok(Self::StoppingTrack),
            "TRACK" => Ok(Self::Track),
            _ => Err(CategoryParseError(s.to_string())),
        }
    }
}

/// First category holding the strict maximum value, scanning in the given
/// order. Returns `None` only for an empty input.
pub fn argmax<T: PartialOrd + Copy>(
    items: impl IntoIterator<Item = (Category, T)>,
) -> Option<(Category, T)> {
    let mut best: Option<(Category, T)> = None;
    for (category, value) in items {
        let replace = match best {
            None => true,
            Some((_, current)) => value > current,
        };
        if replace {
            best = Some((category, value));
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapse_is_idempotent() {
        for &c in FINE.iter().chain(COARSE.iter()) {
            assert_eq!(c.collapse().collapse(), c.collapse());
            assert_eq!(c.at(Granularity::Coarse).at(Granularity::Coarse), c.at(Granularity::Coarse));
        }
        assert_eq!(Category::Track.collapse(), Category::Track);
        assert_eq!(Category::Cascade.collapse(), Category::Cascade);
    }

    #[test]
    fn fine_keeps_subtypes() {
        assert_eq!(Category::StartingTrack.at(Granularity::Fine), Category::StartingTrack);
        assert_eq!(Category::StartingTrack.at(Granularity::Coarse), Category::Track);
        assert!(!Granularity::Fine.contains(Category::Track));
        assert!(Granularity::Coarse.contains(Category::Track));
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("track".parse::<Category>(), Ok(Category::Track));
        assert_eq!(" StoppingTrack ".parse::<Category>(), Ok(Category::StoppingTrack));
        assert!("BUNDLE".parse::<Category>().is_err());
    }

    #[test]
    fn model_index_accepts_integral_floats() {
        assert_eq!(Category::parse_model_index("2"), Some(Category::ThroughgoingTrack));
        assert_eq!(Category::parse_model_index("4.0"), Some(Category::StoppingTrack));
        assert_eq!(Category::parse_model_index("1.5"), None);
        assert_eq!(Category::parse_model_index("7"), None);
        assert_eq!(Category::parse_model_index(""), None);
    }

    #[test]
    fn argmax_prefers_earlier_category_on_tie() {
        let scanned = Granularity::Coarse
            .categories()
            .iter()
            .map(|&c| (c, if c == Category::Skimming { 0 } else { 3 }));
        assert_eq!(argmax(scanned), Some((Category::Cascade, 3)));

        let later_wins = [(Category::Skimming, 1), (Category::Cascade, 3), (Category::Track, 4)];
        assert_eq!(argmax(later_wins), Some((Category::Track, 4)));
    }

    #[test]
    fn argmax_of_equal_zero_values_is_first() {
        let items = [(Category::Skimming, 0.0), (Category::Cascade, 0.0)];
        assert_eq!(argmax(items), Some((Category::Skimming, 0.0)));
        assert_eq!(argmax(Vec::<(Category, f64)>::new()), None);
    }

    #[test]
    fn serde_names_match_display() {
        let json = serde_json::to_string(&Category::ThroughgoingTrack).unwrap();
        assert_eq!(json, "\"THROUGHGOINGTRACK\"");
        assert_eq!(Category::ThroughgoingTrack.to_string(), "THROUGHGOINGTRACK");
    }
}
