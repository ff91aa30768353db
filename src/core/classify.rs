//! Reduction of one photo's tag predictions into a classification record.
//!
//! Tags fall into two categories: direction tags (the closed set `in`/`out`)
//! and identity tags (everything else, including `Negative`). For each
//! category the highest probability wins; ties keep the tag seen first.

use crate::vision::TagPrediction;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Subject name meaning "no identity tag scored above zero".
pub const NEGATIVE_SUBJECT: &str = "Negative";

/// Direction of a visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
    /// No direction tag scored above zero
    #[default]
    Unknown,
}

impl Direction {
    /// Parse a direction tag name; `None` for identity tags.
    pub fn from_tag(tag: &str) -> Option<Self> {
        if tag.eq_ignore_ascii_case("in") {
            Some(Direction::In)
        } else if tag.eq_ignore_ascii_case("out") {
            Some(Direction::Out)
        } else {
            None
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::In => write!(f, "in"),
            Direction::Out => write!(f, "out"),
            Direction::Unknown => write!(f, "unknown"),
        }
    }
}

/// One photo's processed result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRecord {
    /// Best identity tag, or [`NEGATIVE_SUBJECT`]
    pub subject_name: String,
    pub subject_probability: f64,
    pub direction: Direction,
    pub direction_probability: f64,
    /// Originating photo
    pub photo_path: PathBuf,
}

impl ClassificationRecord {
    /// A record for a photo nothing was recognised in.
    pub fn negative(photo_path: impl Into<PathBuf>) -> Self {
        Self {
            subject_name: NEGATIVE_SUBJECT.to_string(),
            subject_probability: 0.0,
            direction: Direction::Unknown,
            direction_probability: 0.0,
            photo_path: photo_path.into(),
        }
    }

    /// A record with the given subject and no direction.
    pub fn subject(
        name: impl Into<String>,
        probability: f64,
        photo_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            subject_name: name.into(),
            subject_probability: probability,
            ..Self::negative(photo_path)
        }
    }

    /// Whether the subject is the negative sentinel.
    pub fn is_negative(&self) -> bool {
        self.subject_name == NEGATIVE_SUBJECT
    }

    /// Replace the direction fields with those of another classification.
    pub fn with_direction(mut self, direction: Direction, probability: f64) -> Self {
        self.direction = direction;
        self.direction_probability = probability;
        self
    }
}

/// Build the record for one photo from its tag predictions.
pub fn classify_record(tags: &[TagPrediction], photo_path: impl Into<PathBuf>) -> ClassificationRecord {
    let mut record = ClassificationRecord::negative(photo_path);

    for tag in tags {
        match Direction::from_tag(&tag.tag_name) {
            Some(direction) => {
                if tag.probability > record.direction_probability {
                    record.direction = direction;
                    record.direction_probability = tag.probability;
                }
            }
            None => {
                if tag.probability > record.subject_probability {
                    record.subject_name = tag.tag_name.clone();
                    record.subject_probability = tag.probability;
                }
            }
        }
    }

    record
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, f64)]) -> Vec<TagPrediction> {
        pairs
            .iter()
            .map(|(name, p)| TagPrediction::new(*name, *p))
            .collect()
    }

    #[test]
    fn test_no_tags_is_negative() {
        let record = classify_record(&[], "/cam/a.jpg");
        assert!(record.is_negative());
        assert_eq!(record.subject_probability, 0.0);
        assert_eq!(record.direction, Direction::Unknown);
        assert_eq!(record.photo_path, PathBuf::from("/cam/a.jpg"));
    }

    #[test]
    fn test_zero_probability_tags_keep_sentinel() {
        let record = classify_record(&tags(&[("Whiskers", 0.0), ("in", 0.0)]), "/cam/a.jpg");
        assert!(record.is_negative());
        assert_eq!(record.direction, Direction::Unknown);
    }

    #[test]
    fn test_identity_and_direction_are_separated() {
        let record = classify_record(
            &tags(&[
                ("Whiskers", 0.42),
                ("Out", 0.95),
                ("Mittens", 0.61),
                ("in", 0.12),
                ("Negative", 0.05),
            ]),
            "/cam/a.jpg",
        );
        assert_eq!(record.subject_name, "Mittens");
        assert_eq!(record.subject_probability, 0.61);
        assert_eq!(record.direction, Direction::Out);
        assert_eq!(record.direction_probability, 0.95);
    }

    #[test]
    fn test_ties_keep_first_seen() {
        let record = classify_record(
            &tags(&[("Whiskers", 0.5), ("Mittens", 0.5), ("in", 0.3), ("out", 0.3)]),
            "/cam/a.jpg",
        );
        assert_eq!(record.subject_name, "Whiskers");
        assert_eq!(record.direction, Direction::In);
    }

    #[test]
    fn test_negative_tag_can_win() {
        let record = classify_record(&tags(&[("Negative", 0.8), ("Whiskers", 0.1)]), "/cam/a.jpg");
        assert!(record.is_negative());
        assert_eq!(record.subject_probability, 0.8);
    }
}
