//! Best-of-burst selection.
//!
//! A burst is positive as soon as one photo names a subject. The winner is
//! the most probable positive photo, or the most probable negative one when
//! every photo came back negative. Comparisons are strict, so the first of
//! several equally probable photos wins.

use crate::core::classify::ClassificationRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Outcome of one flushed window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub winner: ClassificationRecord,
    /// At least one photo carried a non-negative subject
    pub is_positive: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecisionError {
    /// A flush was requested for a window without records
    #[error("cannot decide an empty window")]
    EmptyWindow,
}

/// Pick the record that best represents the burst.
pub fn select(records: &[ClassificationRecord]) -> Result<Decision, DecisionError> {
    let mut best_positive: Option<&ClassificationRecord> = None;
    let mut best_negative: Option<&ClassificationRecord> = None;

    for record in records {
        let slot = if record.is_negative() {
            &mut best_negative
        } else {
            &mut best_positive
        };
        let improves = match slot {
            Some(best) => record.subject_probability > best.subject_probability,
            None => true,
        };
        if improves {
            *slot = Some(record);
        }
    }

    match (best_positive, best_negative) {
        (Some(winner), _) => Ok(Decision {
            winner: winner.clone(),
            is_positive: true,
        }),
        (None, Some(winner)) => Ok(Decision {
            winner: winner.clone(),
            is_positive: false,
        }),
        (None, None) => Err(DecisionError::EmptyWindow),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classify::NEGATIVE_SUBJECT;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn record(name: &str, probability: f64, photo: &str) -> ClassificationRecord {
        ClassificationRecord::subject(name, probability, photo)
    }

    #[test]
    fn test_negative_only_window() {
        let window = vec![
            record(NEGATIVE_SUBJECT, 0.1, "1.jpg"),
            record(NEGATIVE_SUBJECT, 0.4, "2.jpg"),
            record(NEGATIVE_SUBJECT, 0.2, "3.jpg"),
        ];
        let decision = select(&window).unwrap();
        assert!(!decision.is_positive);
        assert_eq!(decision.winner, window[1]);
    }

    #[test]
    fn test_mixed_window_prefers_subject_and_first_tie() {
        let window = vec![
            record(NEGATIVE_SUBJECT, 0.9, "1.jpg"),
            record("Whiskers", 0.3, "2.jpg"),
            record("Whiskers", 0.3, "3.jpg"),
        ];
        let decision = select(&window).unwrap();
        assert!(decision.is_positive);
        assert_eq!(decision.winner, window[1]);
    }

    #[test]
    fn test_zero_probability_negatives_pick_first() {
        let window = vec![
            ClassificationRecord::negative("1.jpg"),
            ClassificationRecord::negative("2.jpg"),
        ];
        let decision = select(&window).unwrap();
        assert!(!decision.is_positive);
        assert_eq!(decision.winner.photo_path, window[0].photo_path);
    }

    #[test]
    fn test_empty_window_fails() {
        assert_eq!(select(&[]), Err(DecisionError::EmptyWindow));
    }

    /// Straight index-based scan used as the reference for the randomized check.
    fn reference_scan(records: &[ClassificationRecord]) -> (usize, bool) {
        let mut pos: Option<usize> = None;
        let mut neg: Option<usize> = None;
        let mut pos_p = -1.0;
        let mut neg_p = -1.0;
        for (i, r) in records.iter().enumerate() {
            if r.subject_name != NEGATIVE_SUBJECT {
                if r.subject_probability > pos_p {
                    pos_p = r.subject_probability;
                    pos = Some(i);
                }
            } else if r.subject_probability > neg_p {
                neg_p = r.subject_probability;
                neg = Some(i);
            }
        }
        match pos {
            Some(i) => (i, true),
            None => (neg.unwrap(), false),
        }
    }

    #[test]
    fn test_randomized_windows_match_reference_scan() {
        let mut rng = StdRng::seed_from_u64(0x11773);
        let names = [NEGATIVE_SUBJECT, NEGATIVE_SUBJECT, "Whiskers", "Mittens"];
        // Coarse buckets make duplicate maxima common.
        let buckets = [0.0, 0.25, 0.5, 0.75, 1.0];

        for round in 0..2_000 {
            let len = rng.gen_range(1..=8);
            let window: Vec<_> = (0..len)
                .map(|i| {
                    let name = names[rng.gen_range(0..names.len())];
                    let p = buckets[rng.gen_range(0..buckets.len())];
                    record(name, p, &format!("{round}-{i}.jpg"))
                })
                .collect();

            let (index, positive) = reference_scan(&window);
            let decision = select(&window).unwrap();
            assert_eq!(decision.is_positive, positive, "round {round}");
            assert_eq!(decision.winner.photo_path, window[index].photo_path, "round {round}");
        }
    }
}
