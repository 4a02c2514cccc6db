use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::SvoTuple;

use super::rank;

/// Pairs reported per pairing.
const TOP_PAIRS: usize = 20;

#[derive(Debug, Clone, Serialize)]
pub struct PairStrength {
    pub left: String,
    pub right: String,
    pub count: usize,
    /// Co-occurrence share of all records.
    pub strength: f64,
    pub strong: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CorrelationReport {
    pub total: usize,
    pub subject_verb: Vec<PairStrength>,
    pub verb_object: Vec<PairStrength>,
    pub subject_object: Vec<PairStrength>,
    /// Distinct pairs seen per pairing, counted before the top-20 cut.
    pub subject_verb_total: usize,
    pub verb_object_total: usize,
    pub subject_object_total: usize,
    /// Strong pairs across all three pairings, counted before truncation.
    pub strong_pairs: usize,
}

pub fn analyze(records: &[SvoTuple], strong_threshold: f64) -> CorrelationReport {
    let total = records.len();
    let mut strong_pairs = 0;
    let mut pairing = |left: fn(&SvoTuple) -> &str, right: fn(&SvoTuple) -> &str| {
        let mut counts: BTreeMap<(String, String), usize> = BTreeMap::new();
        for record in records {
            let key = (left(record).to_string(), right(record).to_string());
            *counts.entry(key).or_insert(0) += 1;
        }
        let ranked = rank(counts);
        let distinct = ranked.len();
        strong_pairs += ranked
            .iter()
            .filter(|(_, count)| strength(*count, total) >= strong_threshold)
            .count();
        let top = ranked
            .into_iter()
            .take(TOP_PAIRS)
            .map(|((left, right), count)| {
                let strength = strength(count, total);
                PairStrength {
                    left,
                    right,
                    count,
                    strength,
                    strong: strength >= strong_threshold,
                }
            })
            .collect::<Vec<_>>();
        (top, distinct)
    };

    let (subject_verb, subject_verb_total) = pairing(|r| r.subject.as_str(), |r| r.verb.as_str());
    let (verb_object, verb_object_total) = pairing(|r| r.verb.as_str(), |r| r.object.as_str());
    let (subject_object, subject_object_total) =
        pairing(|r| r.subject.as_str(), |r| r.object.as_str());

    CorrelationReport {
        total,
        subject_verb,
        verb_object,
        subject_object,
        subject_verb_total,
        verb_object_total,
        subject_object_total,
        strong_pairs,
    }
}

fn strength(count: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    count as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExtractionMethod;

    fn record(s: &str, v: &str, o: &str) -> SvoTuple {
        SvoTuple::new(s, v, o, 0.8, ExtractionMethod::Structural)
    }

    #[test]
    fn pair_strength_is_count_over_total() {
        let records = vec![
            record("orchid", "needs", "water"),
            record("orchid", "needs", "light"),
            record("orchid", "needs", "water"),
            record("vanda", "prefers", "shade"),
        ];
        let report = analyze(&records, 0.7);
        assert_eq!(report.total, 4);

        let top = &report.subject_verb[0];
        assert_eq!((top.left.as_str(), top.right.as_str()), ("orchid", "needs"));
        assert_eq!(top.count, 3);
        assert!((top.strength - 0.75).abs() < 1e-9);
        assert!(top.strong);

        let vo = &report.verb_object[0];
        assert_eq!((vo.left.as_str(), vo.right.as_str()), ("needs", "water"));
        assert!((vo.strength - 0.5).abs() < 1e-9);
        assert!(!vo.strong);

        // distinct pairs per pairing, not record counts
        assert_eq!(report.subject_verb_total, 2);
        assert_eq!(report.verb_object_total, 3);
        assert_eq!(report.subject_object_total, 3);
    }

    #[test]
    fn strong_pairs_counts_every_pairing() {
        // one record: each of the three pairings has a single pair at 1.0
        let records = vec![record("orchid", "needs", "water")];
        let report = analyze(&records, 0.7);
        assert_eq!(report.strong_pairs, 3);
    }

    #[test]
    fn pair_lists_cap_at_twenty() {
        let records: Vec<_> = (0..30)
            .map(|i| record(&format!("species {i:02}"), "grows", &format!("spot {i:02}")))
            .collect();
        let report = analyze(&records, 0.9);
        assert_eq!(report.subject_verb.len(), 20);
        // the pre-truncation distinct count is still visible
        assert_eq!(report.subject_verb_total, 30);
        assert_eq!(report.strong_pairs, 0);
    }

    #[test]
    fn empty_input_reports_nothing() {
        let report = analyze(&[], 0.7);
        assert_eq!(report.total, 0);
        assert!(report.subject_verb.is_empty());
        assert_eq!(report.subject_verb_total, 0);
        assert_eq!(report.strong_pairs, 0);
    }
}
