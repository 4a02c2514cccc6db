use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::SvoTuple;

use super::rank;

/// How many entries each top list keeps.
const TOP_N: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct TermCount {
    pub value: String,
    pub count: usize,
    /// Fraction of all records carrying this value.
    pub share: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FrequencyReport {
    pub total: usize,
    pub top_subjects: Vec<TermCount>,
    pub top_verbs: Vec<TermCount>,
    pub top_objects: Vec<TermCount>,
    pub top_triples: Vec<TermCount>,
    pub subject_diversity: f64,
    pub verb_diversity: f64,
    pub object_diversity: f64,
}

pub fn analyze(records: &[SvoTuple]) -> FrequencyReport {
    let total = records.len();
    let subjects = counts(records, |r| r.subject.clone());
    let verbs = counts(records, |r| r.verb.clone());
    let objects = counts(records, |r| r.object.clone());
    let triples = counts(records, |r| {
        format!("{} {} {}", r.subject, r.verb, r.object)
    });

    FrequencyReport {
        total,
        subject_diversity: diversity(&subjects, total),
        verb_diversity: diversity(&verbs, total),
        object_diversity: diversity(&objects, total),
        top_subjects: top(subjects, total),
        top_verbs: top(verbs, total),
        top_objects: top(objects, total),
        top_triples: top(triples, total),
    }
}

fn counts(records: &[SvoTuple], key: impl Fn(&SvoTuple) -> String) -> BTreeMap<String, usize> {
    let mut map = BTreeMap::new();
    for record in records {
        *map.entry(key(record)).or_insert(0) += 1;
    }
    map
}

fn diversity(counts: &BTreeMap<String, usize>, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    counts.len() as f64 / total as f64
}

fn top(counts: BTreeMap<String, usize>, total: usize) -> Vec<TermCount> {
    rank(counts)
        .into_iter()
        .take(TOP_N)
        .map(|(value, count)| TermCount {
            value,
            count,
            share: if total == 0 {
                0.0
            } else {
                count as f64 / total as f64
            },
        })
        .collect()
}
