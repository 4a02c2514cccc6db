use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::SvoTuple;

use super::rank;

/// Values listed per field in each category summary.
const TOP_VALUES: usize = 3;
/// Bucket for records no keyword list claims.
pub const FALLBACK_CATEGORY: &str = "general";

#[derive(Debug, Clone, Serialize)]
pub struct CategorySummary {
    pub name: String,
    pub count: usize,
    /// Fraction of all records tagged with this category.
    pub share: f64,
    pub mean_confidence: f64,
    pub top_subjects: Vec<String>,
    pub top_verbs: Vec<String>,
    pub top_objects: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryReport {
    pub total: usize,
    /// Records matching at least one configured category.
    pub categorized: usize,
    pub categories: Vec<CategorySummary>,
}

/// Multi-label tagging: a record lands in every category whose keyword list
/// matches its text, and in the fallback bucket when none do.
pub fn analyze(
    records: &[SvoTuple],
    care_categories: &BTreeMap<String, Vec<String>>,
) -> CategoryReport {
    let total = records.len();
    let mut buckets: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    let mut categorized = 0usize;

    for (i, record) in records.iter().enumerate() {
        let text = format!("{} {} {}", record.subject, record.verb, record.object).to_lowercase();
        let mut matched = false;
        for (name, keywords) in care_categories {
            if keywords
                .iter()
                .any(|keyword| text.contains(&keyword.to_lowercase()))
            {
                buckets.entry(name.as_str()).or_default().push(i);
                matched = true;
            }
        }
        if matched {
            categorized += 1;
        } else {
            buckets.entry(FALLBACK_CATEGORY).or_default().push(i);
        }
    }

    let mut categories: Vec<CategorySummary> = buckets
        .into_iter()
        .map(|(name, rows)| summarize(name, &rows, records, total))
        .collect();
    categories.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));

    CategoryReport {
        total,
        categorized,
        categories,
    }
}

fn summarize(name: &str, rows: &[usize], records: &[SvoTuple], total: usize) -> CategorySummary {
    let top = |key: fn(&SvoTuple) -> &str| -> Vec<String> {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for &row in rows {
            *counts.entry(key(&records[row]).to_string()).or_insert(0) += 1;
        }
        rank(counts)
            .into_iter()
            .take(TOP_VALUES)
            .map(|(value, _)| value)
            .collect()
    };

    let mean_confidence = if rows.is_empty() {
        0.0
    } else {
        rows.iter().map(|&row| records[row].confidence).sum::<f64>() / rows.len() as f64
    };

    CategorySummary {
        name: name.to_string(),
        count: rows.len(),
        share: if total == 0 {
            0.0
        } else {
            rows.len() as f64 / total as f64
        },
        mean_confidence,
        top_subjects: top(|r| r.subject.as_str()),
        top_verbs: top(|r| r.verb.as_str()),
        top_objects: top(|r| r.object.as_str()),
    }
}
