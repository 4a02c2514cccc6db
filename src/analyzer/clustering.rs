use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::config::ClusteringConfig;
use crate::models::SvoTuple;

use super::rank;

/// Fixed seed keeps cluster assignments reproducible run to run.
const KMEANS_SEED: u64 = 42;
const MAX_ITERATIONS: usize = 100;
const TOP_TERMS: usize = 5;

// ── Vectorizer ──

/// Term-weight vectorizer over record text. Vocabulary is capped to the most
/// document-frequent terms and kept in sorted order so vector layouts are
/// stable across runs.
pub struct TfIdfVectorizer {
    vocab: Vec<String>,
    index: HashMap<String, usize>,
    idf: Vec<f64>,
}

impl TfIdfVectorizer {
    /// Returns `None` when the documents contain no usable terms.
    pub fn fit(docs: &[String], max_features: usize) -> Option<Self> {
        let n = docs.len();
        let mut df: BTreeMap<&str, usize> = BTreeMap::new();
        for doc in docs {
            let unique: HashSet<&str> = tokenize(doc).collect();
            for term in unique {
                *df.entry(term).or_insert(0) += 1;
            }
        }
        if df.is_empty() {
            return None;
        }

        let mut terms: Vec<(&str, usize)> = df.into_iter().collect();
        terms.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        terms.truncate(max_features.max(1));

        let mut selected: Vec<(String, usize)> = terms
            .into_iter()
            .map(|(term, count)| (term.to_string(), count))
            .collect();
        selected.sort_by(|a, b| a.0.cmp(&b.0));

        let vocab: Vec<String> = selected.iter().map(|(term, _)| term.clone()).collect();
        let idf: Vec<f64> = selected
            .iter()
            .map(|(_, count)| ((n as f64 + 1.0) / (*count as f64 + 1.0)).ln() + 1.0)
            .collect();
        let index = vocab
            .iter()
            .enumerate()
            .map(|(i, term)| (term.clone(), i))
            .collect();
        Some(Self { vocab, index, idf })
    }

    /// Raw term counts weighted by idf, L2-normalized.
    pub fn transform(&self, doc: &str) -> Vec<f64> {
        let mut vector = vec![0.0; self.vocab.len()];
        for token in tokenize(doc) {
            if let Some(&i) = self.index.get(token) {
                vector[i] += 1.0;
            }
        }
        for (i, weight) in vector.iter_mut().enumerate() {
            *weight *= self.idf[i];
        }
        l2_normalize(&mut vector);
        vector
    }

    pub fn terms(&self) -> &[String] {
        &self.vocab
    }
}

fn tokenize(doc: &str) -> impl Iterator<Item = &str> {
    doc.split(|c: char| !(c.is_alphanumeric() || c == '-'))
        .filter(|t| t.len() >= 2)
}

fn l2_normalize(vector: &mut [f64]) {
    let norm = vector.iter().map(|w| w * w).sum::<f64>().sqrt();
    if norm > 0.0 {
        for weight in vector.iter_mut() {
            *weight /= norm;
        }
    }
}

// ── K-means ──

#[derive(Debug, Clone, Serialize)]
pub struct ClusterSummary {
    pub id: usize,
    pub size: usize,
    pub top_terms: Vec<String>,
    pub dominant_subject: String,
    pub dominant_verb: String,
    pub dominant_object: String,
    pub mean_confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusteringReport {
    pub total: usize,
    /// Occupied clusters after convergence; can be below the configured count.
    pub k: usize,
    pub silhouette: f64,
    pub clusters: Vec<ClusterSummary>,
}

pub fn analyze(records: &[SvoTuple], config: &ClusteringConfig) -> Result<ClusteringReport> {
    let floor = config.min_cluster_size.max(1);
    if records.len() < floor {
        bail!(
            "insufficient data: {} records, need at least {}",
            records.len(),
            floor
        );
    }

    let docs: Vec<String> = records
        .iter()
        .map(|r| format!("{} {} {}", r.subject, r.verb, r.object))
        .collect();
    let Some(vectorizer) = TfIdfVectorizer::fit(&docs, config.max_features) else {
        bail!("insufficient data: no usable vocabulary");
    };
    let vectors: Vec<Vec<f64>> = docs.iter().map(|d| vectorizer.transform(d)).collect();

    let k = config.n_clusters.clamp(1, records.len());
    let mut rng = StdRng::seed_from_u64(KMEANS_SEED);
    let (centroids, assignments) = kmeans(&vectors, k, &mut rng);

    let mut members: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, cluster) in assignments.iter().enumerate() {
        members.entry(*cluster).or_default().push(i);
    }

    let mut clusters: Vec<ClusterSummary> = members
        .iter()
        .map(|(&id, rows)| summarize(id, rows, records, &centroids[id], vectorizer.terms()))
        .collect();
    clusters.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.id.cmp(&b.id)));

    Ok(ClusteringReport {
        total: records.len(),
        k: members.len(),
        silhouette: silhouette(&vectors, &assignments, k),
        clusters,
    })
}

/// Lloyd iterations with seeded random init. Empty clusters are reseeded from
/// a random document, which forces at least one more assignment round.
fn kmeans(vectors: &[Vec<f64>], k: usize, rng: &mut StdRng) -> (Vec<Vec<f64>>, Vec<usize>) {
    let n = vectors.len();
    let dim = vectors[0].len();
    let mut centroids: Vec<Vec<f64>> = rand::seq::index::sample(rng, n, k)
        .into_iter()
        .map(|i| vectors[i].clone())
        .collect();
    let mut assignments = vec![0usize; n];

    for _ in 0..MAX_ITERATIONS {
        let mut changed = false;
        for (i, vector) in vectors.iter().enumerate() {
            let best = nearest(vector, &centroids);
            if assignments[i] != best {
                assignments[i] = best;
                changed = true;
            }
        }

        let mut sums = vec![vec![0.0; dim]; k];
        let mut counts = vec![0usize; k];
        for (i, vector) in vectors.iter().enumerate() {
            let cluster = assignments[i];
            counts[cluster] += 1;
            for (d, weight) in vector.iter().enumerate() {
                sums[cluster][d] += weight;
            }
        }
        for cluster in 0..k {
            if counts[cluster] == 0 {
                centroids[cluster] = vectors[rng.random_range(0..n)].clone();
                changed = true;
            } else {
                for d in 0..dim {
                    sums[cluster][d] /= counts[cluster] as f64;
                }
                centroids[cluster] = std::mem::take(&mut sums[cluster]);
            }
        }

        if !changed {
            break;
        }
    }
    (centroids, assignments)
}

/// Ties go to the lowest cluster index, keeping assignment deterministic.
fn nearest(vector: &[f64], centroids: &[Vec<f64>]) -> usize {
    let mut best = 0;
    let mut best_distance = f64::INFINITY;
    for (cluster, centroid) in centroids.iter().enumerate() {
        let distance = squared_distance(vector, centroid);
        if distance < best_distance {
            best_distance = distance;
            best = cluster;
        }
    }
    best
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum()
}

/// Mean silhouette coefficient. Zero when fewer than two clusters are
/// occupied; singleton members contribute zero.
fn silhouette(vectors: &[Vec<f64>], assignments: &[usize], k: usize) -> f64 {
    let n = vectors.len();
    let mut counts = vec![0usize; k];
    for &cluster in assignments {
        counts[cluster] += 1;
    }
    if counts.iter().filter(|&&c| c > 0).count() < 2 {
        return 0.0;
    }

    let mut total = 0.0;
    for i in 0..n {
        let own = assignments[i];
        if counts[own] <= 1 {
            continue;
        }
        let mut sums = vec![0.0; k];
        for j in 0..n {
            if i != j {
                sums[assignments[j]] += squared_distance(&vectors[i], &vectors[j]).sqrt();
            }
        }
        let a = sums[own] / (counts[own] - 1) as f64;
        let b = (0..k)
            .filter(|&c| c != own && counts[c] > 0)
            .map(|c| sums[c] / counts[c] as f64)
            .fold(f64::INFINITY, f64::min);
        if b.is_finite() && a.max(b) > 0.0 {
            total += (b - a) / a.max(b);
        }
    }
    total / n as f64
}

fn summarize(
    id: usize,
    rows: &[usize],
    records: &[SvoTuple],
    centroid: &[f64],
    terms: &[String],
) -> ClusterSummary {
    let mut weighted: Vec<(usize, f64)> = centroid
        .iter()
        .enumerate()
        .filter(|(_, w)| **w > 0.0)
        .map(|(i, w)| (i, *w))
        .collect();
    weighted.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| terms[a.0].cmp(&terms[b.0]))
    });
    let top_terms: Vec<String> = weighted
        .into_iter()
        .take(TOP_TERMS)
        .map(|(i, _)| terms[i].clone())
        .collect();

    let mode = |key: fn(&SvoTuple) -> &str| -> String {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for &row in rows {
            *counts.entry(key(&records[row]).to_string()).or_insert(0) += 1;
        }
        rank(counts)
            .into_iter()
            .next()
            .map(|(value, _)| value)
            .unwrap_or_default()
    };

    let mean_confidence = if rows.is_empty() {
        0.0
    } else {
        rows.iter().map(|&row| records[row].confidence).sum::<f64>() / rows.len() as f64
    };

    ClusterSummary {
        id,
        size: rows.len(),
        top_terms,
        dominant_subject: mode(|r| r.subject.as_str()),
        dominant_verb: mode(|r| r.verb.as_str()),
        dominant_object: mode(|r| r.object.as_str()),
        mean_confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExtractionMethod;

    fn record(s: &str, v: &str, o: &str) -> SvoTuple {
        SvoTuple::new(s, v, o, 0.8, ExtractionMethod::Structural)
    }

    fn two_groups() -> Vec<SvoTuple> {
        let mut records = Vec::new();
        for _ in 0..4 {
            records.push(record("orchid", "needs", "water"));
        }
        for _ in 0..4 {
            records.push(record("cattleya", "prefers", "light"));
        }
        records
    }

    fn config(n_clusters: usize, min_cluster_size: usize) -> ClusteringConfig {
        ClusteringConfig {
            n_clusters,
            max_features: 100,
            min_cluster_size,
        }
    }

    #[test]
    fn too_few_records_is_an_error() {
        let records = vec![record("orchid", "needs", "water")];
        let err = analyze(&records, &config(5, 3)).unwrap_err();
        assert!(err.to_string().contains("insufficient data"));
    }

    #[test]
    fn two_identical_groups_split_cleanly() {
        let report = analyze(&two_groups(), &config(2, 3)).unwrap();
        assert_eq!(report.total, 8);
        assert_eq!(report.k, 2);

        let mut sizes: Vec<usize> = report.clusters.iter().map(|c| c.size).collect();
        sizes.sort();
        assert_eq!(sizes, vec![4, 4]);

        let objects: HashSet<&str> = report
            .clusters
            .iter()
            .map(|c| c.dominant_object.as_str())
            .collect();
        assert!(objects.contains("water") && objects.contains("light"));
        // identical vectors inside each group give a perfect separation score
        assert!(report.silhouette > 0.9, "silhouette {}", report.silhouette);
    }

    #[test]
    fn same_input_gives_identical_output() {
        let records = two_groups();
        let a = analyze(&records, &config(3, 3)).unwrap();
        let b = analyze(&records, &config(3, 3)).unwrap();
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn cluster_count_never_exceeds_record_count() {
        let records = vec![
            record("orchid", "needs", "water"),
            record("vanda", "prefers", "light"),
            record("cattleya", "requires", "warmth"),
        ];
        let report = analyze(&records, &config(10, 1)).unwrap();
        assert!(report.k <= 3);
        let assigned: usize = report.clusters.iter().map(|c| c.size).sum();
        assert_eq!(assigned, 3);
    }

    #[test]
    fn singleton_clusters_score_zero_silhouette() {
        let records = vec![
            record("orchid", "needs", "water"),
            record("vanda", "prefers", "light"),
        ];
        let report = analyze(&records, &config(2, 1)).unwrap();
        assert_eq!(report.k, 2);
        assert_eq!(report.silhouette, 0.0);
    }

    #[test]
    fn vocabulary_cap_keeps_the_most_frequent_terms() {
        let docs = vec![
            "water light orchid".to_string(),
            "water light".to_string(),
            "water".to_string(),
        ];
        let vectorizer = TfIdfVectorizer::fit(&docs, 2).unwrap();
        // capped by document frequency, then stored sorted
        assert_eq!(vectorizer.terms(), ["light", "water"]);

        let vector = vectorizer.transform("water water light");
        let norm: f64 = vector.iter().map(|w| w * w).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-9);
        // twice the occurrences outweigh the higher idf of "light"
        assert!(vector[1] > vector[0] && vector[0] > 0.0);
    }

    #[test]
    fn unknown_terms_produce_a_zero_vector() {
        let docs = vec!["water light".to_string()];
        let vectorizer = TfIdfVectorizer::fit(&docs, 10).unwrap();
        let vector = vectorizer.transform("granite pebbles");
        assert!(vector.iter().all(|w| *w == 0.0));
    }

    #[test]
    fn empty_documents_yield_no_vectorizer() {
        let docs = vec!["".to_string(), " ".to_string()];
        assert!(TfIdfVectorizer::fit(&docs, 10).is_none());
    }
}
