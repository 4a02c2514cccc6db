use crate::config::Thresholds;

use super::categories::{CategoryReport, FALLBACK_CATEGORY};
use super::clustering::ClusteringReport;
use super::correlation::{CorrelationReport, PairStrength};
use super::frequency::FrequencyReport;

/// Per-field diversity below this reads as "few distinct values".
const DIVERSITY_FLOOR: f64 = 0.3;
/// Share of records that should match at least one care category.
const COVERAGE_FLOOR: f64 = 0.9;
/// Silhouette above this counts as clear separation.
const SEPARATION_FLOOR: f64 = 0.5;

/// Observations plus the follow-up suggestions they imply.
#[derive(Debug, Default)]
pub struct InsightSet {
    pub insights: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Turn the individual reports into plain-English observations. Output order
/// and wording are fixed so repeated runs produce identical insight lists.
pub fn derive(
    frequency: Option<&FrequencyReport>,
    correlation: Option<&CorrelationReport>,
    clustering: Option<&ClusteringReport>,
    categories: Option<&CategoryReport>,
    mean_confidence: f64,
    thresholds: &Thresholds,
) -> InsightSet {
    let mut out = InsightSet::default();

    if let Some(freq) = frequency {
        let fields = [
            ("subject", &freq.top_subjects),
            ("verb", &freq.top_verbs),
            ("object", &freq.top_objects),
        ];
        for (label, list) in fields {
            if let Some(top) = list.first() {
                if top.count >= thresholds.significant_frequency {
                    out.insights.push(format!(
                        "Most frequent {}: '{}' appears in {} of {} records ({:.0}%)",
                        label,
                        top.value,
                        top.count,
                        freq.total,
                        top.share * 100.0
                    ));
                }
            }
        }
        let diversities = [
            ("subject", freq.subject_diversity, "plant names"),
            ("verb", freq.verb_diversity, "care actions"),
            ("object", freq.object_diversity, "care topics"),
        ];
        for (label, value, noun) in diversities {
            if freq.total > 0 && value < DIVERSITY_FLOOR {
                out.insights.push(format!(
                    "Low {label} diversity ({value:.2}); statements concentrate on a few {noun}"
                ));
            }
        }
    }

    if let Some(cats) = categories {
        if cats.total > 0 {
            let uncovered = cats.total - cats.categorized;
            let coverage = cats.categorized as f64 / cats.total as f64;
            if coverage < COVERAGE_FLOOR {
                out.insights.push(format!(
                    "{} of {} records ({:.0}%) matched no care category ('{}')",
                    uncovered,
                    cats.total,
                    (1.0 - coverage) * 100.0,
                    FALLBACK_CATEGORY
                ));
                out.recommendations.push(format!(
                    "Extend the care category keyword lists or add more focused sources; {} record{} only matched '{}'",
                    uncovered,
                    if uncovered == 1 { "" } else { "s" },
                    FALLBACK_CATEGORY
                ));
            }
        }
    }

    if let Some(cl) = clustering {
        let mut line = format!(
            "Records group into {} theme{} (silhouette {:.2})",
            cl.k,
            if cl.k == 1 { "" } else { "s" },
            cl.silhouette
        );
        if cl.silhouette > SEPARATION_FLOOR {
            line.push_str(", with clear separation between themes");
        }
        out.insights.push(line);
    }

    if let Some(corr) = correlation {
        if corr.strong_pairs > 0 {
            let mut strongest: Option<&PairStrength> = None;
            for list in [&corr.subject_verb, &corr.verb_object, &corr.subject_object] {
                if let Some(head) = list.first() {
                    if strongest.map_or(true, |s| head.strength > s.strength) {
                        strongest = Some(head);
                    }
                }
            }
            if let Some(pair) = strongest {
                out.insights.push(format!(
                    "{} value pairing{} at or above {:.0}% co-occurrence; strongest: '{}' with '{}'",
                    corr.strong_pairs,
                    if corr.strong_pairs == 1 { "" } else { "s" },
                    thresholds.strong_correlation * 100.0,
                    pair.left,
                    pair.right
                ));
            }
        }
    }

    if mean_confidence < thresholds.insight_confidence {
        out.recommendations.push(format!(
            "Mean extraction confidence {:.2} is below the {:.2} target; consider raising min_svo_confidence or adding cleaner sources",
            mean_confidence, thresholds.insight_confidence
        ));
    }

    out
}
