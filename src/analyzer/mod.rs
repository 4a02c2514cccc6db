pub mod categories;
pub mod clustering;
pub mod correlation;
pub mod frequency;
pub mod insights;

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{AnalysesConfig, ClusteringConfig, Config, Thresholds};
use crate::error::PipelineError;
use crate::models::{AnalysisRun, SvoTuple};

pub use categories::CategoryReport;
pub use clustering::ClusteringReport;
pub use correlation::CorrelationReport;
pub use frequency::FrequencyReport;

/// Deterministic count ranking: count descending, then value ascending.
pub(crate) fn rank<K: Ord>(counts: BTreeMap<K, usize>) -> Vec<(K, usize)> {
    let mut rows: Vec<_> = counts.into_iter().collect();
    rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    rows
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisMeta {
    pub entries: usize,
    pub mean_confidence: f64,
    /// Completed share of the enabled sub-analyses.
    pub completeness: f64,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub frequency: Option<FrequencyReport>,
    pub correlation: Option<CorrelationReport>,
    pub clustering: Option<ClusteringReport>,
    pub categories: Option<CategoryReport>,
    /// Empty when the insight pass is disabled.
    pub insights: Vec<String>,
    pub recommendations: Vec<String>,
    /// Sub-analysis name -> why it did not complete.
    pub errors: BTreeMap<String, String>,
    pub meta: AnalysisMeta,
}

pub struct Analyzer {
    analyses: AnalysesConfig,
    clustering: ClusteringConfig,
    thresholds: Thresholds,
    care_categories: BTreeMap<String, Vec<String>>,
}

impl Analyzer {
    pub fn from_config(config: &Config) -> Self {
        Self {
            analyses: config.analyses.clone(),
            clustering: config.clustering.clone(),
            thresholds: config.thresholds.clone(),
            care_categories: config.care_categories.clone(),
        }
    }

    /// Run every enabled sub-analysis. A failing sub-analysis lands in
    /// `errors` and the rest still run; only an empty record set fails the
    /// whole call.
    pub fn analyze(&self, records: &[SvoTuple]) -> Result<AnalysisResult> {
        if records.is_empty() {
            return Err(PipelineError::NoData("no records to analyze".to_string()).into());
        }

        let enabled = [
            self.analyses.frequency,
            self.analyses.correlation,
            self.analyses.clustering,
            self.analyses.categories,
            self.analyses.insights,
        ]
        .iter()
        .filter(|&&on| on)
        .count();
        let mut run = AnalysisRun::new(enabled);
        let mut errors = BTreeMap::new();

        let mean_confidence =
            records.iter().map(|r| r.confidence).sum::<f64>() / records.len() as f64;

        let frequency = self.analyses.frequency.then(|| {
            let report = frequency::analyze(records);
            run.pass();
            report
        });
        let correlation = self.analyses.correlation.then(|| {
            let report = correlation::analyze(records, self.thresholds.strong_correlation);
            run.pass();
            report
        });
        let clustering = if self.analyses.clustering {
            match clustering::analyze(records, &self.clustering) {
                Ok(report) => {
                    run.pass();
                    Some(report)
                }
                Err(e) => {
                    warn!("clustering skipped: {e}");
                    run.fail("clustering", &e.to_string());
                    errors.insert("clustering".to_string(), e.to_string());
                    None
                }
            }
        } else {
            None
        };
        let categories = self.analyses.categories.then(|| {
            let report = categories::analyze(records, &self.care_categories);
            run.pass();
            report
        });
        // insights read the other reports, so they always come last
        let derived = if self.analyses.insights {
            let set = insights::derive(
                frequency.as_ref(),
                correlation.as_ref(),
                clustering.as_ref(),
                categories.as_ref(),
                mean_confidence,
                &self.thresholds,
            );
            run.pass();
            set
        } else {
            insights::InsightSet::default()
        };

        info!(
            "analysis finished: {}/{} sub-analyses in {:.2}s",
            run.completed,
            run.enabled,
            run.elapsed().as_secs_f64()
        );

        Ok(AnalysisResult {
            frequency,
            correlation,
            clustering,
            categories,
            insights: derived.insights,
            recommendations: derived.recommendations,
            errors,
            meta: AnalysisMeta {
                entries: records.len(),
                mean_confidence,
                completeness: run.completeness(),
                generated_at: Utc::now(),
            },
        })
    }
}
