use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Pipeline configuration. Every key is optional in the JSON file; missing
/// keys fall back to the defaults below, so an empty `{}` is a valid config.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Source category -> URL list. Empty means nothing to fetch.
    #[serde(default)]
    pub urls: BTreeMap<String, Vec<String>>,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Total attempt budget per URL on retryable HTTP statuses.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Minimum start-to-start interval between requests to one domain, seconds.
    #[serde(default = "default_request_delay")]
    pub request_delay: f64,
    /// 1 = strictly sequential fetching.
    #[serde(default = "default_workers")]
    pub max_parallel_workers: usize,
    /// Log fetch progress every N completed URLs.
    #[serde(default = "default_log_every")]
    pub log_every: usize,

    #[serde(default)]
    pub svo_patterns: SvoPatterns,
    #[serde(default)]
    pub quality_thresholds: QualityThresholds,
    #[serde(default)]
    pub cleaning: CleaningConfig,
    #[serde(default)]
    pub clustering: ClusteringConfig,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default = "default_care_categories")]
    pub care_categories: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub analyses: AnalysesConfig,
}

/// Indicator vocabularies driving both extraction strategies.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SvoPatterns {
    #[serde(default = "default_subjects")]
    pub subject_indicators: Vec<String>,
    #[serde(default = "default_verbs")]
    pub verb_indicators: Vec<String>,
    #[serde(default = "default_objects")]
    pub object_indicators: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QualityThresholds {
    /// Candidates scoring below this are dropped by the parser and the cleaner.
    #[serde(default = "default_min_confidence")]
    pub min_svo_confidence: f64,
    /// Documents whose plain text is shorter than this yield no candidates.
    #[serde(default = "default_min_text_length")]
    pub min_text_length: usize,
    /// Plain text is truncated here before extraction.
    #[serde(default = "default_max_text_length")]
    pub max_text_length: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CleaningConfig {
    #[serde(default = "default_true")]
    pub lowercase: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClusteringConfig {
    #[serde(default = "default_n_clusters")]
    pub n_clusters: usize,
    /// Vocabulary cap for the term-weight vectorizer.
    #[serde(default = "default_max_features")]
    pub max_features: usize,
    /// Below this many records, clustering reports insufficient data.
    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Thresholds {
    /// A value occurring at least this often is called out as dominant.
    #[serde(default = "default_significant_frequency")]
    pub significant_frequency: usize,
    #[serde(default = "default_strong_correlation")]
    pub strong_correlation: f64,
    /// Mean confidence below this triggers a data-quality recommendation.
    #[serde(default = "default_insight_confidence")]
    pub insight_confidence: f64,
}

/// Per-sub-analysis toggles. Everything on by default.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalysesConfig {
    #[serde(default = "default_true")]
    pub frequency: bool,
    #[serde(default = "default_true")]
    pub correlation: bool,
    #[serde(default = "default_true")]
    pub clustering: bool,
    #[serde(default = "default_true")]
    pub categories: bool,
    #[serde(default = "default_true")]
    pub insights: bool,
}

fn default_user_agent() -> String {
    "orchidmine/0.1 (botanical research crawler)".to_string()
}
fn default_timeout() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_request_delay() -> f64 {
    1.0
}
fn default_workers() -> usize {
    1
}
fn default_log_every() -> usize {
    10
}
fn default_min_confidence() -> f64 {
    0.3
}
fn default_min_text_length() -> usize {
    50
}
fn default_max_text_length() -> usize {
    100_000
}
fn default_n_clusters() -> usize {
    5
}
fn default_max_features() -> usize {
    100
}
fn default_min_cluster_size() -> usize {
    3
}
fn default_significant_frequency() -> usize {
    3
}
fn default_strong_correlation() -> f64 {
    0.7
}
fn default_insight_confidence() -> f64 {
    0.6
}
fn default_true() -> bool {
    true
}

fn strings(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

fn default_subjects() -> Vec<String> {
    strings(&["orchid", "hybrid", "species", "variety", "cultivar"])
}

fn default_verbs() -> Vec<String> {
    strings(&[
        "grow", "bloom", "flower", "produce", "develop", "require", "need", "prefer", "thrive",
    ])
}

fn default_objects() -> Vec<String> {
    strings(&[
        "light",
        "water",
        "temperature",
        "humidity",
        "fertilizer",
        "care",
        "soil",
        "drainage",
    ])
}

fn default_care_categories() -> BTreeMap<String, Vec<String>> {
    let mut map = BTreeMap::new();
    map.insert(
        "environmental".to_string(),
        strings(&["light", "temperature", "humidity", "air"]),
    );
    map.insert(
        "watering".to_string(),
        strings(&["water", "moisture", "irrigation", "spray"]),
    );
    map.insert(
        "nutrition".to_string(),
        strings(&["fertilizer", "feed", "nutrients", "supplement"]),
    );
    map.insert(
        "growth".to_string(),
        strings(&["grows", "develops", "produces", "blooms", "flowers"]),
    );
    map.insert(
        "maintenance".to_string(),
        strings(&["care", "pruning", "repot", "clean"]),
    );
    map
}

impl Default for SvoPatterns {
    fn default() -> Self {
        Self {
            subject_indicators: default_subjects(),
            verb_indicators: default_verbs(),
            object_indicators: default_objects(),
        }
    }
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_svo_confidence: default_min_confidence(),
            min_text_length: default_min_text_length(),
            max_text_length: default_max_text_length(),
        }
    }
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self { lowercase: true }
    }
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            n_clusters: default_n_clusters(),
            max_features: default_max_features(),
            min_cluster_size: default_min_cluster_size(),
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            significant_frequency: default_significant_frequency(),
            strong_correlation: default_strong_correlation(),
            insight_confidence: default_insight_confidence(),
        }
    }
}

impl Default for AnalysesConfig {
    fn default() -> Self {
        Self {
            frequency: true,
            correlation: true,
            clustering: true,
            categories: true,
            insights: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            urls: BTreeMap::new(),
            user_agent: default_user_agent(),
            timeout: default_timeout(),
            max_retries: default_max_retries(),
            request_delay: default_request_delay(),
            max_parallel_workers: default_workers(),
            log_every: default_log_every(),
            svo_patterns: SvoPatterns::default(),
            quality_thresholds: QualityThresholds::default(),
            cleaning: CleaningConfig::default(),
            clustering: ClusteringConfig::default(),
            thresholds: Thresholds::default(),
            care_categories: default_care_categories(),
            analyses: AnalysesConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config: Config = serde_json::from_str(&raw).map_err(|e| {
            PipelineError::Config(format!("invalid JSON in {}: {e}", path.display()))
        })?;
        Ok(config)
    }

    /// Explicit path must load; otherwise use ./config.json when present,
    /// built-in defaults when not.
    pub fn load_or_default(path: Option<&Path>) -> Result<Config> {
        match path {
            Some(p) => Config::load(p),
            None => {
                let fallback = Path::new("config.json");
                if fallback.exists() {
                    Config::load(fallback)
                } else {
                    Ok(Config::default())
                }
            }
        }
    }

    /// Worker count with the zero-misconfiguration clamped away.
    pub fn workers(&self) -> usize {
        self.max_parallel_workers.max(1)
    }

    pub fn total_urls(&self) -> usize {
        self.urls.values().map(|v| v.len()).sum()
    }
}
