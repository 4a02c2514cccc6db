use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

use crate::parser::text::{collapse_whitespace, decode_entities};

/// Cap on accumulated error message samples in progress counters. Full counts
/// are always kept; only the message list is bounded.
pub const MAX_ERROR_SAMPLES: usize = 15;

// ── Fetch results ──

/// Outcome of fetching one URL. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResult {
    pub url: String,
    pub source_category: String,
    pub http_status: Option<u16>,
    pub content: String,
    pub error: Option<String>,
    pub fetched_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub retry_count: u32,
}

impl FetchResult {
    /// The fetcher records an error for every non-usable outcome (non-200,
    /// transport failure, empty body), so this agrees with `error.is_none()`.
    pub fn success(&self) -> bool {
        self.http_status == Some(200) && self.error.is_none() && !self.content.trim().is_empty()
    }
}

// ── SVO tuples ──

/// Which strategy produced a tuple. Serialized as "structural" or
/// "pattern:<template>".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ExtractionMethod {
    Structural,
    Pattern(String),
}

impl ExtractionMethod {
    pub fn label(&self) -> String {
        match self {
            ExtractionMethod::Structural => "structural".to_string(),
            ExtractionMethod::Pattern(name) => format!("pattern:{}", name),
        }
    }
}

impl From<ExtractionMethod> for String {
    fn from(method: ExtractionMethod) -> String {
        method.label()
    }
}

impl From<String> for ExtractionMethod {
    fn from(label: String) -> Self {
        match label.strip_prefix("pattern:") {
            Some(name) => ExtractionMethod::Pattern(name.to_string()),
            None if label == "structural" => ExtractionMethod::Structural,
            // Loose inputs carry free-form method strings; keep them as
            // pattern provenance rather than erroring.
            None => ExtractionMethod::Pattern(label),
        }
    }
}

/// One extracted (subject, verb, object) assertion with provenance.
/// Text fields are normalized on construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SvoTuple {
    pub subject: String,
    pub verb: String,
    pub object: String,
    pub confidence: f64,
    pub extraction_method: ExtractionMethod,
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub source_category: String,
    /// The sentence or span the tuple came from.
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub raw_span: String,
    /// Byte offset of the span within the extracted plain text.
    #[serde(default)]
    pub position: usize,
    #[serde(default = "Utc::now")]
    pub extracted_at: DateTime<Utc>,
}

fn normalize_field(raw: &str) -> String {
    collapse_whitespace(&decode_entities(raw))
}

impl SvoTuple {
    pub fn new(
        subject: &str,
        verb: &str,
        object: &str,
        confidence: f64,
        extraction_method: ExtractionMethod,
    ) -> Self {
        Self {
            subject: normalize_field(subject),
            verb: normalize_field(verb),
            object: normalize_field(object),
            confidence,
            extraction_method,
            source_url: String::new(),
            source_category: String::new(),
            context: String::new(),
            raw_span: String::new(),
            position: 0,
            extracted_at: Utc::now(),
        }
    }

    pub fn with_origin(mut self, url: &str, category: &str) -> Self {
        self.source_url = url.to_string();
        self.source_category = category.to_string();
        self
    }

    pub fn with_context(mut self, context: &str, raw_span: &str, position: usize) -> Self {
        self.context = collapse_whitespace(context);
        self.raw_span = raw_span.trim().to_string();
        self.position = position;
        self
    }

    /// Stable identity across runs: same triple from the same page hashes
    /// the same. Dedup within a run uses [`Self::triple_key`] instead, which
    /// ignores the source.
    pub fn identity_key(&self) -> String {
        let joined = format!(
            "{}|{}|{}|{}",
            self.subject, self.verb, self.object, self.source_url
        )
        .to_lowercase();
        format!("{:016x}", xxh3_64(joined.as_bytes()))
    }

    /// Case-insensitive (subject, verb, object) key for in-run deduplication.
    pub fn triple_key(&self) -> String {
        format!("{}|{}|{}", self.subject, self.verb, self.object).to_lowercase()
    }

    pub fn is_valid(&self, min_confidence: f64) -> bool {
        self.subject.chars().count() >= 2
            && self.verb.chars().count() >= 2
            && self.object.chars().count() >= 2
            && self.confidence >= min_confidence
    }
}

// ── Progress counters (process-scoped, discarded after the run) ──

#[derive(Debug)]
pub struct ScrapeProgress {
    pub total: usize,
    pub completed: usize,
    pub ok: usize,
    pub failed: usize,
    pub errors: Vec<String>,
    started: Instant,
}

impl ScrapeProgress {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            completed: 0,
            ok: 0,
            failed: 0,
            errors: Vec::new(),
            started: Instant::now(),
        }
    }

    pub fn record(&mut self, result: &FetchResult) {
        self.completed += 1;
        if result.success() {
            self.ok += 1;
        } else {
            self.failed += 1;
            if self.errors.len() < MAX_ERROR_SAMPLES {
                let reason = result.error.as_deref().unwrap_or("unknown failure");
                self.errors.push(format!("{}: {}", result.url, reason));
            }
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.completed == 0 {
            0.0
        } else {
            self.ok as f64 / self.completed as f64
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[derive(Debug)]
pub struct AnalysisRun {
    pub enabled: usize,
    pub completed: usize,
    pub failed: usize,
    pub errors: Vec<String>,
    started: Instant,
}

impl AnalysisRun {
    pub fn new(enabled: usize) -> Self {
        Self {
            enabled,
            completed: 0,
            failed: 0,
            errors: Vec::new(),
            started: Instant::now(),
        }
    }

    pub fn pass(&mut self) {
        self.completed += 1;
    }

    pub fn fail(&mut self, name: &str, reason: &str) {
        self.failed += 1;
        if self.errors.len() < MAX_ERROR_SAMPLES {
            self.errors.push(format!("{}: {}", name, reason));
        }
    }

    /// Fraction of enabled sub-analyses that completed; vacuously 1.0 when
    /// nothing was enabled.
    pub fn completeness(&self) -> f64 {
        if self.enabled == 0 {
            1.0
        } else {
            self.completed as f64 / self.enabled as f64
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}
