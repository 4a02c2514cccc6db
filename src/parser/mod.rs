pub mod patterns;
pub mod structural;
pub mod text;

use tracing::{debug, warn};

use crate::config::{Config, SvoPatterns};
use crate::models::{FetchResult, SvoTuple};
use patterns::PatternExtractor;
use structural::StructuralExtractor;

/// An extraction strategy turns plain text into scored SVO candidates.
/// Strategies are composed by [`SvoParser`]; each tags its own provenance.
pub trait ExtractStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn extract(&self, text: &str) -> Vec<SvoTuple>;
}

/// Lowercased indicator vocabularies shared by both strategies and by the
/// cleaner's text re-extraction.
pub struct Vocabulary {
    subjects: Vec<String>,
    verbs: Vec<String>,
    objects: Vec<String>,
}

impl Vocabulary {
    pub fn new(patterns: &SvoPatterns) -> Self {
        fn lowered(list: &[String]) -> Vec<String> {
            list.iter()
                .map(|w| w.trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect()
        }
        Self {
            subjects: lowered(&patterns.subject_indicators),
            verbs: lowered(&patterns.verb_indicators),
            objects: lowered(&patterns.object_indicators),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.subjects.is_empty() && !self.verbs.is_empty() && !self.objects.is_empty()
    }

    pub fn subject_text_matches(&self, text: &str) -> bool {
        contains_any(&self.subjects, text)
    }

    pub fn object_text_matches(&self, text: &str) -> bool {
        contains_any(&self.objects, text)
    }

    pub fn subject_token_matches(&self, token: &str) -> bool {
        let lower = token.to_lowercase();
        self.subjects.iter().any(|w| lower.contains(w.as_str()))
    }

    pub fn object_token_matches(&self, token: &str) -> bool {
        let lower = token.to_lowercase();
        self.objects.iter().any(|w| lower.contains(w.as_str()))
    }

    /// Stem-aware verb check: "requires", "blooming" and "produced" all
    /// match their base forms.
    pub fn verb_token_matches(&self, token: &str) -> bool {
        let lower = token.to_lowercase();
        self.verbs.iter().any(|stem| verb_form_matches(&lower, stem))
    }
}

fn contains_any(words: &[String], text: &str) -> bool {
    let lower = text.to_lowercase();
    words.iter().any(|w| lower.contains(w.as_str()))
}

fn verb_form_matches(token: &str, stem: &str) -> bool {
    if token == stem {
        return true;
    }
    if let Some(suffix) = token.strip_prefix(stem) {
        if matches!(suffix, "s" | "es" | "ed" | "ing" | "d") {
            return true;
        }
    }
    // final-e stems: produce -> producing, thrive -> thriving
    if let Some(trunk) = stem.strip_suffix('e') {
        if let Some(suffix) = token.strip_prefix(trunk) {
            return matches!(suffix, "ing" | "ed" | "es");
        }
    }
    false
}

/// Dual-strategy SVO parser. Structural extraction is optional; when its
/// constructor fails the parser degrades to pattern templates alone.
pub struct SvoParser {
    strategies: Vec<Box<dyn ExtractStrategy>>,
    min_confidence: f64,
    min_text_length: usize,
    max_text_length: usize,
}

impl SvoParser {
    pub fn from_config(config: &Config) -> Self {
        let mut strategies: Vec<Box<dyn ExtractStrategy>> = Vec::new();
        match StructuralExtractor::new(&config.svo_patterns) {
            Ok(structural) => strategies.push(Box::new(structural)),
            Err(e) => warn!("structural extraction unavailable, using patterns only: {e}"),
        }
        strategies.push(Box::new(PatternExtractor::new(&config.svo_patterns)));

        Self {
            strategies,
            min_confidence: config.quality_thresholds.min_svo_confidence,
            min_text_length: config.quality_thresholds.min_text_length,
            max_text_length: config.quality_thresholds.max_text_length,
        }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Parse one fetched page. Failed fetches and too-short documents yield
    /// no candidates; nothing here mutates the page.
    pub fn parse(&self, page: &FetchResult) -> Vec<SvoTuple> {
        if !page.success() {
            return Vec::new();
        }
        self.parse_text(&page.content)
            .into_iter()
            .map(|t| t.with_origin(&page.url, &page.source_category))
            .collect()
    }

    /// Extraction over raw markup or plain text, without origin stamping.
    pub fn parse_text(&self, raw: &str) -> Vec<SvoTuple> {
        let plain = text::extract_text(raw);
        if plain.chars().count() < self.min_text_length {
            return Vec::new();
        }
        let plain = truncate_chars(plain, self.max_text_length);

        let mut tuples = Vec::new();
        for strategy in &self.strategies {
            let found = strategy.extract(&plain);
            debug!(strategy = strategy.name(), candidates = found.len(), "extraction pass");
            tuples.extend(found);
        }
        tuples.retain(|t| t.confidence >= self.min_confidence);
        tuples
    }
}

fn truncate_chars(s: String, max: usize) -> String {
    if s.chars().count() <= max {
        s
    } else {
        s.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn page(content: &str) -> FetchResult {
        FetchResult {
            url: "https://example.com/orchid-care".to_string(),
            source_category: "care_guides".to_string(),
            http_status: Some(200),
            content: content.to_string(),
            error: None,
            fetched_at: Utc::now(),
            elapsed_ms: 5,
            retry_count: 0,
        }
    }

    #[test]
    fn parser_runs_both_strategies_and_stamps_origin() {
        let parser = SvoParser::from_config(&Config::default());
        assert_eq!(parser.strategy_names(), vec!["structural", "pattern"]);

        let tuples = parser.parse(&page(
            "<html><body><p>Cattleya orchids require bright light and warm temperatures.</p></body></html>",
        ));
        assert!(!tuples.is_empty());
        assert!(tuples.iter().any(|t| t.extraction_method.label() == "structural"));
        assert!(tuples.iter().any(|t| t.extraction_method.label().starts_with("pattern:")));
        for t in &tuples {
            assert_eq!(t.source_url, "https://example.com/orchid-care");
            assert_eq!(t.source_category, "care_guides");
            assert!((0.0..=1.0).contains(&t.confidence));
            assert!(t.confidence >= 0.3);
        }
    }

    #[test]
    fn degrades_to_patterns_when_structural_is_unavailable() {
        let mut config = Config::default();
        config.svo_patterns.verb_indicators.clear();
        let parser = SvoParser::from_config(&config);
        assert_eq!(parser.strategy_names(), vec!["pattern"]);

        let tuples = parser.parse(&page(
            "<p>Dendrobium orchids thrive in bright filtered light all year.</p>",
        ));
        assert!(!tuples.is_empty());
        assert!(tuples.iter().all(|t| t.extraction_method.label().starts_with("pattern:")));
    }

    #[test]
    fn failed_or_empty_pages_yield_nothing() {
        let parser = SvoParser::from_config(&Config::default());
        let mut bad = page("Cattleya orchids require bright light and warm temperatures.");
        bad.http_status = Some(500);
        bad.error = Some("HTTP 500".to_string());
        assert!(parser.parse(&bad).is_empty());

        assert!(parser.parse(&page("")).is_empty());
        // below min_text_length
        assert!(parser.parse(&page("Too short.")).is_empty());
    }

    #[test]
    fn low_confidence_candidates_are_filtered() {
        let mut config = Config::default();
        config.quality_thresholds.min_svo_confidence = 0.99;
        let parser = SvoParser::from_config(&config);
        let tuples = parser.parse(&page(
            "<p>Phalaenopsis is an epiphytic plant from the tropics of Asia.</p>",
        ));
        assert!(tuples.iter().all(|t| t.confidence >= 0.99));
    }

    #[test]
    fn verb_forms_match_their_stems() {
        let vocab = Vocabulary::new(&SvoPatterns::default());
        for form in ["require", "requires", "required", "requiring"] {
            assert!(vocab.verb_token_matches(form), "{form}");
        }
        assert!(vocab.verb_token_matches("producing"));
        assert!(vocab.verb_token_matches("thriving"));
        assert!(!vocab.verb_token_matches("water"));
        assert!(!vocab.verb_token_matches("requirement"));
    }

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{name}.html")).unwrap()
    }

    #[test]
    fn phalaenopsis_page_yields_statements_from_both_strategies() {
        let parser = SvoParser::from_config(&Config::default());
        let tuples = parser.parse_text(&fixture("phalaenopsis"));
        assert!(!tuples.is_empty());
        assert!(tuples.iter().any(|t| t.extraction_method.label() == "structural"));
        assert!(tuples.iter().any(|t| t.extraction_method.label().starts_with("pattern:")));
        // genus folded into the subject
        assert!(tuples.iter().any(|t| t.subject == "Phalaenopsis orchids"));
        // qualifier folded into the object, behind a decoded &deg; entity
        assert!(tuples
            .iter()
            .any(|t| t.verb.contains("prefer") && t.object == "daytime temperatures"));
        assert!(tuples
            .iter()
            .any(|t| t.subject.contains("hybrids") && t.object.contains("water")));
    }

    #[test]
    fn page_chrome_never_reaches_statement_contexts() {
        let parser = SvoParser::from_config(&Config::default());
        let tuples = parser.parse_text(&fixture("phalaenopsis"));
        assert!(!tuples.is_empty());
        for t in &tuples {
            assert!(!t.context.contains("dataLayer"), "script leaked: {}", t.context);
            assert!(!t.context.contains("font-family"), "style leaked: {}", t.context);
            assert!(!t.context.contains("feeding interval"), "comment leaked: {}", t.context);
            assert!(!t.context.contains("&amp;"), "entity not decoded: {}", t.context);
        }
    }

    #[test]
    fn cattleya_page_hits_the_care_and_growing_templates() {
        use crate::models::ExtractionMethod;

        let parser = SvoParser::from_config(&Config::default());
        let tuples = parser.parse_text(&fixture("cattleya"));
        assert!(tuples
            .iter()
            .any(|t| t.extraction_method == ExtractionMethod::Pattern("care_instruction".into())));
        assert!(tuples
            .iter()
            .any(|t| t.extraction_method == ExtractionMethod::Pattern("growing_condition".into())));
        assert!(tuples.iter().any(|t| t.subject.contains("cultivars")));
        for t in &tuples {
            assert!(!t.context.contains("headline"), "ld+json leaked: {}", t.context);
        }
    }

    #[test]
    fn navigation_only_pages_yield_nothing() {
        let parser = SvoParser::from_config(&Config::default());
        assert!(parser.parse_text(&fixture("noise")).is_empty());
    }
}
