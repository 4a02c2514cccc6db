use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use crate::config::SvoPatterns;
use crate::models::{ExtractionMethod, SvoTuple};
use crate::parser::{ExtractStrategy, Vocabulary};

// Capture convention for every template: 1 = subject, 2 = verb, 3 = object.
static CARE_INSTRUCTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b([A-Z][A-Za-z-]+(?:\s+[A-Za-z-]+){0,3}?)\s+(needs?|requires?|prefers?|grows?|blooms?)\s+([^.!?]{10,100})",
    )
    .unwrap()
});
static BOTANICAL_RELATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b([A-Z][A-Za-z-]+(?:\s+[A-Za-z-]+){0,2}?)\s+(is|are|produces?|forms?)\s+(an?\s+[^.!?]{3,80})",
    )
    .unwrap()
});
static GROWING_CONDITION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b([A-Z][A-Za-z-]+(?:\s+[A-Za-z-]+){0,3}?)\s+(thrives?|grows?|prefers?|requires?|needs?)\s+in\s+([^.!?]{3,100})",
    )
    .unwrap()
});
static FLOWERING_INFO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b([A-Z][A-Za-z-]+(?:\s+[A-Za-z-]+){0,3}?)\s+(flowers?|blooms?|produces?)\s+([^.!?]{5,120})",
    )
    .unwrap()
});

/// One row of the template table. Adding a template means adding a row, the
/// scoring rules below apply uniformly.
struct PatternTemplate {
    name: &'static str,
    base_score: f64,
    regex: Regex,
}

/// Regex-template extraction. Always available; the generic vocabulary
/// template is skipped when the configured vocabularies are empty.
pub struct PatternExtractor {
    templates: Vec<PatternTemplate>,
    vocab: Vocabulary,
}

impl PatternExtractor {
    pub fn new(patterns: &SvoPatterns) -> Self {
        let mut templates = vec![
            PatternTemplate {
                name: "care_instruction",
                base_score: 0.8,
                regex: CARE_INSTRUCTION_RE.clone(),
            },
            PatternTemplate {
                name: "botanical_relation",
                base_score: 0.7,
                regex: BOTANICAL_RELATION_RE.clone(),
            },
            PatternTemplate {
                name: "growing_condition",
                base_score: 0.75,
                regex: GROWING_CONDITION_RE.clone(),
            },
            PatternTemplate {
                name: "flowering_info",
                base_score: 0.65,
                regex: FLOWERING_INFO_RE.clone(),
            },
        ];

        match build_general_template(patterns) {
            Some(regex) => templates.push(PatternTemplate {
                name: "general_svo",
                base_score: 0.5,
                regex,
            }),
            None => warn!("generic SVO template disabled: empty indicator vocabulary"),
        }

        Self {
            templates,
            vocab: Vocabulary::new(patterns),
        }
    }

    fn score(&self, base: f64, subject: &str, verb: &str, object: &str, span: &str) -> f64 {
        let mut score = base;
        if [subject, verb, object]
            .iter()
            .any(|field| field.trim().chars().count() < 3)
        {
            score -= 0.2;
        }
        if span.chars().count() > 300 {
            score -= 0.1;
        }
        if self.vocab.subject_text_matches(subject) && self.vocab.object_text_matches(object) {
            score += 0.15;
        }
        score.clamp(0.0, 1.0)
    }
}

impl ExtractStrategy for PatternExtractor {
    fn name(&self) -> &'static str {
        "pattern"
    }

    fn extract(&self, text: &str) -> Vec<SvoTuple> {
        let mut out = Vec::new();
        for template in &self.templates {
            for caps in template.regex.captures_iter(text) {
                let Some(span) = caps.get(0) else { continue };
                let subject = caps[1].trim();
                let verb = caps[2].trim();
                let object = caps[3].trim();
                let confidence =
                    self.score(template.base_score, subject, verb, object, span.as_str());
                out.push(
                    SvoTuple::new(
                        subject,
                        verb,
                        object,
                        confidence,
                        ExtractionMethod::Pattern(template.name.to_string()),
                    )
                    .with_context(span.as_str(), span.as_str(), span.start()),
                );
            }
        }
        out
    }
}

/// Generic subject-verb-object template assembled from the configured
/// vocabularies. None when any list is empty.
fn build_general_template(patterns: &SvoPatterns) -> Option<Regex> {
    let subjects = alternation(&patterns.subject_indicators)?;
    let verbs = verb_alternation(&patterns.verb_indicators)?;
    let objects = alternation(&patterns.object_indicators)?;
    let pattern = format!(
        r"(?i)\b((?:[A-Za-z-]+\s+){{0,2}}(?:{subjects})[a-z]*)\s+((?:{verbs})(?:s|es|ed|ing|d)?)\s+((?:[A-Za-z-]+\s+){{0,3}}(?:{objects})[a-z]*)",
    );
    match Regex::new(&pattern) {
        Ok(regex) => Some(regex),
        Err(e) => {
            warn!("generic SVO template failed to compile: {e}");
            None
        }
    }
}

fn alternation(words: &[String]) -> Option<String> {
    let parts: Vec<String> = words
        .iter()
        .map(|w| w.trim().to_lowercase())
        .filter(|w| !w.is_empty())
        .map(|w| regex::escape(&w))
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("|"))
    }
}

/// Verb alternation also admits the final-e-dropped trunk so the optional
/// suffix group catches forms like "producing" for "produce".
fn verb_alternation(words: &[String]) -> Option<String> {
    let mut parts = Vec::new();
    for word in words {
        let w = word.trim().to_lowercase();
        if w.is_empty() {
            continue;
        }
        parts.push(regex::escape(&w));
        if let Some(trunk) = w.strip_suffix('e') {
            if !trunk.is_empty() {
                parts.push(regex::escape(trunk));
            }
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("|"))
    }
}
