use std::collections::HashSet;

use serde::Serialize;
use serde_json::Value;

use crate::config::Config;
use crate::models::{ExtractionMethod, SvoTuple};
use crate::parser::text::{collapse_whitespace, extract_text, split_sentences};
use crate::parser::Vocabulary;

/// Field standardization applied token-wise after punctuation stripping.
const SYNONYMS: &[(&str, &str)] = &[
    ("temp", "temperature"),
    ("temps", "temperature"),
    ("watering", "water"),
    ("lighting", "light"),
    ("fertilizing", "fertilizer"),
    ("fertilising", "fertilizer"),
    ("blooming", "blooms"),
    ("flowering", "flowers"),
];

/// Confidence assigned to candidates recovered from free text by keyword
/// matching; deliberately mid-range, the full parser does better.
const KEYWORD_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, Serialize)]
pub struct CleaningStats {
    pub total_input: usize,
    pub valid: usize,
    pub invalid: usize,
    pub final_count: usize,
    /// Duplicates removed / valid records.
    pub dedup_rate: f64,
    /// Valid records / total input.
    pub validation_rate: f64,
    pub subject_diversity: f64,
    pub verb_diversity: f64,
    pub object_diversity: f64,
    pub mean_confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvalidRecord {
    pub record: SvoTuple,
    pub reasons: Vec<String>,
}

#[derive(Debug)]
pub struct CleaningOutcome {
    pub records: Vec<SvoTuple>,
    pub invalid: Vec<InvalidRecord>,
    pub stats: CleaningStats,
}

/// Normalize, validate and deduplicate SVO candidates. Running the cleaner
/// on its own output changes nothing.
pub struct Cleaner {
    lowercase: bool,
    min_confidence: f64,
    vocab: Vocabulary,
}

impl Cleaner {
    pub fn from_config(config: &Config) -> Self {
        Self {
            lowercase: config.cleaning.lowercase,
            min_confidence: config.quality_thresholds.min_svo_confidence,
            vocab: Vocabulary::new(&config.svo_patterns),
        }
    }

    /// Clean already-typed candidates.
    pub fn clean(&self, candidates: Vec<SvoTuple>) -> CleaningOutcome {
        let items = candidates.into_iter().map(|t| (t, false)).collect();
        self.clean_inner(items)
    }

    /// Clean loosely-structured records (JSON objects). Missing fields are
    /// reported per record instead of failing the batch.
    pub fn clean_loose(&self, values: &[Value]) -> CleaningOutcome {
        let items = values.iter().map(loose_tuple).collect();
        self.clean_inner(items)
    }

    /// Re-extract candidates from free text (or markup) by simplified
    /// keyword matching, then clean them. `source_url` is stamped on every
    /// recovered tuple so provenance survives the round trip.
    pub fn clean_text(&self, text: &str, source_url: &str) -> CleaningOutcome {
        let plain = extract_text(text);
        let mut candidates = Vec::new();
        for (offset, sentence) in split_sentences(&plain) {
            if let Some(tuple) = self.keyword_tuple(sentence, offset, source_url) {
                candidates.push(tuple);
            }
        }
        self.clean(candidates)
    }

    fn clean_inner(&self, items: Vec<(SvoTuple, bool)>) -> CleaningOutcome {
        let total_input = items.len();
        let mut valid = Vec::new();
        let mut invalid = Vec::new();

        for (mut tuple, confidence_missing) in items {
            tuple.subject = self.normalize(&tuple.subject);
            tuple.verb = self.normalize(&tuple.verb);
            tuple.object = self.normalize(&tuple.object);

            let reasons = self.validate(&tuple, confidence_missing);
            if reasons.is_empty() {
                valid.push(tuple);
            } else {
                invalid.push(InvalidRecord {
                    record: tuple,
                    reasons,
                });
            }
        }

        let valid_count = valid.len();
        let mut seen: HashSet<String> = HashSet::with_capacity(valid_count);
        let mut records = Vec::with_capacity(valid_count);
        for tuple in valid {
            // first-seen wins on duplicate triples
            if seen.insert(tuple.triple_key()) {
                records.push(tuple);
            }
        }

        let stats = build_stats(total_input, valid_count, invalid.len(), &records);
        CleaningOutcome {
            records,
            invalid,
            stats,
        }
    }

    /// Lowercase (when configured), strip punctuation except hyphen and
    /// period, collapse whitespace, standardize synonyms.
    fn normalize(&self, field: &str) -> String {
        let cased = if self.lowercase {
            field.to_lowercase()
        } else {
            field.to_string()
        };
        let stripped: String = cased
            .chars()
            .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '-' || *c == '.')
            .collect();
        let collapsed = collapse_whitespace(&stripped);
        collapsed
            .split(' ')
            .map(standardize_token)
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn validate(&self, tuple: &SvoTuple, confidence_missing: bool) -> Vec<String> {
        let mut reasons = Vec::new();
        for (name, value) in [
            ("subject", &tuple.subject),
            ("verb", &tuple.verb),
            ("object", &tuple.object),
        ] {
            if value.is_empty() {
                reasons.push(format!("empty {name}"));
            } else if value.chars().count() < 2 {
                reasons.push(format!("{name} shorter than 2 characters"));
            }
        }
        if confidence_missing {
            reasons.push("missing confidence".to_string());
        } else if tuple.confidence < self.min_confidence {
            reasons.push(format!(
                "confidence {:.2} below minimum {:.2}",
                tuple.confidence, self.min_confidence
            ));
        }
        reasons
    }

    /// First subject keyword, first verb after it, first object after that.
    fn keyword_tuple(&self, sentence: &str, offset: usize, source_url: &str) -> Option<SvoTuple> {
        let tokens: Vec<&str> = sentence
            .split_whitespace()
            .map(|raw| raw.trim_matches(|c: char| !(c.is_alphanumeric() || c == '-')))
            .filter(|t| !t.is_empty())
            .collect();

        let subject_at = tokens
            .iter()
            .position(|t| self.vocab.subject_token_matches(t))?;
        let verb_at = (subject_at + 1..tokens.len())
            .find(|&i| self.vocab.verb_token_matches(tokens[i]))?;
        let object_at = (verb_at + 1..tokens.len())
            .find(|&i| self.vocab.object_token_matches(tokens[i]))?;

        Some(
            SvoTuple::new(
                tokens[subject_at],
                tokens[verb_at],
                tokens[object_at],
                KEYWORD_CONFIDENCE,
                ExtractionMethod::Pattern("keyword".to_string()),
            )
            .with_origin(source_url, "")
            .with_context(sentence, sentence, offset),
        )
    }
}

fn standardize_token(token: &str) -> String {
    let lower = token.to_lowercase();
    for (from, to) in SYNONYMS {
        if lower == *from {
            return (*to).to_string();
        }
    }
    token.to_string()
}

fn loose_tuple(value: &Value) -> (SvoTuple, bool) {
    let text = |key: &str| value.get(key).and_then(Value::as_str).unwrap_or("");
    let confidence = value.get("confidence").and_then(Value::as_f64);
    let method = value
        .get("extraction_method")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    let position = value.get("position").and_then(Value::as_u64).unwrap_or(0) as usize;

    let tuple = SvoTuple::new(
        text("subject"),
        text("verb"),
        text("object"),
        confidence.unwrap_or(0.0),
        ExtractionMethod::from(method),
    )
    .with_origin(text("source_url"), text("source_category"))
    .with_context(text("context"), text("raw_span"), position);

    (tuple, confidence.is_none())
}

fn build_stats(
    total_input: usize,
    valid: usize,
    invalid: usize,
    records: &[SvoTuple],
) -> CleaningStats {
    let final_count = records.len();
    let duplicates = valid - final_count;

    let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
    let distinct = |field: fn(&SvoTuple) -> &str| {
        records
            .iter()
            .map(field)
            .collect::<HashSet<_>>()
            .len()
    };

    let mean_confidence = if final_count == 0 {
        0.0
    } else {
        records.iter().map(|r| r.confidence).sum::<f64>() / final_count as f64
    };

    CleaningStats {
        total_input,
        valid,
        invalid,
        final_count,
        dedup_rate: ratio(duplicates, valid),
        validation_rate: ratio(valid, total_input),
        subject_diversity: ratio(distinct(|r| r.subject.as_str()), final_count),
        verb_diversity: ratio(distinct(|r| r.verb.as_str()), final_count),
        object_diversity: ratio(distinct(|r| r.object.as_str()), final_count),
        mean_confidence,
    }
}
