use anyhow::{bail, Result};

use crate::config::SvoPatterns;
use crate::models::{ExtractionMethod, SvoTuple};
use crate::parser::text::split_sentences;
use crate::parser::{ExtractStrategy, Vocabulary};

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "of", "in", "on", "at", "with", "to", "for", "very", "its",
    "their", "this", "that", "these", "those", "it", "is", "are", "was", "were",
];

struct Token {
    surface: String,
    lower: String,
}

#[derive(Debug)]
struct Candidate {
    phrase: String,
    index: usize,
    vocab_hit: bool,
}

/// Sentence-level extraction: per sentence, collect subject, verb and object
/// candidates and emit every combination that respects subject < verb <
/// object word order. Subjects are vocabulary hits or capitalized tokens
/// (genus names), verbs and objects come from their vocabularies.
pub struct StructuralExtractor {
    vocab: Vocabulary,
}

impl StructuralExtractor {
    /// The capability is unavailable without all three vocabularies.
    pub fn new(patterns: &SvoPatterns) -> Result<Self> {
        let vocab = Vocabulary::new(patterns);
        if !vocab.is_complete() {
            bail!("structural extraction requires non-empty subject, verb and object vocabularies");
        }
        Ok(Self { vocab })
    }

    fn subjects(&self, tokens: &[Token]) -> Vec<Candidate> {
        let mut out = Vec::new();
        for (i, tok) in tokens.iter().enumerate() {
            if self.vocab.subject_token_matches(&tok.lower) {
                // pull in a leading genus/proper-noun modifier
                let phrase = match tokens.get(i.wrapping_sub(1)) {
                    Some(prev) if i > 0 && is_capitalized(&prev.surface) => {
                        format!("{} {}", prev.surface, tok.surface)
                    }
                    _ => tok.surface.clone(),
                };
                out.push(Candidate {
                    phrase,
                    index: i,
                    vocab_hit: true,
                });
            } else if is_capitalized(&tok.surface) && !is_stop_word(&tok.lower) {
                out.push(Candidate {
                    phrase: tok.surface.clone(),
                    index: i,
                    vocab_hit: false,
                });
            }
        }
        out
    }

    fn verbs(&self, tokens: &[Token]) -> Vec<Candidate> {
        tokens
            .iter()
            .enumerate()
            .filter(|(_, tok)| self.vocab.verb_token_matches(&tok.lower))
            .map(|(i, tok)| Candidate {
                phrase: tok.surface.clone(),
                index: i,
                vocab_hit: true,
            })
            .collect()
    }

    fn objects(&self, tokens: &[Token]) -> Vec<Candidate> {
        let mut out = Vec::new();
        for (i, tok) in tokens.iter().enumerate() {
            if !self.vocab.object_token_matches(&tok.lower) {
                continue;
            }
            // pull in one qualifier ("bright light", "warm temperatures")
            let phrase = match tokens.get(i.wrapping_sub(1)) {
                Some(prev)
                    if i > 0
                        && !is_stop_word(&prev.lower)
                        && !self.vocab.verb_token_matches(&prev.lower)
                        && prev.lower.chars().all(|c| c.is_alphabetic() || c == '-') =>
                {
                    format!("{} {}", prev.surface, tok.surface)
                }
                _ => tok.surface.clone(),
            };
            out.push(Candidate {
                phrase,
                index: i,
                vocab_hit: true,
            });
        }
        out
    }

    fn score(&self, subject: &Candidate, verb: &str, object: &str, sentence: &str) -> f64 {
        let mut score: f64 = 0.6;
        if subject.vocab_hit || self.vocab.subject_text_matches(&subject.phrase) {
            score += 0.2;
        }
        if self.vocab.verb_token_matches(&verb.to_lowercase()) {
            score += 0.1;
        }
        if self.vocab.object_text_matches(object) {
            score += 0.1;
        }
        let len = sentence.chars().count();
        if len > 200 {
            score -= 0.1;
        }
        if (50..=150).contains(&len) {
            score += 0.1;
        }
        score.clamp(0.0, 1.0)
    }
}

impl ExtractStrategy for StructuralExtractor {
    fn name(&self) -> &'static str {
        "structural"
    }

    fn extract(&self, text: &str) -> Vec<SvoTuple> {
        let mut out = Vec::new();
        for (offset, sentence) in split_sentences(text) {
            let tokens = tokenize(sentence);
            if tokens.len() < 3 {
                continue;
            }
            let subjects = self.subjects(&tokens);
            let verbs = self.verbs(&tokens);
            let objects = self.objects(&tokens);
            for subject in &subjects {
                for verb in verbs.iter().filter(|v| v.index > subject.index) {
                    for object in objects.iter().filter(|o| o.index > verb.index) {
                        let confidence =
                            self.score(subject, &verb.phrase, &object.phrase, sentence);
                        out.push(
                            SvoTuple::new(
                                &subject.phrase,
                                &verb.phrase,
                                &object.phrase,
                                confidence,
                                ExtractionMethod::Structural,
                            )
                            .with_context(sentence, sentence, offset),
                        );
                    }
                }
            }
        }
        out
    }
}

fn tokenize(sentence: &str) -> Vec<Token> {
    sentence
        .split_whitespace()
        .filter_map(|raw| {
            let cleaned = raw.trim_matches(|c: char| !(c.is_alphanumeric() || c == '-'));
            if cleaned.is_empty() {
                None
            } else {
                Some(Token {
                    surface: cleaned.to_string(),
                    lower: cleaned.to_lowercase(),
                })
            }
        })
        .collect()
}

fn is_capitalized(token: &str) -> bool {
    token.chars().next().is_some_and(|c| c.is_uppercase())
}

fn is_stop_word(lower: &str) -> bool {
    STOP_WORDS.contains(&lower)
}
