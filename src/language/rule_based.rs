//! Rule-based language services.
//!
//! Entities are runs of capitalized words, plus the leading word of the text when
//! it is not a function word ("charlie was born..." names Charlie). Relations are
//! the short word spans between two consecutive entities.

use super::{LanguageServices, Relation};
use crate::error::{CortexError, Result};

/// Longest predicate (in words) accepted between two entities.
const MAX_PREDICATE_WORDS: usize = 4;

const FUNCTION_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "but", "by", "did", "do", "does", "for", "from", "had",
    "has", "have", "he", "her", "his", "how", "i", "if", "in", "is", "it", "its", "me", "my",
    "no", "not", "of", "on", "or", "our", "she", "so", "that", "the", "their", "them", "then",
    "there", "these", "they", "this", "those", "to", "was", "we", "were", "what", "when",
    "where", "which", "who", "why", "will", "with", "yes", "you", "your",
];

#[derive(Debug, Default, Clone, Copy)]
pub struct RuleBasedLanguage;

impl RuleBasedLanguage {
    pub fn new() -> Self {
        Self
    }
}

struct Token {
    word: String,
    /// Followed by punctuation that ends a name (`,`, `.`, `'s`, ...).
    breaks: bool,
}

fn tokenize(text: &str) -> Vec<Token> {
    text.split_whitespace()
        .filter_map(|raw| {
            let possessive = raw.ends_with("'s") || raw.ends_with("’s");
            let stem = raw
                .strip_suffix("'s")
                .or_else(|| raw.strip_suffix("’s"))
                .unwrap_or(raw);
            let word = stem.trim_matches(|c: char| !c.is_alphanumeric());
            if word.is_empty() {
                return None;
            }
            let trailing = stem.chars().last().is_some_and(|c| !c.is_alphanumeric());
            Some(Token {
                word: word.to_string(),
                breaks: possessive || trailing,
            })
        })
        .collect()
}

fn is_function_word(word: &str) -> bool {
    FUNCTION_WORDS.contains(&word.to_lowercase().as_str())
}

fn is_name_word(word: &str) -> bool {
    word.chars().next().is_some_and(|c| c.is_uppercase())
        && word.chars().all(|c| c.is_alphabetic() || c == '-')
        && !is_function_word(word)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Entity spans as `(start, end)` token ranges, end exclusive.
fn entity_spans(tokens: &[Token]) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let word = &tokens[i].word;
        let leading = i == 0
            && word.chars().all(|c| c.is_alphabetic())
            && !is_function_word(word);
        if !(leading || is_name_word(word)) {
            i += 1;
            continue;
        }
        let start = i;
        while !tokens[i].breaks && i + 1 < tokens.len() && is_name_word(&tokens[i + 1].word) {
            i += 1;
        }
        i += 1;
        spans.push((start, i));
    }
    spans
}

fn span_text(tokens: &[Token], (start, end): (usize, usize)) -> String {
    tokens[start..end]
        .iter()
        .map(|t| capitalize(&t.word))
        .collect::<Vec<_>>()
        .join(" ")
}

impl LanguageServices for RuleBasedLanguage {
    fn restate(&self, content: &str) -> Result<String> {
        let collapsed = content.split_whitespace().collect::<Vec<_>>().join(" ");
        if !collapsed.chars().any(|c| c.is_alphanumeric()) {
            return Err(CortexError::Language("nothing to restate".into()));
        }
        let mut sentence = capitalize(&collapsed);
        if !sentence.ends_with(&['.', '!', '?'][..]) {
            sentence.push('.');
        }
        Ok(sentence)
    }

    fn extract_entities(&self, text: &str) -> Result<Vec<String>> {
        let tokens = tokenize(text);
        let mut entities: Vec<String> = Vec::new();
        for span in entity_spans(&tokens) {
            let name = span_text(&tokens, span);
            if !entities.iter().any(|e| e.eq_ignore_ascii_case(&name)) {
                entities.push(name);
            }
        }
        Ok(entities)
    }

    fn extract_relations(&self, text: &str) -> Result<Vec<Relation>> {
        let tokens = tokenize(text);
        let spans = entity_spans(&tokens);
        let mut relations = Vec::new();
        for pair in spans.windows(2) {
            let (left, right) = (pair[0], pair[1]);
            let between = &tokens[left.1..right.0];
            if between.is_empty() || between.len() > MAX_PREDICATE_WORDS {
                continue;
            }
            let predicate = between
                .iter()
                .map(|t| t.word.to_lowercase())
                .collect::<Vec<_>>()
                .join("_");
            let relation = Relation {
                subject: span_text(&tokens, left),
                predicate,
                object: span_text(&tokens, right),
            };
            if relation.subject != relation.object && !relations.contains(&relation) {
                relations.push(relation);
            }
        }
        Ok(relations)
    }
}
