//! Shared entity extraction used by both the utility scorer's density
//! factors and the compressor's faithfulness gate.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

pub const DIRECTIVE_KEYWORDS: &[&str] = &["MUST", "NEVER", "ALWAYS", "REQUIRED", "FORMAT"];

fn capitalized_word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[A-Z][a-zA-Z]+\b").expect("capitalized word pattern is valid"))
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d+(?:\.\d+)?\b").expect("number pattern is valid"))
}

fn uuid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b")
            .expect("uuid pattern is valid")
    })
}

fn iso_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{4}-\d{2}-\d{2}\b").expect("iso date pattern is valid"))
}

fn screaming_snake_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[A-Z][A-Z0-9]*(?:_[A-Z0-9]+)+\b").expect("screaming snake pattern is valid"))
}

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https?://\S+").expect("url pattern is valid"))
}

fn id_n_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bid_\d+\b").expect("id_n pattern is valid"))
}

/// The set of "entities" used by the faithfulness Jaccard score:
/// capitalized words, numeric literals, UUIDs, and directive keywords.
pub fn extract_entities(text: &str) -> HashSet<String> {
    let mut entities = HashSet::new();
    for m in capitalized_word_re().find_iter(text) {
        entities.insert(m.as_str().to_string());
    }
    for m in number_re().find_iter(text) {
        entities.insert(m.as_str().to_string());
    }
    for m in uuid_re().find_iter(text) {
        entities.insert(m.as_str().to_lowercase());
    }
    for kw in DIRECTIVE_KEYWORDS {
        if Regex::new(&format!(r"\b{}\b", regex::escape(kw)))
            .expect("directive keyword pattern is valid")
            .is_match(text)
        {
            entities.insert((*kw).to_string());
        }
    }
    entities
}

/// An entity is "critical" (must survive compression, or the faithfulness
/// score gets no boost) if it's a pure number, an all-caps token, or a
/// directive keyword.
pub fn is_critical(entity: &str) -> bool {
    if DIRECTIVE_KEYWORDS.contains(&entity) {
        return true;
    }
    if entity.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return true;
    }
    entity.chars().all(|c| c.is_uppercase() || !c.is_alphabetic())
        && entity.chars().any(|c| c.is_alphabetic())
}

pub fn count_uuids(text: &str) -> usize {
    uuid_re().find_iter(text).count()
}

pub fn count_identifiers(text: &str) -> usize {
    count_uuids(text)
        + id_n_re().find_iter(text).count()
        + screaming_snake_re().find_iter(text).count()
        + url_re().find_iter(text).count()
}

pub fn count_entities_for_density(text: &str) -> usize {
    capitalized_word_re().find_iter(text).count()
        + number_re().find_iter(text).count()
        + iso_date_re().find_iter(text).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_capitalized_words_numbers_and_keywords() {
        let entities = extract_entities("Alice MUST deliver 42 widgets by Friday.");
        assert!(entities.contains("Alice"));
        assert!(entities.contains("MUST"));
        assert!(entities.contains("42"));
        assert!(entities.contains("Friday"));
    }

    #[test]
    fn uuid_extraction_is_case_insensitive() {
        let entities = extract_entities("ref 123E4567-E89B-12D3-A456-426614174000 here");
        assert_eq!(entities.iter().filter(|e| e.contains('-')).count(), 1);
    }

    #[test]
    fn critical_entities_are_numbers_all_caps_and_keywords() {
        assert!(is_critical("MUST"));
        assert!(is_critical("42"));
        assert!(is_critical("JSON"));
        assert!(!is_critical("Friday"));
    }

    #[test]
    fn identifier_density_counts_urls_and_constants() {
        let n = count_identifiers("see https://example.com and MAX_RETRY_COUNT for id_7");
        assert!(n >= 3);
    }
}
