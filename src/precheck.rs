//! Cheap heuristic gate upstream of the AI call.
//!
//! Rejects obvious non-food inputs before spending an analysis call.
//! Checks are deliberately conservative: a false reject is worse than
//! letting a borderline message through.

use lazy_static::lazy_static;
use regex::Regex;

use crate::messages;

/// Outcome of the pre-AI filter pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precheck {
    Pass,
    Reject(&'static str),
}

impl Precheck {
    pub fn passed(&self) -> bool {
        matches!(self, Precheck::Pass)
    }
}

const WATER_EXACT: &[&str] = &["вода", "water", "стакан воды", "попил воды"];

const MEDICINE_KEYWORDS: &[&str] = &["лекарство", "таблетка", "ibuprofen", "paracetamol"];

const VAGUE_WORDS: &[&str] = &["вкусняшка", "еда", "поел", "ням", "что-то"];

lazy_static! {
    static ref HAS_DIGIT: Regex = Regex::new(r"\d").unwrap();
}

/// Reject updates that are neither text nor photo (stickers, voice, ...).
pub fn check_message_type(has_text: bool, has_photo: bool) -> Precheck {
    if has_text || has_photo {
        Precheck::Pass
    } else {
        Precheck::Reject(messages::PRECHECK_NOT_TEXT_OR_PHOTO)
    }
}

/// Text-level checks: empty/junk, water-only, medicine keywords, vague
/// placeholders (text-only with no numerals).
pub fn check_text(text: &str, has_photo: bool) -> Precheck {
    let normalized = text.trim().to_lowercase();

    if normalized.is_empty() || !normalized.chars().any(char::is_alphanumeric) {
        return Precheck::Reject(messages::PRECHECK_NOT_TEXT_OR_PHOTO);
    }

    if WATER_EXACT.contains(&normalized.as_str()) {
        return Precheck::Reject(messages::PRECHECK_WATER);
    }

    if MEDICINE_KEYWORDS.iter().any(|kw| normalized.contains(kw)) {
        return Precheck::Reject(messages::PRECHECK_NOT_TEXT_OR_PHOTO);
    }

    if !has_photo && !HAS_DIGIT.is_match(&normalized) && VAGUE_WORDS.contains(&normalized.as_str())
    {
        return Precheck::Reject(messages::PRECHECK_VAGUE);
    }

    Precheck::Pass
}

/// Reject photos exceeding the configured size limit.
pub fn check_photo_size(file_size_bytes: usize, max_bytes: usize) -> Precheck {
    if file_size_bytes <= max_bytes {
        Precheck::Pass
    } else {
        Precheck::Reject(messages::PRECHECK_PHOTO_TOO_LARGE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_gate() {
        assert!(check_message_type(true, false).passed());
        assert!(check_message_type(false, true).passed());
        assert_eq!(
            check_message_type(false, false),
            Precheck::Reject(messages::PRECHECK_NOT_TEXT_OR_PHOTO)
        );
    }

    #[test]
    fn empty_and_junk_text_rejected() {
        assert!(!check_text("", false).passed());
        assert!(!check_text("   ", false).passed());
        assert!(!check_text("😀😀!!", false).passed());
    }

    #[test]
    fn water_only_rejected() {
        assert_eq!(
            check_text("Water", false),
            Precheck::Reject(messages::PRECHECK_WATER)
        );
        assert_eq!(
            check_text("вода", false),
            Precheck::Reject(messages::PRECHECK_WATER)
        );
        // Water as part of a meal description passes.
        assert!(check_text("chicken with a glass of water", false).passed());
    }

    #[test]
    fn medicine_keywords_rejected() {
        assert!(!check_text("took some ibuprofen", false).passed());
        assert!(!check_text("таблетка аспирина", false).passed());
    }

    #[test]
    fn vague_text_only_rejected_but_passes_with_photo_or_digits() {
        assert_eq!(
            check_text("еда", false),
            Precheck::Reject(messages::PRECHECK_VAGUE)
        );
        assert!(check_text("еда", true).passed());
        // A numeral makes a vague word specific enough to try.
        assert!(check_text("еда 200", false).passed());
    }

    #[test]
    fn normal_descriptions_pass() {
        assert!(check_text("chicken breast 200g", false).passed());
        assert!(check_text("Latte with oat milk", false).passed());
    }

    #[test]
    fn photo_size_limit() {
        assert!(check_photo_size(1024, 2048).passed());
        assert!(check_photo_size(2048, 2048).passed());
        assert_eq!(
            check_photo_size(2049, 2048),
            Precheck::Reject(messages::PRECHECK_PHOTO_TOO_LARGE)
        );
    }
}
