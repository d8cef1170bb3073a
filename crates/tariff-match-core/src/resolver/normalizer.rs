//! Product name normalizer.
//!
//! Handles:
//! - Compatibility folding (NFKC) and lower-casing
//! - Letter unification (ё→е, Latin accented letters → base letter)
//! - Stripping of punctuation and combining marks (only `.` and `-` survive)
//! - Abbreviation expansion (ladder.→aluminum ladder, алюм.→алюминиевая)

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

static DISALLOWED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\p{L}\p{N}\s.\-]+").expect("valid regex"));

static DEFAULT_NORMALIZER: Lazy<Normalizer> = Lazy::new(Normalizer::new);

/// Normalize with the built-in abbreviation table.
pub fn normalize_key(text: &str) -> String {
    DEFAULT_NORMALIZER.normalize(text)
}

/// Normalizer for product names.
#[derive(Debug, Clone)]
pub struct Normalizer {
    /// Truncated token (with trailing dot) → full words
    abbreviations: HashMap<String, String>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Normalizer {
    /// Create a new normalizer with default abbreviations.
    pub fn new() -> Self {
        Self {
            abbreviations: Self::default_abbreviations(),
        }
    }

    /// Normalizer that only canonicalizes text, with no abbreviations.
    pub fn without_abbreviations() -> Self {
        Self {
            abbreviations: HashMap::new(),
        }
    }

    /// Normalize free text into a comparable key.
    ///
    /// Empty or whitespace-only input yields `""`.
    pub fn normalize(&self, text: &str) -> String {
        let canonical = canonicalize(text);
        if self.abbreviations.is_empty() {
            return canonical;
        }

        let mut words: Vec<&str> = Vec::new();
        for token in canonical.split(' ') {
            let Some(expansion) = self.abbreviations.get(token) else {
                words.push(token);
                continue;
            };
            let expanded: Vec<&str> = expansion.split(' ').collect();
            // "paint sprayer." must not become "paint paint sprayer"
            let head = expanded.len() - 1;
            let already = (1..=head)
                .rev()
                .find(|&k| words.ends_with(&expanded[..k]))
                .unwrap_or(0);
            words.extend_from_slice(&expanded[already..]);
        }
        words.join(" ")
    }

    /// Add a custom abbreviation.
    ///
    /// Both sides are canonicalized; an abbreviation must end in `.` and the
    /// expansion may not itself contain abbreviations.
    pub fn add_abbreviation(&mut self, abbreviation: &str, expansion: &str) {
        let abbreviation = canonicalize(abbreviation);
        let expansion = canonicalize(expansion);
        if !abbreviation.ends_with('.') || abbreviation.contains(' ') || expansion.is_empty() {
            tracing::warn!(%abbreviation, "ignoring malformed abbreviation");
            return;
        }
        self.abbreviations.insert(abbreviation, expansion);
    }

    /// Default abbreviation table.
    fn default_abbreviations() -> HashMap<String, String> {
        let mut map = HashMap::new();

        // Ladders and tools
        map.insert("ladder.".into(), "aluminum ladder".into());
        map.insert("sprayer.".into(), "paint sprayer".into());
        map.insert("стрем.".into(), "стремянка".into());
        map.insert("лест.".into(), "лестница".into());
        map.insert("шуруп.".into(), "шуруповерт".into());
        map.insert("перф.".into(), "перфоратор".into());

        // Materials
        map.insert("алюм.".into(), "алюминиевая".into());
        map.insert("alum.".into(), "aluminum".into());
        map.insert("нерж.".into(), "нержавеющая".into());
        map.insert("оцинк.".into(), "оцинкованный".into());
        map.insert("стал.".into(), "стальная".into());

        // Paints
        map.insert("краск.".into(), "краска".into());
        map.insert("эмал.".into(), "эмаль".into());
        map.insert("водоэмульс.".into(), "водоэмульсионная".into());

        // Misc
        map.insert("эл.".into(), "электрический".into());
        map.insert("уп.".into(), "упаковка".into());

        map
    }
}

/// Case folding, letter unification, punctuation stripping, whitespace collapse.
fn canonicalize(text: &str) -> String {
    let folded: String = text
        .nfkc()
        .flat_map(char::to_lowercase)
        .map(unify_letter)
        .collect();

    DISALLOWED
        .replace_all(&folded, "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Fold letter variants to a single form.
///
/// Only Latin letters lose their accents: Cyrillic `й` must stay distinct from `и`.
fn unify_letter(c: char) -> char {
    match c {
        'ё' => 'е',
        c if (c as u32) >= 0xC0 && (c as u32) < 0x250 => {
            let mut base = c;
            unicode_normalization::char::decompose_canonical(c, |d| {
                if base == c && d.is_alphabetic() {
                    base = d;
                }
            });
            base
        }
        c => c,
    }
}
