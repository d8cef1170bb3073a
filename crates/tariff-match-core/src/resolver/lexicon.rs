//! Keyword rules and category filters.
//!
//! Tables are scanned in order and the first match wins, so more specific
//! entries (knitwear before garments, "t-shirt" before "shirt") must come first.

use serde::{Deserialize, Serialize};

/// A keyword that either maps straight to a code or constrains candidate rows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeywordRule {
    /// Substring of the normalized key that triggers the rule
    pub keyword: String,
    /// Code assigned when the rule fires; `None` for constraint-only rules
    #[serde(default)]
    pub code: Option<String>,
    /// Candidate labels must contain one of these tokens
    #[serde(default)]
    pub include_tokens: Vec<String>,
}

/// A keyword hit extracted from a normalized key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordHit {
    pub keyword: String,
    pub include_tokens: Vec<String>,
}

/// Material keyword narrowing a filter to a single prefix.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MaterialPrefix {
    pub keyword: String,
    pub prefix: String,
}

/// Coarse domain gate on candidate codes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategoryFilter {
    pub keywords: Vec<String>,
    pub code_prefixes: Vec<String>,
    /// Ordered; the first material present in the key wins
    #[serde(default)]
    pub materials: Vec<MaterialPrefix>,
}

impl CategoryFilter {
    /// Check whether a code passes the filter.
    pub fn allows(&self, code: &str) -> bool {
        self.code_prefixes.iter().any(|p| code.starts_with(p.as_str()))
    }

    fn matches(&self, key: &str) -> bool {
        self.keywords.iter().any(|k| key.contains(k.as_str()))
    }
}

/// Ordered rule and filter tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lexicon {
    rules: Vec<KeywordRule>,
    filters: Vec<CategoryFilter>,
}

impl Default for Lexicon {
    fn default() -> Self {
        Self::new(default_rules(), default_filters())
    }
}

impl Lexicon {
    pub fn new(rules: Vec<KeywordRule>, filters: Vec<CategoryFilter>) -> Self {
        Self { rules, filters }
    }

    /// Lexicon with no rules and no filters.
    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    pub fn rules(&self) -> &[KeywordRule] {
        &self.rules
    }

    pub fn filters(&self) -> &[CategoryFilter] {
        &self.filters
    }

    /// All rules whose keyword occurs in `key`, in table order.
    pub fn extract_keyword_hits(&self, key: &str) -> Vec<KeywordHit> {
        if key.is_empty() {
            return Vec::new();
        }
        self.rules
            .iter()
            .filter(|r| !r.keyword.is_empty() && key.contains(r.keyword.as_str()))
            .map(|r| KeywordHit {
                keyword: r.keyword.clone(),
                include_tokens: r.include_tokens.clone(),
            })
            .collect()
    }

    /// Code of the first rule with a code whose keyword occurs in `key`.
    pub fn match_keyword_rule(&self, key: &str) -> Option<&str> {
        if key.is_empty() {
            return None;
        }
        self.rules
            .iter()
            .filter(|r| !r.keyword.is_empty() && key.contains(r.keyword.as_str()))
            .find_map(|r| r.code.as_deref())
    }

    /// First filter whose keywords occur in `key`, narrowed by material.
    pub fn category_filter(&self, key: &str) -> Option<CategoryFilter> {
        if key.is_empty() {
            return None;
        }
        let filter = self.filters.iter().find(|f| f.matches(key))?;

        if filter.code_prefixes.len() > 1 {
            let narrowed = filter
                .materials
                .iter()
                .find(|m| key.contains(m.keyword.as_str()));
            if let Some(material) = narrowed {
                return Some(CategoryFilter {
                    keywords: filter.keywords.clone(),
                    code_prefixes: vec![material.prefix.clone()],
                    materials: Vec::new(),
                });
            }
        }

        Some(filter.clone())
    }
}

fn rule(keyword: &str, code: Option<&str>, include_tokens: &[&str]) -> KeywordRule {
    KeywordRule {
        keyword: keyword.into(),
        code: code.map(Into::into),
        include_tokens: include_tokens.iter().map(|t| (*t).into()).collect(),
    }
}

fn filter(keywords: &[&str], prefixes: &[&str], materials: &[(&str, &str)]) -> CategoryFilter {
    CategoryFilter {
        keywords: keywords.iter().map(|k| (*k).into()).collect(),
        code_prefixes: prefixes.iter().map(|p| (*p).into()).collect(),
        materials: materials
            .iter()
            .map(|(keyword, prefix)| MaterialPrefix {
                keyword: (*keyword).into(),
                prefix: (*prefix).into(),
            })
            .collect(),
    }
}

/// Built-in keyword rules.
pub fn default_rules() -> Vec<KeywordRule> {
    vec![
        // Ladders
        rule("лестниц", Some("7616999008"), &["лестниц", "стремянк", "ladder"]),
        rule("стремянк", Some("7616999008"), &["лестниц", "стремянк", "ladder"]),
        // Power tools
        rule("дрел", Some("8467211000"), &["дрел", "сверл", "drill"]),
        rule("перфоратор", Some("8467211000"), &["дрел", "сверл", "drill"]),
        rule("шуруповерт", Some("8467211000"), &["дрел", "сверл", "drill"]),
        // Constraint-only
        rule("краск", None, &["краск", "лак", "эмал"]),
        rule("sprayer", None, &["spray", "распыл", "пульвериз"]),
        rule("ladder", None, &["ladder", "лестниц", "стремянк"]),
    ]
}

/// Built-in category filters.
pub fn default_filters() -> Vec<CategoryFilter> {
    vec![
        filter(&["t-shirt", "футболк", "sweater", "свитер", "трикотаж"], &["61"], &[]),
        filter(
            &["shirt", "jacket", "куртк", "рубашк", "брюк", "trousers", "cotton", "хлопк"],
            &["61", "62"],
            &[],
        ),
        filter(&["shoe", "boot", "обув", "ботин", "кроссовк"], &["64"], &[]),
        filter(
            &["ladder", "лестниц", "стремянк"],
            &["7616", "7326"],
            &[
                ("aluminum", "7616"),
                ("алюмин", "7616"),
                ("steel", "7326"),
                ("стал", "7326"),
            ],
        ),
        filter(&["дрел", "перфоратор", "шуруповерт", "drill"], &["8467"], &[]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_keyword_rule() {
        let lexicon = Lexicon::default();
        assert_eq!(
            lexicon.match_keyword_rule("стремянка алюминиевая 5 ступ."),
            Some("7616999008")
        );
        assert_eq!(lexicon.match_keyword_rule("дрель ударная"), Some("8467211000"));
        assert_eq!(lexicon.match_keyword_rule("краска белая"), None);
        assert_eq!(lexicon.match_keyword_rule(""), None);
    }

    #[test]
    fn test_first_rule_wins() {
        let lexicon = Lexicon::new(
            vec![
                rule("лест", Some("1111111111"), &[]),
                rule("лестниц", Some("2222222222"), &[]),
            ],
            Vec::new(),
        );
        assert_eq!(lexicon.match_keyword_rule("лестница"), Some("1111111111"));
    }

    #[test]
    fn test_extract_keyword_hits() {
        let lexicon = Lexicon::default();
        let hits = lexicon.extract_keyword_hits("краска для стремянки");
        let keywords: Vec<_> = hits.iter().map(|h| h.keyword.as_str()).collect();
        assert_eq!(keywords, vec!["стремянк", "краск"]);
        assert!(hits[1].include_tokens.contains(&"эмал".to_string()));
    }

    #[test]
    fn test_category_filter_order() {
        let lexicon = Lexicon::default();
        let f = lexicon.category_filter("blue cotton t-shirt xl").unwrap();
        assert_eq!(f.code_prefixes, vec!["61"]);

        let f = lexicon.category_filter("denim jacket").unwrap();
        assert_eq!(f.code_prefixes, vec!["61", "62"]);

        assert!(lexicon.category_filter("usb cable").is_none());
    }

    #[test]
    fn test_material_narrowing() {
        let lexicon = Lexicon::default();
        let f = lexicon.category_filter("aluminum ladder").unwrap();
        assert_eq!(f.code_prefixes, vec!["7616"]);

        let f = lexicon.category_filter("лестница стальная").unwrap();
        assert_eq!(f.code_prefixes, vec!["7326"]);

        let f = lexicon.category_filter("ladder 3m").unwrap();
        assert_eq!(f.code_prefixes, vec!["7616", "7326"]);
    }

    #[test]
    fn test_filter_allows() {
        let f = filter(&["shirt"], &["61", "62"], &[]);
        assert!(f.allows("6109100000"));
        assert!(f.allows("6205200000"));
        assert!(!f.allows("8517120000"));
    }
}
