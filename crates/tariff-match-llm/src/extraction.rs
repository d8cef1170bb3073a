//! Structured answers extracted from assistant output.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Extraction errors.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid response format: {0}")]
    InvalidFormat(String),
}

pub type ExtractionResult<T> = Result<T, ExtractionError>;

/// Tariff codes are 8 to 12 digits; anything around them is noise.
///
/// The run must not touch other digits, so a longer number is never cut down.
static CODE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\D)(\d{8,12})(?:\D|$)").expect("valid regex"));

/// Batch classification output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassificationOutput {
    #[serde(default)]
    pub results: Vec<CodeSuggestion>,
}

/// One suggested code as returned by the assistant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodeSuggestion {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub code: String,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Disambiguation output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PickOutput {
    #[serde(default)]
    pub best_index: Option<i64>,
}

/// Models occasionally emit ids and codes as bare numbers.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

/// Cut the outermost JSON object out of a chat reply.
///
/// Replies are frequently wrapped in markdown fences or prefixed with prose.
fn json_object_slice(text: &str) -> ExtractionResult<&str> {
    let start = text.find('{').ok_or_else(|| {
        ExtractionError::InvalidFormat("No JSON object found in response".into())
    })?;
    let end = text.rfind('}').ok_or_else(|| {
        ExtractionError::InvalidFormat("No closing brace found in response".into())
    })?;
    if end < start {
        return Err(ExtractionError::InvalidFormat(
            "Closing brace precedes opening brace".into(),
        ));
    }
    Ok(&text[start..=end])
}

/// Parse a batch classification reply.
///
/// Suggestions whose code does not contain a well-formed tariff code are dropped.
pub fn parse_classification_output(text: &str) -> ExtractionResult<ClassificationOutput> {
    let output: ClassificationOutput = serde_json::from_str(json_object_slice(text)?)?;

    let results = output
        .results
        .into_iter()
        .filter_map(|s| {
            let code = extract_code(&s.code)?;
            Some(CodeSuggestion {
                id: s.id.trim().to_string(),
                code,
                confidence: s.confidence.map(|c| c.clamp(0.0, 1.0)),
            })
        })
        .filter(|s| !s.id.is_empty())
        .collect();

    Ok(ClassificationOutput { results })
}

/// Parse a disambiguation reply into an index into `option_count` options.
///
/// `None` means the assistant deferred or answered out of range.
pub fn parse_pick_output(text: &str, option_count: usize) -> ExtractionResult<Option<usize>> {
    let output: PickOutput = serde_json::from_str(json_object_slice(text)?)?;
    Ok(output
        .best_index
        .and_then(|i| usize::try_from(i).ok())
        .filter(|&i| i < option_count))
}

/// Pull the first tariff code out of free input such as `"7616999008 - ladders"`.
pub fn extract_code(raw: &str) -> Option<String> {
    CODE_PATTERN
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_classification_output() {
        let json = r#"{"results":[{"id":"1","code":"7616999008","confidence":0.9}]}"#;
        let output = parse_classification_output(json).unwrap();
        assert_eq!(output.results.len(), 1);
        assert_eq!(output.results[0].code, "7616999008");
        assert_eq!(output.results[0].confidence, Some(0.9));
    }

    #[test]
    fn test_parse_classification_with_fences() {
        let reply = "```json\n{\"results\":[{\"id\":7,\"code\":8467211000}]}\n```";
        let output = parse_classification_output(reply).unwrap();
        assert_eq!(output.results[0].id, "7");
        assert_eq!(output.results[0].code, "8467211000");
        assert_eq!(output.results[0].confidence, None);
    }

    #[test]
    fn test_malformed_codes_are_dropped() {
        let json = r#"{"results":[{"id":"1","code":"76-16"},{"id":"2","code":"code 3214101009"}]}"#;
        let output = parse_classification_output(json).unwrap();
        assert_eq!(output.results.len(), 1);
        assert_eq!(output.results[0].id, "2");
        assert_eq!(output.results[0].code, "3214101009");
    }

    #[test]
    fn test_no_json_is_an_error() {
        assert!(matches!(
            parse_classification_output("I cannot help with that"),
            Err(ExtractionError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_parse_pick_output() {
        assert_eq!(parse_pick_output(r#"{"best_index": 2}"#, 5).unwrap(), Some(2));
        assert_eq!(parse_pick_output(r#"{"best_index": null}"#, 5).unwrap(), None);
        assert_eq!(parse_pick_output(r#"{"best_index": 9}"#, 5).unwrap(), None);
        assert_eq!(parse_pick_output(r#"{"best_index": -1}"#, 5).unwrap(), None);
        assert_eq!(
            parse_pick_output("Sure! {\"best_index\": 0}", 1).unwrap(),
            Some(0)
        );
    }

    #[test]
    fn test_extract_code() {
        assert_eq!(extract_code("7616999008"), Some("7616999008".into()));
        assert_eq!(extract_code("код: 8467211000 (дрели)"), Some("8467211000".into()));
        assert_eq!(extract_code("1234567"), None);
        assert_eq!(extract_code(""), None);
    }

    #[test]
    fn test_extract_code_rejects_longer_runs() {
        assert_eq!(extract_code("7616999008123"), None);
        assert_eq!(extract_code("76169990081234"), None);
        assert_eq!(extract_code("tel 76169990081234, code 7616999008"), Some("7616999008".into()));
        assert_eq!(extract_code("7616999008шт"), Some("7616999008".into()));
    }

    proptest::proptest! {
        #[test]
        fn prop_embedded_code_is_found(code in "[0-9]{8,12}", prefix in "[a-zа-я :]{0,10}") {
            let raw = format!("{}{}", prefix, code);
            proptest::prop_assert_eq!(extract_code(&raw), Some(code));
        }
    }
}
