//! Prompts for tariff code suggestion and retail name disambiguation.
//!
//! Both prompts are written for small instruction-tuned chat models running
//! at temperature 0 and ask for a bare JSON object in reply.

use serde::Serialize;

/// System prompt for batch tariff code suggestion.
pub const SYSTEM_PROMPT: &str = r#"You are a customs classification assistant for a small retail and wholesale business.

For every product you receive, suggest the most likely 10-digit TN VED (HS-based) tariff code.
- Product names come from supplier invoices and are often truncated or abbreviated.
- Names may be in Russian, Kyrgyz or English.
- If a business activity is given, prefer codes typical for that activity.
- Never invent an id. Return one result per input id.
- If you cannot classify an item, omit it from the results.

Output JSON with a "results" array of {"id": string, "code": string, "confidence": number between 0 and 1}."#;

/// A single product sent to the assistant for classification.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ClassifyItem {
    pub id: String,
    pub name: String,
}

/// User prompt for batch classification.
pub fn make_classification_prompt(activity: Option<&str>, items: &[ClassifyItem]) -> String {
    let activity_line = match activity.map(str::trim).filter(|a| !a.is_empty()) {
        Some(a) => format!("Business activity: {}\n\n", a),
        None => String::new(),
    };

    // serde_json cannot fail on a Vec of plain string structs
    let items_json = serde_json::to_string_pretty(items).unwrap_or_else(|_| "[]".into());

    format!(
        r#"{}Suggest TN VED codes for these products:

{}

Return a JSON object with a "results" array. Each result should have:
- id: The id of the input item
- code: The tariff code, digits only
- confidence: Your confidence from 0 to 1"#,
        activity_line, items_json
    )
}

/// Prompt asking the assistant to pick the best warehouse product for a sale.
pub fn make_pick_prompt(sale_name: &str, options: &[String]) -> String {
    let listing = options
        .iter()
        .enumerate()
        .map(|(i, name)| format!("{}. {}", i, name))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Pick the product from the list that best matches the retail sale.
Return only JSON: {{"best_index": number|null}}
Use null if none of the products is the item that was sold.
Sale: {}
Candidates:
{}"#,
        sale_name, listing
    )
}

/// Example exchanges for better classification accuracy.
pub const FEW_SHOT_EXAMPLES: &[(&str, &str)] = &[
    (
        r#"[{"id":"1","name":"Лестница алюминиевая 5м"},{"id":"2","name":"Дрель ударная Bosch"}]"#,
        r#"{"results":[{"id":"1","code":"7616999008","confidence":0.9},{"id":"2","code":"8467211000","confidence":0.9}]}"#,
    ),
    (
        r#"[{"id":"a7","name":"Краска белая 10л"}]"#,
        r#"{"results":[{"id":"a7","code":"3214101009","confidence":0.6}]}"#,
    ),
];

/// A chat message in the OpenAI-compatible wire shape.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

/// Build the full message list for a classification request.
pub fn build_classification_messages(
    activity: Option<&str>,
    items: &[ClassifyItem],
    include_examples: bool,
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage {
        role: "system",
        content: SYSTEM_PROMPT.to_string(),
    }];

    if include_examples {
        for (input, output) in FEW_SHOT_EXAMPLES {
            messages.push(ChatMessage {
                role: "user",
                content: format!("Suggest TN VED codes for these products:\n\n{}", input),
            });
            messages.push(ChatMessage {
                role: "assistant",
                content: (*output).to_string(),
            });
        }
    }

    messages.push(ChatMessage {
        role: "user",
        content: make_classification_prompt(activity, items),
    });

    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items() -> Vec<ClassifyItem> {
        vec![ClassifyItem {
            id: "42".into(),
            name: "Шуруповерт аккумуляторный".into(),
        }]
    }

    #[test]
    fn test_classification_prompt() {
        let prompt = make_classification_prompt(Some("hardware store"), &items());
        assert!(prompt.contains("Business activity: hardware store"));
        assert!(prompt.contains("Шуруповерт аккумуляторный"));
        assert!(prompt.contains("\"42\""));
    }

    #[test]
    fn test_blank_activity_is_omitted() {
        let prompt = make_classification_prompt(Some("   "), &items());
        assert!(!prompt.contains("Business activity"));
    }

    #[test]
    fn test_pick_prompt_lists_indices() {
        let prompt = make_pick_prompt("краска алина", &["Краска Alina 3л".into(), "Грунт".into()]);
        assert!(prompt.contains("0. Краска Alina 3л"));
        assert!(prompt.contains("1. Грунт"));
        assert!(prompt.contains("best_index"));
    }

    #[test]
    fn test_messages_with_examples() {
        let messages = build_classification_messages(None, &items(), true);
        assert_eq!(messages.first().map(|m| m.role), Some("system"));
        assert_eq!(messages.len(), 2 + FEW_SHOT_EXAMPLES.len() * 2);
        assert!(messages.last().unwrap().content.contains("Шуруповерт"));
    }

    #[test]
    fn test_messages_without_examples() {
        let messages = build_classification_messages(None, &items(), false);
        assert_eq!(messages.len(), 2);
        assert!(!messages.iter().any(|m| m.content.contains("7616999008")));
    }
}
