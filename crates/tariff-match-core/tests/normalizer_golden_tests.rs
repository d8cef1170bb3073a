//! Golden tests for the product name normalizer.
//!
//! These tests verify normalization against known invoice and cashier inputs.

use tariff_match_core::resolver::{normalize_key, Normalizer};

/// Test case from golden file.
struct GoldenCase {
    id: &'static str,
    input: &'static str,
    expected: &'static str,
}

fn get_golden_cases() -> Vec<GoldenCase> {
    vec![
        GoldenCase {
            id: "ladder-abbreviation",
            input: "ladder.",
            expected: "aluminum ladder",
        },
        GoldenCase {
            id: "ladder-abbreviation-upper",
            input: "Ladder.",
            expected: "aluminum ladder",
        },
        GoldenCase {
            id: "sprayer-abbreviation",
            input: "Sprayer. Model 3",
            expected: "paint sprayer model 3",
        },
        GoldenCase {
            id: "cyrillic-material",
            input: "  Стремянка   АЛЮМ.  5 ступ. ",
            expected: "стремянка алюминиевая 5 ступ.",
        },
        GoldenCase {
            id: "yo-unification",
            input: "Ёлка искусственная",
            expected: "елка искусственная",
        },
        GoldenCase {
            id: "short-i-kept",
            input: "Йогурт",
            expected: "йогурт",
        },
        GoldenCase {
            id: "latin-accents",
            input: "Café Crème",
            expected: "cafe creme",
        },
        GoldenCase {
            id: "punctuation",
            input: "Эмаль ПФ-115 (белая), 2.7кг",
            expected: "эмаль пф-115 белая 2.7кг",
        },
        GoldenCase {
            id: "quotes",
            input: "Дрель «Bosch» GSB-13",
            expected: "дрель bosch gsb-13",
        },
        GoldenCase {
            id: "fullwidth",
            input: "ＡＢＣ-１２",
            expected: "abc-12",
        },
        GoldenCase {
            id: "two-abbreviations",
            input: "Шуруп. эл.",
            expected: "шуруповерт электрический",
        },
        GoldenCase {
            id: "paint-abbreviation",
            input: "Краска   водоэмульс.   белая",
            expected: "краска водоэмульсионная белая",
        },
        GoldenCase {
            id: "abbreviation-needs-dot",
            input: "ladder steel",
            expected: "ladder steel",
        },
        GoldenCase {
            id: "stress-mark",
            input: "Доро\u{301}жка резиновая",
            expected: "дорожка резиновая",
        },
        GoldenCase {
            id: "glued-punctuation",
            input: "Краска/эмаль 3,5л",
            expected: "краскаэмаль 35л",
        },
        GoldenCase {
            id: "expansion-after-own-noun",
            input: "Paint sprayer.",
            expected: "paint sprayer",
        },
        GoldenCase {
            id: "empty",
            input: "",
            expected: "",
        },
        GoldenCase {
            id: "only-punctuation",
            input: "!!! ,,, ???",
            expected: "",
        },
    ]
}

#[test]
fn test_golden_cases() {
    let normalizer = Normalizer::new();

    for case in get_golden_cases() {
        let normalized = normalizer.normalize(case.input);
        assert_eq!(normalized, case.expected, "Case {}: key mismatch", case.id);
    }
}

#[test]
fn test_golden_outputs_are_fixed_points() {
    let normalizer = Normalizer::new();

    for case in get_golden_cases() {
        let once = normalizer.normalize(case.input);
        assert_eq!(
            normalizer.normalize(&once),
            once,
            "Case {}: normalizing twice changed the key",
            case.id
        );
    }
}

#[test]
fn test_shared_normalizer_matches_default() {
    let normalizer = Normalizer::new();

    for case in get_golden_cases() {
        assert_eq!(normalize_key(case.input), normalizer.normalize(case.input));
    }
}

#[test]
fn test_case_variants_share_a_key() {
    let normalizer = Normalizer::new();

    let variants = vec![
        ("Paint Sprayer Model 3", "paint sprayer model 3"),
        ("КРАСКА АЛИНА", "краска алина"),
        ("Дрель  ударная", "дрель ударная"),
        ("ЁЖИК", "ежик"),
    ];

    for (a, b) in variants {
        assert_eq!(
            normalizer.normalize(a),
            normalizer.normalize(b),
            "{} and {} should normalize to the same key",
            a,
            b
        );
    }
}

#[test]
fn test_custom_abbreviations() {
    let mut normalizer = Normalizer::without_abbreviations();
    assert_eq!(normalizer.normalize("ladder."), "ladder.");

    normalizer.add_abbreviation("Кист.", "Кисть малярная");
    normalizer.add_abbreviation("no-dot", "ignored");
    normalizer.add_abbreviation("two words.", "ignored");

    assert_eq!(normalizer.normalize("кист. 50мм"), "кисть малярная 50мм");
    assert_eq!(normalizer.normalize("no-dot"), "no-dot");
    assert_eq!(normalizer.normalize("two words."), "two words.");
}
