//! Knowledge extraction: typed facts from an utterance pair.
//!
//! The extractor is a pure function. Patterns live in a table (id, regex,
//! fact builder) so new fact shapes are added by extending the table, not
//! by growing a match arm somewhere. Identical input yields identical
//! output, which the dedup and consolidation layers rely on.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

/// A structured, typed statement extracted from natural-language input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Fact {
    Definition {
        subject: String,
        value: String,
        confidence: f64,
    },
    Causal {
        cause: String,
        effect: String,
        confidence: f64,
    },
    Numerical {
        subject: String,
        value: f64,
        unit: Option<String>,
        confidence: f64,
    },
    Formula {
        variable: String,
        expression: String,
        confidence: f64,
    },
}

impl Fact {
    pub fn kind(&self) -> &'static str {
        match self {
            Fact::Definition { .. } => "definition",
            Fact::Causal { .. } => "causal",
            Fact::Numerical { .. } => "numerical",
            Fact::Formula { .. } => "formula",
        }
    }

    /// Key used to collapse the same fact found by more than one pattern.
    fn dedup_key(&self) -> String {
        match self {
            Fact::Definition { subject, value, .. } => {
                format!("definition|{}|{}", subject, value)
            }
            Fact::Causal { cause, effect, .. } => format!("causal|{}|{}", cause, effect),
            Fact::Numerical { subject, value, .. } => format!("numerical|{}|{}", subject, value),
            Fact::Formula {
                variable,
                expression,
                ..
            } => format!("formula|{}|{}", variable, expression),
        }
    }

    /// Canonical textual render, used for the compressed summary.
    pub fn render(&self) -> String {
        match self {
            Fact::Definition { subject, value, .. } => format!("{} is {}", subject, value),
            Fact::Causal { cause, effect, .. } => format!("{} causes {}", cause, effect),
            Fact::Numerical {
                subject,
                value,
                unit,
                ..
            } => match unit {
                Some(u) => format!("{} = {} {}", subject, value, u),
                None => format!("{} = {}", subject, value),
            },
            Fact::Formula {
                variable,
                expression,
                ..
            } => format!("{} = {}", variable, expression),
        }
    }
}

// =============================================================================
// Pattern table
// =============================================================================

struct Pattern {
    id: &'static str,
    regex: Regex,
    user_only: bool,
    build: fn(&Captures) -> Option<Fact>,
}

fn clean(fragment: &str) -> String {
    fragment.trim().trim_matches(|c: char| c == ',' || c == ';').trim().to_string()
}

fn build_definition(caps: &Captures) -> Option<Fact> {
    let subject = clean(caps.get(1)?.as_str());
    let value = clean(caps.get(2)?.as_str());
    if value.chars().count() <= 3 || subject.is_empty() {
        return None;
    }
    Some(Fact::Definition {
        subject,
        value,
        confidence: 0.8,
    })
}

fn build_causal(caps: &Captures) -> Option<Fact> {
    let cause = clean(caps.get(1)?.as_str());
    let effect = clean(caps.get(2)?.as_str());
    if cause.is_empty() || effect.is_empty() {
        return None;
    }
    Some(Fact::Causal {
        cause,
        effect,
        confidence: 0.75,
    })
}

fn build_numerical(caps: &Captures) -> Option<Fact> {
    let subject = clean(caps.get(1)?.as_str());
    let value: f64 = caps.get(2)?.as_str().parse().ok()?;
    let unit = caps.get(3).map(|m| m.as_str().to_string());
    if subject.is_empty() {
        return None;
    }
    Some(Fact::Numerical {
        subject,
        value,
        unit,
        confidence: 0.85,
    })
}

fn build_formula(caps: &Captures) -> Option<Fact> {
    let variable = clean(caps.get(1)?.as_str());
    let expression = clean(caps.get(2)?.as_str());
    if variable.is_empty() || expression.is_empty() {
        return None;
    }
    Some(Fact::Formula {
        variable,
        expression,
        confidence: 0.9,
    })
}

fn patterns() -> &'static Vec<Pattern> {
    static PATTERNS: OnceLock<Vec<Pattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            Pattern {
                id: "definition",
                regex: Regex::new(
                    r"(?:^|[.!?]\s+)([a-z][a-z0-9_' -]{0,40}?)\s+(?:is defined as|refers to|is known as|known as|means|equals|is|are)\s+([^.!?\n]{2,})",
                )
                .expect("definition pattern compiles"),
                user_only: false,
                build: build_definition,
            },
            Pattern {
                id: "causal",
                regex: Regex::new(
                    r"\b([a-z][a-z0-9_' -]{0,40}?)\s+(?:causes|leads to|results in)\s+([^.!?\n]{2,})",
                )
                .expect("causal pattern compiles"),
                user_only: false,
                build: build_causal,
            },
            Pattern {
                id: "numerical",
                regex: Regex::new(
                    r"\b([a-z][a-z0-9_' -]{0,40}?)\s+(?:is|at|of|equals)\s+(-?\d+(?:\.\d+)?)\s*([a-z%°][a-z%°/0-9]*)?",
                )
                .expect("numerical pattern compiles"),
                user_only: false,
                build: build_numerical,
            },
            Pattern {
                id: "formula",
                regex: Regex::new(r"\b([a-z][a-z0-9_]{0,15})\s*=\s*([^\s=][^.!?\n]*)")
                    .expect("formula pattern compiles"),
                user_only: true,
                build: build_formula,
            },
        ]
    })
}

// =============================================================================
// Extraction
// =============================================================================

/// Extract typed facts from an utterance pair and produce the compressed
/// summary. Pure and deterministic.
pub fn extract(user_text: &str, agent_text: &str) -> (Vec<Fact>, String) {
    let combined = format!("{}. {}", user_text, agent_text).to_lowercase();
    let user_lower = user_text.to_lowercase();

    let mut facts: Vec<Fact> = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for pattern in patterns() {
        let haystack = if pattern.user_only { &user_lower } else { &combined };
        for caps in pattern.regex.captures_iter(haystack) {
            if let Some(fact) = (pattern.build)(&caps) {
                if seen.insert(fact.dedup_key()) {
                    facts.push(fact);
                }
            }
        }
    }

    let summary = if facts.is_empty() {
        compress_text(&combined)
    } else {
        facts.iter().map(Fact::render).collect::<Vec<_>>().join(" | ")
    };

    (facts, summary)
}

/// Fallback compression: strip filler, drop trivially short sentences.
fn compress_text(text: &str) -> String {
    static FILLER: OnceLock<Regex> = OnceLock::new();
    static GREETING: OnceLock<Regex> = OnceLock::new();
    let filler = FILLER.get_or_init(|| {
        Regex::new(r"\b(um|uh|basically|actually|like|you know|i mean|sort of|kind of)\b")
            .expect("filler pattern compiles")
    });
    let greeting = GREETING.get_or_init(|| {
        Regex::new(r"^(hi|hello|hey|good morning|good evening)[,!. ]*")
            .expect("greeting pattern compiles")
    });

    let stripped = filler.replace_all(text, "");
    let stripped = greeting.replace(stripped.trim(), "");

    let sentences: Vec<String> = stripped
        .split(['.', '!', '?'])
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|s| s.chars().count() > 10)
        .collect();

    sentences.join(". ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_extraction() {
        let (facts, summary) = extract(
            "Entropy is a measure of disorder in a system",
            "Right, in both thermodynamics and information theory",
        );
        let def = facts
            .iter()
            .find(|f| matches!(f, Fact::Definition { .. }))
            .expect("definition extracted");
        if let Fact::Definition { subject, value, .. } = def {
            assert_eq!(subject, "entropy");
            assert!(value.contains("disorder"));
        }
        assert!(summary.contains("entropy is"));
    }

    #[test]
    fn test_causal_extraction() {
        let (facts, _) = extract("Deforestation causes soil erosion over time", "");
        assert!(facts.iter().any(|f| matches!(
            f,
            Fact::Causal { cause, .. } if cause.contains("deforestation")
        )));
    }

    #[test]
    fn test_numerical_extraction_with_unit() {
        let (facts, _) = extract("The boiling point of water is 100 celsius", "");
        let num = facts
            .iter()
            .find(|f| matches!(f, Fact::Numerical { .. }))
            .expect("numerical extracted");
        if let Fact::Numerical { value, unit, .. } = num {
            assert_eq!(*value, 100.0);
            assert_eq!(unit.as_deref(), Some("celsius"));
        }
    }

    #[test]
    fn test_formula_from_user_text_only() {
        let (facts, _) = extract("remember e = mc^2 from physics", "sure");
        assert!(facts.iter().any(|f| matches!(
            f,
            Fact::Formula { variable, .. } if variable == "e"
        )));

        // The same formula in agent text alone is not extracted
        let (facts, _) = extract("tell me about energy", "well, e = mc^2");
        assert!(!facts.iter().any(|f| matches!(f, Fact::Formula { .. })));
    }

    #[test]
    fn test_duplicate_facts_kept_once() {
        let (facts, _) = extract(
            "Gravity is the curvature of spacetime",
            "Gravity is the curvature of spacetime",
        );
        let defs = facts
            .iter()
            .filter(|f| matches!(f, Fact::Definition { .. }))
            .count();
        assert_eq!(defs, 1);
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let a = extract("Photosynthesis converts light, because chlorophyll absorbs photons", "indeed");
        let b = extract("Photosynthesis converts light, because chlorophyll absorbs photons", "indeed");
        assert_eq!(a.0, b.0);
        assert_eq!(a.1, b.1);
    }

    #[test]
    fn test_compression_strips_filler() {
        let (facts, summary) = extract(
            "um so you know the weather looked quite gloomy this whole week",
            "noted, staying indoors then",
        );
        assert!(facts.is_empty());
        assert!(!summary.contains("um"));
        assert!(!summary.contains("you know"));
        assert!(summary.contains("weather"));
    }

    #[test]
    fn test_short_sentences_dropped_in_compression() {
        let (_, summary) = extract("ok. fine. the committee approved the budget for next year", "");
        assert!(!summary.starts_with("ok"));
        assert!(summary.contains("committee"));
    }
}
