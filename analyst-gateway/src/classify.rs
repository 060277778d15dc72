//! Model reply classification.
//!
//! A reply is STRUCTURED when the substring between its first `{` and last
//! `}` parses as a JSON object whose `type` is one of the configured
//! discriminators. Everything else is plain text.

use crate::document::{ParsedRequirements, RequirementsDocument, SmartAnalysis};
use serde::Deserialize;
use serde_json::Value;

/// Discriminator that triggers document generation.
pub const REQUIREMENTS_KIND: &str = "requirements";

/// Substring in a plain-text reply that asks for a transcript document.
pub const GENERATE_DOC_TRIGGER: &str = "[GENERATE_DOC]";

/// The JSON-candidate part of a reply.
///
/// Trims the reply and, when a `{` is followed somewhere by a `}`, returns
/// the span from the first `{` to the last `}` inclusive.
pub fn extract_json_candidate(reply: &str) -> &str {
    let trimmed = reply.trim();
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if end > start => &trimmed[start..=end],
        _ => trimmed,
    }
}

/// A reply recognised as structured.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredReply {
    /// Value of the `type` discriminator.
    pub kind: String,
    /// The exact JSON-candidate substring.
    pub candidate: String,
    /// Parsed object, forwarded verbatim to the client.
    pub payload: Value,
}

impl StructuredReply {
    pub fn is_requirements(&self) -> bool {
        self.kind == REQUIREMENTS_KIND
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplyKind {
    Structured(StructuredReply),
    PlainText,
}

/// Classifies replies against a configurable discriminator set.
#[derive(Debug, Clone)]
pub struct ReplyClassifier {
    structured_types: Vec<String>,
}

impl ReplyClassifier {
    pub fn new(structured_types: Vec<String>) -> Self {
        Self { structured_types }
    }

    pub fn classify(&self, reply: &str) -> ReplyKind {
        let candidate = extract_json_candidate(reply);

        let payload = match serde_json::from_str::<Value>(candidate) {
            Ok(value @ Value::Object(_)) => value,
            _ => return ReplyKind::PlainText,
        };

        let kind = match payload.get("type").and_then(Value::as_str) {
            Some(kind) if self.structured_types.iter().any(|t| t == kind) => kind.to_string(),
            Some(kind) => {
                tracing::debug!(kind, "Reply JSON has an unrecognised type, treating as text");
                return ReplyKind::PlainText;
            }
            None => return ReplyKind::PlainText,
        };

        ReplyKind::Structured(StructuredReply {
            kind,
            candidate: candidate.to_string(),
            payload,
        })
    }
}

// ============================================================================
// Requirements parsers
// ============================================================================

/// Tries one schema against a JSON-candidate.
pub type RequirementsParser = fn(&str) -> Option<ParsedRequirements>;

/// Schemas tried in order on a `requirements` reply. First match wins.
pub const REQUIREMENTS_PARSERS: &[(&str, RequirementsParser)] =
    &[("detailed", parse_detailed), ("legacy", parse_legacy)];

/// `{"type":"requirements","data":{"project":{...},...}}`
pub fn parse_detailed(candidate: &str) -> Option<ParsedRequirements> {
    #[derive(Deserialize)]
    struct Envelope {
        data: RequirementsDocument,
    }

    serde_json::from_str::<Envelope>(candidate)
        .ok()
        .map(|envelope| ParsedRequirements::Detailed(envelope.data))
}

/// `{"type":"requirements","smart_requirements":{...},"summary":"..."}`
pub fn parse_legacy(candidate: &str) -> Option<ParsedRequirements> {
    serde_json::from_str::<SmartAnalysis>(candidate)
        .ok()
        .map(ParsedRequirements::Legacy)
}

/// Run [`REQUIREMENTS_PARSERS`] in order.
pub fn parse_requirements(candidate: &str) -> Option<ParsedRequirements> {
    REQUIREMENTS_PARSERS.iter().find_map(|(name, parse)| {
        let parsed = parse(candidate);
        if parsed.is_none() {
            tracing::debug!(parser = *name, "Requirements parser did not match");
        }
        parsed
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use analyst_common::config::default_structured_types;
    use proptest::prelude::*;

    fn classifier() -> ReplyClassifier {
        ReplyClassifier::new(default_structured_types())
    }

    #[test]
    fn candidate_extraction() {
        assert_eq!(extract_json_candidate("  hello  "), "hello");
        assert_eq!(
            extract_json_candidate("Here you go: {\"a\":{\"b\":1}} thanks"),
            "{\"a\":{\"b\":1}}"
        );
        assert_eq!(extract_json_candidate("} backwards {"), "} backwards {");
        assert_eq!(extract_json_candidate("only {"), "only {");
    }

    #[test]
    fn questionnaire_is_structured() {
        let reply = "Sure!\n```json\n{\"type\":\"questionnaire\",\"questions\":[{\"id\":\"q1\"}]}\n```";
        match classifier().classify(reply) {
            ReplyKind::Structured(s) => {
                assert_eq!(s.kind, "questionnaire");
                assert_eq!(s.candidate, "{\"type\":\"questionnaire\",\"questions\":[{\"id\":\"q1\"}]}");
                assert_eq!(s.payload["questions"][0]["id"], "q1");
                assert!(!s.is_requirements());
            }
            other => panic!("expected structured, got {other:?}"),
        }
    }

    #[test]
    fn unknown_or_missing_type_is_plain_text() {
        let c = classifier();
        assert_eq!(c.classify("{\"type\":\"poem\"}"), ReplyKind::PlainText);
        assert_eq!(c.classify("{\"questions\":[]}"), ReplyKind::PlainText);
        assert_eq!(c.classify("{\"type\":7}"), ReplyKind::PlainText);
        assert_eq!(c.classify("{not json}"), ReplyKind::PlainText);
        assert_eq!(c.classify("Hello there"), ReplyKind::PlainText);
    }

    #[test]
    fn discriminators_come_from_configuration() {
        let c = ReplyClassifier::new(vec!["poem".into()]);
        assert!(matches!(c.classify("{\"type\":\"poem\"}"), ReplyKind::Structured(_)));
        assert_eq!(c.classify("{\"type\":\"questionnaire\"}"), ReplyKind::PlainText);
    }

    #[test]
    fn detailed_parser_wins_when_both_match() {
        let candidate = r#"{"type":"requirements","data":{"project":{"name":"Shop"}},
            "smart_requirements":{},"summary":"s"}"#;
        assert!(matches!(
            parse_requirements(candidate),
            Some(ParsedRequirements::Detailed(_))
        ));
    }

    #[test]
    fn legacy_parser_is_the_fallback() {
        let candidate = r#"{"type":"requirements","data":{"objectives":[]},
            "smart_requirements":{"specific":"x"},"summary":"Shoe shop"}"#;
        assert!(parse_detailed(candidate).is_none());
        match parse_requirements(candidate) {
            Some(ParsedRequirements::Legacy(smart)) => assert_eq!(smart.summary, "Shoe shop"),
            other => panic!("expected legacy, got {other:?}"),
        }
    }

    #[test]
    fn no_parser_matches() {
        assert!(parse_requirements(r#"{"type":"requirements","data":{}}"#).is_none());
        assert!(parse_requirements("not json").is_none());
    }

    proptest! {
        #[test]
        fn replies_without_braces_are_plain_text(reply in "[^{}]*") {
            prop_assert_eq!(classifier().classify(&reply), ReplyKind::PlainText);
        }

        #[test]
        fn candidate_spans_outermost_braces(
            prefix in "[^{}]*",
            body in "[a-z:, \"]*",
            suffix in "[^{}]*",
        ) {
            let reply = format!("{prefix}{{{body}}}{suffix}");
            let candidate = extract_json_candidate(&reply);
            prop_assert!(candidate.starts_with('{'), "candidate must open with a brace");
            prop_assert!(candidate.ends_with('}'), "candidate must close with a brace");
            prop_assert_eq!(candidate, format!("{{{body}}}"));
        }
    }
}
