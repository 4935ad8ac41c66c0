use crate::types::{CriteriaResult, Judgment, PaperSummary};
use serde_json::Value;

/// Judgments and summary read from one model answer. Anything that could
/// not be read stays `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedOutput {
    pub criteria: CriteriaResult,
    pub summary: PaperSummary,
}

/// Read a model answer: the outermost JSON object if there is one, else
/// the `FIELD_MATCH:` / `METHOD_MATCH:` / `SUMMARY:` line format.
pub fn parse_model_output(raw: &str) -> ParsedOutput {
    if let Some(value) = extract_json_object(raw) {
        let parsed = from_json(&value);
        if parsed != ParsedOutput::default() {
            return parsed;
        }
    }
    from_lines(raw)
}

fn extract_json_object(raw: &str) -> Option<Value> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&raw[start..=end])
        .ok()
        .filter(|value| value.is_object())
}

fn lenient_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        Value::String(s) => word_bool(s),
        _ => None,
    }
}

fn word_bool(text: &str) -> Option<bool> {
    let word = text
        .trim()
        .split(|c: char| !c.is_alphanumeric())
        .find(|w| !w.is_empty())?
        .to_lowercase();
    match word.as_str() {
        "yes" | "true" | "1" | "y" => Some(true),
        "no" | "false" | "0" | "n" => Some(false),
        _ => None,
    }
}

fn non_empty(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.as_str())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        _ => return None,
    };
    clean_value(&text)
}

fn clean_value(text: &str) -> Option<String> {
    let text = text.trim();
    match text.to_lowercase().as_str() {
        "" | "null" | "none" | "n/a" | "-" => None,
        _ => Some(text.to_string()),
    }
}

fn judgment_from_json(value: Option<&Value>) -> Judgment {
    match value {
        Some(Value::Object(map)) => {
            let matched = ["value", "match", "matched"]
                .iter()
                .find_map(|key| map.get(*key))
                .and_then(lenient_bool);
            let justification = ["reason", "justification"]
                .iter()
                .find_map(|key| non_empty(map.get(*key)));
            Judgment { matched, justification }
        }
        Some(other) => Judgment {
            matched: lenient_bool(other),
            justification: None,
        },
        None => Judgment::missing(),
    }
}

fn from_json(value: &Value) -> ParsedOutput {
    let criteria = CriteriaResult {
        field_match: judgment_from_json(value.get("field_match")),
        method_match: judgment_from_json(value.get("method_match")),
    };

    let summary = match value.get("summary") {
        Some(Value::Object(map)) => PaperSummary {
            problem: non_empty(map.get("problem")),
            method: non_empty(map.get("method")),
            data: non_empty(map.get("data")),
            highlights: non_empty(map.get("highlights")),
        },
        Some(Value::String(text)) => summary_from_line(text),
        _ => PaperSummary::default(),
    };

    ParsedOutput { criteria, summary }
}

fn judgment_from_line(rest: &str) -> Judgment {
    let rest = rest.trim();
    let matched = word_bool(rest);
    // "yes - genomics matches" keeps the tail as the reason
    let justification = matched.and_then(|_| {
        rest.split_once(|c: char| c == '-' || c == ',' || c == '(' || c == ':')
            .and_then(|(_, tail)| clean_value(tail.trim_end_matches(')')))
    });
    Judgment { matched, justification }
}

fn summary_from_line(text: &str) -> PaperSummary {
    let mut summary = PaperSummary::default();
    for segment in text.split('|') {
        let Some((key, value)) = segment.split_once(':') else {
            continue;
        };
        let value = clean_value(value);
        match key.trim().to_lowercase().as_str() {
            "problem" => summary.problem = value,
            "method" => summary.method = value,
            "data" => summary.data = value,
            "highlights" => summary.highlights = value,
            _ => {}
        }
    }
    summary
}

fn from_lines(raw: &str) -> ParsedOutput {
    let mut parsed = ParsedOutput {
        criteria: CriteriaResult {
            field_match: Judgment::missing(),
            method_match: Judgment::missing(),
        },
        summary: PaperSummary::default(),
    };

    for line in raw.lines() {
        let line = line.trim().trim_start_matches(['*', '-', '#', ' ']);
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        match key.trim().trim_matches('*').to_uppercase().as_str() {
            "FIELD_MATCH" => parsed.criteria.field_match = judgment_from_line(rest),
            "METHOD_MATCH" => parsed.criteria.method_match = judgment_from_line(rest),
            "SUMMARY" => parsed.summary = summary_from_line(rest),
            _ => {}
        }
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clean_json() {
        let raw = r#"{"field_match": {"value": true, "reason": "genomics"},
                      "method_match": {"value": false, "reason": "wet lab only"},
                      "summary": {"problem": "gene regulation", "method": "CRISPR screen",
                                  "data": null, "highlights": ["novel targets", "in vivo"]}}"#;
        let parsed = parse_model_output(raw);

        assert_eq!(parsed.criteria.field_match, Judgment::new(true, "genomics"));
        assert_eq!(parsed.criteria.method_match, Judgment::new(false, "wet lab only"));
        assert_eq!(parsed.summary.problem.as_deref(), Some("gene regulation"));
        assert_eq!(parsed.summary.data, None);
        assert_eq!(parsed.summary.highlights.as_deref(), Some("novel targets, in vivo"));
    }

    #[test]
    fn tolerates_fences_and_yes_no_strings() {
        let raw = "Here is my answer:\n```json\n{\"field_match\": {\"value\": \"yes\"}, \"method_match\": \"No\"}\n```";
        let parsed = parse_model_output(raw);

        assert_eq!(parsed.criteria.field_match.matched, Some(true));
        assert_eq!(parsed.criteria.field_match.justification, None);
        assert_eq!(parsed.criteria.method_match.matched, Some(false));
        assert!(parsed.summary.is_empty());
    }

    #[test]
    fn falls_back_to_line_format() {
        let raw = "FIELD_MATCH: yes - genomics\nMETHOD_MATCH: no\n\
                   SUMMARY: Problem: protein structure prediction | Method: transformer | Highlights: SOTA";
        let parsed = parse_model_output(raw);

        assert_eq!(parsed.criteria.field_match, Judgment::new(true, "genomics"));
        assert_eq!(parsed.criteria.method_match.matched, Some(false));
        assert_eq!(parsed.summary.problem.as_deref(), Some("protein structure prediction"));
        assert_eq!(parsed.summary.method.as_deref(), Some("transformer"));
        assert_eq!(parsed.summary.data, None);
        assert_eq!(parsed.summary.highlights.as_deref(), Some("SOTA"));
    }

    #[test]
    fn partial_answers_leave_missing_judgments() {
        let parsed = parse_model_output(r#"{"field_match": {"value": true, "reason": "fits"}}"#);
        assert_eq!(parsed.criteria.field_match.matched, Some(true));
        assert!(parsed.criteria.method_match.is_missing());

        let parsed = parse_model_output("FIELD_MATCH: maybe\nMETHOD_MATCH: yes");
        assert!(parsed.criteria.field_match.is_missing());
        assert_eq!(parsed.criteria.method_match.matched, Some(true));
    }

    #[test]
    fn garbage_yields_nothing() {
        let parsed = parse_model_output("I cannot help with that.");
        assert!(parsed.criteria.field_match.is_missing());
        assert!(parsed.criteria.method_match.is_missing());
        assert!(parsed.summary.is_empty());
    }
}
