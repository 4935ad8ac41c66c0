use crate::types::{EntryId, FeedEntry, FeedGroup, ScreeningExample};
use crate::utils::text::truncate_chars;
use serde::Serialize;

/// Liked-exemplar abstracts are cut to this many characters.
pub const EXAMPLE_ABSTRACT_CHARS: usize = 200;
/// Exemplars at the head of each list that the model should weigh most.
pub const PRIMARY_EXAMPLES: usize = 3;
/// Upper bound on the candidate abstract sent to the model.
pub const MAX_ABSTRACT_CHARS: usize = 4000;
pub const DEFAULT_MAX_TOKENS: u32 = 600;

const SYSTEM_PROMPT: &str = "You are an academic paper screening assistant. You decide whether a paper \
matches a researcher's interests and you answer with a single JSON object only.";

const RESPONSE_SCHEMA: &str = r#"{
  "field_match": {"value": true or false, "reason": "one sentence"},
  "method_match": {"value": true or false, "reason": "one sentence"},
  "summary": {
    "problem": "research field or problem, short phrase",
    "method": "computational or experimental methods",
    "data": "new dataset or resource, or null",
    "highlights": "other key points, comma-separated"
  }
}"#;

/// Provider-agnostic request for one screening call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScreeningRequest {
    pub entry_id: EntryId,
    pub group: FeedGroup,
    pub system: String,
    pub prompt: String,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    max_tokens: u32,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TOKENS)
    }
}

impl PromptBuilder {
    pub fn new(max_tokens: u32) -> Self {
        Self { max_tokens }
    }

    /// Build the screening request for `entry`. Pure: identical inputs give
    /// byte-identical requests.
    pub fn build(
        &self,
        interests: &str,
        liked: &[ScreeningExample],
        disliked: &[ScreeningExample],
        entry: &FeedEntry,
    ) -> ScreeningRequest {
        let mut prompt = String::new();

        prompt.push_str("## Research Interests\n");
        prompt.push_str(interests.trim());
        prompt.push_str("\n\n");

        if !liked.is_empty() {
            prompt.push_str("## Liked Paper Examples (screen IN papers like these)\n");
            write_examples(&mut prompt, liked, true);
            prompt.push('\n');
        }

        if !disliked.is_empty() {
            prompt.push_str("## Disliked Paper Examples (screen OUT papers like these)\n");
            write_examples(&mut prompt, disliked, false);
            prompt.push('\n');
        }

        write_paper(&mut prompt, entry);

        prompt.push_str("## Instructions\n");
        prompt.push_str("1. Decide whether the research FIELD of the paper matches the interests.\n");
        prompt.push_str("2. Decide whether the METHOD of the paper matches the interests.\n");
        prompt.push_str("3. Give a one-sentence reason for each decision.\n");
        prompt.push_str("4. Summarize the paper: problem, method, data (only if a new dataset or resource is introduced, otherwise null) and highlights.\n");
        prompt.push_str("5. If only the title is available, fill the summary with keywords taken from the title.\n");
        if !liked.is_empty() || !disliked.is_empty() {
            prompt.push_str("6. Calibrate against the liked and disliked examples; [primary] examples weigh most.\n");
        }
        prompt.push('\n');

        prompt.push_str("## Response Format\n");
        prompt.push_str("Reply with exactly one JSON object and nothing else:\n");
        prompt.push_str(RESPONSE_SCHEMA);
        prompt.push('\n');

        ScreeningRequest {
            entry_id: entry.id.clone(),
            group: entry.group,
            system: SYSTEM_PROMPT.to_string(),
            prompt,
            max_tokens: self.max_tokens,
        }
    }
}

fn write_examples(out: &mut String, examples: &[ScreeningExample], include_abstract: bool) {
    for (index, example) in examples.iter().enumerate() {
        let marker = if index < PRIMARY_EXAMPLES { " [primary]" } else { "" };
        out.push_str(&format!("{}.{} Title: {}\n", index + 1, marker, example.title));
        if include_abstract {
            if let Some(abstract_text) = &example.abstract_text {
                out.push_str(&format!("   Abstract: {}\n", truncate_chars(abstract_text, EXAMPLE_ABSTRACT_CHARS)));
            }
        }
        if !example.reason.is_empty() {
            out.push_str(&format!("   Reason: {}\n", example.reason));
        }
    }
}

fn write_paper(out: &mut String, entry: &FeedEntry) {
    let or_unknown = |value: &str| if value.trim().is_empty() { "Unknown".to_string() } else { value.to_string() };

    out.push_str("## Paper\n");
    out.push_str(&format!("- Title: {}\n", entry.title));
    out.push_str(&format!("- Authors: {}\n", or_unknown(&entry.authors)));
    out.push_str(&format!("- Source: {}\n", or_unknown(&entry.source)));
    if entry.is_title_only() {
        out.push_str("- Abstract: (title only)\n");
    } else {
        out.push_str(&format!("- Abstract: {}\n", truncate_chars(entry.summary_raw.trim(), MAX_ABSTRACT_CHARS)));
    }
    out.push('\n');
}
