use crate::types::{Polarity, Result, ScreeningExample};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Loads liked and disliked exemplars from a markdown file:
///
/// ```text
/// # Liked
/// - Title: Deep learning predicts RNA splicing
///   Reason: genomics + deep learning
///   Abstract: ...
/// # Disliked
/// - Title: A survey of survey papers
///   Reason: reviews are not useful
/// ```
pub struct ExampleStore {
    path: PathBuf,
}

impl ExampleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `(liked, disliked)` in file order. A missing file is valid.
    pub fn load(&self) -> Result<(Vec<ScreeningExample>, Vec<ScreeningExample>)> {
        if !self.path.exists() {
            debug!("No examples file at {}", self.path.display());
            return Ok((Vec::new(), Vec::new()));
        }

        let content = std::fs::read_to_string(&self.path)?;
        let (liked, disliked) = parse_examples(&content);
        info!(
            "Loaded {} liked and {} disliked examples from {}",
            liked.len(),
            disliked.len(),
            self.path.display()
        );
        Ok((liked, disliked))
    }
}

#[derive(Clone, Copy)]
enum Field {
    Title,
    Reason,
    Abstract,
}

#[derive(Default)]
struct Draft {
    title: String,
    reason: String,
    abstract_text: String,
}

impl Draft {
    fn field_mut(&mut self, field: Field) -> &mut String {
        match field {
            Field::Title => &mut self.title,
            Field::Reason => &mut self.reason,
            Field::Abstract => &mut self.abstract_text,
        }
    }

    fn finish(self, polarity: Polarity) -> Option<ScreeningExample> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            warn!("Skipping {:?} example without a title", polarity);
            return None;
        }
        let abstract_text = self.abstract_text.trim();
        Some(ScreeningExample {
            title,
            reason: self.reason.trim().to_string(),
            abstract_text: (!abstract_text.is_empty()).then(|| abstract_text.to_string()),
            polarity,
        })
    }
}

fn section_polarity(header: &str) -> Option<Polarity> {
    let lower = header.to_lowercase();
    if lower.contains("dislike") {
        Some(Polarity::Disliked)
    } else if lower.contains("like") {
        Some(Polarity::Liked)
    } else {
        None
    }
}

fn split_key(line: &str) -> Option<(Field, &str)> {
    let (key, value) = line.split_once(':')?;
    let field = match key.trim().to_lowercase().as_str() {
        "title" => Field::Title,
        "reason" | "why" => Field::Reason,
        "abstract" => Field::Abstract,
        _ => return None,
    };
    Some((field, value.trim()))
}

/// Parse the examples markdown into `(liked, disliked)`.
pub fn parse_examples(content: &str) -> (Vec<ScreeningExample>, Vec<ScreeningExample>) {
    let mut liked = Vec::new();
    let mut disliked = Vec::new();

    let mut section: Option<Polarity> = None;
    let mut current: Option<Draft> = None;
    let mut last_field = Field::Title;

    let mut flush = |draft: Option<Draft>, section: Option<Polarity>| {
        if let (Some(draft), Some(polarity)) = (draft, section) {
            if let Some(example) = draft.finish(polarity) {
                match polarity {
                    Polarity::Liked => liked.push(example),
                    Polarity::Disliked => disliked.push(example),
                }
            }
        }
    };

    for raw_line in content.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(header) = line.strip_prefix('#') {
            flush(current.take(), section);
            section = section_polarity(header.trim_start_matches('#'));
            continue;
        }

        if section.is_none() {
            continue;
        }

        let item = line.strip_prefix("- ").or_else(|| line.strip_prefix("* "));
        if let Some(item) = item {
            flush(current.take(), section);
            let mut draft = Draft::default();
            match split_key(item) {
                Some((field, value)) => {
                    draft.field_mut(field).push_str(value);
                    last_field = field;
                }
                None => {
                    // Bare bullet: the whole line is the title
                    draft.title.push_str(item.trim());
                    last_field = Field::Title;
                }
            }
            current = Some(draft);
            continue;
        }

        if let Some(draft) = current.as_mut() {
            match split_key(line) {
                Some((field, value)) => {
                    let target = draft.field_mut(field);
                    if !target.is_empty() {
                        target.push(' ');
                    }
                    target.push_str(value);
                    last_field = field;
                }
                None => {
                    // Continuation of a wrapped value
                    let target = draft.field_mut(last_field);
                    if !target.is_empty() {
                        target.push(' ');
                    }
                    target.push_str(line);
                }
            }
        }
    }
    flush(current.take(), section);

    (liked, disliked)
}
