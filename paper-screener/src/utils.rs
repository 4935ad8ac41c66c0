/// Text processing utilities
pub mod text {
    /// Tags that sit inside a word, e.g. `<i>cis</i>-regulatory`.
    const INLINE_TAGS: &[&str] = &[
        "a", "abbr", "b", "code", "em", "i", "mml:math", "math", "sc", "small", "span", "strong", "sub", "sup", "u",
    ];

    /// Strip tags from an HTML fragment and collapse whitespace.
    ///
    /// A `<` only opens a tag when followed by a letter, `/`, `!` or `?`, so
    /// text like `p < 0.05` survives. Block tags separate words, inline tags
    /// do not.
    pub fn strip_html(html: &str) -> String {
        let mut text = String::with_capacity(html.len());
        let mut rest = html;

        while let Some(start) = rest.find('<') {
            text.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            let opens_tag = after
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || matches!(c, '/' | '!' | '?'));

            match after.find('>') {
                Some(end) if opens_tag => {
                    if !INLINE_TAGS.contains(&tag_name(&after[..end]).as_str()) {
                        text.push(' ');
                    }
                    rest = &after[end + 1..];
                }
                _ => {
                    text.push('<');
                    rest = after;
                }
            }
        }
        text.push_str(rest);

        normalize_whitespace(&decode_entities(&text))
    }

    fn tag_name(tag: &str) -> String {
        tag.trim_start_matches('/')
            .split(|c: char| c.is_whitespace() || c == '/')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase()
    }

    /// Decode the handful of entities feeds actually use in abstracts.
    pub fn decode_entities(text: &str) -> String {
        text.replace("&nbsp;", " ")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&#39;", "'")
            .replace("&apos;", "'")
            .replace("&amp;", "&")
    }

    pub fn normalize_whitespace(text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Truncate to at most `max_chars` characters, appending `...` when cut.
    /// Counts chars, so multi-byte text is never split mid-character.
    pub fn truncate_chars(text: &str, max_chars: usize) -> String {
        match text.char_indices().nth(max_chars) {
            Some((byte_index, _)) => format!("{}...", text[..byte_index].trim_end()),
            None => text.to_string(),
        }
    }
}

/// URL utilities
pub mod links {
    use url::Url;

    /// Validate RSS feed URL format
    pub fn is_valid_feed_url(url_str: &str) -> bool {
        match Url::parse(url_str) {
            Ok(url) => url.scheme() == "http" || url.scheme() == "https",
            Err(_) => false,
        }
    }

    /// Host part used as the politeness key.
    pub fn host_of(url_str: &str) -> Option<String> {
        Url::parse(url_str).ok()?.host_str().map(|h| h.to_string())
    }
}

/// Time utilities
pub mod time {
    use chrono::{DateTime, Duration, Utc};

    /// Start of a look-back window of `days` days ending now.
    pub fn days_ago(days: i64) -> DateTime<Utc> {
        Utc::now() - Duration::days(days)
    }

    /// Format duration in human-readable form
    pub fn format_duration(duration: Duration) -> String {
        let total_seconds = duration.num_seconds();

        if total_seconds < 60 {
            format!("{}s", total_seconds)
        } else if total_seconds < 3600 {
            format!("{}m", total_seconds / 60)
        } else if total_seconds < 86400 {
            format!("{}h", total_seconds / 3600)
        } else {
            format!("{}d", total_seconds / 86400)
        }
    }
}
