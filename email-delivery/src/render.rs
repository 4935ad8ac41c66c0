use chrono::{DateTime, Utc};
use interfaces::defs::{FeedGroup, ScreeningVerdict};
use interfaces::digest::{Digest, DigestItem};

const EMPTY_MESSAGE: &str = "No relevant papers found.";

fn section_title(group: FeedGroup) -> &'static str {
    match group {
        FeedGroup::HighQuality => "High-quality journals",
        FeedGroup::Other => "Other feeds",
    }
}

fn format_date(date: Option<DateTime<Utc>>) -> String {
    date.map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "N/A".to_string())
}

/// One line explaining why the paper was kept.
fn relevance(verdict: &ScreeningVerdict) -> Option<String> {
    let summary = verdict.summary.one_line();
    if !summary.is_empty() {
        return Some(summary);
    }
    let reasons: Vec<&str> = [
        verdict.criteria.field_match.justification.as_deref(),
        verdict.criteria.method_match.justification.as_deref(),
    ]
    .into_iter()
    .flatten()
    .collect();
    (!reasons.is_empty()).then(|| reasons.join("; "))
}

fn has_authors(item: &DigestItem) -> bool {
    let authors = item.entry.authors.trim();
    !authors.is_empty() && authors != "Unknown"
}

/// `[sender] N relevant paper(s) found (YYYY-MM-DD)`
pub fn subject_line(digest: &Digest, sender_name: &str) -> String {
    format!(
        "[{}] {} relevant paper(s) found ({})",
        sender_name,
        digest.item_count(),
        digest.generated_at.format("%Y-%m-%d")
    )
}

pub fn render_plain(digest: &Digest) -> String {
    if digest.is_empty() {
        return EMPTY_MESSAGE.to_string();
    }

    let mut out = String::new();
    out.push_str("Summary\n");
    out.push_str(&format!("{}\n", "-".repeat(40)));
    out.push_str(&format!(
        "Period: {} to {}\n",
        format_date(digest.period_from),
        format_date(digest.period_to)
    ));
    out.push_str(&format!("Journals/Feeds: {}\n", digest.stats.feeds));
    out.push_str(&format!("Papers screened: {}\n", digest.stats.screened));
    out.push_str(&format!("Relevant papers: {}\n", digest.item_count()));
    out.push('\n');

    let mut index = 0;
    for section in &digest.sections {
        let title = section_title(section.group);
        out.push_str(&format!("{}\n", title));
        out.push_str(&format!("{}\n", "=".repeat(40)));
        out.push('\n');

        for item in &section.items {
            index += 1;
            out.push_str(&format!("{}. {}\n", index, item.entry.title));
            out.push_str(&format!("   Source: {}\n", item.entry.source));
            if has_authors(item) {
                out.push_str(&format!("   Authors: {}\n", item.entry.authors));
            }
            out.push_str(&format!("   Link: {}\n", item.entry.link));
            if let Some(relevance) = relevance(&item.verdict) {
                out.push_str(&format!("   Relevance: {}\n", relevance));
            }
            out.push('\n');
        }
    }

    out.trim_end().to_string()
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Mail-client friendly HTML with inline styles.
pub fn render_html(digest: &Digest) -> String {
    if digest.is_empty() {
        return format!("<html><body><p>{}</p></body></html>", EMPTY_MESSAGE);
    }

    let mut html = vec![
        "<html><body>".to_string(),
        r#"<div style="font-family: Arial, sans-serif; font-size: 14px;">"#.to_string(),
        r#"<div style="margin-bottom: 20px; padding: 12px; background: #e8f0fe; border-radius: 8px;">"#.to_string(),
        r#"<h3 style="margin: 0 0 8px 0; color: #1a73e8;">Summary</h3>"#.to_string(),
        format!(
            r#"<p style="margin: 4px 0;"><b>Period:</b> {} to {}</p>"#,
            format_date(digest.period_from),
            format_date(digest.period_to)
        ),
        format!(r#"<p style="margin: 4px 0;"><b>Journals/Feeds:</b> {}</p>"#, digest.stats.feeds),
        format!(r#"<p style="margin: 4px 0;"><b>Papers screened:</b> {}</p>"#, digest.stats.screened),
        format!(r#"<p style="margin: 4px 0;"><b>Relevant papers:</b> {}</p>"#, digest.item_count()),
        "</div>".to_string(),
    ];

    let mut index = 0;
    for section in &digest.sections {
        html.push(format!(
            r#"<h2 style="color: #1a73e8;">{}</h2>"#,
            section_title(section.group)
        ));

        for item in &section.items {
            index += 1;
            let link = escape_html(&item.entry.link);
            html.push(
                r#"<div style="margin-bottom: 20px; padding: 12px; border-left: 3px solid #1a73e8; background: #f8f9fa;">"#
                    .to_string(),
            );
            html.push(format!(
                r#"<p style="margin: 0 0 8px 0;"><b style="font-size: 15px;">{}. {}</b></p>"#,
                index,
                escape_html(&item.entry.title)
            ));
            html.push(format!(
                r#"<p style="margin: 4px 0;"><b>Source:</b> {}</p>"#,
                escape_html(&item.entry.source)
            ));
            if has_authors(item) {
                html.push(format!(
                    r#"<p style="margin: 4px 0;"><b>Authors:</b> {}</p>"#,
                    escape_html(&item.entry.authors)
                ));
            }
            html.push(format!(
                r#"<p style="margin: 4px 0;"><b>Link:</b> <a href="{}" style="color: #1a73e8;">{}</a></p>"#,
                link, link
            ));
            if let Some(relevance) = relevance(&item.verdict) {
                html.push(format!(
                    r#"<p style="margin: 4px 0;"><b>Relevance:</b> {}</p>"#,
                    escape_html(&relevance)
                ));
            }
            html.push("</div>".to_string());
        }
    }

    html.push("</div>".to_string());
    html.push("</body></html>".to_string());
    html.join("\n")
}
