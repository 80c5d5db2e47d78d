//! Reduces an HTML document to readable text.

use std::sync::OnceLock;

use regex::Regex;

/// Elements dropped together with their content.
const DROPPED_ELEMENTS: &[&str] = &["head", "script", "style", "noscript", "iframe", "svg"];

/// Closing tags that end a line of text.
const LINE_BREAKS: &str = r"(?i)<br\s*/?>|</(?:p|div|li|ul|ol|h[1-6]|tr|table|section|article|header|footer|nav|blockquote|pre)\s*>";

/// Cleanup patterns, compiled on first use.
struct Patterns {
    comments: Regex,
    dropped: Vec<Regex>,
    meta_links: Regex,
    line_breaks: Regex,
    tags: Regex,
}

impl Patterns {
    fn get() -> Result<&'static Self, regex::Error> {
        static PATTERNS: OnceLock<Result<Patterns, regex::Error>> = OnceLock::new();
        PATTERNS.get_or_init(Self::compile).as_ref().map_err(Clone::clone)
    }

    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            comments: Regex::new(r"(?s)<!--.*?-->")?,
            dropped: DROPPED_ELEMENTS
                .iter()
                .map(|element| Regex::new(&format!(r"(?is)<{element}\b[^>]*>.*?</{element}\s*>")))
                .collect::<Result<_, _>>()?,
            meta_links: Regex::new(r"(?i)<(?:meta|link)\b[^>]*>")?,
            line_breaks: Regex::new(LINE_BREAKS)?,
            tags: Regex::new(r"(?s)<[^>]*>")?,
        })
    }
}

/// Extracts the visible text of `html`.
///
/// Non-content elements are removed, tags stripped, entities decoded and
/// blank lines dropped. The result is cut at `max_chars` characters.
///
/// # Errors
///
/// Returns an error if the cleanup patterns failed to compile.
pub fn clean_html(html: &str, max_chars: usize) -> Result<String, regex::Error> {
    let patterns = Patterns::get()?;
    let mut text = patterns.comments.replace_all(html, "").into_owned();
    for element in &patterns.dropped {
        text = element.replace_all(&text, "").into_owned();
    }
    text = patterns.meta_links.replace_all(&text, "").into_owned();
    text = patterns.line_breaks.replace_all(&text, "\n").into_owned();
    text = patterns.tags.replace_all(&text, "").into_owned();
    let text = decode_entities(&text);

    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    Ok(truncate(&lines.join("\n"), max_chars))
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push_str(&format!("...\n(content truncated at {max_chars} characters)"));
    cut
}

/// Decodes the common named entities and numeric character references.
#[must_use]
pub fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        rest = &rest[start..];

        let decoded = rest
            .find(';')
            .filter(|&end| end <= 10)
            .and_then(|end| decode_entity(&rest[1..end]).map(|c| (c, end)));

        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &rest[end + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    if let Some(number) = name.strip_prefix('#') {
        let code = match number.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => number.parse().ok()?,
        };
        return char::from_u32(code);
    }
    Some(match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => ' ',
        "copy" => '©',
        "reg" => '®',
        "hellip" => '…',
        "mdash" => '—',
        "ndash" => '–',
        _ => return None,
    })
}
