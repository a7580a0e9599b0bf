//! Removal of LLM formatting artifacts from a raw completion.
//!
//! Models asked for "only the SQL" still wrap answers in markdown fences,
//! prefix them with a label like `SQL:`, or end them with a semicolon. This
//! module strips those artifacts and nothing else; it never decides whether
//! the result is safe to run (see [`crate::sql::classifier`]).

use crate::models::SanitizedQuery;
use regex::{Captures, Regex};
use std::sync::LazyLock;

const FENCE: &str = "```";

/// Opening or closing fence. A tag is consumed when it is a known SQL dialect
/// name, or when any tag is directly followed by a line break. The second
/// form is captured so a query keyword on the fence line can be kept.
static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)```(?:(?:sql|postgresql|postgres|psql|mysql|sqlite|plpgsql)\b[ \t]*\r?\n?|([A-Za-z0-9_+.-]*)[ \t]*\r?\n)?",
    )
    .expect("fence pattern is valid")
});

/// Words that start a query and so are never a fence tag.
const QUERY_KEYWORDS: &[&str] = &["select", "with"];

/// Strip formatting noise from a raw completion.
///
/// Total and pure: the worst case is an empty query. Label and terminator
/// removal run to a fixed point, so for fence-free input
/// `sanitize(sanitize(x)) == sanitize(x)`.
///
/// # Examples
///
/// ```
/// use nlsql_server::sql::sanitize;
///
/// let q = sanitize("```sql\nSELECT * FROM users;\n```");
/// assert_eq!(q.as_str(), "SELECT * FROM users");
///
/// let q = sanitize("SQL: SELECT 1");
/// assert_eq!(q.as_str(), "SELECT 1");
/// ```
pub fn sanitize(raw: &str) -> SanitizedQuery {
    let mut text = strip_fences(raw);

    let mut rest = text.trim();
    while let Some(after_label) = strip_label(rest) {
        rest = after_label.trim_start();
    }
    rest = strip_terminators(rest);

    text = rest.to_string();
    SanitizedQuery::new(text)
}

fn strip_fences(raw: &str) -> String {
    let mut text = raw.to_string();
    // Removing one marker can splice stray backticks into a new one.
    while text.contains(FENCE) {
        text = FENCE_RE
            .replace_all(&text, |caps: &Captures| match caps.get(1) {
                Some(tag) if is_query_keyword(tag.as_str()) => {
                    caps[0][FENCE.len()..].to_string()
                }
                _ => String::new(),
            })
            .into_owned();
    }
    text
}

fn is_query_keyword(word: &str) -> bool {
    QUERY_KEYWORDS.iter().any(|kw| word.eq_ignore_ascii_case(kw))
}

/// Remove a leading `label:` prefix. The label is an ASCII identifier
/// immediately followed by one colon; `a::int` is a cast, not a label.
fn strip_label(text: &str) -> Option<&str> {
    let mut chars = text.char_indices();
    match chars.next() {
        Some((_, c)) if c.is_ascii_alphabetic() => {}
        _ => return None,
    }
    let colon = chars
        .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_'))
        .filter(|(_, c)| *c == ':')
        .map(|(idx, _)| idx)?;
    let after = &text[colon + 1..];
    if after.starts_with(':') {
        return None;
    }
    Some(after)
}

fn strip_terminators(text: &str) -> &str {
    let mut rest = text.trim_end();
    while let Some(stripped) = rest.strip_suffix(';') {
        rest = stripped.trim_end();
    }
    rest
}
