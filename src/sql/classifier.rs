//! Read-only classification of sanitized queries.
//!
//! [`KeywordClassifier`] is a denylist, not a parser. It rejects any
//! whole-word occurrence of a write, DDL, privilege, or procedural keyword,
//! then requires the text to start with `select`. Keywords inside string literals or
//! comments are rejected as well; that false positive is accepted.
//!
//! The orchestrator only sees the [`QueryClassifier`] trait, so a stricter
//! implementation (see [`crate::sql::parser`]) can be swapped in.

use crate::models::{SanitizedQuery, ValidatedQuery};
use regex::Regex;
use std::sync::LazyLock;

/// The only statement a query may start with.
pub const READ_KEYWORD: &str = "select";

/// Forbidden keywords, in the order they are checked.
pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "drop",
    "delete",
    "truncate",
    "alter",
    "create",
    "insert",
    "update",
    "grant",
    "revoke",
    "exec",
    "execute",
    "procedure",
    "function",
];

static FORBIDDEN_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    FORBIDDEN_KEYWORDS
        .iter()
        .map(|kw| {
            let re = Regex::new(&format!(r"\b{}\b", kw)).expect("keyword pattern is valid");
            (*kw, re)
        })
        .collect()
});

/// Why a query was not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Text does not start with SELECT (includes empty text)
    NotSelect,
    /// A forbidden keyword occurs as a whole word
    ForbiddenKeyword(&'static str),
    /// Strict mode: the SQL parser could not parse the text
    Unparseable(String),
    /// Strict mode: more than one statement
    MultipleStatements(usize),
    /// Strict mode: the single statement is not a query
    NotAQuery(String),
}

impl Rejection {
    /// The keyword that triggered the rejection, if any.
    pub fn keyword(&self) -> Option<&'static str> {
        match self {
            Self::ForbiddenKeyword(kw) => Some(*kw),
            _ => None,
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotSelect => write!(f, "Only SELECT queries are allowed"),
            Self::ForbiddenKeyword(kw) => write!(f, "Query contains forbidden keyword: {}", kw),
            Self::Unparseable(e) => write!(f, "Failed to parse SQL statement: {}", e),
            Self::MultipleStatements(n) => {
                write!(f, "Only a single statement is allowed, found {}", n)
            }
            Self::NotAQuery(kind) => write!(f, "Only SELECT queries are allowed, found {}", kind),
        }
    }
}

/// Decides whether a sanitized query may be executed.
pub trait QueryClassifier: Send + Sync {
    fn classify(&self, query: SanitizedQuery) -> Result<ValidatedQuery, Rejection>;

    /// Name for logging.
    fn name(&self) -> &'static str;
}

/// The keyword denylist classifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }
}

impl QueryClassifier for KeywordClassifier {
    fn classify(&self, query: SanitizedQuery) -> Result<ValidatedQuery, Rejection> {
        check_keywords(query.as_str())?;
        Ok(ValidatedQuery::new(query))
    }

    fn name(&self) -> &'static str {
        "keyword"
    }
}

/// Apply the keyword policy to raw text.
///
/// # Examples
///
/// ```
/// use nlsql_server::sql::classifier::{check_keywords, Rejection};
///
/// assert!(check_keywords("SELECT created_at FROM users").is_ok());
/// assert_eq!(
///     check_keywords("SELECT 1; DROP TABLE users"),
///     Err(Rejection::ForbiddenKeyword("drop"))
/// );
/// ```
pub fn check_keywords(sql: &str) -> Result<(), Rejection> {
    let lower = sql.to_lowercase();

    // Keywords first, so `DELETE FROM t` is reported as "delete"
    for (keyword, pattern) in FORBIDDEN_PATTERNS.iter() {
        if pattern.is_match(&lower) {
            return Err(Rejection::ForbiddenKeyword(*keyword));
        }
    }

    if !lower.starts_with(READ_KEYWORD) {
        return Err(Rejection::NotSelect);
    }

    Ok(())
}

/// Classify with the default keyword classifier.
pub fn classify(query: SanitizedQuery) -> Result<ValidatedQuery, Rejection> {
    KeywordClassifier.classify(query)
}
