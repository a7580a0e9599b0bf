//! SQL text handling: sanitizing completions and classifying them as
//! read-only.

pub mod classifier;
pub mod parser;
pub mod sanitizer;

pub use classifier::{FORBIDDEN_KEYWORDS, KeywordClassifier, QueryClassifier, Rejection, classify};
pub use parser::ParserClassifier;
pub use sanitizer::sanitize;
