//! Instruction template sent to the backend.

use crate::db::DatabaseType;
use crate::models::Question;

/// Schema description used when no schema file is configured.
pub const DEFAULT_SCHEMA_DESCRIPTION: &str = "\
- Table: users
  - id (SERIAL PRIMARY KEY)
  - name (VARCHAR(100))
  - created_at (TIMESTAMP)";

/// Build the generation prompt for one question.
///
/// The question is embedded verbatim between double quotes. The schema text
/// is inserted as-is, so it should already be a readable outline.
pub fn build_prompt(question: &Question, schema: &str, dialect: DatabaseType) -> String {
    format!(
        r#"You are a {dialect} expert. Write a valid SQL query to answer this question.

Question: "{question}"

Database schema:
{schema}

Rules:
1. Return ONLY the SQL query, no explanations
2. Use standard {dialect} syntax
3. Do not include semicolons
4. Do not use markdown formatting
5. Query must start with SELECT

SQL Query:"#,
        dialect = dialect.display_name(),
        question = question.as_str(),
        schema = schema.trim_end(),
    )
}
