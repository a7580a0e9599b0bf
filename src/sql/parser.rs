//! Parser-backed classifier for strict mode.
//!
//! [`ParserClassifier`] first applies the keyword policy unchanged, then
//! parses the text with [sqlparser](https://docs.rs/sqlparser/) using the
//! dialect of the configured database. The text must be exactly one
//! `Statement::Query`. This closes gaps the denylist cannot see, such as
//! several SELECTs chained with semicolons.

use crate::db::DatabaseType;
use crate::models::{SanitizedQuery, ValidatedQuery};
use crate::sql::classifier::{QueryClassifier, Rejection, check_keywords};
use sqlparser::ast::Statement;
use sqlparser::dialect::{Dialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};

/// Get the appropriate SQL dialect for the given database type.
fn get_dialect(db_type: DatabaseType) -> Box<dyn Dialect> {
    match db_type {
        DatabaseType::PostgreSQL => Box::new(PostgreSqlDialect {}),
        DatabaseType::MySQL => Box::new(MySqlDialect {}),
        DatabaseType::SQLite => Box::new(SQLiteDialect {}),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ParserClassifier {
    db_type: DatabaseType,
}

impl ParserClassifier {
    pub fn new(db_type: DatabaseType) -> Self {
        Self { db_type }
    }
}

impl QueryClassifier for ParserClassifier {
    fn classify(&self, query: SanitizedQuery) -> Result<ValidatedQuery, Rejection> {
        check_keywords(query.as_str())?;
        check_single_query(query.as_str(), self.db_type)?;
        Ok(ValidatedQuery::new(query))
    }

    fn name(&self) -> &'static str {
        "parser"
    }
}

/// Require `sql` to parse to exactly one query statement.
pub fn check_single_query(sql: &str, db_type: DatabaseType) -> Result<(), Rejection> {
    let dialect = get_dialect(db_type);

    let statements = Parser::parse_sql(dialect.as_ref(), sql)
        .map_err(|e| Rejection::Unparseable(e.to_string()))?;

    match statements.as_slice() {
        [] => Err(Rejection::NotSelect),
        [Statement::Query(_)] => Ok(()),
        [other] => Err(Rejection::NotAQuery(statement_name(other))),
        many => Err(Rejection::MultipleStatements(many.len())),
    }
}

/// Number of non-empty statements in `sql`, split on `;` outside string
/// literals, quoted identifiers and comments.
pub fn count_statements(sql: &str, db_type: DatabaseType) -> Result<usize, String> {
    let dialect = get_dialect(db_type);
    let tokens = Tokenizer::new(dialect.as_ref(), sql)
        .tokenize()
        .map_err(|e| e.to_string())?;

    let mut count = 0;
    let mut in_statement = false;
    for token in tokens {
        match token {
            Token::SemiColon => in_statement = false,
            Token::Whitespace(_) | Token::EOF => {}
            _ if !in_statement => {
                count += 1;
                in_statement = true;
            }
            _ => {}
        }
    }
    Ok(count)
}

/// Leading keyword of a statement, for error messages.
fn statement_name(stmt: &Statement) -> String {
    stmt.to_string()
        .split_whitespace()
        .next()
        .unwrap_or("unknown")
        .to_uppercase()
}
