//! Clean-up of generated query text before it is executed.

use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

/// Normalize model output into executable query text.
///
/// Code fences and trailing semicolons are removed. A single statement that
/// parses is re-rendered in canonical form (upper-case keywords); anything
/// else is returned trimmed so the engine reports the real error.
pub fn normalize_query(text: &str) -> String {
    let stripped = strip_trailing_semicolons(strip_code_fence(text.trim()));

    match Parser::parse_sql(&GenericDialect {}, stripped) {
        Ok(statements) if statements.len() == 1 => statements[0].to_string(),
        Ok(statements) => {
            tracing::debug!(
                "Keeping query text as-is: expected one statement, got {}",
                statements.len()
            );
            stripped.to_string()
        }
        Err(e) => {
            tracing::debug!("Keeping query text as-is: {}", e);
            stripped.to_string()
        }
    }
}

/// Language tags models put on a query fence.
const FENCE_TAGS: &[&str] = &[
    "sql", "json", "duckdb", "postgresql", "postgres", "mysql", "sqlite", "tsql", "plsql",
];

/// Remove a surrounding ``` fence, including an optional language tag.
fn strip_code_fence(text: &str) -> &str {
    let Some(inner) = text.strip_prefix("```") else {
        return text;
    };
    let inner = inner.strip_suffix("```").unwrap_or(inner);

    match inner.split_once('\n') {
        Some((tag, rest)) if is_fence_tag(tag.trim()) => rest.trim(),
        _ => inner.trim(),
    }
}

fn is_fence_tag(tag: &str) -> bool {
    tag.is_empty() || FENCE_TAGS.iter().any(|known| known.eq_ignore_ascii_case(tag))
}

fn strip_trailing_semicolons(text: &str) -> &str {
    text.trim_end_matches(|c: char| c == ';' || c.is_whitespace())
}
