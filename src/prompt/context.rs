//! Deterministic prompt context built from the source registry.
//!
//! Everything here is a pure function of its inputs: the same prompt and the
//! same source snapshot always produce byte-identical output.

use serde_json::json;

use crate::collaborators::QueryResult;
use crate::sources::model::DataSource;

/// Rows of the last result included in a data preview.
pub const PREVIEW_SAMPLE_ROWS: usize = 3;

const MIXED_CASE_NOTE: &str =
    "Note: column names may appear with underscores or in mixed case.";

/// Build the prompt sent to the model: the trimmed prompt followed by one
/// block per source and an aggregate list of column hints.
pub fn build_prompt_context(prompt: &str, sources: &[DataSource]) -> String {
    let mut segments = Vec::new();

    let trimmed = prompt.trim();
    if !trimmed.is_empty() {
        segments.push(trimmed.to_string());
    }

    let all_hints: Vec<String> = sources
        .iter()
        .flat_map(|source| source.columns.iter().map(|column| column_hint(column)))
        .collect();

    for (index, source) in sources.iter().enumerate() {
        segments.push(source_block(index + 1, source));
    }
    if !sources.is_empty() && !all_hints.is_empty() {
        segments.push(MIXED_CASE_NOTE.to_string());
    }

    if !all_hints.is_empty() {
        segments.push(format!("All columns:\n{}", all_hints.join("\n")));
    }

    segments.join("\n\n")
}

fn source_block(index: usize, source: &DataSource) -> String {
    let mut lines = vec![format!("Data source {}: {}", index, source.locator)];
    if let Some(sheet) = source.sheet_name.as_deref() {
        lines.push(format!("Sheet: {}", sheet));
    }
    if let Some(connection) = source.connection_info.as_deref() {
        lines.push(format!("Connection: {}", connection));
    }
    if let Some(expression) = source.read_expression() {
        lines.push(format!("Suggested read: {}", expression));
    }
    if !source.columns.is_empty() {
        let hints: Vec<String> = source.columns.iter().map(|c| column_hint(c)).collect();
        lines.push(format!("Column hints: {}", hints.join(", ")));
    }
    lines.join("\n")
}

/// Describe a column the way a person would refer to it.
///
/// `order_total` becomes `order_total (reads as: order total | Order Total)`.
pub fn column_hint(column: &str) -> String {
    let cleaned: String = column
        .chars()
        .filter(|c| !matches!(c, '"' | '\'' | '`'))
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return column.to_string();
    }

    let spaced = split_words(cleaned);
    let spaced = spaced.trim();
    if spaced.is_empty() {
        return cleaned.to_string();
    }

    format!(
        "{} (reads as: {} | {})",
        cleaned,
        spaced.to_lowercase(),
        title_case(spaced)
    )
}

/// Replace `_`/`-` runs with a space and break lower-to-upper camel boundaries.
fn split_words(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut prev: Option<char> = None;
    let mut in_separator = false;

    for c in text.chars() {
        if c == '_' || c == '-' {
            if !in_separator {
                out.push(' ');
                in_separator = true;
            }
            prev = Some(' ');
            continue;
        }
        in_separator = false;

        if c.is_ascii_uppercase()
            && prev.is_some_and(|p| p.is_ascii_lowercase() || p.is_ascii_digit())
        {
            out.push(' ');
        }
        out.push(c);
        prev = Some(c);
    }
    out
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.as_str().to_lowercase().chars())
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// One line per source: `locator[#sheet][@connection]`. `None` without sources.
pub fn source_descriptor(sources: &[DataSource]) -> Option<String> {
    if sources.is_empty() {
        return None;
    }
    let lines: Vec<String> = sources
        .iter()
        .map(|source| {
            let mut line = source.locator.clone();
            if let Some(sheet) = source.sheet_name.as_deref() {
                line.push('#');
                line.push_str(sheet);
            }
            if let Some(connection) = source.connection_info.as_deref() {
                line.push('@');
                line.push_str(connection);
            }
            line
        })
        .collect();
    Some(lines.join("\n"))
}

/// JSON sample of the data the query will run against.
///
/// Uses the last result when it has rows, otherwise the header of the first
/// source with known columns.
pub fn data_preview(last_result: Option<&QueryResult>, sources: &[DataSource]) -> Option<String> {
    if let Some(result) = last_result.filter(|r| !r.rows.is_empty()) {
        let sample: Vec<&Vec<String>> = result.rows.iter().take(PREVIEW_SAMPLE_ROWS).collect();
        return Some(json!({ "header": result.columns, "sample": sample }).to_string());
    }

    sources
        .iter()
        .find(|source| !source.columns.is_empty())
        .map(|source| json!({ "header": source.columns, "sample": [] }).to_string())
}
