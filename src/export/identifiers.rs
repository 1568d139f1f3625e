//! Normalizes operator input into a deduplicated identifier set.
//!
//! Input arrives either as free text (codes separated by commas, whitespace or
//! newlines) or as a table already decoded from a spreadsheet upload. For tables
//! the identifier column is located by a case-insensitive substring match on the
//! header row, and each cell may itself carry a comma-separated list.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("no column header contains `{token}`")]
    NoIdentifierColumn { token: String },
    #[error("input contains no identifiers")]
    EmptyIdentifierSet,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierInput {
    Text(String),
    Table(Table),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Table {
    pub headers: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,
}

/// Deduplicated identifiers in first-seen order. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct IdentifierSet {
    values: Vec<String>,
}

impl IdentifierSet {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(String::as_str)
    }
}

pub fn parse(input: &IdentifierInput, column_token: &str) -> Result<IdentifierSet, ParseError> {
    let candidates = match input {
        IdentifierInput::Text(raw) => split_text(raw),
        IdentifierInput::Table(table) => table_cells(table, column_token)?,
    };
    collect(candidates)
}

fn split_text(raw: &str) -> Vec<String> {
    raw.split(|ch: char| ch == ',' || ch.is_whitespace())
        .map(str::to_string)
        .collect()
}

fn table_cells(table: &Table, column_token: &str) -> Result<Vec<String>, ParseError> {
    let token = column_token.trim().to_lowercase();
    let column = table
        .headers
        .iter()
        .position(|header| !token.is_empty() && header.to_lowercase().contains(&token))
        .ok_or_else(|| ParseError::NoIdentifierColumn {
            token: column_token.to_string(),
        })?;

    Ok(table
        .rows
        .iter()
        .filter_map(|row| row.get(column))
        .filter_map(cell_text)
        .flat_map(|cell| {
            cell.split(',')
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect())
}

fn cell_text(cell: &Value) -> Option<String> {
    match cell {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(_) | Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Whitespace plus the invisible marks spreadsheet exports leave behind.
fn is_padding(ch: char) -> bool {
    ch.is_whitespace() || matches!(ch, '\u{feff}' | '\u{200b}')
}

fn collect(candidates: Vec<String>) -> Result<IdentifierSet, ParseError> {
    let mut seen = HashSet::new();
    let mut values = Vec::new();
    for candidate in candidates {
        let trimmed = candidate.trim_matches(is_padding);
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_string()) {
            values.push(trimmed.to_string());
        }
    }
    if values.is_empty() {
        return Err(ParseError::EmptyIdentifierSet);
    }
    Ok(IdentifierSet { values })
}

#[cfg(test)]
pub(crate) fn identifier_set(values: &[&str]) -> IdentifierSet {
    collect(values.iter().map(|value| value.to_string()).collect()).expect("non-empty set")
}
