//! Turns a pasted Markdown or CSV table into rubric criteria, levels and cells.
//!
//! The first row is the header: criterion column, an optional weight column
//! (header mentions "peso", "weight" or `%`), then one column per performance
//! level from worst to best. Every following row is a criterion.

use crate::domain::error::DomainError;
use crate::domain::rubric::{CellDraft, CriterionDraft, LevelDraft, ParsedRubric, TableFormat};
use crate::grading::gradient;

pub fn parse_table(input: &str, format: TableFormat) -> Result<ParsedRubric, DomainError> {
    let rows: Vec<Vec<String>> = match format {
        TableFormat::Markdown => input
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !is_separator_line(line))
            .map(split_markdown_row)
            .collect(),
        TableFormat::Csv => input
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(split_csv_row)
            .collect(),
    };

    if rows.len() < 2 {
        return Err(DomainError::Parse(
            "invalid table format, need a header row and at least one data row".to_string(),
        ));
    }

    let header = &rows[0];
    let has_weight_column = header.len() > 2 && is_weight_header(&header[1]);
    let level_start = if has_weight_column { 2 } else { 1 };
    let level_names: Vec<&String> = header.iter().skip(level_start).collect();
    if level_names.is_empty() {
        return Err(DomainError::Parse(
            "at least one performance level is required".to_string(),
        ));
    }

    let colors = gradient::level_colors(level_names.len());
    let levels: Vec<LevelDraft> = level_names
        .iter()
        .zip(colors)
        .enumerate()
        .map(|(i, (name, color))| LevelDraft {
            name: (*name).clone(),
            order: i as i32,
            score_value: (i + 1) as f64,
            color,
        })
        .collect();

    let data_rows = &rows[1..];
    let uniform_weight = 1.0 / data_rows.len() as f64;
    let mut criteria = Vec::with_capacity(data_rows.len());
    let mut cells = Vec::new();

    for (index, row) in data_rows.iter().enumerate() {
        let name = row.first().map(|s| s.trim()).unwrap_or_default();
        if name.is_empty() {
            return Err(DomainError::Parse(format!(
                "row {} is missing a criterion name",
                index + 2
            )));
        }
        let order = index as i32;
        let weight = if has_weight_column {
            row.get(1)
                .and_then(|raw| parse_weight(raw))
                .unwrap_or(uniform_weight)
        } else {
            uniform_weight
        };
        criteria.push(CriterionDraft {
            name: name.to_string(),
            order,
            weight,
        });

        for level in &levels {
            if let Some(text) = row.get(level_start + level.order as usize) {
                cells.push(CellDraft {
                    criterion_order: order,
                    level_order: level.order,
                    content: text.trim().to_string(),
                });
            }
        }
    }

    Ok(ParsedRubric {
        criteria,
        levels,
        cells,
    })
}

/// `|---|:---:|` style rule lines carry no data.
fn is_separator_line(line: &str) -> bool {
    line.chars()
        .all(|c| c == '-' || c == ':' || c == '|' || c.is_whitespace())
}

fn is_weight_header(cell: &str) -> bool {
    let lowered = cell.to_lowercase();
    lowered.contains("peso") || lowered.contains("weight") || lowered.contains('%')
}

/// "60%", "60", "60,5 %" -> fraction of one.
fn parse_weight(raw: &str) -> Option<f64> {
    let cleaned = raw.trim().trim_end_matches('%').trim().replace(',', ".");
    let value: f64 = cleaned.parse().ok()?;
    value.is_finite().then_some(value / 100.0)
}

fn split_markdown_row(line: &str) -> Vec<String> {
    let trimmed = line.trim();
    let trimmed = trimmed.strip_prefix('|').unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix('|').unwrap_or(trimmed);
    trimmed.split('|').map(|cell| cell.trim().to_string()).collect()
}

/// Comma separated fields; commas inside double quotes do not split and a
/// doubled quote inside a quoted field is a literal quote.
pub fn split_csv_row(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    fields.push(current.trim().to_string());
    fields
}
