//! Table rendering and structural merging.
//!
//! Layout analyzers report tables split at page boundaries. Consecutive
//! tables with the same column count that sit within 3 inches and at most
//! one page apart are merged into one logical table before rendering, with
//! the appended rows' indices offset past the first table's rows.

use std::fmt::Write as _;

use crate::layout::{Page, Table};

/// Maximum vertical gap (inches) for two tables to merge.
const TABLE_DISTANCE_THRESHOLD: f64 = 3.0;

/// Renders a table as HTML with `th` headers and span attributes.
#[must_use]
pub fn table_to_html(table: &Table) -> String {
    let mut html = String::from("<table>");
    for row in 0..table.row_count {
        html.push_str("<tr>");
        let mut row_cells: Vec<_> = table
            .cells
            .iter()
            .filter(|cell| cell.row_index == row)
            .collect();
        row_cells.sort_by_key(|cell| cell.column_index);
        for cell in row_cells {
            let tag = if cell.is_header { "th" } else { "td" };
            let mut spans = String::new();
            if cell.column_span > 1 {
                let _ = write!(spans, " colSpan={}", cell.column_span);
            }
            if cell.row_span > 1 {
                let _ = write!(spans, " rowSpan={}", cell.row_span);
            }
            let _ = write!(
                html,
                "<{tag}{spans}>{}</{tag}>",
                escape_html(&cell.content)
            );
        }
        html.push_str("</tr>");
    }
    html.push_str("</table>");
    html
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Merges consecutive same-structure tables.
///
/// Two adjacent tables merge when they share a column count, sit at most
/// one page apart, and the vertical gap between them is under 3 inches
/// (cross-page gaps add the remaining height of the earlier page).
#[must_use]
pub fn merge_adjacent_tables(tables: &[Table], pages: &[Page]) -> Vec<Table> {
    let mut merged: Vec<Table> = Vec::new();
    for table in tables {
        match merged.last_mut() {
            Some(prev) if same_structure(prev, table, pages) => {
                append_rows(prev, table);
            }
            _ => merged.push(table.clone()),
        }
    }
    merged
}

fn same_structure(first: &Table, second: &Table, pages: &[Page]) -> bool {
    if first.column_count != second.column_count {
        return false;
    }
    let (Some(end_region), Some(start_region)) =
        (first.bounding_regions.last(), second.bounding_regions.first())
    else {
        return false;
    };
    let page_difference = i64::from(start_region.page_number) - i64::from(end_region.page_number);
    if !(0..=1).contains(&page_difference) {
        return false;
    }

    let first_bottom = end_region
        .polygon
        .iter()
        .skip(1)
        .step_by(2)
        .copied()
        .fold(0.0f64, f64::max);
    let second_top = start_region
        .polygon
        .iter()
        .skip(1)
        .step_by(2)
        .copied()
        .fold(f64::INFINITY, f64::min);
    let distance = if page_difference == 1 {
        let page_height = pages
            .iter()
            .find(|p| p.page_number == end_region.page_number)
            .map_or(0.0, |p| p.height);
        second_top + (page_height - first_bottom)
    } else {
        second_top - first_bottom
    };
    distance < TABLE_DISTANCE_THRESHOLD
}

fn append_rows(target: &mut Table, source: &Table) {
    let offset = target.row_count;
    for cell in &source.cells {
        let mut cell = cell.clone();
        cell.row_index += offset;
        target.cells.push(cell);
    }
    target.row_count += source.row_count;
    target
        .bounding_regions
        .extend(source.bounding_regions.iter().cloned());
}

/// Collapses cell whitespace in a markdown table, leaving separator rows
/// (`|---|`) untouched.
#[must_use]
pub fn clean_markdown_table(table: &str) -> String {
    let mut cleaned = Vec::new();
    for line in table.lines() {
        let is_separator = line
            .trim()
            .chars()
            .all(|c| matches!(c, '-' | '|' | ' ' | ':' | '+' | '='));
        if is_separator {
            cleaned.push(line.to_string());
            continue;
        }
        let cells: Vec<&str> = line.split('|').collect();
        if cells.len() < 3 {
            cleaned.push(line.to_string());
            continue;
        }
        let inner: Vec<String> = cells[1..cells.len() - 1]
            .iter()
            .map(|cell| cell.split_whitespace().collect::<Vec<_>>().join(" "))
            .collect();
        cleaned.push(format!("| {} |", inner.join(" | ")));
    }
    cleaned.join("\n")
}

/// Renders rows as a pipe-delimited markdown table with a header row.
#[must_use]
pub fn markdown_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "| {} |", headers.join(" | "));
    let _ = writeln!(
        out,
        "|{}|",
        headers.iter().map(|_| " --- ").collect::<Vec<_>>().join("|")
    );
    for row in rows {
        let _ = writeln!(out, "| {} |", row.join(" | "));
    }
    out.trim_end().to_string()
}
