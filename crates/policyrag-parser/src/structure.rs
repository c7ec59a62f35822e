//! Reading-order structure detection.
//!
//! Turns extracted page text into typed elements. Clause headings in Chinese
//! policy documents come in two shapes: dotted numbers ("1.2.6 身故保险金")
//! and ordinal markers ("第五章 保险金的申请"). Tables arrive as runs of
//! delimiter-aligned lines.

use policyrag_core::{DocElement, DocTable};
use regex::Regex;
use std::sync::LazyLock;

static NUMBERED_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+(?:\.\d+)*)[\s　]+(\S.*)$").unwrap());

static ORDINAL_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^第[一二三四五六七八九十百零\d]+[章节条]").unwrap());

static MARKDOWN_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.+)$").unwrap());

static FIGURE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[（(]?图\s*\d+").unwrap());

/// Longest text still treated as a heading candidate.
const MAX_HEADING_CHARS: usize = 40;

/// Build typed elements from one page of extracted text.
pub fn build_elements(text: &str, page: u32) -> Vec<DocElement> {
    let mut elements = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();
    let mut table_run: Vec<Vec<String>> = Vec::new();

    let flush_paragraph = |paragraph: &mut Vec<&str>, elements: &mut Vec<DocElement>| {
        if !paragraph.is_empty() {
            let text = paragraph.join("\n").trim().to_string();
            if !text.is_empty() {
                elements.push(DocElement::Paragraph { text });
            }
            paragraph.clear();
        }
    };

    let flush_table = |table_run: &mut Vec<Vec<String>>, elements: &mut Vec<DocElement>| {
        if table_run.len() >= 2 {
            let mut rows = std::mem::take(table_run);
            let headers = rows.remove(0);
            elements.push(DocElement::Table(DocTable { headers, rows, page }));
        } else if let Some(cells) = table_run.pop() {
            // A lone delimiter line is prose, not a table.
            elements.push(DocElement::Paragraph {
                text: cells.join(" "),
            });
        }
        table_run.clear();
    };

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            flush_table(&mut table_run, &mut elements);
            flush_paragraph(&mut paragraph, &mut elements);
            continue;
        }

        if let Some(cells) = split_table_cells(trimmed) {
            // Only extend a run whose column count agrees.
            if table_run.is_empty() || table_run[0].len() == cells.len() {
                flush_paragraph(&mut paragraph, &mut elements);
                table_run.push(cells);
                continue;
            }
            flush_table(&mut table_run, &mut elements);
            table_run.push(cells);
            continue;
        }
        flush_table(&mut table_run, &mut elements);

        if FIGURE_LINE.is_match(trimmed) {
            flush_paragraph(&mut paragraph, &mut elements);
            elements.push(DocElement::Figure {
                caption: Some(trimmed.to_string()),
            });
            continue;
        }

        if let Some((level, heading)) = detect_heading(trimmed) {
            flush_paragraph(&mut paragraph, &mut elements);
            elements.push(DocElement::Heading {
                level,
                text: heading,
            });
            continue;
        }

        paragraph.push(line);
    }

    flush_table(&mut table_run, &mut elements);
    flush_paragraph(&mut paragraph, &mut elements);
    elements
}

/// Detect a heading line, returning (level, text).
fn detect_heading(line: &str) -> Option<(u8, String)> {
    if let Some(caps) = MARKDOWN_HEADING.captures(line) {
        let level = caps[1].len().min(5) as u8;
        return Some((level, caps[2].trim().to_string()));
    }

    if line.chars().count() > MAX_HEADING_CHARS {
        return None;
    }

    if let Some(caps) = NUMBERED_HEADING.captures(line) {
        let id = &caps[1];
        // A dotted id deeper than five levels, or a "number + long sentence"
        // line ending in punctuation, is body text.
        let rest = caps[2].trim();
        if rest.ends_with('。') || rest.ends_with('；') {
            return None;
        }
        let level = (id.matches('.').count() + 1).min(5) as u8;
        return Some((level, line.trim().to_string()));
    }

    if ORDINAL_HEADING.is_match(line) {
        let level = if line.contains('章') { 1 } else { 2 };
        return Some((level, line.trim().to_string()));
    }

    None
}

/// Split a line into table cells, if it looks like a table row.
///
/// Recognizes pipe-delimited rows and rows whose columns are separated by
/// runs of two or more spaces (the shape pdf-extract emits for grid tables).
fn split_table_cells(line: &str) -> Option<Vec<String>> {
    let piped = line.contains('|') || line.contains('｜');
    if piped {
        let cells: Vec<String> = line
            .split(['|', '｜'])
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty() && !c.chars().all(|ch| ch == '-' || ch == ':'))
            .collect();
        if cells.len() >= 2 {
            return Some(cells);
        }
        return None;
    }

    let cells: Vec<String> = line
        .split("  ")
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(String::from)
        .collect();
    if cells.len() >= 3 {
        return Some(cells);
    }
    None
}
