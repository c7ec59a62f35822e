//! Heading-aware Markdown chunker.
//!
//! Each heading opens a logical region whose body runs to the next heading of
//! equal or higher level. Regions that fit the growth budget become one
//! chunk; oversized regions split at paragraph boundaries with a tail
//! overlap. Inline tables are emitted as their own chunks at their textual
//! position and are never split.

use policyrag_core::{ChunkError, TableData};
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;
use uuid::Uuid;

static HEADING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(#{1,5})\s+(.+)$").unwrap());

static RATE_TABLE_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[rate-table:\s*([0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12})\]")
        .unwrap()
});

/// Chunker size budget, counted in tokens (1 token ≈ 1.5 Chinese characters).
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Preferred chunk size.
    pub target_tokens: usize,
    /// A logical unit may grow to this before it is split.
    pub max_tokens: usize,
    /// Tail of the previous chunk repeated at the head of the next.
    pub overlap_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            target_tokens: 750,
            max_tokens: 2048,
            overlap_tokens: 150,
        }
    }
}

/// A chunk before product context and enrichment are attached.
#[derive(Debug, Clone)]
pub struct ChunkDraft {
    /// Full text including the `[section: …]` breadcrumb prefix.
    pub content: String,
    /// Breadcrumb without brackets, e.g. "保险责任 > 身故保险金".
    pub section_path: String,
    /// Deepest heading text.
    pub section_title: String,
    /// Heading depth, 1..=5.
    pub level: u8,
    /// Document-local order across text and table chunks.
    pub chunk_index: u32,
    pub is_table: bool,
    pub table_data: Option<TableData>,
    /// Sidecar rate tables referenced inside this chunk's text.
    pub table_refs: Vec<Uuid>,
}

/// Token estimate for Chinese text: 1 token ≈ 1.5 characters.
fn estimate_tokens(text: &str) -> usize {
    let chars = text.chars().count();
    (chars as f64 / 1.5).ceil() as usize
}

/// One parsed heading region.
struct Section {
    title: String,
    level: u8,
    /// Titles of ancestor headings, shallowest first.
    parent_path: Vec<String>,
    /// Body blocks: prose paragraphs and inline tables, in order.
    blocks: Vec<Block>,
}

enum Block {
    Paragraph(String),
    Table(TableData),
}

/// Markdown-aware chunker.
pub struct MarkdownChunker {
    config: ChunkerConfig,
}

impl MarkdownChunker {
    #[must_use]
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Split Markdown into chunk drafts.
    pub fn chunk(&self, markdown: &str) -> Result<Vec<ChunkDraft>, ChunkError> {
        if self.config.target_tokens == 0 || self.config.max_tokens < self.config.target_tokens {
            return Err(ChunkError::InvalidConfig(format!(
                "target {} must be nonzero and ≤ max {}",
                self.config.target_tokens, self.config.max_tokens
            )));
        }

        let sections = parse_sections(markdown);
        let mut drafts = Vec::new();

        for section in &sections {
            self.chunk_section(section, &mut drafts);
        }

        debug!("chunked markdown into {} drafts", drafts.len());
        Ok(drafts)
    }

    fn chunk_section(&self, section: &Section, drafts: &mut Vec<ChunkDraft>) {
        let mut path_parts = section.parent_path.clone();
        path_parts.push(section.title.clone());
        let section_path = path_parts.join(" > ");

        let mut pending: Vec<String> = Vec::new();
        let mut pending_tokens = 0usize;

        let flush =
            |pending: &mut Vec<String>, pending_tokens: &mut usize, drafts: &mut Vec<ChunkDraft>| {
                if pending.is_empty() {
                    return;
                }
                let body = pending.join("\n\n");
                drafts.push(make_text_draft(
                    &body,
                    &section_path,
                    &section.title,
                    section.level,
                    drafts.len() as u32,
                ));
                pending.clear();
                *pending_tokens = 0;
            };

        // The oversized-section split budget: regions within max_tokens stay
        // whole as one logical unit.
        let section_tokens: usize = section
            .blocks
            .iter()
            .map(|b| match b {
                Block::Paragraph(p) => estimate_tokens(p),
                Block::Table(_) => 0,
            })
            .sum();

        // Overlap tail waiting to seed the next chunk; seeded lazily so a
        // region ending at a flush boundary never emits an overlap-only
        // chunk.
        let mut carry: Vec<String> = Vec::new();

        for block in &section.blocks {
            match block {
                Block::Table(table) => {
                    // Tables are their own chunks, inserted at their textual
                    // position; prose is never merged in and overlap does
                    // not cross a table.
                    flush(&mut pending, &mut pending_tokens, drafts);
                    carry.clear();
                    drafts.push(make_table_draft(
                        table,
                        &section_path,
                        &section.title,
                        section.level,
                        drafts.len() as u32,
                    ));
                }
                Block::Paragraph(para) => {
                    if pending.is_empty() && !carry.is_empty() {
                        for piece in carry.drain(..) {
                            pending_tokens += estimate_tokens(&piece);
                            pending.push(piece);
                        }
                    }

                    let para_tokens = estimate_tokens(para);
                    if pending_tokens + para_tokens > self.config.max_tokens && !pending.is_empty()
                    {
                        // Close the chunk at a paragraph boundary.
                        let overlap = overlap_tail(&pending, self.config.overlap_tokens);
                        flush(&mut pending, &mut pending_tokens, drafts);
                        for piece in overlap {
                            pending_tokens += estimate_tokens(&piece);
                            pending.push(piece);
                        }
                    }
                    pending_tokens += para_tokens;
                    pending.push(para.clone());

                    // Past the target and at a paragraph boundary: close the
                    // chunk, but only when the region is too large to stay a
                    // single logical unit.
                    if pending_tokens >= self.config.target_tokens
                        && section_tokens > self.config.max_tokens
                    {
                        carry = overlap_tail(&pending, self.config.overlap_tokens);
                        flush(&mut pending, &mut pending_tokens, drafts);
                    }
                }
            }
        }

        flush(&mut pending, &mut pending_tokens, drafts);
    }
}

impl Default for MarkdownChunker {
    fn default() -> Self {
        Self::new(ChunkerConfig::default())
    }
}

/// Trailing paragraphs totalling at most `overlap_tokens`.
fn overlap_tail(paragraphs: &[String], overlap_tokens: usize) -> Vec<String> {
    let mut tail = Vec::new();
    let mut taken = 0usize;
    for para in paragraphs.iter().rev() {
        let tokens = estimate_tokens(para);
        if taken + tokens > overlap_tokens && !tail.is_empty() {
            break;
        }
        taken += tokens;
        tail.push(para.clone());
        if taken >= overlap_tokens {
            break;
        }
    }
    tail.reverse();
    tail
}

fn make_text_draft(
    body: &str,
    section_path: &str,
    section_title: &str,
    level: u8,
    chunk_index: u32,
) -> ChunkDraft {
    let content = format!("[section: {section_path}]\n\n{body}");
    let table_refs = RATE_TABLE_REF
        .captures_iter(&content)
        .filter_map(|caps| Uuid::parse_str(&caps[1]).ok())
        .collect();

    ChunkDraft {
        content,
        section_path: section_path.to_string(),
        section_title: section_title.to_string(),
        level,
        chunk_index,
        is_table: false,
        table_data: None,
        table_refs,
    }
}

fn make_table_draft(
    table: &TableData,
    section_path: &str,
    section_title: &str,
    level: u8,
    chunk_index: u32,
) -> ChunkDraft {
    let mut rendered = String::new();
    rendered.push_str(&format!("| {} |\n", table.headers.join(" | ")));
    rendered.push_str(&format!(
        "| {} |\n",
        table.headers.iter().map(|_| "---").collect::<Vec<_>>().join(" | ")
    ));
    for row in &table.rows {
        rendered.push_str(&format!("| {} |\n", row.join(" | ")));
    }

    ChunkDraft {
        content: format!("[section: {section_path}]\n\n{rendered}"),
        section_path: section_path.to_string(),
        section_title: section_title.to_string(),
        level,
        chunk_index,
        is_table: true,
        table_data: Some(table.clone()),
        table_refs: Vec::new(),
    }
}

/// Parse Markdown into heading regions with ancestor paths.
fn parse_sections(markdown: &str) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    let mut heading_stack: Vec<(u8, String)> = Vec::new();
    let mut current: Option<Section> = None;
    let mut paragraph: Vec<String> = Vec::new();
    let mut table_lines: Vec<String> = Vec::new();

    let close_paragraph = |paragraph: &mut Vec<String>, current: &mut Option<Section>| {
        if paragraph.is_empty() {
            return;
        }
        let text = paragraph.join("\n").trim().to_string();
        paragraph.clear();
        if text.is_empty() {
            return;
        }
        let section = current.get_or_insert_with(preamble_section);
        section.blocks.push(Block::Paragraph(text));
    };

    let close_table = |table_lines: &mut Vec<String>, current: &mut Option<Section>| {
        if table_lines.is_empty() {
            return;
        }
        let lines = std::mem::take(table_lines);
        let section = current.get_or_insert_with(preamble_section);
        if let Some(table) = parse_gfm_table(&lines) {
            section.blocks.push(Block::Table(table));
        } else {
            section.blocks.push(Block::Paragraph(lines.join("\n")));
        }
    };

    for line in markdown.lines() {
        if let Some(caps) = HEADING.captures(line) {
            close_table(&mut table_lines, &mut current);
            close_paragraph(&mut paragraph, &mut current);
            if let Some(section) = current.take() {
                sections.push(section);
            }

            let level = caps[1].len() as u8;
            let title = caps[2].trim().to_string();

            while heading_stack.last().is_some_and(|(l, _)| *l >= level) {
                heading_stack.pop();
            }
            let parent_path = heading_stack.iter().map(|(_, t)| t.clone()).collect();
            heading_stack.push((level, title.clone()));

            current = Some(Section {
                title,
                level,
                parent_path,
                blocks: Vec::new(),
            });
            continue;
        }

        if line.trim_start().starts_with('|') {
            close_paragraph(&mut paragraph, &mut current);
            table_lines.push(line.trim().to_string());
            continue;
        }
        close_table(&mut table_lines, &mut current);

        if line.trim().is_empty() {
            close_paragraph(&mut paragraph, &mut current);
        } else {
            paragraph.push(line.to_string());
        }
    }

    close_table(&mut table_lines, &mut current);
    close_paragraph(&mut paragraph, &mut current);
    if let Some(section) = current.take() {
        sections.push(section);
    }

    sections.retain(|s| !s.blocks.is_empty() || !s.title.is_empty());
    sections
}

/// Region for content appearing before the first heading.
fn preamble_section() -> Section {
    Section {
        title: "文档开头".to_string(),
        level: 1,
        parent_path: Vec::new(),
        blocks: Vec::new(),
    }
}

/// Parse a GFM table block into structured data.
fn parse_gfm_table(lines: &[String]) -> Option<TableData> {
    let split = |line: &str| -> Vec<String> {
        line.trim()
            .trim_matches('|')
            .split('|')
            .map(|c| c.trim().to_string())
            .collect()
    };

    let mut rows_iter = lines.iter();
    let headers = split(rows_iter.next()?);
    if headers.is_empty() {
        return None;
    }

    let mut rows = Vec::new();
    for line in rows_iter {
        let cells = split(line);
        // Skip the |---|---| separator row.
        if cells
            .iter()
            .all(|c| !c.is_empty() && c.chars().all(|ch| ch == '-' || ch == ':'))
        {
            continue;
        }
        rows.push(cells);
    }

    Some(TableData { headers, rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# 1 总则

本合同由保险条款、投保单构成。

## 1.4 保险期间

本合同的保险期间为终身，自本合同生效日零时开始。

## 1.5 现金价值表

[rate-table: 6fa459ea-ee8a-3ca4-894e-db77e160355e]

| 保单年度 | 减额后年金 |
| --- | --- |
| 第5年 | 1000元 |
| 第10年 | 1500元 |
";

    fn chunk(markdown: &str) -> Vec<ChunkDraft> {
        MarkdownChunker::default().chunk(markdown).unwrap()
    }

    #[test]
    fn test_breadcrumbs_follow_heading_stack() {
        let drafts = chunk(SAMPLE);
        let period = drafts
            .iter()
            .find(|d| d.section_title == "1.4 保险期间")
            .unwrap();
        assert_eq!(period.section_path, "1 总则 > 1.4 保险期间");
        assert!(period.content.starts_with("[section: 1 总则 > 1.4 保险期间]"));
        assert_eq!(period.level, 2);
    }

    #[test]
    fn test_chunk_index_reflects_reading_order() {
        let drafts = chunk(SAMPLE);
        let indices: Vec<u32> = drafts.iter().map(|d| d.chunk_index).collect();
        let expected: Vec<u32> = (0..drafts.len() as u32).collect();
        assert_eq!(indices, expected);
    }

    #[test]
    fn test_inline_table_is_own_chunk() {
        let drafts = chunk(SAMPLE);
        let table_chunks: Vec<_> = drafts.iter().filter(|d| d.is_table).collect();
        assert_eq!(table_chunks.len(), 1);

        let table = table_chunks[0];
        let data = table.table_data.as_ref().unwrap();
        assert_eq!(data.headers, vec!["保单年度", "减额后年金"]);
        assert_eq!(data.rows.len(), 2);
        // No prose merged into the table chunk.
        assert!(!table.content.contains("本合同"));
    }

    #[test]
    fn test_rate_table_placeholder_collected_and_retained() {
        let drafts = chunk(SAMPLE);
        let with_ref = drafts.iter().find(|d| !d.table_refs.is_empty()).unwrap();
        assert_eq!(
            with_ref.table_refs,
            vec![Uuid::parse_str("6fa459ea-ee8a-3ca4-894e-db77e160355e").unwrap()]
        );
        assert!(with_ref.content.contains("[rate-table: 6fa459ea"));
    }

    #[test]
    fn test_small_section_is_single_chunk() {
        let drafts = chunk("# 2 释义\n\n短短的一段。");
        assert_eq!(drafts.len(), 1);
        assert!(!drafts[0].is_table);
    }

    #[test]
    fn test_oversized_section_splits_with_overlap() {
        // ~60 chars ≈ 40 tokens per paragraph; 12 paragraphs ≈ 480 tokens.
        let para = "本公司按照本合同的约定向受益人给付保险金，并且在给付之后继续承担其余保险责任，直至合同约定的终止情形发生为止。";
        let body: Vec<String> = (0..12).map(|i| format!("第{i}段 {para}")).collect();
        let markdown = format!("# 5 长条款\n\n{}", body.join("\n\n"));

        let config = ChunkerConfig {
            target_tokens: 100,
            max_tokens: 160,
            overlap_tokens: 40,
        };
        let drafts = MarkdownChunker::new(config).chunk(&markdown).unwrap();
        assert!(drafts.len() > 1, "oversized section must split");

        // Consecutive chunks within the region share an overlap that starts
        // at a paragraph boundary.
        let first = &drafts[0].content;
        let second = &drafts[1].content;
        let last_para_of_first = first.split("\n\n").last().unwrap();
        assert!(second.contains(last_para_of_first));
    }

    #[test]
    fn test_section_within_growth_budget_stays_whole() {
        let para = "一句话。".repeat(30); // ~120 chars ≈ 80 tokens
        let markdown = format!("# 3 条款\n\n{para}\n\n{para}\n\n{para}");
        let config = ChunkerConfig {
            target_tokens: 100,
            max_tokens: 2048,
            overlap_tokens: 20,
        };
        let drafts = MarkdownChunker::new(config).chunk(&markdown).unwrap();
        assert_eq!(drafts.len(), 1, "logical unit within max stays intact");
    }

    #[test]
    fn test_preamble_before_first_heading() {
        let drafts = chunk("说明文字在标题之前。\n\n# 1 总则\n\n正文。");
        assert_eq!(drafts[0].section_title, "文档开头");
        assert_eq!(drafts[0].level, 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ChunkerConfig {
            target_tokens: 800,
            max_tokens: 400,
            overlap_tokens: 10,
        };
        assert!(MarkdownChunker::new(config).chunk("# A\n\nB").is_err());
    }

    #[test]
    fn test_estimate_tokens_chinese() {
        assert_eq!(estimate_tokens("保险期间"), 3); // 4 chars / 1.5 → ceil
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn test_parse_gfm_table_skips_separator() {
        let lines = vec![
            "| A | B |".to_string(),
            "| --- | --- |".to_string(),
            "| 1 | 2 |".to_string(),
        ];
        let table = parse_gfm_table(&lines).unwrap();
        assert_eq!(table.headers, vec!["A", "B"]);
        assert_eq!(table.rows, vec![vec!["1".to_string(), "2".to_string()]]);
    }
}
