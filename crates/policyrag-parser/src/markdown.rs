//! Markdown rendering of parsed elements.
//!
//! Headings map to `#`…`#####` by level, ordinary tables render as
//! GitHub-flavored Markdown, rate tables become `[rate-table: {uuid}]`
//! placeholders, and figures are dropped with a comment marker.

use policyrag_core::{DocElement, DocTable};
use uuid::Uuid;

/// How one table should be rendered.
pub enum TableRendering {
    /// Keep inline as a GFM table.
    Inline,
    /// Replace with a placeholder referencing the exported sidecar.
    Placeholder(Uuid),
}

/// Render elements to Markdown. `table_renderings` must contain one entry per
/// `DocElement::Table`, in element order.
#[must_use]
pub fn render_markdown(elements: &[DocElement], table_renderings: &[TableRendering]) -> String {
    let mut out = String::new();
    let mut table_idx = 0usize;

    for element in elements {
        match element {
            DocElement::Heading { level, text } => {
                let level = (*level).clamp(1, 5) as usize;
                out.push_str(&"#".repeat(level));
                out.push(' ');
                out.push_str(text);
                out.push_str("\n\n");
            }
            DocElement::Paragraph { text } => {
                out.push_str(text);
                out.push_str("\n\n");
            }
            DocElement::Table(table) => {
                match table_renderings.get(table_idx) {
                    Some(TableRendering::Placeholder(uuid)) => {
                        out.push_str(&format!("[rate-table: {uuid}]\n\n"));
                    }
                    Some(TableRendering::Inline) | None => {
                        out.push_str(&render_gfm_table(table));
                        out.push('\n');
                    }
                }
                table_idx += 1;
            }
            DocElement::Figure { caption } => {
                match caption {
                    Some(caption) => {
                        out.push_str(&format!("<!-- figure omitted: {caption} -->\n\n"));
                    }
                    None => out.push_str("<!-- figure omitted -->\n\n"),
                }
            }
        }
    }

    out
}

/// Render one table as GitHub-flavored Markdown.
#[must_use]
pub fn render_gfm_table(table: &DocTable) -> String {
    let mut out = String::new();
    out.push_str(&format!("| {} |\n", table.headers.join(" | ")));
    out.push_str(&format!(
        "| {} |\n",
        table
            .headers
            .iter()
            .map(|_| "---")
            .collect::<Vec<_>>()
            .join(" | ")
    ));
    for row in &table.rows {
        out.push_str(&format!("| {} |\n", row.join(" | ")));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_elements() -> Vec<DocElement> {
        vec![
            DocElement::Heading {
                level: 1,
                text: "1 保险责任".to_string(),
            },
            DocElement::Paragraph {
                text: "我们承担下列保险责任。".to_string(),
            },
            DocElement::Table(DocTable {
                headers: vec!["年龄".to_string(), "保费".to_string()],
                rows: vec![vec!["30".to_string(), "1200".to_string()]],
                page: 2,
            }),
            DocElement::Figure {
                caption: Some("图1 示意".to_string()),
            },
        ]
    }

    #[test]
    fn test_render_inline_table() {
        let md = render_markdown(&sample_elements(), &[TableRendering::Inline]);
        assert!(md.contains("# 1 保险责任"));
        assert!(md.contains("| 年龄 | 保费 |"));
        assert!(md.contains("| --- | --- |"));
        assert!(md.contains("| 30 | 1200 |"));
        assert!(md.contains("<!-- figure omitted: 图1 示意 -->"));
    }

    #[test]
    fn test_render_placeholder_table() {
        let uuid = Uuid::new_v4();
        let md = render_markdown(&sample_elements(), &[TableRendering::Placeholder(uuid)]);
        assert!(md.contains(&format!("[rate-table: {uuid}]")));
        assert!(!md.contains("| 年龄 |"));
    }

    #[test]
    fn test_heading_level_clamped() {
        let elements = vec![DocElement::Heading {
            level: 7,
            text: "深层".to_string(),
        }];
        let md = render_markdown(&elements, &[]);
        assert!(md.starts_with("##### 深层"));
    }
}
