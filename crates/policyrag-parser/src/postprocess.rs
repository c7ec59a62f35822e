//! Markdown post-processing.
//!
//! An ordered list of pure string transforms applied between rendering and
//! chunking. Each stage's output is a function of the previous stage's
//! output, so every stage is unit-testable on its own.

use regex::Regex;
use std::sync::LazyLock;

static PAGE_NUMBER_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[-—]?\s*(第\s*\d+\s*页|\d+\s*/\s*\d+|\d{1,3})\s*[-—]?\s*$").unwrap());

static NOISE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(条款备案编号[:：].*|请扫描二维码.*|客服电话[:：].*|[\u{00b7}\u{2022}\u{25cf}]\s*)$")
        .unwrap()
});

static FOOTNOTE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(注|註)\s*[:：]\s*(.+)$").unwrap());

static HEADING_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,6})\s*(.*)$").unwrap());

/// The full pipeline, in order.
#[must_use]
pub fn postprocess_markdown(markdown: &str) -> String {
    let stages: &[fn(&str) -> String] = &[
        strip_noise_lines,
        inline_footnotes,
        normalize_headings,
        normalize_whitespace,
    ];
    let mut text = markdown.to_string();
    for stage in stages {
        text = stage(&text);
    }
    text
}

/// Drop page numbers, filing-number footers, and bullet debris.
#[must_use]
pub fn strip_noise_lines(text: &str) -> String {
    text.lines()
        .filter(|line| !PAGE_NUMBER_LINE.is_match(line) && !NOISE_LINE.is_match(line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Fold `注：…` lines into the preceding paragraph so the note stays inside
/// the same chunk as the clause it annotates.
#[must_use]
pub fn inline_footnotes(text: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    for line in text.lines() {
        if let Some(caps) = FOOTNOTE_LINE.captures(line.trim()) {
            // Walk back over blank lines to the annotated paragraph.
            let target = out.iter().rposition(|prev| !prev.trim().is_empty());
            if let Some(idx) = target {
                let note = format!("（注：{}）", caps[2].trim());
                out[idx].push_str(&note);
                continue;
            }
        }
        out.push(line.to_string());
    }
    out.join("\n")
}

/// Ensure a single space after `#` markers and strip trailing hashes.
#[must_use]
pub fn normalize_headings(text: &str) -> String {
    text.lines()
        .map(|line| {
            if let Some(caps) = HEADING_LINE.captures(line) {
                let body = caps[2].trim_end_matches('#').trim();
                if body.is_empty() {
                    return String::new();
                }
                return format!("{} {}", &caps[1], body);
            }
            line.to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Collapse runs of blank lines and trim trailing spaces.
#[must_use]
pub fn normalize_whitespace(text: &str) -> String {
    let mut out = String::new();
    let mut blank_run = 0usize;
    for line in text.lines() {
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(trimmed);
        out.push('\n');
    }
    out.trim_start_matches('\n').trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_page_numbers() {
        let text = "正文第一段。\n- 12 -\n第 3 页\n3/24\n正文第二段。";
        let cleaned = strip_noise_lines(text);
        assert!(cleaned.contains("正文第一段。"));
        assert!(cleaned.contains("正文第二段。"));
        assert!(!cleaned.contains("12"));
        assert!(!cleaned.contains('页'));
    }

    #[test]
    fn test_strip_filing_footer() {
        let text = "条款备案编号：平安人寿〔2021〕年金保险028号\n保险责任如下。";
        let cleaned = strip_noise_lines(text);
        assert_eq!(cleaned, "保险责任如下。");
    }

    #[test]
    fn test_inline_footnotes() {
        let text = "现金价值按保单年度末计算。\n\n注：犹豫期内退保无损失。";
        let folded = inline_footnotes(text);
        assert!(folded.contains("现金价值按保单年度末计算。（注：犹豫期内退保无损失。）"));
        assert!(!folded.contains("\n注："));
    }

    #[test]
    fn test_inline_footnote_without_target_kept() {
        let text = "注：独立的注释。";
        assert_eq!(inline_footnotes(text), text);
    }

    #[test]
    fn test_normalize_headings() {
        assert_eq!(normalize_headings("##保险责任##"), "## 保险责任");
        assert_eq!(normalize_headings("#  1.4 保险期间"), "# 1.4 保险期间");
        assert_eq!(normalize_headings("## "), "");
    }

    #[test]
    fn test_normalize_whitespace() {
        let text = "第一段。   \n\n\n\n第二段。\n";
        assert_eq!(normalize_whitespace(text), "第一段。\n\n第二段。");
    }

    #[test]
    fn test_pipeline_order_is_stable() {
        let text = "# 1 总则\n\n\n本合同由条款构成。\n注：包括附表。\n- 2 -\n\n##2 释义";
        let processed = postprocess_markdown(text);
        assert!(processed.contains("本合同由条款构成。（注：包括附表。）"));
        assert!(processed.contains("## 2 释义"));
        assert!(!processed.contains("- 2 -"));
        assert!(!processed.contains("\n\n\n"));
    }
}
