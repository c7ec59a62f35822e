//! Query routing.
//!
//! The query's surface shape decides the sparse/dense weight split: dotted
//! clause numbers and digit-heavy strings want exact matching, questions
//! want semantics.

use regex::Regex;
use std::sync::LazyLock;

static SECTION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+\.\d+(\.\d+)?").unwrap());

static DIGIT_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

const QUESTION_MARKERS: &[&str] = &[
    "如何", "怎么", "什么", "为什么", "哪", "多少", "吗", "呢", "?", "？",
];

/// Routed query shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// Dotted section pattern or at least two digit tokens.
    Numeric,
    /// Contains a question marker.
    Question,
    /// Everything else.
    Statement,
}

/// Classify a query for weight routing. Numeric wins over question: a query
/// like "1.2.1是什么" is a clause lookup first.
#[must_use]
pub fn route_query(query: &str) -> QueryKind {
    if SECTION_PATTERN.is_match(query) || DIGIT_TOKEN.find_iter(query).count() >= 2 {
        return QueryKind::Numeric;
    }
    if QUESTION_MARKERS.iter().any(|marker| query.contains(marker)) {
        return QueryKind::Question;
    }
    QueryKind::Statement
}
