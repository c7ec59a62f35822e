//! `lookup_product`: fuzzy product lookup over the catalog.
//!
//! Pure catalog work; the vector index is never touched. Matching combines
//! normalized edit distance with a substring bonus, so "福耀" finds
//! "平安福耀年金保险（分红型）".

use policyrag_core::Result;

use crate::types::{LookupProductParams, ProductInfo};
use crate::PolicyTools;

impl PolicyTools {
    pub(crate) async fn lookup_product(
        &self,
        params: LookupProductParams,
    ) -> Result<Vec<ProductInfo>> {
        let products = self
            .catalog()
            .list_products(params.company.as_deref())
            .await?;

        let mut scored: Vec<(f64, ProductInfo)> = products
            .into_iter()
            .map(|product| {
                let score = name_similarity(&params.product_name, &product.name);
                (
                    score,
                    ProductInfo {
                        product_id: product.id,
                        product_code: product.product_code,
                        product_name: product.name,
                        company: product.company,
                        category: product.category,
                        publish_time: product.publish_time,
                    },
                )
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(params.top_k);
        Ok(scored.into_iter().map(|(_, info)| info).collect())
    }
}

/// Similarity of a query against a product name: normalized edit distance,
/// lifted when the query is a substring of the name.
#[must_use]
pub(crate) fn name_similarity(query: &str, target: &str) -> f64 {
    let query = query.to_lowercase();
    let target = target.to_lowercase();
    if query.is_empty() || target.is_empty() {
        return 0.0;
    }

    let query_chars: Vec<char> = query.chars().collect();
    let target_chars: Vec<char> = target.chars().collect();
    let distance = edit_distance(&query_chars, &target_chars);
    let max_len = query_chars.len().max(target_chars.len());
    let mut similarity = 1.0 - distance as f64 / max_len as f64;

    if target.contains(&query) {
        let coverage = query_chars.len() as f64 / target_chars.len() as f64;
        similarity = similarity.max(0.8 + coverage * 0.2);
    }
    similarity
}

fn edit_distance(a: &[char], b: &[char]) -> usize {
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::fuyao_corpus;

    fn params(name: &str) -> LookupProductParams {
        LookupProductParams {
            product_name: name.to_string(),
            company: None,
            top_k: 5,
        }
    }

    #[test]
    fn test_edit_distance() {
        let a: Vec<char> = "福耀".chars().collect();
        let b: Vec<char> = "福耀年金".chars().collect();
        assert_eq!(edit_distance(&a, &b), 2);
        assert_eq!(edit_distance(&a, &a), 0);
        assert_eq!(edit_distance(&[], &b), 4);
    }

    #[test]
    fn test_substring_bonus() {
        let partial = name_similarity("福耀", "平安福耀年金保险（分红型）");
        let unrelated = name_similarity("福耀", "国寿鑫享金生年金保险");
        assert!(partial > 0.8);
        assert!(partial > unrelated);
    }

    #[tokio::test]
    async fn test_fuzzy_lookup_finds_fuyao() {
        let corpus = fuyao_corpus().await;
        let results = corpus.tools.lookup_product(params("福耀")).await.unwrap();

        assert!(!results.is_empty());
        assert!(results[0].product_name.contains("福耀"));
    }

    #[tokio::test]
    async fn test_company_filter() {
        let corpus = fuyao_corpus().await;
        let mut p = params("年金");
        p.company = Some("中国人寿".to_string());
        let results = corpus.tools.lookup_product(p).await.unwrap();

        assert!(!results.is_empty());
        for info in &results {
            assert_eq!(info.company, "中国人寿");
        }
    }

    #[tokio::test]
    async fn test_no_candidates_is_empty_list() {
        let corpus = fuyao_corpus().await;
        let mut p = params("福耀");
        p.company = Some("不存在的公司".to_string());
        let results = corpus.tools.lookup_product(p).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_top_k_truncates() {
        let corpus = fuyao_corpus().await;
        let mut p = params("年金");
        p.top_k = 1;
        let results = corpus.tools.lookup_product(p).await.unwrap();
        assert_eq!(results.len(), 1);
    }
}
