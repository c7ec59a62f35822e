//! Reciprocal rank fusion.
//!
//! `score(d) = w_sparse/(K + rank_sparse) + w_dense/(K + rank_dense)` with
//! 1-based ranks; ids missing from a list contribute nothing from that side.
//! Ties break on higher dense similarity, then on chunk_index.

use policyrag_core::{DenseHit, PolicyChunk, RetrievedChunk, SparseHit};
use std::collections::HashMap;

/// Inputs to one fusion pass.
pub struct FusionInput<'a> {
    pub dense: &'a [DenseHit],
    /// Sparse hits already resolved to chunks and post-filtered.
    pub sparse: &'a [(SparseHit, PolicyChunk)],
    pub sparse_weight: f32,
    pub dense_weight: f32,
    pub rrf_k: f32,
}

/// Fuse both sides into a ranked top-k list.
#[must_use]
pub fn fuse(input: FusionInput<'_>, top_k: usize) -> Vec<RetrievedChunk> {
    struct Accum {
        chunk: PolicyChunk,
        similarity: Option<f32>,
        score: f32,
        dense_rank: Option<usize>,
        sparse_rank: Option<usize>,
    }

    let mut accum: HashMap<String, Accum> = HashMap::new();

    for (idx, hit) in input.dense.iter().enumerate() {
        let rank = idx + 1;
        let chunk = PolicyChunk::from_metadata(&hit.id, &hit.content, &hit.metadata);
        accum.insert(
            hit.id.clone(),
            Accum {
                chunk,
                similarity: Some(hit.similarity),
                score: input.dense_weight / (input.rrf_k + rank as f32),
                dense_rank: Some(rank),
                sparse_rank: None,
            },
        );
    }

    for (idx, (hit, chunk)) in input.sparse.iter().enumerate() {
        let rank = idx + 1;
        let contribution = input.sparse_weight / (input.rrf_k + rank as f32);
        accum
            .entry(hit.id.clone())
            .and_modify(|entry| {
                entry.score += contribution;
                entry.sparse_rank = Some(rank);
            })
            .or_insert_with(|| Accum {
                chunk: chunk.clone(),
                similarity: None,
                score: contribution,
                dense_rank: None,
                sparse_rank: Some(rank),
            });
    }

    let mut fused: Vec<RetrievedChunk> = accum
        .into_values()
        .map(|entry| RetrievedChunk {
            chunk: entry.chunk,
            similarity: entry.similarity,
            rrf_score: entry.score,
            dense_rank: entry.dense_rank,
            sparse_rank: entry.sparse_rank,
        })
        .collect();

    fused.sort_by(|a, b| {
        b.rrf_score
            .partial_cmp(&a.rrf_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.similarity
                    .unwrap_or(f32::MIN)
                    .partial_cmp(&a.similarity.unwrap_or(f32::MIN))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
    });
    fused.truncate(top_k);
    fused
}
