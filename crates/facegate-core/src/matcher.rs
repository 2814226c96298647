use crate::types::{Embedding, MatchDecision};

/// Cosine similarity a pair must strictly exceed to count as the same identity.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.8;

/// Strategy for deciding whether two embeddings belong to the same face.
pub trait Matcher {
    fn compare(&self, known: &Embedding, current: &Embedding, threshold: f32) -> MatchDecision;
}

/// Cosine similarity matcher.
///
/// `matched` requires `similarity > threshold`; equality is not a match.
/// A zero-norm operand never matches, whatever the threshold.
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(&self, known: &Embedding, current: &Embedding, threshold: f32) -> MatchDecision {
        match known.similarity(current) {
            Some(similarity) => MatchDecision {
                similarity,
                matched: similarity > threshold,
            },
            None => {
                tracing::debug!("zero-norm embedding in comparison; treating as no match");
                MatchDecision {
                    similarity: 0.0,
                    matched: false,
                }
            }
        }
    }
}
