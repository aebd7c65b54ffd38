//! Embedding similarity between batch entities

use crate::entity::CodeEntity;
use crate::relationship::{Relationship, RelationshipType};

/// Compute cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// `Similar` relationships between every pair of embedded entities whose
/// cosine similarity reaches `threshold`.
///
/// Only embeddings from the same model and of the same dimension are
/// compared. Each unordered pair yields at most one relationship, directed
/// from the earlier entity to the later one.
pub fn derive_similarities(entities: &[CodeEntity], threshold: f64) -> Vec<Relationship> {
    let embedded: Vec<_> = entities
        .iter()
        .filter_map(|entity| entity.embedding.as_ref().map(|embedding| (entity, embedding)))
        .collect();

    let mut similar = Vec::new();
    for (i, (left, a)) in embedded.iter().enumerate() {
        for (right, b) in &embedded[i + 1..] {
            if a.model != b.model || a.vector.len() != b.vector.len() {
                continue;
            }
            let score = f64::from(cosine_similarity(&a.vector, &b.vector)).clamp(0.0, 1.0);
            if score >= threshold {
                similar.push(
                    Relationship::new(RelationshipType::Similar, left.id, right.id)
                        .with_weight(score)
                        .with_context(format!("embedding:{}", a.model)),
                );
            }
        }
    }
    similar
}
