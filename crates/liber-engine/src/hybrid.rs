//! Weighted hybrid blending of strategy scores.
//!
//! The hybrid score of a candidate is the weighted sum of its per-strategy
//! scores. When a component strategy yields no candidates at all, its weight
//! is redistributed proportionally among the remaining strategies rather
//! than silently treating the missing component as score 0, which would let
//! a cold collaborative backend depress every score uniformly.

use std::collections::HashMap;

use tracing::debug;
use uuid::Uuid;

use liber_core::HybridWeights;

/// Blend per-strategy score maps into hybrid scores.
///
/// Strategies with an empty map are treated as absent and their weight is
/// redistributed via [`HybridWeights::redistribute`]. Within a participating
/// strategy, a candidate missing from that strategy's map contributes 0 for
/// that component only.
///
/// Returns an empty map when every strategy is empty or all participating
/// weight is zero.
pub fn blend(
    weights: &HybridWeights,
    content: &HashMap<Uuid, f32>,
    collaborative: &HashMap<Uuid, f32>,
    popularity: &HashMap<Uuid, f32>,
) -> HashMap<Uuid, f32> {
    let effective = match weights.redistribute(
        !content.is_empty(),
        !collaborative.is_empty(),
        !popularity.is_empty(),
    ) {
        Some(w) => w,
        None => return HashMap::new(),
    };

    debug!(
        content_weight = effective.content,
        collaborative_weight = effective.collaborative,
        popularity_weight = effective.popularity,
        "Hybrid blend weights after redistribution"
    );

    let mut blended: HashMap<Uuid, f32> = HashMap::new();
    for (map, weight) in [
        (content, effective.content),
        (collaborative, effective.collaborative),
        (popularity, effective.popularity),
    ] {
        if weight == 0.0 {
            continue;
        }
        for (&id, &score) in map {
            *blended.entry(id).or_insert(0.0) += weight * score;
        }
    }
    blended
}
