//! # liber-engine
//!
//! Recommendation computation for the Liber reading platform.
//!
//! This crate provides:
//! - Content-based, collaborative, and popularity scoring strategies
//! - Weighted hybrid blending with proportional weight redistribution
//! - Chunked, checkpointable similarity matrix computation with versioned
//!   atomic publication
//! - The freshness policy deciding when a user needs regeneration
//!
//! The engine is pure: it reads through `liber-core` repository traits and
//! never persists anything itself. Persisting the resulting
//! [`liber_core::RecommendationSet`] is the caller's responsibility.
//!
//! ## Example
//!
//! ```ignore
//! use liber_engine::{RecommendationEngine, SimilarityStore};
//! use liber_core::Algorithm;
//!
//! let engine = RecommendationEngine::new(profiles, catalog, signal, store);
//! let items = engine.generate(&user, Algorithm::Hybrid, 20, "on_demand").await?;
//! ```

pub mod engine;
pub mod freshness;
pub mod hybrid;
pub mod signal;
pub mod similarity;
pub mod strategy;

// Re-export core types
pub use liber_core::*;

pub use engine::RecommendationEngine;
pub use freshness::FreshnessPolicy;
pub use hybrid::blend;
pub use signal::{HttpCollaborativeSignal, StaticCollaborativeSignal};
pub use similarity::{
    cosine_similarity, vectorize, RebuildProgress, RebuildState, SimilarityComputation,
    SimilarityStore,
};
pub use strategy::{content_based_scores, popularity_scores, rank_candidates};
