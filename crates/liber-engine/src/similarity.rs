//! Similarity matrix computation and versioned atomic publication.
//!
//! The full rebuild is O(n²) in catalog size, so it runs in blocks: the
//! rebuild state records how far the pair scan has progressed and can be
//! checkpointed between blocks when the running task's soft time limit
//! fires, then resumed in a later attempt. Publication swaps a whole matrix
//! version behind an `Arc`, so readers always see either the old or the new
//! complete matrix, never a partial one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use tracing::{debug, info};

use liber_core::defaults::{SIMILARITY_BLOCK_SIZE, SIMILARITY_MIN_SCORE, VECTOR_DIMENSION};
use liber_core::{Book, Error, ItemVector, Result, SimilarityMatrix};

// =============================================================================
// VECTORIZATION
// =============================================================================

/// FNV-1a hash, used to bucket feature tokens into vector dimensions.
/// Chosen over `DefaultHasher` because its output is stable across builds,
/// so stored vectors stay comparable after redeploys.
fn fnv1a(token: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in token.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Compute the content feature vector for one catalog item.
///
/// Hashed bag-of-features over subject labels and title tokens,
/// L2-normalized. Deterministic, so incremental updates and full rebuilds
/// agree without an external embedding service.
pub fn vectorize(book: &Book) -> ItemVector {
    let mut vector = vec![0.0f32; VECTOR_DIMENSION];

    for subject in &book.subjects {
        let idx = (fnv1a(&subject.to_lowercase()) % VECTOR_DIMENSION as u64) as usize;
        // Subjects are the stronger content signal.
        vector[idx] += 2.0;
    }
    for token in book.title.split_whitespace() {
        let idx = (fnv1a(&token.to_lowercase()) % VECTOR_DIMENSION as u64) as usize;
        vector[idx] += 1.0;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }

    ItemVector {
        book_id: book.id,
        vector,
        updated_at: Utc::now(),
    }
}

/// Cosine similarity of two item vectors.
///
/// Fails with a computation error on mismatched dimensions (corrupt cached
/// vectors). Feature weights are non-negative, so the result lies in [0,1].
pub fn cosine_similarity(a: &ItemVector, b: &ItemVector) -> Result<f32> {
    if a.vector.len() != b.vector.len() {
        return Err(Error::Computation(format!(
            "vector dimension mismatch: {} ({}) vs {} ({})",
            a.book_id,
            a.vector.len(),
            b.book_id,
            b.vector.len()
        )));
    }

    let dot: f32 = a.vector.iter().zip(&b.vector).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b: f32 = b.vector.iter().map(|v| v * v).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    Ok((dot / (norm_a * norm_b)).clamp(0.0, 1.0))
}

// =============================================================================
// CHUNKED REBUILD
// =============================================================================

/// Checkpointable progress of a matrix rebuild.
///
/// `next_row` is the first row of the pair scan not yet completed. The
/// partial matrix is internal state only; it is never published until the
/// scan completes.
#[derive(Debug)]
pub struct RebuildState {
    next_row: usize,
    partial: SimilarityMatrix,
}

impl RebuildState {
    pub fn new() -> Self {
        Self {
            next_row: 0,
            partial: SimilarityMatrix::new(),
        }
    }

    /// Completed fraction of the pair scan, for progress reporting.
    pub fn progress_fraction(&self, total_items: usize) -> f32 {
        if total_items == 0 {
            return 1.0;
        }
        (self.next_row as f32 / total_items as f32).min(1.0)
    }
}

impl Default for RebuildState {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of one rebuild drive: either a complete (unpublished) matrix or
/// a checkpoint to resume from.
#[derive(Debug)]
pub enum RebuildProgress {
    Complete(SimilarityMatrix),
    Paused(RebuildState),
}

/// Pairwise similarity computation over the item-vector corpus.
#[derive(Debug, Clone)]
pub struct SimilarityComputation {
    block_size: usize,
    min_score: f32,
}

impl Default for SimilarityComputation {
    fn default() -> Self {
        Self {
            block_size: SIMILARITY_BLOCK_SIZE,
            min_score: SIMILARITY_MIN_SCORE,
        }
    }
}

impl SimilarityComputation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of rows scanned per block (checkpoint granularity).
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    /// Set the sparsity cutoff below which pairs are not stored.
    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    /// Rebuild the full matrix in one call (no pausing).
    pub fn rebuild(&self, corpus: &[ItemVector]) -> Result<SimilarityMatrix> {
        match self.drive(corpus, RebuildState::new(), || false)? {
            RebuildProgress::Complete(matrix) => Ok(matrix),
            // Unreachable: should_pause is constant false.
            RebuildProgress::Paused(_) => Err(Error::Internal(
                "rebuild paused without a pause signal".to_string(),
            )),
        }
    }

    /// Drive a rebuild forward from `state`, scanning `block_size` rows at a
    /// time. `should_pause` is consulted between blocks; when it returns
    /// true the current state is returned for a later resume. Row `i` scans
    /// pairs `(i, j)` for `j > i`, so each pair is computed once.
    pub fn drive(
        &self,
        corpus: &[ItemVector],
        mut state: RebuildState,
        should_pause: impl Fn() -> bool,
    ) -> Result<RebuildProgress> {
        let n = corpus.len();
        while state.next_row < n {
            if should_pause() {
                debug!(
                    next_row = state.next_row,
                    total = n,
                    "Similarity rebuild checkpointing"
                );
                return Ok(RebuildProgress::Paused(state));
            }

            let end = (state.next_row + self.block_size).min(n);
            for i in state.next_row..end {
                for j in (i + 1)..n {
                    let score = cosine_similarity(&corpus[i], &corpus[j])?;
                    if score >= self.min_score {
                        state
                            .partial
                            .insert(corpus[i].book_id, corpus[j].book_id, score);
                    }
                }
            }
            state.next_row = end;
        }

        info!(
            items = n,
            pairs = state.partial.len(),
            "Similarity rebuild complete"
        );
        Ok(RebuildProgress::Complete(state.partial))
    }

    /// Refresh the feature vector for one item (incremental update path).
    pub fn update(&self, book: &Book) -> ItemVector {
        vectorize(book)
    }
}

// =============================================================================
// VERSIONED PUBLICATION
// =============================================================================

/// Multiple-reader/single-writer holder for the current similarity matrix.
///
/// Readers take one `Arc` snapshot per generation run and keep using it even
/// if a rebuild publishes mid-run. Versions are assigned at publication and
/// only ever increase.
pub struct SimilarityStore {
    current: RwLock<Arc<SimilarityMatrix>>,
    next_version: AtomicU64,
}

impl SimilarityStore {
    /// Create a store holding an empty version-0 matrix.
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(SimilarityMatrix::new())),
            next_version: AtomicU64::new(1),
        }
    }

    /// The current matrix snapshot. Cheap (one Arc clone).
    pub fn snapshot(&self) -> Arc<SimilarityMatrix> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Atomically publish a complete matrix as the next version and return
    /// the version number assigned to it.
    pub fn publish(&self, mut matrix: SimilarityMatrix) -> u64 {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Version assignment happens under the write lock so concurrent
        // publishers install in version order.
        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        matrix.version = version;
        matrix.built_at = Some(Utc::now());
        let pairs = matrix.len();
        *guard = Arc::new(matrix);
        drop(guard);

        info!(matrix_version = version, pairs, "Similarity matrix published");
        version
    }

    /// Install a previously published matrix, keeping its stored version.
    ///
    /// Used at process start to reload the last persisted matrix. A matrix
    /// no newer than the current one is ignored, so a stale load never
    /// rolls back a rebuild that already published in this process.
    pub fn restore(&self, matrix: SimilarityMatrix) -> bool {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if matrix.version <= guard.version {
            debug!(
                matrix_version = matrix.version,
                current_version = guard.version,
                "Ignoring stale similarity matrix"
            );
            return false;
        }
        self.next_version
            .fetch_max(matrix.version + 1, Ordering::SeqCst);
        let version = matrix.version;
        let pairs = matrix.len();
        *guard = Arc::new(matrix);
        drop(guard);

        info!(matrix_version = version, pairs, "Similarity matrix restored");
        true
    }

    /// Version of the currently published matrix (0 before first publish).
    pub fn current_version(&self) -> u64 {
        self.snapshot().version
    }
}

impl Default for SimilarityStore {
    fn default() -> Self {
        Self::new()
    }
}
