//! Individual scoring strategies over a candidate set.
//!
//! A *candidate* is a catalog item the user has not yet consumed. Each
//! strategy maps candidates to scores in [0,1]; ranking and truncation are
//! shared so ordering stays deterministic across strategies.

use std::collections::{HashMap, HashSet};

use tracing::trace;
use uuid::Uuid;

use liber_core::{Book, PopularityScore, ReadingRecord, ScoredItem, SimilarityMatrix};

/// Content-based scores: aggregate similarity of each candidate to the
/// user's historical items, read from one immutable matrix snapshot.
///
/// The score is the mean pairwise similarity over the whole history, with
/// unrecorded pairs counting as 0 (the sparsity cutoff already dropped
/// them). Candidates with no recorded similarity to any history item are
/// omitted, so a cold-start user yields an empty map.
pub fn content_based_scores(
    history: &[ReadingRecord],
    candidate_ids: &HashSet<Uuid>,
    matrix: &SimilarityMatrix,
) -> HashMap<Uuid, f32> {
    if history.is_empty() {
        return HashMap::new();
    }

    let mut scores: HashMap<Uuid, f32> = HashMap::new();
    for &candidate in candidate_ids {
        let mut total = 0.0f32;
        let mut matched = false;
        for record in history {
            if let Some(sim) = matrix.get(candidate, record.book_id) {
                total += sim;
                matched = true;
            }
        }
        if matched {
            let score = total / history.len() as f32;
            trace!(book_id = %candidate, score, "Content-based candidate score");
            scores.insert(candidate, score.clamp(0.0, 1.0));
        }
    }
    scores
}

/// Popularity scores restricted to the candidate set. User-independent.
pub fn popularity_scores(
    popularity: &[PopularityScore],
    candidate_ids: &HashSet<Uuid>,
) -> HashMap<Uuid, f32> {
    popularity
        .iter()
        .filter(|p| candidate_ids.contains(&p.book_id))
        .map(|p| (p.book_id, p.score.clamp(0.0, 1.0)))
        .collect()
}

/// Restrict a collaborative score map to the candidate set, clamping to the
/// [0,1] contract.
pub fn collaborative_scores(
    raw: HashMap<Uuid, f32>,
    candidate_ids: &HashSet<Uuid>,
) -> HashMap<Uuid, f32> {
    raw.into_iter()
        .filter(|(id, _)| candidate_ids.contains(id))
        .map(|(id, s)| (id, s.clamp(0.0, 1.0)))
        .collect()
}

/// Rank scored candidates deterministically and truncate to `count`.
///
/// Order: score descending, then item recency (newer publication first),
/// then ascending book id. Items missing from the catalog map keep a
/// minimal epoch recency so they sort last among ties.
pub fn rank_candidates(
    scores: HashMap<Uuid, f32>,
    books: &HashMap<Uuid, Book>,
    count: usize,
) -> Vec<ScoredItem> {
    let mut ranked: Vec<ScoredItem> = scores
        .into_iter()
        .map(|(book_id, score)| ScoredItem { book_id, score })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let a_pub = books.get(&a.book_id).map(|bk| bk.published_at);
                let b_pub = books.get(&b.book_id).map(|bk| bk.published_at);
                b_pub.cmp(&a_pub)
            })
            .then_with(|| a.book_id.cmp(&b.book_id))
    });
    ranked.truncate(count);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn book(id: Uuid, days_ago: i64) -> Book {
        Book {
            id,
            title: format!("book-{id}"),
            subjects: vec!["fiction".into()],
            published_at: Utc::now() - Duration::days(days_ago),
        }
    }

    fn record(user: Uuid, book_id: Uuid) -> ReadingRecord {
        ReadingRecord {
            user_id: user,
            book_id,
            finished_at: Utc::now(),
            rating: None,
        }
    }

    #[test]
    fn test_content_based_empty_history_yields_empty() {
        let matrix = SimilarityMatrix::new();
        let candidates: HashSet<Uuid> = [Uuid::new_v4()].into();
        let scores = content_based_scores(&[], &candidates, &matrix);
        assert!(scores.is_empty());
    }

    #[test]
    fn test_content_based_mean_over_history() {
        let user = Uuid::new_v4();
        let h1 = Uuid::new_v4();
        let h2 = Uuid::new_v4();
        let candidate = Uuid::new_v4();

        let mut matrix = SimilarityMatrix::new();
        matrix.insert(candidate, h1, 0.8);
        matrix.insert(candidate, h2, 0.4);

        let history = vec![record(user, h1), record(user, h2)];
        let candidates: HashSet<Uuid> = [candidate].into();
        let scores = content_based_scores(&history, &candidates, &matrix);

        assert!((scores[&candidate] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_content_based_unmatched_candidate_omitted() {
        let user = Uuid::new_v4();
        let h1 = Uuid::new_v4();
        let candidate = Uuid::new_v4();

        let matrix = SimilarityMatrix::new();
        let history = vec![record(user, h1)];
        let candidates: HashSet<Uuid> = [candidate].into();

        let scores = content_based_scores(&history, &candidates, &matrix);
        assert!(scores.is_empty());
    }

    #[test]
    fn test_popularity_filters_to_candidates() {
        let in_set = Uuid::new_v4();
        let consumed = Uuid::new_v4();
        let pop = vec![
            PopularityScore {
                book_id: in_set,
                score: 0.9,
            },
            PopularityScore {
                book_id: consumed,
                score: 1.0,
            },
        ];
        let candidates: HashSet<Uuid> = [in_set].into();
        let scores = popularity_scores(&pop, &candidates);
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[&in_set], 0.9);
    }

    #[test]
    fn test_collaborative_clamps_out_of_range() {
        let id = Uuid::new_v4();
        let mut raw = HashMap::new();
        raw.insert(id, 1.4);
        let candidates: HashSet<Uuid> = [id].into();
        let scores = collaborative_scores(raw, &candidates);
        assert_eq!(scores[&id], 1.0);
    }

    #[test]
    fn test_rank_orders_by_score_then_recency_then_id() {
        let newer = Uuid::new_v4();
        let older = Uuid::new_v4();
        let top = Uuid::new_v4();

        let mut books = HashMap::new();
        books.insert(newer, book(newer, 1));
        books.insert(older, book(older, 400));
        books.insert(top, book(top, 100));

        let mut scores = HashMap::new();
        scores.insert(top, 0.9);
        scores.insert(newer, 0.5);
        scores.insert(older, 0.5);

        let ranked = rank_candidates(scores, &books, 10);
        assert_eq!(ranked[0].book_id, top);
        assert_eq!(ranked[1].book_id, newer); // recency breaks the 0.5 tie
        assert_eq!(ranked[2].book_id, older);
    }

    #[test]
    fn test_rank_id_breaks_full_ties() {
        let t = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };

        let mut books = HashMap::new();
        for id in [a, b] {
            books.insert(
                id,
                Book {
                    id,
                    title: "t".into(),
                    subjects: vec![],
                    published_at: t,
                },
            );
        }

        let mut scores = HashMap::new();
        scores.insert(a, 0.5);
        scores.insert(b, 0.5);

        let ranked = rank_candidates(scores, &books, 10);
        assert_eq!(ranked[0].book_id, lo);
        assert_eq!(ranked[1].book_id, hi);
    }

    #[test]
    fn test_rank_truncates_to_count() {
        let mut books = HashMap::new();
        let mut scores = HashMap::new();
        for i in 0..10 {
            let id = Uuid::new_v4();
            books.insert(id, book(id, i));
            scores.insert(id, i as f32 / 10.0);
        }
        let ranked = rank_candidates(scores, &books, 3);
        assert_eq!(ranked.len(), 3);
        assert!(ranked[0].score >= ranked[1].score);
        assert!(ranked[1].score >= ranked[2].score);
    }
}
