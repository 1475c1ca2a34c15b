//! Hybrid temporal + semantic retrieval over the vector index.
//!
//! A search combines two signals for a `(date, query)` pair:
//!
//! 1. A metadata filter restricting matches to an inclusive calendar-day
//!    window around the target date.
//! 2. Vector similarity against the embedded query text. An empty query
//!    embeds nothing and searches with a zero vector, deliberately leaving
//!    the ranking inside the window to the index.
//!
//! When the windowed query returns fewer than `k` matches, a second,
//! unfiltered query tops the list up by pure similarity ("backfill"),
//! deduplicated by record id. Windowed matches always precede backfilled
//! ones in the returned order.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use thiserror::Error;

use crate::embedding::Embedder;
use crate::index::{metadata_timestamp, DateRange, IndexMatch, VectorIndex};
use crate::models::{Passage, PassageMeta};

/// Errors the retrieval stage reports to the orchestrator.
///
/// A failing index *query* is not represented here: it degrades to an
/// empty passage list inside [`Retriever::search`] and is logged. Only
/// conditions that prevent a search from being attempted at all surface
/// as errors, so the orchestrator can decide how to degrade.
#[derive(Debug, Error)]
pub enum RetrieveError {
    #[error("retriever is not initialized: {0} is unavailable")]
    Unavailable(&'static str),
    #[error("invalid date '{0}': expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("query embedding failed: {0}")]
    Embedding(#[source] anyhow::Error),
}

/// Retrieves date-windowed, similarity-ranked diary passages.
///
/// Collaborators are injected as optional handles; a missing handle means
/// the deployment has no working embedding service or index, and every
/// search fails with [`RetrieveError::Unavailable`].
pub struct Retriever {
    embedder: Option<Arc<dyn Embedder>>,
    index: Option<Arc<dyn VectorIndex>>,
}

impl Retriever {
    pub fn new(embedder: Option<Arc<dyn Embedder>>, index: Option<Arc<dyn VectorIndex>>) -> Self {
        Self { embedder, index }
    }

    /// Search for up to `k` passages relevant to `date` and `query`.
    ///
    /// Returns windowed matches first, then backfilled ones, each group in
    /// the index's descending score order. An index failure mid-query is
    /// logged and yields an empty list rather than an error.
    pub async fn search(
        &self,
        date: &str,
        query: &str,
        k: usize,
        day_window: i64,
    ) -> Result<Vec<Passage>, RetrieveError> {
        let embedder = self
            .embedder
            .as_ref()
            .ok_or(RetrieveError::Unavailable("embedding service"))?;
        let index = self
            .index
            .as_ref()
            .ok_or(RetrieveError::Unavailable("vector index"))?;

        let target = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|_| RetrieveError::InvalidDate(date.to_string()))?;

        let start = target - Duration::days(day_window);
        let end = target + Duration::days(day_window);
        let range = DateRange {
            gte: midnight_epoch(start),
            lte: midnight_epoch(end),
        };

        let vector = if !query.is_empty() {
            embedder
                .embed(query)
                .await
                .map_err(RetrieveError::Embedding)?
        } else {
            // No query text: match on the window alone. Similarity against
            // the zero vector is index-defined and that ranking is accepted
            // as-is.
            vec![0.0; embedder.dims()]
        };

        let matches = match run_queries(index.as_ref(), &vector, &range, k).await {
            Ok(matches) => matches,
            Err(e) => {
                tracing::error!("index query failed, degrading to empty result: {e:#}");
                return Ok(Vec::new());
            }
        };

        Ok(matches.into_iter().map(to_passage).collect())
    }
}

/// Windowed query plus similarity backfill, deduplicated by id.
async fn run_queries(
    index: &dyn VectorIndex,
    vector: &[f32],
    range: &DateRange,
    k: usize,
) -> anyhow::Result<Vec<IndexMatch>> {
    let mut matches = index.query(vector, Some(range), k).await?;

    if matches.len() < k {
        let mut found: HashSet<String> = matches.iter().map(|m| m.id.clone()).collect();
        // Over-fetch so that dedup against the windowed matches still
        // leaves enough candidates to reach k.
        let broader = index.query(vector, None, k * 2).await?;
        for m in broader {
            if found.contains(&m.id) {
                continue;
            }
            found.insert(m.id.clone());
            matches.push(m);
            if matches.len() >= k {
                break;
            }
        }
    }

    Ok(matches)
}

/// Midnight of `date` as a UTC epoch timestamp.
fn midnight_epoch(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp()
}

fn to_passage(m: IndexMatch) -> Passage {
    // Stored timestamps come back as numbers or numeric strings; anything
    // unparseable falls back to the record id, which by ingestion
    // convention is the ISO date itself.
    let date = metadata_timestamp(&m.metadata)
        .and_then(|ts| chrono::DateTime::from_timestamp(ts as i64, 0))
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| m.id.clone());

    let text = m
        .metadata
        .get("text")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let location = m
        .metadata
        .get("location")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    Passage {
        text,
        metadata: PassageMeta { date, location },
        score: m.score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::InMemoryIndex;
    use anyhow::Result;
    use async_trait::async_trait;

    struct FakeEmbedder {
        dims: usize,
    }

    #[async_trait]
    impl Embedder for FakeEmbedder {
        fn model_name(&self) -> &str {
            "fake"
        }
        fn dims(&self) -> usize {
            self.dims
        }
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            // Deterministic direction keyed on text length.
            let mut v = vec![0.0; self.dims];
            v[text.chars().count() % self.dims] = 1.0;
            Ok(v)
        }
    }

    struct BrokenIndex;

    #[async_trait]
    impl VectorIndex for BrokenIndex {
        async fn query(
            &self,
            _vector: &[f32],
            _filter: Option<&DateRange>,
            _top_k: usize,
        ) -> Result<Vec<IndexMatch>> {
            anyhow::bail!("connection reset")
        }
    }

    fn epoch(date: &str) -> i64 {
        NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp()
    }

    fn seed(index: &InMemoryIndex, date: &str, vector: Vec<f32>) {
        index.upsert(
            date,
            vector,
            serde_json::json!({
                "text": format!("{} の出来事", date),
                "date": epoch(date),
                "location": "tokyo",
            }),
        );
    }

    fn retriever(index: InMemoryIndex, dims: usize) -> Retriever {
        Retriever::new(
            Some(Arc::new(FakeEmbedder { dims })),
            Some(Arc::new(index)),
        )
    }

    #[tokio::test]
    async fn test_empty_query_returns_windowed_entries() {
        let index = InMemoryIndex::new();
        seed(&index, "2025-09-22", vec![1.0, 0.0]);
        seed(&index, "2025-09-23", vec![0.0, 1.0]);
        seed(&index, "2025-09-24", vec![0.5, 0.5]);

        let r = retriever(index, 2);
        let passages = r.search("2025-09-24", "", 6, 3).await.unwrap();
        assert_eq!(passages.len(), 3);
        for p in &passages {
            assert!(p.metadata.date.starts_with("2025-09-2"));
        }
    }

    #[tokio::test]
    async fn test_window_bounds_are_inclusive() {
        let index = InMemoryIndex::new();
        seed(&index, "2025-09-21", vec![1.0, 0.0]);
        seed(&index, "2025-09-27", vec![1.0, 0.0]);
        seed(&index, "2025-09-28", vec![1.0, 0.0]);

        // k = 2 keeps backfill out of the picture: both boundary entries
        // must come from the windowed query alone.
        let r = retriever(index, 2);
        let passages = r.search("2025-09-24", "", 2, 3).await.unwrap();
        let dates: Vec<&str> = passages.iter().map(|p| p.metadata.date.as_str()).collect();
        assert!(dates.contains(&"2025-09-21"));
        assert!(dates.contains(&"2025-09-27"));
        assert!(!dates.contains(&"2025-09-28"));
    }

    #[tokio::test]
    async fn test_backfill_tops_up_and_deduplicates() {
        let index = InMemoryIndex::new();
        seed(&index, "2025-09-24", vec![1.0, 0.0]);
        // Outside the window, reachable only via backfill.
        seed(&index, "2025-01-01", vec![1.0, 0.0]);
        seed(&index, "2025-02-01", vec![0.9, 0.1]);

        let r = retriever(index, 2);
        let passages = r.search("2025-09-24", "", 3, 3).await.unwrap();
        assert_eq!(passages.len(), 3);
        // Windowed match first, then backfill.
        assert_eq!(passages[0].metadata.date, "2025-09-24");

        let mut ids: Vec<&str> = passages.iter().map(|p| p.metadata.date.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 3, "backfill must not duplicate ids");
    }

    #[tokio::test]
    async fn test_string_timestamp_resolves_to_iso_date() {
        let index = InMemoryIndex::new();
        index.upsert(
            "2025-09-24",
            vec![1.0, 0.0],
            serde_json::json!({
                "text": "t",
                "date": epoch("2025-09-24").to_string(),
                "location": "",
            }),
        );

        let r = retriever(index, 2);
        let passages = r.search("2025-09-24", "", 6, 3).await.unwrap();
        assert_eq!(passages[0].metadata.date, "2025-09-24");
    }

    #[tokio::test]
    async fn test_unparseable_timestamp_falls_back_to_id() {
        let index = InMemoryIndex::new();
        // The in-memory date filter drops records without a numeric date,
        // so this one is only reachable through backfill.
        index.upsert(
            "2025-09-20",
            vec![1.0, 0.0],
            serde_json::json!({ "text": "t", "date": "not-a-number", "location": "" }),
        );

        let r = retriever(index, 2);
        let passages = r.search("2025-09-24", "", 6, 3).await.unwrap();
        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].metadata.date, "2025-09-20");
    }

    #[tokio::test]
    async fn test_unavailable_without_collaborators() {
        let r = Retriever::new(None, None);
        let err = r.search("2025-09-24", "", 6, 3).await.unwrap_err();
        assert!(matches!(err, RetrieveError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_invalid_date_is_an_error_not_a_panic() {
        let index = InMemoryIndex::new();
        let r = retriever(index, 2);
        let err = r.search("not-a-date", "", 6, 3).await.unwrap_err();
        assert!(matches!(err, RetrieveError::InvalidDate(_)));
    }

    #[tokio::test]
    async fn test_query_failure_degrades_to_empty() {
        let r = Retriever::new(
            Some(Arc::new(FakeEmbedder { dims: 2 })),
            Some(Arc::new(BrokenIndex)),
        );
        let passages = r.search("2025-09-24", "rainy day", 6, 3).await.unwrap();
        assert!(passages.is_empty());
    }
}
