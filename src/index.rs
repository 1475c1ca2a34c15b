//! Vector index abstraction and implementations.
//!
//! The [`VectorIndex`] trait wraps a vector similarity index: given a query
//! vector, an optional date-range metadata filter, and `top_k`, it returns
//! scored matches with their stored metadata. Two implementations:
//!
//! - **[`RemoteIndex`]** — HTTP client for a hosted index speaking a
//!   Pinecone-style `POST /query` API.
//! - **[`InMemoryIndex`]** — brute-force cosine similarity over entries
//!   held in memory, for tests and offline runs.
//!
//! Matches carry metadata as raw [`serde_json::Value`] because hosted
//! indexes are inconsistent about numeric types (a stored timestamp may
//! come back as a number or a string). [`metadata_timestamp`] is the
//! defensive adapter the retriever uses to get a numeric epoch back out.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::RwLock;
use std::time::Duration;

use crate::config::IndexConfig;

/// One scored match returned by an index query, ordered by descending score.
#[derive(Debug, Clone)]
pub struct IndexMatch {
    pub id: String,
    pub score: f32,
    /// Stored record metadata, untyped. Expected keys: `text`, `date`
    /// (epoch seconds, number or numeric string), `location`.
    pub metadata: serde_json::Value,
}

/// Inclusive epoch-second range filter on the stored `date` field.
#[derive(Debug, Clone, Copy)]
pub struct DateRange {
    pub gte: i64,
    pub lte: i64,
}

/// Abstract vector similarity index.
///
/// Implementations must be `Send + Sync`; one instance serves all
/// concurrent pipeline executions.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Query for the `top_k` nearest records, optionally restricted to a
    /// date range. Results are ordered by descending score.
    async fn query(
        &self,
        vector: &[f32],
        filter: Option<&DateRange>,
        top_k: usize,
    ) -> Result<Vec<IndexMatch>>;
}

/// Extract a numeric epoch timestamp from a match's metadata `date` field.
///
/// Hosted indexes sometimes return stored numbers as strings; both forms
/// are accepted. Returns `None` when the field is missing or unparseable.
pub fn metadata_timestamp(metadata: &serde_json::Value) -> Option<f64> {
    match metadata.get("date") {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

// ============ Remote Index ============

/// HTTP client for a hosted vector index.
///
/// Speaks a Pinecone-style REST API: `POST {endpoint}/query` with an
/// `Api-Key` header and a JSON body carrying the vector, `topK`, and an
/// optional `$gte`/`$lte` metadata filter on `date`.
pub struct RemoteIndex {
    endpoint: String,
    api_key: String,
    timeout: Duration,
}

impl RemoteIndex {
    /// Create a remote index client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is unset or the configured API key
    /// environment variable is not set.
    pub fn new(config: &IndexConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| anyhow::anyhow!("index.endpoint required for remote index"))?;

        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", config.api_key_env))?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }
}

#[async_trait]
impl VectorIndex for RemoteIndex {
    async fn query(
        &self,
        vector: &[f32],
        filter: Option<&DateRange>,
        top_k: usize,
    ) -> Result<Vec<IndexMatch>> {
        let client = reqwest::Client::builder().timeout(self.timeout).build()?;

        let mut body = serde_json::json!({
            "vector": vector,
            "topK": top_k,
            "includeMetadata": true,
        });
        if let Some(range) = filter {
            body["filter"] = serde_json::json!({
                "date": { "$gte": range.gte, "$lte": range.lte }
            });
        }

        let response = client
            .post(format!("{}/query", self.endpoint))
            .header("Api-Key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Index query error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_query_response(&json)
    }
}

/// Parse a Pinecone-style query response into [`IndexMatch`]es.
fn parse_query_response(json: &serde_json::Value) -> Result<Vec<IndexMatch>> {
    let matches = json
        .get("matches")
        .and_then(|m| m.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid index response: missing matches array"))?;

    let mut out = Vec::with_capacity(matches.len());
    for m in matches {
        let id = m
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid index response: match without id"))?
            .to_string();
        let score = m.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0) as f32;
        let metadata = m
            .get("metadata")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));
        out.push(IndexMatch {
            id,
            score,
            metadata,
        });
    }
    Ok(out)
}

// ============ In-Memory Index ============

struct StoredRecord {
    id: String,
    vector: Vec<f32>,
    metadata: serde_json::Value,
}

/// In-memory index for tests and offline runs.
///
/// Vector search is brute-force cosine similarity over all stored records;
/// the date filter is applied before scoring.
pub struct InMemoryIndex {
    records: RwLock<Vec<StoredRecord>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }

    /// Insert or replace a record by id.
    pub fn upsert(&self, id: &str, vector: Vec<f32>, metadata: serde_json::Value) {
        let mut records = self.records.write().unwrap();
        records.retain(|r| r.id != id);
        records.push(StoredRecord {
            id: id.to_string(),
            vector,
            metadata,
        });
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn cosine_sim(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn query(
        &self,
        vector: &[f32],
        filter: Option<&DateRange>,
        top_k: usize,
    ) -> Result<Vec<IndexMatch>> {
        let records = self.records.read().unwrap();
        let mut matches: Vec<IndexMatch> = records
            .iter()
            .filter(|r| match filter {
                Some(range) => metadata_timestamp(&r.metadata)
                    .map(|ts| ts >= range.gte as f64 && ts <= range.lte as f64)
                    .unwrap_or(false),
                None => true,
            })
            .map(|r| IndexMatch {
                id: r.id.clone(),
                score: cosine_sim(vector, &r.vector),
                metadata: r.metadata.clone(),
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(top_k);
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, ts: serde_json::Value) -> serde_json::Value {
        serde_json::json!({ "text": format!("entry {}", id), "date": ts, "location": "" })
    }

    #[test]
    fn test_metadata_timestamp_number() {
        let meta = record("a", serde_json::json!(1758672000.0));
        assert_eq!(metadata_timestamp(&meta), Some(1758672000.0));
    }

    #[test]
    fn test_metadata_timestamp_string() {
        let meta = record("a", serde_json::json!("1758672000"));
        assert_eq!(metadata_timestamp(&meta), Some(1758672000.0));
    }

    #[test]
    fn test_metadata_timestamp_garbage() {
        let meta = record("a", serde_json::json!("2025-09-24"));
        assert_eq!(metadata_timestamp(&meta), None);
        assert_eq!(metadata_timestamp(&serde_json::json!({})), None);
    }

    #[test]
    fn test_parse_query_response() {
        let json = serde_json::json!({
            "matches": [
                { "id": "2025-09-24", "score": 0.9, "metadata": { "text": "t" } },
                { "id": "2025-09-23", "score": 0.5 }
            ]
        });
        let matches = parse_query_response(&json).unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].id, "2025-09-24");
        assert!(matches[1].metadata.is_object());
    }

    #[tokio::test]
    async fn test_in_memory_filter_and_order() {
        let index = InMemoryIndex::new();
        index.upsert("a", vec![1.0, 0.0], record("a", serde_json::json!(100)));
        index.upsert("b", vec![0.9, 0.1], record("b", serde_json::json!(200)));
        index.upsert("c", vec![0.0, 1.0], record("c", serde_json::json!(900)));

        let range = DateRange { gte: 100, lte: 200 };
        let matches = index
            .query(&[1.0, 0.0], Some(&range), 10)
            .await
            .unwrap();
        let ids: Vec<&str> = matches.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_in_memory_inclusive_bounds() {
        let index = InMemoryIndex::new();
        index.upsert("lo", vec![1.0], record("lo", serde_json::json!(100)));
        index.upsert("hi", vec![1.0], record("hi", serde_json::json!(300)));
        index.upsert("out", vec![1.0], record("out", serde_json::json!(301)));

        let range = DateRange { gte: 100, lte: 300 };
        let matches = index.query(&[1.0], Some(&range), 10).await.unwrap();
        assert_eq!(matches.len(), 2);
    }

    #[tokio::test]
    async fn test_in_memory_top_k_truncation() {
        let index = InMemoryIndex::new();
        for i in 0..5 {
            index.upsert(
                &format!("e{}", i),
                vec![1.0, i as f32 * 0.1],
                record("e", serde_json::json!(100 + i)),
            );
        }
        let matches = index.query(&[1.0, 0.0], None, 3).await.unwrap();
        assert_eq!(matches.len(), 3);
    }
}
