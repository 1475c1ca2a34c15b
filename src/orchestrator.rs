//! Pipeline sequencing: retrieve → assemble context → generate → cite.
//!
//! The orchestrator owns one request-scoped pass through the pipeline and
//! the construction of citations from retrieved passages. It never lets an
//! error escape [`interpolate`](Orchestrator::interpolate): retrieval
//! failures degrade to an error-text response with empty citations, and
//! generation always produces text via the fallback tier.
//!
//! [`build_pipeline`] assembles the collaborators from configuration.
//! Collaborator construction failures (missing API keys, disabled
//! providers) degrade the corresponding stage; a missing prompt template
//! is the one fatal error, surfaced at assembly time.

use std::sync::Arc;

use anyhow::Result;

use crate::config::{Config, RetrievalConfig};
use crate::context::{build_context, ContextItem};
use crate::embedding::{Embedder, HttpEmbedder};
use crate::generator::{GenerationBackend, Generator, HttpBackend, SamplingParams};
use crate::index::{RemoteIndex, VectorIndex};
use crate::models::{Citation, InterpolationRequest, InterpolationResponse};
use crate::retriever::Retriever;

/// Characters of passage text quoted in a citation snippet.
const SNIPPET_CHARS: usize = 100;

pub struct Orchestrator {
    retriever: Retriever,
    generator: Generator,
    top_k: usize,
    day_window: i64,
}

impl Orchestrator {
    pub fn new(retriever: Retriever, generator: Generator, retrieval: &RetrievalConfig) -> Self {
        Self {
            retriever,
            generator,
            top_k: retrieval.top_k,
            day_window: retrieval.day_window,
        }
    }

    /// Run the full interpolation pipeline for one request.
    ///
    /// The response is always structurally complete; failures degrade the
    /// text content instead of erroring.
    pub async fn interpolate(&self, request: &InterpolationRequest) -> InterpolationResponse {
        let hint = request.hint.as_deref();

        let passages = match self
            .retriever
            .search(&request.date, hint.unwrap_or(""), self.top_k, self.day_window)
            .await
        {
            Ok(passages) => passages,
            Err(e) => {
                tracing::error!("retrieval failed for {}: {e}", request.date);
                return InterpolationResponse {
                    date: request.date.clone(),
                    text: format!("Error during retrieval: {}", e),
                    citations: Vec::new(),
                };
            }
        };

        let items: Vec<ContextItem> = passages.iter().cloned().map(Into::into).collect();
        let context = build_context(&items);

        let text = self
            .generator
            .generate_interpolation(&request.date, &context, hint)
            .await;

        let citations = passages
            .iter()
            .map(|p| {
                let snippet: String = p.text.chars().take(SNIPPET_CHARS).collect();
                Citation {
                    snippet: format!("{}...", snippet),
                    date: if p.metadata.date.is_empty() {
                        request.date.clone()
                    } else {
                        p.metadata.date.clone()
                    },
                }
            })
            .collect();

        InterpolationResponse {
            date: request.date.clone(),
            text,
            citations,
        }
    }
}

/// Assemble the pipeline from configuration.
///
/// Unavailable collaborators are logged and left out, letting the
/// corresponding stage degrade at request time. A missing prompt template
/// is a configuration error and fails assembly.
pub fn build_pipeline(config: &Config) -> Result<Orchestrator> {
    let embedder: Option<Arc<dyn Embedder>> = if config.embedding.is_enabled() {
        match HttpEmbedder::new(&config.embedding) {
            Ok(e) => Some(Arc::new(e)),
            Err(e) => {
                tracing::warn!("embedding service unavailable: {e:#}");
                None
            }
        }
    } else {
        tracing::warn!("embedding provider disabled; retrieval will be unavailable");
        None
    };

    let index: Option<Arc<dyn VectorIndex>> = if config.index.is_enabled() {
        match RemoteIndex::new(&config.index) {
            Ok(i) => Some(Arc::new(i)),
            Err(e) => {
                tracing::warn!("vector index unavailable: {e:#}");
                None
            }
        }
    } else {
        tracing::warn!("index provider disabled; retrieval will be unavailable");
        None
    };

    let backend: Option<Arc<dyn GenerationBackend>> = if config.generation.is_enabled() {
        match HttpBackend::new(&config.generation) {
            Ok(b) => Some(Arc::new(b)),
            Err(e) => {
                tracing::warn!("generation backend unavailable, using rule-based fallback: {e:#}");
                None
            }
        }
    } else {
        None
    };

    let generator = Generator::from_dir(
        &config.prompts.dir,
        backend,
        SamplingParams::from(&config.generation),
    )?;

    let retriever = Retriever::new(embedder, index);

    Ok(Orchestrator::new(retriever, generator, &config.retrieval))
}
