//! # Nikki RAG
//!
//! Retrieval-augmented diary interpolation: given a date with no diary
//! entry, retrieve semantically and temporally relevant past entries from
//! a vector index and generate a plausible, style-checked passage for it.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌───────────────┐   ┌───────────┐   ┌────────────┐
//! │ Retriever │──▶│ ContextBuilder │──▶│ Generator │──▶│ Self-check │
//! │ window +  │   │ numbered       │   │ backend + │   │ 5 rule     │
//! │ backfill  │   │ context block  │   │ fallback  │   │ predicates │
//! └─────┬─────┘   └───────────────┘   └───────────┘   └─────┬──────┘
//!       │                                                   │
//!  embedding + vector index                        fallback on failure
//! ```
//!
//! ## Pipeline
//!
//! 1. The **retriever** ([`retriever`]) embeds the hint (or uses a zero
//!    vector) and queries the index inside a ±N calendar-day window,
//!    backfilling by pure similarity when the window is sparse.
//! 2. The **context builder** ([`context`]) normalizes the passages into
//!    a numbered context block.
//! 3. The **generator** ([`generator`]) renders the prompt template and
//!    calls the generation backend; output that fails validation — or any
//!    backend failure — is replaced by a deterministic fallback passage.
//! 4. The **self-check** ([`selfcheck`]) enforces date presence, banned
//!    words, header format, body structure, length, and punctuation.
//! 5. The **orchestrator** ([`orchestrator`]) sequences the stages and
//!    builds citations; its response is always structurally valid.
//!
//! ## Quick Start
//!
//! ```bash
//! nikki interpolate 2025-09-24 --hint "雨だった日"
//! nikki serve                  # POST /interpolate, GET /health
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Request/response value objects |
//! | [`embedding`] | Embedding service trait + HTTP provider |
//! | [`index`] | Vector index trait, remote client, in-memory index |
//! | [`retriever`] | Temporal + semantic hybrid search with backfill |
//! | [`context`] | Numbered context assembly |
//! | [`generator`] | Prompt rendering, backend call, fallback synthesis |
//! | [`selfcheck`] | Rule-based validation of generated passages |
//! | [`orchestrator`] | Pipeline sequencing and assembly from config |
//! | [`server`] | HTTP glue (axum) |

pub mod config;
pub mod context;
pub mod embedding;
pub mod generator;
pub mod index;
pub mod models;
pub mod orchestrator;
pub mod retriever;
pub mod selfcheck;
pub mod server;
