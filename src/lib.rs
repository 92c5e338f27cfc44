//! Token-budget-aware prompt optimization middleware.
//!
//! Requests flow through a fixed pipeline — cache lookup, canonicalization,
//! heuristic trimming, optional semantic retrieval (MMR + budget
//! allocation), optional faithfulness-gated compression, validation, and
//! fallback — producing an optimized message list plus a full accounting
//! of what was kept, dropped, and why. See [`pipeline::Pipeline`].

pub mod block;
pub mod budget;
pub mod cache;
pub mod canonicalize;
pub mod compressor;
pub mod config;
pub mod dashboard;
pub mod embedding;
pub mod entities;
pub mod error;
pub mod fallback;
pub mod heuristics;
pub mod inference;
pub mod mmr;
pub mod observability;
pub mod pipeline;
pub mod scorer;
pub mod token_counter;
pub mod types;
pub mod validator;
pub mod vector_store;

pub use block::{Block, BlockType};
pub use cache::{InMemoryResultCache, ResultCache};
pub use config::{ResolvedConfig, Settings};
pub use dashboard::{DashboardClient, HttpDashboardClient};
pub use embedding::{EmbeddingProvider, EmbeddingService};
pub use error::PipelineError;
pub use inference::InferenceProvider;
pub use observability::Metrics;
pub use pipeline::{OptimizeRequest, OptimizeResult, Pipeline};
pub use vector_store::{InMemoryVectorStore, VectorStore};
