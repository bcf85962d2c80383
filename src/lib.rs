#![warn(missing_docs)]
//! Core library for thumbsearch: thumbnail embedding ingestion and channel-scoped search.

pub mod catalog;
pub mod controls;
pub mod embedder;
pub mod embeddings;
pub mod ingest;
pub mod query;
pub mod reconcile;
pub mod thumbnail;
pub mod vector_index;

pub use catalog::{thumbnail_url, Catalog, CatalogError, CatalogRecord, SqliteCatalog};
pub use controls::{Cli, IngestControls, PacingPolicy};
pub use embedder::{ClipHttpEmbedder, EmbedError, Embedder};
pub use embeddings::{EmbeddingRecord, ThumbnailMetadata};
pub use ingest::{
    CancelToken, FailedRecord, IngestCoordinator, IngestProgress, IngestReport, ProgressSnapshot,
    Stage, StageError,
};
pub use query::{search, QueryError, SearchHit, SearchRequest};
pub use reconcile::{plan_ingestion, IngestSelection};
pub use thumbnail::{FetchError, HttpThumbnailFetcher, ThumbnailFetcher};
pub use vector_index::{ChannelFilter, IndexError, LocalVectorIndex, ScoredEntry, VectorIndex};
