//! Shared embedding data structures passed from the pipeline to the vector index.

use serde::{Deserialize, Serialize};

use crate::catalog::CatalogRecord;

/// Metadata stored next to every thumbnail vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbnailMetadata {
    /// Creator namespace; the only field queries filter on.
    pub channel_name: String,
    /// Title of the video the thumbnail belongs to.
    pub video_title: String,
}

/// One vector ready to be upserted, keyed by video id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// Video id.
    pub id: String,
    /// Model embedding vector.
    pub vector: Vec<f32>,
    /// Channel and title.
    pub metadata: ThumbnailMetadata,
}

impl EmbeddingRecord {
    /// Pairs a catalog record with the vector computed for its thumbnail.
    pub fn from_catalog(record: &CatalogRecord, vector: Vec<f32>) -> Self {
        Self {
            id: record.video_id.clone(),
            vector,
            metadata: ThumbnailMetadata {
                channel_name: record.channel_name.clone(),
                video_title: record.video_title.clone(),
            },
        }
    }
}
