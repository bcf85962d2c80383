//! Natural-language search over one channel's thumbnails.

use thiserror::Error;
use tracing::debug;

use crate::embedder::{EmbedError, Embedder};
use crate::embeddings::ThumbnailMetadata;
use crate::vector_index::{ChannelFilter, IndexError, VectorIndex};

const WATCH_URL: &str = "https://www.youtube.com/watch?v=";

/// A search that produced no usable ranking.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Embedding the query text failed.
    #[error("failed to embed search query: {0}")]
    Embed(#[from] EmbedError),
    /// The vector index lookup failed.
    #[error("vector index query failed: {0}")]
    Index(#[from] IndexError),
}

/// Search parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    /// Free-text description of the thumbnail wanted.
    pub query: String,
    /// Channel whose thumbnails are searched.
    pub channel_name: String,
    /// Maximum number of hits.
    pub k: usize,
}

/// One ranked thumbnail.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Video id.
    pub id: String,
    /// Channel and title.
    pub metadata: ThumbnailMetadata,
    /// Cosine similarity, higher is closer.
    pub score: f32,
}

impl SearchHit {
    /// Watch page for the hit's video.
    pub fn watch_url(&self) -> String {
        format!("{WATCH_URL}{}", self.id)
    }
}

/// Embeds the query text and returns the `k` closest thumbnails in the channel, best first.
///
/// An unknown channel or `k == 0` yields an empty list.
pub fn search(
    embedder: &dyn Embedder,
    index: &dyn VectorIndex,
    request: &SearchRequest,
) -> Result<Vec<SearchHit>, QueryError> {
    if request.k == 0 {
        return Ok(Vec::new());
    }
    let vector = embedder.embed_text(&request.query)?;
    let filter = ChannelFilter::new(request.channel_name.as_str());
    let hits = index.query(&vector, request.k, &filter)?;
    debug!(
        channel = %request.channel_name,
        k = request.k,
        hits = hits.len(),
        "search complete"
    );
    Ok(hits
        .into_iter()
        .map(|hit| SearchHit {
            id: hit.id,
            metadata: hit.metadata,
            score: hit.score,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_url_uses_video_id() {
        let hit = SearchHit {
            id: "dQw4w9WgXcQ".into(),
            metadata: ThumbnailMetadata {
                channel_name: "C".into(),
                video_title: "t".into(),
            },
            score: 0.5,
        };
        assert_eq!(hit.watch_url(), "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
    }
}
