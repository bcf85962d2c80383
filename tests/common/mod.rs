#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use thumbsearch::{
    ChannelFilter, EmbedError, Embedder, FetchError, IndexError, LocalVectorIndex, ScoredEntry,
    ThumbnailFetcher, ThumbnailMetadata, VectorIndex,
};

pub const DIMS: usize = 3;

/// Returns the thumbnail URL's bytes as the "image", failing for listed URLs.
#[derive(Default)]
pub struct FakeFetcher {
    failing: HashSet<String>,
    pub calls: AtomicUsize,
}

impl FakeFetcher {
    pub fn failing_for(video_ids: &[&str]) -> Self {
        Self {
            failing: video_ids
                .iter()
                .map(|id| thumbsearch::thumbnail_url(id))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

impl ThumbnailFetcher for FakeFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(url) {
            return Err(FetchError::Empty {
                url: url.to_string(),
            });
        }
        Ok(url.as_bytes().to_vec())
    }
}

/// Deterministic embedder: image vectors derive from the bytes, text maps to a fixed vector.
#[derive(Default)]
pub struct FakeEmbedder {
    failing_images: HashSet<Vec<u8>>,
    fail_text: bool,
    pub image_calls: AtomicUsize,
}

impl FakeEmbedder {
    pub fn failing_for(video_ids: &[&str]) -> Self {
        Self {
            failing_images: video_ids
                .iter()
                .map(|id| thumbsearch::thumbnail_url(id).into_bytes())
                .collect(),
            ..Self::default()
        }
    }

    pub fn failing_text() -> Self {
        Self {
            fail_text: true,
            ..Self::default()
        }
    }
}

impl Embedder for FakeEmbedder {
    fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>, EmbedError> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_images.contains(bytes) {
            return Err(EmbedError::InvalidResponse("forced failure".into()));
        }
        let sum: u32 = bytes.iter().map(|b| *b as u32).sum();
        Ok(vec![1.0, (sum % 97) as f32 / 97.0, bytes.len() as f32 / 100.0])
    }

    fn embed_text(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
        if self.fail_text {
            return Err(EmbedError::InvalidResponse("forced failure".into()));
        }
        Ok(vec![1.0, 0.5, 0.5])
    }
}

/// Wraps a real in-memory index and records every upsert attempt.
pub struct RecordingIndex {
    inner: LocalVectorIndex,
    failing: HashSet<String>,
    pub upserts: Mutex<Vec<String>>,
}

impl RecordingIndex {
    pub fn new() -> Self {
        Self::failing_for(&[])
    }

    pub fn failing_for(ids: &[&str]) -> Self {
        Self {
            inner: LocalVectorIndex::in_memory(),
            failing: ids.iter().map(|id| id.to_string()).collect(),
            upserts: Mutex::new(Vec::new()),
        }
    }

    pub fn upserted_ids(&self) -> Vec<String> {
        let mut ids = self.upserts.lock().unwrap().clone();
        ids.sort();
        ids
    }

    pub fn inner(&self) -> &LocalVectorIndex {
        &self.inner
    }
}

impl VectorIndex for RecordingIndex {
    fn upsert(
        &self,
        id: &str,
        vector: &[f32],
        metadata: &ThumbnailMetadata,
    ) -> Result<(), IndexError> {
        self.upserts.lock().unwrap().push(id.to_string());
        if self.failing.contains(id) {
            return Err(IndexError::EmptyVector);
        }
        self.inner.upsert(id, vector, metadata)
    }

    fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &ChannelFilter,
    ) -> Result<Vec<ScoredEntry>, IndexError> {
        self.inner.query(vector, k, filter)
    }

    fn contains(&self, id: &str) -> Result<bool, IndexError> {
        self.inner.contains(id)
    }
}

pub fn metadata(channel: &str, title: &str) -> ThumbnailMetadata {
    ThumbnailMetadata {
        channel_name: channel.to_string(),
        video_title: title.to_string(),
    }
}
