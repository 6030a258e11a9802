//! Text embedding providers
//!
//! Text spaces delegate to an [`Embedder`]. The hosted provider lives in
//! `staysearch-query`; this module carries the trait, an offline hashing
//! embedder and a caching wrapper.

use crate::{Error, Result, Vector};
use ahash::AHashMap;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Produces a fixed-length vector for a text under a named model identity.
///
/// Implementations report provider failures (including timeouts) as
/// [`Error::EmbeddingUnavailable`].
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str, model: &str) -> Result<Vector>;
}

#[async_trait]
impl<E: Embedder + ?Sized> Embedder for Arc<E> {
    async fn embed(&self, text: &str, model: &str) -> Result<Vector> {
        (**self).embed(text, model).await
    }
}

/// Deterministic trigram/word hashing embedder.
///
/// Runs offline. The model identity seeds the hash, so vectors produced
/// under different identities do not line up.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn embed_sync(&self, text: &str, model: &str) -> Vector {
        let mut vector = vec![0.0f32; self.dim];
        if self.dim == 0 {
            return Vector::new(vector);
        }
        let normalized = text.to_lowercase();

        for trigram in generate_trigrams(&normalized) {
            let pos = (hash_with_model(model, &trigram) as usize) % self.dim;
            vector[pos] += 1.0;
        }

        // Whole words weigh more than their trigrams
        for word in normalized.split_whitespace() {
            let pos = (hash_with_model(model, word) as usize) % self.dim;
            vector[pos] += 2.0;
        }

        Vector::new(vector).normalized()
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str, model: &str) -> Result<Vector> {
        Ok(self.embed_sync(text, model))
    }
}

fn hash_with_model(model: &str, token: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    model.hash(&mut hasher);
    token.hash(&mut hasher);
    hasher.finish()
}

fn generate_trigrams(s: &str) -> HashSet<String> {
    let padded = format!("  {}  ", s);
    let chars: Vec<char> = padded.chars().collect();

    if chars.len() < 3 {
        return HashSet::new();
    }

    chars.windows(3).map(|w| w.iter().collect::<String>()).collect()
}

/// Caches embeddings per (model, text). Failures are never cached.
pub struct CachedEmbedder<E> {
    inner: E,
    cache: RwLock<AHashMap<(String, String), Vector>>,
    capacity: usize,
}

impl<E: Embedder> CachedEmbedder<E> {
    pub fn new(inner: E, capacity: usize) -> Self {
        Self {
            inner,
            cache: RwLock::new(AHashMap::new()),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }
}

#[async_trait]
impl<E: Embedder> Embedder for CachedEmbedder<E> {
    async fn embed(&self, text: &str, model: &str) -> Result<Vector> {
        let key = (model.to_string(), text.to_string());
        let cached = self.cache.read().get(&key).cloned();
        if let Some(hit) = cached {
            return Ok(hit);
        }

        let vector = self.inner.embed(text, model).await?;

        let mut cache = self.cache.write();
        if cache.len() >= self.capacity {
            // Bounded memory: drop everything rather than track recency
            cache.clear();
        }
        if self.capacity > 0 {
            cache.insert(key, vector.clone());
        }
        Ok(vector)
    }
}

/// Embedder that always fails; used when no provider is configured for a model
#[derive(Debug, Clone, Default)]
pub struct UnavailableEmbedder;

#[async_trait]
impl Embedder for UnavailableEmbedder {
    async fn embed(&self, _text: &str, model: &str) -> Result<Vector> {
        Err(Error::EmbeddingUnavailable(format!(
            "no embedding provider configured for model '{}'",
            model
        )))
    }
}
