//! Wires settings into a running search stack
use crate::listings;
use crate::settings::{EmbeddingProvider, Settings};
use anyhow::{Context, Result};
use staysearch_core::{
    CachedEmbedder, CompositeIndex, Embedder, HashEmbedder, MemoryStore, VectorStore,
};
use staysearch_query::{
    OpenAiConfig, OpenAiEmbedder, OpenAiTranslator, QueryCompiler, SearchExecutor,
};
use staysearch_storage::{QdrantConfig, QdrantStore, SnapshotManager};
use std::sync::Arc;
use tracing::info;

const EMBEDDING_CACHE_CAPACITY: usize = 10_000;

pub struct App {
    pub executor: Arc<SearchExecutor>,
    /// Present when vectors live in process memory
    pub memory: Option<Arc<MemoryStore>>,
    pub snapshots: Option<SnapshotManager>,
}

impl App {
    pub async fn build(settings: &Settings) -> Result<Self> {
        settings.validate()?;
        let config = listings::index_config(
            &settings.embedding_model,
            settings.embedding_dim,
            settings.reference_time(),
        );
        let dimension: usize = config.spaces.iter().map(|s| s.dimension()).sum();

        let embedder: Arc<dyn Embedder> = match settings.embedding_provider {
            EmbeddingProvider::Hash => Arc::new(HashEmbedder::new(settings.embedding_dim)),
            EmbeddingProvider::Openai => {
                let key = settings
                    .openai_api_key
                    .as_ref()
                    .context("OPENAI_API_KEY is not set")?;
                let openai = OpenAiEmbedder::new(openai_config(settings, key.expose()))?;
                Arc::new(CachedEmbedder::new(openai, EMBEDDING_CACHE_CAPACITY))
            }
        };

        let snapshots = match &settings.snapshot_dir {
            Some(dir) if !settings.use_qdrant => Some(SnapshotManager::new(dir)?),
            _ => None,
        };

        let (store, memory): (Arc<dyn VectorStore>, Option<Arc<MemoryStore>>) =
            if settings.use_qdrant {
                let url = settings.qdrant_url.clone().unwrap_or_default();
                let mut qdrant = QdrantConfig::new(url, settings.qdrant_collection.clone());
                if let Some(key) = &settings.qdrant_api_key {
                    qdrant = qdrant.with_api_key(key.expose());
                }
                qdrant.timeout = settings.request_timeout();
                let store = QdrantStore::connect(qdrant, dimension).await?;
                (Arc::new(store), None)
            } else {
                let memory = Arc::new(MemoryStore::new());
                if let Some(manager) = &snapshots {
                    let restored = manager.restore_latest(
                        listings::INDEX_NAME,
                        &config.spaces,
                        config.now,
                        &memory,
                    )?;
                    if restored > 0 {
                        info!("Restored {} listings from snapshot", restored);
                    }
                }
                (memory.clone(), Some(memory))
            };

        let index = Arc::new(CompositeIndex::new(config, store, embedder)?);

        let mut compiler = QueryCompiler::new().with_timeout(settings.request_timeout());
        if let Some(key) = settings.openai_api_key.as_ref().filter(|k| !k.is_empty()) {
            let translator = OpenAiTranslator::new(openai_config(settings, key.expose()))?;
            compiler = compiler.with_translator(Arc::new(translator));
            info!("Natural-language queries enabled ({})", settings.openai_model);
        }

        let executor =
            SearchExecutor::new(index, compiler).with_templates(listings::templates())?;

        Ok(Self {
            executor: Arc::new(executor),
            memory,
            snapshots,
        })
    }

    pub fn index(&self) -> &Arc<CompositeIndex> {
        self.executor.index()
    }

    /// Persist the in-memory store, if there is one to persist
    pub fn save_snapshot(&self) -> Result<()> {
        if let (Some(manager), Some(memory)) = (&self.snapshots, &self.memory) {
            let index = self.index();
            let description = manager.save(index.name(), index.spaces(), index.now(), memory)?;
            info!("Saved snapshot {} ({} bytes)", description.name, description.size);
        }
        Ok(())
    }
}

fn openai_config(settings: &Settings, key: &str) -> OpenAiConfig {
    OpenAiConfig::new(key, settings.openai_model.clone())
        .with_base_url(settings.openai_base_url.clone())
        .with_timeout(settings.request_timeout())
}
