/// Application wiring shared by the CLI and the MCP server: one embedder,
/// the two knowledge bases, the builder, the router and the chat pipeline.
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::{Config, EmbedderBackend};
use crate::embedder::{self, Embedder};
use crate::ingest::{self, Ingestor, SourceFile};
use crate::knowledge::{
    BuildError, BuildReport, IndexStats, KnowledgeBase, KnowledgeBaseBuilder, KnowledgeKind,
    ScoredChunk,
};
use crate::llm::{ChatPipeline, LanguageModel, OllamaClient};
use crate::retrieval::{ContextBudget, KeywordRouting, RetrievalRouter, RoutingPolicy};

/// Characters of chunk content shown in a search hit.
pub const PREVIEW_CHARS: usize = 200;

/// Which knowledge bases a rebuild or search addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RebuildTarget {
    Static,
    Dynamic,
    All,
}

impl RebuildTarget {
    pub fn kinds(self) -> &'static [KnowledgeKind] {
        match self {
            RebuildTarget::Static => &[KnowledgeKind::Static],
            RebuildTarget::Dynamic => &[KnowledgeKind::Dynamic],
            RebuildTarget::All => &[KnowledgeKind::Static, KnowledgeKind::Dynamic],
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RebuildOutcome {
    pub kind: KnowledgeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<BuildReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BaseStatus {
    pub kind: KnowledgeKind,
    pub name: String,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<IndexStats>,
    /// Loadable files currently in the source directory.
    pub document_files: Vec<SourceFile>,
}

/// One raw search result with a shortened content preview.
#[derive(Debug, Serialize)]
pub struct SearchHit {
    pub kind: KnowledgeKind,
    pub record_id: String,
    pub preview: String,
    pub source: String,
    pub filename: String,
    pub file_type: String,
    pub position: usize,
    pub similarity: f64,
}

impl SearchHit {
    fn new(kind: KnowledgeKind, chunk: ScoredChunk) -> Self {
        Self {
            kind,
            preview: preview(&chunk.content),
            record_id: chunk.record_id,
            source: chunk.source,
            filename: chunk.filename,
            file_type: chunk.file_type,
            position: chunk.position,
            similarity: chunk.similarity,
        }
    }
}

/// First `PREVIEW_CHARS` characters, with `...` appended when cut.
fn preview(content: &str) -> String {
    match content.char_indices().nth(PREVIEW_CHARS) {
        Some((end, _)) => format!("{}...", &content[..end]),
        None => content.to_string(),
    }
}

pub struct AppContext {
    pub config: Arc<Config>,
    pub static_kb: Arc<KnowledgeBase>,
    pub dynamic_kb: Arc<KnowledgeBase>,
    pub builder: Arc<KnowledgeBaseBuilder>,
    pub router: Arc<RetrievalRouter>,
    pub policy: Arc<dyn RoutingPolicy>,
    pub chat: Arc<ChatPipeline>,
}

impl AppContext {
    /// Build everything from configuration, including the embedder and the
    /// Ollama client.
    pub fn from_config(config: Config) -> Result<Self> {
        let embedder = embedder::from_config(&config.model).with_context(|| {
            match config.model.backend {
                EmbedderBackend::Onnx => format!(
                    "failed to load embedding model from {} (run `dualrag download-model` first)",
                    config.model.model_dir
                ),
                EmbedderBackend::Hashing => "failed to create hashing embedder".to_string(),
            }
        })?;
        let client = OllamaClient::new(&config.llm).context("failed to create LLM client")?;
        info!("Language model: {} at {}", client.model(), config.llm.url);
        let model: Arc<dyn LanguageModel> = Arc::new(client);
        Ok(Self::with_components(config, embedder, model))
    }

    /// Wire the application around an existing embedder and language model.
    pub fn with_components(
        config: Config,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn LanguageModel>,
    ) -> Self {
        info!(
            "Embedding model: {} ({} dims)",
            embedder.model_name(),
            embedder.dimensions()
        );

        let static_kb = Arc::new(KnowledgeBase::open(
            KnowledgeKind::Static,
            config.static_kb.clone(),
            Arc::clone(&embedder),
            config.batch_size,
        ));
        let dynamic_kb = Arc::new(KnowledgeBase::open(
            KnowledgeKind::Dynamic,
            config.dynamic_kb.clone(),
            Arc::clone(&embedder),
            config.batch_size,
        ));

        let builder = Arc::new(KnowledgeBaseBuilder::new(
            Ingestor::new(config.chunk_size, config.chunk_overlap),
            embedder,
            config.batch_size,
        ));

        let budget = ContextBudget::new(config.max_context_chars).with_policy(config.truncation);
        let router = Arc::new(RetrievalRouter::new(
            static_kb.clone(),
            dynamic_kb.clone(),
            budget,
            config.labels.clone(),
        ));

        let policy: Arc<dyn RoutingPolicy> = Arc::new(KeywordRouting::from_config(&config.routing));
        let chat = Arc::new(ChatPipeline::new(
            Arc::clone(&router),
            Arc::clone(&policy),
            model,
            config.search_top_k,
        ));

        Self {
            config: Arc::new(config),
            static_kb,
            dynamic_kb,
            builder,
            router,
            policy,
            chat,
        }
    }

    pub fn base(&self, kind: KnowledgeKind) -> &Arc<KnowledgeBase> {
        match kind {
            KnowledgeKind::Static => &self.static_kb,
            KnowledgeKind::Dynamic => &self.dynamic_kb,
        }
    }

    /// Rebuild the targeted bases. A failure in one base does not stop the
    /// other.
    pub fn rebuild(&self, target: RebuildTarget) -> Vec<RebuildOutcome> {
        target
            .kinds()
            .iter()
            .map(|&kind| {
                let result: Result<BuildReport, BuildError> = self.base(kind).rebuild(&self.builder);
                match result {
                    Ok(report) => RebuildOutcome {
                        kind,
                        report: Some(report),
                        error: None,
                    },
                    Err(e) => {
                        error!("Rebuild of {kind} knowledge base failed: {e}");
                        RebuildOutcome {
                            kind,
                            report: None,
                            error: Some(e.to_string()),
                        }
                    }
                }
            })
            .collect()
    }

    /// Raw similarity search over the targeted bases, best hits first.
    pub fn search(&self, query: &str, limit: usize, target: RebuildTarget) -> Vec<SearchHit> {
        let mut hits: Vec<SearchHit> = target
            .kinds()
            .iter()
            .flat_map(|&kind| {
                self.base(kind)
                    .search(query, limit)
                    .into_iter()
                    .map(move |chunk| SearchHit::new(kind, chunk))
            })
            .collect();
        hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        hits.truncate(limit);
        hits
    }

    pub fn status(&self) -> Vec<BaseStatus> {
        [KnowledgeKind::Static, KnowledgeKind::Dynamic]
            .into_iter()
            .map(|kind| {
                let base = self.base(kind);
                let spec = base.spec();
                let document_files = ingest::list_source_files(&spec.source_dir, &spec.file_pattern)
                    .unwrap_or_else(|e| {
                        warn!("Cannot list source files for '{}': {e}", spec.name);
                        Vec::new()
                    });
                BaseStatus {
                    kind,
                    name: spec.name.clone(),
                    available: base.is_available(),
                    stats: base.stats(),
                    document_files,
                }
            })
            .collect()
    }
}
