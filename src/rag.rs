//! Consulta RAG sobre el índice vectorial de logs.
//!
//! Flujo:
//!   1. Embedding de la pregunta con el mismo modelo que construyó el índice.
//!   2. Búsqueda de los `k` chunks más similares en la generación vigente.
//!   3. El LLM responde usando el texto de esos chunks como contexto.
//!   4. Se devuelven la respuesta y exactamente los chunks que vio el LLM.
//!
//! `agent_answer` es independiente: pregunta directa al LLM, sin recuperación.
//!
//! `RagContext` se construye una vez al arrancar y se comparte por referencia;
//! no hay singletons ni inicialización perezosa.

use std::{
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    app_state::Status,
    config::{AppConfig, ChunkingConfig},
    error::{RagError, Result},
    ingest::{self, IngestMode, IngestOptions},
    llm::{embed_query, EmbeddingProvider, LanguageModel, LlmManager},
    models::{AgentAnswer, Chunk, IndexBuildReport, QueryResult, SourceChunk},
    synthesis::{AgentResponder, AnswerSynthesizer, Synthesis},
    vector_store::{IndexHandle, IndexStore},
};

pub struct RagContext {
    store: Arc<IndexStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    synthesizer: AnswerSynthesizer,
    agent: AgentResponder,
    chunking: ChunkingConfig,
    default_top_k: usize,
    provider_timeout: Duration,
}

impl RagContext {
    pub fn new(
        cfg: &AppConfig,
        store: Arc<IndexStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LanguageModel>,
    ) -> Self {
        Self {
            store,
            embedder,
            synthesizer: AnswerSynthesizer::new(
                llm.clone(),
                cfg.context_chunk_chars,
                cfg.provider_timeout,
            ),
            agent: AgentResponder::new(llm, cfg.provider_timeout),
            chunking: cfg.chunking,
            default_top_k: cfg.top_k,
            provider_timeout: cfg.provider_timeout,
        }
    }

    /// Usa otro modelo para `agent_answer` (p. ej. con otra temperatura).
    pub fn with_agent_model(mut self, llm: Arc<dyn LanguageModel>) -> Self {
        self.agent = AgentResponder::new(llm, self.provider_timeout);
        self
    }

    /// Construye el contexto de producción: Rig para embeddings y chat, e
    /// índice abierto desde `cfg.index_dir`. Un índice ilegible no impide
    /// arrancar, pero las consultas devuelven `IndexCorrupt` hasta reconstruirlo.
    pub fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let llm_manager = LlmManager::from_config(cfg)?;
        let agent_llm = Arc::new(llm_manager.clone().with_temperature(cfg.agent_temperature));
        let llm_manager = Arc::new(llm_manager);
        let store = IndexStore::open_or_unavailable(&cfg.index_dir, cfg.keep_generations);
        let ctx = Self::new(cfg, Arc::new(store), llm_manager.clone(), llm_manager)
            .with_agent_model(agent_llm);
        if let Err(e) = ctx.validate() {
            warn!("{e}. Las consultas fallarán hasta reconstruir el índice.");
        }
        Ok(ctx)
    }

    pub fn store(&self) -> &Arc<IndexStore> {
        &self.store
    }

    pub fn default_top_k(&self) -> usize {
        self.default_top_k
    }

    /// Comprueba que el modelo de embeddings configurado es el del índice vigente.
    pub fn validate(&self) -> Result<()> {
        self.store.ensure_available()?;
        let index = self.store.current();
        if index.is_empty() {
            return Ok(());
        }
        self.validate_against(&index)
    }

    /// Ingesta una carpeta y confirma una generación nueva del índice.
    pub async fn ingest(
        &self,
        folder: &Path,
        mode: IngestMode,
        status: Arc<Mutex<Status>>,
    ) -> Result<IndexBuildReport> {
        let opts = IngestOptions {
            chunking: self.chunking,
            provider_timeout: self.provider_timeout,
            mode,
        };
        ingest::ingest_directory(&self.store, self.embedder.as_ref(), &opts, folder, status).await
    }

    /// Responde a `question` con los `k` chunks más relevantes como contexto.
    pub async fn retrieve_and_answer(&self, question: &str, k: usize) -> Result<QueryResult> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::InvalidArgument("la pregunta está vacía".to_string()));
        }
        if k == 0 {
            return Err(RagError::InvalidArgument("k debe ser al menos 1".to_string()));
        }

        self.store.ensure_available()?;
        let query_id = Uuid::new_v4();
        // Instantánea: una ingesta concurrente no afecta a esta consulta.
        let index = self.store.current();
        if !index.is_empty() {
            self.validate_against(&index)?;
        }

        // 1) Embedding de la pregunta
        let query_vector = embed_query(self.embedder.as_ref(), question, self.provider_timeout).await?;

        // 2) Búsqueda vectorial
        let hits = index.search(&query_vector, k)?;
        if hits.is_empty() {
            warn!(%query_id, "Índice vacío: se responde sin contexto.");
        }

        let context: Vec<Chunk> = hits.iter().map(|(chunk, _)| chunk.clone()).collect();

        // 3) Síntesis con exactamente esos chunks
        let synthesis: Synthesis = self.synthesizer.synthesize(question, &context).await;

        // 4) Atribución en el mismo orden que se pasó al LLM
        let source_chunks = hits
            .into_iter()
            .enumerate()
            .map(|(i, (chunk, score))| SourceChunk {
                rank: i + 1,
                score,
                chunk,
            })
            .collect::<Vec<_>>();

        let (answer_text, raw_provider_output, degraded) = synthesis.into_parts();
        info!(
            %query_id,
            k,
            sources = source_chunks.len(),
            degraded,
            generation = index.generation().unwrap_or_default(),
            "Consulta RAG completada."
        );

        Ok(QueryResult {
            question: question.to_string(),
            answer_text,
            source_chunks,
            raw_provider_output,
            degraded,
        })
    }

    /// Respuesta directa del LLM, sin contexto recuperado. Un fallo del
    /// proveedor se devuelve como texto de error, no como `Err`.
    pub async fn agent_answer(&self, question: &str) -> Result<AgentAnswer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::InvalidArgument("la pregunta está vacía".to_string()));
        }
        let (answer_text, _, degraded) = self.agent.respond(question).await.into_parts();
        info!(degraded, "Respuesta del agente generada.");
        Ok(AgentAnswer {
            question: question.to_string(),
            answer_text,
            degraded,
        })
    }

    fn validate_against(&self, index: &IndexHandle) -> Result<()> {
        if index.embedding_model() != self.embedder.model_id() {
            return Err(RagError::ConfigMismatch {
                expected: index.embedding_model().to_string(),
                found: self.embedder.model_id().to_string(),
            });
        }
        if let Some(dim) = self.embedder.dimensions() {
            index.check_query_dimension(dim)?;
        }
        Ok(())
    }
}
