//! Abstracción sobre Rig para trabajar con distintos proveedores de LLM.
//! De momento se implementa OpenAI; Gemini/Ollama quedan preparados para el futuro.
//!
//! El resto del núcleo sólo ve los traits `EmbeddingProvider` y `LanguageModel`,
//! de modo que los tests pueden sustituir el proveedor real por stubs.

use std::{env, future::Future, time::Duration};

use async_trait::async_trait;
use rig::completion::Prompt;
use rig::embeddings::EmbeddingModel; // <- para .embed_texts
use tracing::debug;

use crate::config::{AppConfig, LlmProvider};
use crate::error::{RagError, Result};

/// Proveedor de embeddings: texto → vector de dimensión fija.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Identidad del modelo. Se guarda en cada generación del índice.
    fn model_id(&self) -> &str;

    /// Dimensión de los vectores, si se conoce sin llamar al proveedor.
    fn dimensions(&self) -> Option<usize>;

    /// Un vector por texto, en el mismo orden.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f64>>>;
}

/// Proveedor de texto libre a partir de un prompt.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, preamble: &str, prompt: &str) -> Result<String>;
}

/// Ejecuta una llamada a proveedor con un límite de tiempo. Un timeout se
/// trata como un fallo más del proveedor.
pub async fn with_timeout<T, F>(provider: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(RagError::provider(
            provider,
            format!("sin respuesta tras {} ms", limit.as_millis()),
        )),
    }
}

/// Embebe una sola consulta y comprueba que llega exactamente un vector.
pub async fn embed_query(
    embedder: &dyn EmbeddingProvider,
    text: &str,
    limit: Duration,
) -> Result<Vec<f64>> {
    let mut vectors = with_timeout(
        embedder.model_id(),
        limit,
        embedder.embed_texts(&[text.to_string()]),
    )
    .await?;
    match vectors.len() {
        1 => Ok(vectors.remove(0)),
        n => Err(RagError::provider(
            embedder.model_id(),
            format!("se esperaba 1 embedding para la consulta y llegaron {n}"),
        )),
    }
}

/// Gestor de LLMs y embeddings respaldado por Rig.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub embedding_model: String,
    pub chat_model: String,
    pub temperature: f64,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración y valida credenciales.
    pub fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        if cfg.llm_provider == LlmProvider::OpenAI && env::var("OPENAI_API_KEY").is_err() {
            anyhow::bail!("Falta OPENAI_API_KEY en el entorno");
        }
        Ok(Self {
            provider: cfg.llm_provider.clone(),
            embedding_model: cfg.llm_embedding_model.clone(),
            chat_model: cfg.llm_chat_model.clone(),
            temperature: cfg.llm_temperature,
        })
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    fn unsupported(&self, what: &str) -> RagError {
        RagError::provider(
            format!("{:?}", self.provider),
            format!("proveedor aún no implementado para {what}"),
        )
    }
}

/// Dimensiones publicadas de los modelos de embeddings de OpenAI.
fn known_dimensions(model: &str) -> Option<usize> {
    match model {
        "text-embedding-3-small" | "text-embedding-ada-002" => Some(1536),
        "text-embedding-3-large" => Some(3072),
        _ => None,
    }
}

#[async_trait]
impl EmbeddingProvider for LlmManager {
    fn model_id(&self) -> &str {
        &self.embedding_model
    }

    fn dimensions(&self) -> Option<usize> {
        known_dimensions(&self.embedding_model)
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f64>>> {
        if !matches!(self.provider, LlmProvider::OpenAI) {
            return Err(self.unsupported("embeddings"));
        }
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        use rig::client::EmbeddingsClient as _;
        use rig::providers::openai::{self, TEXT_EMBEDDING_3_SMALL};

        let client = openai::Client::from_env();
        let model_name = if self.embedding_model.is_empty() {
            TEXT_EMBEDDING_3_SMALL
        } else {
            self.embedding_model.as_str()
        };
        let embedding_model = client.embedding_model(model_name);
        let embeddings = embedding_model
            .embed_texts(texts.to_vec())
            .await
            .map_err(|e| RagError::provider("openai", e))?;

        if embeddings.len() != texts.len() {
            return Err(RagError::provider(
                "openai",
                format!(
                    "Número de embeddings ({}) distinto al número de textos ({})",
                    embeddings.len(),
                    texts.len()
                ),
            ));
        }
        debug!(count = embeddings.len(), model = %self.embedding_model, "embeddings generados");

        Ok(embeddings.into_iter().map(|e| e.vec).collect())
    }
}

#[async_trait]
impl LanguageModel for LlmManager {
    fn name(&self) -> &str {
        &self.chat_model
    }

    async fn complete(&self, preamble: &str, prompt: &str) -> Result<String> {
        use rig::client::CompletionClient as _;
        use rig::providers::openai;

        if !matches!(self.provider, LlmProvider::OpenAI) {
            return Err(self.unsupported("chat"));
        }

        let client = openai::Client::from_env();

        // Modelo de chat por defecto si no se ha configurado otro
        let model_name = if self.chat_model.is_empty() {
            "gpt-4o-mini"
        } else {
            self.chat_model.as_str()
        };

        let agent = client
            .agent(model_name)
            .preamble(preamble)
            .temperature(self.temperature)
            .build();

        agent
            .prompt(prompt)
            .await
            .map_err(|e| RagError::provider("openai", e))
    }
}
