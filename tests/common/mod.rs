//! Proveedores deterministas y utilidades compartidas por los tests de integración.

#![allow(dead_code)]

use std::{
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use vm_rag_agent::{
    app_state::Status,
    config::AppConfig,
    llm::{EmbeddingProvider, LanguageModel},
    vector_store::IndexStore,
    RagContext, RagError, Result,
};

/// Bolsa de palabras con hash: textos con términos comunes quedan cerca.
pub struct HashEmbedder {
    model: String,
    dim: usize,
    fail_marker: Option<String>,
    pub calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn new(model: &str, dim: usize) -> Self {
        Self {
            model: model.to_string(),
            dim,
            fail_marker: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Falla en cualquier lote que contenga `marker`.
    pub fn failing_on(mut self, marker: &str) -> Self {
        self.fail_marker = Some(marker.to_string());
        self
    }

    fn embed_one(&self, text: &str) -> Vec<f64> {
        let mut vector = vec![0.0; self.dim];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            vector[(fnv1a(token) % self.dim as u64) as usize] += 1.0;
        }
        vector
    }
}

fn fnv1a(token: &str) -> u64 {
    token.bytes().fold(0xcbf29ce484222325, |hash, b| {
        (hash ^ b as u64).wrapping_mul(0x100000001b3)
    })
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> Option<usize> {
        Some(self.dim)
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f64>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(marker) = &self.fail_marker {
            if texts.iter().any(|t| t.contains(marker.as_str())) {
                return Err(RagError::provider(&self.model, "servicio no disponible"));
            }
        }
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// LLM que responde siempre lo mismo y guarda los prompts recibidos.
pub struct RecordingLlm {
    answer: String,
    pub prompts: Mutex<Vec<String>>,
}

impl RecordingLlm {
    pub fn new(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for RecordingLlm {
    fn name(&self) -> &str {
        "recording"
    }

    async fn complete(&self, _preamble: &str, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self.answer.clone())
    }
}

/// LLM que falla en todas las llamadas.
pub struct FailingLlm;

#[async_trait]
impl LanguageModel for FailingLlm {
    fn name(&self) -> &str {
        "failing"
    }

    async fn complete(&self, _preamble: &str, _prompt: &str) -> Result<String> {
        Err(RagError::provider("failing", "HTTP 500 del proveedor"))
    }
}

/// LLM que nunca contesta a tiempo.
pub struct SlowLlm;

#[async_trait]
impl LanguageModel for SlowLlm {
    fn name(&self) -> &str {
        "slow"
    }

    async fn complete(&self, _preamble: &str, _prompt: &str) -> Result<String> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok("demasiado tarde".to_string())
    }
}

pub fn test_config(index_dir: &Path) -> AppConfig {
    AppConfig {
        index_dir: index_dir.to_path_buf(),
        provider_timeout: Duration::from_secs(2),
        ..AppConfig::default()
    }
}

pub fn context(
    cfg: &AppConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LanguageModel>,
) -> RagContext {
    let store = IndexStore::open(&cfg.index_dir, cfg.keep_generations).expect("abrir índice");
    RagContext::new(cfg, Arc::new(store), embedder, llm)
}

pub fn status() -> Arc<Mutex<Status>> {
    Arc::new(Mutex::new(Status::ready()))
}

pub fn write_file(dir: &Path, name: &str, content: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}
