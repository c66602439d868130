//! Síntesis de la respuesta: un único prompt con la pregunta y el texto de los
//! chunks recuperados, y una única llamada al LLM.
//!
//! Un fallo del proveedor no sale de aquí como error: se devuelve
//! `Synthesis::Degraded` con un texto que empieza por [`ERROR_MARKER`].
//!
//! `AgentResponder` es la segunda opinión: el mismo tipo de llamada pero sin
//! contexto recuperado y con su propio preámbulo.

use std::{sync::Arc, time::Duration};

use tracing::warn;

use crate::{
    llm::{with_timeout, LanguageModel},
    models::{truncate_chars, Chunk},
};

/// Prefijo identificable de las respuestas degradadas.
pub const ERROR_MARKER: &str = "[ERROR]";

const SYSTEM_PROMPT: &str = r#"
Eres un asistente de Virtual Metrology.
Analizas logs de procesos de fabricación de semiconductores y generas diagnósticos para ingenieros de proceso.
Responde en el mismo idioma que la pregunta, de forma clara y concisa.
Usa sólo la información del contexto y cita las fuentes por su número ([1], [2], ...).
Si el contexto no contiene la respuesta, di explícitamente que no la sabes.
"#;

const AGENT_PROMPT: &str = r#"
Eres un asistente de IA de Virtual Metrology.
Analizas logs de procesos de semiconductores y generas conclusiones útiles para ingenieros de proceso.
"#;

/// Resultado de una síntesis: respuesta del modelo o texto de error.
#[derive(Debug, Clone, PartialEq)]
pub enum Synthesis {
    Answer { text: String, raw: String },
    Degraded { text: String, error: String },
}

impl Synthesis {
    pub fn answer_text(&self) -> &str {
        match self {
            Self::Answer { text, .. } | Self::Degraded { text, .. } => text,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }

    /// `(answer_text, raw_provider_output, degraded)`
    pub fn into_parts(self) -> (String, Option<String>, bool) {
        match self {
            Self::Answer { text, raw } => (text, Some(raw), false),
            Self::Degraded { text, error } => (text, Some(error), true),
        }
    }
}

pub struct AnswerSynthesizer {
    llm: Arc<dyn LanguageModel>,
    max_chunk_chars: usize,
    timeout: Duration,
}

impl AnswerSynthesizer {
    pub fn new(llm: Arc<dyn LanguageModel>, max_chunk_chars: usize, timeout: Duration) -> Self {
        Self {
            llm,
            max_chunk_chars,
            timeout,
        }
    }

    /// Concatena (sin resumir) el texto de los chunks, cada uno recortado a
    /// `max_chunk_chars`, y añade la pregunta.
    pub fn build_prompt(&self, question: &str, context_chunks: &[Chunk]) -> String {
        let context = if context_chunks.is_empty() {
            "(no se ha recuperado ningún documento)".to_string()
        } else {
            context_chunks
                .iter()
                .enumerate()
                .map(|(i, chunk)| {
                    format!(
                        "[{}] Fuente: {}\n{}",
                        i + 1,
                        chunk.metadata.source,
                        truncate_chars(&chunk.text, self.max_chunk_chars)
                    )
                })
                .collect::<Vec<_>>()
                .join("\n\n---\n\n")
        };

        format!("Contexto:\n{context}\n\nPregunta del usuario:\n{question}")
    }

    pub async fn synthesize(&self, question: &str, context_chunks: &[Chunk]) -> Synthesis {
        let prompt = self.build_prompt(question, context_chunks);
        let call = self.llm.complete(SYSTEM_PROMPT, &prompt);

        match with_timeout(self.llm.name(), self.timeout, call).await {
            Ok(raw) => Synthesis::Answer {
                text: raw.trim().to_string(),
                raw,
            },
            Err(e) => {
                warn!(model = self.llm.name(), error = %e, "Fallo del LLM; se devuelve respuesta degradada.");
                Synthesis::Degraded {
                    text: format!("{ERROR_MARKER} No se pudo generar la respuesta: {e}"),
                    error: e.to_string(),
                }
            }
        }
    }
}

/// Respuesta directa del LLM, sin recuperación.
pub struct AgentResponder {
    llm: Arc<dyn LanguageModel>,
    timeout: Duration,
}

impl AgentResponder {
    pub fn new(llm: Arc<dyn LanguageModel>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    pub fn build_prompt(question: &str) -> String {
        format!("Pregunta del usuario: {question}")
    }

    pub async fn respond(&self, question: &str) -> Synthesis {
        let prompt = Self::build_prompt(question);
        let call = self.llm.complete(AGENT_PROMPT, &prompt);

        match with_timeout(self.llm.name(), self.timeout, call).await {
            Ok(raw) => Synthesis::Answer {
                text: raw.trim().to_string(),
                raw,
            },
            Err(e) => {
                warn!(model = self.llm.name(), error = %e, "Fallo del agente.");
                Synthesis::Degraded {
                    text: format!("{ERROR_MARKER} Error al generar la respuesta: {e}"),
                    error: e.to_string(),
                }
            }
        }
    }
}
