//! Modelos de dominio: documentos, chunks, manifiesto y resultados de consulta.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Fichero de log leído del disco. Inmutable una vez ingerido; una nueva
/// ingesta del mismo fichero lo reemplaza entero.
#[derive(Debug, Clone)]
pub struct Document {
    /// Ruta relativa a la carpeta de ingesta, con separadores `/`.
    pub id: String,
    pub raw_text: String,
    pub source_path: PathBuf,
}

impl Document {
    pub fn filename(&self) -> String {
        self.source_path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.id.clone())
    }
}

/// Registro del manifiesto `docs_meta.json`, alineado posicionalmente con
/// las entradas del índice vectorial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocMeta {
    pub chunk_id: String,
    pub source: String,
    pub filename: String,
    pub chunk_index: usize,
}

/// Trozo de texto de un documento; es la unidad que se embebe y se recupera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub chunk_index: usize,
    pub parent_document_id: String,
    pub metadata: DocMeta,
}

impl Chunk {
    pub fn id(&self) -> &str {
        &self.metadata.chunk_id
    }
}

/// Construye el id estable de un chunk a partir del documento y la posición.
pub fn chunk_id(document_id: &str, chunk_index: usize) -> String {
    format!("{document_id}#{chunk_index}")
}

/// Caracteres de texto que se muestran por fuente en las respuestas de la API.
pub const PREVIEW_CHARS: usize = 500;

/// Chunk recuperado, con su posición (1-based) y la similitud obtenida.
#[derive(Debug, Clone, Serialize)]
pub struct SourceChunk {
    pub rank: usize,
    pub score: f64,
    #[serde(flatten)]
    pub chunk: Chunk,
}

impl SourceChunk {
    /// Etiqueta legible: source → filename → id del documento → `source_{rank}`.
    pub fn label(&self) -> String {
        let meta = &self.chunk.metadata;
        [&meta.source, &meta.filename, &self.chunk.parent_document_id]
            .into_iter()
            .find(|s| !s.is_empty())
            .cloned()
            .unwrap_or_else(|| format!("source_{}", self.rank))
    }

    /// Texto recortado a `max_chars` caracteres, con `...` si se ha cortado.
    pub fn preview(&self, max_chars: usize) -> String {
        truncate_chars(&self.chunk.text, max_chars)
    }

    pub fn to_preview(&self, max_chars: usize) -> SourcePreview {
        SourcePreview {
            rank: self.rank,
            label: self.label(),
            score: self.score,
            preview: self.preview(max_chars),
        }
    }
}

/// Vista resumida de una fuente para mostrarla junto a la respuesta.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourcePreview {
    pub rank: usize,
    pub label: String,
    pub score: f64,
    pub preview: String,
}

/// Resultado de una consulta RAG. No se persiste.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub question: String,
    pub answer_text: String,
    pub source_chunks: Vec<SourceChunk>,
    /// Salida cruda del proveedor, sólo para diagnóstico.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_provider_output: Option<String>,
    /// `true` si el LLM falló y `answer_text` describe el error.
    pub degraded: bool,
}

impl QueryResult {
    pub fn source_previews(&self, max_chars: usize) -> Vec<SourcePreview> {
        self.source_chunks
            .iter()
            .map(|source| source.to_preview(max_chars))
            .collect()
    }
}

/// Respuesta del agente sin recuperación.
#[derive(Debug, Clone, Serialize)]
pub struct AgentAnswer {
    pub question: String,
    pub answer_text: String,
    pub degraded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestFailure {
    pub filename: String,
    pub reason: String,
}

/// Resumen de los resultados de una operación de ingesta.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexBuildReport {
    pub files_processed: usize,
    pub chunks_created: usize,
    pub failures: Vec<IngestFailure>,
    /// Generación confirmada por esta ingesta (`None` si no hubo nada que escribir).
    pub generation: Option<String>,
}

impl IndexBuildReport {
    pub fn is_empty(&self) -> bool {
        self.files_processed == 0 && self.failures.is_empty()
    }
}

impl std::fmt::Display for IndexBuildReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Resumen: {} ficheros procesados, {} chunks creados, {} fallos.",
            self.files_processed,
            self.chunks_created,
            self.failures.len()
        )?;
        if let Some(generation) = &self.generation {
            write!(f, " Generación activa: {generation}.")?;
        }
        Ok(())
    }
}

/// Entrada del listado de diagnóstico de la carpeta de datos.
#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub size_bytes: u64,
}

pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(source: &str, filename: &str, doc: &str, rank: usize) -> SourceChunk {
        SourceChunk {
            rank,
            score: 0.5,
            chunk: Chunk {
                text: "línea de log".to_string(),
                chunk_index: 0,
                parent_document_id: doc.to_string(),
                metadata: DocMeta {
                    chunk_id: chunk_id(doc, 0),
                    source: source.to_string(),
                    filename: filename.to_string(),
                    chunk_index: 0,
                },
            },
        }
    }

    #[test]
    fn label_falls_back_in_order() {
        assert_eq!(source("a/lot1.log", "lot1.log", "a/lot1.log", 1).label(), "a/lot1.log");
        assert_eq!(source("", "lot1.log", "x", 1).label(), "lot1.log");
        assert_eq!(source("", "", "doc-7", 1).label(), "doc-7");
        assert_eq!(source("", "", "", 4).label(), "source_4");
    }

    #[test]
    fn previews_carry_label_and_truncated_text() {
        let mut long = source("", "lot9.log", "fab/lot9.log", 2);
        long.chunk.text = "é".repeat(PREVIEW_CHARS + 20);
        let result = QueryResult {
            question: "q".to_string(),
            answer_text: "a".to_string(),
            source_chunks: vec![source("lot1.log", "lot1.log", "lot1.log", 1), long],
            raw_provider_output: None,
            degraded: false,
        };

        let previews = result.source_previews(PREVIEW_CHARS);
        assert_eq!(previews[0].preview, "línea de log");
        assert_eq!(previews[1].label, "lot9.log");
        assert_eq!(previews[1].rank, 2);
        assert_eq!(previews[1].preview.chars().count(), PREVIEW_CHARS + 3);
        assert!(previews[1].preview.ends_with("..."));
    }

    #[test]
    fn truncation_is_char_aware() {
        assert_eq!(truncate_chars("ñandú", 3), "ñan...");
        assert_eq!(truncate_chars("corto", 10), "corto");
        assert_eq!(truncate_chars("exacto", 6), "exacto");
    }

    #[test]
    fn source_chunk_serializes_flat() {
        let json = serde_json::to_value(source("lot1.log", "lot1.log", "lot1.log", 1)).unwrap();
        assert_eq!(json["rank"], 1);
        assert_eq!(json["text"], "línea de log");
        assert_eq!(json["metadata"]["source"], "lot1.log");
    }
}
