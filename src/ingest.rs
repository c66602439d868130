//! Ingesta de una carpeta de logs en el índice vectorial.
//!
//! Cada ejecución parte de la generación vigente (o de un índice vacío si se
//! pide reconstruir), trocea y embebe fichero a fichero y, al final, confirma
//! una generación nueva. Las ingestas sobre un mismo almacén se ejecutan de
//! una en una. Un fichero que falla se anota en el informe y no
//! altera lo que ya había en el índice para él.

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use mime_guess::{mime, MimeGuess};
use serde::Deserialize;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::{
    app_state::Status,
    chunking::chunk_document,
    config::ChunkingConfig,
    error::{RagError, Result},
    llm::{with_timeout, EmbeddingProvider},
    models::{Chunk, Document, IndexBuildReport, IngestFailure},
    vector_store::{IndexHandle, IndexStore},
};

/// Extensiones aceptadas además de cualquier tipo MIME `text/*`.
const TEXT_EXTENSIONS: &[&str] = &["txt", "log", "md", "csv"];

/// Máximo de textos por llamada al proveedor de embeddings.
const EMBED_BATCH_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestMode {
    /// Añade/actualiza los documentos de la carpeta sobre la generación vigente.
    #[default]
    Incremental,
    /// Genera el índice desde cero sólo con el contenido de la carpeta.
    Rebuild,
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub chunking: ChunkingConfig,
    pub provider_timeout: Duration,
    pub mode: IngestMode,
}

/// Recorre recursivamente un directorio, trocea y embebe los ficheros de
/// texto y confirma el resultado como una generación nueva del índice.
pub async fn ingest_directory(
    store: &IndexStore,
    embedder: &dyn EmbeddingProvider,
    opts: &IngestOptions,
    root: &Path,
    status_arc: Arc<Mutex<Status>>,
) -> Result<IndexBuildReport> {
    if !root.is_dir() {
        return Err(RagError::NotFound(root.to_path_buf()));
    }

    // Se mantiene hasta el commit: otra ingesta no puede confirmar sobre la
    // misma base.
    let _ingest_guard = store.lock_ingest().await;

    let base = match opts.mode {
        IngestMode::Incremental => {
            store.ensure_available()?;
            store.current()
        }
        IngestMode::Rebuild => Arc::new(IndexHandle::empty()),
    };
    if !base.is_empty() && base.embedding_model() != embedder.model_id() {
        return Err(RagError::ConfigMismatch {
            expected: base.embedding_model().to_string(),
            found: embedder.model_id().to_string(),
        });
    }

    let files = eligible_files(root);
    let mut report = IndexBuildReport::default();
    if files.is_empty() {
        info!("No hay ficheros de texto en {}; nada que ingerir.", root.display());
        return Ok(report);
    }

    let total_files = files.len();
    let mut pending: Vec<(Chunk, Vec<f64>)> = Vec::new();
    let mut emptied: HashSet<String> = HashSet::new();

    for (index, path) in files.iter().enumerate() {
        let filename = path.file_name().unwrap_or_default().to_string_lossy().to_string();
        set_status(
            &status_arc,
            format!("[{}/{}] Procesando: {}...", index + 1, total_files, filename),
            (index + 1) as f32 / total_files as f32,
        );

        match ingest_file(embedder, opts, root, path).await {
            Ok((doc_id, embedded)) => {
                report.files_processed += 1;
                report.chunks_created += embedded.len();
                if embedded.is_empty() {
                    warn!("Fichero vacío o sin texto útil: {}", path.display());
                    emptied.insert(doc_id);
                } else {
                    info!("Ingerido {} con {} chunks.", path.display(), embedded.len());
                    pending.extend(embedded);
                }
            }
            Err(err) => {
                error!("Error ingiriendo {}: {err}", path.display());
                report.failures.push(IngestFailure {
                    filename: relative_id(root, path),
                    reason: err.to_string(),
                });
            }
        }
    }

    if !pending.is_empty() || !emptied.is_empty() {
        let next = base.without_documents(&emptied).upsert(embedder.model_id(), pending)?;
        let committed = store.commit(next)?;
        report.generation = committed.generation().map(str::to_string);
    } else {
        warn!("Ningún fichero se ingirió correctamente; el índice no cambia.");
    }

    info!("{report}");
    Ok(report)
}

/// Lee, trocea y embebe un fichero. Devuelve el id del documento y sus chunks
/// con vector (vacío si el fichero no tiene texto).
async fn ingest_file(
    embedder: &dyn EmbeddingProvider,
    opts: &IngestOptions,
    root: &Path,
    path: &Path,
) -> Result<(String, Vec<(Chunk, Vec<f64>)>)> {
    let raw_text = fs::read_to_string(path)?;
    let doc = Document {
        id: relative_id(root, path),
        raw_text,
        source_path: path.to_path_buf(),
    };

    let chunks = chunk_document(&doc, &opts.chunking);
    if chunks.is_empty() {
        return Ok((doc.id, Vec::new()));
    }

    let mut vectors = Vec::with_capacity(chunks.len());
    for batch in chunks.chunks(EMBED_BATCH_SIZE) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let embedded = with_timeout(
            embedder.model_id(),
            opts.provider_timeout,
            embedder.embed_texts(&texts),
        )
        .await?;
        if embedded.len() != texts.len() {
            return Err(RagError::provider(
                embedder.model_id(),
                format!(
                    "Número de embeddings ({}) distinto al número de chunks ({})",
                    embedded.len(),
                    texts.len()
                ),
            ));
        }
        if embedded.iter().any(|v| v.iter().any(|x| !x.is_finite())) {
            return Err(RagError::provider(
                embedder.model_id(),
                "el proveedor devolvió valores no finitos",
            ));
        }
        vectors.extend(embedded);
    }

    Ok((doc.id, chunks.into_iter().zip(vectors).collect()))
}

/// Ficheros de texto bajo `root`, en orden determinista. Se saltan los ocultos.
pub fn eligible_files(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| is_text_like(p))
        .collect()
}

fn is_text_like(path: &Path) -> bool {
    let extension = path
        .extension()
        .and_then(std::ffi::OsStr::to_str)
        .unwrap_or("")
        .to_lowercase();
    if TEXT_EXTENSIONS.contains(&extension.as_str()) {
        return true;
    }
    MimeGuess::from_path(path)
        .first()
        .map(|m| m.type_() == mime::TEXT)
        .unwrap_or(false)
}

/// Id del documento: ruta relativa a la carpeta de ingesta con separadores `/`.
fn relative_id(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

pub(crate) fn set_status(status_arc: &Arc<Mutex<Status>>, message: String, progress: f32) {
    let mut status = status_arc.lock().unwrap_or_else(PoisonError::into_inner);
    status.message = message;
    status.progress = progress;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_ids_use_forward_slashes() {
        let root = Path::new("/data/logs");
        assert_eq!(relative_id(root, &root.join("lot1.log")), "lot1.log");
        assert_eq!(relative_id(root, &root.join("fab2").join("lot9.txt")), "fab2/lot9.txt");
    }

    #[test]
    fn text_like_detection() {
        assert!(is_text_like(Path::new("a/lot1.log")));
        assert!(is_text_like(Path::new("a/NOTES.MD")));
        assert!(is_text_like(Path::new("a/readme.txt")));
        assert!(is_text_like(Path::new("a/page.html")));
        assert!(!is_text_like(Path::new("a/wafer.png")));
        assert!(!is_text_like(Path::new("a/recipe.bin")));
    }

    #[test]
    fn eligible_files_are_sorted_and_skip_hidden_and_binary() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.log"), "b").unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::write(dir.path().join("img.png"), [0u8, 1, 2]).unwrap();
        fs::write(dir.path().join(".hidden.log"), "h").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("c.md"), "c").unwrap();

        let names: Vec<String> = eligible_files(dir.path())
            .iter()
            .map(|p| relative_id(dir.path(), p))
            .collect();
        assert_eq!(names, vec!["a.txt", "b.log", "sub/c.md"]);
    }
}
