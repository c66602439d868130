//! Almacén de chunks e índice vectorial persistido en disco por generaciones.
//!
//! Estructura en disco:
//!
//! ```text
//! <index_dir>/
//!   CURRENT                     nombre de la generación confirmada
//!   generations/<gen_id>/
//!       index.json              modelo, dimensión y entradas (texto + vector)
//!       docs_meta.json          manifiesto alineado posición a posición
//! ```
//!
//! Una generación nunca se modifica después de escrita. Confirmar una ingesta
//! consiste en escribir una generación nueva y renombrar `CURRENT.tmp` sobre
//! `CURRENT`; los lectores nunca ven un índice a medio escribir.
//!
//! API pública:
//!   - `IndexHandle::load(path)`, `IndexHandle::search(..)`, `IndexHandle::upsert(..)`
//!   - `IndexStore::open(..)`, `IndexStore::current()`, `IndexStore::commit(..)`
//!   - `IndexStore::lock_ingest()` para serializar ingestas completas
//!   - `load_docs_meta(path)`

use std::{
    collections::HashSet,
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::MIN_KEEP_GENERATIONS;
use crate::error::{RagError, Result};
use crate::models::{Chunk, DocMeta};

const CURRENT_FILE: &str = "CURRENT";
const CURRENT_TMP_FILE: &str = "CURRENT.tmp";
const GENERATIONS_DIR: &str = "generations";
const INDEX_FILE: &str = "index.json";
const DOCS_META_FILE: &str = "docs_meta.json";
const PARTIAL_SUFFIX: &str = ".partial";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    chunk_id: String,
    parent_document_id: String,
    chunk_index: usize,
    text: String,
    vector: Vec<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    embedding_model: String,
    dimension: usize,
    created_at: DateTime<Utc>,
    entries: Vec<IndexEntry>,
}

/// Una generación inmutable del índice: chunks, vectores y el modelo que los generó.
///
/// Se comparte entre consultas concurrentes a través de `Arc` y nunca se muta;
/// `upsert` devuelve siempre un handle nuevo.
#[derive(Debug, Clone)]
pub struct IndexHandle {
    generation: Option<String>,
    embedding_model: String,
    dimension: usize,
    created_at: DateTime<Utc>,
    chunks: Vec<Chunk>,
    vectors: Vec<Vec<f64>>,
    norms: Vec<f64>,
}

impl IndexHandle {
    /// Índice vacío, todavía sin modelo ni dimensión fijados.
    pub fn empty() -> Self {
        Self {
            generation: None,
            embedding_model: String::new(),
            dimension: 0,
            created_at: Utc::now(),
            chunks: Vec::new(),
            vectors: Vec::new(),
            norms: Vec::new(),
        }
    }

    /// Carga la generación apuntada por `<path>/CURRENT`.
    pub fn load(path: &Path) -> Result<Self> {
        let pointer = path.join(CURRENT_FILE);
        if !pointer.is_file() {
            return Err(RagError::IndexNotFound(path.to_path_buf()));
        }
        let generation = fs::read_to_string(&pointer)?.trim().to_string();
        if generation.is_empty() {
            return Err(RagError::corrupt(path, "el fichero CURRENT está vacío"));
        }
        let dir = path.join(GENERATIONS_DIR).join(&generation);
        if !dir.is_dir() {
            return Err(RagError::corrupt(
                path,
                format!("CURRENT apunta a una generación inexistente: {generation}"),
            ));
        }
        let mut handle = Self::load_generation(&dir)?;
        handle.generation = Some(generation);
        Ok(handle)
    }

    fn load_generation(dir: &Path) -> Result<Self> {
        let index: IndexFile = read_json(dir, &dir.join(INDEX_FILE))?;
        let manifest: Vec<DocMeta> = read_json(dir, &dir.join(DOCS_META_FILE))?;

        if manifest.len() != index.entries.len() {
            return Err(RagError::corrupt(
                dir,
                format!(
                    "el manifiesto tiene {} registros y el índice {} vectores",
                    manifest.len(),
                    index.entries.len()
                ),
            ));
        }

        let mut chunks = Vec::with_capacity(manifest.len());
        let mut vectors = Vec::with_capacity(manifest.len());
        for (position, (entry, meta)) in index.entries.into_iter().zip(manifest).enumerate() {
            if entry.chunk_id != meta.chunk_id {
                return Err(RagError::corrupt(
                    dir,
                    format!(
                        "posición {position}: el manifiesto dice '{}' y el índice '{}'",
                        meta.chunk_id, entry.chunk_id
                    ),
                ));
            }
            if entry.vector.len() != index.dimension {
                return Err(RagError::corrupt(
                    dir,
                    format!(
                        "posición {position}: vector de dimensión {} en un índice de dimensión {}",
                        entry.vector.len(),
                        index.dimension
                    ),
                ));
            }
            chunks.push(Chunk {
                text: entry.text,
                chunk_index: entry.chunk_index,
                parent_document_id: entry.parent_document_id,
                metadata: meta,
            });
            vectors.push(entry.vector);
        }

        Ok(Self::from_parts(
            None,
            index.embedding_model,
            index.dimension,
            index.created_at,
            chunks,
            vectors,
        ))
    }

    fn from_parts(
        generation: Option<String>,
        embedding_model: String,
        dimension: usize,
        created_at: DateTime<Utc>,
        chunks: Vec<Chunk>,
        vectors: Vec<Vec<f64>>,
    ) -> Self {
        let norms = vectors.iter().map(|v| l2_norm(v)).collect();
        Self {
            generation,
            embedding_model,
            dimension,
            created_at,
            chunks,
            vectors,
            norms,
        }
    }

    pub fn generation(&self) -> Option<&str> {
        self.generation.as_deref()
    }

    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn vectors(&self) -> &[Vec<f64>] {
        &self.vectors
    }

    /// Manifiesto en el mismo orden que las entradas del índice.
    pub fn docs_meta(&self) -> Vec<DocMeta> {
        self.chunks.iter().map(|c| c.metadata.clone()).collect()
    }

    /// Comprueba que un vector de consulta es compatible con este índice.
    pub fn check_query_dimension(&self, query_dim: usize) -> Result<()> {
        if self.dimension != 0 && query_dim != self.dimension {
            return Err(RagError::ConfigMismatch {
                expected: format!("{} (dim {})", self.embedding_model, self.dimension),
                found: format!("vector de dim {query_dim}"),
            });
        }
        Ok(())
    }

    /// Los `k` chunks más similares (coseno), de mayor a menor puntuación.
    /// Los empates conservan el orden de ingesta.
    pub fn search(&self, query_vector: &[f64], k: usize) -> Result<Vec<(Chunk, f64)>> {
        if k == 0 {
            return Err(RagError::InvalidArgument("k debe ser al menos 1".to_string()));
        }
        if !all_finite(query_vector) {
            return Err(RagError::InvalidArgument(
                "el vector de consulta contiene valores no finitos".to_string(),
            ));
        }
        self.check_query_dimension(query_vector.len())?;

        let query_norm = l2_norm(query_vector);
        let mut scored: Vec<(usize, f64)> = self
            .vectors
            .iter()
            .zip(&self.norms)
            .enumerate()
            .map(|(idx, (vector, norm))| (idx, cosine(query_vector, query_norm, vector, *norm)))
            .collect();

        // `sort_by` es estable: los empates quedan en orden de ingesta.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(idx, score)| (self.chunks[idx].clone(), score))
            .collect())
    }

    /// Devuelve un índice nuevo sin los chunks de los documentos indicados.
    pub fn without_documents(&self, document_ids: &HashSet<String>) -> Self {
        let (chunks, vectors): (Vec<_>, Vec<_>) = self
            .chunks
            .iter()
            .zip(&self.vectors)
            .filter(|(chunk, _)| !document_ids.contains(&chunk.parent_document_id))
            .map(|(c, v)| (c.clone(), v.clone()))
            .unzip();
        Self::from_parts(
            None,
            self.embedding_model.clone(),
            self.dimension,
            Utc::now(),
            chunks,
            vectors,
        )
    }

    /// Devuelve un índice nuevo con los chunks dados. Los documentos que
    /// aparecen en el lote sustituyen por completo a sus versiones anteriores;
    /// el resto de entradas conserva su posición.
    pub fn upsert(
        &self,
        embedding_model: &str,
        chunks_with_vectors: Vec<(Chunk, Vec<f64>)>,
    ) -> Result<Self> {
        let dimension = self.resolve_dimension(embedding_model, &chunks_with_vectors)?;

        let superseded: HashSet<String> = chunks_with_vectors
            .iter()
            .map(|(chunk, _)| chunk.parent_document_id.clone())
            .collect();
        let base = self.without_documents(&superseded);

        let mut chunks = base.chunks;
        let mut vectors = base.vectors;
        for (chunk, vector) in chunks_with_vectors {
            chunks.push(chunk);
            vectors.push(vector);
        }

        let model = if self.is_empty() {
            embedding_model.to_string()
        } else {
            self.embedding_model.clone()
        };
        Ok(Self::from_parts(None, model, dimension, Utc::now(), chunks, vectors))
    }

    fn resolve_dimension(
        &self,
        embedding_model: &str,
        batch: &[(Chunk, Vec<f64>)],
    ) -> Result<usize> {
        if !self.is_empty() && self.embedding_model != embedding_model {
            return Err(RagError::ConfigMismatch {
                expected: self.embedding_model.clone(),
                found: embedding_model.to_string(),
            });
        }

        if batch.is_empty() {
            return Ok(self.dimension);
        }

        let mut dimension = if self.is_empty() { 0 } else { self.dimension };
        for (chunk, vector) in batch {
            if dimension == 0 {
                dimension = vector.len();
            }
            if vector.len() != dimension {
                return Err(RagError::ConfigMismatch {
                    expected: format!("{embedding_model} (dim {dimension})"),
                    found: format!("vector de dim {} en {}", vector.len(), chunk.id()),
                });
            }
            if !all_finite(vector) {
                return Err(RagError::InvalidArgument(format!(
                    "vector con valores no finitos en {}",
                    chunk.id()
                )));
            }
        }
        if dimension == 0 {
            return Err(RagError::InvalidArgument(
                "el proveedor devolvió vectores vacíos".to_string(),
            ));
        }
        Ok(dimension)
    }

    fn write_generation(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        let index = IndexFile {
            embedding_model: self.embedding_model.clone(),
            dimension: self.dimension,
            created_at: self.created_at,
            entries: self
                .chunks
                .iter()
                .zip(&self.vectors)
                .map(|(chunk, vector)| IndexEntry {
                    chunk_id: chunk.id().to_string(),
                    parent_document_id: chunk.parent_document_id.clone(),
                    chunk_index: chunk.chunk_index,
                    text: chunk.text.clone(),
                    vector: vector.clone(),
                })
                .collect(),
        };
        write_file_synced(&dir.join(INDEX_FILE), &serde_json::to_vec(&index)?)?;
        write_file_synced(
            &dir.join(DOCS_META_FILE),
            &serde_json::to_vec_pretty(&self.docs_meta())?,
        )?;
        Ok(())
    }
}

/// Dueño del índice vigente. Las consultas toman una instantánea con
/// `current()`; sólo `commit` puede sustituirla.
#[derive(Debug)]
pub struct IndexStore {
    root: PathBuf,
    keep_generations: usize,
    current: RwLock<Arc<IndexHandle>>,
    /// Motivo por el que el índice en disco no se pudo cargar. Lo limpia el
    /// siguiente commit.
    load_error: RwLock<Option<String>>,
    /// Último sello (ms) usado en un id de generación.
    commit_lock: Mutex<i64>,
    ingest_lock: AsyncMutex<()>,
}

impl IndexStore {
    /// Abre el almacén en `root`. Si aún no hay índice persistido empieza vacío;
    /// un índice corrupto sí es un error.
    pub fn open(root: impl Into<PathBuf>, keep_generations: usize) -> Result<Self> {
        let root = root.into();
        let handle = match IndexHandle::load(&root) {
            Ok(handle) => {
                info!(
                    generation = handle.generation().unwrap_or_default(),
                    chunks = handle.len(),
                    model = handle.embedding_model(),
                    "Índice vectorial cargado."
                );
                handle
            }
            Err(RagError::IndexNotFound(_)) => {
                info!("No hay índice en {}; se empieza con uno vacío.", root.display());
                IndexHandle::empty()
            }
            Err(e) => return Err(e),
        };
        Ok(Self::with_handle(root, keep_generations, handle))
    }

    /// Como `open`, pero un índice ilegible no impide arrancar: el almacén
    /// queda vacío y no disponible (`ensure_available`) hasta el próximo commit.
    pub fn open_or_unavailable(root: impl Into<PathBuf>, keep_generations: usize) -> Self {
        let root = root.into();
        match Self::open(root.clone(), keep_generations) {
            Ok(store) => store,
            Err(e) => {
                warn!("No se pudo cargar el índice: {e}. Hay que reconstruirlo.");
                let reason = match e {
                    RagError::IndexCorrupt { reason, .. } => reason,
                    other => other.to_string(),
                };
                let store = Self::with_handle(root, keep_generations, IndexHandle::empty());
                *store.load_error.write().unwrap_or_else(PoisonError::into_inner) = Some(reason);
                store
            }
        }
    }

    fn with_handle(root: PathBuf, keep_generations: usize, handle: IndexHandle) -> Self {
        Self {
            root,
            keep_generations: keep_generations.max(MIN_KEEP_GENERATIONS),
            current: RwLock::new(Arc::new(handle)),
            load_error: RwLock::new(None),
            commit_lock: Mutex::new(0),
            ingest_lock: AsyncMutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Instantánea del índice vigente.
    pub fn current(&self) -> Arc<IndexHandle> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// `IndexCorrupt` si el índice en disco no se pudo cargar y aún no se ha
    /// confirmado ninguna generación nueva.
    pub fn ensure_available(&self) -> Result<()> {
        match self
            .load_error
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            Some(reason) => Err(RagError::corrupt(&self.root, reason.clone())),
            None => Ok(()),
        }
    }

    /// Exclusión entre ingestas: quien lo tenga lee la base y confirma sin que
    /// otra ingesta confirme en medio.
    pub async fn lock_ingest(&self) -> AsyncMutexGuard<'_, ()> {
        self.ingest_lock.lock().await
    }

    /// Persiste `handle` como generación nueva y la convierte en la vigente.
    pub fn commit(&self, handle: IndexHandle) -> Result<Arc<IndexHandle>> {
        let mut last_stamp = self.commit_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let stamp = Utc::now().timestamp_millis().max(*last_stamp + 1);
        *last_stamp = stamp;

        let generation = generation_id(stamp);
        let generations_dir = self.root.join(GENERATIONS_DIR);
        let partial = generations_dir.join(format!("{generation}{PARTIAL_SUFFIX}"));
        let final_dir = generations_dir.join(&generation);

        if let Err(e) = handle.write_generation(&partial) {
            let _ = fs::remove_dir_all(&partial);
            return Err(e);
        }
        fs::rename(&partial, &final_dir)?;

        let tmp_pointer = self.root.join(CURRENT_TMP_FILE);
        write_file_synced(&tmp_pointer, generation.as_bytes())?;
        fs::rename(&tmp_pointer, self.root.join(CURRENT_FILE))?;

        let mut committed = handle;
        committed.generation = Some(generation.clone());
        let committed = Arc::new(committed);
        self.swap(committed.clone());
        *self.load_error.write().unwrap_or_else(PoisonError::into_inner) = None;
        info!(generation = %generation, chunks = committed.len(), "Nueva generación del índice confirmada.");

        self.prune(&generation);
        Ok(committed)
    }

    fn swap(&self, handle: Arc<IndexHandle>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = handle;
    }

    /// Borra generaciones antiguas más allá de `keep_generations`. Nunca toca
    /// la generación vigente; los fallos sólo se registran.
    fn prune(&self, current: &str) {
        let dir = self.root.join(GENERATIONS_DIR);
        let mut names: Vec<String> = match fs::read_dir(&dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_dir())
                .map(|e| e.file_name().to_string_lossy().to_string())
                .filter(|name| name != current)
                .collect(),
            Err(e) => {
                warn!("No se pudo listar {}: {e}", dir.display());
                return;
            }
        };
        names.sort();

        // Los restos `.partial` de commits fallidos se borran siempre.
        let (partials, complete): (Vec<_>, Vec<_>) =
            names.into_iter().partition(|n| n.ends_with(PARTIAL_SUFFIX));
        let keep_old = self.keep_generations - 1;
        let excess = complete.len().saturating_sub(keep_old);

        for name in partials.iter().chain(complete.iter().take(excess)) {
            match fs::remove_dir_all(dir.join(name)) {
                Ok(()) => debug!(generation = %name, "Generación antigua eliminada."),
                Err(e) => warn!("No se pudo eliminar la generación {name}: {e}"),
            }
        }
    }
}

/// Manifiesto de la generación vigente en `path`; vacío si aún no hay índice.
pub fn load_docs_meta(path: &Path) -> Result<Vec<DocMeta>> {
    match IndexHandle::load(path) {
        Ok(handle) => Ok(handle.docs_meta()),
        Err(RagError::IndexNotFound(_)) => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

/// `gen-<sello UTC con ms>-<8 hex>`. Los sellos de un mismo almacén son
/// estrictamente crecientes, así que el orden lexicográfico es el de creación.
fn generation_id(stamp_millis: i64) -> String {
    let stamp = DateTime::<Utc>::from_timestamp_millis(stamp_millis).unwrap_or_else(Utc::now);
    let suffix = Uuid::new_v4().simple().to_string();
    format!("gen-{}-{}", stamp.format("%Y%m%dT%H%M%S%3f"), &suffix[..8])
}

fn all_finite(v: &[f64]) -> bool {
    v.iter().all(|x| x.is_finite())
}

fn read_json<T: serde::de::DeserializeOwned>(dir: &Path, file: &Path) -> Result<T> {
    let bytes = fs::read(file).map_err(|e| {
        RagError::corrupt(dir, format!("no se pudo leer {}: {e}", file.display()))
    })?;
    serde_json::from_slice(&bytes)
        .map_err(|e| RagError::corrupt(dir, format!("{} no es válido: {e}", file.display())))
}

fn write_file_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

fn l2_norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

fn cosine(a: &[f64], norm_a: f64, b: &[f64], norm_b: f64) -> f64 {
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    dot / (norm_a * norm_b)
}
