//! Asistente RAG de Virtual Metrology: ingesta de logs de proceso en un índice
//! vectorial por generaciones y consultas respondidas por un LLM con las
//! fuentes recuperadas.

pub mod api;
pub mod app_state;
pub mod chunking;
pub mod config;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod rag;
pub mod synthesis;
pub mod tools;
pub mod vector_store;

pub use error::{RagError, Result};
pub use models::{Chunk, DocMeta, IndexBuildReport, QueryResult, SourceChunk};
pub use rag::RagContext;
