//! Taxonomía de errores del núcleo RAG.
//!
//! Los errores de librerías externas (rig, serde, io) se convierten aquí en
//! una de estas variantes; nada específico de un proveedor sale del núcleo.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    /// La carpeta de entrada no existe o no es un directorio.
    #[error("Ruta no encontrada: {}", .0.display())]
    NotFound(PathBuf),

    /// No hay ningún índice persistido en la ruta indicada.
    #[error("No existe índice vectorial en {}", .0.display())]
    IndexNotFound(PathBuf),

    /// El manifiesto y los vectores no concuerdan. Hay que re-ingerir.
    #[error("Índice corrupto en {}: {reason}", path.display())]
    IndexCorrupt { path: PathBuf, reason: String },

    /// Fallo (o timeout) de un proveedor de embeddings o de LLM.
    #[error("Error del proveedor {provider}: {message}")]
    Provider { provider: String, message: String },

    /// El modelo de embeddings de la consulta no es el que construyó el índice.
    #[error("Configuración incompatible: el índice usa {expected}, la consulta usa {found}")]
    ConfigMismatch { expected: String, found: String },

    #[error("Argumento inválido: {0}")]
    InvalidArgument(String),

    #[error("Error de E/S: {0}")]
    Io(#[from] std::io::Error),

    #[error("Error de serialización: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RagError {
    pub fn provider(provider: impl Into<String>, message: impl ToString) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.to_string(),
        }
    }

    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::IndexCorrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
