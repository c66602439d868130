//! Troceado determinista de documentos en ventanas de caracteres con solape.
//!
//! Cada ventana tiene como mucho `chunk_size` caracteres y la siguiente empieza
//! `chunk_size - chunk_overlap` caracteres más adelante. La última ventana
//! termina en el final del texto. Misma entrada y misma configuración producen
//! exactamente los mismos chunks.

use crate::config::ChunkingConfig;
use crate::models::{chunk_id, Chunk, DocMeta, Document};

/// Divide `text` en ventanas de caracteres (no de bytes) según `cfg`.
pub fn split_into_chunks(text: &str, cfg: &ChunkingConfig) -> Vec<String> {
    let text = text.trim_end();
    if text.trim().is_empty() || cfg.chunk_size == 0 {
        return Vec::new();
    }

    // Offsets de byte de cada carácter, más el final, para cortar sin romper UTF-8.
    let mut bounds: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    bounds.push(text.len());
    let total_chars = bounds.len() - 1;

    let step = cfg.chunk_size.saturating_sub(cfg.chunk_overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    loop {
        let end = (start + cfg.chunk_size).min(total_chars);
        chunks.push(text[bounds[start]..bounds[end]].to_string());
        if end == total_chars {
            break;
        }
        start += step;
    }

    chunks
}

/// Trocea un documento y construye los `Chunk` con su metadato de manifiesto.
pub fn chunk_document(doc: &Document, cfg: &ChunkingConfig) -> Vec<Chunk> {
    let filename = doc.filename();
    split_into_chunks(&doc.raw_text, cfg)
        .into_iter()
        .enumerate()
        .map(|(idx, text)| Chunk {
            text,
            chunk_index: idx,
            parent_document_id: doc.id.clone(),
            metadata: DocMeta {
                chunk_id: chunk_id(&doc.id, idx),
                source: doc.id.clone(),
                filename: filename.clone(),
                chunk_index: idx,
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::path::PathBuf;

    fn cfg(size: usize, overlap: usize) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size: size,
            chunk_overlap: overlap,
        }
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = split_into_chunks("CD drift observed on lot L1234 at step 12\n", &cfg(500, 50));
        assert_eq!(chunks, vec!["CD drift observed on lot L1234 at step 12".to_string()]);
    }

    #[test]
    fn blank_text_has_no_chunks() {
        assert!(split_into_chunks("", &cfg(10, 2)).is_empty());
        assert!(split_into_chunks("  \n\t\n", &cfg(10, 2)).is_empty());
    }

    #[test]
    fn windows_overlap_by_configured_amount() {
        let chunks = split_into_chunks("abcdefghij", &cfg(4, 1));
        assert_eq!(chunks, vec!["abcd", "defg", "ghij"]);
    }

    #[test]
    fn last_window_ends_at_text_end() {
        let chunks = split_into_chunks("abcdefgh", &cfg(4, 1));
        assert_eq!(chunks, vec!["abcd", "defg", "gh"]);
    }

    #[test]
    fn multibyte_text_is_split_on_char_boundaries() {
        let chunks = split_into_chunks("áéíóúñü", &cfg(3, 0));
        assert_eq!(chunks, vec!["áéí", "óúñ", "ü"]);
    }

    #[test]
    fn document_chunks_carry_manifest_metadata() {
        let doc = Document {
            id: "fab2/lot1.log".to_string(),
            raw_text: "abcdefghij".to_string(),
            source_path: PathBuf::from("/data/fab2/lot1.log"),
        };
        let chunks = chunk_document(&doc, &cfg(4, 1));
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].chunk_index, 2);
        assert_eq!(chunks[2].metadata.chunk_id, "fab2/lot1.log#2");
        assert_eq!(chunks[2].metadata.source, "fab2/lot1.log");
        assert_eq!(chunks[2].metadata.filename, "lot1.log");
        assert_eq!(chunks[2].parent_document_id, "fab2/lot1.log");
    }

    proptest! {
        #[test]
        fn chunks_are_bounded_and_cover_the_text(
            text in "[a-zA-Z0-9 .ñ\n]{1,400}",
            size in 1usize..64,
            overlap_seed in 0usize..64,
        ) {
            let overlap = overlap_seed % size;
            let config = cfg(size, overlap);
            let chunks = split_into_chunks(&text, &config);
            let trimmed = text.trim_end();

            for chunk in &chunks {
                prop_assert!(chunk.chars().count() <= size);
            }
            if trimmed.trim().is_empty() {
                prop_assert!(chunks.is_empty());
            } else {
                prop_assert!(trimmed.starts_with(chunks[0].as_str()));
                prop_assert!(trimmed.ends_with(chunks.last().unwrap().as_str()));
            }
            prop_assert_eq!(split_into_chunks(&text, &config), chunks);
        }
    }
}
