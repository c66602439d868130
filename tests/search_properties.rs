use proptest::prelude::*;
use vm_rag_agent::{
    models::{chunk_id, Chunk, DocMeta},
    vector_store::IndexHandle,
};

const DIM: usize = 4;

fn chunk(doc: usize, idx: usize) -> Chunk {
    let doc = format!("doc{doc}.log");
    Chunk {
        text: format!("{doc} trozo {idx}"),
        chunk_index: idx,
        parent_document_id: doc.clone(),
        metadata: DocMeta {
            chunk_id: chunk_id(&doc, idx),
            source: doc.clone(),
            filename: doc,
            chunk_index: idx,
        },
    }
}

fn index_from(vectors: &[Vec<f64>]) -> IndexHandle {
    let batch = vectors
        .iter()
        .enumerate()
        .map(|(i, v)| (chunk(i, 0), v.clone()))
        .collect();
    IndexHandle::empty().upsert("stub", batch).unwrap()
}

fn vector() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(-1.0f64..1.0, DIM)
}

proptest! {
    #[test]
    fn results_are_sorted_and_bounded_by_k(
        vectors in prop::collection::vec(vector(), 1..20),
        query in vector(),
        k in 1usize..30,
    ) {
        let index = index_from(&vectors);
        let results = index.search(&query, k).unwrap();

        prop_assert_eq!(results.len(), k.min(vectors.len()));
        prop_assert!(results.windows(2).all(|w| w[0].1 >= w[1].1));
        prop_assert!(results.iter().all(|(_, s)| (-1.0 - 1e-9..=1.0 + 1e-9).contains(s)));
    }

    #[test]
    fn top_result_is_a_best_match(
        vectors in prop::collection::vec(vector(), 1..20),
        query in vector(),
    ) {
        let index = index_from(&vectors);
        let all = index.search(&query, vectors.len()).unwrap();
        let top = index.search(&query, 1).unwrap();

        prop_assert_eq!(top[0].0.id(), all[0].0.id());
        prop_assert!(all.iter().all(|(_, s)| *s <= top[0].1));
    }

    #[test]
    fn identical_vectors_keep_ingestion_order(copies in 2usize..12, k in 1usize..12) {
        let vectors = vec![vec![0.5, 0.5, 0.0, 0.0]; copies];
        let index = index_from(&vectors);
        let results = index.search(&[1.0, 0.0, 0.0, 0.0], k).unwrap();

        let expected: Vec<String> = (0..k.min(copies)).map(|i| chunk_id(&format!("doc{i}.log"), 0)).collect();
        let ids: Vec<String> = results.iter().map(|(c, _)| c.id().to_string()).collect();
        prop_assert_eq!(ids, expected);
    }

    #[test]
    fn upserting_same_batch_twice_is_idempotent(vectors in prop::collection::vec(vector(), 1..10)) {
        let batch: Vec<(Chunk, Vec<f64>)> = vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (chunk(i, 0), v.clone()))
            .collect();
        let once = IndexHandle::empty().upsert("stub", batch.clone()).unwrap();
        let twice = once.upsert("stub", batch).unwrap();

        prop_assert_eq!(once.docs_meta(), twice.docs_meta());
        prop_assert_eq!(once.vectors(), twice.vectors());
    }
}
