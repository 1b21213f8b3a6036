use std::sync::{mpsc, Arc};

use crate::reconcile::{
    BestMatch, CanonicalVocabulary, EmbeddingError, Outcome, ReconcileError, SimilarityMatcher,
    TagReconciler,
};
use crate::tags::{BackendCsv, TagStore};

use super::fakes::{FakeEmbedder, GatedEmbedder, MemoryTagStore, ShortBatchEmbedder};

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn reconciler(embedder: &Arc<FakeEmbedder>, store: &Arc<MemoryTagStore>) -> TagReconciler {
    TagReconciler::new(embedder.clone(), store.clone())
        .with_parallelism(1)
        .unwrap()
}

fn winter_embedder() -> FakeEmbedder {
    FakeEmbedder::new(&[
        ("ski", &[1.0, 0.0, 0.0]),
        ("Ski", &[0.99, 0.05, 0.0]),
        ("skis", &[0.98, 0.1, 0.0]),
        ("snowboard", &[0.0, 1.0, 0.0]),
        ("snowboarding", &[0.05, 0.99, 0.0]),
        ("kayak", &[0.0, 0.0, 1.0]),
        ("kayaks", &[0.0, 0.1, 0.98]),
        ("tent", &[0.6, -0.6, 0.5]),
    ])
}

#[test]
fn test_exact_names_are_idempotent() {
    let embedder = Arc::new(winter_embedder());
    let store = Arc::new(MemoryTagStore::with_tags(&["ski"]));
    let reconciler = reconciler(&embedder, &store);

    for _ in 0..2 {
        let result = reconciler.reconcile(&strings(&["ski"])).unwrap();
        assert_eq!(result.tags, strings(&["ski"]));
        assert!(result.inserted.is_empty());
        assert_eq!(result.decisions[0].outcome, Outcome::Exact);
    }

    // nothing needed a similarity decision
    assert!(embedder.calls().is_empty());
    assert_eq!(store.insert_calls(), 0);
    assert_eq!(store.names(), strings(&["ski"]));
}

#[test]
fn test_bootstrap_admits_distinct_candidates() {
    let embedder = Arc::new(winter_embedder());
    let store = Arc::new(MemoryTagStore::default());

    let result = reconciler(&embedder, &store)
        .reconcile(&strings(&["ski", "snowboard", "ski"]))
        .unwrap();

    assert_eq!(result.tags, strings(&["ski", "snowboard"]));
    assert_eq!(result.inserted, strings(&["ski", "snowboard"]));
    assert_eq!(store.names(), strings(&["ski", "snowboard"]));
    assert_eq!(store.insert_calls(), 1);

    let outcomes: Vec<&Outcome> = result.decisions.iter().map(|d| &d.outcome).collect();
    assert!(matches!(outcomes[0], Outcome::Admitted { nearest: None, .. }));
    assert!(matches!(outcomes[1], Outcome::Admitted { nearest: Some(_), .. }));
    assert_eq!(outcomes[2], &Outcome::Exact);

    // each distinct string is embedded once
    assert_eq!(embedder.calls_for("ski"), 1);
}

#[test]
fn test_similarity_at_threshold_merges() {
    // cos((3,4), (4,3)) = 24/25
    let embedder = Arc::new(FakeEmbedder::new(&[
        ("ski", &[3.0, 4.0]),
        ("skiing", &[4.0, 3.0]),
    ]));
    let store = Arc::new(MemoryTagStore::with_tags(&["ski"]));

    let result = reconciler(&embedder, &store)
        .with_threshold(0.96)
        .reconcile(&strings(&["skiing"]))
        .unwrap();

    assert_eq!(result.tags, strings(&["ski"]));
    assert!(result.inserted.is_empty());
    assert_eq!(
        result.decisions[0].outcome,
        Outcome::Merged {
            into: "ski".to_string(),
            score: 0.96
        }
    );
}

#[test]
fn test_similarity_just_below_threshold_admits() {
    let embedder = Arc::new(FakeEmbedder::new(&[
        ("ski", &[3.0, 4.0]),
        ("skiing", &[4.0, 3.0]),
    ]));
    let store = Arc::new(MemoryTagStore::with_tags(&["ski"]));
    let threshold = f32::from_bits(0.96f32.to_bits() + 1);

    let result = reconciler(&embedder, &store)
        .with_threshold(threshold)
        .reconcile(&strings(&["skiing"]))
        .unwrap();

    assert_eq!(result.tags, strings(&["skiing"]));
    assert_eq!(result.inserted, strings(&["skiing"]));
    assert_eq!(
        result.decisions[0].outcome,
        Outcome::Admitted {
            nearest: Some("ski".to_string()),
            score: 0.96
        }
    );
    assert_eq!(store.names(), strings(&["ski", "skiing"]));
}

#[test]
fn test_batch_internal_near_duplicates_merge() {
    let embedder = Arc::new(winter_embedder());
    let store = Arc::new(MemoryTagStore::default());

    let result = reconciler(&embedder, &store)
        .reconcile(&strings(&["snowboard", "snowboarding"]))
        .unwrap();

    assert_eq!(result.tags, strings(&["snowboard"]));
    assert_eq!(result.inserted, strings(&["snowboard"]));
    assert_eq!(result.decisions[1].tag, "snowboard");
    assert!(matches!(
        &result.decisions[1].outcome,
        Outcome::Merged { into, .. } if into == "snowboard"
    ));
}

#[test]
fn test_admission_follows_input_order() {
    let embedder = Arc::new(winter_embedder());
    let store = Arc::new(MemoryTagStore::default());

    let result = reconciler(&embedder, &store)
        .reconcile(&strings(&["snowboarding", "snowboard"]))
        .unwrap();

    assert_eq!(result.tags, strings(&["snowboarding"]));
    assert_eq!(store.names(), strings(&["snowboarding"]));
}

#[test]
fn test_embedding_failure_aborts_batch() {
    let embedder = Arc::new(winter_embedder().failing_on("kayak"));
    let store = Arc::new(MemoryTagStore::default());

    let result = reconciler(&embedder, &store)
        .reconcile(&strings(&["ski", "snowboard", "kayak", "tent", "skis"]));

    match result {
        Err(ReconcileError::EmbeddingUnavailable { text, source }) => {
            assert_eq!(text, "kayak");
            assert!(matches!(source, EmbeddingError::EmbeddingFailed(_)));
        }
        other => panic!("expected EmbeddingUnavailable, got {other:?}"),
    }

    assert_eq!(store.insert_calls(), 0);
    assert!(store.names().is_empty());
}

#[test]
fn test_embedding_failure_aborts_with_default_pool() {
    let embedder = Arc::new(winter_embedder().failing_on("tent"));
    let store = Arc::new(MemoryTagStore::with_tags(&["ski"]));

    let result = TagReconciler::new(embedder.clone(), store.clone())
        .reconcile(&strings(&["skis", "snowboard", "tent", "kayak"]));

    assert!(matches!(
        result,
        Err(ReconcileError::EmbeddingUnavailable { .. })
    ));
    assert_eq!(store.insert_calls(), 0);
    assert_eq!(store.names(), strings(&["ski"]));
}

#[test]
fn test_case_differences_go_through_similarity() {
    let embedder = Arc::new(winter_embedder());
    let store = Arc::new(MemoryTagStore::with_tags(&["ski"]));

    let result = reconciler(&embedder, &store)
        .reconcile(&strings(&["Ski"]))
        .unwrap();

    assert_eq!(embedder.calls_for("Ski"), 1);
    assert_eq!(result.tags, strings(&["ski"]));
    assert!(matches!(
        &result.decisions[0].outcome,
        Outcome::Merged { into, .. } if into == "ski"
    ));
}

#[test]
fn test_vocabulary_embedded_once_per_batch() {
    let embedder = Arc::new(winter_embedder());
    let store = Arc::new(MemoryTagStore::with_tags(&["ski", "kayak"]));

    let result = reconciler(&embedder, &store)
        .reconcile(&strings(&["skis", "kayaks", "tent", "skis", "kayak"]))
        .unwrap();

    assert_eq!(result.tags, strings(&["ski", "kayak", "tent"]));
    assert_eq!(result.inserted, strings(&["tent"]));

    let mut calls = embedder.calls();
    calls.sort();
    assert_eq!(calls, strings(&["kayak", "kayaks", "ski", "skis", "tent"]));
}

#[test]
fn test_concurrent_admission_is_not_an_error() {
    let embedder = Arc::new(winter_embedder());
    let store = Arc::new(MemoryTagStore::with_tags(&["ski"]).claimed_concurrently(&["kayak"]));

    let result = reconciler(&embedder, &store)
        .reconcile(&strings(&["kayak", "tent"]))
        .unwrap();

    assert_eq!(result.tags, strings(&["kayak", "tent"]));
    assert_eq!(result.inserted, strings(&["tent"]));
    assert_eq!(result.decisions[0].outcome, Outcome::ConcurrentlyAdmitted);
    assert!(matches!(result.decisions[1].outcome, Outcome::Admitted { .. }));
    assert_eq!(store.names(), strings(&["ski", "kayak", "tent"]));
}

#[test]
fn test_vocabulary_read_failure_is_fatal() {
    let embedder = Arc::new(winter_embedder());
    let store = Arc::new(MemoryTagStore::default().failing_reads());

    let result = reconciler(&embedder, &store).reconcile(&strings(&["ski"]));

    assert!(matches!(result, Err(ReconcileError::VocabularyUnavailable(_))));
    assert!(embedder.calls().is_empty());
}

#[test]
fn test_persistence_failure_is_fatal() {
    let embedder = Arc::new(winter_embedder());
    let store = Arc::new(MemoryTagStore::default().failing_writes());

    let result = reconciler(&embedder, &store).reconcile(&strings(&["ski", "kayak"]));

    assert!(matches!(result, Err(ReconcileError::Persistence(_))));
    assert_eq!(store.insert_calls(), 1);
}

#[test]
fn test_blank_candidates_are_skipped() {
    let embedder = Arc::new(winter_embedder());
    let store = Arc::new(MemoryTagStore::with_tags(&["ski"]));

    let result = reconciler(&embedder, &store)
        .reconcile(&strings(&["", "   ", " ski "]))
        .unwrap();

    assert_eq!(result.tags, strings(&["ski"]));
    assert_eq!(result.decisions.len(), 1);

    let result = reconciler(&embedder, &store)
        .reconcile(&strings(&["", "\t"]))
        .unwrap();
    assert!(result.tags.is_empty());
    assert!(result.decisions.is_empty());
}

#[test]
fn test_dimension_mismatch_is_malformed() {
    let embedder = Arc::new(FakeEmbedder::new(&[
        ("ski", &[1.0, 0.0]),
        ("bike", &[1.0, 0.0, 0.0]),
    ]));
    let store = Arc::new(MemoryTagStore::with_tags(&["ski"]));

    let result = reconciler(&embedder, &store).reconcile(&strings(&["bike"]));

    match result {
        Err(ReconcileError::EmbeddingUnavailable { text, source }) => {
            assert_eq!(text, "bike");
            assert!(matches!(source, EmbeddingError::Malformed(_)));
        }
        other => panic!("expected malformed embedding, got {other:?}"),
    }
    assert_eq!(store.insert_calls(), 0);
}

#[test]
fn test_synonyms_collapse_to_one_tag() {
    let embedder = Arc::new(FakeEmbedder::new(&[
        ("bike", &[1.0, 0.2]),
        ("bicycle", &[0.95, 0.25]),
        ("cycling", &[0.9, 0.3]),
    ]));
    let store = Arc::new(MemoryTagStore::with_tags(&["bike"]));

    let result = reconciler(&embedder, &store)
        .reconcile(&strings(&["bicycle", "bike", "cycling"]))
        .unwrap();

    assert_eq!(result.tags, strings(&["bike"]));
    assert!(result.inserted.is_empty());
    assert_eq!(store.insert_calls(), 0);
}

#[test]
fn test_csv_store_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("tags.csv");
    let store = Arc::new(BackendCsv::load(path.to_str().unwrap()).unwrap());
    let embedder = Arc::new(winter_embedder());

    let reconciler = TagReconciler::new(embedder.clone(), store.clone());

    let first = reconciler
        .reconcile(&strings(&["ski", "snowboard"]))
        .unwrap();
    assert_eq!(first.inserted, strings(&["ski", "snowboard"]));

    let second = reconciler
        .reconcile(&strings(&["skis", "snowboarding", "kayak"]))
        .unwrap();
    assert_eq!(second.tags, strings(&["ski", "snowboard", "kayak"]));
    assert_eq!(second.inserted, strings(&["kayak"]));

    let reopened = BackendCsv::load(path.to_str().unwrap()).unwrap();
    assert_eq!(
        reopened.list_names().unwrap(),
        strings(&["ski", "snowboard", "kayak"])
    );
}

#[test]
fn test_parse_tags() {
    let parsed = crate::parse_tags(&["ski, Snowboard,,", " ", "hot tub"]);
    assert_eq!(parsed, strings(&["ski", "Snowboard", "hot tub"]));
}

struct NeverMatches;

impl SimilarityMatcher for NeverMatches {
    fn best_match<'v>(
        &self,
        _query: &[f32],
        _vocabulary: &'v CanonicalVocabulary,
    ) -> BestMatch<'v> {
        BestMatch::none()
    }
}

#[test]
fn test_custom_matcher() {
    let embedder = Arc::new(winter_embedder());
    let store = Arc::new(MemoryTagStore::with_tags(&["ski"]));

    let result = reconciler(&embedder, &store)
        .with_matcher(Box::new(NeverMatches))
        .reconcile(&strings(&["skis", "ski"]))
        .unwrap();

    assert_eq!(result.tags, strings(&["skis", "ski"]));
    assert_eq!(result.inserted, strings(&["skis"]));
    assert_eq!(
        result.decisions[0].outcome,
        Outcome::Admitted {
            nearest: None,
            score: 0.0
        }
    );
}

#[test]
fn test_short_embedding_batch_is_malformed() {
    let store = Arc::new(MemoryTagStore::with_tags(&["ski"]));

    let result = TagReconciler::new(Arc::new(ShortBatchEmbedder), store.clone())
        .reconcile(&strings(&["skis", "kayak"]));

    assert!(matches!(
        result,
        Err(ReconcileError::EmbeddingUnavailable {
            source: EmbeddingError::Malformed(_),
            ..
        })
    ));
    assert_eq!(store.insert_calls(), 0);
}

#[test]
fn test_two_writers_admit_the_same_tag() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("tags.csv");
    let path = path.to_str().unwrap();

    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();

    // reads the empty vocabulary, then waits inside the embedding call
    let slow = TagReconciler::new(
        Arc::new(GatedEmbedder::new(winter_embedder(), entered_tx, release_rx)),
        Arc::new(BackendCsv::load(path).unwrap()),
    )
    .with_parallelism(1)
    .unwrap();
    let slow = std::thread::spawn(move || slow.reconcile(&strings(&["kayak"])));
    entered_rx.recv().unwrap();

    let fast = TagReconciler::new(
        Arc::new(winter_embedder()),
        Arc::new(BackendCsv::load(path).unwrap()),
    )
    .with_parallelism(1)
    .unwrap()
    .reconcile(&strings(&["kayak", "ski"]))
    .unwrap();
    release_tx.send(()).unwrap();
    let slow = slow.join().unwrap().unwrap();

    assert_eq!(fast.inserted, strings(&["kayak", "ski"]));
    assert!(slow.inserted.is_empty());
    assert_eq!(slow.tags, strings(&["kayak"]));
    assert_eq!(slow.decisions[0].outcome, Outcome::ConcurrentlyAdmitted);

    let stored = BackendCsv::load(path).unwrap().list().unwrap();
    let names: Vec<&str> = stored.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["kayak", "ski"]);
    assert_ne!(stored[0].id, stored[1].id);
}
