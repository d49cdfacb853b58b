use super::*;
use crate::vector::encode;

fn record(doc: &str, index: i64, text: &str, partition: &str, vec: Vec<f32>) -> ChunkRecord {
    ChunkRecord {
        document_id: doc.to_string(),
        document_name: doc.to_string(),
        chunk_index: index,
        text: text.to_string(),
        image_url: String::new(),
        partition: partition.to_string(),
        embedding: vec,
    }
}

fn stored(doc: &str, index: i64, text: &str, partition: &str, vec: &[f32]) -> StoredChunk {
    StoredChunk {
        document_id: doc.to_string(),
        document_name: doc.to_string(),
        chunk_index: index,
        text: text.to_string(),
        image_url: String::new(),
        partition: partition.to_string(),
        embedding: encode(vec),
    }
}

#[test]
fn test_build_sets_dim_and_global() {
    let mut state = IndexState::new();
    state.build(vec![
        stored("d1", 0, "a", "", &[1.0, 0.0, 0.0]),
        stored("d1", 1, "b", "", &[0.0, 1.0, 0.0]),
    ]);
    assert!(state.loaded());
    assert_eq!(state.len(), 2);
    let snap = state.try_snapshot("").unwrap();
    assert_eq!(snap.dim, 3);
    assert_eq!(snap.indices.as_slice(), &[0, 1]);
    assert_eq!(snap.arena.len(), 6);
}

#[test]
fn test_partition_union_includes_shared_library() {
    let mut state = IndexState::new();
    state.build(vec![
        stored("a1", 0, "tenant a", "a", &[1.0, 0.0]),
        stored("b1", 0, "tenant b", "b", &[0.0, 1.0]),
        stored("pub", 0, "shared", "", &[1.0, 1.0]),
    ]);

    let snap = state.snapshot_mut("a");
    assert_eq!(snap.indices.as_slice(), &[0, 2]);

    // Unscoped search sees everything.
    let all = state.snapshot_mut("");
    assert_eq!(all.indices.as_slice(), &[0, 1, 2]);
}

#[test]
fn test_merged_slice_is_memoized_and_cleared_on_append() {
    let mut state = IndexState::new();
    state.build(vec![
        stored("a1", 0, "tenant a", "a", &[1.0, 0.0]),
        stored("pub", 0, "shared", "", &[0.0, 1.0]),
    ]);

    assert!(state.try_snapshot("a").is_none());
    state.snapshot_mut("a");
    assert!(state.try_snapshot("a").is_some());

    state.append(&[record("pub2", 0, "more shared", "", vec![1.0, 1.0])]);
    assert!(state.try_snapshot("a").is_none(), "memo must be cleared");

    let snap = state.snapshot_mut("a");
    assert_eq!(snap.indices.as_slice(), &[0, 1, 2]);
}

#[test]
fn test_append_extends_arena_in_place() {
    let mut state = IndexState::new();
    state.build(vec![stored("d1", 0, "a", "", &[1.0, 0.0])]);

    // A live snapshot forces copy-on-write; both views must stay coherent.
    let before = state.try_snapshot("").unwrap();
    state.append(&[record("d2", 0, "b", "", vec![0.0, 1.0])]);
    let after = state.try_snapshot("").unwrap();

    assert_eq!(before.indices.len(), 1);
    assert_eq!(before.arena.len(), 2);
    assert_eq!(after.indices.len(), 2);
    assert_eq!(after.arena.len(), 4);
    assert_eq!(&after.arena[2..4], &[0.0, 1.0]);
}

#[test]
fn test_remove_document_rebuilds() {
    let mut state = IndexState::new();
    state.build(vec![
        stored("d1", 0, "gone", "", &[1.0, 0.0]),
        stored("d2", 0, "stays", "p", &[0.0, 1.0]),
        stored("d1", 1, "also gone", "", &[0.5, 0.5]),
    ]);

    state.remove_document("d1");
    assert_eq!(state.len(), 1);
    let snap = state.snapshot_mut("p");
    assert_eq!(snap.indices.as_slice(), &[0]);
    assert_eq!(snap.meta[0].document_id, "d2");
    assert_eq!(&snap.arena[..2], &[0.0, 1.0]);
}

#[test]
fn test_zero_norm_entry_flagged() {
    let mut state = IndexState::new();
    state.build(vec![
        stored("d1", 0, "real", "", &[1.0, 0.0]),
        stored("d1", 1, "zero", "", &[0.0, 0.0]),
    ]);
    let snap = state.try_snapshot("").unwrap();
    assert!(snap.inv_norms[0] > 0.0);
    assert_eq!(snap.inv_norms[1], 0.0);
}

#[test]
fn test_dimension_mismatch_excluded_from_scoring() {
    let mut state = IndexState::new();
    state.build(vec![
        stored("d1", 0, "three dims", "", &[1.0, 0.0, 0.0]),
        stored("d2", 0, "two dims", "", &[1.0, 0.0]),
    ]);
    let snap = state.try_snapshot("").unwrap();
    assert_eq!(snap.dim, 3);
    assert_eq!(snap.inv_norms[1], 0.0);
    // The slot is zero-padded so arena strides stay uniform.
    assert_eq!(&snap.arena[3..6], &[0.0, 0.0, 0.0]);
    // Text search still sees the entry.
    assert_eq!(snap.meta[1].lower_text, "two dims");
}

#[test]
fn test_undecodable_row_skipped_on_build() {
    let mut state = IndexState::new();
    let mut bad = stored("d1", 0, "bad", "", &[1.0]);
    bad.embedding = vec![0u8; 3];
    state.build(vec![bad, stored("d2", 0, "good", "", &[1.0])]);
    assert_eq!(state.len(), 1);
    let snap = state.try_snapshot("").unwrap();
    assert_eq!(snap.meta[0].document_id, "d2");
}
