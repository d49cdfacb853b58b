use super::mock::{MockEmbeddingService, MockLlmService};
use super::*;

#[test]
fn test_paragraph_chunker_packs_paragraphs() {
    let chunker = ParagraphChunker::new(40);
    let pieces = chunker.split("first paragraph\n\nsecond paragraph\n\nthird", "doc");
    assert!(!pieces.is_empty());
    for (i, piece) in pieces.iter().enumerate() {
        assert_eq!(piece.index, i as i64);
        assert!(!piece.text.is_empty());
        assert!(piece.text.chars().count() <= 40);
    }
}

#[test]
fn test_paragraph_chunker_wraps_long_paragraph() {
    let chunker = ParagraphChunker::new(10);
    let pieces = chunker.split(&"x".repeat(25), "doc");
    assert_eq!(pieces.len(), 3);
    assert_eq!(pieces[0].text.len(), 10);
    assert_eq!(pieces[2].text.len(), 5);
}

#[test]
fn test_paragraph_chunker_empty_input() {
    let chunker = ParagraphChunker::default();
    assert!(chunker.split("   \n\n  \n", "doc").is_empty());
}

#[test]
fn test_paragraph_chunker_deterministic() {
    let chunker = ParagraphChunker::default();
    let text = "alpha\n\nbeta\n\ngamma";
    assert_eq!(chunker.split(text, "a"), chunker.split(text, "b"));
}

#[tokio::test]
async fn test_mock_embedding_deterministic() {
    let mock = MockEmbeddingService::new();
    let a = mock.embed("same text").await.unwrap();
    let b = mock.embed("same text").await.unwrap();
    assert_eq!(a, b);
    assert_eq!(mock.embed_calls(), 2);

    let other = mock.embed("different text").await.unwrap();
    assert_ne!(a, other);
}

#[tokio::test]
async fn test_mock_embedding_batch_aligns_with_input() {
    let mock = MockEmbeddingService::new().with_vector("pinned", vec![1.0, 0.0]);
    let vectors = mock
        .embed_batch(&["pinned".to_string(), "free".to_string()])
        .await
        .unwrap();
    assert_eq!(vectors[0], vec![1.0, 0.0]);
    assert_eq!(vectors[1], mock.embed("free").await.unwrap());
}

#[tokio::test]
async fn test_mock_embedding_batch_cap() {
    let mock = MockEmbeddingService::new();
    let texts: Vec<String> = (0..257).map(|i| format!("t{i}")).collect();
    let err = mock.embed_batch(&texts).await.unwrap_err();
    assert!(matches!(
        err,
        ProviderError::BatchTooLarge { len: 257, max: 256 }
    ));
}

#[tokio::test]
async fn test_mock_llm_scripted_replies() {
    let mock = MockLlmService::new().with_default_reply("default");
    mock.push_reply("first");
    assert_eq!(mock.generate("sys", &[], "q1").await.unwrap(), "first");
    assert_eq!(mock.generate("sys", &[], "q2").await.unwrap(), "default");
    assert_eq!(mock.generate_calls(), 2);

    let calls = mock.recorded();
    assert_eq!(calls[0].question, "q1");
    assert!(calls[0].image_data_url.is_none());
}

#[tokio::test]
async fn test_mock_llm_failure_mode() {
    let mock = MockLlmService::new();
    mock.set_failing(true);
    assert!(mock.generate("sys", &[], "q").await.is_err());
}
