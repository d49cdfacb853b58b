use super::*;
use crate::config::Config;
use crate::providers::ParagraphChunker;
use crate::providers::mock::{MockEmbeddingService, MockLlmService};
use crate::store::{self, ChunkStore};

struct Fixture {
    engine: QueryEngine<MockEmbeddingService, MockLlmService>,
    embedding: Arc<MockEmbeddingService>,
    llm: Arc<MockLlmService>,
    search: Arc<SearchEngine>,
    pending: Arc<PendingStore>,
}

async fn fixture_with(
    config: Config,
    embedding: MockEmbeddingService,
    llm: MockLlmService,
) -> Fixture {
    let pool = store::connect_in_memory().await.unwrap();
    let chunk_store = ChunkStore::new(pool.clone()).await.unwrap();
    let search = Arc::new(SearchEngine::new(chunk_store));
    let pending = Arc::new(PendingStore::new(pool));
    let embedding = Arc::new(embedding);
    let llm = Arc::new(llm);
    let engine = QueryEngine::new(
        Arc::clone(&search),
        Arc::clone(&pending),
        Arc::new(ParagraphChunker::default()),
        Arc::clone(&embedding),
        Arc::clone(&llm),
        Arc::new(config),
    );
    Fixture {
        engine,
        embedding,
        llm,
        search,
        pending,
    }
}

async fn fixture() -> Fixture {
    fixture_with(
        Config::default(),
        MockEmbeddingService::new(),
        MockLlmService::new(),
    )
    .await
}

/// A request that bypasses intent routing.
fn kb_request(question: &str) -> QueryRequest {
    QueryRequest {
        question: question.to_string(),
        user_id: "u1".to_string(),
        partition: String::new(),
        product_type: "knowledge_base".to_string(),
        image_data: None,
    }
}

fn chunk(doc: &str, index: i64, text: &str, partition: &str, vec: Vec<f32>) -> ChunkRecord {
    ChunkRecord {
        document_id: doc.to_string(),
        document_name: format!("{doc}.md"),
        chunk_index: index,
        text: text.to_string(),
        image_url: String::new(),
        partition: partition.to_string(),
        embedding: vec,
    }
}

#[tokio::test]
async fn test_escalation_creates_single_pending_question() {
    let fx = fixture().await;
    fx.llm
        .push_reply("Your question has been transferred to a human agent.");

    let response = fx
        .engine
        .query(&kb_request("what is the meaning of life"))
        .await
        .unwrap();
    assert!(response.is_pending);
    assert_eq!(response.answer, "");
    assert!(!response.allow_download);
    assert_eq!(
        response.message,
        "Your question has been transferred to a human agent."
    );

    let open = fx.pending.list(Some("pending"), None).await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].question, "what is the meaning of life");

    // A near-identical question reuses the open row instead of queuing a
    // second one; the translated message comes from the cache.
    let again = fx
        .engine
        .query(&kb_request("what is the meaning of life?"))
        .await
        .unwrap();
    assert!(again.is_pending);
    assert_eq!(fx.pending.list(Some("pending"), None).await.unwrap().len(), 1);
    assert_eq!(fx.llm.generate_calls(), 1, "translation served from cache");
}

#[tokio::test]
async fn test_tier1_serves_cached_answer_without_generation() {
    let fx = fixture().await;
    let q = fx
        .pending
        .create("how to reset account password", "u1", None, "")
        .await
        .unwrap();

    fx.llm.push_reply("Use Settings > Account.");
    fx.engine
        .answer_question(&AnswerRequest {
            question_id: q.id.clone(),
            answer: "Use Settings > Account.".to_string(),
            image_urls: Vec::new(),
            is_edit: false,
        })
        .await
        .unwrap();

    let generate_before = fx.llm.total_calls();
    let embed_before = fx.embedding.embed_calls();

    let response = fx
        .engine
        .query(&kb_request("how to reset account password"))
        .await
        .unwrap();

    assert_eq!(response.answer, "Use Settings > Account.");
    assert!(!response.is_pending);
    assert!(response.allow_download);
    assert!(!response.sources.is_empty());
    assert_eq!(response.sources[0].document_type, "answer");
    assert_eq!(
        fx.llm.total_calls(),
        generate_before,
        "tier-1 text hit must not call the generative provider"
    );
    assert_eq!(
        fx.embedding.embed_calls(),
        embed_before,
        "tier-1 text hit must not embed"
    );
}

#[tokio::test]
async fn test_tier1_vector_confirmation_serves_cached_answer() {
    let embedding = MockEmbeddingService::new()
        .with_vector("how is the product installed", vec![1.0, 0.0])
        .with_vector(
            "installation guide steps\nRun the installer.",
            vec![1.0, 0.0],
        );
    let fx = fixture_with(Config::default(), embedding, MockLlmService::new()).await;

    let q = fx
        .pending
        .create("installation guide steps", "u1", None, "")
        .await
        .unwrap();
    fx.llm.push_reply("Run the installer.");
    fx.engine
        .answer_question(&AnswerRequest {
            question_id: q.id.clone(),
            answer: "Run the installer.".to_string(),
            image_urls: Vec::new(),
            is_edit: false,
        })
        .await
        .unwrap();

    // A decoy document wins the lexical match but is orthogonal in vector
    // space, so the vector confirmation lands on the synthetic answer.
    fx.search
        .store(
            "decoy",
            &[chunk("decoy", 0, "how is the product installed", "", vec![0.0, 1.0])],
        )
        .await
        .unwrap();

    let generate_before = fx.llm.total_calls();
    let response = fx
        .engine
        .query(&kb_request("how is the product installed"))
        .await
        .unwrap();

    assert_eq!(response.answer, "Run the installer.");
    assert_eq!(fx.llm.total_calls(), generate_before);
    assert_eq!(fx.embedding.embed_calls(), 1, "embedding cost only");
}

#[tokio::test]
async fn test_tier2_synthesis_with_sources() {
    let embedding = MockEmbeddingService::new()
        .with_vector("what is the warranty period", vec![1.0, 0.0]);
    let llm = MockLlmService::new().with_default_reply("The warranty lasts two years.");
    let fx = fixture_with(Config::default(), embedding, llm).await;

    fx.search
        .chunk_store()
        .insert_document(&DocumentRecord::new("manual", "Manual", "text", ""))
        .await
        .unwrap();
    fx.search
        .store(
            "manual",
            &[chunk("manual", 0, "The warranty period is two years.", "", vec![1.0, 0.0])],
        )
        .await
        .unwrap();

    let response = fx
        .engine
        .query(&kb_request("what is the warranty period"))
        .await
        .unwrap();

    assert_eq!(response.answer, "The warranty lasts two years.");
    assert!(!response.is_pending);
    assert!(response.allow_download);
    assert_eq!(response.sources.len(), 1);
    assert_eq!(response.sources[0].document_id, "manual");
    assert_eq!(response.sources[0].document_type, "text");
    assert_eq!(response.sources[0].snippet, "The warranty period is two years.");

    let calls = fx.llm.recorded();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].context[0].contains("warranty period"));
}

#[tokio::test]
async fn test_unable_answer_keeps_text_and_escalates() {
    let embedding =
        MockEmbeddingService::new().with_vector("does it support linux", vec![1.0, 0.0]);
    let fx = fixture_with(Config::default(), embedding, MockLlmService::new()).await;

    fx.search
        .store(
            "manual",
            &[chunk("manual", 0, "Windows and macOS are supported.", "", vec![1.0, 0.0])],
        )
        .await
        .unwrap();

    fx.llm.push_reply("抱歉，参考资料中没有相关信息。");
    fx.llm.push_reply("已转接人工客服。");

    let response = fx
        .engine
        .query(&kb_request("does it support linux"))
        .await
        .unwrap();

    assert!(response.is_pending);
    assert_eq!(response.answer, "抱歉，参考资料中没有相关信息。");
    assert_eq!(response.message, "已转接人工客服。");
    assert!(!response.allow_download);
    assert_eq!(fx.pending.list(Some("pending"), None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_intent_greeting_returns_translated_intro() {
    let mut config = Config::default();
    config.product_intro = "欢迎使用本产品！".to_string();
    let fx = fixture_with(config, MockEmbeddingService::new(), MockLlmService::new()).await;

    fx.llm.push_reply(r#"{"intent": "greeting"}"#);
    fx.llm.push_reply("Welcome to the product!");

    let mut request = kb_request("hello there");
    request.product_type = String::new();
    let response = fx.engine.query(&request).await.unwrap();

    assert_eq!(response.answer, "Welcome to the product!");
    assert!(response.sources.is_empty());
    assert!(!response.is_pending);
    assert_eq!(fx.embedding.embed_calls(), 0, "greeting never embeds");
}

#[tokio::test]
async fn test_intent_irrelevant_returns_refusal() {
    let fx = fixture().await;
    fx.llm
        .push_reply(r#"{"intent": "irrelevant", "reason": "asks about the weather"}"#);
    fx.llm.push_reply("Sorry, that is unrelated to this product.");

    let mut request = kb_request("will it rain tomorrow");
    request.product_type = String::new();
    let response = fx.engine.query(&request).await.unwrap();

    assert_eq!(response.answer, "Sorry, that is unrelated to this product.");
    assert!(!response.is_pending);
    assert!(response.sources.is_empty());
}

#[tokio::test]
async fn test_intent_parse_failure_falls_through_to_retrieval() {
    let embedding = MockEmbeddingService::new().with_vector("warranty length", vec![1.0, 0.0]);
    let llm = MockLlmService::new().with_default_reply("Two years.");
    let fx = fixture_with(Config::default(), embedding, llm).await;

    fx.search
        .store("manual", &[chunk("manual", 0, "Warranty is two years.", "", vec![1.0, 0.0])])
        .await
        .unwrap();

    fx.llm.push_reply("hmm, probably a product question");

    let mut request = kb_request("warranty length");
    request.product_type = String::new();
    let response = fx.engine.query(&request).await.unwrap();

    assert_eq!(response.answer, "Two years.");
    // One intent attempt plus one synthesis.
    assert_eq!(fx.llm.generate_calls(), 2);
}

#[tokio::test]
async fn test_image_query_fuses_and_uses_image_prompt() {
    let image_data = "data:image/png;base64,AAAA";
    let embedding = MockEmbeddingService::new()
        .with_vector("what is shown on this screen", vec![1.0, 0.0])
        .with_vector(image_data, vec![0.0, 1.0]);
    let fx = fixture_with(Config::default(), embedding, MockLlmService::new()).await;

    let mut screen = chunk("ui", 0, "The settings screen lists accounts.", "", vec![0.0, 1.0]);
    screen.image_url = "https://img.example/settings.png".to_string();
    fx.search
        .store(
            "ui",
            &[chunk("ui", 1, "General product overview.", "", vec![1.0, 0.0]), screen],
        )
        .await
        .unwrap();

    let mut request = kb_request("what is shown on this screen");
    request.product_type = String::new(); // image still bypasses intent
    request.image_data = Some(image_data.to_string());

    let response = fx.engine.query(&request).await.unwrap();
    assert!(!response.is_pending);
    assert_eq!(fx.embedding.image_calls(), 1);
    assert_eq!(fx.llm.image_generate_calls(), 1);
    assert_eq!(fx.llm.generate_calls(), 0, "intent must be bypassed");

    let call = &fx.llm.recorded()[0];
    assert_eq!(call.system_prompt, prompts::RAG_SYSTEM_PROMPT_WITH_IMAGE);
    assert!(call.context.iter().any(|c| c.contains("(image attached)")));
    assert_eq!(call.image_data_url.as_deref(), Some(image_data));

    // Both the text hit and the image hit made it into the results.
    assert_eq!(response.sources.len(), 2);
}

#[tokio::test]
async fn test_relaxed_fallback_accepts_moderate_match() {
    let embedding = MockEmbeddingService::new()
        .with_vector("side question", vec![0.5, 0.866_025_4]);
    let llm = MockLlmService::new().with_default_reply("Partially covered.");
    let mut config = Config::default();
    config.vector.debug_mode = true;
    let fx = fixture_with(config, embedding, llm).await;

    // cos = 0.5: below the 0.6 primary threshold, above the 0.3 relaxed floor.
    fx.search
        .store("doc", &[chunk("doc", 0, "tangential content", "", vec![1.0, 0.0])])
        .await
        .unwrap();

    let response = fx.engine.query(&kb_request("side question")).await.unwrap();
    assert_eq!(response.answer, "Partially covered.");
    assert_eq!(response.sources.len(), 1);

    let debug = response.debug_info.expect("debug mode on");
    assert!(debug.relaxed_search);
    assert_eq!(debug.relaxed_results.len(), 1);
    assert_eq!(debug.result_count, 1);
    assert!(!debug.steps.is_empty());
    assert_eq!(debug.top_k, 5);
}

#[tokio::test]
async fn test_update_services_clears_embedding_cache() {
    let embedding = MockEmbeddingService::new().with_vector("repeat question", vec![1.0, 0.0]);
    let fx = fixture_with(Config::default(), embedding, MockLlmService::new()).await;

    fx.search
        .store("doc", &[chunk("doc", 0, "content", "", vec![1.0, 0.0])])
        .await
        .unwrap();

    fx.engine.query(&kb_request("repeat question")).await.unwrap();
    fx.engine.query(&kb_request("repeat question")).await.unwrap();
    assert_eq!(fx.embedding.embed_calls(), 1, "second query hits the cache");

    // Swapping providers must drop the cache: the new provider sees the
    // question once even though the text is unchanged.
    let replacement = Arc::new(
        MockEmbeddingService::new().with_vector("repeat question", vec![1.0, 0.0]),
    );
    fx.engine
        .update_services(
            Arc::clone(&replacement),
            Arc::new(MockLlmService::new()),
            Arc::new(Config::default()),
        )
        .await;

    fx.engine.query(&kb_request("repeat question")).await.unwrap();
    assert_eq!(replacement.embed_calls(), 1);
}

#[tokio::test]
async fn test_create_pending_question_dedups() {
    let fx = fixture().await;
    let first = fx
        .engine
        .create_pending_question("How do I reset my password?", "u1", None, "")
        .await
        .unwrap();
    let second = fx
        .engine
        .create_pending_question("how do i reset password", "u2", None, "")
        .await
        .unwrap();
    assert_eq!(first.id, second.id, "similar question reuses the open row");

    let third = fx
        .engine
        .create_pending_question("billing question about invoices", "u3", None, "")
        .await
        .unwrap();
    assert_ne!(first.id, third.id);
}

#[tokio::test]
async fn test_add_knowledge_is_searchable() {
    let fx = fixture().await;
    let doc_id = fx
        .engine
        .add_knowledge(
            "怎么申请退款",
            "在订单详情页点击申请退款。",
            &["https://img.example/refund.png".to_string()],
            "p1",
        )
        .await
        .unwrap();

    let combined = "问题：怎么申请退款\n回答：在订单详情页点击申请退款。";
    let query = fx.embedding.embed(combined).await.unwrap();
    let results = fx.search.search(&query, 5, 0.9, "p1").await.unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].document_id, doc_id);

    let docs = fx
        .search
        .chunk_store()
        .documents_by_ids(&[doc_id.clone()])
        .await
        .unwrap();
    assert_eq!(docs[&doc_id].doc_type, "qa");

    let images = fx
        .search
        .chunk_store()
        .images_for_documents(&[doc_id.clone()])
        .await
        .unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].chunk_index, 1000);
}

#[tokio::test]
async fn test_add_knowledge_rejects_too_many_images() {
    let fx = fixture().await;
    let images: Vec<String> = (0..51).map(|i| format!("https://img/{i}")).collect();
    let err = fx
        .engine
        .add_knowledge("q", "a", &images, "")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::TooManyImages { count: 51, .. }));
}

#[tokio::test]
async fn test_supplemental_images_added_when_results_have_none() {
    let embedding = MockEmbeddingService::new().with_vector("how to configure", vec![1.0, 0.0]);
    let fx = fixture_with(Config::default(), embedding, MockLlmService::new()).await;

    let mut diagram = chunk("guide", 5, "Configuration diagram.", "", vec![0.0, 1.0]);
    diagram.image_url = "https://img.example/diagram.png".to_string();
    fx.search
        .store(
            "guide",
            &[chunk("guide", 0, "Open the configuration file.", "", vec![1.0, 0.0]), diagram],
        )
        .await
        .unwrap();

    let response = fx.engine.query(&kb_request("how to configure")).await.unwrap();

    // The text chunk is the only retrieval hit; its document's image chunk
    // is appended as a supplemental source.
    assert_eq!(response.sources.len(), 2);
    assert_eq!(response.sources[0].image_url, "");
    assert_eq!(response.sources[1].chunk_index, 5);
    assert_eq!(response.sources[1].image_url, "https://img.example/diagram.png");
}
