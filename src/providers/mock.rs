//! Scripted in-memory providers for tests and examples.
//!
//! `MockEmbeddingService` derives a deterministic vector from the input
//! text unless an explicit vector was registered, so identical texts
//! always embed identically within one mock instance.
//! `MockLlmService` replays scripted replies in order, falling back to a
//! default, and records every call for assertions.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::{EmbeddingService, LlmService, ProviderError, ProviderResult};
use crate::constants::MAX_EMBED_BATCH;

const DEFAULT_MOCK_DIM: usize = 8;

/// Deterministic embedding provider.
pub struct MockEmbeddingService {
    dim: usize,
    vectors: Mutex<HashMap<String, Vec<f32>>>,
    fail: AtomicBool,
    embed_calls: AtomicUsize,
    batch_calls: AtomicUsize,
    image_calls: AtomicUsize,
}

impl Default for MockEmbeddingService {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEmbeddingService {
    pub fn new() -> Self {
        Self::with_dim(DEFAULT_MOCK_DIM)
    }

    pub fn with_dim(dim: usize) -> Self {
        Self {
            dim,
            vectors: Mutex::new(HashMap::new()),
            fail: AtomicBool::new(false),
            embed_calls: AtomicUsize::new(0),
            batch_calls: AtomicUsize::new(0),
            image_calls: AtomicUsize::new(0),
        }
    }

    /// Registers an explicit vector for a text, overriding the
    /// deterministic synthesis.
    pub fn with_vector(self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.lock().insert(text.to_string(), vector);
        self
    }

    /// Makes every subsequent call fail with a 500.
    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    pub fn image_calls(&self) -> usize {
        self.image_calls.load(Ordering::SeqCst)
    }

    fn check_failure(&self) -> ProviderResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ProviderError::Api {
                status: 500,
                message: "mock embedding failure".to_string(),
            });
        }
        Ok(())
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        if let Some(v) = self.vectors.lock().get(text) {
            return v.clone();
        }
        synth_vector(text, self.dim)
    }
}

/// Deterministic pseudo-random unit-ish vector derived from a text.
fn synth_vector(text: &str, dim: usize) -> Vec<f32> {
    let mut state: u64 = 0xcbf2_9ce4_8422_2325;
    for b in text.as_bytes() {
        state ^= u64::from(*b);
        state = state.wrapping_mul(0x0000_0100_0000_01b3);
    }
    state |= 1;
    (0..dim)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state as f64 / u64::MAX as f64 * 2.0 - 1.0) as f32
        })
        .collect()
}

impl EmbeddingService for MockEmbeddingService {
    async fn embed(&self, text: &str) -> ProviderResult<Vec<f32>> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        Ok(self.vector_for(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> ProviderResult<Vec<Vec<f32>>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        if texts.len() > MAX_EMBED_BATCH {
            return Err(ProviderError::BatchTooLarge {
                len: texts.len(),
                max: MAX_EMBED_BATCH,
            });
        }
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    async fn embed_image_url(&self, image_url: &str) -> ProviderResult<Vec<f32>> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        Ok(self.vector_for(image_url))
    }
}

/// Scripted generative provider.
pub struct MockLlmService {
    replies: Mutex<VecDeque<String>>,
    default_reply: String,
    fail: AtomicBool,
    generate_calls: AtomicUsize,
    image_generate_calls: AtomicUsize,
    seen: Mutex<Vec<MockLlmCall>>,
}

/// One recorded generation call.
#[derive(Debug, Clone)]
pub struct MockLlmCall {
    pub system_prompt: String,
    pub context: Vec<String>,
    pub question: String,
    pub image_data_url: Option<String>,
}

impl Default for MockLlmService {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLlmService {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            default_reply: "Based on the reference material: the answer is 42.".to_string(),
            fail: AtomicBool::new(false),
            generate_calls: AtomicUsize::new(0),
            image_generate_calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn with_default_reply(mut self, reply: &str) -> Self {
        self.default_reply = reply.to_string();
        self
    }

    /// Queues a reply consumed before the default kicks in.
    pub fn push_reply(&self, reply: &str) {
        self.replies.lock().push_back(reply.to_string());
    }

    /// Makes every subsequent call fail with a 500.
    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn image_generate_calls(&self) -> usize {
        self.image_generate_calls.load(Ordering::SeqCst)
    }

    /// Total calls of either kind.
    pub fn total_calls(&self) -> usize {
        self.generate_calls() + self.image_generate_calls()
    }

    pub fn recorded(&self) -> Vec<MockLlmCall> {
        self.seen.lock().clone()
    }

    fn next_reply(&self) -> ProviderResult<String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ProviderError::Api {
                status: 500,
                message: "mock generation failure".to_string(),
            });
        }
        Ok(self
            .replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_reply.clone()))
    }
}

impl LlmService for MockLlmService {
    async fn generate(
        &self,
        system_prompt: &str,
        context: &[String],
        question: &str,
    ) -> ProviderResult<String> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(MockLlmCall {
            system_prompt: system_prompt.to_string(),
            context: context.to_vec(),
            question: question.to_string(),
            image_data_url: None,
        });
        self.next_reply()
    }

    async fn generate_with_image(
        &self,
        system_prompt: &str,
        context: &[String],
        question: &str,
        image_data_url: &str,
    ) -> ProviderResult<String> {
        self.image_generate_calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(MockLlmCall {
            system_prompt: system_prompt.to_string(),
            context: context.to_vec(),
            question: question.to_string(),
            image_data_url: Some(image_data_url.to_string()),
        });
        self.next_reply()
    }
}
