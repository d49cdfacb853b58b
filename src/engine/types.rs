//! Query request and response shapes.
//!
//! The serialized key names of [`SourceRef`], [`QueryResponse`], and
//! [`DebugInfo`] are part of the wire contract.

use serde::Serialize;

/// An end-user question entering the pipeline.
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub question: String,
    pub user_id: String,
    /// Partition (tenant) scope; empty searches everything.
    pub partition: String,
    /// Product type; `knowledge_base` bypasses intent routing.
    pub product_type: String,
    /// User-attached image as a data URL. Its presence also bypasses
    /// intent routing and enables image-query fusion.
    pub image_data: Option<String>,
}

impl QueryRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Self::default()
        }
    }
}

/// Source attribution for one retrieved chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRef {
    pub document_id: String,
    pub document_name: String,
    pub document_type: String,
    pub chunk_index: i64,
    /// First 100 characters of the chunk text.
    pub snippet: String,
    pub image_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<f64>,
}

/// The pipeline's reply.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    /// The question was (or already is) queued for a human.
    pub is_pending: bool,
    pub allow_download: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_info: Option<DebugInfo>,
}

/// One scored result in debug output.
#[derive(Debug, Clone, Serialize)]
pub struct DebugResult {
    pub document_id: String,
    pub score: f64,
    pub snippet: String,
}

/// Per-query pipeline diagnostics, attached when `vector.debug_mode` is on.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DebugInfo {
    pub intent: String,
    pub vector_dim: usize,
    pub top_k: usize,
    pub threshold: f32,
    pub result_count: usize,
    pub relaxed_search: bool,
    pub relaxed_results: Vec<DebugResult>,
    pub top_results: Vec<DebugResult>,
    pub llm_unable_answer: bool,
    pub steps: Vec<String>,
}

/// Routed intent of a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Greeting,
    Product,
    Irrelevant,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::Product => "product",
            Self::Irrelevant => "irrelevant",
        }
    }
}

/// Parses the intent classifier's JSON reply, tolerating code fences and
/// prose around the object. `None` means the reply was unusable and the
/// pipeline falls through to retrieval.
pub(crate) fn parse_intent(reply: &str) -> Option<(Intent, Option<String>)> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end <= start {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(&reply[start..=end]).ok()?;

    let intent = match value.get("intent")?.as_str()? {
        "greeting" => Intent::Greeting,
        "product" => Intent::Product,
        "irrelevant" => Intent::Irrelevant,
        _ => return None,
    };
    let reason = value
        .get("reason")
        .and_then(|r| r.as_str())
        .map(str::to_string);
    Some((intent, reason))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_intent_plain_json() {
        let (intent, reason) =
            parse_intent(r#"{"intent": "greeting"}"#).unwrap();
        assert_eq!(intent, Intent::Greeting);
        assert!(reason.is_none());
    }

    #[test]
    fn test_parse_intent_with_fence_and_reason() {
        let reply = "```json\n{\"intent\": \"irrelevant\", \"reason\": \"asks about weather\"}\n```";
        let (intent, reason) = parse_intent(reply).unwrap();
        assert_eq!(intent, Intent::Irrelevant);
        assert_eq!(reason.as_deref(), Some("asks about weather"));
    }

    #[test]
    fn test_parse_intent_garbage_is_none() {
        assert!(parse_intent("certainly! the intent is greeting").is_none());
        assert!(parse_intent(r#"{"intent": "banana"}"#).is_none());
        assert!(parse_intent("").is_none());
    }
}
