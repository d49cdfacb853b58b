//! Prompt templates and canned messages.
//!
//! Every prompt instructs the model to reply in the language of the
//! user's question, which is how response translation happens implicitly
//! during synthesis. Canned messages are kept in the product's home
//! language and translated on the way out (with a timeout fallback to the
//! original).

/// Synthesis prompt for text-only context.
pub(crate) const RAG_SYSTEM_PROMPT: &str = "You are a product support assistant. Answer the \
user's question using only the reference material provided. Be concise and factual. If the \
reference material does not cover the question, say that no relevant information is available. \
Always reply in the same language as the user's question.";

/// Synthesis prompt when at least one retrieved chunk carries an image.
pub(crate) const RAG_SYSTEM_PROMPT_WITH_IMAGE: &str = "You are a product support assistant. \
Answer the user's question using only the reference material provided. Some reference entries \
include an image; when one supports your answer, refer to it as the attached image. Be concise \
and factual. If the reference material does not cover the question, say that no relevant \
information is available. Always reply in the same language as the user's question.";

/// Intent classifier prompt. The reply must be a JSON object.
pub(crate) const INTENT_PROMPT: &str = "Classify the user's message into one of three intents: \
\"greeting\" (a salutation or small talk), \"product\" (a question about the product), or \
\"irrelevant\" (unrelated to the product). Reply with only a JSON object of the form \
{\"intent\": \"greeting\" | \"product\" | \"irrelevant\", \"reason\": \"...\"}.";

/// Translation prompt; the context chunk carries the text to restate.
pub(crate) const TRANSLATE_PROMPT: &str = "Restate the text given in the reference material in \
the language of the user's question. Keep the meaning and tone unchanged. Reply with the \
restated text only.";

/// Canned handoff message, translated to the user's language on the way out.
pub(crate) const PENDING_MESSAGE: &str = "您的问题已转接人工客服，我们会尽快回复您。";

/// Canned refusal for irrelevant questions.
pub(crate) const REFUSAL_MESSAGE: &str = "抱歉，这个问题与本产品无关，我无法为您解答。";
