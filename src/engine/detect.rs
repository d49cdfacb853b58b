//! "Unable to answer" detection.
//!
//! A case-insensitive substring scan of the generative reply against a
//! fixed phrase dictionary. A match escalates the question to the pending
//! queue while keeping the generative text as the answer. The dictionary
//! is a data contract of this component and is deliberately not
//! configurable.

/// Refusal phrases, lowercase. English and Chinese.
const UNABLE_PHRASES: &[&str] = &[
    "not mentioned",
    "no relevant information",
    "does not contain",
    "doesn't contain",
    "cannot answer",
    "can't answer",
    "unable to answer",
    "no information about",
    "not enough information",
    "未提及",
    "没有相关信息",
    "参考资料中没有",
    "无法回答",
    "没有提及",
    "无相关信息",
    "资料中未包含",
];

/// Whether a generative reply declines to answer.
pub fn is_unable_to_answer(reply: &str) -> bool {
    let lower = reply.to_lowercase();
    UNABLE_PHRASES.iter().any(|phrase| lower.contains(phrase))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_english_refusals() {
        assert!(is_unable_to_answer(
            "The provided material does not contain information about pricing."
        ));
        assert!(is_unable_to_answer("Sorry, I am UNABLE TO ANSWER this."));
        assert!(is_unable_to_answer(
            "This topic is not mentioned in the reference material."
        ));
    }

    #[test]
    fn test_detects_chinese_refusals() {
        assert!(is_unable_to_answer("抱歉，参考资料中没有这方面的内容。"));
        assert!(is_unable_to_answer("资料中未提及该功能。"));
        assert!(is_unable_to_answer("没有相关信息可供参考。"));
    }

    #[test]
    fn test_normal_answers_pass() {
        assert!(!is_unable_to_answer("To reset your password, open Settings."));
        assert!(!is_unable_to_answer("重置密码请前往设置页面。"));
        assert!(!is_unable_to_answer(""));
    }
}
