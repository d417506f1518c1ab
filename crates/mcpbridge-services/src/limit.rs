//! Size bounding for tool results.

use mcpbridge_core::{BridgeError, BridgeResult, CallToolResult, Content};
use tracing::warn;

/// Appended to any text that was cut.
pub const TRUNCATION_MARKER: &str = "\n\n[... output truncated ...]";

/// Default budget for the text content of one result.
pub const DEFAULT_MAX_RESULT_BYTES: usize = 10 * 1024 * 1024;

/// Longest prefix of `text` ending on a char boundary, at most `max` bytes.
fn prefix_within(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    // A UTF-8 sequence is at most 4 bytes, so the boundary is within 3 steps.
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Bound `text` to `budget` UTF-8 bytes, marker included.
///
/// Text that already fits is returned unchanged. When the budget cannot
/// even hold the marker, the bare prefix is returned.
pub fn truncate_text(text: &str, budget: usize) -> String {
    if text.len() <= budget {
        return text.to_string();
    }
    if budget < TRUNCATION_MARKER.len() {
        return prefix_within(text, budget).to_string();
    }
    let mut out = prefix_within(text, budget - TRUNCATION_MARKER.len()).to_string();
    out.push_str(TRUNCATION_MARKER);
    out
}

/// Caps the total text size of tool results.
#[derive(Debug, Clone, Copy)]
pub struct ResultLimiter {
    max_bytes: usize,
}

impl Default for ResultLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RESULT_BYTES)
    }
}

impl ResultLimiter {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Truncate text blocks so their combined size stays within the budget.
    ///
    /// Blocks are kept whole in order until one overflows; that block is cut
    /// and marked, later text blocks are dropped. Non-text content passes
    /// through untouched.
    pub fn limit(&self, result: CallToolResult) -> BridgeResult<CallToolResult> {
        let total = result.text_bytes();
        if total <= self.max_bytes {
            return Ok(result);
        }
        if self.max_bytes < TRUNCATION_MARKER.len() {
            return Err(BridgeError::ToolResultTooLarge(format!(
                "{total} bytes of text with a budget of {} bytes",
                self.max_bytes
            )));
        }

        warn!(bytes = total, limit = self.max_bytes, "Truncating oversized tool result");

        let mut remaining = self.max_bytes - TRUNCATION_MARKER.len();
        let mut truncated = false;
        let mut content = Vec::with_capacity(result.content.len());
        for block in result.content {
            match block {
                Content::Text { text } => {
                    if truncated {
                        continue;
                    }
                    if text.len() <= remaining {
                        remaining -= text.len();
                        content.push(Content::Text { text });
                    } else {
                        let mut cut = prefix_within(&text, remaining).to_string();
                        cut.push_str(TRUNCATION_MARKER);
                        content.push(Content::Text { text: cut });
                        truncated = true;
                    }
                }
                other => content.push(other),
            }
        }

        Ok(CallToolResult {
            content,
            is_error: result.is_error,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_untouched() {
        assert_eq!(truncate_text("hello", 100), "hello");
    }

    #[test]
    fn test_truncation_respects_budget_and_char_boundaries() {
        let text = "añ€😀".repeat(200);
        for budget in TRUNCATION_MARKER.len()..TRUNCATION_MARKER.len() + 40 {
            let out = truncate_text(&text, budget);
            assert!(out.len() <= budget, "budget {budget} gave {}", out.len());
            assert!(out.ends_with(TRUNCATION_MARKER));
            // Not shorter than needed: one more char would not fit.
            let prefix = &out[..out.len() - TRUNCATION_MARKER.len()];
            let next = text[prefix.len()..].chars().next().unwrap();
            assert!(prefix.len() + next.len_utf8() + TRUNCATION_MARKER.len() > budget);
        }
    }

    #[test]
    fn test_budget_below_marker_gives_bare_prefix() {
        let out = truncate_text("😀😀😀", 5);
        assert_eq!(out, "😀");
    }

    #[test]
    fn test_limit_multi_block() {
        let limiter = ResultLimiter::new(TRUNCATION_MARKER.len() + 8);
        let result = CallToolResult {
            content: vec![
                Content::text("12345"),
                Content::text("abcdefgh"),
                Content::text("dropped"),
            ],
            is_error: false,
        };
        let limited = limiter.limit(result).unwrap();
        assert!(limited.text_bytes() <= limiter.max_bytes());
        assert_eq!(limited.content.len(), 2);
        assert_eq!(limited.content[0].as_text(), Some("12345"));
        assert_eq!(
            limited.content[1].as_text().unwrap(),
            format!("abc{TRUNCATION_MARKER}")
        );
    }

    #[test]
    fn test_limit_passes_small_results() {
        let limiter = ResultLimiter::default();
        let result = CallToolResult::text("fine");
        assert_eq!(limiter.limit(result.clone()).unwrap(), result);
    }

    #[test]
    fn test_limit_rejects_tiny_budget() {
        let limiter = ResultLimiter::new(3);
        let err = limiter.limit(CallToolResult::text("too long")).unwrap_err();
        assert!(matches!(err, BridgeError::ToolResultTooLarge(_)));
    }
}
