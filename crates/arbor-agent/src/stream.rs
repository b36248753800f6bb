/// Events emitted while streaming a completion.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Incremental text content from the model.
    TextDelta { text: String },

    /// Stream completed successfully.
    Done { finish_reason: Option<String> },

    /// Error during streaming; no further events follow.
    Error { message: String },
}

/// Parse a single SSE line: `data: <json>` (other lines are ignored).
pub fn parse_sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_lines_are_extracted() {
        assert_eq!(parse_sse_data("data: {\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(parse_sse_data("data:{\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(parse_sse_data("event: done"), None);
        assert_eq!(parse_sse_data(""), None);
    }
}
