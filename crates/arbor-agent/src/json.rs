//! JSON extraction from LLM responses.
//!
//! Models asked for "JSON only" still wrap the payload in markdown fences
//! or prose often enough that every structured call goes through here
//! before parsing.

/// Extract the JSON payload from a raw model response: strips markdown
/// fences, otherwise falls back to the widest `{…}` or `[…]` span.
pub fn extract_json(raw: &str) -> &str {
    let trimmed = raw.trim();

    if let Some(fenced) = strip_fence(trimmed) {
        return fenced;
    }

    let object = span(trimmed, '{', '}');
    let array = span(trimmed, '[', ']');
    match (object, array) {
        (Some(o), Some(a)) => {
            // Prefer whichever opens first.
            if o.0 < a.0 {
                &trimmed[o.0..=o.1]
            } else {
                &trimmed[a.0..=a.1]
            }
        }
        (Some(o), None) => &trimmed[o.0..=o.1],
        (None, Some(a)) => &trimmed[a.0..=a.1],
        (None, None) => trimmed,
    }
}

fn strip_fence(text: &str) -> Option<&str> {
    let rest = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))?;
    let end = rest.rfind("```")?;
    Some(rest[..end].trim())
}

fn span(text: &str, open: char, close: char) -> Option<(usize, usize)> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end >= start).then_some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_json_passes_through() {
        assert_eq!(extract_json(r#"{"a": 1}"#), r#"{"a": 1}"#);
    }

    #[test]
    fn json_fence_is_stripped() {
        let raw = "```json\n{\"title\": \"t\"}\n```";
        assert_eq!(extract_json(raw), "{\"title\": \"t\"}");
    }

    #[test]
    fn bare_fence_is_stripped() {
        let raw = "```\n[1, 2]\n```";
        assert_eq!(extract_json(raw), "[1, 2]");
    }

    #[test]
    fn surrounding_prose_is_discarded() {
        let raw = "Sure! Here it is: {\"summary\": \"x\"} Hope that helps.";
        assert_eq!(extract_json(raw), "{\"summary\": \"x\"}");
    }

    #[test]
    fn array_before_object_wins() {
        let raw = "[{\"a\":1}]";
        assert_eq!(extract_json(raw), "[{\"a\":1}]");
    }
}
