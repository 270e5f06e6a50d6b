//! Tolerant JSON recovery for model output.
//!
//! Models wrap JSON in markdown fences or chatter around it; the
//! pipeline's fail-open contract only cares whether a well-formed object
//! can be recovered at all.

use serde::de::DeserializeOwned;

/// Parse a model response as `T`, trying the raw text, then the text
/// with markdown code fences stripped, then the outermost `{…}` slice.
/// `None` means no recovery attempt produced valid JSON.
pub(crate) fn parse_model_json<T: DeserializeOwned>(raw: &str) -> Option<T> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }
    if let Some(unfenced) = strip_fences(trimmed)
        && let Ok(value) = serde_json::from_str(unfenced)
    {
        return Some(value);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if start < end {
        return serde_json::from_str(&trimmed[start..=end]).ok();
    }
    None
}

fn strip_fences(text: &str) -> Option<&str> {
    let rest = text.strip_prefix("```")?;
    // Drop an optional language tag on the opening fence line.
    let rest = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    Some(rest.trim_end().trim_end_matches("```").trim())
}

#[cfg(test)]
mod tests {
    use super::parse_model_json;

    #[derive(serde::Deserialize, PartialEq, Debug)]
    struct Probe {
        value: i32,
    }

    #[test]
    fn parses_plain_json() {
        let probe: Probe = parse_model_json("{\"value\": 3}").unwrap();
        assert_eq!(probe.value, 3);
    }

    #[test]
    fn parses_fenced_json_with_language_tag() {
        let raw = "```json\n{\"value\": 7}\n```";
        let probe: Probe = parse_model_json(raw).unwrap();
        assert_eq!(probe.value, 7);
    }

    #[test]
    fn parses_json_embedded_in_chatter() {
        let raw = "Sure! Here is the result: {\"value\": 9} Hope that helps.";
        let probe: Probe = parse_model_json(raw).unwrap();
        assert_eq!(probe.value, 9);
    }

    #[test]
    fn garbage_yields_none() {
        assert!(parse_model_json::<Probe>("no json here").is_none());
        assert!(parse_model_json::<Probe>("{\"value\": }").is_none());
    }
}
