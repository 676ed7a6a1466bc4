use anyhow::{anyhow, Result};
use serde::de::DeserializeOwned;

/// Parse a JSON payload out of free-form model output.
///
/// Tries, in order: the text as-is, the body of a markdown code fence, the span between
/// the first opening and last closing brace. Each candidate is parsed strictly, then with
/// raw newlines escaped and unbalanced brackets closed, then with `json5`.
pub fn parse_model_json<T: DeserializeOwned>(payload: &str) -> Result<T> {
    let mut last_err = None;
    for candidate in candidates(payload) {
        match parse_candidate::<T>(&candidate) {
            Ok(value) => return Ok(value),
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow!("model output was empty")))
}

fn candidates(payload: &str) -> Vec<String> {
    let trimmed = payload.trim();
    let mut out = Vec::new();
    if trimmed.is_empty() {
        return out;
    }
    out.push(trimmed.to_string());
    if let Some(fenced) = strip_code_fence(trimmed) {
        out.push(fenced.to_string());
    }
    let open = trimmed.find(['{', '[']);
    let close = trimmed.rfind(['}', ']']);
    if let (Some(start), Some(end)) = (open, close) {
        if start < end {
            let span = &trimmed[start..=end];
            if span != trimmed {
                out.push(span.to_string());
            }
        }
    }
    out
}

fn strip_code_fence(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    let body_start = after.find('\n')? + 1;
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

fn parse_candidate<T: DeserializeOwned>(payload: &str) -> Result<T> {
    if let Ok(value) = serde_json::from_str::<T>(payload) {
        return Ok(value);
    }
    let sanitized = sanitize_json_strings(payload);
    if sanitized != payload {
        if let Ok(value) = serde_json::from_str::<T>(&sanitized) {
            return Ok(value);
        }
    }
    let value: serde_json::Value = json5::from_str(&sanitized)
        .map_err(|err| anyhow!("model output is not valid JSON: {err}"))?;
    serde_json::from_value(value)
        .map_err(|err| anyhow!("model JSON does not match the expected shape: {err}"))
}

fn sanitize_json_strings(payload: &str) -> String {
    let mut result = String::with_capacity(payload.len());
    let mut in_string = false;
    let mut escape = false;

    for ch in payload.chars() {
        if in_string {
            if escape {
                result.push(ch);
                escape = false;
            } else {
                match ch {
                    '\\' => {
                        result.push(ch);
                        escape = true;
                    }
                    '"' => {
                        result.push(ch);
                        in_string = false;
                    }
                    '\n' => {
                        result.push('\\');
                        result.push('n');
                    }
                    _ => result.push(ch),
                }
            }
        } else {
            result.push(ch);
            if ch == '"' {
                in_string = true;
            }
        }
    }

    if in_string {
        result.push('"');
    }

    let open_brackets = result.chars().filter(|&c| c == '[').count();
    let close_brackets = result.chars().filter(|&c| c == ']').count();
    for _ in close_brackets..open_brackets {
        result.push(']');
    }

    let open_braces = result.chars().filter(|&c| c == '{').count();
    let close_braces = result.chars().filter(|&c| c == '}').count();
    for _ in close_braces..open_braces {
        result.push('}');
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        label: String,
        #[serde(default)]
        items: Vec<String>,
    }

    #[test]
    fn parses_plain_json() {
        let sample: Sample = parse_model_json(r#"{"label":"ok","items":["a"]}"#).unwrap();
        assert_eq!(sample.label, "ok");
        assert_eq!(sample.items, vec!["a"]);
    }

    #[test]
    fn parses_fenced_json() {
        let payload = "Here you go:\n```json\n{\"label\": \"fenced\"}\n```\n";
        let sample: Sample = parse_model_json(payload).unwrap();
        assert_eq!(sample.label, "fenced");
    }

    #[test]
    fn parses_json_surrounded_by_prose() {
        let payload = "Analysis follows {\"label\": \"inline\"} hope this helps";
        let sample: Sample = parse_model_json(payload).unwrap();
        assert_eq!(sample.label, "inline");
    }

    #[test]
    fn parses_relaxed_json5() {
        let payload = "{label: 'relaxed', items: ['x',],}";
        let sample: Sample = parse_model_json(payload).unwrap();
        assert_eq!(sample.label, "relaxed");
        assert_eq!(sample.items, vec!["x"]);
    }

    #[test]
    fn repairs_raw_newlines_and_truncation() {
        let payload = "{\"label\": \"line one\nline two\", \"items\": [\"a\"";
        let sample: Sample = parse_model_json(payload).unwrap();
        assert_eq!(sample.label, "line one\nline two");
    }

    #[test]
    fn rejects_prose() {
        let err = parse_model_json::<Sample>("I could not analyse this file.").unwrap_err();
        assert!(err.to_string().contains("JSON"));
    }

    #[test]
    fn rejects_empty_output() {
        assert!(parse_model_json::<Sample>("   ").is_err());
    }
}
