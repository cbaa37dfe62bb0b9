//! Minimal `{{placeholder}}` rendering for generated configuration files.

use std::collections::BTreeMap;

use anyhow::{Context, Result};

/// Replace every `{{key}}` in `template` with `values[key]`.
///
/// Whitespace inside the braces is ignored. A placeholder without a value
/// or an unterminated `{{` is an error.
pub fn render(template: &str, values: &BTreeMap<&str, String>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .context(format!("Unterminated placeholder at byte {}", template.len() - rest.len() + start))?;

        let key = after[..end].trim();
        let value = values
            .get(key)
            .context(format!("No value for template placeholder \"{key}\""))?;
        out.push_str(value);
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render() {
        let values = BTreeMap::from([("chainId", "15468".to_string()), ("alloc", "{}".to_string())]);
        let rendered = render(r#"{"chainId": {{chainId}}, "alloc": {{ alloc }}}"#, &values).unwrap();
        assert_eq!(rendered, r#"{"chainId": 15468, "alloc": {}}"#);
    }

    #[test]
    fn test_render_without_placeholders() {
        assert_eq!(render("plain text", &BTreeMap::new()).unwrap(), "plain text");
    }

    #[test]
    fn test_unknown_placeholder() {
        let err = render("{{nope}}", &BTreeMap::new()).unwrap_err();
        assert_eq!(err.to_string(), "No value for template placeholder \"nope\"");
    }

    #[test]
    fn test_unterminated_placeholder() {
        assert!(render("ok {{chainId", &BTreeMap::new()).is_err());
    }
}
