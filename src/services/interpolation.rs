//! Step template interpolation
//!
//! Resolves `${path.to.value}` tokens in a step command against the
//! trigger payload. Tokens whose path does not resolve are left verbatim.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"\$\{([\w.]+)\}").unwrap()
});

/// Look up a dot-separated path in a nested JSON object
pub fn lookup_path<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(payload, |value, key| value.as_object()?.get(key))
        .filter(|value| !value.is_null())
}

/// Render a resolved value the way it should appear in a shell command
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Substitute every resolvable `${...}` token in `template`
pub fn interpolate(template: &str, payload: &Value) -> String {
    TOKEN_RE
        .replace_all(template, |caps: &Captures| match lookup_path(payload, &caps[1]) {
            Some(value) => render(value),
            None => caps[0].to_string(),
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolves_nested_value() {
        let payload = json!({"env": {"name": "prod"}});
        assert_eq!(interpolate("deploy ${env.name}", &payload), "deploy prod");
    }

    #[test]
    fn test_missing_path_left_verbatim() {
        let payload = json!({"env": {"name": "prod"}});
        assert_eq!(
            interpolate("deploy ${env.missing}", &payload),
            "deploy ${env.missing}"
        );
    }

    #[test]
    fn test_path_through_non_object_left_verbatim() {
        let payload = json!({"env": "prod"});
        assert_eq!(interpolate("x ${env.name}", &payload), "x ${env.name}");
    }

    #[test]
    fn test_multiple_tokens_and_scalars() {
        let payload = json!({"branch": "main", "build": {"number": 42, "dry": true}});
        assert_eq!(
            interpolate(
                "git checkout ${branch} && ./ci ${build.number} --dry=${build.dry}",
                &payload
            ),
            "git checkout main && ./ci 42 --dry=true"
        );
    }

    #[test]
    fn test_null_value_left_verbatim() {
        let payload = json!({"tag": null});
        assert_eq!(interpolate("push ${tag}", &payload), "push ${tag}");
    }

    #[test]
    fn test_non_object_payload() {
        assert_eq!(interpolate("echo ${a}", &Value::Null), "echo ${a}");
        assert_eq!(interpolate("echo plain", &json!([1, 2])), "echo plain");
    }

    #[test]
    fn test_same_token_repeated() {
        let payload = json!({"v": "1.2"});
        assert_eq!(interpolate("${v}-${v}", &payload), "1.2-1.2");
    }
}
