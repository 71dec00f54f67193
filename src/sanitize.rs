//! Redaction of secret-bearing values before any sink observes them (spec §4.2).
//!
//! Sanitizers must run before any log handler or audit emitter is
//! constructed that could observe argv or a URL. Sanitization never
//! mutates its input; it returns copies.

use std::collections::HashSet;
use std::sync::LazyLock;

/// Literal substituted for a redacted value.
pub const REDACTED: &str = "[REDACTED]";

/// Minimum sensitive query-param / map-key name set (spec §4.2), matched
/// case-insensitively.
static SENSITIVE_NAMES: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "password",
        "access_password",
        "secret",
        "access_secret",
        "token",
        "access_token",
        "refresh_token",
        "auth",
        "authorization",
        "sig",
        "signature",
        "api_key",
        "apikey",
        "key",
    ]
    .into_iter()
    .collect()
});

/// Minimum sensitive argv-flag set (spec §4.2). `--username` is included
/// because it is PII, not a secret, but is still worth redacting in audit
/// trails.
static SENSITIVE_FLAGS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "-p",
        "--password",
        "--access-password",
        "--access-secret",
        "-k",
        "--access-key",
        "--access-key-id",
        "--token",
        "--username",
    ]
    .into_iter()
    .collect()
});

fn is_sensitive_name(name: &str) -> bool {
    SENSITIVE_NAMES.contains(name.to_ascii_lowercase().as_str())
}

/// Redact values of sensitive query parameters in a URL or bare query
/// string. Parameter order, names, and every other character (including
/// non-sensitive values) are preserved. Single-pass scan: if no `?` is
/// present, or no parameter name matches, the input is returned unchanged
/// without a full URL re-parse.
pub fn sanitize_query_params(url_or_query: &str) -> String {
    let (prefix, query) = match url_or_query.split_once('?') {
        Some((p, q)) => (Some(p), q),
        None => (None, url_or_query),
    };

    if !query
        .split('&')
        .any(|pair| pair.split_once('=').is_some_and(|(k, _)| is_sensitive_name(k)))
    {
        return url_or_query.to_string();
    }

    let rebuilt: Vec<String> = query
        .split('&')
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) if is_sensitive_name(k) => format!("{k}={REDACTED}"),
            _ => pair.to_string(),
        })
        .collect();

    match prefix {
        Some(p) => format!("{p}?{}", rebuilt.join("&")),
        None => rebuilt.join("&"),
    }
}

/// Walk an argument vector, replacing the positional value following a
/// sensitive flag with `[REDACTED]`. Returns a new vector; the input is
/// untouched.
pub fn sanitize_argv(argv: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(argv.len());
    let mut redact_next = false;
    for arg in argv {
        if redact_next {
            out.push(REDACTED.to_string());
            redact_next = false;
            continue;
        }
        if SENSITIVE_FLAGS.contains(arg.as_str()) {
            redact_next = true;
        }
        out.push(arg.clone());
    }
    out
}

/// Recursively redact the values of sensitive keys in a JSON-like map/list
/// structure.
pub fn sanitize_map(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                if is_sensitive_name(k) {
                    out.insert(k.clone(), serde_json::Value::String(REDACTED.to_string()));
                } else {
                    out.insert(k.clone(), sanitize_map(v));
                }
            }
            serde_json::Value::Object(out)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(sanitize_map).collect())
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_sensitive_query_params_case_insensitive() {
        let url = "https://eln.example/api/users/user_info?access_key_id=AK&SIG=DEADBEEF&ts=123";
        let sanitized = sanitize_query_params(url);
        assert_eq!(
            sanitized,
            "https://eln.example/api/users/user_info?access_key_id=[REDACTED]&SIG=[REDACTED]&ts=123"
        );
    }

    #[test]
    fn preserves_non_sensitive_params_and_order() {
        let url = "https://x/y?uid=U1&notebook_id=N1&page=2";
        assert_eq!(sanitize_query_params(url), url);
    }

    #[test]
    fn sanitizing_twice_is_a_no_op() {
        let url = "https://x/y?token=abc&uid=U1";
        let once = sanitize_query_params(url);
        let twice = sanitize_query_params(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn redacts_argv_values_after_sensitive_flags() {
        let argv = vec![
            "eln-mcp-bridge".to_string(),
            "--access-key-id".to_string(),
            "AK123".to_string(),
            "--password".to_string(),
            "hunter2".to_string(),
            "--verbose".to_string(),
        ];
        let sanitized = sanitize_argv(&argv);
        assert_eq!(
            sanitized,
            vec!["eln-mcp-bridge", "--access-key-id", "[REDACTED]", "--password", "[REDACTED]", "--verbose"]
        );
    }

    #[test]
    fn sanitize_argv_does_not_mutate_input() {
        let argv = vec!["--token".to_string(), "secretvalue".to_string()];
        let _ = sanitize_argv(&argv);
        assert_eq!(argv[1], "secretvalue");
    }

    #[test]
    fn sanitize_map_recurses_into_nested_structures() {
        let value = serde_json::json!({
            "user": "alice",
            "auth": { "token": "abc123", "ts": 1 },
            "items": [{"secret": "s1"}, {"ok": "v"}]
        });
        let sanitized = sanitize_map(&value);
        assert_eq!(sanitized["user"], "alice");
        assert_eq!(sanitized["auth"], "[REDACTED]");
        assert_eq!(sanitized["items"][0]["secret"], "[REDACTED]");
        assert_eq!(sanitized["items"][1]["ok"], "v");
    }

    #[test]
    fn grep_for_literal_secret_values_yields_zero_hits() {
        let url = "https://eln.example/api/users/user_info?access_key_id=AK&sig=DEADBEEF&ts=123";
        let sanitized = sanitize_query_params(url);
        assert!(!sanitized.contains("DEADBEEF"));
    }
}
