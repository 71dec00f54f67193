//! Authenticated upstream HTTP client: signing, retry/backoff, rate-limit
//! honoring, regional failover, and sanitized logging (spec §4.5).

use std::time::Duration;

use rand::Rng;
use reqwest::{Method, StatusCode};

use crate::auth::{AuthMode, Credentials, CredentialProvider};
use crate::error::{CoreError, CoreResult};
use crate::sanitize::sanitize_query_params;
use crate::signer;

/// HTTPClient tuning knobs (spec §4.5 Configuration). All fields have the
/// defaults spec §4.5 prescribes.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub base_url: String,
    pub backup_urls: Vec<String>,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: f64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            backup_urls: Vec::new(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

/// A parsed upstream response body, tolerant of either wire format (spec
/// §4.5 step 6, §4.7 edge case: XML vs JSON detected by `Content-Type` with
/// a content-sniff fallback when the header is absent).
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub body: serde_json::Value,
}

/// Upstream HTTP client. Owns connection pooling (via a single shared
/// `reqwest::Client`) and mediates authentication through a
/// `CredentialProvider` capability rather than owning an `AuthManager`
/// (spec §2.3).
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    config: HttpClientConfig,
    credentials: std::sync::Arc<dyn CredentialProvider>,
}

impl HttpClient {
    pub fn new(
        config: HttpClientConfig,
        credentials: std::sync::Arc<dyn CredentialProvider>,
    ) -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| CoreError::internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            config,
            credentials,
        })
    }

    /// Issue a signed GET request to `path` with `params`, retrying and
    /// failing over per spec §4.5.
    pub async fn get(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> CoreResult<UpstreamResponse> {
        let mut endpoints = Vec::with_capacity(1 + self.config.backup_urls.len());
        endpoints.push(self.config.base_url.clone());
        endpoints.extend(self.config.backup_urls.iter().cloned());

        let mut last_err = CoreError::internal("no endpoints configured");
        for (endpoint_index, base) in endpoints.iter().enumerate() {
            match self.attempt_budget(base, path, params).await {
                Ok(response) => return Ok(response),
                Err(FailoverSignal::Permanent(err)) => return Err(err),
                Err(FailoverSignal::Transient(err)) => {
                    last_err = err;
                    let is_last = endpoint_index == endpoints.len() - 1;
                    if !is_last {
                        tracing::warn!(
                            endpoint = %sanitize_query_params(base),
                            "endpoint exhausted retries, failing over to next regional endpoint"
                        );
                    }
                }
            }
        }
        Err(last_err)
    }

    /// Run the full retry-with-backoff budget against a single endpoint.
    /// Returns `Transient` when the caller should fail over to the next
    /// endpoint, `Permanent` when it should not (401/403/404/other 4xx).
    async fn attempt_budget(
        &self,
        base: &str,
        path: &str,
        params: &[(String, String)],
    ) -> Result<UpstreamResponse, FailoverSignal> {
        let total_attempts = 1 + self.config.max_retries;
        let mut backoff_ms = self.config.initial_backoff_ms;
        let mut reauthed_once = false;

        for attempt in 0..total_attempts {
            let credentials = self.credentials.current_credentials().await;
            let url = self.build_url(base, path, params, &credentials);

            tracing::debug!(url = %sanitize_query_params(&url), attempt, "issuing upstream request");

            let result = self.client.request(Method::GET, &url).send().await;

            match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return self
                            .parse_response(response)
                            .await
                            .map_err(FailoverSignal::Permanent);
                    }

                    match status {
                        StatusCode::UNAUTHORIZED if !reauthed_once => {
                            reauthed_once = true;
                            if let Err(e) = self.credentials.handle_unauthorized().await {
                                return Err(FailoverSignal::Permanent(e));
                            }
                            continue; // retry once, does not consume the retry budget
                        }
                        StatusCode::UNAUTHORIZED => {
                            return Err(FailoverSignal::Permanent(CoreError::Authentication(
                                "second consecutive 401 from upstream".to_string(),
                            )));
                        }
                        StatusCode::FORBIDDEN => {
                            return Err(FailoverSignal::Permanent(CoreError::UpstreamPermanent(
                                "permission denied by upstream".to_string(),
                            )));
                        }
                        StatusCode::NOT_FOUND => {
                            return Err(FailoverSignal::Permanent(CoreError::NotFound(
                                format!("upstream resource not found: {path}"),
                            )));
                        }
                        StatusCode::TOO_MANY_REQUESTS => {
                            let retry_after = response
                                .headers()
                                .get(reqwest::header::RETRY_AFTER)
                                .and_then(|v| v.to_str().ok())
                                .and_then(|v| v.parse::<u64>().ok());
                            if attempt + 1 >= total_attempts {
                                return Err(FailoverSignal::Permanent(
                                    CoreError::UpstreamRateLimited(
                                        "rate limited and retries exhausted".to_string(),
                                    ),
                                ));
                            }
                            let wait = retry_after
                                .map(|s| Duration::from_secs(s))
                                .unwrap_or_else(|| jittered(backoff_ms, self.config.jitter));
                            tokio::time::sleep(wait).await;
                            backoff_ms = next_backoff(backoff_ms, &self.config);
                        }
                        s if s.is_server_error() => {
                            if attempt + 1 >= total_attempts {
                                return Err(FailoverSignal::Transient(
                                    CoreError::UpstreamUnavailable(format!(
                                        "upstream returned {s} after exhausting retries"
                                    )),
                                ));
                            }
                            tokio::time::sleep(jittered(backoff_ms, self.config.jitter)).await;
                            backoff_ms = next_backoff(backoff_ms, &self.config);
                        }
                        s => {
                            return Err(FailoverSignal::Permanent(CoreError::UpstreamPermanent(
                                format!("upstream returned {s}"),
                            )));
                        }
                    }
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    if attempt + 1 >= total_attempts {
                        return Err(FailoverSignal::Transient(CoreError::UpstreamUnavailable(
                            format!("network error after exhausting retries: {e}"),
                        )));
                    }
                    tokio::time::sleep(jittered(backoff_ms, self.config.jitter)).await;
                    backoff_ms = next_backoff(backoff_ms, &self.config);
                }
                Err(e) => {
                    return Err(FailoverSignal::Transient(CoreError::UpstreamUnavailable(
                        format!("request error: {e}"),
                    )));
                }
            }
        }

        Err(FailoverSignal::Transient(CoreError::UpstreamUnavailable(
            "retry budget exhausted".to_string(),
        )))
    }

    fn build_url(
        &self,
        base: &str,
        path: &str,
        params: &[(String, String)],
        credentials: &Credentials,
    ) -> String {
        let mut all_params = params.to_vec();
        all_params.push(("access_key_id".to_string(), credentials.access_key_id.clone()));

        match credentials.mode {
            AuthMode::ApiKey => {
                let now = chrono::Utc::now().timestamp();
                let sig = signer::sign(
                    "GET",
                    path,
                    &all_params,
                    &credentials.secret_or_token,
                    now,
                );
                all_params.push(("sig".to_string(), sig.signature_hex));
                all_params.push(("ts".to_string(), sig.timestamp.to_string()));
            }
            AuthMode::UserToken => {
                if let Some(username) = &credentials.username {
                    all_params.push(("username".to_string(), username.clone()));
                }
                all_params.push(("token".to_string(), credentials.secret_or_token.clone()));
            }
        }

        let query: Vec<String> = all_params
            .iter()
            .map(|(k, v)| {
                format!(
                    "{}={}",
                    percent_encoding::utf8_percent_encode(k, percent_encoding::NON_ALPHANUMERIC),
                    percent_encoding::utf8_percent_encode(v, percent_encoding::NON_ALPHANUMERIC)
                )
            })
            .collect();

        format!("{}{}?{}", base.trim_end_matches('/'), path, query.join("&"))
    }

    async fn parse_response(&self, response: reqwest::Response) -> CoreResult<UpstreamResponse> {
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CoreError::UpstreamUnavailable(format!("failed to read body: {e}")))?;
        let text = String::from_utf8_lossy(&bytes);

        let looks_like_xml = text.trim_start().starts_with('<');

        let body = if content_type.contains("xml") || (content_type.is_empty() && looks_like_xml) {
            xml_to_json(&text)?
        } else {
            serde_json::from_str(&text)
                .map_err(|e| CoreError::UpstreamUnavailable(format!("invalid JSON body: {e}")))?
        };

        Ok(UpstreamResponse { body })
    }
}

/// Convert a flat upstream XML document into a `serde_json::Value` using a
/// straightforward element-name-to-object-key mapping (no attributes, no
/// mixed content — sufficient for the ELN's simple list/detail payloads).
fn xml_to_json(text: &str) -> CoreResult<serde_json::Value> {
    use quick_xml::events::Event;
    use quick_xml::reader::Reader;

    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<(String, serde_json::Map<String, serde_json::Value>)> = Vec::new();
    let mut root: Option<serde_json::Value> = None;
    let mut pending_text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                stack.push((name, serde_json::Map::new()));
                pending_text.clear();
            }
            Ok(Event::Text(t)) => {
                pending_text.push_str(&t.unescape().unwrap_or_default());
            }
            Ok(Event::End(_)) => {
                let (name, map) = stack
                    .pop()
                    .ok_or_else(|| CoreError::UpstreamUnavailable("malformed XML body".to_string()))?;
                let value = if map.is_empty() {
                    serde_json::Value::String(pending_text.trim().to_string())
                } else {
                    serde_json::Value::Object(map)
                };
                pending_text.clear();

                if let Some((_, parent)) = stack.last_mut() {
                    insert_merging_arrays(parent, name, value);
                } else {
                    root = Some(value);
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(CoreError::UpstreamUnavailable(format!(
                    "XML parse error: {e}"
                )));
            }
        }
    }

    root.ok_or_else(|| CoreError::UpstreamUnavailable("empty XML body".to_string()))
}

fn insert_merging_arrays(
    map: &mut serde_json::Map<String, serde_json::Value>,
    key: String,
    value: serde_json::Value,
) {
    match map.get_mut(&key) {
        Some(serde_json::Value::Array(arr)) => arr.push(value),
        Some(existing) => {
            let prior = existing.take();
            map.insert(key, serde_json::Value::Array(vec![prior, value]));
        }
        None => {
            map.insert(key, value);
        }
    }
}

enum FailoverSignal {
    /// Retryable at the endpoint level: move to the next backup endpoint.
    Transient(CoreError),
    /// Not eligible for failover (401/403/404/other 4xx, or a parse error).
    Permanent(CoreError),
}

fn jittered(base_ms: u64, jitter: f64) -> Duration {
    let mut rng = rand::thread_rng();
    let delta = (base_ms as f64) * jitter;
    let low = (base_ms as f64 - delta).max(0.0);
    let high = base_ms as f64 + delta;
    Duration::from_millis(rng.gen_range(low..=high) as u64)
}

fn next_backoff(current_ms: u64, config: &HttpClientConfig) -> u64 {
    let next = (current_ms as f64 * config.backoff_multiplier) as u64;
    next.min(config.max_backoff_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let config = HttpClientConfig {
            initial_backoff_ms: 100,
            max_backoff_ms: 300,
            backoff_multiplier: 2.0,
            ..Default::default()
        };
        let b1 = next_backoff(100, &config);
        let b2 = next_backoff(b1, &config);
        let b3 = next_backoff(b2, &config);
        assert_eq!(b1, 200);
        assert_eq!(b2, 300);
        assert_eq!(b3, 300); // capped
    }

    #[test]
    fn xml_to_json_parses_simple_list() {
        let xml = "<response><notebooks><id>N1</id><name>Alpha</name></notebooks><notebooks><id>N2</id><name>Beta</name></notebooks></response>";
        let value = xml_to_json(xml).unwrap();
        assert_eq!(value["notebooks"][0]["id"], "N1");
        assert_eq!(value["notebooks"][1]["name"], "Beta");
    }

    #[test]
    fn jittered_backoff_stays_within_bounds() {
        for _ in 0..50 {
            let d = jittered(100, 0.25).as_millis() as i64;
            assert!((75..=125).contains(&d));
        }
    }
}
