//! Process configuration: a single immutable record assembled once at
//! startup (spec §3.1.2, §3.1.3, §6.3). The core never touches argv or the
//! environment itself outside this thin loader; CLI precedence and
//! configuration-file merging remain an external-collaborator concern.

use std::time::Duration;

use secrecy::SecretString;

use crate::auth::{AuthConfig, AuthMode};
use crate::error::{CoreError, CoreResult};
use crate::folder_path::FolderPath;
use crate::http_client::HttpClientConfig;
use crate::scope::ScopeConfig;

/// Tuning for the audit sink's bounded buffer (spec §4.9).
#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub buffer_capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { buffer_capacity: 4096 }
    }
}

/// Everything the core needs to run, immutable once the process enters the
/// serving state (spec §2.3).
#[derive(Debug, Clone)]
pub struct Configuration {
    pub scope: ScopeConfig,
    pub auth: AuthConfig,
    pub http: HttpClientConfig,
    pub audit: AuditConfig,
}

impl Configuration {
    /// Assemble configuration from environment variables. This is the one
    /// place the core reads the environment; everything downstream of this
    /// function receives only the resulting immutable value.
    pub fn from_env() -> CoreResult<Self> {
        let mode = match env_opt("ELN_MCP_MODE").as_deref() {
            None | Some("api_key") => AuthMode::ApiKey,
            Some("user_token") => AuthMode::UserToken,
            Some(other) => {
                return Err(CoreError::configuration(format!(
                    "ELN_MCP_MODE must be \"api_key\" or \"user_token\", got {other:?}"
                )));
            }
        };

        let access_key_id = env_required("ELN_MCP_ACCESS_KEY_ID")?;
        let access_password = env_required("ELN_MCP_ACCESS_PASSWORD")?;
        let username = env_opt("ELN_MCP_USERNAME");
        let api_base_url = env_required("ELN_MCP_API_BASE_URL")?;
        validate_endpoint_url(&api_base_url)?;

        let auth = AuthConfig {
            mode,
            access_key_id,
            access_password: SecretString::new(access_password.into()),
            username,
            api_base_url: api_base_url.clone(),
        };
        auth.validate()?;

        let scope = Self::scope_from_env()?;

        let backup_urls: Vec<String> = env_opt("ELN_MCP_BACKUP_URLS")
            .map(|raw| raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect())
            .unwrap_or_default();
        for backup in &backup_urls {
            validate_endpoint_url(backup)?;
        }

        let http = HttpClientConfig {
            base_url: api_base_url,
            backup_urls,
            ..HttpClientConfig::default()
        };

        let audit = AuditConfig {
            buffer_capacity: env_opt("ELN_MCP_AUDIT_BUFFER_CAPACITY")
                .and_then(|s| s.parse().ok())
                .unwrap_or(4096),
        };

        Ok(Self { scope, auth, http, audit })
    }

    /// Parse the mutually-exclusive scope fields (spec §3.1.2): at most one
    /// of notebook-id / notebook-name / folder-path may be configured.
    /// Folding this into the sum type at load time, rather than validating
    /// a struct with three optional fields, is what makes the ambiguity
    /// unrepresentable downstream (spec §9.1).
    fn scope_from_env() -> CoreResult<ScopeConfig> {
        let notebook_id = env_opt("ELN_MCP_SCOPE_NOTEBOOK_ID");
        let notebook_name = env_opt("ELN_MCP_SCOPE_NOTEBOOK_NAME");
        let folder_path = env_opt("ELN_MCP_SCOPE_FOLDER_PATH");

        match (notebook_id, notebook_name, folder_path) {
            (None, None, None) => Ok(ScopeConfig::Unscoped),
            (Some(id), None, None) => Ok(ScopeConfig::ByNotebookId(id)),
            (None, Some(name), None) => Ok(ScopeConfig::ByNotebookName(name)),
            (None, None, Some(path)) => Ok(ScopeConfig::ByFolderPath(FolderPath::from_raw(&path))),
            _ => Err(CoreError::configuration(
                "at most one of ELN_MCP_SCOPE_NOTEBOOK_ID, ELN_MCP_SCOPE_NOTEBOOK_NAME, \
                 ELN_MCP_SCOPE_FOLDER_PATH may be set",
            )),
        }
    }
}

/// Per-attempt timeout × total attempts, plus the worst-case backoff sum —
/// the per-request ceiling the dispatcher enforces (spec §5.4).
pub fn total_request_timeout(http: &HttpClientConfig) -> Duration {
    let attempts = 1 + http.max_retries;
    let per_attempt = http.timeout * attempts;
    let worst_case_backoff = Duration::from_millis(http.max_backoff_ms) * http.max_retries;
    per_attempt + worst_case_backoff
}

/// Reject an endpoint that isn't a well-formed absolute HTTP(S) URL before
/// it ever reaches the HTTP client (spec §6.3: malformed config is a fatal
/// startup error, not a runtime surprise from a malformed request URL).
fn validate_endpoint_url(raw: &str) -> CoreResult<()> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| CoreError::configuration(format!("invalid endpoint URL {raw:?}: {e}")))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(CoreError::configuration(format!(
            "endpoint URL {raw:?} must use http or https"
        )));
    }
    Ok(())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_required(key: &str) -> CoreResult<String> {
    env_opt(key).ok_or_else(|| CoreError::configuration(format!("{key} is required")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_defaults_to_unscoped_when_nothing_is_set() {
        // SAFETY: test-only, no concurrent env mutation in this process's
        // test harness for these keys.
        unsafe {
            std::env::remove_var("ELN_MCP_SCOPE_NOTEBOOK_ID");
            std::env::remove_var("ELN_MCP_SCOPE_NOTEBOOK_NAME");
            std::env::remove_var("ELN_MCP_SCOPE_FOLDER_PATH");
        }
        assert_eq!(Configuration::scope_from_env().unwrap(), ScopeConfig::Unscoped);
    }

    #[test]
    fn conflicting_scope_vars_are_rejected() {
        unsafe {
            std::env::set_var("ELN_MCP_SCOPE_NOTEBOOK_ID", "N1");
            std::env::set_var("ELN_MCP_SCOPE_FOLDER_PATH", "Chem");
        }
        let result = Configuration::scope_from_env();
        unsafe {
            std::env::remove_var("ELN_MCP_SCOPE_NOTEBOOK_ID");
            std::env::remove_var("ELN_MCP_SCOPE_FOLDER_PATH");
        }
        assert!(result.is_err());
    }

    #[test]
    fn endpoint_url_must_be_http_or_https() {
        assert!(validate_endpoint_url("https://eln.example/api").is_ok());
        assert!(validate_endpoint_url("ftp://eln.example/api").is_err());
        assert!(validate_endpoint_url("not a url").is_err());
    }

    #[test]
    fn total_request_timeout_accounts_for_retries_and_backoff() {
        let http = HttpClientConfig {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            max_backoff_ms: 10_000,
            ..HttpClientConfig::default()
        };
        let total = total_request_timeout(&http);
        assert_eq!(total, Duration::from_secs(120) + Duration::from_secs(30));
    }
}
