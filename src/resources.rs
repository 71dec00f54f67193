//! Resource discovery and retrieval: URI grammar, two-phase scoped listing,
//! and the ordered read pipeline (spec §3.1.5, §4.7).

use std::sync::Arc;

use serde::Serialize;

use crate::audit::{AuditEvent, AuditEventKind, AuditHandle, AuditOutcome};
use crate::auth::AuthManager;
use crate::error::{CoreError, CoreResult};
use crate::folder_path::FolderPath;
use crate::http_client::HttpClient;
use crate::scope::{ResolvedParents, ScopeConfig, ScopeValidator};

/// URI scheme identifying this upstream product (spec §3.1.5).
pub const SCHEME: &str = "eln";
/// Total URI length bound; longer URIs are rejected before any upstream call.
pub const MAX_URI_LEN: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Notebook,
    Page,
    Entry,
}

/// A parsed, typed reference to an upstream notebook/page/entry
/// (spec §3.1.5). Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceUri {
    pub kind: ResourceKind,
    pub notebook_id: String,
    pub page_id: Option<String>,
    pub entry_id: Option<String>,
}

impl ResourceUri {
    pub fn notebook(notebook_id: String) -> Self {
        Self {
            kind: ResourceKind::Notebook,
            notebook_id,
            page_id: None,
            entry_id: None,
        }
    }

    pub fn page(notebook_id: String, page_id: String) -> Self {
        Self {
            kind: ResourceKind::Page,
            notebook_id,
            page_id: Some(page_id),
            entry_id: None,
        }
    }

    pub fn entry(notebook_id: String, page_id: String, entry_id: String) -> Self {
        Self {
            kind: ResourceKind::Entry,
            notebook_id,
            page_id: Some(page_id),
            entry_id: Some(entry_id),
        }
    }

    /// Parse `eln://notebook/<id>[/page/<id>[/entry/<id>]]` (spec §3.1.5).
    /// Rejects empty identifiers, unknown grammar, and over-length input.
    pub fn parse(raw: &str) -> CoreResult<Self> {
        if raw.len() > MAX_URI_LEN {
            return Err(CoreError::InvalidParams(format!(
                "resource URI exceeds maximum length of {MAX_URI_LEN} bytes"
            )));
        }

        let prefix = format!("{SCHEME}://notebook/");
        let rest = raw
            .strip_prefix(&prefix)
            .ok_or_else(|| CoreError::InvalidParams(format!("unrecognized resource URI: {raw}")))?;

        let segments: Vec<&str> = rest.split('/').collect();
        match segments.as_slice() {
            [notebook_id] if !notebook_id.is_empty() => {
                Ok(ResourceUri::notebook((*notebook_id).to_string()))
            }
            [notebook_id, "page", page_id] if !notebook_id.is_empty() && !page_id.is_empty() => {
                Ok(ResourceUri::page((*notebook_id).to_string(), (*page_id).to_string()))
            }
            [notebook_id, "page", page_id, "entry", entry_id]
                if !notebook_id.is_empty() && !page_id.is_empty() && !entry_id.is_empty() =>
            {
                Ok(ResourceUri::entry(
                    (*notebook_id).to_string(),
                    (*page_id).to_string(),
                    (*entry_id).to_string(),
                ))
            }
            _ => Err(CoreError::InvalidParams(format!(
                "malformed resource URI: {raw}"
            ))),
        }
    }
}

impl std::fmt::Display for ResourceUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{SCHEME}://notebook/{}", self.notebook_id)?;
        if let Some(page_id) = &self.page_id {
            write!(f, "/page/{page_id}")?;
        }
        if let Some(entry_id) = &self.entry_id {
            write!(f, "/entry/{entry_id}")?;
        }
        Ok(())
    }
}

/// Listing-response shape (spec §3.1.6).
#[derive(Debug, Clone, Serialize)]
pub struct MCPResource {
    pub uri: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Read-response metadata, preserving hierarchical parentage (spec §3.1.6).
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub notebook_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notebook_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_kind: Option<String>,
}

/// Read-response shape (spec §3.1.6).
#[derive(Debug, Clone, Serialize)]
pub struct MCPResourceContent {
    pub uri: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
    pub metadata: ResourceMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

/// A notebook's listing entry, as resolved from upstream.
struct Notebook {
    id: String,
    name: String,
}

/// A page's listing entry, as resolved from upstream.
struct Page {
    id: String,
    notebook_id: String,
    title: String,
    folder: FolderPath,
    created_at: Option<String>,
    modified_at: Option<String>,
    owner: Option<String>,
}

/// An entry's detail, as resolved from upstream.
struct Entry {
    id: String,
    content: serde_json::Value,
    created_at: Option<String>,
    modified_at: Option<String>,
    owner: Option<String>,
    kind: Option<String>,
}

/// Discovers and reads ELN resources, enforcing scope at every step
/// (spec §4.7). All operations are read-only.
pub struct ResourceManager {
    http: Arc<HttpClient>,
    auth: Arc<AuthManager>,
    scope: ScopeValidator,
    audit: AuditHandle,
}

impl ResourceManager {
    pub fn new(
        http: Arc<HttpClient>,
        auth: Arc<AuthManager>,
        scope: ScopeConfig,
        audit: AuditHandle,
    ) -> Self {
        Self {
            http,
            auth,
            scope: ScopeValidator::new(scope),
            audit,
        }
    }

    pub fn parse_resource_uri(&self, raw: &str) -> CoreResult<ResourceUri> {
        ResourceUri::parse(raw)
    }

    /// List resources visible under the configured scope (spec §4.7).
    pub async fn list_resources(&self, corr_id: &str) -> CoreResult<Vec<MCPResource>> {
        self.auth.ensure_authenticated(corr_id).await?;

        let result = self.list_resources_inner(corr_id).await;

        match &result {
            Ok(_) => self.audit.emit(AuditEvent::new(
                corr_id,
                AuditEventKind::ResourceList,
                AuditOutcome::Ok,
            )),
            Err(err) => self.audit.emit(
                AuditEvent::new(corr_id, AuditEventKind::ResourceList, AuditOutcome::Error)
                    .with_message(err.to_string()),
            ),
        }

        result
    }

    async fn list_resources_inner(&self, corr_id: &str) -> CoreResult<Vec<MCPResource>> {
        match self.scope.scope().clone() {
            ScopeConfig::Unscoped => {
                let notebooks = self.fetch_notebooks(corr_id).await?;
                Ok(notebooks.into_iter().map(notebook_resource).collect())
            }

            ScopeConfig::ByNotebookId(notebook_id) => {
                let pages = self.fetch_pages(corr_id, &notebook_id).await?;
                Ok(pages.into_iter().map(page_resource).collect())
            }

            ScopeConfig::ByNotebookName(name) => {
                match self.resolve_notebook_by_name(corr_id, &name).await? {
                    Some(notebook_id) => {
                        let pages = self.fetch_pages(corr_id, &notebook_id).await?;
                        Ok(pages.into_iter().map(page_resource).collect())
                    }
                    None => {
                        self.audit.emit(
                            AuditEvent::new(corr_id, AuditEventKind::ResourceList, AuditOutcome::Denied)
                                .with_message(format!("no notebook named {name:?} is visible")),
                        );
                        Ok(Vec::new())
                    }
                }
            }

            ScopeConfig::ByFolderPath(scoped_folder) => {
                let notebooks = self.fetch_notebooks(corr_id).await?;
                let mut resources = Vec::new();
                for notebook in notebooks {
                    let pages = self.fetch_pages(corr_id, &notebook.id).await?;
                    let in_scope: Vec<Page> = pages
                        .into_iter()
                        .filter(|p| scoped_folder.is_parent_of(&p.folder))
                        .collect();
                    resources.extend(in_scope.into_iter().map(page_resource));
                }
                Ok(resources)
            }
        }
    }

    /// Read a single resource, applying the ordered check pipeline from
    /// spec §4.7: URI parse, session freshness, upstream parent resolution,
    /// scope validation, content fetch.
    pub async fn read_resource(&self, corr_id: &str, raw_uri: &str) -> CoreResult<MCPResourceContent> {
        let uri = self.parse_resource_uri(raw_uri)?;

        self.auth.ensure_authenticated(corr_id).await?;

        let result = self.read_resource_inner(corr_id, &uri).await;

        match &result {
            Ok(_) => self.audit.emit(
                AuditEvent::new(corr_id, AuditEventKind::ResourceRead, AuditOutcome::Ok)
                    .with_resource_uri(uri.to_string()),
            ),
            Err(CoreError::ScopeViolation { kind, .. }) => self.audit.emit(
                AuditEvent::new(corr_id, AuditEventKind::ScopeViolation, AuditOutcome::Denied)
                    .with_resource_uri(uri.to_string())
                    .with_error_kind(kind.to_string()),
            ),
            Err(err) => self.audit.emit(
                AuditEvent::new(corr_id, AuditEventKind::ResourceRead, AuditOutcome::Error)
                    .with_resource_uri(uri.to_string())
                    .with_message(err.to_string()),
            ),
        }

        result
    }

    async fn read_resource_inner(
        &self,
        corr_id: &str,
        uri: &ResourceUri,
    ) -> CoreResult<MCPResourceContent> {
        let mut resolved = ResolvedParents::default();

        if let ScopeConfig::ByNotebookName(name) = self.scope.scope() {
            resolved.resolved_target_notebook_id = self.resolve_notebook_by_name(corr_id, name).await?;
        }

        match uri.kind {
            ResourceKind::Notebook => {
                let notebooks = self.fetch_notebooks(corr_id).await?;
                let notebook = notebooks
                    .into_iter()
                    .find(|n| n.id == uri.notebook_id)
                    .ok_or_else(|| CoreError::NotFound(format!("notebook {} not found", uri.notebook_id)))?;

                if matches!(self.scope.scope(), ScopeConfig::ByFolderPath(_)) {
                    let pages = self.fetch_pages(corr_id, &uri.notebook_id).await?;
                    let has_in_scope = pages.iter().any(|p| self.scope.folder_in_scope(&p.folder));
                    resolved.notebook_has_in_scope_page = Some(has_in_scope);
                }

                self.scope.validate_read(uri, &resolved)?;

                Ok(MCPResourceContent {
                    uri: uri.to_string(),
                    mime_type: "application/json".to_string(),
                    text: Some(serde_json::json!({ "id": notebook.id, "name": notebook.name }).to_string()),
                    blob: None,
                    metadata: ResourceMetadata {
                        notebook_id: notebook.id.clone(),
                        notebook_name: Some(notebook.name),
                        ..Default::default()
                    },
                    context: None,
                })
            }

            ResourceKind::Page => {
                let pages = self.fetch_pages(corr_id, &uri.notebook_id).await?;
                let page_id = uri.page_id.clone().expect("PAGE uri always carries a page_id");
                let page = pages
                    .into_iter()
                    .find(|p| p.id == page_id)
                    .ok_or_else(|| CoreError::NotFound(format!("page {page_id} not found")))?;

                resolved.parent_page_folder = Some(page.folder.clone());
                self.scope.validate_read(uri, &resolved)?;

                Ok(MCPResourceContent {
                    uri: uri.to_string(),
                    mime_type: "application/json".to_string(),
                    text: Some(serde_json::json!({ "id": page.id, "title": page.title }).to_string()),
                    blob: None,
                    metadata: ResourceMetadata {
                        created_at: page.created_at,
                        modified_at: page.modified_at,
                        owner: page.owner,
                        notebook_id: page.notebook_id,
                        page_title: Some(page.title),
                        folder_path: Some(page.folder.display_path()),
                        ..Default::default()
                    },
                    context: None,
                })
            }

            ResourceKind::Entry => {
                let pages = self.fetch_pages(corr_id, &uri.notebook_id).await?;
                let page_id = uri.page_id.clone().expect("ENTRY uri always carries a page_id");
                let page = pages
                    .into_iter()
                    .find(|p| p.id == page_id)
                    .ok_or_else(|| CoreError::NotFound(format!("page {page_id} not found")))?;

                resolved.parent_page_folder = Some(page.folder.clone());
                resolved.parent_page_notebook_id = Some(page.notebook_id.clone());

                self.scope.validate_read(uri, &resolved)?;

                let entry_id = uri.entry_id.clone().expect("ENTRY uri always carries an entry_id");
                let entries = self.fetch_entries(corr_id, &page_id).await?;
                let entry = entries
                    .into_iter()
                    .find(|e| e.id == entry_id)
                    .ok_or_else(|| CoreError::NotFound(format!("entry {entry_id} not found")))?;

                Ok(MCPResourceContent {
                    uri: uri.to_string(),
                    mime_type: "application/json".to_string(),
                    text: Some(entry.content.to_string()),
                    blob: None,
                    metadata: ResourceMetadata {
                        created_at: entry.created_at,
                        modified_at: entry.modified_at,
                        owner: entry.owner,
                        notebook_id: page.notebook_id,
                        page_title: Some(page.title),
                        folder_path: Some(page.folder.display_path()),
                        entry_kind: entry.kind,
                    },
                    context: None,
                })
            }
        }
    }

    /// Resolve a configured `notebook_name` to the visible notebook's ID.
    /// `None` means no visible notebook matches; ambiguity (more than one
    /// exact match) is a configuration error (spec §4.7 edge case).
    async fn resolve_notebook_by_name(&self, corr_id: &str, name: &str) -> CoreResult<Option<String>> {
        let notebooks = self.fetch_notebooks(corr_id).await?;
        let matches: Vec<Notebook> = notebooks.into_iter().filter(|n| n.name == name).collect();
        match matches.len() {
            0 => Ok(None),
            1 => Ok(Some(matches.into_iter().next().unwrap().id)),
            _ => Err(CoreError::configuration(format!(
                "notebook name {name:?} matches more than one visible notebook"
            ))),
        }
    }

    async fn fetch_notebooks(&self, corr_id: &str) -> CoreResult<Vec<Notebook>> {
        let uid = self.auth.user_id()?;
        let response = self
            .http
            .get("/notebooks/list", &[("uid".to_string(), uid)])
            .await
            .inspect_err(|err| self.emit_upstream_error(corr_id, err))?;

        Ok(as_list(response.body.get("notebooks"))
            .into_iter()
            .filter_map(|v| {
                Some(Notebook {
                    id: get_str(&v, "id")?,
                    name: get_str(&v, "name").unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn fetch_pages(&self, corr_id: &str, notebook_id: &str) -> CoreResult<Vec<Page>> {
        let uid = self.auth.user_id()?;
        let response = self
            .http
            .get(
                "/pages/list",
                &[
                    ("uid".to_string(), uid),
                    ("notebook_id".to_string(), notebook_id.to_string()),
                ],
            )
            .await
            .inspect_err(|err| self.emit_upstream_error(corr_id, err))?;

        Ok(as_list(response.body.get("pages"))
            .into_iter()
            .filter_map(|v| {
                Some(Page {
                    id: get_str(&v, "id")?,
                    notebook_id: get_str(&v, "notebook_id").unwrap_or_else(|| notebook_id.to_string()),
                    title: get_str(&v, "title").unwrap_or_default(),
                    folder: FolderPath::from_raw(
                        &get_str(&v, "folder")
                            .or_else(|| get_str(&v, "folder_path"))
                            .unwrap_or_default(),
                    ),
                    created_at: get_str(&v, "created_at"),
                    modified_at: get_str(&v, "modified_at"),
                    owner: get_str(&v, "owner"),
                })
            })
            .collect())
    }

    async fn fetch_entries(&self, corr_id: &str, page_id: &str) -> CoreResult<Vec<Entry>> {
        let uid = self.auth.user_id()?;
        let response = self
            .http
            .get(
                "/entries/get",
                &[("uid".to_string(), uid), ("page_id".to_string(), page_id.to_string())],
            )
            .await
            .inspect_err(|err| self.emit_upstream_error(corr_id, err))?;

        Ok(as_list(response.body.get("entries"))
            .into_iter()
            .filter_map(|v| {
                let id = get_str(&v, "id")?;
                Some(Entry {
                    id,
                    created_at: get_str(&v, "created_at"),
                    modified_at: get_str(&v, "modified_at"),
                    owner: get_str(&v, "owner"),
                    kind: get_str(&v, "kind").or_else(|| get_str(&v, "type")),
                    content: v,
                })
            })
            .collect())
    }

    fn emit_upstream_error(&self, corr_id: &str, err: &CoreError) {
        self.audit.emit(
            AuditEvent::new(corr_id, AuditEventKind::UpstreamError, AuditOutcome::Error)
                .with_message(err.to_string()),
        );
    }
}

fn notebook_resource(notebook: Notebook) -> MCPResource {
    MCPResource {
        uri: ResourceUri::notebook(notebook.id).to_string(),
        name: notebook.name,
        description: None,
        mime_type: None,
    }
}

fn page_resource(page: Page) -> MCPResource {
    MCPResource {
        uri: ResourceUri::page(page.notebook_id, page.id).to_string(),
        name: page.title,
        description: None,
        mime_type: None,
    }
}

/// Tolerate upstream returning either a JSON array or, for a single result
/// (common after XML-to-JSON flattening of one sibling element), a bare
/// object.
fn as_list(value: Option<&serde_json::Value>) -> Vec<serde_json::Value> {
    match value {
        Some(serde_json::Value::Array(items)) => items.clone(),
        Some(v @ serde_json::Value::Object(_)) => vec![v.clone()],
        _ => Vec::new(),
    }
}

fn get_str(value: &serde_json::Value, key: &str) -> Option<String> {
    value.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_notebook_page_entry_uris() {
        assert_eq!(
            ResourceUri::parse("eln://notebook/N1").unwrap(),
            ResourceUri::notebook("N1".to_string())
        );
        assert_eq!(
            ResourceUri::parse("eln://notebook/N1/page/P2").unwrap(),
            ResourceUri::page("N1".to_string(), "P2".to_string())
        );
        assert_eq!(
            ResourceUri::parse("eln://notebook/N1/page/P2/entry/E3").unwrap(),
            ResourceUri::entry("N1".to_string(), "P2".to_string(), "E3".to_string())
        );
    }

    #[test]
    fn rejects_empty_identifiers_and_unknown_grammar() {
        assert!(ResourceUri::parse("eln://notebook/").is_err());
        assert!(ResourceUri::parse("eln://notebook/N1/page/").is_err());
        assert!(ResourceUri::parse("eln://notebook/N1/unknown/X").is_err());
        assert!(ResourceUri::parse("http://notebook/N1").is_err());
    }

    #[test]
    fn rejects_uri_over_max_length() {
        let huge = format!("eln://notebook/{}", "N".repeat(MAX_URI_LEN));
        let err = ResourceUri::parse(&huge).unwrap_err();
        assert!(matches!(err, CoreError::InvalidParams(_)));
    }

    #[test]
    fn display_round_trips_parse() {
        for raw in [
            "eln://notebook/N1",
            "eln://notebook/N1/page/P2",
            "eln://notebook/N1/page/P2/entry/E3",
        ] {
            let uri = ResourceUri::parse(raw).unwrap();
            assert_eq!(uri.to_string(), raw);
        }
    }

    #[test]
    fn as_list_accepts_array_or_bare_object() {
        let arr = serde_json::json!([{"id": "A"}, {"id": "B"}]);
        assert_eq!(as_list(Some(&arr)).len(), 2);

        let single = serde_json::json!({"id": "A"});
        assert_eq!(as_list(Some(&single)).len(), 1);

        assert_eq!(as_list(None).len(), 0);
    }
}
