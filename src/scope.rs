//! Authorization-boundary configuration and fail-secure scope checks
//! (spec §3.1.2, §4.4).

use crate::error::{CoreError, ScopeViolationKind};
use crate::folder_path::FolderPath;
use crate::resources::{ResourceKind, ResourceUri};

/// The process-wide authorization boundary. Encoded as a sum type rather
/// than a struct with optional fields plus a validator, per spec §9.1: this
/// makes "at most one of notebook_id/notebook_name/folder_path" an
/// unrepresentable state instead of a merely-checked invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeConfig {
    /// No scope configured: every resource visible to the authenticated
    /// user is in scope.
    Unscoped,
    /// Restrict to a single notebook, by ID.
    ByNotebookId(String),
    /// Restrict to a single notebook, resolved by exact name at request
    /// time (spec §4.7 edge case: ambiguous name is a configuration error).
    ByNotebookName(String),
    /// Restrict to pages (and their notebooks/entries) whose folder is at
    /// or below this path.
    ByFolderPath(FolderPath),
}

/// Evidence the `ResourceManager` gathers while resolving a request's
/// parent entities, supplied back to the validator so it never has to make
/// its own upstream calls (spec §5.2: no suspension inside `ScopeValidator`).
#[derive(Debug, Clone, Default)]
pub struct ResolvedParents {
    /// For `ByNotebookName` scope: the notebook ID the caller resolved by
    /// exact-matching the configured name.
    pub resolved_target_notebook_id: Option<String>,
    /// For a NOTEBOOK uri under `ByFolderPath` scope: whether the notebook
    /// contains at least one page whose folder is in scope. `None` is
    /// treated as "no evidence" and denied (fail-secure).
    pub notebook_has_in_scope_page: Option<bool>,
    /// For a PAGE or ENTRY uri under `ByFolderPath` scope: the parent
    /// page's folder.
    pub parent_page_folder: Option<FolderPath>,
    /// For an ENTRY uri: the parent page's notebook ID, checked against the
    /// entry uri's own notebook ID to prevent cross-notebook entry-ID
    /// guessing.
    pub parent_page_notebook_id: Option<String>,
}

/// Fail-secure scope decision engine. Any doubt denies.
#[derive(Debug, Clone)]
pub struct ScopeValidator {
    scope: ScopeConfig,
}

impl ScopeValidator {
    pub fn new(scope: ScopeConfig) -> Self {
        Self { scope }
    }

    pub fn scope(&self) -> &ScopeConfig {
        &self.scope
    }

    /// Used by the two-phase listing algorithm (spec §4.7) to decide
    /// whether a page's folder is in scope. Only meaningful under
    /// `ByFolderPath`; callers under other scope variants don't consult
    /// this and instead list by notebook id/name directly.
    pub fn folder_in_scope(&self, folder: &FolderPath) -> bool {
        match &self.scope {
            ScopeConfig::ByFolderPath(scoped) => scoped.is_parent_of(folder),
            ScopeConfig::Unscoped => true,
            _ => false,
        }
    }

    /// Decide whether `uri` is permitted given the `resolved` evidence.
    /// Checks are applied per spec §4.4; the first failing rule produces a
    /// typed `ScopeViolation`.
    pub fn validate_read(
        &self,
        uri: &ResourceUri,
        resolved: &ResolvedParents,
    ) -> Result<(), CoreError> {
        match &self.scope {
            ScopeConfig::Unscoped => Ok(()),

            ScopeConfig::ByNotebookId(scoped_id) => {
                if &uri.notebook_id == scoped_id {
                    Ok(())
                } else {
                    Err(CoreError::scope_violation(
                        ScopeViolationKind::NotebookOutsideConfiguredNotebook,
                        format!(
                            "notebook {} is outside the configured notebook {scoped_id}",
                            uri.notebook_id
                        ),
                    ))
                }
            }

            ScopeConfig::ByNotebookName(name) => {
                match &resolved.resolved_target_notebook_id {
                    Some(target_id) if &uri.notebook_id == target_id => Ok(()),
                    _ => Err(CoreError::scope_violation(
                        ScopeViolationKind::NotebookOutsideConfiguredNotebook,
                        format!("notebook {} is outside notebook named {name:?}", uri.notebook_id),
                    )),
                }
            }

            ScopeConfig::ByFolderPath(scoped_folder) => match uri.kind {
                ResourceKind::Notebook => match resolved.notebook_has_in_scope_page {
                    Some(true) => Ok(()),
                    _ => Err(CoreError::scope_violation(
                        ScopeViolationKind::NotebookOutsideFolderScope,
                        format!(
                            "notebook {} has no page under folder scope {scoped_folder}",
                            uri.notebook_id
                        ),
                    )),
                },
                ResourceKind::Page => match &resolved.parent_page_folder {
                    Some(folder) if scoped_folder.is_parent_of(folder) => Ok(()),
                    _ => Err(CoreError::scope_violation(
                        ScopeViolationKind::PageOutsideFolderScope,
                        format!("page folder is outside folder scope {scoped_folder}"),
                    )),
                },
                ResourceKind::Entry => {
                    let folder_ok = resolved
                        .parent_page_folder
                        .as_ref()
                        .is_some_and(|folder| scoped_folder.is_parent_of(folder));
                    if !folder_ok {
                        return Err(CoreError::scope_violation(
                            ScopeViolationKind::PageOutsideFolderScope,
                            format!("entry's parent page is outside folder scope {scoped_folder}"),
                        ));
                    }
                    match &resolved.parent_page_notebook_id {
                        Some(notebook_id) if notebook_id == &uri.notebook_id => Ok(()),
                        _ => Err(CoreError::scope_violation(
                            ScopeViolationKind::EntryOutsideNotebookScope,
                            "entry's parent page belongs to a different notebook".to_string(),
                        )),
                    }
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::ResourceUri;

    fn page_uri(notebook_id: &str, page_id: &str) -> ResourceUri {
        ResourceUri::page(notebook_id.to_string(), page_id.to_string())
    }

    fn notebook_uri(notebook_id: &str) -> ResourceUri {
        ResourceUri::notebook(notebook_id.to_string())
    }

    fn entry_uri(notebook_id: &str, page_id: &str, entry_id: &str) -> ResourceUri {
        ResourceUri::entry(notebook_id.to_string(), page_id.to_string(), entry_id.to_string())
    }

    #[test]
    fn unscoped_allows_everything() {
        let validator = ScopeValidator::new(ScopeConfig::Unscoped);
        assert!(validator
            .validate_read(&notebook_uri("N1"), &ResolvedParents::default())
            .is_ok());
    }

    #[test]
    fn notebook_id_scope_rejects_other_notebooks() {
        let validator = ScopeValidator::new(ScopeConfig::ByNotebookId("N1".into()));
        let err = validator
            .validate_read(&page_uri("N2", "P9"), &ResolvedParents::default())
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::ScopeViolation {
                kind: ScopeViolationKind::NotebookOutsideConfiguredNotebook,
                ..
            }
        ));
    }

    #[test]
    fn folder_scope_substring_match_is_rejected() {
        let validator = ScopeValidator::new(ScopeConfig::ByFolderPath(FolderPath::from_raw("Chem")));
        let resolved = ResolvedParents {
            parent_page_folder: Some(FolderPath::from_raw("Chemistry")),
            ..Default::default()
        };
        let err = validator.validate_read(&page_uri("N1", "P2"), &resolved).unwrap_err();
        assert!(matches!(
            err,
            CoreError::ScopeViolation {
                kind: ScopeViolationKind::PageOutsideFolderScope,
                ..
            }
        ));
    }

    #[test]
    fn folder_scope_accepts_exact_and_nested_matches() {
        let validator = ScopeValidator::new(ScopeConfig::ByFolderPath(FolderPath::from_raw("Chem")));
        let resolved = ResolvedParents {
            parent_page_folder: Some(FolderPath::from_raw("Chem/Organic")),
            ..Default::default()
        };
        assert!(validator.validate_read(&page_uri("N1", "P1"), &resolved).is_ok());
    }

    #[test]
    fn empty_notebook_under_folder_scope_is_denied_fail_secure() {
        let validator = ScopeValidator::new(ScopeConfig::ByFolderPath(FolderPath::from_raw("")));
        let err = validator
            .validate_read(&notebook_uri("N1"), &ResolvedParents::default())
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::ScopeViolation {
                kind: ScopeViolationKind::NotebookOutsideFolderScope,
                ..
            }
        ));
    }

    #[test]
    fn entry_scope_checks_notebook_cross_reference() {
        let validator = ScopeValidator::new(ScopeConfig::ByFolderPath(FolderPath::from_raw("")));
        let resolved = ResolvedParents {
            parent_page_folder: Some(FolderPath::from_raw("")),
            parent_page_notebook_id: Some("N-OTHER".to_string()),
            ..Default::default()
        };
        let err = validator
            .validate_read(&entry_uri("N1", "P1", "E1"), &resolved)
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::ScopeViolation {
                kind: ScopeViolationKind::EntryOutsideNotebookScope,
                ..
            }
        ));
    }

    #[test]
    fn notebook_name_scope_requires_prior_resolution() {
        let validator = ScopeValidator::new(ScopeConfig::ByNotebookName("Alpha".into()));
        assert!(validator
            .validate_read(&notebook_uri("N1"), &ResolvedParents::default())
            .is_err());
        let resolved = ResolvedParents {
            resolved_target_notebook_id: Some("N1".to_string()),
            ..Default::default()
        };
        assert!(validator.validate_read(&notebook_uri("N1"), &resolved).is_ok());
    }
}
