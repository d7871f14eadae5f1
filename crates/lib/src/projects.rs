//! Project catalog and target-project resolution for issue creation.

use serde::{Deserialize, Serialize};

/// One entry of the operator-configured project catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSpec {
    /// YouTrack internal project id (e.g. "0-4").
    pub id: String,

    /// Short key shown in issue ids (e.g. "NRIY").
    pub key: String,

    /// Human-readable name.
    pub name: String,

    /// Guidance for when to use this project; shown to the decision service.
    #[serde(default)]
    pub description: String,
}

/// Resolve the internal project id from optional id/key/name.
///
/// An explicit id wins verbatim; otherwise the first catalog match by key
/// (case-insensitive), then by name (case-insensitive). `None` when nothing
/// matches and no explicit id was given.
pub fn resolve_project_id(
    catalog: &[ProjectSpec],
    project_id: Option<&str>,
    project_key: Option<&str>,
    project_name: Option<&str>,
) -> Option<String> {
    if let Some(id) = project_id.map(str::trim).filter(|s| !s.is_empty()) {
        return Some(id.to_string());
    }
    if let Some(key) = project_key.map(str::trim).filter(|s| !s.is_empty()) {
        let key = key.to_lowercase();
        if let Some(p) = catalog.iter().find(|p| p.key.to_lowercase() == key) {
            return Some(p.id.clone());
        }
    }
    if let Some(name) = project_name.map(str::trim).filter(|s| !s.is_empty()) {
        let name = name.to_lowercase();
        if let Some(p) = catalog.iter().find(|p| p.name.to_lowercase() == name) {
            return Some(p.id.clone());
        }
    }
    None
}
