//! Naming scheme for containers and search indexes.
//!
//! User-supplied project names are stripped of every non-alphanumeric
//! character before a uniqueness suffix is appended. Container names are
//! lowercased because container naming is case-insensitive.

use crate::error::PipelineError;

/// Remove every character that is not a letter or digit.
pub fn sanitize_project_name(project_name: &str) -> String {
    project_name
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// Container name for an uploaded project: `{prefix}-{project}-{uid}`, lowercased.
pub fn container_name(prefix: &str, project_name: &str, uid: &str) -> Result<String, PipelineError> {
    let project = sanitize_project_name(project_name);
    if project.is_empty() {
        return Err(PipelineError::InvalidInput(format!(
            "project name '{}' has no alphanumeric characters",
            project_name
        )));
    }
    Ok(format!("{}-{}-{}", prefix, project, uid).to_lowercase())
}

/// Search index name for an uploaded project: `index-{project}-{uid}`.
pub fn index_name(project_name: &str, uid: &str) -> String {
    format!("index-{}-{}", sanitize_project_name(project_name), uid)
}
