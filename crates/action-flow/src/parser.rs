//! Playbook document loading

use std::path::Path;

use replaybook_core_types::Playbook;
use tracing::debug;

use crate::errors::PlaybookError;

pub fn parse_playbook_yaml(source: &str) -> Result<Playbook, PlaybookError> {
    serde_yaml::from_str(source).map_err(|err| PlaybookError::Parse(err.to_string()))
}

pub fn parse_playbook_json(source: &str) -> Result<Playbook, PlaybookError> {
    serde_json::from_str(source).map_err(|err| PlaybookError::Parse(err.to_string()))
}

/// Reads a playbook file; `.json` is parsed as JSON, anything else as YAML.
pub fn load_playbook_file(path: &Path) -> Result<Playbook, PlaybookError> {
    let source = std::fs::read_to_string(path)
        .map_err(|err| PlaybookError::Io(format!("{}: {}", path.display(), err)))?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    debug!("loading playbook from {}", path.display());
    let parsed = if is_json {
        parse_playbook_json(&source)
    } else {
        parse_playbook_yaml(&source)
    };
    parsed.map_err(|err| match err {
        PlaybookError::Parse(reason) => {
            PlaybookError::Parse(format!("{}: {}", path.display(), reason))
        }
        other => other,
    })
}
