//! Loading and validating a `parts.yaml` document.

use crate::error::{Error, Result};
use crate::parts::PartSpec;
use indexmap::IndexMap;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PartsDocument {
    parts: IndexMap<String, PartSpec>,
}

/// Parse and validate a parts specification document from `path`.
/// Unknown top-level or per-part keys fail with `SchemaValidation`.
pub fn load_parts_spec(path: &Path) -> Result<IndexMap<String, PartSpec>> {
    let contents = std::fs::read_to_string(path)?;
    let doc: PartsDocument = serde_yaml::from_str(&contents)
        .map_err(|e| Error::SchemaValidation(format!("{}: {e}", path.display())))?;

    for name in doc.parts.keys() {
        crate::parts::validate_part_name(name)?;
    }

    Ok(doc.parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn loads_a_minimal_spec() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(
            file.path(),
            "parts:\n  foo:\n    plugin: nil\n  bar:\n    plugin: nil\n    after: [foo]\n",
        )
        .unwrap();
        let parts = load_parts_spec(file.path()).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts["bar"].after, vec!["foo".to_string()]);
    }

    #[test]
    fn rejects_unknown_top_level_keys() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "parts: {}\nbogus: true\n").unwrap();
        assert!(load_parts_spec(file.path()).is_err());
    }

    #[test]
    fn rejects_invalid_part_names() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "parts:\n  Bad-Name:\n    plugin: nil\n").unwrap();
        assert!(load_parts_spec(file.path()).is_err());
    }
}
