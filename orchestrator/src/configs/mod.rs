mod recon;

use std::{fs, path::Path};

pub use recon::ReconstructionConfig;

use crate::error::{ReconError, Result};

/// Loads a `ReconstructionConfig` from a JSON file.
///
/// # Errors
/// `Configuration` if the file can't be read or isn't a valid configuration.
pub fn load(path: impl AsRef<Path>) -> Result<ReconstructionConfig> {
    let path = path.as_ref();

    let json = fs::read_to_string(path)
        .map_err(|e| ReconError::Configuration(format!("can't read {}: {e}", path.display())))?;

    serde_json::from_str(&json)
        .map_err(|e| ReconError::Configuration(format!("invalid {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_json_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recon.json");
        fs::write(&path, r#"{"input": "proj", "lamino_angle": 30, "dry_run": true}"#).unwrap();

        let config = load(&path).unwrap();
        assert_eq!(config.lamino_angle, Some(30.0));
        assert!(config.dry_run);
    }

    #[test]
    fn missing_and_invalid_files_are_configuration_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load(dir.path().join("missing.json")),
            Err(ReconError::Configuration(_))
        ));

        let path = dir.path().join("broken.json");
        fs::write(&path, "{").unwrap();
        assert!(matches!(load(&path), Err(ReconError::Configuration(_))));
    }
}
