//! Layered JSON configuration loader.
//!
//! A configuration is assembled from a base file plus optional per-concern
//! files in the same directory. Files are merged in order with deep object
//! merging, so a later file only needs to carry the keys it overrides.
//!
//! Files are loaded from `~/.zero-portfolio/` unless a directory is given.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result, ResultExt};

/// Get the default configuration directory.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".zero-portfolio"),
        |dirs| dirs.home_dir().join(".zero-portfolio"),
    )
}

/// Load a JSON file and return its contents as a Value.
/// Returns None if file doesn't exist.
pub fn load_json_file(path: &Path) -> Result<Option<Value>> {
    if !path.exists() {
        return Ok(None);
    }

    let content =
        fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?;

    let value: Value = serde_json::from_str(&content)
        .context(format!("Failed to parse {}", path.display()))?;

    Ok(Some(value))
}

/// Deep merge two JSON values.
/// Source values override target values, with object merging at each level.
pub fn merge_json(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(target_map), Value::Object(source_map)) => {
            for (key, source_value) in source_map {
                match target_map.get_mut(&key) {
                    Some(target_value) => {
                        merge_json(target_value, source_value);
                    }
                    None => {
                        target_map.insert(key, source_value);
                    }
                }
            }
        }
        (target, source) => {
            *target = source;
        }
    }
}

/// Load and merge the given files from a directory.
///
/// Priority is lowest to highest in the order given. Missing files are
/// skipped and every present file must hold a JSON object; keys starting with `$` or `_` (schema markers, comments) are
/// dropped from every file before merging.
pub fn load_layered(dir: Option<PathBuf>, files: &[&str]) -> Result<Value> {
    let cfg_dir = dir.unwrap_or_else(config_dir);
    let mut config = Value::Object(Default::default());

    tracing::debug!(dir = %cfg_dir.display(), "Loading layered config");

    for file in files {
        if let Some(value) = load_json_file(&cfg_dir.join(file))? {
            if !value.is_object() {
                return Err(Error::InvalidInput(format!("{} must contain a JSON object", file)));
            }
            merge_json(&mut config, strip_meta_keys(value));
            tracing::debug!(file = %file, "Loaded config layer");
        }
    }

    Ok(config)
}

/// Load layered files and deserialize into a typed configuration.
pub fn load_typed<T: DeserializeOwned>(dir: Option<PathBuf>, files: &[&str]) -> Result<T> {
    let value = load_layered(dir, files)?;
    serde_json::from_value(value)
        .map_err(|e| Error::Config(format!("Invalid configuration structure: {}", e)))
}

fn strip_meta_keys(value: Value) -> Value {
    match value {
        Value::Object(obj) => Value::Object(
            obj.into_iter()
                .filter(|(key, _)| !key.starts_with('$') && !key.starts_with('_'))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_json_objects() {
        let mut target = json!({
            "a": 1,
            "b": {
                "x": 10,
                "y": 20
            }
        });

        let source = json!({
            "b": {
                "y": 25,
                "z": 30
            },
            "c": 3
        });

        merge_json(&mut target, source);

        assert_eq!(target["a"], 1);
        assert_eq!(target["b"]["x"], 10);
        assert_eq!(target["b"]["y"], 25);
        assert_eq!(target["b"]["z"], 30);
        assert_eq!(target["c"], 3);
    }

    #[test]
    fn test_merge_json_overwrite_non_object() {
        let mut target = json!({ "a": [1, 2, 3] });
        let source = json!({ "a": [4, 5] });

        merge_json(&mut target, source);

        assert_eq!(target["a"], json!([4, 5]));
    }

    #[test]
    fn test_load_layered_later_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("base.json"),
            r#"{"risk": {"max": 5, "min": 1}, "$schema": "x"}"#,
        )
        .unwrap();
        fs::write(dir.path().join("override.json"), r#"{"risk": {"max": 7}}"#).unwrap();

        let value = load_layered(
            Some(dir.path().to_path_buf()),
            &["base.json", "override.json", "missing.json"],
        )
        .unwrap();

        assert_eq!(value["risk"]["max"], 7);
        assert_eq!(value["risk"]["min"], 1);
        assert!(value.get("$schema").is_none());
    }

    #[test]
    fn test_load_json_file_reports_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();

        let err = load_json_file(&path).unwrap_err();
        assert!(matches!(err.root(), Error::Json(_)));
    }

    #[test]
    fn test_load_layered_rejects_non_object_layer() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("engine.json"), "[1, 2]").unwrap();

        let err = load_layered(Some(dir.path().to_path_buf()), &["engine.json"]).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
