//! Load model config from a directory of JSON files or a single JSON document.

use crate::config::{validate, FullConfig};
use crate::error::ConfigError;
use serde::de::DeserializeOwned;
use std::path::Path;

async fn read_section<T: DeserializeOwned>(dir: &Path, file: &str, required: bool) -> Result<Vec<T>, ConfigError> {
    let path = dir.join(file);
    let text = match tokio::fs::read_to_string(&path).await {
        Ok(text) => text,
        Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(ConfigError::Load(format!("{}: {}", path.display(), e))),
    };
    serde_json::from_str(&text).map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))
}

/// Reads `schemas.json`, `enums.json`, `tables.json`, `columns.json`,
/// `relationships.json` and `api_entities.json` from `dir`. Only tables and
/// columns are required.
pub async fn load_from_dir(dir: impl AsRef<Path>) -> Result<FullConfig, ConfigError> {
    let dir = dir.as_ref();
    let config = FullConfig {
        schemas: read_section(dir, "schemas.json", false).await?,
        enums: read_section(dir, "enums.json", false).await?,
        tables: read_section(dir, "tables.json", true).await?,
        columns: read_section(dir, "columns.json", true).await?,
        relationships: read_section(dir, "relationships.json", false).await?,
        api_entities: read_section(dir, "api_entities.json", false).await?,
    };
    validate(&config)?;
    Ok(config)
}

/// Parses one JSON document holding every section.
pub fn load_from_str(text: &str) -> Result<FullConfig, ConfigError> {
    let config: FullConfig = serde_json::from_str(text).map_err(|e| ConfigError::Load(e.to_string()))?;
    validate(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_from_str_validates() {
        let ok = load_from_str(
            r#"{"tables": [{"id": "t1", "name": "Genre", "primary_key": "GenreId"}],
                "columns": [{"id": "c1", "table_id": "t1", "name": "GenreId", "type": "integer"}]}"#,
        );
        assert_eq!(ok.unwrap().tables.len(), 1);
        assert!(matches!(load_from_str("{\"tables\": 1}"), Err(ConfigError::Load(_))));
    }

    #[tokio::test]
    async fn test_load_from_missing_dir() {
        let err = load_from_dir("/nonexistent/model").await.unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }
}
