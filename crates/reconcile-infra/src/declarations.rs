//! Declaration file loading.
//!
//! A declaration file holds two lists, `resources` and `jobs`. The format
//! is chosen by extension: `.yaml`/`.yml` or `.json`.

use std::path::{Path, PathBuf};

use reconcile_types::node::{Declaration, DeclarationFile};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeclarationError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("unsupported declaration format for {0} (expected .yaml, .yml or .json)")]
    UnsupportedFormat(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Yaml,
    Json,
}

fn format_of(path: &Path) -> Option<Format> {
    match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
        "yaml" | "yml" => Some(Format::Yaml),
        "json" => Some(Format::Json),
        _ => None,
    }
}

/// Parse declaration file content in the format implied by `path`.
pub fn parse_declarations(path: &Path, content: &str) -> Result<Vec<Declaration>, DeclarationError> {
    let format = format_of(path).ok_or_else(|| DeclarationError::UnsupportedFormat(path.to_path_buf()))?;
    let parse_error = |message: String| DeclarationError::Parse {
        path: path.to_path_buf(),
        message,
    };

    let file: DeclarationFile = match format {
        Format::Yaml => serde_yaml_ng::from_str(content).map_err(|e| parse_error(e.to_string()))?,
        Format::Json => serde_json::from_str(content).map_err(|e| parse_error(e.to_string()))?,
    };
    Ok(file.into_declarations())
}

/// Read and parse a declaration file.
pub async fn load_declarations(path: &Path) -> Result<Vec<Declaration>, DeclarationError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| DeclarationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    let declarations = parse_declarations(path, &content)?;
    tracing::debug!(path = %path.display(), count = declarations.len(), "loaded declarations");
    Ok(declarations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile_types::node::{AttrValue, NodeKind};

    const YAML: &str = r#"
resources:
  - id: network
    type: "null"
    attributes:
      name: default
  - id: instance
    type: "null"
    attributes:
      network: "${network.name}"
      startup_script: docker run app:v1
    timeout_secs: 30
jobs:
  - id: smoke
    type: command
    needs: [instance]
    attributes:
      command: curl -f http://localhost
"#;

    #[test]
    fn test_parse_yaml_resources_then_jobs() {
        let decls = parse_declarations(Path::new("infra.yaml"), YAML).unwrap();
        let ids: Vec<&str> = decls.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["network", "instance", "smoke"]);
        assert_eq!(decls[2].kind, NodeKind::Job);
        assert_eq!(decls[2].needs, vec!["instance"]);
        assert_eq!(decls[1].timeout_secs, Some(30));
        assert_eq!(
            decls[1].attributes["network"],
            AttrValue::reference("network", "name")
        );
    }

    #[test]
    fn test_parse_json() {
        let json = r#"{"resources": [{"id": "a", "type": "null", "attributes": {"x": [1, "${b.id}"]}}]}"#;
        let decls = parse_declarations(Path::new("infra.JSON"), json).unwrap();
        assert_eq!(decls.len(), 1);
        assert_eq!(decls[0].references()[0].node, "b");
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let err = parse_declarations(Path::new("infra.hcl"), "").unwrap_err();
        assert!(matches!(err, DeclarationError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_parse_error_names_file() {
        let err = parse_declarations(Path::new("bad.yaml"), "resources: [id: ").unwrap_err();
        assert!(err.to_string().starts_with("failed to parse bad.yaml"));
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_declarations(&dir.path().join("none.yaml")).await.unwrap_err();
        assert!(matches!(err, DeclarationError::Io { .. }));
    }
}
