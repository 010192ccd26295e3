//! JSON Schema validation for incoming reports.
//!
//! Schema documents are static files shipped with the service. Each one is
//! compiled on first use and cached by path for the life of the process.

use dashmap::DashMap;
use jsonschema::{JSONSchema, ValidationError};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// The payload violates the schema. Carries the first violation.
    #[error("{0}")]
    Invalid(String),
    /// The schema document itself could not be read or compiled.
    #[error("failed to load schema {}: {reason}", path.display())]
    Load { path: PathBuf, reason: String },
}

/// Compiled schemas keyed by the path they were loaded from.
#[derive(Default)]
pub struct SchemaRegistry {
    compiled: DashMap<PathBuf, Arc<JSONSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile every schema up front so a broken deployment fails at startup.
    pub fn preload<'a>(&self, paths: impl IntoIterator<Item = &'a Path>) -> Result<(), SchemaError> {
        for path in paths {
            self.get_or_load(path)?;
        }
        Ok(())
    }

    /// Check `payload` against the schema stored at `path`.
    pub fn validate(&self, path: &Path, payload: &Value) -> Result<(), SchemaError> {
        let schema = self.get_or_load(path)?;
        match schema.validate(payload) {
            Ok(()) => Ok(()),
            Err(mut errors) => {
                let message = errors
                    .next()
                    .map(|error| describe(&error))
                    .unwrap_or_else(|| "Report does not match schema".to_owned());
                Err(SchemaError::Invalid(message))
            }
        }
    }

    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }

    fn get_or_load(&self, path: &Path) -> Result<Arc<JSONSchema>, SchemaError> {
        if let Some(schema) = self.compiled.get(path) {
            return Ok(schema.value().clone());
        }

        // Concurrent first uses may both compile; the document is immutable so
        // whichever insert lands first is kept.
        let schema = Arc::new(load_schema(path)?);
        let entry = self.compiled.entry(path.to_path_buf()).or_insert(schema);
        Ok(entry.value().clone())
    }
}

fn load_schema(path: &Path) -> Result<JSONSchema, SchemaError> {
    let load_error = |reason: String| SchemaError::Load {
        path: path.to_path_buf(),
        reason,
    };

    let raw = fs::read_to_string(path).map_err(|e| load_error(e.to_string()))?;
    let document: Value = serde_json::from_str(&raw).map_err(|e| load_error(e.to_string()))?;
    let compiled = JSONSchema::options()
        .compile(&document)
        .map_err(|e| load_error(e.to_string()))?;

    tracing::debug!(path = %path.display(), "Compiled report schema");
    Ok(compiled)
}

/// Violation text, with the instance location when it is not the document root.
fn describe(error: &ValidationError<'_>) -> String {
    let location = error.instance_path.to_string();
    if location.is_empty() {
        error.to_string()
    } else {
        format!("{error} (at {location})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema_path(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("schema").join(name)
    }

    fn csp_schema() -> PathBuf {
        schema_path("content-security-policy-report-2.json")
    }

    fn hpkp_schema() -> PathBuf {
        schema_path("http-public-key-pinning-report.json")
    }

    #[test]
    fn accepts_well_formed_csp_report() {
        let registry = SchemaRegistry::new();
        let report = json!({
            "csp-report": {
                "document-uri": "https://example.com/page",
                "referrer": "",
                "blocked-uri": "https://evil.example/script.js",
                "violated-directive": "script-src 'self'",
                "original-policy": "default-src 'self'; report-uri /csp"
            }
        });
        assert!(registry.validate(&csp_schema(), &report).is_ok());
    }

    #[test]
    fn missing_envelope_is_reported() {
        let registry = SchemaRegistry::new();
        let err = registry.validate(&csp_schema(), &json!({"foo": 1})).unwrap_err();
        match err {
            SchemaError::Invalid(message) => assert!(message.contains("csp-report")),
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn nested_violation_includes_location() {
        let registry = SchemaRegistry::new();
        let report = json!({
            "csp-report": {
                "document-uri": "https://example.com/",
                "blocked-uri": "inline",
                "violated-directive": "script-src",
                "line-number": "seven"
            }
        });
        let SchemaError::Invalid(message) = registry.validate(&csp_schema(), &report).unwrap_err()
        else {
            panic!("expected a validation failure");
        };
        assert!(message.contains("/csp-report/line-number"), "{message}");
    }

    #[test]
    fn enum_constraint_is_enforced() {
        let registry = SchemaRegistry::new();
        let report = json!({
            "csp-report": {
                "document-uri": "https://example.com/",
                "blocked-uri": "inline",
                "violated-directive": "script-src",
                "disposition": "sometimes"
            }
        });
        assert!(matches!(
            registry.validate(&csp_schema(), &report),
            Err(SchemaError::Invalid(_))
        ));
    }

    #[test]
    fn hpkp_requires_hostname() {
        let registry = SchemaRegistry::new();
        let report = json!({
            "date-time": "2014-04-06T13:00:50Z",
            "port": 443,
            "served-certificate-chain": [],
            "known-pins": []
        });
        let SchemaError::Invalid(message) = registry.validate(&hpkp_schema(), &report).unwrap_err()
        else {
            panic!("expected a validation failure");
        };
        assert!(message.contains("hostname"), "{message}");
    }

    #[test]
    fn validation_is_deterministic_and_cached() {
        let registry = SchemaRegistry::new();
        let report = json!({"csp-report": {"document-uri": 5}});
        let first = registry.validate(&csp_schema(), &report).unwrap_err().to_string();
        let second = registry.validate(&csp_schema(), &report).unwrap_err().to_string();
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn missing_schema_file_is_a_load_error() {
        let registry = SchemaRegistry::new();
        let err = registry
            .validate(Path::new("/nonexistent/schema.json"), &json!({}))
            .unwrap_err();
        assert!(matches!(err, SchemaError::Load { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn preload_compiles_all_paths() {
        let registry = SchemaRegistry::new();
        let (csp, hpkp) = (csp_schema(), hpkp_schema());
        registry.preload([csp.as_path(), hpkp.as_path()]).unwrap();
        assert_eq!(registry.len(), 2);
    }
}
