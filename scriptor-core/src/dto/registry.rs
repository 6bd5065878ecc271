//! Registry DTOs

use serde::{Deserialize, Serialize};

use crate::domain::script::{Dependency, InvocationKind};

/// A specific version of a script as stored in the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryScript {
    pub name: String,
    pub version: String,
    /// Newest published version, when the registry reports it
    #[serde(default)]
    pub latest_version: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub module_path: Option<String>,
    #[serde(default)]
    pub kind: InvocationKind,
    /// File extension for cli scripts (`sh`, `py`, ...)
    #[serde(default)]
    pub extension: Option<String>,
    /// Script source; empty in listings
    #[serde(default)]
    pub content: String,
    /// Hex-encoded SHA-256 of `content`
    #[serde(default)]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub required_env_vars: Vec<String>,
    #[serde(default)]
    pub cost_per_unit: Option<f64>,
    #[serde(default)]
    pub cost_unit: Option<String>,
}

impl RegistryScript {
    /// Module path, falling back to `<category>.<name>`
    pub fn module_path(&self) -> String {
        match (&self.module_path, &self.category) {
            (Some(path), _) => path.clone(),
            (None, Some(category)) => format!("{}.{}", category, self.name),
            (None, None) => self.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_minimal_payload_deserializes() {
        let script: RegistryScript = serde_json::from_value(json!({
            "name": "word_count",
            "version": "1.0.0"
        }))
        .unwrap();
        assert_eq!(script.kind, InvocationKind::Function);
        assert!(script.dependencies.is_empty());
        assert_eq!(script.module_path(), "word_count");
    }

    #[test]
    fn test_module_path_fallback_uses_category() {
        let script: RegistryScript = serde_json::from_value(json!({
            "name": "maps",
            "version": "2.1.0",
            "category": "scraping",
            "kind": "cli"
        }))
        .unwrap();
        assert_eq!(script.kind, InvocationKind::Cli);
        assert_eq!(script.module_path(), "scraping.maps");
    }
}
