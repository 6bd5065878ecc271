//! Script manifest parser
//!
//! A function-kind script is a Lua chunk returning a table:
//!
//! ```lua
//! return {
//!     name = "word_count",
//!     version = "1.2.0",
//!     description = "Counts words in a text",
//!     dependencies = { "lpeg", { import = "lfs", package = "luafilesystem", version = ">=1.8" } },
//!     required_env = { "API_TOKEN" },
//!     cost_per_unit = 0.001,
//!     cost_unit = "word",
//!     execute = function(params) ... end,
//! }
//! ```
//!
//! This module reads everything except `execute`, which is only checked
//! for presence. Evaluation happens in the metadata sandbox, so nothing in
//! the script body runs.

use anyhow::{Context, Result, bail};
use mlua::{Table, Value};
use scriptor_core::domain::script::Dependency;

use crate::sandbox::create_metadata_sandbox;

/// Static metadata declared by a function-kind script
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptManifest {
    pub name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub dependencies: Vec<Dependency>,
    pub required_env: Vec<String>,
    pub cost_per_unit: Option<f64>,
    pub cost_unit: Option<String>,
}

/// Parse a script manifest from Lua source code
///
/// # Errors
/// Returns an error if:
/// - The Lua source is invalid or does not return a table
/// - The table has no `execute` function
/// - A field has the wrong type, or a dependency entry is malformed
///
/// # Example
/// ```no_run
/// use scriptor_lua::parser::parse_manifest;
///
/// let manifest = parse_manifest(r#"
///     return {
///         version = "1.0.0",
///         dependencies = { "lpeg" },
///         execute = function(params) return { status = "success" } end,
///     }
/// "#)?;
/// assert_eq!(manifest.version.as_deref(), Some("1.0.0"));
/// assert_eq!(manifest.dependencies[0].import_name, "lpeg");
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn parse_manifest(source: &str) -> Result<ScriptManifest> {
    let lua = create_metadata_sandbox().context("Failed to create metadata sandbox")?;

    let table: Table = lua
        .load(source)
        .set_name("manifest")
        .eval()
        .context("Script must return a table")?;

    manifest_from_table(&table)
}

/// Read the manifest fields out of an already evaluated script table
pub fn manifest_from_table(table: &Table) -> Result<ScriptManifest> {
    match table.get::<Value>("execute")? {
        Value::Function(_) => {}
        Value::Nil => bail!("Script must define an 'execute' function"),
        other => bail!("Field 'execute' must be a function, got {}", other.type_name()),
    }

    Ok(ScriptManifest {
        name: optional_string(table, "name")?,
        version: optional_string(table, "version")?,
        description: optional_string(table, "description")?,
        dependencies: parse_dependencies(table)?,
        required_env: parse_string_list(table, "required_env")?,
        cost_per_unit: optional_number(table, "cost_per_unit")?,
        cost_unit: optional_string(table, "cost_unit")?,
    })
}

fn optional_string(table: &Table, field: &str) -> Result<Option<String>> {
    match table.get::<Value>(field)? {
        Value::Nil => Ok(None),
        Value::String(s) => Ok(Some(s.to_str()?.to_string())),
        Value::Integer(i) => Ok(Some(i.to_string())),
        Value::Number(n) => Ok(Some(n.to_string())),
        other => bail!("Field '{}' must be a string, got {}", field, other.type_name()),
    }
}

fn optional_number(table: &Table, field: &str) -> Result<Option<f64>> {
    match table.get::<Value>(field)? {
        Value::Nil => Ok(None),
        Value::Integer(i) => Ok(Some(i as f64)),
        Value::Number(n) => Ok(Some(n)),
        other => bail!("Field '{}' must be a number, got {}", field, other.type_name()),
    }
}

fn parse_string_list(table: &Table, field: &str) -> Result<Vec<String>> {
    match table.get::<Value>(field)? {
        Value::Nil => Ok(Vec::new()),
        Value::Table(list) => {
            let mut values = Vec::new();
            for entry in list.sequence_values::<String>() {
                values.push(entry.with_context(|| format!("Failed to read '{}' entry", field))?);
            }
            Ok(values)
        }
        _ => bail!("Field '{}' must be an array of strings", field),
    }
}

/// Parse `dependencies`: each entry is either an import name or a table
/// `{ import = ..., package = ..., version = ... }`
fn parse_dependencies(table: &Table) -> Result<Vec<Dependency>> {
    let list = match table.get::<Value>("dependencies")? {
        Value::Nil => return Ok(Vec::new()),
        Value::Table(list) => list,
        _ => bail!("Field 'dependencies' must be an array"),
    };

    let mut dependencies = Vec::new();
    for (idx, entry) in list.sequence_values::<Value>().enumerate() {
        let entry = entry.context("Failed to read dependency entry")?;
        let dependency = match entry {
            Value::String(s) => Dependency::new(s.to_str()?.to_string()),
            Value::Table(spec) => {
                let import: String = optional_string(&spec, "import")?.with_context(|| {
                    format!("Dependency #{} must have an 'import' field", idx + 1)
                })?;
                Dependency {
                    import_name: import,
                    package_name: optional_string(&spec, "package")?,
                    version_constraint: optional_string(&spec, "version")?,
                }
            }
            other => bail!(
                "Dependency #{} must be a string or a table, got {}",
                idx + 1,
                other.type_name()
            ),
        };

        if dependency.import_name.trim().is_empty() {
            bail!("Dependency #{} has an empty import name", idx + 1);
        }
        dependencies.push(dependency);
    }

    Ok(dependencies)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_manifest() {
        let source = r#"
            return {
                execute = function(params) return {} end
            }
        "#;

        let manifest = parse_manifest(source).unwrap();
        assert_eq!(manifest, ScriptManifest::default());
    }

    #[test]
    fn test_parse_full_manifest() {
        let source = r#"
            return {
                name = "word_count",
                version = "1.2.0",
                description = "Counts words",
                dependencies = {
                    "lpeg",
                    { import = "lfs", package = "luafilesystem", version = ">=1.8" },
                },
                required_env = { "API_TOKEN", "REGION" },
                cost_per_unit = 0.5,
                cost_unit = "word",
                execute = function(params) return {} end,
            }
        "#;

        let manifest = parse_manifest(source).unwrap();
        assert_eq!(manifest.name.as_deref(), Some("word_count"));
        assert_eq!(manifest.version.as_deref(), Some("1.2.0"));
        assert_eq!(manifest.description.as_deref(), Some("Counts words"));
        assert_eq!(
            manifest.dependencies,
            vec![
                Dependency::new("lpeg"),
                Dependency::new("lfs")
                    .with_package("luafilesystem")
                    .with_constraint(">=1.8"),
            ]
        );
        assert_eq!(manifest.required_env, vec!["API_TOKEN", "REGION"]);
        assert_eq!(manifest.cost_per_unit, Some(0.5));
        assert_eq!(manifest.cost_unit.as_deref(), Some("word"));
    }

    #[test]
    fn test_integer_cost_and_numeric_version() {
        let source = r#"
            return { version = 2, cost_per_unit = 3, execute = function() end }
        "#;

        let manifest = parse_manifest(source).unwrap();
        assert_eq!(manifest.version.as_deref(), Some("2"));
        assert_eq!(manifest.cost_per_unit, Some(3.0));
    }

    #[test]
    fn test_missing_execute() {
        let result = parse_manifest(r#"return { name = "x" }"#);
        assert!(result.unwrap_err().to_string().contains("execute"));
    }

    #[test]
    fn test_execute_not_a_function() {
        let result = parse_manifest(r#"return { execute = "nope" }"#);
        assert!(result.unwrap_err().to_string().contains("must be a function"));
    }

    #[test]
    fn test_dependency_without_import() {
        let source = r#"
            return {
                dependencies = { { package = "luafilesystem" } },
                execute = function() end,
            }
        "#;

        let result = parse_manifest(source);
        assert!(result.unwrap_err().to_string().contains("import"));
    }

    #[test]
    fn test_dependency_wrong_type() {
        let source = r#"
            return { dependencies = { true }, execute = function() end }
        "#;

        let result = parse_manifest(source);
        assert!(result.unwrap_err().to_string().contains("string or a table"));
    }

    #[test]
    fn test_empty_import_name_rejected() {
        let source = r#"
            return { dependencies = { "  " }, execute = function() end }
        "#;

        assert!(parse_manifest(source).is_err());
    }

    #[test]
    fn test_top_level_require_is_tolerated() {
        let source = r#"
            local lfs = require("lfs")
            return { dependencies = { "lfs" }, execute = function() return lfs end }
        "#;

        let manifest = parse_manifest(source).unwrap();
        assert_eq!(manifest.dependencies.len(), 1);
    }

    #[test]
    fn test_parse_invalid_lua() {
        assert!(parse_manifest("this is not valid lua!!!").is_err());
    }

    #[test]
    fn test_parse_not_returning_table() {
        assert!(parse_manifest(r#"return "not a table""#).is_err());
    }
}
