//! Script metadata extraction
//!
//! Function-kind scripts declare metadata in the table they return.
//! CLI-kind scripts declare it in their leading comment block:
//!
//! ```text
//! #!/bin/sh
//! # @version 1.2.0
//! # @description Counts words in a file
//! # @dependency lfs luafilesystem >=1.8
//! # @env API_TOKEN
//! # @cost-per-unit 0.002
//! # @cost-unit row
//! ```

use anyhow::{Context, Result, bail};
use scriptor_core::domain::script::{Dependency, InvocationKind};
use std::collections::BTreeSet;
use std::path::Path;

/// Metadata shared by both invocation kinds
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptMetadata {
    pub version: Option<String>,
    pub description: Option<String>,
    pub dependencies: Vec<Dependency>,
    pub required_env: BTreeSet<String>,
    pub cost_per_unit: Option<f64>,
    pub cost_unit: Option<String>,
}

/// Read metadata from the script file at `path`
///
/// CLI-kind files may be compiled executables, so their bytes are decoded
/// lossily; a binary simply has no directive header.
pub fn read_metadata(path: &Path, kind: InvocationKind) -> Result<ScriptMetadata> {
    match kind {
        InvocationKind::Function => {
            let source = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            function_metadata(&source)
        }
        InvocationKind::Cli => {
            let bytes =
                std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
            cli_metadata(&String::from_utf8_lossy(&bytes))
        }
    }
}

/// Metadata from a Lua manifest table
pub fn function_metadata(source: &str) -> Result<ScriptMetadata> {
    let manifest = scriptor_lua::parse_manifest(source)?;
    Ok(ScriptMetadata {
        version: manifest.version,
        description: manifest.description,
        dependencies: manifest.dependencies,
        required_env: manifest.required_env.into_iter().collect(),
        cost_per_unit: manifest.cost_per_unit,
        cost_unit: manifest.cost_unit,
    })
}

/// Metadata from `@directive` lines in the leading comment block
///
/// Unknown directives are ignored. Parsing stops at the first line that is
/// neither blank nor a comment.
pub fn cli_metadata(source: &str) -> Result<ScriptMetadata> {
    let mut metadata = ScriptMetadata::default();

    for (idx, line) in source.lines().enumerate() {
        let line = line.trim();
        if idx == 0 && line.starts_with("#!") {
            continue;
        }
        if line.is_empty() {
            continue;
        }

        let Some(comment) = line
            .strip_prefix("--")
            .or_else(|| line.strip_prefix('#'))
        else {
            break;
        };

        let Some(directive) = comment.trim().strip_prefix('@') else {
            continue;
        };
        let (key, rest) = match directive.split_once(char::is_whitespace) {
            Some((key, rest)) => (key, rest.trim()),
            None => (directive, ""),
        };

        match key {
            "version" => metadata.version = non_empty(rest),
            "description" => metadata.description = non_empty(rest),
            "dependency" => metadata.dependencies.push(parse_dependency(rest, idx + 1)?),
            "env" => {
                for name in rest.split(|c: char| c == ',' || c.is_whitespace()) {
                    if !name.is_empty() {
                        metadata.required_env.insert(name.to_string());
                    }
                }
            }
            "cost-per-unit" => {
                let cost = rest.parse::<f64>().with_context(|| {
                    format!("line {}: invalid @cost-per-unit '{}'", idx + 1, rest)
                })?;
                metadata.cost_per_unit = Some(cost);
            }
            "cost-unit" => metadata.cost_unit = non_empty(rest),
            _ => {}
        }
    }

    Ok(metadata)
}

fn parse_dependency(spec: &str, line: usize) -> Result<Dependency> {
    let mut parts = spec.split_whitespace();
    let Some(import) = parts.next() else {
        bail!("line {}: @dependency needs an import name", line);
    };

    let mut dependency = Dependency::new(import);
    if let Some(package) = parts.next() {
        dependency = dependency.with_package(package);
    }
    let constraint: Vec<&str> = parts.collect();
    if !constraint.is_empty() {
        dependency = dependency.with_constraint(constraint.join(" "));
    }
    Ok(dependency)
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
