//! Script resolution across tiers
//!
//! Lookup order is fixed: project, then user, then registry. Local tiers are
//! searched by globbing the tier root; the directory layout below the root
//! gives the category (first directory) and subcategory (second directory).
//! A registry hit is never downloaded by `resolve`; callers ask for
//! [`ScriptResolver::materialize`] explicitly.

use scriptor_client::RegistryScript;
use scriptor_core::domain::script::{Entry, InvocationKind, ScriptDescriptor, Tier};
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::ResolveError;
use crate::repository::{LockfileStore, Registry};
use crate::service::metadata::read_metadata;

/// Extensions recognised as scripts inside a tier root
const SCRIPT_EXTENSIONS: &[&str] = &["lua", "sh", "bash", "py", "rb", "js", "pl"];

/// A resolved script plus any non-blocking lockfile notice
#[derive(Debug, Clone)]
pub struct Resolution {
    pub descriptor: ScriptDescriptor,
    pub advisory: Option<String>,
}

/// Finds scripts by name
pub struct ScriptResolver {
    user_root: PathBuf,
    registry: Arc<dyn Registry>,
    lockfile: Arc<dyn LockfileStore>,
}

impl ScriptResolver {
    pub fn new(
        user_root: PathBuf,
        registry: Arc<dyn Registry>,
        lockfile: Arc<dyn LockfileStore>,
    ) -> Self {
        Self {
            user_root,
            registry,
            lockfile,
        }
    }

    pub fn user_root(&self) -> &Path {
        &self.user_root
    }

    /// Resolve `name` to exactly one descriptor
    ///
    /// The project tier is only searched when `project` is given. Lockfile
    /// pins are looked up under `project_hash` and only apply when one is
    /// given.
    pub async fn resolve(
        &self,
        name: &str,
        project: Option<&Path>,
        project_hash: Option<&str>,
    ) -> Result<Resolution, ResolveError> {
        let pinned = project_hash.and_then(|hash| self.lockfile.get_pinned(hash, name));

        let mut tiers = Vec::with_capacity(2);
        if let Some(project) = project {
            tiers.push((Tier::Project, Config::project_scripts_dir(project)));
        }
        tiers.push((Tier::User, self.user_root.clone()));

        for (tier, root) in tiers {
            if let Some(descriptor) = describe_in_tier(name, tier, root).await? {
                debug!(script = name, tier = %tier, "Resolved locally");
                let advisory = match (&pinned, &descriptor.version) {
                    (Some(pin), Some(local)) if pin != local => Some(format!(
                        "Project lockfile pins '{}' to {}, but the {} tier copy is {}",
                        name, pin, tier, local
                    )),
                    _ => None,
                };
                return Ok(Resolution {
                    descriptor,
                    advisory,
                });
            }
        }

        let script = match &pinned {
            Some(version) => {
                let script = self.registry.get_version(name, version).await;
                if script.is_none() {
                    warn!(script = name, version = %version, "Pinned version not in registry");
                }
                script
            }
            None => self.registry.find_script(name).await,
        };

        let Some(script) = script else {
            return Err(ResolveError::NotFound {
                name: name.to_string(),
            });
        };

        let advisory = match (&pinned, &script.latest_version) {
            (Some(pin), Some(latest)) if pin != latest => Some(format!(
                "Project lockfile pins '{}' to {}; {} is available in the registry",
                name, pin, latest
            )),
            _ => None,
        };

        debug!(script = name, version = %script.version, "Found in registry only");
        Err(ResolveError::NotFoundLocally {
            name: name.to_string(),
            hint: format!(
                "version {} is in the registry; download it into the user tier or run with auto_download",
                script.version
            ),
            descriptor: Box::new(registry_descriptor(&script)),
            advisory,
        })
    }

    /// Download a registry script into the user tier
    ///
    /// `version` wins over a lockfile pin, which wins over the latest version.
    pub async fn materialize(
        &self,
        name: &str,
        version: Option<&str>,
        project_hash: Option<&str>,
    ) -> Result<ScriptDescriptor, ResolveError> {
        let failed = |reason: String| ResolveError::MaterializeFailed {
            name: name.to_string(),
            reason,
        };

        let pinned = project_hash.and_then(|hash| self.lockfile.get_pinned(hash, name));
        let wanted = version.map(str::to_string).or(pinned);

        let script = match &wanted {
            Some(version) => self.registry.get_version(name, version).await,
            None => self.registry.find_script(name).await,
        }
        .ok_or_else(|| ResolveError::NotFound {
            name: name.to_string(),
        })?;

        if script.content.is_empty() {
            return Err(failed("registry returned no content".to_string()));
        }
        if let Some(expected) = &script.content_hash {
            let actual = format!("{:x}", Sha256::digest(script.content.as_bytes()));
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(failed(format!(
                    "content hash mismatch: expected {}, got {}",
                    expected, actual
                )));
            }
        }

        let path = self.materialized_path(&script).map_err(failed)?;
        write_script(&path, &script.content, script.kind)
            .await
            .map_err(|e| failed(format!("{:#}", e)))?;

        info!(
            script = name,
            version = %script.version,
            path = %path.display(),
            "Materialized script"
        );

        let mut descriptor = describe_path(name, Tier::User, &self.user_root, &path)?;
        if descriptor.version.is_none() {
            descriptor.version = Some(script.version.clone());
        }
        if descriptor.description.is_none() {
            descriptor.description = script.description.clone();
        }
        Ok(descriptor)
    }

    fn materialized_path(&self, script: &RegistryScript) -> Result<PathBuf, String> {
        let mut path = self.user_root.clone();
        for segment in [&script.category, &script.subcategory].into_iter().flatten() {
            check_segment(segment)?;
            path.push(segment);
        }
        check_segment(&script.name)?;

        let extension = match script.kind {
            InvocationKind::Function => "lua".to_string(),
            InvocationKind::Cli => script
                .extension
                .as_deref()
                .map(|ext| ext.trim_start_matches('.'))
                .filter(|ext| !ext.is_empty())
                .unwrap_or("sh")
                .to_string(),
        };
        check_segment(&extension)?;
        path.push(format!("{}.{}", script.name, extension));
        Ok(path)
    }
}

/// Look for `name` under `root` and build its descriptor
async fn describe_in_tier(
    name: &str,
    tier: Tier,
    root: PathBuf,
) -> Result<Option<ScriptDescriptor>, ResolveError> {
    let owned = name.to_string();
    tokio::task::spawn_blocking(move || match find_in_root(&root, &owned) {
        Some(path) => describe_path(&owned, tier, &root, &path).map(Some),
        None => Ok(None),
    })
    .await
    .map_err(|e| ResolveError::InvalidScript {
        name: name.to_string(),
        path: PathBuf::new(),
        reason: format!("metadata reader failed: {}", e),
    })?
}

/// First script file named `name` below `root`
///
/// Shallower paths win, then lexical order.
pub fn find_in_root(root: &Path, name: &str) -> Option<PathBuf> {
    if !root.is_dir() || name.is_empty() {
        return None;
    }
    let Some(root_str) = root.to_str() else {
        warn!(root = %root.display(), "Skipping tier root with a non UTF-8 path");
        return None;
    };

    let base = glob::Pattern::escape(root_str);
    let escaped = glob::Pattern::escape(name);
    let patterns = [
        format!("{}/**/{}.*", base, escaped),
        format!("{}/**/{}", base, escaped),
    ];

    let mut candidates: Vec<PathBuf> = patterns
        .iter()
        .filter_map(|pattern| glob::glob(pattern).ok())
        .flat_map(|paths| paths.filter_map(Result::ok))
        .filter(|path| path.is_file() && is_script_named(path, name))
        .collect();

    candidates.sort_by(|a, b| {
        a.components()
            .count()
            .cmp(&b.components().count())
            .then_with(|| a.cmp(b))
    });
    candidates.dedup();
    candidates.into_iter().next()
}

fn is_script_named(path: &Path, name: &str) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => {
            SCRIPT_EXTENSIONS.contains(&ext)
                && path.file_stem().and_then(|s| s.to_str()) == Some(name)
        }
        None => path.file_name().and_then(|s| s.to_str()) == Some(name),
    }
}

/// Category and subcategory from the position of `path` under `root`
pub fn categories(root: &Path, path: &Path) -> (Option<String>, Option<String>) {
    let Ok(relative) = path.strip_prefix(root) else {
        return (None, None);
    };
    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();

    let category = (parts.len() >= 2).then(|| parts[0].clone());
    let subcategory = (parts.len() >= 3).then(|| parts[1].clone());
    (category, subcategory)
}

fn describe_path(
    name: &str,
    tier: Tier,
    root: &Path,
    path: &Path,
) -> Result<ScriptDescriptor, ResolveError> {
    let kind = if path.extension().is_some_and(|ext| ext == "lua") {
        InvocationKind::Function
    } else {
        InvocationKind::Cli
    };

    let metadata = read_metadata(path, kind).map_err(|e| ResolveError::InvalidScript {
        name: name.to_string(),
        path: path.to_path_buf(),
        reason: format!("{:#}", e),
    })?;

    let entry = match kind {
        InvocationKind::Function => Entry::Function {
            entry_point: path.to_path_buf(),
        },
        InvocationKind::Cli => Entry::Cli {
            executable_path: path.to_path_buf(),
        },
    };
    let (category, subcategory) = categories(root, path);

    Ok(ScriptDescriptor {
        name: name.to_string(),
        category,
        subcategory,
        tier,
        entry,
        version: metadata.version,
        description: metadata.description,
        dependencies: metadata.dependencies,
        required_env_vars: metadata.required_env,
        cost_per_unit: metadata.cost_per_unit,
        cost_unit: metadata.cost_unit,
    })
}

fn registry_descriptor(script: &RegistryScript) -> ScriptDescriptor {
    ScriptDescriptor {
        name: script.name.clone(),
        category: script.category.clone(),
        subcategory: script.subcategory.clone(),
        tier: Tier::Registry,
        entry: Entry::Registry {
            module_path: script.module_path(),
            kind: script.kind,
        },
        version: Some(script.version.clone()),
        description: script.description.clone(),
        dependencies: script.dependencies.clone(),
        required_env_vars: script.required_env_vars.iter().cloned().collect(),
        cost_per_unit: script.cost_per_unit,
        cost_unit: script.cost_unit.clone(),
    }
}

fn check_segment(segment: &str) -> Result<(), String> {
    if segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.contains(['/', '\\'])
    {
        return Err(format!("unsafe path segment '{}'", segment));
    }
    Ok(())
}

async fn write_script(path: &Path, content: &str, kind: InvocationKind) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content).await?;

    #[cfg(unix)]
    if kind == InvocationKind::Cli {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await?;
    }
    #[cfg(not(unix))]
    let _ = kind;

    Ok(())
}
