//! kawait manifest scan: find the objects declared in YAML files under a
//! directory so they can be checked without naming them on the command line.

#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use kawait_core::{Target, DEFAULT_NAMESPACE};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Identity of one object declared in a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRef {
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
    pub path: PathBuf,
}

impl ManifestRef {
    /// `Kind.version.group`; the trailing dot for core kinds keeps the
    /// version from being read as a group.
    pub fn type_spec(&self) -> String {
        if self.api_version.is_empty() {
            return self.kind.clone();
        }
        let (group, version) = match self.api_version.split_once('/') {
            Some((g, v)) => (g, v),
            None => ("", self.api_version.as_str()),
        };
        format!("{}.{}.{}", self.kind, version, group)
    }

    pub fn target(&self) -> Target {
        let ns = self.namespace.clone().unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        Target::new(self.type_spec(), ns, self.name.clone())
    }
}

#[derive(Debug, Default, Deserialize)]
struct Doc {
    #[serde(default, rename = "apiVersion")]
    api_version: String,
    #[serde(default)]
    kind: String,
    #[serde(default)]
    metadata: Meta,
}

#[derive(Debug, Default, Deserialize)]
struct Meta {
    #[serde(default)]
    name: String,
    #[serde(default)]
    namespace: Option<String>,
}

/// Walk `dir` and collect every object from files ending in `suffix`.
/// Hidden files and directories are skipped; a YAML syntax error aborts.
pub fn collect(dir: impl AsRef<Path>, suffix: &str) -> Result<Vec<ManifestRef>> {
    let mut out = Vec::new();
    walk(dir.as_ref(), suffix, &mut out)?;
    Ok(out)
}

fn walk(dir: &Path, suffix: &str, out: &mut Vec<ManifestRef>) -> Result<()> {
    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("reading directory {}", dir.display()))?
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("reading directory {}", dir.display()))?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();
        if name.starts_with('.') {
            continue;
        }
        let path = entry.path();
        let meta = match fs::metadata(&path) {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if meta.is_dir() {
            walk(&path, suffix, out)?;
            continue;
        }
        if meta.len() == 0 || !name.ends_with(suffix) {
            continue;
        }
        let text = match fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable file");
                continue;
            }
        };
        out.extend(parse_documents(&text, &path)?);
    }
    Ok(())
}

/// Parse every document of a (multi-document) YAML text.
pub fn parse_documents(text: &str, path: &Path) -> Result<Vec<ManifestRef>> {
    let mut out = Vec::new();
    for (i, de) in serde_yaml::Deserializer::from_str(text).enumerate() {
        let doc = Option::<Doc>::deserialize(de)
            .with_context(|| format!("parsing document {} of {}", i, path.display()))?;
        let Some(doc) = doc else { continue };
        if doc.kind.is_empty() || doc.metadata.name.is_empty() {
            warn!(path = %path.display(), doc = i, "document without kind or metadata.name; skipping");
            continue;
        }
        debug!(path = %path.display(), kind = %doc.kind, name = %doc.metadata.name, "manifest object");
        out.push(ManifestRef {
            api_version: doc.api_version,
            kind: doc.kind,
            namespace: doc.metadata.namespace,
            name: doc.metadata.name,
            path: path.to_path_buf(),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos();
        let dir = std::env::temp_dir().join(format!("kawait-{}-{}-{}", tag, std::process::id(), nanos));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    const MULTI: &str = "\
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
  namespace: shop
---
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: settings
---
apiVersion: v1
kind: List
";

    #[test]
    fn parses_multi_document_yaml() {
        let refs = parse_documents(MULTI, Path::new("x.yaml")).unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].type_spec(), "Deployment.v1.apps");
        assert_eq!(refs[0].target(), Target::new("Deployment.v1.apps", "shop", "web"));
        assert_eq!(refs[1].type_spec(), "ConfigMap.v1.");
        assert_eq!(refs[1].target().namespace, "default");
    }

    #[test]
    fn syntax_errors_abort() {
        assert!(parse_documents("kind: [unterminated", Path::new("bad.yaml")).is_err());
    }

    #[test]
    fn walks_directories_skipping_hidden_and_other_suffixes() {
        let root = temp_dir("walk");
        fs::create_dir_all(root.join("nested")).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join("app.yaml"), MULTI).unwrap();
        fs::write(root.join("nested/job.yaml"), "apiVersion: batch/v1\nkind: Job\nmetadata:\n  name: migrate\n").unwrap();
        fs::write(root.join(".git/hidden.yaml"), MULTI).unwrap();
        fs::write(root.join(".hidden.yaml"), MULTI).unwrap();
        fs::write(root.join("notes.txt"), "kind: [").unwrap();
        fs::write(root.join("empty.yaml"), "").unwrap();

        let refs = collect(&root, ".yaml").unwrap();
        let names: Vec<_> = refs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["web", "settings", "migrate"]);
        assert_eq!(refs[2].type_spec(), "Job.v1.batch");

        fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn missing_directory_is_an_error() {
        assert!(collect("/definitely/not/here", ".yaml").is_err());
    }
}
