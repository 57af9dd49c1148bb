//! package.json access
//!
//! The manifest is kept as an order-preserving JSON object so a write only
//! touches the keys we changed.

use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MANIFEST_FILE: &str = "package.json";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("{path} is not a JSON object")]
    NotAnObject { path: PathBuf },
    #[error("\"scripts\" in {0} is not an object")]
    ScriptsNotAnObject(String),
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Parsed package.json
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    root: Map<String, Value>,
}

impl Manifest {
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(root) => Some(Self { root }),
            _ => None,
        }
    }

    pub fn parse(content: &str, path: &Path) -> Result<Self, ManifestError> {
        let value: Value = serde_json::from_str(content).map_err(|source| ManifestError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_value(value).ok_or_else(|| ManifestError::NotAnObject {
            path: path.to_path_buf(),
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.root.get("name").and_then(Value::as_str)
    }

    /// True if `name` appears in `dependencies` or `devDependencies`.
    pub fn has_dependency(&self, name: &str) -> bool {
        ["dependencies", "devDependencies"].iter().any(|section| {
            self.root
                .get(*section)
                .and_then(Value::as_object)
                .map(|deps| deps.contains_key(name))
                .unwrap_or(false)
        })
    }

    pub fn script(&self, name: &str) -> Option<&str> {
        self.root
            .get("scripts")
            .and_then(Value::as_object)
            .and_then(|scripts| scripts.get(name))
            .and_then(Value::as_str)
    }

    /// Merge `name: command` into `scripts`, creating the section if needed.
    ///
    /// An existing entry under the same name is replaced.
    pub fn set_script(&mut self, name: &str, command: &str) -> Result<(), ManifestError> {
        let scripts = self
            .root
            .entry("scripts")
            .or_insert_with(|| Value::Object(Map::new()));
        if scripts.is_null() {
            *scripts = Value::Object(Map::new());
        }
        let scripts = scripts
            .as_object_mut()
            .ok_or_else(|| ManifestError::ScriptsNotAnObject(MANIFEST_FILE.to_string()))?;
        scripts.insert(name.to_string(), Value::String(command.to_string()));
        Ok(())
    }

    pub fn to_pretty_string(&self) -> String {
        let mut out = serde_json::to_string_pretty(&self.root).unwrap_or_else(|_| "{}".to_string());
        out.push('\n');
        out
    }
}

/// Read/write access to the project manifest.
pub trait ManifestStore {
    fn load(&self) -> Result<Manifest, ManifestError>;
    fn save(&self, manifest: &Manifest) -> Result<(), ManifestError>;
}

/// package.json on disk
#[derive(Debug, Clone)]
pub struct ManifestFile {
    path: PathBuf,
}

impl ManifestFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(MANIFEST_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }
}

impl ManifestStore for ManifestFile {
    fn load(&self) -> Result<Manifest, ManifestError> {
        let content = fs::read_to_string(&self.path).map_err(|source| ManifestError::Read {
            path: self.path.clone(),
            source,
        })?;
        Manifest::parse(&content, &self.path)
    }

    fn save(&self, manifest: &Manifest) -> Result<(), ManifestError> {
        fs::write(&self.path, manifest.to_pretty_string()).map_err(|source| {
            ManifestError::Write {
                path: self.path.clone(),
                source,
            }
        })
    }
}
