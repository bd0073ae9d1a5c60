use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{CdistError, Result};

/// The parameter schema of a Type, split the way the spec's Type attributes
/// are: four named parameter classes plus a default mapping. Loaded once per
/// runtime and cached (spec §3 Type: "Immutable after load; cached per
/// runtime").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamSchema {
    pub required: Vec<String>,
    pub required_multiple: Vec<String>,
    pub optional: Vec<String>,
    pub optional_multiple: Vec<String>,
    pub boolean: Vec<String>,
    pub default: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct Type {
    pub name: String,
    pub singleton: bool,
    pub explorers: Vec<String>,
    pub schema: ParamSchema,
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(contents
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(CdistError::io(path, e)),
    }
}

fn list_dir_entries(dir: &Path) -> Result<Vec<String>> {
    match std::fs::read_dir(dir) {
        Ok(entries) => {
            let mut names = Vec::new();
            for entry in entries {
                let entry = entry.map_err(|e| CdistError::io(dir, e))?;
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
            names.sort();
            Ok(names)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(CdistError::io(dir, e)),
    }
}

impl Type {
    /// Loads a Type from `<session>/conf/type/<type-name>/`, mirroring the
    /// directory-as-schema convention ("duck-typed schema over JSON
    /// directories", SPEC_FULL.md). Each parameter class is one file of
    /// newline-separated parameter names under `parameter/`; `explorer/` is a
    /// directory whose entries are explorer names; `singleton` is a marker
    /// file whose mere presence sets the flag.
    pub fn from_dir(path: &Path, name: &str) -> Result<Type> {
        if !path.is_dir() {
            return Err(CdistError::TypeNotFound(name.to_string()));
        }
        let singleton = path.join("singleton").exists();
        let explorers = list_dir_entries(&path.join("explorer"))?;
        let param_dir = path.join("parameter");
        let schema = ParamSchema {
            required: read_lines(&param_dir.join("required"))?,
            required_multiple: read_lines(&param_dir.join("required_multiple"))?,
            optional: read_lines(&param_dir.join("optional"))?,
            optional_multiple: read_lines(&param_dir.join("optional_multiple"))?,
            boolean: read_lines(&param_dir.join("boolean"))?,
            default: {
                let mut default = BTreeMap::new();
                for line in read_lines(&param_dir.join("default"))? {
                    if let Some((k, v)) = line.split_once(' ') {
                        default.insert(k.to_string(), v.to_string());
                    }
                }
                default
            },
        };
        Ok(Type {
            name: name.to_string(),
            singleton,
            explorers,
            schema,
        })
    }

    pub fn manifest_path(&self, types_dir: &Path) -> std::path::PathBuf {
        types_dir.join(&self.name).join("manifest")
    }

    pub fn gencode_local_path(&self, types_dir: &Path) -> std::path::PathBuf {
        types_dir.join(&self.name).join("gencode-local")
    }

    pub fn gencode_remote_path(&self, types_dir: &Path) -> std::path::PathBuf {
        types_dir.join(&self.name).join("gencode-remote")
    }

    pub fn explorer_path(&self, types_dir: &Path, explorer: &str) -> std::path::PathBuf {
        types_dir.join(&self.name).join("explorer").join(explorer)
    }
}

/// An in-memory cache of loaded Types, keyed by name, shared by a Runtime.
pub struct TypeCache {
    types_dir: std::path::PathBuf,
    loaded: parking_lot::Mutex<BTreeMap<String, std::sync::Arc<Type>>>,
}

impl TypeCache {
    pub fn new(types_dir: std::path::PathBuf) -> TypeCache {
        TypeCache {
            types_dir,
            loaded: parking_lot::Mutex::new(BTreeMap::new()),
        }
    }

    pub fn get(&self, name: &str) -> Result<std::sync::Arc<Type>> {
        if let Some(t) = self.loaded.lock().get(name) {
            return Ok(t.clone());
        }
        let t = std::sync::Arc::new(Type::from_dir(&self.types_dir.join(name), name)?);
        self.loaded.lock().insert(name.to_string(), t.clone());
        Ok(t)
    }

    pub fn types_dir(&self) -> &Path {
        &self.types_dir
    }
}
