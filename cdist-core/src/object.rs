use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CdistError, Result};

/// A parameter value as stored on an [`Object`]. The type schema (§3 Type)
/// determines which shape a given parameter key takes; we keep the runtime
/// representation duck-typed the way the original's `cconfig` directories are,
/// rather than forcing every parameter into one Rust type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Scalar(String),
    List(Vec<String>),
    Bool(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectState {
    Created,
    Prepared,
    Done,
}

/// Strips one leading and one trailing `/` from a raw object-id and rejects
/// the illegal shapes the emulator interface (spec §6) names: an empty
/// component (`//`) or a literal `.`. Idempotent: `normalize(normalize(x)) ==
/// normalize(x)`, and is the identity on the empty id (the singleton case).
pub fn normalize_object_id(raw: &str) -> Result<String> {
    let mut s = raw;
    if let Some(rest) = s.strip_prefix('/') {
        s = rest;
    }
    if let Some(rest) = s.strip_suffix('/') {
        s = rest;
    }

    if s.is_empty() {
        return Ok(String::new());
    }
    if s.contains("//") {
        return Err(CdistError::IllegalObjectId {
            object_id: raw.to_string(),
            message: "illegal object id".to_string(),
        });
    }
    if s.split('/').any(|component| component == ".") {
        return Err(CdistError::IllegalObjectId {
            object_id: raw.to_string(),
            message: "illegal object id".to_string(),
        });
    }
    Ok(s.to_string())
}

/// Identity of an Object: a type name plus an optional (non-empty) object id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectName {
    pub type_name: String,
    pub object_id: Option<String>,
}

impl ObjectName {
    pub fn new(type_name: impl Into<String>, object_id: Option<String>) -> ObjectName {
        ObjectName {
            type_name: type_name.into(),
            object_id: object_id.filter(|id| !id.is_empty()),
        }
    }

    /// Parses `type-name/object-id` or a bare `type-name` (singleton) back
    /// into an `ObjectName`. Only splits on the first `/`, since an
    /// object-id may itself contain slashes.
    pub fn parse(canonical: &str) -> ObjectName {
        match canonical.split_once('/') {
            Some((type_name, object_id)) => ObjectName::new(type_name, Some(object_id.to_string())),
            None => ObjectName::new(canonical, None),
        }
    }

    pub fn canonical(&self) -> String {
        match &self.object_id {
            Some(id) => format!("{}/{}", self.type_name, id),
            None => self.type_name.clone(),
        }
    }
}

impl std::fmt::Display for ObjectName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

/// An instance of a Type (spec §3 Object).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Object {
    pub name: ObjectName,
    pub parameter: BTreeMap<String, ParamValue>,
    #[serde(default)]
    pub explorer: BTreeMap<String, String>,
    pub state: ObjectState,
    #[serde(default)]
    pub source: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub code_local: String,
    #[serde(default)]
    pub code_remote: String,
}

impl Object {
    pub fn new(name: ObjectName, parameter: BTreeMap<String, ParamValue>) -> Object {
        Object {
            name,
            parameter,
            explorer: BTreeMap::new(),
            state: ObjectState::Created,
            source: Vec::new(),
            tags: Vec::new(),
            code_local: String::new(),
            code_remote: String::new(),
        }
    }

    /// The on-disk directory layout for an object is owned by the object that
    /// created it (spec §3 Session/Paths ownership note). `to_dir`/`from_dir`
    /// must round-trip parameters, explorer outputs, state, and source
    /// (spec §8 round-trip laws).
    pub fn to_dir(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir).map_err(|e| CdistError::io(dir, e))?;
        let path = dir.join("object.json");
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| CdistError::io(&path, e))?;
        self.write_parameter_dir(&dir.join("parameter"))?;
        Ok(())
    }

    /// Materializes `parameter` as one file per key under `dir`, the
    /// `$__object/parameter/<key>` convention explorers and gencode scripts
    /// read (spec §4.1's transfer of "the object's `parameter` directory";
    /// `original_source/cdist/core.py`'s `cconfig`-backed object schema,
    /// which stores every non-default parameter this way). A scalar is the
    /// file's entire content; a list is one entry per line; a boolean
    /// parameter's file exists (empty) iff the flag is set. Rebuilt from
    /// scratch each call so parameters removed between writes don't leave a
    /// stale file behind.
    fn write_parameter_dir(&self, dir: &Path) -> Result<()> {
        if dir.exists() {
            std::fs::remove_dir_all(dir).map_err(|e| CdistError::io(dir, e))?;
        }
        std::fs::create_dir_all(dir).map_err(|e| CdistError::io(dir, e))?;
        for (key, value) in &self.parameter {
            let path = dir.join(key);
            match value {
                ParamValue::Scalar(s) => {
                    std::fs::write(&path, s).map_err(|e| CdistError::io(&path, e))?;
                }
                ParamValue::List(values) => {
                    std::fs::write(&path, values.join("\n")).map_err(|e| CdistError::io(&path, e))?;
                }
                ParamValue::Bool(set) => {
                    if *set {
                        std::fs::write(&path, b"").map_err(|e| CdistError::io(&path, e))?;
                    }
                }
            }
        }
        Ok(())
    }

    pub fn from_dir(dir: &Path) -> Result<Object> {
        let path = dir.join("object.json");
        let contents = std::fs::read_to_string(&path).map_err(|e| CdistError::io(&path, e))?;
        let object: Object = serde_json::from_str(&contents)?;
        Ok(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_one_leading_and_trailing_slash() {
        assert_eq!(normalize_object_id("/foo/bar/").unwrap(), "foo/bar");
        assert_eq!(normalize_object_id("foo/bar").unwrap(), "foo/bar");
    }

    #[test]
    fn normalize_is_identity_on_empty() {
        assert_eq!(normalize_object_id("").unwrap(), "");
        assert_eq!(normalize_object_id("/").unwrap(), "");
    }

    #[test]
    fn normalize_is_idempotent() {
        for raw in ["/foo/bar/", "foo/bar", "", "/", "a/b/c"] {
            let once = normalize_object_id(raw).unwrap();
            let twice = normalize_object_id(&once).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn normalize_rejects_empty_components() {
        assert!(normalize_object_id("foo//bar").is_err());
        assert!(normalize_object_id("foo/./bar").is_err());
        assert!(normalize_object_id(".").is_err());
    }

    #[test]
    fn canonical_name_roundtrips() {
        let n = ObjectName::new("__file", Some("etc/hosts".to_string()));
        assert_eq!(n.canonical(), "__file/etc/hosts");
        assert_eq!(ObjectName::parse(&n.canonical()), n);

        let singleton = ObjectName::new("__hostname", None);
        assert_eq!(singleton.canonical(), "__hostname");
        assert_eq!(ObjectName::parse(&singleton.canonical()), singleton);
    }

    #[test]
    fn object_round_trips_through_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut params = BTreeMap::new();
        params.insert(
            "value".to_string(),
            ParamValue::Scalar("1".to_string()),
        );
        let mut object = Object::new(ObjectName::new("__f", Some("k".to_string())), params);
        object.explorer.insert("os".to_string(), "linux".to_string());
        object.state = ObjectState::Prepared;
        object.source.push("/session/manifest".to_string());

        object.to_dir(dir.path()).unwrap();
        let loaded = Object::from_dir(dir.path()).unwrap();

        assert_eq!(loaded.name, object.name);
        assert_eq!(loaded.parameter, object.parameter);
        assert_eq!(loaded.explorer, object.explorer);
        assert_eq!(loaded.state, object.state);
        assert_eq!(loaded.source, object.source);
    }

    #[test]
    fn to_dir_writes_one_parameter_file_per_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut params = BTreeMap::new();
        params.insert("state".to_string(), ParamValue::Scalar("present".to_string()));
        params.insert(
            "onchange".to_string(),
            ParamValue::List(vec!["a".to_string(), "b".to_string()]),
        );
        params.insert("force".to_string(), ParamValue::Bool(true));
        params.insert("quiet".to_string(), ParamValue::Bool(false));
        let object = Object::new(ObjectName::new("__f", Some("k".to_string())), params);

        object.to_dir(dir.path()).unwrap();

        let parameter_dir = dir.path().join("parameter");
        assert!(parameter_dir.is_dir());
        assert_eq!(std::fs::read_to_string(parameter_dir.join("state")).unwrap(), "present");
        assert_eq!(std::fs::read_to_string(parameter_dir.join("onchange")).unwrap(), "a\nb");
        assert!(parameter_dir.join("force").is_file());
        assert!(!parameter_dir.join("quiet").exists());
    }

    #[test]
    fn to_dir_creates_an_empty_parameter_dir_when_there_are_no_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let object = Object::new(ObjectName::new("__hostname", None), BTreeMap::new());
        object.to_dir(dir.path()).unwrap();
        let parameter_dir = dir.path().join("parameter");
        assert!(parameter_dir.is_dir());
        assert_eq!(std::fs::read_dir(&parameter_dir).unwrap().count(), 0);
    }

    #[test]
    fn to_dir_clears_stale_parameter_files_on_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let mut params = BTreeMap::new();
        params.insert("state".to_string(), ParamValue::Scalar("present".to_string()));
        let mut object = Object::new(ObjectName::new("__f", Some("k".to_string())), params);
        object.to_dir(dir.path()).unwrap();
        assert!(dir.path().join("parameter/state").is_file());

        object.parameter.clear();
        object.to_dir(dir.path()).unwrap();
        assert!(!dir.path().join("parameter/state").exists());
    }
}
