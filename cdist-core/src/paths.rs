use std::path::{Path, PathBuf};

/// Local, rooted directory tree for one session (spec §3 Session/Paths, §6
/// Filesystem layout). The session directory is owned by one process
/// invocation.
#[derive(Debug, Clone)]
pub struct LocalPaths {
    pub session: PathBuf,
}

impl LocalPaths {
    pub fn new(session: impl Into<PathBuf>) -> LocalPaths {
        LocalPaths {
            session: session.into(),
        }
    }

    pub fn bin(&self) -> PathBuf {
        self.session.join("bin")
    }

    pub fn conf(&self) -> PathBuf {
        self.session.join("conf")
    }

    pub fn conf_explorer(&self) -> PathBuf {
        self.conf().join("explorer")
    }

    pub fn conf_manifest(&self) -> PathBuf {
        self.conf().join("manifest")
    }

    pub fn conf_type(&self) -> PathBuf {
        self.conf().join("type")
    }

    pub fn conf_file(&self) -> PathBuf {
        self.conf().join("file")
    }

    pub fn conf_transport(&self) -> PathBuf {
        self.conf().join("transport")
    }

    /// The initial manifest, run once per target (distinct from
    /// `conf/manifest`, the directory of manifest fragments contributed by
    /// conf-dirs).
    pub fn initial_manifest(&self) -> PathBuf {
        self.session.join("manifest")
    }

    pub fn targets(&self) -> PathBuf {
        self.session.join("targets")
    }

    /// A target directory is owned by its Runtime (spec §3 ownership note).
    pub fn target(&self, target_id: &str) -> TargetPaths {
        TargetPaths::new(self.targets().join(target_id))
    }
}

/// Per-target local directory tree, under `session/targets/<id>/`.
#[derive(Debug, Clone)]
pub struct TargetPaths {
    pub root: PathBuf,
}

impl TargetPaths {
    pub fn new(root: PathBuf) -> TargetPaths {
        TargetPaths { root }
    }

    pub fn object(&self) -> PathBuf {
        self.root.join("object")
    }

    /// Each object directory is owned by the object that created it (via the
    /// emulator). `object_marker` nests object contents under a per-run
    /// randomized directory so arbitrary object-ids can't collide with this
    /// metadata level.
    pub fn object_dir(&self, object_name: &str, object_marker: &str) -> PathBuf {
        self.object().join(object_name).join(object_marker)
    }

    pub fn explorer(&self) -> PathBuf {
        self.root.join("explorer")
    }

    pub fn messages(&self) -> PathBuf {
        self.root.join("messages")
    }

    pub fn dependency(&self) -> PathBuf {
        self.root.join("dependency")
    }

    pub fn transport(&self) -> PathBuf {
        self.root.join("transport")
    }
}

/// Remote, rooted directory tree on the target (spec §3, §6). Minimal
/// relative to the local tree: only what shell fragments on the target side
/// need (`conf/{explorer,type}`, `object`).
#[derive(Debug, Clone)]
pub struct RemotePaths {
    pub session: PathBuf,
}

impl RemotePaths {
    pub fn new(session: impl Into<PathBuf>) -> RemotePaths {
        RemotePaths {
            session: session.into(),
        }
    }

    pub fn conf_explorer(&self) -> PathBuf {
        self.session.join("conf").join("explorer")
    }

    pub fn conf_type(&self) -> PathBuf {
        self.session.join("conf").join("type")
    }

    pub fn object(&self) -> PathBuf {
        self.session.join("object")
    }

    pub fn object_dir(&self, object_name: &str, object_marker: &str) -> PathBuf {
        self.object().join(object_name).join(object_marker)
    }
}

/// Resolves a path relative to a base, rejecting absolute path escapes the way
/// object directory names (which come from user-controlled object-ids) must
/// never do.
pub fn join_relative(base: &Path, relative: &str) -> PathBuf {
    base.join(relative.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_paths_layout_matches_spec() {
        let paths = LocalPaths::new("/session");
        assert_eq!(paths.bin(), PathBuf::from("/session/bin"));
        assert_eq!(paths.conf_explorer(), PathBuf::from("/session/conf/explorer"));
        assert_eq!(paths.conf_manifest(), PathBuf::from("/session/conf/manifest"));
        assert_eq!(paths.conf_type(), PathBuf::from("/session/conf/type"));
        assert_eq!(paths.initial_manifest(), PathBuf::from("/session/manifest"));
        assert_eq!(paths.targets(), PathBuf::from("/session/targets"));

        let target = paths.target("abc");
        assert_eq!(target.object(), PathBuf::from("/session/targets/abc/object"));
        assert_eq!(
            target.dependency(),
            PathBuf::from("/session/targets/abc/dependency")
        );
    }

    #[test]
    fn object_dir_nests_under_marker() {
        let paths = LocalPaths::new("/session");
        let target = paths.target("abc");
        assert_eq!(
            target.object_dir("__file/etc/hosts", ".cdist-xyz"),
            PathBuf::from("/session/targets/abc/object/__file/etc/hosts/.cdist-xyz")
        );
    }

    #[test]
    fn remote_paths_layout_matches_spec() {
        let paths = RemotePaths::new("/var/cache/cdist/sess");
        assert_eq!(
            paths.conf_type(),
            PathBuf::from("/var/cache/cdist/sess/conf/type")
        );
        assert_eq!(
            paths.object_dir("__file/x", ".cdist-m"),
            PathBuf::from("/var/cache/cdist/sess/object/__file/x/.cdist-m")
        );
    }
}
