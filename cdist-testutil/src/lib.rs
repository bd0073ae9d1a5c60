//! Shared test fixtures reused by every crate's `#[cfg(test)]` modules and
//! `tests/` suites, mirroring `testutil/src/lib.rs`'s role in the teacher
//! repo: small, un-opinionated helpers rather than a test framework.

use std::path::Path;

/// Writes `contents` to `path`, creating parent directories as needed, and
/// sets unix permission bits to `mode`.
pub fn make_file(path: &Path, contents: &[u8], mode: u32) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut permissions = std::fs::metadata(path).unwrap().permissions();
        permissions.set_mode(mode);
        std::fs::set_permissions(path, permissions).unwrap();
    }
}

/// Writes a `#!/bin/sh` script with `body` and marks it executable (0o755).
/// Used to fabricate explorers, manifests, gencode fragments, and transport
/// scripts without shelling out to a real editor.
pub fn make_script(path: &Path, body: &str) {
    make_file(path, format!("#!/bin/sh\n{body}\n").as_bytes(), 0o755);
}

/// Installs a fake `remote-exec` transport script at
/// `<target_dir>/transport/<scheme>/exec` that linearizes leading `KEY=VALUE`
/// words into `export` statements and then runs the remaining words as a
/// command (spec §6 transport contract), without actually leaving the
/// machine. Used by tests that exercise `RemoteExecutor` against a target
/// directory laid out the way `Target::remote_exec_path` expects.
pub fn install_fake_remote_exec(target_dir: &Path, scheme: &str) -> std::path::PathBuf {
    let path = target_dir.join("transport").join(scheme).join("exec");
    make_script(
        &path,
        r#"while :; do
  case "$1" in
    *=*) eval "export $1"; shift ;;
    *) break ;;
  esac
done
exec "$@""#,
    );
    path
}

/// Installs a fake `remote-copy` transport script at
/// `<target_dir>/transport/<scheme>/copy` that just `cp -r`s `SRC` to `DST`
/// locally, standing in for a real transfer in tests.
pub fn install_fake_remote_copy(target_dir: &Path, scheme: &str) -> std::path::PathBuf {
    let path = target_dir.join("transport").join(scheme).join("copy");
    make_script(&path, r#"cp -r "$1" "$2""#);
    path
}

/// Minimal on-disk local session layout (spec §6 Filesystem layout): the
/// `conf/{explorer,manifest,type,file,transport}` tree plus the initial
/// `manifest`, rooted at a fresh temp directory. Callers populate individual
/// conf-dir entries with `make_file`/`make_script` on top of this.
pub struct SessionFixture {
    pub dir: tempfile::TempDir,
}

impl SessionFixture {
    pub fn new() -> SessionFixture {
        let dir = tempfile::tempdir().unwrap();
        for sub in ["bin", "conf/explorer", "conf/manifest", "conf/type", "conf/file", "conf/transport"] {
            std::fs::create_dir_all(dir.path().join(sub)).unwrap();
        }
        make_script(&dir.path().join("manifest"), "");
        SessionFixture { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

impl Default for SessionFixture {
    fn default() -> SessionFixture {
        SessionFixture::new()
    }
}

/// Builds a minimal type directory under `<types_dir>/<name>/` with the
/// given explorer names and parameter-schema files, matching the on-disk
/// convention `cdist_core::typ::Type::from_dir` reads (spec §3 Type).
pub fn make_type(types_dir: &Path, name: &str, singleton: bool, explorers: &[&str]) {
    let type_dir = types_dir.join(name);
    std::fs::create_dir_all(&type_dir).unwrap();
    if singleton {
        std::fs::write(type_dir.join("singleton"), b"").unwrap();
    }
    for explorer in explorers {
        make_script(&type_dir.join("explorer").join(explorer), "echo fake");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_fixture_lays_out_conf_tree() {
        let session = SessionFixture::new();
        assert!(session.path().join("conf/explorer").is_dir());
        assert!(session.path().join("manifest").is_file());
    }

    #[test]
    fn make_type_writes_singleton_marker() {
        let dir = tempfile::tempdir().unwrap();
        make_type(dir.path(), "__hostname", true, &["os"]);
        assert!(dir.path().join("__hostname/singleton").is_file());
        assert!(dir.path().join("__hostname/explorer/os").is_file());
    }

    #[test]
    fn fake_remote_exec_runs_command_with_env() {
        let dir = tempfile::tempdir().unwrap();
        let script = install_fake_remote_exec(dir.path(), "ssh");
        assert!(script.is_file());
    }
}
