//! Session assembly: the conf-dir merger and on-disk Session layout that
//! spec.md §1 lists as an external collaborator (interface only). Grounded in
//! `examples/original_source/cdist/session.py`'s `Session.add_conf_dir`:
//! later conf-dirs override earlier ones entry-by-entry, and every known type
//! gets a `bin/<type-name>` emulator symlink.

use std::path::{Path, PathBuf};

use cdist_core::error::{CdistError, Result};
use cdist_core::{Target, TargetPaths};

const CONF_SUBDIRS: &[&str] = &["explorer", "file", "manifest", "transport", "type"];

/// Owns a freshly created local session directory and merges conf-dirs into
/// it one at a time, the way `Session.add_conf_dir` does.
pub struct SessionBuilder {
    pub local_paths: cdist_core::LocalPaths,
    emulator_path: PathBuf,
}

impl SessionBuilder {
    /// Lays out `bin/` and `conf/{explorer,file,manifest,transport,type}/`
    /// under a fresh `session_dir`, matching spec §6's Filesystem layout.
    pub fn new(session_dir: PathBuf, emulator_path: PathBuf) -> Result<SessionBuilder> {
        let local_paths = cdist_core::LocalPaths::new(session_dir);
        std::fs::create_dir_all(local_paths.bin()).map_err(|e| CdistError::io(local_paths.bin(), e))?;
        for sub in CONF_SUBDIRS {
            let dir = local_paths.conf().join(sub);
            std::fs::create_dir_all(&dir).map_err(|e| CdistError::io(&dir, e))?;
        }
        Ok(SessionBuilder {
            local_paths,
            emulator_path,
        })
    }

    /// Merges `conf_dir`'s `{explorer,file,manifest,transport,type}`
    /// subdirectories into the session, symlinking each entry; entries
    /// contributed by a later conf-dir override same-named ones from an
    /// earlier call (last writer wins, matching the original's plain dict
    /// assignment). Missing subdirectories are tolerated, since a conf-dir
    /// may contribute only a partial tree.
    pub fn add_conf_dir(&mut self, conf_dir: &Path) -> Result<()> {
        for sub in CONF_SUBDIRS {
            let source_dir = conf_dir.join(sub);
            let entries = match std::fs::read_dir(&source_dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(CdistError::io(&source_dir, e)),
            };
            let dest_dir = self.local_paths.conf().join(sub);
            for entry in entries {
                let entry = entry.map_err(|e| CdistError::io(&source_dir, e))?;
                let source = entry.path().canonicalize().unwrap_or(entry.path());
                let dest = dest_dir.join(entry.file_name());
                replace_symlink(&source, &dest)?;
            }
        }

        // Link the emulator to every type now known (source.py: "Link emulator to types").
        let type_dir = self.local_paths.conf_type();
        let entries = match std::fs::read_dir(&type_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(CdistError::io(&type_dir, e)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| CdistError::io(&type_dir, e))?;
            let dest = self.local_paths.bin().join(entry.file_name());
            replace_symlink(&self.emulator_path, &dest)?;
        }
        Ok(())
    }

    /// Writes the session's initial manifest (spec §6 Filesystem layout,
    /// distinct from the `conf/manifest` fragment directory). `source`
    /// is the path given to `--manifest`, or `None` for a no-op manifest.
    pub fn write_initial_manifest(&self, source: Option<&[u8]>) -> Result<()> {
        let path = self.local_paths.initial_manifest();
        let contents = source.unwrap_or(b"#!/bin/sh\n");
        std::fs::write(&path, contents).map_err(|e| CdistError::io(&path, e))?;
        set_executable(&path)?;
        Ok(())
    }

    /// Wires a target's own transport directory (`transport/<scheme-chain>/
    /// {exec,copy}`) from the merged `conf/transport/<primary-scheme>` entry.
    /// Only the first transport hop carries real scripts; composing wrapper
    /// transports (`ssh+sudo+chroot`) into one chained script is out of
    /// scope here (see DESIGN.md).
    pub fn wire_target_transport(&self, target_paths: &TargetPaths, target: &Target) -> Result<()> {
        let primary = target.transports.first().map(String::as_str).unwrap_or("ssh");
        let source_dir = self.local_paths.conf_transport().join(primary);

        let exec_dest = target_paths.root.join(target.remote_exec_path());
        let copy_dest = target_paths.root.join(target.remote_copy_path());
        if let Some(parent) = exec_dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CdistError::io(parent, e))?;
        }
        replace_symlink(&source_dir.join("exec"), &exec_dest)?;
        replace_symlink(&source_dir.join("copy"), &copy_dest)?;
        Ok(())
    }
}

#[cfg(unix)]
fn replace_symlink(source: &Path, dest: &Path) -> Result<()> {
    if dest.symlink_metadata().is_ok() {
        std::fs::remove_file(dest).map_err(|e| CdistError::io(dest, e))?;
    }
    std::os::unix::fs::symlink(source, dest).map_err(|e| CdistError::io(dest, e))
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut permissions = std::fs::metadata(path).map_err(|e| CdistError::io(path, e))?.permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(path, permissions).map_err(|e| CdistError::io(path, e))
}
