//! Target-wide lifecycle steps (spec §4.2, steps 1-4 and 6). Object-level
//! steps (step 5, delegated to the Object Manager in `cdist-manager`) live in
//! `object_ops`.

use cdist_core::error::Result;

use crate::runtime::Runtime;

impl Runtime {
    /// Step 1: set the process umask, then create the remote session
    /// directory tree.
    pub async fn initialize(&self) -> Result<()> {
        unsafe {
            libc::umask(0o077);
        }

        let remote_session = self.remote_paths.session.display().to_string();
        self.remote.mkdir(&remote_session).await?;
        self.remote
            .check_call(&["chmod".to_string(), "0700".to_string(), remote_session.clone()], None)
            .await?;
        self.remote
            .mkdir(&self.remote_paths.session.join("conf").display().to_string())
            .await?;
        self.remote
            .mkdir(&self.remote_paths.session.join("object").display().to_string())
            .await?;
        Ok(())
    }

    /// Step 2: transfer the local `conf/explorer` tree to the target.
    pub async fn transfer_global_explorers(&self) -> Result<()> {
        let local = self.local_paths.conf_explorer();
        let remote = self.remote_paths.conf_explorer();
        self.remote.transfer(&local, &remote.display().to_string()).await?;
        self.remote
            .check_call(
                &[
                    "chmod".to_string(),
                    "0700".to_string(),
                    format!("{}/*", remote.display()),
                ],
                None,
            )
            .await?;
        Ok(())
    }

    /// Step 3: run every requested global explorer (default: every file
    /// present locally) concurrently, recording output into
    /// `target.explorer`.
    pub async fn run_global_explorers(&self, names: Option<&[String]>) -> Result<()> {
        let names: Vec<String> = match names {
            Some(names) => names.to_vec(),
            None => list_explorer_names(&self.local_paths.conf_explorer())?,
        };

        let remote_explorer_dir = self.remote_paths.conf_explorer();
        let runs = names.iter().map(|name| {
            let path = remote_explorer_dir.join(name).display().to_string();
            async move {
                let output = self.remote.check_output(&[path], None).await?;
                let value = String::from_utf8_lossy(&output).trim_end().to_string();
                Ok::<(String, String), cdist_core::error::CdistError>((name.clone(), value))
            }
        });
        let results = futures::future::try_join_all(runs).await?;

        let mut target = self.target.lock().await;
        for (name, value) in results {
            target.explorer.insert(name, value);
        }
        drop(target);
        self.sync_target().await
    }

    /// Step 3 variant for the `__local__` sentinel target (spec §6 `explore`
    /// edge case): runs every global explorer directly through the local
    /// shell instead of transferring to and invoking a remote target, since
    /// there is no real remote to transfer to.
    pub async fn run_global_explorers_local(&self, names: Option<&[String]>) -> Result<()> {
        let names: Vec<String> = match names {
            Some(names) => names.to_vec(),
            None => list_explorer_names(&self.local_paths.conf_explorer())?,
        };

        let explorer_dir = self.local_paths.conf_explorer();
        let mut env = std::collections::BTreeMap::new();
        env.insert("__explorer".to_string(), explorer_dir.display().to_string());

        let runs = names.iter().map(|name| {
            let path = explorer_dir.join(name).display().to_string();
            let env = &env;
            async move {
                let output = self.local.check_output(&[path], Some(env)).await?;
                let value = String::from_utf8_lossy(&output).trim_end().to_string();
                Ok::<(String, String), cdist_core::error::CdistError>((name.clone(), value))
            }
        });
        let results = futures::future::try_join_all(runs).await?;

        let mut target = self.target.lock().await;
        for (name, value) in results {
            target.explorer.insert(name, value);
        }
        drop(target);
        self.sync_target().await
    }

    /// Step 4: run the session's initial manifest locally as a shell script.
    /// The manifest invokes the emulator (a separate process) per object it
    /// declares; this step's only job is to start that script and propagate
    /// its failure.
    pub async fn run_initial_manifest(&self, manifest_env: &std::collections::BTreeMap<String, String>) -> Result<()> {
        let manifest = self.local_paths.initial_manifest();
        self.local
            .check_call(&[manifest.display().to_string()], Some(manifest_env))
            .await
    }

    /// Step 6: persist the target's accumulated explorer outputs and
    /// messages to disk.
    pub async fn finalize(&self) -> Result<()> {
        self.sync_target().await
    }

    /// Persists the in-memory target under a lock, so concurrent object
    /// realizations never interleave writes (spec §5 Shared-resource
    /// policy).
    pub async fn sync_target(&self) -> Result<()> {
        let target = self.target.lock().await;
        target.to_dir(&self.target_paths.root)
    }
}

fn list_explorer_names(dir: &std::path::Path) -> Result<Vec<String>> {
    match std::fs::read_dir(dir) {
        Ok(entries) => {
            let mut names = Vec::new();
            for entry in entries {
                let entry = entry.map_err(|e| cdist_core::error::CdistError::io(dir, e))?;
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
            names.sort();
            Ok(names)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(cdist_core::error::CdistError::io(dir, e)),
    }
}
