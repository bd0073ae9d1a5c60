//! Per-object Runtime primitives (spec §4.2, step 5's building blocks). The
//! Object Manager (`cdist-manager`) composes these into the prepare/apply
//! lifecycle; none of them decide ordering themselves.

use async_latch::AsyncLatch;
use cdist_core::error::{CdistError, Result};
use cdist_core::typ::Type;
use cdist_core::Object;

use crate::messages::MessagesScope;
use crate::runtime::Runtime;

enum GencodeKind {
    Local,
    Remote,
}

impl Runtime {
    /// Transfers the type's explorers to the target if this is the first
    /// object of that type to need them (one-shot per-type event, spec §5),
    /// transfers `object`'s own parameter directory, then runs every
    /// explorer and records its output onto `object`.
    pub async fn run_type_explorers(&self, object: &mut Object) -> Result<()> {
        let typ = self.type_cache.get(&object.name.type_name)?;
        if typ.explorers.is_empty() {
            return Ok(());
        }
        self.ensure_type_explorers_transferred(&typ).await?;

        let canonical = object.name.canonical();
        let object_marker = self.target.lock().await.object_marker.clone();
        let local_dir = self.target_paths.object_dir(&canonical, &object_marker);
        let remote_dir = self.remote_paths.object_dir(&canonical, &object_marker);

        self.remote
            .transfer(
                &local_dir.join("parameter"),
                &remote_dir.join("parameter").display().to_string(),
            )
            .await?;

        let remote_type_explorer_dir = self.remote_paths.conf_type().join(&typ.name).join("explorer");
        let mut env = cdist_exec::object_environ(&canonical, object.name.object_id.as_deref(), &typ.name);
        env.insert("__explorer".to_string(), remote_type_explorer_dir.display().to_string());

        let local_explorer_dir = local_dir.join("explorer");
        tokio::fs::create_dir_all(&local_explorer_dir)
            .await
            .map_err(|e| CdistError::io(&local_explorer_dir, e))?;

        for name in &typ.explorers {
            let path = remote_type_explorer_dir.join(name).display().to_string();
            let output = self.remote.check_output(&[path], Some(&env)).await?;
            let value = String::from_utf8_lossy(&output).trim_end().to_string();

            let output_path = local_explorer_dir.join(name);
            tokio::fs::write(&output_path, &value)
                .await
                .map_err(|e| CdistError::io(&output_path, e))?;
            object.explorer.insert(name.clone(), value);
        }

        object.to_dir(&local_dir)?;
        Ok(())
    }

    async fn ensure_type_explorers_transferred(&self, typ: &Type) -> Result<()> {
        enum Role {
            Leader(AsyncLatch),
            Follower(AsyncLatch),
        }

        let role = {
            let mut transferred = self.type_explorers_transferred.lock();
            if let Some(latch) = transferred.get(&typ.name) {
                Role::Follower(latch.clone())
            } else {
                let latch = AsyncLatch::new();
                transferred.insert(typ.name.clone(), latch.clone());
                Role::Leader(latch)
            }
        };

        match role {
            Role::Follower(latch) => {
                latch.triggered().await;
                Ok(())
            }
            Role::Leader(latch) => {
                let local_dir = self.type_cache.types_dir().join(&typ.name).join("explorer");
                let remote_dir = self.remote_paths.conf_type().join(&typ.name).join("explorer");
                self.remote
                    .transfer(&local_dir, &remote_dir.display().to_string())
                    .await?;
                self.remote
                    .check_call(
                        &[
                            "chmod".to_string(),
                            "0700".to_string(),
                            format!("{}/*", remote_dir.display()),
                        ],
                        None,
                    )
                    .await?;
                latch.trigger();
                Ok(())
            }
        }
    }

    /// Runs `<type>/manifest` locally, inside a messages scope, recording
    /// this manifest path onto the object's `source` list on success.
    pub async fn run_type_manifest(&self, object: &mut Object) -> Result<()> {
        let typ = self.type_cache.get(&object.name.type_name)?;
        let manifest_path = typ.manifest_path(self.type_cache.types_dir());
        if !manifest_path.is_file() {
            return Ok(());
        }

        let canonical = object.name.canonical();
        let object_marker = self.target.lock().await.object_marker.clone();
        let current_messages = self.target.lock().await.messages.clone();
        let scope = MessagesScope::open(&canonical, &current_messages)?;

        let mut env = cdist_exec::object_environ(&canonical, object.name.object_id.as_deref(), &typ.name);
        env.insert("__global".to_string(), self.local_paths.session.display().to_string());
        env.insert("__cdist_manifest".to_string(), manifest_path.display().to_string());
        env.insert("__manifest".to_string(), self.local_paths.conf_manifest().display().to_string());
        // A type manifest invokes the emulator to create auto-children (spec
        // §2, §6); the emulator requires these three just as the initial
        // manifest does (`cdist-cli`'s `manifest_env`).
        env.insert(
            "__cdist_local_session".to_string(),
            self.local_paths.session.display().to_string(),
        );
        env.insert(
            "__cdist_remote_session".to_string(),
            self.remote_paths.session.display().to_string(),
        );
        env.insert(
            "__cdist_local_target".to_string(),
            self.target_paths.root.display().to_string(),
        );
        env.insert(
            "__explorer".to_string(),
            self.target_paths
                .object_dir(&canonical, &object_marker)
                .join("explorer")
                .display()
                .to_string(),
        );
        env.insert(
            "PATH".to_string(),
            format!(
                "{}:{}",
                self.local_paths.bin().display(),
                std::env::var("PATH").unwrap_or_default()
            ),
        );
        env.extend(scope.env());

        let result = self
            .local
            .check_call(&[manifest_path.display().to_string()], Some(&env))
            .await;

        let new_messages = scope.close()?;
        if !new_messages.is_empty() {
            self.target.lock().await.messages.extend(new_messages);
        }
        result?;

        object.source.push(manifest_path.display().to_string());
        Ok(())
    }

    pub async fn run_gencode_local(&self, object: &Object) -> Result<String> {
        self.run_gencode(object, GencodeKind::Local).await
    }

    pub async fn run_gencode_remote(&self, object: &Object) -> Result<String> {
        self.run_gencode(object, GencodeKind::Remote).await
    }

    async fn run_gencode(&self, object: &Object, kind: GencodeKind) -> Result<String> {
        let typ = self.type_cache.get(&object.name.type_name)?;
        let script = match kind {
            GencodeKind::Local => typ.gencode_local_path(self.type_cache.types_dir()),
            GencodeKind::Remote => typ.gencode_remote_path(self.type_cache.types_dir()),
        };
        if !script.is_file() {
            return Ok(String::new());
        }

        let canonical = object.name.canonical();
        let current_messages = self.target.lock().await.messages.clone();
        let scope = MessagesScope::open(&canonical, &current_messages)?;

        let mut env = cdist_exec::object_environ(&canonical, object.name.object_id.as_deref(), &typ.name);
        env.insert("__global".to_string(), self.local_paths.session.display().to_string());
        env.extend(scope.env());

        let result = self
            .local
            .check_output(&[script.display().to_string()], Some(&env))
            .await;

        let new_messages = scope.close()?;
        if !new_messages.is_empty() {
            self.target.lock().await.messages.extend(new_messages);
        }

        Ok(String::from_utf8_lossy(&result?).into_owned())
    }

    /// Writes `object.code_remote` to its local object directory, then
    /// transfers it to the target and locks it down.
    pub async fn transfer_code_remote(&self, object: &Object) -> Result<()> {
        let canonical = object.name.canonical();
        let object_marker = self.target.lock().await.object_marker.clone();
        let local_dir = self.target_paths.object_dir(&canonical, &object_marker);
        let remote_dir = self.remote_paths.object_dir(&canonical, &object_marker);

        let local_code_remote = local_dir.join("code-remote");
        tokio::fs::write(&local_code_remote, &object.code_remote)
            .await
            .map_err(|e| CdistError::io(&local_code_remote, e))?;

        if self.dry_run {
            log::info!("dry-run: not transferring code-remote for {}", canonical);
            return Ok(());
        }

        self.remote.mkdir(&remote_dir.display().to_string()).await?;
        let remote_code_remote = remote_dir.join("code-remote").display().to_string();
        self.remote.transfer(&local_code_remote, &remote_code_remote).await?;
        self.remote
            .check_call(&["chmod".to_string(), "0700".to_string(), remote_code_remote], None)
            .await?;
        Ok(())
    }

    /// Executes `object.code_local`'s captured shell text directly, via the
    /// local shell.
    pub async fn run_code_local(&self, object: &Object) -> Result<()> {
        if object.code_local.trim().is_empty() {
            return Ok(());
        }
        if self.dry_run {
            log::info!("dry-run: not running code-local for {}", object.name.canonical());
            return Ok(());
        }
        self.local.check_call(&[object.code_local.clone()], None).await
    }

    /// Persists `object` to its local on-disk directory (spec §3 ownership
    /// note: an object directory is owned by the object that created it).
    pub async fn sync_object(&self, object: &Object) -> Result<()> {
        let canonical = object.name.canonical();
        let object_marker = self.target.lock().await.object_marker.clone();
        let dir = self.target_paths.object_dir(&canonical, &object_marker);
        object.to_dir(&dir)
    }

    /// Executes the already-transferred `code-remote` script on the target.
    pub async fn run_code_remote(&self, object: &Object) -> Result<()> {
        if object.code_remote.trim().is_empty() {
            return Ok(());
        }
        if self.dry_run {
            log::info!("dry-run: not running code-remote for {}", object.name.canonical());
            return Ok(());
        }
        let canonical = object.name.canonical();
        let object_marker = self.target.lock().await.object_marker.clone();
        let remote_dir = self.remote_paths.object_dir(&canonical, &object_marker);
        let remote_code_remote = remote_dir.join("code-remote").display().to_string();
        self.remote.check_call(&[remote_code_remote], None).await
    }
}
