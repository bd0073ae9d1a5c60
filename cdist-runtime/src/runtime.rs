//! The Runtime (spec §4.2): one Local executor, one Remote executor, one
//! type cache, one dependency store, and a lock protecting the in-memory
//! Target from concurrent mutation while its explorer outputs and messages
//! accumulate.

use std::collections::BTreeMap;

use async_latch::AsyncLatch;
use cdist_core::{LocalPaths, RemotePaths, Target, TargetPaths, TypeCache};
use cdist_depstore::DependencyStore;
use cdist_exec::{LocalExecutor, RemoteExecutor};
use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex as AsyncMutex;

pub struct Runtime {
    pub(crate) local: LocalExecutor,
    pub(crate) remote: RemoteExecutor,
    pub(crate) type_cache: TypeCache,
    pub(crate) dep_store: DependencyStore,
    pub(crate) local_paths: LocalPaths,
    pub(crate) target_paths: TargetPaths,
    pub(crate) remote_paths: RemotePaths,
    pub(crate) target: AsyncMutex<Target>,
    /// Per-type one-shot "explorers transferred" latches (spec §5
    /// Shared-resource policy): the first object of a type to need its
    /// explorers transfers them and triggers the latch; others await it.
    pub(crate) type_explorers_transferred: SyncMutex<BTreeMap<String, AsyncLatch>>,
    /// `config --dry-run`: gencode still runs (it only describes what would
    /// happen), but code-local/code-remote are never executed or transferred.
    pub(crate) dry_run: bool,
}

impl Runtime {
    pub fn new(
        target: Target,
        local_session_dir: impl Into<std::path::PathBuf>,
        remote_session_dir: impl Into<std::path::PathBuf>,
        types_dir: impl Into<std::path::PathBuf>,
    ) -> cdist_core::error::Result<Runtime> {
        Runtime::new_with_dry_run(target, local_session_dir, remote_session_dir, types_dir, false)
    }

    pub fn new_with_dry_run(
        target: Target,
        local_session_dir: impl Into<std::path::PathBuf>,
        remote_session_dir: impl Into<std::path::PathBuf>,
        types_dir: impl Into<std::path::PathBuf>,
        dry_run: bool,
    ) -> cdist_core::error::Result<Runtime> {
        let local_paths = LocalPaths::new(local_session_dir.into());
        let target_id = target.identifier();
        let target_paths = local_paths.target(&target_id);
        let remote_paths = RemotePaths::new(remote_session_dir.into());

        let mut base_env = cdist_exec::target_environ(&target);
        base_env.insert("CDIST_INTERNAL".to_string(), "yes".to_string());

        let dep_store = DependencyStore::new(target_paths.dependency())?;

        Ok(Runtime {
            local: LocalExecutor::new(base_env.clone()),
            remote: RemoteExecutor::new(
                target_paths.root.join(target.remote_exec_path()),
                target_paths.root.join(target.remote_copy_path()),
                base_env,
            ),
            type_cache: TypeCache::new(types_dir.into()),
            dep_store,
            local_paths,
            target_paths,
            remote_paths,
            target: AsyncMutex::new(target),
            type_explorers_transferred: SyncMutex::new(BTreeMap::new()),
            dry_run,
        })
    }

    pub fn local_paths(&self) -> &LocalPaths {
        &self.local_paths
    }

    pub fn target_paths(&self) -> &TargetPaths {
        &self.target_paths
    }

    pub fn remote_paths(&self) -> &RemotePaths {
        &self.remote_paths
    }

    pub fn dep_store(&self) -> &DependencyStore {
        &self.dep_store
    }

    pub fn type_cache(&self) -> &TypeCache {
        &self.type_cache
    }

    /// Snapshots the target's URL; cheap, immutable, used as a cache key by
    /// callers that don't want to hold the target lock.
    pub async fn target_url(&self) -> String {
        self.target.lock().await.url.clone()
    }

    /// The per-run object marker (spec §3 "Object marker"), the same for
    /// every object this Runtime realizes.
    pub async fn object_marker(&self) -> String {
        self.target.lock().await.object_marker.clone()
    }

    pub async fn target_messages(&self) -> Vec<String> {
        self.target.lock().await.messages.clone()
    }

    pub async fn explorer_snapshot(&self) -> BTreeMap<String, String> {
        self.target.lock().await.explorer.clone()
    }
}
