//! The `config` subcommand (spec §6): realize a catalog of objects on each
//! given target, in parallel or sequentially. Grounded in
//! `examples/original_source/cdist/cli/commands/config.py`'s `main`, with
//! `stage_prepare`/`stage_run` replaced by the already-event-driven
//! `cdist_manager::ObjectManager`.

use std::path::PathBuf;
use std::sync::Arc;

use cdist_core::error::{CdistError, Result};
use cdist_manager::{ObjectManager, TagFilter};
use cdist_runtime::Runtime;

use crate::session::SessionBuilder;
use crate::target_util::make_target;

#[derive(clap::Args, Debug)]
pub struct ConfigArgs {
    /// Path to a cdist manifest, or '-' to read from stdin.
    #[arg(short = 'm', long)]
    manifest: Option<String>,

    /// A conf-dir to merge into the session; may be repeated, later entries
    /// override earlier ones. Defaults to `$CDIST_PATH` (colon-separated) if
    /// set, otherwise `~/.cdist/conf`.
    #[arg(long = "conf-dir")]
    conf_dir: Vec<PathBuf>,

    /// Only apply objects with the given tag.
    #[arg(long = "only-tag", value_delimiter = ',')]
    only_tag: Vec<String>,

    /// Apply untagged objects and those with the given tag.
    #[arg(long = "include-tag", value_delimiter = ',')]
    include_tag: Vec<String>,

    /// Apply all objects except those with the given tag.
    #[arg(long = "exclude-tag", value_delimiter = ',')]
    exclude_tag: Vec<String>,

    /// Do not execute code-local/code-remote.
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Operate on multiple hosts sequentially (default).
    #[arg(short = 's', long, conflicts_with = "parallel")]
    sequential: bool,

    /// Operate on multiple hosts in parallel.
    #[arg(short = 'p', long)]
    parallel: bool,

    /// Hostnames or URLs of the targets to configure.
    target: Vec<String>,
}

/// One target's worth of state needed to drive its `configure_target`
/// sequence (spec §4.2 steps 1-6) to completion.
struct TargetRun {
    runtime: Arc<Runtime>,
    manager: Arc<ObjectManager>,
}

pub async fn run(args: ConfigArgs) -> Result<i32> {
    if args.target.is_empty() {
        log::debug!("no target given, nothing to do");
        return Ok(0);
    }

    if !args.only_tag.is_empty() && !args.include_tag.is_empty() {
        return Err(CdistError::ConflictingTags(
            "--only-tag and --include-tag are mutually exclusive".to_string(),
        ));
    }
    let tag_filter = TagFilter::new(args.only_tag.clone(), args.include_tag.clone(), args.exclude_tag.clone())?;
    log::debug!("operation mode: {}", if args.parallel { "parallel" } else { "sequential" });
    debug_assert!(!(args.sequential && args.parallel), "clap's conflicts_with should prevent this");

    let manifest_contents = crate::read_manifest_source(args.manifest.as_deref())?;

    let session_dir = tempfile::tempdir().map_err(|e| CdistError::io(std::env::temp_dir(), e))?;
    let emulator_path = crate::emulator_path()?;
    let mut session = SessionBuilder::new(session_dir.path().to_path_buf(), emulator_path)?;
    for dir in crate::resolve_conf_dirs(&args.conf_dir) {
        session.add_conf_dir(&dir)?;
    }
    session.write_initial_manifest(manifest_contents.as_deref())?;

    let session_id = crate::new_session_id()?;
    let remote_session_dir = cdist_core::session_id::default_remote_session_dir(&session_id);

    let mut runs = Vec::new();
    for url in &args.target {
        let target = make_target(url)?;
        let target_paths = session.local_paths.target(&target.identifier());
        session.wire_target_transport(&target_paths, &target)?;

        let runtime = Arc::new(Runtime::new_with_dry_run(
            target,
            session.local_paths.session.clone(),
            remote_session_dir.clone(),
            session.local_paths.conf_type(),
            args.dry_run,
        )?);
        let manager = ObjectManager::new(runtime.clone(), tag_filter.clone());
        runs.push(TargetRun { runtime, manager });
    }

    let results: Vec<Result<()>> = if args.parallel {
        futures::future::join_all(runs.into_iter().map(configure_target)).await
    } else {
        let mut results = Vec::new();
        for run in runs {
            results.push(configure_target(run).await);
        }
        results
    };

    for result in results {
        if let Err(e) = result {
            log::error!("{e}");
            return Ok(1);
        }
    }
    Ok(0)
}

/// spec §4.2's `configure_target`: initialize, transfer + run global
/// explorers, run the initial manifest, drive the Object Manager, finalize.
async fn configure_target(run: TargetRun) -> Result<()> {
    let TargetRun { runtime, manager } = run;

    runtime.initialize().await?;
    runtime.transfer_global_explorers().await?;
    runtime.run_global_explorers(None).await?;
    runtime.run_initial_manifest(&manifest_env(&runtime)).await?;
    manager.process().await?;
    runtime.finalize().await
}

/// Environment for the initial manifest invocation (spec §6 emulator
/// interface): the four required `__cdist_*` variables, plus a `PATH`
/// prefix so the manifest can resolve type names against `bin/`.
fn manifest_env(runtime: &Runtime) -> std::collections::BTreeMap<String, String> {
    let mut env = std::collections::BTreeMap::new();
    env.insert(
        "__cdist_local_session".to_string(),
        runtime.local_paths().session.display().to_string(),
    );
    env.insert(
        "__cdist_remote_session".to_string(),
        runtime.remote_paths().session.display().to_string(),
    );
    env.insert(
        "__cdist_local_target".to_string(),
        runtime.target_paths().root.display().to_string(),
    );
    env.insert(
        "__cdist_manifest".to_string(),
        runtime.local_paths().initial_manifest().display().to_string(),
    );
    env.insert(
        "PATH".to_string(),
        format!(
            "{}:{}",
            runtime.local_paths().bin().display(),
            std::env::var("PATH").unwrap_or_default()
        ),
    );
    env
}
