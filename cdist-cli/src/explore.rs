//! The `explore` subcommand (spec §6): run global explorers against one
//! target (default the `__local__` sentinel) and print their output.
//! Grounded in `examples/original_source/cdist/cli/commands/explore.py`.

use std::sync::Arc;

use cdist_core::error::Result;
use cdist_core::LOCAL_TARGET_SENTINEL;
use cdist_runtime::Runtime;

use crate::session::SessionBuilder;
use crate::target_util::make_target;

#[derive(clap::Args, Debug)]
pub struct ExploreArgs {
    /// Run only the given explorers instead of all of them; may repeat or
    /// comma-split.
    #[arg(short = 'e', long = "explorer", value_delimiter = ',')]
    explorer: Vec<String>,

    /// Output as JSON instead of text.
    #[arg(short = 'j', long = "json")]
    json_output: bool,

    /// A conf-dir to merge into the session; may be repeated.
    #[arg(long = "conf-dir")]
    conf_dir: Vec<std::path::PathBuf>,

    /// The host to explore. Defaults to the local machine.
    #[arg(default_value = LOCAL_TARGET_SENTINEL)]
    target: String,
}

pub async fn run(args: ExploreArgs) -> Result<i32> {
    let session_dir = tempfile::tempdir().map_err(|e| cdist_core::error::CdistError::io(std::env::temp_dir(), e))?;
    let emulator_path = crate::emulator_path()?;
    let mut session = SessionBuilder::new(session_dir.path().to_path_buf(), emulator_path)?;
    for dir in crate::resolve_conf_dirs(&args.conf_dir) {
        session.add_conf_dir(&dir)?;
    }

    let session_id = crate::new_session_id()?;
    let remote_session_dir = cdist_core::session_id::default_remote_session_dir(&session_id);

    let target = make_target(&args.target)?;
    let is_local = target.url == LOCAL_TARGET_SENTINEL;
    let target_paths = session.local_paths.target(&target.identifier());
    if !is_local {
        session.wire_target_transport(&target_paths, &target)?;
    }

    let runtime = Arc::new(Runtime::new(
        target,
        session.local_paths.session.clone(),
        remote_session_dir,
        session.local_paths.conf_type(),
    )?);

    let names = if args.explorer.is_empty() { None } else { Some(args.explorer.as_slice()) };

    if is_local {
        runtime.run_global_explorers_local(names).await?;
    } else {
        runtime.initialize().await?;
        runtime.transfer_global_explorers().await?;
        runtime.run_global_explorers(names).await?;
    }

    let explorer = runtime.explorer_snapshot().await;

    if args.json_output {
        println!("{}", serde_json::to_string(&explorer).map_err(cdist_core::error::CdistError::from)?);
    } else {
        for (name, value) in &explorer {
            for line in value.split('\n') {
                println!("{name}: {line}");
            }
        }
    }
    Ok(0)
}
